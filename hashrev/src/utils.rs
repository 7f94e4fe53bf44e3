use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hytra::TrAdder;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};

const REFRESH: Duration = Duration::from_millis(50);
const TEMPLATE: &str = "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (ETA {eta})";

/// Run `job`, which reports completed items on the counter it is given. A progress
/// bar over `total` items appears once `job` has been running for
/// `config.progress_min_time()`, if `config.show_progress` is set.
pub(crate) fn with_progress<F, T>(
    job: F,
    total: u64,
    label: &'static str,
    config: &crate::Config,
) -> T
where
    F: FnOnce(&TrAdder<u64>) -> T + Send,
    T: Send,
{
    let done: TrAdder<u64> = TrAdder::new();
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        let watcher = config.show_progress.then(|| {
            let (done, stop) = (&done, &stop);
            let delay = config.progress_min_time();
            s.spawn(move || watch(done, stop, delay, total, label))
        });
        let res = job(&done);
        stop.store(true, Ordering::Release);
        // wakes the watcher whether it is parked in the delay or in the refresh loop
        if let Some(watcher) = watcher {
            watcher.thread().unpark();
        }
        res
    })
}

/// Body of the progress thread: returns early if the job completes within `delay`.
fn watch(
    done: &TrAdder<u64>,
    stop: &AtomicBool,
    delay: Duration,
    total: u64,
    label: &'static str,
) {
    let deadline = Instant::now() + delay;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        if left.is_zero() {
            break;
        }
        thread::park_timeout(left);
        if stop.load(Ordering::Acquire) {
            return;
        }
    }
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .unwrap_or_else(|e| {
            log::debug!("Invalid progress template: {}", e);
            ProgressStyle::default_bar()
        });
    let bar = ProgressBar::new(total)
        .with_style(style)
        .with_finish(ProgressFinish::AndClear)
        .with_message(label)
        .with_position(done.get());
    while !stop.load(Ordering::Acquire) {
        bar.set_position(done.get());
        thread::park_timeout(REFRESH);
    }
    bar.finish_and_clear();
}
