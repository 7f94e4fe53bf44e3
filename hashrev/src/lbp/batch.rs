//! Many independent LBP runs over one shared graph.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use super::belief_propagation::{LbpError, LbpOutcome, LbpState, Prediction, VariableAssignment};
use super::factor_graph::FactorGraph;
use crate::Config;

/// Result of one run of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRun {
    pub outcome: LbpOutcome,
    pub marginals: Vec<Prediction>,
}

/// Run LBP once per observation set, in parallel. Each run owns its state, so results
/// are identical to running the sets one after the other.
pub fn run_batch(
    graph: &Arc<FactorGraph>,
    config: &Config,
    runs: &[Vec<VariableAssignment>],
) -> Result<Vec<BatchRun>, LbpError> {
    let template = LbpState::new(graph.clone(), config)?;
    log::info!("Running {} LBP instances...", runs.len());
    let start = std::time::Instant::now();
    let res = crate::utils::with_progress(
        |it_cnt| {
            runs.par_iter()
                .map_init(
                    || template.clone(),
                    |state, observed| {
                        let outcome = state.run_lbp(observed);
                        it_cnt.inc(1);
                        BatchRun {
                            outcome,
                            marginals: state.marginals(),
                        }
                    },
                )
                .collect::<Vec<_>>()
        },
        runs.len() as u64,
        "LBP runs",
        config,
    );
    let n_converged = res.iter().filter(|r| r.outcome.converged).count();
    log::info!(
        "Finished {} LBP instances ({} converged) in {:.3} seconds.",
        res.len(),
        n_converged,
        start.elapsed().as_secs_f64()
    );
    Ok(res)
}

/// Hard-decision accuracy of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Compare the predicted bit of every variable whose true value is known. `truths[i]`
/// holds the known bits of run `i`; extra runs or truths are ignored, as are truths
/// about variables outside the graph.
pub fn accuracy(runs: &[BatchRun], truths: &[Vec<VariableAssignment>]) -> Accuracy {
    let mut acc = Accuracy::default();
    for (run, truth) in runs.iter().zip(truths) {
        for t in truth {
            if let Some(pred) = run.marginals.get(t.rv_index) {
                acc.total += 1;
                if (pred.prob_bit_is_one == 1) == t.value {
                    acc.correct += 1;
                }
            }
        }
    }
    acc
}
