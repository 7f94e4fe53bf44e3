//! hashrev CLI: load a circuit description and run loopy belief propagation on it.
//!
//! Usage:
//!   hashrev inspect -g circuit.txt                        # graph statistics
//!   hashrev run -g circuit.bin -O 3=1 -O 4=0              # one observation set
//!   hashrev batch obs.txt -g circuit.txt --truth t.txt    # one set per line
//!   hashrev compile circuit.txt circuit.bin               # cache the parsed graph

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use hashrev::lbp::{self, accuracy, Accuracy, BatchRun, LbpOutcome};
use hashrev::{Config, FactorGraph, LbpState, Prediction, VariableAssignment};
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hashrev")]
#[command(version)]
#[command(about = "Factor-graph inference for hash preimage search")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Circuit description, or a compiled graph (.bin). Overrides graph_file.
    #[arg(short, long, global = true, value_name = "FILE")]
    graph: Option<PathBuf>,

    /// Maximum number of LBP iterations
    #[arg(long, global = true, value_name = "N")]
    max_iter: Option<usize>,

    /// Message damping in [0, 1]
    #[arg(long, global = true, value_name = "D")]
    damping: Option<f64>,

    /// Convergence tolerance on log-likelihood ratios
    #[arg(long, global = true, value_name = "TOL")]
    tol: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print graph statistics
    Inspect {
        /// Log the variable/factor adjacency
        #[arg(long)]
        connections: bool,
    },
    /// Run LBP for a single observation set
    Run {
        /// Observed bit, as index=value (repeatable)
        #[arg(short = 'O', long = "observe", value_name = "IDX=BIT")]
        observed: Vec<VariableAssignment>,
        #[arg(short, long, value_enum, default_value_t = Output::Summary)]
        output: Output,
    },
    /// Run LBP for every observation set of a file, in parallel
    Batch {
        /// One observation set per line, whitespace-separated index=value
        #[arg(value_name = "OBSERVATIONS")]
        observations: PathBuf,
        /// Known bits, same format, one line per observation set
        #[arg(long, value_name = "FILE")]
        truth: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = Output::Summary)]
        output: Output,
    },
    /// Parse a circuit description and save the graph in binary form
    Compile { input: PathBuf, output: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Summary,
    Json,
}

#[derive(Serialize)]
struct RunReport<'a> {
    outcome: LbpOutcome,
    marginals: &'a [Prediction],
}

#[derive(Serialize)]
struct BatchReport<'a> {
    runs: &'a [BatchRun],
    accuracy: Option<Accuracy>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(max_iter) = cli.max_iter {
        config.lbp_max_iter = max_iter;
    }
    if let Some(damping) = cli.damping {
        config.lbp_damping = damping;
    }
    if let Some(tol) = cli.tol {
        config.lbp_tol = tol;
    }
    if let Some(graph) = cli.graph {
        config.graph_file = Some(graph);
    }
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Inspect { connections } => {
            config.print_connections |= connections;
            let graph = load(&config)?;
            println!("variables: {}", graph.num_rvs());
            println!("factors:   {}", graph.num_factors());
            println!("edges:     {}", graph.num_edges());
            println!("cyclic:    {}", graph.is_cyclic());
        }
        Command::Run { observed, output } => {
            let graph = load(&config)?;
            let mut state = LbpState::new(graph, &config)?;
            let outcome = state.run_lbp(&observed);
            let marginals = state.marginals();
            match output {
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&RunReport {
                        outcome,
                        marginals: &marginals,
                    })?
                ),
                Output::Summary => {
                    print_outcome(&outcome);
                    for (var, pred) in marginals.iter().enumerate() {
                        println!(
                            "  {:>6}  {:>12.6}  {}",
                            var, pred.log_likelihood_ratio, pred.prob_bit_is_one
                        );
                    }
                }
            }
        }
        Command::Batch {
            observations,
            truth,
            output,
        } => {
            let graph = load(&config)?;
            let runs = read_assignments(&observations)?;
            let res = lbp::run_batch(&graph, &config, &runs)?;
            let acc = match truth {
                Some(path) => {
                    let truths = read_assignments(&path)?;
                    if truths.len() != runs.len() {
                        bail!(
                            "{} has {} lines, expected {}",
                            path.display(),
                            truths.len(),
                            runs.len()
                        );
                    }
                    Some(accuracy(&res, &truths))
                }
                None => None,
            };
            match output {
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&BatchReport {
                        runs: &res,
                        accuracy: acc,
                    })?
                ),
                Output::Summary => {
                    let n_converged = res.iter().filter(|r| r.outcome.converged).count();
                    println!("runs:      {}", res.len());
                    println!("converged: {}", n_converged);
                    if let Some(acc) = acc {
                        println!(
                            "accuracy:  {}/{} ({:.4})",
                            acc.correct,
                            acc.total,
                            acc.ratio()
                        );
                    }
                }
            }
        }
        Command::Compile { input, output } => {
            let graph = lbp::load_graph_file(&input)?;
            let bytes = graph.to_bytes()?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(
                "Wrote {} ({} variables, {} factors).",
                output.display(),
                graph.num_rvs(),
                graph.num_factors()
            );
        }
    }
    Ok(())
}

fn load(config: &Config) -> anyhow::Result<Arc<FactorGraph>> {
    let Some(path) = config.graph_file.as_ref() else {
        bail!("No circuit given (pass --graph or set graph_file in the configuration)");
    };
    lbp::load_graph_with_config(config)
        .with_context(|| format!("Failed to load circuit {}", path.display()))
}

fn read_assignments(path: &Path) -> anyhow::Result<Vec<Vec<VariableAssignment>>> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    src.lines()
        .enumerate()
        .map(|(i, line)| {
            line.split_whitespace()
                .map(|tok| tok.parse::<VariableAssignment>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("{}:{}", path.display(), i + 1))
        })
        .collect()
}

fn print_outcome(outcome: &LbpOutcome) {
    if outcome.converged {
        println!("converged after {} iterations", outcome.iterations);
    } else {
        println!("not converged after {} iterations", outcome.iterations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn batch_arguments() {
        let cli = Cli::try_parse_from([
            "hashrev", "batch", "obs.txt", "--graph", "c.txt", "--truth", "t.txt",
        ])
        .unwrap();
        assert_eq!(cli.graph, Some(PathBuf::from("c.txt")));
        match cli.command {
            Command::Batch {
                observations,
                truth,
                ..
            } => {
                assert_eq!(observations, PathBuf::from("obs.txt"));
                assert_eq!(truth, Some(PathBuf::from("t.txt")));
            }
            _ => panic!("expected batch"),
        }
        // a lone positional is the observation file, not the graph
        let cli = Cli::try_parse_from(["hashrev", "-g", "c.bin", "batch", "obs.txt"]).unwrap();
        assert_eq!(cli.graph, Some(PathBuf::from("c.bin")));
        assert!(matches!(cli.command, Command::Batch { .. }));
    }

    #[test]
    fn run_observations() {
        let cli =
            Cli::try_parse_from(["hashrev", "run", "-g", "c.txt", "-O", "3=1", "-O", "4=0"])
                .unwrap();
        match cli.command {
            Command::Run { observed, .. } => assert_eq!(
                observed,
                vec![
                    VariableAssignment {
                        rv_index: 3,
                        value: true
                    },
                    VariableAssignment {
                        rv_index: 4,
                        value: false
                    },
                ]
            ),
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["hashrev", "run", "-O", "3=2"]).is_err());
    }
}
