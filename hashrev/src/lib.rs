//! Factor-graph inference for hash preimage search.
//!
//! A hash function's Boolean circuit is loaded as a factor graph (one factor per
//! gate, one random variable per wire). Loopy belief propagation then estimates,
//! for every wire, the log-likelihood ratio of the bit being one given a set of
//! observed bits (typically the target hash output).

pub mod lbp;
pub(crate) mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lbp::{
    load_compiled_graph_file, load_graph, load_graph_file, load_graph_with_config, run_batch,
    Accuracy, BatchRun, FactorGraph, FactorKind, GraphBuildError, LbpError, LbpOutcome, LbpState,
    LbpStatus, Prediction, Probability, VariableAssignment,
};

pub type Result<T> = std::result::Result<T, HashRevError>;

#[derive(Error, Debug)]
pub enum HashRevError {
    #[error(transparent)]
    Graph(#[from] GraphBuildError),
    #[error(transparent)]
    Lbp(#[from] LbpError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialized(#[from] lbp::FGError),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Damping must be in [0, 1], got {0}.")]
    InvalidDamping(f64),
    #[error("The maximum number of LBP iterations must be positive.")]
    ZeroIterations,
    #[error("Convergence tolerance must be finite and positive, got {0}.")]
    InvalidTolerance(f64),
    #[error("No graph file configured.")]
    NoGraphFile,
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of random variables the circuit is expected to have.
    /// Checked against the loaded graph if set.
    pub num_rvs: Option<usize>,
    /// Maximum number of loopy BP rounds per run.
    pub lbp_max_iter: usize,
    /// Weight of the fresh message when blending with the previous one.
    /// 1 replaces messages, 0 freezes them.
    pub lbp_damping: f64,
    /// Absolute tolerance on log-likelihood ratios for convergence.
    pub lbp_tol: f64,
    pub graph_file: Option<PathBuf>,
    /// Log the variable/factor adjacency after loading the graph.
    pub print_connections: bool,
    pub show_progress: bool,
    /// Computation time (ms) after which a progress bar is displayed.
    /// This avoids showing progress bars for negligible amounts of time.
    pub progress_min_time_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_default_timing()
    }
}

impl Config {
    pub fn with_default_timing() -> Self {
        Self {
            num_rvs: None,
            lbp_max_iter: 50,
            lbp_damping: 0.5,
            lbp_tol: 1e-9,
            graph_file: None,
            print_connections: false,
            show_progress: true,
            progress_min_time_ms: 500,
        }
    }
    pub fn no_progress() -> Self {
        Self {
            show_progress: false,
            ..Self::with_default_timing()
        }
    }
    pub fn progress_min_time(&self) -> Duration {
        Duration::from_millis(self.progress_min_time_ms)
    }

    pub fn from_toml_str(src: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.lbp_damping) {
            return Err(ConfigError::InvalidDamping(self.lbp_damping));
        }
        if self.lbp_max_iter == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !(self.lbp_tol.is_finite() && self.lbp_tol > 0.0) {
            return Err(ConfigError::InvalidTolerance(self.lbp_tol));
        }
        Ok(())
    }
}
