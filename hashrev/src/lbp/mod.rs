mod batch;
mod belief_propagation;
mod factor_graph;
mod fg_build;
mod fg_parser;
mod probability;

use std::path::Path;
use std::sync::Arc;

pub use batch::{accuracy, run_batch, Accuracy, BatchRun};
pub use belief_propagation::{
    equal, AssignmentParseError, LbpError, LbpOutcome, LbpState, LbpStatus, Prediction,
    VariableAssignment,
};
pub use factor_graph::{EdgeId, FGError, Factor, FactorGraph, FactorId, FactorKind, RandomVariable, VarId};
pub use fg_build::GraphBuildError;
pub use probability::{Probability, MIN_PROBA};

/// Extension of files written by [`FactorGraph::to_bytes`].
pub const COMPILED_EXTENSION: &str = "bin";

/// Build the factor graph of a circuit description (one `type;primary;deps...` line per
/// factor).
pub fn load_graph(description: &str) -> Result<FactorGraph, GraphBuildError> {
    let stmts = fg_parser::parse(description).map_err(GraphBuildError::Parse)?;
    fg_build::build_graph(stmts.as_slice())
}

pub fn load_graph_file(path: impl AsRef<Path>) -> crate::Result<FactorGraph> {
    let path = path.as_ref();
    let description = std::fs::read_to_string(path).map_err(|source| crate::HashRevError::Io {
        path: path.to_owned(),
        source,
    })?;
    Ok(load_graph(&description)?)
}

/// Load a graph saved with [`FactorGraph::to_bytes`].
pub fn load_compiled_graph_file(path: impl AsRef<Path>) -> crate::Result<FactorGraph> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| crate::HashRevError::Io {
        path: path.to_owned(),
        source,
    })?;
    Ok(FactorGraph::from_bytes(&bytes)?)
}

/// Load `config.graph_file` and check it against the configuration. Files with a
/// `.bin` extension are compiled graphs, anything else a circuit description.
pub fn load_graph_with_config(config: &crate::Config) -> crate::Result<Arc<FactorGraph>> {
    config.validate()?;
    let path = config
        .graph_file
        .as_ref()
        .ok_or(crate::ConfigError::NoGraphFile)?;
    log::info!("Initializing factor graph from {}...", path.display());
    let start = std::time::Instant::now();
    let graph = if path.extension().is_some_and(|ext| ext == COMPILED_EXTENSION) {
        load_compiled_graph_file(path)?
    } else {
        load_graph_file(path)?
    };
    LbpState::check_num_rvs(&graph, config)?;
    log::info!(
        "Finished initializing factor graph ({} variables, {} factors) in {:.3} seconds.",
        graph.num_rvs(),
        graph.num_factors(),
        start.elapsed().as_secs_f64()
    );
    if graph.is_cyclic() {
        log::warn!("Factor graph is cyclic, loopy BP is not guaranteed to converge.");
    }
    if config.print_connections {
        graph.print_connections();
    }
    Ok(Arc::new(graph))
}
