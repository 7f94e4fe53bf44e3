use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use thiserror::Error;

use super::factor_graph as fg;
use super::factor_graph::{FactorId, FactorKind, VarId};
use super::fg_parser;

#[derive(Debug, Clone, Error)]
pub enum GraphBuildError {
    #[error("Parse error.\n{0}")]
    Parse(String),
    #[error("Factor {factor} ({kind}) has {found} operands.")]
    Arity {
        factor: FactorId,
        kind: FactorKind,
        found: usize,
    },
    #[error("Variable {var} is the output of both factor {first} and factor {second}.")]
    DuplicatePrimary {
        var: VarId,
        first: FactorId,
        second: FactorId,
    },
    #[error("Variable indices are not contiguous: variable {0} is never referenced.")]
    MissingVar(VarId),
    #[error("The circuit description contains no factor.")]
    Empty,
}

impl fg::FactorGraph {
    fn build() -> Self {
        Self {
            vars: Vec::new(),
            factors: Vec::new(),
            edges: Vec::new(),
            cyclic: false,
        }
    }
    fn add_factor(
        &mut self,
        vars: &mut BTreeMap<VarId, fg::RandomVariable>,
        stmt: &fg_parser::Statement,
    ) -> Result<(), GraphBuildError> {
        let factor_id = self.factors.len();
        let rv_dependencies: BTreeSet<VarId> = stmt.deps.iter().copied().collect();
        if rv_dependencies.len() != stmt.deps.len() {
            log::debug!("Factor {}: repeated operands collapsed.", factor_id);
        }
        if !stmt.kind.accepts_arity(rv_dependencies.len()) {
            return Err(GraphBuildError::Arity {
                factor: factor_id,
                kind: stmt.kind,
                found: rv_dependencies.len(),
            });
        }
        let primary = vars
            .entry(stmt.primary)
            .or_insert_with(new_var);
        if let Some(first) = primary.primary_factor {
            return Err(GraphBuildError::DuplicatePrimary {
                var: stmt.primary,
                first,
                second: factor_id,
            });
        }
        primary.primary_factor = Some(factor_id);
        let mut factor = fg::Factor {
            kind: stmt.kind,
            primary_rv: stmt.primary,
            rv_dependencies,
            edges: IndexMap::new(),
        };
        for var_id in factor.referenced_rvs() {
            let edge_id = self.edges.len();
            vars.entry(var_id)
                .or_insert_with(new_var)
                .edges
                .insert(factor_id, edge_id);
            factor.edges.insert(var_id, edge_id);
            self.edges.push(fg::Edge {
                var: var_id,
                factor: factor_id,
            });
        }
        self.factors.push(factor);
        Ok(())
    }
}

fn new_var() -> fg::RandomVariable {
    fg::RandomVariable {
        edges: IndexMap::new(),
        primary_factor: None,
    }
}

pub(super) fn build_graph(
    stmts: &[fg_parser::Statement],
) -> Result<fg::FactorGraph, GraphBuildError> {
    if stmts.is_empty() {
        return Err(GraphBuildError::Empty);
    }
    let mut graph = fg::FactorGraph::build();
    let mut vars = BTreeMap::new();
    for stmt in stmts {
        graph.add_factor(&mut vars, stmt)?;
    }
    for (expected, var_id) in vars.keys().enumerate() {
        if expected != *var_id {
            return Err(GraphBuildError::MissingVar(expected));
        }
    }
    graph.vars = vars.into_values().collect();
    graph.cyclic = graph.compute_cyclic();
    log::info!("\tFinished loading factors and random variables.");
    Ok(graph)
}
