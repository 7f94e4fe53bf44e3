use std::collections::BTreeSet;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type VarId = usize;
pub type FactorId = usize;
pub type EdgeId = usize;

/// A circuit wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomVariable {
    // sorted by factor id
    pub(super) edges: IndexMap<FactorId, EdgeId>,
    // factor whose output is this wire, if any
    pub(super) primary_factor: Option<FactorId>,
}

impl RandomVariable {
    /// Factors that reference this variable, as output or as operand.
    pub fn factor_indices(&self) -> impl Iterator<Item = FactorId> + '_ {
        self.edges.keys().copied()
    }
    pub fn primary_factor(&self) -> Option<FactorId> {
        self.primary_factor
    }
}

/// Gate semantics of a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorKind {
    /// Free input bit, no operands.
    PRIOR,
    SAME,
    NOT,
    AND,
    NAND,
    OR,
    NOR,
    XOR,
    XNOR,
    /// Strict majority of the operands (ripple-carry ADD carry-out for 3 operands).
    MAJ,
}

impl FactorKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "PRIOR" => Self::PRIOR,
            "SAME" | "BUF" => Self::SAME,
            "NOT" | "INV" => Self::NOT,
            "AND" => Self::AND,
            "NAND" => Self::NAND,
            "OR" => Self::OR,
            "NOR" => Self::NOR,
            "XOR" | "XOR3" | "SUM" => Self::XOR,
            "XNOR" => Self::XNOR,
            "MAJ" | "MAJORITY" | "CARRY" => Self::MAJ,
            _ => return None,
        })
    }
    pub fn tag(self) -> &'static str {
        match self {
            Self::PRIOR => "PRIOR",
            Self::SAME => "SAME",
            Self::NOT => "NOT",
            Self::AND => "AND",
            Self::NAND => "NAND",
            Self::OR => "OR",
            Self::NOR => "NOR",
            Self::XOR => "XOR",
            Self::XNOR => "XNOR",
            Self::MAJ => "MAJ",
        }
    }
    /// Admissible number of operands: (min, max).
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::PRIOR => (0, Some(0)),
            Self::SAME | Self::NOT => (1, Some(1)),
            _ => (1, None),
        }
    }
    pub fn accepts_arity(self, n: usize) -> bool {
        let (min, max) = self.arity();
        n >= min && max.map_or(true, |max| n <= max)
    }
    /// Gate output for fully known operands.
    pub fn eval(self, inputs: impl IntoIterator<Item = bool>) -> bool {
        let (n, ones) = inputs
            .into_iter()
            .fold((0usize, 0usize), |(n, ones), x| (n + 1, ones + x as usize));
        match self {
            // A PRIOR has no operand to be evaluated from.
            Self::PRIOR => false,
            Self::SAME => ones == 1,
            Self::NOT => ones == 0,
            Self::AND => ones == n,
            Self::NAND => ones != n,
            Self::OR => ones > 0,
            Self::NOR => ones == 0,
            Self::XOR => ones % 2 == 1,
            Self::XNOR => ones % 2 == 0,
            Self::MAJ => ones > n / 2,
        }
    }
}

impl std::fmt::Display for FactorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A circuit gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub(super) kind: FactorKind,
    pub(super) primary_rv: VarId,
    pub(super) rv_dependencies: BTreeSet<VarId>,
    // one edge per referenced variable, sorted by var id
    pub(super) edges: IndexMap<VarId, EdgeId>,
}

impl Factor {
    /// Standalone factor, not attached to any graph (e.g. to query [`super::Probability`]).
    pub fn new(
        kind: FactorKind,
        primary_rv: VarId,
        rv_dependencies: impl IntoIterator<Item = VarId>,
    ) -> Self {
        Self {
            kind,
            primary_rv,
            rv_dependencies: rv_dependencies.into_iter().collect(),
            edges: IndexMap::new(),
        }
    }
    pub fn kind(&self) -> FactorKind {
        self.kind
    }
    pub fn primary_rv(&self) -> VarId {
        self.primary_rv
    }
    pub fn rv_dependencies(&self) -> &BTreeSet<VarId> {
        &self.rv_dependencies
    }
    /// Dependencies and primary variable.
    pub fn referenced_rvs(&self) -> BTreeSet<VarId> {
        let mut res = self.rv_dependencies.clone();
        res.insert(self.primary_rv);
        res
    }
    /// Edges towards the dependencies, by increasing var id.
    pub(super) fn dependency_edges(&self) -> impl Iterator<Item = (VarId, EdgeId)> + '_ {
        self.edges
            .iter()
            .filter(|(v, _)| self.rv_dependencies.contains(*v))
            .map(|(v, e)| (*v, *e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Edge {
    pub(super) var: VarId,
    pub(super) factor: FactorId,
}

/// Bipartite graph of circuit wires and gates. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorGraph {
    pub(super) vars: Vec<RandomVariable>,
    pub(super) factors: Vec<Factor>,
    pub(super) edges: Vec<Edge>,
    pub(super) cyclic: bool,
}

#[derive(Debug, Error)]
pub enum FGError {
    #[error("No variable {0}.")]
    NoVar(VarId),
    #[error("No factor {0}.")]
    NoFactor(FactorId),
    #[error("No edge between variable {var} and factor {factor}.")]
    NoEdge { var: VarId, factor: FactorId },
    #[error("Inconsistent serialized factor graph: {0}.")]
    Inconsistent(&'static str),
    #[error("Factor graph serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

type Result<T> = std::result::Result<T, FGError>;

impl FactorGraph {
    pub fn num_rvs(&self) -> usize {
        self.vars.len()
    }
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
    pub fn rvs(&self) -> &[RandomVariable] {
        self.vars.as_slice()
    }
    pub fn factors(&self) -> &[Factor] {
        self.factors.as_slice()
    }
    pub fn rv(&self, var: VarId) -> Result<&RandomVariable> {
        self.vars.get(var).ok_or(FGError::NoVar(var))
    }
    pub fn factor(&self, factor: FactorId) -> Result<&Factor> {
        self.factors.get(factor).ok_or(FGError::NoFactor(factor))
    }
    pub fn edge(&self, var: VarId, factor: FactorId) -> Result<EdgeId> {
        self.rv(var)?
            .edges
            .get(&factor)
            .copied()
            .ok_or(FGError::NoEdge { var, factor })
    }
    /// Factor whose primary output is `var`.
    pub fn primary_factor(&self, var: VarId) -> Option<&Factor> {
        self.vars
            .get(var)
            .and_then(|v| v.primary_factor)
            .map(|f| &self.factors[f])
    }
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// The bipartite graph is acyclic iff no edge joins two nodes that are already connected.
    pub(super) fn compute_cyclic(&self) -> bool {
        let n_vars = self.vars.len();
        let mut parent: Vec<usize> = (0..n_vars + self.factors.len()).collect();
        fn root(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for edge in self.edges.iter() {
            let a = root(&mut parent, edge.var);
            let b = root(&mut parent, n_vars + edge.factor);
            if a == b {
                return true;
            }
            parent[a] = b;
        }
        false
    }

    pub fn print_connections(&self) {
        for (i, var) in self.vars.iter().enumerate() {
            log::info!(
                "\tRV {} is referenced by factors {{{}}}",
                i,
                var.factor_indices().join(", ")
            );
        }
        for (i, factor) in self.factors.iter().enumerate() {
            log::info!(
                "\tFactor {} ({}): RV {} depends on RVs {{{}}}",
                i,
                factor.kind,
                factor.primary_rv,
                factor.rv_dependencies.iter().join(", ")
            );
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut graph: Self = bincode::deserialize(bytes)?;
        graph.check_consistency()?;
        graph.cyclic = graph.compute_cyclic();
        Ok(graph)
    }

    fn check_consistency(&self) -> Result<()> {
        for (edge_id, edge) in self.edges.iter().enumerate() {
            let var = self
                .vars
                .get(edge.var)
                .ok_or(FGError::Inconsistent("edge to unknown variable"))?;
            let factor = self
                .factors
                .get(edge.factor)
                .ok_or(FGError::Inconsistent("edge to unknown factor"))?;
            if var.edges.get(&edge.factor) != Some(&edge_id)
                || factor.edges.get(&edge.var) != Some(&edge_id)
            {
                return Err(FGError::Inconsistent("dangling edge"));
            }
        }
        let n_var_edges: usize = self.vars.iter().map(|v| v.edges.len()).sum();
        let n_factor_edges: usize = self.factors.iter().map(|f| f.edges.len()).sum();
        if n_var_edges != self.edges.len() || n_factor_edges != self.edges.len() {
            return Err(FGError::Inconsistent("edge count mismatch"));
        }
        for (factor_id, factor) in self.factors.iter().enumerate() {
            if !factor.referenced_rvs().iter().eq(factor.edges.keys()) {
                return Err(FGError::Inconsistent("factor edges do not match its variables"));
            }
            if self.vars[factor.primary_rv].primary_factor != Some(factor_id) {
                return Err(FGError::Inconsistent("primary variable not linked to its factor"));
            }
        }
        for (var_id, var) in self.vars.iter().enumerate() {
            if let Some(f) = var.primary_factor {
                if self.factors.get(f).map(|f| f.primary_rv) != Some(var_id) {
                    return Err(FGError::Inconsistent("variable linked to a foreign factor"));
                }
            }
        }
        Ok(())
    }
}
