use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::factor_graph::{FGError, FactorGraph, FactorId, VarId};
use super::probability::Probability;
use crate::{Config, ConfigError};

/// An observed bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableAssignment {
    pub rv_index: VarId,
    pub value: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentParseError {
    #[error("Expected index=bit, got '{0}'.")]
    MissingEquals(String),
    #[error("Invalid variable index '{0}'.")]
    Index(String),
    #[error("Invalid bit value '{0}', expected 0 or 1.")]
    Value(String),
}

impl FromStr for VariableAssignment {
    type Err = AssignmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (idx, val) = s
            .split_once('=')
            .ok_or_else(|| AssignmentParseError::MissingEquals(s.to_owned()))?;
        let rv_index = idx
            .trim()
            .parse()
            .map_err(|_| AssignmentParseError::Index(idx.to_owned()))?;
        let value = match val.trim() {
            "0" | "false" => false,
            "1" | "true" => true,
            _ => return Err(AssignmentParseError::Value(val.to_owned())),
        };
        Ok(Self { rv_index, value })
    }
}

/// Marginal of a single variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// ln(P(bit = 0) / P(bit = 1)).
    pub log_likelihood_ratio: f64,
    pub prob_bit_is_one: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbpOutcome {
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbpStatus {
    Idle,
    Initialized,
    Iterating,
    Converged,
    MaxIterationsReached,
}

#[derive(Debug, Error)]
pub enum LbpError {
    #[error("Configured num_rvs ({configured}) differs from the graph ({discovered}).")]
    ConfigMismatch { configured: usize, discovered: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] FGError),
}

/// Loopy belief propagation over a shared [`FactorGraph`].
///
/// Messages are log-likelihood ratios stored per edge: `rv_messages[e]` flows from the
/// variable of edge `e` to its factor, `factor_messages[e]` the other way.
#[derive(Debug, Clone)]
pub struct LbpState {
    graph: Arc<FactorGraph>,
    prob: Probability,
    max_iter: usize,
    damping: f64,
    tol: f64,
    rv_messages: Array1<f64>,
    factor_messages: Array1<f64>,
    // prior llr of each variable
    rv_initialization: Array1<f64>,
    // never populated
    factor_initialization: Array1<f64>,
    previous_marginals: Option<Vec<Prediction>>,
    status: LbpStatus,
}

impl LbpState {
    pub fn new(graph: Arc<FactorGraph>, config: &Config) -> Result<Self, LbpError> {
        config.validate()?;
        Self::check_num_rvs(&graph, config)?;
        Ok(Self {
            prob: Probability::new(),
            max_iter: config.lbp_max_iter,
            damping: config.lbp_damping,
            tol: config.lbp_tol,
            rv_messages: Array1::zeros(graph.num_edges()),
            factor_messages: Array1::zeros(graph.num_edges()),
            rv_initialization: Array1::zeros(graph.num_rvs()),
            factor_initialization: Array1::zeros(graph.num_factors()),
            previous_marginals: None,
            status: LbpStatus::Idle,
            graph,
        })
    }

    pub fn check_num_rvs(graph: &FactorGraph, config: &Config) -> Result<(), LbpError> {
        match config.num_rvs {
            Some(configured) if configured != graph.num_rvs() => {
                Err(LbpError::ConfigMismatch {
                    configured,
                    discovered: graph.num_rvs(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn graph(&self) -> &Arc<FactorGraph> {
        &self.graph
    }
    pub fn status(&self) -> LbpStatus {
        self.status
    }
    pub fn rv_messages(&self) -> ArrayView1<'_, f64> {
        self.rv_messages.view()
    }
    pub fn factor_messages(&self) -> ArrayView1<'_, f64> {
        self.factor_messages.view()
    }
    pub fn rv_initialization(&self) -> ArrayView1<'_, f64> {
        self.rv_initialization.view()
    }
    pub fn factor_initialization(&self) -> ArrayView1<'_, f64> {
        self.factor_initialization.view()
    }
    /// Message from variable `var` to factor `factor`.
    pub fn rv_message(&self, var: VarId, factor: FactorId) -> Result<f64, LbpError> {
        Ok(self.rv_messages[self.graph.edge(var, factor)?])
    }
    /// Message from factor `factor` to variable `var`.
    pub fn factor_message(&self, factor: FactorId, var: VarId) -> Result<f64, LbpError> {
        Ok(self.factor_messages[self.graph.edge(var, factor)?])
    }

    /// Zero the message state and compute the prior of every variable from the
    /// observations.
    pub fn setup_lbp(&mut self, observed: &[VariableAssignment]) {
        log::debug!("\tSetting up loopy BP...");
        self.rv_messages.fill(0.0);
        self.factor_messages.fill(0.0);
        self.rv_initialization.fill(0.0);
        self.factor_initialization.fill(0.0);
        self.previous_marginals = None;

        let mut known = vec![None; self.graph.num_rvs()];
        for obs in observed {
            match known.get_mut(obs.rv_index) {
                Some(slot) => *slot = Some(obs.value),
                None => log::warn!(
                    "Ignoring observation of variable {} (graph has {} variables).",
                    obs.rv_index,
                    self.graph.num_rvs()
                ),
            }
        }
        for (var_id, var) in self.graph.rvs().iter().enumerate() {
            let Some(factor) = var.primary_factor().map(|f| &self.graph.factors()[f]) else {
                // no factor to derive a prior from, only the observation itself
                if let Some(value) = known[var_id] {
                    self.rv_initialization[var_id] = prior_llr(if value { 1.0 } else { 0.0 });
                }
                continue;
            };
            let relevant: Vec<_> = factor
                .referenced_rvs()
                .into_iter()
                .filter_map(|rv_index| {
                    known[rv_index].map(|value| VariableAssignment { rv_index, value })
                })
                .collect();
            let p = self.prob.prob_one(factor, &relevant);
            self.rv_initialization[var_id] = prior_llr(p);
        }
        self.status = LbpStatus::Initialized;
    }

    /// Run loopy BP from scratch until the marginals are stable or the iteration cap
    /// is reached.
    pub fn run_lbp(&mut self, observed: &[VariableAssignment]) -> LbpOutcome {
        self.setup_lbp(observed);
        log::debug!("\tStarting loopy BP...");
        let start = std::time::Instant::now();
        let mut outcome = LbpOutcome {
            iterations: self.max_iter,
            converged: false,
        };
        for itr in 0..self.max_iter {
            if self.iterate() {
                outcome = LbpOutcome {
                    iterations: itr + 1,
                    converged: true,
                };
                break;
            }
        }
        if outcome.converged {
            log::info!("\tLoopy BP converged in {} iterations", outcome.iterations);
        } else {
            self.status = LbpStatus::MaxIterationsReached;
            log::warn!("\tLoopy BP did not converge, max iterations reached.");
        }
        log::info!(
            "\tLBP finished in {:.6} seconds.",
            start.elapsed().as_secs_f64()
        );
        outcome
    }

    /// One round of message passing. Returns whether the marginals are within
    /// tolerance of those of the previous round.
    pub fn iterate(&mut self) -> bool {
        self.update_factor_messages();
        self.update_random_variable_messages();
        let marg = self.marginals();
        let converged = self
            .previous_marginals
            .as_ref()
            .is_some_and(|prev| marginals_equal(prev, &marg, self.tol));
        self.previous_marginals = Some(marg);
        self.status = if converged {
            LbpStatus::Converged
        } else {
            LbpStatus::Iterating
        };
        converged
    }

    pub fn update_factor_messages(&mut self) {
        let rv_msg_tanh = self.rv_messages.mapv(|m| (m / 2.0).tanh());
        let mut new = self.factor_messages.clone();
        for factor in self.graph.factors() {
            for (var, edge) in factor.dependency_edges() {
                let prod: f64 = factor
                    .dependency_edges()
                    .filter(|(other, _)| *other != var)
                    .map(|(_, other_edge)| rv_msg_tanh[other_edge])
                    .product();
                // saturated: the message would be infinite
                if prod.abs() != 1.0 {
                    new[edge] = 2.0 * prod.atanh();
                }
            }
        }
        damp_into(&mut new, &self.factor_messages, self.damping);
        self.factor_messages = new;
    }

    pub fn update_random_variable_messages(&mut self) {
        let mut new = self.rv_messages.clone();
        for (var_id, var) in self.graph.rvs().iter().enumerate() {
            let col: f64 = var.edges.values().map(|e| self.factor_messages[*e]).sum();
            for edge in var.edges.values() {
                new[*edge] = (col - self.factor_messages[*edge]) + self.rv_initialization[var_id];
            }
        }
        damp_into(&mut new, &self.rv_messages, self.damping);
        self.rv_messages = new;
    }

    pub fn predict(&self, var: VarId) -> Result<Prediction, LbpError> {
        let col: f64 = self
            .graph
            .rv(var)?
            .edges
            .values()
            .map(|e| self.factor_messages[*e])
            .sum();
        let llr = self.rv_initialization[var] + col;
        Ok(Prediction {
            log_likelihood_ratio: llr,
            prob_bit_is_one: u8::from(llr < 0.0),
        })
    }

    /// Predictions of all variables, by increasing index.
    pub fn marginals(&self) -> Vec<Prediction> {
        (0..self.graph.num_rvs())
            .filter_map(|var| self.predict(var).ok())
            .collect()
    }
}

/// ln((1-p)/p), saturating to infinity for certain bits.
fn prior_llr(p: f64) -> f64 {
    if p == 0.0 {
        f64::INFINITY
    } else if p == 1.0 {
        f64::NEG_INFINITY
    } else {
        ((1.0 - p) / p).ln()
    }
}

/// `d*new + (1-d)*old`, never multiplying an infinite message by zero.
fn damp(d: f64, new: f64, old: f64) -> f64 {
    if d == 1.0 || new == old {
        new
    } else if d == 0.0 {
        old
    } else {
        d * new + (1.0 - d) * old
    }
}

fn damp_into(new: &mut Array1<f64>, old: &Array1<f64>, d: f64) {
    Zip::from(new).and(old).for_each(|n, &o| *n = damp(d, *n, o));
}

/// Convergence test on a single log-likelihood ratio. Identical values (including
/// matching infinities) are equal, NaN never is.
pub fn equal(a: f64, b: f64, tol: f64) -> bool {
    a == b || (a - b).abs() <= tol
}

fn marginals_equal(a: &[Prediction], b: &[Prediction], tol: f64) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(a, b)| equal(a.log_likelihood_ratio, b.log_likelihood_ratio, tol))
}
