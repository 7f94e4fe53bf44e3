//! Local probability model of a single gate.
//!
//! Given the observed values of some of the variables a factor references, compute the
//! probability that the factor's output is one, the unobserved operands being
//! independent and uniformly distributed.

use super::belief_propagation::VariableAssignment;
use super::factor_graph::{Factor, FactorKind};

/// Smallest probability returned while the output is still uncertain, so that the
/// result stays strictly inside (0, 1) even for very wide gates.
pub const MIN_PROBA: f64 = f64::EPSILON;

/// Stateless gate probability model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Probability;

impl Probability {
    pub fn new() -> Self {
        Self
    }

    /// Probability that `factor.primary_rv()` is one given `observed_neighbors`.
    ///
    /// Assignments of variables the factor does not reference are ignored. The result
    /// is exactly 0 or 1 when the output is determined by the observations.
    pub fn prob_one(&self, factor: &Factor, observed_neighbors: &[VariableAssignment]) -> f64 {
        let mut primary = None;
        let mut deps = vec![None; factor.rv_dependencies().len()];
        for obs in observed_neighbors {
            if obs.rv_index == factor.primary_rv() {
                primary = Some(obs.value);
            }
            if let Some(pos) = factor
                .rv_dependencies()
                .iter()
                .position(|v| *v == obs.rv_index)
            {
                deps[pos] = Some(obs.value);
            }
        }
        if let Some(value) = primary {
            return if value { 1.0 } else { 0.0 };
        }
        gate_prob_one(factor.kind(), &deps)
    }
}

/// Marginalize the truth table of `kind` over the unknown (`None`) operands.
fn gate_prob_one(kind: FactorKind, operands: &[Option<bool>]) -> f64 {
    let n = operands.len();
    let ones = operands.iter().filter(|x| **x == Some(true)).count();
    let zeros = operands.iter().filter(|x| **x == Some(false)).count();
    let unknown = n - ones - zeros;
    if unknown == 0 && kind != FactorKind::PRIOR {
        return bool_proba(kind.eval(operands.iter().flatten().copied()));
    }
    let threshold = n / 2 + 1;
    let forced = match kind {
        FactorKind::AND => (zeros > 0).then_some(false),
        FactorKind::NAND => (zeros > 0).then_some(true),
        FactorKind::OR => (ones > 0).then_some(true),
        FactorKind::NOR => (ones > 0).then_some(false),
        FactorKind::MAJ if ones >= threshold => Some(true),
        FactorKind::MAJ if ones + unknown < threshold => Some(false),
        _ => None,
    };
    if let Some(value) = forced {
        return bool_proba(value);
    }
    let p = match kind {
        FactorKind::PRIOR
        | FactorKind::SAME
        | FactorKind::NOT
        | FactorKind::XOR
        | FactorKind::XNOR => 0.5,
        FactorKind::AND => pow_half(unknown),
        FactorKind::NAND => 1.0 - pow_half(unknown),
        FactorKind::OR => 1.0 - pow_half(unknown),
        FactorKind::NOR => pow_half(unknown),
        FactorKind::MAJ => majority_proba(threshold - ones, unknown),
    };
    p.clamp(MIN_PROBA, 1.0 - MIN_PROBA)
}

fn bool_proba(x: bool) -> f64 {
    if x {
        1.0
    } else {
        0.0
    }
}

/// 2^-k, exact when representable.
fn pow_half(k: usize) -> f64 {
    i32::try_from(k).map_or(0.0, |k| 0.5f64.powi(k))
}

/// P(Binom(n, 1/2) >= k), for 0 < k <= n.
fn majority_proba(k: usize, n: usize) -> f64 {
    // C(n, j) 2^-n built up incrementally. 2^-n is subnormal past 1022 operands, so
    // wider gates accumulate the terms in log space.
    if n <= 1022 {
        let mut term = pow_half(n);
        let mut acc = 0.0;
        for j in 1..=n {
            term *= (n - j + 1) as f64 / j as f64;
            if j >= k {
                acc += term;
            }
        }
        acc.min(1.0)
    } else {
        let mut log_term = -(n as f64) * std::f64::consts::LN_2;
        let mut acc = 0.0;
        for j in 1..=n {
            log_term += ((n - j + 1) as f64).ln() - (j as f64).ln();
            if j >= k {
                acc += log_term.exp();
            }
        }
        acc.min(1.0)
    }
}
