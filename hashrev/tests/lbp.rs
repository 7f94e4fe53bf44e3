use std::sync::Arc;

use hashrev::lbp::{self, equal, Factor, LbpStatus};
use hashrev::{
    load_graph, run_batch, Config, FactorGraph, FactorKind, GraphBuildError, LbpError, LbpState,
    Prediction, Probability, VariableAssignment,
};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar as Prng;

const AND_GRAPH: &str = "PRIOR;0\nPRIOR;1\nAND;2;0;1\n";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn obs(pairs: &[(usize, bool)]) -> Vec<VariableAssignment> {
    pairs
        .iter()
        .map(|&(rv_index, value)| VariableAssignment { rv_index, value })
        .collect()
}

fn new_state(desc: &str, config: &Config) -> LbpState {
    LbpState::new(Arc::new(load_graph(desc).unwrap()), config).unwrap()
}

/// Random circuit with `n_inputs` free bits followed by `n_gates` gates over earlier
/// wires. Returns the description and the wire values for random inputs.
fn random_circuit(rng: &mut Prng, n_inputs: usize, n_gates: usize) -> (String, Vec<bool>) {
    const KINDS: [FactorKind; 7] = [
        FactorKind::AND,
        FactorKind::OR,
        FactorKind::XOR,
        FactorKind::NAND,
        FactorKind::NOR,
        FactorKind::MAJ,
        FactorKind::NOT,
    ];
    let mut desc = String::new();
    let mut values = Vec::new();
    for i in 0..n_inputs {
        desc.push_str(&format!("PRIOR;{}\n", i));
        values.push(rng.gen::<bool>());
    }
    for _ in 0..n_gates {
        let out = values.len();
        let kind = KINDS[rng.gen_range(0..KINDS.len())];
        let n_deps = if kind == FactorKind::NOT {
            1
        } else {
            rng.gen_range(2..=3)
        };
        let mut deps: Vec<usize> = (0..n_deps).map(|_| rng.gen_range(0..out)).collect();
        deps.sort_unstable();
        deps.dedup();
        desc.push_str(&format!(
            "{};{};{}\n",
            kind,
            out,
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(";")
        ));
        values.push(kind.eval(deps.iter().map(|d| values[*d])));
    }
    (desc, values)
}

fn bits(marginals: &[Prediction]) -> Vec<u64> {
    marginals
        .iter()
        .map(|p| p.log_likelihood_ratio.to_bits())
        .collect()
}

#[test]
fn and_gate_both_inputs_one() {
    init_logger();
    let graph = Arc::new(load_graph(AND_GRAPH).unwrap());
    let observed = obs(&[(0, true), (1, true)]);
    let and = &graph.factors()[2];
    assert_eq!(Probability::new().prob_one(and, &observed), 1.0);

    let mut state = LbpState::new(graph, &Config::no_progress()).unwrap();
    let outcome = state.run_lbp(&observed);
    assert!(outcome.converged);
    let pred = state.predict(2).unwrap();
    assert_eq!(pred.prob_bit_is_one, 1);
    assert_eq!(pred.log_likelihood_ratio, f64::NEG_INFINITY);
}

#[test]
fn and_gate_one_input_zero() {
    init_logger();
    let graph = Arc::new(load_graph(AND_GRAPH).unwrap());
    let observed = obs(&[(0, false)]);
    let prob = Probability::new();
    // the AND output is forced by the observed zero
    assert_eq!(prob.prob_one(&graph.factors()[2], &observed), 0.0);
    // the unobserved input stays uncertain
    let p = prob.prob_one(&graph.factors()[1], &[]);
    assert!(p > 0.0 && p < 1.0);

    let config = Config::no_progress();
    let mut state = LbpState::new(graph, &config).unwrap();
    let outcome = state.run_lbp(&observed);
    assert!(outcome.converged);
    assert!(outcome.iterations <= config.lbp_max_iter);
    assert_eq!(state.status(), LbpStatus::Converged);
    let marg = state.marginals();
    assert_eq!(marg[0].prob_bit_is_one, 0);
    assert_eq!(marg[2].prob_bit_is_one, 0);
    assert!(marg[1].log_likelihood_ratio.is_finite());
}

#[test]
fn non_numeric_field_fails_to_load() {
    let err = load_graph("PRIOR;0\nAND;1;a;0\n").unwrap_err();
    assert!(matches!(err, GraphBuildError::Parse(_)));
}

#[test]
fn stable_after_convergence() {
    init_logger();
    let mut rng = Prng::seed_from_u64(0);
    let (desc, values) = random_circuit(&mut rng, 8, 24);
    let n = values.len();
    let observed: Vec<_> = (n - 4..n)
        .map(|rv_index| VariableAssignment {
            rv_index,
            value: values[rv_index],
        })
        .collect();
    let config = Config {
        lbp_max_iter: 500,
        ..Config::no_progress()
    };
    let mut state = new_state(&desc, &config);
    let outcome = state.run_lbp(&observed);
    assert!(outcome.converged, "{:?}", outcome);
    assert!(outcome.iterations > 1);
    let before = state.marginals();
    assert!(state.iterate());
    let after = state.marginals();
    for (a, b) in before.iter().zip(after.iter()) {
        assert!(equal(a.log_likelihood_ratio, b.log_likelihood_ratio, config.lbp_tol));
    }
    assert!(state
        .marginals()
        .iter()
        .all(|p| !p.log_likelihood_ratio.is_nan()));
}

#[test]
fn strong_prior_predicts_one() {
    let graph = "PRIOR;0\nPRIOR;1\nPRIOR;2\nPRIOR;3\nPRIOR;4\nMAJ;5;0;1;2;3;4\n";
    let mut state = new_state(graph, &Config::no_progress());
    state.run_lbp(&obs(&[(0, true), (1, true)]));
    let pred = state.predict(5).unwrap();
    assert_eq!(pred.prob_bit_is_one, 1);
    assert!((pred.log_likelihood_ratio - (1.0f64 / 7.0).ln()).abs() < 1e-12);
}

#[test]
fn deterministic_runs() {
    init_logger();
    let mut rng = Prng::seed_from_u64(42);
    let (desc, values) = random_circuit(&mut rng, 10, 40);
    let graph = Arc::new(load_graph(&desc).unwrap());
    let config = Config::no_progress();
    let runs: Vec<Vec<VariableAssignment>> = (0..8)
        .map(|i| {
            (0..values.len())
                .filter(|v| (v + i) % 5 == 0)
                .map(|rv_index| VariableAssignment {
                    rv_index,
                    value: values[rv_index],
                })
                .collect()
        })
        .collect();

    let mut state = LbpState::new(graph.clone(), &config).unwrap();
    let sequential: Vec<_> = runs
        .iter()
        .map(|observed| {
            state.run_lbp(observed);
            state.marginals()
        })
        .collect();
    // reusing a state does not leak anything from the previous run
    let mut fresh = LbpState::new(graph.clone(), &config).unwrap();
    fresh.run_lbp(&runs[0]);
    assert_eq!(bits(&fresh.marginals()), bits(&sequential[0]));

    let batch = run_batch(&graph, &config, &runs).unwrap();
    assert_eq!(batch.len(), runs.len());
    for (b, s) in batch.iter().zip(sequential.iter()) {
        assert_eq!(bits(&b.marginals), bits(s));
    }
}

#[test]
fn full_damping_replaces_messages() {
    let desc = "PRIOR;0\nPRIOR;1\nOR;2;0;1\nXOR;3;2;0\n";
    let config = Config {
        lbp_damping: 1.0,
        ..Config::no_progress()
    };
    let mut state = new_state(desc, &config);
    state.setup_lbp(&[]);
    let prior = (0.25f64 / 0.75).ln();
    assert_eq!(state.rv_initialization()[2], prior);
    state.iterate();
    assert_eq!(state.rv_message(2, 3).unwrap(), prior);
    assert_eq!(state.factor_message(3, 0).unwrap(), 0.0);
    state.iterate();
    let expected = 2.0 * (prior / 2.0).tanh().atanh();
    assert_eq!(state.factor_message(3, 0).unwrap(), expected);
    assert_eq!(state.factor_message(3, 2).unwrap(), 0.0);
}

#[test]
fn zero_damping_freezes_messages() {
    let config = Config {
        lbp_damping: 0.0,
        ..Config::no_progress()
    };
    let mut state = new_state("PRIOR;0\nPRIOR;1\nOR;2;0;1\nXOR;3;2;0\n", &config);
    let outcome = state.run_lbp(&obs(&[(0, true), (3, false)]));
    assert!(outcome.converged);
    assert!(state.rv_messages().iter().all(|m| *m == 0.0));
    assert!(state.factor_messages().iter().all(|m| *m == 0.0));
    assert_eq!(state.predict(0).unwrap().log_likelihood_ratio, f64::NEG_INFINITY);
}

#[test]
fn num_rvs_mismatch() {
    let graph = Arc::new(load_graph(AND_GRAPH).unwrap());
    let config = Config {
        num_rvs: Some(4),
        ..Config::no_progress()
    };
    assert!(matches!(
        LbpState::new(graph.clone(), &config),
        Err(LbpError::ConfigMismatch {
            configured: 4,
            discovered: 3
        })
    ));
    let config = Config {
        num_rvs: Some(3),
        ..Config::no_progress()
    };
    assert!(LbpState::new(graph, &config).is_ok());
}

#[test]
fn invalid_config_rejected() {
    let graph = Arc::new(load_graph(AND_GRAPH).unwrap());
    let config = Config {
        lbp_damping: 1.5,
        ..Config::no_progress()
    };
    assert!(matches!(
        LbpState::new(graph, &config),
        Err(LbpError::Config(_))
    ));
}

#[test]
fn load_from_config() {
    init_logger();
    let path = std::env::temp_dir().join(format!("hashrev-test-{}.txt", std::process::id()));
    std::fs::write(&path, "PRIOR;0\r\nPRIOR;1\r\nAND;2;0;1;\r\nXOR;3;0;1\r\n").unwrap();
    let config = Config {
        graph_file: Some(path.clone()),
        num_rvs: Some(4),
        print_connections: true,
        ..Config::no_progress()
    };
    let graph = lbp::load_graph_with_config(&config).unwrap();
    assert_eq!(graph.num_factors(), 4);
    assert!(graph.is_cyclic());

    // compiled graphs go through the same checks
    let bin_path = path.with_extension(lbp::COMPILED_EXTENSION);
    std::fs::write(&bin_path, graph.to_bytes().unwrap()).unwrap();
    let compiled = Config {
        graph_file: Some(bin_path.clone()),
        ..config.clone()
    };
    let restored = lbp::load_graph_with_config(&compiled).unwrap();
    assert_eq!(restored.num_edges(), graph.num_edges());
    assert!(restored.is_cyclic());
    assert!(matches!(
        lbp::load_graph_with_config(&Config {
            num_rvs: Some(3),
            ..compiled
        }),
        Err(hashrev::HashRevError::Lbp(LbpError::ConfigMismatch { .. }))
    ));
    // a description is not a compiled graph
    std::fs::copy(&path, &bin_path).unwrap();
    assert!(matches!(
        lbp::load_compiled_graph_file(&bin_path),
        Err(hashrev::HashRevError::Serialized(_))
    ));
    std::fs::remove_file(&bin_path).unwrap();

    let config = Config {
        num_rvs: Some(5),
        ..config
    };
    assert!(matches!(
        lbp::load_graph_with_config(&config),
        Err(hashrev::HashRevError::Lbp(LbpError::ConfigMismatch { .. }))
    ));
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(
        lbp::load_graph_file(&path),
        Err(hashrev::HashRevError::Io { .. })
    ));
    assert!(matches!(
        lbp::load_graph_with_config(&Config::no_progress()),
        Err(hashrev::HashRevError::Config(
            hashrev::ConfigError::NoGraphFile
        ))
    ));
}

#[test]
fn graph_bytes() {
    let mut rng = Prng::seed_from_u64(7);
    let (desc, _) = random_circuit(&mut rng, 6, 20);
    let graph = load_graph(&desc).unwrap();
    let restored = FactorGraph::from_bytes(&graph.to_bytes().unwrap()).unwrap();
    assert_eq!(restored.num_edges(), graph.num_edges());
    assert_eq!(restored.is_cyclic(), graph.is_cyclic());
    assert!(FactorGraph::from_bytes(&[1, 2, 3]).is_err());

    let config = Config::no_progress();
    let mut a = LbpState::new(Arc::new(graph), &config).unwrap();
    let mut b = LbpState::new(Arc::new(restored), &config).unwrap();
    let observed = obs(&[(0, true), (3, false)]);
    a.run_lbp(&observed);
    b.run_lbp(&observed);
    assert_eq!(a.marginals(), b.marginals());
}

#[test]
fn standalone_factor_probability() {
    let factor = Factor::new(FactorKind::XOR, 2, [0, 1]);
    let prob = Probability::new();
    assert_eq!(prob.prob_one(&factor, &obs(&[(0, true), (1, false)])), 1.0);
    assert_eq!(prob.prob_one(&factor, &obs(&[(0, true)])), 0.5);
}
