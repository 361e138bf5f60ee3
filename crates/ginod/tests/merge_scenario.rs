//! End-to-end merge scenario tests

use ginod::opinion::OpinionState;
use ginod::scenario::ScenarioConfig;
use ginod::trace::SimulationTrace;
use ginod::types::QmdpMethod;

fn small_merge(method: QmdpMethod, steps: usize) -> ScenarioConfig {
    let mut config = ScenarioConfig::default_merge();
    config.simulation.steps = steps;
    config.simulation.horizon = 10;
    config.simulation.look_ahead = 2;
    config.simulation.method = method;
    config.solver.max_iterations = 15;
    config
}

fn separation(state: &[f64]) -> f64 {
    let dx = state[0] - state[4];
    let dy = state[1] - state[5];
    dx.hypot(dy)
}

#[test]
fn test_merge_end_to_end() {
    let config = small_merge(QmdpMethod::Level1VsLevel0, 8);
    let (planner, x0, z0) = config.build().unwrap();

    let trace = planner.plan(&x0, &z0).unwrap();
    assert_eq!(trace.len(), 8);

    for record in &trace.steps {
        assert!(record.state.iter().all(|v| v.is_finite()));
        assert!(record.opinion.iter().all(|v| v.is_finite()));
        assert!(record.poi[0] >= 1.0 && record.poi[1] >= 1.0);
        // The cars start well separated and must not collide
        assert!(separation(&record.state) > 1.0, "cars too close");
    }

    // Attention diagnostics cover every step
    assert_eq!(trace.diagnostic("attention_p1").unwrap().len(), 8);
    assert_eq!(trace.diagnostic("attention_p2").unwrap().len(), 8);
}

#[test]
fn test_trace_json_export() {
    let config = small_merge(QmdpMethod::Level0, 3);
    let (planner, x0, z0) = config.build().unwrap();
    let trace = planner.plan(&x0, &z0).unwrap();

    let path = std::env::temp_dir().join("ginod_merge_trace_test.json");
    trace.write_json(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let back: SimulationTrace = serde_json::from_str(&text).unwrap();
    assert_eq!(back.len(), 3);
    assert_eq!(back.steps[0].state.len(), 8);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_all_qmdp_methods_run() {
    for method in [
        QmdpMethod::Level0,
        QmdpMethod::Level1,
        QmdpMethod::Level1VsLevel0,
    ] {
        let config = small_merge(method, 2);
        let (planner, x0, z0) = config.build().unwrap();
        let trace = planner.plan(&x0, &z0).unwrap();
        assert_eq!(trace.len(), 2, "method {method:?} failed");
        assert!(trace.final_state().unwrap().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_opinions_move_from_neutral() {
    let config = small_merge(QmdpMethod::Level0, 6);
    let (planner, x0, z0) = config.build().unwrap();
    let trace = planner.plan(&x0, &z0).unwrap();

    // The neutral opinion is not an equilibrium once subgame values
    // differ between intents
    let last = trace.steps.last().unwrap();
    let z_last = OpinionState::from_vector(
        &nalgebra::DVector::from_vec(last.opinion.clone()),
        2,
        2,
    )
    .unwrap();
    let moved = z_last.z1.amax().max(z_last.z2.amax());
    assert!(moved > 1e-6, "opinions never left neutral: {moved}");
}
