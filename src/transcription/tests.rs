use std::sync::Arc;
use nalgebra::DVector;
use super::*;
use crate::kinematic_constraints::{ConstraintManifold, CoordinatePinConstraint};
use crate::multibody::{MultibodyModel, PlanarPointMass};
use crate::trajectories::PiecewiseTrajectory;
use crate::utils::utils_errors::DirconError;

fn model() -> Arc<dyn MultibodyModel> {
    Arc::new(PlanarPointMass::new(1.0, 9.81))
}

fn ground_manifold() -> ConstraintManifold {
    ConstraintManifold::new(vec![Box::new(CoordinatePinConstraint::new(1, 2, 2))])
}

fn ground_manifold_unilateral() -> ConstraintManifold {
    ConstraintManifold::new(vec![Box::new(CoordinatePinConstraint::new_with_unilateral_force(1, 2, 2))])
}

fn single_mode_dircon(n: usize) -> HybridDircon {
    HybridDircon::new(model(), vec![n], vec![0.1], vec![0.1],
                      vec![ground_manifold()], vec![ModeOptions::default()]).unwrap()
}

fn two_mode_dircon() -> HybridDircon {
    HybridDircon::new(model(), vec![3, 4], vec![0.05, 0.05], vec![0.2, 0.2],
                      vec![ground_manifold(), ground_manifold()],
                      vec![ModeOptions::default(), ModeOptions::default()]).unwrap()
}

fn set_block(assignment: &mut DVector<f64>, block: crate::math_program::VariableBlock, values: &[f64]) {
    assert_eq!(block.len(), values.len());
    for (i, v) in values.iter().enumerate() {
        assignment[block.index(i)] = *v;
    }
}

struct UnitCost;
impl RunningCost for UnitCost {
    fn evaluate(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> Result<f64, DirconError> {
        Ok(1.0)
    }
}

struct VelocityContinuityLaw {
    num_velocities: usize
}
impl ModeTransitionLaw for VelocityContinuityLaw {
    fn num_constraints(&self) -> usize {
        self.num_velocities
    }
    fn evaluate(&self, pre_transition_state: &DVector<f64>, post_transition_velocity: &DVector<f64>, _impulse: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        let nv = self.num_velocities;
        let v_pre = pre_transition_state.rows(pre_transition_state.len() - nv, nv).into_owned();
        Ok(post_transition_velocity - v_pre)
    }
}

#[test]
fn test_single_mode_constraint_counts() {
    // 1 mode, 3 samples, constraint dimension 1
    let dircon = single_mode_dircon(3);
    assert_eq!(dircon.num_samples(), 3);
    assert_eq!(dircon.num_kinematic_constraints(0), 1);

    let nx = 4;
    let dynamics = dircon.program().constraint_bindings().iter()
        .filter(|b| b.constraint().num_constraints() == nx).count();
    let kinematic = dircon.program().constraint_bindings().iter()
        .filter(|b| b.constraint().num_constraints() == 3).count();
    assert_eq!(dynamics, 2);
    // one interior knot plus the two boundary knots
    assert_eq!(kinematic, 3);
    assert_eq!(dircon.program().constraint_bindings().len(), 5);

    // force block of size k * n = 3
    let lambda_idx = dircon.program().group_names().iter().position(|n| n.as_str() == "lambda[0]").unwrap();
    assert_eq!(dircon.program().group_blocks()[lambda_idx].len(), 3);
}

#[test]
fn test_constraint_counts_sum_over_modes() {
    let dircon = two_mode_dircon();
    let nx = 4;
    let dynamics = dircon.program().constraint_bindings().iter()
        .filter(|b| b.constraint().num_constraints() == nx).count();
    let kinematic = dircon.program().constraint_bindings().iter()
        .filter(|b| b.constraint().num_constraints() == 3).count();
    // sum of (n_i - 1) and of (n_i - 2) + 2 per mode
    assert_eq!(dynamics, 2 + 3);
    assert_eq!(kinematic, (1 + 2) + (2 + 2));
}

#[test]
fn test_timestep_bounds_and_equality_wiring() {
    let dircon = two_mode_dircon();
    let program = dircon.program();
    let h_start = dircon.timestep(0).start();

    // every timestep got its mode's bounds
    for i in 0..5 {
        assert_eq!(program.variable_lower_bounds()[h_start + i], 0.05);
        assert_eq!(program.variable_upper_bounds()[h_start + i], 0.2);
    }

    // equal-timestep ties: (h0,h1) within mode 0, (h2,h3),(h3,h4) within mode 1,
    // nothing across the h1/h2 mode boundary
    let mut tied_pairs = vec![];
    for linear in program.linear_equality_constraints() {
        let terms = linear.terms();
        assert_eq!(terms.len(), 2);
        tied_pairs.push((terms[0].0 - h_start, terms[1].0 - h_start));
    }
    assert_eq!(tied_pairs, vec![(0, 1), (2, 3), (3, 4)]);
}

#[test]
fn test_two_mode_state_indexing() {
    let dircon = two_mode_dircon();
    assert_eq!(dircon.num_samples(), 6);
    assert_eq!(dircon.mode_start(), &vec![0, 2]);

    let nq = 2;
    let state_0_2 = dircon.state_variables_by_mode(0, 2);
    let state_1_0 = dircon.state_variables_by_mode(1, 0);

    // configuration half aliases the shared global sample
    assert_eq!(state_1_0[0..nq], state_0_2[0..nq]);
    // velocity half is the mode's own post-transition block, not the shared slot
    let v_post = dircon.v_post_transition_vars_by_mode(1);
    assert_eq!(state_1_0[nq..], v_post.indices()[..]);
    assert_ne!(state_1_0[nq..], state_0_2[nq..]);
}

#[test]
fn test_post_transition_block_overlaps_nothing() {
    let dircon = two_mode_dircon();
    let v_post = dircon.v_post_transition_vars_by_mode(1);
    let program = dircon.program();
    for (name, block) in program.group_names().iter().zip(program.group_blocks().iter()) {
        if name == "v_p" { continue; }
        assert!(!v_post.overlaps(block), "v_p overlaps group {}", name);
    }
}

#[test]
fn test_construction_rejects_mismatched_mode_arrays() {
    let res = HybridDircon::new(model(), vec![3, 4], vec![0.1], vec![0.1, 0.1],
                                vec![ground_manifold(), ground_manifold()],
                                vec![ModeOptions::default(), ModeOptions::default()]);
    assert!(matches!(res, Err(DirconError::ConfigurationError(_))));
}

#[test]
fn test_construction_rejects_short_modes_and_bad_relative_rows() {
    let res = HybridDircon::new(model(), vec![1], vec![0.1], vec![0.1],
                                vec![ground_manifold()], vec![ModeOptions::default()]);
    assert!(matches!(res, Err(DirconError::ConfigurationError(_))));

    let mut options = ModeOptions::default();
    options.relative_constraints = vec![5];
    let res = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                vec![ground_manifold()], vec![options]);
    assert!(matches!(res, Err(DirconError::ConfigurationError(_))));
}

#[test]
fn test_offset_variables_follow_relative_count() {
    let mut options = ModeOptions::default();
    options.start_policy = BoundaryPolicy::Offset;
    options.relative_constraints = vec![0];
    let dircon = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                   vec![ground_manifold()], vec![options]).unwrap();
    assert_eq!(dircon.offset_vars(0).len(), 1);
}

#[test]
fn test_free_boundary_drops_position_rows() {
    let mut options = ModeOptions::default();
    options.end_policy = BoundaryPolicy::Free;
    let dircon = HybridDircon::new(model(), vec![2], vec![0.1], vec![0.1],
                                   vec![ground_manifold()], vec![options]).unwrap();
    // k = 1: pinned start knot has 3 rows, free end knot only 2
    let row_counts: Vec<usize> = dircon.program().constraint_bindings().iter()
        .map(|b| b.constraint().num_constraints())
        .filter(|c| *c != 4)
        .collect();
    assert_eq!(row_counts, vec![3, 2]);
}

#[test]
fn test_force_legality_bindings_per_sample() {
    let dircon = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                   vec![ground_manifold_unilateral()], vec![ModeOptions::default()]).unwrap();
    // one unilaterality binding for every sample except the last
    let unilateral = dircon.program().constraint_bindings().iter()
        .filter(|b| b.constraint().num_constraints() == 1).count();
    assert_eq!(unilateral, 2);
}

#[test]
fn test_force_cost_toggle() {
    let mut options = ModeOptions::default();
    options.force_cost_weight = 10.0;
    let dircon = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                   vec![ground_manifold()], vec![options]).unwrap();
    // regularization at every sample of the mode, not only interior ones
    assert_eq!(dircon.program().cost_bindings().len(), 3);

    let mut assignment = DVector::zeros(dircon.program().num_variables());
    set_block(&mut assignment, dircon.force(0, 1), &[2.0]);
    assert!((dircon.program().total_cost(&assignment).unwrap() - 40.0).abs() < 1e-12);
}

#[test]
fn test_trapezoidal_weights_sum_to_horizon() {
    let mut dircon = single_mode_dircon(4);
    dircon.add_running_cost(UnitCost).unwrap();
    assert_eq!(dircon.program().cost_bindings().len(), 4);

    let mut assignment = DVector::zeros(dircon.program().num_variables());
    for i in 0..3 {
        set_block(&mut assignment, dircon.timestep(i), &[0.1]);
    }
    // constant integrand 1 integrates to (N - 1) * h
    assert!((dircon.program().total_cost(&assignment).unwrap() - 0.3).abs() < 1e-12);
}

#[test]
fn test_collocation_slack_enters_configuration_rows() {
    use crate::kinematic_constraints::ConstrainedDynamicsEvaluator;
    use crate::math_program::ProgramConstraint;
    use crate::transcription::constraints::CollocationConstraint;

    let evaluator = ConstrainedDynamicsEvaluator::new(model(), Arc::new(ground_manifold_unilateral()));
    let constraint = CollocationConstraint::new(evaluator);

    // [h, x0, x1, u0, u1, lambda0, lambda1, lambda_c, v_c]: a constant
    // slide along the ground with gravity balanced at the endpoints and at
    // the collocation point
    let mut vars = DVector::zeros(17);
    vars[0] = 0.1;
    vars[1] = 0.0; vars[2] = 0.0; vars[3] = 1.0; vars[4] = 0.0;
    vars[5] = 0.1; vars[6] = 0.0; vars[7] = 1.0; vars[8] = 0.0;
    vars[13] = 9.81; vars[14] = 9.81; vars[15] = 9.81;

    let residual_0 = constraint.evaluate(&vars).unwrap();
    vars[16] = 2.5;
    let residual_1 = constraint.evaluate(&vars).unwrap();
    vars[16] = 5.0;
    let residual_2 = constraint.evaluate(&vars).unwrap();

    // the slack moves the constrained configuration row linearly (J^T v_c,
    // here the z-velocity row of qdot) and touches nothing else
    assert!((residual_1[1] - (residual_0[1] - 2.5)).abs() < 1e-12);
    assert!((residual_2[1] - (residual_0[1] - 5.0)).abs() < 1e-12);
    assert_eq!(residual_1[0], residual_0[0]);
    assert_eq!(residual_1[2], residual_0[2]);
    assert_eq!(residual_1[3], residual_0[3]);
}

#[test]
fn test_static_stance_is_feasible() {
    // point mass resting on the ground: gravity exactly balanced by the
    // constraint force at knots and collocation points
    let dircon = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                   vec![ground_manifold_unilateral()], vec![ModeOptions::default()]).unwrap();

    let mut assignment = DVector::zeros(dircon.program().num_variables());
    set_block(&mut assignment, dircon.timestep(0), &[0.1]);
    set_block(&mut assignment, dircon.timestep(1), &[0.1]);
    for j in 0..3 {
        set_block(&mut assignment, dircon.force(0, j), &[9.81]);
    }
    for j in 0..2 {
        set_block(&mut assignment, dircon.collocation_force(0, j), &[9.81]);
    }

    assert!(dircon.program().constraint_violation(&assignment).unwrap() < 1e-20);
}

#[test]
fn test_transition_law_extension_point() {
    let mut dircon = two_mode_dircon();
    let bindings_before = dircon.program().constraint_bindings().len();
    let impulse = dircon.add_mode_transition_law(1, Box::new(VelocityContinuityLaw { num_velocities: 2 })).unwrap();
    assert_eq!(impulse.len(), 1);
    assert_eq!(dircon.program().constraint_bindings().len(), bindings_before + 1);

    // with matching pre/post velocities the law is satisfied
    let mut assignment = DVector::zeros(dircon.program().num_variables());
    set_block(&mut assignment, dircon.state(2), &[0.3, 0.0, 1.5, -0.5]);
    set_block(&mut assignment, dircon.v_post_transition_vars_by_mode(1), &[1.5, -0.5]);
    let binding = dircon.program().constraint_bindings().last().unwrap();
    assert!(binding.evaluate(&assignment).unwrap().norm() < 1e-12);

    // transitions into mode 0 (or out of range) are rejected
    assert!(dircon.add_mode_transition_law(0, Box::new(VelocityContinuityLaw { num_velocities: 2 })).is_err());
}

#[test]
fn test_empty_force_warm_start_zero_fills() {
    let mut dircon = single_mode_dircon(3);
    dircon.set_initial_force_trajectory(0, None, None, None);

    for j in 0..3 {
        assert_eq!(dircon.program().initial_guess_segment(dircon.force(0, j)), DVector::zeros(1));
    }
    for j in 0..2 {
        assert_eq!(dircon.program().initial_guess_segment(dircon.collocation_force(0, j)), DVector::zeros(1));
        assert_eq!(dircon.program().initial_guess_segment(dircon.collocation_slack(0, j)), DVector::zeros(1));
    }
}

#[test]
fn test_force_warm_start_samples_trajectory() {
    let mut dircon = single_mode_dircon(3);
    let h_block = dircon.timestep(0);
    dircon.program_mut().set_initial_guess(h_block, &DVector::from_vec(vec![0.1]));

    let times = [0.0, 1.0];
    let samples = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![2.0])];
    let traj = PiecewiseTrajectory::first_order_hold(&times, &samples).unwrap();
    dircon.set_initial_force_trajectory(0, Some(&traj), Some(&traj), None);

    let guess = dircon.program().initial_guess();
    // knot forces at t = 0, 0.1, 0.2; collocation forces at t = 0.05, 0.15
    for (j, expected) in [(0, 1.0), (1, 1.1), (2, 1.2)] {
        assert!((guess[dircon.force(0, j).index(0)] - expected).abs() < 1e-12);
    }
    for (j, expected) in [(0, 1.05), (1, 1.15)] {
        assert!((guess[dircon.collocation_force(0, j).index(0)] - expected).abs() < 1e-12);
    }
    assert_eq!(guess[dircon.collocation_slack(0, 0).index(0)], 0.0);
}

#[test]
fn test_mode_options_json_round_trip() {
    use crate::utils::utils_traits::ToAndFromJsonString;
    let mut options = ModeOptions::default();
    options.end_policy = BoundaryPolicy::Offset;
    options.relative_constraints = vec![0];
    let json = options.convert_to_json_string();
    let loaded = ModeOptions::load_from_json_string(&json).unwrap();
    assert_eq!(loaded.end_policy, BoundaryPolicy::Offset);
    assert_eq!(loaded.relative_constraints, vec![0]);
}

#[test]
fn test_input_trajectory_round_trip() {
    let dircon = single_mode_dircon(3);
    let mut assignment = DVector::zeros(dircon.program().num_variables());
    set_block(&mut assignment, dircon.timestep(0), &[0.1]);
    set_block(&mut assignment, dircon.timestep(1), &[0.1]);
    let inputs = [[1.0, -1.0], [0.5, 2.0], [0.0, 0.25]];
    for (j, u) in inputs.iter().enumerate() {
        set_block(&mut assignment, dircon.input(j), u);
    }

    let traj = dircon.reconstruct_input_trajectory(&assignment).unwrap();
    let times = dircon.sample_times(&assignment);
    assert_eq!(times, vec![0.0, 0.1, 0.2]);
    for (j, u) in inputs.iter().enumerate() {
        let value = traj.value(times[j]);
        assert!((value - DVector::from_vec(u.to_vec())).norm() < 1e-12);
    }
}

#[test]
fn test_state_trajectory_passes_through_knots() {
    let dircon = HybridDircon::new(model(), vec![3], vec![0.1], vec![0.1],
                                   vec![ground_manifold_unilateral()], vec![ModeOptions::default()]).unwrap();
    let mut assignment = DVector::zeros(dircon.program().num_variables());
    set_block(&mut assignment, dircon.timestep(0), &[0.1]);
    set_block(&mut assignment, dircon.timestep(1), &[0.1]);
    // sliding along the ground at constant velocity, gravity balanced
    for j in 0..3 {
        set_block(&mut assignment, dircon.state(j), &[0.1 * j as f64, 0.0, 1.0, 0.0]);
        set_block(&mut assignment, dircon.force(0, j), &[9.81]);
    }

    let traj = dircon.reconstruct_state_trajectory(&assignment).unwrap();
    for j in 0..3 {
        let expected = DVector::from_vec(vec![0.1 * j as f64, 0.0, 1.0, 0.0]);
        assert!((traj.value(0.1 * j as f64) - &expected).norm() < 1e-10);
    }
    // constant-velocity slide interpolates linearly between knots
    assert!((traj.value(0.05)[0] - 0.05).abs() < 1e-10);
}
