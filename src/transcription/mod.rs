pub mod constraints;

use std::sync::Arc;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use crate::kinematic_constraints::{ConstrainedDynamicsEvaluator, ConstraintManifold};
use crate::math_program::{MathProgram, ProgramConstraint, VariableBlock};
use crate::multibody::MultibodyModel;
use crate::trajectories::PiecewiseTrajectory;
use crate::transcription::constraints::{CollocationConstraint, KinematicKnotConstraint, QuadraticForceCost, TransitionLawConstraint, TrapezoidalCostTerm};
use crate::utils::utils_errors::DirconError;

/// Enforcement policy for the constraint manifold's position level at a
/// mode's first or last knot.  `Pinned` holds the residual at exactly zero,
/// `Offset` lets the relative rows float through the mode's offset
/// variables, and `Free` drops the position level entirely (velocity- and
/// acceleration-level consistency is always kept so the constraint forces
/// stay meaningful).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    Pinned,
    Offset,
    Free
}

/// Immutable per-mode configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeOptions {
    pub start_policy: BoundaryPolicy,
    pub end_policy: BoundaryPolicy,
    /// Rows of the mode's constraint manifold whose position-level target
    /// floats via the mode's offset variables instead of being pinned to zero.
    pub relative_constraints: Vec<usize>,
    /// If positive, adds `weight * |lambda|^2` at every sample of the mode.
    pub force_cost_weight: f64
}
impl ModeOptions {
    pub fn num_relative(&self) -> usize {
        self.relative_constraints.len()
    }
}
impl Default for ModeOptions {
    fn default() -> Self {
        Self {
            start_policy: BoundaryPolicy::Pinned,
            end_policy: BoundaryPolicy::Pinned,
            relative_constraints: vec![],
            force_cost_weight: 0.0
        }
    }
}

/// A user-supplied per-sample cost integrand `g(x, u)`, accumulated into a
/// trapezoidal approximation of its time integral by
/// [`HybridDircon::add_running_cost`].
pub trait RunningCost {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>) -> Result<f64, DirconError>;
}

/// An impact/impulse law relating a mode transition's pre-transition state,
/// post-transition velocity, and transition impulse.  The transcription does
/// not supply one: without a law added through
/// [`HybridDircon::add_mode_transition_law`], every post-transition velocity
/// block is a free variable, unconstrained relative to the predecessor
/// mode's final velocity.
pub trait ModeTransitionLaw {
    fn num_constraints(&self) -> usize;
    fn evaluate(&self, pre_transition_state: &DVector<f64>, post_transition_velocity: &DVector<f64>, impulse: &DVector<f64>) -> Result<DVector<f64>, DirconError>;
}

/// Hybrid DIRCON transcription: translates a multi-mode constrained
/// trajectory-optimization problem into a [`MathProgram`].
///
/// Samples live on a single global index spanning all modes, with each mode
/// occupying a contiguous range starting at `mode_start`.  Consecutive modes
/// share their boundary knot, so configuration is continuous across every
/// transition by construction; velocity at a mode's entry is a dedicated
/// per-mode variable block and may jump (see [`ModeTransitionLaw`]).
pub struct HybridDircon {
    program: MathProgram,
    model: Arc<dyn MultibodyModel>,
    evaluators: Vec<ConstrainedDynamicsEvaluator>,
    options: Vec<ModeOptions>,
    num_modes: usize,
    mode_lengths: Vec<usize>,
    mode_start: Vec<usize>,
    num_samples: usize,
    num_kinematic_constraints: Vec<usize>,
    h_vars: VariableBlock,
    x_vars: VariableBlock,
    u_vars: VariableBlock,
    force_vars: Vec<VariableBlock>,
    collocation_force_vars: Vec<VariableBlock>,
    collocation_slack_vars: Vec<VariableBlock>,
    offset_vars: Vec<VariableBlock>,
    v_post_transition_vars: VariableBlock
}
impl HybridDircon {
    pub fn new(model: Arc<dyn MultibodyModel>,
               num_time_samples: Vec<usize>,
               minimum_timestep: Vec<f64>,
               maximum_timestep: Vec<f64>,
               manifolds: Vec<ConstraintManifold>,
               options: Vec<ModeOptions>) -> Result<Self, DirconError> {
        let num_modes = num_time_samples.len();
        if num_modes == 0 {
            return Err(DirconError::new_configuration_error("at least one mode is required.", file!(), line!()));
        }
        if minimum_timestep.len() != num_modes || maximum_timestep.len() != num_modes || manifolds.len() != num_modes || options.len() != num_modes {
            return Err(DirconError::new_configuration_error(&format!("per-mode array lengths ({}, {}, {}, {}) must all match the number of modes ({}).",
                minimum_timestep.len(), maximum_timestep.len(), manifolds.len(), options.len(), num_modes), file!(), line!()));
        }
        for (i, n) in num_time_samples.iter().enumerate() {
            if *n < 2 {
                return Err(DirconError::new_configuration_error(&format!("mode {} has {} samples; every mode needs at least 2.", i, n), file!(), line!()));
            }
            if minimum_timestep[i] > maximum_timestep[i] {
                return Err(DirconError::new_configuration_error(&format!("mode {} has minimum timestep {} above maximum timestep {}.", i, minimum_timestep[i], maximum_timestep[i]), file!(), line!()));
            }
        }

        let num_velocities = model.num_velocities();
        let num_states = model.num_states();
        let num_inputs = model.num_inputs();

        let manifolds: Vec<Arc<ConstraintManifold>> = manifolds.into_iter().map(Arc::new).collect();
        for (i, manifold) in manifolds.iter().enumerate() {
            let k = manifold.count_constraints();
            if let Some(row) = options[i].relative_constraints.iter().find(|r| **r >= k) {
                return Err(DirconError::new_configuration_error(&format!("mode {} marks constraint row {} relative, but its manifold has dimension {}.", i, row, k), file!(), line!()));
            }
        }

        // consecutive modes share their boundary knot
        let num_samples: usize = num_time_samples.iter().sum::<usize>() - (num_modes - 1);

        let mut program = MathProgram::new_empty();
        let h_vars = program.new_variables(num_samples - 1, "h")?;
        let x_vars = program.new_variables(num_samples * num_states, "x")?;
        let u_vars = program.new_variables(num_samples * num_inputs, "u")?;
        let v_post_transition_vars = program.new_variables((num_modes - 1) * num_velocities, "v_p")?;

        let evaluators: Vec<ConstrainedDynamicsEvaluator> = manifolds.iter()
            .map(|m| ConstrainedDynamicsEvaluator::new(model.clone(), m.clone()))
            .collect();

        let mut out_self = Self {
            program,
            model,
            evaluators,
            options,
            num_modes,
            mode_lengths: num_time_samples,
            mode_start: vec![],
            num_samples,
            num_kinematic_constraints: vec![],
            h_vars,
            x_vars,
            u_vars,
            force_vars: vec![],
            collocation_force_vars: vec![],
            collocation_slack_vars: vec![],
            offset_vars: vec![],
            v_post_transition_vars
        };

        // initialization is looped over the modes
        let mut counter = 0;
        for i in 0..num_modes {
            out_self.mode_start.push(counter);
            let n = out_self.mode_lengths[i];
            let k = out_self.evaluators[i].num_kinematic_constraints();
            out_self.num_kinematic_constraints.push(k);

            // timestep bounds; timesteps within a mode are forced equal, so the
            // timestep is piecewise-constant per mode and free across boundaries
            for j in 0..n - 1 {
                out_self.program.add_bounding_box_constraint(minimum_timestep[i], maximum_timestep[i], out_self.h_vars.segment(counter + j, 1));
            }
            for j in 0..n.saturating_sub(2) {
                out_self.program.add_linear_equality_constraint(
                    vec![(out_self.h_vars.index(counter + j), 1.0), (out_self.h_vars.index(counter + j + 1), -1.0)], 0.0);
            }

            let force_vars = out_self.program.new_variables(k * n, &format!("lambda[{}]", i))?;
            let collocation_force_vars = out_self.program.new_variables(k * (n - 1), &format!("lambda_c[{}]", i))?;
            let collocation_slack_vars = out_self.program.new_variables(k * (n - 1), &format!("v_c[{}]", i))?;
            let offset_vars = out_self.program.new_variables(out_self.options[i].num_relative(), &format!("offset[{}]", i))?;
            out_self.force_vars.push(force_vars);
            out_self.collocation_force_vars.push(collocation_force_vars);
            out_self.collocation_slack_vars.push(collocation_slack_vars);
            out_self.offset_vars.push(offset_vars);

            let dynamic_constraint = CollocationConstraint::new(out_self.evaluators[i].clone());
            if dynamic_constraint.num_constraints() != num_states {
                return Err(DirconError::new_configuration_error(&format!("mode {} dynamics constraint has output dimension {}, but the state dimension is {}.",
                    i, dynamic_constraint.num_constraints(), num_states), file!(), line!()));
            }

            // one implicit collocation constraint per adjacent sample pair
            for j in 0..n - 1 {
                let time_index = counter + j;
                let mut indices = vec![out_self.h_vars.index(time_index)];
                indices.extend(out_self.state_variables_by_mode(i, j));
                indices.extend(out_self.state_variables_by_mode(i, j + 1));
                indices.extend(out_self.u_vars.segment(time_index * num_inputs, 2 * num_inputs).indices());
                indices.extend(force_vars.segment(j * k, 2 * k).indices());
                indices.extend(collocation_force_vars.segment(j * k, k).indices());
                indices.extend(collocation_slack_vars.segment(j * k, k).indices());
                out_self.program.add_constraint(Box::new(dynamic_constraint.clone()), indices)?;
            }

            // manifold enforcement at interior knots
            let kinematic_constraint = KinematicKnotConstraint::new_interior(
                out_self.evaluators[i].clone(), out_self.options[i].relative_constraints.clone());
            for j in 1..n - 1 {
                let indices = out_self.kinematic_knot_indices(i, j);
                out_self.program.add_constraint(Box::new(kinematic_constraint.clone()), indices)?;
            }

            // first and last knots get their own boundary policies
            let kinematic_constraint_start = KinematicKnotConstraint::new_boundary(
                out_self.evaluators[i].clone(), out_self.options[i].relative_constraints.clone(), out_self.options[i].start_policy);
            out_self.program.add_constraint(Box::new(kinematic_constraint_start), out_self.kinematic_knot_indices(i, 0))?;

            let kinematic_constraint_end = KinematicKnotConstraint::new_boundary(
                out_self.evaluators[i].clone(), out_self.options[i].relative_constraints.clone(), out_self.options[i].end_policy);
            out_self.program.add_constraint(Box::new(kinematic_constraint_end), out_self.kinematic_knot_indices(i, n - 1))?;

            // force legality constraints declared by the manifold sub-objects
            for l in 0..n - 1 {
                let mut start_index = l * k;
                for j in 0..out_self.evaluators[i].manifold().num_constraint_objects() {
                    let constraint_j = out_self.evaluators[i].manifold().constraint(j);
                    for m in 0..constraint_j.num_force_constraints() {
                        out_self.program.add_constraint(
                            constraint_j.force_constraint(m),
                            force_vars.segment(start_index, constraint_j.length()).indices())?;
                    }
                    start_index += constraint_j.length();
                }
            }

            if out_self.options[i].force_cost_weight > 0.0 {
                for j in 0..n {
                    out_self.program.add_cost(
                        Box::new(QuadraticForceCost::new(out_self.options[i].force_cost_weight)),
                        force_vars.segment(j * k, k).indices())?;
                }
            }

            counter += n - 1;
        }

        Ok(out_self)
    }

    fn kinematic_knot_indices(&self, mode: usize, j: usize) -> Vec<usize> {
        let num_inputs = self.model.num_inputs();
        let k = self.num_kinematic_constraints[mode];
        let time_index = self.mode_start[mode] + j;

        let mut indices = self.state_variables_by_mode(mode, j);
        indices.extend(self.u_vars.segment(time_index * num_inputs, num_inputs).indices());
        indices.extend(self.force_vars[mode].segment(j * k, k).indices());
        indices.extend(self.offset_vars[mode].indices());
        indices
    }

    /// Decision-variable indices of the full state at sample `j` of `mode`.
    ///
    /// At the first sample of every mode after the first, the configuration
    /// half aliases the shared global sample while the velocity half comes
    /// from the mode's post-transition velocity block; this is the single
    /// place the hybrid discontinuity enters the otherwise mode-agnostic
    /// sample sequence.
    pub fn state_variables_by_mode(&self, mode: usize, j: usize) -> Vec<usize> {
        assert!(mode < self.num_modes && j < self.mode_lengths[mode]);
        let global = self.mode_start[mode] + j;
        let num_states = self.model.num_states();
        let num_positions = self.model.num_positions();

        return if j == 0 && mode > 0 {
            let mut indices = self.x_vars.segment(global * num_states, num_positions).indices();
            indices.extend(self.v_post_transition_vars_by_mode(mode).indices());
            indices
        } else {
            self.x_vars.segment(global * num_states, num_states).indices()
        }
    }

    /// Post-transition velocity block of `mode` (which must be > 0).
    pub fn v_post_transition_vars_by_mode(&self, mode: usize) -> VariableBlock {
        assert!(mode > 0 && mode < self.num_modes);
        let num_velocities = self.model.num_velocities();
        self.v_post_transition_vars.segment((mode - 1) * num_velocities, num_velocities)
    }

    pub fn timestep(&self, idx: usize) -> VariableBlock {
        self.h_vars.segment(idx, 1)
    }
    pub fn state(&self, global_sample: usize) -> VariableBlock {
        let num_states = self.model.num_states();
        self.x_vars.segment(global_sample * num_states, num_states)
    }
    pub fn input(&self, global_sample: usize) -> VariableBlock {
        let num_inputs = self.model.num_inputs();
        self.u_vars.segment(global_sample * num_inputs, num_inputs)
    }
    pub fn force(&self, mode: usize, j: usize) -> VariableBlock {
        let k = self.num_kinematic_constraints[mode];
        self.force_vars[mode].segment(j * k, k)
    }
    pub fn collocation_force(&self, mode: usize, j: usize) -> VariableBlock {
        let k = self.num_kinematic_constraints[mode];
        self.collocation_force_vars[mode].segment(j * k, k)
    }
    pub fn collocation_slack(&self, mode: usize, j: usize) -> VariableBlock {
        let k = self.num_kinematic_constraints[mode];
        self.collocation_slack_vars[mode].segment(j * k, k)
    }
    pub fn offset_vars(&self, mode: usize) -> VariableBlock {
        self.offset_vars[mode]
    }

    pub fn num_modes(&self) -> usize {
        self.num_modes
    }
    pub fn mode_lengths(&self) -> &Vec<usize> {
        &self.mode_lengths
    }
    pub fn mode_start(&self) -> &Vec<usize> {
        &self.mode_start
    }
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }
    pub fn num_kinematic_constraints(&self, mode: usize) -> usize {
        self.num_kinematic_constraints[mode]
    }
    pub fn program(&self) -> &MathProgram {
        &self.program
    }
    pub fn program_mut(&mut self) -> &mut MathProgram {
        &mut self.program
    }
    pub fn into_program(self) -> MathProgram {
        self.program
    }

    /// Accumulates `g(x, u)` into a trapezoidal approximation of its time
    /// integral over the whole global sample sequence: half weight at the
    /// first and last samples, `(h_{j-1} + h_j) / 2` at interior samples.
    ///
    /// The traversal deliberately does not special-case mode boundaries;
    /// transitions are integrated through as ordinary samples.
    pub fn add_running_cost<C: RunningCost + 'static>(&mut self, cost: C) -> Result<(), DirconError> {
        let cost: Arc<dyn RunningCost> = Arc::new(cost);
        let num_states = self.model.num_states();
        let num_inputs = self.model.num_inputs();

        for j in 0..self.num_samples {
            let (num_timesteps, h_indices) = if j == 0 {
                (1, vec![self.h_vars.index(0)])
            } else if j == self.num_samples - 1 {
                (1, vec![self.h_vars.index(self.num_samples - 2)])
            } else {
                (2, vec![self.h_vars.index(j - 1), self.h_vars.index(j)])
            };

            let mut indices = h_indices;
            indices.extend(self.state(j).indices());
            indices.extend(self.input(j).indices());
            self.program.add_cost(
                Box::new(TrapezoidalCostTerm::new(cost.clone(), num_timesteps, num_states, num_inputs)),
                indices)?;
        }
        Ok(())
    }

    /// Wires an impact law across the transition into `mode`: allocates a
    /// transition impulse block sized by the mode's constraint dimension and
    /// binds (predecessor final state, post-transition velocity, impulse).
    /// Returns the impulse block.
    pub fn add_mode_transition_law(&mut self, mode: usize, law: Box<dyn ModeTransitionLaw>) -> Result<VariableBlock, DirconError> {
        if mode == 0 || mode >= self.num_modes {
            return Err(DirconError::new_configuration_error(&format!("transition laws apply to modes 1..{}, got {}.", self.num_modes, mode), file!(), line!()));
        }
        let num_states = self.model.num_states();
        let num_velocities = self.model.num_velocities();
        let num_impulses = self.num_kinematic_constraints[mode];

        let impulse_vars = self.program.new_variables(num_impulses, &format!("impulse[{}]", mode))?;

        let mut indices = self.state_variables_by_mode(mode - 1, self.mode_lengths[mode - 1] - 1);
        indices.extend(self.v_post_transition_vars_by_mode(mode).indices());
        indices.extend(impulse_vars.indices());
        self.program.add_constraint(
            Box::new(TransitionLawConstraint::new(law, num_states, num_velocities, num_impulses)), indices)?;
        Ok(impulse_vars)
    }

    /// Seeds the force, collocation-force, and collocation-slack groups of
    /// `mode` from continuous-time initial guesses.  `None` means "no
    /// information" and zero-fills the group.  Nominal sample times are laid
    /// out with the current initial guess for the first timestep; collocation
    /// values are sampled at the midpoint between adjacent samples.
    pub fn set_initial_force_trajectory(&mut self, mode: usize,
                                        traj_init_l: Option<&PiecewiseTrajectory>,
                                        traj_init_lc: Option<&PiecewiseTrajectory>,
                                        traj_init_vc: Option<&PiecewiseTrajectory>) {
        assert!(mode < self.num_modes);
        let n = self.mode_lengths[mode];
        let k = self.num_kinematic_constraints[mode];
        let h = self.program.initial_guess_segment(self.h_vars.segment(0, 1))[0];
        let start_time = 0.0;

        let mut guess_force = DVector::zeros(self.force_vars[mode].len());
        if let Some(traj) = traj_init_l {
            for j in 0..n {
                guess_force.rows_mut(j * k, k).copy_from(&traj.value(start_time + j as f64 * h));
            }
        }
        self.program.set_initial_guess(self.force_vars[mode], &guess_force);

        let mut guess_collocation_force = DVector::zeros(self.collocation_force_vars[mode].len());
        if let Some(traj) = traj_init_lc {
            for j in 0..n - 1 {
                guess_collocation_force.rows_mut(j * k, k).copy_from(&traj.value(start_time + (j as f64 + 0.5) * h));
            }
        }
        self.program.set_initial_guess(self.collocation_force_vars[mode], &guess_collocation_force);

        let mut guess_collocation_slack = DVector::zeros(self.collocation_slack_vars[mode].len());
        if let Some(traj) = traj_init_vc {
            for j in 0..n - 1 {
                guess_collocation_slack.rows_mut(j * k, k).copy_from(&traj.value(start_time + (j as f64 + 0.5) * h));
            }
        }
        self.program.set_initial_guess(self.collocation_slack_vars[mode], &guess_collocation_slack);
    }

    /// Sample times implied by the timestep values in `assignment`, starting
    /// from zero.
    pub fn sample_times(&self, assignment: &DVector<f64>) -> Vec<f64> {
        let h = self.program.extract_block(assignment, self.h_vars);
        let mut out_vec = vec![0.0];
        for i in 0..h.len() {
            out_vec.push(out_vec[i] + h[i]);
        }
        out_vec
    }

    /// First-order-hold input trajectory through the solved input samples.
    pub fn reconstruct_input_trajectory(&self, assignment: &DVector<f64>) -> Result<PiecewiseTrajectory, DirconError> {
        let times = self.sample_times(assignment);
        let mut inputs = vec![];
        for j in 0..self.num_samples {
            inputs.push(self.program.extract_block(assignment, self.input(j)));
        }
        PiecewiseTrajectory::first_order_hold(&times, &inputs)
    }

    /// Cubic Hermite state trajectory through the solved states, with knot
    /// derivatives from the constrained dynamics at the solved
    /// (state, input, force) triples.
    ///
    /// The interpolation treats the full sample sequence as one smooth curve;
    /// the velocity jump at mode boundaries is not special-cased (the shared
    /// boundary knot is evaluated with the successor mode's manifold and
    /// forces).  A per-boundary correction would slot into `knot_state` /
    /// the per-knot derivative below without restructuring the traversal.
    pub fn reconstruct_state_trajectory(&self, assignment: &DVector<f64>) -> Result<PiecewiseTrajectory, DirconError> {
        let times = self.sample_times(assignment);
        let mut states = vec![DVector::zeros(self.model.num_states()); self.num_samples];
        let mut derivatives = vec![DVector::zeros(self.model.num_states()); self.num_samples];

        for i in 0..self.num_modes {
            for j in 0..self.mode_lengths[i] {
                let global = self.mode_start[i] + j;
                let x = self.knot_state(assignment, i, j);
                let u = self.program.extract_block(assignment, self.input(global));
                let lambda = self.program.extract_block(assignment, self.force(i, j));
                derivatives[global] = self.evaluators[i].time_derivative(&x, &u, &lambda)?;
                states[global] = x;
            }
        }

        PiecewiseTrajectory::cubic_hermite(&times, &states, &derivatives)
    }

    // single extension point for a future hybrid-boundary correction
    fn knot_state(&self, assignment: &DVector<f64>, mode: usize, j: usize) -> DVector<f64> {
        crate::math_program::gather(assignment, &self.state_variables_by_mode(mode, j))
    }
}

#[cfg(test)]
mod tests;
