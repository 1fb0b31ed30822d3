use std::sync::Arc;
use nalgebra::DVector;
use crate::kinematic_constraints::ConstrainedDynamicsEvaluator;
use crate::math_program::{ProgramConstraint, ProgramCost};
use crate::transcription::{ModeTransitionLaw, RunningCost};
use crate::utils::utils_errors::DirconError;

/// Implicit collocation constraint over one adjacent sample pair of a mode.
///
/// Bound variables, in order: `[h, x0, x1, u0, u1, lambda0, lambda1,
/// lambda_c, v_c]`.  The residual requires the derivative of the cubic
/// interpolant between the two endpoint states at its midpoint to match the
/// constrained dynamics evaluated there with the collocation force
/// `lambda_c`; the collocation slack `v_c` adds `J^T v_c` to the
/// configuration-derivative rows of the dynamics-side derivative, absorbing
/// the velocity-level constraint residual that would otherwise
/// over-determine the system (position- and velocity-level constraint
/// satisfaction cannot generally hold simultaneously on a cubic).
#[derive(Clone)]
pub struct CollocationConstraint {
    evaluator: ConstrainedDynamicsEvaluator
}
impl CollocationConstraint {
    pub fn new(evaluator: ConstrainedDynamicsEvaluator) -> Self {
        Self { evaluator }
    }
    fn num_states(&self) -> usize {
        self.evaluator.model().num_states()
    }
}
impl ProgramConstraint for CollocationConstraint {
    fn num_constraints(&self) -> usize {
        self.num_states()
    }
    fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        let nx = self.num_states();
        let nq = self.evaluator.model().num_positions();
        let nu = self.evaluator.model().num_inputs();
        let k = self.evaluator.num_kinematic_constraints();
        assert_eq!(vars.len(), 1 + 2 * nx + 2 * nu + 4 * k);

        let h = vars[0];
        if h <= 0.0 {
            return Err(DirconError::new_generic_error_str("collocation constraint evaluated with non-positive timestep.", file!(), line!()));
        }
        let x0 = vars.rows(1, nx).into_owned();
        let x1 = vars.rows(1 + nx, nx).into_owned();
        let u0 = vars.rows(1 + 2 * nx, nu).into_owned();
        let u1 = vars.rows(1 + 2 * nx + nu, nu).into_owned();
        let lambda0 = vars.rows(1 + 2 * nx + 2 * nu, k).into_owned();
        let lambda1 = vars.rows(1 + 2 * nx + 2 * nu + k, k).into_owned();
        let lambda_c = vars.rows(1 + 2 * nx + 2 * nu + 2 * k, k).into_owned();
        let v_c = vars.rows(1 + 2 * nx + 2 * nu + 3 * k, k).into_owned();

        let xdot0 = self.evaluator.time_derivative(&x0, &u0, &lambda0)?;
        let xdot1 = self.evaluator.time_derivative(&x1, &u1, &lambda1)?;

        let xcol = 0.5 * (&x0 + &x1) + (h / 8.0) * (&xdot0 - &xdot1);
        let ucol = 0.5 * (u0 + u1);
        let xdotcol = (-1.5 / h) * (&x0 - &x1) - 0.25 * (&xdot0 + &xdot1);

        let mut xdot_dynamics = self.evaluator.time_derivative(&xcol, &ucol, &lambda_c)?;

        // v_c relaxes the constraint at the velocity level: the
        // configuration-derivative rows pick up J^T v_c along the manifold normals
        let (qcol, vcol) = self.evaluator.split_state(&xcol);
        let eval = self.evaluator.manifold().evaluate_stacked(&qcol, &vcol);
        let qdot_corrected = xdot_dynamics.rows(0, nq).into_owned() + eval.jacobian.transpose() * v_c;
        xdot_dynamics.rows_mut(0, nq).copy_from(&qdot_corrected);

        Ok(xdotcol - xdot_dynamics)
    }
}

/// Algebraic constraint-manifold enforcement at one knot.
///
/// Bound variables, in order: `[x, u, lambda, offset]`.  Rows are the
/// acceleration-level residual, the velocity-level residual, and (unless the
/// position level is disabled) the position-level residual with relative rows
/// shifted by the mode's offset variables.
#[derive(Clone)]
pub struct KinematicKnotConstraint {
    evaluator: ConstrainedDynamicsEvaluator,
    relative_constraints: Vec<usize>,
    enforce_position: bool,
    use_offset: bool
}
impl KinematicKnotConstraint {
    /// Interior-knot enforcement: all three levels, relative rows floating
    /// through the offset variables.
    pub fn new_interior(evaluator: ConstrainedDynamicsEvaluator, relative_constraints: Vec<usize>) -> Self {
        Self { evaluator, relative_constraints, enforce_position: true, use_offset: true }
    }
    /// Boundary-knot enforcement under the given policy.
    pub fn new_boundary(evaluator: ConstrainedDynamicsEvaluator, relative_constraints: Vec<usize>, policy: super::BoundaryPolicy) -> Self {
        let (enforce_position, use_offset) = match policy {
            super::BoundaryPolicy::Pinned => { (true, false) }
            super::BoundaryPolicy::Offset => { (true, true) }
            super::BoundaryPolicy::Free => { (false, false) }
        };
        Self { evaluator, relative_constraints, enforce_position, use_offset }
    }
    pub fn enforces_position(&self) -> bool {
        self.enforce_position
    }
}
impl ProgramConstraint for KinematicKnotConstraint {
    fn num_constraints(&self) -> usize {
        let k = self.evaluator.num_kinematic_constraints();
        return if self.enforce_position { 3 * k } else { 2 * k };
    }
    fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        let nx = self.evaluator.model().num_states();
        let nu = self.evaluator.model().num_inputs();
        let k = self.evaluator.num_kinematic_constraints();
        let num_offset = self.relative_constraints.len();
        assert_eq!(vars.len(), nx + nu + k + num_offset);

        let x = vars.rows(0, nx).into_owned();
        let u = vars.rows(nx, nu).into_owned();
        let lambda = vars.rows(nx + nu, k).into_owned();
        let offset = vars.rows(nx + nu + k, num_offset).into_owned();

        let (phi, phidot, phiddot) = self.evaluator.constraint_residuals(&x, &u, &lambda)?;

        let mut out_vec = DVector::zeros(self.num_constraints());
        out_vec.rows_mut(0, k).copy_from(&phiddot);
        out_vec.rows_mut(k, k).copy_from(&phidot);
        if self.enforce_position {
            let mut position_rows = phi;
            if self.use_offset {
                for (slot, row) in self.relative_constraints.iter().enumerate() {
                    position_rows[*row] -= offset[slot];
                }
            }
            out_vec.rows_mut(2 * k, k).copy_from(&position_rows);
        }
        Ok(out_vec)
    }
}

/// One term of the trapezoidal running-cost integral: `0.5 * (sum of bound
/// timesteps) * g(x, u)`.  First and last samples bind one timestep, interior
/// samples bind the two adjacent ones.
pub struct TrapezoidalCostTerm {
    cost: Arc<dyn RunningCost>,
    num_timesteps: usize,
    num_states: usize,
    num_inputs: usize
}
impl TrapezoidalCostTerm {
    pub fn new(cost: Arc<dyn RunningCost>, num_timesteps: usize, num_states: usize, num_inputs: usize) -> Self {
        assert!(num_timesteps == 1 || num_timesteps == 2);
        Self { cost, num_timesteps, num_states, num_inputs }
    }
}
impl ProgramCost for TrapezoidalCostTerm {
    fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError> {
        assert_eq!(vars.len(), self.num_timesteps + self.num_states + self.num_inputs);
        let mut h_sum = 0.0;
        for i in 0..self.num_timesteps { h_sum += vars[i]; }
        let x = vars.rows(self.num_timesteps, self.num_states).into_owned();
        let u = vars.rows(self.num_timesteps + self.num_states, self.num_inputs).into_owned();
        Ok(0.5 * h_sum * self.cost.evaluate(&x, &u)?)
    }
}

/// Identity-weighted quadratic regularization toward zero on one force block.
#[derive(Clone, Debug)]
pub struct QuadraticForceCost {
    weight: f64
}
impl QuadraticForceCost {
    pub fn new(weight: f64) -> Self {
        assert!(weight > 0.0);
        Self { weight }
    }
}
impl ProgramCost for QuadraticForceCost {
    fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError> {
        Ok(self.weight * vars.norm_squared())
    }
}

/// Adapts a [`ModeTransitionLaw`] to the program-constraint interface.
/// Bound variables, in order: `[x_pre, v_post, impulse]`.
pub struct TransitionLawConstraint {
    law: Box<dyn ModeTransitionLaw>,
    num_states: usize,
    num_velocities: usize,
    num_impulses: usize
}
impl TransitionLawConstraint {
    pub fn new(law: Box<dyn ModeTransitionLaw>, num_states: usize, num_velocities: usize, num_impulses: usize) -> Self {
        Self { law, num_states, num_velocities, num_impulses }
    }
}
impl ProgramConstraint for TransitionLawConstraint {
    fn num_constraints(&self) -> usize {
        self.law.num_constraints()
    }
    fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        assert_eq!(vars.len(), self.num_states + self.num_velocities + self.num_impulses);
        let x_pre = vars.rows(0, self.num_states).into_owned();
        let v_post = vars.rows(self.num_states, self.num_velocities).into_owned();
        let impulse = vars.rows(self.num_states + self.num_velocities, self.num_impulses).into_owned();
        self.law.evaluate(&x_pre, &v_post, &impulse)
    }
}
