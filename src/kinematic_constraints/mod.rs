use std::sync::Arc;
use nalgebra::{DMatrix, DVector};
use crate::math_program::ProgramConstraint;
use crate::multibody::MultibodyModel;
use crate::utils::utils_errors::DirconError;

/// Position-level residual, jacobian, and `Jdot * v` of a kinematic
/// constraint, all evaluated at one `(q, v)`.
#[derive(Clone, Debug)]
pub struct ConstraintEvaluation {
    pub value: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub jacobian_dot_times_v: DVector<f64>
}

/// One algebraic constraint sub-object composing a mode's constraint manifold
/// (e.g. one contact point held at a fixed world position).  Constraint force
/// variables are laid out in sub-object order, so a sub-object of length `l`
/// owns a contiguous `l`-dimensional slice of each per-sample force block.
pub trait ManifoldConstraint {
    /// Output dimension of this sub-object.
    fn length(&self) -> usize;
    fn evaluate(&self, q: &DVector<f64>, v: &DVector<f64>) -> ConstraintEvaluation;
    /// Number of force-legality constraints (unilaterality, friction-cone-type
    /// bounds) this sub-object declares over its own force slice.
    fn num_force_constraints(&self) -> usize {
        0
    }
    fn force_constraint(&self, _idx: usize) -> Box<dyn ProgramConstraint> {
        panic!("this manifold constraint declares no force legality constraints.")
    }
}

/// The full algebraic constraint set active during one mode: an ordered
/// collection of [`ManifoldConstraint`] sub-objects with stacked evaluation.
pub struct ConstraintManifold {
    constraints: Vec<Box<dyn ManifoldConstraint>>
}
impl ConstraintManifold {
    pub fn new(constraints: Vec<Box<dyn ManifoldConstraint>>) -> Self {
        Self { constraints }
    }
    pub fn new_empty() -> Self {
        Self { constraints: vec![] }
    }
    /// Total constraint dimension of the manifold.
    pub fn count_constraints(&self) -> usize {
        self.constraints.iter().map(|c| c.length()).sum()
    }
    pub fn num_constraint_objects(&self) -> usize {
        self.constraints.len()
    }
    pub fn constraint(&self, idx: usize) -> &dyn ManifoldConstraint {
        self.constraints[idx].as_ref()
    }

    /// Stacks the evaluations of all sub-objects, in insertion order.
    pub fn evaluate_stacked(&self, q: &DVector<f64>, v: &DVector<f64>) -> ConstraintEvaluation {
        let k = self.count_constraints();
        let mut value = DVector::zeros(k);
        let mut jacobian = DMatrix::zeros(k, v.len());
        let mut jacobian_dot_times_v = DVector::zeros(k);

        let mut row = 0;
        for c in &self.constraints {
            let eval = c.evaluate(q, v);
            assert_eq!(eval.value.len(), c.length());
            value.rows_mut(row, c.length()).copy_from(&eval.value);
            jacobian.rows_mut(row, c.length()).copy_from(&eval.jacobian);
            jacobian_dot_times_v.rows_mut(row, c.length()).copy_from(&eval.jacobian_dot_times_v);
            row += c.length();
        }

        ConstraintEvaluation { value, jacobian, jacobian_dot_times_v }
    }
}

/// Composes a multibody model with one mode's constraint manifold and
/// evaluates the constrained dynamics
/// `vdot = M(q)^-1 (B(q) u - c(q, v) + J(q)^T lambda)` along with the
/// position-, velocity-, and acceleration-level constraint residuals.
#[derive(Clone)]
pub struct ConstrainedDynamicsEvaluator {
    model: Arc<dyn MultibodyModel>,
    manifold: Arc<ConstraintManifold>
}
impl ConstrainedDynamicsEvaluator {
    pub fn new(model: Arc<dyn MultibodyModel>, manifold: Arc<ConstraintManifold>) -> Self {
        Self { model, manifold }
    }
    pub fn model(&self) -> &Arc<dyn MultibodyModel> {
        &self.model
    }
    pub fn manifold(&self) -> &Arc<ConstraintManifold> {
        &self.manifold
    }
    pub fn num_kinematic_constraints(&self) -> usize {
        self.manifold.count_constraints()
    }

    pub fn split_state(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        assert_eq!(x.len(), self.model.num_states());
        let q = x.rows(0, self.model.num_positions()).into_owned();
        let v = x.rows(self.model.num_positions(), self.model.num_velocities()).into_owned();
        (q, v)
    }

    /// Generalized acceleration under the given input and constraint force.
    pub fn acceleration(&self, q: &DVector<f64>, v: &DVector<f64>, u: &DVector<f64>, lambda: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        let eval = self.manifold.evaluate_stacked(q, v);
        let rhs = self.model.actuation_matrix(q) * u - self.model.bias_term(q, v) + eval.jacobian.transpose() * lambda;
        let vdot = self.model.mass_matrix(q).lu().solve(&rhs);
        return match vdot {
            Some(vdot) => { Ok(vdot) }
            None => { Err(DirconError::new_generic_error_str("mass matrix was singular in acceleration computation.", file!(), line!())) }
        }
    }

    /// Full state derivative `[qdot; vdot]`.
    pub fn time_derivative(&self, x: &DVector<f64>, u: &DVector<f64>, lambda: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        let (q, v) = self.split_state(x);
        let vdot = self.acceleration(&q, &v, u, lambda)?;

        let mut xdot = DVector::zeros(self.model.num_states());
        xdot.rows_mut(0, self.model.num_positions()).copy_from(&v);
        xdot.rows_mut(self.model.num_positions(), self.model.num_velocities()).copy_from(&vdot);
        Ok(xdot)
    }

    /// `(phi, phidot, phiddot)` of the manifold at `(x, u, lambda)`.
    pub fn constraint_residuals(&self, x: &DVector<f64>, u: &DVector<f64>, lambda: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>, DVector<f64>), DirconError> {
        let (q, v) = self.split_state(x);
        let eval = self.manifold.evaluate_stacked(&q, &v);
        let vdot = self.acceleration(&q, &v, u, lambda)?;

        let phidot = &eval.jacobian * &v;
        let phiddot = &eval.jacobian_dot_times_v + &eval.jacobian * vdot;
        Ok((eval.value, phidot, phiddot))
    }
}

/// Pins one generalized coordinate to zero: `phi(q) = q[position_index]`.
/// The minimal contact constraint for models whose velocity coordinates align
/// with their position coordinates (e.g. holding a point mass on the ground
/// plane during a stance mode).
#[derive(Clone, Debug)]
pub struct CoordinatePinConstraint {
    position_index: usize,
    num_positions: usize,
    num_velocities: usize,
    unilateral_force: bool
}
impl CoordinatePinConstraint {
    pub fn new(position_index: usize, num_positions: usize, num_velocities: usize) -> Self {
        assert!(position_index < num_positions);
        assert!(position_index < num_velocities);
        Self { position_index, num_positions, num_velocities, unilateral_force: false }
    }
    /// Declares a unilaterality bound (`lambda >= 0`) on this constraint's force.
    pub fn new_with_unilateral_force(position_index: usize, num_positions: usize, num_velocities: usize) -> Self {
        let mut out_self = Self::new(position_index, num_positions, num_velocities);
        out_self.unilateral_force = true;
        out_self
    }
}
impl ManifoldConstraint for CoordinatePinConstraint {
    fn length(&self) -> usize {
        1
    }
    fn evaluate(&self, q: &DVector<f64>, _v: &DVector<f64>) -> ConstraintEvaluation {
        assert_eq!(q.len(), self.num_positions);
        let mut jacobian = DMatrix::zeros(1, self.num_velocities);
        jacobian[(0, self.position_index)] = 1.0;
        ConstraintEvaluation {
            value: DVector::from_vec(vec![q[self.position_index]]),
            jacobian,
            jacobian_dot_times_v: DVector::zeros(1)
        }
    }
    fn num_force_constraints(&self) -> usize {
        if self.unilateral_force { 1 } else { 0 }
    }
    fn force_constraint(&self, idx: usize) -> Box<dyn ProgramConstraint> {
        assert!(self.unilateral_force && idx == 0);
        Box::new(NonNegativeForceConstraint { dim: 1 })
    }
}

/// Unilaterality: each bound force entry must be non-negative.
#[derive(Clone, Debug)]
pub struct NonNegativeForceConstraint {
    dim: usize
}
impl NonNegativeForceConstraint {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}
impl ProgramConstraint for NonNegativeForceConstraint {
    fn num_constraints(&self) -> usize {
        self.dim
    }
    fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        assert_eq!(vars.len(), self.dim);
        Ok(vars.clone())
    }
    fn lower_bound(&self) -> DVector<f64> {
        DVector::zeros(self.dim)
    }
    fn upper_bound(&self) -> DVector<f64> {
        DVector::from_vec(vec![f64::INFINITY; self.dim])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multibody::PlanarPointMass;

    fn point_mass_on_ground() -> ConstrainedDynamicsEvaluator {
        let model = Arc::new(PlanarPointMass::new(1.0, 9.81));
        let manifold = Arc::new(ConstraintManifold::new(vec![
            Box::new(CoordinatePinConstraint::new_with_unilateral_force(1, 2, 2))
        ]));
        ConstrainedDynamicsEvaluator::new(model, manifold)
    }

    #[test]
    fn test_manifold_counts() {
        let evaluator = point_mass_on_ground();
        assert_eq!(evaluator.num_kinematic_constraints(), 1);
        assert_eq!(evaluator.manifold().num_constraint_objects(), 1);
        assert_eq!(evaluator.manifold().constraint(0).num_force_constraints(), 1);
    }

    #[test]
    fn test_stacked_evaluation() {
        let evaluator = point_mass_on_ground();
        let q = DVector::from_vec(vec![0.3, 0.7]);
        let v = DVector::from_vec(vec![1.0, 2.0]);
        let eval = evaluator.manifold().evaluate_stacked(&q, &v);
        assert_eq!(eval.value[0], 0.7);
        assert_eq!(eval.jacobian[(0, 1)], 1.0);
        assert_eq!(eval.jacobian_dot_times_v[0], 0.0);
    }

    #[test]
    fn test_constrained_acceleration_balances_gravity() {
        let evaluator = point_mass_on_ground();
        let x = DVector::zeros(4);
        let u = DVector::zeros(2);
        // the constraint force that exactly cancels gravity gives zero acceleration
        let lambda = DVector::from_vec(vec![9.81]);
        let xdot = evaluator.time_derivative(&x, &u, &lambda).unwrap();
        assert!(xdot.norm() < 1e-12);

        let (phi, phidot, phiddot) = evaluator.constraint_residuals(&x, &u, &lambda).unwrap();
        assert!(phi.norm() < 1e-12);
        assert!(phidot.norm() < 1e-12);
        assert!(phiddot.norm() < 1e-12);
    }

    #[test]
    fn test_unconstrained_fall() {
        let model: Arc<dyn MultibodyModel> = Arc::new(PlanarPointMass::new(1.0, 9.81));
        let evaluator = ConstrainedDynamicsEvaluator::new(model, Arc::new(ConstraintManifold::new_empty()));
        let x = DVector::from_vec(vec![0.0, 1.0, 0.5, 0.0]);
        let xdot = evaluator.time_derivative(&x, &DVector::zeros(2), &DVector::zeros(0)).unwrap();
        assert_eq!(xdot[0], 0.5);
        assert_eq!(xdot[1], 0.0);
        assert_eq!(xdot[2], 0.0);
        assert!((xdot[3] + 9.81).abs() < 1e-12);
    }
}
