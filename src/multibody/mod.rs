use nalgebra::{DMatrix, DVector};

/// Manipulator-form rigid-body model contract consumed by the transcription
/// engine: `M(q) vdot + c(q, v) = B(q) u + J(q)^T lambda`, with `qdot = v`.
///
/// Implementations are external collaborators (hand-derived models, bindings
/// to a rigid-body library, etc.); the engine only ever asks for the terms
/// below and never differentiates them itself.
pub trait MultibodyModel {
    fn num_positions(&self) -> usize;
    fn num_velocities(&self) -> usize;
    fn num_inputs(&self) -> usize;
    fn num_states(&self) -> usize {
        self.num_positions() + self.num_velocities()
    }
    /// Mass matrix `M(q)`, `num_velocities x num_velocities`.
    fn mass_matrix(&self, q: &DVector<f64>) -> DMatrix<f64>;
    /// Bias term `c(q, v)` collecting Coriolis, centripetal, and gravity
    /// contributions, on the left-hand side of the manipulator equation.
    fn bias_term(&self, q: &DVector<f64>, v: &DVector<f64>) -> DVector<f64>;
    /// Actuation matrix `B(q)`, `num_velocities x num_inputs`.
    fn actuation_matrix(&self, q: &DVector<f64>) -> DMatrix<f64>;
}

/// A fully actuated point mass in a vertical plane: `q = [x, z]`,
/// `v = [xdot, zdot]`, inputs are planar forces.  Useful as a minimal contact
/// model (pin `z` during a stance mode) in demos and tests.
#[derive(Clone, Debug)]
pub struct PlanarPointMass {
    mass: f64,
    gravity: f64
}
impl PlanarPointMass {
    pub fn new(mass: f64, gravity: f64) -> Self {
        assert!(mass > 0.0);
        Self { mass, gravity }
    }
    pub fn mass(&self) -> f64 {
        self.mass
    }
    pub fn gravity(&self) -> f64 {
        self.gravity
    }
}
impl MultibodyModel for PlanarPointMass {
    fn num_positions(&self) -> usize {
        2
    }
    fn num_velocities(&self) -> usize {
        2
    }
    fn num_inputs(&self) -> usize {
        2
    }
    fn mass_matrix(&self, _q: &DVector<f64>) -> DMatrix<f64> {
        self.mass * DMatrix::identity(2, 2)
    }
    fn bias_term(&self, _q: &DVector<f64>, _v: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![0.0, self.mass * self.gravity])
    }
    fn actuation_matrix(&self, _q: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(2, 2)
    }
}
