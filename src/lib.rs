//! Dircon is a transcription engine for trajectory optimization of hybrid
//! constrained dynamical systems (e.g., legged robots moving through a fixed
//! sequence of contact modes).  It implements direct collocation with
//! constraint forces: each mode's kinematic constraint manifold is enforced
//! at every knot and the constrained dynamics are collocated implicitly with
//! dedicated force and slack variables, producing a generic nonlinear
//! program that can be handed to an external solver.

pub mod kinematic_constraints;
pub mod math_program;
pub mod multibody;
pub mod nonlinear_optimization;
pub mod trajectories;
pub mod transcription;
pub mod utils;
