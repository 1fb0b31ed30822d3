use std::time::Duration;
use nalgebra::DVector;
use optimization_engine::{constraints, Optimizer, Problem, SolverError};
use optimization_engine::alm::{AlmCache, AlmFactory, AlmOptimizer, AlmProblem, NO_JACOBIAN_MAPPING, NO_MAPPING, NO_SET};
use optimization_engine::core::ExitStatus;
use optimization_engine::panoc::{PANOCCache, PANOCOptimizer};
use crate::math_program::MathProgram;
use crate::utils::utils_console::{dircon_print, PrintColor, PrintMode};
use crate::utils::utils_errors::DirconError;
use crate::utils::utils_math::FiniteDifferenceUtils;

const FD_PERTURBATION: f64 = 1e-6;
const PANOC_TOLERANCE: f64 = 1e-5;
const PANOC_LBFGS_MEMORY: usize = 3;

/// Solves a [`MathProgram`] with the OpEn solver suite: PANOC when the
/// program only carries costs and variable bounds, ALM with a scalarized
/// constraint-violation penalty when constraint bindings or linear equality
/// constraints are present.  Gradients are finite-differenced; the program
/// only has to provide zeroth-order evaluations.
pub struct OpEnProgramSolver<'a> {
    program: &'a MathProgram
}
impl<'a> OpEnProgramSolver<'a> {
    pub fn new(program: &'a MathProgram) -> Self {
        Self { program }
    }

    pub fn solve(&self, parameters: &OptimizerParameters) -> Result<OptimizationResult, DirconError> {
        let has_constraints = !self.program.constraint_bindings().is_empty() || !self.program.linear_equality_constraints().is_empty();
        return match has_constraints {
            false => { self.solve_panoc(parameters) }
            true => { self.solve_alm(parameters) }
        }
    }

    fn cost_value(&self, u: &[f64]) -> f64 {
        self.program.total_cost(&DVector::from_column_slice(u)).expect("cost evaluation failed in solver callback")
    }
    fn violation_value(&self, u: &[f64]) -> f64 {
        self.program.constraint_violation(&DVector::from_column_slice(u)).expect("constraint evaluation failed in solver callback")
    }

    fn solve_panoc(&self, parameters: &OptimizerParameters) -> Result<OptimizationResult, DirconError> {
        let problem_size = self.program.num_variables();
        let mut panoc_cache = PANOCCache::new(problem_size, PANOC_TOLERANCE, PANOC_LBFGS_MEMORY);

        let f = |u: &[f64], cost: &mut f64| -> Result<(), SolverError> {
            *cost = self.cost_value(u);
            Ok(())
        };
        let df = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            let g = FiniteDifferenceUtils::gradient(|x| self.cost_value(x), u, FD_PERTURBATION);
            for (i, v) in g.iter().enumerate() { grad[i] = *v; }
            Ok(())
        };

        let bounds = constraints::Rectangle::new(Some(self.program.variable_lower_bounds()), Some(self.program.variable_upper_bounds()));
        let problem = Problem::new(&bounds, df, f);

        let mut panoc = PANOCOptimizer::new(problem, &mut panoc_cache);
        if let Some(a) = &parameters.max_time { panoc = panoc.with_max_duration(a.clone()); }
        if let Some(a) = &parameters.max_iterations { panoc = panoc.with_max_iter(a.clone()); }

        let mut u = self.program.initial_guess().as_slice().to_vec();
        let status = panoc.solve(&mut u);
        return match status {
            Ok(status) => {
                Ok(OptimizationResult {
                    x_min: DVector::from_vec(u),
                    exit_status: status.exit_status(),
                    num_outer_iterations: 0,
                    num_inner_iterations: status.iterations(),
                    solve_time: status.solve_time(),
                    cost: status.cost_value()
                })
            }
            Err(e) => { Err(DirconError::new_generic_error_str(&format!("PANOC solve failed: {:?}", e), file!(), line!())) }
        }
    }

    fn solve_alm(&self, parameters: &OptimizerParameters) -> Result<OptimizationResult, DirconError> {
        let problem_size = self.program.num_variables();
        let panoc_cache = PANOCCache::new(problem_size, PANOC_TOLERANCE, PANOC_LBFGS_MEMORY);
        // one penalty dimension: the aggregate squared constraint violation
        let mut alm_cache = AlmCache::new(panoc_cache, 0, 1);

        let f = |u: &[f64], cost: &mut f64| -> Result<(), SolverError> {
            *cost = self.cost_value(u);
            Ok(())
        };
        let df = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            let g = FiniteDifferenceUtils::gradient(|x| self.cost_value(x), u, FD_PERTURBATION);
            for (i, v) in g.iter().enumerate() { grad[i] = *v; }
            Ok(())
        };
        let f2 = |u: &[f64], f2u: &mut [f64]| -> Result<(), SolverError> {
            f2u[0] = self.violation_value(u);
            Ok(())
        };
        let f2_jacobian_product = |u: &[f64], d: &[f64], res: &mut [f64]| -> Result<(), SolverError> {
            let g = FiniteDifferenceUtils::gradient(|x| self.violation_value(x), u, FD_PERTURBATION);
            for (i, v) in g.iter().enumerate() { res[i] = *v * d[0]; }
            Ok(())
        };

        let bounds = constraints::Rectangle::new(Some(self.program.variable_lower_bounds()), Some(self.program.variable_upper_bounds()));

        let factory = AlmFactory::new(
            f,
            df,
            NO_MAPPING,
            NO_JACOBIAN_MAPPING,
            Some(f2),
            Some(f2_jacobian_product),
            NO_SET,
            1
        );

        let alm_problem = AlmProblem::new(
            bounds,
            NO_SET,
            NO_SET,
            |u: &[f64], xi: &[f64], cost: &mut f64| -> Result<(), SolverError> {
                factory.psi(u, xi, cost)
            },
            |u: &[f64], xi: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
                factory.d_psi(u, xi, grad)
            },
            NO_MAPPING,
            Some(f2),
            0,
            1
        );

        let mut alm_optimizer = AlmOptimizer::new(&mut alm_cache, alm_problem);
        if let Some(a) = &parameters.max_time { alm_optimizer = alm_optimizer.with_max_duration(a.clone()); }
        if let Some(a) = &parameters.max_iterations { alm_optimizer = alm_optimizer.with_max_inner_iterations(a.clone()); }
        if let Some(a) = &parameters.max_outer_iterations { alm_optimizer = alm_optimizer.with_max_outer_iterations(a.clone()); }

        let mut u = self.program.initial_guess().as_slice().to_vec();
        let solver_result = alm_optimizer.solve(&mut u);
        return match solver_result {
            Ok(r) => {
                Ok(OptimizationResult {
                    x_min: DVector::from_vec(u),
                    exit_status: r.exit_status(),
                    num_outer_iterations: r.num_outer_iterations(),
                    num_inner_iterations: r.num_inner_iterations(),
                    solve_time: r.solve_time(),
                    cost: r.cost()
                })
            }
            Err(e) => { Err(DirconError::new_generic_error_str(&format!("ALM solve failed: {:?}", e), file!(), line!())) }
        }
    }
}

#[derive(Clone, Debug)]
pub struct OptimizationResult {
    x_min: DVector<f64>,
    exit_status: ExitStatus,
    num_outer_iterations: usize,
    num_inner_iterations: usize,
    solve_time: Duration,
    cost: f64
}
impl OptimizationResult {
    pub fn x_min(&self) -> &DVector<f64> {
        &self.x_min
    }
    pub fn exit_status(&self) -> ExitStatus {
        self.exit_status
    }
    pub fn num_outer_iterations(&self) -> usize {
        self.num_outer_iterations
    }
    pub fn num_inner_iterations(&self) -> usize {
        self.num_inner_iterations
    }
    pub fn solve_time(&self) -> Duration {
        self.solve_time
    }
    pub fn cost(&self) -> f64 {
        self.cost
    }
    pub fn converged(&self) -> bool {
        self.exit_status == ExitStatus::Converged
    }
    pub fn print_summary(&self) {
        let color = if self.converged() { PrintColor::Green } else { PrintColor::Red };
        dircon_print(&format!("exit status: {:?}", self.exit_status), PrintMode::Println, color.clone(), true);
        dircon_print(&format!("cost: {}", self.cost), PrintMode::Println, color.clone(), false);
        dircon_print(&format!("iterations: {} outer, {} inner", self.num_outer_iterations, self.num_inner_iterations), PrintMode::Println, color.clone(), false);
        dircon_print(&format!("solve time: {:?}", self.solve_time), PrintMode::Println, color, false);
    }
}

#[derive(Clone, Debug)]
pub struct OptimizerParameters {
    max_time: Option<Duration>,
    max_iterations: Option<usize>,
    max_outer_iterations: Option<usize>
}
impl OptimizerParameters {
    pub fn new_empty() -> Self {
        Self::default()
    }
    pub fn set_max_time(&mut self, max_time: Duration) {
        self.max_time = Some(max_time);
    }
    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = Some(max_iterations);
    }
    pub fn set_max_outer_iterations(&mut self, max_outer_iterations: usize) {
        self.max_outer_iterations = Some(max_outer_iterations)
    }
}
impl Default for OptimizerParameters {
    fn default() -> Self {
        Self {
            max_time: None,
            max_iterations: None,
            max_outer_iterations: None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math_program::{ProgramConstraint, ProgramCost};

    struct ShiftedQuadraticCost;
    impl ProgramCost for ShiftedQuadraticCost {
        fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError> {
            Ok((vars[0] - 3.0) * (vars[0] - 3.0))
        }
    }

    struct SumToOneConstraint;
    impl ProgramConstraint for SumToOneConstraint {
        fn num_constraints(&self) -> usize { 1 }
        fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
            Ok(DVector::from_vec(vec![vars[0] + vars[1] - 1.0]))
        }
    }

    struct NormSquaredCost;
    impl ProgramCost for NormSquaredCost {
        fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError> {
            Ok(vars.norm_squared())
        }
    }

    #[test]
    fn test_panoc_unconstrained_minimum() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(1, "a").unwrap();
        program.add_cost(Box::new(ShiftedQuadraticCost), a.indices()).unwrap();

        let solver = OpEnProgramSolver::new(&program);
        let result = solver.solve(&OptimizerParameters::default()).unwrap();
        assert!((result.x_min()[0] - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_alm_equality_constrained_minimum() {
        // min |x|^2 subject to x0 + x1 = 1, so x = (0.5, 0.5)
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(2, "a").unwrap();
        program.add_cost(Box::new(NormSquaredCost), a.indices()).unwrap();
        program.add_constraint(Box::new(SumToOneConstraint), a.indices()).unwrap();
        program.set_initial_guess(a, &DVector::from_vec(vec![1.0, 0.0]));

        let mut parameters = OptimizerParameters::default();
        parameters.set_max_outer_iterations(50);
        let solver = OpEnProgramSolver::new(&program);
        let result = solver.solve(&parameters).unwrap();
        assert!((result.x_min()[0] - 0.5).abs() < 1e-2);
        assert!((result.x_min()[1] - 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_bounded_minimum_lands_on_bound() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(1, "a").unwrap();
        program.add_bounding_box_constraint(4.0, 10.0, a);
        program.add_cost(Box::new(ShiftedQuadraticCost), a.indices()).unwrap();
        program.set_initial_guess(a, &DVector::from_vec(vec![7.0]));

        let solver = OpEnProgramSolver::new(&program);
        let result = solver.solve(&OptimizerParameters::default()).unwrap();
        assert!((result.x_min()[0] - 4.0).abs() < 1e-3);
    }
}
