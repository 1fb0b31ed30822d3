use nalgebra::DVector;
use crate::utils::utils_errors::DirconError;

/// A named, fixed-size, insertion-ordered block of scalar decision variables.
/// Blocks are handed out by [`MathProgram::new_variables`] and never resized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariableBlock {
    start: usize,
    len: usize
}
impl VariableBlock {
    pub fn start(&self) -> usize {
        self.start
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// Global index of the i'th scalar in this block.
    pub fn index(&self, i: usize) -> usize {
        assert!(i < self.len);
        return self.start + i;
    }
    /// Contiguous sub-block, offset and length in scalars.
    pub fn segment(&self, offset: usize, len: usize) -> VariableBlock {
        assert!(offset + len <= self.len);
        return VariableBlock { start: self.start + offset, len };
    }
    pub fn indices(&self) -> Vec<usize> {
        (self.start..self.start + self.len).collect()
    }
    pub fn overlaps(&self, other: &VariableBlock) -> bool {
        self.start < other.start + other.len && other.start < self.start + self.len
    }
}

/// A (generally nonlinear) vector-valued constraint `lb <= g(vars) <= ub`.
/// `vars` is the stacked vector of the variables the constraint was bound to,
/// in binding order.  Bounds default to zero on both sides (equality).
pub trait ProgramConstraint {
    fn num_constraints(&self) -> usize;
    fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError>;
    fn lower_bound(&self) -> DVector<f64> {
        DVector::zeros(self.num_constraints())
    }
    fn upper_bound(&self) -> DVector<f64> {
        DVector::zeros(self.num_constraints())
    }
}

/// A scalar cost term over the stacked vector of its bound variables.
pub trait ProgramCost {
    fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError>;
}

/// An attachment of one constraint instance to an ordered list of decision
/// variables.  Purely structural; created once and never mutated.
pub struct ConstraintBinding {
    constraint: Box<dyn ProgramConstraint>,
    variable_indices: Vec<usize>
}
impl ConstraintBinding {
    pub fn constraint(&self) -> &dyn ProgramConstraint {
        self.constraint.as_ref()
    }
    pub fn variable_indices(&self) -> &Vec<usize> {
        &self.variable_indices
    }
    pub fn evaluate(&self, x: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
        self.constraint.evaluate(&gather(x, &self.variable_indices))
    }
    /// Sum of squared bound violations of this constraint at `x`.
    pub fn violation(&self, x: &DVector<f64>) -> Result<f64, DirconError> {
        let g = self.evaluate(x)?;
        let lb = self.constraint.lower_bound();
        let ub = self.constraint.upper_bound();
        let mut out_sum = 0.0;
        for i in 0..g.len() {
            let v = f64::max(0.0, f64::max(lb[i] - g[i], g[i] - ub[i]));
            out_sum += v * v;
        }
        Ok(out_sum)
    }
}

pub struct CostBinding {
    cost: Box<dyn ProgramCost>,
    variable_indices: Vec<usize>
}
impl CostBinding {
    pub fn cost(&self) -> &dyn ProgramCost {
        self.cost.as_ref()
    }
    pub fn variable_indices(&self) -> &Vec<usize> {
        &self.variable_indices
    }
    pub fn evaluate(&self, x: &DVector<f64>) -> Result<f64, DirconError> {
        self.cost.evaluate(&gather(x, &self.variable_indices))
    }
}

/// `sum_i coefficient_i * x[variable_index_i] + constant == 0`
#[derive(Clone, Debug)]
pub struct LinearEqualityConstraint {
    terms: Vec<(usize, f64)>,
    constant: f64
}
impl LinearEqualityConstraint {
    pub fn terms(&self) -> &Vec<(usize, f64)> {
        &self.terms
    }
    pub fn constant(&self) -> f64 {
        self.constant
    }
    pub fn evaluate(&self, x: &DVector<f64>) -> f64 {
        let mut out_sum = self.constant;
        for (idx, coefficient) in &self.terms {
            out_sum += coefficient * x[*idx];
        }
        out_sum
    }
}

/// A generic registry of decision variables, constraints, and costs that an
/// external numerical solver can optimize.  Transcription engines are clients
/// of this narrow interface; the registry itself knows nothing about modes,
/// samples, or dynamics.
pub struct MathProgram {
    num_variables: usize,
    group_names: Vec<String>,
    group_blocks: Vec<VariableBlock>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    initial_guess: Vec<f64>,
    constraint_bindings: Vec<ConstraintBinding>,
    linear_equality_constraints: Vec<LinearEqualityConstraint>,
    cost_bindings: Vec<CostBinding>
}
impl MathProgram {
    pub fn new_empty() -> Self {
        Self {
            num_variables: 0,
            group_names: vec![],
            group_blocks: vec![],
            lower_bounds: vec![],
            upper_bounds: vec![],
            initial_guess: vec![],
            constraint_bindings: vec![],
            linear_equality_constraints: vec![],
            cost_bindings: vec![]
        }
    }

    /// Appends a new named variable group.  Group names must be unique so that
    /// solver-side indexing stays unambiguous.
    pub fn new_variables(&mut self, count: usize, name: &str) -> Result<VariableBlock, DirconError> {
        if self.group_names.iter().any(|n| n == name) {
            return Err(DirconError::new_configuration_error(&format!("variable group name {:?} already exists in this program.", name), file!(), line!()));
        }

        let block = VariableBlock { start: self.num_variables, len: count };
        self.num_variables += count;
        self.group_names.push(name.to_string());
        self.group_blocks.push(block);
        for _ in 0..count {
            self.lower_bounds.push(f64::NEG_INFINITY);
            self.upper_bounds.push(f64::INFINITY);
            self.initial_guess.push(0.0);
        }

        Ok(block)
    }
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }
    pub fn group_names(&self) -> &Vec<String> {
        &self.group_names
    }
    pub fn group_blocks(&self) -> &Vec<VariableBlock> {
        &self.group_blocks
    }

    pub fn add_bounding_box_constraint(&mut self, lower: f64, upper: f64, block: VariableBlock) {
        assert!(block.start + block.len <= self.num_variables);
        for i in 0..block.len {
            let idx = block.index(i);
            self.lower_bounds[idx] = f64::max(self.lower_bounds[idx], lower);
            self.upper_bounds[idx] = f64::min(self.upper_bounds[idx], upper);
        }
    }
    pub fn add_linear_equality_constraint(&mut self, terms: Vec<(usize, f64)>, constant: f64) {
        for (idx, _) in &terms { assert!(*idx < self.num_variables); }
        self.linear_equality_constraints.push(LinearEqualityConstraint { terms, constant });
    }
    pub fn add_constraint(&mut self, constraint: Box<dyn ProgramConstraint>, variable_indices: Vec<usize>) -> Result<(), DirconError> {
        for idx in &variable_indices {
            if *idx >= self.num_variables {
                return Err(DirconError::new_idx_out_of_bound_error(*idx, self.num_variables, file!(), line!()));
            }
        }
        self.constraint_bindings.push(ConstraintBinding { constraint, variable_indices });
        Ok(())
    }
    pub fn add_cost(&mut self, cost: Box<dyn ProgramCost>, variable_indices: Vec<usize>) -> Result<(), DirconError> {
        for idx in &variable_indices {
            if *idx >= self.num_variables {
                return Err(DirconError::new_idx_out_of_bound_error(*idx, self.num_variables, file!(), line!()));
            }
        }
        self.cost_bindings.push(CostBinding { cost, variable_indices });
        Ok(())
    }

    pub fn set_initial_guess(&mut self, block: VariableBlock, values: &DVector<f64>) {
        assert_eq!(block.len, values.len());
        for i in 0..block.len {
            self.initial_guess[block.index(i)] = values[i];
        }
    }
    pub fn initial_guess(&self) -> DVector<f64> {
        DVector::from_vec(self.initial_guess.clone())
    }
    pub fn initial_guess_segment(&self, block: VariableBlock) -> DVector<f64> {
        let mut out_vec = DVector::zeros(block.len);
        for i in 0..block.len {
            out_vec[i] = self.initial_guess[block.index(i)];
        }
        out_vec
    }

    pub fn extract_block(&self, x: &DVector<f64>, block: VariableBlock) -> DVector<f64> {
        assert!(block.start + block.len <= x.len());
        x.rows(block.start, block.len).into_owned()
    }

    pub fn constraint_bindings(&self) -> &Vec<ConstraintBinding> {
        &self.constraint_bindings
    }
    pub fn linear_equality_constraints(&self) -> &Vec<LinearEqualityConstraint> {
        &self.linear_equality_constraints
    }
    pub fn cost_bindings(&self) -> &Vec<CostBinding> {
        &self.cost_bindings
    }
    pub fn variable_lower_bounds(&self) -> &Vec<f64> {
        &self.lower_bounds
    }
    pub fn variable_upper_bounds(&self) -> &Vec<f64> {
        &self.upper_bounds
    }

    /// Sum of all cost bindings at `x`.
    pub fn total_cost(&self, x: &DVector<f64>) -> Result<f64, DirconError> {
        let mut out_sum = 0.0;
        for binding in &self.cost_bindings {
            out_sum += binding.evaluate(x)?;
        }
        Ok(out_sum)
    }
    /// Aggregate sum-of-squares violation of all constraint bindings and
    /// linear equality constraints at `x`.  Zero iff `x` is feasible with
    /// respect to everything but the per-variable bounding boxes.
    pub fn constraint_violation(&self, x: &DVector<f64>) -> Result<f64, DirconError> {
        let mut out_sum = 0.0;
        for binding in &self.constraint_bindings {
            out_sum += binding.violation(x)?;
        }
        for linear in &self.linear_equality_constraints {
            let v = linear.evaluate(x);
            out_sum += v * v;
        }
        Ok(out_sum)
    }
}

/// Stacks the given entries of `x` into a new vector, in index order.
pub fn gather(x: &DVector<f64>, indices: &[usize]) -> DVector<f64> {
    let mut out_vec = DVector::zeros(indices.len());
    for (i, idx) in indices.iter().enumerate() {
        out_vec[i] = x[*idx];
    }
    out_vec
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SquaredNormConstraint {
        dim: usize
    }
    impl ProgramConstraint for SquaredNormConstraint {
        fn num_constraints(&self) -> usize { 1 }
        fn evaluate(&self, vars: &DVector<f64>) -> Result<DVector<f64>, DirconError> {
            assert_eq!(vars.len(), self.dim);
            Ok(DVector::from_vec(vec![vars.norm_squared()]))
        }
    }

    struct SumCost;
    impl ProgramCost for SumCost {
        fn evaluate(&self, vars: &DVector<f64>) -> Result<f64, DirconError> {
            Ok(vars.sum())
        }
    }

    #[test]
    fn test_variable_group_allocation() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(3, "a").unwrap();
        let b = program.new_variables(2, "b").unwrap();
        assert_eq!(program.num_variables(), 5);
        assert_eq!(a.start(), 0);
        assert_eq!(b.start(), 3);
        assert_eq!(b.indices(), vec![3, 4]);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.segment(2, 1)));
    }

    #[test]
    fn test_duplicate_group_name_is_rejected() {
        let mut program = MathProgram::new_empty();
        program.new_variables(3, "a").unwrap();
        assert!(matches!(program.new_variables(1, "a"), Err(DirconError::ConfigurationError(_))));
    }

    #[test]
    fn test_bounding_box_tightens() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(2, "a").unwrap();
        program.add_bounding_box_constraint(-1.0, 1.0, a);
        program.add_bounding_box_constraint(0.0, 5.0, a.segment(1, 1));
        assert_eq!(program.variable_lower_bounds()[0], -1.0);
        assert_eq!(program.variable_lower_bounds()[1], 0.0);
        assert_eq!(program.variable_upper_bounds()[1], 1.0);
    }

    #[test]
    fn test_constraint_binding_gathers_in_order() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(4, "a").unwrap();
        program.add_constraint(Box::new(SquaredNormConstraint { dim: 2 }), vec![a.index(3), a.index(0)]).unwrap();

        let x = DVector::from_vec(vec![2.0, 0.0, 0.0, 1.0]);
        let g = program.constraint_bindings()[0].evaluate(&x).unwrap();
        assert_eq!(g[0], 5.0);
        // equality at zero, so the violation is the squared residual
        assert!((program.constraint_violation(&x).unwrap() - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_equality_and_cost() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(2, "a").unwrap();
        program.add_linear_equality_constraint(vec![(a.index(0), 1.0), (a.index(1), -1.0)], 0.0);
        program.add_cost(Box::new(SumCost), a.indices()).unwrap();

        let x_feasible = DVector::from_vec(vec![0.7, 0.7]);
        let x_infeasible = DVector::from_vec(vec![1.0, 0.0]);
        assert_eq!(program.constraint_violation(&x_feasible).unwrap(), 0.0);
        assert_eq!(program.constraint_violation(&x_infeasible).unwrap(), 1.0);
        assert!((program.total_cost(&x_feasible).unwrap() - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_initial_guess_round_trip() {
        let mut program = MathProgram::new_empty();
        let a = program.new_variables(3, "a").unwrap();
        assert_eq!(program.initial_guess_segment(a), DVector::zeros(3));
        program.set_initial_guess(a, &DVector::from_vec(vec![1.0, 2.0, 3.0]));
        assert_eq!(program.initial_guess_segment(a.segment(1, 2)), DVector::from_vec(vec![2.0, 3.0]));
    }
}
