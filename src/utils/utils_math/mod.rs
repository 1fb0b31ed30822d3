use nalgebra::DVector;

pub struct FiniteDifferenceUtils;
impl FiniteDifferenceUtils {
    /// Central-difference gradient of a scalar-valued function.
    pub fn gradient<F: FnMut(&[f64]) -> f64>(mut f: F, x: &[f64], perturbation: f64) -> Vec<f64> {
        assert!(perturbation > 0.0);

        let mut out_vec = vec![0.0; x.len()];
        let mut x_perturbed = x.to_vec();
        for i in 0..x.len() {
            x_perturbed[i] = x[i] + perturbation;
            let f_plus = f(&x_perturbed);
            x_perturbed[i] = x[i] - perturbation;
            let f_minus = f(&x_perturbed);
            x_perturbed[i] = x[i];
            out_vec[i] = (f_plus - f_minus) / (2.0 * perturbation);
        }

        out_vec
    }

    /// Central-difference jacobian of a vector-valued function, returned in rows.
    pub fn jacobian<F: FnMut(&[f64]) -> DVector<f64>>(mut f: F, x: &[f64], perturbation: f64) -> Vec<DVector<f64>> {
        assert!(perturbation > 0.0);

        let mut columns = vec![];
        let mut x_perturbed = x.to_vec();
        for i in 0..x.len() {
            x_perturbed[i] = x[i] + perturbation;
            let f_plus = f(&x_perturbed);
            x_perturbed[i] = x[i] - perturbation;
            let f_minus = f(&x_perturbed);
            x_perturbed[i] = x[i];
            columns.push((f_plus - f_minus) / (2.0 * perturbation));
        }

        if columns.is_empty() { return vec![]; }

        let num_rows = columns[0].len();
        let mut out_vec = vec![];
        for r in 0..num_rows {
            let mut row = DVector::from_vec(vec![0.0; x.len()]);
            for (c, column) in columns.iter().enumerate() { row[c] = column[r]; }
            out_vec.push(row);
        }

        out_vec
    }
}
