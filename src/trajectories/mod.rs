use itertools::Itertools;
use nalgebra::DVector;
use crate::utils::utils_errors::DirconError;

/// A vector-valued piecewise polynomial curve over explicit time breaks.
/// Segment `i` covers `[breaks[i], breaks[i+1]]` and is evaluated in local
/// time `s = t - breaks[i]` as `sum_j a_j * s^j`.
#[derive(Clone, Debug)]
pub struct PiecewiseTrajectory {
    breaks: Vec<f64>,
    segment_coefficients: Vec<Vec<DVector<f64>>>
}
impl PiecewiseTrajectory {
    /// Piecewise-linear curve through the given samples (first-order hold).
    pub fn first_order_hold(times: &[f64], samples: &[DVector<f64>]) -> Result<Self, DirconError> {
        Self::check_samples(times, samples)?;

        let mut segment_coefficients = vec![];
        for ((t0, x0), (t1, x1)) in times.iter().zip(samples.iter()).tuple_windows() {
            let h = t1 - t0;
            let a0 = x0.clone();
            let a1 = (x1 - x0) / h;
            segment_coefficients.push(vec![a0, a1]);
        }

        Ok(Self { breaks: times.to_vec(), segment_coefficients })
    }

    /// Cubic Hermite interpolant through the given samples with the given
    /// time derivatives at each sample.
    pub fn cubic_hermite(times: &[f64], samples: &[DVector<f64>], derivatives: &[DVector<f64>]) -> Result<Self, DirconError> {
        Self::check_samples(times, samples)?;
        if derivatives.len() != samples.len() {
            return Err(DirconError::new_configuration_error(&format!("cubic hermite got {} derivatives for {} samples.", derivatives.len(), samples.len()), file!(), line!()));
        }

        let mut segment_coefficients = vec![];
        for i in 0..times.len() - 1 {
            let h = times[i + 1] - times[i];
            let x0 = &samples[i];
            let x1 = &samples[i + 1];
            let xd0 = &derivatives[i];
            let xd1 = &derivatives[i + 1];

            let a0 = x0.clone();
            let a1 = xd0.clone();
            let a2 = (3.0 * (x1 - x0) - h * (2.0 * xd0 + xd1)) / (h * h);
            let a3 = (2.0 * (x0 - x1) + h * (xd0 + xd1)) / (h * h * h);
            segment_coefficients.push(vec![a0, a1, a2, a3]);
        }

        Ok(Self { breaks: times.to_vec(), segment_coefficients })
    }

    fn check_samples(times: &[f64], samples: &[DVector<f64>]) -> Result<(), DirconError> {
        if times.len() < 2 {
            return Err(DirconError::new_configuration_error("a piecewise trajectory needs at least two samples.", file!(), line!()));
        }
        if times.len() != samples.len() {
            return Err(DirconError::new_configuration_error(&format!("got {} sample times but {} samples.", times.len(), samples.len()), file!(), line!()));
        }
        for (t0, t1) in times.iter().tuple_windows() {
            if !(t1 > t0) {
                return Err(DirconError::new_configuration_error(&format!("sample times must be strictly increasing ({} then {}).", t0, t1), file!(), line!()));
            }
        }
        let dim = samples[0].len();
        if samples.iter().any(|s| s.len() != dim) {
            return Err(DirconError::new_configuration_error("all samples must share one dimension.", file!(), line!()));
        }
        Ok(())
    }

    /// Evaluates the curve at time `t`, clamped to `[start_time, end_time]`.
    pub fn value(&self, t: f64) -> DVector<f64> {
        let t = t.clamp(self.start_time(), self.end_time());
        let segment_idx = self.segment_index(t);

        let s = t - self.breaks[segment_idx];
        let coefficients = &self.segment_coefficients[segment_idx];
        let mut out = DVector::zeros(coefficients[0].len());
        for (j, a) in coefficients.iter().enumerate() {
            out += a * s.powi(j as i32);
        }
        out
    }

    fn segment_index(&self, t: f64) -> usize {
        let binary_search_res = self.breaks.binary_search_by(|b| b.partial_cmp(&t).unwrap());
        return match binary_search_res {
            Ok(idx) => { usize::min(idx, self.num_segments() - 1) }
            Err(idx) => { idx - 1 }
        }
    }

    pub fn start_time(&self) -> f64 {
        self.breaks[0]
    }
    pub fn end_time(&self) -> f64 {
        *self.breaks.last().unwrap()
    }
    pub fn breaks(&self) -> &Vec<f64> {
        &self.breaks
    }
    pub fn num_segments(&self) -> usize {
        self.segment_coefficients.len()
    }
    pub fn dimension(&self) -> usize {
        self.segment_coefficients[0][0].len()
    }
}
