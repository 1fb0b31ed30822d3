/// A common error type returned by functions throughout the crate.
#[derive(Clone, Debug)]
pub enum DirconError {
    GenericError(String),
    ConfigurationError(String),
    IdxOutOfBoundError(String)
}
impl DirconError {
    pub fn new_generic_error_str(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: {} -- File: {}, Line: {}", s, file, line);
        return Self::GenericError(s);
    }
    /// Construction-time contract violations (mismatched per-mode array lengths,
    /// inconsistent constraint dimensions, duplicate variable group names).
    pub fn new_configuration_error(s: &str, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Invalid configuration.  {} -- File: {}, Line: {}", s, file, line);
        return Self::ConfigurationError(s);
    }
    pub fn new_idx_out_of_bound_error(given_idx: usize, length_of_array: usize, file: &str, line: u32) -> Self {
        let s = format!("ERROR: Index {:?} is too large for the array of length {:?} -- File: {}, Line: {}", given_idx, length_of_array, file, line);
        return Self::IdxOutOfBoundError(s)
    }
}
