use crate::error::InferenceError;

/// An opaque, already-trained regression model.
///
/// Implementations must be callable from several threads at once; runtimes
/// that need exclusive access per call are expected to pool or lock
/// internally.
pub trait ModelArtifact: Send + Sync {
    fn input_width(&self) -> usize;

    fn output_width(&self) -> usize;

    /// Evaluation-mode forward pass over a single dense row.
    fn forward(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError>;

    /// Short runtime label reported by `/info`.
    fn backend(&self) -> &'static str;
}

/// Reject rows whose width differs from what the model was built for.
pub fn check_input(expected: usize, features: &[f32]) -> Result<(), InferenceError> {
    if features.len() != expected {
        return Err(InferenceError::InputWidth {
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_width_must_match_exactly() {
        assert!(check_input(3, &[0.0, 1.0, 2.0]).is_ok());
        assert_eq!(
            check_input(3, &[0.0; 4]),
            Err(InferenceError::InputWidth {
                expected: 3,
                actual: 4
            })
        );
    }
}
