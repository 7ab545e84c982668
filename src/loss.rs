//! Loss function(s)

use crate::nn::NNError;

/// Negative log likelihood of the target class, expects log-probabilities
/// such as the output of [`crate::nn::LogSoftmax`]
pub struct NLLLoss;

impl NLLLoss {
    pub fn call(log_probs: &[f32], target: usize) -> Result<f32, NNError> {
        log_probs
            .get(target)
            .map(|lp| -lp)
            .ok_or(NNError::TargetOutOfRange {
                target,
                n_classes: log_probs.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;

    use super::*;

    #[test]
    fn test_nll_loss() {
        let log_probs = [0.25f32.ln(), 0.75f32.ln()];
        assert_eq_float!(NLLLoss::call(&log_probs, 0).unwrap(), -(0.25f32.ln()));
        assert_eq_float!(NLLLoss::call(&log_probs, 1).unwrap(), -(0.75f32.ln()));
    }

    #[test]
    fn test_nll_loss_target_out_of_range() {
        let err = NLLLoss::call(&[0.0, 0.0], 2).unwrap_err();
        assert!(matches!(
            err,
            NNError::TargetOutOfRange {
                target: 2,
                n_classes: 2
            }
        ));
    }
}
