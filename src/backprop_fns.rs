//! Hand-derived gradient functions for backprop
//!
//! One function per layer kind the network is built from. Each takes the
//! gradient of the loss with respect to the layer output and returns the
//! gradient with respect to the layer input, accumulating parameter gradients
//! along the way.

use crate::tensor::Tensor;

/// Represents backprop for `out = weight @ input + bias`
///
/// Accumulates `grad_weight += grad_out ⊗ input` and `grad_bias += grad_out`,
/// returns `weight^T @ grad_out`
pub fn linear(
    weight: &Tensor,
    input: &[f32],
    grad_out: &[f32],
    grad_weight: &mut Tensor,
    grad_bias: &mut Tensor,
) -> Vec<f32> {
    grad_weight.add_outer(grad_out, input);
    grad_bias.add_assign(grad_out);
    weight.matvec_transposed(grad_out)
}

/// Represents backprop for `out = relu(pre_activation)`
pub fn relu(pre_activation: &[f32], grad_out: &[f32]) -> Vec<f32> {
    pre_activation
        .iter()
        .zip(grad_out)
        .map(|(z, g)| if *z > 0.0 { *g } else { 0.0 })
        .collect()
}

/// Represents backprop for `out = input * mask`, where the mask already holds
/// the inverted dropout scale
pub fn dropout(mask: &[f32], grad_out: &[f32]) -> Vec<f32> {
    mask.iter().zip(grad_out).map(|(m, g)| m * g).collect()
}

/// Represents backprop for `loss = -log_softmax(logits)[target]`, taken with
/// respect to the logits: `softmax(logits) - one_hot(target)`
pub fn log_softmax_nll(log_probs: &[f32], target: usize) -> Vec<f32> {
    log_probs
        .iter()
        .enumerate()
        .map(|(i, lp)| {
            let p = lp.exp();
            if i == target { p - 1.0 } else { p }
        })
        .collect()
}
