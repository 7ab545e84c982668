//! Optimizer(s)

use crate::tensor::Tensor;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients.
    /// `params` and `grads` are matched by position.
    fn step(&mut self, params: Vec<&mut Tensor>, grads: &[&Tensor]);
}

/// SGD with momentum
pub struct SGD {
    // currently does not change the learning rate based on the iteration
    // ideally lr would decay over time
    lr: f32,
    momentum: f32,
    // velocity per parameter element, sized on the first step
    velocity: Vec<Vec<f32>>,
}

impl SGD {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocity: vec![],
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    #[cfg(test)]
    fn velocities(&self) -> &[Vec<f32>] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self, params: Vec<&mut Tensor>, grads: &[&Tensor]) {
        debug_assert_eq!(params.len(), grads.len());
        let shapes_changed = self.velocity.len() != params.len()
            || self
                .velocity
                .iter()
                .zip(params.iter())
                .any(|(v, p)| v.len() != p.numel());
        if shapes_changed {
            self.velocity = params.iter().map(|p| vec![0.0; p.numel()]).collect();
        }

        for ((param, grad), velocity) in params
            .into_iter()
            .zip(grads.iter())
            .zip(self.velocity.iter_mut())
        {
            for ((p, g), v) in param
                .data_mut()
                .iter_mut()
                .zip(grad.data())
                .zip(velocity.iter_mut())
            {
                // SGD with momentum
                *v = self.momentum * *v - self.lr * g;
                *p += *v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Tensor, Tensor) {
        let params = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]).unwrap();
        let grads = Tensor::new(vec![1.0, 1.0, 1.0], vec![3]).unwrap();
        (params, grads)
    }

    #[test]
    fn test_sgd_no_momentum() {
        let (mut params, grads) = setup();
        let mut optim = SGD::new(0.1, 0.0);
        optim.step(vec![&mut params], &[&grads]);
        assert_eq!(params.data(), &[0.9, 1.9, 2.9]);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let (mut params, grads) = setup();
        let mut optim = SGD::new(0.1, 0.9);
        optim.step(vec![&mut params], &[&grads]);
        assert_eq!(params.data(), &[0.9, 1.9, 2.9]);
        assert_eq!(optim.velocities(), &[vec![-0.1, -0.1, -0.1]]);
        optim.step(vec![&mut params], &[&grads]);
        assert_eq!(params.data(), &[0.71, 1.71, 2.71]);
        assert_eq!(optim.velocities(), &[vec![-0.19, -0.19, -0.19]]);
    }

    #[test]
    fn test_sgd_multiple_params() {
        let (mut a, grads_a) = setup();
        let mut b = Tensor::new(vec![0.0, 0.0], vec![2]).unwrap();
        let grads_b = Tensor::new(vec![-1.0, 2.0], vec![2]).unwrap();
        let mut optim = SGD::new(0.5, 0.0);
        optim.step(vec![&mut a, &mut b], &[&grads_a, &grads_b]);
        assert_eq!(a.data(), &[0.5, 1.5, 2.5]);
        assert_eq!(b.data(), &[0.5, -1.0]);
    }
}
