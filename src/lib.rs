//! A minimal library for training fully connected classifiers and saving them
//! as self-describing checkpoints, using a PyTorch-like API.

pub mod backprop_fns;
pub mod checkpoint;
pub mod dataloader;
pub mod datasets;
pub mod loss;
pub mod mnist;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod train;

#[cfg(test)]
#[macro_export]
macro_rules! assert_eq_float {
    ($a:expr, $b:expr) => {
        assert!((($a) - ($b)).abs() < 1e-6);
    };
}
