//! Components to build a fully connected classifier

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::atomic::{self, AtomicUsize},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backprop_fns,
    tensor::{Tensor, TensorError},
};

/// Dropout probability used when a network is rebuilt without one being given
pub const DEFAULT_DROP_P: f32 = 0.5;

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("Invalid architecture: {0}")]
    InvalidArchitecture(String),
    #[error("Dropout probability must be in [0, 1), got {0}")]
    InvalidDropout(f32),
    #[error("Target class {target} is out of range for {n_classes} classes")]
    TargetOutOfRange { target: usize, n_classes: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Architecture of a [`Network`], enough to rebuild it before any weights are
/// loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub input_size: usize,
    pub output_size: usize,
    /// Hidden layer widths in forward order
    pub hidden_layer_sizes: Vec<usize>,
}

impl ModelDescriptor {
    pub fn new(
        input_size: usize,
        output_size: usize,
        hidden_layer_sizes: Vec<usize>,
    ) -> Result<Self, NNError> {
        let descriptor = Self {
            input_size,
            output_size,
            hidden_layer_sizes,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), NNError> {
        if self.input_size == 0 {
            return Err(NNError::InvalidArchitecture(
                "input_size must be positive".to_string(),
            ));
        }
        if self.output_size == 0 {
            return Err(NNError::InvalidArchitecture(
                "output_size must be positive".to_string(),
            ));
        }
        if let Some(idx) = self.hidden_layer_sizes.iter().position(|&s| s == 0) {
            return Err(NNError::InvalidArchitecture(format!(
                "hidden layer {idx} has size 0"
            )));
        }
        if self.n_parameters().is_none() {
            return Err(NNError::InvalidArchitecture(format!(
                "parameter count of {self:?} overflows usize"
            )));
        }
        Ok(())
    }

    /// Total number of weights and biases, `None` if it overflows
    pub fn n_parameters(&self) -> Option<usize> {
        self.layer_dims()
            .into_iter()
            .try_fold(0usize, |total, (n_in, n_out)| {
                let layer = n_in.checked_mul(n_out)?.checked_add(n_out)?;
                total.checked_add(layer)
            })
    }

    /// Names and shapes of the parameters a network built from this
    /// descriptor has, in forward order. Nothing is allocated per element.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let dims = self.layer_dims();
        let n_hidden = dims.len() - 1;
        let mut shapes = Vec::with_capacity(2 * dims.len());
        for (i, (n_in, n_out)) in dims.into_iter().enumerate() {
            let prefix = if i < n_hidden {
                format!("hidden_layers.{i}")
            } else {
                "output".to_string()
            };
            shapes.push((format!("{prefix}.weight"), vec![n_out, n_in]));
            shapes.push((format!("{prefix}.bias"), vec![n_out]));
        }
        shapes
    }

    /// `(n_inputs, n_outputs)` of every linear layer, the output layer last
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut fan_in = self.input_size;
        let mut dims = Vec::with_capacity(self.hidden_layer_sizes.len() + 1);
        for &size in &self.hidden_layer_sizes {
            dims.push((fan_in, size));
            fan_in = size;
        }
        dims.push((fan_in, self.output_size));
        dims
    }
}

/// Named parameter tensors of a model, ordered by name
///
/// Analogous to a torch `state_dict`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, Tensor>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.0.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    /// Evaluation mode forward pass for a single sample
    fn forward(&self, inputs: &[f32]) -> Result<Vec<f32>, NNError>;

    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Copies every parameter into a [`ParameterSet`]
    fn state_dict(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for (name, tensor) in self.named_parameters() {
            params.insert(name, tensor.clone());
        }
        params
    }

    fn n_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }
}

/// A fully connected layer computing `weight @ x + bias`
///
/// `weight` has shape `[n_outputs, n_inputs]`, `bias` has shape `[n_outputs]`
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Linear {
    /// Creates a new layer with the given number of inputs and outputs
    pub fn new<R: Rng + ?Sized>(
        n_inputs: usize,
        n_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing gradients
        let std = (2.0 / n_inputs as f32).sqrt();
        Ok(Self {
            weight: Tensor::randn(vec![n_outputs, n_inputs], std, rng)?,
            bias: Tensor::randn(vec![n_outputs], std, rng)?,
        })
    }

    pub fn zeros(n_inputs: usize, n_outputs: usize) -> Result<Self, NNError> {
        Ok(Self {
            weight: Tensor::zeros(vec![n_outputs, n_inputs])?,
            bias: Tensor::zeros(vec![n_outputs])?,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn n_outputs(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &[f32]) -> Result<Vec<f32>, NNError> {
        if inputs.len() != self.n_inputs() {
            return Err(NNError::InputSizeMismatch {
                expected: self.n_inputs(),
                got: inputs.len(),
            });
        }
        let mut out = self.weight.matvec(inputs);
        for (o, b) in out.iter_mut().zip(self.bias.data()) {
            *o += b;
        }
        Ok(out)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }
}

/// Applies ReLU to a set of values, works for arbitrary number of inputs
#[derive(Debug, Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_neurons: AtomicUsize::new(0),
        }
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &[f32]) -> Vec<f32> {
        let n_dead_neurons = inputs.iter().filter(|v| **v <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        inputs.iter().map(|v| v.max(0.0)).collect()
    }

    /// Returns the number of dead neurons in the last forward pass (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

/// Inverted dropout: zeroes each value with probability `p` and scales the
/// survivors by `1 / (1 - p)`, so evaluation needs no rescaling
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Result<Self, NNError> {
        if !(0.0..1.0).contains(&p) {
            return Err(NNError::InvalidDropout(p));
        }
        Ok(Self { p })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    /// Samples a mask of `n` multipliers, each either `0` or `1 / (1 - p)`
    pub fn sample_mask<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<f32> {
        if self.p == 0.0 {
            return vec![1.0; n];
        }
        let scale = 1.0 / (1.0 - self.p);
        (0..n)
            .map(|_| {
                if rng.random::<f32>() < self.p {
                    0.0
                } else {
                    scale
                }
            })
            .collect()
    }
}

/// Applies log(softmax) to a set of values
#[derive(Debug, Default)]
pub struct LogSoftmax {}

impl LogSoftmax {
    pub fn new() -> Self {
        Self {}
    }

    pub fn forward(&self, inputs: &[f32]) -> Vec<f32> {
        // shifting by the max keeps exp() from overflowing on large logits
        let max = inputs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum_exp = inputs.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
        inputs.iter().map(|v| v - log_sum_exp).collect()
    }
}

/// Gradients of a single [`Linear`] layer
#[derive(Debug, Clone)]
pub struct LinearGrad {
    pub weight: Tensor,
    pub bias: Tensor,
}

/// Accumulated gradients for every layer of a [`Network`], output layer last
#[derive(Debug, Clone)]
pub struct Gradients {
    layers: Vec<LinearGrad>,
}

impl Gradients {
    pub fn layer(&self, idx: usize) -> &LinearGrad {
        &self.layers[idx]
    }

    pub fn scale(&mut self, factor: f32) {
        for g in self.layers.iter_mut() {
            g.weight.scale(factor);
            g.bias.scale(factor);
        }
    }

    /// Gradient tensors in the same order as [`Network::parameters_mut`]
    pub fn tensors(&self) -> Vec<&Tensor> {
        self.layers
            .iter()
            .flat_map(|g| [&g.weight, &g.bias])
            .collect()
    }
}

/// Intermediate values of a training mode forward pass, needed for backprop
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    /// Input of every linear layer, the output layer last
    layer_inputs: Vec<Vec<f32>>,
    /// Hidden layer outputs before ReLU
    pre_activations: Vec<Vec<f32>>,
    /// Scaled dropout masks applied after each hidden ReLU
    masks: Vec<Vec<f32>>,
    pub log_probs: Vec<f32>,
}

/// A fully connected classifier:
/// `(linear -> relu -> dropout)* -> linear -> log_softmax`
///
/// The architecture is fixed by the [`ModelDescriptor`] it was built from and
/// is carried along so that it can be saved next to the weights.
#[derive(Debug)]
pub struct Network {
    descriptor: ModelDescriptor,
    hidden_layers: Vec<Linear>,
    hidden_relus: Vec<ReLU>,
    output: Linear,
    dropout: Dropout,
    log_softmax: LogSoftmax,
}

impl Network {
    /// Builds a network with randomly initialized parameters
    pub fn new<R: Rng + ?Sized>(
        descriptor: ModelDescriptor,
        drop_p: f32,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        descriptor.validate()?;
        let mut layers = descriptor
            .layer_dims()
            .into_iter()
            .map(|(n_in, n_out)| Linear::new(n_in, n_out, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(output) = layers.pop() else {
            return Err(NNError::InvalidArchitecture("no output layer".to_string()));
        };
        Self::from_layers(descriptor, layers, output, drop_p)
    }

    /// Builds a network whose parameters are all zero, to be filled by
    /// `load_state_dict`
    pub fn zeroed(descriptor: ModelDescriptor) -> Result<Self, NNError> {
        descriptor.validate()?;
        let mut layers = descriptor
            .layer_dims()
            .into_iter()
            .map(|(n_in, n_out)| Linear::zeros(n_in, n_out))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(output) = layers.pop() else {
            return Err(NNError::InvalidArchitecture("no output layer".to_string()));
        };
        Self::from_layers(descriptor, layers, output, DEFAULT_DROP_P)
    }

    fn from_layers(
        descriptor: ModelDescriptor,
        hidden_layers: Vec<Linear>,
        output: Linear,
        drop_p: f32,
    ) -> Result<Self, NNError> {
        let hidden_relus = hidden_layers.iter().map(|_| ReLU::new()).collect();
        Ok(Self {
            descriptor,
            hidden_layers,
            hidden_relus,
            output,
            dropout: Dropout::new(drop_p)?,
            log_softmax: LogSoftmax::new(),
        })
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn drop_p(&self) -> f32 {
        self.dropout.p()
    }

    pub fn set_drop_p(&mut self, p: f32) -> Result<(), NNError> {
        self.dropout = Dropout::new(p)?;
        Ok(())
    }

    pub fn hidden_layers(&self) -> &[Linear] {
        &self.hidden_layers
    }

    pub fn output(&self) -> &Linear {
        &self.output
    }

    /// Parameters with their qualified names, in forward order
    pub(crate) fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = Vec::with_capacity(2 * (self.hidden_layers.len() + 1));
        for (i, layer) in self.hidden_layers.iter_mut().enumerate() {
            params.push((format!("hidden_layers.{i}.weight"), &mut layer.weight));
            params.push((format!("hidden_layers.{i}.bias"), &mut layer.bias));
        }
        params.push(("output.weight".to_string(), &mut self.output.weight));
        params.push(("output.bias".to_string(), &mut self.output.bias));
        params
    }

    /// Parameters in the same order as [`Gradients::tensors`]
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.named_parameters_mut()
            .into_iter()
            .map(|(_, t)| t)
            .collect()
    }

    /// Zeroed gradients shaped like this network's parameters
    pub fn zero_grads(&self) -> Gradients {
        let layers = self
            .hidden_layers
            .iter()
            .chain(std::iter::once(&self.output))
            .map(|l| LinearGrad {
                weight: Tensor::zeros_like(&l.weight),
                bias: Tensor::zeros_like(&l.bias),
            })
            .collect();
        Gradients { layers }
    }

    /// Training mode forward pass, applies dropout after each hidden layer
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        inputs: &[f32],
        rng: &mut R,
    ) -> Result<ForwardTrace, NNError> {
        let n_hidden = self.hidden_layers.len();
        let mut layer_inputs = Vec::with_capacity(n_hidden + 1);
        let mut pre_activations = Vec::with_capacity(n_hidden);
        let mut masks = Vec::with_capacity(n_hidden);

        let mut x = inputs.to_vec();
        for (layer, relu) in self.hidden_layers.iter().zip(&self.hidden_relus) {
            let z = layer.forward(&x)?;
            let a = relu.forward(&z);
            let mask = self.dropout.sample_mask(a.len(), rng);
            let dropped = a.iter().zip(&mask).map(|(a, m)| a * m).collect();
            layer_inputs.push(std::mem::replace(&mut x, dropped));
            pre_activations.push(z);
            masks.push(mask);
        }
        let logits = self.output.forward(&x)?;
        layer_inputs.push(x);

        Ok(ForwardTrace {
            layer_inputs,
            pre_activations,
            masks,
            log_probs: self.log_softmax.forward(&logits),
        })
    }

    /// Accumulates parameter gradients into `grads` given the gradient of the
    /// loss with respect to the output logits
    ///
    /// `trace` must come from [`Network::forward_train`] and `grads` from
    /// [`Network::zero_grads`] on this same network.
    pub fn backward(&self, trace: &ForwardTrace, grad_logits: &[f32], grads: &mut Gradients) {
        let n_hidden = self.hidden_layers.len();
        debug_assert_eq!(grads.layers.len(), n_hidden + 1, "gradients of another network");
        debug_assert_eq!(trace.masks.len(), n_hidden, "trace of another network");
        let g = &mut grads.layers[n_hidden];
        let mut grad = backprop_fns::linear(
            &self.output.weight,
            &trace.layer_inputs[n_hidden],
            grad_logits,
            &mut g.weight,
            &mut g.bias,
        );
        for i in (0..n_hidden).rev() {
            grad = backprop_fns::dropout(&trace.masks[i], &grad);
            grad = backprop_fns::relu(&trace.pre_activations[i], &grad);
            let g = &mut grads.layers[i];
            grad = backprop_fns::linear(
                &self.hidden_layers[i].weight,
                &trace.layer_inputs[i],
                &grad,
                &mut g.weight,
                &mut g.bias,
            );
        }
    }

    /// Index of the most likely class
    pub fn predict(&self, inputs: &[f32]) -> Result<usize, NNError> {
        let log_probs = self.forward(inputs)?;
        Ok(argmax(&log_probs))
    }

    /// Dead ReLUs across all hidden layers in the last forward pass
    pub fn n_dead_neurons(&self) -> usize {
        self.hidden_relus.iter().map(|r| r.n_dead_neurons()).sum()
    }
}

impl Module for Network {
    fn forward(&self, inputs: &[f32]) -> Result<Vec<f32>, NNError> {
        if inputs.len() != self.descriptor.input_size {
            return Err(NNError::InputSizeMismatch {
                expected: self.descriptor.input_size,
                got: inputs.len(),
            });
        }
        let mut x = inputs.to_vec();
        for (layer, relu) in self.hidden_layers.iter().zip(&self.hidden_relus) {
            x = relu.forward(&layer.forward(&x)?);
        }
        let logits = self.output.forward(&x)?;
        Ok(self.log_softmax.forward(&logits))
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = Vec::with_capacity(2 * (self.hidden_layers.len() + 1));
        for (i, layer) in self.hidden_layers.iter().enumerate() {
            for (name, tensor) in layer.named_parameters() {
                params.push((format!("hidden_layers.{i}.{name}"), tensor));
            }
        }
        for (name, tensor) in self.output.named_parameters() {
            params.push((format!("output.{name}"), tensor));
        }
        params
    }
}

/// Returns the index of the maximum value
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use crate::assert_eq_float;

    use super::*;

    fn rng() -> Pcg64Mcg {
        Pcg64Mcg::seed_from_u64(42)
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(ModelDescriptor::new(784, 10, vec![512, 256, 128]).is_ok());
        assert!(ModelDescriptor::new(4, 2, vec![]).is_ok());
        assert!(matches!(
            ModelDescriptor::new(0, 10, vec![]),
            Err(NNError::InvalidArchitecture(_))
        ));
        assert!(matches!(
            ModelDescriptor::new(4, 0, vec![]),
            Err(NNError::InvalidArchitecture(_))
        ));
        assert!(matches!(
            ModelDescriptor::new(4, 2, vec![3, 0]),
            Err(NNError::InvalidArchitecture(_))
        ));
    }

    #[test]
    fn test_layer_dims() {
        let d = ModelDescriptor::new(784, 10, vec![512, 256, 128]).unwrap();
        assert_eq!(
            d.layer_dims(),
            vec![(784, 512), (512, 256), (256, 128), (128, 10)]
        );
        let d = ModelDescriptor::new(3, 2, vec![]).unwrap();
        assert_eq!(d.layer_dims(), vec![(3, 2)]);
    }

    #[test]
    fn test_network_parameter_shapes() {
        let d = ModelDescriptor::new(784, 10, vec![512, 256, 128]).unwrap();
        let net = Network::new(d, 0.5, &mut rng()).unwrap();
        let params = net.state_dict();
        let names = params.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "hidden_layers.0.bias",
                "hidden_layers.0.weight",
                "hidden_layers.1.bias",
                "hidden_layers.1.weight",
                "hidden_layers.2.bias",
                "hidden_layers.2.weight",
                "output.bias",
                "output.weight",
            ]
        );
        assert_eq!(params.get("hidden_layers.0.weight").unwrap().shape(), &[512, 784]);
        assert_eq!(params.get("hidden_layers.2.bias").unwrap().shape(), &[128]);
        assert_eq!(params.get("output.weight").unwrap().shape(), &[10, 128]);
        assert_eq!(
            net.n_parameters(),
            784 * 512 + 512 + 512 * 256 + 256 + 256 * 128 + 128 + 128 * 10 + 10
        );
    }

    #[test]
    fn test_descriptor_parameter_count_overflow() {
        // a weight matrix of 2^BITS elements
        let huge = 1usize << (usize::BITS / 2);
        let d = ModelDescriptor {
            input_size: huge,
            output_size: huge,
            hidden_layer_sizes: vec![],
        };
        assert_eq!(d.n_parameters(), None);
        assert!(matches!(d.validate(), Err(NNError::InvalidArchitecture(_))));
        assert!(Network::zeroed(d).is_err());
        assert!(matches!(
            ModelDescriptor::new(usize::MAX, 2, vec![]),
            Err(NNError::InvalidArchitecture(_))
        ));
    }

    #[test]
    fn test_descriptor_shapes_match_network() {
        let d = ModelDescriptor::new(6, 3, vec![5, 4]).unwrap();
        let net = Network::new(d.clone(), 0.5, &mut rng()).unwrap();
        let built = net
            .named_parameters()
            .into_iter()
            .map(|(name, t)| (name, t.shape().to_vec()))
            .collect::<Vec<_>>();
        assert_eq!(d.parameter_shapes(), built);
        assert_eq!(d.n_parameters(), Some(net.n_parameters()));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "gradients of another network")]
    fn test_backward_with_foreign_gradients() {
        let shallow = Network::zeroed(ModelDescriptor::new(2, 2, vec![]).unwrap()).unwrap();
        let deep = Network::zeroed(ModelDescriptor::new(2, 2, vec![3, 3]).unwrap()).unwrap();
        let trace = deep.forward_train(&[1.0, 1.0], &mut rng()).unwrap();
        let mut grads = shallow.zero_grads();
        deep.backward(&trace, &[0.5, -0.5], &mut grads);
    }

    #[test]
    fn test_forward_log_probs() {
        let d = ModelDescriptor::new(4, 3, vec![8]).unwrap();
        let net = Network::new(d, 0.5, &mut rng()).unwrap();
        let log_probs = net.forward(&[0.1, -0.2, 0.3, 0.4]).unwrap();
        assert_eq!(log_probs.len(), 3);
        assert!(log_probs.iter().all(|lp| *lp <= 0.0));
        assert_eq_float!(log_probs.iter().map(|lp| lp.exp()).sum::<f32>(), 1.0);
    }

    #[test]
    fn test_input_size_mismatch() {
        let d = ModelDescriptor::new(4, 3, vec![8]).unwrap();
        let net = Network::new(d, 0.0, &mut rng()).unwrap();
        let err = net.forward(&[1.0]).unwrap_err();
        assert!(matches!(
            err,
            NNError::InputSizeMismatch {
                expected: 4,
                got: 1
            }
        ));
        assert!(net.forward_train(&[1.0], &mut rng()).is_err());
    }

    #[test]
    fn test_dropout_only_in_training() {
        let d = ModelDescriptor::new(4, 3, vec![16, 16]).unwrap();
        let mut net = Network::new(d, 0.5, &mut rng()).unwrap();
        let x = [0.5, -0.5, 1.0, 0.25];
        // evaluation is deterministic
        assert_eq!(net.forward(&x).unwrap(), net.forward(&x).unwrap());

        net.set_drop_p(0.0).unwrap();
        let trace = net.forward_train(&x, &mut rng()).unwrap();
        assert_eq!(trace.log_probs, net.forward(&x).unwrap());
    }

    #[test]
    fn test_dropout_mask() {
        let dropout = Dropout::new(0.5).unwrap();
        let mask = dropout.sample_mask(1000, &mut rng());
        assert!(mask.iter().all(|m| *m == 0.0 || *m == 2.0));
        let n_dropped = mask.iter().filter(|m| **m == 0.0).count();
        assert!((350..650).contains(&n_dropped));

        assert!(matches!(Dropout::new(1.0), Err(NNError::InvalidDropout(_))));
        assert!(matches!(Dropout::new(-0.1), Err(NNError::InvalidDropout(_))));
    }

    #[test]
    fn test_log_softmax_large_logits() {
        let out = LogSoftmax::new().forward(&[1000.0, 1000.0]);
        assert_eq_float!(out[0], -(2.0f32.ln()));
        assert_eq_float!(out[1], -(2.0f32.ln()));
    }

    #[test]
    fn test_relu_dead_neurons() {
        let relu = ReLU::new();
        assert_eq!(relu.forward(&[-1.0, 0.0, 2.0]), vec![0.0, 0.0, 2.0]);
        assert_eq!(relu.n_dead_neurons(), 2);
    }

    #[test]
    fn test_predict() {
        let d = ModelDescriptor::new(2, 2, vec![]).unwrap();
        let mut net = Network::zeroed(d).unwrap();
        // output = [x0, x1]
        net.output.weight = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]).unwrap();
        assert_eq!(net.predict(&[3.0, 1.0]).unwrap(), 0);
        assert_eq!(net.predict(&[1.0, 3.0]).unwrap(), 1);
    }

    fn nudge(net: &mut Network, param: usize, idx: usize, delta: f32) {
        let mut params = net.parameters_mut();
        params[param].data_mut()[idx] += delta;
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let d = ModelDescriptor::new(2, 2, vec![3]).unwrap();
        let mut net = Network::zeroed(d).unwrap();
        net.set_drop_p(0.0).unwrap();
        // chosen so every hidden pre-activation stays well away from the ReLU kink
        net.hidden_layers[0].weight =
            Tensor::new(vec![1.0, 0.0, 0.0, -1.0, 1.0, 1.0], vec![3, 2]).unwrap();
        net.hidden_layers[0].bias = Tensor::new(vec![0.2, 0.3, -0.1], vec![3]).unwrap();
        net.output.weight =
            Tensor::new(vec![0.5, -0.2, 0.3, 0.1, 0.4, -0.6], vec![2, 3]).unwrap();
        net.output.bias = Tensor::new(vec![0.0, 0.1], vec![2]).unwrap();

        let x = [0.5, -1.0];
        let target = 1;
        let loss = |net: &Network| -net.forward(&x).unwrap()[target];

        let mut grads = net.zero_grads();
        let trace = net.forward_train(&x, &mut rng()).unwrap();
        let grad_logits = backprop_fns::log_softmax_nll(&trace.log_probs, target);
        net.backward(&trace, &grad_logits, &mut grads);
        let analytic = grads
            .tensors()
            .iter()
            .map(|t| t.data().to_vec())
            .collect::<Vec<_>>();

        let eps = 1e-2;
        for (p, analytic_p) in analytic.iter().enumerate() {
            for (i, a) in analytic_p.iter().enumerate() {
                nudge(&mut net, p, i, eps);
                let up = loss(&net);
                nudge(&mut net, p, i, -2.0 * eps);
                let down = loss(&net);
                nudge(&mut net, p, i, eps);
                let numeric = (up - down) / (2.0 * eps);
                assert!(
                    (numeric - a).abs() < 1e-3,
                    "param {p}[{i}]: analytic {a}, numeric {numeric}"
                );
            }
        }
    }
}
