//! Training loop and validation
//!
//! Everything random (initialization, shuffling, dropout) is drawn from an RNG
//! built from [`TrainConfig::seed`] and passed down explicitly.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::{
    backprop_fns,
    dataloader::DataLoader,
    loss::NLLLoss,
    nn::{Module, NNError, Network, argmax},
    optim::Optim,
};

/// Hyperparameters of a training run
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f32,
    pub momentum: f32,
    pub drop_p: f32,
    /// Evaluate and log every this many optimizer steps
    pub print_every: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 2,
            batch_size: 64,
            lr: 0.01,
            momentum: 0.9,
            drop_p: 0.5,
            print_every: 40,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn rng(&self) -> Pcg64Mcg {
        Pcg64Mcg::seed_from_u64(self.seed)
    }
}

/// Mean loss and accuracy over a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub loss: f32,
    pub accuracy: f32,
}

/// One entry per evaluation during training
#[derive(Debug, Clone, Default)]
pub struct TrainHistory {
    pub steps: Vec<usize>,
    pub train_losses: Vec<f32>,
    pub test_losses: Vec<f32>,
    pub test_accuracies: Vec<f32>,
}

/// Evaluates `model` in evaluation mode (no dropout) over every sample of `loader`
pub fn validation(model: &Network, loader: &DataLoader) -> Result<Metrics, NNError> {
    let mut total_loss = 0.0;
    let mut n_correct = 0;
    let mut n_samples = 0;
    // order does not matter here, the rng is only consulted when shuffling
    let mut rng = Pcg64Mcg::seed_from_u64(0);
    for (batch_data, batch_labels) in loader.iter(&mut rng) {
        for (input, &label) in batch_data.into_iter().zip(batch_labels.iter()) {
            let log_probs = model.forward(input)?;
            total_loss += NLLLoss::call(&log_probs, label)?;
            if argmax(&log_probs) == label {
                n_correct += 1;
            }
            n_samples += 1;
        }
    }
    if n_samples == 0 {
        return Ok(Metrics {
            loss: 0.0,
            accuracy: 0.0,
        });
    }
    Ok(Metrics {
        loss: total_loss / n_samples as f32,
        accuracy: n_correct as f32 / n_samples as f32,
    })
}

/// Trains `model` with mini-batch gradient descent on the mean NLL loss,
/// evaluating on `test_loader` every `config.print_every` steps
pub fn train<R: Rng + ?Sized>(
    model: &mut Network,
    train_loader: &DataLoader,
    test_loader: &DataLoader,
    optim: &mut dyn Optim,
    config: &TrainConfig,
    rng: &mut R,
) -> Result<TrainHistory, NNError> {
    let print_every = config.print_every.max(1);
    let mut history = TrainHistory::default();
    let mut steps = 0;
    let mut running_loss = 0.0;
    let mut running_samples = 0;

    log::info!(
        "Training {:?} ({} parameters) on {} samples for {} epochs",
        model.descriptor(),
        model.n_parameters(),
        train_loader.len(),
        config.epochs
    );

    for epoch in 0..config.epochs {
        let mut total_n_dead_neurons = 0;
        for (batch_data, batch_labels) in train_loader.iter(rng) {
            let batch_len = batch_data.len();
            let mut grads = model.zero_grads();
            for (input, &label) in batch_data.into_iter().zip(batch_labels.iter()) {
                let trace = model.forward_train(input, rng)?;
                running_loss += NLLLoss::call(&trace.log_probs, label)?;
                let grad_logits = backprop_fns::log_softmax_nll(&trace.log_probs, label);
                model.backward(&trace, &grad_logits, &mut grads);
                total_n_dead_neurons += model.n_dead_neurons();
            }
            running_samples += batch_len;

            // mean reduction over the batch
            grads.scale(1.0 / batch_len as f32);
            optim.step(model.parameters_mut(), &grads.tensors());
            steps += 1;

            if steps % print_every == 0 {
                let train_loss = running_loss / running_samples as f32;
                let metrics = validation(model, test_loader)?;
                log::info!(
                    "Epoch: {}/{}.. Training Loss: {:.3}.. Test Loss: {:.3}.. Test Accuracy: {:.3}",
                    epoch + 1,
                    config.epochs,
                    train_loss,
                    metrics.loss,
                    metrics.accuracy
                );
                history.steps.push(steps);
                history.train_losses.push(train_loss);
                history.test_losses.push(metrics.loss);
                history.test_accuracies.push(metrics.accuracy);
                running_loss = 0.0;
                running_samples = 0;
            }
        }
        log::debug!(
            "Average n_dead_neurons in epoch {}: {}",
            epoch + 1,
            total_n_dead_neurons / train_loader.len().max(1)
        );
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datasets::{N_CLASSES, N_FEATURES, gen_linear_data},
        nn::ModelDescriptor,
        optim::SGD,
    };

    fn loaders(rng: &mut Pcg64Mcg, batch_size: usize) -> (DataLoader, DataLoader) {
        let (train_x, train_y) = gen_linear_data(400, rng);
        let (test_x, test_y) = gen_linear_data(200, rng);
        (
            DataLoader::new(train_x, train_y, batch_size, true).unwrap(),
            DataLoader::new(test_x, test_y, batch_size, false).unwrap(),
        )
    }

    #[test]
    fn test_training_learns_linear_boundary() {
        let config = TrainConfig {
            epochs: 20,
            batch_size: 20,
            lr: 0.01,
            momentum: 0.9,
            drop_p: 0.0,
            print_every: 20,
            seed: 1,
        };
        let mut rng = config.rng();
        let (train_loader, test_loader) = loaders(&mut rng, config.batch_size);
        let descriptor = ModelDescriptor::new(N_FEATURES, N_CLASSES, vec![8]).unwrap();
        let mut model = Network::new(descriptor, config.drop_p, &mut rng).unwrap();
        let before = validation(&model, &test_loader).unwrap();

        let mut optim = SGD::new(config.lr, config.momentum);
        let history = train(
            &mut model,
            &train_loader,
            &test_loader,
            &mut optim,
            &config,
            &mut rng,
        )
        .unwrap();

        let after = validation(&model, &test_loader).unwrap();
        assert!(after.loss < before.loss);
        assert!(after.accuracy > 0.9, "accuracy {}", after.accuracy);
        // 400 samples / 20 per batch * 20 epochs / 20 steps per evaluation
        assert_eq!(history.steps.len(), 20);
        assert_eq!(history.train_losses.len(), history.test_losses.len());
    }

    #[test]
    fn test_training_is_reproducible() {
        let config = TrainConfig {
            epochs: 1,
            batch_size: 16,
            print_every: 5,
            ..Default::default()
        };
        let run = || {
            let mut rng = config.rng();
            let (train_loader, test_loader) = loaders(&mut rng, config.batch_size);
            let descriptor = ModelDescriptor::new(N_FEATURES, N_CLASSES, vec![6, 4]).unwrap();
            let mut model = Network::new(descriptor, config.drop_p, &mut rng).unwrap();
            let mut optim = SGD::new(config.lr, config.momentum);
            train(
                &mut model,
                &train_loader,
                &test_loader,
                &mut optim,
                &config,
                &mut rng,
            )
            .unwrap();
            model.state_dict()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_validation_rejects_bad_labels() {
        let descriptor = ModelDescriptor::new(2, 2, vec![]).unwrap();
        let model = Network::zeroed(descriptor).unwrap();
        let loader = DataLoader::new(vec![vec![0.0, 0.0]], vec![5], 1, false).unwrap();
        assert!(matches!(
            validation(&model, &loader),
            Err(NNError::TargetOutOfRange {
                target: 5,
                n_classes: 2
            })
        ));
    }

    #[test]
    fn test_validation_of_uniform_model() {
        // all-zero parameters predict a uniform distribution
        let descriptor = ModelDescriptor::new(2, 2, vec![3]).unwrap();
        let model = Network::zeroed(descriptor).unwrap();
        let loader =
            DataLoader::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]], vec![0, 1], 2, false).unwrap();
        let metrics = validation(&model, &loader).unwrap();
        assert!((metrics.loss - 2.0f32.ln()).abs() < 1e-6);
        // ties resolve to the last maximum
        assert_eq!(metrics.accuracy, 0.5);
    }
}
