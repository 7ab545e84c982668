//! Trains a fully connected classifier, saves it as a checkpoint and loads it back
//! using the library provided by `fc_model`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run -- train --dataset moon --hidden-layers 16,8
//! cargo run -- train --data-dir data/FashionMNIST/raw --hidden-layers 512,256,128
//! cargo run -- inspect output/checkpoint.json
//! cargo run -- evaluate output/checkpoint.json --data-dir data/FashionMNIST/raw
//! ```
//!
//! Without `--data-dir` a synthetic 2-D dataset is generated; with it the MNIST / Fashion-MNIST
//! IDX files in that directory are used.

use std::{error::Error, fs, path::PathBuf};

use fc_model::{
    checkpoint,
    dataloader::DataLoader,
    datasets::{self, Dataset, load_dataset, plot_data, plot_decision_boundary, plot_losses},
    mnist::{self, Split},
    nn::{DEFAULT_DROP_P, Module, ModelDescriptor, Network},
    optim::SGD,
    train::{TrainConfig, train, validation},
};

use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

#[derive(Parser)]
#[command(about = "Train fully connected classifiers and manage their checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a network and save it as a checkpoint
    Train(TrainArgs),
    /// Print the architecture and parameter shapes stored in a checkpoint
    Inspect { checkpoint: PathBuf },
    /// Rebuild a network from a checkpoint and evaluate it on test data
    Evaluate {
        checkpoint: PathBuf,
        #[command(flatten)]
        data: DataArgs,
    },
}

#[derive(Args)]
struct DataArgs {
    #[clap(short, long, default_value_t = Dataset::XOR)]
    dataset: Dataset,
    /// Directory holding MNIST / Fashion-MNIST IDX files, replaces --dataset
    #[clap(long)]
    data_dir: Option<PathBuf>,
    #[clap(short, long, default_value_t = 1000)]
    class_size: usize,
    #[clap(short, long, default_value_t = 64)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,
    #[clap(short, long, default_value_t = 50)]
    epochs: usize,
    #[clap(short, long, default_value_t = 0.01)]
    lr: f32,
    #[clap(short, long, default_value_t = 0.9)]
    momentum: f32,
    /// Same rate a network gets when it is loaded from a checkpoint
    #[clap(long, default_value_t = DEFAULT_DROP_P)]
    drop_p: f32,
    #[clap(short, long, default_value_t = 40)]
    print_every: usize,
    // Note that when increasing the hidden sizes, activation values may explode if
    // the weights are not initialized properly
    #[clap(long, value_delimiter = ',', default_values_t = vec![16, 8])]
    hidden_layers: Vec<usize>,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
    #[clap(long, default_value_t = format!("checkpoint.json"))]
    checkpoint_name: String,
}

/// Train and test splits with the dimensions they imply
struct Data {
    train: (Vec<Vec<f32>>, Vec<usize>),
    test: (Vec<Vec<f32>>, Vec<usize>),
    input_size: usize,
    n_classes: usize,
}

fn load_data(args: &DataArgs, rng: &mut Pcg64Mcg) -> Result<Data, Box<dyn Error>> {
    match &args.data_dir {
        Some(dir) => {
            let train = mnist::load(dir, Split::Train)?;
            let test = mnist::load(dir, Split::Test)?;
            let input_size = train
                .0
                .first()
                .map(|x| x.len())
                .ok_or("training split is empty")?;
            Ok(Data {
                train,
                test,
                input_size,
                n_classes: mnist::N_CLASSES,
            })
        }
        None => Ok(Data {
            train: load_dataset(args.dataset, args.class_size, rng),
            test: load_dataset(args.dataset, (args.class_size / 4).max(1), rng),
            input_size: datasets::N_FEATURES,
            n_classes: datasets::N_CLASSES,
        }),
    }
}

fn run_train(args: TrainArgs) -> Result<(), Box<dyn Error>> {
    let config = TrainConfig {
        epochs: args.epochs,
        batch_size: args.data.batch_size,
        lr: args.lr,
        momentum: args.momentum,
        drop_p: args.drop_p,
        print_every: args.print_every,
        seed: args.data.seed,
    };
    let mut rng = config.rng();
    let data = load_data(&args.data, &mut rng)?;
    let synthetic = args.data.data_dir.is_none();
    fs::create_dir_all(&args.output_dir)?;

    if synthetic {
        let file_name = format!("{}/dataset_{}.png", args.output_dir, args.data.dataset);
        if let Err(e) = plot_data(&data.train.0, &data.train.1, &file_name, args.data.dataset) {
            log::warn!("Could not plot the dataset: {}", e);
        }
    }

    let descriptor = ModelDescriptor::new(data.input_size, data.n_classes, args.hidden_layers)?;
    let mut model = Network::new(descriptor, config.drop_p, &mut rng)?;
    let train_loader = DataLoader::new(data.train.0, data.train.1, config.batch_size, true)?;
    let test_loader = DataLoader::new(
        data.test.0.clone(),
        data.test.1.clone(),
        config.batch_size,
        false,
    )?;
    let mut optim = SGD::new(config.lr, config.momentum);

    let history = train(
        &mut model,
        &train_loader,
        &test_loader,
        &mut optim,
        &config,
        &mut rng,
    )?;

    let checkpoint_path = PathBuf::from(&args.output_dir).join(&args.checkpoint_name);
    checkpoint::save(&model, &checkpoint_path)?;

    if !history.steps.is_empty() {
        let file_name = format!("{}/losses.png", args.output_dir);
        if let Err(e) = plot_losses(&history.train_losses, &history.test_losses, &file_name) {
            log::warn!("Could not plot the losses: {}", e);
        }
    }

    // the reloaded model must score exactly like the trained one
    let reloaded = checkpoint::load(&checkpoint_path)?;
    let trained_metrics = validation(&model, &test_loader)?;
    let reloaded_metrics = validation(&reloaded, &test_loader)?;
    log::info!(
        "Trained model accuracy: {:.3}, reloaded model accuracy: {:.3}",
        trained_metrics.accuracy,
        reloaded_metrics.accuracy
    );

    if synthetic {
        let file_name = format!(
            "{}/decision_boundary_{}.png",
            args.output_dir, args.data.dataset
        );
        if let Err(e) = plot_decision_boundary(
            &reloaded,
            &file_name,
            args.data.dataset,
            &data.test.0,
            &data.test.1,
        ) {
            log::warn!("Could not plot the decision boundary: {}", e);
        }
    }
    Ok(())
}

fn run_inspect(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let model = checkpoint::load(&path)?;
    let descriptor = model.descriptor();
    println!("checkpoint: {}", path.display());
    println!("input_size: {}", descriptor.input_size);
    println!("output_size: {}", descriptor.output_size);
    println!("hidden_layer_sizes: {:?}", descriptor.hidden_layer_sizes);
    for (name, tensor) in model.named_parameters() {
        println!("{name}: {:?}", tensor.shape());
    }
    println!("parameters: {}", model.n_parameters());
    Ok(())
}

fn run_evaluate(path: PathBuf, args: DataArgs) -> Result<(), Box<dyn Error>> {
    let model = checkpoint::load(&path)?;
    let mut rng = Pcg64Mcg::seed_from_u64(args.seed);
    let data = load_data(&args, &mut rng)?;
    let test_loader = DataLoader::new(data.test.0, data.test.1, args.batch_size, false)?;
    let metrics = validation(&model, &test_loader)?;
    log::info!(
        "Test Loss: {:.3}.. Test Accuracy: {:.3}",
        metrics.loss,
        metrics.accuracy
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Cli::parse().command {
        Command::Train(args) => run_train(args),
        Command::Inspect { checkpoint } => run_inspect(checkpoint),
        Command::Evaluate { checkpoint, data } => run_evaluate(checkpoint, data),
    }
}
