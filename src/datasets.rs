//! Generates binary classification datasets and utilities for plotting them, decision boundaries
//! and loss curves
//!
//! By convention class 0 is plotted in red and class 1 is plotted in blue.

use crate::nn::{Module, argmax};
use std::{
    error::Error,
    f32::consts::PI,
    fmt::{self, Display},
};

use clap::ValueEnum;
use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, PathElement, Rectangle},
    series::LineSeries,
    style::{BLACK, BLUE, Color, RED, RGBColor, WHITE},
};
use rand::Rng;

/// Toggles between dataset types
#[derive(Debug, ValueEnum, Clone, Copy)]
pub enum Dataset {
    Line,
    Circle,
    XOR,
    Moon,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Line => write!(f, "line"),
            Dataset::Circle => write!(f, "circle"),
            Dataset::XOR => write!(f, "xor"),
            Dataset::Moon => write!(f, "moon"),
        }
    }
}

/// Number of classes in every synthetic dataset
pub const N_CLASSES: usize = 2;
/// Number of input features in every synthetic dataset
pub const N_FEATURES: usize = 2;

/// Loads a dataset based on the dataset type, labels are class indices
pub fn load_dataset<R: Rng + ?Sized>(
    dataset: Dataset,
    class_size: usize,
    rng: &mut R,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    match dataset {
        Dataset::Line => gen_linear_data(class_size, rng),
        Dataset::Circle => gen_circle_data(class_size, rng),
        Dataset::XOR => gen_xor_data(class_size, rng),
        Dataset::Moon => gen_moon_data(class_size, rng),
    }
}

/// Generates a simple linearly separable dataset
pub fn gen_linear_data<R: Rng + ?Sized>(
    class_size: usize,
    rng: &mut R,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x: f32 = rng.random_range(-5.0..5.0);
        let y: f32 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x > y { 0 } else { 1 });
    }

    (data, labels)
}

/// Generates a binary classification dataset of two concentric circles
pub fn gen_circle_data<R: Rng + ?Sized>(
    class_size: usize,
    rng: &mut R,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    let c1_radius: f32 = 3.0;
    let c2_radius: f32 = 5.0;

    let mut data = Vec::new();
    let mut labels = Vec::new();

    for (class, radius) in [(0, c1_radius), (1, c2_radius)] {
        for _ in 0..class_size {
            let angle: f32 = rng.random_range(0.0..2.0 * PI);
            let jitter: f32 = rng.random_range(-0.25..0.25);
            let radius_delta = radius * jitter;
            let x = (radius + radius_delta) * angle.cos();
            let y = (radius + radius_delta) * angle.sin();
            data.push(vec![x, y]);
            labels.push(class);
        }
    }

    (data, labels)
}

pub fn gen_xor_data<R: Rng + ?Sized>(
    class_size: usize,
    rng: &mut R,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x: f32 = rng.random_range(-5.0..5.0);
        let y: f32 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        if x > 0.0 && y > 0.0 || x < 0.0 && y < 0.0 {
            labels.push(0);
        } else {
            labels.push(1);
        }
    }

    (data, labels)
}

/// Generates a moons dataset (two interleaving partial circles) for binary classification
pub fn gen_moon_data<R: Rng + ?Sized>(
    class_size: usize,
    rng: &mut R,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();
    let radius: f32 = 3.0;

    // First moon
    for _ in 0..class_size {
        let theta: f32 = rng.random_range(PI * -1.0 / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos();
        let y = radius * theta.sin();
        let noise_x: f32 = rng.random_range(-0.1..0.1);
        let noise_y: f32 = rng.random_range(-0.1..0.1);
        data.push(vec![x + noise_x, y + noise_y]);
        labels.push(0);
    }

    // Second moon
    for _ in 0..class_size {
        let theta: f32 = rng.random_range(PI * -1.0 / 4.0..PI * 5.0 / 4.0);
        let x = radius * theta.cos() + 2.0;
        let y = -radius * theta.sin() - 0.2;
        let noise_x: f32 = rng.random_range(-0.1..0.1);
        let noise_y: f32 = rng.random_range(-0.1..0.1);
        data.push(vec![x + noise_x, y + noise_y]);
        labels.push(1);
    }

    (data, labels)
}

/// Plots the data points and labels for a given dataset
pub fn plot_data(
    data: &[Vec<f32>],
    labels: &[usize],
    file_name: &str,
    dataset: Dataset,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Dataset: {}", dataset), ("sans-serif", 50))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(-6.0f32..6.0f32, -6.0f32..6.0f32)?;

    chart.configure_mesh().draw()?;

    chart.draw_series(data.iter().zip(labels.iter()).map(|(data, label)| {
        let color = if *label == 0 { RED } else { BLUE };
        Circle::new((data[0], data[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Data plot has been saved to '{}'.", file_name);

    Ok(())
}

/// Plots the decision boundary for a given model on a given dataset by sampling a grid of points and evaluating the model
pub fn plot_decision_boundary(
    model: &dyn Module,
    file_name: &str,
    dataset: Dataset,
    data: &[Vec<f32>],
    labels: &[usize],
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let grid_min: f32 = -6.0;
    let grid_max: f32 = 6.0;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(
            format!("Decision Boundary for {}", dataset),
            ("sans-serif", 50),
        )
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(grid_min..grid_max, grid_min..grid_max)?;

    chart.configure_mesh().draw()?;

    let red_bg = RGBColor(255, 200, 200);
    let blue_bg = RGBColor(200, 200, 255);

    let step: f32 = 0.20;
    let n_steps: f32 = (grid_max - grid_min) / step;
    let n_steps = n_steps.round() as i32;
    let mut cells = Vec::with_capacity((n_steps * n_steps) as usize);
    for xi in 0..n_steps {
        let x = grid_min + (xi as f32 * step);
        for yi in 0..n_steps {
            let y = grid_min + (yi as f32 * step);
            let pred = argmax(&model.forward(&[x, y])?);
            let color = if pred == 0 { red_bg } else { blue_bg };
            cells.push(Rectangle::new(
                [
                    (x - step / 2.0, y - step / 2.0),
                    (x + step / 2.0, y + step / 2.0),
                ],
                color.filled(),
            ));
        }
    }
    chart.draw_series(cells)?;

    // plot the data points
    chart.draw_series(data.iter().zip(labels.iter()).map(|(data, label)| {
        let color = if *label == 0 { RED } else { BLUE };
        Circle::new((data[0], data[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Decision boundary plot saved to '{}'.", file_name);
    Ok(())
}

/// Plots training and validation loss against the evaluation index
pub fn plot_losses(
    train_losses: &[f32],
    test_losses: &[f32],
    file_name: &str,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let n = train_losses.len().max(test_losses.len()).max(2);
    let y_max = train_losses
        .iter()
        .chain(test_losses)
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        * 1.1;
    let y_max = if y_max > 0.0 { y_max } else { 1.0 };

    let mut chart = ChartBuilder::on(&root_area)
        .caption("Loss", ("sans-serif", 50))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0..n - 1, 0.0f32..y_max)?;

    chart.configure_mesh().draw()?;

    chart
        .draw_series(LineSeries::new(
            train_losses.iter().copied().enumerate(),
            &RED,
        ))?
        .label("Training loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .draw_series(LineSeries::new(
            test_losses.iter().copied().enumerate(),
            &BLUE,
        ))?
        .label("Validation loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root_area.present()?;
    log::info!("Loss plot saved to '{}'.", file_name);
    Ok(())
}
