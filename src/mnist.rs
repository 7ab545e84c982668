//! MNIST / Fashion-MNIST loader for the IDX file format
//!
//! Both datasets ship as four uncompressed files with identical names:
//!   - `train-images-idx3-ubyte`, `train-labels-idx1-ubyte` (60,000 samples)
//!   - `t10k-images-idx3-ubyte`, `t10k-labels-idx1-ubyte` (10,000 samples)
//!
//! All header values are big-endian:
//!   images: magic(2051) | count(u32) | rows(u32) | cols(u32) | pixels(u8...)
//!   labels: magic(2049) | count(u32) | labels(u8...)

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// Both datasets have ten classes
pub const N_CLASSES: usize = 10;

/// Errors for IDX loading
#[derive(Debug, Error)]
pub enum IdxError {
    #[error("Failed to read '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid magic number: expected {expected}, got {got}")]
    InvalidMagic { expected: u32, got: u32 },
    #[error("IDX data is truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("Images have zero rows or columns")]
    EmptyImages,
    #[error("Count mismatch: {images} images vs {labels} labels")]
    CountMismatch { images: usize, labels: usize },
}

/// Which split to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn file_names(&self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

/// Loads a split from `dir`, returning flattened images normalized to
/// `[-1, 1]` (mean 0.5, std 0.5) and their class indices
pub fn load(dir: impl AsRef<Path>, split: Split) -> Result<(Vec<Vec<f32>>, Vec<usize>), IdxError> {
    let dir = dir.as_ref();
    let (img_name, lbl_name) = split.file_names();
    let read = |name: &str| {
        let path = dir.join(name);
        fs::read(&path).map_err(|source| IdxError::Io { path, source })
    };
    let data = from_raw(&read(img_name)?, &read(lbl_name)?)?;
    log::info!(
        "Loaded {} {:?} samples from '{}'",
        data.0.len(),
        split,
        dir.display()
    );
    Ok(data)
}

/// Parses an image file and a label file already in memory
pub fn from_raw(
    image_bytes: &[u8],
    label_bytes: &[u8],
) -> Result<(Vec<Vec<f32>>, Vec<usize>), IdxError> {
    let images = parse_images(image_bytes)?;
    let labels = parse_labels(label_bytes)?;
    if images.len() != labels.len() {
        return Err(IdxError::CountMismatch {
            images: images.len(),
            labels: labels.len(),
        });
    }
    Ok((images, labels))
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32, IdxError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(IdxError::Truncated {
            expected: offset + 4,
            got: bytes.len(),
        })
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<(), IdxError> {
    let got = read_u32_be(bytes, 0)?;
    if got != expected {
        return Err(IdxError::InvalidMagic { expected, got });
    }
    Ok(())
}

fn parse_images(bytes: &[u8]) -> Result<Vec<Vec<f32>>, IdxError> {
    check_magic(bytes, IMAGES_MAGIC)?;
    let count = read_u32_be(bytes, 4)? as usize;
    let rows = read_u32_be(bytes, 8)? as usize;
    let cols = read_u32_be(bytes, 12)? as usize;
    let pixels = &bytes[16..];
    let image_size = rows.saturating_mul(cols);
    let n_pixels = count.saturating_mul(image_size);
    if pixels.len() < n_pixels {
        return Err(IdxError::Truncated {
            expected: n_pixels.saturating_add(16),
            got: bytes.len(),
        });
    }
    if image_size == 0 {
        return Err(IdxError::EmptyImages);
    }
    Ok(pixels[..n_pixels]
        .chunks_exact(image_size)
        .map(|img| img.iter().map(|&p| normalize(p)).collect())
        .collect())
}

fn parse_labels(bytes: &[u8]) -> Result<Vec<usize>, IdxError> {
    check_magic(bytes, LABELS_MAGIC)?;
    let count = read_u32_be(bytes, 4)? as usize;
    let labels = &bytes[8..];
    if labels.len() < count {
        return Err(IdxError::Truncated {
            expected: 8 + count,
            got: bytes.len(),
        });
    }
    Ok(labels[..count].iter().map(|&l| l as usize).collect())
}

/// Scales a pixel to `[0, 1]` then normalizes with mean 0.5 and std 0.5
fn normalize(pixel: u8) -> f32 {
    (pixel as f32 / 255.0 - 0.5) / 0.5
}
