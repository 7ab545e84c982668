//! Data loader

use std::collections::HashSet;

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error(
        "All input vectors must have the same dimension. Received different sizes: {input_dims:?}"
    )]
    InputDimensionMismatch { input_dims: HashSet<usize> },
    #[error("Labels must have the same length as the data")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
    #[error("Batch size must be positive")]
    ZeroBatchSize,
}

/// Data loader, returns batches of data and labels optionally shuffled
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
pub struct DataLoader {
    data: Vec<Vec<f32>>,
    // class indices
    labels: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
}

impl DataLoader {
    pub fn new(
        data: Vec<Vec<f32>>,
        labels: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if data.len() != labels.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: data.len(),
            });
        }
        let input_dims = data.iter().map(|d| d.len()).collect::<HashSet<_>>();
        if input_dims.len() > 1 {
            return Err(DataLoaderError::InputDimensionMismatch { input_dims });
        }
        Ok(Self {
            data,
            labels,
            batch_size,
            shuffle,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of batches per epoch, counting a final short batch
    pub fn n_batches(&self) -> usize {
        self.data.len().div_ceil(self.batch_size)
    }

    /// Dimension of the input vectors, `None` when empty
    pub fn input_dim(&self) -> Option<usize> {
        self.data.first().map(|d| d.len())
    }

    /// Iterates over one epoch, shuffling with `rng` if the loader shuffles
    pub fn iter<R: Rng + ?Sized>(&self, rng: &mut R) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.data.len()).collect::<Vec<_>>();
        if self.shuffle {
            indices.shuffle(rng);
        }
        DataLoaderIterator {
            data: &self.data,
            labels: &self.labels,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset.
/// The last batch is shorter when the dataset size is not a multiple of the batch size.
pub struct DataLoaderIterator<'a> {
    data: &'a [Vec<f32>],
    labels: &'a [usize],
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl<'a> Iterator for DataLoaderIterator<'a> {
    type Item = (Vec<&'a [f32]>, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.data.len() {
            return None;
        }
        let end = (self.curr_iter + self.batch_size).min(self.data.len());
        let batch_indices = &self.indices[self.curr_iter..end];
        let batch_data = batch_indices
            .iter()
            .map(|&i| self.data[i].as_slice())
            .collect::<Vec<_>>();
        let batch_labels = batch_indices
            .iter()
            .map(|&i| self.labels[i])
            .collect::<Vec<_>>();
        self.curr_iter = end;
        Some((batch_data, batch_labels))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;

    #[test]
    fn test_dataloader() {
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let labels = vec![0, 1];
        let dataloader = DataLoader::new(data, labels, 2, false).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let mut iter = dataloader.iter(&mut rng);
        assert_eq!(
            iter.next(),
            Some((
                vec![[1.0, 2.0, 3.0].as_slice(), [4.0, 5.0, 6.0].as_slice()],
                vec![0, 1],
            ))
        );
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_dataloader_shuffle() {
        let seed = 42;
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let labels = vec![0, 1];
        let dataloader = DataLoader::new(data, labels, 2, true).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut iter = dataloader.iter(&mut rng);
        assert_eq!(
            iter.next(),
            Some((
                vec![[4.0, 5.0, 6.0].as_slice(), [1.0, 2.0, 3.0].as_slice()],
                vec![1, 0],
            ))
        );
    }

    #[test]
    fn test_dataloader_short_last_batch() {
        let data = (0..5).map(|i| vec![i as f32]).collect::<Vec<_>>();
        let labels = vec![0, 1, 0, 1, 0];
        let dataloader = DataLoader::new(data, labels, 2, false).unwrap();
        assert_eq!(dataloader.n_batches(), 3);
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let sizes = dataloader
            .iter(&mut rng)
            .map(|(d, l)| {
                assert_eq!(d.len(), l.len());
                d.len()
            })
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_dataloader_errors() {
        // different length data and labels
        let data = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let labels = vec![0, 1, 0];
        let expected_label_len = labels.len();
        let expected_data_len = data.len();
        let dataloader = DataLoader::new(data, labels, 2, false);
        assert!(matches!(
            dataloader,
            Err(DataLoaderError::LabelLengthMismatch {
                label_len,
                data_len,
            }) if label_len == expected_label_len && data_len == expected_data_len
        ));

        let data = vec![vec![1.0, 2.0], vec![4.0]];
        assert!(matches!(
            DataLoader::new(data, vec![0, 1], 2, false),
            Err(DataLoaderError::InputDimensionMismatch { .. })
        ));

        assert!(matches!(
            DataLoader::new(vec![], vec![], 0, false),
            Err(DataLoaderError::ZeroBatchSize)
        ));
    }
}
