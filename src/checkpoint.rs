//! Saving and loading trained networks
//!
//! A checkpoint is a single JSON document carrying the architecture next to
//! the parameters, so a network can be rebuilt without any outside hints:
//!
//! ```text
//! {
//!   "version": 1,
//!   "descriptor": { "input_size": 784, "output_size": 10, "hidden_layer_sizes": [512, 256, 128] },
//!   "state_dict": {
//!     "hidden_layers.0.bias":   { "shape": [512],      "data": [...] },
//!     "hidden_layers.0.weight": { "shape": [512, 784], "data": [...] },
//!     ...
//!     "output.weight":          { "shape": [10, 128],  "data": [...] }
//!   }
//! }
//! ```
//!
//! Floats are written in their shortest round-trip form, a loaded network
//! produces bitwise identical outputs to the one that was saved.

use std::{
    collections::HashSet,
    fmt::{self, Display},
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nn::{Module, ModelDescriptor, Network, ParameterSet};

/// Version of the checkpoint layout written by [`save`]
pub const FORMAT_VERSION: u32 = 1;

/// Errors for saving and loading checkpoints
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Error(s) in loading state dict: {}", join_mismatches(.mismatches))]
    StructureMismatch { mismatches: Vec<Mismatch> },
    #[error("Corrupt checkpoint: {reason}")]
    CorruptArtifact { reason: String },
    #[error("Unsupported checkpoint version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Parameter '{name}' contains a non-finite value and cannot be saved")]
    NonFiniteParameter { name: String },
    #[error("Failed to access checkpoint '{path}': {source}")]
    File { path: PathBuf, source: io::Error },
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CheckpointError {
    fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            reason: reason.into(),
        }
    }
}

/// A single disagreement between a model and a [`ParameterSet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Shape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    Missing {
        name: String,
    },
    Unexpected {
        name: String,
    },
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Shape {
                name,
                expected,
                found,
            } => write!(
                f,
                "size mismatch for {name}: copying a param with shape {found:?} from checkpoint, \
                 the shape in current model is {expected:?}"
            ),
            Mismatch::Missing { name } => write!(f, "missing key {name}"),
            Mismatch::Unexpected { name } => write!(f, "unexpected key {name}"),
        }
    }
}

fn join_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Architecture and parameters of a network, the unit that is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub version: u32,
    pub descriptor: ModelDescriptor,
    pub state_dict: ParameterSet,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Checkpoint {
    /// Snapshots the architecture and a copy of the current parameters
    pub fn from_model(model: &Network) -> Self {
        Self {
            version: FORMAT_VERSION,
            descriptor: model.descriptor().clone(),
            state_dict: model.state_dict(),
        }
    }

    /// Checks everything that can be checked without building a network
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.version != FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                expected: FORMAT_VERSION,
            });
        }
        self.descriptor
            .validate()
            .map_err(|e| CheckpointError::corrupt(e.to_string()))?;
        if let Some((name, tensor)) = self.state_dict.iter().find(|(_, t)| !t.is_consistent()) {
            return Err(CheckpointError::corrupt(format!(
                "parameter '{name}' has shape {:?} but {} values",
                tensor.shape(),
                tensor.numel()
            )));
        }
        Ok(())
    }

    /// Builds a network from the descriptor, then fills in the parameters
    ///
    /// The stored shapes are compared with the descriptor before any layer is
    /// allocated, so a descriptor that disagrees with the parameters is
    /// rejected however large it claims the network to be.
    pub fn into_model(self) -> Result<Network, CheckpointError> {
        self.validate()?;
        check_structure(self.descriptor.parameter_shapes(), &self.state_dict)?;
        let mut model = Network::zeroed(self.descriptor)
            .map_err(|e| CheckpointError::corrupt(e.to_string()))?;
        model.load_state_dict(&self.state_dict)?;
        Ok(model)
    }

    /// Parses and validates a serialized checkpoint
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CheckpointError> {
        // the version is read on its own first so that a newer layout is
        // reported as such rather than as corrupt
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| CheckpointError::corrupt(e.to_string()))?;
        if probe.version != FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: probe.version,
                expected: FORMAT_VERSION,
            });
        }
        let checkpoint: Checkpoint =
            serde_json::from_slice(bytes).map_err(|e| CheckpointError::corrupt(e.to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, CheckpointError> {
        let mut bytes = Vec::new();
        BufReader::new(reader).read_to_end(&mut bytes)?;
        Self::from_slice(&bytes)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), CheckpointError> {
        self.check_finite()?;
        self.write_json(writer)?;
        Ok(())
    }

    fn write_json<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()
    }

    /// JSON has no representation for NaN or infinity
    fn check_finite(&self) -> Result<(), CheckpointError> {
        match self
            .state_dict
            .iter()
            .find(|(_, t)| t.data().iter().any(|v| !v.is_finite()))
        {
            Some((name, _)) => Err(CheckpointError::NonFiniteParameter { name: name.clone() }),
            None => Ok(()),
        }
    }
}

impl Network {
    /// Copies `params` into this network, all or nothing
    ///
    /// Every name and shape is checked before anything is assigned; on error
    /// the network is left untouched and all disagreements are reported.
    pub fn load_state_dict(&mut self, params: &ParameterSet) -> Result<(), CheckpointError> {
        let expected = self
            .named_parameters()
            .into_iter()
            .map(|(name, tensor)| (name, tensor.shape().to_vec()))
            .collect();
        check_structure(expected, params)?;

        for (name, tensor) in self.named_parameters_mut() {
            if let Some(stored) = params.get(&name) {
                *tensor = stored.clone();
            }
        }
        Ok(())
    }
}

/// Compares `params` against the expected names and shapes, reporting every
/// missing, unexpected and differently shaped parameter at once
fn check_structure(
    expected: Vec<(String, Vec<usize>)>,
    params: &ParameterSet,
) -> Result<(), CheckpointError> {
    let mut mismatches = Vec::new();
    let mut own_names = HashSet::new();
    for (name, shape) in expected {
        match params.get(&name) {
            None => mismatches.push(Mismatch::Missing { name: name.clone() }),
            Some(stored) if !stored.is_consistent() => {
                return Err(CheckpointError::corrupt(format!(
                    "parameter '{name}' has shape {:?} but {} values",
                    stored.shape(),
                    stored.numel()
                )));
            }
            Some(stored) if stored.shape() != shape.as_slice() => {
                mismatches.push(Mismatch::Shape {
                    name: name.clone(),
                    expected: shape,
                    found: stored.shape().to_vec(),
                })
            }
            Some(_) => {}
        }
        own_names.insert(name);
    }
    for (name, _) in params.iter() {
        if !own_names.contains(name) {
            mismatches.push(Mismatch::Unexpected { name: name.clone() });
        }
    }
    if !mismatches.is_empty() {
        return Err(CheckpointError::StructureMismatch { mismatches });
    }
    Ok(())
}

/// Sibling path the checkpoint is written to before being renamed into place
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomically(checkpoint: &Checkpoint, path: &Path, tmp_path: &Path) -> io::Result<()> {
    let mut file = File::create(tmp_path)?;
    checkpoint.write_json(&mut file)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)
}

/// Writes `model`'s architecture and parameters to `path`
///
/// The file is written next to the destination and renamed over it once
/// complete, so `path` holds either the previous or the new checkpoint.
pub fn save(model: &Network, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    let checkpoint = Checkpoint::from_model(model);
    checkpoint.check_finite()?;

    let tmp_path = temp_path(path);
    if let Err(source) = write_atomically(&checkpoint, path, &tmp_path) {
        // best effort, the write error is what gets reported
        let _ = fs::remove_file(&tmp_path);
        return Err(CheckpointError::File {
            path: path.to_path_buf(),
            source,
        });
    }
    log::info!(
        "Saved checkpoint to '{}' ({} -> {:?} -> {}, {} parameters)",
        path.display(),
        checkpoint.descriptor.input_size,
        checkpoint.descriptor.hidden_layer_sizes,
        checkpoint.descriptor.output_size,
        model.n_parameters()
    );
    Ok(())
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let bytes = fs::read(path).map_err(|source| CheckpointError::File {
        path: path.to_path_buf(),
        source,
    })?;
    Checkpoint::from_slice(&bytes)
}

/// Rebuilds a network from a checkpoint written by [`save`]
pub fn load(path: impl AsRef<Path>) -> Result<Network, CheckpointError> {
    let path = path.as_ref();
    let model = read_checkpoint(path)?.into_model()?;
    log::info!(
        "Loaded checkpoint from '{}' ({} -> {:?} -> {}, dropout {})",
        path.display(),
        model.descriptor().input_size,
        model.descriptor().hidden_layer_sizes,
        model.descriptor().output_size,
        model.drop_p()
    );
    Ok(model)
}

/// Loads only the parameters of a checkpoint into an already built network,
/// ignoring the stored architecture
pub fn load_into(model: &mut Network, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    let checkpoint = read_checkpoint(path)?;
    if checkpoint.descriptor != *model.descriptor() {
        log::debug!(
            "Checkpoint architecture {:?} differs from the model's {:?}",
            checkpoint.descriptor,
            model.descriptor()
        );
    }
    model.load_state_dict(&checkpoint.state_dict)
}
