use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::{CheckpointState, CkptErr, Result, Session, VarStore};

const GLOBAL_STEP_KEY: &str = "global_step";
const TRAINABLE_KEY: &str = "trainable";
const DEFAULT_PREFIX: &str = "model";

/// Restores checkpoint files into a session.
pub trait Saver<S> {
    /// Replaces the session's state with the one stored at `path`.
    ///
    /// # Arguments
    /// * `session` - The session to restore into.
    /// * `path` - The checkpoint file.
    ///
    /// # Returns
    /// A `CkptErr` if the checkpoint can't be read or doesn't fit the session.
    fn restore(&self, session: &mut S, path: &Path) -> Result<()>;
}

/// Stores a `VarStore` as a safetensors file per step.
///
/// Variables are stored as `F32` tensors next to an `I64` scalar tensor named
/// `global_step`. The names of the trainable variables go in the file's metadata.
#[derive(Debug, Clone)]
pub struct SafetensorsSaver {
    prefix: String,
}

impl Default for SafetensorsSaver {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl SafetensorsSaver {
    /// Creates a new `SafetensorsSaver`.
    ///
    /// # Arguments
    /// * `prefix` - The file name prefix, checkpoints are named `<prefix>-<step>.safetensors`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Writes the session into `logdir` and records it as the latest checkpoint.
    ///
    /// # Arguments
    /// * `session` - The session to save.
    /// * `logdir` - The log directory to write into.
    ///
    /// # Returns
    /// The path of the new checkpoint file, or `CkptErr::ReservedName` if a variable
    /// is named `global_step`.
    pub fn save(&self, session: &VarStore, logdir: &Path) -> Result<PathBuf> {
        if session.get(GLOBAL_STEP_KEY).is_some() {
            return Err(CkptErr::ReservedName(GLOBAL_STEP_KEY.to_string()));
        }

        let step = session.global_step();
        let filename = format!("{}-{step}.safetensors", self.prefix);
        let path = logdir.join(&filename);

        let step_bytes = i64::try_from(step)
            .map_err(|_| CkptErr::corrupt(&path, format!("global step {step} overflows i64")))?
            .to_le_bytes();

        let flat: Vec<_> = session
            .variables()
            .map(|(name, var)| {
                let data: Vec<f32> = var.value.iter().copied().collect();
                (name.to_string(), var.value.shape().to_vec(), data)
            })
            .collect();

        let mut views = flat
            .iter()
            .map(|(name, shape, data)| {
                let bytes = bytemuck::cast_slice(data.as_slice());
                TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.clone(), view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let step_view = TensorView::new(Dtype::I64, Vec::new(), &step_bytes)?;
        views.push((GLOBAL_STEP_KEY.to_string(), step_view));

        let trainable: Vec<_> = session
            .variables()
            .filter(|(_, var)| var.trainable)
            .map(|(name, _)| name)
            .collect();

        let trainable = serde_json::to_string(&trainable)
            .map_err(|e| CkptErr::corrupt(&path, format!("can't encode trainable names: {e}")))?;

        let metadata = HashMap::from([(TRAINABLE_KEY.to_string(), trainable)]);

        let bytes = safetensors::serialize(views, &Some(metadata))?;
        fs::write(&path, bytes)?;

        let state = match CheckpointState::read(logdir)? {
            Some(mut state) => {
                state.push(filename);
                state
            }
            None => CheckpointState::new(filename),
        };
        state.write(logdir)?;

        debug!(step = step, vars = flat.len(); "saved checkpoint");
        Ok(path)
    }
}

/// Decodes the `global_step` scalar tensor.
fn read_global_step(path: &Path, view: &TensorView<'_>) -> Result<u64> {
    let numel: usize = view.shape().iter().product();
    if view.dtype() != Dtype::I64 || numel != 1 {
        return Err(CkptErr::corrupt(
            path,
            format!(
                "global step has dtype {:?} and shape {:?}, expected an I64 scalar",
                view.dtype(),
                view.shape()
            ),
        ));
    }

    let step = bytemuck::pod_read_unaligned::<i64>(view.data());
    u64::try_from(step).map_err(|_| CkptErr::corrupt(path, format!("negative global step {step}")))
}

impl Saver<VarStore> for SafetensorsSaver {
    /// Restores the variables and global step stored at `path`.
    ///
    /// Variables missing from the file are dropped from the session. Variables the
    /// session already holds keep their trainable flag, new ones take it from the
    /// file's metadata, and are trainable when the file carries none.
    fn restore(&self, session: &mut VarStore, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;

        let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
        let trainable: Option<Vec<String>> = match metadata
            .metadata()
            .as_ref()
            .and_then(|info| info.get(TRAINABLE_KEY))
        {
            Some(names) => Some(
                serde_json::from_str(names)
                    .map_err(|e| CkptErr::corrupt(path, format!("invalid trainable names: {e}")))?,
            ),
            None => None,
        };

        let tensors = SafeTensors::deserialize(&bytes)?;
        let mut step = None;
        let mut restored = Vec::new();

        for (name, view) in tensors.tensors() {
            if name == GLOBAL_STEP_KEY {
                step = Some(read_global_step(path, &view)?);
                continue;
            }

            if view.dtype() != Dtype::F32 {
                return Err(CkptErr::corrupt(
                    path,
                    format!("variable {name} has dtype {:?}, expected F32", view.dtype()),
                ));
            }

            let data = view
                .data()
                .chunks_exact(size_of::<f32>())
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect();

            let value = ArrayD::from_shape_vec(IxDyn(view.shape()), data)?;
            let is_trainable = match (session.is_trainable(&name), &trainable) {
                (Some(current), _) => current,
                (None, Some(names)) => names.contains(&name),
                (None, None) => true,
            };
            restored.push((name, value, is_trainable));
        }

        let step = step.ok_or_else(|| CkptErr::corrupt(path, "missing global step"))?;

        // Only touch the session once the whole file was decoded.
        let names: HashSet<&str> = restored.iter().map(|(name, _, _)| name.as_str()).collect();
        session.retain_names(|name| names.contains(name));

        for (name, value, trainable) in restored {
            session.insert(name, value, trainable);
        }
        session.set_global_step(step);

        debug!(step = step; "restored {}", path.display());
        Ok(())
    }
}
