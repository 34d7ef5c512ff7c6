use std::{fs, path::Path};

use log::{debug, info};
use ml_core::{Model, StateDict, Tensor};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::CheckpointErr;

/// Prefix of every tensor name in a nested checkpoint.
pub const NESTED_PREFIX: &str = "model_state_dict.";

/// How tensor names are laid out inside a checkpoint file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointLayout {
    /// Tensor names are the model's parameter names.
    #[default]
    Flat,
    /// Tensor names are the model's parameter names under `model_state_dict.`.
    Nested,
}

impl CheckpointLayout {
    /// Picks the layout a pre-trained backbone is published with.
    ///
    /// # Arguments
    /// * `pre_trained` - The name of the backbone.
    /// * `class_number` - The amount of classes it was trained on.
    pub fn infer(pre_trained: &str, class_number: usize) -> Self {
        match (pre_trained, class_number) {
            ("wideresnet28", 100) => Self::Nested,
            _ => Self::Flat,
        }
    }

    fn key(self, name: &str) -> String {
        match self {
            Self::Flat => name.to_string(),
            Self::Nested => format!("{NESTED_PREFIX}{name}"),
        }
    }
}

/// Reads a safetensors checkpoint into a `StateDict`.
///
/// # Arguments
/// * `path` - The checkpoint file.
/// * `layout` - How the tensor names are stored.
///
/// # Errors
/// Returns `CheckpointErr` if the file can't be read, isn't valid
/// safetensors, holds non-`f32` tensors or lacks the nested prefix.
pub fn load_checkpoint(path: &Path, layout: CheckpointLayout) -> Result<StateDict, CheckpointErr> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut state = StateDict::new();

    for (name, view) in tensors.tensors() {
        let key = match layout {
            CheckpointLayout::Flat => name.clone(),
            CheckpointLayout::Nested => match name.strip_prefix(NESTED_PREFIX) {
                Some(key) => key.to_string(),
                None => continue,
            },
        };

        if view.dtype() != Dtype::F32 {
            return Err(CheckpointErr::Dtype { name });
        }

        let data = view
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        let tensor = Tensor::new(view.shape().to_vec(), data)?;
        state.insert(key, tensor);
    }

    if layout == CheckpointLayout::Nested && state.is_empty() {
        return Err(CheckpointErr::MissingPrefix(NESTED_PREFIX));
    }

    info!("loaded {} tensors from {}", state.len(), path.display());
    Ok(state)
}

/// Writes `state` to a safetensors checkpoint.
///
/// # Arguments
/// * `path` - The destination file, overwritten if it exists.
/// * `state` - The tensors to store.
/// * `layout` - How the tensor names are stored.
pub fn save_checkpoint(
    path: &Path,
    state: &StateDict,
    layout: CheckpointLayout,
) -> Result<(), CheckpointErr> {
    let views = state
        .iter()
        .map(|(name, tensor)| {
            let bytes: &[u8] = bytemuck::cast_slice(tensor.data());
            TensorView::new(Dtype::F32, tensor.shape().to_vec(), bytes)
                .map(|view| (layout.key(name), view))
        })
        .collect::<Result<Vec<_>, _>>()?;

    safetensors::serialize_to_file(views, &None, path)?;
    debug!("saved {} tensors to {}", state.len(), path.display());
    Ok(())
}

/// Loads a checkpoint into `model`, all-or-nothing.
///
/// # Returns
/// The model carrying the checkpoint's parameters and buffers.
pub fn load_model<M: Model>(
    path: &Path,
    layout: CheckpointLayout,
    mut model: M,
) -> Result<M, CheckpointErr> {
    let state = load_checkpoint(path, layout)?;
    model.load_state_dict(&state)?;
    Ok(model)
}
