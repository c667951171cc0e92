//! Checkpoints: every learned tensor of the model in one safetensors file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::{debug, info, warn};

/// File name inside a checkpoint directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";

pub fn weights_path<P: AsRef<Path>>(dir: P) -> PathBuf {
    dir.as_ref().join(WEIGHTS_FILE)
}

/// Write all variables to `<dir>/model.safetensors`.
pub fn save<P: AsRef<Path>>(varmap: &VarMap, dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;
    let path = weights_path(dir);
    varmap
        .save(&path)
        .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
    info!(path = %path.display(), "checkpoint saved");
    Ok(path)
}

/// Overwrite the variables of an already built model from `<dir>/model.safetensors`.
pub fn load<P: AsRef<Path>>(varmap: &mut VarMap, dir: P) -> Result<()> {
    let path = weights_path(dir);
    varmap
        .load(&path)
        .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
    info!(path = %path.display(), "checkpoint loaded");
    Ok(())
}

/// Copy matching tensors from a pretrained weight file into a freshly built
/// model. Returns how many variables were initialised.
///
/// `.bin`, `.pt` and `.pth` files are read as PyTorch pickles, anything else
/// as safetensors. Variables with no counterpart keep their initial values.
pub fn init_from_pretrained<P: AsRef<Path>>(
    varmap: &VarMap,
    file: P,
    device: &Device,
) -> Result<usize> {
    let file = file.as_ref();
    let tensors = read_weights(file, device)?;

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("variable map lock poisoned"))?;

    let mut loaded = 0;
    for (name, var) in vars.iter() {
        let Some(source) = candidate_names(name)
            .iter()
            .find_map(|candidate| tensors.get(candidate))
        else {
            debug!(var = %name, "no pretrained tensor");
            continue;
        };
        if source.dims() != var.dims() {
            warn!(
                var = %name,
                expected = ?var.dims(),
                found = ?source.dims(),
                "pretrained tensor shape mismatch, skipped"
            );
            continue;
        }
        var.set(&source.to_dtype(var.dtype())?.to_device(device)?)?;
        loaded += 1;
    }

    info!(
        path = %file.display(),
        loaded,
        total = vars.len(),
        "initialised from pretrained weights"
    );
    Ok(loaded)
}

fn read_weights(file: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let pickle = matches!(
        file.extension().and_then(|e| e.to_str()),
        Some("bin" | "pt" | "pth")
    );
    let tensors = if pickle {
        candle_core::pickle::read_all(file)
            .with_context(|| format!("failed to read pytorch weights {}", file.display()))?
            .into_iter()
            .collect()
    } else {
        candle_core::safetensors::load(file, device)
            .with_context(|| format!("failed to read safetensors {}", file.display()))?
    };
    Ok(tensors)
}

/// Names a variable may carry in a pretrained file: as is, without the
/// `bert.` prefix, and with the old `gamma`/`beta` layer-norm names.
fn candidate_names(name: &str) -> Vec<String> {
    let mut bases = vec![name.to_string()];
    if let Some(stripped) = name.strip_prefix("bert.") {
        bases.push(stripped.to_string());
    }

    let mut names = bases.clone();
    for base in &bases {
        if let Some(prefix) = base.strip_suffix("LayerNorm.weight") {
            names.push(format!("{prefix}LayerNorm.gamma"));
        } else if let Some(prefix) = base.strip_suffix("LayerNorm.bias") {
            names.push(format!("{prefix}LayerNorm.beta"));
        }
    }
    names
}
