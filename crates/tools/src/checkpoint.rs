//! Backbone weights on disk, using Burn's full-precision binary records.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use darknet_models::{BackboneConfig, CspDarknet2d, CspDarknet3d, ModelError};
use thiserror::Error;

const CHECKPOINT_EXTENSION: &str = "bin";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to create checkpoint directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("checkpoint record error: {0}")]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Path the recorder actually writes: the extension is always `.bin`.
pub fn checkpoint_path(path: &Path) -> PathBuf {
    path.with_extension(CHECKPOINT_EXTENSION)
}

/// Save any backbone module; returns the written path.
pub fn save_backbone<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
) -> Result<PathBuf, CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.save_file(path.to_path_buf(), &recorder)?;
    let written = checkpoint_path(path);
    tracing::info!(path = %written.display(), "saved backbone checkpoint");
    Ok(written)
}

fn ensure_exists(path: &Path) -> Result<(), CheckpointError> {
    if checkpoint_path(path).exists() {
        Ok(())
    } else {
        Err(CheckpointError::Missing(checkpoint_path(path)))
    }
}

pub fn load_backbone_2d<B: Backend>(
    cfg: &BackboneConfig,
    path: &Path,
    device: &B::Device,
) -> Result<CspDarknet2d<B>, CheckpointError> {
    ensure_exists(path)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = CspDarknet2d::<B>::new(cfg, device)?.load_file(
        path.to_path_buf(),
        &recorder,
        device,
    )?;
    tracing::info!(path = %path.display(), "loaded 2d backbone checkpoint");
    Ok(model)
}

pub fn load_backbone_3d<B: Backend>(
    cfg: &BackboneConfig,
    path: &Path,
    device: &B::Device,
) -> Result<CspDarknet3d<B>, CheckpointError> {
    ensure_exists(path)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = CspDarknet3d::<B>::new(cfg, device)?.load_file(
        path.to_path_buf(),
        &recorder,
        device,
    )?;
    tracing::info!(path = %path.display(), "loaded 3d backbone checkpoint");
    Ok(model)
}
