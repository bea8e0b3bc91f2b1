//! Tooling around the CSPDarknet backbones: TOML configuration, shape probing,
//! and checkpoint persistence. The `backbone_probe` binary wires these together.

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod probe;

/// Backend used by the tools (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type ProbeBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type ProbeBackend = burn_ndarray::NdArray<f32>;

pub use checkpoint::{load_backbone_2d, load_backbone_3d, save_backbone, CheckpointError};
pub use config::{ConfigError, Dims, ProbeConfig};
pub use probe::{probe, probe_backbone, Backbone, FeatureReport, ProbeError, ProbeReport};

pub mod prelude {
    pub use crate::checkpoint::{load_backbone_2d, load_backbone_3d, save_backbone};
    pub use crate::config::{Dims, ProbeConfig};
    pub use crate::probe::{probe, probe_backbone, Backbone, ProbeReport};
    pub use crate::ProbeBackend;
}
