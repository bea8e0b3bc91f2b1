use thiserror::Error;

/// Errors raised while validating a backbone configuration or composing layers.
///
/// Shape errors inside Burn itself are not wrapped here; they surface from the
/// framework unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("composition of an empty sequence is not supported")]
    EmptyComposition,
    #[error("backbone needs at least one stage")]
    NoStages,
    #[error("in_channels must be non-zero")]
    ZeroInputChannels,
    #[error("stem_filters must be non-zero")]
    ZeroStemFilters,
    #[error("stage {stage} has zero filters")]
    ZeroFilters { stage: usize },
    #[error("stage {stage} has {filters} filters; residual blocks need at least 2")]
    TooFewFilters { stage: usize, filters: usize },
    #[error("{name} must be odd and non-zero, got {size}")]
    InvalidKernel { name: &'static str, size: usize },
    #[error("weight decay must be finite and non-negative, got {0}")]
    InvalidWeightDecay(f64),
    #[error("no feature stages selected")]
    NoFeatures,
    #[error("feature stage {index} out of range for {stages} stages")]
    FeatureOutOfRange { index: usize, stages: usize },
    #[error("feature stages must be strictly increasing, got {0:?}")]
    UnorderedFeatures(Vec<usize>),
}
