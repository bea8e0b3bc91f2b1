use burn_ndarray::NdArray;
use darknet_models::{BackboneConfig, StageConfig};
use darknet_tools::config::{ConfigError, Dims, ProbeConfig};
use darknet_tools::probe::{probe, probe_backbone, Backbone, ProbeError};

type TestBackend = NdArray<f32>;

fn small(dims: Dims) -> ProbeConfig {
    let mut cfg = ProbeConfig::for_dims(dims);
    cfg.backbone = BackboneConfig {
        in_channels: cfg.backbone.in_channels,
        stem_filters: 4,
        stem_kernel: 3,
        kernel1: 1,
        kernel2: 3,
        weight_decay: 5e-4,
        stages: vec![
            StageConfig::wide(4, 1),
            StageConfig::new(8, 1),
            StageConfig::new(16, 1),
        ],
        feature_stages: vec![1, 2],
    };
    cfg.input_shape = match dims {
        Dims::Image => vec![2, 32, 24],
        Dims::Volume => vec![1, 16, 16, 8],
    };
    cfg
}

#[test]
fn probe_reports_image_features() {
    let device = Default::default();
    let report = probe::<TestBackend>(&small(Dims::Image), &device).unwrap();
    assert_eq!(report.input_shape, vec![2, 3, 32, 24]);
    let shapes: Vec<_> = report.features.iter().map(|f| f.shape.clone()).collect();
    assert_eq!(shapes, vec![vec![2, 8, 8, 6], vec![2, 16, 4, 3]]);
    assert!(report.num_params > 0);
    assert!(report.l2_penalty > 0.0);
    assert!(report.to_string().contains("feat2"));
}

#[test]
fn probe_reports_volume_features() {
    let device = Default::default();
    let report = probe::<TestBackend>(&small(Dims::Volume), &device).unwrap();
    let names: Vec<_> = report.features.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["feat1", "feat2"]);
    assert_eq!(report.features[1].shape, vec![1, 16, 2, 2, 1]);
    assert_eq!(report.features[1].stride, 8);
}

#[test]
fn probe_rejects_wrong_rank_input() {
    let device = Default::default();
    let mut cfg = small(Dims::Image);
    cfg.input_shape = vec![1, 16, 16, 16];
    assert!(matches!(
        probe::<TestBackend>(&cfg, &device),
        Err(ProbeError::Config(_))
    ));
}

#[test]
fn rejects_input_smaller_than_deepest_stride() {
    let device = Default::default();
    let mut cfg = small(Dims::Image);
    // Deepest stride is 8: stages see 4, 2, then 1 which cannot fit the 3-wide downsample.
    cfg.input_shape = vec![1, 4, 4];
    assert!(matches!(
        probe::<TestBackend>(&cfg, &device),
        Err(ProbeError::Config(ConfigError::InputTooSmall {
            extent: 4,
            stage: 2,
            kernel: 3
        }))
    ));

    // Odd extents that still reach the deepest stage are accepted and round down.
    cfg.input_shape = vec![1, 9, 8];
    let report = probe::<TestBackend>(&cfg, &device).unwrap();
    assert_eq!(report.features[1].shape, vec![1, 16, 1, 1]);
}

#[test]
fn saved_weights_match_the_reported_ones() {
    let device = Default::default();
    let cfg = small(Dims::Image);
    let backbone = Backbone::<TestBackend>::build(&cfg, &device).unwrap();
    let first = probe_backbone(&cfg, &backbone, &device).unwrap();
    let second = probe_backbone(&cfg, &backbone, &device).unwrap();
    assert_eq!(first.l2_penalty, second.l2_penalty);
    assert_eq!(first.num_params, backbone.num_params());

    let dir = tempfile::tempdir().unwrap();
    let written = backbone.save(&dir.path().join("probed")).unwrap();
    let mut reloaded = cfg.clone();
    reloaded.checkpoint = Some(written);
    let report = probe::<TestBackend>(&reloaded, &device).unwrap();
    assert!((report.l2_penalty - first.l2_penalty).abs() < 1e-6);
}

#[test]
fn built_variant_must_match_config() {
    let device = Default::default();
    let backbone = Backbone::<TestBackend>::build(&small(Dims::Volume), &device).unwrap();
    assert!(matches!(
        probe_backbone(&small(Dims::Image), &backbone, &device),
        Err(ProbeError::DimsMismatch {
            config: Dims::Image,
            backbone: Dims::Volume
        })
    ));
}
