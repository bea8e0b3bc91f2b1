use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use darknet_models::prelude::*;

type TestBackend = NdArray<f32>;

fn small_2d() -> BackboneConfig {
    BackboneConfig {
        in_channels: 3,
        stem_filters: 8,
        stem_kernel: 3,
        kernel1: 1,
        kernel2: 3,
        weight_decay: 5e-4,
        stages: vec![
            StageConfig::wide(8, 1),
            StageConfig::new(16, 1),
            StageConfig::new(32, 1),
        ],
        feature_stages: vec![1, 2],
    }
}

fn small_3d() -> BackboneConfig {
    BackboneConfig {
        in_channels: 1,
        stem_filters: 4,
        stem_kernel: 1,
        kernel1: 1,
        kernel2: 3,
        weight_decay: 5e-4,
        stages: vec![
            StageConfig::wide(4, 1),
            StageConfig::new(8, 1),
            StageConfig::new(8, 1),
        ],
        feature_stages: vec![1, 2],
    }
}

#[test]
fn forward_features_match_specs_2d() {
    let device = Default::default();
    let cfg = small_2d();
    let model = CspDarknet2d::<TestBackend>::new(&cfg, &device).unwrap();

    let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
    let features = model.forward_features(input);
    assert_eq!(features.names(), vec!["feat1", "feat2"]);

    for (map, spec) in features.iter().zip(model.feature_specs()) {
        assert_eq!(map.name, spec.name);
        assert_eq!(
            map.tensor.dims(),
            [2, spec.channels, 32 / spec.stride, 32 / spec.stride]
        );
    }
    assert_eq!(features.get("feat2").map(|t| t.dims()), Some([2, 32, 4, 4]));
}

#[test]
fn forward_returns_deepest_feature_2d() {
    let device = Default::default();
    let model = CspDarknet2d::<TestBackend>::new(&small_2d(), &device).unwrap();
    let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);

    let deepest = model.forward(input.clone());
    let features = model.forward_features(input).into_tensors();
    let last = features.last().cloned().unwrap();

    assert_eq!(deepest.dims(), [1, 32, 2, 2]);
    let a = deepest.into_data().to_vec::<f32>().unwrap();
    let b = last.into_data().to_vec::<f32>().unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-5);
    }
}

#[test]
fn stages_past_deepest_feature_are_skipped() {
    let device = Default::default();
    let mut cfg = small_2d();
    cfg.feature_stages = vec![0];
    let model = CspDarknet2d::<TestBackend>::new(&cfg, &device).unwrap();
    let out = model.forward(Tensor::zeros([1, 3, 16, 16], &device));
    assert_eq!(out.dims(), [1, 8, 8, 8]);
}

#[test]
fn odd_extents_round_down() {
    let device = Default::default();
    let model = CspDarknet2d::<TestBackend>::new(&small_2d(), &device).unwrap();
    let features = model.forward_features(Tensor::zeros([1, 3, 15, 17], &device));
    let dims: Vec<_> = features.iter().map(|m| m.tensor.dims()).collect();
    assert_eq!(dims, vec![[1, 16, 3, 4], [1, 32, 1, 2]]);
}

#[test]
fn forward_features_match_specs_3d() {
    let device = Default::default();
    let cfg = small_3d();
    let model = CspDarknet3d::<TestBackend>::new(&cfg, &device).unwrap();

    let input = Tensor::<TestBackend, 5>::zeros([1, 1, 16, 16, 8], &device);
    let features = model.forward_features(input.clone());
    let dims: Vec<_> = features.iter().map(|m| m.tensor.dims()).collect();
    assert_eq!(dims, vec![[1, 8, 4, 4, 2], [1, 8, 2, 2, 1]]);

    assert_eq!(model.forward(input).dims(), [1, 8, 2, 2, 1]);
}

#[test]
fn invalid_config_is_rejected_before_building() {
    let device = Default::default();
    let mut cfg = small_3d();
    cfg.stem_kernel = 2;
    let err = CspDarknet3d::<TestBackend>::new(&cfg, &device).unwrap_err();
    assert_eq!(
        err,
        ModelError::InvalidKernel {
            name: "stem_kernel",
            size: 2
        }
    );
}
