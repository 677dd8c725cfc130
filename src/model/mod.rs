pub mod layers;
pub mod load;
pub mod v1;

pub use v1::{EegNetV1, EegNetV1Config};

use crate::{
    config::screen_keys,
    error::{self, Error},
    helper::squeeze_final_output,
    signal::{ChannelInfo, SignalArgs, SignalParams},
};

use layers::{
    probe_sequence, Activation, ActivationConfig, BatchNorm2d, BatchNorm2dConfig,
    ConstrainedConv2d, ConstrainedConv2dConfig, ConstrainedLinear, ConstrainedLinearConfig,
    PoolMode, Pool2d, ShapeProbe,
};

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig},
    tensor::{backend::Backend, Tensor},
};
use tracing::{debug, warn};

/// Renames from older checkpoints, whose classifier lived at the top level, to the current
/// parameter names.
pub const LEGACY_MAPPING: [(&str, &str); 2] = [
    ("conv_classifier.weight", "final_layer.conv_classifier.weight"),
    ("conv_classifier.bias", "final_layer.conv_classifier.bias"),
];

#[derive(Config, Debug, PartialEq)]
pub enum FinalConvLength {
    /// Span whatever time extent the feature layers leave.
    Auto,
    Fixed(usize),
}

#[derive(Config, Debug)]
pub struct EegNetV4Config {
    pub n_chans: Option<usize>,
    pub n_outputs: Option<usize>,
    pub n_times: Option<usize>,
    pub chs_info: Option<Vec<ChannelInfo>>,
    pub input_window_seconds: Option<f64>,
    pub sfreq: Option<f64>,
    #[config(default = "FinalConvLength::Auto")]
    pub final_conv_length: FinalConvLength,
    #[config(default = "PoolMode::Mean")]
    pub pool_mode: PoolMode,
    /// Temporal filters.
    #[config(default = 8)]
    pub f1: usize,
    /// Spatial filters per temporal filter.
    #[config(default = 2)]
    pub d: usize,
    /// Pointwise filters, `f1 * d` when unset.
    pub f2: Option<usize>,
    #[config(default = 64)]
    pub kernel_length: usize,
    #[config(default = 16)]
    pub depthwise_kernel_length: usize,
    #[config(default = 4)]
    pub pool1_kernel_size: usize,
    #[config(default = 8)]
    pub pool2_kernel_size: usize,
    #[config(default = 1.0)]
    pub conv_spatial_max_norm: f64,
    #[config(default = "ActivationConfig::Elu")]
    pub activation: ActivationConfig,
    #[config(default = 0.01)]
    pub batch_norm_momentum: f64,
    #[config(default = true)]
    pub batch_norm_affine: bool,
    #[config(default = 1e-3)]
    pub batch_norm_eps: f64,
    #[config(default = 0.25)]
    pub drop_prob: f64,
    #[config(default = false)]
    pub final_layer_with_constraint: bool,
    #[config(default = 0.25)]
    pub norm_rate: f64,
}

const V4_KEYS: [&str; 23] = [
    "n_chans",
    "n_outputs",
    "n_times",
    "chs_info",
    "input_window_seconds",
    "sfreq",
    "final_conv_length",
    "pool_mode",
    "f1",
    "d",
    "f2",
    "kernel_length",
    "depthwise_kernel_length",
    "pool1_kernel_size",
    "pool2_kernel_size",
    "conv_spatial_max_norm",
    "activation",
    "batch_norm_momentum",
    "batch_norm_affine",
    "batch_norm_eps",
    "drop_prob",
    "final_layer_with_constraint",
    "norm_rate",
];

impl EegNetV4Config {
    pub fn for_signal(n_chans: usize, n_outputs: usize, n_times: usize) -> Self {
        Self::new()
            .with_n_chans(Some(n_chans))
            .with_n_outputs(Some(n_outputs))
            .with_n_times(Some(n_times))
    }

    /// Parses a JSON argument object, rejecting keys the model does not know.
    ///
    /// `third_kernel_size`, a leftover from the first EEGNet, is tolerated with a warning.
    pub fn from_json_str(json: &str) -> error::Result<Self> {
        let value = screen_keys(json, &V4_KEYS, &["third_kernel_size"])?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn n_filters_separable(&self) -> usize {
        self.f2.unwrap_or(self.f1 * self.d)
    }

    pub fn validate(&self) -> error::Result<()> {
        let positive = [
            ("f1", self.f1),
            ("d", self.d),
            ("f2", self.n_filters_separable()),
            ("kernel_length", self.kernel_length),
            ("depthwise_kernel_length", self.depthwise_kernel_length),
            ("pool1_kernel_size", self.pool1_kernel_size),
            ("pool2_kernel_size", self.pool2_kernel_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::invalid(name, "must be positive"));
            }
        }

        if self.final_conv_length == FinalConvLength::Fixed(0) {
            return Err(Error::invalid("final_conv_length", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.drop_prob) {
            return Err(Error::invalid(
                "drop_prob",
                format!("{} is outside [0, 1]", self.drop_prob),
            ));
        }
        if !(0.0..=1.0).contains(&self.batch_norm_momentum) {
            return Err(Error::invalid(
                "batch_norm_momentum",
                format!("{} is outside [0, 1]", self.batch_norm_momentum),
            ));
        }

        let strictly_positive = [
            ("batch_norm_eps", self.batch_norm_eps),
            ("conv_spatial_max_norm", self.conv_spatial_max_norm),
            ("norm_rate", self.norm_rate),
        ];
        for (name, value) in strictly_positive {
            if !(value > 0.0) {
                return Err(Error::invalid(name, format!("{} must be positive", value)));
            }
        }

        Ok(())
    }

    pub fn signal(&self) -> error::Result<SignalParams> {
        SignalArgs {
            n_chans: self.n_chans,
            n_outputs: self.n_outputs,
            n_times: self.n_times,
            chs_info: self.chs_info.as_deref(),
            input_window_seconds: self.input_window_seconds,
            sfreq: self.sfreq,
        }
        .resolve()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<EegNetV4<B>> {
        self.validate()?;
        let SignalParams {
            n_chans,
            n_outputs,
            n_times,
        } = self.signal()?;

        if !self.final_layer_with_constraint {
            warn!(
                "`final_layer_with_constraint = false` is deprecated and will be removed in a \
                 future release; prefer the constrained linear head."
            );
        }

        let f1 = self.f1;
        let f1d = self.f1 * self.d;
        let f2 = self.n_filters_separable();

        let batch_norm = |n_features: usize| -> BatchNorm2d<B> {
            BatchNorm2dConfig::new(n_features)
                .with_momentum(self.batch_norm_momentum)
                .with_epsilon(self.batch_norm_eps)
                .with_affine(self.batch_norm_affine)
                .init::<B>(device)
        };

        let conv_temporal = ConstrainedConv2dConfig::new([1, f1], [1, self.kernel_length])
            .with_padding([0, self.kernel_length / 2])
            .with_bias(false)
            .init::<B>(device);
        let bnorm_temporal = batch_norm(f1);
        let conv_spatial = ConstrainedConv2dConfig::new([f1, f1d], [n_chans, 1])
            .with_groups(f1)
            .with_bias(false)
            .with_max_norm(Some(self.conv_spatial_max_norm))
            .init::<B>(device);
        let bnorm_1 = batch_norm(f1d);
        let elu_1 = self.activation.init();
        let pool_1 = Pool2d::new(
            &self.pool_mode,
            [1, self.pool1_kernel_size],
            [1, self.pool1_kernel_size],
        );
        let drop_1 = DropoutConfig::new(self.drop_prob).init();

        let conv_separable_depth =
            ConstrainedConv2dConfig::new([f1d, f1d], [1, self.depthwise_kernel_length])
                .with_padding([0, self.depthwise_kernel_length / 2])
                .with_groups(f1d)
                .with_bias(false)
                .init::<B>(device);
        let conv_separable_point = ConstrainedConv2dConfig::new([f1d, f2], [1, 1])
            .with_bias(false)
            .init::<B>(device);
        let bnorm_2 = batch_norm(f2);
        let elu_2 = self.activation.init();
        let pool_2 = Pool2d::new(
            &self.pool_mode,
            [1, self.pool2_kernel_size],
            [1, self.pool2_kernel_size],
        );
        let drop_2 = DropoutConfig::new(self.drop_prob).init();

        let probed = probe_sequence(
            [1, 1, n_chans, n_times],
            &[
                ("conv_temporal", &conv_temporal as &dyn ShapeProbe),
                ("conv_spatial", &conv_spatial as &dyn ShapeProbe),
                ("pool_1", &pool_1 as &dyn ShapeProbe),
                ("conv_separable_depth", &conv_separable_depth as &dyn ShapeProbe),
                ("conv_separable_point", &conv_separable_point as &dyn ShapeProbe),
                ("pool_2", &pool_2 as &dyn ShapeProbe),
            ],
        )
        .map_err(|(layer, shape)| Error::InputTooShort {
            n_chans,
            n_times,
            layer,
            shape,
        })?;

        let [_, _, n_out_virtual_chans, n_out_time] = probed;
        let final_conv_length = resolve_final_length(&self.final_conv_length, n_out_time)?;

        let final_layer = if self.final_layer_with_constraint {
            if final_conv_length != n_out_time {
                return Err(Error::invalid(
                    "final_conv_length",
                    format!(
                        "the linear head flattens all {} remaining time steps, got {}",
                        n_out_time, final_conv_length
                    ),
                ));
            }

            ClassifierHead::linear(
                ConstrainedLinearConfig::new(
                    f2 * n_out_virtual_chans * final_conv_length,
                    n_outputs,
                )
                .with_max_norm(Some(self.norm_rate))
                .init::<B>(device),
            )
        } else {
            ClassifierHead::conv(
                ConstrainedConv2dConfig::new(
                    [f2, n_outputs],
                    [n_out_virtual_chans, final_conv_length],
                )
                .init::<B>(device),
            )
        };

        debug!(
            "EEGNetv4 for {} channels x {} samples: features {:?}, final conv length {}",
            n_chans, n_times, probed, final_conv_length
        );

        Ok(EegNetV4 {
            conv_temporal,
            bnorm_temporal,
            conv_spatial,
            bnorm_1,
            elu_1,
            pool_1,
            drop_1,
            conv_separable_depth,
            conv_separable_point,
            bnorm_2,
            elu_2,
            pool_2,
            drop_2,
            final_layer,
            n_chans,
            n_outputs,
            n_times,
            final_conv_length,
        })
    }
}

pub(crate) fn resolve_final_length(requested: &FinalConvLength, n_out_time: usize) -> error::Result<usize> {
    match *requested {
        FinalConvLength::Auto => Ok(n_out_time),
        FinalConvLength::Fixed(n) if n <= n_out_time => Ok(n),
        FinalConvLength::Fixed(n) => Err(Error::invalid(
            "final_conv_length",
            format!(
                "{} exceeds the {} time steps left by the feature layers",
                n, n_out_time
            ),
        )),
    }
}

/// EEGNet v4 (Lawhern et al., 2018): a compact convolutional network for EEG decoding.
#[derive(Module, Debug)]
pub struct EegNetV4<B: Backend> {
    conv_temporal: ConstrainedConv2d<B>,
    bnorm_temporal: BatchNorm2d<B>,
    conv_spatial: ConstrainedConv2d<B>,
    bnorm_1: BatchNorm2d<B>,
    elu_1: Activation,
    pool_1: Pool2d,
    drop_1: Dropout,
    conv_separable_depth: ConstrainedConv2d<B>,
    conv_separable_point: ConstrainedConv2d<B>,
    bnorm_2: BatchNorm2d<B>,
    elu_2: Activation,
    pool_2: Pool2d,
    drop_2: Dropout,
    final_layer: ClassifierHead<B>,
    n_chans: usize,
    n_outputs: usize,
    n_times: usize,
    final_conv_length: usize,
}

impl<B: Backend> EegNetV4<B> {
    /// `[batch, n_chans, n_times]` -> `[batch, n_outputs]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        collapse_predictions(self.forward_dense(x))
    }

    /// Accepts input with a trailing unit dimension, `[batch, n_chans, n_times, 1]`.
    pub fn forward_4d(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(drop_trailing_unit(x))
    }

    /// `[batch, n_chans, time]` -> `[batch, n_outputs, n_preds]`
    ///
    /// With a fixed final length shorter than the feature extent, or an input longer than
    /// the one the model was sized for, the classifier slides along time and yields one
    /// prediction per position.
    pub fn forward_dense(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n_batch, n_chans, n_times] = x.dims();

        assert!(
            n_chans == self.n_chans,
            "Input has {} channels, the model expects {}.",
            n_chans,
            self.n_chans
        );

        let x = x.reshape([n_batch, 1, n_chans, n_times]);
        self.final_layer.forward(self.forward_features(x))
    }

    /// Runs every layer before the classifier on `[batch, 1, n_chans, time]` input.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_temporal.forward(x);
        let x = self.bnorm_temporal.forward(x);
        let x = self.conv_spatial.forward(x);
        let x = self.bnorm_1.forward(x);
        let x = self.elu_1.forward(x);
        let x = self.pool_1.forward(x);
        let x = self.drop_1.forward(x);

        let x = self.conv_separable_depth.forward(x);
        let x = self.conv_separable_point.forward(x);
        let x = self.bnorm_2.forward(x);
        let x = self.elu_2.forward(x);
        let x = self.pool_2.forward(x);
        self.drop_2.forward(x)
    }

    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    pub fn final_conv_length(&self) -> usize {
        self.final_conv_length
    }

    pub fn final_layer(&self) -> &ClassifierHead<B> {
        &self.final_layer
    }

    /// Projects the max-norm constrained weights (`conv_spatial` and the linear head) back
    /// under their caps. Call after each optimizer step.
    pub fn apply_max_norm(self) -> Self {
        Self {
            conv_spatial: self.conv_spatial.apply_max_norm(),
            final_layer: self.final_layer.apply_max_norm(),
            ..self
        }
    }

    pub fn legacy_mapping() -> &'static [(&'static str, &'static str)] {
        &LEGACY_MAPPING
    }
}

/// Classification head: a convolution spanning the remaining feature map, or a flattening
/// linear layer. Exactly one of the two is present.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    conv_classifier: Option<ConstrainedConv2d<B>>,
    linearconstraint: Option<ConstrainedLinear<B>>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn conv(conv_classifier: ConstrainedConv2d<B>) -> Self {
        Self {
            conv_classifier: Some(conv_classifier),
            linearconstraint: None,
        }
    }

    pub fn linear(linearconstraint: ConstrainedLinear<B>) -> Self {
        Self {
            conv_classifier: None,
            linearconstraint: Some(linearconstraint),
        }
    }

    pub fn conv_classifier(&self) -> Option<&ConstrainedConv2d<B>> {
        self.conv_classifier.as_ref()
    }

    pub fn linearconstraint(&self) -> Option<&ConstrainedLinear<B>> {
        self.linearconstraint.as_ref()
    }

    pub fn apply_max_norm(self) -> Self {
        Self {
            conv_classifier: self.conv_classifier.map(ConstrainedConv2d::apply_max_norm),
            linearconstraint: self.linearconstraint.map(ConstrainedLinear::apply_max_norm),
        }
    }

    /// `[batch, features, height, time]` -> `[batch, n_outputs, n_preds]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        if let Some(conv) = &self.conv_classifier {
            // back to (batch, outputs, time, 1)
            let x = conv.forward(x).swap_dims(2, 3);
            return squeeze_final_output(x);
        }

        let linear = self
            .linearconstraint
            .as_ref()
            .expect("Classifier head must hold a convolution or a linear layer.");

        let [n_batch, n_features, height, width] = x.dims();
        let x = x.reshape([n_batch, n_features * height * width]);
        linear.forward(x).unsqueeze_dim(2)
    }
}

pub(crate) fn collapse_predictions<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    let [n_batch, n_outputs, n_preds] = x.dims();

    assert!(
        n_preds == 1,
        "Model produced {} predictions per example; use forward_dense for cropped decoding.",
        n_preds
    );

    x.reshape([n_batch, n_outputs])
}

pub(crate) fn drop_trailing_unit<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [n_batch, n_chans, n_times, n_last] = x.dims();

    assert!(
        n_last == 1,
        "Input must be [batch, channels, time] or [batch, channels, time, 1], got trailing size {}.",
        n_last
    );

    x.reshape([n_batch, n_chans, n_times])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::capture_warnings;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::Param;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn model(config: &EegNetV4Config) -> EegNetV4<TestBackend> {
        config.init(&Default::default()).unwrap()
    }

    #[test]
    fn auto_length_collapses_time() {
        let net = model(&EegNetV4Config::for_signal(22, 4, 1125));

        assert_eq!(net.final_conv_length(), 35);

        let conv = net.final_layer().conv_classifier().unwrap();
        assert_eq!(conv.weight_dims(), [4, 16, 1, 35]);
        assert!(net.final_layer().linearconstraint().is_none());
    }

    #[test]
    fn output_is_batch_by_classes() {
        let device = Default::default();
        let net = model(&EegNetV4Config::for_signal(22, 4, 1125));

        let x = Tensor::<TestBackend, 3>::random([3, 22, 1125], Distribution::Default, &device);
        assert_eq!(net.forward(x).dims(), [3, 4]);
    }

    #[test]
    fn trailing_unit_dimension_is_accepted() {
        let device = Default::default();
        let net = model(&EegNetV4Config::for_signal(8, 2, 256));

        let x = Tensor::<TestBackend, 4>::zeros([2, 8, 256, 1], &device);
        assert_eq!(net.forward_4d(x).dims(), [2, 2]);
    }

    #[test]
    fn linear_head() {
        let device = Default::default();
        let config = EegNetV4Config::for_signal(22, 4, 1125).with_final_layer_with_constraint(true);
        let net = model(&config);

        let linear = net.final_layer().linearconstraint().unwrap();
        assert_eq!(linear.weight_dims(), [4, 16 * 35]);
        assert!(net.final_layer().conv_classifier().is_none());

        let x = Tensor::<TestBackend, 3>::zeros([2, 22, 1125], &device);
        assert_eq!(net.forward(x).dims(), [2, 4]);
    }

    #[test]
    fn max_pooling_and_custom_filters() {
        let device = Default::default();
        let config = EegNetV4Config::for_signal(4, 3, 500)
            .with_pool_mode(PoolMode::Max)
            .with_f1(4)
            .with_d(3)
            .with_f2(Some(10))
            .with_kernel_length(32)
            .with_activation(ActivationConfig::Relu);
        let net = model(&config);

        // 500 -> 501 -> 125 -> 126 -> 15
        assert_eq!(net.final_conv_length(), 15);
        assert_eq!(
            net.final_layer().conv_classifier().unwrap().weight_dims(),
            [3, 10, 1, 15]
        );

        let x = Tensor::<TestBackend, 3>::zeros([1, 4, 500], &device);
        assert_eq!(net.forward(x).dims(), [1, 3]);
    }

    #[test]
    fn probe_agrees_with_forward() {
        let device = Default::default();
        let net = model(&EegNetV4Config::for_signal(5, 2, 300));

        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 5, 300], &device);
        let [_, channels, height, width] = net.forward_features(x).dims();

        assert_eq!([channels, height, width], [16, 1, net.final_conv_length()]);
    }

    #[test]
    fn fixed_length_gives_dense_predictions() {
        let device = Default::default();
        let config = EegNetV4Config::for_signal(22, 4, 1125)
            .with_final_conv_length(FinalConvLength::Fixed(30));
        let net = model(&config);

        let x = Tensor::<TestBackend, 3>::zeros([2, 22, 1125], &device);
        assert_eq!(net.forward_dense(x).dims(), [2, 4, 6]);
    }

    #[test]
    fn fixed_length_longer_than_features_is_rejected() {
        let config = EegNetV4Config::for_signal(22, 4, 1125)
            .with_final_conv_length(FinalConvLength::Fixed(36));
        let err = config.init::<TestBackend>(&Default::default()).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidHyperparameter {
                name: "final_conv_length",
                ..
            }
        ));
    }

    #[test]
    fn linear_head_requires_full_length() {
        let config = EegNetV4Config::for_signal(22, 4, 1125)
            .with_final_layer_with_constraint(true)
            .with_final_conv_length(FinalConvLength::Fixed(30));

        assert!(config.init::<TestBackend>(&Default::default()).is_err());
    }

    #[test]
    fn short_input_is_reported() {
        let err = EegNetV4Config::for_signal(22, 4, 20)
            .init::<TestBackend>(&Default::default())
            .unwrap_err();

        match err {
            Error::InputTooShort { layer, .. } => assert_eq!(layer, "pool_2"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let device = Default::default();

        let cases = [
            EegNetV4Config::for_signal(2, 2, 200).with_f1(0),
            EegNetV4Config::for_signal(2, 2, 200).with_drop_prob(1.01),
            EegNetV4Config::for_signal(2, 2, 200).with_drop_prob(-0.1),
            EegNetV4Config::for_signal(2, 2, 200).with_batch_norm_eps(0.0),
            EegNetV4Config::for_signal(2, 2, 200).with_norm_rate(-1.0),
            EegNetV4Config::for_signal(2, 2, 200).with_final_conv_length(FinalConvLength::Fixed(0)),
        ];

        for config in cases {
            assert!(config.init::<TestBackend>(&device).is_err());
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let config = EegNetV4Config::for_signal(22, 4, 1125);
        let a = model(&config);
        let b = model(&config);

        assert_eq!(a.final_conv_length(), b.final_conv_length());
        assert_eq!(a.num_params(), b.num_params());
    }

    #[test]
    fn json_rejects_unknown_arguments() {
        let err = EegNetV4Config::from_json_str(r#"{"n_chans": 3, "n_filters": 8}"#).unwrap_err();

        match err {
            Error::UnexpectedKeys(keys) => assert_eq!(keys, vec!["n_filters".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn json_tolerates_third_kernel_size() {
        let config = EegNetV4Config::for_signal(3, 2, 256).with_f1(4);
        let mut value = serde_json::to_value(&config).unwrap();
        value["third_kernel_size"] = serde_json::json!([8, 4]);

        let parsed = EegNetV4Config::from_json_str(&value.to_string()).unwrap();
        assert_eq!(parsed.f1, 4);
        assert_eq!(parsed.n_chans, Some(3));
    }

    #[test]
    fn legacy_mapping_targets_final_layer() {
        for (old, new) in EegNetV4::<TestBackend>::legacy_mapping() {
            assert_eq!(*new, format!("final_layer.{}", old));
        }
    }

    #[test]
    fn trains_under_autodiff() {
        type TrainBackend = Autodiff<TestBackend>;

        let device = Default::default();
        let net: EegNetV4<TrainBackend> = EegNetV4Config::for_signal(4, 2, 128)
            .with_kernel_length(16)
            .init(&device)
            .unwrap();

        let x = Tensor::<TrainBackend, 3>::random([4, 4, 128], Distribution::Default, &device);
        let loss = net.forward(x).powf_scalar(2.0).mean();
        let grads = loss.backward();

        let conv = net.final_layer().conv_classifier().unwrap();
        assert!(conv.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn dropout_of_one_is_accepted() {
        let device = Default::default();
        let net = model(&EegNetV4Config::for_signal(2, 2, 200).with_drop_prob(1.0));

        let x = Tensor::<TestBackend, 3>::ones([1, 2, 200], &device);
        assert_eq!(net.forward(x).dims(), [1, 2]);
    }

    #[test]
    fn unconstrained_head_warns_once() {
        let config = EegNetV4Config::for_signal(3, 2, 256);
        let (net, warnings) = capture_warnings(|| config.init::<TestBackend>(&Default::default()));

        assert!(net.is_ok());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("final_layer_with_constraint"));
    }

    #[test]
    fn constrained_head_does_not_warn() {
        let config = EegNetV4Config::for_signal(3, 2, 256).with_final_layer_with_constraint(true);
        let (net, warnings) = capture_warnings(|| config.init::<TestBackend>(&Default::default()));

        assert!(net.is_ok());
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn third_kernel_size_warns_once() {
        let json = r#"{"n_chans": 3, "n_outputs": 2, "n_times": 256, "third_kernel_size": [8, 4]}"#;
        let (config, warnings) = capture_warnings(|| EegNetV4Config::from_json_str(json));

        assert!(config.is_ok());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("third_kernel_size"));
    }

    #[test]
    fn apply_max_norm_caps_constrained_layers() {
        let device = Default::default();
        let config = EegNetV4Config::for_signal(4, 2, 128)
            .with_kernel_length(16)
            .with_final_layer_with_constraint(true);
        let mut net = model(&config);

        let spatial = net.conv_spatial.weight_dims();
        net.conv_spatial.weight = Param::from_tensor(Tensor::ones(spatial, &device).mul_scalar(5.0));

        let net = net.apply_max_norm();

        let spatial_norms = net
            .conv_spatial
            .weight
            .val()
            .reshape([spatial[0], spatial[1] * spatial[2] * spatial[3]])
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt();
        assert!(crate::test_utils::max_abs(spatial_norms) <= 1.0 + 1e-5);

        let linear = net.final_layer().linearconstraint().unwrap();
        let [n_out, n_in] = linear.weight_dims();
        let head_norms = linear
            .weight
            .val()
            .reshape([n_out, n_in])
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt();
        assert!(crate::test_utils::max_abs(head_norms) <= 0.25 + 1e-5);
    }
}
