//! The first EEGNet (Lawhern et al., 2016), reimplemented from the paper description.
//!
//! Deprecated in favour of [`EegNetV4`](super::EegNetV4); kept so that older experiments
//! and checkpoints keep working.

use super::{
    collapse_predictions, drop_trailing_unit,
    layers::{
        probe_sequence, Activation, ActivationConfig, BatchNorm2d, BatchNorm2dConfig,
        ConstrainedConv2d, ConstrainedConv2dConfig, PoolMode, Pool2d, ShapeProbe,
    },
    resolve_final_length, ClassifierHead, FinalConvLength, LEGACY_MAPPING,
};
use crate::{
    config::screen_keys,
    error::{self, Error},
    signal::{ChannelInfo, SignalArgs, SignalParams},
};

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig},
    tensor::{backend::Backend, Tensor},
};
use tracing::{debug, warn};

const N_FILTERS_1: usize = 16;
const N_FILTERS_2: usize = 4;
const N_FILTERS_3: usize = 4;

#[derive(Config, Debug)]
pub struct EegNetV1Config {
    pub n_chans: Option<usize>,
    pub n_outputs: Option<usize>,
    pub n_times: Option<usize>,
    pub chs_info: Option<Vec<ChannelInfo>>,
    pub input_window_seconds: Option<f64>,
    pub sfreq: Option<f64>,
    #[config(default = "FinalConvLength::Auto")]
    pub final_conv_length: FinalConvLength,
    #[config(default = "PoolMode::Max")]
    pub pool_mode: PoolMode,
    #[config(default = "[2, 32]")]
    pub second_kernel_size: [usize; 2],
    #[config(default = "[8, 4]")]
    pub third_kernel_size: [usize; 2],
    #[config(default = 0.25)]
    pub drop_prob: f64,
    #[config(default = "ActivationConfig::Elu")]
    pub activation: ActivationConfig,
}

const V1_KEYS: [&str; 12] = [
    "n_chans",
    "n_outputs",
    "n_times",
    "chs_info",
    "input_window_seconds",
    "sfreq",
    "final_conv_length",
    "pool_mode",
    "second_kernel_size",
    "third_kernel_size",
    "drop_prob",
    "activation",
];

impl EegNetV1Config {
    pub fn for_signal(n_chans: usize, n_outputs: usize, n_times: usize) -> Self {
        Self::new()
            .with_n_chans(Some(n_chans))
            .with_n_outputs(Some(n_outputs))
            .with_n_times(Some(n_times))
    }

    pub fn from_json_str(json: &str) -> error::Result<Self> {
        let value = screen_keys(json, &V1_KEYS, &[])?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.second_kernel_size.contains(&0) {
            return Err(Error::invalid("second_kernel_size", "must be positive"));
        }
        if self.third_kernel_size.contains(&0) {
            return Err(Error::invalid("third_kernel_size", "must be positive"));
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

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<EegNetV1<B>> {
        warn!(
            "EEGNetv1 is deprecated and will be removed in a future release; use EEGNetv4 instead."
        );

        self.validate()?;
        let SignalParams {
            n_chans,
            n_outputs,
            n_times,
        } = self.signal()?;

        let batch_norm = |n_features: usize| -> BatchNorm2d<B> {
            BatchNorm2dConfig::new(n_features)
                .with_momentum(0.01)
                .with_epsilon(1e-3)
                .init::<B>(device)
        };
        let pool = || Pool2d::new(&self.pool_mode, [2, 4], [2, 4]);

        let conv_1 = ConstrainedConv2dConfig::new([n_chans, N_FILTERS_1], [1, 1]).init::<B>(device);
        let bnorm_1 = batch_norm(N_FILTERS_1);
        let drop_1 = DropoutConfig::new(self.drop_prob).init();

        // padded along filters only, never along time
        let conv_2 = ConstrainedConv2dConfig::new([1, N_FILTERS_2], self.second_kernel_size)
            .with_padding([self.second_kernel_size[0] / 2, 0])
            .init::<B>(device);
        let bnorm_2 = batch_norm(N_FILTERS_2);
        let pool_2 = pool();
        let drop_2 = DropoutConfig::new(self.drop_prob).init();

        let conv_3 = ConstrainedConv2dConfig::new([N_FILTERS_2, N_FILTERS_3], self.third_kernel_size)
            .with_padding([self.third_kernel_size[0] / 2, 0])
            .init::<B>(device);
        let bnorm_3 = batch_norm(N_FILTERS_3);
        let pool_3 = pool();
        let drop_3 = DropoutConfig::new(self.drop_prob).init();

        let too_short = |(layer, shape): (&'static str, [usize; 4])| Error::InputTooShort {
            n_chans,
            n_times,
            layer,
            shape,
        };

        let [batch, filters, time, unit] = probe_sequence(
            [1, n_chans, n_times, 1],
            &[("conv_1", &conv_1 as &dyn ShapeProbe)],
        )
        .map_err(too_short)?;

        // permute_1: (batch, filters, time, 1) -> (batch, 1, filters, time)
        let probed = probe_sequence(
            [batch, unit, filters, time],
            &[
                ("conv_2", &conv_2 as &dyn ShapeProbe),
                ("pool_2", &pool_2 as &dyn ShapeProbe),
                ("conv_3", &conv_3 as &dyn ShapeProbe),
                ("pool_3", &pool_3 as &dyn ShapeProbe),
            ],
        )
        .map_err(too_short)?;

        let [_, _, n_out_virtual_chans, n_out_time] = probed;
        let final_conv_length = resolve_final_length(&self.final_conv_length, n_out_time)?;

        let final_layer = ClassifierHead::conv(
            ConstrainedConv2dConfig::new(
                [N_FILTERS_3, n_outputs],
                [n_out_virtual_chans, final_conv_length],
            )
            .init::<B>(device),
        );

        debug!(
            "EEGNetv1 for {} channels x {} samples: features {:?}, final conv length {}",
            n_chans, n_times, probed, final_conv_length
        );

        Ok(EegNetV1 {
            conv_1,
            bnorm_1,
            elu_1: self.activation.init(),
            drop_1,
            conv_2,
            bnorm_2,
            elu_2: self.activation.init(),
            pool_2,
            drop_2,
            conv_3,
            bnorm_3,
            elu_3: self.activation.init(),
            pool_3,
            drop_3,
            final_layer,
            n_chans,
            n_outputs,
            n_times,
            final_conv_length,
        })
    }
}

#[derive(Module, Debug)]
pub struct EegNetV1<B: Backend> {
    pub(super) conv_1: ConstrainedConv2d<B>,
    pub(super) bnorm_1: BatchNorm2d<B>,
    pub(super) elu_1: Activation,
    pub(super) drop_1: Dropout,
    pub(super) conv_2: ConstrainedConv2d<B>,
    pub(super) bnorm_2: BatchNorm2d<B>,
    pub(super) elu_2: Activation,
    pub(super) pool_2: Pool2d,
    pub(super) drop_2: Dropout,
    pub(super) conv_3: ConstrainedConv2d<B>,
    pub(super) bnorm_3: BatchNorm2d<B>,
    pub(super) elu_3: Activation,
    pub(super) pool_3: Pool2d,
    pub(super) drop_3: Dropout,
    pub(super) final_layer: ClassifierHead<B>,
    pub(super) n_chans: usize,
    pub(super) n_outputs: usize,
    pub(super) n_times: usize,
    pub(super) final_conv_length: usize,
}

impl<B: Backend> EegNetV1<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        collapse_predictions(self.forward_dense(x))
    }

    pub fn forward_4d(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(drop_trailing_unit(x))
    }

    pub fn forward_dense(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n_batch, n_chans, n_times] = x.dims();

        assert!(
            n_chans == self.n_chans,
            "Input has {} channels, the model expects {}.",
            n_chans,
            self.n_chans
        );

        let x = x.reshape([n_batch, n_chans, n_times, 1]);
        self.final_layer.forward(self.forward_features(x))
    }

    /// Runs every layer before the classifier on `[batch, n_chans, time, 1]` input.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_1.forward(x);
        let x = self.bnorm_1.forward(x);
        let x = self.elu_1.forward(x);
        let x = x.permute([0, 3, 1, 2]);
        let x = self.drop_1.forward(x);

        let x = self.conv_2.forward(x);
        let x = self.bnorm_2.forward(x);
        let x = self.elu_2.forward(x);
        let x = self.pool_2.forward(x);
        let x = self.drop_2.forward(x);

        let x = self.conv_3.forward(x);
        let x = self.bnorm_3.forward(x);
        let x = self.elu_3.forward(x);
        let x = self.pool_3.forward(x);
        self.drop_3.forward(x)
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

    pub fn legacy_mapping() -> &'static [(&'static str, &'static str)] {
        &LEGACY_MAPPING
    }
}
