use crate::helper::{elu, glorot_uniform, project_max_norm, renorm};

use burn::{
    config::Config,
    module::{Ignored, Module, Param, RunningState},
    nn::pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    tensor::{
        activation::{gelu, relu, silu},
        backend::Backend,
        module::conv2d,
        ops::ConvOptions,
        Tensor,
    },
};

/// Maps a `[batch, channels, height, width]` input shape to the layer's output shape.
///
/// Returns `None` when an output extent would be zero.
pub trait ShapeProbe {
    fn output_shape(&self, input: [usize; 4]) -> Option<[usize; 4]>;
}

/// Folds the probe over named layers in order.
///
/// On failure, returns the name of the offending layer and the shape it was given.
pub fn probe_sequence(
    input: [usize; 4],
    layers: &[(&'static str, &dyn ShapeProbe)],
) -> Result<[usize; 4], (&'static str, [usize; 4])> {
    layers.iter().try_fold(input, |shape, &(name, layer)| {
        layer.output_shape(shape).ok_or((name, shape))
    })
}

fn window_extent(input: usize, kernel: usize, padding: usize, stride: usize) -> Option<usize> {
    (input + 2 * padding)
        .checked_sub(kernel)
        .map(|span| span / stride + 1)
        .filter(|&extent| extent > 0 && input > 0)
}

#[derive(Config, Debug)]
pub struct ConstrainedConv2dConfig {
    pub channels: [usize; 2],
    pub kernel_size: [usize; 2],
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],
    #[config(default = "[0, 0]")]
    pub padding: [usize; 2],
    #[config(default = 1)]
    pub groups: usize,
    #[config(default = true)]
    pub bias: bool,
    pub max_norm: Option<f64>,
}

impl ConstrainedConv2dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConstrainedConv2d<B> {
        let [channels_in, channels_out] = self.channels;
        let [kernel_h, kernel_w] = self.kernel_size;

        assert!(
            channels_in % self.groups == 0 && channels_out % self.groups == 0,
            "Channels {:?} must be divisible by the number of groups {}.",
            self.channels,
            self.groups
        );

        let fan_in = channels_in / self.groups * kernel_h * kernel_w;
        let fan_out = channels_out * kernel_h * kernel_w;

        let weight = glorot_uniform(
            [channels_out, channels_in / self.groups, kernel_h, kernel_w],
            fan_in,
            fan_out,
            device,
        );
        let bias = self
            .bias
            .then(|| Param::from_tensor(Tensor::zeros([channels_out], device)));

        ConstrainedConv2d {
            weight: Param::from_tensor(weight),
            bias,
            stride: self.stride,
            padding: self.padding,
            groups: self.groups,
            max_norm: self.max_norm,
        }
    }
}

/// Grouped 2D convolution whose filters are optionally held under a max L2 norm.
#[derive(Module, Debug)]
pub struct ConstrainedConv2d<B: Backend> {
    /// `[channels_out, channels_in / groups, kernel_h, kernel_w]`
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    stride: [usize; 2],
    padding: [usize; 2],
    groups: usize,
    max_norm: Option<f64>,
}

impl<B: Backend> ConstrainedConv2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        conv2d(
            x,
            self.effective_weight(),
            self.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new(self.stride, self.padding, [1, 1], self.groups),
        )
    }

    /// The weight as seen by `forward`, after the max-norm projection.
    pub fn effective_weight(&self) -> Tensor<B, 4> {
        match self.max_norm {
            Some(max_norm) => renorm(self.weight.val(), max_norm),
            None => self.weight.val(),
        }
    }

    pub fn weight_dims(&self) -> [usize; 4] {
        self.weight.val().dims()
    }

    /// Projects the stored filters back under the cap, keeping the parameter id.
    pub fn apply_max_norm(mut self) -> Self {
        if let Some(max_norm) = self.max_norm {
            self.weight = self.weight.map(|weight| constrain(weight, max_norm));
        }
        self
    }

    pub fn max_norm(&self) -> Option<f64> {
        self.max_norm
    }
}

impl<B: Backend> ShapeProbe for ConstrainedConv2d<B> {
    fn output_shape(&self, [batch, _, height, width]: [usize; 4]) -> Option<[usize; 4]> {
        let [channels_out, _, kernel_h, kernel_w] = self.weight_dims();
        let height = window_extent(height, kernel_h, self.padding[0], self.stride[0])?;
        let width = window_extent(width, kernel_w, self.padding[1], self.stride[1])?;
        Some([batch, channels_out, height, width])
    }
}

#[derive(Config, Debug)]
pub struct ConstrainedLinearConfig {
    pub d_input: usize,
    pub d_output: usize,
    #[config(default = true)]
    pub bias: bool,
    pub max_norm: Option<f64>,
}

impl ConstrainedLinearConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConstrainedLinear<B> {
        let weight = glorot_uniform(
            [self.d_output, self.d_input],
            self.d_input,
            self.d_output,
            device,
        );
        let bias = self
            .bias
            .then(|| Param::from_tensor(Tensor::zeros([self.d_output], device)));

        ConstrainedLinear {
            weight: Param::from_tensor(weight),
            bias,
            max_norm: self.max_norm,
        }
    }
}

/// Fully connected layer with a `[d_output, d_input]` weight and optional max-norm rows.
#[derive(Module, Debug)]
pub struct ConstrainedLinear<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    max_norm: Option<f64>,
}

impl<B: Backend> ConstrainedLinear<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = match self.max_norm {
            Some(max_norm) => renorm(self.weight.val(), max_norm),
            None => self.weight.val(),
        };

        let x = x.matmul(weight.transpose());
        match &self.bias {
            Some(bias) => x + bias.val().unsqueeze::<2>(),
            None => x,
        }
    }

    pub fn weight_dims(&self) -> [usize; 2] {
        self.weight.val().dims()
    }

    /// Projects the stored rows back under the cap, keeping the parameter id.
    pub fn apply_max_norm(mut self) -> Self {
        if let Some(max_norm) = self.max_norm {
            self.weight = self.weight.map(|weight| constrain(weight, max_norm));
        }
        self
    }
}

fn constrain<B: Backend, const D: usize>(weight: Tensor<B, D>, max_norm: f64) -> Tensor<B, D> {
    let require_grad = weight.is_require_grad();
    project_max_norm(weight, max_norm).set_require_grad(require_grad)
}

#[derive(Config, Debug)]
pub struct BatchNorm2dConfig {
    pub num_features: usize,
    #[config(default = 0.1)]
    pub momentum: f64,
    #[config(default = 1e-5)]
    pub epsilon: f64,
    #[config(default = true)]
    pub affine: bool,
}

impl BatchNorm2dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm2d<B> {
        let n = self.num_features;

        let gamma = self
            .affine
            .then(|| Param::from_tensor(Tensor::ones([n], device)));
        let beta = self
            .affine
            .then(|| Param::from_tensor(Tensor::zeros([n], device)));

        BatchNorm2d {
            gamma,
            beta,
            running_mean: RunningState::new(Tensor::zeros([n], device)),
            running_var: RunningState::new(Tensor::ones([n], device)),
            momentum: self.momentum,
            epsilon: self.epsilon,
        }
    }
}

/// Per-channel batch normalization over `[batch, channels, height, width]` inputs.
///
/// Batch statistics are used (and folded into the running estimates) whenever the backend
/// tracks gradients; otherwise the running estimates are used.
#[derive(Module, Debug)]
pub struct BatchNorm2d<B: Backend> {
    pub gamma: Option<Param<Tensor<B, 1>>>,
    pub beta: Option<Param<Tensor<B, 1>>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> BatchNorm2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let n_features = self.num_features();

        assert!(
            channels == n_features,
            "Batch norm expects {} channels, got {}.",
            n_features,
            channels
        );

        if B::ad_enabled() {
            self.forward_train(x)
        } else {
            self.forward_inference(x)
        }
    }

    pub fn num_features(&self) -> usize {
        let [n] = self.running_mean.value().dims();
        n
    }

    fn forward_inference(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        let mean = self.running_mean.value().reshape([1, channels, 1, 1]);
        let var = self.running_var.value().reshape([1, channels, 1, 1]);

        self.normalize(x, mean, var)
    }

    fn forward_train(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();
        let n = batch * height * width;

        let flat: Tensor<B, 2> = x.clone().swap_dims(0, 1).reshape([channels, n]);
        let mean = flat.clone().mean_dim(1);
        let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);

        // running variance is tracked unbiased
        let correction = if n > 1 { n as f64 / (n - 1) as f64 } else { 1.0 };

        let momentum = self.momentum;
        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();

        let batch_mean = mean.clone().detach().reshape([channels]);
        let batch_var = var.clone().detach().reshape([channels]).mul_scalar(correction);

        self.running_mean.update(
            running_mean
                .mul_scalar(1.0 - momentum)
                .add(batch_mean.mul_scalar(momentum))
                .detach(),
        );
        self.running_var.update(
            running_var
                .mul_scalar(1.0 - momentum)
                .add(batch_var.mul_scalar(momentum))
                .detach(),
        );

        self.normalize(
            x,
            mean.reshape([1, channels, 1, 1]),
            var.reshape([1, channels, 1, 1]),
        )
    }

    fn normalize(&self, x: Tensor<B, 4>, mean: Tensor<B, 4>, var: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();

        let x = (x - mean).div(var.add_scalar(self.epsilon).sqrt());
        let x = match &self.gamma {
            Some(gamma) => x * gamma.val().reshape([1, channels, 1, 1]),
            None => x,
        };

        match &self.beta {
            Some(beta) => x + beta.val().reshape([1, channels, 1, 1]),
            None => x,
        }
    }
}

#[derive(Config, Debug, PartialEq)]
pub enum PoolMode {
    Max,
    Mean,
}

/// Max or average pooling without padding, sized for shape probing.
#[derive(Module, Clone, Debug)]
pub struct Pool2d {
    kernel_size: [usize; 2],
    stride: [usize; 2],
    max: Option<MaxPool2d>,
    mean: Option<AvgPool2d>,
}

impl Pool2d {
    pub fn new(mode: &PoolMode, kernel_size: [usize; 2], stride: [usize; 2]) -> Self {
        let (max, mean) = match mode {
            PoolMode::Max => (
                Some(MaxPool2dConfig::new(kernel_size).with_strides(stride).init()),
                None,
            ),
            PoolMode::Mean => (
                None,
                Some(AvgPool2dConfig::new(kernel_size).with_strides(stride).init()),
            ),
        };

        Self {
            kernel_size,
            stride,
            max,
            mean,
        }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match (&self.max, &self.mean) {
            (Some(pool), _) => pool.forward(x),
            (None, Some(pool)) => pool.forward(x),
            (None, None) => x,
        }
    }
}

impl ShapeProbe for Pool2d {
    fn output_shape(&self, [batch, channels, height, width]: [usize; 4]) -> Option<[usize; 4]> {
        let height = window_extent(height, self.kernel_size[0], 0, self.stride[0])?;
        let width = window_extent(width, self.kernel_size[1], 0, self.stride[1])?;
        Some([batch, channels, height, width])
    }
}

#[derive(Config, Debug, PartialEq)]
pub enum ActivationConfig {
    Elu,
    Relu,
    Gelu,
    Silu,
    Tanh,
    Identity,
}

#[derive(Module, Clone, Debug)]
pub struct Activation {
    kind: Ignored<ActivationConfig>,
}

impl ActivationConfig {
    pub fn init(&self) -> Activation {
        Activation {
            kind: Ignored(self.clone()),
        }
    }
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &*self.kind {
            ActivationConfig::Elu => elu(x),
            ActivationConfig::Relu => relu(x),
            ActivationConfig::Gelu => gelu(x),
            ActivationConfig::Silu => silu(x),
            ActivationConfig::Tanh => x.tanh(),
            ActivationConfig::Identity => x,
        }
    }
}
