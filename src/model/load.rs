//! Imports weights exported from a PyTorch state dict.
//!
//! The export is a directory holding one `<state dict key>.npy` file per parameter or
//! buffer, e.g. `conv_temporal.weight.npy` or `bnorm_1.running_var.npy`. Each file is a flat
//! float32 array whose first `D` entries are the dimensions of the `D`-rank tensor, followed
//! by its values in row-major order.

use super::{
    layers::{BatchNorm2d, ConstrainedConv2d, ConstrainedLinear},
    ClassifierHead, EegNetV1, EegNetV1Config, EegNetV4, EegNetV4Config, LEGACY_MAPPING,
};
use crate::error::{Error, Result};

use burn::{
    module::{Param, RunningState},
    tensor::{backend::Backend, Tensor, TensorData},
};
use npy::NpyData;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

fn numpy_to_tensor<B: Backend, const D: usize>(
    numpy_data: NpyData<f32>,
    path: &Path,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let v = numpy_data.to_vec();
    let malformed = |reason: String| Error::MalformedTensor {
        path: path.display().to_string(),
        reason,
    };

    if v.len() < D {
        return Err(malformed(format!(
            "{} values cannot hold a rank {} header",
            v.len(),
            D
        )));
    }

    let mut dims = [0; D];
    for (dim, &value) in dims.iter_mut().zip(&v[0..D]) {
        if value < 0.0 || value.fract() != 0.0 {
            return Err(malformed(format!("invalid dimension {}", value)));
        }
        *dim = value as usize;
    }

    let n_values: usize = dims.iter().product();
    if n_values != v.len() - D {
        return Err(malformed(format!(
            "dimensions {:?} need {} values, found {}",
            dims,
            n_values,
            v.len() - D
        )));
    }

    let data = TensorData::new(v[D..].to_vec(), [n_values]);
    Ok(Tensor::<B, 1>::from_data(data, device).reshape(dims))
}

/// A directory of exported parameters, resolving renamed keys through a legacy mapping.
pub struct ParamDir<'a> {
    root: PathBuf,
    legacy: &'a [(&'a str, &'a str)],
}

impl<'a> ParamDir<'a> {
    pub fn new(root: impl Into<PathBuf>, legacy: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            root: root.into(),
            legacy,
        }
    }

    /// Finds the file for `name`, trying the current key before any legacy key mapped to it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let legacy_names = self
            .legacy
            .iter()
            .filter(|(_, new)| *new == name)
            .map(|(old, _)| *old);

        std::iter::once(name)
            .chain(legacy_names)
            .map(|key| self.root.join(format!("{}.npy", key)))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::MissingParam(name.to_string()))
    }

    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let path = self.resolve(name)?;

        debug!("Loading {} from {}", name, path.display());

        let mut buf = vec![];
        std::fs::File::open(&path)?.read_to_end(&mut buf)?;

        let tensor_numpy: NpyData<f32> = NpyData::from_bytes(&buf)?;

        numpy_to_tensor(tensor_numpy, &path, device)
    }

    fn tensor_shaped<B: Backend, const D: usize>(
        &self,
        name: &str,
        expected: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let tensor = self.tensor::<B, D>(name, device)?;
        let found = tensor.dims();

        if found != expected {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                found: found.to_vec(),
            });
        }

        Ok(tensor)
    }
}

fn load_conv<B: Backend>(
    dir: &ParamDir,
    prefix: &str,
    mut conv: ConstrainedConv2d<B>,
    device: &B::Device,
) -> Result<ConstrainedConv2d<B>> {
    let weight = dir.tensor_shaped(&format!("{}.weight", prefix), conv.weight_dims(), device)?;
    conv.weight = Param::from_tensor(weight);

    if let Some(bias) = &conv.bias {
        let bias = dir.tensor_shaped(&format!("{}.bias", prefix), bias.val().dims(), device)?;
        conv.bias = Some(Param::from_tensor(bias));
    }

    Ok(conv)
}

fn load_linear<B: Backend>(
    dir: &ParamDir,
    prefix: &str,
    mut linear: ConstrainedLinear<B>,
    device: &B::Device,
) -> Result<ConstrainedLinear<B>> {
    let weight = dir.tensor_shaped(&format!("{}.weight", prefix), linear.weight_dims(), device)?;
    linear.weight = Param::from_tensor(weight);

    if let Some(bias) = &linear.bias {
        let bias = dir.tensor_shaped(&format!("{}.bias", prefix), bias.val().dims(), device)?;
        linear.bias = Some(Param::from_tensor(bias));
    }

    Ok(linear)
}

fn load_batch_norm<B: Backend>(
    dir: &ParamDir,
    prefix: &str,
    mut norm: BatchNorm2d<B>,
    device: &B::Device,
) -> Result<BatchNorm2d<B>> {
    let dims = [norm.num_features()];

    if norm.gamma.is_some() {
        let gamma = dir.tensor_shaped(&format!("{}.weight", prefix), dims, device)?;
        norm.gamma = Some(Param::from_tensor(gamma));
    }
    if norm.beta.is_some() {
        let beta = dir.tensor_shaped(&format!("{}.bias", prefix), dims, device)?;
        norm.beta = Some(Param::from_tensor(beta));
    }

    let running_mean = dir.tensor_shaped(&format!("{}.running_mean", prefix), dims, device)?;
    let running_var = dir.tensor_shaped(&format!("{}.running_var", prefix), dims, device)?;
    norm.running_mean = RunningState::new(running_mean);
    norm.running_var = RunningState::new(running_var);

    Ok(norm)
}

fn load_classifier_head<B: Backend>(
    dir: &ParamDir,
    head: ClassifierHead<B>,
    device: &B::Device,
) -> Result<ClassifierHead<B>> {
    let ClassifierHead {
        conv_classifier,
        linearconstraint,
    } = head;

    Ok(ClassifierHead {
        conv_classifier: conv_classifier
            .map(|conv| load_conv(dir, "final_layer.conv_classifier", conv, device))
            .transpose()?,
        linearconstraint: linearconstraint
            .map(|linear| load_linear(dir, "final_layer.linearconstraint", linear, device))
            .transpose()?,
    })
}

/// Builds an EEGNet v4 from `config` and fills it with the weights exported under `path`.
pub fn load_eegnet_v4<B: Backend>(
    config: &EegNetV4Config,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<EegNetV4<B>> {
    let dir = ParamDir::new(path.as_ref(), &LEGACY_MAPPING);

    let EegNetV4 {
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
    } = config.init::<B>(device)?;

    Ok(EegNetV4 {
        conv_temporal: load_conv(&dir, "conv_temporal", conv_temporal, device)?,
        bnorm_temporal: load_batch_norm(&dir, "bnorm_temporal", bnorm_temporal, device)?,
        conv_spatial: load_conv(&dir, "conv_spatial", conv_spatial, device)?,
        bnorm_1: load_batch_norm(&dir, "bnorm_1", bnorm_1, device)?,
        elu_1,
        pool_1,
        drop_1,
        conv_separable_depth: load_conv(&dir, "conv_separable_depth", conv_separable_depth, device)?,
        conv_separable_point: load_conv(&dir, "conv_separable_point", conv_separable_point, device)?,
        bnorm_2: load_batch_norm(&dir, "bnorm_2", bnorm_2, device)?,
        elu_2,
        pool_2,
        drop_2,
        final_layer: load_classifier_head(&dir, final_layer, device)?,
        n_chans,
        n_outputs,
        n_times,
        final_conv_length,
    })
}

/// Builds an EEGNet v1 from `config` and fills it with the weights exported under `path`.
pub fn load_eegnet_v1<B: Backend>(
    config: &EegNetV1Config,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<EegNetV1<B>> {
    let dir = ParamDir::new(path.as_ref(), &LEGACY_MAPPING);

    let EegNetV1 {
        conv_1,
        bnorm_1,
        elu_1,
        drop_1,
        conv_2,
        bnorm_2,
        elu_2,
        pool_2,
        drop_2,
        conv_3,
        bnorm_3,
        elu_3,
        pool_3,
        drop_3,
        final_layer,
        n_chans,
        n_outputs,
        n_times,
        final_conv_length,
    } = config.init::<B>(device)?;

    Ok(EegNetV1 {
        conv_1: load_conv(&dir, "conv_1", conv_1, device)?,
        bnorm_1: load_batch_norm(&dir, "bnorm_1", bnorm_1, device)?,
        elu_1,
        drop_1,
        conv_2: load_conv(&dir, "conv_2", conv_2, device)?,
        bnorm_2: load_batch_norm(&dir, "bnorm_2", bnorm_2, device)?,
        elu_2,
        pool_2,
        drop_2,
        conv_3: load_conv(&dir, "conv_3", conv_3, device)?,
        bnorm_3: load_batch_norm(&dir, "bnorm_3", bnorm_3, device)?,
        elu_3,
        pool_3,
        drop_3,
        final_layer: load_classifier_head(&dir, final_layer, device)?,
        n_chans,
        n_outputs,
        n_times,
        final_conv_length,
    })
}

/// Reads a `[n_chans, n_times]` signal window stored in the same shape-prefixed layout.
pub fn load_window<B: Backend>(path: impl AsRef<Path>, device: &B::Device) -> Result<Tensor<B, 2>> {
    let path = path.as_ref();

    let mut buf = vec![];
    std::fs::File::open(path)?.read_to_end(&mut buf)?;

    let numpy_data: NpyData<f32> = NpyData::from_bytes(&buf)?;
    numpy_to_tensor(numpy_data, path, device)
}
