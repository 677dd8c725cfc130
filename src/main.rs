use eegnet::model::{load::load_window, EegNetV4, EegNetV4Config};

use burn::{
    config::Config,
    module::Module,
    record::DefaultRecorder,
    tensor::{backend::Backend, Tensor},
};
use num_traits::ToPrimitive;

use std::{env, process};

#[cfg(feature = "tch")]
type InferenceBackend = burn::backend::LibTorch<f32>;
#[cfg(not(feature = "tch"))]
type InferenceBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "tch")]
fn inference_device() -> burn::backend::libtorch::LibTorchDevice {
    use burn::backend::libtorch::LibTorchDevice;

    if cfg!(target_os = "macos") {
        LibTorchDevice::Mps
    } else {
        LibTorchDevice::Cuda(0)
    }
}

#[cfg(not(feature = "tch"))]
fn inference_device() -> burn::backend::ndarray::NdArrayDevice {
    Default::default()
}

fn load_eegnet_model_file<B: Backend>(
    config: &EegNetV4Config,
    filename: &str,
    device: &B::Device,
) -> eegnet::Result<EegNetV4<B>> {
    let eegnet = config
        .init::<B>(device)?
        .load_file(filename, &DefaultRecorder::new(), device)?;

    Ok(eegnet)
}

/// Returns the logits for a single `[n_chans, n_times]` window and the index of the largest.
fn classify<B: Backend>(eegnet: &EegNetV4<B>, window: Tensor<B, 2>) -> (Vec<f32>, usize)
where
    B::IntElem: ToPrimitive,
{
    let logits = eegnet.forward(window.unsqueeze::<3>());

    let class = logits
        .clone()
        .argmax(1)
        .into_scalar()
        .to_usize()
        .unwrap_or_default();
    let logits = logits
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default();

    (logits, class)
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <model name> <window.npy>", args[0]);
        process::exit(1);
    }

    let model_name = &args[1];
    let window_file = &args[2];

    let device = inference_device();

    let eegnet_config = match EegNetV4Config::load(format!("{}.cfg", model_name)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load EEGNet config: {}", e);
            process::exit(1);
        }
    };

    let eegnet: EegNetV4<InferenceBackend> =
        match load_eegnet_model_file(&eegnet_config, model_name, &device) {
            Ok(eegnet_model) => eegnet_model,
            Err(e) => {
                eprintln!("Failed to load EEGNet model file: {}", e);
                process::exit(1);
            }
        };

    let window: Tensor<InferenceBackend, 2> = match load_window(window_file, &device) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Failed to load signal window: {}", e);
            process::exit(1);
        }
    };

    let [n_chans, n_times] = window.dims();
    if n_chans != eegnet.n_chans() {
        eprintln!(
            "Window has {} channels but the model expects {}.",
            n_chans,
            eegnet.n_chans()
        );
        process::exit(1);
    }
    if n_times != eegnet.n_times() {
        eprintln!(
            "Window has {} samples but the model was built for {}.",
            n_times,
            eegnet.n_times()
        );
        process::exit(1);
    }

    let (logits, class) = classify(&eegnet, window);

    println!("Logits: {:?}", logits);
    println!("Predicted class: {}", class);
}
