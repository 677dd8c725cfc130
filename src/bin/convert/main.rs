use eegnet::model::{load::load_eegnet_v4, EegNetV4, EegNetV4Config};

use burn::{
    config::Config,
    module::Module,
    record::DefaultRecorder,
    tensor::backend::Backend,
};

use std::{env, fs, process};

#[cfg(feature = "tch")]
type ConvertBackend = burn::backend::LibTorch<f32>;
#[cfg(not(feature = "tch"))]
type ConvertBackend = burn::backend::NdArray<f32>;

fn save_eegnet<B: Backend>(eegnet: EegNetV4<B>, name: &str) -> eegnet::Result<()> {
    eegnet
        .apply_max_norm()
        .save_file(name, &DefaultRecorder::new())?;

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage: {} <dump folder> <config.json> <model name>", args[0]);
        process::exit(1);
    }

    let dump_dir = &args[1];
    let config_file = &args[2];
    let model_name = &args[3];

    let device = Default::default();

    let config = match fs::read_to_string(config_file)
        .map_err(eegnet::Error::from)
        .and_then(|json| EegNetV4Config::from_json_str(&json))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading config {}: {}", config_file, e);
            process::exit(1);
        }
    };

    let eegnet: EegNetV4<ConvertBackend> = match load_eegnet_v4(&config, dump_dir, &device) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("Error loading weights from {}: {}", dump_dir, e);
            process::exit(1);
        }
    };

    println!(
        "Loaded EEGNetv4: {} channels, {} samples, {} classes, {} parameters.",
        eegnet.n_chans(),
        eegnet.n_times(),
        eegnet.n_outputs(),
        eegnet.num_params()
    );

    println!("Saving model...");
    if let Err(e) = save_eegnet(eegnet, model_name) {
        eprintln!("Error saving model {}: {}", model_name, e);
        process::exit(1);
    }

    println!("Saving config...");
    if let Err(e) = config.save(format!("{}.cfg", model_name)) {
        eprintln!("Error saving config for {}: {}", model_name, e);
        process::exit(1);
    }

    println!("Finished.");
}
