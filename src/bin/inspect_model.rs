//! Print the model artifact's declared input/output and check that it takes
//! 1530-value landmark vectors.
//!
//! Usage: inspect_model [model.onnx]

use std::path::PathBuf;

use anyhow::Result;

use sign_gesture::config::{Config, CONFIG_PATH};
use sign_gesture::landmarks::VECTOR_LEN;
use sign_gesture::model::{LogitModel, OnnxModel};

fn main() -> Result<()> {
    let model_path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => Config::load_or_default(CONFIG_PATH)?.model.path,
    };
    println!("Inspecting model: {}", model_path.display());

    let model = match OnnxModel::load(&model_path, Some(1), Some(1)) {
        Ok(m) => m,
        Err(e) => {
            println!("Not usable: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n--- Input ---");
    println!("Name:  {}", model.input_name());
    println!("Shape: {:?}", model.input_shape());
    println!("\n--- Output ---");
    println!("Name:  {}", model.output_name());
    println!("Shape: {:?}", model.output_shape());
    println!();

    match model.output_width() {
        Some(n) => println!("OK: {} inputs -> {} classes", VECTOR_LEN, n),
        None => println!("OK: {} inputs -> dynamic class count", VECTOR_LEN),
    }

    Ok(())
}
