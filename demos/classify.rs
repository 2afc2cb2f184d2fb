//! Waste Classification Example
//!
//! Classifies a single image file with the provider selected by a JSON config
//! file, or by `WASTE_*` environment variables when no config is given.
//!
//! Usage:
//!   cargo run --example classify -- --image <path_to_image> [--config provider.json]
//!       [--user <id>] [--records history.jsonl]
//!
//! Set `RUST_LOG=debug` to see provider traffic.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use waste_classifier::{
    create_provider, ClassificationController, ClassificationState, Image, JsonLinesSink,
    ProviderConfig,
};

/// Command line parameters for the classification example
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the image file to classify
    #[arg(short, long)]
    image: PathBuf,

    /// Provider configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User the stored result is attributed to
    #[arg(short, long, default_value = "local")]
    user: String,

    /// Append successful results to this JSON lines file
    #[arg(short, long)]
    records: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ProviderConfig::from_json_file(path)?,
        None => ProviderConfig::from_env()?,
    };
    println!("Using provider config: {config:?}");

    let mut controller = ClassificationController::new(create_provider(config)?);
    if let Some(records) = &args.records {
        controller = controller.with_sink(Arc::new(JsonLinesSink::new(records)), args.user.clone());
    }

    let image = Image::from_path(&args.image)?;
    match controller.submit(image).await? {
        ClassificationState::Success(result) => {
            println!("Category:   {}", result.category);
            println!("Confidence: {:.2}%", result.confidence * 100.0);
            if let Some(material) = &result.material {
                println!("Material:   {material}");
            }
            println!("Recommendations:");
            for tip in &result.recommendations {
                println!("  - {tip}");
            }
        }
        ClassificationState::Failed(error) => {
            eprintln!("{}", error.message);
            eprintln!("({})", error.detail);
            std::process::exit(1);
        }
        other => unreachable!("submit always ends in a terminal state, got {other:?}"),
    }

    Ok(())
}
