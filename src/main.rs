//! preview-tagger CLI - Command-line interface for tagging track previews

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use preview_tagger::models::AstConfig;
use preview_tagger::{EmbedPageResolver, Tagger, TaggerConfig, VERSION};

/// preview-tagger - AudioSet tagging of track previews in Rust
#[derive(Parser, Debug)]
#[command(name = "preview-tagger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Force CPU even when the config asks for GPU
    #[arg(long, global = true)]
    cpu: bool,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Number of tags to print per track
    #[arg(short = 'k', long, global = true)]
    top_k: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve track previews and print their top tags
    Predict {
        /// Track ids to tag
        #[arg(required = true)]
        track_ids: Vec<String>,
    },

    /// Tag a local audio file
    Tag {
        /// Audio file (WAV, MP3, AAC, FLAC, OGG)
        file: PathBuf,
    },

    /// Show configuration and model information
    Info,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn create_progress_bar(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn load_tagger(config: &TaggerConfig) -> Result<Tagger> {
    let pb = create_progress_bar("Loading model...")?;
    let tagger = Tagger::new(config);
    match &tagger {
        Ok(_) => pb.finish_with_message("Model loaded!"),
        Err(_) => pb.abandon_with_message("Model failed to load"),
    }
    tagger.with_context(|| format!("Failed to load model from {:?}", config.model.weights))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = TaggerConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    if cli.cpu {
        config.inference.use_gpu = false;
    }
    let k = cli.top_k.unwrap_or(config.inference.top_k);

    match cli.command {
        Commands::Predict { track_ids } => {
            let tagger = load_tagger(&config)?;
            let resolver = EmbedPageResolver::new(&config.preview)
                .context("Failed to create preview client")?;

            let mut failures = 0;
            for outcome in tagger.tag_tracks(&resolver, track_ids.as_slice(), k) {
                match outcome {
                    Ok(track) => {
                        println!("\n--- Song Information ---");
                        println!("Name: {}", track.display_name);
                        println!("Artist: {}", track.artist_name);
                        println!(
                            "Preview URL: {}",
                            track.preview_url.as_deref().unwrap_or("none")
                        );
                        println!("[*INFO] predicted results:");
                        print!("{}", track.predictions);
                    }
                    Err(failure) => {
                        failures += 1;
                        eprintln!("\n{failure}");
                    }
                }
            }

            info!("Tagged {}/{} tracks", track_ids.len() - failures, track_ids.len());
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Tag { file } => {
            let tagger = load_tagger(&config)?;
            let predictions = tagger
                .tag_file(&file, k)
                .with_context(|| format!("Failed to tag {:?}", file))?;
            print!("{predictions}");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Info => {
            let (fstride, tstride) = config.strides();
            let ast = AstConfig {
                input_tdim: config.model.input_tdim,
                ..AstConfig::audioset(fstride, tstride)
            };
            ast.validate().context("Invalid model configuration")?;
            let (tdim, fdim) = ast.input_shape();
            let (f_grid, t_grid) = ast.patch_grid();

            println!("{:#?}", config);
            println!("Input: {} frames x {} mel bins", tdim, fdim);
            println!("Patches: {} x {} = {}", f_grid, t_grid, ast.num_patches());
            println!("Labels: {}", ast.label_dim);
            println!("Weights present: {}", config.model.weights.exists());
            println!("Labels present: {}", config.model.labels.exists());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    info!("preview-tagger v{}", VERSION);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
