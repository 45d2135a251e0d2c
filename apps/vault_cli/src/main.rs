use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    gallery::DEFAULT_HIGHLIGHT_LIMIT, load_settings, style::DEFAULT_EPOCHS,
    upload::DEFAULT_CURATE_TOP_N, Orchestrator, ReelOptions, TrainRequest, UploadBatch,
    UploadFile,
};
use shared::{domain::Emotion, protocol::TimelineEntry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vault", about = "Command-line client for the photo vault backend")]
struct Args {
    /// Overrides the base URL from vault.toml and the environment.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload photos and print the detected emotion of each.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Curate {
        #[arg(long, default_value_t = DEFAULT_CURATE_TOP_N)]
        top_n: u32,
    },
    Timeline,
    Highlights {
        #[arg(long, default_value_t = DEFAULT_HIGHLIGHT_LIMIT)]
        limit: u32,
    },
    ByEmotion {
        emotion: Emotion,
    },
    Stats,
    /// Start a life reel and wait for it to finish.
    Reel {
        #[arg(long, default_value_t = 3.0)]
        duration_per_image: f64,
        #[arg(long, default_value_t = 1.0)]
        transition_duration: f64,
        /// Print the job id and exit without waiting.
        #[arg(long)]
        detach: bool,
    },
    Models,
    /// Train a style model, then optionally generate with it.
    Style {
        #[arg(long)]
        name: String,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = DEFAULT_EPOCHS)]
        epochs: u32,
        #[arg(long)]
        description: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        generate_prompt: Option<String>,
        #[arg(long, default_value_t = 4)]
        num_images: u32,
        #[arg(long)]
        seed: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.api_base_url.as_deref() {
        settings.override_api_base_url(url);
    }
    if let Some(interval) = args.poll_interval_ms {
        settings.poll_interval_ms = interval;
    }
    info!(base_url = %settings.api_base_url, "vault: using backend");
    let orchestrator = Orchestrator::from_settings(&settings)?;

    match args.command {
        Command::Upload { files } => {
            let batch = read_batch(&files).await?;
            for result in orchestrator.upload(batch).await? {
                println!(
                    "{}: {} (confidence {:.2})",
                    result.filename, result.emotion, result.confidence
                );
            }
        }
        Command::Curate { top_n } => print_entries(&orchestrator.curate(top_n).await?),
        Command::Timeline => print_entries(&orchestrator.load_timeline().await?),
        Command::Highlights { limit } => {
            print_entries(&orchestrator.load_highlights(limit).await?)
        }
        Command::ByEmotion { emotion } => {
            print_entries(&orchestrator.load_by_emotion(emotion).await?)
        }
        Command::Stats => {
            let stats = orchestrator.load_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Reel {
            duration_per_image,
            transition_duration,
            detach,
        } => {
            let options = ReelOptions {
                duration_per_image,
                transition_duration,
            };
            if detach {
                let job = orchestrator.life_reel().start(options).await?;
                println!("job {} {}", job.job_id, job.status);
                return Ok(());
            }
            let tracking = orchestrator.start_life_reel(options).await?;
            println!("job {} started", tracking.job.job_id);
            let job = tracking.completion.await??;
            match (&job.output_path, &job.error) {
                (Some(path), _) => println!("job {} {}: {path}", job.job_id, job.status),
                (None, Some(error)) => println!("job {} {}: {error}", job.job_id, job.status),
                (None, None) => println!("job {} {}", job.job_id, job.status),
            }
        }
        Command::Models => {
            let models = orchestrator.list_style_models().await?;
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
        Command::Style {
            name,
            prompt,
            epochs,
            description,
            files,
            generate_prompt,
            num_images,
            seed,
        } => {
            let mut request =
                TrainRequest::new(name, prompt, read_batch(&files).await?).with_epochs(epochs);
            if let Some(description) = description {
                request = request.with_description(description);
            }
            let model = orchestrator.train_style(request).await?;
            println!(
                "model {} '{}' trained on {} samples",
                model.model_id(),
                model.name,
                model.training_sample_count
            );
            if let Some(prompt) = generate_prompt {
                let images = orchestrator
                    .generate(model.handle(), &prompt, num_images, seed)
                    .await?;
                for image in images {
                    println!("{image}");
                }
            }
        }
    }

    Ok(())
}

async fn read_batch(paths: &[PathBuf]) -> Result<UploadBatch> {
    let mut batch = UploadBatch::default();
    for path in paths {
        let file = UploadFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        batch.push(file);
    }
    Ok(batch)
}

fn print_entries(entries: &[TimelineEntry]) {
    for entry in entries {
        let emotion = entry.emotion.map(|e| e.to_string()).unwrap_or_else(|| "-".into());
        let when = entry
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        println!("{when}  {emotion:<8}  {}", entry.path);
    }
}
