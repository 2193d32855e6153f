use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facesift_core::job::{self, JobEvent, JobRequest};
use facesift_core::{CancelToken, MatchResult};
use facesift_models::{ArcFaceEmbedder, ScrfdLocalizer};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "facesift", about = "Find a face across a folder of photographs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a folder: detect, embed, and dedup every face in it
    Index {
        /// Folder scanned recursively for images
        folder: PathBuf,
        /// Directory that receives the normalized face crops
        #[arg(short, long, default_value = "crops")]
        crops: PathBuf,
    },
    /// Ingest a folder, then rank its faces against a query photo
    Find {
        /// Photo with the face(s) to look for
        query: PathBuf,
        /// Folder scanned recursively for images
        #[arg(short, long)]
        folder: PathBuf,
        /// Directory that receives the normalized face crops
        #[arg(short, long, default_value = "crops")]
        crops: PathBuf,
        /// Cosine-distance ceiling for a match; lower is stricter
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Emit matches as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();

    match cli.command {
        Commands::Index { folder, crops } => run_index(folder, crops, &config).await,
        Commands::Find {
            query,
            folder,
            crops,
            threshold,
            json,
        } => {
            let threshold = threshold.unwrap_or(config.match_threshold);
            run_find(query, folder, crops, threshold, json, &config).await
        }
    }
}

fn load_models(config: &config::Config) -> Result<(ScrfdLocalizer, ArcFaceEmbedder)> {
    let localizer = ScrfdLocalizer::load(&config.scrfd_model_path(), config.confidence_threshold)
        .context("loading SCRFD face detection model")?;
    let embedder =
        ArcFaceEmbedder::load(&config.arcface_model_path()).context("loading ArcFace model")?;
    Ok((localizer, embedder))
}

async fn run_index(folder: PathBuf, crops: PathBuf, config: &config::Config) -> Result<()> {
    let (mut localizer, mut embedder) = load_models(config)?;

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancelling after the current file...");
            ctrl_c_cancel.request_cancel();
        }
    });

    let store = tokio::task::spawn_blocking(move || {
        let mut on_progress = |percent: f32| print_progress(percent);
        facesift_core::ingest::ingest(
            &folder,
            &crops,
            &mut localizer,
            &mut embedder,
            &mut on_progress,
            &cancel,
        )
    })
    .await
    .context("ingestion worker terminated abnormally")??;

    finish_progress_line();
    println!(
        "{} unique image(s), {} distinct face(s)",
        store.len(),
        store.face_count()
    );
    for record in store.records() {
        println!(
            "  {}  {}  ({} face(s))",
            &record.content_hash[..12.min(record.content_hash.len())],
            record.file_name,
            record.faces.len()
        );
    }
    Ok(())
}

async fn run_find(
    query: PathBuf,
    folder: PathBuf,
    crops: PathBuf,
    threshold: f32,
    json: bool,
    config: &config::Config,
) -> Result<()> {
    let (localizer, embedder) = load_models(config)?;

    let request = JobRequest {
        input_folder: folder,
        crop_dir: crops.clone(),
        query_image: query,
        threshold,
    };
    let mut handle = job::spawn(request, Box::new(localizer), Box::new(embedder));
    let cancel = handle.cancel_token();

    loop {
        tokio::select! {
            event = handle.next_event() => {
                match event {
                    Some(JobEvent::Progress(percent)) => print_progress(percent),
                    Some(JobEvent::Done { mut matches, store }) => {
                        finish_progress_line();
                        tracing::info!(images = store.len(), faces = store.face_count(), "store built");
                        matches.sort_by(|a, b| {
                            a.distance
                                .partial_cmp(&b.distance)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                        render_matches(&matches, &crops, json)?;
                        return Ok(());
                    }
                    Some(JobEvent::Cancelled { store }) => {
                        finish_progress_line();
                        println!(
                            "cancelled; partial store held {} image(s), no matching performed",
                            store.len()
                        );
                        return Ok(());
                    }
                    Some(JobEvent::Failed(message)) => {
                        finish_progress_line();
                        anyhow::bail!("face search failed: {message}");
                    }
                    None => anyhow::bail!("worker exited without a result"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ncancelling after the current file...");
                cancel.request_cancel();
            }
        }
    }
}

fn render_matches(matches: &[MatchResult], crops: &std::path::Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(matches)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("no matching faces found");
        return Ok(());
    }

    println!("{} matching face(s), best first:", matches.len());
    println!("{:<12} {:<10} {:<30} crop", "similarity", "distance", "source image");
    for m in matches {
        let similarity = (1.0 - m.distance / 2.0) * 100.0;
        println!(
            "{:<12} {:<10.4} {:<30} {}",
            format!("{similarity:.2}%"),
            m.distance,
            m.file_name,
            crops.join(&m.crop_reference).display()
        );
    }
    Ok(())
}

fn print_progress(percent: f32) {
    print!("\ringesting... {percent:5.1}%");
    let _ = std::io::stdout().flush();
}

fn finish_progress_line() {
    println!();
}
