//! subrelay - unattended bilingual subtitle relay
//!
//! Watches video channels, adds bilingual subtitles to new uploads and
//! republishes them.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subrelay::acquire::{WorkItem, YtDlp, load_channels};
use subrelay::cli::{Args, Commands, HistoryAction};
use subrelay::config::Config;
use subrelay::history::{HistoryStore, JsonHistoryStore};
use subrelay::lock::FileLock;
use subrelay::media::EncoderFactory;
use subrelay::monitor::Monitor;
use subrelay::render::BilingualRenderer;
use subrelay::subtitle::{
    MergeEngine, TimelineNormalizer, pair_tracks, parse_bilingual_srt, read_srt, to_bilingual_srt, write_srt,
};
use subrelay::workflow::{JobOutcome, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;
    info!("Starting subrelay");

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Monitor { once, interval } => {
            let mut config = config;
            if let Some(seconds) = interval {
                config.monitor.poll_interval_secs = seconds;
            }
            run_monitor(config, once, args.dry_run).await?;
        }
        Commands::Process { item } => {
            EncoderFactory::create_encoder(config.media.clone()).check_availability().await?;
            let history: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::new(&config.monitor.history_file));
            let workflow = Workflow::from_config(config, history, args.dry_run)?;

            let job = workflow.run_job(&WorkItem::new(item)).await;
            match job.outcome {
                Some(JobOutcome::Completed { published_id, .. }) => {
                    println!("Published {} as {}", job.item.id, published_id);
                }
                Some(JobOutcome::Failed { stage, error }) => {
                    anyhow::bail!("{} failed while {}: {}", job.item.id, stage, error);
                }
                None => anyhow::bail!("{} did not finish", job.item.id),
            }
        }
        Commands::Translate { input, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| parent_dir(&input));
            let history: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::new(&config.monitor.history_file));
            let workflow = Workflow::from_config(config, history, args.dry_run)?;

            let subtitles = workflow.translate_subtitles(&input, &output_dir).await?;
            let ass_path = workflow.render_subtitles(&subtitles, &output_dir).await?;
            println!("Timeline fixed: {}", subtitles.normalized_srt.display());
            println!("Bilingual SRT:  {}", subtitles.bilingual_srt.display());
            println!("Bilingual ASS:  {}", ass_path.display());
        }
        Commands::FixTimeline { input, fps, output } => {
            let normalizer = TimelineNormalizer::new(fps.unwrap_or(config.subtitle.fps))?;
            let output = output.unwrap_or_else(|| sibling(&input, "_fix.srt"));

            let track = read_srt(&input).await?;
            let fixed = normalizer.normalize(&track)?;
            write_srt(&fixed, &output).await?;
            println!("Fixed {} entries: {}", fixed.len(), output.display());
        }
        Commands::Merge { input, output } => {
            let merger = MergeEngine::new(config.subtitle.merge_unit, config.subtitle.merge_budget);
            let output = output.unwrap_or_else(|| sibling(&input, "_merged.srt"));

            let track = read_srt(&input).await?;
            let merged = merger.merge(&track);
            write_srt(&merged, &output).await?;
            println!("Merged {} entries into {}: {}", track.len(), merged.len(), output.display());
        }
        Commands::Render { input, output } => {
            let content = tokio::fs::read_to_string(&input).await?;
            let (track, lines) = parse_bilingual_srt(&content)?;
            BilingualRenderer::new(config.render.clone())
                .write(&track, &lines, &output)
                .await?;
            println!("Rendered {} lines: {}", lines.len(), output.display());
        }
        Commands::Embed { video, subtitles, output } => {
            info!("Embedding subtitles into video: {}", video.display());
            let encoder = EncoderFactory::create_encoder(config.media.clone());
            encoder.check_availability().await?;
            let produced = encoder.embed(&video, &subtitles, &output).await?;
            println!("Created {}", produced.display());
        }
        Commands::EmbedBilingual { video, source, target, output } => {
            let encoder = EncoderFactory::create_encoder(config.media.clone());
            encoder.check_availability().await?;

            let source_track = read_srt(&source).await?;
            let target_track = read_srt(&target).await?;
            let lines = pair_tracks(&source_track, &target_track);
            let translated = lines.iter().filter(|l| l.target != l.source).count();
            info!("Paired {} of {} subtitles with a translation", translated, lines.len());

            let bilingual_srt = sibling(&source, "_bilingual.srt");
            tokio::fs::write(&bilingual_srt, to_bilingual_srt(&source_track, &lines)?).await?;
            let ass_path = sibling(&source, "_bilingual.ass");
            BilingualRenderer::new(config.render.clone())
                .write(&source_track, &lines, &ass_path)
                .await?;

            let output = output.unwrap_or_else(|| sibling(&video, "_bilingual.mp4"));
            let produced = encoder.embed(&video, &ass_path, &output).await?;
            println!("Bilingual SRT:  {}", bilingual_srt.display());
            println!("Bilingual ASS:  {}", ass_path.display());
            println!("Created {}", produced.display());
        }
        Commands::History { action } => {
            let store = JsonHistoryStore::new(&config.monitor.history_file);
            match action {
                HistoryAction::List => {
                    let record = store.snapshot().await?;
                    if record.is_empty() {
                        println!("No processed videos recorded.");
                    } else {
                        for id in &record.processed_videos {
                            println!("{}", id);
                        }
                        println!(
                            "\n{} processed videos (last updated {})",
                            record.len(),
                            record.last_updated.as_deref().unwrap_or("never")
                        );
                    }
                }
                HistoryAction::Remove { id } => {
                    if store.remove(&id).await? {
                        println!("Removed {} from history", id);
                    } else {
                        println!("{} is not in history", id);
                    }
                }
            }
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

async fn run_monitor(config: Config, once: bool, dry_run: bool) -> Result<()> {
    EncoderFactory::create_encoder(config.media.clone()).check_availability().await?;

    let channels = load_channels(&config.monitor.channels_file)?;
    if channels.is_empty() {
        warn!("No channels configured in {}", config.monitor.channels_file.display());
        return Ok(());
    }

    let history: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::new(&config.monitor.history_file));
    let discovery = Box::new(YtDlp::new(config.acquire.clone()));
    let lock = Box::new(FileLock::new(&config.monitor.lock_file));
    let monitor_config = config.monitor.clone();
    let workflow = Arc::new(Workflow::from_config(config, history.clone(), dry_run)?);

    let cancel = CancellationToken::new();
    tokio::spawn(watch_shutdown(cancel.clone()));

    let mut monitor = Monitor::new(discovery, workflow, history, lock, channels, monitor_config);
    let report = monitor.run(once, &cancel).await?;

    if !report.skipped.is_empty() {
        warn!("Skipped this run: {}", report.skipped.join(", "));
    }
    Ok(())
}

/// Trip `cancel` on Ctrl-C or SIGTERM.
async fn watch_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    cancel.cancel();
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<dir>/<stem><suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    parent_dir(path).join(format!("{}{}", stem, suffix))
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subrelay").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subrelay.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subrelay.log").display()
    );

    Ok(())
}
