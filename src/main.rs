use anyhow::{bail, Context, Result};
use clap::Parser;
use run_tracker_rs::{
    FixOutcome, HttpProgressRemote, LocationPermission, ManualClock, OfflineRemote, ProgressRemote,
    ReplayEvent, RunTracker, TrackerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "run_tracker")]
#[command(about = "Replay recorded location fixes through the run tracker", long_about = None)]
struct Args {
    /// JSON array of fix / pause / resume events
    #[arg(long)]
    fixes: PathBuf,

    /// Tracker configuration (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the run service; progress stays local when omitted
    #[arg(long)]
    remote_url: Option<String>,

    /// Runner weight for the calorie estimate
    #[arg(long)]
    weight_kg: Option<f64>,

    /// Write the route as GPX
    #[arg(long)]
    gpx: Option<PathBuf>,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(url) = &args.remote_url {
        config.sync.base_url = Some(url.clone());
    }
    if let Some(weight) = args.weight_kg {
        config.athlete.weight_kg = weight;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let raw = std::fs::read_to_string(&args.fixes)
        .with_context(|| format!("reading {}", args.fixes.display()))?;
    let events: Vec<ReplayEvent> = serde_json::from_str(&raw).context("parsing replay events")?;
    let Some(first) = events.first() else {
        bail!("{} contains no events", args.fixes.display());
    };

    let remote: Arc<dyn ProgressRemote> = match &config.sync.base_url {
        Some(url) => Arc::new(HttpProgressRemote::new(url, config.sync.request_timeout_secs)),
        None => Arc::new(OfflineRemote),
    };

    let clock = Arc::new(ManualClock::new(first.timestamp()));
    let mut tracker = RunTracker::new(config, clock.clone());

    log::info!("Replaying {} events from {}", events.len(), args.fixes.display());
    let ticket = tracker.start(LocationPermission::Granted)?;
    let started = remote.start_session(&ticket.request).await;
    tracker.assign_session_id(ticket.run_id, started);

    for event in &events {
        clock.set(event.timestamp());
        tracker.tick();

        match event {
            ReplayEvent::Fix(fix) => {
                if let FixOutcome::Accepted {
                    sync: Some(request),
                    ..
                } = tracker.handle_fix(fix)
                {
                    let result = remote.push_progress(&request.payload).await;
                    tracker.complete_sync(&request, result);
                }
            }
            ReplayEvent::Pause { .. } => {
                if let Err(e) = tracker.pause() {
                    log::warn!("Ignoring pause at {}: {}", event.timestamp(), e);
                }
            }
            ReplayEvent::Resume { .. } => {
                if let Err(e) = tracker.resume() {
                    log::warn!("Ignoring resume at {}: {}", event.timestamp(), e);
                }
            }
        }
    }

    let summary = tracker.stop()?;

    log::info!(
        "{:.3} km in {}s, pace {} /km, {} kcal",
        summary.distance_km,
        summary.elapsed_secs,
        summary.pace_label,
        summary.calories
    );
    log::info!(
        "Fixes: {} received, {} accepted, {} rejected, {} spikes; sync: {}/{} ok",
        summary.fixes.received,
        summary.fixes.accepted,
        summary.fixes.rejected(),
        summary.fixes.spikes,
        summary.sync.successes,
        summary.sync.attempts
    );
    println!("{}", summary.to_json()?);

    if let Some(path) = &args.summary {
        summary.write_json(path)?;
        log::info!("Summary written to {}", path.display());
    }
    if let Some(path) = &args.gpx {
        summary.to_gpx().write(path)?;
        log::info!("GPX written to {}", path.display());
    }

    Ok(())
}
