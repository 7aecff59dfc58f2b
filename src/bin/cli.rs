//! CLI binary for voxgate.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxgate::offline::{analyze_samples, read_wav, write_wav};
use voxgate::{
    CalibrationMode, CalibrationProfile, CpalSource, PipelineState, VadConfig, VadEvent,
    VadPipeline,
};

/// voxgate: adaptive voice activity detection and speech segmentation.
#[derive(Parser)]
#[command(name = "voxgate", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true, env = "VOXGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Calibration profile (TOML) to start from instead of the defaults.
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen on the microphone and report detected speech.
    Listen {
        /// Write every completed segment to this directory as WAV.
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Print one JSON event record per line.
        #[arg(long)]
        json: bool,
    },

    /// Run a manual calibration and print the resulting profile.
    Calibrate {
        /// Also write the profile to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Detect speech in a WAV file.
    Analyze {
        /// WAV file to analyze.
        wav: PathBuf,

        /// Print one JSON event record per line.
        #[arg(long)]
        json: bool,
    },

    /// List available input devices.
    Devices,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout can carry event records.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxgate=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => VadConfig::from_file(path)?,
        None => {
            let path = VadConfig::default_config_path();
            if path.exists() {
                VadConfig::from_file(&path)?
            } else {
                VadConfig::default()
            }
        }
    };
    let profile = cli.profile.as_deref().map(load_profile).transpose()?;

    match cli.command.unwrap_or(Command::Listen {
        save_dir: None,
        json: false,
    }) {
        Command::Listen { save_dir, json } => run_listen(config, profile, save_dir, json).await,
        Command::Calibrate { save } => run_calibrate(config, profile, save).await,
        Command::Analyze { wav, json } => run_analyze(&config, &wav, json),
        Command::Devices => list_devices(),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn build_pipeline(
    config: VadConfig,
    profile: Option<CalibrationProfile>,
) -> anyhow::Result<(
    VadPipeline<CpalSource>,
    tokio::sync::mpsc::UnboundedReceiver<VadEvent>,
)> {
    let source = CpalSource::new(&config.audio);
    let (pipeline, events) = VadPipeline::new(config, source)?;
    let pipeline = match profile {
        Some(profile) => pipeline.with_baseline_profile(profile),
        None => pipeline,
    };
    Ok((pipeline, events))
}

async fn run_listen(
    config: VadConfig,
    profile: Option<CalibrationProfile>,
    save_dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(ref dir) = save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let (mut pipeline, mut events) = build_pipeline(config, profile)?;
    pipeline.start_recording()?;
    eprintln!("Listening. Press Ctrl+C to stop.");

    let mut segments = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let VadEvent::SpeechEnd(ref segment) = event
                    && let Some(ref dir) = save_dir
                {
                    segments += 1;
                    let path = dir.join(format!("segment-{segments:04}.wav"));
                    write_wav(&path, segment)?;
                    info!("saved {}", path.display());
                }
                print_event(&event, json)?;
            }
        }
    }

    pipeline.stop_recording();
    let status = pipeline.status();
    if status.dropped_frames > 0 {
        eprintln!("{} frames dropped", status.dropped_frames);
    }
    Ok(())
}

async fn run_calibrate(
    config: VadConfig,
    profile: Option<CalibrationProfile>,
    save: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (mut pipeline, mut events) = build_pipeline(config, profile)?;
    pipeline.start_manual_calibration()?;
    eprintln!("Calibrating. Speak normally for a few seconds...");

    let mut manual_started = false;
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                pipeline.cancel_calibration()?;
                break None;
            }
            event = events.recv() => match event {
                Some(VadEvent::StateChanged { to, .. }) => {
                    manual_started |= to == PipelineState::Calibrating(CalibrationMode::Manual);
                }
                // The automatic pass at startup also reports a profile.
                Some(VadEvent::CalibrationFinished(profile)) if manual_started => {
                    break Some(profile);
                }
                Some(VadEvent::CalibrationSkipped) if manual_started => break None,
                Some(VadEvent::CalibrationCancelled) | None => break None,
                Some(_) => {}
            },
        }
    };
    pipeline.stop_recording();

    let Some(profile) = result else {
        anyhow::bail!("calibration did not complete");
    };
    let text = toml::to_string_pretty(&profile)?;
    print!("{text}");
    if let Some(path) = save {
        std::fs::write(&path, text).with_context(|| format!("cannot write {}", path.display()))?;
        eprintln!("Profile saved to {}", path.display());
    }
    Ok(())
}

fn run_analyze(config: &VadConfig, wav: &Path, json: bool) -> anyhow::Result<()> {
    let (samples, sample_rate) = read_wav(wav)?;
    let events = analyze_samples(&samples, sample_rate, config)?;
    for event in events
        .iter()
        .filter(|e| !matches!(e, VadEvent::AudioBuffer(_)))
    {
        print_event(event, json)?;
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalSource::list_input_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

fn print_event(event: &VadEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(&event.record())?);
        return Ok(());
    }
    match event {
        VadEvent::SpeechStart { level, .. } => println!("speech start (level {level:.4})"),
        VadEvent::SpeechEnd(segment) => println!(
            "speech end: {:.2}s, {} frames ({:?})",
            segment.duration().as_secs_f32(),
            segment.frame_count(),
            segment.end_reason
        ),
        VadEvent::SpeechDiscarded { reason, frames } => {
            println!("speech discarded: {reason:?}, {frames} frames");
        }
        VadEvent::Interruption { level, .. } => println!("interruption (level {level:.4})"),
        VadEvent::CalibrationFinished(profile) => println!(
            "calibrated: noise floor {:.5}",
            profile.noise_floor
        ),
        VadEvent::CalibrationSkipped => println!("calibration skipped"),
        VadEvent::CalibrationCancelled => println!("calibration cancelled"),
        VadEvent::AudioBuffer(_) | VadEvent::StateChanged { .. } => {}
    }
    Ok(())
}

fn load_profile(path: &Path) -> anyhow::Result<CalibrationProfile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read profile {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid profile {}", path.display()))
}
