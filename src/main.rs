#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
//! Voice Recorder - record from the microphone, keep the takes as WAV files

mod app;
mod audio;
mod config;
mod naming;
mod producer;
mod records;
mod settings;
mod writer;

use anyhow::Context;
use app::VoiceRecorderApp;
use audio::CpalCapture;
use eframe::egui;
use producer::RecordProducer;
use settings::AppSettings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_recorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = AppSettings::load();
    let args: Vec<String> = std::env::args().skip(1).collect();

    // `--get <address>` prints one setting, e.g. `--get recorder.freq`.
    if let Some(position) = args.iter().position(|arg| arg == "--get") {
        let address = args
            .get(position + 1)
            .context("--get needs a setting address such as recorder.freq")?;
        println!("{}", settings.get_setting(address)?);
        return Ok(());
    }

    let records_dir = settings
        .records_dir()
        .context("Could not prepare the records directory")?;
    tracing::info!(records = %records_dir.display(), "Starting Voice Recorder");

    // `--once` records a single fixed-length take without opening a window.
    if args.iter().any(|arg| arg == "--once") {
        let producer = RecordProducer::new(CpalCapture, settings.recorder.clone(), records_dir);
        tracing::info!(
            seconds = producer.settings().duration,
            dir = %producer.records_dir().display(),
            "Recording one take"
        );
        let path = producer.produce_record()?;
        // Release builds on Windows have no console, so the log carries the path too.
        tracing::info!(path = %path.display(), "Record saved");
        println!("{}", path.display());
        return Ok(());
    }

    let mut viewport = egui::ViewportBuilder::default()
        .with_inner_size([450.0, 500.0])
        .with_min_inner_size([380.0, 400.0])
        .with_title("Voice Recorder App");

    if settings.gui.always_on_top {
        viewport = viewport.with_always_on_top();
    }

    eframe::run_native(
        "Voice Recorder",
        eframe::NativeOptions {
            viewport,
            ..Default::default()
        },
        Box::new(move |cc| Ok(Box::new(VoiceRecorderApp::new(cc, settings, records_dir)))),
    )
    .map_err(|e| anyhow::anyhow!("Window failed: {}", e))
}
