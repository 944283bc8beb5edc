pub mod capture;
pub mod control;
pub mod coordinator;
pub mod detection;
pub mod models;
pub mod notify;
pub mod session;
pub mod settings;
pub mod utils;
pub mod webdriver;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};

use capture::{CaptureManager, FfmpegTool};
use coordinator::Coordinator;
use detection::DetectionEngine;
use notify::{LarkNotifier, Notifier};
use session::{SessionFleet, SessionServices, SessionTuning, WorkerConfig};
use settings::{Settings, SETTINGS_FILE, WEBHOOK_ENV};
use webdriver::WebDriverFactory;

/// Entry point used by the binary. The first argument, if any, is the settings file.
pub fn run() {
    utils::logging::init();

    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run_with(settings_path));
    // stdin reads may still be parked on a blocking thread
    runtime.shutdown_background();

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run_with(settings_path: PathBuf) -> Result<()> {
    let settings = Settings::load(&settings_path)?.with_webhook_override(std::env::var(WEBHOOK_ENV).ok());

    let targets = settings.load_targets()?;
    if targets.is_empty() {
        warn!("no enabled targets in {}", settings.resolve(&settings.targets_path).display());
        return Ok(());
    }
    let table = settings.load_actions()?;
    info!(
        "{} targets, {} entry keywords, {} auxiliary keywords",
        targets.len(),
        table.keyword_actions.len(),
        table.machine_actions.len()
    );

    let template_dir = settings.resolve(&settings.template_dir);
    let manifest_path = settings.resolve(&settings.manifest_path);
    let engine = tokio::task::spawn_blocking(move || DetectionEngine::load(&template_dir, Some(manifest_path.as_path())))
        .await
        .context("template loading task failed")??;

    let tool = Arc::new(FfmpegTool::new(settings.resolve(&settings.ffmpeg_path)));
    let capture = CaptureManager::new(tool, settings.resolve(&settings.capture_dir))?;
    let notifier: Arc<dyn Notifier> = Arc::new(LarkNotifier::new(settings.webhook_url.clone())?);
    let coordinator = Coordinator::new(settings.initial_cadence_secs);

    let services = SessionServices {
        engine: Arc::new(engine),
        capture: Arc::new(capture),
        notifier,
        coordinator: coordinator.clone(),
        tuning: SessionTuning::default(),
    };
    let config = WorkerConfig {
        table: Arc::new(table),
        special_titles: Arc::new(settings.special_titles.clone()),
        factory: Arc::new(WebDriverFactory::new(
            settings.webdriver_url.clone(),
            settings.browser_name.clone(),
            settings.browser_args.clone(),
        )),
    };

    let ctrl_c = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("ctrl-c handler unavailable: {err}");
                        return;
                    }
                    info!("ctrl-c received");
                    coordinator.request_stop();
                }
                _ = coordinator.cancelled() => {}
            }
        })
    };
    let control = tokio::spawn(control::run_control(coordinator.clone()));

    let fleet = SessionFleet::launch(targets, config, services).await;
    info!("{} workers running", fleet.len());
    fleet.join().await;

    coordinator.request_stop();
    control.abort();
    ctrl_c.abort();
    info!("shutdown complete");
    Ok(())
}
