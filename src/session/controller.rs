use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::time::{sleep, Instant};

use crate::capture::{discard, CaptureManager, DuplicateVerdict};
use crate::coordinator::cadence::{is_fastest_tier, jittered_sleep, settle_delay};
use crate::coordinator::Coordinator;
use crate::detection::{load_frame, DetectionContext, DetectionEngine};
use crate::models::{ActionTable, ResolvedActions, TargetConfig, TargetKind};
use crate::notify::Notifier;
use crate::utils::file_timestamp;

use super::health::{probe_due, repair_broken_page};
use super::markers;
use super::recovery::{enter_target, exit_and_reenter, is_in_target, safe_click, tap_positions};
use super::state::{compare_balances, Observation, SessionPhase, SessionState};
use super::surface::ActionSurface;
use super::tuning::SessionTuning;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionServices {
    pub engine: Arc<DetectionEngine>,
    pub capture: Arc<CaptureManager>,
    pub notifier: Arc<dyn Notifier>,
    pub coordinator: Coordinator,
    pub tuning: SessionTuning,
}

/// What the detection step did this iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// A recording owns the target; the frame was captured and dropped unscored.
    Suppressed,
    CaptureFailed,
    NoHit,
    /// Primary tag hit (inverted rule).
    Anomaly(String),
    /// Error tag hit (normal rule); frame kept, no recording.
    ErrorScreen(String),
    /// Frame could not be decoded; kept for inspection.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Parked,
    RecordingGrace,
    Recovered,
    NotInTarget,
    ActionFailed,
    Acted {
        observation: Observation,
        auxiliary_fired: bool,
        detection: Option<DetectionOutcome>,
    },
}

enum Scan {
    Primary(String),
    Error(String),
    Nothing,
}

/// Drives one target: owns its action surface and all per-target state.
pub struct SessionController {
    target: TargetConfig,
    label: String,
    kind: TargetKind,
    detection_tag: Option<String>,
    actions: ResolvedActions,
    surface: Arc<dyn ActionSurface>,
    services: SessionServices,
    state: SessionState,
}

impl SessionController {
    pub fn new(
        target: TargetConfig,
        table: &ActionTable,
        special_titles: &[String],
        surface: Arc<dyn ActionSurface>,
        services: SessionServices,
    ) -> Self {
        let label = target.label().to_string();
        let kind = target.kind(special_titles);
        let actions = table.resolve(target.title());
        let detection_tag = target
            .detection_tag
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| table.infer_tag(target.title_code.as_deref()));

        match detection_tag.as_deref() {
            Some(tag) => log_info!("[{label}] kind={} detection tag={tag}", kind.as_str()),
            None => log_warn!("[{label}] kind={} no detection tag, anomaly detection off", kind.as_str()),
        }
        if let Some((kw, seq)) = actions.auxiliary.as_ref() {
            log_info!("[{label}] auxiliary sequence '{kw}': {} positions", seq.positions.len());
        }

        Self {
            target,
            label,
            kind,
            detection_tag,
            actions,
            surface,
            services,
            state: SessionState::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn detection_tag(&self) -> Option<&str> {
        self.detection_tag.as_deref()
    }

    /// Raise or clear this session's private pause.
    pub fn set_auto_pause(&mut self, paused: bool) {
        self.state.auto_pause = paused;
    }

    fn tuning(&self) -> &SessionTuning {
        &self.services.tuning
    }

    fn entry_positions(&self) -> Option<Vec<String>> {
        self.actions.entry.as_ref().map(|(_, positions)| positions.clone())
    }

    /// Sleep that returns early once stop is requested.
    async fn pause_for(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.services.coordinator.cancelled() => {}
        }
    }

    /// Open the endpoint and enter the target from the lobby.
    pub async fn bootstrap(&mut self) -> Result<()> {
        self.state.phase = SessionPhase::Init;
        self.surface
            .navigate(&self.target.url)
            .await
            .with_context(|| format!("[{}] failed to open action surface", self.label))?;
        log_info!("[{}] surface opened", self.label);

        self.state.phase = SessionPhase::EnsuringInGame;
        let Some(code) = self.target.title_code.clone().filter(|c| !c.is_empty()) else {
            return Ok(());
        };
        let entry = self.entry_positions();
        let surface = self.surface.clone();
        if !is_in_target(surface.as_ref(), &self.label).await {
            let timings = self.tuning().surface;
            if enter_target(surface.as_ref(), &code, entry.as_deref(), &timings, &self.label).await {
                self.pause_for(timings.after_entry).await;
            } else {
                log_warn!("[{}] initial entry failed, retrying from the loop", self.label);
            }
        }
        Ok(())
    }

    /// Iterate until the global stop is observed, then release the surface.
    pub async fn run(&mut self) {
        log_info!("[{}] session loop started", self.label);
        while !self.services.coordinator.is_stopped() {
            match self.iterate().await {
                Ok(outcome) => log_debug!("[{}] {:?}", self.label, outcome),
                Err(err) => {
                    log_error!("[{}] iteration failed: {err:#}", self.label);
                    self.capture_diagnostic().await;
                    self.pause_for(self.tuning().error_backoff).await;
                }
            }
        }
        self.state.phase = SessionPhase::Stopped;
        if let Err(err) = self.surface.quit().await {
            log_warn!("[{}] failed to close surface: {err:#}", self.label);
        }
        log_info!("[{}] session stopped", self.label);
    }

    /// One pass of the session state machine.
    pub async fn iterate(&mut self) -> Result<IterationOutcome> {
        if self.services.coordinator.is_paused() || self.state.auto_pause {
            self.state.phase = SessionPhase::Paused;
            self.pause_for(self.tuning().park_interval).await;
            return Ok(IterationOutcome::Parked);
        }

        let cadence = self.services.coordinator.cadence();
        let fastest = is_fastest_tier(cadence);
        let surface = self.surface.clone();
        let surface = surface.as_ref();

        if probe_due(self.state.last_health_probe, self.tuning().health_interval) {
            self.state.phase = SessionPhase::CheckingHealth;
            self.state.last_health_probe = Some(Instant::now());
            repair_broken_page(surface, &self.target.url, self.tuning().health_settle, &self.label).await;
        }

        if self.state.recording.within_grace(self.tuning().recording_grace) {
            log_debug!("[{}] recording just started, holding actions", self.label);
            self.pause_for(self.tuning().grace_poll).await;
            return Ok(IterationOutcome::RecordingGrace);
        }

        let before = self.read_balance().await;
        if let Some(balance) = before.filter(|b| *b < self.tuning().low_resource_floor) {
            self.recover(balance, fastest).await;
            return Ok(IterationOutcome::Recovered);
        }

        self.state.phase = SessionPhase::EnsuringInGame;
        if !is_in_target(surface, &self.label).await && !self.reenter().await {
            self.pause_for(self.tuning().surface.entry_retry).await;
            return Ok(IterationOutcome::NotInTarget);
        }

        self.state.phase = SessionPhase::Acting;
        if !self.act().await {
            log_warn!("[{}] action failed, trying to re-enter", self.label);
            self.reenter().await;
            self.pause_for(self.tuning().surface.action_retry).await;
            return Ok(IterationOutcome::ActionFailed);
        }
        if fastest {
            self.state.action_count += 1;
        }

        self.state.phase = SessionPhase::ObservingChange;
        self.pause_for(self.tuning().scaled(settle_delay(cadence))).await;
        let after = self.read_balance().await;
        let observation = compare_balances(before, after, self.state.last_balance, fastest);
        if after.is_some() {
            self.state.last_balance = after;
        }
        let auxiliary_fired = self.state.observe(observation, self.tuning().trigger_interval);
        if auxiliary_fired {
            self.run_auxiliary().await;
        }

        self.state.phase = SessionPhase::PeriodicDetection;
        let detection = if self.detection_due(fastest) {
            Some(self.detect(fastest).await?)
        } else {
            None
        };

        self.state.phase = SessionPhase::Waiting;
        self.pause_for(self.tuning().scaled(jittered_sleep(cadence))).await;

        Ok(IterationOutcome::Acted {
            observation,
            auxiliary_fired,
            detection,
        })
    }

    async fn read_balance(&self) -> Option<u64> {
        let found = self.surface.find_all(&markers::balance(self.kind)).await.ok()?;
        let element = found.first()?;
        match self.surface.read_text(element).await {
            Ok(text) => markers::parse_balance(&text),
            Err(err) => {
                log_debug!("[{}] balance unreadable: {err:#}", self.label);
                None
            }
        }
    }

    async fn recover(&mut self, balance: u64, fastest: bool) {
        self.state.phase = SessionPhase::LowResourceRecovery;
        let timings = if fastest {
            self.tuning().fast_recovery
        } else {
            self.tuning().recovery
        };
        let entry = self.entry_positions();
        let surface = self.surface.clone();
        let ok = exit_and_reenter(
            surface.as_ref(),
            balance,
            self.target.title_code.as_deref(),
            entry.as_deref(),
            &timings,
            &self.tuning().surface,
            &self.label,
        )
        .await;
        if !ok {
            log_error!("[{}] low-resource recovery failed, will retry", self.label);
        }
        self.state.last_balance = None;
        self.state.phase = SessionPhase::EnsuringInGame;
        self.pause_for(timings.cooldown).await;
    }

    async fn reenter(&mut self) -> bool {
        let Some(code) = self.target.title_code.clone().filter(|c| !c.is_empty()) else {
            log_warn!("[{}] no title code to re-enter with", self.label);
            return false;
        };
        log_warn!("[{}] re-entering {code}", self.label);
        let entry = self.entry_positions();
        let timings = self.tuning().surface;
        let surface = self.surface.clone();
        if enter_target(surface.as_ref(), &code, entry.as_deref(), &timings, &self.label).await {
            self.pause_for(timings.after_entry).await;
            true
        } else {
            false
        }
    }

    async fn act(&self) -> bool {
        let marker = markers::action_button(self.kind);
        match self
            .surface
            .wait_until_present(&marker, self.tuning().surface.action_wait)
            .await
        {
            Ok(found) => match found.first() {
                Some(button) => safe_click(self.surface.as_ref(), button, &self.label).await,
                None => false,
            },
            Err(err) => {
                log_warn!("[{}] action control unavailable: {err:#}", self.label);
                false
            }
        }
    }

    async fn run_auxiliary(&self) {
        let Some((keyword, sequence)) = self.actions.auxiliary.as_ref() else {
            log_info!(
                "[{}] no change for {} actions, no auxiliary sequence configured",
                self.label,
                self.tuning().trigger_interval
            );
            return;
        };
        log_info!(
            "[{}] no change for {} actions, running '{keyword}'",
            self.label,
            self.tuning().trigger_interval
        );
        tap_positions(
            self.surface.as_ref(),
            &sequence.positions,
            sequence.collect,
            &self.tuning().surface,
            &self.label,
        )
        .await;
    }

    fn detection_due(&self, fastest: bool) -> bool {
        if !self.target.enable_detection || self.target.capture_source().is_none() {
            return false;
        }
        if fastest {
            let every = u64::from(self.tuning().fast_detection_every.max(1));
            return self.state.action_count % every == 0;
        }
        true
    }

    fn detection_context(&self, source: &str) -> DetectionContext {
        let title = self
            .target
            .title_code
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| self.detection_tag.clone())
            .unwrap_or_default();
        DetectionContext::new(source, title)
    }

    async fn detect(&mut self, fastest: bool) -> Result<DetectionOutcome> {
        let Some((source, endpoint)) = self
            .target
            .capture_source()
            .map(|(s, e)| (s.to_string(), e.to_string()))
        else {
            return Ok(DetectionOutcome::CaptureFailed);
        };
        let timestamp = file_timestamp(Local::now());
        let timeout = if fastest {
            self.tuning().fast_snapshot_timeout
        } else {
            self.tuning().snapshot_timeout
        };
        let capture = self.services.capture.clone();

        if self.state.recording.is_active() {
            let warm = capture.frame_path(&self.label, &timestamp, "_warm");
            capture.capture_and_discard(&self.label, &endpoint, &warm, timeout).await;
            return Ok(DetectionOutcome::Suppressed);
        }

        let frame = capture.frame_path(&self.label, &timestamp, "");
        if !capture.snapshot(&endpoint, &frame, timeout).await {
            log_warn!("[{}] snapshot failed", self.label);
            return Ok(DetectionOutcome::CaptureFailed);
        }

        if !fastest {
            if let Some(DuplicateVerdict::RunReached(n)) = capture.check_duplicate(&self.label, &frame).await {
                self.services
                    .notifier
                    .send_text(&format!("[{}] capture source returned {n} identical frames in a row", self.label))
                    .await;
            }
        }

        let scan = self.scan_frame(&frame, &source, fastest).await?;
        match scan {
            Ok(Scan::Primary(template)) => {
                self.on_anomaly(&endpoint, &timestamp, &template, &frame).await;
                Ok(DetectionOutcome::Anomaly(template))
            }
            Ok(Scan::Error(template)) => {
                log_warn!("[{}] error screen {template}, frame kept: {}", self.label, frame.display());
                self.services
                    .notifier
                    .send_text(&format!("[{}] error screen detected ({template})", self.label))
                    .await;
                Ok(DetectionOutcome::ErrorScreen(template))
            }
            Ok(Scan::Nothing) => {
                discard(&frame).await;
                Ok(DetectionOutcome::NoHit)
            }
            Err(err) => {
                log_error!("[{}] frame unreadable, kept {}: {err:#}", self.label, frame.display());
                Ok(DetectionOutcome::Unreadable)
            }
        }
    }

    /// Decode and score off the async runtime. The outer error is a crashed scoring
    /// task; the inner one an unreadable frame.
    async fn scan_frame(&self, frame: &Path, source: &str, fastest: bool) -> Result<Result<Scan>> {
        let engine = self.services.engine.clone();
        let path: PathBuf = frame.to_path_buf();
        let primary_tag = self.detection_tag.clone();
        let error_tag = self
            .target
            .error_tag
            .clone()
            .filter(|t| !t.is_empty() && Some(t) != primary_tag.as_ref());
        let ctx = self.detection_context(source);
        let threshold = self.tuning().detection_threshold;
        let max_templates = self.tuning().fast_max_templates;

        tokio::task::spawn_blocking(move || -> Result<Scan> {
            let image = load_frame(&path)?;
            if let Some(tag) = primary_tag.as_deref() {
                let hit = if fastest {
                    engine.detect_by_manifest_fast(&image, Some(tag), Some(threshold), max_templates)
                } else {
                    engine
                        .detect_by_manifest(&image, Some(tag), Some(threshold), &ctx, false)
                        .hit
                };
                if let Some(template) = hit {
                    return Ok(Scan::Primary(template));
                }
            }
            if let Some(tag) = error_tag.as_deref() {
                if let Some(template) = engine.detect_high_score(&image, Some(tag), Some(threshold), &ctx).hit {
                    return Ok(Scan::Error(template));
                }
            }
            Ok(Scan::Nothing)
        })
        .await
        .context("detection task crashed")
    }

    async fn on_anomaly(&mut self, endpoint: &str, timestamp: &str, template: &str, frame: &Path) {
        log_warn!("[{}] anomaly matched {template}, frame kept: {}", self.label, frame.display());
        if !self.target.enable_recording {
            self.services
                .notifier
                .send_text(&format!("[{}] anomaly detected ({template}), recording disabled", self.label))
                .await;
            return;
        }

        self.state.auto_pause = true;
        let duration = self.tuning().recording_duration;
        let started = self
            .services
            .capture
            .start_recording(&self.label, endpoint, duration, timestamp)
            .await;
        if let Some(mut recording) = started {
            let deadline = Instant::now() + self.tuning().confirm_window;
            let mut confirmed = false;
            while Instant::now() < deadline {
                if recording.is_active() {
                    confirmed = true;
                    break;
                }
                sleep(self.tuning().confirm_poll).await;
            }
            if confirmed {
                log_info!("[{}] recording confirmed running", self.label);
                self.services
                    .notifier
                    .send_text(&format!(
                        "[{}] anomaly detected ({template}), recording {}s",
                        self.label,
                        duration.as_secs()
                    ))
                    .await;
            } else {
                log_warn!("[{}] recording did not confirm within the start window", self.label);
            }
            self.state.recording = recording;
        }
        self.state.auto_pause = false;
    }

    /// Best-effort frame for post-mortem after a failed iteration.
    async fn capture_diagnostic(&self) {
        let Some((_, endpoint)) = self.target.capture_source() else {
            return;
        };
        let timestamp = file_timestamp(Local::now());
        let path = self.services.capture.frame_path(&self.label, &timestamp, "_exception");
        if self
            .services
            .capture
            .snapshot(endpoint, &path, self.tuning().snapshot_timeout)
            .await
        {
            log_info!("[{}] diagnostic frame saved: {}", self.label, path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureTool;
    use crate::detection::{Manifest, TemplateLibrary};
    use crate::session::testing::{FakeCaptureTool, FakeSurface, RecordingNotifier};
    use image::{GrayImage, Luma};

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let (fx, fy) = (x as f64, y as f64);
            let v = 128.0 + 60.0 * (fx * fx * 0.0007 + fy * 0.05).sin() + 50.0 * (fy * fy * 0.0011 - fx * 0.03).cos();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    fn crop(frame: &GrayImage) -> GrayImage {
        image::imageops::crop_imm(frame, 8, 6, 16, 12).to_image()
    }

    fn inverted(img: &GrayImage) -> GrayImage {
        let mut out = img.clone();
        image::imageops::invert(&mut out);
        out
    }

    struct Rig {
        session: SessionController,
        surface: Arc<FakeSurface>,
        tool: Arc<FakeCaptureTool>,
        notifier: Arc<RecordingNotifier>,
        engine: Arc<DetectionEngine>,
        coordinator: Coordinator,
        dir: tempfile::TempDir,
    }

    impl Rig {
        fn jpgs(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .filter(|n| n.ends_with(".jpg"))
                .collect();
            names.sort();
            names
        }
    }

    const TARGET: &str = r#"{
        "url": "https://host/game", "rtmp": "cam1", "rtmp_url": "rtmp://x/cam1",
        "game_title_code": "873-MOREPUFF-02", "template_type": "PUFF",
        "error_template_type": "ERR"
    }"#;

    const MANIFEST: &str = r#"{
        "default_threshold": 0.80,
        "types": {
            "PUFF": {"templates": [{"file": "anomaly.png"}]},
            "ERR": {"templates": [{"file": "err.png"}]}
        }
    }"#;

    const ACTIONS: &str = r#"{
        "machine_actions": {"MOREPUFF": {"positions": ["5,32", "6,32"], "click_take": true}}
    }"#;

    /// `anomaly_present` swaps the primary template for the complement of the frame
    /// region, which scores about -1 and trips the inverted rule.
    fn rig(target_json: &str, anomaly_present: bool, error_present: bool, tuning: SessionTuning) -> Rig {
        let frame = textured(40, 30);
        let region = crop(&frame);
        let anomaly = if anomaly_present { inverted(&region) } else { region.clone() };
        let err = if error_present { region } else { inverted(&crop(&frame)) };
        let library = TemplateLibrary::from_images([
            ("anomaly.png".to_string(), anomaly),
            ("err.png".to_string(), err),
        ]);
        let manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        let engine = Arc::new(DetectionEngine::new(library, Some(manifest)));

        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(FakeCaptureTool::new(&frame));
        let capture = Arc::new(CaptureManager::new(tool.clone() as Arc<dyn CaptureTool>, dir.path()).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = Coordinator::new(1.0);
        let surface = Arc::new(FakeSurface::new());

        let services = SessionServices {
            engine: engine.clone(),
            capture,
            notifier: notifier.clone(),
            coordinator: coordinator.clone(),
            tuning,
        };
        let target: TargetConfig = serde_json::from_str(target_json).unwrap();
        let table: ActionTable = serde_json::from_str(ACTIONS).unwrap();
        let session = SessionController::new(target, &table, &[], surface.clone(), services);
        Rig {
            session,
            surface,
            tool,
            notifier,
            engine,
            coordinator,
            dir,
        }
    }

    fn detection_of(outcome: IterationOutcome) -> Option<DetectionOutcome> {
        match outcome {
            IterationOutcome::Acted { detection, .. } => detection,
            other => panic!("expected an action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn primary_hit_records_then_suppresses_scoring() {
        let mut tuning = SessionTuning::instant();
        tuning.recording_grace = Duration::ZERO;
        let mut r = rig(TARGET, true, false, tuning);

        let outcome = r.session.iterate().await.unwrap();
        assert_eq!(detection_of(outcome), Some(DetectionOutcome::Anomaly("anomaly.png".into())));
        assert_eq!(r.tool.records(), 1);
        assert!(!r.session.state().auto_pause);
        assert_eq!(r.notifier.messages().len(), 1);

        let scored = r.engine.evaluations();
        let snapshots = r.tool.snapshots();
        for _ in 0..3 {
            let outcome = r.session.iterate().await.unwrap();
            assert_eq!(detection_of(outcome), Some(DetectionOutcome::Suppressed));
        }
        assert_eq!(r.engine.evaluations(), scored);
        assert_eq!(r.tool.snapshots(), snapshots + 3);
        assert_eq!(r.tool.records(), 1);
        assert!(r.jpgs().iter().all(|n| !n.contains("_warm")));
        assert_eq!(r.jpgs().len(), 1, "anomaly frame is kept");

        r.tool.finish_recording();
        let outcome = r.session.iterate().await.unwrap();
        assert!(matches!(detection_of(outcome), Some(DetectionOutcome::Anomaly(_))));
        assert_eq!(r.tool.records(), 2);
    }

    #[tokio::test]
    async fn recording_grace_skips_actions() {
        let mut r = rig(TARGET, true, false, SessionTuning::instant());
        r.session.iterate().await.unwrap();
        let clicks = r.surface.click_count("spin");
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::RecordingGrace);
        assert_eq!(r.surface.click_count("spin"), clicks);
    }

    #[tokio::test]
    async fn error_screen_keeps_frame_without_recording() {
        let mut r = rig(TARGET, false, true, SessionTuning::instant());
        let outcome = r.session.iterate().await.unwrap();
        assert_eq!(detection_of(outcome), Some(DetectionOutcome::ErrorScreen("err.png".into())));
        assert_eq!(r.tool.records(), 0);
        assert_eq!(r.jpgs().len(), 1);
        assert_eq!(r.notifier.messages().len(), 1);
        assert!(r.session.state().recording.name().is_none());
    }

    #[tokio::test]
    async fn clean_frame_is_discarded() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        let outcome = r.session.iterate().await.unwrap();
        assert_eq!(detection_of(outcome), Some(DetectionOutcome::NoHit));
        assert!(r.jpgs().is_empty());
        assert!(r.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn unreadable_frame_is_kept() {
        let mut r = rig(TARGET, true, false, SessionTuning::instant());
        r.tool.set_bytes(b"not a frame");
        let outcome = r.session.iterate().await.unwrap();
        assert_eq!(detection_of(outcome), Some(DetectionOutcome::Unreadable));
        assert_eq!(r.tool.records(), 0);
        assert_eq!(r.jpgs().len(), 1);
    }

    #[tokio::test]
    async fn no_change_counter_fires_auxiliary_once() {
        let target = r#"{"url": "u", "game_title_code": "873-MOREPUFF-02", "enable_template_detection": false}"#;
        let mut r = rig(target, false, false, SessionTuning::instant());

        for n in 1..=4 {
            let outcome = r.session.iterate().await.unwrap();
            assert!(matches!(outcome, IterationOutcome::Acted { observation: Observation::Unchanged, .. }));
            assert_eq!(r.session.state().no_change_count, n);
        }
        r.surface.push_balances(&[Some(50_000), Some(49_000)]);
        r.session.iterate().await.unwrap();
        assert_eq!(r.session.state().no_change_count, 0);

        let mut fired = 0;
        for _ in 0..10 {
            if let IterationOutcome::Acted { auxiliary_fired: true, .. } = r.session.iterate().await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(r.session.state().no_change_count, 0);
        assert_eq!(r.surface.click_count("pos:5,32"), 1);
        assert_eq!(r.surface.click_count("pos:6,32"), 1);
        assert_eq!(r.surface.click_count("collect"), 1);
    }

    #[tokio::test]
    async fn low_resource_runs_recovery() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_lobby(&["873-MOREPUFF-02"], false);
        r.surface.push_balances(&[Some(15_000), Some(60_000)]);
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::Recovered);
        assert_eq!(r.surface.click_count("cashout"), 1);
        assert_eq!(r.surface.click_count("confirm"), 1);
        assert_eq!(r.surface.click_count("card:873-MOREPUFF-02"), 1);
        assert_eq!(r.surface.click_count("spin"), 0);
    }

    #[tokio::test]
    async fn healthy_resource_skips_recovery() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.push_balances(&[Some(25_000)]);
        let outcome = r.session.iterate().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Acted { .. }));
        assert_eq!(r.surface.click_count("cashout"), 0);
        assert_eq!(r.surface.click_count("spin"), 1);
    }

    #[tokio::test]
    async fn pause_parks_without_acting() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.coordinator.set_paused(true);
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::Parked);
        assert_eq!(r.session.state().phase, SessionPhase::Paused);
        r.coordinator.set_paused(false);

        r.session.set_auto_pause(true);
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::Parked);
        assert!(r.surface.clicks().is_empty());
    }

    #[tokio::test]
    async fn outside_target_without_card_skips_iteration() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_in_target(false);
        r.surface.set_lobby(&["873-OTHER-01"], false);
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::NotInTarget);
        assert_eq!(r.surface.click_count("spin"), 0);

        r.surface.set_lobby(&["873-MOREPUFF-02"], false);
        assert!(matches!(r.session.iterate().await.unwrap(), IterationOutcome::Acted { .. }));
    }

    #[tokio::test]
    async fn missing_action_control_is_not_fatal() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_action_available(false);
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::ActionFailed);
        r.surface.set_action_available(true);
        assert!(matches!(r.session.iterate().await.unwrap(), IterationOutcome::Acted { .. }));
    }

    #[tokio::test]
    async fn failed_action_reenters_from_the_lobby() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_lobby(&["873-MOREPUFF-02"], false);
        r.surface.strand_in_lobby();
        assert_eq!(r.session.iterate().await.unwrap(), IterationOutcome::ActionFailed);
        assert_eq!(r.surface.click_count("card:873-MOREPUFF-02"), 1);
        assert_eq!(r.surface.click_count("spin"), 0);

        assert!(matches!(r.session.iterate().await.unwrap(), IterationOutcome::Acted { .. }));
        assert_eq!(r.surface.click_count("spin"), 1);
    }

    #[tokio::test]
    async fn failed_snapshot_skips_detection() {
        let mut r = rig(TARGET, true, false, SessionTuning::instant());
        r.tool.fail_snapshots(true);
        let outcome = r.session.iterate().await.unwrap();
        assert_eq!(detection_of(outcome), Some(DetectionOutcome::CaptureFailed));
        assert_eq!(r.engine.evaluations(), 0);
    }

    #[tokio::test]
    async fn fastest_tier_detects_on_interval() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.coordinator.set_cadence(0.05);
        let mut detections = 0;
        for _ in 0..10 {
            if let IterationOutcome::Acted { detection: Some(_), .. } = r.session.iterate().await.unwrap() {
                detections += 1;
            }
        }
        assert_eq!(detections, 2);
        assert_eq!(r.session.state().action_count, 10);
    }

    #[tokio::test]
    async fn broken_page_is_repaired_before_acting() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_page("404 Not Found", "", "https://host/404");
        r.session.iterate().await.unwrap();
        assert_eq!(r.surface.navigations(), vec!["https://host/game".to_string()]);
    }

    #[tokio::test]
    async fn bootstrap_enters_and_run_quits_on_stop() {
        let mut r = rig(TARGET, false, false, SessionTuning::instant());
        r.surface.set_in_target(false);
        r.surface.set_lobby(&["873-MOREPUFF-02"], false);
        r.session.bootstrap().await.unwrap();
        assert_eq!(r.surface.navigations(), vec!["https://host/game".to_string()]);
        assert!(is_in_target(r.surface.as_ref(), "t").await);

        r.coordinator.request_stop();
        r.session.run().await;
        assert_eq!(r.session.state().phase, SessionPhase::Stopped);
        assert!(r.surface.was_quit());
    }

    #[test]
    fn detection_tag_is_inferred_from_title() {
        let target = r#"{"url": "u", "game_title_code": "873-MOREPUFF-02"}"#;
        let r = rig(target, false, false, SessionTuning::instant());
        assert_eq!(r.session.detection_tag(), Some("MOREPUFF"));
    }
}
