//! In-memory collaborators for driving sessions in tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image::GrayImage;

use crate::capture::{CaptureTool, RecordingProcess};
use crate::models::TargetKind;
use crate::notify::Notifier;

use super::markers;
use super::surface::{ActionSurface, ElementRef, Marker};

const HEALTHY_TITLE: &str = "Lobby";
const HEALTHY_SOURCE: &str = "<html><body></body></html>";

struct Page {
    title: String,
    source: String,
    url: String,
    heal_on_refresh: bool,
    in_target: bool,
    action_available: bool,
    lobby: Vec<String>,
    lobby_overlay: bool,
    has_join: bool,
    selected_card: Option<String>,
    balances: VecDeque<Option<u64>>,
    balance: Option<u64>,
    clicks: Vec<String>,
    navigations: Vec<String>,
    quit: bool,
}

/// Scripted page: starts inside a target with a balance of 50 000.
pub struct FakeSurface {
    page: Mutex<Page>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self {
            page: Mutex::new(Page {
                title: HEALTHY_TITLE.into(),
                source: HEALTHY_SOURCE.into(),
                url: "https://host/game".into(),
                heal_on_refresh: false,
                in_target: true,
                action_available: true,
                lobby: Vec::new(),
                lobby_overlay: false,
                has_join: false,
                selected_card: None,
                balances: VecDeque::new(),
                balance: Some(50_000),
                clicks: Vec::new(),
                navigations: Vec::new(),
                quit: false,
            }),
        }
    }

    fn page(&self) -> std::sync::MutexGuard<'_, Page> {
        self.page.lock().unwrap()
    }

    pub fn set_page(&self, title: &str, source: &str, url: &str) {
        let mut p = self.page();
        p.title = title.into();
        p.source = source.into();
        p.url = url.into();
    }

    pub fn heal_on_refresh(&self, heal: bool) {
        self.page().heal_on_refresh = heal;
    }

    pub fn set_in_target(&self, inside: bool) {
        self.page().in_target = inside;
    }

    pub fn set_action_available(&self, available: bool) {
        self.page().action_available = available;
    }

    pub fn set_lobby(&self, titles: &[&str], has_join: bool) {
        let mut p = self.page();
        p.lobby = titles.iter().map(|t| t.to_string()).collect();
        p.has_join = has_join;
    }

    /// Inside the target but the action control is gone and the lobby cards show; opening
    /// a card restores the page.
    pub fn strand_in_lobby(&self) {
        let mut p = self.page();
        p.action_available = false;
        p.lobby_overlay = true;
    }

    /// Queue balance reads; the last value repeats once the queue is drained.
    pub fn push_balances(&self, values: &[Option<u64>]) {
        self.page().balances.extend(values.iter().copied());
    }

    pub fn clicks(&self) -> Vec<String> {
        self.page().clicks.clone()
    }

    pub fn click_count(&self, id: &str) -> usize {
        self.page().clicks.iter().filter(|c| c.as_str() == id).count()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.page().navigations.clone()
    }

    pub fn was_quit(&self) -> bool {
        self.page().quit
    }

    fn heal(page: &mut Page) {
        page.title = HEALTHY_TITLE.into();
        page.source = HEALTHY_SOURCE.into();
        if page.url.contains("404") {
            page.url = "https://host/game".into();
        }
    }

    fn enter(page: &mut Page) {
        page.in_target = true;
        if page.lobby_overlay {
            page.lobby_overlay = false;
            page.action_available = true;
        }
    }

    fn resolve(page: &Page, marker: &Marker) -> Vec<ElementRef> {
        let one = |id: &str| vec![ElementRef(id.to_string())];
        let kinds = [TargetKind::Standard, TargetKind::Special];

        if kinds.iter().any(|k| markers::action_button(*k) == *marker) {
            return if page.in_target && page.action_available { one("spin") } else { Vec::new() };
        }
        if kinds.iter().any(|k| markers::balance(*k) == *marker) {
            return if page.in_target { one("balance") } else { Vec::new() };
        }
        if markers::in_target_indicators().contains(marker) {
            return if page.in_target { one("indicator") } else { Vec::new() };
        }
        if markers::cashout_candidates().contains(marker) {
            return if page.in_target { one("cashout") } else { Vec::new() };
        }
        if *marker == markers::lobby_card() {
            if page.in_target && !page.lobby_overlay {
                return Vec::new();
            }
            return page.lobby.iter().map(|t| ElementRef(format!("card:{t}"))).collect();
        }
        if *marker == markers::join_button() {
            return if page.has_join && page.selected_card.is_some() { one("join") } else { Vec::new() };
        }
        if *marker == markers::exit_button() {
            return if page.in_target { one("exit") } else { Vec::new() };
        }
        if *marker == markers::confirm_button() {
            return if page.in_target { one("confirm") } else { Vec::new() };
        }
        if *marker == markers::collect_button() {
            return one("collect");
        }
        if let Some(label) = marker
            .value
            .strip_prefix("//span[normalize-space(text())='")
            .and_then(|rest| rest.strip_suffix("']"))
        {
            return vec![ElementRef(format!("pos:{label}"))];
        }
        Vec::new()
    }
}

#[async_trait]
impl ActionSurface for FakeSurface {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut p = self.page();
        p.navigations.push(url.to_string());
        p.url = url.to_string();
        Self::heal(&mut p);
        Ok(())
    }

    async fn find_all(&self, marker: &Marker) -> Result<Vec<ElementRef>> {
        Ok(Self::resolve(&self.page(), marker))
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        let mut p = self.page();
        let id = element.0.clone();
        if let Some(title) = id.strip_prefix("card:") {
            p.selected_card = Some(title.to_string());
            if !p.has_join {
                Self::enter(&mut p);
            }
        } else if id == "join" {
            Self::enter(&mut p);
        } else if id == "confirm" {
            p.in_target = false;
            p.selected_card = None;
        }
        p.clicks.push(id);
        Ok(())
    }

    async fn read_text(&self, element: &ElementRef) -> Result<String> {
        let mut p = self.page();
        if element.0 != "balance" {
            bail!("no text on {}", element.0);
        }
        if let Some(next) = p.balances.pop_front() {
            p.balance = next;
        }
        Ok(p.balance.map(|b| format!("{b}")).unwrap_or_default())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        if name != "title" {
            return Ok(None);
        }
        Ok(element.0.strip_prefix("card:").map(str::to_string))
    }

    async fn is_displayed(&self, _element: &ElementRef) -> Result<bool> {
        Ok(true)
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page().title.clone())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.page().source.clone())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page().url.clone())
    }

    async fn refresh(&self) -> Result<()> {
        let mut p = self.page();
        if p.heal_on_refresh {
            Self::heal(&mut p);
        }
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.page().quit = true;
        Ok(())
    }
}

pub fn png_bytes(image: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

struct FakeProcess {
    running: Arc<AtomicBool>,
}

impl RecordingProcess for FakeProcess {
    fn poll_running(&mut self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }
}

/// Writes a fixed PNG for every snapshot; recordings run until `finish_recording`.
pub struct FakeCaptureTool {
    frame: Mutex<Vec<u8>>,
    snapshots: AtomicUsize,
    records: AtomicUsize,
    fail_snapshots: AtomicBool,
    running: Arc<AtomicBool>,
}

impl FakeCaptureTool {
    pub fn new(frame: &GrayImage) -> Self {
        Self {
            frame: Mutex::new(png_bytes(frame)),
            snapshots: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
            fail_snapshots: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raw file content for the next snapshots, e.g. an undecodable frame.
    pub fn set_bytes(&self, bytes: &[u8]) {
        *self.frame.lock().unwrap() = bytes.to_vec();
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }

    pub fn finish_recording(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureTool for FakeCaptureTool {
    async fn snapshot(&self, _endpoint: &str, output: &Path, _timeout: Duration) -> bool {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return false;
        }
        let bytes = self.frame.lock().unwrap().clone();
        tokio::fs::write(output, bytes).await.is_ok()
    }

    async fn record(&self, _endpoint: &str, _output: &Path, _duration: Duration) -> Result<Box<dyn RecordingProcess>> {
        self.records.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            running: self.running.clone(),
        }))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, text: &str) -> bool {
        self.messages.lock().unwrap().push(text.to_string());
        true
    }
}
