use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(6);
const RETRIES: u32 = 2;
const BACKOFF_STEP: Duration = Duration::from_millis(800);

/// Outbound text notifications. Failures are logged, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, text: &str) -> bool;
}

/// Lark/Feishu custom-bot webhook.
pub struct LarkNotifier {
    client: Client,
    webhook: Option<String>,
}

fn payload(text: &str) -> Value {
    json!({ "msg_type": "text", "content": { "text": text } })
}

/// Wait before the next try; none after the last one.
fn backoff(attempt: u32) -> Option<Duration> {
    (attempt <= RETRIES).then(|| BACKOFF_STEP * attempt)
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

impl LarkNotifier {
    pub fn new(webhook: Option<String>) -> Result<Self> {
        let webhook = webhook.map(|w| w.trim().to_string()).filter(|w| !w.is_empty());
        match webhook.as_deref() {
            Some(url) => info!("[Lark] webhook configured (length={})", url.len()),
            None => warn!("[Lark] no webhook configured, notifications disabled"),
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, webhook })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }
}

#[async_trait]
impl Notifier for LarkNotifier {
    async fn send_text(&self, text: &str) -> bool {
        let Some(webhook) = self.webhook.as_deref() else {
            debug!("[Lark] disabled, dropping message: {}", preview(text));
            return false;
        };

        let body = payload(text);
        for attempt in 1..=RETRIES + 1 {
            match self.client.post(webhook).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("[Lark] message delivered");
                    return true;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
                    warn!("[Lark] non-2xx response: {status} {detail}");
                }
                Err(err) if err.is_timeout() => {
                    warn!("[Lark] request timed out (try {attempt}/{})", RETRIES + 1);
                }
                Err(err) => {
                    // reqwest errors embed the URL
                    warn!("[Lark] request failed (try {attempt}/{}): {}", RETRIES + 1, err.without_url());
                }
            }
            if let Some(delay) = backoff(attempt) {
                tokio::time::sleep(delay).await;
            }
        }
        warn!("[Lark] giving up after {} attempts", RETRIES + 1);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_a_text_message() {
        let body = payload("hello");
        assert_eq!(body["msg_type"], "text");
        assert_eq!(body["content"]["text"], "hello");
    }

    #[test]
    fn no_backoff_after_last_attempt() {
        let waits: Vec<_> = (1..=RETRIES + 1).map(backoff).collect();
        assert_eq!(
            waits,
            vec![Some(Duration::from_millis(800)), Some(Duration::from_millis(1600)), None]
        );
    }

    #[tokio::test]
    async fn disabled_without_webhook() {
        let notifier = LarkNotifier::new(Some("   ".into())).unwrap();
        assert!(!notifier.is_enabled());
        assert!(!notifier.send_text("ignored").await);
        assert!(LarkNotifier::new(Some("https://hook".into())).unwrap().is_enabled());
    }
}
