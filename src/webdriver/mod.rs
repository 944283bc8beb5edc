//! Minimal W3C WebDriver client backing the action surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::session::{ActionSurface, ElementRef, Marker, MarkerKind, SurfaceFactory};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecc";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CLICK_SCRIPT: &str = "arguments[0].scrollIntoView({block: 'center'}); arguments[0].click();";

/// `(using, value)` pair for a find-elements request.
fn locator(marker: &Marker) -> (&'static str, String) {
    match marker.kind {
        MarkerKind::Css => ("css selector", marker.value.clone()),
        MarkerKind::XPath => ("xpath", marker.value.clone()),
        MarkerKind::Id => ("css selector", format!("[id=\"{}\"]", marker.value)),
    }
}

/// Browser arguments go under both Chromium vendor keys; each driver ignores the other.
fn capabilities(browser_name: &str, browser_args: &[String]) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": browser_name,
                "ms:edgeOptions": { "args": browser_args },
                "goog:chromeOptions": { "args": browser_args }
            }
        }
    })
}

/// Unwrap the `value` member, turning driver-reported errors into `Err`.
fn unwrap_value(ok: bool, body: Value) -> Result<Value> {
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        bail!("webdriver error '{error}': {message}");
    }
    if !ok {
        bail!("webdriver request failed: {body}");
    }
    Ok(value)
}

fn element_refs(value: &Value) -> Vec<ElementRef> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(|id| ElementRef(id.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn element_arg(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.0 })
}

/// One browser session on a WebDriver server.
pub struct WebDriverSession {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    pub async fn connect(server_url: &str, browser_name: &str, browser_args: &[String]) -> Result<Self> {
        let client = Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let base = server_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{base}/session"))
            .json(&capabilities(browser_name, browser_args))
            .send()
            .await
            .context("Failed to reach WebDriver server")?;
        let ok = response.status().is_success();
        let body: Value = response.json().await.context("Invalid new-session response")?;
        let value = unwrap_value(ok, body)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("new-session response without sessionId"))?
            .to_string();

        Ok(Self {
            client,
            base,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{path}", self.base, self.session_id);
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == Method::POST {
            request = request.json(&json!({}));
        }
        let response = request
            .send()
            .await
            .map_err(|err| err.without_url())
            .with_context(|| format!("webdriver {method} {path} failed"))?;
        let ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("webdriver {method} {path}: invalid response"))?;
        unwrap_value(ok, body)
    }

    async fn string(&self, path: &str) -> Result<String> {
        let value = self.command(Method::GET, path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl ActionSurface for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn find_all(&self, marker: &Marker) -> Result<Vec<ElementRef>> {
        let (using, value) = locator(marker);
        let found = self
            .command(Method::POST, "/elements", Some(json!({ "using": using, "value": value })))
            .await?;
        Ok(element_refs(&found))
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": CLICK_SCRIPT, "args": [element_arg(element)] })),
        )
        .await
        .map(|_| ())
    }

    async fn read_text(&self, element: &ElementRef) -> Result<String> {
        self.string(&format!("/element/{}/text", element.0)).await
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let value = self
            .command(Method::GET, &format!("/element/{}/attribute/{name}", element.0), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool> {
        let value = self
            .command(Method::GET, &format!("/element/{}/displayed", element.0), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn title(&self) -> Result<String> {
        self.string("/title").await
    }

    async fn page_source(&self) -> Result<String> {
        self.string("/source").await
    }

    async fn current_url(&self) -> Result<String> {
        self.string("/url").await
    }

    async fn refresh(&self) -> Result<()> {
        self.command(Method::POST, "/refresh", None).await.map(|_| ())
    }

    async fn quit(&self) -> Result<()> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}

/// Opens a fresh browser session per worker.
pub struct WebDriverFactory {
    server_url: String,
    browser_name: String,
    browser_args: Vec<String>,
}

impl WebDriverFactory {
    pub fn new(server_url: impl Into<String>, browser_name: impl Into<String>, browser_args: Vec<String>) -> Self {
        Self {
            server_url: server_url.into(),
            browser_name: browser_name.into(),
            browser_args,
        }
    }
}

#[async_trait]
impl SurfaceFactory for WebDriverFactory {
    async fn open(&self, label: &str) -> Result<Arc<dyn ActionSurface>> {
        let session = WebDriverSession::connect(&self.server_url, &self.browser_name, &self.browser_args)
            .await
            .with_context(|| format!("[{label}] failed to start browser session"))?;
        log::info!("[{label}] browser session {} opened", session.session_id());
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_map_marker_kinds() {
        assert_eq!(locator(&Marker::css(".a .b")), ("css selector", ".a .b".to_string()));
        assert_eq!(locator(&Marker::xpath("//span")), ("xpath", "//span".to_string()));
        assert_eq!(
            locator(&Marker::id("grid_gm_item")),
            ("css selector", "[id=\"grid_gm_item\"]".to_string())
        );
    }

    #[test]
    fn element_references_are_extracted() {
        let value = json!([
            { ELEMENT_KEY: "e1" },
            { "other": "x" },
            { ELEMENT_KEY: "e2" }
        ]);
        assert_eq!(
            element_refs(&value),
            vec![ElementRef("e1".into()), ElementRef("e2".into())]
        );
        assert!(element_refs(&Value::Null).is_empty());
    }

    #[test]
    fn driver_errors_surface() {
        let err = unwrap_value(
            false,
            json!({ "value": { "error": "no such element", "message": "gone" } }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no such element"));

        assert_eq!(unwrap_value(true, json!({ "value": "Lobby" })).unwrap(), json!("Lobby"));
        assert!(unwrap_value(false, json!({})).is_err());
    }

    #[test]
    fn capabilities_carry_browser_args() {
        let caps = capabilities("MicrosoftEdge", &["--incognito".to_string()]);
        let matched = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(matched["browserName"], "MicrosoftEdge");
        assert_eq!(matched["ms:edgeOptions"]["args"][0], "--incognito");
        assert_eq!(matched["goog:chromeOptions"]["args"][0], "--incognito");
    }
}
