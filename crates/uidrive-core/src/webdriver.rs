//! [`RemoteDriver`] over the W3C WebDriver HTTP protocol.
//!
//! Talks to an Appium-compatible server: standard W3C endpoints for
//! sessions, elements, and pointer actions, plus the `appium/device/*`
//! extensions for the foreground activity and the soft keyboard.
//!
//! Server errors are mapped onto [`DriverError`] by their W3C error code
//! (see [`map_w3c_error`]); transport failures become
//! [`DriverError::Http`] so the session layer treats them as a lost session.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::Capabilities;
use crate::driver::{DriverError, RemoteDriver};
use crate::element::{ElementFrame, RemoteElement};
use crate::locator::Strategy;

/// W3C web element identifier key.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Element key used by pre-W3C (JSONWP) servers.
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// Per-request timeout unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for one automation server.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    base: Url,
    http: reqwest::Client,
}

impl WebDriverClient {
    /// Creates a client for `server_url` (e.g. `http://127.0.0.1:4723`).
    pub fn new(server_url: &str) -> Result<Self, DriverError> {
        Self::with_timeout(server_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(server_url: &str, timeout: Duration) -> Result<Self, DriverError> {
        let mut base = Url::parse(server_url)
            .map_err(|e| DriverError::Http(format!("invalid server url '{server_url}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(DriverError::Http(format!(
                "unsupported scheme '{}' in server url",
                base.scheme()
            )));
        }
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Http(e.to_string()))?;
        Ok(Self { base, http })
    }

    pub fn server_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, DriverError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| DriverError::Protocol(format!("bad endpoint '{path}': {e}")))
    }

    /// Send a request and return the whole decoded response body.
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        let url = self.url(path)?;
        debug!(%method, %url, "webdriver request");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        let json = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| DriverError::JsonParse(e.to_string()))?
        };

        if status.is_success() {
            Ok(json)
        } else {
            Err(map_w3c_error(status.as_u16(), &json))
        }
    }

    /// Send a request and return its `value` member.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        let mut json = self.send(method, path, body).await?;
        Ok(json.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        self.request(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        self.request(Method::POST, path, Some(body)).await
    }

    fn element_path(session_id: &str, element_id: &str, command: &str) -> String {
        format!("session/{session_id}/element/{element_id}/{command}")
    }
}

fn transport_error(error: reqwest::Error) -> DriverError {
    if error.is_timeout() {
        DriverError::Timeout
    } else {
        DriverError::Http(error.to_string())
    }
}

/// Map a W3C error response onto a [`DriverError`].
///
/// Looks at `value.error` (falling back to the top-level object) and keeps
/// `value.message` as the detail.
pub fn map_w3c_error(status: u16, body: &Value) -> DriverError {
    let value = body.get("value").filter(|v| v.is_object()).unwrap_or(body);
    let code = value.get("error").and_then(Value::as_str).unwrap_or_default();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    match code {
        "no such element" => DriverError::NoSuchElement(message),
        "stale element reference" => DriverError::StaleElement(message),
        "invalid session id" => DriverError::InvalidSession(message),
        "session not created" => DriverError::SessionNotCreated(message),
        "timeout" | "script timeout" => DriverError::Timeout,
        "" => DriverError::CommandFailed(message),
        other => DriverError::CommandFailed(format!("{other}: {message}")),
    }
}

/// Extract the element id from a web element reference.
fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn expect_string(value: Value, what: &str) -> Result<String, DriverError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(DriverError::Protocol(format!("expected string for {what}, got {other}"))),
    }
}

fn expect_bool(value: Value, what: &str) -> Result<bool, DriverError> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::Protocol(format!("expected boolean for {what}, got {value}")))
}

/// W3C pointer actions for a single-finger swipe.
fn swipe_actions(from: (i32, i32), to: (i32, i32), duration: Duration) -> Value {
    json!({
        "actions": [{
            "type": "pointer",
            "id": "finger1",
            "parameters": {"pointerType": "touch"},
            "actions": [
                {"type": "pointerMove", "duration": 0, "origin": "viewport", "x": from.0, "y": from.1},
                {"type": "pointerDown", "button": 0},
                {"type": "pointerMove", "duration": duration.as_millis() as u64, "origin": "viewport", "x": to.0, "y": to.1},
                {"type": "pointerUp", "button": 0}
            ]
        }]
    })
}

#[async_trait]
impl RemoteDriver for WebDriverClient {
    #[instrument(skip(self, capabilities), level = "debug")]
    async fn create_session(&self, capabilities: &Capabilities) -> Result<String, DriverError> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": capabilities.to_w3c(),
                "firstMatch": [{}]
            }
        });
        let response = self.send(Method::POST, "session", Some(body)).await?;
        response
            .get("value")
            .and_then(|v| v.get("sessionId"))
            .or_else(|| response.get("sessionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::SessionNotCreated("response carried no sessionId".into()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_session(&self, session_id: &str) -> Result<(), DriverError> {
        self.request(Method::DELETE, &format!("session/{session_id}"), None)
            .await
            .map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn current_activity(&self, session_id: &str) -> Result<String, DriverError> {
        let value = self
            .get(&format!("session/{session_id}/appium/device/current_activity"))
            .await?;
        expect_string(value, "current_activity")
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_elements(
        &self,
        session_id: &str,
        strategy: Strategy,
        value: &str,
    ) -> Result<Vec<RemoteElement>, DriverError> {
        let body = json!({"using": strategy.wire_name(), "value": value});
        let found = self.post(&format!("session/{session_id}/elements"), body).await?;
        let Value::Array(items) = found else {
            return Err(DriverError::Protocol(format!("expected element array, got {found}")));
        };
        items
            .iter()
            .map(|item| {
                element_id(item)
                    .map(RemoteElement::new)
                    .ok_or_else(|| DriverError::Protocol(format!("not a web element: {item}")))
            })
            .collect()
    }

    async fn is_displayed(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError> {
        let value = self.get(&Self::element_path(session_id, element_id, "displayed")).await?;
        expect_bool(value, "displayed")
    }

    async fn is_enabled(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError> {
        let value = self.get(&Self::element_path(session_id, element_id, "enabled")).await?;
        expect_bool(value, "enabled")
    }

    #[instrument(skip(self), level = "debug")]
    async fn click(&self, session_id: &str, element_id: &str) -> Result<(), DriverError> {
        self.post(&Self::element_path(session_id, element_id, "click"), json!({}))
            .await
            .map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear(&self, session_id: &str, element_id: &str) -> Result<(), DriverError> {
        self.post(&Self::element_path(session_id, element_id, "clear"), json!({}))
            .await
            .map(drop)
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn send_keys(
        &self,
        session_id: &str,
        element_id: &str,
        text: &str,
    ) -> Result<(), DriverError> {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let body = json!({"text": text, "value": chars});
        self.post(&Self::element_path(session_id, element_id, "value"), body)
            .await
            .map(drop)
    }

    async fn text(&self, session_id: &str, element_id: &str) -> Result<String, DriverError> {
        let value = self.get(&Self::element_path(session_id, element_id, "text")).await?;
        expect_string(value, "text")
    }

    async fn window_rect(&self, session_id: &str) -> Result<ElementFrame, DriverError> {
        let value = self.get(&format!("session/{session_id}/window/rect")).await?;
        serde_json::from_value(value).map_err(|e| DriverError::JsonParse(e.to_string()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn swipe(
        &self,
        session_id: &str,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<(), DriverError> {
        let path = format!("session/{session_id}/actions");
        self.post(&path, swipe_actions(from, to, duration)).await?;
        // Release input state so the next gesture starts clean.
        self.request(Method::DELETE, &path, None).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn back(&self, session_id: &str) -> Result<(), DriverError> {
        self.post(&format!("session/{session_id}/back"), json!({}))
            .await
            .map(drop)
    }

    async fn hide_keyboard(&self, session_id: &str) -> Result<(), DriverError> {
        self.post(
            &format!("session/{session_id}/appium/device/hide_keyboard"),
            json!({}),
        )
        .await
        .map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn screenshot(&self, session_id: &str) -> Result<Vec<u8>, DriverError> {
        let value = self.get(&format!("session/{session_id}/screenshot")).await?;
        let encoded = expect_string(value, "screenshot")?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DriverError::Protocol(format!("screenshot is not base64: {e}")))
    }

    async fn page_source(&self, session_id: &str) -> Result<String, DriverError> {
        let value = self.get(&format!("session/{session_id}/source")).await?;
        expect_string(value, "source")
    }
}
