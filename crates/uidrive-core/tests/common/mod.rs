//! Shared test helpers for uidrive-core integration tests.
//!
//! Two kinds of fixtures live here: session/page builders on top of the
//! in-memory [`MockDriver`], and a scriptable HTTP server that speaks just
//! enough WebDriver for [`WebDriverClient`] tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use uidrive_core::config::SessionConfig;
use uidrive_core::locator::{Locator, Strategy};
use uidrive_core::mock::{MockDriver, MockElement};
use uidrive_core::page::{Page, PageDescriptor, ReadySignal};
use uidrive_core::session::SessionClient;
use uidrive_core::webdriver::{WebDriverClient, ELEMENT_KEY};

// ---------------------------------------------------------------------------
// MockDriver fixtures
// ---------------------------------------------------------------------------

pub const EMAIL_ID: &str = "com.example.shop:id/edit_email";
pub const PASSWORD_ID: &str = "com.example.shop:id/edit_password";
pub const SIGN_IN_ID: &str = "com.example.shop:id/btn_sign_in";
pub const SIGN_IN_XPATH: &str = "//android.widget.Button[@text='Sign In']";

/// A session client over `driver` with default timings.
pub fn session_client(driver: Arc<MockDriver>) -> Arc<SessionClient> {
    Arc::new(SessionClient::new(driver, SessionConfig::default()))
}

/// The login screen: email, password, and a sign-in button with an XPath
/// fallback. Ready once the email field shows.
pub fn login_descriptor() -> PageDescriptor {
    PageDescriptor::new("login", ReadySignal::Elements(vec!["email".into()]))
        .element("email", Locator::id(EMAIL_ID))
        .element("password", Locator::id(PASSWORD_ID))
        .element(
            "sign_in",
            Locator::id(SIGN_IN_ID).or(Locator::xpath(SIGN_IN_XPATH)),
        )
}

/// Populate `driver` with the fields of the login screen.
pub fn add_login_fields(driver: &MockDriver) {
    driver.add_element(MockElement::new(Strategy::Id, EMAIL_ID).text("Email"));
    driver.add_element(MockElement::new(Strategy::Id, PASSWORD_ID).text("Password"));
}

pub fn login_page(session: Arc<SessionClient>) -> Page {
    Page::from_session(Arc::new(login_descriptor()), session)
}

// ---------------------------------------------------------------------------
// Mock WebDriver HTTP server
// ---------------------------------------------------------------------------

/// One request seen by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// What the mock server does with a request.
pub enum MockBehavior {
    /// Reply with this status and JSON body.
    Respond(u16, Value),
    /// Read the request and close the connection without replying.
    Drop,
    /// Read the request and never reply.
    Hang,
}

pub type Router = Arc<dyn Fn(&RecordedRequest) -> MockBehavior + Send + Sync>;

/// Handle to a running mock server.
pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> WebDriverClient {
        WebDriverClient::with_timeout(&self.url(), Duration::from_secs(2)).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose method and path match exactly.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

/// Start an HTTP/1.1 server that answers every request through `router`.
///
/// Each connection serves a single request and is then closed.
pub async fn mock_webdriver(router: Router) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let router = router.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }

                let mut body = vec![0u8; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }
                let request = RecordedRequest {
                    method,
                    path,
                    body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                };
                recorded.lock().unwrap().push(request.clone());

                match router(&request) {
                    MockBehavior::Respond(status, json) => {
                        let payload = json.to_string();
                        let response = format!(
                            "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                            payload.len()
                        );
                        let mut stream = reader.into_inner();
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.flush().await;
                    }
                    MockBehavior::Drop => {}
                    MockBehavior::Hang => std::future::pending::<()>().await,
                }
            });
        }
    });

    MockServer { addr, requests }
}

/// `{"value": value}` with status 200.
pub fn ok(value: Value) -> MockBehavior {
    MockBehavior::Respond(200, json!({ "value": value }))
}

/// A W3C error response.
pub fn w3c_error(status: u16, error: &str, message: &str) -> MockBehavior {
    MockBehavior::Respond(
        status,
        json!({ "value": { "error": error, "message": message } }),
    )
}

/// A W3C web element reference.
pub fn web_element(id: &str) -> Value {
    let mut element = serde_json::Map::new();
    element.insert(ELEMENT_KEY.to_string(), Value::String(id.to_string()));
    Value::Object(element)
}
