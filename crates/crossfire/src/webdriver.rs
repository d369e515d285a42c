//! W3C WebDriver automation backend.
//!
//! One browser session hosts every agent; each agent session is a window
//! handle. WebDriver addresses a single current window, so every command
//! runs under one mutex after switching to the target window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use coordination::broker::{LoadStatus, SessionHost, SessionInfo};
use coordination::channel::{ElementRef, InsertMethod, Surface};
use coordination::config::url_matches;
use coordination::{CrossfireError, CrossfireResult};

/// Key of a web element reference in WebDriver JSON.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const PASTE_SCRIPT: &str = r#"
const [el, text] = arguments;
el.focus();
const data = new DataTransfer();
data.setData('text/plain', text);
el.dispatchEvent(new ClipboardEvent('paste', { clipboardData: data, bubbles: true, cancelable: true }));
"#;

const INSERT_TEXT_SCRIPT: &str = r#"
const [el, text] = arguments;
el.focus();
document.execCommand('insertText', false, text);
"#;

const READY_STATE_SCRIPT: &str = "return document.readyState;";
const SET_TITLE_SCRIPT: &str = "document.title = arguments[0];";

/// Element reference as WebDriver expects it in arguments.
pub fn element_arg(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.as_str() })
}

/// Element id out of a WebDriver element object.
pub fn element_id(value: &Value) -> Option<ElementRef> {
    value.get(ELEMENT_KEY).and_then(Value::as_str).map(ElementRef::new)
}

/// Turn a WebDriver error payload into an automation error.
pub fn wire_error(value: &Value) -> Option<CrossfireError> {
    let error = value.get("error")?.as_str()?;
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
    Some(CrossfireError::Automation(format!("{}: {}", error, message)))
}

fn load_status(ready_state: &Value) -> LoadStatus {
    match ready_state.as_str() {
        Some("complete") => LoadStatus::Loaded,
        _ => LoadStatus::Loading,
    }
}

/// One WebDriver session, shared by every window.
pub struct WebDriverClient {
    http: reqwest::Client,
    base: String,
    session_id: String,
    /// Window the driver currently addresses
    current: Mutex<Option<String>>,
}

impl WebDriverClient {
    /// Start a browser session with page-load strategy `none`, so
    /// navigation returns at once and load state is polled instead.
    pub async fn connect(url: &str, request_timeout: Duration) -> CrossfireResult<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CrossfireError::automation)?;
        let base = url.trim_end_matches('/').to_string();

        let body = json!({
            "capabilities": { "alwaysMatch": { "pageLoadStrategy": "none" } }
        });
        let value = send(&http, Method::POST, &format!("{}/session", base), Some(body)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CrossfireError::Automation("new session without id".into()))?
            .to_string();
        info!(%session_id, webdriver = %base, "WebDriver session started");

        Ok(Arc::new(Self {
            http,
            base,
            session_id,
            current: Mutex::new(None),
        }))
    }

    /// Reuse a browser session started by an earlier run, so its windows
    /// can be picked up again.
    pub fn attach(url: &str, session_id: &str, request_timeout: Duration) -> CrossfireResult<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CrossfireError::automation)?;
        Ok(Arc::new(Self {
            http,
            base: url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            current: Mutex::new(None),
        }))
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> CrossfireResult<Value> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        send(&self.http, method, &url, body).await
    }

    /// Take the window lock and address `handle`.
    async fn focus(&self, handle: &str) -> CrossfireResult<MutexGuard<'_, Option<String>>> {
        let mut current = self.current.lock().await;
        if current.as_deref() != Some(handle) {
            self.command(Method::POST, "/window", Some(json!({ "handle": handle })))
                .await?;
            *current = Some(handle.to_string());
        }
        Ok(current)
    }

    async fn handles(&self) -> CrossfireResult<Vec<String>> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        Ok(value
            .as_array()
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> CrossfireResult<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    /// Url and load state of the focused window.
    async fn describe(&self, handle: &str) -> CrossfireResult<SessionInfo> {
        let url = self.command(Method::GET, "/url", None).await?;
        let ready = self.execute(READY_STATE_SCRIPT, vec![]).await?;
        Ok(SessionInfo {
            id: handle.to_string(),
            url: url.as_str().unwrap_or_default().to_string(),
            status: load_status(&ready),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> CrossfireResult<Value> {
    let mut request = http.request(method, url);
    // POST commands need a JSON body even when it is empty.
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await.map_err(CrossfireError::automation)?;
    let status = response.status();
    let payload: Value = response.json().await.map_err(CrossfireError::automation)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(err) = wire_error(&value) {
        debug!(%url, %status, error = %err, "WebDriver command failed");
        return Err(err);
    }
    if !status.is_success() {
        return Err(CrossfireError::Automation(format!("HTTP {}", status)));
    }
    Ok(value)
}

/// [`SessionHost`] mapping sessions onto browser windows.
pub struct WebDriverHost {
    client: Arc<WebDriverClient>,
}

impl WebDriverHost {
    pub fn new(client: Arc<WebDriverClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionHost for WebDriverHost {
    async fn list_sessions(&self, url_pattern: &str) -> CrossfireResult<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        for handle in self.client.handles().await? {
            let _window = self.client.focus(&handle).await?;
            let info = self.client.describe(&handle).await?;
            if url_matches(url_pattern, &info.url) {
                sessions.push(info);
            }
        }
        Ok(sessions)
    }

    async fn session_info(&self, id: &str) -> CrossfireResult<Option<SessionInfo>> {
        if !self.client.handles().await?.iter().any(|h| h == id) {
            return Ok(None);
        }
        let _window = self.client.focus(id).await?;
        self.client.describe(id).await.map(Some)
    }

    async fn open_session(&self, url: &str) -> CrossfireResult<SessionInfo> {
        let value = self
            .client
            .command(Method::POST, "/window/new", Some(json!({ "type": "tab" })))
            .await?;
        let handle = value
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| CrossfireError::Automation("new window without handle".into()))?
            .to_string();

        let _window = self.client.focus(&handle).await?;
        self.client
            .command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        debug!(%handle, %url, "Window opened");
        Ok(SessionInfo {
            id: handle,
            url: url.to_string(),
            status: LoadStatus::Loading,
        })
    }

    async fn close_session(&self, id: &str) -> CrossfireResult<()> {
        let mut window = self.client.focus(id).await?;
        self.client.command(Method::DELETE, "/window", None).await?;
        *window = None;
        Ok(())
    }

    async fn surface(&self, id: &str) -> CrossfireResult<Arc<dyn Surface>> {
        Ok(Arc::new(WindowSurface {
            client: self.client.clone(),
            handle: id.to_string(),
        }))
    }
}

/// [`Surface`] over one browser window.
pub struct WindowSurface {
    client: Arc<WebDriverClient>,
    handle: String,
}

fn element_list(value: &Value) -> Vec<ElementRef> {
    value
        .as_array()
        .map(|list| list.iter().filter_map(element_id).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Surface for WindowSurface {
    async fn find_all(&self, locator: &str) -> CrossfireResult<Vec<ElementRef>> {
        let _window = self.client.focus(&self.handle).await?;
        let value = self
            .client
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": locator })),
            )
            .await?;
        Ok(element_list(&value))
    }

    async fn find_within(
        &self,
        scope: &ElementRef,
        locator: &str,
    ) -> CrossfireResult<Option<ElementRef>> {
        let _window = self.client.focus(&self.handle).await?;
        let value = self
            .client
            .command(
                Method::POST,
                &format!("/element/{}/elements", scope.as_str()),
                Some(json!({ "using": "css selector", "value": locator })),
            )
            .await?;
        Ok(element_list(&value).into_iter().next())
    }

    async fn text(&self, element: &ElementRef) -> CrossfireResult<String> {
        let _window = self.client.focus(&self.handle).await?;
        let value = self
            .client
            .command(Method::GET, &format!("/element/{}/text", element.as_str()), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> CrossfireResult<Option<String>> {
        let _window = self.client.focus(&self.handle).await?;
        let value = self
            .client
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{}", element.as_str(), name),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn insert_text(
        &self,
        element: &ElementRef,
        text: &str,
        method: InsertMethod,
    ) -> CrossfireResult<()> {
        let script = match method {
            InsertMethod::Paste => PASTE_SCRIPT,
            InsertMethod::InsertText => INSERT_TEXT_SCRIPT,
        };
        let _window = self.client.focus(&self.handle).await?;
        self.client
            .execute(script, vec![element_arg(element), json!(text)])
            .await?;
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> CrossfireResult<()> {
        let _window = self.client.focus(&self.handle).await?;
        self.client
            .command(
                Method::POST,
                &format!("/element/{}/click", element.as_str()),
                Some(json!({})),
            )
            .await?;
        Ok(())
    }

    async fn set_label(&self, label: &str) -> CrossfireResult<()> {
        let _window = self.client.focus(&self.handle).await?;
        self.client.execute(SET_TITLE_SCRIPT, vec![json!(label)]).await?;
        Ok(())
    }
}
