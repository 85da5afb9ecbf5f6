//! CDP driver over a raw WebSocket, for best compatibility with plain Chrome.
//! Managed mode launches an exclusively-owned profile; attach mode connects
//! to an already-running browser's remote-debugging address.

use crate::driver::{launcher, PageDriver, PageInfo, RawField, TypeOutcome, WriteOutcome};
use crate::error::{FieldscribeError, Result};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Per-command timeout; a hung page script blocks only its own request.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[allow(clippy::type_complexity)]
pub struct CdpDriver {
    ws_tx: Option<
        Arc<
            Mutex<
                futures::stream::SplitSink<
                    tokio_tungstenite::WebSocketStream<
                        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
                    >,
                    WsMessage,
                >,
            >,
        >,
    >,
    /// Pending responses keyed by command id
    responses: Arc<Mutex<HashMap<u32, tokio::sync::oneshot::Sender<serde_json::Value>>>>,
    /// Browser process id, set only in managed mode
    chrome_pid: Option<u32>,
    msg_id: Arc<Mutex<u32>>,
    /// Remote-debugging address ("127.0.0.1:<port>")
    debug_addr: String,
}

impl CdpDriver {
    /// Launch a managed browser with a fresh, exclusively-owned profile and
    /// connect to its first page target.
    pub async fn launch(
        chrome_path: &Path,
        user_data_dir: &Path,
        headless: bool,
    ) -> Result<Self> {
        launcher::validate_chrome_path(chrome_path)?;
        let cdp_port = crate::driver::port::allocate_cdp_port();

        let mut cmd = launcher::build_command(chrome_path, user_data_dir, cdp_port, headless);
        let child = cmd.spawn().map_err(|e| {
            FieldscribeError::Environment(format!("Failed to launch Chrome: {}", e))
        })?;

        let mut driver = Self {
            ws_tx: None,
            responses: Arc::new(Mutex::new(HashMap::new())),
            chrome_pid: Some(child.id()),
            msg_id: Arc::new(Mutex::new(1)),
            debug_addr: format!("127.0.0.1:{}", cdp_port),
        };
        driver.connect_with_retries().await?;
        tracing::info!("Managed browser ready on {}", driver.debug_addr);
        Ok(driver)
    }

    /// Attach to an already-running browser via its remote-debugging address
    /// (e.g. "127.0.0.1:9222"). The browser is never killed on close.
    pub async fn attach(debug_addr: &str) -> Result<Self> {
        let mut driver = Self {
            ws_tx: None,
            responses: Arc::new(Mutex::new(HashMap::new())),
            chrome_pid: None,
            msg_id: Arc::new(Mutex::new(1)),
            debug_addr: debug_addr.to_string(),
        };
        driver.connect_once().await.map_err(|e| {
            FieldscribeError::Environment(format!(
                "Cannot attach to browser at {}: {}",
                debug_addr, e
            ))
        })?;
        tracing::info!("Attached to browser on {}", driver.debug_addr);
        Ok(driver)
    }

    pub fn is_connected(&self) -> bool {
        self.ws_tx.is_some()
    }

    /// Wait for a freshly-launched browser to accept CDP connections.
    async fn connect_with_retries(&mut self) -> Result<()> {
        const MAX_RETRIES: u32 = 30;
        let mut last_error = String::new();

        for retry in 0..MAX_RETRIES {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::debug!("Retry {}/{}: {}", retry + 1, MAX_RETRIES, last_error);
                }
            }
        }

        Err(FieldscribeError::Environment(format!(
            "Failed to connect to Chrome after {} retries: {}",
            MAX_RETRIES, last_error
        )))
    }

    /// Find the first page target and connect its WebSocket.
    async fn connect_once(&mut self) -> Result<()> {
        let list_url = format!("http://{}/json/list", self.debug_addr);
        let response = reqwest::get(&list_url)
            .await
            .map_err(|e| FieldscribeError::Driver(format!("Connection error: {}", e)))?;
        if !response.status().is_success() {
            return Err(FieldscribeError::Driver(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        let targets: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FieldscribeError::Driver(format!("Failed to parse targets: {}", e)))?;

        let page_target = targets
            .as_array()
            .and_then(|arr| {
                arr.iter()
                    .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            })
            .ok_or_else(|| FieldscribeError::Driver("No page target found".to_string()))?;
        let ws_url = page_target
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                FieldscribeError::Driver("No webSocketDebuggerUrl in page target".to_string())
            })?;

        tracing::debug!("Connecting to page target WebSocket: {}", ws_url);
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| FieldscribeError::Driver(format!("Failed to connect WebSocket: {}", e)))?;
        let (tx, mut rx) = StreamExt::split(ws_stream);
        self.ws_tx = Some(Arc::new(Mutex::new(tx)));

        let responses = self.responses.clone();
        tokio::spawn(async move {
            while let Some(msg) = StreamExt::next(&mut rx).await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                            if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                                if let Some(sender) =
                                    responses.lock().await.remove(&(id as u32))
                                {
                                    let _ = sender.send(json);
                                }
                            }
                        }
                        tracing::trace!(
                            "WS received: {}",
                            text.chars().take(100).collect::<String>()
                        );
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("WebSocket error: {:?}", e);
                    }
                    _ => {}
                }
            }
        });

        self.send_command("Page.enable", json!({})).await?;
        self.send_command("Runtime.enable", json!({})).await?;
        Ok(())
    }

    /// Send a CDP command and wait for its response.
    async fn send_command(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let tx = self
            .ws_tx
            .as_ref()
            .ok_or_else(|| FieldscribeError::Driver("WebSocket not connected".to_string()))?;

        let (id, rx) = {
            let mut msg_id = self.msg_id.lock().await;
            *msg_id += 1;
            let id = *msg_id - 1;

            let (tx, rx) = tokio::sync::oneshot::channel();
            self.responses.lock().await.insert(id, tx);
            (id, rx)
        };

        let command = json!({
            "id": id,
            "method": method,
            "params": params
        });

        let mut tx_guard = tx.lock().await;
        tx_guard
            .send(WsMessage::Text(command.to_string()))
            .await
            .map_err(|e| FieldscribeError::Driver(format!("Failed to send command: {}", e)))?;
        drop(tx_guard);

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FieldscribeError::Driver(
                "Response channel closed".to_string(),
            )),
            Err(_) => Err(FieldscribeError::Environment(format!(
                "CDP command {} timed out",
                method
            ))),
        }
    }

    /// Evaluate an expression with returnByValue and unwrap the value,
    /// surfacing page-side exceptions as driver errors.
    async fn eval_value(&self, expression: &str) -> Result<serde_json::Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true
                }),
            )
            .await?;

        let inner = result.get("result").cloned().unwrap_or_default();
        if let Some(details) = inner.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .unwrap_or("page script threw");
            return Err(FieldscribeError::Driver(format!(
                "Page evaluation failed: {}",
                text
            )));
        }
        Ok(inner
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Build a call of a JS function literal with safely-embedded string args.
    fn js_call(body: &str, args: &[&str]) -> String {
        let encoded: Vec<String> = args
            .iter()
            .map(|a| serde_json::to_string(a).unwrap_or_else(|_| "\"\"".to_string()))
            .collect();
        format!("({})({})", body, encoded.join(", "))
    }
}

// In-page scripts. Element lookup always re-queries the live DOM; a path
// that no longer resolves reports "gone" rather than guessing.

const SCAN_JS: &str = r##"
() => {
    const fields = [];
    const seen = new Set();

    function domPath(el) {
        const parts = [];
        let node = el;
        while (node && node.nodeType === 1 && node !== document.documentElement) {
            let part = node.tagName.toLowerCase();
            if (node.id) {
                parts.unshift(part + "#" + node.id);
                break;
            }
            const parent = node.parentElement;
            if (parent) {
                const same = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (same.length > 1) {
                    part += ":nth-of-type(" + (same.indexOf(node) + 1) + ")";
                }
            }
            parts.unshift(part);
            node = parent;
        }
        return parts.join(" > ");
    }

    function textOf(node) {
        return node && node.textContent ? node.textContent.trim().replace(/\s+/g, " ") : "";
    }

    function labelFor(el) {
        if (el.id) {
            const lab = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
            if (lab && textOf(lab)) return textOf(lab);
        }
        const wrap = el.closest("label");
        if (wrap && textOf(wrap)) return textOf(wrap);
        const aria = el.getAttribute("aria-label");
        if (aria && aria.trim()) return aria.trim();
        const refs = el.getAttribute("aria-labelledby");
        if (refs) {
            const joined = refs.split(/\s+/)
                .map(id => { const n = document.getElementById(id); return n ? textOf(n) : ""; })
                .filter(t => t)
                .join(" ");
            if (joined) return joined;
        }
        if (el.name) return el.name;
        if (el.placeholder) return el.placeholder;
        return "(unlabeled field)";
    }

    function hintsFor(el) {
        const out = [];
        const push = t => {
            t = (t || "").trim().replace(/\s+/g, " ");
            if (t && !out.includes(t) && out.length < 4) out.push(t);
        };
        const parent = el.parentElement;
        if (parent) {
            parent.querySelectorAll(".help, .hint, .description, .helper-text, small")
                .forEach(n => { if (!n.contains(el)) push(textOf(n)); });
        }
        let sib = el.nextElementSibling;
        for (let i = 0; sib && i < 3; i++, sib = sib.nextElementSibling) {
            const t = textOf(sib);
            if (t && /\d/.test(t) && /(character|char|word|자|글자)/i.test(t)) push(t);
        }
        return out;
    }

    const EXCLUDED = new Set([
        "hidden", "password", "file", "submit", "button", "reset",
        "image", "checkbox", "radio", "range", "color"
    ]);

    document.querySelectorAll("input, textarea").forEach(el => {
        const tag = el.tagName.toLowerCase();
        if (tag === "input" && EXCLUDED.has((el.type || "text").toLowerCase())) return;
        const style = window.getComputedStyle(el);
        if (style.display === "none" || style.visibility === "hidden") return;
        const path = domPath(el);
        if (seen.has(path)) return;
        seen.add(path);
        fields.push({
            dom_path: path,
            kind: tag === "textarea" ? "textarea" : "input:" + (el.type || "text").toLowerCase(),
            label: labelFor(el),
            placeholder: el.placeholder || null,
            hints: hintsFor(el),
            required: el.required === true,
            max_length: (typeof el.maxLength === "number" && el.maxLength > 0) ? el.maxLength : null,
            pattern: el.getAttribute("pattern"),
            language_hint: el.getAttribute("lang") || document.documentElement.getAttribute("lang") || null
        });
    });

    return fields;
}
"##;

const READ_VALUE_JS: &str = r#"
(path) => {
    const el = document.querySelector(path);
    return el ? { found: true, value: el.value } : { found: false };
}
"#;

// The native value setter keeps frameworks that shadow `value` (React et al.)
// in sync; input + change dispatch is mandatory, not cosmetic.
const WRITE_VALUE_JS: &str = r#"
(path, text) => {
    const el = document.querySelector(path);
    if (!el) return { status: "gone" };
    const prev = el.value;
    try {
        const proto = el instanceof HTMLTextAreaElement
            ? HTMLTextAreaElement.prototype
            : HTMLInputElement.prototype;
        const desc = Object.getOwnPropertyDescriptor(proto, "value");
        if (desc && desc.set) { desc.set.call(el, text); } else { el.value = text; }
        el.dispatchEvent(new Event("input", { bubbles: true }));
        el.dispatchEvent(new Event("change", { bubbles: true }));
    } catch (e) {
        return { status: "rejected", previous: prev };
    }
    if (el.value !== text) return { status: "rejected", previous: prev };
    return { status: "applied", previous: prev };
}
"#;

const FOCUS_AND_CLEAR_JS: &str = r#"
(path) => {
    const el = document.querySelector(path);
    if (!el) return { status: "gone" };
    el.scrollIntoView({ block: "center" });
    el.click();
    el.focus();
    el.select();
    document.execCommand("delete");
    return { status: "ok" };
}
"#;

const HIGHLIGHT_JS: &str = r#"
(path) => {
    const el = document.querySelector(path);
    if (!el) return false;
    const saved = el.style.outline;
    el.style.outline = "3px solid #e8a33d";
    el.scrollIntoView({ block: "center" });
    setTimeout(() => { el.style.outline = saved; }, 1200);
    return true;
}
"#;

#[async_trait::async_trait]
impl PageDriver for CdpDriver {
    async fn scan_fields(&self) -> Result<Vec<RawField>> {
        let value = self.eval_value(&format!("({})()", SCAN_JS)).await?;
        serde_json::from_value(value)
            .map_err(|e| FieldscribeError::Driver(format!("Malformed scan result: {}", e)))
    }

    async fn read_value(&self, dom_path: &str) -> Result<Option<String>> {
        let value = self
            .eval_value(&Self::js_call(READ_VALUE_JS, &[dom_path]))
            .await?;
        if value.get("found").and_then(|f| f.as_bool()) != Some(true) {
            return Ok(None);
        }
        Ok(Some(
            value
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ))
    }

    async fn write_value(&self, dom_path: &str, text: &str) -> Result<WriteOutcome> {
        let value = self
            .eval_value(&Self::js_call(WRITE_VALUE_JS, &[dom_path, text]))
            .await?;
        let previous = value
            .get("previous")
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string();
        match value.get("status").and_then(|s| s.as_str()) {
            Some("applied") => Ok(WriteOutcome::Applied { previous }),
            Some("gone") => Ok(WriteOutcome::Gone),
            _ => Ok(WriteOutcome::Rejected { previous }),
        }
    }

    async fn type_keys(&self, dom_path: &str, text: &str, delay: Duration) -> Result<TypeOutcome> {
        let prepared = self
            .eval_value(&Self::js_call(FOCUS_AND_CLEAR_JS, &[dom_path]))
            .await?;
        if prepared.get("status").and_then(|s| s.as_str()) == Some("gone") {
            return Ok(TypeOutcome::Gone);
        }

        for ch in text.chars() {
            self.send_command("Input.insertText", json!({ "text": ch.to_string() }))
                .await?;
            tokio::time::sleep(delay).await;
        }

        // One attempt only; verify the keystrokes actually landed.
        match self.read_value(dom_path).await? {
            Some(v) if v == text => Ok(TypeOutcome::Typed),
            Some(_) => Ok(TypeOutcome::Rejected),
            None => Ok(TypeOutcome::Gone),
        }
    }

    async fn highlight(&self, dom_path: &str) -> Result<bool> {
        let value = self
            .eval_value(&Self::js_call(HIGHLIGHT_JS, &[dom_path]))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn page_info(&self) -> Result<PageInfo> {
        let value = self
            .eval_value("({ url: window.location.href, title: document.title })")
            .await?;
        Ok(PageInfo {
            url: value
                .get("url")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
            title: value
                .get("title")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string()),
        })
    }

    async fn install_guard(&self, script: &str) -> Result<()> {
        // Covers every future navigation in this context...
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": script }),
        )
        .await?;
        // ...and the page that is already open.
        self.eval_value(script).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        self.eval_value(expression).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.ws_tx.take() {
            let mut tx_guard = tx.lock().await;
            let _ = tx_guard.close().await;
        }

        // Only a managed browser is ours to kill.
        if let Some(pid) = self.chrome_pid.take() {
            kill_pid(pid);
        }

        tracing::info!("CDP driver closed for {}", self.debug_addr);
        Ok(())
    }
}

fn kill_pid(pid: u32) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill").arg(pid.to_string()).spawn();
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .spawn();
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        // Ensure a managed browser does not outlive the controller
        if let Some(pid) = self.chrome_pid {
            kill_pid(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_call_escapes_arguments() {
        let call = CdpDriver::js_call("(a, b) => a + b", &["it's\n", "x > y"]);
        assert!(call.contains(r#""it's\n""#));
        assert!(call.contains(r#""x > y""#));
        assert!(call.starts_with("((a, b) => a + b)("));
    }

    #[test]
    fn test_scan_js_mentions_label_priority_sources() {
        // The script must honor the fixed label resolution order.
        for needle in ["label[for=", "closest(\"label\")", "aria-label", "aria-labelledby", "(unlabeled field)"] {
            assert!(SCAN_JS.contains(needle), "missing {}", needle);
        }
    }

    #[test]
    fn test_scan_js_excludes_unsupported_inputs() {
        for excluded in ["\"hidden\"", "\"password\"", "\"file\""] {
            assert!(SCAN_JS.contains(excluded));
        }
    }
}
