//! Client-side transport for the control protocol, shared by
//! `fieldscribe-ctl`. Discovery resolves the connection descriptor to a
//! port; requests carry a short connect deadline (reachability) and a
//! separate overall deadline sized to the operation, so a slow keystroke
//! insertion is never mistaken for a dead controller.

use crate::runtime::descriptor;
use std::io;
use std::path::Path;
use std::time::Duration;

/// TCP connect deadline; past this the controller counts as unreachable.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Floor for the overall request deadline.
pub const BASE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Nothing answered on the descriptor's port. Exit code 2 territory.
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Transport(String),
}

/// Overall deadline for one request. Keystroke insertion takes
/// `chars * delay` on the controller side, so the deadline grows with the
/// payload instead of cutting the operation off mid-flight.
pub fn operation_timeout(text_chars: usize, delay_ms: u64) -> Duration {
    BASE_TIMEOUT + Duration::from_millis(text_chars as u64 * delay_ms)
}

/// Resolve the port to talk to: an explicit override wins, otherwise the
/// published descriptor. `None` means no controller is advertised at all.
pub async fn resolve_port(
    runtime_dir: &Path,
    override_port: Option<u16>,
) -> io::Result<Option<u16>> {
    if let Some(port) = override_port {
        return Ok(Some(port));
    }
    Ok(descriptor::load(runtime_dir).await?.map(|d| d.port))
}

/// Issue one request and parse the response body. A stale descriptor
/// (nothing listening on the advertised port) surfaces as `Unreachable`,
/// never as ground truth about the controller.
pub async fn request(
    port: u16,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    total_timeout: Duration,
) -> Result<serde_json::Value, ClientError> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(total_timeout)
        .build()
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let url = format!("http://127.0.0.1:{}{}", port, path);
    let mut req = client.request(method, &url);
    if let Some(body) = body {
        req = req.json(&body);
    }

    let resp = req.send().await.map_err(|e| {
        if e.is_connect() {
            ClientError::Unreachable(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    })?;
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

/// Success is decided by the body envelope, never by transport status.
pub fn envelope_ok(body: &serde_json::Value) -> bool {
    body.get("ok").and_then(serde_json::Value::as_bool) == Some(true)
}

pub fn error_code(body: &serde_json::Value) -> Option<&str> {
    body.get("code").and_then(serde_json::Value::as_str)
}

pub fn error_message(body: &serde_json::Value) -> &str {
    body.get("error")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("request failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::descriptor::{ConnectionDescriptor, SessionMode};

    #[tokio::test]
    async fn test_resolve_port_without_descriptor_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_port(dir.path(), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_port_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_port(dir.path(), Some(50001)).await.unwrap(),
            Some(50001)
        );
    }

    #[tokio::test]
    async fn test_resolve_port_reads_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        descriptor::publish(
            dir.path(),
            &ConnectionDescriptor {
                port: 47632,
                mode: SessionMode::Managed,
                started_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
        assert_eq!(resolve_port(dir.path(), None).await.unwrap(), Some(47632));
    }

    #[tokio::test]
    async fn test_stale_descriptor_port_is_unreachable() {
        // Bind then drop a listener so the port is known-dead.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = request(
            dead_port,
            reqwest::Method::GET,
            "/api/health",
            None,
            BASE_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
        assert!(err.to_string().contains("controller unreachable"));
    }

    #[test]
    fn test_operation_timeout_scales_with_payload() {
        let short = operation_timeout(0, 50);
        let long = operation_timeout(120, 50);
        assert_eq!(short, BASE_TIMEOUT);
        assert_eq!(long, BASE_TIMEOUT + Duration::from_millis(6000));
    }

    #[test]
    fn test_envelope_helpers() {
        let ok = serde_json::json!({ "ok": true, "count": 2 });
        let err = serde_json::json!({
            "ok": false,
            "error": "Insertion blocked: page rejected it",
            "code": "insertion_blocked",
        });
        assert!(envelope_ok(&ok));
        assert!(!envelope_ok(&err));
        assert_eq!(error_code(&err), Some("insertion_blocked"));
        assert_eq!(error_message(&err), "Insertion blocked: page rejected it");
    }
}
