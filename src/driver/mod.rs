//! Driver adapter: the narrow interface between the control plane and the
//! browser-automation layer. Registry and engine depend only on [`PageDriver`],
//! so the underlying CDP client can be swapped without touching core logic.

pub mod cdp;
pub mod fake;
pub mod launcher;
pub mod port;

use crate::error::Result;
use serde::Deserialize;
use std::time::Duration;

/// One eligible form element as reported by the in-page scan script,
/// before identity assignment.
#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub dom_path: String,
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub language_hint: Option<String>,
}

/// Current page url and title.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PageInfo {
    pub url: String,
    pub title: Option<String>,
}

/// Outcome of one atomic capture-then-set page evaluation.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Value assigned and visible; `previous` is the value captured
    /// immediately before the mutation.
    Applied { previous: String },
    /// Element no longer exists at the recorded path.
    Gone,
    /// The page ignored or rejected the programmatic assignment.
    Rejected { previous: String },
}

/// Outcome of the simulated-keystroke fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeOutcome {
    Typed,
    Gone,
    /// The keystrokes did not end up in the field.
    Rejected,
}

/// Blocking-call contract over the live page. Every method carries a bounded
/// timeout internally; a timeout surfaces as an `Environment` error.
#[async_trait::async_trait]
pub trait PageDriver: Send + Sync {
    /// Enumerate eligible input/textarea elements in the top document.
    async fn scan_fields(&self) -> Result<Vec<RawField>>;

    /// Read the element's current value. `None` means the element is gone.
    async fn read_value(&self, dom_path: &str) -> Result<Option<String>>;

    /// Re-find the element, capture its value, assign `text`, and dispatch
    /// both an `input` and a `change` event, all in one page evaluation.
    async fn write_value(&self, dom_path: &str, text: &str) -> Result<WriteOutcome>;

    /// Click-to-focus, clear, then emit one simulated keystroke per
    /// character with `delay` between keys.
    async fn type_keys(&self, dom_path: &str, text: &str, delay: Duration) -> Result<TypeOutcome>;

    /// Flash a transient outline on the element. Returns false if gone.
    async fn highlight(&self, dom_path: &str) -> Result<bool>;

    /// Current page url and title.
    async fn page_info(&self) -> Result<PageInfo>;

    /// Install the submission guard into the browser context, covering the
    /// current page and every future navigation.
    async fn install_guard(&self, script: &str) -> Result<()>;

    /// Evaluate an arbitrary expression in the page. Escape hatch used by
    /// the guard installer and diagnostics only.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Release the connection and, in managed mode, the browser process.
    async fn close(&mut self) -> Result<()>;
}
