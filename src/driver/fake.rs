//! In-memory page driver used by the test suite. Models just enough of a
//! form page to exercise the registry, the engine, and the control protocol
//! without a browser.

use crate::driver::{PageDriver, PageInfo, RawField, TypeOutcome, WriteOutcome};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub dom_path: String,
    pub kind: String,
    pub label: String,
    pub placeholder: Option<String>,
    pub hints: Vec<String>,
    pub required: bool,
    pub max_length: Option<u32>,
    pub value: String,
    /// Simulate a page that ignores programmatic assignment
    pub reject_writes: bool,
    /// Simulate a page that swallows simulated keystrokes too
    pub reject_keys: bool,
}

impl FakeElement {
    pub fn text_input(dom_path: &str, label: &str) -> Self {
        Self {
            dom_path: dom_path.to_string(),
            kind: "input:text".to_string(),
            label: label.to_string(),
            placeholder: None,
            hints: Vec::new(),
            required: false,
            max_length: None,
            value: String::new(),
            reject_writes: false,
            reject_keys: false,
        }
    }

    pub fn textarea(dom_path: &str, label: &str) -> Self {
        Self {
            kind: "textarea".to_string(),
            ..Self::text_input(dom_path, label)
        }
    }
}

#[derive(Default)]
struct Inner {
    elements: Vec<FakeElement>,
    url: String,
    title: Option<String>,
    guard_installed: bool,
    fail_guard: bool,
}

/// Cheap-clone handle; tests keep one clone to mutate the page while the
/// control plane owns another behind `Box<dyn PageDriver>`.
#[derive(Clone, Default)]
pub struct FakePage {
    inner: Arc<Mutex<Inner>>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        let page = Self::default();
        page.inner.lock().url = url.to_string();
        page
    }

    pub fn add(&self, element: FakeElement) {
        self.inner.lock().elements.push(element);
    }

    /// Remove an element, as if the page mutated underneath the controller.
    pub fn remove(&self, dom_path: &str) {
        self.inner.lock().elements.retain(|e| e.dom_path != dom_path);
    }

    pub fn value_of(&self, dom_path: &str) -> Option<String> {
        self.inner
            .lock()
            .elements
            .iter()
            .find(|e| e.dom_path == dom_path)
            .map(|e| e.value.clone())
    }

    pub fn set_reject_writes(&self, dom_path: &str, reject: bool) {
        let mut inner = self.inner.lock();
        if let Some(el) = inner.elements.iter_mut().find(|e| e.dom_path == dom_path) {
            el.reject_writes = reject;
        }
    }

    pub fn set_reject_keys(&self, dom_path: &str, reject: bool) {
        let mut inner = self.inner.lock();
        if let Some(el) = inner.elements.iter_mut().find(|e| e.dom_path == dom_path) {
            el.reject_keys = reject;
        }
    }

    pub fn relabel(&self, dom_path: &str, label: &str) {
        let mut inner = self.inner.lock();
        if let Some(el) = inner.elements.iter_mut().find(|e| e.dom_path == dom_path) {
            el.label = label.to_string();
        }
    }

    pub fn guard_installed(&self) -> bool {
        self.inner.lock().guard_installed
    }

    /// Simulate a context where the guard script cannot be installed.
    pub fn set_fail_guard(&self, fail: bool) {
        self.inner.lock().fail_guard = fail;
    }
}

#[async_trait::async_trait]
impl PageDriver for FakePage {
    async fn scan_fields(&self) -> Result<Vec<RawField>> {
        let inner = self.inner.lock();
        Ok(inner
            .elements
            .iter()
            .map(|e| RawField {
                dom_path: e.dom_path.clone(),
                kind: e.kind.clone(),
                label: e.label.clone(),
                placeholder: e.placeholder.clone(),
                hints: e.hints.clone(),
                required: e.required,
                max_length: e.max_length,
                pattern: None,
                language_hint: None,
            })
            .collect())
    }

    async fn read_value(&self, dom_path: &str) -> Result<Option<String>> {
        Ok(self.value_of(dom_path))
    }

    async fn write_value(&self, dom_path: &str, text: &str) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock();
        let Some(el) = inner.elements.iter_mut().find(|e| e.dom_path == dom_path) else {
            return Ok(WriteOutcome::Gone);
        };
        let previous = el.value.clone();
        if el.reject_writes {
            return Ok(WriteOutcome::Rejected { previous });
        }
        el.value = text.to_string();
        Ok(WriteOutcome::Applied { previous })
    }

    async fn type_keys(&self, dom_path: &str, text: &str, delay: Duration) -> Result<TypeOutcome> {
        {
            let mut inner = self.inner.lock();
            let Some(el) = inner.elements.iter_mut().find(|e| e.dom_path == dom_path) else {
                return Ok(TypeOutcome::Gone);
            };
            if el.reject_keys {
                return Ok(TypeOutcome::Rejected);
            }
            el.value.clear();
        }
        // One key per tick, like the real driver, so tests observe the
        // field mid-typing. The lock is never held across the sleep.
        for ch in text.chars() {
            tokio::time::sleep(delay).await;
            let mut inner = self.inner.lock();
            match inner.elements.iter_mut().find(|e| e.dom_path == dom_path) {
                Some(el) => el.value.push(ch),
                None => return Ok(TypeOutcome::Gone),
            }
        }
        Ok(TypeOutcome::Typed)
    }

    async fn highlight(&self, dom_path: &str) -> Result<bool> {
        Ok(self.value_of(dom_path).is_some())
    }

    async fn page_info(&self) -> Result<PageInfo> {
        let inner = self.inner.lock();
        Ok(PageInfo {
            url: inner.url.clone(),
            title: inner.title.clone(),
        })
    }

    async fn install_guard(&self, _script: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_guard {
            return Err(crate::error::FieldscribeError::Driver(
                "guard script rejected".to_string(),
            ));
        }
        inner.guard_installed = true;
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
