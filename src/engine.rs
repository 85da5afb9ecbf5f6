//! Mutation engine: applies or reverts a field's value and manages the
//! one-level undo snapshots. Exactly one UndoEntry exists per field id;
//! a later mutation overwrites it, a successful revert consumes it, and a
//! scan clears the whole table because identifiers from the prior DOM
//! state are no longer trustworthy.

use crate::driver::{PageDriver, TypeOutcome, WriteOutcome};
use crate::error::{FieldscribeError, Result};
use crate::registry::FieldDescriptor;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// The value observed immediately before the most recent mutation.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub previous: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MutationEngine {
    undo: HashMap<String, UndoEntry>,
}

impl MutationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programmatic set. The driver captures the prior value and assigns the
    /// new one in a single page evaluation, so the undo baseline can never
    /// observe a half-mutated field.
    pub async fn set_value(
        &mut self,
        driver: &dyn PageDriver,
        field: &FieldDescriptor,
        text: &str,
    ) -> Result<()> {
        match driver.write_value(&field.dom_path, text).await? {
            WriteOutcome::Applied { previous } => {
                self.record_undo(&field.field_id, previous);
                tracing::info!(field = %field.field_id, "Applied value ({} chars)", text.chars().count());
                Ok(())
            }
            WriteOutcome::Gone => Err(FieldscribeError::Gone(field.field_id.clone())),
            WriteOutcome::Rejected { .. } => Err(FieldscribeError::InsertionBlocked(format!(
                "page rejected programmatic assignment for {}; try the keystroke fallback",
                field.field_id
            ))),
        }
    }

    /// Simulated-keystroke fallback for pages that ignore programmatic
    /// assignment. One attempt; on failure the condition is terminal for
    /// this attempt and no other workaround is tried.
    pub async fn type_keystrokes(
        &mut self,
        driver: &dyn PageDriver,
        field: &FieldDescriptor,
        text: &str,
        delay: Duration,
    ) -> Result<()> {
        let previous = driver
            .read_value(&field.dom_path)
            .await?
            .ok_or_else(|| FieldscribeError::Gone(field.field_id.clone()))?;

        match driver.type_keys(&field.dom_path, text, delay).await? {
            TypeOutcome::Typed => {
                self.record_undo(&field.field_id, previous);
                tracing::info!(field = %field.field_id, "Typed value via keystroke fallback");
                Ok(())
            }
            TypeOutcome::Gone => Err(FieldscribeError::Gone(field.field_id.clone())),
            TypeOutcome::Rejected => Err(FieldscribeError::InsertionBlocked(format!(
                "keystroke fallback did not reach {}; no further workaround will be attempted",
                field.field_id
            ))),
        }
    }

    /// Write the snapshot value back through the programmatic path and
    /// consume the UndoEntry. Revert itself is not reversible.
    pub async fn revert(
        &mut self,
        driver: &dyn PageDriver,
        field: &FieldDescriptor,
    ) -> Result<String> {
        let previous = self
            .undo
            .get(&field.field_id)
            .map(|e| e.previous.clone())
            .ok_or_else(|| FieldscribeError::NoUndoAvailable(field.field_id.clone()))?;

        match driver.write_value(&field.dom_path, &previous).await? {
            WriteOutcome::Applied { .. } => {
                // Consume only after the write landed
                self.undo.remove(&field.field_id);
                tracing::info!(field = %field.field_id, "Reverted to pre-mutation value");
                Ok(previous)
            }
            WriteOutcome::Gone => Err(FieldscribeError::Gone(field.field_id.clone())),
            WriteOutcome::Rejected { .. } => Err(FieldscribeError::InsertionBlocked(format!(
                "page rejected restore of the previous value for {}",
                field.field_id
            ))),
        }
    }

    /// Called on every scan.
    pub fn clear_undo(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!("Clearing {} undo snapshots", self.undo.len());
        }
        self.undo.clear();
    }

    pub fn has_undo(&self, field_id: &str) -> bool {
        self.undo.contains_key(field_id)
    }

    fn record_undo(&mut self, field_id: &str, previous: String) {
        // Overwrite, never stack: one level of undo is a product constraint.
        self.undo.insert(
            field_id.to_string(),
            UndoEntry {
                previous,
                captured_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeElement, FakePage};
    use crate::registry::FieldRegistry;

    const DELAY: Duration = Duration::from_millis(0);

    async fn single_field_page() -> (FakePage, FieldDescriptor) {
        let page = FakePage::new("https://example.com/apply");
        page.add(FakeElement::textarea("form > textarea", "자기소개"));
        let mut registry = FieldRegistry::new();
        let fields = registry.scan(&page).await.unwrap();
        (page, fields[0].clone())
    }

    #[tokio::test]
    async fn test_set_then_revert_restores_exact_prior_value() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        engine.set_value(&page, &field, "안녕하세요").await.unwrap();
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "안녕하세요");

        let restored = engine.revert(&page, &field).await.unwrap();
        assert_eq!(restored, "");
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_revert_without_mutation_is_no_undo_and_leaves_value() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        let err = engine.revert(&page, &field).await.unwrap_err();
        assert!(matches!(err, FieldscribeError::NoUndoAvailable(_)));
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_second_set_overwrites_undo_baseline() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        engine.set_value(&page, &field, "first").await.unwrap();
        engine.set_value(&page, &field, "second").await.unwrap();

        // Revert restores the value before the *second* set, not the original
        let restored = engine.revert(&page, &field).await.unwrap();
        assert_eq!(restored, "first");
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "first");

        // One level only: a second revert has nothing left to undo
        let err = engine.revert(&page, &field).await.unwrap_err();
        assert!(matches!(err, FieldscribeError::NoUndoAvailable(_)));
    }

    #[tokio::test]
    async fn test_clear_undo_after_scan_semantics() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        engine.set_value(&page, &field, "x").await.unwrap();
        assert!(engine.has_undo(&field.field_id));

        engine.clear_undo();
        let err = engine.revert(&page, &field).await.unwrap_err();
        assert!(matches!(err, FieldscribeError::NoUndoAvailable(_)));
        // The mutation itself is untouched by the failed revert
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_set_value_on_vanished_element_is_gone() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        page.remove(&field.dom_path);
        let err = engine.set_value(&page, &field, "text").await.unwrap_err();
        assert!(matches!(err, FieldscribeError::Gone(_)));
        assert!(!engine.has_undo(&field.field_id));
    }

    #[tokio::test]
    async fn test_rejected_write_is_blocked_and_records_no_undo() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();

        page.set_reject_writes(&field.dom_path, true);
        let err = engine.set_value(&page, &field, "text").await.unwrap_err();
        assert!(matches!(err, FieldscribeError::InsertionBlocked(_)));
        assert!(!engine.has_undo(&field.field_id));
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_keystroke_fallback_succeeds_where_write_is_rejected() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();
        page.set_reject_writes(&field.dom_path, true);

        engine
            .type_keystrokes(&page, &field, "typed text", DELAY)
            .await
            .unwrap();
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "typed text");
        assert!(engine.has_undo(&field.field_id));
    }

    #[tokio::test]
    async fn test_both_channels_blocked_is_terminal() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();
        page.set_reject_writes(&field.dom_path, true);
        page.set_reject_keys(&field.dom_path, true);

        let err = engine.set_value(&page, &field, "text").await.unwrap_err();
        assert!(matches!(err, FieldscribeError::InsertionBlocked(_)));
        let err = engine
            .type_keystrokes(&page, &field, "text", DELAY)
            .await
            .unwrap_err();
        assert!(matches!(err, FieldscribeError::InsertionBlocked(_)));
    }

    #[tokio::test]
    async fn test_revert_after_keystroke_fallback() {
        let (page, field) = single_field_page().await;
        let mut engine = MutationEngine::new();
        page.set_reject_writes(&field.dom_path, true);

        engine
            .type_keystrokes(&page, &field, "draft", DELAY)
            .await
            .unwrap();
        // Revert goes through the programmatic path; unblock it
        page.set_reject_writes(&field.dom_path, false);
        let restored = engine.revert(&page, &field).await.unwrap();
        assert_eq!(restored, "");
        assert_eq!(page.value_of(&field.dom_path).unwrap(), "");
    }
}
