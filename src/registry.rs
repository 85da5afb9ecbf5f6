//! Field registry: scans the active page through the driver adapter and
//! assigns each eligible element a stable, content-derived fingerprint.

use crate::driver::{PageDriver, RawField};
use crate::error::{FieldscribeError, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// One eligible form element as currently understood by the controller.
/// The full set is replaced, never merged, on every scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field_id: String,
    /// Structural locator used to re-find the element. Internal only:
    /// never serialized onto the wire or into the runtime snapshot.
    #[serde(skip_serializing, default)]
    pub dom_path: String,
    /// "textarea" or "input:<subtype>"
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    pub constraints: FieldConstraints,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldConstraints {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
}

/// Identity is a pure function of the three most structure-stable
/// attributes: two scans of an unchanged page reproduce identical ids,
/// and a changed label or DOM position yields a new field, not an error.
pub fn field_id(dom_path: &str, label: &str, kind: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(dom_path.as_bytes());
    hasher.update(b"::");
    hasher.update(label.as_bytes());
    hasher.update(b"::");
    hasher.update(kind.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("fld_{}", &hex[..12])
}

fn descriptor_from_raw(raw: RawField) -> FieldDescriptor {
    let id = field_id(&raw.dom_path, &raw.label, &raw.kind);
    FieldDescriptor {
        field_id: id,
        dom_path: raw.dom_path,
        kind: raw.kind,
        label: raw.label,
        placeholder: raw.placeholder,
        hints: raw.hints,
        constraints: FieldConstraints {
            required: raw.required,
            max_length: raw.max_length,
            pattern: raw.pattern,
            language_hint: raw.language_hint,
        },
    }
}

/// Descriptor set populated by the most recent scan, in page order.
#[derive(Default)]
pub struct FieldRegistry {
    ordered: Vec<FieldDescriptor>,
    by_id: HashMap<String, usize>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the page and replace the descriptor set. Identifiers from the
    /// prior DOM state are discarded wholesale; callers must also clear
    /// their undo snapshots.
    pub async fn scan(&mut self, driver: &dyn PageDriver) -> Result<Vec<FieldDescriptor>> {
        let raw = driver.scan_fields().await?;

        let mut ordered: Vec<FieldDescriptor> = Vec::with_capacity(raw.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(raw.len());
        for r in raw {
            let descriptor = descriptor_from_raw(r);
            if by_id.contains_key(&descriptor.field_id) {
                // Same path, label and kind twice in one scan; first wins.
                tracing::warn!("Duplicate field fingerprint {}", descriptor.field_id);
                continue;
            }
            by_id.insert(descriptor.field_id.clone(), ordered.len());
            ordered.push(descriptor);
        }

        tracing::info!("Scan found {} eligible fields", ordered.len());
        self.ordered = ordered;
        self.by_id = by_id;
        Ok(self.ordered.clone())
    }

    pub fn get(&self, field_id: &str) -> Result<&FieldDescriptor> {
        self.by_id
            .get(field_id)
            .map(|&i| &self.ordered[i])
            .ok_or_else(|| FieldscribeError::NotFound(field_id.to_string()))
    }

}
