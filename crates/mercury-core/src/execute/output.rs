//! Cell outputs produced by kernels.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// One mime-typed representation within an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    pub mime: String,
    pub data: Vec<u8>,
}

impl OutputItem {
    pub fn new(mime: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// A `text/plain` item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text/plain", text.into().into_bytes())
    }

    /// An `application/json` item.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new("application/json", value.to_string().into_bytes())
    }
}

/// A cell output: one logical slot holding one item per mime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    pub output_id: String,
    pub items: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

impl CellOutput {
    /// An output with a fresh id.
    pub fn new(items: Vec<OutputItem>) -> Self {
        Self {
            output_id: uuid::Uuid::new_v4().to_string(),
            items,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Keep the first item of each mime type. Renderers key on the mime type, so
/// a second item of the same type would be ambiguous.
pub fn dedupe_items(items: Vec<OutputItem>) -> Vec<OutputItem> {
    let mut seen = FxHashSet::default();
    let before = items.len();
    let unique: Vec<OutputItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.mime.clone()))
        .collect();
    if unique.len() != before {
        tracing::warn!(
            dropped = before - unique.len(),
            "output items must have unique mime types, keeping the first of each"
        );
    }
    unique
}

pub(crate) fn dedupe_outputs(outputs: Vec<CellOutput>) -> Vec<CellOutput> {
    outputs
        .into_iter()
        .map(|output| CellOutput {
            items: dedupe_items(output.items),
            ..output
        })
        .collect()
}
