//! Errors reported by kernels for failed executions, and their transport
//! shape.
//!
//! Kernels describe failures with [`ExecutionError`], which uses 0-based
//! editor positions. [`SerializedError`] is what crosses the process
//! boundary; the variant is decided once, by whether a location is known.

use serde::{Deserialize, Serialize};

/// A 0-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A 0-based start/end range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Where an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    pub uri: String,
    pub range: Range,
}

/// One frame of a structured stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub uri: Option<String>,
    pub position: Option<Position>,
    pub label: String,
}

/// A stack trace, either structured or as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorStack {
    Text(String),
    Frames(Vec<StackFrame>),
}

/// Rich description of a failed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub name: String,
    pub message: String,
    pub stack: Option<ErrorStack>,
    pub location: Option<ErrorLocation>,
}

impl ExecutionError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            location: None,
        }
    }

    pub fn with_stack(mut self, stack: ErrorStack) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn with_location(mut self, uri: impl Into<String>, range: Range) -> Self {
        self.location = Some(ErrorLocation {
            uri: uri.into(),
            range,
        });
        self
    }

    /// Build from any error; its source chain becomes a textual stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| ErrorStack::Text(causes.join("\n"))),
            location: None,
        }
    }

    /// Convert into the transport shape.
    pub fn serialize(&self) -> SerializedError {
        let stack = self.stack.as_ref().map(SerializedStack::from);
        match &self.location {
            Some(location) => SerializedError::WithLocation {
                name: self.name.clone(),
                message: self.message.clone(),
                stack,
                location: SerializedRange::from(location.range),
                uri: location.uri.clone(),
            },
            None => SerializedError::Simple {
                name: self.name.clone(),
                message: self.message.clone(),
                stack,
            },
        }
    }
}

impl From<&anyhow::Error> for ExecutionError {
    fn from(err: &anyhow::Error) -> Self {
        let causes: Vec<String> = err
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {}", cause))
            .collect();
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| ErrorStack::Text(causes.join("\n"))),
            location: None,
        }
    }
}

/// Map an optional error to its transport shape.
pub fn serialize_error(error: Option<&ExecutionError>) -> Option<SerializedError> {
    error.map(ExecutionError::serialize)
}

/// 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedPosition {
    pub line: u32,
    pub column: u32,
}

impl From<Position> for SerializedPosition {
    fn from(position: Position) -> Self {
        Self {
            line: position.line.saturating_add(1),
            column: position.character.saturating_add(1),
        }
    }
}

/// 1-based line/column rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl From<Range> for SerializedRange {
    fn from(range: Range) -> Self {
        Self {
            start_line: range.start.line.saturating_add(1),
            start_column: range.start.character.saturating_add(1),
            end_line: range.end.line.saturating_add(1),
            end_column: range.end.character.saturating_add(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedFrame {
    pub uri: Option<String>,
    pub position: Option<SerializedPosition>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedStack {
    Text(String),
    Frames(Vec<SerializedFrame>),
}

impl From<&ErrorStack> for SerializedStack {
    fn from(stack: &ErrorStack) -> Self {
        match stack {
            ErrorStack::Text(text) => SerializedStack::Text(text.clone()),
            ErrorStack::Frames(frames) => SerializedStack::Frames(
                frames
                    .iter()
                    .map(|frame| SerializedFrame {
                        uri: frame.uri.clone(),
                        position: frame.position.map(SerializedPosition::from),
                        label: frame.label.clone(),
                    })
                    .collect(),
            ),
        }
    }
}

/// Error record sent to the host with a completed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedError {
    Simple {
        name: String,
        message: String,
        stack: Option<SerializedStack>,
    },
    WithLocation {
        name: String,
        message: String,
        stack: Option<SerializedStack>,
        location: SerializedRange,
        uri: String,
    },
}

impl SerializedError {
    pub fn message(&self) -> &str {
        match self {
            SerializedError::Simple { message, .. }
            | SerializedError::WithLocation { message, .. } => message,
        }
    }
}
