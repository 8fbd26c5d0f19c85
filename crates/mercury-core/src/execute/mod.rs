//! Execution tasks for Mercury kernels.
//!
//! A kernel reports a run of one cell through a [`CellExecution`] and a run
//! of a whole notebook through a [`NotebookExecution`]. Both follow the same
//! one-way lifecycle:
//!
//! ```text
//! Init ──start──▶ Started ──end──▶ Resolved
//! ```
//!
//! Output and timing edits of a cell execution are coalesced by an
//! [`UpdateCollector`](crate::UpdateCollector) before they reach the host;
//! the terminal record is always sent directly, after the last batch.
//!
//! # Module Structure
//!
//! - `context` - Cooperative cancellation
//! - `output` - Cell outputs and mime deduplication
//! - `error` - Failure descriptions and their transport shape
//! - `cell` / `notebook` - The two execution kinds
//! - `ledger` - At most one live execution per cell and per notebook

mod cell;
mod context;
mod error;
pub(crate) mod ledger;
mod notebook;
mod output;

pub use cell::{CellExecution, ExecutionState};
pub(crate) use cell::ResolveHook;
pub use context::CancellationToken;
pub use error::{
    ErrorLocation, ErrorStack, ExecutionError, Position, Range, SerializedError, SerializedFrame,
    SerializedPosition, SerializedRange, SerializedStack, StackFrame, serialize_error,
};
pub use notebook::NotebookExecution;
pub use output::{CellOutput, OutputItem, dedupe_items};
