//! Core engine for Mercury notebook kernels.
//!
//! This crate provides:
//! - Kernel registration and inbound dispatch ([`KernelRegistry`])
//! - Cell and notebook execution tasks with strict lifecycles
//! - Time-windowed batching of execution updates ([`UpdateCollector`])
//! - Paged, cancellable variable streaming ([`VariablePager`])
//! - The outbound message set ([`HostMessage`]) and the [`HostProxy`] seam

pub mod collector;
pub mod config;
pub mod documents;
pub mod error;
pub mod execute;
pub mod ids;
pub mod kernel;
pub mod protocol;
pub mod proxy;
pub mod variables;

pub use collector::{Flushed, UpdateCollector};
pub use config::KernelConfig;
pub use documents::{DocumentStore, NotebookCell, NotebookDocument, NotebookDocuments, NotebookSurface};
pub use error::{Error, Result};
pub use execute::{
    CancellationToken, CellExecution, CellOutput, ExecutionError, ExecutionState,
    NotebookExecution, OutputItem, SerializedError,
};
pub use ids::{
    CellHandle, DetectionTaskHandle, ExecutionHandle, HandleAllocator, KernelHandle,
    SourceActionProviderHandle, VariableId,
};
pub use kernel::{
    ExecuteHandler, HandlerFailure, HandlerFuture, HandlerOperation, InterruptHandler,
    KernelController, KernelDetectionTask, KernelRegistry, KernelSourceActionProvider,
    KernelSourceActionRegistration, NotebookAffinity, NotebookSelection, ReceivedMessage,
};
pub use protocol::{
    CellExecuteUpdate, CellExecutionComplete, HostMessage, KernelDescriptor, KernelSourceAction,
};
pub use proxy::HostProxy;
pub use variables::{
    Variable, VariablePager, VariableProvider, VariableRecord, VariableRequest,
    VariablesRequestKind, VariablesResult,
};
