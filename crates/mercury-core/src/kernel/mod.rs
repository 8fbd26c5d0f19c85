//! Kernel registration and inbound dispatch.
//!
//! [`KernelRegistry`] owns every [`KernelController`] of the process and is
//! the single entry point for calls from the host. Controllers create the
//! execution tasks kernels report through.

mod controller;
mod handlers;
mod registry;
mod sources;

pub use controller::{KernelController, NotebookAffinity, NotebookSelection, ReceivedMessage};
pub use handlers::{
    ExecuteHandler, HandlerFailure, HandlerFuture, HandlerOperation, InterruptHandler,
    KernelSourceActionProvider,
};
pub use registry::KernelRegistry;
pub use sources::{KernelDetectionTask, KernelSourceActionRegistration};
