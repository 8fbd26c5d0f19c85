//! Inbound protocol messages for the Mercury host.
//!
//! Defines the calls the host makes into the kernel subsystem and the
//! replies it gets back. Outbound traffic uses
//! [`HostMessage`](mercury_core::HostMessage).

use mercury_core::{
    CellHandle, KernelHandle, KernelSourceAction, SourceActionProviderHandle, VariableId,
    VariablesRequestKind,
};
use serde::{Deserialize, Serialize};

use crate::error::HostResult;

/// Calls from the host into the kernel subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCall {
    /// The user selected (or deselected) a kernel for a notebook.
    AssociateNotebook {
        handle: KernelHandle,
        notebook: String,
        selected: bool,
    },

    /// Run cells of a notebook.
    ExecuteCells {
        handle: KernelHandle,
        notebook: String,
        cells: Vec<CellHandle>,
    },

    /// Cancel cells of a notebook.
    CancelCells {
        handle: KernelHandle,
        notebook: String,
        cells: Vec<CellHandle>,
    },

    /// Stream a page of variables.
    ProvideVariables {
        /// Correlation id, echoed on each streamed variable.
        request_id: String,
        handle: KernelHandle,
        notebook: String,
        /// Variable to expand; `None` for the top level.
        parent: Option<VariableId>,
        kind: VariablesRequestKind,
        #[serde(default)]
        start: usize,
    },

    /// Cancel an outstanding request by correlation id.
    CancelRequest { request_id: String },

    /// A renderer sent a message to a kernel.
    AcceptMessage {
        handle: KernelHandle,
        /// Surface the message came from, if known.
        surface: Option<String>,
        message: serde_json::Value,
    },

    /// Ask a source action provider for its actions.
    ProvideKernelSourceActions {
        request_id: String,
        handle: SourceActionProviderHandle,
    },
}

impl InboundCall {
    /// Parse one JSON-encoded call.
    pub fn from_json(text: &str) -> HostResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Reply to an [`InboundCall`], sent once the call has been fully handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundReply {
    /// The call completed.
    Done,

    /// Number of variables streamed for a variable request.
    VariablesProvided { count: usize },

    /// Actions of a source action provider.
    KernelSourceActions { actions: Vec<KernelSourceAction> },

    /// The call failed.
    Error { message: String },
}
