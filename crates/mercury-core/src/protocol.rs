//! Outbound messages from the kernel subsystem to the host process.
//!
//! Every call the subsystem makes across the process boundary is one
//! [`HostMessage`]. The enum is tagged with `"type"` so a JSON transport can
//! carry it unchanged.

use serde::{Deserialize, Serialize};

use crate::execute::{CellOutput, OutputItem, SerializedError};
use crate::ids::{
    CellHandle, DetectionTaskHandle, ExecutionHandle, KernelHandle, SourceActionProviderHandle,
};
use crate::variables::VariableRecord;

/// Declarative description of a kernel as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    /// Global id, `"{extension}/{local id}"`.
    pub id: String,
    /// Extension that registered the kernel.
    pub extension_id: String,
    /// Notebook type the kernel applies to.
    pub notebook_type: String,
    pub label: String,
    pub detail: Option<String>,
    pub description: Option<String>,
    /// Cell languages the kernel accepts. Empty means all.
    pub supported_languages: Vec<String>,
    pub supports_execution_order: bool,
    /// Mirrors whether an interrupt handler is installed.
    pub supports_interrupt: bool,
    /// Mirrors whether a variable provider is installed.
    pub has_variable_provider: bool,
}

/// One batched edit produced by a running cell execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit_type", rename_all = "snake_case")]
pub enum CellExecuteUpdate {
    /// Replace or append whole outputs of a cell.
    Output {
        cell: CellHandle,
        append: bool,
        outputs: Vec<CellOutput>,
    },

    /// Replace or append items of one existing output.
    OutputItems {
        output_id: String,
        append: bool,
        items: Vec<OutputItem>,
    },

    /// Timing and ordering metadata.
    ExecutionState {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        execution_order: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        run_start_time: Option<u64>,
    },
}

/// Terminal record of a cell execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellExecutionComplete {
    pub run_end_time: Option<u64>,
    pub last_run_success: Option<bool>,
    pub error: Option<SerializedError>,
}

/// An action offered by a kernel source action provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSourceAction {
    pub label: String,
    pub description: Option<String>,
    pub detail: Option<String>,
    /// Command the host runs when the action is picked.
    pub command: Option<String>,
    pub documentation: Option<String>,
}

impl KernelSourceAction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            detail: None,
            command: None,
            documentation: None,
        }
    }
}

/// Messages sent from the kernel subsystem to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// A kernel was registered. Request/response: the host may reject it.
    AddKernel {
        handle: KernelHandle,
        descriptor: KernelDescriptor,
    },

    /// Kernel metadata changed.
    UpdateKernel {
        handle: KernelHandle,
        descriptor: KernelDescriptor,
    },

    /// A kernel was disposed; the host releases its resources.
    RemoveKernel { handle: KernelHandle },

    /// Kernel affinity for one notebook changed.
    UpdateNotebookPriority {
        handle: KernelHandle,
        notebook: String,
        priority: Option<u32>,
    },

    /// The kernel's variables for a notebook are stale.
    VariablesUpdated { notebook: String },

    /// A cell execution was created.
    CreateExecution {
        execution: ExecutionHandle,
        controller_id: String,
        notebook: String,
        cell: CellHandle,
    },

    /// A batch of updates for a cell execution, in submission order.
    UpdateExecution {
        execution: ExecutionHandle,
        updates: Vec<CellExecuteUpdate>,
    },

    /// A cell execution finished.
    CompleteExecution {
        execution: ExecutionHandle,
        complete: CellExecutionComplete,
    },

    /// A notebook execution was created.
    CreateNotebookExecution {
        execution: ExecutionHandle,
        controller_id: String,
        notebook: String,
    },

    /// A notebook execution started.
    BeginNotebookExecution { execution: ExecutionHandle },

    /// A notebook execution finished.
    CompleteNotebookExecution { execution: ExecutionHandle },

    /// One streamed variable for an outstanding variable request.
    ReceiveVariable {
        request_id: String,
        variable: VariableRecord,
    },

    /// Message from a kernel to its renderers. Request/response: the host
    /// answers whether the message was delivered.
    PostMessage {
        handle: KernelHandle,
        surface: Option<String>,
        message: serde_json::Value,
    },

    /// A kernel detection task was created.
    AddKernelDetectionTask {
        handle: DetectionTaskHandle,
        notebook_type: String,
    },

    /// A kernel detection task was disposed.
    RemoveKernelDetectionTask { handle: DetectionTaskHandle },

    /// A kernel source action provider was registered.
    AddKernelSourceActionProvider {
        handle: SourceActionProviderHandle,
        notebook_type: String,
        emits_changes: bool,
    },

    /// A kernel source action provider was disposed.
    RemoveKernelSourceActionProvider { handle: SourceActionProviderHandle },

    /// A kernel source action provider has new actions.
    EmitKernelSourceActionsChange { handle: SourceActionProviderHandle },
}

impl HostMessage {
    /// Execution this message belongs to, if any.
    pub fn execution(&self) -> Option<ExecutionHandle> {
        match self {
            HostMessage::CreateExecution { execution, .. }
            | HostMessage::UpdateExecution { execution, .. }
            | HostMessage::CompleteExecution { execution, .. }
            | HostMessage::CreateNotebookExecution { execution, .. }
            | HostMessage::BeginNotebookExecution { execution }
            | HostMessage::CompleteNotebookExecution { execution } => Some(*execution),
            _ => None,
        }
    }
}
