//! Error types for pipeline construction and resource management

use std::fmt;

/// Error type returned by stage lifecycle hooks
pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by a [`ResourceBackend`](crate::ResourceBackend) when it cannot allocate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The device ran out of memory (or out of the configured budget)
    #[error("out of memory while allocating {requested} bytes")]
    OutOfMemory { requested: u64 },
    /// The requested extent exceeds what the device supports
    #[error("extent {width}x{height}x{layers} exceeds the device limit of {limit}")]
    ExtentTooLarge { width: u32, height: u32, layers: u32, limit: u32 },
    /// The format/dimension combination cannot be created on this device
    #[error("unsupported resource: {0}")]
    Unsupported(String),
    /// Any other device-side failure
    #[error("device error: {0}")]
    Device(String),
}

/// Lifecycle hook in which a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageHook {
    Create,
    Configure,
    Resize,
    Cleanup,
}

impl fmt::Display for StageHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Configure => write!(f, "configure"),
            Self::Resize => write!(f, "resize"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Errors that can occur while building, resizing or tearing down a pipeline
///
/// Construction errors always name the offending stage(s) and pipe so that a
/// pipeline author can fix the declaration directly.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Two stages declare the same output pipe and the later one is not marked as an override
    #[error("pipe '{pipe}' is produced by both '{first}' and '{second}' (register '{second}' as an override to redefine it)")]
    DuplicateOutput { pipe: String, first: String, second: String },
    /// A stage reads a pipe that no stage produces
    #[error("stage '{stage}' reads pipe '{pipe}' which is not produced by any stage")]
    UnresolvedInput { stage: String, pipe: String },
    /// The producer/consumer relation contains a cycle (path starts and ends with the same stage)
    #[error("cyclic dependency between stages: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    /// No stage declares zero outputs
    #[error("pipeline has no sink stage (a stage that produces no pipes)")]
    MissingSink,
    /// More than one stage declares zero outputs
    #[error("pipeline has more than one sink stage: {}", .stages.join(", "))]
    MultipleSinks { stages: Vec<String> },
    /// The stage list can no longer change
    #[error("pipeline is already finalized")]
    PipelineAlreadyFinalized,
    /// The backend could not create a resource
    #[error("failed to allocate resource '{label}': {source}")]
    ResourceAllocationFailure {
        label: String,
        #[source]
        source: BackendError,
    },
    /// A stage created two private targets with the same label
    #[error("stage '{stage}' already owns a target labeled '{label}'")]
    DuplicateTarget { stage: String, label: String },
    /// No resource has been declared under this name
    #[error("no resource is declared for pipe '{pipe}'")]
    UnknownPipe { pipe: String },
    /// A stage with the same name is already registered
    #[error("a stage named '{0}' is already registered")]
    DuplicateStage(String),
    /// No stage is registered under this name
    #[error("no stage named '{0}' is registered")]
    UnknownStage(String),
    /// The operation needs a finalized pipeline
    #[error("pipeline is not finalized")]
    NotFinalized,
    /// A stage lifecycle hook returned an error
    #[error("stage '{stage}' failed during {hook}: {source}")]
    StageFailed {
        stage: String,
        hook: StageHook,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    pub(crate) fn stage_failed(stage: &str, hook: StageHook, source: StageError) -> Self {
        Self::StageFailed {
            stage: stage.to_string(),
            hook,
            source,
        }
    }

    /// Returns true for errors detected while validating the stage graph
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateOutput { .. } | Self::UnresolvedInput { .. } | Self::CyclicDependency { .. } | Self::MissingSink | Self::MultipleSinks { .. }
        )
    }
}
