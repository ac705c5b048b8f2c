//! Render pipeline frame graph
//!
//! This crate assembles named render stages into a validated, ordered pipeline. Stages
//! declare the pipes (named intermediate resources) they read and define; the manager
//! resolves producer/consumer relations into a DAG, materializes one backend resource
//! per pipe and re-materializes surface-relative resources when the output surface is
//! resized. The backend is abstracted behind [`ResourceBackend`], so the same pipeline
//! logic runs on a GPU device or on the in-memory [`HeadlessBackend`].

pub mod aliasing;
mod config;
pub mod descriptor;
mod error;
pub mod graph;
pub mod headless;
pub mod inspect;
pub mod manifest;
mod pipeline;
mod registry;
mod stage;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use descriptor::{PipeDescriptor, PipeDimension, PipeFormat, PipeKind, PipeSize, ResourceInfo, ScaleFactor, ScaleFactorParseError, SurfaceSize};
pub use error::{BackendError, PipelineError, StageError, StageHook};
pub use graph::StageGraph;
pub use headless::{HeadlessBackend, HeadlessFrame, HeadlessResource};
pub use inspect::PipelineSnapshot;
pub use manifest::{ManifestError, ManifestStage, PipelineManifest};
pub use pipeline::{PipelineManager, PipelineState, ResizeEvent};
pub use registry::{PipeHandle, PipeRecord, ResourceBackend, ResourceRegistry, Resources};
pub use stage::{ProducedPipe, Stage, StageContext, StageId};
