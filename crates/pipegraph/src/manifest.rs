//! Pipeline manifest parser
//!
//! A manifest describes a pipeline declaratively in YAML: every stage with the pipes it
//! reads, the pipes it defines and its private targets. Manifest stages carry no
//! rendering logic; they materialize their declarations and bind their handles, which
//! makes a manifest a dry run of a real pipeline's resource graph.
//!
//! Sizes are written as scale factors relative to the surface (`["1", "1/2"]`) or as
//! fixed extents (`fixed: [2048, 2048]`); omitting both means full surface size.

use crate::config::PipelineConfig;
use crate::descriptor::{PipeDescriptor, PipeDimension, PipeFormat, ScaleFactor, SurfaceSize};
use crate::error::{PipelineError, StageError};
use crate::pipeline::PipelineManager;
use crate::registry::{PipeHandle, ResourceBackend, Resources};
use crate::stage::{ProducedPipe, Stage, StageContext};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Errors that can occur while loading a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_norway::Error),
    /// A pipe declaration is inconsistent
    #[error("stage '{stage}', pipe '{pipe}': {reason}")]
    InvalidPipe { stage: String, pipe: String, reason: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn default_layers() -> u32 {
    1
}

/// A pipe or target declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeSpec {
    /// Pipe name (or target label)
    pub name: String,
    /// Pixel format
    pub format: PipeFormat,
    /// Scale factors [width, height] relative to the surface
    #[serde(default)]
    pub scale_factor: Option<[ScaleFactor; 2]>,
    /// Fixed extent [width, height]; for buffers, [elements, 1]
    #[serde(default)]
    pub fixed: Option<[u32; 2]>,
    /// Array layers or depth
    #[serde(default = "default_layers")]
    pub layers: u32,
    #[serde(default)]
    pub dimension: PipeDimension,
}

impl PipeSpec {
    /// Builds the runtime descriptor, validating the declaration
    ///
    /// # Arguments
    /// * `stage` - Name of the declaring stage, for error messages
    pub fn descriptor(&self, stage: &str) -> Result<PipeDescriptor, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidPipe {
            stage: stage.to_string(),
            pipe: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.layers == 0 {
            return Err(invalid("layer count must be at least 1"));
        }
        if self.layers > 1 && self.dimension == PipeDimension::D2 {
            return Err(invalid("multi-layer pipes need dimension d2_array or d3"));
        }

        let descriptor = PipeDescriptor::color(self.format);
        let descriptor = match (self.scale_factor, self.fixed) {
            (Some(_), Some(_)) => return Err(invalid("scale_factor and fixed are mutually exclusive")),
            (_, Some([width, height])) if width == 0 || height == 0 => return Err(invalid("fixed extent must be non-zero")),
            (_, Some([width, height])) => descriptor.fixed(width, height),
            (Some(_), None) | (None, None) if self.dimension == PipeDimension::Buffer => return Err(invalid("buffer pipes need a fixed extent")),
            (Some([width, height]), None) => descriptor.scaled(width, height),
            (None, None) => descriptor,
        };

        Ok(descriptor.layered(self.layers, self.dimension))
    }
}

/// A stage declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    /// Pipes read by the stage
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Pipes defined by the stage
    #[serde(default)]
    pub outputs: Vec<PipeSpec>,
    /// Private resources created during `create`
    #[serde(default)]
    pub targets: Vec<PipeSpec>,
    /// Pipes this stage may redefine
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// Pipeline manifest as parsed from YAML
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineManifest {
    /// Human-readable pipeline name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Initial surface size
    #[serde(default)]
    pub surface: SurfaceSize,
    #[serde(default)]
    pub alias_transient_pipes: bool,
    /// Stages in registration order
    pub stages: Vec<StageSpec>,
}

impl PipelineManifest {
    /// Parses a manifest from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, ManifestError> {
        Ok(serde_norway::from_str(yaml_content)?)
    }

    /// Parses a manifest from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml(&content)
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::new(self.surface).with_aliasing(self.alias_transient_pipes)
    }

    /// Builds a pipeline with one [`ManifestStage`] per declared stage
    ///
    /// The pipeline is returned unfinalized so callers can adjust it first.
    pub fn instantiate<B: ResourceBackend>(&self, backend: B) -> Result<PipelineManager<B>, ManifestError> {
        let mut pipeline = PipelineManager::new(backend, self.config());
        for spec in &self.stages {
            let stage = ManifestStage::from_spec(spec)?;
            pipeline.register_boxed(Box::new(stage), spec.overrides.clone())?;
        }
        Ok(pipeline)
    }
}

/// A stage whose declarations come from a manifest
#[derive(Debug, Clone)]
pub struct ManifestStage {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<ProducedPipe>,
    targets: Vec<ProducedPipe>,
    handles: Vec<PipeHandle>,
    executions: u64,
}

impl ManifestStage {
    pub fn from_spec(spec: &StageSpec) -> Result<Self, ManifestError> {
        let produced = |specs: &[PipeSpec]| -> Result<Vec<ProducedPipe>, ManifestError> {
            specs
                .iter()
                .map(|pipe| pipe.descriptor(&spec.name).map(|descriptor| ProducedPipe::new(pipe.name.clone(), descriptor)))
                .collect()
        };

        Ok(Self {
            name: spec.name.clone(),
            inputs: spec.inputs.clone(),
            outputs: produced(&spec.outputs)?,
            targets: produced(&spec.targets)?,
            handles: Vec::new(),
            executions: 0,
        })
    }

    /// Handles bound during `configure`: inputs, then outputs, then targets
    pub fn handles(&self) -> &[PipeHandle] {
        &self.handles
    }

    /// Number of frames this stage ran
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

impl<B: ResourceBackend> Stage<B> for ManifestStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_pipes(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn produced_pipes(&self) -> Vec<ProducedPipe> {
        self.outputs.clone()
    }

    fn create(&mut self, ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        for target in &self.targets {
            let handle = ctx.create_target(&target.name, target.descriptor)?;
            tracing::trace!(stage = %self.name, target = %target.name, ?handle, "Created target");
        }
        Ok(())
    }

    fn configure(&mut self, ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        self.handles.clear();
        for pipe in self.inputs.iter().chain(self.outputs.iter().map(|output| &output.name)) {
            self.handles.push(ctx.resolve(pipe)?);
        }
        for target in &self.targets {
            self.handles.push(ctx.target(&target.name)?);
        }
        Ok(())
    }

    fn resize(&mut self, ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        let missing = self.handles.iter().filter(|&&handle| ctx.resources().get(handle).is_none()).count();
        if missing > 0 {
            return Err(format!("{missing} bound resources are gone after resize").into());
        }
        Ok(())
    }

    fn execute(&mut self, _resources: &Resources<B::Resource>, _frame: &mut B::Frame) {
        self.executions += 1;
    }

    fn cleanup(&mut self, _ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        self.handles.clear();
        Ok(())
    }
}
