//! Stage contract
//!
//! A stage is an opaque unit of pipeline work. The core only sees its name, the pipes
//! it reads, the pipes it defines and its lifecycle hooks; shaders and command
//! recording are the stage's own business.

use crate::descriptor::{PipeDescriptor, ResourceInfo, SurfaceSize};
use crate::error::{PipelineError, StageError};
use crate::registry::{PipeHandle, ResourceBackend, ResourceRegistry, Resources};

/// Position of a stage in the registration list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Registration index
    pub fn index(self) -> usize {
        self.0
    }
}

/// An output pipe defined by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedPipe {
    /// Pipe name
    pub name: String,
    /// Attributes of the backing resource
    pub descriptor: PipeDescriptor,
}

impl ProducedPipe {
    pub fn new(name: impl Into<String>, descriptor: PipeDescriptor) -> Self {
        Self { name: name.into(), descriptor }
    }
}

/// A unit of pipeline work
///
/// Lifecycle, driven by [`PipelineManager`](crate::PipelineManager):
/// 1. `create` for every stage, in registration order
/// 2. `produced_pipes`/`input_pipes` are queried and the graph is built
/// 3. `configure` in execution order, with every pipe resolvable
/// 4. `execute` once per frame, in execution order
/// 5. `resize` in execution order for stages touching a recreated resource
/// 6. `cleanup` in reverse execution order
///
/// Hooks default to doing nothing.
pub trait Stage<B: ResourceBackend> {
    /// Unique stage name
    fn name(&self) -> &str;

    /// Names of the pipes this stage reads, in order
    fn input_pipes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Pipes this stage defines; a stage defining none is the sink
    fn produced_pipes(&self) -> Vec<ProducedPipe>;

    /// Allocates stage-owned resources
    fn create(&mut self, _ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        Ok(())
    }

    /// Wires up execution logic once every pipe is bound
    ///
    /// This is the place to resolve and cache pipe handles.
    fn configure(&mut self, _ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        Ok(())
    }

    /// Called after resources this stage touches were recreated for a new surface size
    ///
    /// Handles are stable across resizes; only the resources behind them changed.
    fn resize(&mut self, _ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        Ok(())
    }

    /// Records this stage's work for one frame
    fn execute(&mut self, resources: &Resources<B::Resource>, frame: &mut B::Frame);

    /// Releases stage-owned state
    ///
    /// Targets created through [`StageContext::create_target`] are released by the
    /// manager right after this hook.
    fn cleanup(&mut self, _ctx: &mut StageContext<'_, B>) -> Result<(), StageError> {
        Ok(())
    }
}

/// View of the registry handed to stage hooks
pub struct StageContext<'a, B: ResourceBackend> {
    stage: StageId,
    name: &'a str,
    registry: &'a mut ResourceRegistry<B>,
}

impl<'a, B: ResourceBackend> StageContext<'a, B> {
    pub(crate) fn new(stage: StageId, name: &'a str, registry: &'a mut ResourceRegistry<B>) -> Self {
        Self { stage, name, registry }
    }

    /// Id of the stage this context belongs to
    pub fn stage_id(&self) -> StageId {
        self.stage
    }

    /// Name of the stage this context belongs to
    pub fn stage_name(&self) -> &str {
        self.name
    }

    /// Resolves a pipe to its handle
    ///
    /// A stage whose output was overridden resolves that name to its own private resource.
    pub fn resolve(&self, pipe: &str) -> Result<PipeHandle, PipelineError> {
        self.registry.resolve_for(self.stage, pipe)
    }

    /// Resolved attributes of a handle
    pub fn info(&self, handle: PipeHandle) -> Option<&ResourceInfo> {
        self.registry.info(handle)
    }

    /// Creates a resource owned by this stage
    pub fn create_target(&mut self, label: &str, descriptor: PipeDescriptor) -> Result<PipeHandle, PipelineError> {
        self.registry.create_target(self.stage, self.name, label, descriptor)
    }

    /// Looks up a target previously created by this stage
    pub fn target(&self, label: &str) -> Result<PipeHandle, PipelineError> {
        self.registry.target(self.stage, label)
    }

    pub fn surface_size(&self) -> SurfaceSize {
        self.registry.surface()
    }

    pub fn resources(&self) -> &Resources<B::Resource> {
        self.registry.resources()
    }

    pub fn backend(&self) -> &B {
        self.registry.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.registry.backend_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PipeFormat;
    use crate::headless::HeadlessBackend;

    #[test]
    fn test_context_scopes_targets_to_its_stage() {
        let mut registry = ResourceRegistry::new(HeadlessBackend::new(), SurfaceSize::new(320, 200));

        let handle = {
            let mut ctx = StageContext::new(StageId::new(3), "FinalStage", &mut registry);
            assert_eq!(ctx.stage_name(), "FinalStage");
            assert_eq!(ctx.surface_size(), SurfaceSize::new(320, 200));

            let handle = ctx.create_target("FinalStage", PipeDescriptor::color(PipeFormat::Rgba8Unorm)).unwrap();
            assert_eq!(ctx.target("FinalStage").unwrap(), handle);
            assert_eq!(ctx.info(handle).unwrap().width, 320);
            handle
        };

        let other = StageContext::new(StageId::new(4), "Other", &mut registry);
        assert!(other.target("FinalStage").is_err());
        assert!(other.resources().get(handle).is_some());
    }
}
