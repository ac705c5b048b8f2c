//! Pipeline manager
//!
//! Owns the stage list, the resource registry and the resolved graph, and drives the
//! register → finalize → execute/resize → teardown cycle. All name resolution happens
//! in `finalize` and `resize`; `execute` only walks a precomputed order.

use crate::config::PipelineConfig;
use crate::descriptor::SurfaceSize;
use crate::error::{PipelineError, StageHook};
use crate::graph::{StageDeclaration, StageGraph};
use crate::registry::{PipeHandle, ResourceBackend, ResourceRegistry};
use crate::stage::{ProducedPipe, Stage, StageContext, StageId};
use std::fmt;

/// Lifecycle state of a [`PipelineManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Stages can be registered and removed
    Registering,
    /// The graph is resolved and resources are bound
    Finalized,
    /// Every stage was cleaned up and every resource released
    TornDown,
}

/// Notification sent to resize listeners after a successful resize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeEvent {
    /// New surface size
    pub surface: SurfaceSize,
    /// Stages whose resize hook ran, in execution order
    pub affected: Vec<String>,
}

type ResizeListener = Box<dyn FnMut(&ResizeEvent)>;

struct StageSlot<B: ResourceBackend> {
    name: String,
    stage: Box<dyn Stage<B>>,
    overrides: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<ProducedPipe>,
    // Every handle the stage reads, writes or owns; used to find resize targets
    bindings: Vec<PipeHandle>,
    created: bool,
}

/// Assembles stages into an ordered, resource-bound pipeline
///
/// ```
/// use pipegraph::{HeadlessBackend, PipelineConfig, PipelineManager};
///
/// let mut pipeline = PipelineManager::new(HeadlessBackend::new(), PipelineConfig::default());
/// assert!(pipeline.finalize().is_err()); // no sink stage
/// ```
pub struct PipelineManager<B: ResourceBackend> {
    config: PipelineConfig,
    stages: Vec<StageSlot<B>>,
    registry: ResourceRegistry<B>,
    graph: Option<StageGraph>,
    state: PipelineState,
    listeners: Vec<ResizeListener>,
}

impl<B: ResourceBackend> PipelineManager<B> {
    /// Creates an empty pipeline
    ///
    /// # Arguments
    /// * `backend` - Backend used for every resource of this pipeline
    /// * `config` - Initial surface size and aliasing policy
    pub fn new(backend: B, config: PipelineConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
            registry: ResourceRegistry::new(backend, config.surface),
            graph: None,
            state: PipelineState::Registering,
            listeners: Vec::new(),
        }
    }

    /// Appends a stage to the registration list
    ///
    /// # Errors
    /// `PipelineAlreadyFinalized` after `finalize`, `DuplicateStage` if the name is taken.
    pub fn register<S: Stage<B> + 'static>(&mut self, stage: S) -> Result<(), PipelineError> {
        self.register_boxed(Box::new(stage), Vec::new())
    }

    /// Appends a stage that may redefine the listed pipes
    ///
    /// For every listed pipe an earlier stage already produces, this stage becomes the
    /// producer every reader sees. The earlier producer keeps a private resource.
    pub fn register_overriding<S: Stage<B> + 'static>(&mut self, stage: S, pipes: &[&str]) -> Result<(), PipelineError> {
        self.register_boxed(Box::new(stage), pipes.iter().map(|pipe| pipe.to_string()).collect())
    }

    /// Appends an already boxed stage
    pub fn register_boxed(&mut self, stage: Box<dyn Stage<B>>, overrides: Vec<String>) -> Result<(), PipelineError> {
        if self.state != PipelineState::Registering {
            return Err(PipelineError::PipelineAlreadyFinalized);
        }

        let name = stage.name().to_string();
        if self.stages.iter().any(|slot| slot.name == name) {
            return Err(PipelineError::DuplicateStage(name));
        }

        tracing::debug!(stage = %name, overrides = ?overrides, "Registered stage");
        self.stages.push(StageSlot {
            name,
            stage,
            overrides,
            inputs: Vec::new(),
            outputs: Vec::new(),
            bindings: Vec::new(),
            created: false,
        });
        Ok(())
    }

    /// Removes a stage before finalization and hands it back
    pub fn unregister(&mut self, name: &str) -> Result<Box<dyn Stage<B>>, PipelineError> {
        if self.state != PipelineState::Registering {
            return Err(PipelineError::PipelineAlreadyFinalized);
        }

        let position = self.stages.iter().position(|slot| slot.name == name).ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        tracing::debug!(stage = name, "Unregistered stage");
        Ok(self.stages.remove(position).stage)
    }

    /// Builds the pipeline
    ///
    /// Runs `create` on every stage in registration order, builds and validates the
    /// stage graph, materializes every pipe and runs `configure` in execution order.
    /// Any failure undoes everything: created stages are cleaned up in reverse
    /// registration order, all resources are released and the pipeline stays in the
    /// registering state.
    pub fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Registering {
            return Err(PipelineError::PipelineAlreadyFinalized);
        }

        tracing::info!(stages = self.stages.len(), surface = %self.registry.surface(), "Finalizing pipeline");
        match self.build() {
            Ok(graph) => {
                self.graph = Some(graph);
                self.state = PipelineState::Finalized;
                tracing::info!(order = ?self.execution_order(), resources = self.registry.resources().live_count(), "Pipeline finalized");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Pipeline construction failed");
                self.abort();
                Err(err)
            }
        }
    }

    fn build(&mut self) -> Result<StageGraph, PipelineError> {
        for (index, slot) in self.stages.iter_mut().enumerate() {
            tracing::debug!(stage = %slot.name, "Creating stage");
            let mut ctx = StageContext::new(StageId::new(index), &slot.name, &mut self.registry);
            slot.stage.create(&mut ctx).map_err(|source| PipelineError::stage_failed(&slot.name, StageHook::Create, source))?;
            slot.created = true;
            slot.inputs = slot.stage.input_pipes();
            slot.outputs = slot.stage.produced_pipes();
        }

        let declarations: Vec<StageDeclaration<'_>> = self
            .stages
            .iter()
            .map(|slot| StageDeclaration {
                name: &slot.name,
                inputs: &slot.inputs,
                outputs: &slot.outputs,
                overrides: &slot.overrides,
            })
            .collect();
        let graph = StageGraph::build(&declarations)?;

        for (index, slot) in self.stages.iter().enumerate() {
            for output in &slot.outputs {
                self.registry.declare(StageId::new(index), &slot.name, &output.name, output.descriptor, slot.overrides.contains(&output.name))?;
            }
        }

        let lifetimes = self.config.alias_transient_pipes.then(|| graph.pipe_lifetimes());
        self.registry.materialize(lifetimes.as_deref())?;

        for &id in graph.order() {
            let slot = &mut self.stages[id.index()];
            tracing::debug!(stage = %slot.name, "Configuring stage");
            let mut ctx = StageContext::new(id, &slot.name, &mut self.registry);
            slot.stage.configure(&mut ctx).map_err(|source| PipelineError::stage_failed(&slot.name, StageHook::Configure, source))?;
        }

        for (index, slot) in self.stages.iter_mut().enumerate() {
            let id = StageId::new(index);
            let mut bindings = Vec::with_capacity(slot.inputs.len() + slot.outputs.len());
            for input in &slot.inputs {
                bindings.push(self.registry.resolve(input)?);
            }
            for output in &slot.outputs {
                bindings.push(self.registry.resolve_for(id, &output.name)?);
            }
            bindings.extend(self.registry.targets_of(id));
            bindings.sort_unstable();
            bindings.dedup();
            slot.bindings = bindings;
        }

        Ok(graph)
    }

    fn abort(&mut self) {
        for (index, slot) in self.stages.iter_mut().enumerate().rev() {
            if !slot.created {
                continue;
            }

            let id = StageId::new(index);
            let mut ctx = StageContext::new(id, &slot.name, &mut self.registry);
            if let Err(error) = slot.stage.cleanup(&mut ctx) {
                tracing::warn!(stage = %slot.name, %error, "Cleanup failed");
            }
            self.registry.release_targets(id);
            slot.created = false;
            slot.bindings.clear();
        }

        self.registry.release_all();
        self.graph = None;
    }

    /// Changes the surface size
    ///
    /// Before `finalize` this only records the size used for the first materialization.
    /// Afterwards it recreates every surface-relative resource, then runs the `resize`
    /// hook of every stage bound to a recreated resource, in execution order, then
    /// notifies resize listeners. The execution order never changes.
    ///
    /// # Errors
    /// `ResourceAllocationFailure` if a replacement cannot be created; the previous
    /// resources stay bound and no hook runs. `StageFailed` for the first failing
    /// resize hook: resources and the recorded surface size are already at the new
    /// size, every other affected stage still gets its hook, and listeners are not
    /// notified.
    pub fn resize(&mut self, surface: SurfaceSize) -> Result<ResizeEvent, PipelineError> {
        match self.state {
            PipelineState::Registering => {
                tracing::debug!(%surface, "Surface size recorded before finalize");
                self.registry.set_surface(surface);
                self.config.surface = surface;
                return Ok(ResizeEvent { surface, affected: Vec::new() });
            }
            PipelineState::TornDown => return Err(PipelineError::NotFinalized),
            PipelineState::Finalized => {}
        }
        let Some(graph) = self.graph.as_ref() else {
            return Err(PipelineError::NotFinalized);
        };

        tracing::info!(from = %self.registry.surface(), to = %surface, "Resizing pipeline");
        let invalidated = self.registry.resize(surface)?;
        self.config.surface = surface;

        let mut affected = Vec::new();
        let mut first_error = None;
        for &id in graph.order() {
            let slot = &mut self.stages[id.index()];
            if !slot.bindings.iter().any(|handle| invalidated.contains(handle)) {
                continue;
            }

            tracing::debug!(stage = %slot.name, "Resizing stage");
            let mut ctx = StageContext::new(id, &slot.name, &mut self.registry);
            match slot.stage.resize(&mut ctx) {
                Ok(()) => affected.push(slot.name.clone()),
                Err(source) => {
                    tracing::warn!(stage = %slot.name, error = %source, "Resize hook failed");
                    if first_error.is_none() {
                        first_error = Some(PipelineError::stage_failed(&slot.name, StageHook::Resize, source));
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let event = ResizeEvent { surface, affected };
        for listener in &mut self.listeners {
            listener(&event);
        }
        Ok(event)
    }

    /// Registers a hook fired after every successful resize of a finalized pipeline
    pub fn on_resize(&mut self, listener: impl FnMut(&ResizeEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Runs every stage once, in execution order
    pub fn execute(&mut self, frame: &mut B::Frame) -> Result<(), PipelineError> {
        let (PipelineState::Finalized, Some(graph)) = (self.state, self.graph.as_ref()) else {
            return Err(PipelineError::NotFinalized);
        };

        let resources = self.registry.resources();
        for &id in graph.order() {
            self.stages[id.index()].stage.execute(resources, frame);
        }
        Ok(())
    }

    /// Cleans up every stage in reverse execution order and releases all resources
    ///
    /// Every stage is cleaned up even if an earlier cleanup fails; the first failure
    /// is returned.
    pub fn teardown(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Finalized {
            return Err(PipelineError::NotFinalized);
        }
        let Some(graph) = self.graph.take() else {
            return Err(PipelineError::NotFinalized);
        };

        let mut first_error = None;
        for &id in graph.order().iter().rev() {
            let slot = &mut self.stages[id.index()];
            tracing::debug!(stage = %slot.name, "Cleanup stage");
            let mut ctx = StageContext::new(id, &slot.name, &mut self.registry);
            if let Err(source) = slot.stage.cleanup(&mut ctx) {
                tracing::warn!(stage = %slot.name, error = %source, "Cleanup failed");
                if first_error.is_none() {
                    first_error = Some(PipelineError::stage_failed(&slot.name, StageHook::Cleanup, source));
                }
            }
            self.registry.release_targets(id);
            slot.created = false;
            slot.bindings.clear();
        }

        self.registry.release_all();
        self.state = PipelineState::TornDown;
        tracing::info!("Pipeline torn down");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == PipelineState::Finalized
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn surface_size(&self) -> SurfaceSize {
        self.registry.surface()
    }

    /// Stage names in execution order; empty until finalized
    pub fn execution_order(&self) -> Vec<&str> {
        self.graph.as_ref().map_or_else(Vec::new, |graph| graph.order().iter().map(|id| self.stages[id.index()].name.as_str()).collect())
    }

    /// Stage names in registration order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|slot| slot.name.as_str()).collect()
    }

    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.stages.iter().position(|slot| slot.name == name).map(StageId::new)
    }

    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(|slot| slot.name.as_str())
    }

    /// Inputs and outputs a stage declared during the last build
    pub(crate) fn declared_pipes(&self, id: StageId) -> Option<(&[String], &[ProducedPipe])> {
        self.stages.get(id.index()).map(|slot| (slot.inputs.as_slice(), slot.outputs.as_slice()))
    }

    /// The resolved graph; `None` until finalized
    pub fn graph(&self) -> Option<&StageGraph> {
        self.graph.as_ref()
    }

    pub fn registry(&self) -> &ResourceRegistry<B> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        self.registry.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.registry.backend_mut()
    }
}

impl<B: ResourceBackend> Drop for PipelineManager<B> {
    fn drop(&mut self) {
        if self.state != PipelineState::Finalized {
            return;
        }
        if let Err(error) = self.teardown() {
            tracing::warn!(%error, "Teardown on drop failed");
        }
    }
}

impl<B: ResourceBackend> fmt::Debug for PipelineManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineManager")
            .field("state", &self.state)
            .field("surface", &self.registry.surface())
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PipeDescriptor, PipeFormat};
    use crate::headless::{HeadlessBackend, HeadlessFrame};
    use crate::test_support::{Log, RecordingStage, calls, hdr, new_log};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn manager() -> PipelineManager<HeadlessBackend> {
        PipelineManager::new(HeadlessBackend::new(), PipelineConfig::default())
    }

    fn chain(pipeline: &mut PipelineManager<HeadlessBackend>, log: &Log) {
        pipeline.register(RecordingStage::new("S3", &["P2"], &[], log)).unwrap();
        pipeline.register(RecordingStage::new("S1", &[], &["P1"], log)).unwrap();
        pipeline.register(RecordingStage::new("S2", &["P1"], &["P2"], log)).unwrap();
    }

    #[test]
    fn test_finalize_orders_stages_by_dependencies() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        pipeline.finalize().unwrap();

        assert_eq!(pipeline.execution_order(), vec!["S1", "S2", "S3"]);
        assert_eq!(calls(&log, "create"), vec!["S3", "S1", "S2"]);
        assert_eq!(calls(&log, "configure"), vec!["S1", "S2", "S3"]);
        assert_eq!(pipeline.backend().live_count(), 2);
        assert!(pipeline.is_finalized());
    }

    #[test]
    fn test_execute_runs_in_order() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);

        let mut frame = HeadlessFrame::new();
        assert!(matches!(pipeline.execute(&mut frame), Err(PipelineError::NotFinalized)));

        pipeline.finalize().unwrap();
        pipeline.execute(&mut frame).unwrap();
        assert_eq!(frame.executed, vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn test_register_after_finalize() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        assert!(matches!(pipeline.register(RecordingStage::new("S1", &[], &[], &log)), Err(PipelineError::DuplicateStage(name)) if name == "S1"));

        pipeline.finalize().unwrap();
        assert!(matches!(pipeline.register(RecordingStage::new("Late", &[], &[], &log)), Err(PipelineError::PipelineAlreadyFinalized)));
        assert!(matches!(pipeline.unregister("S1"), Err(PipelineError::PipelineAlreadyFinalized)));
        assert!(matches!(pipeline.finalize(), Err(PipelineError::PipelineAlreadyFinalized)));
    }

    #[test]
    fn test_failed_finalize_leaves_nothing_behind() {
        let log = new_log();
        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("A", &[], &["X"], &log).with_target(hdr())).unwrap();
        pipeline.register(RecordingStage::new("B", &[], &["X"], &log)).unwrap();
        pipeline.register(RecordingStage::new("Sink", &["X"], &[], &log)).unwrap();

        let err = pipeline.finalize().unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateOutput { ref pipe, .. } if pipe == "X"));
        assert_eq!(calls(&log, "cleanup"), vec!["Sink", "B", "A"]);
        assert_eq!(pipeline.backend().live_count(), 0);
        assert_eq!(pipeline.state(), PipelineState::Registering);
        assert!(pipeline.execution_order().is_empty());

        // Fixing the registration list makes the pipeline buildable again
        pipeline.unregister("B").unwrap();
        pipeline.finalize().unwrap();
        assert_eq!(pipeline.execution_order(), vec!["A", "Sink"]);
    }

    #[test]
    fn test_graph_errors_surface_from_finalize() {
        let log = new_log();

        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("Sink", &["Y"], &[], &log)).unwrap();
        assert!(matches!(pipeline.finalize(), Err(PipelineError::UnresolvedInput { ref stage, ref pipe }) if stage == "Sink" && pipe == "Y"));

        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("A", &["Q"], &["P"], &log)).unwrap();
        pipeline.register(RecordingStage::new("B", &["P"], &["Q"], &log)).unwrap();
        pipeline.register(RecordingStage::new("Sink", &["P"], &[], &log)).unwrap();
        match pipeline.finalize().unwrap_err() {
            PipelineError::CyclicDependency { path } => {
                assert!(path.contains(&"A".to_string()));
                assert!(path.contains(&"B".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("A", &[], &["X"], &log)).unwrap();
        assert!(matches!(pipeline.finalize(), Err(PipelineError::MissingSink)));

        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("S1", &[], &[], &log)).unwrap();
        pipeline.register(RecordingStage::new("S2", &[], &[], &log)).unwrap();
        assert!(matches!(pipeline.finalize(), Err(PipelineError::MultipleSinks { .. })));
    }

    #[test]
    fn test_failing_create_hook() {
        let log = new_log();
        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("Producer", &[], &["P"], &log)).unwrap();
        pipeline.register(RecordingStage::new("Broken", &["P"], &[], &log).failing_create()).unwrap();

        match pipeline.finalize().unwrap_err() {
            PipelineError::StageFailed { stage, hook, .. } => {
                assert_eq!(stage, "Broken");
                assert_eq!(hook, StageHook::Create);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Broken never finished creating, so only Producer is cleaned up
        assert_eq!(calls(&log, "cleanup"), vec!["Producer"]);
    }

    #[test]
    fn test_resize_runs_hooks_in_execution_order() {
        let log = new_log();
        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("S3", &["P2", "Lut"], &[], &log)).unwrap();
        pipeline.register(RecordingStage::new("LutBake", &[], &[], &log).with_output("Lut", hdr().fixed(16, 16))).unwrap();
        pipeline.register(RecordingStage::new("S2", &["P1"], &["P2"], &log)).unwrap();
        pipeline.register(RecordingStage::new("S1", &[], &["P1"], &log)).unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        pipeline.on_resize(move |event| sink.borrow_mut().push(event.clone()));

        pipeline.finalize().unwrap();
        let order = pipeline.execution_order().iter().map(|name| name.to_string()).collect::<Vec<_>>();
        assert_eq!(order, vec!["LutBake", "S1", "S2", "S3"]);
        let before = pipeline.backend().created_count();

        let event = pipeline.resize(SurfaceSize::new(640, 360)).unwrap();
        assert_eq!(event.affected, vec!["S1", "S2", "S3"]);
        assert_eq!(calls(&log, "resize"), vec!["S1:640", "S2:640", "S3:640"]);
        assert_eq!(pipeline.execution_order(), order);

        // P1 and P2 were recreated, the fixed-size Lut was not
        assert_eq!(pipeline.backend().created_count() - before, 2);
        assert_eq!(pipeline.backend().live_count(), 3);
        assert_eq!(pipeline.registry().pipe_info("P1").unwrap().height, 360);
        assert_eq!(pipeline.registry().pipe_info("Lut").unwrap().width, 16);
        assert_eq!(*events.borrow(), vec![event]);
    }

    #[test]
    fn test_resize_to_same_size_is_stable() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        pipeline.finalize().unwrap();

        pipeline.resize(SurfaceSize::new(800, 600)).unwrap();
        let handle = pipeline.registry().resolve("P1").unwrap();
        let first = *pipeline.registry().info(handle).unwrap();

        pipeline.resize(SurfaceSize::new(800, 600)).unwrap();
        assert_eq!(pipeline.registry().resolve("P1").unwrap(), handle);
        assert_eq!(*pipeline.registry().info(handle).unwrap(), first);
        assert_eq!(pipeline.backend().live_count(), 2);
    }

    #[test]
    fn test_failed_resize_keeps_last_good_state() {
        let log = new_log();
        let mut pipeline = PipelineManager::new(HeadlessBackend::with_memory_budget(20_000_000), PipelineConfig::default());
        pipeline.register(RecordingStage::new("S1", &[], &["P1"], &log)).unwrap();
        pipeline.register(RecordingStage::new("Sink", &["P1"], &[], &log)).unwrap();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        pipeline.on_resize(move |_| *counter.borrow_mut() += 1);
        pipeline.finalize().unwrap();

        let err = pipeline.resize(SurfaceSize::new(4096, 4096)).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocationFailure { .. }));
        assert_eq!(pipeline.surface_size(), SurfaceSize::new(1280, 720));
        assert_eq!(pipeline.registry().pipe_info("P1").unwrap().width, 1280);
        assert!(calls(&log, "resize").is_empty());
        assert_eq!(*fired.borrow(), 0);

        let mut frame = HeadlessFrame::new();
        pipeline.execute(&mut frame).unwrap();
        assert_eq!(frame.executed, vec!["S1", "Sink"]);
    }

    #[test]
    fn test_failing_resize_hook_still_resizes_other_stages() {
        let log = new_log();
        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("S1", &[], &["P1"], &log)).unwrap();
        pipeline.register(RecordingStage::new("S2", &["P1"], &["P2"], &log).failing_resize()).unwrap();
        pipeline.register(RecordingStage::new("S3", &["P2"], &[], &log)).unwrap();

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        pipeline.on_resize(move |_| *counter.borrow_mut() += 1);
        pipeline.finalize().unwrap();

        match pipeline.resize(SurfaceSize::new(640, 480)).unwrap_err() {
            PipelineError::StageFailed { stage, hook, .. } => {
                assert_eq!(stage, "S2");
                assert_eq!(hook, StageHook::Resize);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls(&log, "resize"), vec!["S1:640", "S2:640", "S3:640"]);
        assert_eq!(pipeline.config().surface, SurfaceSize::new(640, 480));
        assert_eq!(pipeline.surface_size(), SurfaceSize::new(640, 480));
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn test_debug_lists_state_and_stages() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        assert_eq!(pipeline.stage_names(), vec!["S3", "S1", "S2"]);

        let debug = format!("{pipeline:?}");
        assert!(debug.starts_with("PipelineManager"));
        assert!(debug.contains("Registering"));
        assert!(debug.contains("[\"S3\", \"S1\", \"S2\"]"));
    }

    #[test]
    fn test_resize_before_finalize_sets_initial_surface() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        pipeline.resize(SurfaceSize::new(320, 240)).unwrap();
        pipeline.finalize().unwrap();

        assert_eq!(pipeline.registry().pipe_info("P2").unwrap().width, 320);
        assert!(calls(&log, "resize").is_empty());
    }

    #[test]
    fn test_override_keeps_shadowed_stage_running() {
        let log = new_log();
        let mut pipeline = manager();
        pipeline.register(RecordingStage::new("Lighting", &[], &["ShadedScene"], &log)).unwrap();
        pipeline.register_overriding(RecordingStage::new("CustomLighting", &[], &["ShadedScene"], &log), &["ShadedScene"]).unwrap();
        pipeline.register(RecordingStage::new("FinalStage", &["ShadedScene"], &[], &log)).unwrap();
        pipeline.finalize().unwrap();

        let graph = pipeline.graph().unwrap();
        assert_eq!(graph.producer("ShadedScene"), pipeline.stage_id("CustomLighting"));
        assert_eq!(pipeline.backend().live_count(), 2);

        let mut frame = HeadlessFrame::new();
        pipeline.execute(&mut frame).unwrap();
        assert_eq!(frame.executed, vec!["Lighting", "CustomLighting", "FinalStage"]);
    }

    #[test]
    fn test_teardown_runs_in_reverse_order() {
        let log = new_log();
        let mut pipeline = manager();
        chain(&mut pipeline, &log);
        pipeline.register(RecordingStage::new("Extra", &[], &["Unused"], &log).with_target(PipeDescriptor::depth(PipeFormat::Depth32Float))).unwrap();
        pipeline.finalize().unwrap();
        assert_eq!(pipeline.backend().live_count(), 4);

        pipeline.teardown().unwrap();
        assert_eq!(calls(&log, "cleanup"), vec!["Extra", "S3", "S2", "S1"]);
        assert_eq!(pipeline.backend().live_count(), 0);
        assert_eq!(pipeline.state(), PipelineState::TornDown);
        assert!(matches!(pipeline.execute(&mut HeadlessFrame::new()), Err(PipelineError::NotFinalized)));
        assert!(matches!(pipeline.teardown(), Err(PipelineError::NotFinalized)));
    }

    #[test]
    fn test_drop_tears_down() {
        let log = new_log();
        {
            let mut pipeline = manager();
            chain(&mut pipeline, &log);
            pipeline.finalize().unwrap();
        }
        assert_eq!(calls(&log, "cleanup"), vec!["S3", "S2", "S1"]);
    }

    #[test]
    fn test_aliasing_shares_transient_pipes() {
        let log = new_log();
        let build = |alias: bool| {
            let mut pipeline = PipelineManager::new(HeadlessBackend::new(), PipelineConfig::default().with_aliasing(alias));
            pipeline.register(RecordingStage::new("S1", &[], &["P1"], &log)).unwrap();
            pipeline.register(RecordingStage::new("S2", &["P1"], &["P2"], &log)).unwrap();
            pipeline.register(RecordingStage::new("S3", &["P2"], &["P3"], &log)).unwrap();
            pipeline.register(RecordingStage::new("Sink", &["P3"], &[], &log)).unwrap();
            pipeline.finalize().unwrap();
            pipeline
        };

        assert_eq!(build(false).backend().live_count(), 3);

        let mut pipeline = build(true);
        assert_eq!(pipeline.backend().live_count(), 2);
        assert_eq!(pipeline.registry().resolve("P1").unwrap(), pipeline.registry().resolve("P3").unwrap());

        let mut frame = HeadlessFrame::new();
        pipeline.execute(&mut frame).unwrap();
        assert_eq!(frame.executed.len(), 4);
    }

    #[test]
    fn test_aliasing_keeps_sink_inputs() {
        let log = new_log();
        let mut pipeline = PipelineManager::new(HeadlessBackend::new(), PipelineConfig::default().with_aliasing(true));
        pipeline.register(RecordingStage::new("Scene", &[], &["Final"], &log)).unwrap();
        pipeline.register(RecordingStage::new("Present", &["Final"], &[], &log)).unwrap();
        pipeline.register(RecordingStage::new("Capture", &[], &["Scratch"], &log)).unwrap();
        pipeline.finalize().unwrap();

        assert_eq!(pipeline.execution_order(), vec!["Scene", "Present", "Capture"]);
        assert_ne!(pipeline.registry().resolve("Final").unwrap(), pipeline.registry().resolve("Scratch").unwrap());
        assert_eq!(pipeline.backend().live_count(), 2);
    }
}
