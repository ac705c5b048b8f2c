//! Stages shared by unit tests

use crate::descriptor::{PipeDescriptor, PipeFormat};
use crate::error::StageError;
use crate::headless::{HeadlessBackend, HeadlessFrame, HeadlessResource};
use crate::registry::{PipeHandle, Resources};
use crate::stage::{ProducedPipe, Stage, StageContext};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) type Log = Rc<RefCell<Vec<String>>>;

pub(crate) fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Stage names logged for one hook, in call order
pub(crate) fn calls(log: &Log, hook: &str) -> Vec<String> {
    let prefix = format!("{hook}:");
    log.borrow().iter().filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string)).collect()
}

pub(crate) fn hdr() -> PipeDescriptor {
    PipeDescriptor::color(PipeFormat::Rgba16Float)
}

/// Stage that logs every hook and caches the handles of its pipes
pub(crate) struct RecordingStage {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<ProducedPipe>,
    target: Option<PipeDescriptor>,
    fail_create: bool,
    fail_resize: bool,
    log: Log,
    handles: Vec<PipeHandle>,
}

impl RecordingStage {
    /// Stage whose outputs are full-surface HDR color pipes
    pub(crate) fn new(name: &str, inputs: &[&str], outputs: &[&str], log: &Log) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| ProducedPipe::new(*s, hdr())).collect(),
            target: None,
            fail_create: false,
            fail_resize: false,
            log: Rc::clone(log),
            handles: Vec::new(),
        }
    }

    pub(crate) fn with_output(mut self, name: &str, descriptor: PipeDescriptor) -> Self {
        self.outputs.push(ProducedPipe::new(name, descriptor));
        self
    }

    /// Creates a stage-owned target named after the stage during `create`
    pub(crate) fn with_target(mut self, descriptor: PipeDescriptor) -> Self {
        self.target = Some(descriptor);
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub(crate) fn failing_resize(mut self) -> Self {
        self.fail_resize = true;
        self
    }
}

impl Stage<HeadlessBackend> for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_pipes(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn produced_pipes(&self) -> Vec<ProducedPipe> {
        self.outputs.clone()
    }

    fn create(&mut self, ctx: &mut StageContext<'_, HeadlessBackend>) -> Result<(), StageError> {
        self.log.borrow_mut().push(format!("create:{}", self.name));
        if self.fail_create {
            return Err(format!("{} refused to start", self.name).into());
        }
        if let Some(descriptor) = self.target {
            ctx.create_target(&self.name, descriptor)?;
        }
        Ok(())
    }

    fn configure(&mut self, ctx: &mut StageContext<'_, HeadlessBackend>) -> Result<(), StageError> {
        self.log.borrow_mut().push(format!("configure:{}", self.name));
        self.handles.clear();
        for pipe in self.inputs.iter().chain(self.outputs.iter().map(|output| &output.name)) {
            self.handles.push(ctx.resolve(pipe)?);
        }
        Ok(())
    }

    fn resize(&mut self, ctx: &mut StageContext<'_, HeadlessBackend>) -> Result<(), StageError> {
        let width = self.handles.first().and_then(|&handle| ctx.info(handle)).map_or(0, |info| info.width);
        self.log.borrow_mut().push(format!("resize:{}:{}", self.name, width));
        if self.fail_resize {
            return Err(format!("{} cannot follow the new surface", self.name).into());
        }
        Ok(())
    }

    fn execute(&mut self, resources: &Resources<HeadlessResource>, frame: &mut HeadlessFrame) {
        if self.handles.iter().all(|&handle| resources.get(handle).is_some()) {
            frame.record(&self.name);
        }
    }

    fn cleanup(&mut self, _ctx: &mut StageContext<'_, HeadlessBackend>) -> Result<(), StageError> {
        self.log.borrow_mut().push(format!("cleanup:{}", self.name));
        Ok(())
    }
}
