//! Resource registry
//!
//! The registry owns the mapping from pipe names to concrete backend resources. It is
//! the only component that talks to the [`ResourceBackend`]; every other part of the
//! crate deals in [`PipeHandle`]s. Handles index physical slots that stay stable for
//! the lifetime of a finalized pipeline: a resize swaps the resource inside a slot but
//! never moves it, so stages can cache handles once.

use crate::aliasing::{PipeLifetime, assign_physical_slots};
use crate::descriptor::{PipeDescriptor, ResourceInfo, SurfaceSize};
use crate::error::{BackendError, PipelineError};
use crate::stage::StageId;
use std::collections::HashMap;

/// The graphics backend seam
///
/// Resource creation and destruction are the only operations the core needs from a
/// graphics API. Everything else (command recording, shaders) belongs to the stages.
pub trait ResourceBackend {
    /// Concrete resource type (a texture, a buffer, ...)
    type Resource;
    /// Per-frame state handed to stages during execution (e.g. a command encoder)
    type Frame;

    /// Creates a resource matching `info`
    ///
    /// # Arguments
    /// * `label` - Human-readable name for debugging tools
    /// * `info` - Resolved extent, format and dimensionality
    fn create_resource(&mut self, label: &str, info: &ResourceInfo) -> Result<Self::Resource, BackendError>;

    /// Releases a resource previously returned by `create_resource`
    fn destroy_resource(&mut self, resource: Self::Resource);
}

/// Handle to a physical resource slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeHandle(u32);

impl PipeHandle {
    /// Slot index in the resource table
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

#[derive(Debug)]
struct Slot<R> {
    label: String,
    descriptor: PipeDescriptor,
    info: ResourceInfo,
    resource: Option<R>,
}

/// Table of live resources, indexed by [`PipeHandle`]
///
/// This is what stages read from during execution; lookups are plain indexing.
#[derive(Debug)]
pub struct Resources<R> {
    slots: Vec<Slot<R>>,
}

impl<R> Resources<R> {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Returns the resource bound to `handle`, if it is live
    #[inline]
    pub fn get(&self, handle: PipeHandle) -> Option<&R> {
        self.slots.get(handle.index()).and_then(|slot| slot.resource.as_ref())
    }

    /// Returns the resolved attributes of the resource bound to `handle`
    #[inline]
    pub fn info(&self, handle: PipeHandle) -> Option<&ResourceInfo> {
        self.slots.get(handle.index()).filter(|slot| slot.resource.is_some()).map(|slot| &slot.info)
    }

    /// Returns the debug label of the slot
    pub fn label(&self, handle: PipeHandle) -> Option<&str> {
        self.slots.get(handle.index()).map(|slot| slot.label.as_str())
    }

    /// Number of slots currently holding a resource
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.resource.is_some()).count()
    }
}

/// A declared pipe as seen by inspection tooling
#[derive(Debug, Clone)]
pub struct PipeRecord {
    /// Pipe name
    pub name: String,
    /// Producing stage
    pub producer: StageId,
    /// Name of the producing stage
    pub producer_name: String,
    /// Declared descriptor
    pub descriptor: PipeDescriptor,
    /// Bound slot, once materialized
    pub handle: Option<PipeHandle>,
    /// Name of the stage whose declaration this one overrides
    pub overrides: Option<String>,
}

#[derive(Debug)]
struct TargetEntry {
    stage: StageId,
    label: String,
    handle: PipeHandle,
}

/// Owns every concrete resource of a pipeline
///
/// Pipes are first declared (name, producer, descriptor), then materialized in one
/// pass once the execution order is known, which allows aliasing of transient pipes.
pub struct ResourceRegistry<B: ResourceBackend> {
    backend: B,
    surface: SurfaceSize,
    resources: Resources<B::Resource>,
    pipes: Vec<PipeRecord>,
    index: HashMap<String, usize>,
    // Declarations replaced by an override; only their own producer resolves them
    shadowed: Vec<PipeRecord>,
    targets: Vec<TargetEntry>,
}

impl<B: ResourceBackend> ResourceRegistry<B> {
    /// Creates an empty registry for the given backend and surface
    pub fn new(backend: B, surface: SurfaceSize) -> Self {
        Self {
            backend,
            surface,
            resources: Resources::new(),
            pipes: Vec::new(),
            index: HashMap::new(),
            shadowed: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Current surface size
    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    /// Records a new surface size without touching resources
    ///
    /// Only meaningful before materialization; use [`resize`](Self::resize) afterwards.
    pub(crate) fn set_surface(&mut self, surface: SurfaceSize) {
        self.surface = surface;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The live resource table
    pub fn resources(&self) -> &Resources<B::Resource> {
        &self.resources
    }

    /// Declares an output pipe
    ///
    /// # Arguments
    /// * `producer` - Stage declaring the pipe
    /// * `producer_name` - Name of that stage, for diagnostics
    /// * `pipe` - Pipe name
    /// * `descriptor` - Resource attributes
    /// * `allow_override` - Whether this declaration may replace an earlier producer
    ///
    /// # Errors
    /// `DuplicateOutput` when another stage already declared `pipe` and the
    /// declaration is not an explicit override, or when a stage declares it twice.
    pub fn declare(&mut self, producer: StageId, producer_name: &str, pipe: &str, descriptor: PipeDescriptor, allow_override: bool) -> Result<(), PipelineError> {
        let record = PipeRecord {
            name: pipe.to_string(),
            producer,
            producer_name: producer_name.to_string(),
            descriptor,
            handle: None,
            overrides: None,
        };

        match self.index.get(pipe) {
            None => {
                self.index.insert(pipe.to_string(), self.pipes.len());
                self.pipes.push(record);
                Ok(())
            }
            Some(&existing) if self.pipes[existing].producer != producer && allow_override => {
                let replaced = self.pipes[existing].producer_name.clone();
                let previous = std::mem::replace(
                    &mut self.pipes[existing],
                    PipeRecord {
                        overrides: Some(replaced),
                        ..record
                    },
                );
                tracing::debug!(pipe, stage = producer_name, replaced = %previous.producer_name, "Shadowed pipe declaration");
                self.shadowed.push(previous);
                Ok(())
            }
            Some(&existing) => Err(PipelineError::DuplicateOutput {
                pipe: pipe.to_string(),
                first: self.pipes[existing].producer_name.clone(),
                second: producer_name.to_string(),
            }),
        }
    }

    /// Creates backend resources for every declared pipe that has none yet
    ///
    /// When `lifetimes` is given, live pipes listed there are packed onto shared
    /// physical slots (see [`assign_physical_slots`]). Either every resource is
    /// created or none is: on failure the resources created so far are destroyed.
    pub fn materialize(&mut self, lifetimes: Option<&[PipeLifetime]>) -> Result<(), PipelineError> {
        let base = self.resources.slots.len();
        let mut pending: Vec<(String, PipeDescriptor)> = Vec::new();
        let mut live_slots: Vec<Option<usize>> = vec![None; self.pipes.len()];

        if let Some(lifetimes) = lifetimes {
            let (physical, assignments) = assign_physical_slots(lifetimes);
            for slot in &physical {
                pending.push((slot.pipes.join("+"), slot.descriptor));
            }
            for (position, record) in self.pipes.iter().enumerate() {
                if record.handle.is_none() {
                    live_slots[position] = assignments.get(&record.name).copied();
                }
            }
        }

        for (position, record) in self.pipes.iter().enumerate() {
            if record.handle.is_none() && live_slots[position].is_none() {
                live_slots[position] = Some(pending.len());
                pending.push((record.name.clone(), record.descriptor));
            }
        }

        let mut shadowed_slots: Vec<Option<usize>> = vec![None; self.shadowed.len()];
        for (position, record) in self.shadowed.iter().enumerate() {
            if record.handle.is_none() {
                shadowed_slots[position] = Some(pending.len());
                pending.push((format!("{} ({})", record.name, record.producer_name), record.descriptor));
            }
        }

        for (label, descriptor) in pending {
            let info = descriptor.resolve(self.surface);
            match self.backend.create_resource(&label, &info) {
                Ok(resource) => self.resources.slots.push(Slot {
                    label,
                    descriptor,
                    info,
                    resource: Some(resource),
                }),
                Err(source) => {
                    self.truncate_slots(base);
                    return Err(PipelineError::ResourceAllocationFailure { label, source });
                }
            }
        }

        for (record, slot) in self.pipes.iter_mut().zip(live_slots) {
            if let Some(slot) = slot {
                record.handle = Some(PipeHandle::from_index(base + slot));
            }
        }
        for (record, slot) in self.shadowed.iter_mut().zip(shadowed_slots) {
            if let Some(slot) = slot {
                record.handle = Some(PipeHandle::from_index(base + slot));
            }
        }

        tracing::debug!(pipes = self.pipes.len(), slots = self.resources.slots.len() - base, surface = %self.surface, "Materialized pipes");
        Ok(())
    }

    /// Resolves a pipe name to its bound handle
    ///
    /// # Errors
    /// `UnknownPipe` when no stage declared the pipe or it is not materialized yet.
    pub fn resolve(&self, pipe: &str) -> Result<PipeHandle, PipelineError> {
        self.index
            .get(pipe)
            .and_then(|&position| self.pipes[position].handle)
            .ok_or_else(|| PipelineError::UnknownPipe { pipe: pipe.to_string() })
    }

    /// Resolves a pipe from the point of view of `stage`
    ///
    /// A stage whose output was overridden still writes to its own private resource.
    pub fn resolve_for(&self, stage: StageId, pipe: &str) -> Result<PipeHandle, PipelineError> {
        let own_shadowed = self.shadowed.iter().find(|record| record.producer == stage && record.name == pipe).and_then(|record| record.handle);
        match own_shadowed {
            Some(handle) => Ok(handle),
            None => self.resolve(pipe),
        }
    }

    /// Attributes of the resource bound to `handle`
    pub fn info(&self, handle: PipeHandle) -> Option<&ResourceInfo> {
        self.resources.info(handle)
    }

    /// Attributes of the resource bound to a pipe name
    pub fn pipe_info(&self, pipe: &str) -> Option<&ResourceInfo> {
        self.resolve(pipe).ok().and_then(|handle| self.info(handle))
    }

    /// Declared pipes, in declaration order
    pub fn pipes(&self) -> &[PipeRecord] {
        &self.pipes
    }

    /// Declarations that were replaced by an override
    pub fn shadowed_pipes(&self) -> &[PipeRecord] {
        &self.shadowed
    }

    /// Creates a stage-owned resource
    ///
    /// Stage-owned targets are not visible to other stages. Surface-relative targets are
    /// recreated together with surface-relative pipes on resize.
    pub fn create_target(&mut self, stage: StageId, stage_name: &str, label: &str, descriptor: PipeDescriptor) -> Result<PipeHandle, PipelineError> {
        if self.targets.iter().any(|target| target.stage == stage && target.label == label) {
            return Err(PipelineError::DuplicateTarget {
                stage: stage_name.to_string(),
                label: label.to_string(),
            });
        }

        let full_label = format!("{stage_name}/{label}");
        let info = descriptor.resolve(self.surface);
        let resource = self
            .backend
            .create_resource(&full_label, &info)
            .map_err(|source| PipelineError::ResourceAllocationFailure { label: full_label.clone(), source })?;

        let handle = PipeHandle::from_index(self.resources.slots.len());
        self.resources.slots.push(Slot {
            label: full_label,
            descriptor,
            info,
            resource: Some(resource),
        });
        self.targets.push(TargetEntry {
            stage,
            label: label.to_string(),
            handle,
        });
        Ok(handle)
    }

    /// Looks up a target previously created by `stage`
    pub fn target(&self, stage: StageId, label: &str) -> Result<PipeHandle, PipelineError> {
        self.targets
            .iter()
            .find(|target| target.stage == stage && target.label == label)
            .map(|target| target.handle)
            .ok_or_else(|| PipelineError::UnknownPipe { pipe: label.to_string() })
    }

    /// Handles of every target owned by `stage`
    pub fn targets_of(&self, stage: StageId) -> impl Iterator<Item = PipeHandle> + '_ {
        self.targets.iter().filter(move |target| target.stage == stage).map(|target| target.handle)
    }

    /// Recreates every surface-relative resource for a new surface size
    ///
    /// Replacements are created before anything is released. If any creation fails,
    /// the replacements are destroyed and the previous resources stay bound.
    ///
    /// # Returns
    /// The handles whose resource was replaced
    pub fn resize(&mut self, surface: SurfaceSize) -> Result<Vec<PipeHandle>, PipelineError> {
        let mut replacements: Vec<(usize, B::Resource, ResourceInfo)> = Vec::new();

        for (index, slot) in self.resources.slots.iter().enumerate() {
            if slot.resource.is_none() || !slot.descriptor.is_surface_relative() {
                continue;
            }

            let info = slot.descriptor.resolve(surface);
            match self.backend.create_resource(&slot.label, &info) {
                Ok(resource) => replacements.push((index, resource, info)),
                Err(source) => {
                    let label = slot.label.clone();
                    for (_, resource, _) in replacements {
                        self.backend.destroy_resource(resource);
                    }
                    tracing::warn!(%surface, label, error = %source, "Resize rolled back");
                    return Err(PipelineError::ResourceAllocationFailure { label, source });
                }
            }
        }

        let mut invalidated = Vec::with_capacity(replacements.len());
        for (index, resource, info) in replacements {
            let slot = &mut self.resources.slots[index];
            if let Some(old) = slot.resource.replace(resource) {
                self.backend.destroy_resource(old);
            }
            slot.info = info;
            invalidated.push(PipeHandle::from_index(index));
        }

        self.surface = surface;
        Ok(invalidated)
    }

    /// Releases every target owned by `stage`
    pub fn release_targets(&mut self, stage: StageId) {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.targets).into_iter().partition(|target| target.stage == stage);
        self.targets = kept;

        for target in released {
            if let Some(resource) = self.resources.slots[target.handle.index()].resource.take() {
                self.backend.destroy_resource(resource);
            }
        }
    }

    /// Destroys every resource and forgets every declaration
    pub fn release_all(&mut self) {
        self.truncate_slots(0);
        self.pipes.clear();
        self.index.clear();
        self.shadowed.clear();
        self.targets.clear();
    }

    fn truncate_slots(&mut self, len: usize) {
        while self.resources.slots.len() > len {
            if let Some(resource) = self.resources.slots.pop().and_then(|slot| slot.resource) {
                self.backend.destroy_resource(resource);
            }
        }
    }
}
