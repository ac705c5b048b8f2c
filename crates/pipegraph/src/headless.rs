//! In-memory backend
//!
//! `HeadlessBackend` allocates nothing on a device. It hands out numbered resources,
//! records every creation and destruction and can be told to fail, which makes the
//! whole build/resize/teardown cycle observable without a GPU. The CLI uses it to
//! dry-run pipeline manifests.

use crate::descriptor::ResourceInfo;
use crate::error::BackendError;
use crate::registry::ResourceBackend;
use std::collections::{BTreeMap, HashSet};

/// A resource handed out by [`HeadlessBackend`]
#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessResource {
    id: u64,
    label: String,
    info: ResourceInfo,
}

impl HeadlessResource {
    /// Unique allocation id; never reused
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }
}

/// Allocation log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Created { id: u64, label: String, info: ResourceInfo },
    Destroyed { id: u64, label: String },
}

/// Per-frame state: the names of the stages that ran, in order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeadlessFrame {
    pub executed: Vec<String>,
}

impl HeadlessFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a stage ran in this frame
    pub fn record(&mut self, stage: &str) {
        self.executed.push(stage.to_string());
    }
}

/// Backend that tracks allocations in memory
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    live: BTreeMap<u64, (String, u64)>,
    events: Vec<BackendEvent>,
    memory_budget: Option<u64>,
    failing_labels: HashSet<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that fails with `OutOfMemory` once live allocations would exceed `bytes`
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::default()
        }
    }

    /// Makes every creation of a resource with this label fail
    pub fn fail_on_label(mut self, label: impl Into<String>) -> Self {
        self.failing_labels.insert(label.into());
        self
    }

    pub fn set_memory_budget(&mut self, bytes: Option<u64>) {
        self.memory_budget = bytes;
    }

    /// Number of resources currently alive
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Sum of the footprints of live resources
    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|(_, bytes)| bytes).sum()
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.live.contains_key(&id)
    }

    /// Labels of live resources, in allocation order
    pub fn live_labels(&self) -> Vec<&str> {
        self.live.values().map(|(label, _)| label.as_str()).collect()
    }

    /// Every creation and destruction so far
    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn created_count(&self) -> usize {
        self.events.iter().filter(|event| matches!(event, BackendEvent::Created { .. })).count()
    }

    pub fn destroyed_count(&self) -> usize {
        self.events.iter().filter(|event| matches!(event, BackendEvent::Destroyed { .. })).count()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

impl ResourceBackend for HeadlessBackend {
    type Resource = HeadlessResource;
    type Frame = HeadlessFrame;

    fn create_resource(&mut self, label: &str, info: &ResourceInfo) -> Result<Self::Resource, BackendError> {
        if self.failing_labels.contains(label) {
            return Err(BackendError::Device(format!("injected failure for '{label}'")));
        }

        let bytes = info.byte_size();
        if self.memory_budget.is_some_and(|budget| self.live_bytes() + bytes > budget) {
            return Err(BackendError::OutOfMemory { requested: bytes });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, (label.to_string(), bytes));
        self.events.push(BackendEvent::Created {
            id,
            label: label.to_string(),
            info: *info,
        });

        Ok(HeadlessResource {
            id,
            label: label.to_string(),
            info: *info,
        })
    }

    fn destroy_resource(&mut self, resource: Self::Resource) {
        self.live.remove(&resource.id);
        self.events.push(BackendEvent::Destroyed {
            id: resource.id,
            label: resource.label,
        });
    }
}
