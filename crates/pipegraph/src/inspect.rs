//! Read-only inspection of a finalized pipeline
//!
//! A [`PipelineSnapshot`] carries everything a pipe viewer needs to draw the graph:
//! stages in execution order, one lane per pipe in order of first production, a
//! stable color per pipe and the resolved resource attributes for thumbnails.
//! Snapshots are plain data and may be taken between frames.

use crate::descriptor::{ResourceInfo, SurfaceSize};
use crate::error::PipelineError;
use crate::pipeline::PipelineManager;
use crate::registry::ResourceBackend;
use serde::Serialize;
use std::collections::HashMap;

/// Width in pixels of a pipe thumbnail in the viewer
pub const THUMBNAIL_WIDTH: u32 = 160;

/// A stage as shown by the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageView {
    pub name: String,
    /// Short label with the conventional "Stage" suffix removed
    pub label: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub is_sink: bool,
}

/// A pipe as shown by the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipeView {
    pub name: String,
    /// Stage producing the pipe as seen by readers
    pub producer: String,
    /// Readers in execution order
    pub consumers: Vec<String>,
    pub info: ResourceInfo,
    /// Row of the pipe in the viewer, assigned in order of first production
    pub lane: usize,
    /// Display color derived from the pipe name
    pub color: [u8; 3],
    /// Whether a thumbnail can be drawn
    pub inspectable: bool,
    /// Stage whose declaration was replaced by an override
    pub overrides: Option<String>,
}

/// Resolved state of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub surface: SurfaceSize,
    /// Stages in execution order
    pub stages: Vec<StageView>,
    /// Pipes in lane order
    pub pipes: Vec<PipeView>,
}

impl PipelineSnapshot {
    pub fn stage(&self, name: &str) -> Option<&StageView> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn pipe(&self, name: &str) -> Option<&PipeView> {
        self.pipes.iter().find(|pipe| pipe.name == name)
    }

    /// Thumbnail extent for this snapshot's surface
    pub fn thumbnail_size(&self) -> (u32, u32) {
        thumbnail_size(self.surface, THUMBNAIL_WIDTH)
    }
}

/// Stable display color for a pipe name
///
/// FNV-1a over the name bytes; every channel is lifted into `64..=255` so colors stay
/// readable on a dark background.
pub fn pipe_color(name: &str) -> [u8; 3] {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }

    let [r, g, b, _] = hash.to_le_bytes();
    [lift(r), lift(g), lift(b)]
}

fn lift(channel: u8) -> u8 {
    64 + channel % 192
}

/// Thumbnail extent keeping the surface aspect ratio
///
/// # Arguments
/// * `surface` - Current surface size
/// * `width` - Thumbnail width in pixels
pub fn thumbnail_size(surface: SurfaceSize, width: u32) -> (u32, u32) {
    let height = (surface.aspect() * f64::from(width)).round() as u32;
    (width, height.max(1))
}

fn stage_label(name: &str) -> String {
    let label = name.replace("Stage", "");
    if label.is_empty() { name.to_string() } else { label }
}

impl<B: ResourceBackend> PipelineManager<B> {
    /// Captures the resolved graph for inspection tooling
    ///
    /// # Errors
    /// `NotFinalized` unless the pipeline is finalized.
    pub fn snapshot(&self) -> Result<PipelineSnapshot, PipelineError> {
        let graph = self.graph().filter(|_| self.is_finalized()).ok_or(PipelineError::NotFinalized)?;
        let name_of = |id| self.stage_name(id).unwrap_or_default().to_string();

        let mut stages = Vec::with_capacity(graph.order().len());
        let mut lane_order: Vec<&str> = Vec::new();

        for &id in graph.order() {
            let Some((inputs, outputs)) = self.declared_pipes(id) else {
                continue;
            };
            for output in outputs {
                if !lane_order.contains(&output.name.as_str()) {
                    lane_order.push(&output.name);
                }
            }

            let name = name_of(id);
            stages.push(StageView {
                label: stage_label(&name),
                inputs: inputs.to_vec(),
                outputs: outputs.iter().map(|output| output.name.clone()).collect(),
                is_sink: id == graph.sink(),
                name,
            });
        }

        let shadowed: HashMap<&str, &str> = self.registry().pipes().iter().filter_map(|record| Some((record.name.as_str(), record.overrides.as_deref()?))).collect();

        let mut pipes = Vec::with_capacity(lane_order.len());
        for (lane, name) in lane_order.into_iter().enumerate() {
            let (Some(node), Some(info)) = (graph.pipe(name), self.registry().pipe_info(name)) else {
                continue;
            };

            let mut consumers = node.consumers.clone();
            consumers.sort_by_key(|&consumer| graph.position(consumer));

            pipes.push(PipeView {
                name: name.to_string(),
                producer: name_of(node.producer),
                consumers: consumers.into_iter().map(name_of).collect(),
                info: *info,
                lane,
                color: pipe_color(name),
                inspectable: info.is_inspectable(),
                overrides: shadowed.get(name).map(|stage| stage.to_string()),
            });
        }

        Ok(PipelineSnapshot {
            surface: self.surface_size(),
            stages,
            pipes,
        })
    }
}
