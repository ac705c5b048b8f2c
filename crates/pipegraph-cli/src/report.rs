//! Plain-text rendering of pipeline state

use pipegraph::{PipelineSnapshot, ResizeEvent, ResourceInfo};
use std::fmt;

/// Execution order of a finalized pipeline
pub struct OrderReport<'a> {
    pub name: &'a str,
    pub order: &'a [&'a str],
    pub resources: usize,
}

impl fmt::Display for OrderReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline '{}': {} stages, {} resources", self.name, self.order.len(), self.resources)?;
        for (position, stage) in self.order.iter().enumerate() {
            writeln!(f, "  {:>2}. {stage}", position + 1)?;
        }
        Ok(())
    }
}

/// Stages and pipes of a snapshot, one per line
pub struct SnapshotReport<'a>(pub &'a PipelineSnapshot);

impl fmt::Display for SnapshotReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.0;
        let (thumb_w, thumb_h) = snapshot.thumbnail_size();
        writeln!(f, "Surface {} (thumbnails {thumb_w}x{thumb_h})", snapshot.surface)?;

        writeln!(f, "Stages:")?;
        for (position, stage) in snapshot.stages.iter().enumerate() {
            write!(f, "  {:>2}. {}", position + 1, stage.name)?;
            if !stage.inputs.is_empty() {
                write!(f, "  reads [{}]", stage.inputs.join(", "))?;
            }
            if !stage.outputs.is_empty() {
                write!(f, "  writes [{}]", stage.outputs.join(", "))?;
            }
            if stage.is_sink {
                write!(f, "  (sink)")?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Pipes:")?;
        for pipe in &snapshot.pipes {
            let [r, g, b] = pipe.color;
            write!(f, "  {:>2} #{r:02x}{g:02x}{b:02x} {:<20} {:<16} {} -> ", pipe.lane, pipe.name, extent(&pipe.info), pipe.producer)?;
            if pipe.consumers.is_empty() {
                write!(f, "(unread)")?;
            } else {
                write!(f, "{}", pipe.consumers.join(", "))?;
            }
            if !pipe.inspectable {
                write!(f, "  [no thumbnail]")?;
            }
            if let Some(replaced) = &pipe.overrides {
                write!(f, "  [overrides {replaced}]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Effect of a resize on a pipeline
pub struct ResizeReport<'a> {
    pub event: &'a ResizeEvent,
    pub snapshot: &'a PipelineSnapshot,
}

impl fmt::Display for ResizeReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resized to {}", self.event.surface)?;
        if self.event.affected.is_empty() {
            writeln!(f, "No stage was affected")?;
        } else {
            writeln!(f, "Resize hooks ran for: {}", self.event.affected.join(", "))?;
        }
        for pipe in &self.snapshot.pipes {
            writeln!(f, "  {:<20} {}", pipe.name, extent(&pipe.info))?;
        }
        Ok(())
    }
}

fn extent(info: &ResourceInfo) -> String {
    if info.layers > 1 {
        format!("{}x{}x{} {:?}", info.width, info.height, info.layers, info.format)
    } else {
        format!("{}x{} {:?}", info.width, info.height, info.format)
    }
}
