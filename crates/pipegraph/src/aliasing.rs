//! Transient pipe aliasing
//!
//! Pipes whose lifetimes in the execution order do not overlap and whose descriptors
//! are identical can share one physical resource. This module assigns physical slots
//! to pipe lifetimes with a first-fit scan over the slots allocated so far.

use crate::descriptor::PipeDescriptor;
use std::collections::HashMap;

/// Represents the lifetime of a pipe in the execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeLifetime {
    /// Pipe name
    pub pipe: String,
    /// Descriptor the physical resource must match
    pub descriptor: PipeDescriptor,
    /// Position of the producing stage in the execution order
    pub created_at: usize,
    /// Position of the last consuming stage (equal to `created_at` when unread)
    pub last_used_at: usize,
}

/// A physical resource shared by one or more pipes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalSlot {
    /// Slot index
    pub id: usize,
    /// Descriptor every pipe assigned to this slot shares
    pub descriptor: PipeDescriptor,
    /// Pipes bound to this slot, in order of creation
    pub pipes: Vec<String>,
}

/// Assigns physical slots to pipe lifetimes, reusing a slot when the previous
/// occupant's lifetime ended strictly before the new pipe is produced.
///
/// A pipe read by the same stage that produces another pipe keeps its slot until
/// after that stage, so a stage never reads and writes the same physical resource.
///
/// # Arguments
/// * `lifetimes` - Pipe lifetimes, in any order
///
/// # Returns
/// A tuple containing:
/// * `Vec<PhysicalSlot>` - Unique physical slots
/// * `HashMap<String, usize>` - Mapping from pipe names to slot indices
pub fn assign_physical_slots(lifetimes: &[PipeLifetime]) -> (Vec<PhysicalSlot>, HashMap<String, usize>) {
    let mut ordered: Vec<&PipeLifetime> = lifetimes.iter().collect();
    ordered.sort_by_key(|lifetime| lifetime.created_at);

    let mut slots: Vec<PhysicalSlot> = Vec::new();
    // Last use of the current occupant of each slot
    let mut occupied_until: Vec<usize> = Vec::new();
    let mut assignments = HashMap::with_capacity(lifetimes.len());

    for lifetime in ordered {
        let reusable = slots
            .iter()
            .zip(&occupied_until)
            .position(|(slot, &until)| until < lifetime.created_at && slot.descriptor == lifetime.descriptor);

        let id = match reusable {
            Some(id) => {
                slots[id].pipes.push(lifetime.pipe.clone());
                occupied_until[id] = lifetime.last_used_at;
                id
            }
            None => {
                let id = slots.len();
                slots.push(PhysicalSlot {
                    id,
                    descriptor: lifetime.descriptor,
                    pipes: vec![lifetime.pipe.clone()],
                });
                occupied_until.push(lifetime.last_used_at);
                id
            }
        };

        assignments.insert(lifetime.pipe.clone(), id);
    }

    (slots, assignments)
}
