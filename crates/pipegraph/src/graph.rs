//! Stage graph builder
//!
//! Turns the ordered registration list into a validated DAG and a deterministic
//! execution order. Nodes are stages, edges run from the stage producing a pipe to
//! every stage reading it. Validation happens in a fixed sequence so that the first
//! reported error is stable for a given registration list:
//! duplicate outputs, unresolved inputs, cycles, then the sink count.

use crate::aliasing::PipeLifetime;
use crate::descriptor::PipeDescriptor;
use crate::error::PipelineError;
use crate::stage::{ProducedPipe, StageId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// What the builder needs to know about one registered stage
#[derive(Debug, Clone, Copy)]
pub struct StageDeclaration<'a> {
    /// Unique stage name
    pub name: &'a str,
    /// Pipes read by the stage, in order
    pub inputs: &'a [String],
    /// Pipes defined by the stage
    pub outputs: &'a [ProducedPipe],
    /// Pipe names the stage may redefine even if an earlier stage produces them
    pub overrides: &'a [String],
}

/// A producer to consumer dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: StageId,
    pub to: StageId,
    /// Pipe carried by this edge
    pub pipe: String,
}

/// A pipe declaration replaced by an explicit override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadow {
    pub pipe: String,
    /// Stage whose declaration was replaced
    pub shadowed: StageId,
    /// Stage now producing the pipe
    pub by: StageId,
}

/// A pipe as seen by the graph: its effective producer and its readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNode {
    pub name: String,
    pub producer: StageId,
    pub descriptor: PipeDescriptor,
    /// Readers in registration order
    pub consumers: Vec<StageId>,
}

/// A validated stage graph
#[derive(Debug, Clone)]
pub struct StageGraph {
    order: Vec<StageId>,
    // Position of each stage in `order`, indexed by registration index
    positions: Vec<usize>,
    edges: Vec<Edge>,
    pipes: Vec<PipeNode>,
    pipe_index: HashMap<String, usize>,
    shadows: Vec<Shadow>,
    sink: StageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    NotVisited,
    InProgress,
    Done,
}

impl StageGraph {
    /// Builds and validates the graph for stages given in registration order
    ///
    /// # Arguments
    /// * `stages` - Declarations in registration order; `StageId`s index this slice
    ///
    /// # Returns
    /// The validated graph, or the first construction error found
    pub fn build(stages: &[StageDeclaration<'_>]) -> Result<Self, PipelineError> {
        let mut pipes: Vec<PipeNode> = Vec::new();
        let mut pipe_index: HashMap<String, usize> = HashMap::new();
        let mut shadows = Vec::new();

        for (index, stage) in stages.iter().enumerate() {
            for output in stage.outputs {
                match pipe_index.get(&output.name) {
                    None => {
                        pipe_index.insert(output.name.clone(), pipes.len());
                        pipes.push(PipeNode {
                            name: output.name.clone(),
                            producer: StageId::new(index),
                            descriptor: output.descriptor,
                            consumers: Vec::new(),
                        });
                    }
                    Some(&existing) => {
                        let previous = pipes[existing].producer;
                        if previous.index() != index && stage.overrides.contains(&output.name) {
                            tracing::warn!(pipe = %output.name, stage = stage.name, replaced = stages[previous.index()].name, "Pipe overridden");
                            shadows.push(Shadow {
                                pipe: output.name.clone(),
                                shadowed: previous,
                                by: StageId::new(index),
                            });
                            pipes[existing].producer = StageId::new(index);
                            pipes[existing].descriptor = output.descriptor;
                        } else {
                            return Err(PipelineError::DuplicateOutput {
                                pipe: output.name.clone(),
                                first: stages[previous.index()].name.to_string(),
                                second: stage.name.to_string(),
                            });
                        }
                    }
                }
            }
        }

        let mut edges = Vec::new();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
        for (index, stage) in stages.iter().enumerate() {
            for input in stage.inputs {
                let Some(&pipe) = pipe_index.get(input) else {
                    return Err(PipelineError::UnresolvedInput {
                        stage: stage.name.to_string(),
                        pipe: input.clone(),
                    });
                };

                let node = &mut pipes[pipe];
                if !node.consumers.contains(&StageId::new(index)) {
                    node.consumers.push(StageId::new(index));
                }
                let producer = node.producer.index();
                if !adjacency[producer].contains(&index) {
                    adjacency[producer].push(index);
                }
                edges.push(Edge {
                    from: node.producer,
                    to: StageId::new(index),
                    pipe: input.clone(),
                });
            }
        }

        if let Some(cycle) = find_cycle(&adjacency) {
            return Err(PipelineError::CyclicDependency {
                path: cycle.into_iter().map(|index| stages[index].name.to_string()).collect(),
            });
        }

        let order = topological_order(&adjacency);

        let sinks: Vec<usize> = (0..stages.len()).filter(|&index| stages[index].outputs.is_empty()).collect();
        let sink = match sinks.as_slice() {
            [] => return Err(PipelineError::MissingSink),
            [sink] => StageId::new(*sink),
            _ => {
                return Err(PipelineError::MultipleSinks {
                    stages: sinks.iter().map(|&index| stages[index].name.to_string()).collect(),
                });
            }
        };

        for pipe in pipes.iter().filter(|pipe| pipe.consumers.is_empty()) {
            tracing::warn!(pipe = %pipe.name, stage = stages[pipe.producer.index()].name, "Pipe has no consumer");
        }

        let mut positions = vec![0; stages.len()];
        for (position, stage) in order.iter().enumerate() {
            positions[stage.index()] = position;
        }

        Ok(Self {
            order,
            positions,
            edges,
            pipes,
            pipe_index,
            shadows,
            sink,
        })
    }

    /// Stages in execution order
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    /// Position of a stage in the execution order
    pub fn position(&self, stage: StageId) -> Option<usize> {
        self.positions.get(stage.index()).copied()
    }

    /// All producer to consumer edges, one per (input, consumer)
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Pipes in declaration order
    pub fn pipes(&self) -> &[PipeNode] {
        &self.pipes
    }

    pub fn pipe(&self, name: &str) -> Option<&PipeNode> {
        self.pipe_index.get(name).map(|&index| &self.pipes[index])
    }

    /// Effective producer of a pipe
    pub fn producer(&self, pipe: &str) -> Option<StageId> {
        self.pipe(pipe).map(|node| node.producer)
    }

    /// Declarations replaced by overrides
    pub fn shadows(&self) -> &[Shadow] {
        &self.shadows
    }

    /// The unique stage producing no pipes
    pub fn sink(&self) -> StageId {
        self.sink
    }

    /// Lifetimes of every pipe in terms of execution order positions
    ///
    /// A pipe lives from its producer's position to its last reader's position. An
    /// unread pipe lives only during its producer. Pipes read by the sink hold the
    /// final image and live past the last position, so no later stage reuses them.
    pub fn pipe_lifetimes(&self) -> Vec<PipeLifetime> {
        self.pipes
            .iter()
            .map(|pipe| {
                let created_at = self.positions[pipe.producer.index()];
                let last_used_at = if pipe.consumers.contains(&self.sink) {
                    self.order.len()
                } else {
                    pipe.consumers.iter().map(|consumer| self.positions[consumer.index()]).max().unwrap_or(created_at)
                };
                PipeLifetime {
                    pipe: pipe.name.clone(),
                    descriptor: pipe.descriptor,
                    created_at,
                    last_used_at,
                }
            })
            .collect()
    }
}

/// Depth-first search with in-progress marking
///
/// Uses an explicit stack of `(node, next edge)` frames so that long chains do not
/// exhaust the call stack.
///
/// # Returns
/// The first cycle found, as a path of stage indices starting and ending with the
/// same stage
fn find_cycle(adjacency: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::NotVisited; adjacency.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..adjacency.len() {
        if marks[start] != Mark::NotVisited {
            continue;
        }

        marks[start] = Mark::InProgress;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, edge) = *frame;
            let Some(&next) = adjacency[node].get(edge) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[next] {
                Mark::InProgress => {
                    let from = stack.iter().position(|&(stage, _)| stage == next).unwrap_or(0);
                    let mut cycle: Vec<usize> = stack[from..].iter().map(|&(stage, _)| stage).collect();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::NotVisited => {
                    marks[next] = Mark::InProgress;
                    stack.push((next, 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}

/// Kahn's algorithm, always picking the earliest registered ready stage
///
/// The adjacency must be acyclic.
fn topological_order(adjacency: &[Vec<usize>]) -> Vec<StageId> {
    let mut in_degree = vec![0usize; adjacency.len()];
    for targets in adjacency {
        for &target in targets {
            in_degree[target] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..adjacency.len()).filter(|&index| in_degree[index] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(adjacency.len());

    while let Some(Reverse(node)) = ready.pop() {
        order.push(StageId::new(node));
        for &target in &adjacency[node] {
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PipeFormat;

    struct Decl {
        name: String,
        inputs: Vec<String>,
        outputs: Vec<ProducedPipe>,
        overrides: Vec<String>,
    }

    fn decl(name: &str, inputs: &[&str], outputs: &[&str]) -> Decl {
        Decl {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| ProducedPipe::new(*s, PipeDescriptor::color(PipeFormat::Rgba16Float))).collect(),
            overrides: Vec::new(),
        }
    }

    fn overriding(mut decl: Decl, pipes: &[&str]) -> Decl {
        decl.overrides = pipes.iter().map(|s| s.to_string()).collect();
        decl
    }

    fn build(decls: &[Decl]) -> Result<StageGraph, PipelineError> {
        let views: Vec<StageDeclaration<'_>> = decls
            .iter()
            .map(|decl| StageDeclaration {
                name: &decl.name,
                inputs: &decl.inputs,
                outputs: &decl.outputs,
                overrides: &decl.overrides,
            })
            .collect();
        StageGraph::build(&views)
    }

    fn order_names<'a>(graph: &StageGraph, decls: &'a [Decl]) -> Vec<&'a str> {
        graph.order().iter().map(|id| decls[id.index()].name.as_str()).collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let decls = [decl("S1", &[], &["P1"]), decl("S2", &["P1"], &["P2"]), decl("S3", &["P2"], &[])];
        let graph = build(&decls).unwrap();

        assert_eq!(order_names(&graph, &decls), vec!["S1", "S2", "S3"]);
        assert_eq!(graph.sink(), StageId::new(2));
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.producer("P2"), Some(StageId::new(1)));
    }

    #[test]
    fn test_consumers_registered_before_producers_run_after_them() {
        let decls = [decl("FinalStage", &["ShadedScene"], &[]), decl("Lighting", &["GBuffer"], &["ShadedScene"]), decl("GBuffer", &[], &["GBuffer"])];
        let graph = build(&decls).unwrap();

        assert_eq!(order_names(&graph, &decls), vec!["GBuffer", "Lighting", "FinalStage"]);
        for edge in graph.edges() {
            assert!(graph.position(edge.from).unwrap() < graph.position(edge.to).unwrap());
        }
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let decls = [decl("Sink", &["X", "Y"], &[]), decl("B", &[], &["Y"]), decl("A", &[], &["X"])];
        let graph = build(&decls).unwrap();

        assert_eq!(order_names(&graph, &decls), vec!["B", "A", "Sink"]);
    }

    #[test]
    fn test_duplicate_output() {
        let decls = [decl("A", &[], &["X"]), decl("B", &[], &["X"]), decl("Sink", &["X"], &[])];
        match build(&decls).unwrap_err() {
            PipelineError::DuplicateOutput { pipe, first, second } => {
                assert_eq!((pipe.as_str(), first.as_str(), second.as_str()), ("X", "A", "B"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_output_within_one_stage() {
        let decls = [overriding(decl("A", &[], &["X", "X"]), &["X"]), decl("Sink", &["X"], &[])];
        assert!(matches!(build(&decls), Err(PipelineError::DuplicateOutput { .. })));
    }

    #[test]
    fn test_override_redirects_consumers() {
        let decls = [decl("Lighting", &[], &["ShadedScene"]), overriding(decl("Custom", &[], &["ShadedScene"]), &["ShadedScene"]), decl("Final", &["ShadedScene"], &[])];
        let graph = build(&decls).unwrap();

        assert_eq!(graph.producer("ShadedScene"), Some(StageId::new(1)));
        assert_eq!(
            graph.shadows(),
            &[Shadow {
                pipe: "ShadedScene".into(),
                shadowed: StageId::new(0),
                by: StageId::new(1),
            }]
        );
        assert_eq!(graph.edges()[0].from, StageId::new(1));
        assert_eq!(order_names(&graph, &decls), vec!["Lighting", "Custom", "Final"]);
    }

    #[test]
    fn test_override_without_earlier_producer_is_a_plain_declaration() {
        let decls = [overriding(decl("A", &[], &["X"]), &["X"]), decl("Sink", &["X"], &[])];
        let graph = build(&decls).unwrap();
        assert!(graph.shadows().is_empty());
    }

    #[test]
    fn test_unresolved_input() {
        let decls = [decl("A", &[], &["X"]), decl("Sink", &["X", "Y"], &[])];
        match build(&decls).unwrap_err() {
            PipelineError::UnresolvedInput { stage, pipe } => {
                assert_eq!(stage, "Sink");
                assert_eq!(pipe, "Y");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_names_every_stage_on_it() {
        let decls = [decl("A", &["Q"], &["P"]), decl("B", &["P"], &["Q"]), decl("Sink", &["P"], &[])];
        match build(&decls).unwrap_err() {
            PipelineError::CyclicDependency { path } => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_one_node_cycle() {
        let decls = [decl("Blur", &["Color"], &["Color"]), decl("Sink", &["Color"], &[])];
        match build(&decls).unwrap_err() {
            PipelineError::CyclicDependency { path } => assert_eq!(path, vec!["Blur", "Blur"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sink_count() {
        assert!(matches!(build(&[]), Err(PipelineError::MissingSink)));

        let decls = [decl("A", &[], &["X"]), decl("B", &["X"], &["Y"])];
        assert!(matches!(build(&decls), Err(PipelineError::MissingSink)));

        let decls = [decl("A", &[], &["X"]), decl("S1", &["X"], &[]), decl("S2", &["X"], &[])];
        match build(&decls).unwrap_err() {
            PipelineError::MultipleSinks { stages } => assert_eq!(stages, vec!["S1", "S2"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_pipe_lifetimes_follow_execution_order() {
        let decls = [decl("Sink", &["P2"], &[]), decl("S1", &[], &["P1", "Debug"]), decl("S2", &["P1"], &["P2"])];
        let graph = build(&decls).unwrap();
        let lifetimes = graph.pipe_lifetimes();

        let find = |name: &str| lifetimes.iter().find(|lifetime| lifetime.pipe == name).unwrap();
        assert_eq!((find("P1").created_at, find("P1").last_used_at), (0, 1));
        // Read by the sink: kept alive past the end of the frame
        assert_eq!((find("P2").created_at, find("P2").last_used_at), (1, 3));
        assert_eq!((find("Debug").created_at, find("Debug").last_used_at), (0, 0));
    }

    #[test]
    fn test_long_chains_do_not_exhaust_the_stack() {
        let count = 20_000;
        let names: Vec<String> = (0..count).map(|index| format!("P{index}")).collect();
        let mut decls: Vec<Decl> = (0..count)
            .map(|index| {
                let inputs: Vec<&str> = if index == 0 { Vec::new() } else { vec![names[index - 1].as_str()] };
                decl(&format!("S{index}"), &inputs, &[names[index].as_str()])
            })
            .collect();
        decls.push(decl("Sink", &[names[count - 1].as_str()], &[]));
        // Close the chain so the search has to walk every stage before finding the cycle
        decls[0].inputs.push(names[count - 2].clone());

        match build(&decls).unwrap_err() {
            PipelineError::CyclicDependency { path } => {
                assert_eq!(path.len(), count);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        decls[0].inputs.clear();
        let graph = build(&decls).unwrap();
        assert_eq!(graph.order().len(), count + 1);
        assert_eq!(graph.order().last(), Some(&graph.sink()));
    }
}
