// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A per-frame render graph with explicit resource dependencies.
//!
//! Passes declare the resources they read and write. Registration order is
//! the host's intended order; from it the graph derives producer/consumer
//! edges for every shared resource:
//!
//! - read after write: a reader runs after the last writer before it,
//! - write after read: a writer runs after every reader since the last write,
//! - write after write: writers of the same resource keep their order.
//!
//! Explicit dependencies can be added on top. The combined graph is sorted
//! with Kahn's algorithm when the frame is compiled, and a cycle is reported
//! as [`GraphError::Cycle`] instead of being silently reordered.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use super::topological_sort::topological_sort;
use crate::gpu::{BufferId, CommandEncoder, FenceValue, GraphicsDevice, ResourceError, TextureId};

/// A resource a pass can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphResource {
    /// A color or intermediate texture.
    Texture(TextureId),
    /// A storage buffer, such as a tensor.
    Buffer(BufferId),
}

impl From<TextureId> for GraphResource {
    fn from(id: TextureId) -> Self {
        GraphResource::Texture(id)
    }
}

impl From<BufferId> for GraphResource {
    fn from(id: BufferId) -> Self {
        GraphResource::Buffer(id)
    }
}

/// Identifies a pass within one [`RenderGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub usize);

/// What a pass body gets to record its work.
pub struct PassContext<'a> {
    /// The device owning every resource in the graph.
    pub device: &'a dyn GraphicsDevice,
    /// The frame's command encoder. Passes record in execution order.
    pub encoder: &'a mut dyn CommandEncoder,
    /// Index of the frame being built.
    pub frame_index: u64,
}

/// The body of a render graph pass.
pub trait RenderGraphPass: Send {
    /// Records the pass's GPU work.
    fn execute(&mut self, ctx: &mut PassContext<'_>) -> Result<(), PassError>;
}

impl<F> RenderGraphPass for F
where
    F: FnMut(&mut PassContext<'_>) -> Result<(), PassError> + Send,
{
    fn execute(&mut self, ctx: &mut PassContext<'_>) -> Result<(), PassError> {
        self(ctx)
    }
}

/// A pass failed to record its work. The rest of the frame still executes.
#[derive(Debug)]
pub enum PassError {
    /// A device-level recording error.
    Resource(ResourceError),
    /// A domain-specific error raised by the pass.
    Failed(Box<dyn Error + Send + Sync>),
}

impl PassError {
    /// Wraps a domain error.
    pub fn failed(error: impl Error + Send + Sync + 'static) -> Self {
        PassError::Failed(Box::new(error))
    }

    /// Returns the domain error if it has type `E`.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            PassError::Failed(inner) => inner.downcast_ref::<E>(),
            PassError::Resource(_) => None,
        }
    }
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassError::Resource(e) => write!(f, "Pass resource error: {e}"),
            PassError::Failed(e) => write!(f, "Pass failed: {e}"),
        }
    }
}

impl Error for PassError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PassError::Resource(e) => Some(e),
            PassError::Failed(e) => Some(e.as_ref()),
        }
    }
}

impl From<ResourceError> for PassError {
    fn from(value: ResourceError) -> Self {
        PassError::Resource(value)
    }
}

/// An error that prevents the frame graph from being built or submitted.
#[derive(Debug)]
pub enum GraphError {
    /// The dependencies form a cycle through the named passes.
    Cycle {
        /// Names of the passes that could not be ordered.
        passes: Vec<String>,
    },
    /// A dependency references a pass that does not exist.
    UnknownPass(PassId),
    /// A pass was made to depend on itself.
    SelfDependency(PassId),
    /// The device refused the frame's command buffer.
    Submit(ResourceError),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Cycle { passes } => {
                write!(f, "Render graph has a cycle through: {}", passes.join(", "))
            }
            GraphError::UnknownPass(id) => write!(f, "Unknown render graph pass {id:?}"),
            GraphError::SelfDependency(id) => write!(f, "Pass {id:?} cannot depend on itself"),
            GraphError::Submit(e) => write!(f, "Failed to submit frame: {e}"),
        }
    }
}

impl Error for GraphError {}

struct PassNode {
    name: String,
    reads: Vec<GraphResource>,
    writes: Vec<GraphResource>,
    body: Box<dyn RenderGraphPass>,
}

/// The outcome of executing a frame graph.
#[derive(Debug)]
pub struct FrameSubmission {
    /// Index of the submitted frame.
    pub frame_index: u64,
    /// Fence signaled when the frame's GPU work completes.
    pub fence: FenceValue,
    /// Order the passes were recorded in.
    pub order: Vec<PassId>,
    /// Passes whose body returned an error.
    pub failures: Vec<(PassId, PassError)>,
}

impl FrameSubmission {
    /// The error raised by `pass`, if it failed.
    pub fn failure(&self, pass: PassId) -> Option<&PassError> {
        self.failures
            .iter()
            .find_map(|(id, error)| (*id == pass).then_some(error))
    }

    /// Position of `pass` in the recorded order.
    pub fn position(&self, pass: PassId) -> Option<usize> {
        self.order.iter().position(|id| *id == pass)
    }
}

/// The directed acyclic graph of GPU passes for one frame.
pub struct RenderGraph {
    frame_index: u64,
    passes: Vec<PassNode>,
    explicit: Vec<(PassId, PassId)>,
}

impl RenderGraph {
    /// Starts an empty graph for `frame_index`.
    pub fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            passes: Vec::new(),
            explicit: Vec::new(),
        }
    }

    /// Index of the frame this graph builds.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Registers a pass with its read-set and write-set.
    pub fn add_pass(
        &mut self,
        name: impl Into<String>,
        reads: &[GraphResource],
        writes: &[GraphResource],
        body: impl RenderGraphPass + 'static,
    ) -> PassId {
        let id = PassId(self.passes.len());
        let name = name.into();
        log::trace!(
            "Frame {}: registered pass '{name}' ({} reads, {} writes)",
            self.frame_index,
            reads.len(),
            writes.len()
        );
        self.passes.push(PassNode {
            name,
            reads: reads.to_vec(),
            writes: writes.to_vec(),
            body: Box::new(body),
        });
        id
    }

    /// Forces `after` to run after `before`, on top of the derived edges.
    pub fn add_dependency(&mut self, before: PassId, after: PassId) -> Result<(), GraphError> {
        for id in [before, after] {
            if id.0 >= self.passes.len() {
                return Err(GraphError::UnknownPass(id));
            }
        }
        if before == after {
            return Err(GraphError::SelfDependency(before));
        }
        self.explicit.push((before, after));
        Ok(())
    }

    /// Number of registered passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Name of a pass.
    pub fn pass_name(&self, id: PassId) -> Option<&str> {
        self.passes.get(id.0).map(|pass| pass.name.as_str())
    }

    /// Finds the first pass registered under `name`.
    pub fn find_pass(&self, name: &str) -> Option<PassId> {
        self.passes
            .iter()
            .position(|pass| pass.name == name)
            .map(PassId)
    }

    /// Resources read by a pass.
    pub fn reads(&self, id: PassId) -> &[GraphResource] {
        self.passes.get(id.0).map_or(&[], |pass| &pass.reads)
    }

    /// Resources written by a pass.
    pub fn writes(&self, id: PassId) -> &[GraphResource] {
        self.passes.get(id.0).map_or(&[], |pass| &pass.writes)
    }

    /// All `(before, after)` edges: derived hazards plus explicit dependencies.
    pub fn dependencies(&self) -> Vec<(PassId, PassId)> {
        let mut last_writer: HashMap<GraphResource, PassId> = HashMap::new();
        let mut readers: HashMap<GraphResource, Vec<PassId>> = HashMap::new();
        let mut edges = Vec::new();

        for (index, pass) in self.passes.iter().enumerate() {
            let id = PassId(index);
            for resource in &pass.reads {
                if let Some(&writer) = last_writer.get(resource) {
                    if writer != id {
                        edges.push((writer, id));
                    }
                }
                readers.entry(*resource).or_default().push(id);
            }
            for resource in &pass.writes {
                if let Some(&writer) = last_writer.get(resource) {
                    if writer != id {
                        edges.push((writer, id));
                    }
                }
                if let Some(previous_readers) = readers.remove(resource) {
                    edges.extend(
                        previous_readers
                            .into_iter()
                            .filter(|reader| *reader != id)
                            .map(|reader| (reader, id)),
                    );
                }
                last_writer.insert(*resource, id);
            }
        }

        edges.extend(self.explicit.iter().copied());
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Orders the passes, verifying the graph is acyclic.
    pub fn compile(&self) -> Result<Vec<PassId>, GraphError> {
        let nodes = (0..self.passes.len()).map(PassId);
        topological_sort(nodes, self.dependencies()).map_err(|cycle| GraphError::Cycle {
            passes: cycle
                .unresolved
                .into_iter()
                .filter_map(|id| self.pass_name(id).map(str::to_owned))
                .collect(),
        })
    }

    /// Records every pass in dependency order into one command buffer and submits it.
    ///
    /// A failing pass is logged and reported in [`FrameSubmission::failures`];
    /// the remaining passes still record.
    pub fn execute(mut self, device: &dyn GraphicsDevice) -> Result<FrameSubmission, GraphError> {
        let order = self.compile()?;
        let frame_index = self.frame_index;
        let mut encoder = device.create_command_encoder(Some("Frame Graph"));
        let mut failures = Vec::new();

        for id in &order {
            let pass = &mut self.passes[id.0];
            let mut ctx = PassContext {
                device,
                encoder: encoder.as_mut(),
                frame_index,
            };
            if let Err(error) = pass.body.execute(&mut ctx) {
                log::warn!("Frame {frame_index}: pass '{}' failed: {error}", pass.name);
                failures.push((*id, error));
            }
        }

        let command_buffer = encoder.finish();
        let fence = device
            .submit_command_buffer(command_buffer)
            .map_err(GraphError::Submit)?;
        log::trace!(
            "Frame {frame_index}: submitted {} passes, {fence}",
            order.len()
        );

        Ok(FrameSubmission {
            frame_index,
            fence,
            order,
            failures,
        })
    }
}

impl fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderGraph")
            .field("frame_index", &self.frame_index)
            .field(
                "passes",
                &self.passes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut PassContext<'_>) -> Result<(), PassError> {
        Ok(())
    }

    const COLOR: GraphResource = GraphResource::Texture(TextureId(1));
    const DEPTH: GraphResource = GraphResource::Texture(TextureId(2));
    const TENSOR: GraphResource = GraphResource::Buffer(BufferId(3));

    #[test]
    fn test_read_after_write_edges() {
        let mut graph = RenderGraph::new(0);
        let scene = graph.add_pass("scene", &[], &[COLOR, DEPTH], noop);
        let stylize = graph.add_pass("stylize", &[COLOR], &[COLOR, TENSOR], noop);
        let ui = graph.add_pass("ui", &[COLOR], &[], noop);

        let edges = graph.dependencies();
        assert!(edges.contains(&(scene, stylize)));
        assert!(edges.contains(&(stylize, ui)));
        assert!(!edges.contains(&(scene, ui)));
        assert_eq!(graph.compile().unwrap(), vec![scene, stylize, ui]);
    }

    #[test]
    fn test_write_after_read_keeps_readers_first() {
        let mut graph = RenderGraph::new(0);
        let producer = graph.add_pass("producer", &[], &[COLOR], noop);
        let reader_a = graph.add_pass("reader_a", &[COLOR], &[], noop);
        let reader_b = graph.add_pass("reader_b", &[COLOR], &[], noop);
        let overwrite = graph.add_pass("overwrite", &[], &[COLOR], noop);

        let edges = graph.dependencies();
        assert!(edges.contains(&(reader_a, overwrite)));
        assert!(edges.contains(&(reader_b, overwrite)));
        assert!(edges.contains(&(producer, overwrite)));
        let order = graph.compile().unwrap();
        assert_eq!(order.last(), Some(&overwrite));
    }

    #[test]
    fn test_independent_passes_keep_registration_order() {
        let mut graph = RenderGraph::new(0);
        let a = graph.add_pass("a", &[], &[COLOR], noop);
        let b = graph.add_pass("b", &[], &[DEPTH], noop);
        assert!(graph.dependencies().is_empty());
        assert_eq!(graph.compile().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_explicit_dependency_cycle_is_rejected() {
        let mut graph = RenderGraph::new(0);
        let scene = graph.add_pass("scene", &[], &[COLOR], noop);
        let post = graph.add_pass("post", &[COLOR], &[], noop);
        graph.add_dependency(post, scene).unwrap();

        match graph.compile() {
            Err(GraphError::Cycle { passes }) => {
                assert_eq!(passes, vec!["scene".to_owned(), "post".to_owned()])
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_dependencies() {
        let mut graph = RenderGraph::new(0);
        let scene = graph.add_pass("scene", &[], &[COLOR], noop);
        assert!(matches!(
            graph.add_dependency(scene, PassId(5)),
            Err(GraphError::UnknownPass(PassId(5)))
        ));
        assert!(matches!(
            graph.add_dependency(scene, scene),
            Err(GraphError::SelfDependency(_))
        ));
        assert_eq!(graph.find_pass("scene"), Some(scene));
    }

    #[test]
    fn test_pass_error_downcast() {
        #[derive(Debug)]
        struct Marker;
        impl fmt::Display for Marker {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("marker")
            }
        }
        impl Error for Marker {}

        let error = PassError::failed(Marker);
        assert!(error.downcast_ref::<Marker>().is_some());
        assert_eq!(error.to_string(), "Pass failed: marker");
        assert!(PassError::from(ResourceError::NotFound)
            .downcast_ref::<Marker>()
            .is_none());
    }
}
