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

//! The inference session: the active model, in-flight loads and the hot-swap
//! protocol.

use super::loader::{self, LoadOutcome, ModelLoader};
use pastiche_core::gpu::{CommandEncoder, FenceStatus, FenceValue, GraphicsDevice, TensorView};
use pastiche_core::inference::{DeviceCapabilities, ModelDescriptor, ModelId, ModelInstance, RuntimeRegistry};
use pastiche_core::tensor::{TensorShape, TensorSpec};
use pastiche_core::{InferenceError, LoadError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A loaded network together with the tensor contract it was validated
/// against.
pub struct StyleModel {
    id: ModelId,
    runtime: String,
    input: TensorSpec,
    output: TensorSpec,
    // File the model was read from, watched for hot reload.
    source: Option<PathBuf>,
    instance: Box<dyn ModelInstance>,
}

impl StyleModel {
    pub(crate) fn new(
        id: ModelId,
        runtime: String,
        input: TensorSpec,
        output: TensorSpec,
        source: Option<PathBuf>,
        instance: Box<dyn ModelInstance>,
    ) -> Self {
        Self {
            id,
            runtime,
            input,
            output,
            source,
            instance,
        }
    }

    /// The model's id.
    pub fn id(&self) -> &ModelId {
        &self.id
    }

    /// Name of the runtime that built the model.
    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Contract of the input tensor.
    pub fn input(&self) -> &TensorSpec {
        &self.input
    }

    /// Contract of the output tensor.
    pub fn output(&self) -> &TensorSpec {
        &self.output
    }

    /// The file the model was read from, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl fmt::Debug for StyleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleModel")
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .field("input", &self.input.shape)
            .field("output", &self.output.shape)
            .finish_non_exhaustive()
    }
}

/// A shared reference to a loaded model, handed to the stylization pass.
///
/// The tensor contracts are copied out so they can be read without locking.
#[derive(Clone)]
pub struct ModelHandle {
    id: ModelId,
    input: TensorSpec,
    output: TensorSpec,
    model: Arc<Mutex<StyleModel>>,
}

impl ModelHandle {
    fn new(model: StyleModel) -> Self {
        Self {
            id: model.id.clone(),
            input: model.input,
            output: model.output,
            model: Arc::new(Mutex::new(model)),
        }
    }

    /// The model's id.
    pub fn id(&self) -> &ModelId {
        &self.id
    }

    /// Contract of the input tensor.
    pub fn input(&self) -> &TensorSpec {
        &self.input
    }

    /// Contract of the output tensor.
    pub fn output(&self) -> &TensorSpec {
        &self.output
    }

    /// Records the model's forward pass from `input` to `output`.
    ///
    /// Nothing waits here: the work completes when the submission carrying
    /// `encoder` signals its fence.
    pub fn run(
        &self,
        encoder: &mut dyn CommandEncoder,
        input: &TensorView,
        output: &TensorView,
    ) -> Result<(), InferenceError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| InferenceError::Dispatch("model lock poisoned".to_string()))?;
        model.instance.enqueue(encoder, input, output)
    }

    fn source_path(&self) -> Option<PathBuf> {
        self.model
            .lock()
            .ok()
            .and_then(|model| model.source.clone())
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("input", &self.input.shape)
            .field("output", &self.output.shape)
            .finish()
    }
}

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No model.
    #[default]
    Unloaded,
    /// A first model is being loaded.
    Loading,
    /// A model is active and idle.
    Ready,
    /// A dispatch of the active model has not completed yet.
    Running,
}

/// What changed at a frame boundary.
#[derive(Debug)]
pub enum SessionEvent {
    /// A model became active.
    Activated {
        /// The model's id.
        id: ModelId,
        /// Resolved input shape.
        input: TensorShape,
        /// Resolved output shape.
        output: TensorShape,
        /// Time spent loading.
        elapsed: Duration,
    },
    /// The latest load failed and the session is now unloaded.
    LoadFailed {
        /// The requested model.
        id: ModelId,
        /// Why.
        error: LoadError,
    },
}

struct Retired {
    model: ModelHandle,
    fence: Option<FenceValue>,
}

/// Owns the active model and swaps it only at frame boundaries.
///
/// Loads run on a [`ModelLoader`] thread. A finished load is held in the
/// loader's result channel until [`InferenceSession::poll`] runs at the
/// beginning of a frame, so a frame never sees two models. A superseded model
/// stays alive until the fence of the last frame that used it has signaled.
pub struct InferenceSession {
    registry: RuntimeRegistry,
    capabilities: DeviceCapabilities,
    loader: ModelLoader,

    active: Option<ModelHandle>,
    // Fence of the latest submission that dispatched the active model.
    last_dispatch: Option<FenceValue>,
    // Set while that dispatch has not completed.
    in_flight: bool,
    retired: Vec<Retired>,

    generation: u64,
    pending: Option<(u64, ModelId)>,
}

impl InferenceSession {
    /// Creates an unloaded session and starts its loader thread.
    pub fn new(registry: RuntimeRegistry, capabilities: DeviceCapabilities) -> std::io::Result<Self> {
        let loader = ModelLoader::spawn(registry.clone(), capabilities.clone())?;
        Ok(Self {
            registry,
            capabilities,
            loader,
            active: None,
            last_dispatch: None,
            in_flight: false,
            retired: Vec::new(),
            generation: 0,
            pending: None,
        })
    }

    /// The capabilities models are validated against.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Loads and validates a model on the calling thread.
    ///
    /// The returned model is not activated; pass it to
    /// [`InferenceSession::activate`] between frames.
    pub fn load_model(&self, descriptor: &ModelDescriptor) -> Result<StyleModel, LoadError> {
        loader::load_model(&self.registry, &self.capabilities, descriptor)
    }

    /// Starts loading `descriptor` in the background and returns the request's
    /// generation. Any earlier pending request is superseded.
    pub fn request_load(&mut self, descriptor: ModelDescriptor) -> Result<u64, LoadError> {
        self.generation += 1;
        let id = descriptor.id.clone();
        log::info!(
            "InferenceSession: requesting '{}' (generation {})",
            id,
            self.generation
        );
        self.loader.request(self.generation, descriptor)?;
        self.pending = Some((self.generation, id));
        Ok(self.generation)
    }

    /// Makes `model` the active model, superseding any pending load.
    pub fn activate(&mut self, model: StyleModel) -> SessionEvent {
        self.generation += 1;
        self.pending = None;
        self.install(model, Duration::ZERO)
    }

    /// Drops the active model and abandons any pending load.
    pub fn unload(&mut self) {
        self.generation += 1;
        self.pending = None;
        if let Some(model) = self.active.take() {
            log::info!("InferenceSession: unloading '{}'", model.id());
            self.retire(model);
        }
    }

    /// The frame-boundary safe point.
    ///
    /// Releases superseded models whose last frame has completed, notices a
    /// finished dispatch and applies the outcome of the latest load.
    pub fn poll(&mut self, device: &dyn GraphicsDevice) -> Vec<SessionEvent> {
        let signaled = |fence: Option<FenceValue>| {
            fence.map_or(true, |f| device.fence_status(f) == FenceStatus::Signaled)
        };

        self.retired.retain(|retired| {
            let done = signaled(retired.fence);
            if done {
                log::debug!("InferenceSession: released '{}'", retired.model.id());
            }
            !done
        });
        if self.in_flight && signaled(self.last_dispatch) {
            self.in_flight = false;
        }

        let mut events = Vec::new();
        for outcome in self.loader.try_results() {
            if let Some(event) = self.apply(outcome) {
                events.push(event);
            }
        }
        events
    }

    /// Blocks until the pending load, if any, has finished or `timeout`
    /// elapses, and applies its outcome.
    ///
    /// Only call this between frames: it is a swap point like
    /// [`InferenceSession::poll`].
    pub fn wait_for_load(&mut self, timeout: Duration) -> Result<Vec<SessionEvent>, LoadError> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while self.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.loader.wait(remaining)? {
                Some(outcome) => events.extend(self.apply(outcome)),
                None => break,
            }
        }
        Ok(events)
    }

    fn apply(&mut self, outcome: LoadOutcome) -> Option<SessionEvent> {
        match &self.pending {
            Some((generation, _)) if *generation == outcome.generation => {}
            _ => {
                log::debug!(
                    "InferenceSession: discarding stale load of '{}' (generation {})",
                    outcome.id,
                    outcome.generation
                );
                return None;
            }
        }
        self.pending = None;
        match outcome.result {
            Ok(model) => Some(self.install(model, outcome.elapsed)),
            Err(error) => {
                log::error!("InferenceSession: failed to load '{}': {}", outcome.id, error);
                if let Some(model) = self.active.take() {
                    self.retire(model);
                }
                Some(SessionEvent::LoadFailed {
                    id: outcome.id,
                    error,
                })
            }
        }
    }

    fn install(&mut self, model: StyleModel, elapsed: Duration) -> SessionEvent {
        let handle = ModelHandle::new(model);
        log::info!(
            "InferenceSession: '{}' active ({} -> {}, loaded in {:?})",
            handle.id(),
            handle.input().shape,
            handle.output().shape,
            elapsed
        );
        let event = SessionEvent::Activated {
            id: handle.id().clone(),
            input: handle.input().shape,
            output: handle.output().shape,
            elapsed,
        };
        if let Some(previous) = self.active.replace(handle) {
            self.retire(previous);
        }
        event
    }

    fn retire(&mut self, model: ModelHandle) {
        let fence = if self.in_flight {
            self.last_dispatch
        } else {
            None
        };
        self.in_flight = false;
        self.last_dispatch = None;
        if fence.is_some() {
            self.retired.push(Retired { model, fence });
        }
    }

    /// Records the forward pass of the active model.
    ///
    /// ## Errors
    /// * [`InferenceError::NotReady`] when no model is active.
    pub fn run_inference(
        &self,
        encoder: &mut dyn CommandEncoder,
        input: &TensorView,
        output: &TensorView,
    ) -> Result<(), InferenceError> {
        self.active
            .as_ref()
            .ok_or(InferenceError::NotReady)?
            .run(encoder, input, output)
    }

    /// Notes that the active model was dispatched in the submission signaling
    /// `fence`.
    pub fn note_dispatch(&mut self, fence: FenceValue) {
        if self.active.is_some() {
            self.last_dispatch = Some(fence);
            self.in_flight = true;
        }
    }

    /// The session's lifecycle state.
    pub fn state(&self) -> SessionState {
        match (&self.active, &self.pending) {
            (Some(_), _) if self.in_flight => SessionState::Running,
            (Some(_), _) => SessionState::Ready,
            (None, Some(_)) => SessionState::Loading,
            (None, None) => SessionState::Unloaded,
        }
    }

    /// The active model.
    pub fn active(&self) -> Option<&ModelHandle> {
        self.active.as_ref()
    }

    /// Id of the model being loaded, if any.
    pub fn pending(&self) -> Option<&ModelId> {
        self.pending.as_ref().map(|(_, id)| id)
    }

    /// File of the active model, if it was read from one.
    pub fn active_source(&self) -> Option<PathBuf> {
        self.active.as_ref().and_then(ModelHandle::source_path)
    }

    /// Number of superseded models still waiting for their last frame.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceSession")
            .field("state", &self.state())
            .field("active", &self.active)
            .field("pending", &self.pending)
            .field("retired", &self.retired.len())
            .finish()
    }
}
