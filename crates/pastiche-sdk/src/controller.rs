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

//! The host-facing pipeline controller.

use anyhow::{Context, Result};
use pastiche_agents::{
    FrameOutcome, FrameScheduler, FrameStats, FrameTargets, InferenceSession, PoolStats,
    SessionEvent, SessionState,
};
use pastiche_core::event::EventBus;
use pastiche_core::gpu::{GraphicsBackendType, GraphicsDevice};
use pastiche_core::graph::{FrameSubmission, GraphError, PassId, RenderGraph};
use pastiche_core::inference::{
    DeviceCapabilities, ModelDescriptor, ModelId, ModelProvider, RuntimeRegistry,
};
use pastiche_core::{
    ErrorSeverity, LoadError, PipelineConfig, PipelineEvent, PipelineState, ResizePolicy,
    StylizeError,
};
use pastiche_infra::ModelWatcher;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Undelivered events kept when no status callback drains them. Older
/// events are dropped first.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Receives every [`PipelineEvent`], on the render thread.
pub type StatusCallback = Box<dyn FnMut(&PipelineEvent) + Send>;

/// Counters of a running pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    /// Current state.
    pub state: PipelineState,
    /// The active model.
    pub active_model: Option<ModelId>,
    /// Per-frame counters.
    pub frames: FrameStats,
    /// Tensor pool counters.
    pub pool: PoolStats,
    /// Models that became active.
    pub models_activated: u64,
    /// Loads that failed.
    pub load_failures: u64,
    /// Times the pipeline faulted.
    pub faults: u64,
    /// Events discarded because nobody polled them.
    pub dropped_events: u64,
}

/// Runtimes available without extra setup: the pointwise runtime, plus the
/// ONNX runtime when built with the `onnx` feature.
pub fn default_registry() -> RuntimeRegistry {
    let mut registry = RuntimeRegistry::new();
    registry.register(Arc::new(pastiche_infra::PointwiseRuntime::new()));
    #[cfg(feature = "onnx")]
    registry.register(Arc::new(pastiche_infra::OnnxRuntime::new()));
    registry
}

/// Enables, disables and feeds models to the stylization pipeline.
///
/// The host drives it from its render thread, once per frame:
///
/// 1. [`PipelineController::begin_frame`] applies finished loads and returns
///    the index of the frame to build.
/// 2. [`PipelineController::register_passes`] adds the stylization pass to the
///    frame's [`RenderGraph`] when the state allows it.
/// 3. After the graph was executed, [`PipelineController::end_frame`] reads
///    back what the pass did.
///
/// Model loads run in the background. Errors never stop frame production: a
/// per-frame error passes that frame through unstylized, a session error
/// moves the pipeline to [`PipelineState::Faulted`] until the host calls
/// [`PipelineController::set_model`] or [`PipelineController::enable`].
pub struct PipelineController {
    config: PipelineConfig,
    provider: Arc<dyn ModelProvider>,
    backend: GraphicsBackendType,
    session: InferenceSession,
    scheduler: FrameScheduler,

    // Event plumbing
    events: EventBus<PipelineEvent>,
    callback: Option<StatusCallback>,
    published: PipelineState,

    // Hot reload
    watcher: Option<ModelWatcher>,
    watched: Option<PathBuf>,

    enabled: bool,
    fault: Option<StylizeError>,
    requested: Option<ModelDescriptor>,
    // A host-requested load has not finished yet.
    awaiting_model: bool,
    frame_index: u64,
    frame_open: bool,

    models_activated: u64,
    load_failures: u64,
    faults: u64,
}

impl PipelineController {
    /// Creates a disabled pipeline for `device`.
    ///
    /// Models requested by id are resolved through `provider`.
    pub fn new(
        device: &dyn GraphicsDevice,
        mut registry: RuntimeRegistry,
        provider: Arc<dyn ModelProvider>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if let Some(name) = &config.default_runtime {
            if registry.get(name).is_some() {
                registry.set_default(name.clone());
            } else {
                log::warn!(
                    "PipelineController: default runtime '{}' is not registered (available: {:?})",
                    name,
                    registry.names()
                );
            }
        }

        let capabilities = DeviceCapabilities::of(device);
        let backend = capabilities.backend();
        log::info!(
            "PipelineController: device '{}' ({:?}), runtimes {:?}",
            capabilities.adapter.name,
            backend,
            registry.names()
        );
        let session = InferenceSession::new(registry, capabilities)
            .context("failed to start the model loader thread")?;
        let scheduler =
            FrameScheduler::new(config.effective_frames_in_flight(), config.resize_policy);

        let watcher = if config.hot_reload {
            match ModelWatcher::new() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("PipelineController: hot reload unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            provider,
            backend,
            session,
            scheduler,
            events: EventBus::bounded(EVENT_QUEUE_CAPACITY),
            callback: None,
            published: PipelineState::Disabled,
            watcher,
            watched: None,
            enabled: false,
            fault: None,
            requested: None,
            awaiting_model: false,
            frame_index: 0,
            frame_open: false,
            models_activated: 0,
            load_failures: 0,
            faults: 0,
        })
    }

    /// The configuration the pipeline was created with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Installs the status callback. Events already queued are delivered to
    /// it at the next operation.
    pub fn set_status_callback(&mut self, callback: impl FnMut(&PipelineEvent) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Takes the queued events when no status callback is installed. At most
    /// [`EVENT_QUEUE_CAPACITY`] of the newest are kept between calls.
    pub fn poll_events(&mut self) -> Vec<PipelineEvent> {
        self.events.drain()
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        if self.fault.is_some() {
            return PipelineState::Faulted;
        }
        if !self.enabled {
            return PipelineState::Disabled;
        }
        if self.awaiting_model && self.session.pending().is_some() {
            return PipelineState::Loading;
        }
        match self.session.state() {
            SessionState::Loading => PipelineState::Loading,
            SessionState::Ready => PipelineState::Ready,
            SessionState::Running => PipelineState::Running,
            SessionState::Unloaded => PipelineState::Disabled,
        }
    }

    /// The error that faulted the pipeline.
    pub fn last_error(&self) -> Option<&StylizeError> {
        self.fault.as_ref()
    }

    /// The model in use.
    pub fn active_model(&self) -> Option<&ModelId> {
        self.session.active().map(|model| model.id())
    }

    /// Counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state(),
            active_model: self.active_model().cloned(),
            frames: self.scheduler.stats(),
            pool: self.scheduler.pool_stats(),
            models_activated: self.models_activated,
            load_failures: self.load_failures,
            faults: self.faults,
            dropped_events: self.events.dropped_events(),
        }
    }

    /// Switches the resize policy; buffers follow at the next frame.
    pub fn set_resize_policy(&mut self, policy: ResizePolicy) {
        self.config.resize_policy = policy;
        self.scheduler.set_resize_policy(policy);
    }

    fn backend_allowed(&self) -> bool {
        !self.config.disabled_backends.contains(&self.backend)
    }

    fn refuse_backend(&mut self) -> StylizeError {
        let message = format!("stylization is disabled on {:?}", self.backend);
        log::warn!("PipelineController: {message}");
        self.events.publish(PipelineEvent::Notice(message));
        self.dispatch();
        LoadError::BackendUnavailable {
            runtime: "pipeline".to_string(),
            backend: self.backend,
        }
        .into()
    }

    /// Inserts the stylization pass into future frames.
    ///
    /// From [`PipelineState::Faulted`] this retries the last requested model.
    /// Without any model the pipeline stays disabled.
    pub fn enable(&mut self) {
        if !self.backend_allowed() {
            self.refuse_backend();
            return;
        }
        if self.fault.is_some() {
            match self.requested.clone() {
                Some(descriptor) => {
                    log::info!("PipelineController: retrying '{}'", descriptor.id);
                    self.start_load(descriptor);
                }
                None => {
                    self.fault = None;
                    self.notice("cannot enable: no model has been set");
                }
            }
        } else if self.session.active().is_some() || self.session.pending().is_some() {
            self.enabled = true;
        } else {
            self.notice("cannot enable: no model has been set");
        }
        self.refresh_state();
    }

    /// Stops inserting the stylization pass. The loaded model and its buffers
    /// are kept, and work already submitted completes normally.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.refresh_state();
    }

    /// Loads the model `id` resolves to and enables the pipeline.
    ///
    /// The load runs in the background; the pipeline is
    /// [`PipelineState::Loading`], and frames carry no stylization pass, until
    /// it finishes. A model being replaced is released at the swap.
    ///
    /// ## Errors
    /// Fails right away, faulting the pipeline, when `id` is unknown or the
    /// loader thread is gone. Refuses on disabled backends without faulting.
    pub fn set_model(&mut self, id: impl Into<ModelId>) -> Result<(), StylizeError> {
        let id = id.into();
        match self.provider.resolve(&id) {
            Some(descriptor) => self.set_model_descriptor(descriptor),
            None => {
                let error = StylizeError::from(LoadError::UnknownModel(id));
                self.enter_fault(error.clone());
                self.load_failures += 1;
                self.refresh_state();
                Err(error)
            }
        }
    }

    /// Like [`PipelineController::set_model`], with an explicit descriptor.
    pub fn set_model_descriptor(&mut self, descriptor: ModelDescriptor) -> Result<(), StylizeError> {
        if !self.backend_allowed() {
            return Err(self.refuse_backend());
        }
        self.start_load(descriptor);
        self.refresh_state();
        match &self.fault {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Releases the model and disables the pipeline.
    pub fn clear_model(&mut self) {
        self.session.unload();
        self.requested = None;
        self.fault = None;
        self.enabled = false;
        self.awaiting_model = false;
        self.unwatch();
        self.refresh_state();
    }

    fn start_load(&mut self, descriptor: ModelDescriptor) {
        self.fault = None;
        self.enabled = true;
        self.requested = Some(descriptor.clone());
        self.awaiting_model = true;
        self.watch(descriptor.file_path().cloned());
        if let Err(error) = self.session.request_load(descriptor) {
            self.load_failures += 1;
            self.enter_fault(error.into());
        }
    }

    fn watch(&mut self, path: Option<PathBuf>) {
        if self.watched == path {
            return;
        }
        self.unwatch();
        let (Some(watcher), Some(path)) = (self.watcher.as_mut(), path) else {
            return;
        };
        match watcher.watch(&path) {
            Ok(()) => {
                log::debug!("PipelineController: watching '{}'", path.display());
                self.watched = Some(path);
            }
            Err(e) => log::warn!(
                "PipelineController: cannot watch '{}': {e:#}",
                path.display()
            ),
        }
    }

    fn unwatch(&mut self) {
        if let (Some(watcher), Some(path)) = (self.watcher.as_mut(), self.watched.take()) {
            watcher.unwatch(&path);
        }
    }

    fn reload_changed_models(&mut self) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        if watcher.poll_changes().is_empty() || self.fault.is_some() {
            return;
        }
        let Some(descriptor) = self.requested.clone() else {
            return;
        };
        log::info!("PipelineController: '{}' changed on disk, reloading", descriptor.id);
        self.notice(format!("reloading '{}'", descriptor.id));
        if let Err(error) = self.session.request_load(descriptor) {
            self.load_failures += 1;
            self.enter_fault(error.into());
        }
    }

    /// Starts a frame: applies finished loads and file changes. Returns the
    /// index of the frame to build the graph for.
    pub fn begin_frame(&mut self, device: &dyn GraphicsDevice) -> u64 {
        if self.frame_open {
            log::warn!(
                "PipelineController: frame {} was not ended",
                self.frame_index
            );
            self.scheduler.abandon_frame();
            self.frame_index += 1;
        }
        self.frame_open = true;
        self.reload_changed_models();
        let events = self.scheduler.begin_frame(device, &mut self.session);
        self.handle_session_events(events);
        self.refresh_state();
        self.frame_index
    }

    /// Adds the stylization pass to `graph` if the pipeline is
    /// [`PipelineState::Ready`] or [`PipelineState::Running`].
    ///
    /// In any other state the graph is left untouched: no pass, no commands
    /// and no fence waits.
    pub fn register_passes(
        &mut self,
        graph: &mut RenderGraph,
        device: &dyn GraphicsDevice,
        targets: FrameTargets,
    ) -> Option<PassId> {
        if !self.state().schedules_pass() {
            return None;
        }
        match self.scheduler.schedule(graph, device, &self.session, targets) {
            Ok(pass) => pass,
            Err(error) => {
                self.report_frame_error(graph.frame_index(), error);
                self.refresh_state();
                None
            }
        }
    }

    /// Ends a frame once its graph was submitted.
    pub fn end_frame(&mut self, submission: &FrameSubmission) -> FrameOutcome {
        let outcome = self.scheduler.end_frame(submission, &mut self.session);
        if let FrameOutcome::PassedThrough { error, .. } = &outcome {
            self.report_frame_error(submission.frame_index, error.clone());
        }
        self.frame_open = false;
        self.frame_index += 1;
        self.refresh_state();
        outcome
    }

    /// Ends a frame whose graph could not be submitted.
    pub fn abandon_frame(&mut self) {
        self.scheduler.abandon_frame();
        self.frame_open = false;
        self.frame_index += 1;
        self.refresh_state();
    }

    /// Runs a whole frame containing only the stylization pass.
    pub fn stylize_frame(
        &mut self,
        device: &dyn GraphicsDevice,
        targets: FrameTargets,
    ) -> Result<FrameOutcome, GraphError> {
        let frame_index = self.begin_frame(device);
        let mut graph = RenderGraph::new(frame_index);
        self.register_passes(&mut graph, device, targets);
        match graph.execute(device) {
            Ok(submission) => Ok(self.end_frame(&submission)),
            Err(e) => {
                self.abandon_frame();
                Err(e)
            }
        }
    }

    /// Waits, between frames, for the pending load to finish and applies it.
    /// Returns the resulting state.
    pub fn block_until_settled(&mut self, timeout: Duration) -> PipelineState {
        match self.session.wait_for_load(timeout) {
            Ok(events) => self.handle_session_events(events),
            Err(error) => {
                self.load_failures += 1;
                self.enter_fault(error.into());
            }
        }
        self.refresh_state();
        self.state()
    }

    /// Flushes the device and releases every resource.
    pub fn shutdown(&mut self, device: &dyn GraphicsDevice) {
        self.session.unload();
        self.scheduler.sync_pool(&self.session);
        self.scheduler.shutdown(device);
        self.unwatch();
        self.enabled = false;
        self.refresh_state();
        log::info!("PipelineController: shut down");
    }

    fn handle_session_events(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Activated {
                    id, input, output, ..
                } => {
                    self.awaiting_model = false;
                    self.models_activated += 1;
                    self.events
                        .publish(PipelineEvent::ModelActivated { id, input, output });
                }
                SessionEvent::LoadFailed { error, .. } => {
                    self.awaiting_model = false;
                    self.load_failures += 1;
                    self.enter_fault(error.into());
                }
            }
        }
    }

    fn report_frame_error(&mut self, frame_index: u64, error: StylizeError) {
        match error.severity() {
            ErrorSeverity::PerFrame => {
                log::warn!(
                    "PipelineController: frame {} not stylized ({}): {}",
                    frame_index,
                    error.kind(),
                    error
                );
                self.events
                    .publish(PipelineEvent::FrameSkipped { frame_index, error });
            }
            ErrorSeverity::Session => self.enter_fault(error),
        }
    }

    fn enter_fault(&mut self, error: StylizeError) {
        log::error!("PipelineController: faulted ({}): {}", error.kind(), error);
        self.faults += 1;
        self.awaiting_model = false;
        self.session.unload();
        self.fault = Some(error.clone());
        self.events.publish(PipelineEvent::Fault { error });
    }

    fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("PipelineController: {message}");
        self.events.publish(PipelineEvent::Notice(message));
    }

    fn refresh_state(&mut self) {
        let state = self.state();
        if state != self.published {
            log::info!("PipelineController: {} -> {}", self.published, state);
            self.events.publish(PipelineEvent::StateChanged {
                from: self.published,
                to: state,
            });
            self.published = state;
        }
        self.dispatch();
    }

    fn dispatch(&mut self) {
        if let Some(callback) = self.callback.as_mut() {
            for event in self.events.drain() {
                callback(&event);
            }
        }
    }
}

impl fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineController")
            .field("state", &self.state())
            .field("backend", &self.backend)
            .field("session", &self.session)
            .field("scheduler", &self.scheduler)
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}
