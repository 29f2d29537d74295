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

//! Inserts the stylization pass into each frame's render graph.

use super::pass::{
    Fallback, FrameTargets, PassOutcome, PassThroughPass, PassThroughTicket, PassTicket,
    StylizationPass, STYLIZATION_PASS,
};
use super::pool::{FrameTensorPool, PoolLayout, PoolStats};
use super::session::{InferenceSession, SessionEvent};
use pastiche_core::gpu::GraphicsDevice;
use pastiche_core::graph::{FrameSubmission, PassId, RenderGraph};
use pastiche_core::{ErrorSeverity, InferenceError, ResizePolicy, StylizeError};
use pastiche_lanes::{bridge_for_policy, TensorBridgeLane};
use std::sync::Arc;

/// What happened to a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// No stylization pass was part of the frame.
    Unscheduled,
    /// The frame was stylized.
    Stylized,
    /// The frame passed through unstylized.
    PassedThrough {
        /// Why.
        error: StylizeError,
        /// How the frame reached its target.
        fallback: Fallback,
    },
}

/// Frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames ended.
    pub frames: u64,
    /// Frames stylized.
    pub stylized: u64,
    /// Frames that carried the pass but passed through.
    pub passed_through: u64,
    /// Frames without the pass.
    pub unscheduled: u64,
    /// Pass-throughs caused by a format mismatch.
    pub format_mismatches: u64,
    /// Pass-throughs caused by an [`InferenceError`].
    pub inference_errors: u64,
    /// Frames whose tensors could not be allocated.
    pub resource_exhausted: u64,
}

impl FrameStats {
    fn count_error(&mut self, error: &StylizeError) {
        match error {
            StylizeError::FormatMismatch(_) => self.format_mismatches += 1,
            StylizeError::Inference(_) => self.inference_errors += 1,
            StylizeError::ResourceExhausted(_) => self.resource_exhausted += 1,
            StylizeError::Load(_) => {}
        }
    }
}

#[derive(Debug)]
enum ScheduledWork {
    Stylize { slot: usize, ticket: PassTicket },
    PassThrough(PassThroughTicket),
}

#[derive(Debug)]
struct ScheduledFrame {
    frame_index: u64,
    pass: PassId,
    work: ScheduledWork,
}

/// Drives one stylization pass per frame.
///
/// A frame goes through three calls: [`FrameScheduler::begin_frame`] is the
/// safe point where model swaps and buffer rebuilds happen,
/// [`FrameScheduler::schedule`] adds the pass to the frame's graph and
/// [`FrameScheduler::end_frame`] collects what the pass did once the graph
/// has been submitted.
pub struct FrameScheduler {
    policy: ResizePolicy,
    lane: Arc<dyn TensorBridgeLane>,
    pool: FrameTensorPool,
    current: Option<ScheduledFrame>,
    stats: FrameStats,
}

impl FrameScheduler {
    /// Creates a scheduler with `frames_in_flight` tensor pairs.
    pub fn new(frames_in_flight: usize, policy: ResizePolicy) -> Self {
        let lane = bridge_for_policy(policy);
        log::info!(
            "FrameScheduler: {} frame(s) in flight, {} bridge",
            frames_in_flight,
            lane.strategy_name()
        );
        Self {
            policy,
            lane,
            pool: FrameTensorPool::new(frames_in_flight),
            current: None,
            stats: FrameStats::default(),
        }
    }

    /// The active resize policy.
    pub fn resize_policy(&self) -> ResizePolicy {
        self.policy
    }

    /// Switches the bridge. Buffers are rebuilt at the next frame begin if
    /// the new bridge needs a different layout.
    pub fn set_resize_policy(&mut self, policy: ResizePolicy) {
        if policy != self.policy {
            self.policy = policy;
            self.lane = bridge_for_policy(policy);
            log::info!("FrameScheduler: using {} bridge", self.lane.strategy_name());
        }
    }

    /// The bridge in use.
    pub fn lane(&self) -> &dyn TensorBridgeLane {
        self.lane.as_ref()
    }

    /// The tensor pool.
    pub fn pool(&self) -> &FrameTensorPool {
        &self.pool
    }

    /// Allocation counters of the tensor pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Frame counters.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// The frame-boundary safe point.
    ///
    /// Applies finished model loads, destroys buffers no frame uses anymore
    /// and resizes the pool to the active model.
    pub fn begin_frame(
        &mut self,
        device: &dyn GraphicsDevice,
        session: &mut InferenceSession,
    ) -> Vec<SessionEvent> {
        if let Some(stale) = self.current.take() {
            log::warn!(
                "FrameScheduler: frame {} was never ended; dropping its pass",
                stale.frame_index
            );
        }
        let events = session.poll(device);
        self.sync_pool(session);
        self.pool.collect(device);
        events
    }

    /// Resizes the pool to the session's active model.
    pub fn sync_pool(&mut self, session: &InferenceSession) {
        let layout = session.active().map(|model| PoolLayout {
            input: model.input().shape,
            output: model.output().shape,
            precision: model.input().precision,
            scratch: self.lane.needs_scratch(),
        });
        self.pool.configure(layout);
    }

    /// Adds the stylization pass for the frame `graph` renders.
    ///
    /// Returns `None` without touching the graph when no model is active.
    /// A second call in the same frame returns the pass already added. When
    /// the frame's tensors are still in use by earlier frames, a
    /// [`PassThroughPass`] takes the pass's place.
    ///
    /// ## Errors
    /// * [`StylizeError::ResourceExhausted`] when the frame's tensors cannot
    ///   be allocated. The graph is left untouched.
    pub fn schedule(
        &mut self,
        graph: &mut RenderGraph,
        device: &dyn GraphicsDevice,
        session: &InferenceSession,
        targets: FrameTargets,
    ) -> Result<Option<PassId>, StylizeError> {
        if let Some(current) = &self.current {
            log::warn!(
                "FrameScheduler: frame {} already has a stylization pass",
                current.frame_index
            );
            return Ok(Some(current.pass));
        }
        let Some(model) = session.active() else {
            return Ok(None);
        };

        let frame_index = graph.frame_index();
        let lease = match self.pool.acquire(device, frame_index) {
            Ok(lease) => lease,
            Err(e) if e.severity() == ErrorSeverity::PerFrame => {
                let (pass, ticket) = PassThroughPass::new(targets, e);
                let id = graph.add_pass(STYLIZATION_PASS, &pass.reads(), &pass.writes(), pass);
                self.current = Some(ScheduledFrame {
                    frame_index,
                    pass: id,
                    work: ScheduledWork::PassThrough(ticket),
                });
                return Ok(Some(id));
            }
            Err(e) => {
                self.stats.count_error(&e);
                return Err(e);
            }
        };
        let slot = lease.slot;
        let (pass, ticket) = StylizationPass::new(model.clone(), self.lane.clone(), targets, lease);
        let id = graph.add_pass(STYLIZATION_PASS, &pass.reads(), &pass.writes(), pass);
        self.current = Some(ScheduledFrame {
            frame_index,
            pass: id,
            work: ScheduledWork::Stylize { slot, ticket },
        });
        Ok(Some(id))
    }

    /// Collects the pass's report after the frame was submitted.
    pub fn end_frame(
        &mut self,
        submission: &FrameSubmission,
        session: &mut InferenceSession,
    ) -> FrameOutcome {
        self.stats.frames += 1;
        let Some(frame) = self.current.take() else {
            self.stats.unscheduled += 1;
            return FrameOutcome::Unscheduled;
        };
        if frame.frame_index != submission.frame_index {
            log::warn!(
                "FrameScheduler: pass of frame {} ended with frame {}",
                frame.frame_index,
                submission.frame_index
            );
        }

        let outcome = match frame.work {
            ScheduledWork::Stylize { slot, ticket } => {
                let report = ticket.report();
                self.pool
                    .complete(slot, submission.fence, report.input, report.output);
                if report.dispatched {
                    session.note_dispatch(submission.fence);
                }
                report.outcome
            }
            ScheduledWork::PassThrough(ticket) => ticket.outcome(),
        };

        match outcome {
            PassOutcome::Stylized => {
                self.stats.stylized += 1;
                FrameOutcome::Stylized
            }
            PassOutcome::PassedThrough { error, fallback } => {
                self.stats.passed_through += 1;
                self.stats.count_error(&error);
                FrameOutcome::PassedThrough { error, fallback }
            }
            PassOutcome::NotRecorded => {
                self.stats.passed_through += 1;
                let error = StylizeError::from(InferenceError::Dispatch(
                    "stylization pass was not executed".to_string(),
                ));
                self.stats.count_error(&error);
                FrameOutcome::PassedThrough {
                    error,
                    fallback: Fallback::Dropped,
                }
            }
        }
    }

    /// Forgets the current frame when its graph could not be submitted.
    pub fn abandon_frame(&mut self) {
        if let Some(frame) = self.current.take() {
            log::warn!("FrameScheduler: frame {} abandoned", frame.frame_index);
            self.stats.frames += 1;
        }
    }

    /// Flushes completed work and destroys every buffer.
    pub fn shutdown(&mut self, device: &dyn GraphicsDevice) {
        device.poll();
        self.pool.destroy_all(device);
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("lane", &self.lane.strategy_name())
            .field("pool", &self.pool)
            .field("current", &self.current)
            .field("stats", &self.stats)
            .finish()
    }
}

