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

//! The stylization node of the per-frame render graph.

use super::pool::SlotLease;
use super::session::ModelHandle;
use pastiche_core::gpu::{CommandEncoder, GraphicsDevice, ResampleParams, TextureId};
use pastiche_core::graph::{GraphResource, PassContext, PassError, RenderGraphPass};
use pastiche_core::math::Rect;
use pastiche_core::tensor::{FrameTensorBuffer, TensorBufferState, TensorStateError};
use pastiche_core::{InferenceError, StylizeError};
use pastiche_lanes::{PackRequest, TensorBridgeLane, UnpackRequest};
use std::sync::{Arc, Mutex, PoisonError};

/// Name of the stylization pass in the render graph.
pub const STYLIZATION_PASS: &str = "Stylization";

/// The color textures a frame is stylized from and into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTargets {
    /// Texture the frame is read from.
    pub source: TextureId,
    /// Region of `source` to stylize; the whole texture when `None`.
    pub source_view: Option<Rect>,
    /// Texture the stylized frame is written to; `source` when `None`.
    pub target: Option<TextureId>,
    /// Region of the target to write; the whole texture when `None`.
    pub target_view: Option<Rect>,
}

impl FrameTargets {
    /// Stylizes `texture` in place.
    pub fn in_place(texture: TextureId) -> Self {
        Self {
            source: texture,
            source_view: None,
            target: None,
            target_view: None,
        }
    }

    /// Reads `source` and writes `target`.
    pub fn separate(source: TextureId, target: TextureId) -> Self {
        Self {
            target: Some(target),
            ..Self::in_place(source)
        }
    }

    /// Restricts the read and the write to `view`.
    pub fn with_view(mut self, view: Rect) -> Self {
        self.source_view = Some(view);
        self.target_view = Some(view);
        self
    }

    /// The texture written by the pass.
    pub fn target(&self) -> TextureId {
        self.target.unwrap_or(self.source)
    }
}

/// How an unstylized frame reached the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Source and target are the same texture; the frame is already there.
    InPlace,
    /// The source region was copied unchanged.
    Copied,
    /// The source region was resampled into the target region.
    Resampled,
    /// Nothing could be recorded; the target keeps its previous contents.
    Dropped,
}

/// What the pass did during the frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The graph did not execute the pass.
    NotRecorded,
    /// The frame was stylized.
    Stylized,
    /// The frame passed through unstylized.
    PassedThrough {
        /// Why stylization was skipped.
        error: StylizeError,
        /// How the frame reached the target.
        fallback: Fallback,
    },
}

/// The pass's account of one frame, read back after submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    /// What happened.
    pub outcome: PassOutcome,
    /// State the input tensor ended in.
    pub input: FrameTensorBuffer,
    /// State the output tensor ended in.
    pub output: FrameTensorBuffer,
    /// Whether the model's forward pass was recorded.
    pub dispatched: bool,
}

/// Handle on the report of a pass that has been moved into a graph.
#[derive(Debug, Clone)]
pub struct PassTicket(Arc<Mutex<PassReport>>);

impl PassTicket {
    /// The report as last written by the pass.
    pub fn report(&self) -> PassReport {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn state_error(e: TensorStateError) -> StylizeError {
    InferenceError::Binding(e.to_string()).into()
}

/// Packs the frame, runs the model and unpacks its output.
///
/// Both conversions are validated before anything is recorded, so a frame
/// the bridge cannot handle costs no GPU work. Any failure passes the frame
/// through unstylized and is reported through the pass's [`PassTicket`] and
/// as a [`PassError`] in the frame's submission.
pub struct StylizationPass {
    model: ModelHandle,
    lane: Arc<dyn TensorBridgeLane>,
    targets: FrameTargets,
    lease: SlotLease,
    report: Arc<Mutex<PassReport>>,
}

impl StylizationPass {
    /// Creates the pass and the ticket its report is read through.
    pub fn new(
        model: ModelHandle,
        lane: Arc<dyn TensorBridgeLane>,
        targets: FrameTargets,
        lease: SlotLease,
    ) -> (Self, PassTicket) {
        let report = Arc::new(Mutex::new(PassReport {
            outcome: PassOutcome::NotRecorded,
            input: lease.input,
            output: lease.output,
            dispatched: false,
        }));
        let ticket = PassTicket(report.clone());
        (
            Self {
                model,
                lane,
                targets,
                lease,
                report,
            },
            ticket,
        )
    }

    /// Resources the pass reads.
    pub fn reads(&self) -> Vec<GraphResource> {
        vec![self.targets.source.into()]
    }

    /// Resources the pass writes.
    pub fn writes(&self) -> Vec<GraphResource> {
        let mut writes = vec![
            self.targets.target().into(),
            self.lease.input.buffer().into(),
            self.lease.output.buffer().into(),
        ];
        writes.extend(self.lease.scratch.map(GraphResource::from));
        writes
    }

    fn requests(
        &self,
        input: &FrameTensorBuffer,
        output: &FrameTensorBuffer,
    ) -> (PackRequest, UnpackRequest) {
        let (input_spec, output_spec) = (self.model.input(), self.model.output());
        let pack = PackRequest {
            source: self.targets.source,
            view: self.targets.source_view,
            tensor: input.view(),
            range: input_spec.range,
            order: input_spec.order,
        };
        let unpack = UnpackRequest {
            tensor: output.view(),
            target: self.targets.target(),
            view: self.targets.target_view,
            range: output_spec.range,
            order: output_spec.order,
            scratch: self.lease.scratch,
        };
        (pack, unpack)
    }

    fn record(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        report: &mut PassReport,
    ) -> Result<(), StylizeError> {
        let (pack, unpack) = self.requests(&report.input, &report.output);
        self.lane.check_pack(device, &pack)?;
        self.lane.check_unpack(device, &unpack)?;

        if let Some(fence) = self.lease.wait {
            encoder.wait_fence(fence);
        }

        self.lane.pack(device, encoder, &pack)?;
        report
            .input
            .transition(TensorBufferState::PackedFromFrame)
            .map_err(state_error)?;

        self.model
            .run(encoder, &report.input.view(), &report.output.view())?;
        report.dispatched = true;
        report
            .output
            .transition(TensorBufferState::InferenceComplete)
            .map_err(state_error)?;

        self.lane.unpack(device, encoder, &unpack)?;
        report
            .output
            .transition(TensorBufferState::UnpackedToFrame)
            .map_err(state_error)?;
        Ok(())
    }
}

/// Brings the unstylized source region to the target.
fn pass_through(
    targets: &FrameTargets,
    device: &dyn GraphicsDevice,
    encoder: &mut dyn CommandEncoder,
) -> Fallback {
    let (source, target) = (targets.source, targets.target());
    if source == target {
        return Fallback::InPlace;
    }
    let (Some(src), Some(dst)) = (device.texture_info(source), device.texture_info(target)) else {
        return Fallback::Dropped;
    };
    let source_region = targets.source_view.unwrap_or(Rect::full(src.size));
    let target_region = targets.target_view.unwrap_or(Rect::full(dst.size));

    if source_region == target_region
        && encoder.copy_texture(source, target, source_region).is_ok()
    {
        return Fallback::Copied;
    }
    let resample = ResampleParams {
        source,
        source_region,
        target,
        target_region,
    };
    match encoder.resample_texture(&resample) {
        Ok(()) => Fallback::Resampled,
        Err(e) => {
            log::warn!("pass-through: cannot bring {:?} to {:?}: {}", source, target, e);
            Fallback::Dropped
        }
    }
}

impl RenderGraphPass for StylizationPass {
    fn execute(&mut self, ctx: &mut PassContext<'_>) -> Result<(), PassError> {
        let mut report = PassReport {
            outcome: PassOutcome::NotRecorded,
            input: self.lease.input,
            output: self.lease.output,
            dispatched: false,
        };
        let result = self.record(ctx.device, ctx.encoder, &mut report);
        let ret = match result {
            Ok(()) => {
                report.outcome = PassOutcome::Stylized;
                Ok(())
            }
            Err(error) => {
                let fallback = pass_through(&self.targets, ctx.device, ctx.encoder);
                log::debug!(
                    "StylizationPass: frame {} passed through ({:?}): {}",
                    ctx.frame_index,
                    fallback,
                    error
                );
                report.outcome = PassOutcome::PassedThrough {
                    error: error.clone(),
                    fallback,
                };
                Err(PassError::failed(error))
            }
        };
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = report;
        ret
    }
}

/// Handle on the outcome of a [`PassThroughPass`].
#[derive(Debug, Clone)]
pub struct PassThroughTicket(Arc<Mutex<PassOutcome>>);

impl PassThroughTicket {
    /// The outcome as last written by the pass.
    pub fn outcome(&self) -> PassOutcome {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Stands in for [`StylizationPass`] when the frame cannot get tensors.
///
/// Brings the source to the target unstylized and reports `error` through
/// its ticket and the frame's submission.
pub struct PassThroughPass {
    targets: FrameTargets,
    error: StylizeError,
    outcome: Arc<Mutex<PassOutcome>>,
}

impl PassThroughPass {
    /// Creates the pass and the ticket its outcome is read through.
    pub fn new(targets: FrameTargets, error: StylizeError) -> (Self, PassThroughTicket) {
        let outcome = Arc::new(Mutex::new(PassOutcome::NotRecorded));
        let ticket = PassThroughTicket(outcome.clone());
        (
            Self {
                targets,
                error,
                outcome,
            },
            ticket,
        )
    }

    /// Resources the pass reads.
    pub fn reads(&self) -> Vec<GraphResource> {
        vec![self.targets.source.into()]
    }

    /// Resources the pass writes.
    pub fn writes(&self) -> Vec<GraphResource> {
        vec![self.targets.target().into()]
    }
}

impl RenderGraphPass for PassThroughPass {
    fn execute(&mut self, ctx: &mut PassContext<'_>) -> Result<(), PassError> {
        let fallback = pass_through(&self.targets, ctx.device, ctx.encoder);
        log::debug!(
            "PassThroughPass: frame {} passed through ({:?}): {}",
            ctx.frame_index,
            fallback,
            self.error
        );
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = PassOutcome::PassedThrough {
            error: self.error.clone(),
            fallback,
        };
        Err(PassError::failed(self.error.clone()))
    }
}
