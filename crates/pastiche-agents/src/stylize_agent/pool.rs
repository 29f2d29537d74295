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

//! Per-frame tensor buffers.

use pastiche_core::gpu::{
    BufferDescriptor, BufferId, BufferUsage, FenceStatus, FenceValue, GraphicsDevice, TextureId,
};
use pastiche_core::tensor::{FrameTensorBuffer, Precision, TensorRole, TensorShape};
use pastiche_core::{InferenceError, StylizeError};
use pastiche_lanes::scratch_texture_descriptor;
use std::borrow::Cow;

/// What the pool's buffers are sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    /// Shape of every input tensor.
    pub input: TensorShape,
    /// Shape of every output tensor.
    pub output: TensorShape,
    /// Element precision of both tensors.
    pub precision: Precision,
    /// Whether each slot also carries an unpack scratch texture.
    pub scratch: bool,
}

#[derive(Debug)]
struct FrameSlot {
    input: FrameTensorBuffer,
    output: FrameTensorBuffer,
    scratch: Option<TextureId>,
    // Submission that last used the slot.
    fence: Option<FenceValue>,
}

impl FrameSlot {
    fn is_idle(&self, device: &dyn GraphicsDevice) -> bool {
        self.fence
            .map_or(true, |fence| device.fence_status(fence) == FenceStatus::Signaled)
    }
}

/// The resources of one frame slot, lent to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLease {
    /// Index of the slot.
    pub slot: usize,
    /// Input tensor, reset to `Uninitialized`.
    pub input: FrameTensorBuffer,
    /// Output tensor, reset to `Uninitialized`.
    pub output: FrameTensorBuffer,
    /// Unpack scratch texture, when the layout asks for one.
    pub scratch: Option<TextureId>,
    /// Submission still using the slot; the frame must order after it.
    pub wait: Option<FenceValue>,
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tensor pairs currently allocated, including retired ones.
    pub allocated_pairs: usize,
    /// Highest value `allocated_pairs` has reached.
    pub peak_pairs: usize,
    /// Number of pairs ever allocated.
    pub allocations: u64,
    /// Number of times the layout changed with buffers alive.
    pub rebuilds: u64,
}

/// One input/output tensor pair per frame in flight.
///
/// Frame `n` uses slot `n % frames_in_flight`, so the pair a frame writes is
/// never the one an earlier, still running, frame reads. Slots are allocated
/// on first use. Changing the layout retires every slot; a retired slot is
/// destroyed once the last submission that used it has signaled. Live and
/// retired pairs together never exceed `frames_in_flight`.
#[derive(Debug)]
pub struct FrameTensorPool {
    frames_in_flight: usize,
    layout: Option<PoolLayout>,
    slots: Vec<Option<FrameSlot>>,
    retired: Vec<FrameSlot>,
    stats: PoolStats,
}

impl FrameTensorPool {
    /// Creates an empty pool with `frames_in_flight` slots (at least one).
    pub fn new(frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frames_in_flight,
            layout: None,
            slots: (0..frames_in_flight).map(|_| None).collect(),
            retired: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// The layout buffers are currently sized for.
    pub fn layout(&self) -> Option<PoolLayout> {
        self.layout
    }

    /// Allocation counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Sizes the pool for `layout`. A change retires every live slot.
    pub fn configure(&mut self, layout: Option<PoolLayout>) {
        if self.layout == layout {
            return;
        }
        let live = self.slots.iter().filter(|slot| slot.is_some()).count();
        if live > 0 {
            self.stats.rebuilds += 1;
            log::info!(
                "FrameTensorPool: layout changed, retiring {} slot(s) (new input: {})",
                live,
                layout.map_or_else(|| "none".to_string(), |l| l.input.to_string())
            );
        }
        for slot in self.slots.iter_mut() {
            if let Some(slot) = slot.take() {
                self.retired.push(slot);
            }
        }
        self.layout = layout;
    }

    /// Lends the slot of `frame_index`, allocating it on first use.
    ///
    /// ## Errors
    /// * [`InferenceError::BuffersInFlight`] when the slot is unallocated and
    ///   retired pairs still in use leave no room for it. Retry next frame.
    /// * [`StylizeError::ResourceExhausted`] when the device refuses an
    ///   allocation. Nothing stays allocated from the failed attempt.
    pub fn acquire(
        &mut self,
        device: &dyn GraphicsDevice,
        frame_index: u64,
    ) -> Result<SlotLease, StylizeError> {
        let layout = self.layout.ok_or(InferenceError::NotReady)?;
        let index = (frame_index % self.frames_in_flight as u64) as usize;

        if self.slots[index].is_none() {
            // Reclaim what can be reclaimed before growing.
            self.collect(device);
            if self.pairs() >= self.frames_in_flight {
                log::debug!(
                    "FrameTensorPool: slot {} waits for {} retired slot(s)",
                    index,
                    self.retired.len()
                );
                return Err(InferenceError::BuffersInFlight(self.frames_in_flight).into());
            }
            let slot = allocate(device, &layout, index)?;
            self.stats.allocations += 1;
            self.slots[index] = Some(slot);
            self.update_allocated();
        }

        let Some(slot) = self.slots[index].as_mut() else {
            return Err(InferenceError::NotReady.into());
        };
        slot.input.reset();
        slot.output.reset();
        let wait = if slot.is_idle(device) { None } else { slot.fence };
        Ok(SlotLease {
            slot: index,
            input: slot.input,
            output: slot.output,
            scratch: slot.scratch,
            wait,
        })
    }

    /// Returns a lent slot after its frame was submitted with `fence`.
    ///
    /// `input` and `output` carry the buffer states the frame ended with.
    pub fn complete(
        &mut self,
        slot: usize,
        fence: FenceValue,
        input: FrameTensorBuffer,
        output: FrameTensorBuffer,
    ) {
        match self.slots.get_mut(slot).and_then(Option::as_mut) {
            Some(entry) if entry.input.buffer() == input.buffer() => {
                entry.fence = Some(fence);
                entry.input = input;
                entry.output = output;
            }
            _ => {
                // The slot was retired during the frame; the retired copy
                // must still wait for this submission.
                if let Some(retired) = self
                    .retired
                    .iter_mut()
                    .find(|retired| retired.input.buffer() == input.buffer())
                {
                    retired.fence = Some(fence);
                }
            }
        }
    }

    /// Destroys retired slots whose last submission has signaled.
    pub fn collect(&mut self, device: &dyn GraphicsDevice) {
        let before = self.retired.len();
        self.retired.retain(|slot| {
            if slot.is_idle(device) {
                destroy(device, slot);
                false
            } else {
                true
            }
        });
        if self.retired.len() != before {
            log::debug!(
                "FrameTensorPool: destroyed {} retired slot(s)",
                before - self.retired.len()
            );
            self.update_allocated();
        }
    }

    /// Destroys every buffer immediately. The device must be idle.
    pub fn destroy_all(&mut self, device: &dyn GraphicsDevice) {
        self.configure(None);
        for slot in self.retired.drain(..) {
            destroy(device, &slot);
        }
        self.update_allocated();
    }

    /// The input buffer of a live slot.
    pub fn input_buffer(&self, slot: usize) -> Option<BufferId> {
        self.slots.get(slot)?.as_ref().map(|slot| slot.input.buffer())
    }

    fn pairs(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count() + self.retired.len()
    }

    fn update_allocated(&mut self) {
        self.stats.allocated_pairs = self.pairs();
        self.stats.peak_pairs = self.stats.peak_pairs.max(self.stats.allocated_pairs);
    }
}

fn create_tensor(
    device: &dyn GraphicsDevice,
    role: TensorRole,
    shape: TensorShape,
    precision: Precision,
    slot: usize,
) -> Result<FrameTensorBuffer, StylizeError> {
    let label = match role {
        TensorRole::Input => format!("Pastiche Input Tensor {slot}"),
        TensorRole::Output => format!("Pastiche Output Tensor {slot}"),
    };
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(label)),
            size: shape.byte_size(precision),
            usage: BufferUsage::TENSOR,
        })
        .map_err(StylizeError::from_allocation)?;
    Ok(FrameTensorBuffer::new(buffer, role, shape, precision))
}

fn allocate(
    device: &dyn GraphicsDevice,
    layout: &PoolLayout,
    slot: usize,
) -> Result<FrameSlot, StylizeError> {
    let input = create_tensor(device, TensorRole::Input, layout.input, layout.precision, slot)?;
    let output = match create_tensor(device, TensorRole::Output, layout.output, layout.precision, slot) {
        Ok(output) => output,
        Err(e) => {
            release_buffer(device, input.buffer());
            return Err(e);
        }
    };
    let scratch = if layout.scratch {
        match device.create_texture(&scratch_texture_descriptor(layout.output.extent())) {
            Ok(texture) => Some(texture),
            Err(e) => {
                release_buffer(device, input.buffer());
                release_buffer(device, output.buffer());
                return Err(StylizeError::from_allocation(e));
            }
        }
    } else {
        None
    };
    log::debug!(
        "FrameTensorPool: allocated slot {} ({} + {} bytes{})",
        slot,
        input.size_bytes(),
        output.size_bytes(),
        if scratch.is_some() { ", with scratch" } else { "" }
    );
    Ok(FrameSlot {
        input,
        output,
        scratch,
        fence: None,
    })
}

fn release_buffer(device: &dyn GraphicsDevice, buffer: BufferId) {
    if let Err(e) = device.destroy_buffer(buffer) {
        log::warn!("FrameTensorPool: failed to destroy {:?}: {}", buffer, e);
    }
}

fn destroy(device: &dyn GraphicsDevice, slot: &FrameSlot) {
    release_buffer(device, slot.input.buffer());
    release_buffer(device, slot.output.buffer());
    if let Some(texture) = slot.scratch {
        if let Err(e) = device.destroy_texture(texture) {
            log::warn!("FrameTensorPool: failed to destroy {:?}: {}", texture, e);
        }
    }
}
