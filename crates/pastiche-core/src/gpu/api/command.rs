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

//! Commands recorded into a [`CommandEncoder`](crate::gpu::CommandEncoder).
//!
//! The tensor kernels are described declaratively: each backend owns the
//! compute programs that implement them.

use super::buffer::BufferId;
use super::texture::TextureId;
use crate::math::Rect;
use crate::tensor::{ChannelOrder, Precision, TensorShape};

/// An opaque handle to a finished, not yet submitted command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferId(pub u64);

/// How a kernel maps source texels onto destination elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// One source texel per destination element; extents must match.
    Exact,
    /// Bilinear filtering with clamp-to-edge addressing.
    Bilinear,
}

/// A tensor living in a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorView {
    /// The backing buffer.
    pub buffer: BufferId,
    /// Logical shape and memory layout.
    pub shape: TensorShape,
    /// Element precision.
    pub precision: Precision,
}

impl TensorView {
    /// Number of bytes the tensor occupies.
    pub fn byte_size(&self) -> u64 {
        self.shape.byte_size(self.precision)
    }
}

/// Reads a region of a color texture into a tensor.
///
/// Each element is `texel_channel * scale + bias`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeTensorParams {
    /// Texture to read.
    pub source: TextureId,
    /// Region of `source` mapped onto the tensor plane.
    pub region: Rect,
    /// Tensor to write.
    pub target: TensorView,
    /// Which texel channel feeds each tensor channel.
    pub order: ChannelOrder,
    /// Multiplier applied to texel values.
    pub scale: f32,
    /// Offset applied after scaling.
    pub bias: f32,
    /// Texel lookup mode.
    pub sampling: SamplingMode,
}

/// Writes a tensor into a region of a color texture.
///
/// Each color channel is `element * scale + bias`; alpha is written as one
/// unless the tensor carries a fourth channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeTensorParams {
    /// Tensor to read.
    pub source: TensorView,
    /// Texture to write.
    pub target: TextureId,
    /// Region of `target` receiving the tensor plane. Its size equals the tensor's spatial extent.
    pub region: Rect,
    /// Which texel channel receives each tensor channel.
    pub order: ChannelOrder,
    /// Multiplier applied to tensor values.
    pub scale: f32,
    /// Offset applied after scaling.
    pub bias: f32,
}

/// Bilinearly resamples a region of one texture into a region of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleParams {
    /// Texture to read.
    pub source: TextureId,
    /// Region of `source` to read.
    pub source_region: Rect,
    /// Texture to write.
    pub target: TextureId,
    /// Region of `target` to fill.
    pub target_region: Rect,
}
