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

//! Tensor bridge lanes: color target → tensor → color target.
//!
//! A bridge converts a region of a color texture into the model's input
//! tensor (channel reordering, range mapping and precision conversion all
//! happen in the encode kernel), and writes the model's output tensor back.
//! Every check runs before anything is recorded, so a rejected frame leaves
//! the encoder untouched.

mod direct_lane;
mod resample_lane;
mod validation;

pub use direct_lane::DirectBridgeLane;
pub use resample_lane::ResampleBridgeLane;

use pastiche_core::gpu::{
    CommandEncoder, GraphicsDevice, TensorView, TextureDescriptor, TextureFormat, TextureId,
    TextureUsage,
};
use pastiche_core::lane::Lane;
use pastiche_core::math::{Extent2D, Rect};
use pastiche_core::tensor::{ChannelOrder, PixelRange};
use pastiche_core::{ResizePolicy, StylizeError};
use std::borrow::Cow;
use std::sync::Arc;

/// Format of the intermediate texture used when unpacking needs a resize.
pub const SCRATCH_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Everything needed to pack one color target into a tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackRequest {
    /// Color target to read.
    pub source: TextureId,
    /// Region of `source` to read; the whole texture when `None`.
    pub view: Option<Rect>,
    /// Input tensor to write.
    pub tensor: TensorView,
    /// Range the network expects.
    pub range: PixelRange,
    /// Channel order the network expects.
    pub order: ChannelOrder,
}

/// Everything needed to unpack a tensor into a color target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnpackRequest {
    /// Output tensor to read.
    pub tensor: TensorView,
    /// Color target to write.
    pub target: TextureId,
    /// Region of `target` to write; the whole texture when `None`.
    pub view: Option<Rect>,
    /// Range the network produces.
    pub range: PixelRange,
    /// Channel order the network produces.
    pub order: ChannelOrder,
    /// Intermediate texture of the tensor's extent, for lanes that resize.
    pub scratch: Option<TextureId>,
}

/// A strategy for moving pixels between color targets and tensors.
pub trait TensorBridgeLane: Lane {
    /// Whether [`UnpackRequest::scratch`] must be provided.
    fn needs_scratch(&self) -> bool {
        false
    }

    /// Validates a pack without recording anything. Returns the source region.
    fn check_pack(
        &self,
        device: &dyn GraphicsDevice,
        request: &PackRequest,
    ) -> Result<Rect, StylizeError>;

    /// Validates an unpack without recording anything. Returns the target region.
    fn check_unpack(
        &self,
        device: &dyn GraphicsDevice,
        request: &UnpackRequest,
    ) -> Result<Rect, StylizeError>;

    /// Records the conversion of a color region into the input tensor.
    fn pack(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        request: &PackRequest,
    ) -> Result<(), StylizeError>;

    /// Records the conversion of the output tensor into a color region.
    fn unpack(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        request: &UnpackRequest,
    ) -> Result<(), StylizeError>;
}

/// The bridge implementing a resize policy.
pub fn bridge_for_policy(policy: ResizePolicy) -> Arc<dyn TensorBridgeLane> {
    match policy {
        ResizePolicy::Strict => Arc::new(DirectBridgeLane::new()),
        ResizePolicy::Resample => Arc::new(ResampleBridgeLane::new()),
    }
}

/// Descriptor of the intermediate texture a resizing unpack decodes into.
pub fn scratch_texture_descriptor(extent: Extent2D) -> TextureDescriptor<'static> {
    TextureDescriptor {
        label: Some(Cow::Borrowed("Pastiche Unpack Scratch")),
        size: extent,
        format: SCRATCH_FORMAT,
        usage: TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_SRC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_selects_strategy() {
        assert_eq!(bridge_for_policy(ResizePolicy::Strict).strategy_name(), "Direct");
        let resample = bridge_for_policy(ResizePolicy::Resample);
        assert_eq!(resample.strategy_name(), "Resample");
        assert!(resample.needs_scratch());
    }

    #[test]
    fn test_scratch_is_writable_and_sampleable() {
        let descriptor = scratch_texture_descriptor(Extent2D::new(256, 256));
        assert!(descriptor.format.supports_storage_write());
        assert!(descriptor.usage.contains(TextureUsage::TEXTURE_BINDING));
    }
}
