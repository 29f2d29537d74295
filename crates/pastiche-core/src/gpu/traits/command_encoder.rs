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

//! Recording of GPU commands.

use crate::gpu::api::{
    CommandBufferId, DecodeTensorParams, EncodeTensorParams, FenceValue, ResampleParams, TextureId,
};
use crate::gpu::error::ResourceError;
use crate::math::Rect;
use std::any::Any;

/// A trait for an object that records a sequence of GPU commands.
///
/// A `CommandEncoder` is the main tool for building a [`CommandBufferId`].
/// Every recording method validates the resources it references and fails
/// before anything is recorded, so a failed call leaves the encoder usable.
/// Commands execute in recording order.
pub trait CommandEncoder {
    /// Records a texture-to-tensor conversion.
    fn encode_tensor(&mut self, params: &EncodeTensorParams) -> Result<(), ResourceError>;

    /// Records a tensor-to-texture conversion.
    fn decode_tensor(&mut self, params: &DecodeTensorParams) -> Result<(), ResourceError>;

    /// Records a bilinear resample between two textures.
    fn resample_texture(&mut self, params: &ResampleParams) -> Result<(), ResourceError>;

    /// Records a copy of `region` from `source` into the same region of `target`.
    fn copy_texture(
        &mut self,
        source: TextureId,
        target: TextureId,
        region: Rect,
    ) -> Result<(), ResourceError>;

    /// Makes the commands recorded after this call wait, on the GPU timeline,
    /// for `fence` to be signaled. The CPU is never blocked.
    fn wait_fence(&mut self, fence: FenceValue);

    /// Finalizes the command recording and returns a handle to the resulting command buffer.
    ///
    /// This method consumes the encoder. The returned [`CommandBufferId`] can then
    /// be submitted to the [`GraphicsDevice`](crate::gpu::GraphicsDevice)'s queue.
    fn finish(self: Box<Self>) -> CommandBufferId;

    /// Returns a mutable reference to the underlying trait object as `Any`.
    ///
    /// Inference runtimes use this to record backend-specific work.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
