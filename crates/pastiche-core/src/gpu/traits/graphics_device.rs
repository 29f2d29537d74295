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

//! The device abstraction every backend implements.

use crate::gpu::api::*;
use crate::gpu::error::ResourceError;
use crate::gpu::traits::CommandEncoder;
use std::any::Any;
use std::fmt::Debug;

/// The device a pipeline records and submits GPU work to.
///
/// Implementations hand out ids for the resources they own and track
/// submissions with monotonically increasing [`FenceValue`]s.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Creates a new GPU buffer.
    /// ## Errors
    /// * [`ResourceError::OutOfMemory`] if the device cannot satisfy the allocation.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer. Work already submitted that references it keeps it alive
    /// on backends that reference-count, so callers must still wait on fences
    /// before reusing the memory for something else.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Size of a live buffer in bytes.
    fn buffer_size(&self, id: BufferId) -> Option<u64>;

    /// Writes `data` into a buffer through the queue.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Creates a new 2D texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Uploads tightly packed texel data covering the whole texture.
    fn write_texture(&self, id: TextureId, data: &[u8]) -> Result<(), ResourceError>;

    /// Describes a live texture, or `None` if the id is unknown.
    fn texture_info(&self, id: TextureId) -> Option<TextureInfo>;

    /// Creates a new command encoder.
    fn create_command_encoder(&self, label: Option<&str>) -> Box<dyn CommandEncoder>;

    /// Submits a finished command buffer and returns the fence that signals
    /// when it has completed.
    fn submit_command_buffer(
        &self,
        command_buffer: CommandBufferId,
    ) -> Result<FenceValue, ResourceError>;

    /// Returns whether the GPU has reached `fence`. Never blocks.
    fn fence_status(&self, fence: FenceValue) -> FenceStatus;

    /// Processes completed work and callbacks without blocking.
    fn poll(&self);

    /// Gets information about the active adapter.
    fn get_adapter_info(&self) -> RendererAdapterInfo;

    /// Checks if a specific feature is supported by the device.
    fn supports_feature(&self, feature_name: &str) -> bool;

    /// Resource limits relevant to tensor allocation.
    fn limits(&self) -> DeviceLimits;

    /// Current allocation statistics.
    fn memory_report(&self) -> MemoryReport;

    /// Returns the device as `Any`, for backend-specific downcasts.
    fn as_any(&self) -> &dyn Any;
}
