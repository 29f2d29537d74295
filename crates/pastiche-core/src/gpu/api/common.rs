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

//! Backend-agnostic adapter descriptions, limits and frame constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of frames the CPU may record ahead of the GPU.
///
/// Tensor buffer pairs are allocated once per frame in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Side length of the square workgroups used by every tensor kernel.
pub const THREAD_GROUP_SIZE: u32 = 8;

/// Feature name reported by devices that can run kernels on 16-bit floats.
pub const FEATURE_SHADER_F16: &str = "shader_f16";

/// The graphics API a device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GraphicsBackendType {
    /// Vulkan API.
    Vulkan,
    /// Apple's Metal API.
    Metal,
    /// Microsoft's DirectX 12 API.
    Dx12,
    /// Microsoft's DirectX 11 API.
    Dx11,
    /// OpenGL API.
    OpenGL,
    /// WebGPU API (for web builds).
    WebGpu,
    /// The CPU reference device.
    Software,
    /// An unknown or unsupported backend.
    #[default]
    Unknown,
}

impl fmt::Display for GraphicsBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vulkan => "Vulkan",
            Self::Metal => "Metal",
            Self::Dx12 => "DirectX 12",
            Self::Dx11 => "DirectX 11",
            Self::OpenGL => "OpenGL",
            Self::WebGpu => "WebGPU",
            Self::Software => "Software",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// The physical type of a graphics device (GPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RendererDeviceType {
    /// A GPU integrated into the CPU.
    IntegratedGpu,
    /// A discrete, dedicated GPU.
    DiscreteGpu,
    /// A virtualized GPU.
    VirtualGpu,
    /// A software rasterizer or CPU implementation.
    Cpu,
    /// Unknown device type.
    #[default]
    Unknown,
}

/// Provides standardized information about the active graphics adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendererAdapterInfo {
    /// The name of the adapter.
    pub name: String,
    /// The graphics API backend this adapter is associated with.
    pub backend_type: GraphicsBackendType,
    /// The physical type of the adapter.
    pub device_type: RendererDeviceType,
}

/// Resource limits of a device that affect tensor allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest width or height of a 2D texture.
    pub max_texture_dimension_2d: u32,
    /// Largest buffer range that can be bound as a storage buffer.
    pub max_storage_buffer_binding_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 8192,
            max_storage_buffer_binding_size: 128 << 20,
        }
    }
}

/// A snapshot of the device-side allocations made through a [`GraphicsDevice`](crate::gpu::GraphicsDevice).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReport {
    /// Number of live buffers.
    pub live_buffers: usize,
    /// Number of live textures.
    pub live_textures: usize,
    /// Bytes currently allocated.
    pub allocated_bytes: u64,
    /// Highest value `allocated_bytes` has reached.
    pub peak_bytes: u64,
}
