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

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wgpu::util::DeviceExt;

use pastiche_core::gpu::{
    BufferDescriptor, BufferId, CommandBufferId, CommandEncoder, DeviceLimits, FenceStatus,
    FenceValue, GraphicsDevice, MemoryReport, RendererAdapterInfo, ResourceError,
    TextureDescriptor, TextureId, TextureInfo, TextureUsage,
};
use pastiche_core::math::Extent2D;

use super::command::WgpuCommandEncoder;
use super::context::WgpuComputeContext;
use super::conversions::{
    from_wgpu_backend, from_wgpu_device_type, from_wgpu_texture_format, IntoWgpu,
};
use super::kernels::{ComputeKernel, KernelCache, KernelKind};

#[derive(Debug)]
pub(crate) struct WgpuBufferEntry {
    pub(crate) wgpu_buffer: Arc<wgpu::Buffer>,
    pub(crate) size: u64, // To track VRAM accurately on destruction
}

#[derive(Debug)]
pub(crate) struct WgpuTextureEntry {
    pub(crate) wgpu_texture: Arc<wgpu::Texture>,
    pub(crate) info: TextureInfo,
    pub(crate) size: u64,
}

/// The internal, non-clonable state of the WgpuDevice.
#[derive(Debug)]
pub struct WgpuDeviceInternal {
    context: WgpuComputeContext,
    buffers: Mutex<HashMap<BufferId, WgpuBufferEntry>>,
    textures: Mutex<HashMap<TextureId, WgpuTextureEntry>>,
    kernels: Mutex<KernelCache>,

    next_buffer_id: AtomicUsize,
    next_texture_id: AtomicUsize,

    // VRAM Tracking
    vram_allocated_bytes: AtomicU64,
    vram_peak_bytes: AtomicU64,

    /// Command buffers that have been finished but not yet submitted.
    pending_command_buffers: Mutex<HashMap<CommandBufferId, wgpu::CommandBuffer>>,
    /// A thread-safe counter to generate unique command buffer IDs.
    command_buffer_id_counter: AtomicU64,
    last_submitted: AtomicU64,
    /// Raised by `on_submitted_work_done` callbacks during polling.
    completed: Arc<AtomicU64>,
}

/// A clonable, thread-safe handle to a wgpu device.
///
/// wgpu executes submissions in order on a single queue, so fences are
/// plain counters raised from `on_submitted_work_done`.
#[derive(Clone, Debug)]
pub struct WgpuDevice {
    internal: Arc<WgpuDeviceInternal>,
}

impl WgpuDevice {
    pub fn new(context: WgpuComputeContext) -> Self {
        Self {
            internal: Arc::new(WgpuDeviceInternal {
                context,
                buffers: Mutex::new(HashMap::new()),
                textures: Mutex::new(HashMap::new()),
                kernels: Mutex::new(KernelCache::default()),
                next_buffer_id: AtomicUsize::new(0),
                next_texture_id: AtomicUsize::new(0),
                vram_allocated_bytes: AtomicU64::new(0),
                vram_peak_bytes: AtomicU64::new(0),
                pending_command_buffers: Mutex::new(HashMap::new()),
                command_buffer_id_counter: AtomicU64::new(0),
                last_submitted: AtomicU64::new(0),
                completed: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Requests a headless device on the primary backends of the platform.
    pub async fn headless() -> anyhow::Result<Self> {
        let context = WgpuComputeContext::new_headless(wgpu::Backends::PRIMARY).await?;
        Ok(Self::new(context))
    }

    /// The underlying wgpu device.
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.internal.context.device
    }

    /// The underlying wgpu queue.
    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.internal.context.queue
    }

    /// Retrieves a reference-counted pointer to the internal wgpu buffer.
    /// Returns `None` if the ID is invalid.
    pub fn get_wgpu_buffer(&self, id: BufferId) -> Option<Arc<wgpu::Buffer>> {
        let buffers = self.internal.buffers.lock().ok()?;
        buffers.get(&id).map(|entry| Arc::clone(&entry.wgpu_buffer))
    }

    /// Retrieves a reference-counted pointer to the internal wgpu texture.
    pub fn get_wgpu_texture(&self, id: TextureId) -> Option<Arc<wgpu::Texture>> {
        let textures = self.internal.textures.lock().ok()?;
        textures.get(&id).map(|entry| Arc::clone(&entry.wgpu_texture))
    }

    /// Registers a texture the host created itself, for example a swapchain image,
    /// so it can be referenced by stylization passes.
    pub fn import_texture(
        &self,
        texture: wgpu::Texture,
        usage: TextureUsage,
    ) -> Result<TextureId, ResourceError> {
        let format = from_wgpu_texture_format(texture.format()).ok_or_else(|| {
            ResourceError::Unsupported(format!("{:?} cannot be imported", texture.format()))
        })?;
        let info = TextureInfo {
            size: Extent2D::new(texture.width(), texture.height()),
            format,
            usage,
        };
        let id = TextureId(self.internal.next_texture_id.fetch_add(1, Ordering::Relaxed));
        self.internal
            .textures
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (textures): {e}")))?
            .insert(
                id,
                WgpuTextureEntry {
                    wgpu_texture: Arc::new(texture),
                    info,
                    size: 0, // Owned by the host
                },
            );
        Ok(id)
    }

    pub(crate) fn kernel(&self, kind: KernelKind) -> Result<Arc<ComputeKernel>, ResourceError> {
        let mut kernels = self.internal.kernels.lock().map_err(|e| {
            ResourceError::BackendError(format!("Mutex poisoned (kernels): {e}"))
        })?;
        kernels.get_or_create(self.wgpu_device(), kind)
    }

    pub(crate) fn create_uniform_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.wgpu_device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    /// Uploads `values` into a new read-only storage buffer.
    pub fn create_storage_buffer_init(&self, label: &str, values: &[f32]) -> wgpu::Buffer {
        self.wgpu_device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(values),
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    /// (crate-internal) Registers a finished wgpu::CommandBuffer, storing it
    /// in a map and returning an abstract ID for it.
    pub(crate) fn register_command_buffer(&self, buffer: wgpu::CommandBuffer) -> CommandBufferId {
        let new_id = CommandBufferId(
            self.internal
                .command_buffer_id_counter
                .fetch_add(1, Ordering::SeqCst),
        );
        match self.internal.pending_command_buffers.lock() {
            Ok(mut guard) => {
                guard.insert(new_id, buffer);
            }
            Err(e) => log::error!("WgpuDevice: Mutex poisoned (pending_command_buffers): {e}"),
        }
        new_id
    }

    /// Copies a buffer into host memory, polling the device until the copy
    /// completes or `timeout` elapses. Intended for tests and tools.
    pub fn read_buffer_blocking(
        &self,
        id: BufferId,
        timeout: Duration,
    ) -> Result<Vec<u8>, ResourceError> {
        let source = self.get_wgpu_buffer(id).ok_or(ResourceError::NotFound)?;
        let size = source.size();
        let staging = self.wgpu_device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pastiche Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .wgpu_device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pastiche Readback"),
            });
        encoder.copy_buffer_to_buffer(&source, 0, &staging, 0, size);
        self.wgpu_queue().submit(std::iter::once(encoder.finish()));
        self.map_and_read(&staging, timeout)
    }

    /// Copies a texture into host memory as tightly packed rows.
    pub fn read_texture_blocking(
        &self,
        id: TextureId,
        timeout: Duration,
    ) -> Result<Vec<u8>, ResourceError> {
        let texture = self.get_wgpu_texture(id).ok_or(ResourceError::NotFound)?;
        let info = self.texture_info(id).ok_or(ResourceError::NotFound)?;
        let row = info.size.width * info.format.bytes_per_pixel();
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.wgpu_device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pastiche Texture Readback"),
            size: padded_row as u64 * info.size.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .wgpu_device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pastiche Texture Readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(info.size.height),
                },
            },
            info.size.into_wgpu(),
        );
        self.wgpu_queue().submit(std::iter::once(encoder.finish()));

        let padded = self.map_and_read(&staging, timeout)?;
        Ok(padded
            .chunks(padded_row as usize)
            .flat_map(|r| &r[..row as usize])
            .copied()
            .collect())
    }

    fn map_and_read(
        &self,
        staging: &wgpu::Buffer,
        timeout: Duration,
    ) -> Result<Vec<u8>, ResourceError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            match rx.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    return Err(ResourceError::BackendError(format!("map failed: {e}")));
                }
                Err(_) if Instant::now() >= deadline => {
                    return Err(ResourceError::BackendError(
                        "timed out waiting for readback".to_string(),
                    ));
                }
                Err(_) => std::thread::sleep(Duration::from_millis(1)),
            }
        }

        let data = staging.slice(..).get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn track_allocation(&self, bytes: u64) {
        let now = self
            .internal
            .vram_allocated_bytes
            .fetch_add(bytes, Ordering::AcqRel)
            + bytes;
        self.internal.vram_peak_bytes.fetch_max(now, Ordering::AcqRel);
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let limit = self.internal.context.device_limits.max_buffer_size;
        if descriptor.size > limit {
            return Err(ResourceError::OutOfMemory {
                requested: descriptor.size,
                available: limit,
            });
        }
        let wgpu_buffer = self.wgpu_device().create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size,
            usage: descriptor.usage.into_wgpu(),
            mapped_at_creation: false,
        });

        let id = BufferId(self.internal.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        self.internal
            .buffers
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (buffers): {e}")))?
            .insert(
                id,
                WgpuBufferEntry {
                    wgpu_buffer: Arc::new(wgpu_buffer),
                    size: descriptor.size,
                },
            );
        self.track_allocation(descriptor.size);

        log::debug!(
            "WgpuDevice: Created buffer '{}' with ID: {:?} ({} bytes)",
            descriptor.label.as_deref().unwrap_or_default(),
            id,
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut buffers = self
            .internal
            .buffers
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (buffers): {e}")))?;
        let entry = buffers.remove(&id).ok_or(ResourceError::NotFound)?;
        self.internal
            .vram_allocated_bytes
            .fetch_sub(entry.size, Ordering::AcqRel);
        // wgpu keeps the allocation alive until submitted work referencing it completes.
        drop(entry);
        log::debug!("WgpuDevice: Destroyed buffer with ID: {id:?}");
        Ok(())
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        let buffers = self.internal.buffers.lock().ok()?;
        buffers.get(&id).map(|entry| entry.size)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let buffer = self.get_wgpu_buffer(id).ok_or(ResourceError::NotFound)?;
        if offset + data.len() as u64 > buffer.size() {
            return Err(ResourceError::OutOfBounds);
        }
        self.wgpu_queue().write_buffer(&buffer, offset, data);
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let wgpu_texture = self.wgpu_device().create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size.into_wgpu(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage: descriptor.usage.into_wgpu(),
            view_formats: &[],
        });
        let size = descriptor.size.area() * descriptor.format.bytes_per_pixel() as u64;
        let id = TextureId(self.internal.next_texture_id.fetch_add(1, Ordering::Relaxed));
        self.internal
            .textures
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (textures): {e}")))?
            .insert(
                id,
                WgpuTextureEntry {
                    wgpu_texture: Arc::new(wgpu_texture),
                    info: TextureInfo {
                        size: descriptor.size,
                        format: descriptor.format,
                        usage: descriptor.usage,
                    },
                    size,
                },
            );
        self.track_allocation(size);
        log::debug!(
            "WgpuDevice: Created texture '{}' with ID: {:?}",
            descriptor.label.as_deref().unwrap_or_default(),
            id
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let mut textures = self
            .internal
            .textures
            .lock()
            .map_err(|e| ResourceError::BackendError(format!("Mutex poisoned (textures): {e}")))?;
        let entry = textures.remove(&id).ok_or(ResourceError::NotFound)?;
        self.internal
            .vram_allocated_bytes
            .fetch_sub(entry.size, Ordering::AcqRel);
        log::debug!("WgpuDevice: Destroyed texture with ID: {id:?}");
        Ok(())
    }

    fn write_texture(&self, id: TextureId, data: &[u8]) -> Result<(), ResourceError> {
        let texture = self.get_wgpu_texture(id).ok_or(ResourceError::NotFound)?;
        let info = self.texture_info(id).ok_or(ResourceError::NotFound)?;
        let row = info.size.width * info.format.bytes_per_pixel();
        if data.len() as u64 != row as u64 * info.size.height as u64 {
            return Err(ResourceError::OutOfBounds);
        }
        self.wgpu_queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: None,
            },
            info.size.into_wgpu(),
        );
        Ok(())
    }

    fn texture_info(&self, id: TextureId) -> Option<TextureInfo> {
        let textures = self.internal.textures.lock().ok()?;
        textures.get(&id).map(|entry| entry.info)
    }

    fn create_command_encoder(&self, label: Option<&str>) -> Box<dyn CommandEncoder> {
        let encoder = self
            .wgpu_device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label });
        Box::new(WgpuCommandEncoder {
            encoder: Some(encoder), // Wrap in Option to be `take`n in finish()
            device: self.clone(),
        })
    }

    fn submit_command_buffer(
        &self,
        command_buffer: CommandBufferId,
    ) -> Result<FenceValue, ResourceError> {
        let buffer = self
            .internal
            .pending_command_buffers
            .lock()
            .map_err(|e| {
                ResourceError::BackendError(format!("Mutex poisoned (pending_command_buffers): {e}"))
            })?
            .remove(&command_buffer)
            .ok_or_else(|| {
                log::error!(
                    "Attempted to submit a CommandBufferId ({command_buffer:?}) that does not exist."
                );
                ResourceError::NotFound
            })?;

        let fence = FenceValue(self.internal.last_submitted.fetch_add(1, Ordering::AcqRel) + 1);
        self.wgpu_queue().submit(std::iter::once(buffer));
        let completed = Arc::clone(&self.internal.completed);
        self.wgpu_queue().on_submitted_work_done(move || {
            completed.fetch_max(fence.0, Ordering::AcqRel);
        });
        Ok(fence)
    }

    fn fence_status(&self, fence: FenceValue) -> FenceStatus {
        if self.internal.completed.load(Ordering::Acquire) >= fence.0 {
            FenceStatus::Signaled
        } else {
            FenceStatus::Pending
        }
    }

    fn poll(&self) {
        // PollType::Poll is non-blocking. It processes any completed work
        // but returns immediately if there is none.
        if let Err(e) = self.wgpu_device().poll(wgpu::PollType::Poll) {
            log::warn!("Failed to poll device (non-blocking): {:?}", e);
        }
    }

    fn get_adapter_info(&self) -> RendererAdapterInfo {
        let info = &self.internal.context.adapter_info;
        RendererAdapterInfo {
            name: info.name.clone(),
            backend_type: from_wgpu_backend(info.backend),
            device_type: from_wgpu_device_type(info.device_type),
        }
    }

    fn supports_feature(&self, _feature_name: &str) -> bool {
        // The kernels are compiled for f32 storage only, so `shader_f16`
        // is never reported even when the adapter has it.
        false
    }

    fn limits(&self) -> DeviceLimits {
        let limits = &self.internal.context.device_limits;
        DeviceLimits {
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size as u64,
        }
    }

    fn memory_report(&self) -> MemoryReport {
        MemoryReport {
            live_buffers: self.internal.buffers.lock().map(|b| b.len()).unwrap_or(0),
            live_textures: self.internal.textures.lock().map(|t| t.len()).unwrap_or(0),
            allocated_bytes: self.internal.vram_allocated_bytes.load(Ordering::Acquire),
            peak_bytes: self.internal.vram_peak_bytes.load(Ordering::Acquire),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
