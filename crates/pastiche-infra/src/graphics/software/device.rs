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

use super::command::{SoftwareCommand, SoftwareCommandEncoder};
use super::kernels;
use super::storage::{texels_from_bytes, SoftwareResources, SoftwareTexture};
use pastiche_core::gpu::{
    BufferDescriptor, BufferId, CommandBufferId, CommandEncoder, DeviceLimits, FenceStatus,
    FenceValue, GraphicsBackendType, GraphicsDevice, MemoryReport, RendererAdapterInfo,
    RendererDeviceType, ResourceError, TensorView, TextureDescriptor, TextureId, TextureInfo,
    FEATURE_SHADER_F16,
};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Behaviour knobs of a [`SoftwareDevice`].
#[derive(Debug, Clone)]
pub struct SoftwareDeviceConfig {
    /// Adapter name reported to callers.
    pub name: String,
    /// Executes every submission as soon as it is submitted. When `false`,
    /// work stays pending until [`GraphicsDevice::poll`] or [`SoftwareDevice::step`].
    pub execute_on_submit: bool,
    /// Total bytes the device may allocate, or `None` for no limit.
    pub memory_budget: Option<u64>,
    /// Whether `shader_f16` is reported as supported.
    pub shader_f16: bool,
    /// Reported limits.
    pub limits: DeviceLimits,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Pastiche Software Device".to_string(),
            execute_on_submit: true,
            memory_budget: None,
            shader_f16: true,
            limits: DeviceLimits::default(),
        }
    }
}

impl SoftwareDeviceConfig {
    /// Leaves submissions pending until the device is polled.
    pub fn deferred(mut self) -> Self {
        self.execute_on_submit = false;
        self
    }

    /// Caps the total allocation size.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Reports `shader_f16` as unsupported.
    pub fn without_f16(mut self) -> Self {
        self.shader_f16 = false;
        self
    }

    /// Overrides the reported limits.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Counters describing the work a [`SoftwareDevice`] has executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    /// Command buffers submitted.
    pub submissions: u64,
    /// Commands executed, across all submissions.
    pub executed_commands: u64,
    /// Fence waits executed.
    pub fence_waits: u64,
    /// Host tasks executed.
    pub host_tasks: u64,
    /// Commands that failed while executing.
    pub execution_errors: u64,
}

#[derive(Debug)]
struct Submission {
    fence: FenceValue,
    commands: Vec<SoftwareCommand>,
}

#[derive(Debug)]
struct SoftwareDeviceInternal {
    config: SoftwareDeviceConfig,
    resources: Mutex<SoftwareResources>,
    /// Command buffers that have been finished but not yet submitted.
    recorded: Mutex<HashMap<CommandBufferId, Vec<SoftwareCommand>>>,
    queue: Mutex<VecDeque<Submission>>,
    stats: Mutex<SoftwareStats>,

    next_buffer_id: AtomicUsize,
    next_texture_id: AtomicUsize,
    command_buffer_id_counter: AtomicU64,
    last_submitted: AtomicU64,
    completed: AtomicU64,

    allocated_bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

/// A clonable handle to a CPU graphics device.
///
/// Clones share the same resources and queue.
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    internal: Arc<SoftwareDeviceInternal>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new(SoftwareDeviceConfig::default())
    }
}

impl SoftwareDevice {
    /// Creates a device with the given configuration.
    pub fn new(config: SoftwareDeviceConfig) -> Self {
        log::info!(
            "SoftwareDevice: created '{}' (execute_on_submit: {}, budget: {:?})",
            config.name,
            config.execute_on_submit,
            config.memory_budget
        );
        Self {
            internal: Arc::new(SoftwareDeviceInternal {
                config,
                resources: Mutex::new(SoftwareResources::default()),
                recorded: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                stats: Mutex::new(SoftwareStats::default()),
                next_buffer_id: AtomicUsize::new(0),
                next_texture_id: AtomicUsize::new(0),
                command_buffer_id_counter: AtomicU64::new(0),
                last_submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                allocated_bytes: AtomicU64::new(0),
                peak_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration the device was created with.
    pub fn config(&self) -> &SoftwareDeviceConfig {
        &self.internal.config
    }

    /// Counters of executed work.
    pub fn stats(&self) -> SoftwareStats {
        *lock(&self.internal.stats)
    }

    /// Number of submitted command buffers that have not executed yet.
    pub fn pending_submissions(&self) -> usize {
        lock(&self.internal.queue).len()
    }

    /// The most recently submitted fence.
    pub fn last_submitted_fence(&self) -> FenceValue {
        FenceValue(self.internal.last_submitted.load(Ordering::Acquire))
    }

    /// Executes the oldest pending submission and returns its fence.
    pub fn step(&self) -> Option<FenceValue> {
        let submission = lock(&self.internal.queue).pop_front()?;
        let fence = submission.fence;
        self.execute(submission);
        Some(fence)
    }

    /// Runs `f` with read access to every resource.
    pub fn with_resources<R>(&self, f: impl FnOnce(&SoftwareResources) -> R) -> R {
        f(&lock(&self.internal.resources))
    }

    /// Linear RGBA texels of a texture, row-major.
    pub fn read_texels(&self, id: TextureId) -> Option<Vec<[f32; 4]>> {
        self.with_resources(|res| res.texture(id).map(|t| t.texels().to_vec()))
    }

    /// Overwrites a texture with linear RGBA texels, quantized to its format.
    pub fn write_texels(&self, id: TextureId, texels: &[[f32; 4]]) -> Result<(), ResourceError> {
        let mut resources = lock(&self.internal.resources);
        let texture = resources.texture_mut(id).ok_or(ResourceError::NotFound)?;
        if texels.len() != texture.texels.len() {
            return Err(ResourceError::OutOfBounds);
        }
        let width = texture.info.size.width;
        for (i, texel) in texels.iter().enumerate() {
            texture.store(i as u32 % width, i as u32 / width, *texel);
        }
        Ok(())
    }

    /// Decodes a tensor stored in one of the device's buffers.
    pub fn read_tensor(&self, view: &TensorView) -> Result<Vec<f32>, ResourceError> {
        self.with_resources(|res| res.read_tensor(view))
            .map_err(ResourceError::BackendError)
    }

    pub(crate) fn register_command_buffer(&self, commands: Vec<SoftwareCommand>) -> CommandBufferId {
        let id = CommandBufferId(
            self.internal
                .command_buffer_id_counter
                .fetch_add(1, Ordering::SeqCst),
        );
        lock(&self.internal.recorded).insert(id, commands);
        id
    }

    fn reserve(&self, bytes: u64) -> Result<(), ResourceError> {
        let allocated = &self.internal.allocated_bytes;
        if let Some(budget) = self.internal.config.memory_budget {
            let current = allocated.load(Ordering::Acquire);
            if current + bytes > budget {
                log::warn!(
                    "SoftwareDevice: allocation of {bytes} bytes exceeds budget ({current}/{budget} used)"
                );
                return Err(ResourceError::OutOfMemory {
                    requested: bytes,
                    available: budget.saturating_sub(current),
                });
            }
        }
        let now = allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.internal.peak_bytes.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self, bytes: u64) {
        self.internal
            .allocated_bytes
            .fetch_sub(bytes, Ordering::AcqRel);
    }

    fn drain(&self) {
        while self.step().is_some() {}
    }

    fn execute(&self, submission: Submission) {
        let Submission { fence, commands } = submission;
        let mut resources = lock(&self.internal.resources);
        let mut delta = SoftwareStats::default();

        for command in commands {
            delta.executed_commands += 1;
            let result = match command {
                SoftwareCommand::Encode(params) => kernels::encode_tensor(&mut resources, &params),
                SoftwareCommand::Decode(params) => kernels::decode_tensor(&mut resources, &params),
                SoftwareCommand::Resample(params) => {
                    kernels::resample_texture(&mut resources, &params)
                }
                SoftwareCommand::Copy {
                    source,
                    target,
                    region,
                } => kernels::copy_texture(&mut resources, source, target, region),
                SoftwareCommand::WaitFence(wait) => {
                    delta.fence_waits += 1;
                    // Earlier submissions have all executed by now.
                    if wait >= fence {
                        Err(format!("{fence} waits on {wait}, which cannot signal first"))
                    } else {
                        Ok(())
                    }
                }
                SoftwareCommand::Host { label, task } => {
                    delta.host_tasks += 1;
                    task(&mut resources).map_err(|e| format!("host task '{label}': {e}"))
                }
            };
            if let Err(e) = result {
                log::error!("SoftwareDevice: command in {fence} failed: {e}");
                delta.execution_errors += 1;
            }
        }
        drop(resources);

        self.internal.completed.fetch_max(fence.0, Ordering::AcqRel);
        let mut stats = lock(&self.internal.stats);
        stats.executed_commands += delta.executed_commands;
        stats.fence_waits += delta.fence_waits;
        stats.host_tasks += delta.host_tasks;
        stats.execution_errors += delta.execution_errors;
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        self.reserve(descriptor.size)?;
        let id = BufferId(self.internal.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.internal.resources)
            .buffers
            .insert(id, vec![0; descriptor.size as usize]);
        log::debug!(
            "SoftwareDevice: created buffer {:?} '{}' ({} bytes)",
            id,
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let removed = lock(&self.internal.resources).buffers.remove(&id);
        let bytes = removed.ok_or(ResourceError::NotFound)?;
        self.release(bytes.len() as u64);
        log::debug!("SoftwareDevice: destroyed buffer {id:?}");
        Ok(())
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.with_resources(|res| res.buffer(id).map(|b| b.len() as u64))
    }

    /// Applied immediately, ahead of any pending submission.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut resources = lock(&self.internal.resources);
        let buffer = resources.buffers.get_mut(&id).ok_or(ResourceError::NotFound)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.len() {
            return Err(ResourceError::OutOfBounds);
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let limit = self.internal.config.limits.max_texture_dimension_2d;
        if descriptor.size.is_empty()
            || descriptor.size.width > limit
            || descriptor.size.height > limit
        {
            return Err(ResourceError::Unsupported(format!(
                "texture size {} (limit {limit})",
                descriptor.size
            )));
        }
        let bytes = descriptor.size.area() * descriptor.format.bytes_per_pixel() as u64;
        self.reserve(bytes)?;
        let id = TextureId(self.internal.next_texture_id.fetch_add(1, Ordering::Relaxed));
        let info = TextureInfo {
            size: descriptor.size,
            format: descriptor.format,
            usage: descriptor.usage,
        };
        lock(&self.internal.resources)
            .textures
            .insert(id, SoftwareTexture::new(info));
        log::debug!(
            "SoftwareDevice: created texture {:?} '{}' ({} {:?})",
            id,
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let removed = lock(&self.internal.resources).textures.remove(&id);
        let texture = removed.ok_or(ResourceError::NotFound)?;
        self.release(texture.info.size.area() * texture.info.format.bytes_per_pixel() as u64);
        log::debug!("SoftwareDevice: destroyed texture {id:?}");
        Ok(())
    }

    fn write_texture(&self, id: TextureId, data: &[u8]) -> Result<(), ResourceError> {
        let mut resources = lock(&self.internal.resources);
        let texture = resources.texture_mut(id).ok_or(ResourceError::NotFound)?;
        let info = texture.info;
        if data.len() as u64 != info.size.area() * info.format.bytes_per_pixel() as u64 {
            return Err(ResourceError::OutOfBounds);
        }
        let texels = texels_from_bytes(info.format, data).map_err(ResourceError::Unsupported)?;
        for (i, texel) in texels.into_iter().enumerate() {
            texture.store(i as u32 % info.size.width, i as u32 / info.size.width, texel);
        }
        Ok(())
    }

    fn texture_info(&self, id: TextureId) -> Option<TextureInfo> {
        self.with_resources(|res| res.texture(id).map(SoftwareTexture::info))
    }

    fn create_command_encoder(&self, label: Option<&str>) -> Box<dyn CommandEncoder> {
        Box::new(SoftwareCommandEncoder::new(self.clone(), label))
    }

    fn submit_command_buffer(
        &self,
        command_buffer: CommandBufferId,
    ) -> Result<FenceValue, ResourceError> {
        let commands = lock(&self.internal.recorded)
            .remove(&command_buffer)
            .ok_or(ResourceError::NotFound)?;
        let fence = {
            // Fence allocation and enqueueing happen under one lock so the
            // queue stays ordered by fence value.
            let mut queue = lock(&self.internal.queue);
            let fence = FenceValue(self.internal.last_submitted.fetch_add(1, Ordering::AcqRel) + 1);
            queue.push_back(Submission { fence, commands });
            fence
        };
        lock(&self.internal.stats).submissions += 1;

        if self.internal.config.execute_on_submit {
            self.drain();
        }
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
        self.drain();
    }

    fn get_adapter_info(&self) -> RendererAdapterInfo {
        RendererAdapterInfo {
            name: self.internal.config.name.clone(),
            backend_type: GraphicsBackendType::Software,
            device_type: RendererDeviceType::Cpu,
        }
    }

    fn supports_feature(&self, feature_name: &str) -> bool {
        feature_name == FEATURE_SHADER_F16 && self.internal.config.shader_f16
    }

    fn limits(&self) -> DeviceLimits {
        self.internal.config.limits
    }

    fn memory_report(&self) -> MemoryReport {
        let (live_buffers, live_textures) =
            self.with_resources(|res| (res.buffers.len(), res.textures.len()));
        MemoryReport {
            live_buffers,
            live_textures,
            allocated_bytes: self.internal.allocated_bytes.load(Ordering::Acquire),
            peak_bytes: self.internal.peak_bytes.load(Ordering::Acquire),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastiche_core::gpu::{BufferUsage, TextureFormat, TextureUsage};
    use pastiche_core::math::{Extent2D, Rect};

    fn texture_desc(w: u32, h: u32, usage: TextureUsage) -> TextureDescriptor<'static> {
        TextureDescriptor {
            label: None,
            size: Extent2D::new(w, h),
            format: TextureFormat::Rgba8Unorm,
            usage,
        }
    }

    #[test]
    fn test_memory_budget_is_enforced() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig::default().with_memory_budget(100));
        let desc = BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::TENSOR,
        };
        let first = device.create_buffer(&desc).unwrap();
        let err = device.create_buffer(&desc).unwrap_err();
        assert_eq!(
            err,
            ResourceError::OutOfMemory {
                requested: 64,
                available: 36
            }
        );
        device.destroy_buffer(first).unwrap();
        assert!(device.create_buffer(&desc).is_ok());
        assert_eq!(device.memory_report().peak_bytes, 64);
    }

    #[test]
    fn test_deferred_submissions_signal_on_poll() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig::default().deferred());
        let encoder = device.create_command_encoder(Some("frame"));
        let fence = device.submit_command_buffer(encoder.finish()).unwrap();
        assert_eq!(fence, FenceValue(1));
        assert_eq!(device.fence_status(fence), FenceStatus::Pending);
        assert_eq!(device.pending_submissions(), 1);

        device.poll();
        assert!(device.fence_status(fence).is_signaled());
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_waiting_on_own_fence_is_an_execution_error() {
        let device = SoftwareDevice::default();
        let mut encoder = device.create_command_encoder(None);
        encoder.wait_fence(FenceValue(0));
        encoder.wait_fence(FenceValue(1));
        device.submit_command_buffer(encoder.finish()).unwrap();
        let stats = device.stats();
        assert_eq!(stats.fence_waits, 2);
        assert_eq!(stats.execution_errors, 1);
    }

    #[test]
    fn test_submitting_unknown_command_buffer_fails() {
        let device = SoftwareDevice::default();
        assert_eq!(
            device.submit_command_buffer(CommandBufferId(42)),
            Err(ResourceError::NotFound)
        );
    }

    #[test]
    fn test_copy_texture_round_trip_through_bytes() {
        let device = SoftwareDevice::default();
        let src = device
            .create_texture(&texture_desc(2, 1, TextureUsage::COPY_SRC))
            .unwrap();
        let dst = device
            .create_texture(&texture_desc(2, 1, TextureUsage::COPY_DST))
            .unwrap();
        device
            .write_texture(src, &[255, 0, 0, 255, 0, 255, 0, 255])
            .unwrap();
        assert_eq!(
            device.write_texture(src, &[0; 4]),
            Err(ResourceError::OutOfBounds)
        );

        let mut encoder = device.create_command_encoder(None);
        encoder.copy_texture(src, dst, Rect::new(0, 0, 2, 1)).unwrap();
        device.submit_command_buffer(encoder.finish()).unwrap();

        let texels = device.read_texels(dst).unwrap();
        assert_eq!(texels, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_recording_rejects_missing_resources() {
        let device = SoftwareDevice::default();
        let dst = device
            .create_texture(&texture_desc(2, 1, TextureUsage::COPY_DST))
            .unwrap();
        let mut encoder = device.create_command_encoder(None);
        let err = encoder
            .copy_texture(TextureId(99), dst, Rect::new(0, 0, 1, 1))
            .unwrap_err();
        assert_eq!(err, ResourceError::NotFound);
    }

    #[test]
    fn test_f16_feature_follows_config() {
        assert!(SoftwareDevice::default().supports_feature(FEATURE_SHADER_F16));
        let device = SoftwareDevice::new(SoftwareDeviceConfig::default().without_f16());
        assert!(!device.supports_feature(FEATURE_SHADER_F16));
        assert!(!device.supports_feature("ray_tracing"));
    }
}
