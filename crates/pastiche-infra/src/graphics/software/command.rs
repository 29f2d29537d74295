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

use super::device::SoftwareDevice;
use super::storage::SoftwareResources;
use crate::graphics::validation;
use pastiche_core::gpu::{
    CommandBufferId, CommandEncoder, DecodeTensorParams, EncodeTensorParams, FenceValue,
    ResampleParams, ResourceError, TextureId,
};
use pastiche_core::math::Rect;
use std::any::Any;
use std::fmt;

/// Work executed on the device timeline with access to every resource.
///
/// Inference runtimes record their forward pass as a host task.
pub type HostTask = Box<dyn FnOnce(&mut SoftwareResources) -> Result<(), String> + Send>;

pub(crate) enum SoftwareCommand {
    Encode(EncodeTensorParams),
    Decode(DecodeTensorParams),
    Resample(ResampleParams),
    Copy {
        source: TextureId,
        target: TextureId,
        region: Rect,
    },
    WaitFence(FenceValue),
    Host {
        label: String,
        task: HostTask,
    },
}

impl fmt::Debug for SoftwareCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(p) => f.debug_tuple("Encode").field(p).finish(),
            Self::Decode(p) => f.debug_tuple("Decode").field(p).finish(),
            Self::Resample(p) => f.debug_tuple("Resample").field(p).finish(),
            Self::Copy {
                source,
                target,
                region,
            } => f
                .debug_struct("Copy")
                .field("source", source)
                .field("target", target)
                .field("region", region)
                .finish(),
            Self::WaitFence(fence) => f.debug_tuple("WaitFence").field(fence).finish(),
            Self::Host { label, .. } => f.debug_struct("Host").field("label", label).finish(),
        }
    }
}

/// Records commands for a [`SoftwareDevice`].
#[derive(Debug)]
pub struct SoftwareCommandEncoder {
    device: SoftwareDevice,
    label: Option<String>,
    commands: Vec<SoftwareCommand>,
}

impl SoftwareCommandEncoder {
    pub(crate) fn new(device: SoftwareDevice, label: Option<&str>) -> Self {
        Self {
            device,
            label: label.map(str::to_owned),
            commands: Vec::new(),
        }
    }

    /// Records a task that runs, in order with the other commands, when the
    /// submission executes. An error is reported by the device and does not
    /// stop the remaining commands.
    pub fn record_host_task(
        &mut self,
        label: impl Into<String>,
        task: impl FnOnce(&mut SoftwareResources) -> Result<(), String> + Send + 'static,
    ) {
        self.commands.push(SoftwareCommand::Host {
            label: label.into(),
            task: Box::new(task),
        });
    }

    /// The device this encoder records for.
    pub fn device(&self) -> &SoftwareDevice {
        &self.device
    }

    /// Number of commands recorded so far.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

impl CommandEncoder for SoftwareCommandEncoder {
    fn encode_tensor(&mut self, params: &EncodeTensorParams) -> Result<(), ResourceError> {
        validation::check_encode(&self.device, params)?;
        self.commands.push(SoftwareCommand::Encode(*params));
        Ok(())
    }

    fn decode_tensor(&mut self, params: &DecodeTensorParams) -> Result<(), ResourceError> {
        validation::check_decode(&self.device, params)?;
        self.commands.push(SoftwareCommand::Decode(*params));
        Ok(())
    }

    fn resample_texture(&mut self, params: &ResampleParams) -> Result<(), ResourceError> {
        validation::check_resample(&self.device, params)?;
        self.commands.push(SoftwareCommand::Resample(*params));
        Ok(())
    }

    fn copy_texture(
        &mut self,
        source: TextureId,
        target: TextureId,
        region: Rect,
    ) -> Result<(), ResourceError> {
        validation::check_copy(&self.device, source, target, region)?;
        self.commands.push(SoftwareCommand::Copy {
            source,
            target,
            region,
        });
        Ok(())
    }

    fn wait_fence(&mut self, fence: FenceValue) {
        self.commands.push(SoftwareCommand::WaitFence(fence));
    }

    fn finish(self: Box<Self>) -> CommandBufferId {
        let this = *self;
        log::trace!(
            "SoftwareCommandEncoder {:?}: finished with {} commands",
            this.label,
            this.commands.len()
        );
        this.device.register_command_buffer(this.commands)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
