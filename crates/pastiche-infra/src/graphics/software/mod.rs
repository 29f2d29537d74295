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

//! A CPU implementation of [`GraphicsDevice`](pastiche_core::gpu::GraphicsDevice).
//!
//! Textures are stored as linear `f32` RGBA texels and quantized on write
//! to match their format, so results agree with a GPU to within one 8-bit
//! step. Submissions execute in order, either immediately or on [`SoftwareDevice::poll`].

mod command;
mod device;
mod kernels;
mod storage;

pub use self::command::{HostTask, SoftwareCommandEncoder};
pub use self::device::{SoftwareDevice, SoftwareDeviceConfig, SoftwareStats};
pub use self::storage::{SoftwareResources, SoftwareTexture};
