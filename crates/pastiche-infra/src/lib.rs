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

//! # Pastiche Infra
//!
//! Concrete implementations of the contracts declared in `pastiche-core`:
//! graphics devices, inference runtimes and model file watching.

pub mod graphics;
pub mod inference;
pub mod io;

pub use graphics::software::{SoftwareDevice, SoftwareDeviceConfig};
#[cfg(feature = "graphics")]
pub use graphics::wgpu::WgpuDevice;
pub use inference::pointwise::{FaultInjector, PointwiseRuntime};
#[cfg(feature = "onnx")]
pub use inference::onnx::OnnxRuntime;
pub use io::watcher::ModelWatcher;
