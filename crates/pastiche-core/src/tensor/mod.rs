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

//! Tensor descriptions shared by the bridge, the session and the runtimes.
//!
//! Style-transfer networks consume a single image, so every tensor here is
//! rank 4 with a batch of one, in either NCHW or NHWC layout.

pub mod buffer;
pub mod format;
pub mod shape;

pub use self::buffer::{FrameTensorBuffer, TensorBufferState, TensorRole, TensorStateError};
pub use self::format::{ChannelOrder, PixelRange, Precision, TensorSpec};
pub use self::shape::{TensorLayout, TensorShape};
