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

//! Acts as the **[A]gent** for stylization.
//!
//! The agent decides *when* a frame is stylized and with *which* model, and
//! delegates the pixel conversions to the bridge lanes and the forward pass to
//! an inference runtime. It owns:
//! - the [`InferenceSession`], which loads models on a background thread and
//!   swaps them only at frame boundaries,
//! - the [`FrameTensorPool`], one tensor pair per frame in flight,
//! - the [`FrameScheduler`], which adds the [`StylizationPass`] to each
//!   frame's render graph and reads back what it did.

mod loader;
mod pass;
mod pool;
mod scheduler;
mod session;

pub use loader::{load_model, LoadOutcome, ModelLoader};
pub use pass::*;
pub use pool::*;
pub use scheduler::*;
pub use session::*;
