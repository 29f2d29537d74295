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

//! Completion signals for submitted GPU work.

use std::fmt;

/// A monotonically increasing value identifying one queue submission.
///
/// A fence is signaled once the GPU has finished every command submitted up
/// to and including the submission that produced it. Later fences compare
/// greater than earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceValue(pub u64);

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence#{}", self.0)
    }
}

/// Whether the GPU has reached a [`FenceValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The work is still queued or executing.
    Pending,
    /// All work up to the fence has completed.
    Signaled,
}

impl FenceStatus {
    /// Returns `true` if the fence has been reached.
    pub fn is_signaled(self) -> bool {
        self == FenceStatus::Signaled
    }
}
