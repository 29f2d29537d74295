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

//! Pipeline-level state and the events reported to the host.

use std::fmt;

use crate::error::StylizeError;
use crate::inference::ModelId;
use crate::tensor::TensorShape;

/// Lifecycle of a stylization pipeline, as seen by the host.
///
/// The frame scheduler only inserts the stylization pass while the state is
/// [`Ready`](PipelineState::Ready) or [`Running`](PipelineState::Running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// Stylization is off; loaded resources may still be resident.
    #[default]
    Disabled,
    /// A model is being loaded in the background.
    Loading,
    /// A model is active and no stylized frame is in flight.
    Ready,
    /// At least one stylized frame has been submitted and not yet completed.
    Running,
    /// A session-level failure occurred; an explicit retry is required.
    Faulted,
}

impl PipelineState {
    /// Whether the scheduler inserts the stylization pass in this state.
    pub fn schedules_pass(self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::Running)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status reported to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The pipeline moved between states.
    StateChanged {
        /// Previous state.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },
    /// A model became the active model.
    ModelActivated {
        /// The model's id.
        id: ModelId,
        /// Resolved input shape.
        input: TensorShape,
        /// Resolved output shape.
        output: TensorShape,
    },
    /// One frame was passed through unstylized.
    FrameSkipped {
        /// The frame that was skipped.
        frame_index: u64,
        /// Why.
        error: StylizeError,
    },
    /// The session faulted.
    Fault {
        /// The session-level error.
        error: StylizeError,
    },
    /// Informational message for diagnostics.
    Notice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ready_and_running_schedule_the_pass() {
        assert!(PipelineState::Ready.schedules_pass());
        assert!(PipelineState::Running.schedules_pass());
        for state in [
            PipelineState::Disabled,
            PipelineState::Loading,
            PipelineState::Faulted,
        ] {
            assert!(!state.schedules_pass(), "{state} must not schedule");
        }
    }
}
