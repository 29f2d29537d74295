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

//! Per-frame tensor buffers and their lifecycle.

use std::fmt;

use super::format::Precision;
use super::shape::TensorShape;
use crate::gpu::{BufferId, TensorView};

/// Which side of the network a buffer feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// Written by the pack step, read by inference.
    Input,
    /// Written by inference, read by the unpack step.
    Output,
}

/// Where a frame's tensor buffer is in the pack → infer → unpack sequence.
///
/// States track recorded work: a buffer is `PackedFromFrame` once the pack
/// command has been recorded, even if the GPU has not executed it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TensorBufferState {
    /// Holds nothing meaningful for the current frame.
    #[default]
    Uninitialized,
    /// Input buffer holding the packed color target.
    PackedFromFrame,
    /// Output buffer holding the network's result.
    InferenceComplete,
    /// Output buffer whose contents have been written back to a color target.
    UnpackedToFrame,
}

/// A transition not allowed for the buffer's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorStateError {
    /// Role of the buffer.
    pub role: TensorRole,
    /// State the buffer was in.
    pub from: TensorBufferState,
    /// State that was requested.
    pub to: TensorBufferState,
}

impl fmt::Display for TensorStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} tensor buffer cannot move from {:?} to {:?}",
            self.role, self.from, self.to
        )
    }
}

impl std::error::Error for TensorStateError {}

/// A GPU buffer holding one frame's pixels in tensor layout.
///
/// The buffer memory is owned by the frame tensor pool; this struct is the
/// bookkeeping record the scheduler moves through the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTensorBuffer {
    buffer: BufferId,
    role: TensorRole,
    shape: TensorShape,
    precision: Precision,
    state: TensorBufferState,
}

impl FrameTensorBuffer {
    /// Wraps a freshly allocated buffer.
    pub fn new(buffer: BufferId, role: TensorRole, shape: TensorShape, precision: Precision) -> Self {
        Self {
            buffer,
            role,
            shape,
            precision,
            state: TensorBufferState::Uninitialized,
        }
    }

    /// The backing memory handle.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Input or output.
    pub fn role(&self) -> TensorRole {
        self.role
    }

    /// Logical dimensions.
    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    /// Element precision.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Bytes between consecutive rows of one channel.
    pub fn stride(&self) -> u64 {
        self.shape.row_stride(self.precision)
    }

    /// Total size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.shape.byte_size(self.precision)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TensorBufferState {
        self.state
    }

    /// A view suitable for kernel and inference bindings.
    pub fn view(&self) -> TensorView {
        TensorView {
            buffer: self.buffer,
            shape: self.shape,
            precision: self.precision,
        }
    }

    /// Moves to `to` if the transition is valid for the buffer's role.
    ///
    /// Inputs go `Uninitialized → PackedFromFrame`. Outputs go
    /// `Uninitialized → InferenceComplete → UnpackedToFrame`.
    pub fn transition(&mut self, to: TensorBufferState) -> Result<(), TensorStateError> {
        use TensorBufferState::*;
        let allowed = matches!(
            (self.role, self.state, to),
            (TensorRole::Input, Uninitialized, PackedFromFrame)
                | (TensorRole::Output, Uninitialized, InferenceComplete)
                | (TensorRole::Output, InferenceComplete, UnpackedToFrame)
        );
        if !allowed {
            return Err(TensorStateError {
                role: self.role,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Returns the buffer to `Uninitialized` for reuse by a later frame.
    pub fn reset(&mut self) {
        self.state = TensorBufferState::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(role: TensorRole) -> FrameTensorBuffer {
        FrameTensorBuffer::new(BufferId(7), role, TensorShape::nchw(3, 4, 4), Precision::F32)
    }

    #[test]
    fn test_input_lifecycle() {
        let mut input = buffer(TensorRole::Input);
        input.transition(TensorBufferState::PackedFromFrame).unwrap();
        assert!(input
            .transition(TensorBufferState::InferenceComplete)
            .is_err());
        input.reset();
        assert_eq!(input.state(), TensorBufferState::Uninitialized);
    }

    #[test]
    fn test_output_lifecycle_is_ordered() {
        let mut output = buffer(TensorRole::Output);
        let err = output
            .transition(TensorBufferState::UnpackedToFrame)
            .unwrap_err();
        assert_eq!(err.from, TensorBufferState::Uninitialized);
        output.transition(TensorBufferState::InferenceComplete).unwrap();
        output.transition(TensorBufferState::UnpackedToFrame).unwrap();
        assert_eq!(output.state(), TensorBufferState::UnpackedToFrame);
    }

    #[test]
    fn test_geometry() {
        let input = buffer(TensorRole::Input);
        assert_eq!(input.size_bytes(), 3 * 4 * 4 * 4);
        assert_eq!(input.stride(), 16);
        assert_eq!(input.view().buffer, BufferId(7));
    }
}
