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

//! Errors raised by graphics devices and command encoders.

use std::fmt;

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A resource could not be found for the given id.
    NotFound,
    /// The handle or ID used to reference a resource is invalid for this device.
    InvalidHandle,
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
    /// An attempt was made to access a resource out of its bounds.
    OutOfBounds,
    /// The allocation would exceed the device memory budget.
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: u64,
        /// Bytes the device can still hand out.
        available: u64,
    },
    /// The operation is not supported by this backend or format.
    Unsupported(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Out of device memory: requested {requested} bytes, {available} available."
            ),
            ResourceError::Unsupported(msg) => write!(f, "Unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        assert_eq!(
            ResourceError::NotFound.to_string(),
            "Resource not found with ID."
        );
        assert_eq!(
            ResourceError::BackendError("lost".into()).to_string(),
            "Backend-specific resource error: lost"
        );
        assert_eq!(
            ResourceError::OutOfMemory {
                requested: 64,
                available: 16
            }
            .to_string(),
            "Out of device memory: requested 64 bytes, 16 available."
        );
    }
}
