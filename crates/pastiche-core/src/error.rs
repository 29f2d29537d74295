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

//! The pipeline's error taxonomy.
//!
//! Errors are split by how far they propagate. [`FormatMismatch`] and
//! [`InferenceError`] only cost the current frame its stylization.
//! [`LoadError`] and resource exhaustion fault the session.

use std::path::PathBuf;
use thiserror::Error;

use crate::gpu::{GraphicsBackendType, ResourceError, TextureFormat};
use crate::inference::ModelId;
use crate::math::{Extent2D, Rect};
use crate::tensor::Precision;

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The current frame is passed through unstylized; the session survives.
    PerFrame,
    /// The session is faulted until the host retries.
    Session,
}

/// A color resource is incompatible with the model's tensors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatMismatch {
    /// The texture has fewer color channels than the tensor needs.
    #[error("{resource} texture has {available} color channels, the model needs {required}")]
    MissingChannel {
        /// Which side of the bridge.
        resource: &'static str,
        /// Channels the texture provides.
        available: u32,
        /// Channels the tensor needs.
        required: u32,
    },
    /// The texture format carries no color data a tensor can use.
    #[error("{resource} texture format {format:?} has no usable color channels")]
    UnsupportedFormat {
        /// Which side of the bridge.
        resource: &'static str,
        /// The offending format.
        format: TextureFormat,
    },
    /// The destination cannot be written by a compute kernel.
    #[error("{resource} texture ({format:?}) is not writable from a compute kernel")]
    NotWritable {
        /// Which side of the bridge.
        resource: &'static str,
        /// The destination format.
        format: TextureFormat,
    },
    /// The source lacks the sampling usage.
    #[error("{resource} texture cannot be sampled")]
    NotSampleable {
        /// Which side of the bridge.
        resource: &'static str,
    },
    /// The region does not match the tensor's fixed spatial extent.
    #[error("{resource} region is {actual}, the model expects {expected}")]
    ExtentMismatch {
        /// Which side of the bridge.
        resource: &'static str,
        /// Tensor plane extent.
        expected: Extent2D,
        /// Region extent supplied by the host.
        actual: Extent2D,
    },
    /// The view rectangle covers no pixel.
    #[error("{resource} view rect is empty")]
    EmptyRegion {
        /// Which side of the bridge.
        resource: &'static str,
    },
    /// The view rectangle extends past the texture.
    #[error("{resource} view rect {region} exceeds the {texture} texture")]
    RegionOutOfBounds {
        /// Which side of the bridge.
        resource: &'static str,
        /// The requested region.
        region: Rect,
        /// Texture size.
        texture: Extent2D,
    },
    /// The texture id does not resolve to a live texture.
    #[error("{resource} texture is not alive")]
    MissingResource {
        /// Which side of the bridge.
        resource: &'static str,
    },
}

/// A model could not be loaded or activated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The model id is not known to the model provider.
    #[error("unknown model '{0}'")]
    UnknownModel(ModelId),
    /// The model file does not exist.
    #[error("model file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// The model file could not be parsed or initialized.
    #[error("invalid model: {0}")]
    InvalidModel(String),
    /// The network uses an operator the runtime cannot execute.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// A tensor shape is malformed.
    #[error("invalid tensor shape: {0}")]
    InvalidShape(String),
    /// The model's actual shape disagrees with the declared one.
    #[error("{tensor} shape mismatch: declared {declared}, model has {actual}")]
    ShapeMismatch {
        /// `"input"` or `"output"`.
        tensor: &'static str,
        /// Shape from the descriptor.
        declared: String,
        /// Shape reported by the runtime.
        actual: String,
    },
    /// No runtime is registered under the requested name.
    #[error("no inference runtime named '{0}'")]
    UnknownRuntime(String),
    /// The runtime cannot execute on the active graphics backend.
    #[error("runtime '{runtime}' is unavailable on the {backend} backend")]
    BackendUnavailable {
        /// Runtime name.
        runtime: String,
        /// Active backend.
        backend: GraphicsBackendType,
    },
    /// The device cannot run kernels at the requested precision.
    #[error("{0} tensors are not supported by this device")]
    UnsupportedPrecision(Precision),
    /// A tensor is larger than the device can bind.
    #[error("tensor needs {required} bytes, device binding limit is {limit}")]
    ExceedsDeviceLimits {
        /// Tensor size in bytes.
        required: u64,
        /// Device limit in bytes.
        limit: u64,
    },
    /// The background loader stopped before answering.
    #[error("model loader is not running")]
    LoaderUnavailable,
}

/// A single inference dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    /// The runtime rejected or failed to record the dispatch.
    #[error("inference dispatch failed: {0}")]
    Dispatch(String),
    /// The runtime does not know how to record into this encoder's backend.
    #[error("runtime '{runtime}' cannot record into this command encoder")]
    EncoderMismatch {
        /// Runtime name.
        runtime: String,
    },
    /// Tensor bindings disagree with the model's shapes.
    #[error("tensor binding mismatch: {0}")]
    Binding(String),
    /// No model is ready to run.
    #[error("no model is ready for inference")]
    NotReady,
    /// Every tensor pair the pool may hold is still used by an earlier
    /// submission, typically the last frames of a replaced model.
    #[error("all {0} tensor pair(s) are still in flight")]
    BuffersInFlight(usize),
}

/// Any failure of the stylization pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StylizeError {
    /// Resource/tensor shape or layout incompatible.
    #[error("format mismatch: {0}")]
    FormatMismatch(#[from] FormatMismatch),
    /// Model file invalid, unsupported operator or backend unavailable.
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    /// Transient dispatch failure.
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    /// GPU memory or backend capacity exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl StylizeError {
    /// How far the error propagates.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StylizeError::FormatMismatch(_) | StylizeError::Inference(_) => {
                ErrorSeverity::PerFrame
            }
            StylizeError::Load(_) | StylizeError::ResourceExhausted(_) => ErrorSeverity::Session,
        }
    }

    /// Short name of the error kind, for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            StylizeError::FormatMismatch(_) => "FormatMismatch",
            StylizeError::Load(_) => "LoadError",
            StylizeError::Inference(_) => "InferenceError",
            StylizeError::ResourceExhausted(_) => "ResourceExhausted",
        }
    }

    /// Wraps a failed tensor allocation. The pool cannot keep frames in
    /// flight without its buffers, so every allocation failure faults the session.
    pub fn from_allocation(error: ResourceError) -> Self {
        match error {
            ResourceError::OutOfMemory { .. } => StylizeError::ResourceExhausted(error.to_string()),
            other => StylizeError::ResourceExhausted(format!("allocation failed: {other}")),
        }
    }

    /// Classifies a recording failure for the named bridge side.
    pub fn from_recording(resource: &'static str, error: ResourceError) -> Self {
        match error {
            ResourceError::NotFound | ResourceError::InvalidHandle => {
                FormatMismatch::MissingResource { resource }.into()
            }
            ResourceError::OutOfMemory { .. } => StylizeError::ResourceExhausted(error.to_string()),
            other => InferenceError::Dispatch(format!("{resource}: {other}")).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_split() {
        let frame = StylizeError::from(FormatMismatch::EmptyRegion { resource: "source" });
        assert_eq!(frame.severity(), ErrorSeverity::PerFrame);
        let frame = StylizeError::from(InferenceError::NotReady);
        assert_eq!(frame.severity(), ErrorSeverity::PerFrame);
        let frame = StylizeError::from(InferenceError::BuffersInFlight(2));
        assert_eq!(frame.severity(), ErrorSeverity::PerFrame);
        let session = StylizeError::from(LoadError::UnknownRuntime("dml".into()));
        assert_eq!(session.severity(), ErrorSeverity::Session);
        assert_eq!(
            StylizeError::ResourceExhausted("vram".into()).severity(),
            ErrorSeverity::Session
        );
    }

    #[test]
    fn test_display_names_the_mismatch() {
        let err = StylizeError::from(FormatMismatch::ExtentMismatch {
            resource: "source",
            expected: Extent2D::new(256, 256),
            actual: Extent2D::new(1920, 1080),
        });
        assert_eq!(
            err.to_string(),
            "format mismatch: source region is 1920x1080, the model expects 256x256"
        );
        assert_eq!(err.kind(), "FormatMismatch");
    }

    #[test]
    fn test_recording_errors_are_classified() {
        assert!(matches!(
            StylizeError::from_recording("target", ResourceError::NotFound),
            StylizeError::FormatMismatch(FormatMismatch::MissingResource { resource: "target" })
        ));
        assert!(matches!(
            StylizeError::from_recording("tensor", ResourceError::BackendError("lost".into())),
            StylizeError::Inference(_)
        ));
        assert_eq!(
            StylizeError::from_allocation(ResourceError::OutOfMemory {
                requested: 8,
                available: 0
            })
            .severity(),
            ErrorSeverity::Session
        );
    }
}
