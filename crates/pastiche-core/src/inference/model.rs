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

//! Model identity and descriptors handed over by the model-loading subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::tensor::{ChannelOrder, PixelRange, Precision, TensorLayout};

/// Identifier of a style model, as chosen by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Creates an id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Where a model's weights come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// A model file whose format is owned by the runtime (for example `.onnx`).
    File(PathBuf),
    /// A single 1×1 convolution: `out[o] = sum_i weights[o * inputs + i] * in[i] + bias[o]`.
    Pointwise {
        /// Plane width the network is compiled for.
        width: u32,
        /// Plane height the network is compiled for.
        height: u32,
        /// Row-major `outputs × inputs` weight matrix.
        weights: Vec<f32>,
        /// One bias per output channel.
        bias: Vec<f32>,
    },
}

/// Everything needed to load a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier reported back in events.
    pub id: ModelId,
    /// Weights location.
    pub source: ModelSource,
    /// Preferred runtime; the configured default is used when absent.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Declared input dimensions in `layout` order; checked against the model at load.
    #[serde(default)]
    pub input_shape: Option<Vec<i64>>,
    /// Declared output dimensions in `layout` order.
    #[serde(default)]
    pub output_shape: Option<Vec<i64>>,
    /// Memory layout of both tensors.
    #[serde(default)]
    pub layout: TensorLayout,
    /// Tensor element precision.
    #[serde(default)]
    pub precision: Precision,
    /// Range the network expects its input in.
    #[serde(default = "default_input_range")]
    pub input_range: PixelRange,
    /// Range the network produces its output in.
    #[serde(default = "default_output_range")]
    pub output_range: PixelRange,
    /// Channel ordering of both tensors.
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

fn default_input_range() -> PixelRange {
    PixelRange::Unit
}

fn default_output_range() -> PixelRange {
    PixelRange::Byte
}

impl ModelDescriptor {
    fn with_source(id: impl Into<ModelId>, source: ModelSource) -> Self {
        Self {
            id: id.into(),
            source,
            runtime: None,
            input_shape: None,
            output_shape: None,
            layout: TensorLayout::Nchw,
            precision: Precision::F32,
            input_range: default_input_range(),
            output_range: default_output_range(),
            channel_order: ChannelOrder::Rgb,
        }
    }

    /// Describes a model stored in a file.
    pub fn from_file(id: impl Into<ModelId>, path: impl Into<PathBuf>) -> Self {
        Self::with_source(id, ModelSource::File(path.into()))
    }

    /// Describes a 1×1 convolution network of the given plane size.
    pub fn pointwise(
        id: impl Into<ModelId>,
        width: u32,
        height: u32,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> Self {
        let mut descriptor = Self::with_source(
            id,
            ModelSource::Pointwise {
                width,
                height,
                weights,
                bias,
            },
        );
        descriptor.runtime = Some("pointwise".to_owned());
        descriptor.output_range = PixelRange::Unit;
        descriptor
    }

    /// An RGB network whose output equals its input.
    pub fn identity(id: impl Into<ModelId>, width: u32, height: u32) -> Self {
        #[rustfmt::skip]
        let weights = vec![
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        ];
        Self::pointwise(id, width, height, weights, vec![0.0; 3])
    }

    /// Selects a runtime by name.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Sets the tensor precision.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the memory layout.
    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the input and output value ranges.
    pub fn with_ranges(mut self, input: PixelRange, output: PixelRange) -> Self {
        self.input_range = input;
        self.output_range = output;
        self
    }

    /// Sets the channel ordering.
    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    /// Declares the expected input shape.
    pub fn with_input_shape(mut self, dims: Vec<i64>) -> Self {
        self.input_shape = Some(dims);
        self
    }

    /// Declares the expected output shape.
    pub fn with_output_shape(mut self, dims: Vec<i64>) -> Self {
        self.output_shape = Some(dims);
        self
    }

    /// The model file, if the model lives on disk.
    pub fn file_path(&self) -> Option<&PathBuf> {
        match &self.source {
            ModelSource::File(path) => Some(path),
            ModelSource::Pointwise { .. } => None,
        }
    }
}

/// Resolves model ids to descriptors. Implemented by the host's asset system.
pub trait ModelProvider: Send + Sync {
    /// Returns the descriptor for `id`, or `None` if the id is unknown.
    fn resolve(&self, id: &ModelId) -> Option<ModelDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_descriptor() {
        let descriptor = ModelDescriptor::identity("id", 64, 32);
        assert_eq!(descriptor.runtime.as_deref(), Some("pointwise"));
        assert_eq!(descriptor.input_range, PixelRange::Unit);
        assert_eq!(descriptor.output_range, PixelRange::Unit);
        match descriptor.source {
            ModelSource::Pointwise { width, height, ref weights, ref bias } => {
                assert_eq!((width, height), (64, 32));
                assert_eq!(weights.len(), 9);
                assert_eq!(bias.len(), 3);
            }
            ModelSource::File(_) => panic!("identity must be pointwise"),
        }
    }

    #[test]
    fn test_file_descriptor_defaults_from_json() {
        let json = r#"{ "id": "mosaic", "source": { "File": "styles/mosaic.onnx" } }"#;
        let descriptor: ModelDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.id.as_str(), "mosaic");
        assert_eq!(descriptor.input_range, PixelRange::Unit);
        assert_eq!(descriptor.output_range, PixelRange::Byte);
        assert_eq!(descriptor.precision, Precision::F32);
        assert_eq!(
            descriptor.file_path().map(|p| p.to_string_lossy().into_owned()),
            Some("styles/mosaic.onnx".to_owned())
        );
    }
}
