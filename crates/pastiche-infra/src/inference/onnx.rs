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

//! ONNX models through ONNX Runtime.
//!
//! Sessions run on the CPU, so models are only offered on the software
//! device, whose tensors already live in host memory.

use crate::graphics::software::SoftwareCommandEncoder;
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session, ValueType};
use pastiche_core::gpu::{CommandEncoder, GraphicsBackendType, TensorView};
use pastiche_core::inference::{
    DeviceCapabilities, InferenceRuntime, ModelDescriptor, ModelInstance, ModelSource,
};
use pastiche_core::tensor::{Precision, TensorLayout, TensorShape};
use pastiche_core::{InferenceError, LoadError};
use std::path::Path;
use std::sync::Arc;

/// Registry name of [`OnnxRuntime`].
pub const ONNX_RUNTIME: &str = "onnx";

/// Loads `.onnx` files with ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OnnxRuntime {
    intra_threads: usize,
}

impl Default for OnnxRuntime {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

impl OnnxRuntime {
    /// Creates the runtime with full graph optimization.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of threads a session may use per operator.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    fn open(&self, path: &Path) -> Result<Session, LoadError> {
        if !path.exists() {
            return Err(LoadError::MissingFile(path.to_path_buf()));
        }
        let invalid = |e: ort::Error| LoadError::InvalidModel(format!("{}: {e}", path.display()));
        Session::builder()
            .map_err(invalid)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(invalid)?
            .with_intra_threads(self.intra_threads)
            .map_err(invalid)?
            .commit_from_file(path)
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("NOT_IMPLEMENTED") || message.contains("not implemented") {
                    LoadError::UnsupportedOperator(message)
                } else {
                    invalid(e)
                }
            })
    }
}

/// Resolves a model's tensor dimensions, filling dynamic axes from the
/// dimensions declared in the descriptor when there are any.
fn resolve_dims(
    reported: &ValueType,
    declared: Option<&Vec<i64>>,
    layout: TensorLayout,
    tensor: &str,
) -> Result<TensorShape, LoadError> {
    let ValueType::Tensor { dimensions, .. } = reported else {
        return Err(LoadError::InvalidModel(format!("{tensor} is not a tensor")));
    };
    let mut dims = dimensions.clone();
    if let Some(declared) = declared.filter(|d| d.len() == dims.len()) {
        for (dim, hint) in dims.iter_mut().zip(declared) {
            if *dim <= 0 {
                *dim = *hint;
            }
        }
    }
    TensorShape::from_dims(&dims, layout)
}

impl InferenceRuntime for OnnxRuntime {
    fn name(&self) -> &str {
        ONNX_RUNTIME
    }

    fn supports_backend(&self, backend: GraphicsBackendType) -> bool {
        backend == GraphicsBackendType::Software
    }

    fn create_model(
        &self,
        descriptor: &ModelDescriptor,
        _capabilities: &DeviceCapabilities,
    ) -> Result<Box<dyn ModelInstance>, LoadError> {
        let ModelSource::File(path) = &descriptor.source else {
            return Err(LoadError::InvalidModel(format!(
                "'{}' is not an ONNX file",
                descriptor.id
            )));
        };
        let session = self.open(path)?;
        if session.inputs.len() != 1 || session.outputs.len() != 1 {
            return Err(LoadError::InvalidModel(format!(
                "expected one input and one output, model has {} and {}",
                session.inputs.len(),
                session.outputs.len()
            )));
        }

        let input = resolve_dims(
            &session.inputs[0].input_type,
            descriptor.input_shape.as_ref(),
            descriptor.layout,
            "input",
        )?;
        let output = resolve_dims(
            &session.outputs[0].output_type,
            descriptor.output_shape.as_ref(),
            descriptor.layout,
            "output",
        )?;
        log::info!(
            "OnnxRuntime: opened {} (input {input}, output {output})",
            path.display()
        );

        Ok(Box::new(OnnxModel {
            session: Arc::new(session),
            input,
            output,
        }))
    }
}

struct OnnxModel {
    session: Arc<Session>,
    input: TensorShape,
    output: TensorShape,
}

fn run_session(session: &Session, input: &TensorShape, data: Vec<f32>) -> Result<Vec<f32>, String> {
    let [n, a, b, c] = input.dims().map(|d| d as usize);
    let array = Array4::from_shape_vec((n, a, b, c), data).map_err(|e| e.to_string())?;
    let inputs = ort::inputs![array].map_err(|e| e.to_string())?;
    let outputs = session.run(inputs).map_err(|e| e.to_string())?;
    let tensor = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| e.to_string())?;
    Ok(tensor.iter().copied().collect())
}

impl ModelInstance for OnnxModel {
    fn input_shape(&self) -> TensorShape {
        self.input
    }

    fn output_shape(&self) -> TensorShape {
        self.output
    }

    fn enqueue(
        &mut self,
        encoder: &mut dyn CommandEncoder,
        input: &TensorView,
        output: &TensorView,
    ) -> Result<(), InferenceError> {
        if input.shape != self.input || output.shape != self.output {
            return Err(InferenceError::Binding(format!(
                "bound {} -> {}, model is {} -> {}",
                input.shape, output.shape, self.input, self.output
            )));
        }
        if input.precision != Precision::F32 && input.precision != Precision::F16 {
            return Err(InferenceError::Binding(format!("{} input", input.precision)));
        }
        let Some(software) = encoder.as_any_mut().downcast_mut::<SoftwareCommandEncoder>() else {
            return Err(InferenceError::EncoderMismatch {
                runtime: ONNX_RUNTIME.to_string(),
            });
        };

        let (input, output) = (*input, *output);
        let session = Arc::clone(&self.session);
        software.record_host_task(ONNX_RUNTIME, move |resources| {
            let data = resources.read_tensor(&input)?;
            let result = run_session(&session, &input.shape, data)?;
            if result.len() as u64 != output.shape.element_count() {
                return Err(format!(
                    "session produced {} elements, {} expected",
                    result.len(),
                    output.shape.element_count()
                ));
            }
            resources.write_tensor(&output, &result)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::SoftwareDevice;

    #[test]
    fn test_missing_file_is_reported() {
        let device = SoftwareDevice::default();
        let descriptor = ModelDescriptor::from_file("mosaic", "/nonexistent/mosaic.onnx");
        let err = OnnxRuntime::new()
            .create_model(&descriptor, &DeviceCapabilities::of(&device))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::MissingFile(_)));
    }

    #[test]
    fn test_garbage_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();
        let device = SoftwareDevice::default();
        let err = OnnxRuntime::new()
            .create_model(
                &ModelDescriptor::from_file("broken", &path),
                &DeviceCapabilities::of(&device),
            )
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LoadError::InvalidModel(_) | LoadError::UnsupportedOperator(_)
        ));
    }

    #[test]
    fn test_only_software_backend() {
        let runtime = OnnxRuntime::new();
        assert!(runtime.supports_backend(GraphicsBackendType::Software));
        assert!(!runtime.supports_backend(GraphicsBackendType::Vulkan));
    }
}
