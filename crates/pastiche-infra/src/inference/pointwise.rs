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

//! A runtime for networks made of a single 1×1 convolution.
//!
//! Small enough to run on every backend, which makes it the default runtime
//! for color-transfer styles and for exercising the pipeline end to end.

use crate::graphics::software::SoftwareCommandEncoder;
#[cfg(feature = "graphics")]
use crate::graphics::wgpu::{PointwiseDispatch, WgpuCommandEncoder};
use pastiche_core::gpu::{CommandEncoder, GraphicsBackendType, TensorView};
use pastiche_core::inference::{
    DeviceCapabilities, InferenceRuntime, ModelDescriptor, ModelInstance, ModelSource,
};
use pastiche_core::tensor::{TensorLayout, TensorShape};
use pastiche_core::{InferenceError, LoadError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Registry name of [`PointwiseRuntime`].
pub const POINTWISE_RUNTIME: &str = "pointwise";

/// Weights of a pointwise network, as stored in a RON model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointwiseWeights {
    /// Plane width the network is compiled for.
    pub width: u32,
    /// Plane height the network is compiled for.
    pub height: u32,
    /// Row-major `outputs × inputs` matrix.
    pub weights: Vec<f32>,
    /// One bias per output channel.
    pub bias: Vec<f32>,
}

impl PointwiseWeights {
    /// Reads a RON weight file.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::MissingFile(path.to_path_buf())
            } else {
                LoadError::InvalidModel(format!("{}: {e}", path.display()))
            }
        })?;
        ron::from_str(&text)
            .map_err(|e| LoadError::InvalidModel(format!("{}: {e}", path.display())))
    }

    /// Writes the weights as a RON file.
    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn input_channels(&self) -> Result<u32, LoadError> {
        let outputs = self.bias.len();
        if outputs == 0 || self.weights.is_empty() || self.weights.len() % outputs != 0 {
            return Err(LoadError::InvalidModel(format!(
                "{} weights cannot form a matrix with {outputs} output channels",
                self.weights.len()
            )));
        }
        Ok((self.weights.len() / outputs) as u32)
    }
}

/// Makes the next dispatches fail, for exercising per-frame recovery.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    remaining: Arc<AtomicU32>,
}

impl FaultInjector {
    /// An injector with no pending faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` dispatches fail.
    pub fn fail_next(&self, count: u32) {
        self.remaining.fetch_add(count, Ordering::AcqRel);
    }

    /// Faults not yet consumed.
    pub fn pending(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Runs [`ModelSource::Pointwise`] models and RON weight files.
#[derive(Debug, Clone, Default)]
pub struct PointwiseRuntime {
    faults: FaultInjector,
    load_delay: Option<Duration>,
}

impl PointwiseRuntime {
    /// Creates the runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares `faults` with every model this runtime creates.
    pub fn with_fault_injector(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Sleeps for `delay` in every load, simulating a slow model.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// The injector shared by this runtime's models.
    pub fn fault_injector(&self) -> &FaultInjector {
        &self.faults
    }
}

impl InferenceRuntime for PointwiseRuntime {
    fn name(&self) -> &str {
        POINTWISE_RUNTIME
    }

    fn supports_backend(&self, backend: GraphicsBackendType) -> bool {
        match backend {
            GraphicsBackendType::Software => true,
            GraphicsBackendType::Vulkan
            | GraphicsBackendType::Metal
            | GraphicsBackendType::Dx12
            | GraphicsBackendType::OpenGL
            | GraphicsBackendType::WebGpu => cfg!(feature = "graphics"),
            GraphicsBackendType::Dx11 | GraphicsBackendType::Unknown => false,
        }
    }

    fn create_model(
        &self,
        descriptor: &ModelDescriptor,
        _capabilities: &DeviceCapabilities,
    ) -> Result<Box<dyn ModelInstance>, LoadError> {
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }

        let weights = match &descriptor.source {
            ModelSource::Pointwise {
                width,
                height,
                weights,
                bias,
            } => PointwiseWeights {
                width: *width,
                height: *height,
                weights: weights.clone(),
                bias: bias.clone(),
            },
            ModelSource::File(path) => PointwiseWeights::from_file(path)?,
        };
        if weights.width == 0 || weights.height == 0 {
            return Err(LoadError::InvalidShape(format!(
                "{}x{} plane",
                weights.width, weights.height
            )));
        }

        let inputs = weights.input_channels()?;
        let outputs = weights.bias.len() as u32;
        let shape = |channels| match descriptor.layout {
            TensorLayout::Nchw => TensorShape::nchw(channels, weights.height, weights.width),
            TensorLayout::Nhwc => TensorShape::nhwc(weights.height, weights.width, channels),
        };

        let mut packed = weights.weights.clone();
        packed.extend_from_slice(&weights.bias);
        log::debug!(
            "PointwiseRuntime: created '{}' ({inputs} -> {outputs} channels, {}x{})",
            descriptor.id,
            weights.width,
            weights.height
        );
        Ok(Box::new(PointwiseModel {
            input: shape(inputs),
            output: shape(outputs),
            weights: Arc::new(packed),
            faults: self.faults.clone(),
            #[cfg(feature = "graphics")]
            gpu_weights: None,
        }))
    }
}

struct PointwiseModel {
    input: TensorShape,
    output: TensorShape,
    /// Weight matrix followed by the biases.
    weights: Arc<Vec<f32>>,
    faults: FaultInjector,
    #[cfg(feature = "graphics")]
    gpu_weights: Option<wgpu::Buffer>,
}

/// `dst[o] = bias[o] + sum_i weights[o][i] * src[i]` for every pixel.
fn convolve(weights: &[f32], input: &TensorShape, src: &[f32], output: &TensorShape, dst: &mut [f32]) {
    let (inputs, outputs) = (input.channels as usize, output.channels as usize);
    let bias = &weights[inputs * outputs..];
    for y in 0..output.height {
        for x in 0..output.width {
            for o in 0..outputs {
                let mut acc = bias[o];
                for i in 0..inputs {
                    acc += weights[o * inputs + i] * src[input.index(i as u32, y, x)];
                }
                dst[output.index(o as u32, y, x)] = acc;
            }
        }
    }
}

impl PointwiseModel {
    fn check_binding(&self, input: &TensorView, output: &TensorView) -> Result<(), InferenceError> {
        if input.shape != self.input {
            return Err(InferenceError::Binding(format!(
                "input is {}, model expects {}",
                input.shape, self.input
            )));
        }
        if output.shape != self.output {
            return Err(InferenceError::Binding(format!(
                "output is {}, model produces {}",
                output.shape, self.output
            )));
        }
        Ok(())
    }
}

impl ModelInstance for PointwiseModel {
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
        if self.faults.take() {
            return Err(InferenceError::Dispatch("injected fault".to_string()));
        }
        self.check_binding(input, output)?;

        if let Some(software) = encoder.as_any_mut().downcast_mut::<SoftwareCommandEncoder>() {
            let (input, output) = (*input, *output);
            let weights = Arc::clone(&self.weights);
            software.record_host_task(POINTWISE_RUNTIME, move |resources| {
                let src = resources.read_tensor(&input)?;
                let mut dst = vec![0.0; output.shape.element_count() as usize];
                convolve(&weights, &input.shape, &src, &output.shape, &mut dst);
                resources.write_tensor(&output, &dst)
            });
            return Ok(());
        }

        #[cfg(feature = "graphics")]
        if let Some(gpu) = encoder.as_any_mut().downcast_mut::<WgpuCommandEncoder>() {
            let weights = self.gpu_weights.get_or_insert_with(|| {
                gpu.device()
                    .create_storage_buffer_init("Pastiche Pointwise Weights", &self.weights)
            });
            return gpu
                .dispatch_pointwise(&PointwiseDispatch {
                    input,
                    output,
                    weights,
                })
                .map_err(|e| InferenceError::Dispatch(e.to_string()));
        }

        Err(InferenceError::EncoderMismatch {
            runtime: POINTWISE_RUNTIME.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::software::SoftwareDevice;
    use approx::assert_relative_eq;
    use pastiche_core::gpu::{BufferDescriptor, BufferUsage, GraphicsDevice};
    use pastiche_core::tensor::Precision;

    fn capabilities(device: &SoftwareDevice) -> DeviceCapabilities {
        DeviceCapabilities::of(device)
    }

    fn tensor(device: &SoftwareDevice, shape: TensorShape) -> TensorView {
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: shape.byte_size(Precision::F32),
                usage: BufferUsage::TENSOR,
            })
            .unwrap();
        TensorView {
            buffer,
            shape,
            precision: Precision::F32,
        }
    }

    #[test]
    fn test_grayscale_model_mixes_channels() {
        let device = SoftwareDevice::default();
        let descriptor = ModelDescriptor::pointwise(
            "gray",
            2,
            1,
            vec![0.5, 0.5, 0.0, 0.5, 0.5, 0.0, 0.5, 0.5, 0.0],
            vec![0.1, 0.1, 0.1],
        );
        let mut model = PointwiseRuntime::new()
            .create_model(&descriptor, &capabilities(&device))
            .unwrap();
        assert_eq!(model.input_shape(), TensorShape::nchw(3, 1, 2));

        let input = tensor(&device, model.input_shape());
        let output = tensor(&device, model.output_shape());
        device
            .write_buffer(
                input.buffer,
                0,
                bytemuck::cast_slice(&[0.2f32, 0.4, 0.6, 0.8, 0.0, 0.0]),
            )
            .unwrap();

        let mut encoder = device.create_command_encoder(None);
        model.enqueue(encoder.as_mut(), &input, &output).unwrap();
        device.submit_command_buffer(encoder.finish()).unwrap();

        let values = device.read_tensor(&output).unwrap();
        assert_relative_eq!(values[0], 0.5 * 0.2 + 0.5 * 0.6 + 0.1, epsilon = 1e-6);
        assert_relative_eq!(values[1], 0.5 * 0.4 + 0.5 * 0.8 + 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_injected_fault_fails_exactly_once() {
        let device = SoftwareDevice::default();
        let faults = FaultInjector::new();
        let runtime = PointwiseRuntime::new().with_fault_injector(faults.clone());
        let mut model = runtime
            .create_model(&ModelDescriptor::identity("id", 2, 2), &capabilities(&device))
            .unwrap();
        let input = tensor(&device, model.input_shape());
        let output = tensor(&device, model.output_shape());

        faults.fail_next(1);
        let mut encoder = device.create_command_encoder(None);
        assert!(matches!(
            model.enqueue(encoder.as_mut(), &input, &output),
            Err(InferenceError::Dispatch(_))
        ));
        assert_eq!(faults.pending(), 0);
        assert!(model.enqueue(encoder.as_mut(), &input, &output).is_ok());
    }

    #[test]
    fn test_mismatched_binding_is_rejected() {
        let device = SoftwareDevice::default();
        let mut model = PointwiseRuntime::new()
            .create_model(&ModelDescriptor::identity("id", 4, 4), &capabilities(&device))
            .unwrap();
        let input = tensor(&device, TensorShape::nchw(3, 2, 2));
        let output = tensor(&device, model.output_shape());
        let mut encoder = device.create_command_encoder(None);
        assert!(matches!(
            model.enqueue(encoder.as_mut(), &input, &output),
            Err(InferenceError::Binding(_))
        ));
    }

    #[test]
    fn test_ragged_weights_are_invalid() {
        let device = SoftwareDevice::default();
        let descriptor = ModelDescriptor::pointwise("bad", 2, 2, vec![1.0; 7], vec![0.0; 3]);
        let err = PointwiseRuntime::new()
            .create_model(&descriptor, &capabilities(&device))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::InvalidModel(_)));
    }

    #[test]
    fn test_weight_file_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sepia.ron");
        let weights = PointwiseWeights {
            width: 8,
            height: 8,
            weights: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            bias: vec![0.0; 3],
        };
        weights.write_to(&path).unwrap();
        assert_eq!(PointwiseWeights::from_file(&path).unwrap(), weights);

        let missing = dir.path().join("nope.ron");
        assert_eq!(
            PointwiseWeights::from_file(&missing),
            Err(LoadError::MissingFile(missing))
        );
    }
}
