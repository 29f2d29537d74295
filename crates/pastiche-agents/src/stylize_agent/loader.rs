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

//! Background model loading.
//!
//! Parsing a network and building its runtime session can take far longer
//! than a frame, so it runs on a dedicated thread. Requests carry a
//! generation number; the session ignores results older than its latest
//! request.

use super::session::StyleModel;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use pastiche_core::inference::{DeviceCapabilities, ModelDescriptor, ModelId, RuntimeRegistry};
use pastiche_core::tensor::{Precision, TensorShape, TensorSpec};
use pastiche_core::LoadError;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct LoadRequest {
    generation: u64,
    descriptor: ModelDescriptor,
}

/// The answer to one load request.
pub struct LoadOutcome {
    /// Generation of the request.
    pub generation: u64,
    /// Requested model.
    pub id: ModelId,
    /// The loaded model, or why it could not be loaded.
    pub result: Result<StyleModel, LoadError>,
    /// Wall time spent loading.
    pub elapsed: Duration,
}

/// Loads and validates a model on the calling thread.
///
/// Compatibility with the device is checked before the runtime is asked to
/// build anything: the runtime must support the active backend and 16-bit
/// models need `shader_f16`. The shapes the runtime reports are then checked
/// against the declared ones and against the device's binding limit.
pub fn load_model(
    registry: &RuntimeRegistry,
    capabilities: &DeviceCapabilities,
    descriptor: &ModelDescriptor,
) -> Result<StyleModel, LoadError> {
    let runtime = registry.resolve(descriptor.runtime.as_deref())?;
    let backend = capabilities.backend();
    if !runtime.supports_backend(backend) {
        return Err(LoadError::BackendUnavailable {
            runtime: runtime.name().to_owned(),
            backend,
        });
    }
    if descriptor.precision == Precision::F16 && !capabilities.shader_f16 {
        return Err(LoadError::UnsupportedPrecision(Precision::F16));
    }

    let instance = panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.create_model(descriptor, capabilities)
    }))
    .map_err(|_| LoadError::InvalidModel(format!("runtime '{}' panicked", runtime.name())))??;

    let input = instance.input_shape();
    let output = instance.output_shape();
    input.validate_image("input")?;
    output.validate_image("output")?;
    check_declared("input", descriptor.input_shape.as_deref(), descriptor, &input)?;
    check_declared("output", descriptor.output_shape.as_deref(), descriptor, &output)?;

    let limit = capabilities.limits.max_storage_buffer_binding_size;
    for shape in [input, output] {
        let required = shape.byte_size(descriptor.precision);
        if required > limit {
            return Err(LoadError::ExceedsDeviceLimits { required, limit });
        }
    }

    let spec = |shape, range| TensorSpec {
        shape,
        precision: descriptor.precision,
        range,
        order: descriptor.channel_order,
    };
    Ok(StyleModel::new(
        descriptor.id.clone(),
        runtime.name().to_owned(),
        spec(input, descriptor.input_range),
        spec(output, descriptor.output_range),
        descriptor.file_path().cloned(),
        instance,
    ))
}

fn check_declared(
    tensor: &'static str,
    declared: Option<&[i64]>,
    descriptor: &ModelDescriptor,
    actual: &TensorShape,
) -> Result<(), LoadError> {
    let Some(dims) = declared else {
        return Ok(());
    };
    let declared = TensorShape::from_dims(dims, descriptor.layout)?;
    if declared != *actual {
        return Err(LoadError::ShapeMismatch {
            tensor,
            declared: declared.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// A thread that loads models in request order.
pub struct ModelLoader {
    requests: Option<Sender<LoadRequest>>,
    results: Receiver<LoadOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl ModelLoader {
    /// Starts the loader thread.
    pub fn spawn(
        registry: RuntimeRegistry,
        capabilities: DeviceCapabilities,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<LoadRequest>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let worker = std::thread::Builder::new()
            .name("pastiche-model-loader".to_owned())
            .spawn(move || {
                for request in request_rx {
                    let started = Instant::now();
                    log::debug!(
                        "ModelLoader: loading '{}' (generation {})",
                        request.descriptor.id,
                        request.generation
                    );
                    let result = load_model(&registry, &capabilities, &request.descriptor);
                    let outcome = LoadOutcome {
                        generation: request.generation,
                        id: request.descriptor.id,
                        result,
                        elapsed: started.elapsed(),
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                log::debug!("ModelLoader: thread exiting");
            })?;

        Ok(Self {
            requests: Some(request_tx),
            results: result_rx,
            worker: Some(worker),
        })
    }

    /// Queues a load.
    ///
    /// ## Errors
    /// * [`LoadError::LoaderUnavailable`] if the loader thread has stopped.
    pub fn request(&self, generation: u64, descriptor: ModelDescriptor) -> Result<(), LoadError> {
        let sender = self.requests.as_ref().ok_or(LoadError::LoaderUnavailable)?;
        sender
            .send(LoadRequest {
                generation,
                descriptor,
            })
            .map_err(|_| LoadError::LoaderUnavailable)
    }

    /// Finished loads, without blocking.
    pub fn try_results(&self) -> Vec<LoadOutcome> {
        self.results.try_iter().collect()
    }

    /// Blocks until a load finishes or `timeout` elapses.
    ///
    /// ## Errors
    /// * [`LoadError::LoaderUnavailable`] if the loader thread has stopped.
    pub fn wait(&self, timeout: Duration) -> Result<Option<LoadOutcome>, LoadError> {
        match self.results.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::LoaderUnavailable),
        }
    }
}

impl Drop for ModelLoader {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("ModelLoader: loader thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("running", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastiche_core::gpu::DeviceLimits;
    use pastiche_infra::{PointwiseRuntime, SoftwareDevice, SoftwareDeviceConfig};
    use std::sync::Arc;

    fn registry() -> RuntimeRegistry {
        let mut registry = RuntimeRegistry::new();
        registry.register(Arc::new(PointwiseRuntime::new()));
        registry
    }

    fn capabilities(config: SoftwareDeviceConfig) -> DeviceCapabilities {
        DeviceCapabilities::of(&SoftwareDevice::new(config))
    }

    #[test]
    fn test_identity_model_loads() {
        let model = load_model(
            &registry(),
            &capabilities(SoftwareDeviceConfig::default()),
            &ModelDescriptor::identity("id", 64, 32),
        )
        .unwrap();
        assert_eq!(model.id().as_str(), "id");
        assert_eq!(model.input().shape, TensorShape::nchw(3, 32, 64));
        assert_eq!(model.runtime(), "pointwise");
    }

    #[test]
    fn test_declared_shape_must_match() {
        let descriptor =
            ModelDescriptor::identity("id", 64, 64).with_input_shape(vec![1, 3, 256, 256]);
        let err = load_model(
            &registry(),
            &capabilities(SoftwareDeviceConfig::default()),
            &descriptor,
        )
        .err()
        .unwrap();
        assert!(matches!(err, LoadError::ShapeMismatch { tensor: "input", .. }));
    }

    #[test]
    fn test_half_precision_needs_shader_f16() {
        let descriptor = ModelDescriptor::identity("id", 8, 8).with_precision(Precision::F16);
        let err = load_model(
            &registry(),
            &capabilities(SoftwareDeviceConfig::default().without_f16()),
            &descriptor,
        )
        .err()
        .unwrap();
        assert_eq!(err, LoadError::UnsupportedPrecision(Precision::F16));
    }

    #[test]
    fn test_tensor_larger_than_binding_limit() {
        let limits = DeviceLimits {
            max_storage_buffer_binding_size: 1024,
            ..Default::default()
        };
        let err = load_model(
            &registry(),
            &capabilities(SoftwareDeviceConfig::default().with_limits(limits)),
            &ModelDescriptor::identity("id", 64, 64),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LoadError::ExceedsDeviceLimits { limit: 1024, .. }));
    }

    #[test]
    fn test_two_channel_model_is_rejected() {
        let descriptor = ModelDescriptor::pointwise("gray", 4, 4, vec![1.0; 6], vec![0.0; 2]);
        let err = load_model(
            &registry(),
            &capabilities(SoftwareDeviceConfig::default()),
            &descriptor,
        )
        .err()
        .unwrap();
        assert!(matches!(err, LoadError::InvalidShape(_)));
    }

    #[test]
    fn test_loader_thread_answers_in_order() {
        let loader = ModelLoader::spawn(
            registry(),
            capabilities(SoftwareDeviceConfig::default()),
        )
        .unwrap();
        loader
            .request(1, ModelDescriptor::identity("a", 4, 4))
            .unwrap();
        loader
            .request(2, ModelDescriptor::from_file("b", "/missing.ron"))
            .unwrap();

        let first = loader.wait(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(first.generation, 1);
        assert!(first.result.is_ok());
        let second = loader.wait(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(second.generation, 2);
        assert!(matches!(second.result, Err(LoadError::MissingFile(_))));
    }
}
