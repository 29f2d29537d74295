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

//! Inference runtimes and the model instances they create.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::model::ModelDescriptor;
use crate::error::{InferenceError, LoadError};
use crate::gpu::{
    CommandEncoder, DeviceLimits, GraphicsBackendType, GraphicsDevice, RendererAdapterInfo,
    TensorView, FEATURE_SHADER_F16,
};
use crate::tensor::TensorShape;

/// The parts of a device a runtime needs to decide whether it can run a model.
///
/// Captured once on the render thread so loads can be validated on a
/// background thread without touching the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Adapter description, including the active backend.
    pub adapter: RendererAdapterInfo,
    /// Whether kernels can operate on 16-bit floats.
    pub shader_f16: bool,
    /// Allocation limits.
    pub limits: DeviceLimits,
}

impl DeviceCapabilities {
    /// Snapshots the capabilities of `device`.
    pub fn of(device: &dyn GraphicsDevice) -> Self {
        Self {
            adapter: device.get_adapter_info(),
            shader_f16: device.supports_feature(FEATURE_SHADER_F16),
            limits: device.limits(),
        }
    }

    /// The active graphics backend.
    pub fn backend(&self) -> GraphicsBackendType {
        self.adapter.backend_type
    }
}

/// A network ready to be dispatched once per frame.
pub trait ModelInstance: Send {
    /// Resolved shape of the single input tensor.
    fn input_shape(&self) -> TensorShape;

    /// Resolved shape of the single output tensor.
    fn output_shape(&self) -> TensorShape;

    /// Records one forward pass reading `input` and writing `output`.
    ///
    /// The work runs on the GPU timeline after previously recorded commands;
    /// the call itself never blocks on the GPU.
    fn enqueue(
        &mut self,
        encoder: &mut dyn CommandEncoder,
        input: &TensorView,
        output: &TensorView,
    ) -> Result<(), InferenceError>;
}

/// An execution provider able to instantiate models.
pub trait InferenceRuntime: Send + Sync {
    /// Registry name of the runtime.
    fn name(&self) -> &str;

    /// Whether models created by this runtime can record work for `backend`.
    fn supports_backend(&self, backend: GraphicsBackendType) -> bool;

    /// Parses and instantiates a model. May be slow; runs off the render thread.
    fn create_model(
        &self,
        descriptor: &ModelDescriptor,
        capabilities: &DeviceCapabilities,
    ) -> Result<Box<dyn ModelInstance>, LoadError>;
}

/// Named inference runtimes, with a default used when a descriptor names none.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn InferenceRuntime>>,
    default: Option<String>,
}

impl RuntimeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime under its own name. The first registered runtime
    /// becomes the default.
    pub fn register(&mut self, runtime: Arc<dyn InferenceRuntime>) {
        let name = runtime.name().to_owned();
        log::debug!("Registering inference runtime '{name}'");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.runtimes.insert(name, runtime);
    }

    /// Makes `name` the runtime used when a descriptor names none.
    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default = Some(name.into());
    }

    /// Name of the default runtime.
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Looks up a runtime by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceRuntime>> {
        self.runtimes.get(name).cloned()
    }

    /// Picks the runtime for a descriptor preference.
    ///
    /// ## Errors
    /// * [`LoadError::UnknownRuntime`] if the requested or default runtime is not registered.
    pub fn resolve(&self, preference: Option<&str>) -> Result<Arc<dyn InferenceRuntime>, LoadError> {
        let name = preference
            .or(self.default.as_deref())
            .ok_or_else(|| LoadError::UnknownRuntime("<none registered>".to_owned()))?;
        self.get(name)
            .ok_or_else(|| LoadError::UnknownRuntime(name.to_owned()))
    }

    /// Sorted names of the registered runtimes.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runtimes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtimes", &self.names())
            .field("default", &self.default)
            .finish()
    }
}
