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

//! The public-facing SDK of the Pastiche stylization pipeline.
//!
//! A host renderer creates a [`PipelineController`] for its graphics device,
//! points it at a [`ModelCatalog`] and calls it once per frame; the
//! controller inserts the stylization pass into the frame's render graph
//! whenever a model is ready.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod logging;

pub use catalog::ModelCatalog;
pub use config::{load_config, parse_config, save_config, ConfigFormat};
pub use controller::{
    default_registry, PipelineController, PipelineStats, StatusCallback, EVENT_QUEUE_CAPACITY,
};
pub use logging::{init_logging, init_test_logging};

/// Everything a host needs to drive the pipeline.
pub mod prelude {
    pub use crate::{default_registry, ModelCatalog, PipelineController, PipelineStats};
    pub use pastiche_agents::{Fallback, FrameOutcome, FrameTargets};
    pub use pastiche_core::gpu::{GraphicsDevice, TextureId};
    pub use pastiche_core::graph::RenderGraph;
    pub use pastiche_core::inference::{ModelDescriptor, ModelId, RuntimeRegistry};
    pub use pastiche_core::math::Rect;
    pub use pastiche_core::{
        PipelineConfig, PipelineEvent, PipelineState, ResizePolicy, StylizeError,
    };
    pub use pastiche_lanes::TensorBridgeLane;
}
