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

//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::gpu::{GraphicsBackendType, MAX_FRAMES_IN_FLIGHT};

/// What to do when the host's view rect differs from the model resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizePolicy {
    /// Reject the frame with a format mismatch; the host resizes upstream.
    #[default]
    Strict,
    /// Bilinearly resample into the model resolution and back.
    Resample,
}

/// Settings of a stylization pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of frames the CPU may record ahead of the GPU; one tensor
    /// buffer pair is kept per frame in flight.
    pub frames_in_flight: usize,
    /// How mismatched resolutions are handled.
    pub resize_policy: ResizePolicy,
    /// Runtime used when a model descriptor names none.
    pub default_runtime: Option<String>,
    /// Backends on which the pipeline refuses to activate.
    pub disabled_backends: Vec<GraphicsBackendType>,
    /// Reload the active model when its file changes on disk.
    pub hot_reload: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            resize_policy: ResizePolicy::Strict,
            default_runtime: None,
            disabled_backends: Vec::new(),
            hot_reload: false,
        }
    }
}

impl PipelineConfig {
    /// Frames in flight, never less than one.
    pub fn effective_frames_in_flight(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.resize_policy, ResizePolicy::Strict);
        assert!(!config.hot_reload);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: PipelineConfig =
            ron::from_str("(resize_policy: Resample, disabled_backends: [OpenGL])").unwrap();
        assert_eq!(config.resize_policy, ResizePolicy::Resample);
        assert_eq!(config.disabled_backends, vec![GraphicsBackendType::OpenGL]);
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_zero_frames_in_flight_is_clamped() {
        let config = PipelineConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_frames_in_flight(), 1);
    }
}
