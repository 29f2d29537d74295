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

//! # Lane Abstraction
//!
//! A **Lane** is a swappable processing strategy. The frame scheduler picks
//! one lane per concern (for example, how a color target is bridged into a
//! tensor) and calls it on the hot path every frame.
//!
//! Domain-specific traits extend [`Lane`] with their execution methods, for
//! example `TensorBridgeLane: Lane` in `pastiche-lanes`.

use std::any::Any;
use std::fmt;

/// Classification of lane types, used for routing and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Converts color targets to tensors and back.
    TensorBridge,
    /// Runs a network.
    Inference,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKind::TensorBridge => write!(f, "TensorBridge"),
            LaneKind::Inference => write!(f, "Inference"),
        }
    }
}

/// Common interface shared by all lanes.
pub trait Lane: Send + Sync {
    /// Human-readable name of the strategy, used in logs and statistics.
    fn strategy_name(&self) -> &'static str;

    /// What the lane does.
    fn lane_kind(&self) -> LaneKind;

    /// Returns the lane as `Any`, for downcasting to the concrete strategy.
    fn as_any(&self) -> &dyn Any;
}
