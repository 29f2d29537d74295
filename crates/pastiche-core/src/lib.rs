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

//! # Pastiche Core
//!
//! Foundational crate containing traits, core types, and interface contracts
//! for the real-time style-transfer pipeline: GPU device abstractions, tensor
//! descriptions, inference runtime contracts, the per-frame render graph and
//! the pipeline error taxonomy.

#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod gpu;
pub mod graph;
pub mod inference;
pub mod lane;
pub mod math;
pub mod pipeline;
pub mod settings;
pub mod tensor;
pub mod utils;

pub use error::{ErrorSeverity, FormatMismatch, InferenceError, LoadError, StylizeError};
pub use pipeline::{PipelineEvent, PipelineState};
pub use settings::{PipelineConfig, ResizePolicy};
