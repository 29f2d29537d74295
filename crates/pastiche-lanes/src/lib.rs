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

//! # Pastiche Lanes
//!
//! Hot-path strategies called by the frame scheduler every frame. Each lane
//! records GPU work through the `pastiche-core` device abstractions and never
//! touches a concrete backend.

#![warn(missing_docs)]

pub mod bridge_lane;

pub use bridge_lane::*;
