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

//! Element precision, value ranges and channel ordering of image tensors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::shape::TensorShape;

/// Floating-point precision of tensor elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Precision {
    /// IEEE 754 half precision.
    F16,
    /// IEEE 754 single precision.
    #[default]
    F32,
}

impl Precision {
    /// Size of one element in bytes.
    pub const fn bytes(&self) -> u32 {
        match self {
            Precision::F16 => 2,
            Precision::F32 => 4,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F16 => f.write_str("f16"),
            Precision::F32 => f.write_str("f32"),
        }
    }
}

/// The value range a network was trained on.
///
/// Color textures are sampled as `[0, 1]`; packing maps that interval onto
/// the range, and unpacking maps it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelRange {
    /// Values in `[0, 1]`.
    Unit,
    /// Values in `[-1, 1]`.
    Signed,
    /// Values in `[0, 255]`.
    Byte,
}

impl PixelRange {
    /// `(scale, bias)` such that `tensor = pixel * scale + bias`.
    pub const fn encode_affine(&self) -> (f32, f32) {
        match self {
            PixelRange::Unit => (1.0, 0.0),
            PixelRange::Signed => (2.0, -1.0),
            PixelRange::Byte => (255.0, 0.0),
        }
    }

    /// `(scale, bias)` such that `pixel = tensor * scale + bias`.
    pub fn decode_affine(&self) -> (f32, f32) {
        let (scale, bias) = self.encode_affine();
        (1.0 / scale, -bias / scale)
    }
}

/// Which texture channel feeds tensor channels 0, 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Tensor channel 0 is red.
    #[default]
    Rgb,
    /// Tensor channel 0 is blue.
    Bgr,
}

impl ChannelOrder {
    /// Texel channel index (0 = R, 1 = G, 2 = B, 3 = A) feeding tensor channel `c`.
    pub const fn texel_channel(&self, c: u32) -> usize {
        match (self, c) {
            (ChannelOrder::Bgr, 0) => 2,
            (ChannelOrder::Bgr, 2) => 0,
            (_, c) => c as usize,
        }
    }

    /// Numeric code used by GPU kernels.
    pub const fn code(&self) -> u32 {
        match self {
            ChannelOrder::Rgb => 0,
            ChannelOrder::Bgr => 1,
        }
    }
}

/// Everything a kernel needs to interpret one model tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpec {
    /// Logical shape and layout.
    pub shape: TensorShape,
    /// Element precision.
    pub precision: Precision,
    /// Value range of the elements.
    pub range: PixelRange,
    /// Channel ordering.
    pub order: ChannelOrder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_encode_then_decode_is_identity_for_every_range() {
        for range in [PixelRange::Unit, PixelRange::Signed, PixelRange::Byte] {
            let (es, eb) = range.encode_affine();
            let (ds, db) = range.decode_affine();
            for pixel in [0.0_f32, 0.25, 0.5, 1.0] {
                let tensor = pixel * es + eb;
                assert_relative_eq!(tensor * ds + db, pixel, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_signed_range_maps_endpoints() {
        let (scale, bias) = PixelRange::Signed.encode_affine();
        assert_relative_eq!(0.0 * scale + bias, -1.0);
        assert_relative_eq!(1.0 * scale + bias, 1.0);
    }

    #[test]
    fn test_bgr_swaps_red_and_blue_only() {
        let order = ChannelOrder::Bgr;
        assert_eq!(
            [0, 1, 2, 3].map(|c| order.texel_channel(c)),
            [2, 1, 0, 3]
        );
        assert_eq!(ChannelOrder::Rgb.texel_channel(2), 2);
    }
}
