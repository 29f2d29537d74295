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

//! Tensor shapes and memory layouts.

use crate::error::LoadError;
use crate::math::Extent2D;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::format::Precision;

/// Batch size substituted for a dynamic batch dimension.
pub const DEFAULT_BATCH: u32 = 1;
/// Channel count substituted for a dynamic channel dimension.
pub const DEFAULT_CHANNELS: u32 = 3;
/// Height/width substituted for a dynamic spatial dimension.
pub const DEFAULT_SPATIAL_DIM: u32 = 224;
/// Fewest channels a style network may consume or produce.
pub const MIN_CHANNELS: u32 = 3;

/// Order of the dimensions in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TensorLayout {
    /// Planar: batch, channel, row, column.
    #[default]
    Nchw,
    /// Interleaved: batch, row, column, channel.
    Nhwc,
}

/// The logical shape of a rank-4 image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
    /// Number of images.
    pub batch: u32,
    /// Number of channels per pixel.
    pub channels: u32,
    /// Plane height.
    pub height: u32,
    /// Plane width.
    pub width: u32,
    /// Memory layout.
    pub layout: TensorLayout,
}

impl TensorShape {
    /// A single-image planar shape.
    pub const fn nchw(channels: u32, height: u32, width: u32) -> Self {
        Self {
            batch: 1,
            channels,
            height,
            width,
            layout: TensorLayout::Nchw,
        }
    }

    /// A single-image interleaved shape.
    pub const fn nhwc(height: u32, width: u32, channels: u32) -> Self {
        Self {
            batch: 1,
            channels,
            height,
            width,
            layout: TensorLayout::Nhwc,
        }
    }

    /// Builds a shape from dimensions as reported by a model, in `layout` order.
    ///
    /// Non-positive dimensions are dynamic and resolve to a batch of 1,
    /// 3 channels and 224 pixels per spatial axis.
    ///
    /// ## Errors
    /// * [`LoadError::InvalidShape`] if the rank is not 4 or a dimension overflows `u32`.
    pub fn from_dims(dims: &[i64], layout: TensorLayout) -> Result<Self, LoadError> {
        if dims.len() != 4 {
            return Err(LoadError::InvalidShape(format!(
                "expected a rank 4 tensor, got rank {} ({dims:?})",
                dims.len()
            )));
        }
        let resolve = |value: i64, fallback: u32| -> Result<u32, LoadError> {
            if value <= 0 {
                Ok(fallback)
            } else {
                u32::try_from(value).map_err(|_| {
                    LoadError::InvalidShape(format!("dimension {value} does not fit in 32 bits"))
                })
            }
        };
        let batch = resolve(dims[0], DEFAULT_BATCH)?;
        let (channels, height, width) = match layout {
            TensorLayout::Nchw => (
                resolve(dims[1], DEFAULT_CHANNELS)?,
                resolve(dims[2], DEFAULT_SPATIAL_DIM)?,
                resolve(dims[3], DEFAULT_SPATIAL_DIM)?,
            ),
            TensorLayout::Nhwc => (
                resolve(dims[3], DEFAULT_CHANNELS)?,
                resolve(dims[1], DEFAULT_SPATIAL_DIM)?,
                resolve(dims[2], DEFAULT_SPATIAL_DIM)?,
            ),
        };
        Ok(Self {
            batch,
            channels,
            height,
            width,
            layout,
        })
    }

    /// Checks the constraints every style tensor must satisfy.
    ///
    /// ## Errors
    /// * [`LoadError::InvalidShape`] for a batch other than one, fewer than
    ///   three channels or an empty plane.
    pub fn validate_image(&self, role: &str) -> Result<(), LoadError> {
        if self.batch != 1 {
            return Err(LoadError::InvalidShape(format!(
                "{role} tensor must have a batch of 1, got {}",
                self.batch
            )));
        }
        if self.channels < MIN_CHANNELS {
            return Err(LoadError::InvalidShape(format!(
                "{role} tensor needs at least {MIN_CHANNELS} channels, got {}",
                self.channels
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(LoadError::InvalidShape(format!("{role} tensor plane is empty")));
        }
        Ok(())
    }

    /// Dimensions in memory order.
    pub const fn dims(&self) -> [u32; 4] {
        match self.layout {
            TensorLayout::Nchw => [self.batch, self.channels, self.height, self.width],
            TensorLayout::Nhwc => [self.batch, self.height, self.width, self.channels],
        }
    }

    /// Spatial extent of one plane.
    pub const fn extent(&self) -> Extent2D {
        Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Total number of elements.
    pub const fn element_count(&self) -> u64 {
        self.batch as u64 * self.channels as u64 * self.height as u64 * self.width as u64
    }

    /// Total size in bytes at `precision`.
    pub const fn byte_size(&self, precision: Precision) -> u64 {
        self.element_count() * precision.bytes() as u64
    }

    /// Distance in bytes between two consecutive rows of the same channel.
    pub const fn row_stride(&self, precision: Precision) -> u64 {
        let per_row = match self.layout {
            TensorLayout::Nchw => self.width as u64,
            TensorLayout::Nhwc => self.width as u64 * self.channels as u64,
        };
        per_row * precision.bytes() as u64
    }

    /// Linear element index of channel `c` at pixel (`x`, `y`) of the first image.
    pub const fn index(&self, c: u32, y: u32, x: u32) -> usize {
        let (c, y, x) = (c as usize, y as usize, x as usize);
        let (h, w, ch) = (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        );
        match self.layout {
            TensorLayout::Nchw => c * h * w + y * w + x,
            TensorLayout::Nhwc => (y * w + x) * ch + c,
        }
    }

    /// Returns `true` if both shapes describe the same logical image, whatever the layout.
    pub const fn same_image(&self, other: &TensorShape) -> bool {
        self.batch == other.batch
            && self.channels == other.channels
            && self.height == other.height
            && self.width == other.width
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.dims();
        let tag = match self.layout {
            TensorLayout::Nchw => "NCHW",
            TensorLayout::Nhwc => "NHWC",
        };
        write!(f, "{a}x{b}x{c}x{d} ({tag})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_dimensions_resolve_to_defaults() {
        let shape = TensorShape::from_dims(&[-1, -1, 0, -1], TensorLayout::Nchw).unwrap();
        assert_eq!(shape, TensorShape::nchw(3, 224, 224));

        let shape = TensorShape::from_dims(&[1, 512, -1, 3], TensorLayout::Nhwc).unwrap();
        assert_eq!(shape, TensorShape::nhwc(512, 224, 3));
    }

    #[test]
    fn test_rank_must_be_four() {
        let err = TensorShape::from_dims(&[1, 3, 256], TensorLayout::Nchw).unwrap_err();
        assert!(matches!(err, LoadError::InvalidShape(_)));
    }

    #[test]
    fn test_validate_image_rejects_two_channels_and_batches() {
        assert!(TensorShape::nchw(2, 8, 8).validate_image("input").is_err());
        let mut batched = TensorShape::nchw(3, 8, 8);
        batched.batch = 2;
        assert!(batched.validate_image("input").is_err());
        assert!(TensorShape::nchw(3, 8, 8).validate_image("input").is_ok());
    }

    #[test]
    fn test_index_and_stride_per_layout() {
        let planar = TensorShape::nchw(3, 4, 5);
        assert_eq!(planar.index(1, 2, 3), 20 + 10 + 3);
        assert_eq!(planar.row_stride(Precision::F32), 20);

        let interleaved = TensorShape::nhwc(4, 5, 3);
        assert_eq!(interleaved.index(1, 2, 3), (2 * 5 + 3) * 3 + 1);
        assert_eq!(interleaved.row_stride(Precision::F16), 30);
        assert!(planar.same_image(&interleaved));
    }

    #[test]
    fn test_byte_size_and_display() {
        let shape = TensorShape::nchw(3, 256, 256);
        assert_eq!(shape.byte_size(Precision::F32), 3 * 256 * 256 * 4);
        assert_eq!(shape.to_string(), "1x3x256x256 (NCHW)");
    }
}
