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

//! Extents (sizes), origins (offsets) and rectangles in pixel space.
//!
//! All components are `u32`, matching how textures and view rectangles are
//! addressed on the GPU.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A two-dimensional extent, typically a texture or tensor plane size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// The width component of the extent.
    pub width: u32,
    /// The height component of the extent.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by the extent.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of square workgroups of side `group_size` needed to cover this extent.
    pub const fn workgroups(&self, group_size: u32) -> (u32, u32) {
        (
            self.width.div_ceil(group_size),
            self.height.div_ceil(group_size),
        )
    }
}

impl fmt::Display for Extent2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A two-dimensional origin, the top-left corner of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Origin2D {
    /// The x-coordinate of the origin.
    pub x: u32,
    /// The y-coordinate of the origin.
    pub y: u32,
}

/// An axis-aligned rectangle inside a texture, such as a view rect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle from its corner and size.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle covering the whole of `extent`.
    pub const fn full(extent: Extent2D) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }

    /// Top-left corner.
    pub const fn origin(&self) -> Origin2D {
        Origin2D {
            x: self.x,
            y: self.y,
        }
    }

    /// Size of the rectangle.
    pub const fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }

    /// Exclusive right edge.
    pub const fn max_x(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub const fn max_y(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Returns `true` if the rectangle lies entirely inside `extent`.
    pub const fn fits_within(&self, extent: Extent2D) -> bool {
        self.max_x() <= extent.width as u64 && self.max_y() <= extent.height as u64
    }

    /// Returns `true` if the rectangle covers no pixel.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}", self.x, self.y, self.extent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(Extent2D::new(1920, 1080).workgroups(8), (240, 135));
        assert_eq!(Extent2D::new(17, 9).workgroups(8), (3, 2));
        assert_eq!(Extent2D::new(0, 4).workgroups(8), (0, 1));
    }

    #[test]
    fn test_rect_bounds() {
        let extent = Extent2D::new(64, 32);
        assert!(Rect::full(extent).fits_within(extent));
        assert!(Rect::new(32, 16, 32, 16).fits_within(extent));
        assert!(!Rect::new(33, 0, 32, 16).fits_within(extent));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits_within(extent));
        assert!(Rect::new(3, 3, 0, 5).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Extent2D::new(256, 128).to_string(), "256x128");
        assert_eq!(Rect::new(1, 2, 3, 4).to_string(), "(1, 2) 3x4");
    }
}
