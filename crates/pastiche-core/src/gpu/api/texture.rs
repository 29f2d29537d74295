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

//! Defines data structures related to GPU textures.

use crate::math::Extent2D;
use crate::pastiche_bitflags;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An opaque handle to a texture.
///
/// Host-provided color targets are referenced through this id only: holding
/// a `TextureId` neither owns the texture nor extends its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

pastiche_bitflags! {
    /// A set of flags describing the allowed usages of a [`TextureId`].
    pub struct TextureUsage: u32 {
        /// The texture can be used as the source of a copy operation.
        const COPY_SRC = 1 << 0;
        /// The texture can be used as the destination of a copy operation.
        const COPY_DST = 1 << 1;
        /// The texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// The texture can be written by a compute shader.
        const STORAGE_BINDING = 1 << 3;
        /// The texture can be used as a color attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Describes the memory layout of texels in a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// Single 8-bit channel, normalized to `[0, 1]`.
    R8Unorm,
    /// Two 8-bit channels, normalized to `[0, 1]`.
    Rg8Unorm,
    /// Four 8-bit channels (RGBA), normalized to `[0, 1]`.
    Rgba8Unorm,
    /// Four 8-bit channels (RGBA) with sRGB encoding.
    Rgba8UnormSrgb,
    /// Four 8-bit channels in BGRA order, normalized to `[0, 1]`.
    Bgra8Unorm,
    /// Four 8-bit channels in BGRA order with sRGB encoding.
    Bgra8UnormSrgb,
    /// Four 16-bit float channels (RGBA).
    Rgba16Float,
    /// Four 32-bit float channels (RGBA).
    Rgba32Float,
    /// Single 32-bit float channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Number of color channels, or `None` for depth/stencil formats.
    pub const fn color_channels(&self) -> Option<u32> {
        match self {
            Self::R8Unorm | Self::R32Float => Some(1),
            Self::Rg8Unorm => Some(2),
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgba16Float
            | Self::Rgba32Float => Some(4),
            Self::Depth32Float | Self::Depth24PlusStencil8 => None,
        }
    }

    /// Size in bytes of one texel.
    pub const fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::R32Float
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Returns `true` for formats whose channels are 8-bit normalized integers.
    pub const fn is_unorm8(&self) -> bool {
        matches!(
            self,
            Self::R8Unorm
                | Self::Rg8Unorm
                | Self::Rgba8Unorm
                | Self::Rgba8UnormSrgb
                | Self::Bgra8Unorm
                | Self::Bgra8UnormSrgb
        )
    }

    /// Returns `true` for formats with sRGB transfer encoding.
    pub const fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// Returns `true` for formats with a depth aspect.
    pub const fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    /// Returns `true` if compute shaders can write the format through a
    /// storage binding on every supported backend.
    pub const fn supports_storage_write(&self) -> bool {
        matches!(
            self,
            Self::Rgba8Unorm | Self::Rgba16Float | Self::Rgba32Float | Self::R32Float
        )
    }
}

/// A descriptor used to create a 2D texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label for the texture.
    pub label: Option<Cow<'a, str>>,
    /// Size of the texture in texels.
    pub size: Extent2D,
    /// Texel format.
    pub format: TextureFormat,
    /// Allowed usages.
    pub usage: TextureUsage,
}

/// Properties of a live texture, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Size of the texture in texels.
    pub size: Extent2D,
    /// Texel format.
    pub format: TextureFormat,
    /// Allowed usages.
    pub usage: TextureUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_channel_counts() {
        assert_eq!(TextureFormat::Rgba8Unorm.color_channels(), Some(4));
        assert_eq!(TextureFormat::R8Unorm.color_channels(), Some(1));
        assert_eq!(TextureFormat::Depth32Float.color_channels(), None);
    }

    #[test]
    fn test_storage_write_support() {
        assert!(TextureFormat::Rgba16Float.supports_storage_write());
        assert!(!TextureFormat::Bgra8UnormSrgb.supports_storage_write());
        assert!(!TextureFormat::Depth24PlusStencil8.supports_storage_write());
    }
}
