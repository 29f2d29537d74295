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

use pastiche_core::gpu::{GraphicsDevice, TensorView, TextureId, TextureInfo, TextureUsage};
use pastiche_core::math::Rect;
use pastiche_core::FormatMismatch;

pub(crate) const SOURCE: &str = "source";
pub(crate) const TARGET: &str = "target";
pub(crate) const SCRATCH: &str = "scratch";

pub(crate) fn texture(
    device: &dyn GraphicsDevice,
    id: TextureId,
    resource: &'static str,
) -> Result<TextureInfo, FormatMismatch> {
    device
        .texture_info(id)
        .ok_or(FormatMismatch::MissingResource { resource })
}

/// Resolves the view rect against the texture it addresses.
pub(crate) fn resolve_view(
    info: &TextureInfo,
    view: Option<Rect>,
    resource: &'static str,
) -> Result<Rect, FormatMismatch> {
    let region = view.unwrap_or_else(|| Rect::full(info.size));
    if region.is_empty() {
        return Err(FormatMismatch::EmptyRegion { resource });
    }
    if !region.fits_within(info.size) {
        return Err(FormatMismatch::RegionOutOfBounds {
            resource,
            region,
            texture: info.size,
        });
    }
    Ok(region)
}

/// The source must be sampleable and carry every channel the tensor reads.
pub(crate) fn readable(
    info: &TextureInfo,
    tensor: &TensorView,
    resource: &'static str,
) -> Result<(), FormatMismatch> {
    let available = info
        .format
        .color_channels()
        .ok_or(FormatMismatch::UnsupportedFormat {
            resource,
            format: info.format,
        })?;
    if available < tensor.shape.channels {
        return Err(FormatMismatch::MissingChannel {
            resource,
            available,
            required: tensor.shape.channels,
        });
    }
    if !info.usage.contains(TextureUsage::TEXTURE_BINDING) {
        return Err(FormatMismatch::NotSampleable { resource });
    }
    Ok(())
}

/// The target must be a storage texture able to hold the color channels.
pub(crate) fn writable(
    info: &TextureInfo,
    tensor: &TensorView,
    resource: &'static str,
) -> Result<(), FormatMismatch> {
    let available = info
        .format
        .color_channels()
        .ok_or(FormatMismatch::UnsupportedFormat {
            resource,
            format: info.format,
        })?;
    let required = tensor.shape.channels.min(3);
    if available < required {
        return Err(FormatMismatch::MissingChannel {
            resource,
            available,
            required,
        });
    }
    if !info.format.supports_storage_write() || !info.usage.contains(TextureUsage::STORAGE_BINDING)
    {
        return Err(FormatMismatch::NotWritable {
            resource,
            format: info.format,
        });
    }
    Ok(())
}

/// The region must cover exactly one tensor plane.
pub(crate) fn exact_extent(
    region: Rect,
    tensor: &TensorView,
    resource: &'static str,
) -> Result<(), FormatMismatch> {
    let expected = tensor.shape.extent();
    if region.extent() != expected {
        return Err(FormatMismatch::ExtentMismatch {
            resource,
            expected,
            actual: region.extent(),
        });
    }
    Ok(())
}
