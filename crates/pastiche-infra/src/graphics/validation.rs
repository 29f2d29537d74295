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

//! Record-time checks shared by every backend's command encoder.
//!
//! Recording fails before anything is written into the encoder, so a
//! rejected command never reaches the GPU.

use pastiche_core::gpu::{
    DecodeTensorParams, EncodeTensorParams, GraphicsDevice, ResampleParams, ResourceError,
    SamplingMode, TensorView, TextureId, TextureInfo, TextureUsage,
};
use pastiche_core::math::Rect;

fn texture(device: &dyn GraphicsDevice, id: TextureId) -> Result<TextureInfo, ResourceError> {
    device.texture_info(id).ok_or(ResourceError::NotFound)
}

fn region_in(region: Rect, info: &TextureInfo) -> Result<(), ResourceError> {
    if region.is_empty() || !region.fits_within(info.size) {
        return Err(ResourceError::OutOfBounds);
    }
    Ok(())
}

fn tensor(device: &dyn GraphicsDevice, view: &TensorView) -> Result<(), ResourceError> {
    let size = device.buffer_size(view.buffer).ok_or(ResourceError::NotFound)?;
    if size < view.byte_size() {
        return Err(ResourceError::OutOfBounds);
    }
    Ok(())
}

fn writable(info: &TextureInfo) -> Result<(), ResourceError> {
    if !info.format.supports_storage_write() || !info.usage.contains(TextureUsage::STORAGE_BINDING)
    {
        return Err(ResourceError::Unsupported(format!(
            "{:?} texture is not a storage target",
            info.format
        )));
    }
    Ok(())
}

pub(crate) fn check_encode(
    device: &dyn GraphicsDevice,
    params: &EncodeTensorParams,
) -> Result<(), ResourceError> {
    let info = texture(device, params.source)?;
    if info.format.color_channels().is_none() {
        return Err(ResourceError::Unsupported(format!(
            "cannot sample {:?} as color",
            info.format
        )));
    }
    region_in(params.region, &info)?;
    tensor(device, &params.target)?;
    let plane = params.target.shape.extent();
    if params.sampling == SamplingMode::Exact && params.region.extent() != plane {
        return Err(ResourceError::Unsupported(format!(
            "exact sampling needs a {plane} region, got {}",
            params.region
        )));
    }
    Ok(())
}

pub(crate) fn check_decode(
    device: &dyn GraphicsDevice,
    params: &DecodeTensorParams,
) -> Result<(), ResourceError> {
    let info = texture(device, params.target)?;
    writable(&info)?;
    region_in(params.region, &info)?;
    tensor(device, &params.source)?;
    let plane = params.source.shape.extent();
    if params.region.extent() != plane {
        return Err(ResourceError::Unsupported(format!(
            "decode region {} does not match the {plane} tensor plane",
            params.region
        )));
    }
    Ok(())
}

pub(crate) fn check_resample(
    device: &dyn GraphicsDevice,
    params: &ResampleParams,
) -> Result<(), ResourceError> {
    if params.source == params.target {
        return Err(ResourceError::Unsupported(
            "resample source and target must differ".to_string(),
        ));
    }
    let source = texture(device, params.source)?;
    let target = texture(device, params.target)?;
    writable(&target)?;
    region_in(params.source_region, &source)?;
    region_in(params.target_region, &target)
}

pub(crate) fn check_copy(
    device: &dyn GraphicsDevice,
    source: TextureId,
    target: TextureId,
    region: Rect,
) -> Result<(), ResourceError> {
    if source == target {
        return Err(ResourceError::Unsupported(
            "copy source and target must differ".to_string(),
        ));
    }
    let src = texture(device, source)?;
    let dst = texture(device, target)?;
    if src.format != dst.format {
        return Err(ResourceError::Unsupported(format!(
            "copy from {:?} to {:?}",
            src.format, dst.format
        )));
    }
    if !src.usage.contains(TextureUsage::COPY_SRC) || !dst.usage.contains(TextureUsage::COPY_DST) {
        return Err(ResourceError::Unsupported(
            "copy needs COPY_SRC and COPY_DST usages".to_string(),
        ));
    }
    region_in(region, &src)?;
    region_in(region, &dst)
}
