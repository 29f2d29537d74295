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

//! CPU implementations of the tensor bridge kernels.
//!
//! They mirror the WGSL programs of the wgpu backend one thread per element.

use super::storage::SoftwareResources;
use pastiche_core::gpu::{
    DecodeTensorParams, EncodeTensorParams, ResampleParams, SamplingMode, TextureId,
};
use pastiche_core::math::Rect;

fn missing_texture(id: TextureId) -> String {
    format!("texture {id:?} is not alive")
}

pub(crate) fn encode_tensor(
    resources: &mut SoftwareResources,
    params: &EncodeTensorParams,
) -> Result<(), String> {
    let source = resources
        .texture(params.source)
        .ok_or_else(|| missing_texture(params.source))?;
    let shape = params.target.shape;
    let region = params.region;
    if !region.fits_within(source.info().size) {
        return Err(format!("encode region {region} exceeds {}", source.info().size));
    }
    if params.sampling == SamplingMode::Exact
        && (region.width, region.height) != (shape.width, shape.height)
    {
        return Err(format!("exact encode of {region} into {shape}"));
    }

    let step_x = region.width as f32 / shape.width as f32;
    let step_y = region.height as f32 / shape.height as f32;
    let mut values = vec![0.0; shape.element_count() as usize];
    for y in 0..shape.height {
        for x in 0..shape.width {
            let texel = match params.sampling {
                SamplingMode::Exact => source.load(region.x + x, region.y + y),
                SamplingMode::Bilinear => source.sample_bilinear(
                    region.x as f32 + (x as f32 + 0.5) * step_x,
                    region.y as f32 + (y as f32 + 0.5) * step_y,
                    region,
                ),
            };
            for c in 0..shape.channels {
                let channel = params.order.texel_channel(c);
                let value = if channel < 4 { texel[channel] } else { 0.0 };
                values[shape.index(c, y, x)] = value * params.scale + params.bias;
            }
        }
    }
    resources.write_tensor(&params.target, &values)
}

pub(crate) fn decode_tensor(
    resources: &mut SoftwareResources,
    params: &DecodeTensorParams,
) -> Result<(), String> {
    let values = resources.read_tensor(&params.source)?;
    let shape = params.source.shape;
    let region = params.region;
    let target = resources
        .texture_mut(params.target)
        .ok_or_else(|| missing_texture(params.target))?;
    if (region.width, region.height) != (shape.width, shape.height)
        || !region.fits_within(target.info().size)
    {
        return Err(format!("decode of {shape} into region {region}"));
    }

    for y in 0..shape.height {
        for x in 0..shape.width {
            let mut texel = [0.0, 0.0, 0.0, 1.0];
            for c in 0..shape.channels.min(4) {
                texel[params.order.texel_channel(c)] =
                    values[shape.index(c, y, x)] * params.scale + params.bias;
            }
            target.store(region.x + x, region.y + y, texel);
        }
    }
    Ok(())
}

pub(crate) fn resample_texture(
    resources: &mut SoftwareResources,
    params: &ResampleParams,
) -> Result<(), String> {
    let source = resources
        .texture(params.source)
        .ok_or_else(|| missing_texture(params.source))?;
    let (src, dst) = (params.source_region, params.target_region);
    if !src.fits_within(source.info().size) || src.is_empty() {
        return Err(format!("resample source region {src} is invalid"));
    }

    let step_x = src.width as f32 / dst.width as f32;
    let step_y = src.height as f32 / dst.height as f32;
    let mut texels = Vec::with_capacity(dst.width as usize * dst.height as usize);
    for y in 0..dst.height {
        for x in 0..dst.width {
            texels.push(source.sample_bilinear(
                src.x as f32 + (x as f32 + 0.5) * step_x,
                src.y as f32 + (y as f32 + 0.5) * step_y,
                src,
            ));
        }
    }
    write_region(resources, params.target, dst, &texels)
}

pub(crate) fn copy_texture(
    resources: &mut SoftwareResources,
    source: TextureId,
    target: TextureId,
    region: Rect,
) -> Result<(), String> {
    let texture = resources
        .texture(source)
        .ok_or_else(|| missing_texture(source))?;
    if !region.fits_within(texture.info().size) {
        return Err(format!("copy region {region} exceeds {}", texture.info().size));
    }
    let mut texels = Vec::with_capacity(region.width as usize * region.height as usize);
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            texels.push(texture.load(x, y));
        }
    }
    write_region(resources, target, region, &texels)
}

fn write_region(
    resources: &mut SoftwareResources,
    target: TextureId,
    region: Rect,
    texels: &[[f32; 4]],
) -> Result<(), String> {
    let texture = resources
        .texture_mut(target)
        .ok_or_else(|| missing_texture(target))?;
    if !region.fits_within(texture.info().size) {
        return Err(format!("target region {region} exceeds {}", texture.info().size));
    }
    for (i, texel) in texels.iter().enumerate() {
        let x = region.x + i as u32 % region.width;
        let y = region.y + i as u32 / region.width;
        texture.store(x, y, *texel);
    }
    Ok(())
}
