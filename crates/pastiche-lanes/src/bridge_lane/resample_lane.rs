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

//! The resizing bridge: any view rect, any model resolution.
//!
//! Packing samples the view rect bilinearly into the tensor plane. Unpacking
//! decodes into a scratch texture of the tensor's extent, then upscales it
//! into the target's view rect. When the extents already match, both steps
//! fall back to the exact kernels.

use super::validation::{self, SCRATCH, SOURCE, TARGET};
use super::{PackRequest, TensorBridgeLane, UnpackRequest};
use pastiche_core::gpu::{
    CommandEncoder, DecodeTensorParams, EncodeTensorParams, GraphicsDevice, ResampleParams,
    SamplingMode,
};
use pastiche_core::lane::{Lane, LaneKind};
use pastiche_core::math::Rect;
use pastiche_core::{FormatMismatch, StylizeError};
use std::any::Any;

/// Packs and unpacks through bilinear resampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResampleBridgeLane;

impl ResampleBridgeLane {
    /// Creates the lane.
    pub fn new() -> Self {
        Self
    }
}

impl Lane for ResampleBridgeLane {
    fn strategy_name(&self) -> &'static str {
        "Resample"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::TensorBridge
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TensorBridgeLane for ResampleBridgeLane {
    fn needs_scratch(&self) -> bool {
        true
    }

    fn check_pack(
        &self,
        device: &dyn GraphicsDevice,
        request: &PackRequest,
    ) -> Result<Rect, StylizeError> {
        let info = validation::texture(device, request.source, SOURCE)?;
        validation::readable(&info, &request.tensor, SOURCE)?;
        Ok(validation::resolve_view(&info, request.view, SOURCE)?)
    }

    fn check_unpack(
        &self,
        device: &dyn GraphicsDevice,
        request: &UnpackRequest,
    ) -> Result<Rect, StylizeError> {
        let info = validation::texture(device, request.target, TARGET)?;
        validation::writable(&info, &request.tensor, TARGET)?;
        let region = validation::resolve_view(&info, request.view, TARGET)?;
        if region.extent() == request.tensor.shape.extent() {
            return Ok(region);
        }

        // A resize needs the scratch texture, sized to the tensor plane.
        let Some(scratch) = request.scratch else {
            return Err(FormatMismatch::ExtentMismatch {
                resource: TARGET,
                expected: request.tensor.shape.extent(),
                actual: region.extent(),
            }
            .into());
        };
        let scratch_info = validation::texture(device, scratch, SCRATCH)?;
        validation::writable(&scratch_info, &request.tensor, SCRATCH)?;
        validation::exact_extent(Rect::full(scratch_info.size), &request.tensor, SCRATCH)?;
        Ok(region)
    }

    fn pack(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        request: &PackRequest,
    ) -> Result<(), StylizeError> {
        let region = self.check_pack(device, request)?;
        let sampling = if region.extent() == request.tensor.shape.extent() {
            SamplingMode::Exact
        } else {
            SamplingMode::Bilinear
        };
        let (scale, bias) = request.range.encode_affine();
        encoder
            .encode_tensor(&EncodeTensorParams {
                source: request.source,
                region,
                target: request.tensor,
                order: request.order,
                scale,
                bias,
                sampling,
            })
            .map_err(|e| StylizeError::from_recording(SOURCE, e))
    }

    fn unpack(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        request: &UnpackRequest,
    ) -> Result<(), StylizeError> {
        let region = self.check_unpack(device, request)?;
        let plane = Rect::full(request.tensor.shape.extent());
        let (scale, bias) = request.range.decode_affine();
        let decode = |target, region| DecodeTensorParams {
            source: request.tensor,
            target,
            region,
            order: request.order,
            scale,
            bias,
        };

        match request.scratch {
            Some(scratch) if region.extent() != plane.extent() => {
                encoder
                    .decode_tensor(&decode(scratch, plane))
                    .map_err(|e| StylizeError::from_recording(SCRATCH, e))?;
                encoder
                    .resample_texture(&ResampleParams {
                        source: scratch,
                        source_region: plane,
                        target: request.target,
                        target_region: region,
                    })
                    .map_err(|e| StylizeError::from_recording(TARGET, e))
            }
            _ => encoder
                .decode_tensor(&decode(request.target, region))
                .map_err(|e| StylizeError::from_recording(TARGET, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch_texture_descriptor;
    use approx::assert_abs_diff_eq;
    use pastiche_core::gpu::{
        BufferDescriptor, BufferUsage, TensorView, TextureDescriptor, TextureFormat, TextureId,
        TextureUsage,
    };
    use pastiche_core::math::Extent2D;
    use pastiche_core::tensor::{ChannelOrder, PixelRange, Precision, TensorShape};
    use pastiche_infra::SoftwareDevice;

    fn color_texture(device: &SoftwareDevice, size: Extent2D) -> TextureId {
        device
            .create_texture(&TextureDescriptor {
                label: None,
                size,
                format: TextureFormat::Rgba32Float,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING,
            })
            .unwrap()
    }

    fn tensor(device: &SoftwareDevice, extent: Extent2D) -> TensorView {
        let shape = TensorShape::nchw(3, extent.height, extent.width);
        TensorView {
            buffer: device
                .create_buffer(&BufferDescriptor {
                    label: None,
                    size: shape.byte_size(Precision::F32),
                    usage: BufferUsage::TENSOR,
                })
                .unwrap(),
            shape,
            precision: Precision::F32,
        }
    }

    #[test]
    fn test_uniform_frame_survives_down_and_up_sampling() {
        let device = SoftwareDevice::default();
        let frame_size = Extent2D::new(96, 54);
        let model_size = Extent2D::new(32, 32);
        let frame = color_texture(&device, frame_size);
        device
            .write_texels(frame, &vec![[0.25, 0.5, 0.75, 1.0]; frame_size.area() as usize])
            .unwrap();
        let input = tensor(&device, model_size);
        let scratch = device
            .create_texture(&scratch_texture_descriptor(model_size))
            .unwrap();

        let lane = ResampleBridgeLane::new();
        let mut encoder = device.create_command_encoder(None);
        lane.pack(
            &device,
            encoder.as_mut(),
            &PackRequest {
                source: frame,
                view: None,
                tensor: input,
                range: PixelRange::Signed,
                order: ChannelOrder::Rgb,
            },
        )
        .unwrap();
        lane.unpack(
            &device,
            encoder.as_mut(),
            &UnpackRequest {
                tensor: input,
                target: frame,
                view: None,
                range: PixelRange::Signed,
                order: ChannelOrder::Rgb,
                scratch: Some(scratch),
            },
        )
        .unwrap();
        device.submit_command_buffer(encoder.finish()).unwrap();

        for texel in device.read_texels(frame).unwrap() {
            assert_abs_diff_eq!(texel[0], 0.25, epsilon = 1e-3);
            assert_abs_diff_eq!(texel[1], 0.5, epsilon = 1e-3);
            assert_abs_diff_eq!(texel[2], 0.75, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_resize_without_scratch_is_an_extent_mismatch() {
        let device = SoftwareDevice::default();
        let target = color_texture(&device, Extent2D::new(64, 64));
        let output = tensor(&device, Extent2D::new(16, 16));
        let err = ResampleBridgeLane::new()
            .check_unpack(
                &device,
                &UnpackRequest {
                    tensor: output,
                    target,
                    view: None,
                    range: PixelRange::Unit,
                    order: ChannelOrder::Rgb,
                    scratch: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "FormatMismatch");
    }

    #[test]
    fn test_matching_extent_needs_no_scratch() {
        let device = SoftwareDevice::default();
        let target = color_texture(&device, Extent2D::new(16, 16));
        let output = tensor(&device, Extent2D::new(16, 16));
        let region = ResampleBridgeLane::new()
            .check_unpack(
                &device,
                &UnpackRequest {
                    tensor: output,
                    target,
                    view: None,
                    range: PixelRange::Unit,
                    order: ChannelOrder::Rgb,
                    scratch: None,
                },
            )
            .unwrap();
        assert_eq!(region, Rect::new(0, 0, 16, 16));
    }
}
