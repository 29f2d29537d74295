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

//! The strict bridge: one texel per tensor element.
//!
//! The view rect must match the model's spatial extent exactly. Resolution
//! mismatches are rejected with a [`FormatMismatch`](pastiche_core::FormatMismatch)
//! and left to a resize step upstream.

use super::validation::{self, SOURCE, TARGET};
use super::{PackRequest, TensorBridgeLane, UnpackRequest};
use pastiche_core::gpu::{
    CommandEncoder, DecodeTensorParams, EncodeTensorParams, GraphicsDevice, SamplingMode,
};
use pastiche_core::lane::{Lane, LaneKind};
use pastiche_core::math::Rect;
use pastiche_core::StylizeError;
use std::any::Any;

/// Packs and unpacks without resampling.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectBridgeLane;

impl DirectBridgeLane {
    /// Creates the lane.
    pub fn new() -> Self {
        Self
    }
}

impl Lane for DirectBridgeLane {
    fn strategy_name(&self) -> &'static str {
        "Direct"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::TensorBridge
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TensorBridgeLane for DirectBridgeLane {
    fn check_pack(
        &self,
        device: &dyn GraphicsDevice,
        request: &PackRequest,
    ) -> Result<Rect, StylizeError> {
        let info = validation::texture(device, request.source, SOURCE)?;
        validation::readable(&info, &request.tensor, SOURCE)?;
        let region = validation::resolve_view(&info, request.view, SOURCE)?;
        validation::exact_extent(region, &request.tensor, SOURCE)?;
        Ok(region)
    }

    fn check_unpack(
        &self,
        device: &dyn GraphicsDevice,
        request: &UnpackRequest,
    ) -> Result<Rect, StylizeError> {
        let info = validation::texture(device, request.target, TARGET)?;
        validation::writable(&info, &request.tensor, TARGET)?;
        let region = validation::resolve_view(&info, request.view, TARGET)?;
        validation::exact_extent(region, &request.tensor, TARGET)?;
        Ok(region)
    }

    fn pack(
        &self,
        device: &dyn GraphicsDevice,
        encoder: &mut dyn CommandEncoder,
        request: &PackRequest,
    ) -> Result<(), StylizeError> {
        let region = self.check_pack(device, request)?;
        let (scale, bias) = request.range.encode_affine();
        encoder
            .encode_tensor(&EncodeTensorParams {
                source: request.source,
                region,
                target: request.tensor,
                order: request.order,
                scale,
                bias,
                sampling: SamplingMode::Exact,
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
        let (scale, bias) = request.range.decode_affine();
        encoder
            .decode_tensor(&DecodeTensorParams {
                source: request.tensor,
                target: request.target,
                region,
                order: request.order,
                scale,
                bias,
            })
            .map_err(|e| StylizeError::from_recording(TARGET, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastiche_core::gpu::{
        BufferDescriptor, BufferUsage, TensorView, TextureDescriptor, TextureFormat, TextureId,
        TextureUsage,
    };
    use pastiche_core::math::Extent2D;
    use pastiche_core::tensor::{ChannelOrder, PixelRange, Precision, TensorShape};
    use pastiche_core::FormatMismatch;
    use pastiche_infra::SoftwareDevice;

    fn texture(
        device: &SoftwareDevice,
        size: Extent2D,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> TextureId {
        device
            .create_texture(&TextureDescriptor {
                label: None,
                size,
                format,
                usage,
            })
            .unwrap()
    }

    fn tensor(device: &SoftwareDevice, height: u32, width: u32) -> TensorView {
        let shape = TensorShape::nchw(3, height, width);
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

    fn pack_request(source: TextureId, tensor: TensorView) -> PackRequest {
        PackRequest {
            source,
            view: None,
            tensor,
            range: PixelRange::Unit,
            order: ChannelOrder::Rgb,
        }
    }

    fn pack_error(device: &SoftwareDevice, request: &PackRequest) -> FormatMismatch {
        let mut encoder = device.create_command_encoder(None);
        match DirectBridgeLane::new().pack(device, encoder.as_mut(), request) {
            Err(StylizeError::FormatMismatch(mismatch)) => mismatch,
            other => panic!("expected a format mismatch, got {other:?}"),
        }
    }

    const SAMPLED: TextureUsage = TextureUsage::TEXTURE_BINDING;

    #[test]
    fn test_full_hd_frame_into_square_model_is_an_extent_mismatch() {
        let device = SoftwareDevice::default();
        let frame = texture(&device, Extent2D::new(1920, 1080), TextureFormat::Rgba8Unorm, SAMPLED);
        let input = tensor(&device, 256, 256);
        assert_eq!(
            pack_error(&device, &pack_request(frame, input)),
            FormatMismatch::ExtentMismatch {
                resource: "source",
                expected: Extent2D::new(256, 256),
                actual: Extent2D::new(1920, 1080),
            }
        );
    }

    #[test]
    fn test_view_rect_selects_the_model_extent() {
        let device = SoftwareDevice::default();
        let frame = texture(&device, Extent2D::new(64, 64), TextureFormat::Rgba8Unorm, SAMPLED);
        let input = tensor(&device, 16, 32);
        let request = PackRequest {
            view: Some(Rect::new(8, 8, 32, 16)),
            ..pack_request(frame, input)
        };
        let mut encoder = device.create_command_encoder(None);
        DirectBridgeLane::new()
            .pack(&device, encoder.as_mut(), &request)
            .unwrap();

        let out_of_bounds = PackRequest {
            view: Some(Rect::new(40, 0, 32, 16)),
            ..request
        };
        assert!(matches!(
            pack_error(&device, &out_of_bounds),
            FormatMismatch::RegionOutOfBounds { .. }
        ));
    }

    #[test]
    fn test_missing_channels_and_depth_formats_are_rejected() {
        let device = SoftwareDevice::default();
        let size = Extent2D::new(4, 4);
        let input = tensor(&device, 4, 4);

        let red = texture(&device, size, TextureFormat::R8Unorm, SAMPLED);
        assert_eq!(
            pack_error(&device, &pack_request(red, input)),
            FormatMismatch::MissingChannel {
                resource: "source",
                available: 1,
                required: 3
            }
        );

        let depth = texture(&device, size, TextureFormat::Depth32Float, SAMPLED);
        assert!(matches!(
            pack_error(&device, &pack_request(depth, input)),
            FormatMismatch::UnsupportedFormat { .. }
        ));
    }

    #[test]
    fn test_empty_view_and_dead_texture() {
        let device = SoftwareDevice::default();
        let frame = texture(&device, Extent2D::new(4, 4), TextureFormat::Rgba8Unorm, SAMPLED);
        let input = tensor(&device, 4, 4);
        let empty = PackRequest {
            view: Some(Rect::new(0, 0, 0, 4)),
            ..pack_request(frame, input)
        };
        assert_eq!(
            pack_error(&device, &empty),
            FormatMismatch::EmptyRegion { resource: "source" }
        );

        device.destroy_texture(frame).unwrap();
        assert_eq!(
            pack_error(&device, &pack_request(frame, input)),
            FormatMismatch::MissingResource { resource: "source" }
        );
    }

    #[test]
    fn test_srgb_swapchain_is_not_writable() {
        let device = SoftwareDevice::default();
        let size = Extent2D::new(4, 4);
        let output = tensor(&device, 4, 4);
        let swapchain = texture(
            &device,
            size,
            TextureFormat::Bgra8UnormSrgb,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
        );
        let request = UnpackRequest {
            tensor: output,
            target: swapchain,
            view: None,
            range: PixelRange::Unit,
            order: ChannelOrder::Rgb,
            scratch: None,
        };
        let mut encoder = device.create_command_encoder(None);
        let err = DirectBridgeLane::new()
            .unpack(&device, encoder.as_mut(), &request)
            .unwrap_err();
        assert!(matches!(
            err,
            StylizeError::FormatMismatch(FormatMismatch::NotWritable { resource: "target", .. })
        ));
    }

    #[test]
    fn test_failed_pack_records_nothing() {
        let device = SoftwareDevice::default();
        let frame = texture(&device, Extent2D::new(8, 8), TextureFormat::Rgba8Unorm, SAMPLED);
        let input = tensor(&device, 4, 4);
        let mut encoder = device.create_command_encoder(None);
        assert!(DirectBridgeLane::new()
            .pack(&device, encoder.as_mut(), &pack_request(frame, input))
            .is_err());
        let encoder = encoder
            .as_any_mut()
            .downcast_mut::<pastiche_infra::graphics::software::SoftwareCommandEncoder>()
            .unwrap();
        assert_eq!(encoder.command_count(), 0);
    }
}
