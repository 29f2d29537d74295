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

use approx::assert_abs_diff_eq;
use pastiche_core::gpu::{
    BufferDescriptor, BufferUsage, DecodeTensorParams, EncodeTensorParams, GraphicsDevice,
    SamplingMode, TensorView, TextureDescriptor, TextureFormat, TextureId, TextureUsage,
};
use pastiche_core::math::{Extent2D, Rect};
use pastiche_core::tensor::{ChannelOrder, PixelRange, Precision, TensorShape};
use pastiche_infra::SoftwareDevice;

fn texture(device: &SoftwareDevice, size: Extent2D, format: TextureFormat) -> TextureId {
    device
        .create_texture(&TextureDescriptor {
            label: None,
            size,
            format,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::STORAGE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
        })
        .unwrap()
}

fn gradient(size: Extent2D) -> Vec<[f32; 4]> {
    let mut texels = Vec::with_capacity(size.area() as usize);
    for y in 0..size.height {
        for x in 0..size.width {
            let u = x as f32 / size.width as f32;
            let v = y as f32 / size.height as f32;
            texels.push([u, v, (u + v) * 0.5, 1.0]);
        }
    }
    texels
}

/// Encodes a gradient into a tensor and decodes it into a second texture.
fn round_trip(
    size: Extent2D,
    format: TextureFormat,
    precision: Precision,
    range: PixelRange,
    order: ChannelOrder,
) -> (Vec<[f32; 4]>, Vec<[f32; 4]>) {
    let device = SoftwareDevice::default();
    let source = texture(&device, size, format);
    let target = texture(&device, size, format);
    device.write_texels(source, &gradient(size)).unwrap();
    let expected = device.read_texels(source).unwrap();

    let shape = TensorShape::nchw(3, size.height, size.width);
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: shape.byte_size(precision),
            usage: BufferUsage::TENSOR,
        })
        .unwrap();
    let tensor = TensorView {
        buffer,
        shape,
        precision,
    };

    let (scale, bias) = range.encode_affine();
    let (inverse_scale, inverse_bias) = range.decode_affine();
    let mut encoder = device.create_command_encoder(Some("round trip"));
    encoder
        .encode_tensor(&EncodeTensorParams {
            source,
            region: Rect::full(size),
            target: tensor,
            order,
            scale,
            bias,
            sampling: SamplingMode::Exact,
        })
        .unwrap();
    encoder
        .decode_tensor(&DecodeTensorParams {
            source: tensor,
            target,
            region: Rect::full(size),
            order,
            scale: inverse_scale,
            bias: inverse_bias,
        })
        .unwrap();
    device.submit_command_buffer(encoder.finish()).unwrap();

    (expected, device.read_texels(target).unwrap())
}

fn assert_close(expected: &[[f32; 4]], actual: &[[f32; 4]], tolerance: f32) {
    assert_eq!(expected.len(), actual.len());
    for (e, a) in expected.iter().zip(actual) {
        for c in 0..3 {
            assert_abs_diff_eq!(e[c], a[c], epsilon = tolerance);
        }
        assert_abs_diff_eq!(a[3], 1.0, epsilon = tolerance);
    }
}

#[test]
fn float_textures_round_trip_at_f32() {
    for size in [Extent2D::new(1, 1), Extent2D::new(17, 9), Extent2D::new(64, 48)] {
        let (expected, actual) = round_trip(
            size,
            TextureFormat::Rgba32Float,
            Precision::F32,
            PixelRange::Byte,
            ChannelOrder::Rgb,
        );
        assert_close(&expected, &actual, 1e-5);
    }
}

#[test]
fn float_textures_round_trip_at_f16() {
    for range in [PixelRange::Unit, PixelRange::Signed] {
        let (expected, actual) = round_trip(
            Extent2D::new(32, 32),
            TextureFormat::Rgba16Float,
            Precision::F16,
            range,
            ChannelOrder::Bgr,
        );
        assert_close(&expected, &actual, 1e-3);
    }
}

#[test]
fn eight_bit_textures_round_trip_within_one_step() {
    let (expected, actual) = round_trip(
        Extent2D::new(40, 24),
        TextureFormat::Rgba8Unorm,
        Precision::F32,
        PixelRange::Signed,
        ChannelOrder::Rgb,
    );
    assert_close(&expected, &actual, 1.0 / 255.0);
}
