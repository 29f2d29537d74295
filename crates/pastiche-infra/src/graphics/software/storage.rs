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

//! Host-side storage backing the software device's resources.

use half::f16;
use pastiche_core::gpu::{BufferId, TensorView, TextureFormat, TextureId, TextureInfo};
use pastiche_core::math::Rect;
use pastiche_core::tensor::Precision;
use std::collections::HashMap;

/// A texture stored as linear RGBA texels, row-major.
#[derive(Debug, Clone)]
pub struct SoftwareTexture {
    pub(crate) info: TextureInfo,
    pub(crate) texels: Vec<[f32; 4]>,
}

impl SoftwareTexture {
    pub(crate) fn new(info: TextureInfo) -> Self {
        let clear = quantize(info.format, [0.0, 0.0, 0.0, 1.0]);
        Self {
            info,
            texels: vec![clear; info.size.area() as usize],
        }
    }

    /// Properties the texture was created with.
    pub fn info(&self) -> TextureInfo {
        self.info
    }

    /// All texels, row-major, in linear space.
    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    /// The texel at (`x`, `y`).
    pub fn load(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[(y * self.info.size.width + x) as usize]
    }

    /// Writes a texel, quantized to the texture's format.
    pub fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let index = (y * self.info.size.width + x) as usize;
        self.texels[index] = quantize(self.info.format, value);
    }

    /// Bilinear lookup at continuous texel coordinates, clamped to `clamp`.
    ///
    /// Texel centers sit at half-integer coordinates.
    pub fn sample_bilinear(&self, u: f32, v: f32, clamp: Rect) -> [f32; 4] {
        let px = u - 0.5;
        let py = v - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;

        let clamp_x = |x: f32| (x.max(clamp.x as f32) as u32).min(clamp.x + clamp.width - 1);
        let clamp_y = |y: f32| (y.max(clamp.y as f32) as u32).min(clamp.y + clamp.height - 1);
        let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let (t00, t10) = (self.load(xa, ya), self.load(xb, ya));
        let (t01, t11) = (self.load(xa, yb), self.load(xb, yb));
        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = t00[c] + (t10[c] - t00[c]) * fx;
            let bottom = t01[c] + (t11[c] - t01[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        out
    }
}

/// Every live resource of a software device.
///
/// Host tasks recorded by inference runtimes receive mutable access to this
/// while the submission they belong to executes.
#[derive(Debug, Default)]
pub struct SoftwareResources {
    pub(crate) buffers: HashMap<BufferId, Vec<u8>>,
    pub(crate) textures: HashMap<TextureId, SoftwareTexture>,
}

impl SoftwareResources {
    /// Raw contents of a buffer.
    pub fn buffer(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    /// A texture, if alive.
    pub fn texture(&self, id: TextureId) -> Option<&SoftwareTexture> {
        self.textures.get(&id)
    }

    /// A texture, if alive.
    pub fn texture_mut(&mut self, id: TextureId) -> Option<&mut SoftwareTexture> {
        self.textures.get_mut(&id)
    }

    /// Decodes the elements of a tensor to `f32`, in memory order.
    pub fn read_tensor(&self, view: &TensorView) -> Result<Vec<f32>, String> {
        let bytes = self
            .buffers
            .get(&view.buffer)
            .ok_or_else(|| format!("tensor buffer {:?} is not alive", view.buffer))?;
        let len = view.byte_size() as usize;
        if bytes.len() < len {
            return Err(format!(
                "tensor {} needs {len} bytes, buffer {:?} holds {}",
                view.shape,
                view.buffer,
                bytes.len()
            ));
        }
        Ok(decode_elements(&bytes[..len], view.precision))
    }

    /// Encodes `values` into a tensor, in memory order.
    pub fn write_tensor(&mut self, view: &TensorView, values: &[f32]) -> Result<(), String> {
        let expected = view.shape.element_count() as usize;
        if values.len() != expected {
            return Err(format!(
                "tensor {} has {expected} elements, got {}",
                view.shape,
                values.len()
            ));
        }
        let bytes = self
            .buffers
            .get_mut(&view.buffer)
            .ok_or_else(|| format!("tensor buffer {:?} is not alive", view.buffer))?;
        let len = view.byte_size() as usize;
        if bytes.len() < len {
            return Err(format!(
                "tensor {} needs {len} bytes, buffer {:?} holds {}",
                view.shape,
                view.buffer,
                bytes.len()
            ));
        }
        encode_elements(values, view.precision, &mut bytes[..len]);
        Ok(())
    }
}

pub(crate) fn decode_elements(bytes: &[u8], precision: Precision) -> Vec<f32> {
    match precision {
        Precision::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Precision::F16 => bytes
            .chunks_exact(2)
            .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
            .collect(),
    }
}

pub(crate) fn encode_elements(values: &[f32], precision: Precision, out: &mut [u8]) {
    match precision {
        Precision::F32 => {
            for (chunk, v) in out.chunks_exact_mut(4).zip(values) {
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        Precision::F16 => {
            for (chunk, v) in out.chunks_exact_mut(2).zip(values) {
                chunk.copy_from_slice(&f16::from_f32(*v).to_bits().to_le_bytes());
            }
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn unorm8(c: f32) -> f32 {
    (c.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

/// Rounds a linear texel to what `format` can represent.
pub(crate) fn quantize(format: TextureFormat, v: [f32; 4]) -> [f32; 4] {
    match format {
        TextureFormat::R8Unorm => [unorm8(v[0]), 0.0, 0.0, 1.0],
        TextureFormat::Rg8Unorm => [unorm8(v[0]), unorm8(v[1]), 0.0, 1.0],
        TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => v.map(unorm8),
        TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb => [
            srgb_to_linear(unorm8(linear_to_srgb(v[0]))),
            srgb_to_linear(unorm8(linear_to_srgb(v[1]))),
            srgb_to_linear(unorm8(linear_to_srgb(v[2]))),
            unorm8(v[3]),
        ],
        TextureFormat::Rgba16Float => v.map(|c| f16::from_f32(c).to_f32()),
        TextureFormat::Rgba32Float => v,
        TextureFormat::R32Float | TextureFormat::Depth32Float => [v[0], 0.0, 0.0, 1.0],
        TextureFormat::Depth24PlusStencil8 => [v[0].clamp(0.0, 1.0), 0.0, 0.0, 1.0],
    }
}

/// Decodes tightly packed texel bytes into linear texels.
pub(crate) fn texels_from_bytes(
    format: TextureFormat,
    data: &[u8],
) -> Result<Vec<[f32; 4]>, String> {
    let bpp = format.bytes_per_pixel() as usize;
    let byte = |b: u8| b as f32 / 255.0;
    let float = |b: &[u8]| f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let half = |b: &[u8]| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32();

    data.chunks_exact(bpp)
        .map(|t| match format {
            TextureFormat::R8Unorm => Ok([byte(t[0]), 0.0, 0.0, 1.0]),
            TextureFormat::Rg8Unorm => Ok([byte(t[0]), byte(t[1]), 0.0, 1.0]),
            TextureFormat::Rgba8Unorm => Ok([byte(t[0]), byte(t[1]), byte(t[2]), byte(t[3])]),
            TextureFormat::Bgra8Unorm => Ok([byte(t[2]), byte(t[1]), byte(t[0]), byte(t[3])]),
            TextureFormat::Rgba8UnormSrgb => Ok([
                srgb_to_linear(byte(t[0])),
                srgb_to_linear(byte(t[1])),
                srgb_to_linear(byte(t[2])),
                byte(t[3]),
            ]),
            TextureFormat::Bgra8UnormSrgb => Ok([
                srgb_to_linear(byte(t[2])),
                srgb_to_linear(byte(t[1])),
                srgb_to_linear(byte(t[0])),
                byte(t[3]),
            ]),
            TextureFormat::Rgba16Float => {
                Ok([half(&t[0..2]), half(&t[2..4]), half(&t[4..6]), half(&t[6..8])])
            }
            TextureFormat::Rgba32Float => Ok([
                float(&t[0..4]),
                float(&t[4..8]),
                float(&t[8..12]),
                float(&t[12..16]),
            ]),
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                Ok([float(t), 0.0, 0.0, 1.0])
            }
            TextureFormat::Depth24PlusStencil8 => {
                Err("depth-stencil textures cannot be written from the host".to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pastiche_core::gpu::TextureUsage;
    use pastiche_core::math::Extent2D;
    use pastiche_core::tensor::TensorShape;

    fn texture(format: TextureFormat, w: u32, h: u32) -> SoftwareTexture {
        SoftwareTexture::new(TextureInfo {
            size: Extent2D::new(w, h),
            format,
            usage: TextureUsage::TEXTURE_BINDING,
        })
    }

    #[test]
    fn test_store_quantizes_to_eight_bits() {
        let mut tex = texture(TextureFormat::Rgba8Unorm, 1, 1);
        tex.store(0, 0, [0.5, 1.5, -0.2, 1.0]);
        let t = tex.load(0, 0);
        assert_relative_eq!(t[0], 128.0 / 255.0);
        assert_eq!(t[1], 1.0);
        assert_eq!(t[2], 0.0);
    }

    #[test]
    fn test_srgb_bytes_decode_to_linear() {
        let texels = texels_from_bytes(TextureFormat::Rgba8UnormSrgb, &[255, 0, 188, 255]).unwrap();
        assert_relative_eq!(texels[0][0], 1.0);
        assert_relative_eq!(texels[0][2], 0.5029, epsilon = 1e-3);
    }

    #[test]
    fn test_bgra_bytes_are_swizzled() {
        let texels = texels_from_bytes(TextureFormat::Bgra8Unorm, &[255, 0, 0, 255]).unwrap();
        assert_eq!(texels[0], [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_bilinear_sample_at_center_is_exact() {
        let mut tex = texture(TextureFormat::Rgba32Float, 2, 1);
        tex.store(0, 0, [0.0; 4]);
        tex.store(1, 0, [1.0; 4]);
        let full = Rect::new(0, 0, 2, 1);
        assert_eq!(tex.sample_bilinear(0.5, 0.5, full)[0], 0.0);
        assert_eq!(tex.sample_bilinear(1.5, 0.5, full)[0], 1.0);
        assert_relative_eq!(tex.sample_bilinear(1.0, 0.5, full)[0], 0.5);
        // Clamped at the edges.
        assert_eq!(tex.sample_bilinear(-3.0, 0.5, full)[0], 0.0);
        assert_eq!(tex.sample_bilinear(9.0, 0.5, full)[0], 1.0);
    }

    #[test]
    fn test_tensor_round_trip_f16() {
        let mut res = SoftwareResources::default();
        let view = TensorView {
            buffer: BufferId(0),
            shape: TensorShape::nchw(3, 1, 2),
            precision: Precision::F16,
        };
        res.buffers.insert(BufferId(0), vec![0; view.byte_size() as usize]);
        let values = [0.0, 0.25, 0.5, 0.75, 1.0, -1.0];
        res.write_tensor(&view, &values).unwrap();
        assert_eq!(res.read_tensor(&view).unwrap(), values.to_vec());
    }

    #[test]
    fn test_write_tensor_rejects_wrong_length() {
        let mut res = SoftwareResources::default();
        let view = TensorView {
            buffer: BufferId(0),
            shape: TensorShape::nchw(3, 1, 1),
            precision: Precision::F32,
        };
        res.buffers.insert(BufferId(0), vec![0; 12]);
        assert!(res.write_tensor(&view, &[1.0]).is_err());
    }
}
