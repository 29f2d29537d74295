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

//! Compute pipelines implementing the tensor kernels, created on first use.

use super::conversions::{storage_format_name, IntoWgpu};
use bytemuck::{Pod, Zeroable};
use pastiche_core::gpu::{ResourceError, TextureFormat};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const ENCODE_WGSL: &str = include_str!("shaders/encode.wgsl");
const DECODE_WGSL: &str = include_str!("shaders/decode.wgsl");
const RESAMPLE_WGSL: &str = include_str!("shaders/resample.wgsl");
const POINTWISE_WGSL: &str = include_str!("shaders/pointwise.wgsl");

/// Uniforms of the encode and decode kernels. Mirrors `TensorParams` in `common.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct TensorKernelParams {
    pub view_min: [f32; 2],
    pub view_size: [f32; 2],
    pub texture_size: [f32; 2],
    pub tensor_size: [u32; 2],
    pub channels: u32,
    pub layout: u32,
    pub order: u32,
    pub exact: u32,
    pub scale: f32,
    pub bias: f32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct ResampleKernelParams {
    pub src_min: [f32; 2],
    pub src_size: [f32; 2],
    pub dst_origin: [u32; 2],
    pub dst_size: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct PointwiseKernelParams {
    pub width: u32,
    pub height: u32,
    pub in_channels: u32,
    pub out_channels: u32,
    pub in_layout: u32,
    pub out_layout: u32,
    pub _pad: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum KernelKind {
    Encode,
    Decode(TextureFormat),
    Resample(TextureFormat),
    Pointwise,
}

#[derive(Debug)]
pub(crate) struct ComputeKernel {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: wgpu::BindGroupLayout,
}

#[derive(Debug, Default)]
pub(crate) struct KernelCache {
    kernels: HashMap<KernelKind, Arc<ComputeKernel>>,
}

fn uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn sampled_texture(binding: u32) -> wgpu::BindGroupLayoutEntry {
    // Kernels only use textureLoad, so 32-bit float sources stay bindable.
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture(binding: u32, format: TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: format.into_wgpu(),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

impl KernelKind {
    fn label(&self) -> String {
        match self {
            KernelKind::Encode => "Pastiche Encode Tensor".to_string(),
            KernelKind::Decode(f) => format!("Pastiche Decode Tensor ({f:?})"),
            KernelKind::Resample(f) => format!("Pastiche Resample ({f:?})"),
            KernelKind::Pointwise => "Pastiche Pointwise Conv".to_string(),
        }
    }

    fn source(&self) -> Result<String, ResourceError> {
        let with_format = |body: &str, format: TextureFormat| {
            let name = storage_format_name(format).ok_or_else(|| {
                ResourceError::Unsupported(format!("{format:?} is not a storage format"))
            })?;
            Ok(format!("{COMMON_WGSL}\n{}", body.replace("{{FORMAT}}", name)))
        };
        match self {
            KernelKind::Encode => Ok(format!("{COMMON_WGSL}\n{ENCODE_WGSL}")),
            KernelKind::Decode(f) => with_format(DECODE_WGSL, *f),
            KernelKind::Resample(f) => with_format(RESAMPLE_WGSL, *f),
            KernelKind::Pointwise => Ok(POINTWISE_WGSL.to_string()),
        }
    }

    fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        match self {
            KernelKind::Encode => vec![uniform(0), sampled_texture(1), storage(2, false)],
            KernelKind::Decode(f) => vec![uniform(0), storage(1, true), storage_texture(2, *f)],
            KernelKind::Resample(f) => {
                vec![uniform(0), sampled_texture(1), storage_texture(2, *f)]
            }
            KernelKind::Pointwise => vec![
                uniform(0),
                storage(1, true),
                storage(2, true),
                storage(3, false),
            ],
        }
    }
}

impl KernelCache {
    pub(crate) fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        kind: KernelKind,
    ) -> Result<Arc<ComputeKernel>, ResourceError> {
        if let Some(kernel) = self.kernels.get(&kind) {
            return Ok(Arc::clone(kernel));
        }

        let label = kind.label();
        let source = kind.source()?;
        log::debug!("WgpuDevice: Creating compute kernel '{label}'");

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&label),
            entries: &kind.layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[Some(&layout)],
            ..Default::default()
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let kernel = Arc::new(ComputeKernel { pipeline, layout });
        self.kernels.insert(kind, Arc::clone(&kernel));
        Ok(kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layouts_match_wgsl_sizes() {
        assert_eq!(std::mem::size_of::<TensorKernelParams>(), 64);
        assert_eq!(std::mem::size_of::<ResampleKernelParams>(), 32);
        assert_eq!(std::mem::size_of::<PointwiseKernelParams>(), 32);
    }

    #[test]
    fn test_decode_source_substitutes_storage_format() {
        let source = KernelKind::Decode(TextureFormat::Rgba16Float).source().unwrap();
        assert!(source.contains("texture_storage_2d<rgba16float, write>"));
        assert!(source.contains("fn tensor_index"));
        assert!(KernelKind::Decode(TextureFormat::Bgra8Unorm).source().is_err());
    }
}
