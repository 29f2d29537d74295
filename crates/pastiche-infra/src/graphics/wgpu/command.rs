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

use pastiche_core::gpu::{
    CommandBufferId, CommandEncoder, DecodeTensorParams, EncodeTensorParams, FenceValue,
    GraphicsDevice, ResampleParams, ResourceError, SamplingMode, TensorView, TextureId,
    THREAD_GROUP_SIZE,
};
use pastiche_core::math::{Extent2D, Rect};
use pastiche_core::tensor::{Precision, TensorLayout};
use std::any::Any;

use super::conversions::IntoWgpu;
use super::device::WgpuDevice;
use super::kernels::{
    ComputeKernel, KernelKind, PointwiseKernelParams, ResampleKernelParams, TensorKernelParams,
};
use crate::graphics::validation;

/// Buffers of a 1×1 convolution dispatch.
#[derive(Debug, Clone, Copy)]
pub struct PointwiseDispatch<'a> {
    /// Tensor read by the convolution.
    pub input: &'a TensorView,
    /// Tensor written by the convolution.
    pub output: &'a TensorView,
    /// `outputs × inputs` weights followed by `outputs` biases.
    pub weights: &'a wgpu::Buffer,
}

pub struct WgpuCommandEncoder {
    pub(crate) encoder: Option<wgpu::CommandEncoder>,
    pub(crate) device: WgpuDevice,
}

fn layout_code(layout: TensorLayout) -> u32 {
    match layout {
        TensorLayout::Nchw => 0,
        TensorLayout::Nhwc => 1,
    }
}

fn require_f32(view: &TensorView) -> Result<(), ResourceError> {
    if view.precision != Precision::F32 {
        return Err(ResourceError::Unsupported(
            "wgpu kernels operate on f32 tensors".to_string(),
        ));
    }
    Ok(())
}

impl WgpuCommandEncoder {
    /// Provides mutable access to the underlying `wgpu::CommandEncoder`.
    /// Returns `None` if the encoder has already been consumed by `finish()`.
    pub fn wgpu_encoder_mut(&mut self) -> Option<&mut wgpu::CommandEncoder> {
        self.encoder.as_mut()
    }

    /// The device this encoder records for.
    pub fn device(&self) -> &WgpuDevice {
        &self.device
    }

    fn buffer(&self, view: &TensorView) -> Result<std::sync::Arc<wgpu::Buffer>, ResourceError> {
        self.device
            .get_wgpu_buffer(view.buffer)
            .ok_or(ResourceError::NotFound)
    }

    fn texture_view(&self, id: TextureId) -> Result<wgpu::TextureView, ResourceError> {
        let texture = self
            .device
            .get_wgpu_texture(id)
            .ok_or(ResourceError::NotFound)?;
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn dispatch(
        &mut self,
        label: &str,
        kernel: &ComputeKernel,
        resources: &[wgpu::BindingResource<'_>],
        extent: Extent2D,
    ) -> Result<(), ResourceError> {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = resources
            .iter()
            .enumerate()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: resource.clone(),
            })
            .collect();
        let bind_group = self
            .device
            .wgpu_device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &kernel.layout,
                entries: &entries,
            });

        let encoder = self.encoder.as_mut().ok_or_else(|| {
            ResourceError::BackendError("command encoder already finished".to_string())
        })?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (x, y) = extent.workgroups(THREAD_GROUP_SIZE);
        pass.dispatch_workgroups(x, y, 1);
        Ok(())
    }

    /// Records a 1×1 convolution over `dispatch.input`.
    pub fn dispatch_pointwise(
        &mut self,
        dispatch: &PointwiseDispatch<'_>,
    ) -> Result<(), ResourceError> {
        require_f32(dispatch.input)?;
        require_f32(dispatch.output)?;
        let (input_shape, output_shape) = (dispatch.input.shape, dispatch.output.shape);
        let input = self.buffer(dispatch.input)?;
        let output = self.buffer(dispatch.output)?;
        let kernel = self.device.kernel(KernelKind::Pointwise)?;
        let params = PointwiseKernelParams {
            width: output_shape.width,
            height: output_shape.height,
            in_channels: input_shape.channels,
            out_channels: output_shape.channels,
            in_layout: layout_code(input_shape.layout),
            out_layout: layout_code(output_shape.layout),
            _pad: [0; 2],
        };
        let uniform = self
            .device
            .create_uniform_buffer("Pastiche Pointwise Params", bytemuck::bytes_of(&params));
        self.dispatch(
            "Pastiche Pointwise Conv",
            &kernel,
            &[
                uniform.as_entire_binding(),
                dispatch.weights.as_entire_binding(),
                input.as_entire_binding(),
                output.as_entire_binding(),
            ],
            output_shape.extent(),
        )
    }
}

impl CommandEncoder for WgpuCommandEncoder {
    fn encode_tensor(&mut self, params: &EncodeTensorParams) -> Result<(), ResourceError> {
        validation::check_encode(&self.device, params)?;
        require_f32(&params.target)?;
        let source = self.texture_view(params.source)?;
        let tensor = self.buffer(&params.target)?;
        let info = self
            .device
            .texture_info(params.source)
            .ok_or(ResourceError::NotFound)?;
        let kernel = self.device.kernel(KernelKind::Encode)?;

        let shape = params.target.shape;
        let uniforms = TensorKernelParams {
            view_min: [params.region.x as f32, params.region.y as f32],
            view_size: [params.region.width as f32, params.region.height as f32],
            texture_size: [info.size.width as f32, info.size.height as f32],
            tensor_size: [shape.width, shape.height],
            channels: shape.channels,
            layout: layout_code(shape.layout),
            order: params.order.code(),
            exact: u32::from(params.sampling == SamplingMode::Exact),
            scale: params.scale,
            bias: params.bias,
            _pad: [0; 2],
        };
        let uniform = self
            .device
            .create_uniform_buffer("Pastiche Encode Params", bytemuck::bytes_of(&uniforms));
        self.dispatch(
            "Pastiche Encode Tensor",
            &kernel,
            &[
                uniform.as_entire_binding(),
                wgpu::BindingResource::TextureView(&source),
                tensor.as_entire_binding(),
            ],
            shape.extent(),
        )
    }

    fn decode_tensor(&mut self, params: &DecodeTensorParams) -> Result<(), ResourceError> {
        validation::check_decode(&self.device, params)?;
        require_f32(&params.source)?;
        let info = self
            .device
            .texture_info(params.target)
            .ok_or(ResourceError::NotFound)?;
        let target = self.texture_view(params.target)?;
        let tensor = self.buffer(&params.source)?;
        let kernel = self.device.kernel(KernelKind::Decode(info.format))?;

        let shape = params.source.shape;
        let uniforms = TensorKernelParams {
            view_min: [params.region.x as f32, params.region.y as f32],
            view_size: [params.region.width as f32, params.region.height as f32],
            texture_size: [info.size.width as f32, info.size.height as f32],
            tensor_size: [shape.width, shape.height],
            channels: shape.channels,
            layout: layout_code(shape.layout),
            order: params.order.code(),
            exact: 1,
            scale: params.scale,
            bias: params.bias,
            _pad: [0; 2],
        };
        let uniform = self
            .device
            .create_uniform_buffer("Pastiche Decode Params", bytemuck::bytes_of(&uniforms));
        self.dispatch(
            "Pastiche Decode Tensor",
            &kernel,
            &[
                uniform.as_entire_binding(),
                tensor.as_entire_binding(),
                wgpu::BindingResource::TextureView(&target),
            ],
            shape.extent(),
        )
    }

    fn resample_texture(&mut self, params: &ResampleParams) -> Result<(), ResourceError> {
        validation::check_resample(&self.device, params)?;
        let info = self
            .device
            .texture_info(params.target)
            .ok_or(ResourceError::NotFound)?;
        let source = self.texture_view(params.source)?;
        let target = self.texture_view(params.target)?;
        let kernel = self.device.kernel(KernelKind::Resample(info.format))?;

        let (src, dst) = (params.source_region, params.target_region);
        let uniforms = ResampleKernelParams {
            src_min: [src.x as f32, src.y as f32],
            src_size: [src.width as f32, src.height as f32],
            dst_origin: [dst.x, dst.y],
            dst_size: [dst.width, dst.height],
        };
        let uniform = self
            .device
            .create_uniform_buffer("Pastiche Resample Params", bytemuck::bytes_of(&uniforms));
        self.dispatch(
            "Pastiche Resample",
            &kernel,
            &[
                uniform.as_entire_binding(),
                wgpu::BindingResource::TextureView(&source),
                wgpu::BindingResource::TextureView(&target),
            ],
            Extent2D::new(dst.width, dst.height),
        )
    }

    fn copy_texture(
        &mut self,
        source: TextureId,
        target: TextureId,
        region: Rect,
    ) -> Result<(), ResourceError> {
        validation::check_copy(&self.device, source, target, region)?;
        let src = self
            .device
            .get_wgpu_texture(source)
            .ok_or(ResourceError::NotFound)?;
        let dst = self
            .device
            .get_wgpu_texture(target)
            .ok_or(ResourceError::NotFound)?;
        let origin = wgpu::Origin3d {
            x: region.x,
            y: region.y,
            z: 0,
        };
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            ResourceError::BackendError("command encoder already finished".to_string())
        })?;
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst,
                mip_level: 0,
                origin,
                aspect: wgpu::TextureAspect::All,
            },
            Extent2D::new(region.width, region.height).into_wgpu(),
        );
        Ok(())
    }

    fn wait_fence(&mut self, fence: FenceValue) {
        // Submissions on the single wgpu queue already execute in order.
        log::trace!("WgpuCommandEncoder: ordering after {fence} is implicit");
    }

    fn finish(mut self: Box<Self>) -> CommandBufferId {
        let command_buffer = self
            .encoder
            .take()
            .map(|encoder| encoder.finish())
            .unwrap_or_else(|| {
                log::error!("WgpuCommandEncoder: finish() called twice; submitting an empty buffer");
                self.device
                    .wgpu_device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None })
                    .finish()
            });
        self.device.register_command_buffer(command_buffer)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
