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

//! Runs a few hundred frames through every model of a catalog.
//!
//! ```text
//! cargo run -p sandbox -- [pipeline.ron|pipeline.json] [catalog.ron]
//! ```
//!
//! Without arguments a built-in catalog of color-transfer styles is used.

use anyhow::{bail, Context, Result};
use pastiche_core::gpu::{TextureDescriptor, TextureFormat, TextureUsage};
use pastiche_core::math::Extent2D;
use pastiche_infra::SoftwareDevice;
use pastiche_sdk::prelude::*;
use pastiche_sdk::{init_logging, load_config};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_SIZE: Extent2D = Extent2D {
    width: 320,
    height: 180,
};
const FRAMES_PER_MODEL: u64 = 120;

fn builtin_catalog() -> ModelCatalog {
    #[rustfmt::skip]
    let sepia = vec![
        0.393, 0.769, 0.189,
        0.349, 0.686, 0.168,
        0.272, 0.534, 0.131,
    ];
    #[rustfmt::skip]
    let grayscale = vec![
        0.299, 0.587, 0.114,
        0.299, 0.587, 0.114,
        0.299, 0.587, 0.114,
    ];
    let (w, h) = (FRAME_SIZE.width, FRAME_SIZE.height);
    ModelCatalog::new()
        .with_model(ModelDescriptor::identity("identity", w, h))
        .with_model(ModelDescriptor::pointwise("sepia", w, h, sepia, vec![0.0; 3]))
        .with_model(ModelDescriptor::pointwise("grayscale", w, h, grayscale, vec![0.0; 3]))
}

fn gradient(frame: u64) -> Vec<[f32; 4]> {
    let shift = (frame % 60) as f32 / 60.0;
    (0..FRAME_SIZE.height)
        .flat_map(|y| {
            (0..FRAME_SIZE.width).map(move |x| {
                let u = x as f32 / FRAME_SIZE.width as f32;
                let v = y as f32 / FRAME_SIZE.height as f32;
                [(u + shift).fract(), v, 1.0 - u, 1.0]
            })
        })
        .collect()
}

fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(&path)?,
        None => PipelineConfig::default(),
    };
    let catalog = match args.next() {
        Some(path) => ModelCatalog::load(&path)?,
        None => builtin_catalog(),
    };
    if catalog.is_empty() {
        bail!("the model catalog is empty");
    }
    let models: Vec<ModelId> = catalog.ids().cloned().collect();

    let device = SoftwareDevice::default();
    let mut controller =
        PipelineController::new(&device, default_registry(), Arc::new(catalog), config)?;
    controller.set_status_callback(|event| log::info!("Sandbox: {event:?}"));

    let frame = device
        .create_texture(&TextureDescriptor {
            label: Some("Sandbox Frame".into()),
            size: FRAME_SIZE,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::STORAGE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
        })
        .context("failed to create the frame texture")?;

    let mut frame_index = 0;
    for model in models {
        if let Err(e) = controller.set_model(model.clone()) {
            log::error!("Sandbox: cannot use '{model}': {e}");
            continue;
        }
        let state = controller.block_until_settled(Duration::from_secs(30));
        log::info!("Sandbox: '{model}' settled in state {state}");

        let started = Instant::now();
        for _ in 0..FRAMES_PER_MODEL {
            device
                .write_texels(frame, &gradient(frame_index))
                .context("failed to upload the frame")?;
            controller.stylize_frame(&device, FrameTargets::in_place(frame))?;
            frame_index += 1;
        }
        let elapsed = started.elapsed();
        log::info!(
            "Sandbox: {} frames with '{}' in {:?} ({:.2} ms/frame)",
            FRAMES_PER_MODEL,
            model,
            elapsed,
            elapsed.as_secs_f64() * 1000.0 / FRAMES_PER_MODEL as f64
        );
    }

    let stats = controller.stats();
    log::info!("--- Pipeline Summary ---");
    log::info!(
        "  Frames: {} stylized, {} passed through, {} without pass",
        stats.frames.stylized,
        stats.frames.passed_through,
        stats.frames.unscheduled
    );
    log::info!(
        "  Models: {} activated, {} failed to load",
        stats.models_activated,
        stats.load_failures
    );
    log::info!(
        "  Tensor pairs: peak {}, {} allocations",
        stats.pool.peak_pairs,
        stats.pool.allocations
    );
    log::info!("------------------------");

    controller.clear_model();
    controller.shutdown(&device);
    Ok(())
}
