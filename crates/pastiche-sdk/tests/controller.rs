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

//! The controller's state machine and failure policy, on the software device.

use approx::assert_abs_diff_eq;
use pastiche_core::gpu::{
    GraphicsBackendType, TextureDescriptor, TextureFormat, TextureUsage,
};
use pastiche_core::{FormatMismatch, InferenceError, LoadError};
use pastiche_infra::inference::pointwise::PointwiseWeights;
use pastiche_infra::{FaultInjector, PointwiseRuntime, SoftwareDevice, SoftwareDeviceConfig};
use pastiche_sdk::prelude::*;
use pastiche_sdk::EVENT_QUEUE_CAPACITY;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_secs(5);
const FILL: [f32; 4] = [0.2, 0.4, 0.6, 1.0];

fn invert(id: &str, width: u32, height: u32) -> ModelDescriptor {
    #[rustfmt::skip]
    let weights = vec![
        -1.0, 0.0, 0.0,
        0.0, -1.0, 0.0,
        0.0, 0.0, -1.0,
    ];
    ModelDescriptor::pointwise(id, width, height, weights, vec![1.0; 3])
}

fn catalog() -> Arc<ModelCatalog> {
    Arc::new(
        ModelCatalog::new()
            .with_model(invert("invert", 8, 8))
            .with_model(ModelDescriptor::identity("identity", 8, 8))
            .with_model(invert("invert-256", 256, 256))
            .with_model(invert("invert-16", 16, 16))
            .with_model(
                ModelDescriptor::identity("bad-shape", 8, 8).with_input_shape(vec![1, 3, 16, 16]),
            )
            .with_model(ModelDescriptor::from_file("missing", "/no/such/model.ron")),
    )
}

struct Fixture {
    device: SoftwareDevice,
    controller: PipelineController,
    faults: FaultInjector,
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl Fixture {
    fn new(device: SoftwareDevice, config: PipelineConfig) -> Self {
        let mut fx = Self::unobserved(device, config);
        let sink = fx.events.clone();
        fx.controller
            .set_status_callback(move |event| sink.lock().unwrap().push(event.clone()));
        fx
    }

    /// No status callback; events queue up until polled.
    fn unobserved(device: SoftwareDevice, config: PipelineConfig) -> Self {
        pastiche_sdk::init_test_logging();
        let faults = FaultInjector::new();
        let mut registry = RuntimeRegistry::new();
        registry.register(Arc::new(
            PointwiseRuntime::new().with_fault_injector(faults.clone()),
        ));
        let controller = PipelineController::new(&device, registry, catalog(), config).unwrap();
        Self {
            device,
            controller,
            faults,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn software() -> Self {
        Self::new(SoftwareDevice::default(), PipelineConfig::default())
    }

    fn ready(&mut self, model: &str) {
        self.controller.set_model(model).unwrap();
        assert_eq!(self.controller.block_until_settled(SETTLE), PipelineState::Ready);
    }

    fn frame(&mut self, width: u32, height: u32) -> TextureId {
        let id = self
            .device
            .create_texture(&TextureDescriptor {
                label: Some("frame".into()),
                size: pastiche_core::math::Extent2D::new(width, height),
                format: TextureFormat::Rgba32Float,
                usage: TextureUsage::TEXTURE_BINDING
                    | TextureUsage::STORAGE_BINDING
                    | TextureUsage::COPY_SRC
                    | TextureUsage::COPY_DST,
            })
            .unwrap();
        self.fill(id);
        id
    }

    fn fill(&self, id: TextureId) {
        let size = self.device.texture_info(id).unwrap().size;
        self.device
            .write_texels(id, &vec![FILL; size.area() as usize])
            .unwrap();
    }

    fn run(&mut self, frame: TextureId) -> FrameOutcome {
        self.controller
            .stylize_frame(&self.device, FrameTargets::in_place(frame))
            .unwrap()
    }

    fn events(&self) -> Vec<PipelineEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

fn assert_rgb(actual: [f32; 4], expected: [f32; 3]) {
    for c in 0..3 {
        assert_abs_diff_eq!(actual[c], expected[c], epsilon = 1e-5);
    }
}

fn states(events: &[PipelineEvent]) -> Vec<PipelineState> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

#[test]
fn set_model_loads_then_stylizes() {
    let mut fx = Fixture::software();
    assert_eq!(fx.controller.state(), PipelineState::Disabled);

    fx.controller.set_model("invert").unwrap();
    assert_eq!(fx.controller.state(), PipelineState::Loading);
    assert_eq!(fx.controller.block_until_settled(SETTLE), PipelineState::Ready);

    let frame = fx.frame(8, 8);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    assert_rgb(fx.device.read_texels(frame).unwrap()[9], [0.8, 0.6, 0.4]);
    assert_eq!(fx.controller.state(), PipelineState::Running);

    let events = fx.events();
    assert_eq!(
        states(&events),
        vec![PipelineState::Loading, PipelineState::Ready, PipelineState::Running]
    );
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::ModelActivated { id, .. } if id.as_str() == "invert"
    )));
    assert_eq!(fx.controller.active_model().map(ModelId::as_str), Some("invert"));
}

#[test]
fn invalid_models_fault_and_never_run() {
    for (model, expected) in [
        ("unknown", "UnknownModel"),
        ("missing", "MissingFile"),
        ("bad-shape", "ShapeMismatch"),
    ] {
        let mut fx = Fixture::software();
        let _ = fx.controller.set_model(model);
        fx.controller.block_until_settled(SETTLE);
        let frame = fx.frame(8, 8);
        for _ in 0..5 {
            assert_eq!(fx.run(frame), FrameOutcome::Unscheduled);
            assert_eq!(fx.controller.state(), PipelineState::Faulted, "{model}");
        }
        let error = fx.controller.last_error().unwrap();
        assert!(format!("{error:?}").contains(expected), "{model}: {error:?}");

        let events = fx.events();
        assert!(!states(&events).contains(&PipelineState::Running));
        assert!(events
            .iter()
            .any(|event| matches!(event, PipelineEvent::Fault { .. })));
        assert_eq!(fx.controller.stats().load_failures, 1);
    }
}

#[test]
fn unknown_model_fails_immediately() {
    let mut fx = Fixture::software();
    let err = fx.controller.set_model("unknown").unwrap_err();
    assert_eq!(
        err,
        StylizeError::Load(LoadError::UnknownModel(ModelId::new("unknown")))
    );
    assert_eq!(fx.controller.state(), PipelineState::Faulted);
}

#[test]
fn disabled_pipeline_adds_no_work() {
    let mut fx = Fixture::software();
    fx.ready("invert");
    let frame = fx.frame(8, 8);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);

    fx.controller.disable();
    assert_eq!(fx.controller.state(), PipelineState::Disabled);
    let buffers = fx.device.memory_report().live_buffers;
    let before = fx.device.stats();
    for _ in 0..10 {
        let index = fx.controller.begin_frame(&fx.device);
        let mut graph = RenderGraph::new(index);
        let pass = fx
            .controller
            .register_passes(&mut graph, &fx.device, FrameTargets::in_place(frame));
        assert_eq!(pass, None);
        assert_eq!(graph.pass_count(), 0);
        let submission = graph.execute(&fx.device).unwrap();
        assert_eq!(fx.controller.end_frame(&submission), FrameOutcome::Unscheduled);
    }
    let after = fx.device.stats();
    assert_eq!(after.executed_commands, before.executed_commands);
    assert_eq!(after.fence_waits, before.fence_waits);
    // Disabling keeps the model and its buffers.
    assert_eq!(fx.device.memory_report().live_buffers, buffers);

    fx.controller.enable();
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
}

#[test]
fn disabling_mid_frame_drops_the_pass_from_the_next_frame() {
    let mut fx = Fixture::new(
        SoftwareDevice::new(SoftwareDeviceConfig::default().deferred()),
        PipelineConfig::default(),
    );
    fx.ready("invert");
    let frame = fx.frame(8, 8);

    let index = fx.controller.begin_frame(&fx.device);
    let mut graph = RenderGraph::new(index);
    assert!(fx
        .controller
        .register_passes(&mut graph, &fx.device, FrameTargets::in_place(frame))
        .is_some());
    fx.controller.disable();
    let submission = graph.execute(&fx.device).unwrap();
    // Work already recorded completes normally.
    assert_eq!(fx.controller.end_frame(&submission), FrameOutcome::Stylized);

    assert_eq!(fx.run(frame), FrameOutcome::Unscheduled);
    fx.device.poll();
    assert_eq!(fx.device.stats().execution_errors, 0);
}

#[test]
fn injected_inference_error_skips_one_frame() {
    let mut fx = Fixture::software();
    fx.ready("invert");
    let frame = fx.frame(8, 8);

    for index in 0..5u64 {
        fx.fill(frame);
        if index == 2 {
            fx.faults.fail_next(1);
        }
        let outcome = fx.run(frame);
        let texel = fx.device.read_texels(frame).unwrap()[0];
        if index == 2 {
            assert!(matches!(
                outcome,
                FrameOutcome::PassedThrough {
                    error: StylizeError::Inference(InferenceError::Dispatch(_)),
                    ..
                }
            ));
            assert_rgb(texel, [0.2, 0.4, 0.6]);
        } else {
            assert_eq!(outcome, FrameOutcome::Stylized);
            assert_rgb(texel, [0.8, 0.6, 0.4]);
        }
        assert!(fx.controller.state().schedules_pass());
    }
    let skipped: Vec<u64> = fx
        .events()
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::FrameSkipped { frame_index, .. } => Some(*frame_index),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![2]);
    assert_eq!(fx.controller.stats().frames.inference_errors, 1);
}

#[test]
fn full_hd_frame_into_256_model_passes_through_and_stays_ready() {
    let mut fx = Fixture::software();
    fx.ready("invert-256");
    let frame = fx.frame(1920, 1080);

    let outcome = fx.run(frame);
    assert!(matches!(
        outcome,
        FrameOutcome::PassedThrough {
            error: StylizeError::FormatMismatch(FormatMismatch::ExtentMismatch { .. }),
            fallback: Fallback::InPlace,
        }
    ));
    assert_eq!(fx.controller.state(), PipelineState::Ready);
    assert_eq!(fx.device.read_texels(frame).unwrap()[0], FILL);
    assert!(fx
        .events()
        .iter()
        .any(|event| matches!(event, PipelineEvent::FrameSkipped { .. })));
}

#[test]
fn unpolled_events_keep_only_the_newest() {
    let mut fx = Fixture::unobserved(SoftwareDevice::default(), PipelineConfig::default());
    fx.ready("invert-256");
    let frame = fx.frame(64, 36);
    for _ in 0..10_000 {
        assert!(matches!(fx.run(frame), FrameOutcome::PassedThrough { .. }));
    }

    let events = fx.controller.poll_events();
    assert_eq!(events.len(), EVENT_QUEUE_CAPACITY);
    let skipped: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::FrameSkipped { frame_index, .. } => Some(*frame_index),
            _ => None,
        })
        .collect();
    let first = 10_000 - EVENT_QUEUE_CAPACITY as u64;
    assert_eq!(skipped, (first..10_000).collect::<Vec<_>>());
    assert!(fx.controller.stats().dropped_events >= first);
    assert_eq!(fx.controller.state(), PipelineState::Ready);

    // Draining makes room again.
    fx.run(frame);
    assert_eq!(fx.controller.poll_events().len(), 1);
}

#[test]
fn resample_policy_accepts_any_resolution() {
    let mut fx = Fixture::new(
        SoftwareDevice::default(),
        PipelineConfig {
            resize_policy: ResizePolicy::Resample,
            ..Default::default()
        },
    );
    fx.ready("invert-16");
    let frame = fx.frame(48, 27);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    let texel = fx.device.read_texels(frame).unwrap()[200];
    for (c, expected) in [0.8, 0.6, 0.4].into_iter().enumerate() {
        assert_abs_diff_eq!(texel[c], expected, epsilon = 1e-3);
    }
}

#[test]
fn buffer_pairs_never_exceed_frames_in_flight() {
    let mut fx = Fixture::new(
        SoftwareDevice::new(SoftwareDeviceConfig::default().deferred()),
        PipelineConfig::default(),
    );
    fx.ready("invert");
    let frame = fx.frame(8, 8);
    for _ in 0..10_000 {
        assert_eq!(fx.run(frame), FrameOutcome::Stylized);
        while fx.device.pending_submissions() > 2 {
            fx.device.step();
        }
    }
    let stats = fx.controller.stats();
    assert!(stats.pool.peak_pairs <= 2);
    assert_eq!(stats.frames.stylized, 10_000);
}

#[test]
fn swap_with_frames_in_flight_keeps_buffer_pairs_bounded() {
    let mut fx = Fixture::new(
        SoftwareDevice::new(SoftwareDeviceConfig::default().deferred()),
        PipelineConfig::default(),
    );
    fx.ready("invert");
    let small = fx.frame(8, 8);
    for _ in 0..2 {
        assert_eq!(fx.run(small), FrameOutcome::Stylized);
    }
    assert_eq!(fx.device.pending_submissions(), 2);

    fx.ready("invert-16");
    let large = fx.frame(16, 16);
    fx.events();
    // Both pairs of the old model are still in flight.
    assert_eq!(
        fx.run(large),
        FrameOutcome::PassedThrough {
            error: StylizeError::from(InferenceError::BuffersInFlight(2)),
            fallback: Fallback::InPlace,
        }
    );
    assert_eq!(fx.controller.state(), PipelineState::Ready);
    assert!(fx.events().iter().any(|event| matches!(
        event,
        PipelineEvent::FrameSkipped { frame_index: 2, .. }
    )));
    assert!(fx.controller.stats().pool.peak_pairs <= 2);

    fx.device.poll();
    for _ in 0..100 {
        assert_eq!(fx.run(large), FrameOutcome::Stylized);
        while fx.device.pending_submissions() > 2 {
            fx.device.step();
        }
    }
    let pool = fx.controller.stats().pool;
    assert!(pool.peak_pairs <= 2);
    assert_eq!(pool.allocated_pairs, 2);
    assert_eq!(fx.controller.stats().faults, 0);
}

#[test]
fn exhausted_memory_faults_the_pipeline() {
    let mut fx = Fixture::new(
        // Room for the 16x16 frame and one tensor of the pair.
        SoftwareDevice::new(SoftwareDeviceConfig::default().with_memory_budget(4096 + 4000)),
        PipelineConfig::default(),
    );
    fx.ready("invert-16");
    let frame = fx.frame(16, 16);

    assert_eq!(fx.run(frame), FrameOutcome::Unscheduled);
    assert_eq!(fx.controller.state(), PipelineState::Faulted);
    assert!(matches!(
        fx.controller.last_error(),
        Some(StylizeError::ResourceExhausted(_))
    ));
    // Frames keep coming without the pass.
    assert_eq!(fx.run(frame), FrameOutcome::Unscheduled);
    assert_eq!(fx.controller.stats().faults, 1);
}

#[test]
fn enable_after_fault_retries_the_last_model() {
    let mut fx = Fixture::software();
    let _ = fx.controller.set_model("unknown");
    assert_eq!(fx.controller.state(), PipelineState::Faulted);
    // No silent retries.
    fx.controller.block_until_settled(Duration::from_millis(10));
    assert_eq!(fx.controller.state(), PipelineState::Faulted);

    fx.controller.set_model("missing").unwrap();
    assert_eq!(fx.controller.block_until_settled(SETTLE), PipelineState::Faulted);

    fx.controller.enable();
    assert_eq!(fx.controller.state(), PipelineState::Loading);
    assert_eq!(fx.controller.block_until_settled(SETTLE), PipelineState::Faulted);
    assert_eq!(fx.controller.stats().load_failures, 3);
}

#[test]
fn enable_without_model_stays_disabled() {
    let mut fx = Fixture::software();
    fx.controller.enable();
    assert_eq!(fx.controller.state(), PipelineState::Disabled);
    assert!(fx
        .events()
        .iter()
        .any(|event| matches!(event, PipelineEvent::Notice(_))));
}

#[test]
fn clear_model_releases_buffers() {
    let mut fx = Fixture::software();
    fx.ready("invert");
    let frame = fx.frame(8, 8);
    fx.run(frame);
    assert!(fx.device.memory_report().live_buffers > 0);

    fx.controller.clear_model();
    assert_eq!(fx.controller.state(), PipelineState::Disabled);
    assert_eq!(fx.run(frame), FrameOutcome::Unscheduled);
    assert_eq!(fx.device.memory_report().live_buffers, 0);
    assert_eq!(fx.controller.active_model(), None);
}

#[test]
fn swap_happens_between_frames() {
    let mut fx = Fixture::software();
    fx.ready("invert");
    let frame = fx.frame(8, 8);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    fx.events();

    fx.controller.set_model("identity").unwrap();
    assert_eq!(fx.controller.state(), PipelineState::Loading);
    assert_eq!(states(&fx.events()), vec![PipelineState::Loading]);
    assert_eq!(fx.controller.block_until_settled(SETTLE), PipelineState::Ready);
    assert_eq!(states(&fx.events()), vec![PipelineState::Ready]);
    fx.fill(frame);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    assert_rgb(fx.device.read_texels(frame).unwrap()[0], [0.2, 0.4, 0.6]);
    assert_eq!(fx.controller.active_model().map(ModelId::as_str), Some("identity"));
    assert_eq!(fx.controller.stats().models_activated, 2);
}

#[test]
fn disabled_backend_refuses_to_activate() {
    let mut fx = Fixture::new(
        SoftwareDevice::default(),
        PipelineConfig {
            disabled_backends: vec![GraphicsBackendType::Software],
            ..Default::default()
        },
    );
    let err = fx.controller.set_model("invert").unwrap_err();
    assert!(matches!(
        err,
        StylizeError::Load(LoadError::BackendUnavailable { .. })
    ));
    assert_eq!(fx.controller.state(), PipelineState::Disabled);
    fx.controller.enable();
    assert_eq!(fx.controller.state(), PipelineState::Disabled);
}

#[test]
fn modified_model_file_is_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("style.ron");
    let weights = |scale: f32| PointwiseWeights {
        width: 8,
        height: 8,
        weights: vec![scale, 0.0, 0.0, 0.0, scale, 0.0, 0.0, 0.0, scale],
        bias: vec![0.0; 3],
    };
    weights(1.0).write_to(&path).unwrap();

    let mut fx = Fixture::new(
        SoftwareDevice::default(),
        PipelineConfig {
            hot_reload: true,
            ..Default::default()
        },
    );
    let descriptor = ModelDescriptor::from_file("style", &path)
        .with_runtime("pointwise")
        .with_ranges(
            pastiche_core::tensor::PixelRange::Unit,
            pastiche_core::tensor::PixelRange::Unit,
        );
    fx.controller.set_model_descriptor(descriptor).unwrap();
    assert_eq!(fx.controller.block_until_settled(SETTLE), PipelineState::Ready);
    let frame = fx.frame(8, 8);

    // Replace the file atomically so no reload sees it half written.
    let staging = dir.path().join("style.tmp");
    weights(0.5).write_to(&staging).unwrap();
    std::fs::rename(&staging, &path).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while fx.controller.stats().models_activated < 2 && Instant::now() < deadline {
        fx.fill(frame);
        fx.run(frame);
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(fx.controller.stats().models_activated, 2);

    fx.fill(frame);
    assert_eq!(fx.run(frame), FrameOutcome::Stylized);
    assert_rgb(fx.device.read_texels(frame).unwrap()[0], [0.1, 0.2, 0.3]);
}
