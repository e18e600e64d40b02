use crate::assets::humanoid::HumanoidAsset;
use crate::assets::ModelLoader;
use crate::camera::StageCamera;
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::playback::{ClipCache, GltfClipDecoder, LivenessMonitor, PlaybackScheduler, ShuffleQueue};
use crate::pose::{self, Pose};
use crate::renderer::StageRenderer;
use crate::spring::SpringRig;
use crate::time::Time;
use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// CPU-side state of the attached avatar.
struct ModelState {
    asset: HumanoidAsset,
    pose: Pose,
    /// Scratch pose for the crossfade blend source.
    scratch: Pose,
    springs: SpringRig,
}

/// Composition root: owns the window, GPU, clock, asset pipeline and the
/// playback rotation, and wires them together once per frame.
pub struct App {
    config: AppConfig,
    catalog: Catalog,
    renderer: StageRenderer,
    camera: StageCamera,
    time: Time,
    loader: ModelLoader,
    model: Option<ModelState>,
    /// Terminal state: the model could not be loaded. Never retried; the
    /// loop keeps drawing empty frames.
    model_failed: bool,
    cache: Option<ClipCache>,
    scheduler: PlaybackScheduler,
    liveness: LivenessMonitor,
    occluded: bool,
    worlds: Vec<Mat4>,
    palette: Vec<Mat4>,
    next_status: Instant,
}

impl App {
    pub fn new(config: AppConfig, catalog: Catalog) -> Self {
        let now = Instant::now();
        let scheduler = PlaybackScheduler::new(
            ShuffleQueue::new(catalog.clone()),
            config.playback.fade_seconds,
            config.playback.clip_repeats,
        );
        let liveness = LivenessMonitor::new(config.playback.heartbeat_seconds, now);
        let renderer = StageRenderer::new(
            PhysicalSize::new(config.window.width, config.window.height),
            config.window.vsync,
        );
        let mut loader = ModelLoader::new();
        loader.request(config.stage.model.clone(), config.stage.spring_chains.clone());
        eprintln!("[stage] loading model '{}'", config.stage.model);

        Self {
            config,
            catalog,
            renderer,
            camera: StageCamera::stage_default(),
            time: Time::new(),
            loader,
            model: None,
            model_failed: false,
            cache: None,
            scheduler,
            liveness,
            occluded: false,
            worlds: Vec::new(),
            palette: Vec::new(),
            next_status: now + STATUS_INTERVAL,
        }
    }

    fn attach_model(&mut self, asset: HumanoidAsset) {
        if let Err(err) = self.renderer.attach_model(&asset) {
            eprintln!("[stage] model upload failed: {err:#}");
            self.model_failed = true;
            return;
        }
        let skeleton = Arc::clone(&asset.skeleton);
        let pose = Pose::rest(&skeleton);
        let springs = SpringRig::new(&skeleton, &asset.spring_chains);
        self.model =
            Some(ModelState { asset, pose: pose.clone(), scratch: pose, springs });

        // Fresh model, fresh clip pipeline. Cached clips from a previous
        // model target the wrong skeleton.
        let mut cache = ClipCache::new(Arc::new(GltfClipDecoder), skeleton, self.loader.generation());
        cache.prefetch(self.catalog.priority(self.config.playback.prefetch_count));
        self.scheduler.detach();
        self.scheduler.advance(&mut cache, Instant::now());
        self.cache = Some(cache);
    }

    fn model_matrix(&self) -> Mat4 {
        let stage = &self.config.stage;
        Mat4::from_scale_rotation_translation(
            Vec3::splat(stage.scale),
            Quat::from_rotation_y(stage.yaw_degrees.to_radians()),
            Vec3::from_array(stage.root_offset),
        )
    }

    fn tick(&mut self) {
        let now = Instant::now();

        if let Some(outcome) = self.loader.poll() {
            match outcome {
                Ok(asset) => self.attach_model(asset),
                Err(err) => {
                    eprintln!("[stage] model load failed: {err:#}");
                    self.model_failed = true;
                }
            }
        }

        if let Some(cache) = &mut self.cache {
            cache.pump();
            self.liveness.tick(&mut self.scheduler, cache, now);
            self.scheduler.tick(cache, now);
        }

        self.time.tick();
        if let Some(stall) = self.time.dropped_backlog() {
            eprintln!("[stage] clamped a {stall:.2}s frame gap");
        }
        self.scheduler.update(self.time.delta_seconds());

        self.update_pose();

        if now >= self.next_status {
            self.next_status = now + STATUS_INTERVAL;
            if self.model_failed {
                eprintln!("[stage] status: model load failed; stage is idle");
            } else {
                let status = self.scheduler.status();
                let cached = self.cache.as_ref().map(|c| c.len()).unwrap_or(0);
                eprintln!(
                    "[playback] status: up={:.0}s current={:?} queued={} played={} cached={}",
                    self.time.elapsed_seconds(),
                    status.current,
                    status.queue_remaining,
                    status.played,
                    cached
                );
            }
        }
    }

    fn update_pose(&mut self) {
        let Some(model) = &mut self.model else {
            return;
        };
        let skeleton = &model.asset.skeleton;

        model.pose.reset_to_rest(skeleton);
        if let Some(mix) = self.scheduler.mix() {
            if let Some((source_clip, source_time)) = &mix.source {
                // Crossfade: sample the stopped outgoing clip, then blend
                // toward the incoming one.
                model.scratch.reset_to_rest(skeleton);
                model.scratch.apply_clip(source_clip, *source_time);
                model.pose.apply_clip(&mix.target, mix.target_time);
                model.scratch.blend_toward(&model.pose, mix.target_weight);
                std::mem::swap(&mut model.pose, &mut model.scratch);
            } else {
                model.pose.apply_clip(&mix.target, mix.target_time);
            }
        }

        pose::world_matrices(skeleton, &model.pose, &mut self.worlds);
        model.springs.step(skeleton, &mut model.pose, &mut self.worlds, self.time.delta_seconds());
        pose::skinning_palette(skeleton, &self.worlds, &mut self.palette);
    }

    fn draw(&mut self) {
        let view_proj = self.camera.view_projection(self.renderer.size());
        let camera_pos = self.camera.position;
        let model_matrix = self.model_matrix();
        if let Err(err) = self.renderer.render(view_proj, camera_pos, model_matrix, &self.palette) {
            eprintln!("[stage] render error: {err:#}");
        }
    }

    /// Releases everything in one place: playback state (including the
    /// auto-advance deadline), the clip pipeline, the model and the GPU.
    fn teardown(&mut self) {
        self.scheduler.detach();
        self.cache = None;
        self.model = None;
        self.renderer.detach_model();
        self.renderer.teardown();
        eprintln!("[stage] teardown complete");
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.window().is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.window.width, self.config.window.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                eprintln!("[stage] window creation failed: {err}");
                event_loop.exit();
                return;
            }
        };
        if let Err(err) = self.renderer.attach_window(window) {
            eprintln!("[stage] GPU init failed: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.teardown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.renderer.resize(size);
            }
            WindowEvent::Occluded(true) => {
                // Mirror a hidden tab: the frame loop stops and the bound
                // clip freezes in place until the window comes back.
                self.occluded = true;
                self.scheduler.halt();
            }
            WindowEvent::Occluded(false) => {
                self.occluded = false;
                if let Some(cache) = &mut self.cache {
                    self.liveness.on_visible(&mut self.scheduler, cache, Instant::now());
                }
                // Restart the frame loop; about_to_wait stopped requesting
                // redraws while the window was hidden.
                self.renderer.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                if self.occluded {
                    return;
                }
                self.tick();
                self.draw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Uncapped loop; pacing comes from the present mode alone. A hidden
        // window requests nothing and the loop goes idle until it returns.
        if !self.occluded {
            self.renderer.request_redraw();
        }
    }
}

pub fn run(config: AppConfig, catalog: Catalog) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config, catalog);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}
