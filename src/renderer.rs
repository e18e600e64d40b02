use crate::assets::humanoid::{AvatarVertex, HumanoidAsset};
use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Vec3};
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameData {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    light_dirs: [[f32; 4]; 3],
    light_colors: [[f32; 4]; 3],
    ambient: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelData {
    model: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MaterialData {
    base_color: [f32; 4],
}

/// Three directional lights plus ambient, matching the stage lighting the
/// avatar was authored against.
fn stage_lights() -> ([[f32; 4]; 3], [[f32; 4]; 3], [f32; 4]) {
    let dirs = [
        Vec3::new(1.0, 1.75, 1.0).normalize(),
        Vec3::new(-1.3, 1.0, -0.5).normalize(),
        Vec3::new(0.0, 1.5, -2.0).normalize(),
    ];
    let dirs = [
        [dirs[0].x, dirs[0].y, dirs[0].z, 0.0],
        [dirs[1].x, dirs[1].y, dirs[1].z, 0.0],
        [dirs[2].x, dirs[2].y, dirs[2].z, 0.0],
    ];
    let colors = [
        [1.1, 1.1, 1.1, 1.0],
        [0.45, 0.45, 0.5, 1.0],
        [0.55, 0.5, 0.5, 1.0],
    ];
    let ambient = [0.35, 0.35, 0.38, 1.0];
    (dirs, colors, ambient)
}

struct SubsetDraw {
    index_offset: u32,
    index_count: u32,
    material: usize,
}

/// GPU residency for the attached avatar. Dropped whole on detach.
struct ModelResources {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    palette_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    model_buffer: wgpu::Buffer,
    material_bind_groups: Vec<wgpu::BindGroup>,
    subsets: Vec<SubsetDraw>,
    joint_count: usize,
}

struct Gpu {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    pipeline: wgpu::RenderPipeline,
    frame_bgl: wgpu::BindGroupLayout,
    material_bgl: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    white_texture_view: wgpu::TextureView,
}

/// One skinned-mesh pass over the avatar. The whole model draws every frame;
/// there is no culling of any kind.
pub struct StageRenderer {
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    model: Option<ModelResources>,
    size: PhysicalSize<u32>,
    vsync: bool,
    clear_color: wgpu::Color,
}

impl StageRenderer {
    pub fn new(size: PhysicalSize<u32>, vsync: bool) -> Self {
        Self {
            window: None,
            gpu: None,
            model: None,
            size,
            vsync,
            clear_color: wgpu::Color { r: 0.06, g: 0.06, b: 0.09, a: 1.0 },
        }
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        self.window.as_ref()
    }

    pub fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    pub fn attach_window(&mut self, window: Arc<Window>) -> Result<()> {
        self.size = window.inner_size();
        let gpu = pollster::block_on(Self::init_wgpu(&window, self.size, self.vsync))?;
        self.window = Some(window);
        self.gpu = Some(gpu);
        Ok(())
    }

    fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> wgpu::TextureFormat {
        formats.iter().copied().find(|f| f.is_srgb()).unwrap_or(formats[0])
    }

    async fn init_wgpu(window: &Arc<Window>, size: PhysicalSize<u32>, vsync: bool) -> Result<Gpu> {
        let instance = wgpu::Instance::default();
        let surface =
            instance.create_surface(window.clone()).context("Failed to create render surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| anyhow!("No suitable GPU adapter: {err}"))?;
        let required_limits =
            wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits());
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        };
        let (device, queue) =
            adapter.request_device(&device_desc).await.context("Failed to acquire GPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = Self::choose_surface_format(&caps.formats);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync { wgpu::PresentMode::Fifo } else { wgpu::PresentMode::AutoNoVsync },
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth_view = Self::create_depth_view(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Skinned Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/skinned.wgsl").into()),
        });

        let frame_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Skinned Pipeline Layout"),
            bind_group_layouts: &[&frame_bgl, &material_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Skinned Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[AvatarVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Avatar materials are frequently double sided.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Buffer"),
            size: std::mem::size_of::<FrameData>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Avatar Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white_texture_view = Self::upload_texture(&device, &queue, 1, 1, &[255, 255, 255, 255])?;

        Ok(Gpu {
            surface,
            device,
            queue,
            config,
            depth_view,
            pipeline,
            frame_bgl,
            material_bgl,
            frame_buffer,
            sampler,
            white_texture_view,
        })
    }

    fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: config.width.max(1),
                height: config.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        depth.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn upload_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<wgpu::TextureView> {
        if rgba.len() as u64 != width as u64 * height as u64 * 4 {
            return Err(anyhow!("Texture data size mismatch ({}x{})", width, height));
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Avatar Texture"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.size = size;
        if let Some(gpu) = &mut self.gpu {
            gpu.config.width = size.width.max(1);
            gpu.config.height = size.height.max(1);
            gpu.surface.configure(&gpu.device, &gpu.config);
            gpu.depth_view = Self::create_depth_view(&gpu.device, &gpu.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Uploads the avatar to the GPU: vertex/index buffers, per-material
    /// texture bind groups, and a palette buffer sized to the skeleton.
    pub fn attach_model(&mut self, asset: &HumanoidAsset) -> Result<()> {
        let gpu = self.gpu.as_ref().ok_or_else(|| anyhow!("Renderer has no GPU context yet"))?;
        // At most one model is resident; replace wholesale.
        self.model = None;

        let vertex_buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Avatar VB"),
            contents: bytemuck::cast_slice(&asset.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Avatar IB"),
            contents: bytemuck::cast_slice(&asset.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let joint_count = asset.skeleton.joint_count();
        let palette_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Palette Buffer"),
            size: (joint_count.max(1) * std::mem::size_of::<[[f32; 4]; 4]>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let model_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Model Buffer"),
            size: std::mem::size_of::<ModelData>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame BG"),
            layout: &gpu.frame_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: gpu.frame_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: model_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: palette_buffer.as_entire_binding() },
            ],
        });

        let mut texture_views = Vec::with_capacity(asset.textures.len());
        for texture in &asset.textures {
            texture_views.push(Self::upload_texture(
                &gpu.device,
                &gpu.queue,
                texture.width,
                texture.height,
                &texture.rgba,
            )?);
        }

        let mut material_bind_groups = Vec::with_capacity(asset.materials.len());
        for material in &asset.materials {
            let material_buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Material Buffer"),
                contents: bytemuck::bytes_of(&MaterialData { base_color: material.base_color_factor }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let view = material
                .base_color_texture
                .and_then(|idx| texture_views.get(idx))
                .unwrap_or(&gpu.white_texture_view);
            material_bind_groups.push(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Material BG"),
                layout: &gpu.material_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&gpu.sampler),
                    },
                    wgpu::BindGroupEntry { binding: 2, resource: material_buffer.as_entire_binding() },
                ],
            }));
        }

        let subsets = asset
            .subsets
            .iter()
            .map(|s| SubsetDraw {
                index_offset: s.index_offset,
                index_count: s.index_count,
                material: s.material.min(material_bind_groups.len().saturating_sub(1)),
            })
            .collect();

        self.model = Some(ModelResources {
            vertex_buffer,
            index_buffer,
            palette_buffer,
            frame_bind_group,
            model_buffer,
            material_bind_groups,
            subsets,
            joint_count,
        });
        eprintln!("[stage] model '{}' resident on GPU ({} joints)", asset.name, joint_count);
        Ok(())
    }

    /// Drops every GPU resource the model holds.
    pub fn detach_model(&mut self) {
        self.model = None;
    }

    pub fn render(&mut self, view_proj: Mat4, camera_pos: Vec3, model_matrix: Mat4, palette: &[Mat4]) -> Result<()> {
        let Some(gpu) = &self.gpu else {
            return Ok(());
        };

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(&gpu.device, &gpu.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => return Ok(()),
            Err(err) => return Err(anyhow!("Surface error: {err}")),
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let (light_dirs, light_colors, ambient) = stage_lights();
        let frame_data = FrameData {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: [camera_pos.x, camera_pos.y, camera_pos.z, 1.0],
            light_dirs,
            light_colors,
            ambient,
        };
        gpu.queue.write_buffer(&gpu.frame_buffer, 0, bytemuck::bytes_of(&frame_data));

        if let Some(model) = &self.model {
            let model_data = ModelData { model: model_matrix.to_cols_array_2d() };
            gpu.queue.write_buffer(&model.model_buffer, 0, bytemuck::bytes_of(&model_data));
            if !palette.is_empty() {
                let raw: Vec<[[f32; 4]; 4]> =
                    palette.iter().take(model.joint_count).map(|m| m.to_cols_array_2d()).collect();
                gpu.queue.write_buffer(&model.palette_buffer, 0, bytemuck::cast_slice(&raw));
            }
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Stage Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(model) = &self.model {
                pass.set_pipeline(&gpu.pipeline);
                pass.set_bind_group(0, &model.frame_bind_group, &[]);
                pass.set_vertex_buffer(0, model.vertex_buffer.slice(..));
                pass.set_index_buffer(model.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                for subset in &model.subsets {
                    pass.set_bind_group(1, &model.material_bind_groups[subset.material], &[]);
                    pass.draw_indexed(
                        subset.index_offset..subset.index_offset + subset.index_count,
                        0,
                        0..1,
                    );
                }
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    /// Releases the window and every GPU resource.
    pub fn teardown(&mut self) {
        self.model = None;
        self.gpu = None;
        self.window = None;
    }
}
