// Sentry FOV demo: a patrolling guard sweeps a ray-cast visibility cone across
// a walled arena and flags when it can see the player.
//
// WASD / arrows move the player, Q/E orbit the camera, mouse wheel zooms,
// F3 toggles stats, R toggles ray lines, Esc quits.

mod cli;
mod engine;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bevy_ecs::prelude::*;
use clap::Parser;
use glam::{Mat4, Vec2, Vec3};
use log::{debug, error, info};
use wgpu::util::DeviceExt;
use winit::{
    event::{Event as WinitEvent, WindowEvent, ElementState, KeyEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use cli::Cli;
use engine::camera::FollowCamera;
use engine::collision::{Collider, Tag};
use engine::debug_overlay::{DebugOverlay, DebugStats, RayDraw};
use engine::input::InputState;
use engine::mesh::GpuVertex;
use engine::sensor::FovSensor;
use engine::systems::{self, SensorFrame};
use engine::{AimSweep, Appearance, Patrol, Player, Sentry, Transform, Velocity};

const ARENA_HALF_EXTENT: f32 = 24.0;
const PATROL_HALF_EXTENT: f32 = 10.0;
const WALL_COUNT: usize = 14;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

// ============================================================================
// INSTANCE DATA (per-entity)
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct InstanceData {
    position: [f32; 3],
    _padding0: f32,
    half_extents: [f32; 3],
    _padding1: f32,
    color: [f32; 4],
}

impl InstanceData {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // Position (location 2)
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Half extents (location 3)
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Color (location 4)
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Cube spanning [-1, 1] on every axis, four vertices per face so each face
/// carries its own normal.
fn cube_mesh() -> (Vec<GpuVertex>, Vec<u16>) {
    // (normal, u, v) with u × v = normal, so every face winds CCW from outside.
    let faces = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u16;
        for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            vertices.push(GpuVertex {
                position: (normal + u * s + v * t).to_array(),
                normal: normal.to_array(),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

// ============================================================================
// UNIFORM DATA
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SceneUniforms {
    view_proj: [[f32; 4]; 4],
    light_dir: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FovUniforms {
    view_proj: [[f32; 4]; 4],
    origin: [f32; 4],
    color: [f32; 4],
}

fn uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some(label),
    })
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

// ============================================================================
// VISIBILITY MESH RENDERING
// ============================================================================

/// GPU buffers for one sentry's visibility mesh. Grown when a mesh outgrows them.
struct FovSlot {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    vertex_capacity: usize,
    index_capacity: usize,
    index_count: u32,
}

struct FovRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    slots: Vec<FovSlot>,
    active: usize,
}

impl FovRenderer {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("FOV Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader_fov.wgsl").into()),
        });
        let bind_group_layout = uniform_layout(device, "fov_bind_group_layout");

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("FOV Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("FOV Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[GpuVertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // The fan is seen from inside and outside.
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            // Translucent: test against the scene but leave depth untouched.
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        Self { pipeline, bind_group_layout, slots: Vec::new(), active: 0 }
    }

    fn create_slot(&self, device: &wgpu::Device, vertex_capacity: usize, index_capacity: usize) -> FovSlot {
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FOV Vertex Buffer"),
            size: (vertex_capacity.max(1) * std::mem::size_of::<GpuVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FOV Index Buffer"),
            size: (index_capacity.max(1) * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FOV Uniform Buffer"),
            size: std::mem::size_of::<FovUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("fov_bind_group"),
        });

        FovSlot {
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            bind_group,
            vertex_capacity,
            index_capacity,
            index_count: 0,
        }
    }

    /// Upload this frame's meshes. Must run before the render pass begins.
    fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frames: &[SensorFrame], view_proj: Mat4) {
        for (i, frame) in frames.iter().enumerate() {
            let render = frame.mesh.to_render_mesh();
            let (vertices, indices) = (render.vertices.len(), render.index_count());

            let fits = self
                .slots
                .get(i)
                .is_some_and(|slot| slot.vertex_capacity >= vertices && slot.index_capacity >= indices);
            if !fits {
                let slot = self.create_slot(device, vertices, indices);
                if i < self.slots.len() {
                    self.slots[i] = slot;
                } else {
                    self.slots.push(slot);
                }
            }

            let slot = &mut self.slots[i];
            if indices > 0 {
                queue.write_buffer(&slot.vertex_buffer, 0, render.vertex_bytes());
                queue.write_buffer(&slot.index_buffer, 0, render.index_bytes());
            }
            slot.index_count = indices as u32;

            let uniforms = FovUniforms {
                view_proj: view_proj.to_cols_array_2d(),
                origin: frame.origin.extend(1.0).to_array(),
                color: frame.material.color,
            };
            queue.write_buffer(&slot.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
        }
        self.active = frames.len();
    }

    fn draw(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        render_pass.set_pipeline(&self.pipeline);
        for slot in self.slots.iter().take(self.active) {
            if slot.index_count == 0 {
                continue;
            }
            render_pass.set_bind_group(0, &slot.bind_group, &[]);
            render_pass.set_vertex_buffer(0, slot.vertex_buffer.slice(..));
            render_pass.set_index_buffer(slot.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..slot.index_count, 0, 0..1);
        }
    }
}

// ============================================================================
// FRAME TIMING
// ============================================================================

/// Frame time statistics published once per second.
struct FrameTimer {
    window_start: Instant,
    frames: u32,
    sum_ms: f32,
    min_ms: f32,
    max_ms: f32,

    fps: u32,
    avg_ms: f32,
    last_min_ms: f32,
    last_max_ms: f32,
}

impl FrameTimer {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            sum_ms: 0.0,
            min_ms: f32::MAX,
            max_ms: 0.0,
            fps: 0,
            avg_ms: 0.0,
            last_min_ms: 0.0,
            last_max_ms: 0.0,
        }
    }

    fn record(&mut self, frame_ms: f32) {
        self.frames += 1;
        self.sum_ms += frame_ms;
        self.min_ms = self.min_ms.min(frame_ms);
        self.max_ms = self.max_ms.max(frame_ms);

        if self.window_start.elapsed().as_secs_f32() >= 1.0 {
            self.fps = self.frames;
            self.avg_ms = self.sum_ms / self.frames as f32;
            self.last_min_ms = self.min_ms;
            self.last_max_ms = self.max_ms;
            debug!("FPS: {} | frame: {:.2} ms", self.fps, self.avg_ms);

            self.window_start = Instant::now();
            self.frames = 0;
            self.sum_ms = 0.0;
            self.min_ms = f32::MAX;
            self.max_ms = 0.0;
        }
    }
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

struct State {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: winit::dpi::PhysicalSize<u32>,
    render_pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    num_indices: u32,
    max_instances: usize,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    depth_view: wgpu::TextureView,
    fov: FovRenderer,
    overlay: DebugOverlay,

    // ECS World
    world: World,
    last_update: Instant,
    frames: Vec<SensorFrame>,
    sensor_ms: f32,
    timer: FrameTimer,

    camera: FollowCamera,
    input: InputState,
    discovered: Arc<AtomicBool>,
    show_rays: bool,
}

impl State {
    async fn new(window: Arc<Window>, sensor: FovSensor, discovered: Arc<AtomicBool>) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("no suitable GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .expect("failed to open GPU device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader_scene.wgsl").into()),
        });

        let uniforms = SceneUniforms {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            light_dir: Vec3::new(0.4, 1.0, 0.3).normalize().extend(0.0).to_array(),
        };

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Uniform Buffer"),
            contents: bytemuck::cast_slice(&[uniforms]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group_layout = uniform_layout(&device, "uniform_bind_group_layout");

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("uniform_bind_group"),
        });

        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Render Pipeline Layout"),
                bind_group_layouts: &[&uniform_bind_group_layout],
                push_constant_ranges: &[],
            });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[GpuVertex::desc(), InstanceData::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        let (cube_vertices, cube_indices) = cube_mesh();

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(&cube_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(&cube_indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let max_instances = 256;
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Instance Buffer"),
            size: (max_instances * std::mem::size_of::<InstanceData>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let depth_view = create_depth_view(&device, &config);
        let fov = FovRenderer::new(&device, config.format);
        let overlay = DebugOverlay::new(&window, &device, config.format);
        let show_rays = sensor.config().display_rays;

        let mut world = World::new();
        spawn_scene(&mut world, sensor);
        let camera = FollowCamera::new(Vec3::ZERO);

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            render_pipeline,
            vertex_buffer,
            index_buffer,
            instance_buffer,
            num_indices: cube_indices.len() as u32,
            max_instances,
            uniform_buffer,
            uniform_bind_group,
            depth_view,
            fov,
            overlay,
            world,
            last_update: Instant::now(),
            frames: Vec::new(),
            sensor_ms: 0.0,
            timer: FrameTimer::new(),
            camera,
            input: InputState::new(),
            discovered,
            show_rays,
        }
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_view = create_depth_view(&self.device, &self.config);
        }
    }

    fn update(&mut self) {
        let now = Instant::now();
        let frame_time = (now - self.last_update).as_secs_f32();
        self.last_update = now;
        self.timer.record(frame_time * 1000.0);
        // Long stalls (window drag, breakpoints) should not teleport anything.
        let dt = frame_time.min(0.1);

        if self.input.was_key_pressed(KeyCode::F3) {
            self.overlay.toggle();
        }
        if self.input.was_key_pressed(KeyCode::KeyR) {
            self.show_rays = !self.show_rays;
        }

        systems::player_control_system(&mut self.world, self.input.movement(), self.camera.ground_axes());
        systems::patrol_system(&mut self.world);
        systems::movement_system(&mut self.world, dt);
        systems::bounds_system(&mut self.world, ARENA_HALF_EXTENT - 1.0);
        systems::aim_sweep_system(&mut self.world, dt);

        let started = Instant::now();
        self.frames = systems::sensor_system(&mut self.world, dt);
        self.sensor_ms = started.elapsed().as_secs_f32() * 1000.0;

        let follow = self
            .world
            .query_filtered::<&Transform, With<Player>>()
            .iter(&self.world)
            .next()
            .map_or(self.camera.target(), |t| t.position);
        self.camera.update(&self.input, follow, dt);
    }

    fn collect_stats(&mut self) -> DebugStats {
        let entity_count = self.world.query::<&Transform>().iter(&self.world).count();
        let (grid_resolution, aim_remaining_deg) = self
            .world
            .query::<&Sentry>()
            .iter(&self.world)
            .next()
            .map_or((0, 0.0), |sentry| {
                (sentry.sensor.config().resolution, sentry.sensor.aim().remaining_angle().to_degrees())
            });

        let mut stats = DebugStats {
            fps: self.timer.fps,
            frame_time_avg_ms: self.timer.avg_ms,
            frame_time_min_ms: self.timer.last_min_ms,
            frame_time_max_ms: self.timer.last_max_ms,
            entity_count,
            resolution: (self.size.width, self.size.height),
            camera_distance: self.camera.distance(),
            sensors: self.frames.len(),
            grid_resolution,
            aim_remaining_deg,
            rays: 0,
            hits: 0,
            failed_queries: 0,
            triangles: 0,
            sensor_ms: self.sensor_ms,
        };
        for frame in &self.frames {
            stats.rays += frame.stats.rays;
            stats.hits += frame.stats.hits;
            stats.failed_queries += frame.stats.failed_queries;
            stats.triangles += frame.mesh.triangle_count();
        }
        stats
    }

    /// Project this frame's sensor rays into egui points.
    fn project_rays(&self) -> Vec<RayDraw> {
        let size = Vec2::new(self.size.width as f32, self.size.height as f32);
        let ppp = self.overlay.pixels_per_point();
        let to_pos = |p: Vec2| egui::pos2(p.x / ppp, p.y / ppp);

        self.frames
            .iter()
            .flat_map(|frame| frame.rays.iter())
            .filter_map(|ray| {
                let from = self.camera.world_to_screen(ray.from, size)?;
                let to = self.camera.world_to_screen(ray.to, size)?;
                Some(RayDraw { from: to_pos(from), to: to_pos(to) })
            })
            .collect()
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Collect instance data from ECS BEFORE creating render pass
        let mut instance_data = Vec::new();
        let mut query = self.world.query::<(&Transform, &Appearance)>();
        for (transform, appearance) in query.iter(&self.world) {
            let [r, g, b] = appearance.color;
            instance_data.push(InstanceData {
                position: transform.position.to_array(),
                _padding0: 0.0,
                half_extents: appearance.half_extents.to_array(),
                _padding1: 0.0,
                color: [r, g, b, 1.0],
            });
        }

        let instance_count = instance_data.len().min(self.max_instances);
        if instance_count > 0 {
            self.queue.write_buffer(
                &self.instance_buffer,
                0,
                bytemuck::cast_slice(&instance_data[..instance_count]),
            );
        }

        let aspect = self.size.width as f32 / self.size.height.max(1) as f32;
        let view_proj = self.camera.view_projection(aspect);
        let uniforms = SceneUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            light_dir: Vec3::new(0.4, 1.0, 0.3).normalize().extend(0.0).to_array(),
        };
        self.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        self.fov.prepare(&self.device, &self.queue, &self.frames, view_proj);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.05,
                            b: 0.1,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..self.num_indices, 0, 0..instance_count as u32);

            // Translucent cones last, over the opaque scene.
            self.fov.draw(&mut render_pass);
        }

        let stats = self.overlay.visible.then(|| self.collect_stats());
        let rays = if self.show_rays { self.project_rays() } else { Vec::new() };
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };
        self.overlay.render(
            &self.device,
            &self.queue,
            &mut encoder,
            &self.window,
            &view,
            &screen_descriptor,
            self.discovered.load(Ordering::Relaxed),
            stats.as_ref(),
            self.show_rays.then_some(rays.as_slice()),
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

// ============================================================================
// ENTITY SPAWNING
// ============================================================================

fn spawn_scene(world: &mut World, sensor: FovSensor) {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    // Ground slab; its top face sits at y = 0.
    let ground = Vec3::new(ARENA_HALF_EXTENT, 0.5, ARENA_HALF_EXTENT);
    world.spawn((
        Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        Appearance { color: [0.22, 0.24, 0.28], half_extents: ground },
        Collider::cuboid(ground, Tag::Obstacle),
    ));

    // Walls, kept off the patrol route and the player's start.
    let mut walls = 0;
    let mut attempts = 0;
    while walls < WALL_COUNT && attempts < WALL_COUNT * 20 {
        attempts += 1;
        let half = Vec3::new(
            rng.gen_range(0.4..3.0),
            rng.gen_range(0.8..2.2),
            rng.gen_range(0.4..3.0),
        );
        let x = rng.gen_range(-ARENA_HALF_EXTENT + half.x..ARENA_HALF_EXTENT - half.x);
        let z = rng.gen_range(-ARENA_HALF_EXTENT + half.z..ARENA_HALF_EXTENT - half.z);

        let margin = 1.5;
        let near_route_x = (x.abs() - PATROL_HALF_EXTENT).abs() < half.x + margin
            && z.abs() < PATROL_HALF_EXTENT + half.z + margin;
        let near_route_z = (z.abs() - PATROL_HALF_EXTENT).abs() < half.z + margin
            && x.abs() < PATROL_HALF_EXTENT + half.x + margin;
        let near_start = x.abs() < half.x + 3.0 && z.abs() < half.z + 3.0;
        if near_route_x || near_route_z || near_start {
            continue;
        }

        world.spawn((
            Transform::from_position(Vec3::new(x, half.y, z)),
            Appearance { color: [0.45, 0.47, 0.55], half_extents: half },
            Collider::cuboid(half, Tag::Obstacle),
        ));
        walls += 1;
    }

    // Player
    let radius = 0.6;
    world.spawn((
        Transform::from_position(Vec3::new(0.0, radius, 0.0)),
        Appearance { color: [0.25, 0.55, 1.0], half_extents: Vec3::splat(radius) },
        Collider::ball(radius, Tag::Player),
        Velocity::default(),
        Player { move_speed: 7.0 },
    ));

    // Sentry walking a square around the centre.
    let body = Vec3::new(0.5, 1.0, 0.5);
    let p = PATROL_HALF_EXTENT;
    let waypoints = vec![
        Vec3::new(-p, body.y, -p),
        Vec3::new(p, body.y, -p),
        Vec3::new(p, body.y, p),
        Vec3::new(-p, body.y, p),
    ];
    world.spawn((
        Transform::from_position(waypoints[0]),
        Appearance { color: [0.9, 0.55, 0.15], half_extents: body },
        Collider::cuboid(body, Tag::Sentry),
        Velocity::default(),
        Patrol::new(waypoints, 2.5),
        Sentry { sensor, eye_height: 0.8 },
        AimSweep::default(),
    ));

    info!("Spawned arena with {} walls", walls);
}

// ============================================================================
// MAIN
// ============================================================================

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let sensor_config = match cli.sensor_config() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid sensor configuration: {err}");
            std::process::exit(1);
        }
    };
    info!(
        "sensor: {} rays, range {}",
        sensor_config.sample_count(),
        sensor_config.max_distance
    );

    let mut sensor = match FovSensor::new(sensor_config) {
        Ok(sensor) => sensor,
        Err(err) => {
            error!("invalid sensor configuration: {err}");
            std::process::exit(1);
        }
    };

    let discovered = Arc::new(AtomicBool::new(false));
    {
        let discovered = discovered.clone();
        sensor.subscribe(move |seen| discovered.store(seen, Ordering::Relaxed));
    }
    sensor.subscribe(|seen| info!("player {}", if seen { "discovered" } else { "hidden" }));

    let event_loop = EventLoop::new().expect("failed to create event loop");

    let window_attributes = Window::default_attributes()
        .with_title("FOV Sentry")
        .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

    let window = Arc::new(
        event_loop
            .create_window(window_attributes)
            .expect("failed to create window"),
    );

    let mut state = pollster::block_on(State::new(window.clone(), sensor, discovered));

    let result = event_loop.run(move |event, control_flow| {
        match event {
            WinitEvent::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => {
                let response = state.overlay.handle_window_event(&window, event);
                if !response.consumed {
                    state.input.process_event(event);
                }

                match event {
                    WindowEvent::CloseRequested
                    | WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                state: ElementState::Pressed,
                                physical_key: PhysicalKey::Code(KeyCode::Escape),
                                ..
                            },
                        ..
                    } => control_flow.exit(),
                    WindowEvent::Resized(physical_size) => {
                        state.resize(*physical_size);
                    }
                    WindowEvent::RedrawRequested => {
                        state.update();
                        match state.render() {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost) => state.resize(state.size),
                            Err(wgpu::SurfaceError::OutOfMemory) => control_flow.exit(),
                            Err(e) => error!("render failed: {e:?}"),
                        }
                        state.input.end_frame();
                    }
                    _ => {}
                }
            }
            WinitEvent::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    });

    if let Err(err) = result {
        error!("event loop terminated: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube_mesh();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        for tri in indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(vertices[i as usize].position));
            let face = (b - a).cross(c - a).normalize();
            let normal = Vec3::from(vertices[tri[0] as usize].normal);
            assert!(face.dot(normal) > 0.99, "face {face} vs normal {normal}");
        }
    }

    #[test]
    fn instance_layout_matches_attribute_offsets() {
        assert_eq!(std::mem::size_of::<InstanceData>(), 48);
        let layout = InstanceData::desc();
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32]);
    }

    #[test]
    fn scene_spawns_one_player_and_one_sentry() {
        let mut world = World::new();
        let sensor = FovSensor::new(engine::sensor::SensorConfig::default()).unwrap();
        spawn_scene(&mut world, sensor);

        assert_eq!(world.query::<&Player>().iter(&world).count(), 1);
        assert_eq!(world.query::<&Sentry>().iter(&world).count(), 1);
        let colliders = world.query::<&Collider>().iter(&world).count();
        assert!(colliders >= 3);
    }
}
