//! Headless wgpu compositor.
//!
//! Every layer is a textured quad whose corners come from the shared placement, so the GPU
//! and software paths agree on geometry. Vertex and uniform buffers are created per draw,
//! tracked in a [`FrameResources`] and destroyed only after the queue submit.

use wgpu::util::DeviceExt;

use crate::{
    assets::decode::ImageRgba,
    compile::plan::{BackgroundDraw, FramePlan, LayerDraw, PanoramaDraw, cull_and_batch},
    config::RendererConfig,
    eval::placement::{Placement, to_ndc},
    foundation::{
        core::Canvas,
        error::{PanoError, PanoResult},
        math::deg_to_rad,
    },
    panorama::PANORAMA_RAY_WGSL,
    perf::{PerformanceMonitor, PerformanceStats},
    render::{
        BackendKind, Compositor, FrameOutcome, FrameRGBA, OverlayKind,
        texture_cache::{CacheStats, Releasable, TextureCache},
        transient::FrameResources,
    },
};

/// Masked layers are drawn at this fraction of their opacity instead of sampling the mask.
pub const MASK_OPACITY_APPROX: f32 = 0.8;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

impl Vertex {
    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct LayerUniform {
    opacity: f32,
    _pad: [f32; 3],
    rot: [[f32; 4]; 3],
}

impl LayerUniform {
    fn new(opacity: f32, rotation: [[f32; 3]; 3]) -> Self {
        let row = |r: [f32; 3]| [r[0], r[1], r[2], 0.0];
        Self {
            opacity: opacity.clamp(0.0, 1.0),
            _pad: [0.0; 3],
            rot: [row(rotation[0]), row(rotation[1]), row(rotation[2])],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct PanoUniform {
    yaw: f32,
    pitch: f32,
    roll: f32,
    fov: f32,
    aspect: f32,
    opacity: f32,
    _pad: [f32; 2],
}

impl PanoUniform {
    fn new(p: &PanoramaDraw) -> Self {
        let v = &p.view;
        Self {
            yaw: deg_to_rad(v.yaw) as f32,
            pitch: deg_to_rad(v.pitch) as f32,
            roll: deg_to_rad(v.roll) as f32,
            fov: deg_to_rad(v.fov) as f32,
            aspect: v.aspect as f32,
            opacity: p.flat.opacity.clamp(0.0, 1.0),
            _pad: [0.0; 2],
        }
    }
}

/// Canvas-space quad of `placement` in NDC, TL TR BR BL.
fn quad_vertices(placement: &Placement, canvas: Canvas) -> [Vertex; 4] {
    let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let corners = placement.corners();
    std::array::from_fn(|i| Vertex {
        pos: to_ndc(corners[i], canvas),
        uv: uvs[i],
    })
}

fn clear_color(premul: [u8; 4]) -> wgpu::Color {
    let c = |v: u8| f64::from(v) / 255.0;
    wgpu::Color {
        r: c(premul[0]),
        g: c(premul[1]),
        b: c(premul[2]),
        a: c(premul[3]),
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

impl Releasable for wgpu::Buffer {
    fn release_resource(&mut self) {
        self.destroy();
    }
}

/// An uploaded image.
#[derive(Debug)]
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Releasable for GpuTexture {
    fn release_resource(&mut self) {
        self.texture.destroy();
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &ImageRgba,
) -> PanoResult<GpuTexture> {
    let max = device.limits().max_texture_dimension_2d;
    if image.width() > max || image.height() > max {
        return Err(PanoError::resource(format!(
            "image {}x{} exceeds max texture size {max}",
            image.width(),
            image.height()
        )));
    }
    let size = wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("panolayer_image"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
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
        image.data(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.width() * 4),
            rows_per_image: Some(image.height()),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuTexture { texture, view })
}

const LAYER_WGSL: &str = r#"
struct Layer {
  opacity: f32,
  pad0: f32,
  pad1: f32,
  pad2: f32,
  rot0: vec4<f32>,
  rot1: vec4<f32>,
  rot2: vec4<f32>,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> layer: Layer;

@vertex
fn vs(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
  let v = vec3<f32>(pos, 0.0);
  let p = vec3<f32>(dot(layer.rot0.xyz, v), dot(layer.rot1.xyz, v), dot(layer.rot2.xyz, v));
  var o: VsOut;
  o.pos = vec4<f32>(p.xy, 0.0, 1.0);
  o.uv = uv;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  return textureSample(t_src, s_src, in.uv) * layer.opacity;
}
"#;

const PANO_WGSL: &str = r#"
struct Pano {
  yaw: f32,
  pitch: f32,
  roll: f32,
  fov: f32,
  aspect: f32,
  opacity: f32,
  pad0: f32,
  pad1: f32,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var<uniform> pano: Pano;

@vertex
fn vs(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(pos, 0.0, 1.0);
  o.uv = uv;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  let ndc = in.uv * 2.0 - vec2<f32>(1.0, 1.0);
  let ray = pano_view_ray(ndc, tan(pano.fov * 0.5), pano.aspect);
  let uv = pano_ray_to_uv(pano_rotate_ray(ray, pano.yaw, pano.pitch, pano.roll));
  return textureSampleLevel(t_src, s_src, uv, 0.0) * pano.opacity;
}
"#;

const OVERLAY_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> color: vec4<f32>;

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  return vec4<f32>(p[vi], 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
  return color;
}
"#;

struct Pipelines {
    textured_bgl: wgpu::BindGroupLayout,
    overlay_bgl: wgpu::BindGroupLayout,
    layer: wgpu::RenderPipeline,
    pano: wgpu::RenderPipeline,
    overlay: wgpu::RenderPipeline,
    clamp_sampler: wgpu::Sampler,
    pano_sampler: wgpu::Sampler,
    indices: wgpu::Buffer,
}

fn textured_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("panolayer_textured_bgl"),
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
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

fn pipeline(
    device: &wgpu::Device,
    label: &str,
    source: String,
    bgl: &wgpu::BindGroupLayout,
    buffers: &[wgpu::VertexBufferLayout<'_>],
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let textured_bgl = textured_bind_group_layout(device);
        let overlay_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("panolayer_overlay_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let layer = pipeline(
            device,
            "panolayer_layer",
            LAYER_WGSL.to_owned(),
            &textured_bgl,
            &[Vertex::LAYOUT],
        );
        let pano = pipeline(
            device,
            "panolayer_panorama",
            format!("{PANORAMA_RAY_WGSL}\n{PANO_WGSL}"),
            &textured_bgl,
            &[Vertex::LAYOUT],
        );
        let overlay = pipeline(
            device,
            "panolayer_overlay",
            OVERLAY_WGSL.to_owned(),
            &overlay_bgl,
            &[],
        );

        let clamp_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("panolayer_layer_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let pano_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("panolayer_pano_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("panolayer_quad_indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            textured_bgl,
            overlay_bgl,
            layer,
            pano,
            overlay,
            clamp_sampler,
            pano_sampler,
            indices,
        }
    }
}

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: Pipelines,
}

impl Gpu {
    fn new() -> PanoResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                PanoError::gpu("no gpu adapter available")
            }
            other => PanoError::gpu(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("panolayer_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| PanoError::gpu(format!("wgpu request_device failed: {e:?}")))?;

        tracing::info!(adapter = ?adapter.get_info().name, "gpu compositor initialized");
        let pipelines = Pipelines::new(&device);
        Ok(Self {
            device,
            queue,
            pipelines,
        })
    }
}

struct RenderTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    bytes_per_row: u32,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> PanoResult<Self> {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("panolayer_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_row = width
            .checked_mul(4)
            .map(|b| align_to(b, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT))
            .ok_or_else(|| PanoError::gpu("render target width overflow"))?;
        let size = u64::from(bytes_per_row)
            .checked_mul(u64::from(height))
            .ok_or_else(|| PanoError::gpu("readback buffer size overflow"))?;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("panolayer_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            width,
            height,
            texture,
            view,
            readback,
            bytes_per_row,
        })
    }

    fn destroy(&self) {
        self.texture.destroy();
        self.readback.destroy();
    }
}

enum DrawKind {
    Layer,
    Panorama,
}

struct PreparedDraw {
    kind: DrawKind,
    bind_group: wgpu::BindGroup,
    vertices: wgpu::Buffer,
}

/// wgpu implementation of [`Compositor`].
pub struct GpuCompositor {
    config: RendererConfig,
    gpu: Option<Gpu>,
    target: Option<RenderTarget>,
    textures: TextureCache<GpuTexture>,
    perf: PerformanceMonitor,
    frame: u64,
}

impl std::fmt::Debug for GpuCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuCompositor")
            .field("ready", &self.gpu.is_some())
            .field("target", &self.target.as_ref().map(|t| (t.width, t.height)))
            .field("textures", &self.textures.stats())
            .field("frame", &self.frame)
            .finish()
    }
}

impl GpuCompositor {
    /// Acquire an adapter and device and build every pipeline.
    pub fn new(config: RendererConfig) -> PanoResult<Self> {
        let gpu = Gpu::new()?;
        Ok(Self {
            textures: TextureCache::new(config.texture_cache_capacity),
            perf: PerformanceMonitor::new(config.perf_samples, config.frame_budget),
            config,
            gpu: Some(gpu),
            target: None,
            frame: 0,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Render `plan` into a host-owned `Rgba8Unorm` view instead of the headless target.
    pub fn render_frame_to_view(
        &mut self,
        plan: &FramePlan,
        view: &wgpu::TextureView,
    ) -> PanoResult<FrameOutcome> {
        if self.gpu.is_none() {
            tracing::warn!("gpu pipelines not ready, skipping frame");
            return Ok(FrameOutcome::default());
        }
        self.perf.start_frame();
        let outcome = self.encode_frame(plan, view)?;
        self.perf.end_frame();
        Ok(outcome)
    }

    fn ensure_target(&mut self, canvas: Canvas) -> PanoResult<()> {
        let fits = self
            .target
            .as_ref()
            .is_some_and(|t| t.width == canvas.width && t.height == canvas.height);
        if fits {
            return Ok(());
        }
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| PanoError::gpu("gpu backend not initialized"))?;
        if let Some(old) = self.target.take() {
            old.destroy();
        }
        self.target = Some(RenderTarget::new(&gpu.device, canvas.width, canvas.height)?);
        Ok(())
    }

    fn encode_frame(&mut self, plan: &FramePlan, view: &wgpu::TextureView) -> PanoResult<FrameOutcome> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| PanoError::gpu("gpu backend not initialized"))?;
        let textures = &mut self.textures;
        self.frame += 1;

        let mut frame = FrameResources::<wgpu::Buffer>::begin(self.frame);
        let mut outcome = FrameOutcome::default();
        let mut draws = Vec::new();

        if let Some(bg) = &plan.background {
            let prepared = match bg {
                BackgroundDraw::Flat(d) => {
                    prepare_layer(gpu, textures, &mut frame, plan, d, d.opacity, false)
                }
                BackgroundDraw::Panorama(p) => prepare_panorama(gpu, textures, &mut frame, plan, p),
            };
            collect(&mut draws, &mut outcome, &bg.layer().layer_id, prepared);
        }

        let batches = cull_and_batch(&plan.foreground, plan.canvas);
        outcome.culled = batches.culled;
        for i in batches.draw_order() {
            let d = &plan.foreground[i];
            let opacity = if d.is_masked() {
                d.opacity * MASK_OPACITY_APPROX
            } else {
                d.opacity
            };
            let prepared = prepare_layer(gpu, textures, &mut frame, plan, d, opacity, true);
            collect(&mut draws, &mut outcome, &d.layer_id, prepared);
        }

        let p = &gpu.pipelines;
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panolayer_frame_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("panolayer_frame_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color(plan.clear)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_index_buffer(p.indices.slice(..), wgpu::IndexFormat::Uint16);
            for d in &draws {
                rp.set_pipeline(match d.kind {
                    DrawKind::Layer => &p.layer,
                    DrawKind::Panorama => &p.pano,
                });
                rp.set_bind_group(0, &d.bind_group, &[]);
                rp.set_vertex_buffer(0, d.vertices.slice(..));
                rp.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
            }
        }
        gpu.queue.submit(Some(encoder.finish()));

        let released = frame.submitted().release();
        for key in &released.texture_refs {
            textures.release(key);
        }
        tracing::debug!(
            frame = released.frame,
            buffers = released.buffers,
            drawn = outcome.drawn,
            culled = outcome.culled,
            failed = outcome.failed,
            "gpu frame submitted"
        );
        Ok(outcome)
    }
}

fn collect(
    draws: &mut Vec<PreparedDraw>,
    outcome: &mut FrameOutcome,
    layer_id: &str,
    prepared: PanoResult<PreparedDraw>,
) {
    match prepared {
        Ok(d) => {
            draws.push(d);
            outcome.drawn += 1;
        }
        Err(e) => {
            outcome.failed += 1;
            tracing::warn!(layer = layer_id, error = %e, "skipping layer");
        }
    }
}

fn load_texture(
    gpu: &Gpu,
    textures: &mut TextureCache<GpuTexture>,
    frame: &mut FrameResources<wgpu::Buffer>,
    d: &LayerDraw,
) -> PanoResult<wgpu::TextureView> {
    let view = textures
        .load(&d.image.key, &d.image.image, |img| {
            upload_texture(&gpu.device, &gpu.queue, img)
        })?
        .view
        .clone();
    frame.track_texture(d.image.key.clone());
    Ok(view)
}

fn textured_draw(
    gpu: &Gpu,
    frame: &mut FrameResources<wgpu::Buffer>,
    kind: DrawKind,
    view: &wgpu::TextureView,
    vertices: &[Vertex; 4],
    uniform: &[u8],
) -> PreparedDraw {
    let p = &gpu.pipelines;
    let vb = gpu
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("panolayer_quad_vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
    let ub = gpu
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("panolayer_draw_uniform"),
            contents: uniform,
            usage: wgpu::BufferUsages::UNIFORM,
        });
    let sampler = match kind {
        DrawKind::Layer => &p.clamp_sampler,
        DrawKind::Panorama => &p.pano_sampler,
    };
    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("panolayer_draw_bg"),
        layout: &p.textured_bgl,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: ub.as_entire_binding(),
            },
        ],
    });
    frame.track(ub);
    let vertices = frame.track(vb).clone();
    PreparedDraw {
        kind,
        bind_group,
        vertices,
    }
}

fn prepare_layer(
    gpu: &Gpu,
    textures: &mut TextureCache<GpuTexture>,
    frame: &mut FrameResources<wgpu::Buffer>,
    plan: &FramePlan,
    d: &LayerDraw,
    opacity: f32,
    rotate: bool,
) -> PanoResult<PreparedDraw> {
    let view = load_texture(gpu, textures, frame, d)?;
    let rotation = if rotate {
        plan.vertex_rotation
    } else {
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    };
    let uniform = LayerUniform::new(opacity, rotation);
    Ok(textured_draw(
        gpu,
        frame,
        DrawKind::Layer,
        &view,
        &quad_vertices(&d.placement, plan.canvas),
        bytemuck::bytes_of(&uniform),
    ))
}

fn prepare_panorama(
    gpu: &Gpu,
    textures: &mut TextureCache<GpuTexture>,
    frame: &mut FrameResources<wgpu::Buffer>,
    plan: &FramePlan,
    p: &PanoramaDraw,
) -> PanoResult<PreparedDraw> {
    let view = load_texture(gpu, textures, frame, &p.flat)?;
    let uniform = PanoUniform::new(p);
    Ok(textured_draw(
        gpu,
        frame,
        DrawKind::Panorama,
        &view,
        &quad_vertices(&p.viewport, plan.canvas),
        bytemuck::bytes_of(&uniform),
    ))
}

impl Compositor for GpuCompositor {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    #[tracing::instrument(level = "debug", skip_all, fields(time = plan.time))]
    fn render_frame(&mut self, plan: &FramePlan) -> PanoResult<FrameOutcome> {
        if self.gpu.is_none() {
            tracing::warn!("gpu pipelines not ready, skipping frame");
            return Ok(FrameOutcome::default());
        }
        self.perf.start_frame();
        self.ensure_target(plan.canvas)?;
        let view = self
            .target
            .as_ref()
            .map(|t| t.view.clone())
            .ok_or_else(|| PanoError::gpu("render target missing"))?;
        let outcome = self.encode_frame(plan, &view)?;
        self.perf.end_frame();
        Ok(outcome)
    }

    fn draw_overlay(&mut self, overlay: OverlayKind) -> PanoResult<()> {
        let (Some(gpu), Some(target)) = (self.gpu.as_ref(), self.target.as_ref()) else {
            tracing::warn!("gpu pipelines not ready, skipping overlay");
            return Ok(());
        };
        let p = &gpu.pipelines;
        let color = overlay.color().premultiplied();
        let ub = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("panolayer_overlay_color"),
                contents: bytemuck::cast_slice(&color),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("panolayer_overlay_bg"),
            layout: &p.overlay_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ub.as_entire_binding(),
            }],
        });

        let mut frame = FrameResources::<wgpu::Buffer>::begin(self.frame);
        frame.track(ub);
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panolayer_overlay_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("panolayer_overlay_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&p.overlay);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
        }
        gpu.queue.submit(Some(encoder.finish()));
        let _ = frame.submitted().release();
        Ok(())
    }

    fn read_frame(&mut self) -> PanoResult<FrameRGBA> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| PanoError::gpu("gpu backend not initialized"))?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| PanoError::gpu("no frame rendered yet"))?;

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panolayer_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = target.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        gpu.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| PanoError::gpu(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| PanoError::gpu("readback channel closed"))?
            .map_err(|e| PanoError::gpu(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let row_bytes = target.width as usize * 4;
        let padded = target.bytes_per_row as usize;
        let mut data = Vec::with_capacity(row_bytes * target.height as usize);
        for row in 0..target.height as usize {
            let start = row * padded;
            data.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        target.readback.unmap();

        Ok(FrameRGBA {
            width: target.width,
            height: target.height,
            data,
            premultiplied: true,
        })
    }

    fn resize_render_targets(&mut self, width: u32, height: u32) -> PanoResult<()> {
        let canvas = Canvas::new(width, height)?;
        if self
            .target
            .as_ref()
            .is_some_and(|t| t.width != canvas.width || t.height != canvas.height)
            && let Some(old) = self.target.take()
        {
            old.destroy();
        }
        Ok(())
    }

    fn performance_stats(&self) -> PerformanceStats {
        self.perf.stats()
    }

    fn cache_stats(&self) -> CacheStats {
        self.textures.stats()
    }

    fn release_layer(&mut self, _layer_id: &str, image_key: Option<&str>) {
        if let Some(key) = image_key {
            self.textures.evict(key);
        }
    }

    fn cleanup(&mut self) {
        self.textures.cleanup();
        if let Some(t) = self.target.take() {
            t.destroy();
        }
        if self.gpu.take().is_some() {
            tracing::debug!("gpu compositor released");
        }
    }
}

impl Drop for GpuCompositor {
    fn drop(&mut self) {
        self.cleanup();
    }
}
