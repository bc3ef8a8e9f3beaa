//! The wgpu implementation of [`TileRenderer`].
//!
//! Uploads happen immediately on the queue. Draw calls are only recorded
//! during traversal; [`WgpuTileRenderer::prepare`] writes their uniforms and
//! [`WgpuTileRenderer::encode`] replays them into a render pass.

use std::sync::Arc;

use glam::Mat4;
use rustc_hash::FxHashMap;
use starmap_tiles::{
    DrawCall, GpuResource, IndexBufferHandle, RenderError, TextureFilter, TextureHandle,
    TexturePayload, TileRenderer, TileVertex, VertexBufferHandle,
};
use wgpu::util::DeviceExt;

use crate::{DrawUniform, GpuContext, GpuError, GpuTexture, TexturePool, TilePipelines};

const INITIAL_UNIFORM_SLOTS: u64 = 256;

/// A color texture to render into without a window.
pub struct OffscreenTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl OffscreenTarget {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen-target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

/// Tile renderer backed by a wgpu device.
pub struct WgpuTileRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture_pool: TexturePool,
    pipelines: TilePipelines,
    vertex_buffers: FxHashMap<VertexBufferHandle, wgpu::Buffer>,
    index_buffers: FxHashMap<IndexBufferHandle, wgpu::Buffer>,
    textures: FxHashMap<TextureHandle, GpuTexture>,
    next_id: u64,
    recorded: Vec<DrawCall>,
    prepared: Vec<(DrawCall, u32)>,
    uniform_stride: u64,
    uniform_slots: u64,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    float_range: (f32, f32),
    clear_color: wgpu::Color,
}

impl WgpuTileRenderer {
    pub fn new(gpu: &GpuContext, target_format: wgpu::TextureFormat) -> Self {
        let device = Arc::clone(&gpu.device);
        let texture_pool = TexturePool::new(&device);
        let pipelines = TilePipelines::new(&device, &texture_pool, target_format);

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let size = std::mem::size_of::<DrawUniform>() as u64;
        let uniform_stride = size.div_ceil(alignment) * alignment;
        let (uniform_buffer, uniform_bind_group) =
            create_uniforms(&device, &pipelines, uniform_stride, INITIAL_UNIFORM_SLOTS);

        Self {
            device,
            queue: Arc::clone(&gpu.queue),
            texture_pool,
            pipelines,
            vertex_buffers: FxHashMap::default(),
            index_buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            next_id: 0,
            recorded: Vec::new(),
            prepared: Vec::new(),
            uniform_stride,
            uniform_slots: INITIAL_UNIFORM_SLOTS,
            uniform_buffer,
            uniform_bind_group,
            float_range: (0.0, 1.0),
            clear_color: wgpu::Color::BLACK,
        }
    }

    /// Value range mapped to black..white for float tiles.
    pub fn set_float_range(&mut self, min: f32, max: f32) {
        self.float_range = (min, max);
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Buffers and textures currently held.
    #[must_use]
    pub fn live_resources(&self) -> usize {
        self.vertex_buffers.len() + self.index_buffers.len() + self.textures.len()
    }

    /// Draws recorded since the last [`prepare`](Self::prepare).
    #[must_use]
    pub fn recorded_draws(&self) -> usize {
        self.recorded.len()
    }

    /// Draws that the next [`encode`](Self::encode) will issue.
    #[must_use]
    pub fn prepared_draws(&self) -> usize {
        self.prepared.len()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Move recorded draws into the frame and write their uniforms.
    ///
    /// Draws whose resources were released after recording are dropped.
    pub fn prepare(&mut self, view_proj: Mat4) {
        let recorded = std::mem::take(&mut self.recorded);
        let draws: Vec<DrawCall> = recorded
            .into_iter()
            .filter(|call| {
                self.vertex_buffers.contains_key(&call.vertices)
                    && self.index_buffers.contains_key(&call.indices)
                    && self.textures.contains_key(&call.texture)
            })
            .collect();

        let needed = draws.len() as u64;
        if needed > self.uniform_slots {
            let slots = needed.next_power_of_two();
            let (buffer, bind_group) =
                create_uniforms(&self.device, &self.pipelines, self.uniform_stride, slots);
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
            self.uniform_slots = slots;
            tracing::debug!("Grew tile uniform buffer to {} slots", slots);
        }

        let stride = self.uniform_stride as usize;
        let mut bytes = vec![0u8; draws.len() * stride];
        self.prepared.clear();
        for (i, call) in draws.into_iter().enumerate() {
            let uniform = DrawUniform::new(view_proj, call.opacity, self.float_range);
            let start = i * stride;
            bytes[start..start + std::mem::size_of::<DrawUniform>()]
                .copy_from_slice(bytemuck::bytes_of(&uniform));
            self.prepared.push((call, start as u32));
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &bytes);
        }
    }

    /// Issue the prepared draws into `pass`.
    pub fn encode(&self, pass: &mut wgpu::RenderPass<'_>) {
        let mut current: Option<TextureFilter> = None;
        for (call, offset) in &self.prepared {
            let (Some(vertices), Some(indices), Some(texture)) = (
                self.vertex_buffers.get(&call.vertices),
                self.index_buffers.get(&call.indices),
                self.textures.get(&call.texture),
            ) else {
                continue;
            };
            if current != Some(texture.filter) {
                pass.set_pipeline(match texture.filter {
                    TextureFilter::LinearMipmap => &self.pipelines.color,
                    TextureFilter::Nearest => &self.pipelines.float,
                });
                current = Some(texture.filter);
            }
            pass.set_bind_group(0, &self.uniform_bind_group, &[*offset]);
            pass.set_bind_group(1, &texture.bind_group, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..call.index_count, 0, 0..1);
        }
    }

    /// Prepare, encode and submit a frame into `target`. Returns the draw count.
    pub fn render(&mut self, view_proj: Mat4, target: &wgpu::TextureView) -> usize {
        self.prepare(view_proj);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tile-frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tile-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            self.encode(&mut pass);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.prepared.len()
    }

    fn create_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<wgpu::Buffer, RenderError> {
        if contents.is_empty() {
            return Err(upload_error(
                label,
                GpuError::EmptyBuffer {
                    label: label.to_string(),
                },
            ));
        }
        Ok(self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            }))
    }
}

fn upload_error(label: &str, err: GpuError) -> RenderError {
    RenderError::Upload {
        label: label.to_string(),
        source: Box::new(err),
    }
}

fn create_uniforms(
    device: &wgpu::Device,
    pipelines: &TilePipelines,
    stride: u64,
    slots: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-uniforms"),
        size: stride * slots,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("tile-uniforms"),
        layout: &pipelines.uniform_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

impl TileRenderer for WgpuTileRenderer {
    fn upload_vertices(
        &mut self,
        label: &str,
        vertices: &[TileVertex],
    ) -> Result<VertexBufferHandle, RenderError> {
        let buffer = self.create_buffer(
            label,
            bytemuck::cast_slice(vertices),
            wgpu::BufferUsages::VERTEX,
        )?;
        let handle = VertexBufferHandle(self.allocate());
        self.vertex_buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn upload_indices(
        &mut self,
        label: &str,
        indices: &[u16],
    ) -> Result<IndexBufferHandle, RenderError> {
        let buffer = self.create_buffer(
            label,
            bytemuck::cast_slice(indices),
            wgpu::BufferUsages::INDEX,
        )?;
        let handle = IndexBufferHandle(self.allocate());
        self.index_buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn upload_texture(
        &mut self,
        label: &str,
        texture: &TexturePayload,
    ) -> Result<TextureHandle, RenderError> {
        let gpu = self
            .texture_pool
            .create(&self.device, &self.queue, label, texture)
            .map_err(|err| upload_error(label, err))?;
        let handle = TextureHandle(self.allocate());
        self.textures.insert(handle, gpu);
        Ok(handle)
    }

    fn draw(&mut self, call: DrawCall) {
        self.recorded.push(call);
    }

    fn release(&mut self, resource: GpuResource) {
        let released = match resource {
            GpuResource::Vertices(handle) => self.vertex_buffers.remove(&handle).is_some(),
            GpuResource::Indices(handle) => self.index_buffers.remove(&handle).is_some(),
            GpuResource::Texture(handle) => self.textures.remove(&handle).is_some(),
        };
        if !released {
            tracing::warn!("Release of unknown resource {:?}", resource);
        }
    }
}
