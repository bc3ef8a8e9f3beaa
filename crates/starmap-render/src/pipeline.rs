//! Render pipelines for tile quadrants.
//!
//! Group 0 is a per-draw uniform bound with a dynamic offset, group 1 the
//! tile texture. Color tiles and float tiles differ only in their texture
//! layout and fragment stage.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use starmap_tiles::TileVertex;

use crate::TexturePool;

/// Per-draw uniform: transform plus `[opacity, float_min, float_max, 0]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawUniform {
    pub view_proj: [[f32; 4]; 4],
    pub params: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<DrawUniform>() == 80);

impl DrawUniform {
    #[must_use]
    pub fn new(view_proj: Mat4, opacity: f32, float_range: (f32, f32)) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            params: [opacity, float_range.0, float_range.1, 0.0],
        }
    }
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<TileVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

/// Both tile pipelines and the uniform layout they share.
pub struct TilePipelines {
    pub color: wgpu::RenderPipeline,
    pub float: wgpu::RenderPipeline,
    pub uniform_layout: wgpu::BindGroupLayout,
}

impl TilePipelines {
    pub fn new(
        device: &wgpu::Device,
        textures: &TexturePool,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-uniform-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<DrawUniform>() as u64),
                },
                count: None,
            }],
        });

        let color = build(
            device,
            "tile-color",
            COLOR_SHADER,
            &uniform_layout,
            textures.color_layout(),
            target_format,
        );
        let float = build(
            device,
            "tile-float",
            FLOAT_SHADER,
            &uniform_layout,
            textures.float_layout(),
            target_format,
        );

        Self {
            color,
            float,
            uniform_layout,
        }
    }
}

fn build(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    uniform_layout: &wgpu::BindGroupLayout,
    texture_layout: &wgpu::BindGroupLayout,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[uniform_layout, texture_layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // Sky tiles are seen from inside the sphere.
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

const COLOR_SHADER: &str = r#"
struct DrawUniform {
    view_proj: mat4x4<f32>,
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> draw: DrawUniform;
@group(1) @binding(0) var tile_texture: texture_2d<f32>;
@group(1) @binding(1) var tile_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = draw.view_proj * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(tile_texture, tile_sampler, in.uv);
    return vec4<f32>(color.rgb, color.a * draw.params.x);
}
"#;

const FLOAT_SHADER: &str = r#"
struct DrawUniform {
    view_proj: mat4x4<f32>,
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> draw: DrawUniform;
@group(1) @binding(0) var sample_texture: texture_2d<f32>;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = draw.view_proj * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let dims = vec2<f32>(textureDimensions(sample_texture));
    let texel = vec2<i32>(clamp(in.uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    let value = textureLoad(sample_texture, texel, 0).r;
    let span = max(draw.params.z - draw.params.y, 1e-6);
    let level = clamp((value - draw.params.y) / span, 0.0, 1.0);
    return vec4<f32>(level, level, level, draw.params.x);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_tile_vertex() {
        let layout = vertex_layout();
        assert_eq!(layout.array_stride, 20);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].format, wgpu::VertexFormat::Float32x2);
    }

    #[test]
    fn test_draw_uniform_packs_params() {
        let u = DrawUniform::new(Mat4::IDENTITY, 0.5, (-1.0, 3.0));
        assert_eq!(u.params, [0.5, -1.0, 3.0, 0.0]);
        assert_eq!(u.view_proj[3][3], 1.0);
    }
}
