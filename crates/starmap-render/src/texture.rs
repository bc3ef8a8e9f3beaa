//! Tile texture creation.
//!
//! Color tiles get a full mip chain computed on the CPU and a trilinear
//! sampler. Float tiles are single-channel `R32Float`, which is not
//! filterable, so they bind without a sampler and are read with
//! `textureLoad` in the shader.

use image::RgbaImage;
use image::imageops::FilterType;
use starmap_tiles::{TextureFilter, TexturePayload};

use crate::GpuError;

/// A tile texture with its bind group.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    pub dimensions: (u32, u32),
    pub filter: TextureFilter,
    pub mip_level_count: u32,
}

/// Number of mip levels down to 1x1.
#[must_use]
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Successively halved copies of an RGBA image, level 0 first.
pub fn mip_chain(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<Vec<(u32, u32, Vec<u8>)>, GpuError> {
    validate(width, height, pixels.len(), 4)?;
    let base = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or(
        GpuError::DataSizeMismatch {
            actual: pixels.len(),
            expected: width as usize * height as usize * 4,
            width,
            height,
        },
    )?;

    let levels = mip_level_count(width, height);
    let mut chain = Vec::with_capacity(levels as usize);
    let mut current = base;
    for level in 0..levels {
        let (w, h) = current.dimensions();
        if level + 1 < levels {
            let next = image::imageops::resize(
                &current,
                (w / 2).max(1),
                (h / 2).max(1),
                FilterType::Triangle,
            );
            chain.push((w, h, current.into_raw()));
            current = next;
        } else {
            chain.push((w, h, current.into_raw()));
            break;
        }
    }
    Ok(chain)
}

fn validate(width: u32, height: u32, len: usize, texel: usize) -> Result<(), GpuError> {
    if width == 0 || height == 0 {
        return Err(GpuError::ZeroDimensions { width, height });
    }
    let expected = width as usize * height as usize * texel;
    if len != expected {
        return Err(GpuError::DataSizeMismatch {
            actual: len,
            expected,
            width,
            height,
        });
    }
    Ok(())
}

/// Shared samplers and layouts for tile textures.
pub struct TexturePool {
    sampler: wgpu::Sampler,
    color_layout: wgpu::BindGroupLayout,
    float_layout: wgpu::BindGroupLayout,
}

impl TexturePool {
    pub fn new(device: &wgpu::Device) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tile-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        let color_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-color-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let float_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-float-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        Self {
            sampler,
            color_layout,
            float_layout,
        }
    }

    #[must_use]
    pub fn color_layout(&self) -> &wgpu::BindGroupLayout {
        &self.color_layout
    }

    #[must_use]
    pub fn float_layout(&self) -> &wgpu::BindGroupLayout {
        &self.float_layout
    }

    pub fn create(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        payload: &TexturePayload,
    ) -> Result<GpuTexture, GpuError> {
        match payload {
            TexturePayload::Rgba8 {
                width,
                height,
                pixels,
            } => self.create_color(device, queue, label, *width, *height, pixels),
            TexturePayload::Float32 {
                width,
                height,
                samples,
            } => self.create_float(device, queue, label, *width, *height, samples),
        }
    }

    fn create_color(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<GpuTexture, GpuError> {
        let chain = mip_chain(width, height, pixels)?;
        let mip_levels = chain.len() as u32;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (level, (w, h, data)) in chain.iter().enumerate() {
            write_level(queue, &texture, level as u32, *w, *h, 4, data);
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.color_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        Ok(GpuTexture {
            texture,
            view,
            bind_group,
            dimensions: (width, height),
            filter: TextureFilter::LinearMipmap,
            mip_level_count: mip_levels,
        })
    }

    fn create_float(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        samples: &[f32],
    ) -> Result<GpuTexture, GpuError> {
        validate(width, height, samples.len(), 1)?;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_level(
            queue,
            &texture,
            0,
            width,
            height,
            4,
            bytemuck::cast_slice(samples),
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.float_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });

        Ok(GpuTexture {
            texture,
            view,
            bind_group,
            dimensions: (width, height),
            filter: TextureFilter::Nearest,
            mip_level_count: 1,
        })
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn write_level(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    width: u32,
    height: u32,
    texel_bytes: u32,
    data: &[u8],
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * texel_bytes),
            rows_per_image: None,
        },
        extent(width, height),
    );
}
