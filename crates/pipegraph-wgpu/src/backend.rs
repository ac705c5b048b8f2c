//! Resource creation on a wgpu device

use pipegraph::{BackendError, PipeDimension, PipeFormat, PipeKind, ResourceBackend, ResourceInfo};

/// A texture (with its default view) or a buffer backing a pipe
#[derive(Debug)]
pub enum WgpuResource {
    Texture { texture: wgpu::Texture, view: wgpu::TextureView },
    Buffer(wgpu::Buffer),
}

impl WgpuResource {
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match self {
            Self::Texture { texture, .. } => Some(texture),
            Self::Buffer(_) => None,
        }
    }

    /// View covering every layer of the texture
    pub fn view(&self) -> Option<&wgpu::TextureView> {
        match self {
            Self::Texture { view, .. } => Some(view),
            Self::Buffer(_) => None,
        }
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Texture { .. } => None,
        }
    }
}

/// [`ResourceBackend`] creating resources on a `wgpu::Device`
///
/// Out-of-memory and validation errors are caught with error scopes around each
/// creation, so a failed resize can be rolled back instead of poisoning the device.
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    device: wgpu::Device,
    limits: wgpu::Limits,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device) -> Self {
        let limits = device.limits();
        Self { device, limits }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn create_texture(&self, label: &str, info: &ResourceInfo) -> Result<WgpuResource, BackendError> {
        let dimension = texture_dimension(info.dimension).ok_or_else(|| BackendError::Unsupported(format!("{:?} is not a texture dimension", info.dimension)))?;
        if dimension == wgpu::TextureDimension::D3 && info.format.kind() == PipeKind::Depth {
            return Err(BackendError::Unsupported(format!("3D textures cannot use depth format {:?}", info.format)));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: info.width,
                height: info.height,
                depth_or_array_layers: info.layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format: texture_format(info.format),
            usage: texture_usages(info.format, info.dimension),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(view_dimension(info.dimension)),
            ..Default::default()
        });

        Ok(WgpuResource::Texture { texture, view })
    }

    fn create_buffer(&self, label: &str, info: &ResourceInfo) -> WgpuResource {
        WgpuResource::Buffer(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: info.byte_size(),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }
}

impl ResourceBackend for WgpuBackend {
    type Resource = WgpuResource;
    type Frame = wgpu::CommandEncoder;

    fn create_resource(&mut self, label: &str, info: &ResourceInfo) -> Result<Self::Resource, BackendError> {
        check_limits(info, &self.limits)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resource = match info.dimension {
            PipeDimension::Buffer => Ok(self.create_buffer(label, info)),
            _ => self.create_texture(label, info),
        };
        // Scopes pop in reverse push order
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        let requested = info.byte_size();
        let scoped = out_of_memory.or(validation).map(|error| device_error(error, requested));
        if let Some(error) = &scoped {
            tracing::warn!(label, bytes = requested, %error, "Resource creation failed");
        }

        settle(resource, scoped, |resource| self.destroy_resource(resource))
    }

    fn destroy_resource(&mut self, resource: Self::Resource) {
        match resource {
            WgpuResource::Texture { texture, .. } => texture.destroy(),
            WgpuResource::Buffer(buffer) => buffer.destroy(),
        }
    }
}

/// Combines a creation result with the error captured by the device's error scopes
///
/// A resource created while the device reported an error is destroyed.
pub(crate) fn settle<R>(resource: Result<R, BackendError>, scoped: Option<BackendError>, destroy: impl FnOnce(R)) -> Result<R, BackendError> {
    match (resource, scoped) {
        (Err(err), _) => Err(err),
        (Ok(resource), Some(err)) => {
            destroy(resource);
            Err(err)
        }
        (Ok(resource), None) => Ok(resource),
    }
}

fn device_error(error: wgpu::Error, requested: u64) -> BackendError {
    match error {
        wgpu::Error::OutOfMemory { .. } => BackendError::OutOfMemory { requested },
        other => BackendError::Device(other.to_string()),
    }
}

/// Maps a pipe format to the wgpu texture format
pub(crate) fn texture_format(format: PipeFormat) -> wgpu::TextureFormat {
    match format {
        PipeFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        PipeFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PipeFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PipeFormat::R16Float => wgpu::TextureFormat::R16Float,
        PipeFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        PipeFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PipeFormat::R32Float => wgpu::TextureFormat::R32Float,
        PipeFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        PipeFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PipeFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        PipeFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

pub(crate) fn texture_dimension(dimension: PipeDimension) -> Option<wgpu::TextureDimension> {
    match dimension {
        PipeDimension::D2 | PipeDimension::D2Array => Some(wgpu::TextureDimension::D2),
        PipeDimension::D3 => Some(wgpu::TextureDimension::D3),
        PipeDimension::Buffer => None,
    }
}

pub(crate) fn view_dimension(dimension: PipeDimension) -> wgpu::TextureViewDimension {
    match dimension {
        PipeDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        PipeDimension::D3 => wgpu::TextureViewDimension::D3,
        PipeDimension::D2 | PipeDimension::Buffer => wgpu::TextureViewDimension::D2,
    }
}

/// Usages granted to a pipe texture
///
/// Every pipe can be sampled and copied. Formats that support it also get storage
/// access; 2D textures can be rendered to.
pub(crate) fn texture_usages(format: PipeFormat, dimension: PipeDimension) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;

    if format != PipeFormat::Depth24PlusStencil8 {
        usages |= wgpu::TextureUsages::COPY_SRC;
    }
    if dimension != PipeDimension::D3 {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if matches!(format, PipeFormat::Rgba8Unorm | PipeFormat::Rgba16Float | PipeFormat::R32Float | PipeFormat::Rg32Float | PipeFormat::Rgba32Float) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }

    usages
}

/// Rejects extents the device cannot create before touching the device
pub(crate) fn check_limits(info: &ResourceInfo, limits: &wgpu::Limits) -> Result<(), BackendError> {
    let too_large = |limit: u32| BackendError::ExtentTooLarge {
        width: info.width,
        height: info.height,
        layers: info.layers,
        limit,
    };

    match info.dimension {
        PipeDimension::Buffer => {
            if info.byte_size() > limits.max_buffer_size {
                return Err(BackendError::OutOfMemory { requested: info.byte_size() });
            }
        }
        PipeDimension::D3 => {
            let limit = limits.max_texture_dimension_3d;
            if info.width > limit || info.height > limit || info.layers > limit {
                return Err(too_large(limit));
            }
        }
        PipeDimension::D2 | PipeDimension::D2Array => {
            let limit = limits.max_texture_dimension_2d;
            if info.width > limit || info.height > limit {
                return Err(too_large(limit));
            }
            if info.layers > limits.max_texture_array_layers {
                return Err(too_large(limits.max_texture_array_layers));
            }
        }
    }

    Ok(())
}
