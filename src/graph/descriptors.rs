use bitflags::bitflags;

use super::GraphTexture;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    R11G11B10Float,
    R16G16B16A16Float,
    R32Float,
    R32Uint,
    R32G32B32A32Float,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

impl Format {
    pub fn is_supported(self) -> bool {
        self != Format::Unknown
    }
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint
        )
    }
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }
    pub fn texel_size(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::B8G8R8A8Unorm
            | Format::R11G11B10Float
            | Format::R32Float
            | Format::R32Uint
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Float | Format::D32FloatS8Uint => 8,
            Format::R32G32B32A32Float => 16,
        }
    }
    /// Depth and stencil are tracked as separate planes.
    pub fn plane_count(self) -> u32 {
        if self.has_stencil() {
            2
        } else {
            1
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture2D,
    Texture2DArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const PRESENT = 1 << 6;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const INDIRECT_ARGS = 1 << 5;
        const COPY_SRC = 1 << 6;
        const COPY_DST = 1 << 7;
    }

    /// Graph level flags, these are not part of what the pool matches on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// The allocation outlives a single pass run, it is only returned to the pool
        /// once the whole graph has executed.
        const MULTI_FRAME = 1 << 0;
        /// Writing to the resource from any pass is an error.
        const READ_ONLY = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub format: Format,
    pub extent: [u32; 3],
    pub array_size: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
    pub flags: ResourceFlags,
}

impl TextureDesc {
    pub fn new_2d(format: Format, width: u32, height: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            format,
            extent: [width, height, 1],
            array_size: 1,
            mip_count: 1,
            sample_count: 1,
            usage,
            flags: ResourceFlags::empty(),
        }
    }
    pub fn new_2d_array(
        format: Format,
        width: u32,
        height: u32,
        array_size: u32,
        usage: TextureUsage,
    ) -> Self {
        Self {
            dimension: TextureDimension::Texture2DArray,
            array_size,
            ..Self::new_2d(format, width, height, usage)
        }
    }
    pub fn new_3d(format: Format, extent: [u32; 3], usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Texture3D,
            extent,
            ..Self::new_2d(format, extent[0], extent[1], usage)
        }
    }
    pub fn new_cube(format: Format, size: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::TextureCube,
            array_size: 6,
            ..Self::new_2d(format, size, size, usage)
        }
    }
    pub fn with_mips(mut self, mip_count: u32) -> Self {
        self.mip_count = mip_count;
        self
    }
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_mip_count(&self) -> u32 {
        let largest = self.extent[0].max(self.extent[1]).max(self.extent[2]).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// Bytes of all mips and slices, ignoring any alignment the device adds.
    pub fn byte_size(&self) -> u64 {
        let [mut width, mut height, mut depth] = self.extent.map(|e| e as u64);
        let mut total = 0;
        for _ in 0..self.mip_count {
            total += width * height * depth;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            depth = (depth / 2).max(1);
        }
        total * self.array_size as u64 * self.sample_count as u64 * self.format.texel_size() as u64
    }

    pub fn subresource_layout(&self) -> SubresourceLayout {
        let slices = match self.dimension {
            TextureDimension::Texture3D => 1,
            _ => self.array_size,
        };
        SubresourceLayout {
            mips: self.mip_count,
            slices,
            planes: self.format.plane_count(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let [width, height, depth] = self.extent;
        if width == 0 || height == 0 || depth == 0 {
            return Err(format!("extent {:?} has a zero dimension", self.extent));
        }
        if self.array_size == 0 {
            return Err("array size is zero".into());
        }
        match self.dimension {
            TextureDimension::Texture2D if depth != 1 || self.array_size != 1 => {
                return Err("2d textures must have a depth and array size of 1".into());
            }
            TextureDimension::Texture2DArray if depth != 1 => {
                return Err("2d array textures must have a depth of 1".into());
            }
            TextureDimension::Texture3D if self.array_size != 1 || self.sample_count != 1 => {
                return Err("3d textures can't be arrays or multisampled".into());
            }
            TextureDimension::TextureCube if self.array_size != 6 || width != height => {
                return Err("cube textures must be square with 6 faces".into());
            }
            TextureDimension::TextureCubeArray if self.array_size % 6 != 0 || width != height => {
                return Err("cube array textures must be square with a multiple of 6 faces".into());
            }
            _ => {}
        }
        if !self.format.is_supported() {
            return Err(format!("format {:?} is not supported", self.format));
        }
        if !self.sample_count.is_power_of_two() || self.sample_count > 16 {
            return Err(format!("{} is not a valid sample count", self.sample_count));
        }
        if self.mip_count == 0 || self.mip_count > self.max_mip_count() {
            return Err(format!(
                "mip count {} is outside of 1..={}",
                self.mip_count,
                self.max_mip_count()
            ));
        }
        if self.sample_count > 1 {
            if self.usage.contains(TextureUsage::UNORDERED_ACCESS) {
                return Err("multisampled textures can't have unordered access".into());
            }
            if self.mip_count > 1 {
                return Err("multisampled textures can't have mips".into());
            }
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL) && !self.format.is_depth() {
            return Err(format!("{:?} is not a depth format", self.format));
        }
        if self.usage.contains(TextureUsage::RENDER_TARGET) && self.format.is_depth() {
            return Err(format!("{:?} can't be a color render target", self.format));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub element_size: u32,
    pub element_count: u32,
    pub usage: BufferUsage,
    pub flags: ResourceFlags,
}

impl BufferDesc {
    pub fn new(element_size: u32, element_count: u32, usage: BufferUsage) -> Self {
        Self {
            element_size,
            element_count,
            usage,
            flags: ResourceFlags::empty(),
        }
    }
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
    pub fn size(&self) -> u64 {
        self.element_size as u64 * self.element_count as u64
    }
    pub fn validate(&self) -> Result<(), String> {
        if self.size() == 0 {
            return Err(format!(
                "buffer of {} elements of {} bytes is empty",
                self.element_count, self.element_size
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn flags(&self) -> ResourceFlags {
        match self {
            ResourceDesc::Texture(desc) => desc.flags,
            ResourceDesc::Buffer(desc) => desc.flags,
        }
    }
    pub fn subresource_layout(&self) -> SubresourceLayout {
        match self {
            ResourceDesc::Texture(desc) => desc.subresource_layout(),
            ResourceDesc::Buffer(_) => SubresourceLayout::SINGLE,
        }
    }
    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDesc::Texture(_))
    }
    pub fn byte_size(&self) -> u64 {
        match self {
            ResourceDesc::Texture(desc) => desc.byte_size(),
            ResourceDesc::Buffer(desc) => desc.size(),
        }
    }
    pub(crate) fn without_flags(&self) -> Self {
        match *self {
            ResourceDesc::Texture(desc) => ResourceDesc::Texture(TextureDesc {
                flags: ResourceFlags::empty(),
                ..desc
            }),
            ResourceDesc::Buffer(desc) => ResourceDesc::Buffer(BufferDesc {
                flags: ResourceFlags::empty(),
                ..desc
            }),
        }
    }
}

/// Subresources are laid out plane major, then slice, then mip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceLayout {
    pub mips: u32,
    pub slices: u32,
    pub planes: u32,
}

impl SubresourceLayout {
    pub const SINGLE: Self = Self {
        mips: 1,
        slices: 1,
        planes: 1,
    };

    pub fn count(&self) -> u32 {
        self.mips * self.slices * self.planes
    }
    pub fn index(&self, mip: u32, slice: u32, plane: u32) -> u32 {
        debug_assert!(mip < self.mips && slice < self.slices && plane < self.planes);
        mip + slice * self.mips + plane * self.mips * self.slices
    }
    /// The range covering exactly one subresource.
    pub fn range_of(&self, index: u32) -> SubresourceRange {
        let mip = index % self.mips;
        let slice = (index / self.mips) % self.slices;
        let plane = index / (self.mips * self.slices);
        SubresourceRange {
            base_mip: mip,
            mip_count: 1,
            base_slice: slice,
            slice_count: 1,
            base_plane: plane,
            plane_count: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_slice: u32,
    pub slice_count: u32,
    pub base_plane: u32,
    pub plane_count: u32,
}

impl SubresourceRange {
    pub fn whole(layout: SubresourceLayout) -> Self {
        Self {
            base_mip: 0,
            mip_count: layout.mips,
            base_slice: 0,
            slice_count: layout.slices,
            base_plane: 0,
            plane_count: layout.planes,
        }
    }
    pub fn is_whole(&self, layout: SubresourceLayout) -> bool {
        *self == Self::whole(layout)
    }
    pub fn fits(&self, layout: SubresourceLayout) -> bool {
        self.mip_count > 0
            && self.slice_count > 0
            && self.plane_count > 0
            && self.base_mip + self.mip_count <= layout.mips
            && self.base_slice + self.slice_count <= layout.slices
            && self.base_plane + self.plane_count <= layout.planes
    }
    pub fn count(&self) -> u32 {
        self.mip_count * self.slice_count * self.plane_count
    }
    pub fn indices(self, layout: SubresourceLayout) -> impl Iterator<Item = u32> {
        let planes = self.base_plane..self.base_plane + self.plane_count;
        planes.flat_map(move |plane| {
            let slices = self.base_slice..self.base_slice + self.slice_count;
            slices.flat_map(move |slice| {
                let mips = self.base_mip..self.base_mip + self.mip_count;
                mips.map(move |mip| layout.index(mip, slice, plane))
            })
        })
    }
}

/// A texture together with an optional subresource selection, `None` is the whole texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureView {
    pub texture: GraphTexture,
    pub range: Option<SubresourceRange>,
}

impl From<GraphTexture> for TextureView {
    fn from(texture: GraphTexture) -> Self {
        Self {
            texture,
            range: None,
        }
    }
}

impl GraphTexture {
    pub fn view(self, range: SubresourceRange) -> TextureView {
        TextureView {
            texture: self,
            range: Some(range),
        }
    }
    /// Every slice and plane of a single mip.
    pub fn mip(self, mip: u32) -> TextureView {
        self.view(SubresourceRange {
            base_mip: mip,
            mip_count: 1,
            base_slice: 0,
            slice_count: u32::MAX,
            base_plane: 0,
            plane_count: u32::MAX,
        })
    }
}

/// Resolves a declared range against a layout, `None` is everything and `u32::MAX` counts
/// extend to the end.
pub(crate) fn resolve_range(range: Option<SubresourceRange>, layout: SubresourceLayout) -> SubresourceRange {
    let Some(mut range) = range else {
        return SubresourceRange::whole(layout);
    };
    if range.mip_count == u32::MAX {
        range.mip_count = layout.mips.saturating_sub(range.base_mip);
    }
    if range.slice_count == u32::MAX {
        range.slice_count = layout.slices.saturating_sub(range.base_slice);
    }
    if range.plane_count == u32::MAX {
        range.plane_count = layout.planes.saturating_sub(range.base_plane);
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_textures() {
        let usage = TextureUsage::SHADER_RESOURCE;
        assert!(TextureDesc::new_2d(Format::R8Unorm, 0, 4, usage).validate().is_err());
        assert!(TextureDesc::new_2d(Format::Unknown, 4, 4, usage).validate().is_err());
        assert!(TextureDesc::new_cube(Format::R8Unorm, 4, usage).validate().is_ok());

        let msaa_uav = TextureDesc::new_2d(
            Format::R8G8B8A8Unorm,
            64,
            64,
            TextureUsage::UNORDERED_ACCESS,
        )
        .with_samples(4);
        assert!(msaa_uav.validate().is_err());

        let too_many_mips = TextureDesc::new_2d(Format::R32Float, 8, 8, usage).with_mips(5);
        assert!(too_many_mips.validate().is_err());
        assert!(too_many_mips.with_mips(4).validate().is_ok());
    }

    #[test]
    fn subresource_indices() {
        let desc = TextureDesc::new_2d_array(
            Format::D24UnormS8Uint,
            16,
            16,
            2,
            TextureUsage::DEPTH_STENCIL,
        )
        .with_mips(3);
        let layout = desc.subresource_layout();
        assert_eq!(layout.count(), 3 * 2 * 2);

        let range = SubresourceRange {
            base_mip: 1,
            mip_count: 1,
            base_slice: 0,
            slice_count: 2,
            base_plane: 1,
            plane_count: 1,
        };
        let indices: Vec<u32> = range.indices(layout).collect();
        assert_eq!(indices, vec![7, 10]);
        assert_eq!(layout.range_of(10), {
            SubresourceRange {
                base_slice: 1,
                slice_count: 1,
                ..range
            }
        });
    }
}
