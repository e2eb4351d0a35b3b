use bitflags::bitflags;
use smallvec::SmallVec;

use super::{
    descriptors::{SubresourceRange, TextureView},
    state::Access,
    GraphBuffer, GraphResource, GraphTexture, GraphUniformBuffer, NoBarrierTag,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PassFlags: u32 {
        /// Draws into render targets on the graphics pipe.
        const RASTER = 1 << 0;
        /// Compute work on the graphics pipe.
        const COMPUTE = 1 << 1;
        /// Compute work on the async compute pipe.
        const ASYNC_COMPUTE = 1 << 2;
        const COPY = 1 << 3;
        const NEVER_CULL = 1 << 4;
        /// The body begins and ends its render pass itself.
        const SKIP_RENDER_PASS = 1 << 5;
        const NEVER_MERGE = 1 << 6;

        const TYPE_MASK = Self::RASTER.bits() | Self::COMPUTE.bits() | Self::ASYNC_COMPUTE.bits() | Self::COPY.bits();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadAction {
    Load,
    Clear,
    NoAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthStencilAccess {
    Read,
    Write,
}

impl DepthStencilAccess {
    pub fn access(self) -> Access {
        match self {
            DepthStencilAccess::Read => Access::DSV_READ,
            DepthStencilAccess::Write => Access::DSV_WRITE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetBinding {
    pub texture: GraphTexture,
    pub mip: u32,
    pub slice: u32,
    pub load: LoadAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilBinding {
    pub texture: GraphTexture,
    pub access: DepthStencilAccess,
    pub depth_load: LoadAction,
    pub stencil_load: LoadAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    TextureSrv,
    TextureUav,
    TextureCopy,
    BufferSrv,
    BufferUav,
    BufferCopy,
    VertexOrIndexBuffer,
    IndirectArgs,
    RenderTarget,
    DepthStencil,
}

impl ParameterKind {
    fn of_texture(access: Access) -> Self {
        if access.is_uav() {
            ParameterKind::TextureUav
        } else if access.intersects(Access::COPY_MASK) {
            ParameterKind::TextureCopy
        } else if access.contains(Access::RTV) {
            ParameterKind::RenderTarget
        } else if access.intersects(Access::DSV_READ | Access::DSV_WRITE) {
            ParameterKind::DepthStencil
        } else {
            ParameterKind::TextureSrv
        }
    }
    fn of_buffer(access: Access) -> Self {
        if access.is_uav() {
            ParameterKind::BufferUav
        } else if access.intersects(Access::COPY_MASK) {
            ParameterKind::BufferCopy
        } else if access.contains(Access::VERTEX_OR_INDEX) {
            ParameterKind::VertexOrIndexBuffer
        } else if access.contains(Access::INDIRECT_ARGS) {
            ParameterKind::IndirectArgs
        } else {
            ParameterKind::BufferSrv
        }
    }
}

/// One resource access of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParameterEntry {
    pub kind: ParameterKind,
    pub resource: GraphResource,
    /// Textures only, `None` covers every subresource.
    pub range: Option<SubresourceRange>,
    pub access: Access,
    pub no_barrier: Option<NoBarrierTag>,
}

/// The declared resource accesses of a pass.
///
/// ```ignore
/// let params = PassParameters::new()
///     .texture(gbuffer, Access::SRV_GRAPHICS)
///     .render_target(scene_color, LoadAction::Clear);
/// ```
#[derive(Clone, Debug, Default)]
pub struct PassParameters {
    pub(crate) entries: Vec<ParameterEntry>,
    pub(crate) render_targets: SmallVec<[RenderTargetBinding; 8]>,
    pub(crate) depth_stencil: Option<DepthStencilBinding>,
    pub(crate) uniform_buffers: SmallVec<[GraphUniformBuffer; 2]>,
}

impl PassParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(self, view: impl Into<TextureView>, access: Access) -> Self {
        self.texture_entry(view.into(), access, None)
    }
    pub fn texture_uav_no_barrier(
        self,
        view: impl Into<TextureView>,
        access: Access,
        tag: NoBarrierTag,
    ) -> Self {
        self.texture_entry(view.into(), access, Some(tag))
    }
    fn texture_entry(mut self, view: TextureView, access: Access, tag: Option<NoBarrierTag>) -> Self {
        let entry = ParameterEntry {
            kind: ParameterKind::of_texture(access),
            resource: view.texture.resource(),
            range: view.range,
            access,
            no_barrier: tag,
        };
        self.entries.push(entry);
        self
    }

    pub fn buffer(self, buffer: GraphBuffer, access: Access) -> Self {
        self.buffer_entry(buffer, access, None)
    }
    pub fn buffer_uav_no_barrier(self, buffer: GraphBuffer, access: Access, tag: NoBarrierTag) -> Self {
        self.buffer_entry(buffer, access, Some(tag))
    }
    fn buffer_entry(mut self, buffer: GraphBuffer, access: Access, tag: Option<NoBarrierTag>) -> Self {
        let entry = ParameterEntry {
            kind: ParameterKind::of_buffer(access),
            resource: buffer.resource(),
            range: None,
            access,
            no_barrier: tag,
        };
        self.entries.push(entry);
        self
    }

    pub fn render_target(self, texture: GraphTexture, load: LoadAction) -> Self {
        self.render_target_binding(RenderTargetBinding {
            texture,
            mip: 0,
            slice: 0,
            load,
        })
    }
    pub fn render_target_binding(mut self, binding: RenderTargetBinding) -> Self {
        self.render_targets.push(binding);
        self
    }
    pub fn depth_stencil(
        mut self,
        texture: GraphTexture,
        access: DepthStencilAccess,
        load: LoadAction,
    ) -> Self {
        self.depth_stencil = Some(DepthStencilBinding {
            texture,
            access,
            depth_load: load,
            stencil_load: load,
        });
        self
    }
    pub fn uniform_buffer(mut self, uniform_buffer: GraphUniformBuffer) -> Self {
        self.uniform_buffers.push(uniform_buffer);
        self
    }

    pub fn has_render_targets(&self) -> bool {
        !self.render_targets.is_empty() || self.depth_stencil.is_some()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && !self.has_render_targets() && self.uniform_buffers.is_empty()
    }
    pub fn render_targets(&self) -> &[RenderTargetBinding] {
        &self.render_targets
    }
    pub fn depth_stencil_binding(&self) -> Option<&DepthStencilBinding> {
        self.depth_stencil.as_ref()
    }

    /// Every access declared directly on this set, render target bindings included.
    /// Uniform buffers are expanded by the graph since their contents live there.
    pub fn accesses(&self) -> impl Iterator<Item = ParameterEntry> + '_ {
        let entries = self.entries.iter().copied();
        let targets = self.render_targets.iter().map(|rt| ParameterEntry {
            kind: ParameterKind::RenderTarget,
            resource: rt.texture.resource(),
            range: Some(SubresourceRange {
                base_mip: rt.mip,
                mip_count: 1,
                base_slice: rt.slice,
                slice_count: 1,
                base_plane: 0,
                plane_count: u32::MAX,
            }),
            access: Access::RTV,
            no_barrier: None,
        });
        let depth = self.depth_stencil.iter().map(|ds| ParameterEntry {
            kind: ParameterKind::DepthStencil,
            resource: ds.texture.resource(),
            range: None,
            access: ds.access.access(),
            no_barrier: None,
        });
        entries.chain(targets).chain(depth)
    }

    /// Whether two raster passes draw into the same attachments and can share a render pass.
    pub(crate) fn same_attachments(&self, other: &Self) -> bool {
        let same_targets = self.render_targets.len() == other.render_targets.len()
            && self
                .render_targets
                .iter()
                .zip(&other.render_targets)
                .all(|(a, b)| a.texture == b.texture && a.mip == b.mip && a.slice == b.slice);
        let same_depth = match (&self.depth_stencil, &other.depth_stencil) {
            (None, None) => true,
            (Some(a), Some(b)) => a.texture == b.texture && a.access == b.access,
            _ => false,
        };
        same_targets && same_depth
    }
    pub(crate) fn clears_attachments(&self) -> bool {
        self.render_targets
            .iter()
            .any(|rt| rt.load == LoadAction::Clear)
            || self.depth_stencil.map_or(false, |ds| {
                ds.depth_load == LoadAction::Clear || ds.stencil_load == LoadAction::Clear
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_access() {
        let texture = GraphTexture(GraphResource::new(0));
        let buffer = GraphBuffer(GraphResource::new(1));
        let params = PassParameters::new()
            .texture(texture, Access::UAV_COMPUTE)
            .buffer(buffer, Access::INDIRECT_ARGS)
            .render_target(texture, LoadAction::Load);

        let kinds: Vec<_> = params.accesses().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParameterKind::TextureUav,
                ParameterKind::IndirectArgs,
                ParameterKind::RenderTarget
            ]
        );
        assert!(params.has_render_targets());
        assert!(!params.clears_attachments());
    }

    #[test]
    fn attachment_compatibility() {
        let a = GraphTexture(GraphResource::new(0));
        let b = GraphTexture(GraphResource::new(1));
        let first = PassParameters::new().render_target(a, LoadAction::Clear);
        let second = PassParameters::new().render_target(a, LoadAction::Load);
        let third = PassParameters::new().render_target(b, LoadAction::Load);
        assert!(first.same_attachments(&second));
        assert!(!second.same_attachments(&third));
        assert!(first.clears_attachments());
    }
}
