pub mod barriers;
pub mod compile;
pub mod config;
pub mod descriptors;
pub mod dot_writer;
pub mod dump;
pub mod error;
pub mod execute;
pub mod parameters;
pub mod record;
pub mod reverse_edges;
pub mod sink;
pub mod state;

#[cfg(test)]
mod tests;

use std::{
    borrow::Cow,
    fmt::Display,
    ops::{Deref, DerefMut},
};

use crate::arena::uint::{Config, OptionalU32, PackedUint};

pub use self::{
    compile::CompiledGraph,
    config::GraphConfig,
    descriptors::{
        BufferDesc, BufferUsage, Format, ResourceDesc, ResourceFlags, SubresourceLayout,
        SubresourceRange, TextureDesc, TextureDimension, TextureUsage, TextureView,
    },
    error::{ValidationError, ValidationWarning},
    execute::{ComputeCommandList, GraphicsCommandList, PassBody},
    parameters::{
        DepthStencilAccess, DepthStencilBinding, LoadAction, ParameterEntry, ParameterKind,
        PassFlags, PassParameters, RenderTargetBinding,
    },
    record::{ExternalAccess, ExtractedResource, GraphBuilder},
    sink::{CommandSink, RecordingSink, RenderPassInfo, SinkCommand, TransitionInfo},
    state::{Access, Pipe, Pipes},
};

macro_rules! simple_handle {
    ($($(#[$meta:meta])* $visibility:vis $name:ident),+) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            $visibility struct $name(u32);
            impl $name {
                pub(crate) fn new(index: usize) -> Self {
                    assert!(index < u32::MAX as usize);
                    Self(index as u32)
                }
                #[inline]
                pub fn index(&self) -> usize {
                    self.0 as usize
                }
            }
        )+
    };
}

pub(crate) use simple_handle;

simple_handle! {
    /// A pass, its index is the position in declaration order.
    pub GraphPass,
    /// Any resource tracked by the graph, textures and buffers share one index space.
    pub GraphResource,
    pub GraphUniformBuffer,
    /// Identifies a batch of transitions across its begin and end submissions.
    pub BatchId,
    /// A cross-pipe fence, one is created per fork and per join.
    pub FenceId,
    /// Passes accessing the same UAV with the same tag skip the hazard barrier between them.
    pub NoBarrierTag
}

macro_rules! typed_resource {
    ($($(#[$meta:meta])* $name:ident),+) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            pub struct $name(GraphResource);
            impl $name {
                #[inline]
                pub fn resource(&self) -> GraphResource {
                    self.0
                }
                #[inline]
                pub fn index(&self) -> usize {
                    self.0.index()
                }
            }
            impl From<$name> for GraphResource {
                fn from(value: $name) -> Self {
                    value.0
                }
            }
        )+
    };
}

typed_resource! { GraphTexture, GraphBuffer }

macro_rules! optional_index {
    ($($name:ident: $handle:ident),+) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
            pub(crate) struct $name(OptionalU32);
            impl $name {
                pub(crate) const NONE: Self = Self(OptionalU32::NONE);
                pub(crate) fn new(handle: Option<$handle>) -> Self {
                    Self(OptionalU32::new(handle.map(|h| h.0)))
                }
                pub(crate) fn get(&self) -> Option<$handle> {
                    self.0.get().map($handle)
                }
                pub(crate) fn is_some(&self) -> bool {
                    self.0.is_some()
                }
            }
            impl From<$handle> for $name {
                fn from(value: $handle) -> Self {
                    Self::new(Some(value))
                }
            }
        )+
    };
}

optional_index! { GraphPassOption: GraphPass }

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassDependencyConfig;
impl Config for PassDependencyConfig {
    const FIRST_BITS: usize = 31;
    const SECOND_BITS: usize = 1;
}

// dependencies can be "hard" and "soft"
//   hard means it guards a Read After Write or Write After Write
//   soft means it guards a Write After Read, or a read on the other pipe
// soft dependencies only order passes, they do not propagate "pass is alive" status
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassDependency(PackedUint<PassDependencyConfig, u32>);

impl PassDependency {
    pub(crate) fn new(pass: GraphPass, hard: bool) -> Self {
        Self(PackedUint::new(pass.0, hard as u32))
    }
    pub(crate) fn is_hard(&self) -> bool {
        self.0.second() == 1
    }
    pub(crate) fn set_hard(&self, hard: bool) -> Self {
        Self::new(self.get_pass(), hard)
    }
    pub(crate) fn get_pass(&self) -> GraphPass {
        GraphPass(self.0.first())
    }
    pub(crate) fn index(&self) -> usize {
        self.get_pass().index()
    }
}

impl std::fmt::Debug for PassDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_hard() { "hard" } else { "soft" };
        write!(f, "{}({})", kind, self.index())
    }
}

pub(crate) struct GraphObject<T> {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) inner: T,
}

impl<T> GraphObject<T> {
    pub(crate) fn new(name: Option<Cow<'static, str>>, inner: T) -> Self {
        Self { name, inner }
    }
    pub(crate) fn display(&self, index: usize) -> GraphObjectDisplay<'_> {
        GraphObjectDisplay {
            name: &self.name,
            index,
            prefix: "#",
        }
    }
}

impl<T> Deref for GraphObject<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for GraphObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

pub(crate) struct GraphObjectDisplay<'a> {
    name: &'a Option<Cow<'static, str>>,
    index: usize,
    prefix: &'a str,
}

impl<'a> GraphObjectDisplay<'a> {
    pub(crate) fn set_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }
}

impl<'a> Display for GraphObjectDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name {
            write!(f, "{}", name.as_ref())
        } else {
            write!(f, "{}{}", self.prefix, self.index)
        }
    }
}

/// Something that optionally carries a debug name, `(value, "name")` attaches one.
pub trait Named<T>: Sized {
    fn decompose(self) -> (T, Option<Cow<'static, str>>);
}
impl<T> Named<T> for T {
    fn decompose(self) -> (T, Option<Cow<'static, str>>) {
        (self, None)
    }
}
impl<T> Named<T> for (T, &'static str) {
    fn decompose(self) -> (T, Option<Cow<'static, str>>) {
        (self.0, Some(Cow::Borrowed(self.1)))
    }
}
impl<T> Named<T> for (T, String) {
    fn decompose(self) -> (T, Option<Cow<'static, str>>) {
        (self.0, Some(Cow::Owned(self.1)))
    }
}
