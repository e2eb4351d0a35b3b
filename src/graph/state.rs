use std::fmt::Display;

use bitflags::bitflags;
use smallvec::SmallVec;

use super::{GraphPassOption, NoBarrierTag};

bitflags! {
    /// How a subresource is accessed, the empty set is the unknown state of
    /// memory that nothing has touched yet.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const SRV_COMPUTE = 1 << 0;
        const SRV_GRAPHICS = 1 << 1;
        const UAV_COMPUTE = 1 << 2;
        const UAV_GRAPHICS = 1 << 3;
        const RTV = 1 << 4;
        const DSV_READ = 1 << 5;
        const DSV_WRITE = 1 << 6;
        const COPY_SRC = 1 << 7;
        const COPY_DST = 1 << 8;
        const VERTEX_OR_INDEX = 1 << 9;
        const INDIRECT_ARGS = 1 << 10;
        const PRESENT = 1 << 11;

        const SRV_MASK = Self::SRV_COMPUTE.bits() | Self::SRV_GRAPHICS.bits();
        const UAV_MASK = Self::UAV_COMPUTE.bits() | Self::UAV_GRAPHICS.bits();
        const WRITABLE_MASK = Self::UAV_MASK.bits() | Self::RTV.bits() | Self::DSV_WRITE.bits() | Self::COPY_DST.bits();
        const COMPUTE_STAGE_MASK = Self::SRV_COMPUTE.bits() | Self::UAV_COMPUTE.bits();
        const GRAPHICS_STAGE_MASK = Self::SRV_GRAPHICS.bits()
            | Self::UAV_GRAPHICS.bits()
            | Self::RTV.bits()
            | Self::DSV_READ.bits()
            | Self::DSV_WRITE.bits()
            | Self::VERTEX_OR_INDEX.bits();
        const COPY_MASK = Self::COPY_SRC.bits() | Self::COPY_DST.bits();
    }
}

impl Access {
    pub const UNKNOWN: Self = Self::empty();

    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }
    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRITABLE_MASK)
    }
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && !self.is_writable()
    }
    pub fn is_uav(self) -> bool {
        self.intersects(Self::UAV_MASK)
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "Unknown");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pipe {
    Graphics,
    AsyncCompute,
}

impl Pipe {
    pub fn other(self) -> Self {
        match self {
            Pipe::Graphics => Pipe::AsyncCompute,
            Pipe::AsyncCompute => Pipe::Graphics,
        }
    }
}

impl Display for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pipe::Graphics => write!(f, "Graphics"),
            Pipe::AsyncCompute => write!(f, "AsyncCompute"),
        }
    }
}

bitflags! {
    /// The set of pipes a read-only state is shared between.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Pipes: u8 {
        const GRAPHICS = 1 << 0;
        const ASYNC_COMPUTE = 1 << 1;
    }
}

impl Pipes {
    pub fn is_multiple(self) -> bool {
        self.bits().count_ones() > 1
    }
    pub fn iter_pipes(self) -> impl Iterator<Item = Pipe> {
        [Pipe::Graphics, Pipe::AsyncCompute]
            .into_iter()
            .filter(move |p| self.contains(Pipes::from(*p)))
    }
}

impl From<Pipe> for Pipes {
    fn from(pipe: Pipe) -> Self {
        match pipe {
            Pipe::Graphics => Pipes::GRAPHICS,
            Pipe::AsyncCompute => Pipes::ASYNC_COMPUTE,
        }
    }
}

/// What a single pass demands from one subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SubresourceDemand {
    pub(crate) access: Access,
    pub(crate) no_barrier: Option<NoBarrierTag>,
}

impl SubresourceDemand {
    /// Combines two parameters of the same pass touching one subresource.
    pub(crate) fn merge(self, other: Self) -> Option<Self> {
        if self.access == other.access {
            let no_barrier = if self.no_barrier == other.no_barrier {
                self.no_barrier
            } else {
                None
            };
            Some(Self {
                access: self.access,
                no_barrier,
            })
        } else if self.access.is_read_only() && other.access.is_read_only() {
            Some(Self {
                access: self.access | other.access,
                no_barrier: None,
            })
        } else {
            None
        }
    }
}

/// The merged demand of a pass on a whole resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ResourceDemand {
    Whole(SubresourceDemand),
    Split(Vec<Option<SubresourceDemand>>),
}

impl ResourceDemand {
    pub(crate) fn get(&self, subresource: u32) -> Option<SubresourceDemand> {
        match self {
            ResourceDemand::Whole(demand) => Some(*demand),
            ResourceDemand::Split(demands) => demands[subresource as usize],
        }
    }
    pub(crate) fn touched(&self, subresource_count: u32) -> u32 {
        match self {
            ResourceDemand::Whole(_) => subresource_count,
            ResourceDemand::Split(demands) => demands.iter().flatten().count() as u32,
        }
    }
    pub(crate) fn accesses(&self) -> Access {
        match self {
            ResourceDemand::Whole(demand) => demand.access,
            ResourceDemand::Split(demands) => demands
                .iter()
                .flatten()
                .fold(Access::empty(), |acc, d| acc | d.access),
        }
    }
    pub(crate) fn writes(&self) -> bool {
        self.accesses().is_writable()
    }
    /// Collapses per-subresource demands that ended up covering everything uniformly.
    pub(crate) fn try_coalesce(&mut self) {
        if let ResourceDemand::Split(demands) = self {
            let first = demands[0];
            if let Some(first) = first {
                if demands.iter().all(|d| *d == Some(first)) {
                    *self = ResourceDemand::Whole(first);
                }
            }
        }
    }
}

/// The last known state of a subresource during barrier scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SubresourceState {
    pub(crate) access: Access,
    pub(crate) pipes: Pipes,
    /// The last pass to touch the subresource, `NONE` before the first use.
    pub(crate) pass: GraphPassOption,
    pub(crate) no_barrier: Option<NoBarrierTag>,
    /// The transition that moved the subresource into this state, while it can still be widened
    /// to other pipes.
    pub(crate) transition: Option<u32>,
}

impl SubresourceState {
    pub(crate) const UNTOUCHED: Self = Self {
        access: Access::UNKNOWN,
        pipes: Pipes::empty(),
        pass: GraphPassOption::NONE,
        no_barrier: None,
        transition: None,
    };

    pub(crate) fn is_untouched(&self) -> bool {
        !self.pass.is_some()
    }

    /// Whether moving into `demand` on `pipe` needs a hardware transition.
    pub(crate) fn needs_transition(&self, demand: SubresourceDemand, pipe: Pipe) -> bool {
        if self.pipes != Pipes::from(pipe) || self.access != demand.access {
            return true;
        }
        if demand.access.is_uav() {
            // back to back uav work is a hazard unless both sides opted out with the same tag
            return !(self.no_barrier.is_some() && self.no_barrier == demand.no_barrier);
        }
        false
    }
}

/// Either one state for the whole resource or one state per subresource.
#[derive(Clone, Debug)]
pub(crate) enum SubresourceStates {
    Whole(SubresourceState),
    Split(SmallVec<[SubresourceState; 4]>),
}

impl SubresourceStates {
    pub(crate) fn get(&self, subresource: u32) -> &SubresourceState {
        match self {
            SubresourceStates::Whole(state) => state,
            SubresourceStates::Split(states) => &states[subresource as usize],
        }
    }
    pub(crate) fn get_mut(&mut self, subresource: u32) -> &mut SubresourceState {
        match self {
            SubresourceStates::Whole(state) => state,
            SubresourceStates::Split(states) => &mut states[subresource as usize],
        }
    }
    pub(crate) fn is_whole(&self) -> bool {
        matches!(self, SubresourceStates::Whole(_))
    }
    pub(crate) fn split(&mut self, count: u32) {
        if let SubresourceStates::Whole(state) = *self {
            *self = SubresourceStates::Split(SmallVec::from_elem(state, count as usize));
        }
    }
    /// Collapses back into one state when every subresource agrees, the widenable transition is
    /// only kept if they all share it.
    pub(crate) fn try_coalesce(&mut self) -> bool {
        if let SubresourceStates::Split(states) = self {
            let first = states[0];
            let agrees = |s: &SubresourceState| {
                SubresourceState {
                    transition: first.transition,
                    ..*s
                } == first
            };
            if states.iter().all(agrees) {
                let transition = if states.iter().all(|s| s.transition == first.transition) {
                    first.transition
                } else {
                    None
                };
                *self = SubresourceStates::Whole(SubresourceState { transition, ..first });
            }
        }
        self.is_whole()
    }
    /// The access of the whole resource, unknown if the subresources disagree.
    pub(crate) fn uniform_access(&self) -> Access {
        match self {
            SubresourceStates::Whole(state) => state.access,
            SubresourceStates::Split(states) => {
                let first = states[0].access;
                if states.iter().all(|s| s.access == first) {
                    first
                } else {
                    Access::UNKNOWN
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphPass;

    fn touched(access: Access, pipe: Pipe, tag: Option<NoBarrierTag>) -> SubresourceState {
        SubresourceState {
            access,
            pipes: pipe.into(),
            pass: GraphPass::new(1).into(),
            no_barrier: tag,
            transition: None,
        }
    }

    #[test]
    fn identical_reads_need_nothing() {
        let state = touched(Access::SRV_GRAPHICS, Pipe::Graphics, None);
        let demand = SubresourceDemand {
            access: Access::SRV_GRAPHICS,
            no_barrier: None,
        };
        assert!(!state.needs_transition(demand, Pipe::Graphics));
        assert!(state.needs_transition(demand, Pipe::AsyncCompute));
    }

    #[test]
    fn uav_hazard_and_tags() {
        let tag = NoBarrierTag::new(0);
        let other = NoBarrierTag::new(1);
        let state = touched(Access::UAV_COMPUTE, Pipe::Graphics, Some(tag));
        let demand = |tag| SubresourceDemand {
            access: Access::UAV_COMPUTE,
            no_barrier: tag,
        };
        assert!(!state.needs_transition(demand(Some(tag)), Pipe::Graphics));
        assert!(state.needs_transition(demand(Some(other)), Pipe::Graphics));
        assert!(state.needs_transition(demand(None), Pipe::Graphics));
    }

    #[test]
    fn demand_merging() {
        let srv = SubresourceDemand {
            access: Access::SRV_GRAPHICS,
            no_barrier: None,
        };
        let dsv = SubresourceDemand {
            access: Access::DSV_READ,
            no_barrier: None,
        };
        let rtv = SubresourceDemand {
            access: Access::RTV,
            no_barrier: None,
        };
        assert_eq!(
            srv.merge(dsv).map(|d| d.access),
            Some(Access::SRV_GRAPHICS | Access::DSV_READ)
        );
        assert_eq!(rtv.merge(rtv), Some(rtv));
        assert_eq!(rtv.merge(srv), None);
    }

    #[test]
    fn states_split_and_coalesce() {
        let base = touched(Access::SRV_COMPUTE, Pipe::Graphics, None);
        let mut states = SubresourceStates::Whole(base);
        states.split(3);
        assert!(!states.is_whole());
        states.get_mut(1).access = Access::UAV_COMPUTE;
        assert_eq!(states.uniform_access(), Access::UNKNOWN);
        assert!(!states.try_coalesce());
        states.get_mut(1).access = Access::SRV_COMPUTE;
        assert!(states.try_coalesce());
        assert_eq!(states.uniform_access(), Access::SRV_COMPUTE);
    }

    #[test]
    fn access_display() {
        assert_eq!(Access::UNKNOWN.to_string(), "Unknown");
        assert_eq!((Access::RTV | Access::COPY_SRC).to_string(), "RTV|COPY_SRC");
    }
}
