use slice_group_by::GroupBy;
use smallvec::{smallvec, SmallVec};

use super::{
    descriptors::{SubresourceLayout, SubresourceRange},
    record::ResourceData,
    state::{
        Access, Pipe, Pipes, ResourceDemand, SubresourceDemand, SubresourceState,
        SubresourceStates,
    },
    BatchId, GraphObject, GraphPass, GraphResource,
};

/// Where in a pass a batch begins, ends always happen in a prologue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchSite {
    Prologue,
    Epilogue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Regular,
    /// The resource had no state yet, `before` is filled in with whatever the pool hands over.
    FirstUse,
    /// Two unordered access passes back to back.
    UavHazard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub resource: GraphResource,
    pub range: SubresourceRange,
    pub before: Access,
    pub after: Access,
    pub before_pipes: Pipes,
    pub after_pipes: Pipes,
    pub kind: TransitionKind,
    pub begin: GraphPass,
    pub begin_site: BatchSite,
    /// The first pass on each pipe that needs the new state.
    pub ends: SmallVec<[(Pipe, GraphPass); 2]>,
    pub batch: Option<BatchId>,
}

/// Transitions begun together and ended by the earliest consumer on each pipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierBatch {
    pub id: BatchId,
    pub begin: GraphPass,
    pub begin_site: BatchSite,
    pub begin_pipe: Pipe,
    pub ends: SmallVec<[(Pipe, GraphPass); 2]>,
    pub transitions: Vec<u32>,
}

impl BarrierBatch {
    /// Begun and ended at the same point.
    pub fn is_split(&self) -> bool {
        !(self.begin_site == BatchSite::Prologue && self.ends.as_slice() == [(self.begin_pipe, self.begin)])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Draft {
    Keep,
    /// Share the read-only state produced by an earlier transition with another pipe.
    Widen(u32),
    Transition {
        before: Access,
        before_pipes: Pipes,
        kind: TransitionKind,
        begin: GraphPass,
        site: BatchSite,
    },
}

/// Replays passes in order and records the transitions between the states they demand.
pub(crate) struct StateTracker {
    split: bool,
    states: Vec<SubresourceStates>,
    layouts: Vec<SubresourceLayout>,
    pub(crate) transitions: Vec<Transition>,
}

impl StateTracker {
    /// With `split` off every transition begins and ends in the prologue of the pass that needs it.
    pub(crate) fn new(split: bool) -> Self {
        Self {
            split,
            states: Vec::new(),
            layouts: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub(crate) fn add_resource(&mut self, layout: SubresourceLayout, initial: Option<Access>) {
        let state = match initial {
            Some(access) => SubresourceState {
                access,
                pipes: Pipes::GRAPHICS,
                pass: GraphPass::new(0).into(),
                no_barrier: None,
                transition: None,
            },
            None => SubresourceState::UNTOUCHED,
        };
        self.states.push(SubresourceStates::Whole(state));
        self.layouts.push(layout);
    }

    /// Starts tracking resources declared since the last call.
    pub(crate) fn sync_resources(&mut self, resources: &[GraphObject<ResourceData>]) {
        for resource in &resources[self.states.len()..] {
            let initial = resource.external.map(|e| e.access.initial);
            self.add_resource(resource.layout, initial);
        }
    }

    pub(crate) fn states(&self, resource: GraphResource) -> &SubresourceStates {
        &self.states[resource.index()]
    }
    /// The access a resource was left in, `None` if nothing ever touched it.
    pub(crate) fn last_access(&self, resource: GraphResource) -> Option<Access> {
        let states = self.states.get(resource.index())?;
        if states.is_whole() && states.get(0).is_untouched() {
            return None;
        }
        Some(states.uniform_access())
    }

    pub(crate) fn record_pass(
        &mut self,
        pass: GraphPass,
        pipe: Pipe,
        demands: &[(GraphResource, ResourceDemand)],
    ) {
        for (resource, demand) in demands {
            self.record_resource(pass, pipe, *resource, demand);
        }
    }

    fn record_resource(
        &mut self,
        pass: GraphPass,
        pipe: Pipe,
        resource: GraphResource,
        demand: &ResourceDemand,
    ) {
        let split = self.split;
        let layout = self.layouts[resource.index()];
        let count = layout.count();
        let Self {
            states,
            transitions,
            ..
        } = self;
        let states = &mut states[resource.index()];

        if let (ResourceDemand::Whole(demand), true) = (demand, states.is_whole()) {
            let state = states.get_mut(0);
            let draft = draft(split, state, *demand, pipe, pass);
            let range = SubresourceRange::whole(layout);
            let transition = open(transitions, draft, resource, range, *demand, pipe, pass);
            settle(state, draft, *demand, pipe, pass, transition);
            return;
        }

        states.split(count);
        let drafts: SmallVec<[(u32, SubresourceDemand, Draft); 16]> = (0..count)
            .filter_map(|sub| {
                let demand = demand.get(sub)?;
                Some((sub, demand, draft(split, states.get(sub), demand, pipe, pass)))
            })
            .collect();

        let uniform = drafts.len() == count as usize
            && drafts
                .iter()
                .all(|&(_, d, dr)| d == drafts[0].1 && dr == drafts[0].2);

        if uniform {
            let (_, demand, draft) = drafts[0];
            let range = SubresourceRange::whole(layout);
            let transition = open(transitions, draft, resource, range, demand, pipe, pass);
            for &(sub, ..) in &drafts {
                settle(states.get_mut(sub), draft, demand, pipe, pass, transition);
            }
        } else {
            // consecutive mips of one slice and plane with the same outcome share a transition
            for group in drafts.linear_group_by(|a, b| {
                a.0 + 1 == b.0 && a.0 / layout.mips == b.0 / layout.mips && a.1 == b.1 && a.2 == b.2
            }) {
                let (first, demand, draft) = group[0];
                let range = SubresourceRange {
                    mip_count: group.len() as u32,
                    ..layout.range_of(first)
                };
                let transition = open(transitions, draft, resource, range, demand, pipe, pass);
                for &(sub, ..) in group {
                    settle(states.get_mut(sub), draft, demand, pipe, pass, transition);
                }
            }
        }

        states.try_coalesce();
    }

    /// Groups transitions from `first_transition` on into batches by where they begin and which
    /// pipes they end on.
    pub(crate) fn build_batches(
        &mut self,
        first_transition: usize,
        first_batch: usize,
        pipe_of: impl Fn(GraphPass) -> Pipe,
    ) -> Vec<BarrierBatch> {
        let transitions = &self.transitions;
        let key = |t: u32| {
            let t = &transitions[t as usize];
            (t.begin, t.begin_site, t.after_pipes.bits())
        };
        let mut order: Vec<u32> = (first_transition as u32..transitions.len() as u32).collect();
        order.sort_by_key(|&t| key(t));

        let mut batches = Vec::new();
        for group in order.linear_group_by_key(|&t| key(t)) {
            let head = &transitions[group[0] as usize];
            let mut ends: SmallVec<[(Pipe, GraphPass); 2]> = SmallVec::new();
            for &t in group {
                for &(pipe, pass) in &transitions[t as usize].ends {
                    match ends.iter_mut().find(|(p, _)| *p == pipe) {
                        Some(end) => end.1 = end.1.min(pass),
                        None => ends.push((pipe, pass)),
                    }
                }
            }
            ends.sort();
            batches.push(BarrierBatch {
                id: BatchId::new(first_batch + batches.len()),
                begin: head.begin,
                begin_site: head.begin_site,
                begin_pipe: pipe_of(head.begin),
                ends,
                transitions: group.to_vec(),
            });
        }

        for batch in &batches {
            for &t in &batch.transitions {
                self.transitions[t as usize].batch = Some(batch.id);
            }
        }
        batches
    }
}

fn draft(
    split: bool,
    state: &SubresourceState,
    demand: SubresourceDemand,
    pipe: Pipe,
    pass: GraphPass,
) -> Draft {
    if state.is_untouched() {
        return Draft::Transition {
            before: Access::UNKNOWN,
            before_pipes: Pipes::empty(),
            kind: TransitionKind::FirstUse,
            begin: pass,
            site: BatchSite::Prologue,
        };
    }

    let same_read = state.access == demand.access && demand.access.is_read_only();
    if same_read && state.pipes.contains(pipe.into()) {
        return Draft::Keep;
    }
    if same_read && split {
        if let Some(transition) = state.transition {
            return Draft::Widen(transition);
        }
    }
    if !state.needs_transition(demand, pipe) {
        return Draft::Keep;
    }

    let kind = if state.access == demand.access && demand.access.is_uav() {
        TransitionKind::UavHazard
    } else {
        TransitionKind::Regular
    };
    // begin right after the previous owner finished so the transition overlaps unrelated work
    let (begin, site) = match state.pass.get() {
        Some(previous)
            if split
                && previous != pass
                && !state.pipes.is_multiple()
                && kind != TransitionKind::UavHazard =>
        {
            (previous, BatchSite::Epilogue)
        }
        _ => (pass, BatchSite::Prologue),
    };
    Draft::Transition {
        before: state.access,
        before_pipes: state.pipes,
        kind,
        begin,
        site,
    }
}

fn open(
    transitions: &mut Vec<Transition>,
    draft: Draft,
    resource: GraphResource,
    range: SubresourceRange,
    demand: SubresourceDemand,
    pipe: Pipe,
    pass: GraphPass,
) -> Option<u32> {
    match draft {
        Draft::Keep => None,
        Draft::Widen(index) => {
            let transition = &mut transitions[index as usize];
            transition.after_pipes |= Pipes::from(pipe);
            if !transition.ends.iter().any(|(p, _)| *p == pipe) {
                transition.ends.push((pipe, pass));
            }
            None
        }
        Draft::Transition {
            before,
            before_pipes,
            kind,
            begin,
            site,
        } => {
            let index = transitions.len() as u32;
            transitions.push(Transition {
                resource,
                range,
                before,
                after: demand.access,
                before_pipes,
                after_pipes: pipe.into(),
                kind,
                begin,
                begin_site: site,
                ends: smallvec![(pipe, pass)],
                batch: None,
            });
            Some(index)
        }
    }
}

fn settle(
    state: &mut SubresourceState,
    draft: Draft,
    demand: SubresourceDemand,
    pipe: Pipe,
    pass: GraphPass,
    transition: Option<u32>,
) {
    match draft {
        Draft::Keep => {
            state.pass = pass.into();
            state.no_barrier = demand.no_barrier;
        }
        Draft::Widen(_) => {
            state.pipes |= Pipes::from(pipe);
            state.pass = pass.into();
        }
        Draft::Transition { .. } => {
            *state = SubresourceState {
                access: demand.access,
                pipes: pipe.into(),
                pass: pass.into(),
                no_barrier: demand.no_barrier,
                transition,
            };
        }
    }
}
