use std::ops::Range;

use fixedbitset::FixedBitSet;
use smallvec::SmallVec;

use super::{
    barriers::{BarrierBatch, BatchSite, StateTracker, Transition},
    descriptors::{BufferUsage, ResourceDesc, TextureUsage},
    error::ValidationWarning,
    parameters::PassFlags,
    record::{GraphBuilder, PassData},
    reverse_edges::{reverse_edges, ChildRelativeKey, ImmutableGraph, NodeGraph, NodeKey},
    state::{Access, Pipe},
    BatchId, FenceId, GraphObject, GraphPass, GraphResource,
};
use crate::tracing::shim_macros::{debug, trace};

/// What the executor does around one pass.
#[derive(Clone, Debug, Default)]
pub struct PassSchedule {
    pub pipe: Option<Pipe>,
    /// The latest pass on the other pipe this pass depends on.
    pub cross_pipeline_producer: Option<GraphPass>,
    /// The earliest pass on the other pipe depending on this pass.
    pub cross_pipeline_consumer: Option<GraphPass>,
    pub prologue_begin: SmallVec<[BatchId; 2]>,
    pub prologue_end: SmallVec<[BatchId; 2]>,
    pub epilogue_begin: SmallVec<[BatchId; 2]>,
    pub wait_fences: SmallVec<[FenceId; 1]>,
    pub signal_fences: SmallVec<[FenceId; 1]>,
    pub skip_render_pass_begin: bool,
    pub skip_render_pass_end: bool,
    pub async_run: Option<usize>,
    /// Transients first used by an async run forking from this pass, bound before the fork
    /// fence is signalled.
    pub acquire: SmallVec<[GraphResource; 4]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceInfo {
    pub id: FenceId,
    pub signal: (Pipe, GraphPass),
    pub wait: (Pipe, GraphPass),
}

/// A maximal run of consecutive retained async compute passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsyncRun {
    pub first: GraphPass,
    pub last: GraphPass,
    /// The graphics pass signalling the run to start.
    pub fork: GraphPass,
    /// The graphics pass waiting for the run to finish.
    pub join: GraphPass,
    pub fork_fence: FenceId,
    pub join_fence: FenceId,
}

/// The outcome of compiling a graph, kept on the builder for inspection after execution.
pub struct CompiledGraph {
    pub(crate) alive_passes: FixedBitSet,
    pub(crate) alive_resources: FixedBitSet,
    pub(crate) schedules: Vec<PassSchedule>,
    pub(crate) tracker: StateTracker,
    pub(crate) batches: Vec<BarrierBatch>,
    pub(crate) fences: Vec<FenceInfo>,
    pub(crate) async_runs: Vec<AsyncRun>,
    pub(crate) consumers: ImmutableGraph,
}

impl CompiledGraph {
    pub(crate) fn new(split: bool) -> Self {
        Self {
            alive_passes: FixedBitSet::new(),
            alive_resources: FixedBitSet::new(),
            schedules: Vec::new(),
            tracker: StateTracker::new(split),
            batches: Vec::new(),
            fences: Vec::new(),
            async_runs: Vec::new(),
            consumers: ImmutableGraph::new(),
        }
    }

    pub fn is_retained(&self, pass: GraphPass) -> bool {
        self.alive_passes.contains(pass.index())
    }
    pub fn is_culled(&self, pass: GraphPass) -> bool {
        !self.is_retained(pass)
    }
    pub fn retained_passes(&self) -> impl Iterator<Item = GraphPass> + '_ {
        self.alive_passes.ones().map(GraphPass::new)
    }
    pub fn is_resource_alive(&self, resource: impl Into<GraphResource>) -> bool {
        self.alive_resources.contains(resource.into().index())
    }

    pub fn schedule(&self, pass: GraphPass) -> &PassSchedule {
        &self.schedules[pass.index()]
    }
    pub fn cross_pipeline_producer(&self, pass: GraphPass) -> Option<GraphPass> {
        self.schedules[pass.index()].cross_pipeline_producer
    }
    pub fn cross_pipeline_consumer(&self, pass: GraphPass) -> Option<GraphPass> {
        self.schedules[pass.index()].cross_pipeline_consumer
    }

    pub fn async_run_of(&self, pass: GraphPass) -> Option<&AsyncRun> {
        let run = self.schedules.get(pass.index())?.async_run?;
        Some(&self.async_runs[run])
    }
    /// The graphics pass an async compute pass forks from.
    pub fn fork_pass(&self, pass: GraphPass) -> Option<GraphPass> {
        self.async_run_of(pass).map(|run| run.fork)
    }
    /// The graphics pass which joins on an async compute pass.
    pub fn join_pass(&self, pass: GraphPass) -> Option<GraphPass> {
        self.async_run_of(pass).map(|run| run.join)
    }
    /// The point after which work done by `pass` is visible to the graphics pipe.
    pub(crate) fn join_of(&self, pass: GraphPass) -> GraphPass {
        self.join_pass(pass).unwrap_or(pass)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.tracker.transitions
    }
    pub fn transitions_of(&self, resource: impl Into<GraphResource>) -> impl Iterator<Item = &Transition> {
        let resource = resource.into();
        self.tracker
            .transitions
            .iter()
            .filter(move |t| t.resource == resource)
    }
    pub fn batches(&self) -> &[BarrierBatch] {
        &self.batches
    }
    pub fn batch(&self, id: BatchId) -> &BarrierBatch {
        &self.batches[id.index()]
    }
    pub fn fences(&self) -> &[FenceInfo] {
        &self.fences
    }
    pub fn async_runs(&self) -> &[AsyncRun] {
        &self.async_runs
    }
    /// Passes which depend on `pass`, including culled ones.
    pub fn consumers(&self, pass: GraphPass) -> impl Iterator<Item = GraphPass> + '_ {
        self.consumers
            .get_children(pass.index() as u32)
            .iter()
            .map(|&p| GraphPass::new(p as usize))
    }

    /// The access the last retained pass left a resource in.
    pub(crate) fn final_access(&self, resource: GraphResource, acquired: Access) -> Access {
        self.tracker.last_access(resource).unwrap_or(acquired)
    }

    fn assign_batches(&mut self, batches: Vec<BarrierBatch>) {
        for batch in &batches {
            let begin = &mut self.schedules[batch.begin.index()];
            match batch.begin_site {
                BatchSite::Prologue => begin.prologue_begin.push(batch.id),
                BatchSite::Epilogue => begin.epilogue_begin.push(batch.id),
            }
            for &(_, end) in &batch.ends {
                self.schedules[end.index()].prologue_end.push(batch.id);
            }
        }
        self.batches.extend(batches);
    }
}

// the dependency graph with edges pointing from consumers to producers
struct PassEdges<'a, 'b>(&'a [GraphObject<PassData<'b>>]);
impl<'a, 'b> NodeGraph for PassEdges<'a, 'b> {
    fn node_count(&self) -> usize {
        self.0.len()
    }
    fn nodes(&self) -> Range<NodeKey> {
        0..self.0.len() as u32
    }
    fn children(&self, this: NodeKey) -> Range<ChildRelativeKey> {
        0..self.0[this as usize].dependencies.len() as u32
    }
    fn get_child(&self, this: NodeKey, child: ChildRelativeKey) -> NodeKey {
        self.0[this as usize].dependencies[child as usize].index() as u32
    }
}

/// Everything a pass could do with a resource that reads the previous contents.
const READ_MASK: Access = Access::all()
    .difference(Access::RTV)
    .difference(Access::DSV_WRITE)
    .difference(Access::COPY_DST);

impl<'a> GraphBuilder<'a> {
    /// Culls, resolves fork and join points, schedules barriers and merges render passes.
    pub(crate) fn compile(&mut self) -> CompiledGraph {
        let pass_count = self.passes.len();
        let epilogue = GraphPass::new(pass_count - 1);
        let mut compiled = CompiledGraph::new(true);

        compiled.alive_passes = self.cull();
        let alive = compiled.alive_passes.clone();

        // culled passes give back the references they took during declaration
        for (i, pass) in self.passes.iter().enumerate() {
            if alive.contains(i) || pass.synthetic {
                continue;
            }
            for (resource, demand) in &pass.demands {
                let data = &mut self.resources[resource.index()].inner;
                data.refcount -= demand.touched(data.layout.count());
            }
        }

        compiled.alive_resources = FixedBitSet::with_capacity(self.resources.len());
        for pass in alive.ones() {
            for (resource, _) in &self.passes[pass].demands {
                compiled.alive_resources.insert(resource.index());
            }
        }
        for (i, resource) in self.resources.iter().enumerate() {
            if resource.is_external() || resource.extracted {
                compiled.alive_resources.insert(i);
            }
        }

        self.emit_usage_warnings(&alive);

        compiled.consumers = self.consumer_graph();
        compiled.schedules = vec![PassSchedule::default(); pass_count];

        // cross pipe producers and consumers
        for pass in alive.ones() {
            let pipe = self.passes[pass].pipe;
            let other_pipe = |p: &GraphPass| alive.contains(p.index()) && self.passes[p.index()].pipe != pipe;

            let producer = self.passes[pass]
                .dependencies
                .iter()
                .map(|d| d.get_pass())
                .filter(other_pipe)
                .max();
            let consumer = compiled
                .consumers
                .get_children(pass as u32)
                .iter()
                .map(|&p| GraphPass::new(p as usize))
                .filter(other_pipe)
                .min();

            let schedule = &mut compiled.schedules[pass];
            schedule.pipe = Some(pipe);
            schedule.cross_pipeline_producer = producer;
            schedule.cross_pipeline_consumer = consumer;
        }

        self.resolve_async_runs(&mut compiled, epilogue);
        if !compiled.async_runs.is_empty() {
            self.hoist_async_acquires(&mut compiled);
        }

        compiled.tracker.sync_resources(&self.resources);
        for pass in alive.ones() {
            let data = &self.passes[pass];
            compiled
                .tracker
                .record_pass(GraphPass::new(pass), data.pipe, &data.demands);
        }
        let passes = &self.passes;
        let batches = compiled
            .tracker
            .build_batches(0, 0, |p| passes[p.index()].pipe);
        compiled.assign_batches(batches);

        if self.config.merge_compatible_render_passes {
            self.merge_render_passes(&mut compiled);
        }

        debug!(
            "Compiled {} passes, {} culled, {} transitions in {} batches, {} async runs",
            pass_count,
            pass_count - alive.count_ones(..),
            compiled.tracker.transitions.len(),
            compiled.batches.len(),
            compiled.async_runs.len()
        );
        for run in &compiled.async_runs {
            debug!(
                "Async run {}..={} forks from {} and joins at {}",
                self.pass_name(run.first),
                self.pass_name(run.last),
                self.pass_name(run.fork),
                self.pass_name(run.join)
            );
        }

        compiled
    }

    pub(crate) fn consumer_graph(&self) -> ImmutableGraph {
        reverse_edges(&PassEdges(&self.passes))
    }

    /// Marks every pass reachable over hard edges from the passes touching externally visible
    /// resources.
    fn cull(&self) -> FixedBitSet {
        let mut alive = FixedBitSet::with_capacity(self.passes.len());
        if !self.config.cull_unreferenced_passes {
            alive.insert_range(..);
            return alive;
        }

        let mut stack: Vec<GraphPass> = self
            .passes
            .iter()
            .enumerate()
            .filter(|(_, pass)| {
                pass.synthetic
                    || pass.flags.contains(PassFlags::NEVER_CULL)
                    || pass.demands.iter().any(|(r, _)| {
                        let resource = &self.resources[r.index()];
                        resource.is_external() || resource.extracted
                    })
            })
            .map(|(i, _)| GraphPass::new(i))
            .collect();

        while let Some(pass) = stack.pop() {
            if alive.put(pass.index()) {
                continue;
            }
            // only hard dependencies propagate aliveness
            for dependency in &self.passes[pass.index()].dependencies {
                if dependency.is_hard() && !alive.contains(dependency.index()) {
                    stack.push(dependency.get_pass());
                }
            }
        }

        for i in 0..self.passes.len() {
            if !alive.contains(i) {
                trace!("Culled {}", self.pass_name(GraphPass::new(i)));
            }
        }
        alive
    }

    fn resolve_async_runs(&self, compiled: &mut CompiledGraph, epilogue: GraphPass) {
        let mut runs: Vec<Range<usize>> = Vec::new();
        let mut current: Option<Range<usize>> = None;
        for pass in compiled.alive_passes.ones() {
            if self.passes[pass].pipe == Pipe::AsyncCompute {
                match &mut current {
                    Some(run) => run.end = pass + 1,
                    None => current = Some(pass..pass + 1),
                }
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        runs.extend(current);

        for run in runs {
            let members: SmallVec<[usize; 8]> = run
                .clone()
                .filter(|&p| compiled.alive_passes.contains(p))
                .collect();
            let (Some(&first), Some(&last)) = (members.first(), members.last()) else {
                continue;
            };

            let fork = members
                .iter()
                .filter_map(|&p| compiled.schedules[p].cross_pipeline_producer)
                .max()
                .unwrap_or(GraphPass::new(0));
            let join = members
                .iter()
                .filter_map(|&p| compiled.schedules[p].cross_pipeline_consumer)
                .min()
                .unwrap_or(epilogue);
            let (first, last) = (GraphPass::new(first), GraphPass::new(last));

            let fork_fence = FenceId::new(compiled.fences.len());
            compiled.fences.push(FenceInfo {
                id: fork_fence,
                signal: (Pipe::Graphics, fork),
                wait: (Pipe::AsyncCompute, first),
            });
            let join_fence = FenceId::new(compiled.fences.len());
            compiled.fences.push(FenceInfo {
                id: join_fence,
                signal: (Pipe::AsyncCompute, last),
                wait: (Pipe::Graphics, join),
            });

            compiled.schedules[fork.index()].signal_fences.push(fork_fence);
            compiled.schedules[first.index()].wait_fences.push(fork_fence);
            compiled.schedules[last.index()].signal_fences.push(join_fence);
            compiled.schedules[join.index()].wait_fences.push(join_fence);

            let index = compiled.async_runs.len();
            for &p in &members {
                compiled.schedules[p].async_run = Some(index);
            }
            compiled.async_runs.push(AsyncRun {
                first,
                last,
                fork,
                join,
                fork_fence,
                join_fence,
            });
        }
    }

    /// Moves the pool acquire of every transient whose first user is an async pass to the
    /// fork of that pass's run. Graphics passes between the fork and the run may still be
    /// executing while the run does, so memory they release must never reach it.
    fn hoist_async_acquires(&self, compiled: &mut CompiledGraph) {
        let mut seen = FixedBitSet::with_capacity(self.resources.len());
        for pass in compiled.alive_passes.ones() {
            let run = compiled.schedules[pass].async_run;
            for &(resource, _) in &self.passes[pass].demands {
                if seen.put(resource.index()) || self.resources[resource.index()].is_external() {
                    continue;
                }
                if let Some(run) = run {
                    let fork = compiled.async_runs[run].fork;
                    trace!(
                        "Binding {} at {} for async {}",
                        self.resource_name(resource),
                        self.pass_name(fork),
                        self.pass_name(GraphPass::new(pass))
                    );
                    compiled.schedules[fork.index()].acquire.push(resource);
                }
            }
        }
    }

    /// Folds consecutive raster passes with the same attachments into one render pass.
    fn merge_render_passes(&self, compiled: &mut CompiledGraph) {
        let mut previous: Option<usize> = None;
        for pass in compiled.alive_passes.ones() {
            let data = &self.passes[pass];
            if data.pipe == Pipe::AsyncCompute {
                continue;
            }
            if !data.is_raster() || data.flags.contains(PassFlags::SKIP_RENDER_PASS) {
                previous = None;
                continue;
            }

            if let Some(prev) = previous {
                let prev_data = &self.passes[prev];
                let prev_schedule = &compiled.schedules[prev];
                let schedule = &compiled.schedules[pass];
                let mergeable = prev_data.params.same_attachments(&data.params)
                    && !data.params.clears_attachments()
                    && !(prev_data.flags | data.flags).contains(PassFlags::NEVER_MERGE)
                    && prev_schedule.epilogue_begin.is_empty()
                    && prev_schedule.signal_fences.is_empty()
                    && schedule.prologue_begin.is_empty()
                    && schedule.prologue_end.is_empty()
                    && schedule.wait_fences.is_empty();

                if mergeable {
                    compiled.schedules[prev].skip_render_pass_end = true;
                    compiled.schedules[pass].skip_render_pass_begin = true;
                    trace!(
                        "Merged render passes of {} and {}",
                        self.pass_name(GraphPass::new(prev)),
                        self.pass_name(GraphPass::new(pass))
                    );
                }
            }
            previous = Some(pass);
        }
    }

    /// Reports outputs nobody reads and creation usages nobody uses.
    pub(crate) fn emit_usage_warnings(&mut self, alive: &FixedBitSet) {
        if !self.validate {
            return;
        }
        let mut warnings = Vec::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let handle = GraphResource::new(i);
            let mut accesses = Access::empty();
            let mut first_writer = None;
            let mut consumed = false;
            for pass in alive.ones() {
                let Some(demand) = self.passes[pass].demand(handle) else {
                    continue;
                };
                let access = demand.accesses();
                accesses |= access;
                if first_writer.is_none() && access.is_writable() {
                    first_writer = Some(pass);
                    continue;
                }
                if access.intersects(READ_MASK) {
                    consumed = true;
                }
            }

            if resource.is_external() || accesses.is_empty() {
                continue;
            }
            if first_writer.is_some() && !consumed && !resource.extracted {
                warnings.push(ValidationWarning::ProducedNeverConsumed {
                    resource: self.resource_name(handle),
                });
            }
            let unused = match &resource.desc {
                ResourceDesc::Texture(desc) => {
                    if desc.usage.contains(TextureUsage::UNORDERED_ACCESS) && !accesses.is_uav() {
                        Some("UNORDERED_ACCESS")
                    } else if desc.usage.contains(TextureUsage::RENDER_TARGET)
                        && !accesses.contains(Access::RTV)
                    {
                        Some("RENDER_TARGET")
                    } else {
                        None
                    }
                }
                ResourceDesc::Buffer(desc) => (desc.usage.contains(BufferUsage::UNORDERED_ACCESS)
                    && !accesses.is_uav())
                .then_some("UNORDERED_ACCESS"),
            };
            if let Some(flag) = unused {
                warnings.push(ValidationWarning::UnusedCreateFlag {
                    resource: self.resource_name(handle),
                    flag,
                });
            }
        }
        for warning in warnings {
            self.report_warning(warning);
        }
    }

    /// Schedules a single pass on top of everything executed so far.
    pub(crate) fn compile_immediate(&self, compiled: &mut CompiledGraph, pass: GraphPass) {
        let data = &self.passes[pass.index()];
        compiled.alive_passes.grow(self.passes.len());
        compiled.alive_passes.insert(pass.index());
        compiled.alive_resources.grow(self.resources.len());
        for (resource, _) in &data.demands {
            compiled.alive_resources.insert(resource.index());
        }
        for (i, resource) in self.resources.iter().enumerate() {
            if resource.is_external() || resource.extracted {
                compiled.alive_resources.insert(i);
            }
        }

        compiled
            .schedules
            .resize_with(self.passes.len(), PassSchedule::default);
        compiled.schedules[pass.index()].pipe = Some(data.pipe);

        let first_transition = compiled.tracker.transitions.len();
        compiled.tracker.sync_resources(&self.resources);
        compiled.tracker.record_pass(pass, data.pipe, &data.demands);
        let passes = &self.passes;
        let batches = compiled.tracker.build_batches(
            first_transition,
            compiled.batches.len(),
            |p| passes[p.index()].pipe,
        );
        compiled.assign_batches(batches);
    }
}
