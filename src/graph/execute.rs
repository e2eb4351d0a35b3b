use std::{
    borrow::Cow,
    ops::{Deref, DerefMut},
};

use smallvec::SmallVec;

use super::{
    barriers::TransitionKind,
    compile::CompiledGraph,
    error::ValidationError,
    parameters::{PassFlags, PassParameters},
    record::{ExtractedResource, GraphBuilder, PassData, ResourceData},
    sink::{CommandSink, RenderPassInfo, TransitionInfo},
    state::{Pipe, ResourceDemand, SubresourceDemand},
    BatchId, GraphBuffer, GraphObject, GraphPass, GraphResource, GraphTexture,
};
use crate::{
    pool::PooledResource,
    tracing::shim_macros::{debug, error, trace},
};

pub(crate) enum PassCallback<'a> {
    Graphics(Box<dyn FnOnce(&mut GraphicsCommandList<'_>) + 'a>),
    Compute(Box<dyn FnOnce(&mut ComputeCommandList<'_>) + 'a>),
    Empty,
}

/// The work a non-raster pass records, run once while the graph executes.
///
/// Only compute capable callbacks can be wrapped here, RASTER passes take their
/// `GraphicsCommandList` callback through [`GraphBuilder::add_raster_pass`].
pub struct PassBody<'a>(Option<Box<dyn FnOnce(&mut ComputeCommandList<'_>) + 'a>>);

impl<'a> PassBody<'a> {
    pub fn compute(fun: impl FnOnce(&mut ComputeCommandList<'_>) + 'a) -> Self {
        Self(Some(Box::new(fun)))
    }
    pub fn empty() -> Self {
        Self(None)
    }
    pub(crate) fn into_callback(self) -> PassCallback<'a> {
        match self.0 {
            Some(fun) => PassCallback::Compute(fun),
            None => PassCallback::Empty,
        }
    }
}

/// Commands valid on either pipe.
pub struct ComputeCommandList<'b> {
    sink: &'b mut dyn CommandSink,
    resources: &'b [GraphObject<ResourceData>],
    pass: GraphPass,
    pass_name: &'b str,
    pipe: Pipe,
    validate: bool,
}

impl<'b> ComputeCommandList<'b> {
    pub fn pass(&self) -> GraphPass {
        self.pass
    }
    pub fn pipe(&self) -> Pipe {
        self.pipe
    }
    /// The allocation backing a texture, bound for every texture the pass declared.
    pub fn texture(&self, texture: GraphTexture) -> Option<PooledResource> {
        self.resources[texture.index()].backing
    }
    pub fn buffer(&self, buffer: GraphBuffer) -> Option<PooledResource> {
        self.resources[buffer.index()].backing
    }
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.sink.dispatch(self.pipe, [x, y, z]);
    }
    pub fn copy_buffer(&mut self, src: GraphBuffer, dst: GraphBuffer) {
        self.copy(src.resource(), dst.resource());
    }
    pub fn copy_texture(&mut self, src: GraphTexture, dst: GraphTexture) {
        self.copy(src.resource(), dst.resource());
    }
    fn copy(&mut self, src: GraphResource, dst: GraphResource) {
        let from = self.resources[src.index()].backing;
        let to = self.resources[dst.index()].backing;
        if let (Some(from), Some(to)) = (from, to) {
            self.sink.copy(self.pipe, from, to);
            return;
        }
        let unbound = if from.is_none() { src } else { dst };
        let resource = self.resources[unbound.index()].display(unbound.index());
        let error = ValidationError::UnboundResource {
            pass: Cow::Owned(self.pass_name.to_owned()),
            resource: Cow::Owned(resource.set_prefix("resource #").to_string()),
        };
        error!("{error}, the copy is dropped");
        if self.validate {
            panic!("{error}");
        }
    }
    /// Direct access for commands the graph does not know about.
    pub fn sink(&mut self) -> &mut dyn CommandSink {
        &mut *self.sink
    }
}

/// Commands valid inside a render pass, everything a compute list can do included.
pub struct GraphicsCommandList<'b> {
    inner: ComputeCommandList<'b>,
}

impl<'b> GraphicsCommandList<'b> {
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.inner.sink.draw(vertex_count, instance_count);
    }
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.inner.sink.draw_indexed(index_count, instance_count);
    }
}

impl<'b> Deref for GraphicsCommandList<'b> {
    type Target = ComputeCommandList<'b>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'b> DerefMut for GraphicsCommandList<'b> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'a> GraphBuilder<'a> {
    /// Compiles and runs every retained pass, then hands extracted resources over and returns
    /// the rest to the allocator.
    pub fn execute(&mut self) {
        if self.executed {
            panic!("{}", ValidationError::DoubleExecute);
        }
        let epilogue = self.push_epilogue();

        if self.config.force_immediate_execution {
            self.execute_immediate(epilogue);
            let mut compiled = self
                .compiled
                .take()
                .unwrap_or_else(|| CompiledGraph::new(false));
            compiled.consumers = self.consumer_graph();
            let alive = compiled.alive_passes.clone();
            self.emit_usage_warnings(&alive);
            self.finish(&compiled);
            self.compiled = Some(compiled);
        } else {
            let compiled = self.compile();
            if self.config.extend_resource_lifetimes {
                for resource in compiled.alive_resources.ones() {
                    self.ensure_backing(GraphResource::new(resource));
                }
            }

            let mut pending = Vec::new();
            let retained: Vec<GraphPass> = compiled.retained_passes().collect();
            for pass in retained {
                self.execute_pass(&compiled, pass, &mut pending);
            }
            debug_assert!(pending.is_empty());

            self.finish(&compiled);
            self.compiled = Some(compiled);
        }
        self.executed = true;
    }

    /// Appends the pass which moves external resources into their final access and keeps
    /// extracted resources alive.
    fn push_epilogue(&mut self) -> GraphPass {
        let demands = self
            .resources
            .iter()
            .enumerate()
            .filter_map(|(i, resource)| {
                let access = resource.external?.access.final_access?;
                let demand = SubresourceDemand {
                    access,
                    no_barrier: None,
                };
                Some((GraphResource::new(i), ResourceDemand::Whole(demand)))
            })
            .collect();
        let data = PassData {
            flags: PassFlags::NEVER_CULL,
            pipe: Pipe::Graphics,
            params: PassParameters::new(),
            demands,
            dependencies: Vec::new(),
            body: None,
            synthetic: true,
        };
        let epilogue = self.push_pass(Some(Cow::Borrowed("epilogue")), data);

        let outputs: SmallVec<[GraphResource; 8]> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_external() || r.extracted)
            .map(|(i, _)| GraphResource::new(i))
            .collect();
        for resource in outputs {
            self.depend_on_producer(epilogue, resource);
        }
        epilogue
    }

    /// Runs a pass as soon as it is declared.
    pub(crate) fn execute_immediate(&mut self, pass: GraphPass) {
        let mut compiled = self
            .compiled
            .take()
            .unwrap_or_else(|| CompiledGraph::new(false));
        self.compile_immediate(&mut compiled, pass);
        let mut pending = Vec::new();
        self.execute_pass(&compiled, pass, &mut pending);
        self.compiled = Some(compiled);
    }

    fn execute_pass(
        &mut self,
        compiled: &CompiledGraph,
        pass: GraphPass,
        pending: &mut Vec<(GraphPass, GraphResource)>,
    ) {
        let data = &self.passes[pass.index()];
        let (pipe, flags, synthetic) = (data.pipe, data.flags, data.synthetic);
        let touched: SmallVec<[(GraphResource, u32); 8]> = data
            .demands
            .iter()
            .map(|(r, d)| (*r, d.touched(self.resources[r.index()].layout.count())))
            .collect();
        let schedule = compiled.schedule(pass);

        let name = self.pass_name(pass);
        trace!("Executing {} on {}", name, pipe);
        self.sink.push_event(pipe, &name);

        for &fence in &schedule.wait_fences {
            self.sink.wait_fence(pipe, fence);
        }

        for &resource in &schedule.acquire {
            self.ensure_backing(resource);
        }
        for &(resource, _) in &touched {
            self.ensure_backing(resource);
        }
        if synthetic && pass.index() != 0 {
            for i in 0..self.resources.len() {
                if self.resources[i].extracted {
                    self.ensure_backing(GraphResource::new(i));
                }
            }
        }

        for &batch in &schedule.prologue_begin {
            self.submit_batch(compiled, batch, pipe, true);
        }
        for &batch in &schedule.prologue_end {
            self.submit_batch(compiled, batch, pipe, false);
        }

        let render_pass =
            flags.contains(PassFlags::RASTER) && !flags.contains(PassFlags::SKIP_RENDER_PASS);
        if render_pass && !schedule.skip_render_pass_begin {
            let info = self.render_pass_info(pass);
            self.sink.begin_render_pass(&info);
        }

        if let Some(body) = self.passes[pass.index()].body.take() {
            let mut list = ComputeCommandList {
                sink: &mut *self.sink,
                resources: &self.resources,
                pass,
                pass_name: &name,
                pipe,
                validate: self.validate,
            };
            match body {
                PassCallback::Graphics(fun) => fun(&mut GraphicsCommandList { inner: list }),
                PassCallback::Compute(fun) => fun(&mut list),
                PassCallback::Empty => {}
            }
        }

        if render_pass && !schedule.skip_render_pass_end {
            self.sink.end_render_pass(pass);
        }

        for &batch in &schedule.epilogue_begin {
            self.submit_batch(compiled, batch, pipe, true);
        }
        for &fence in &schedule.signal_fences {
            self.sink.signal_fence(pipe, fence);
        }

        if !synthetic {
            for (resource, count) in touched {
                let data = &mut self.resources[resource.index()].inner;
                data.refcount = data.refcount.saturating_sub(count);
                if data.refcount > 0 || self.holds_to_end(resource) {
                    continue;
                }
                // the other pipe may still be using it until the join
                if pipe == Pipe::AsyncCompute {
                    pending.push((compiled.join_of(pass), resource));
                } else {
                    self.release(compiled, resource);
                }
            }
        }

        let ready: SmallVec<[GraphResource; 4]> = pending
            .iter()
            .filter(|(join, _)| *join == pass)
            .map(|(_, r)| *r)
            .collect();
        pending.retain(|(join, _)| *join != pass);
        for resource in ready {
            self.release(compiled, resource);
        }

        self.sink.pop_event(pipe);
    }

    fn submit_batch(&mut self, compiled: &CompiledGraph, id: BatchId, pipe: Pipe, begin: bool) {
        let batch = compiled.batch(id);
        let transitions: SmallVec<[TransitionInfo; 8]> = batch
            .transitions
            .iter()
            .filter_map(|&t| {
                let t = &compiled.transitions()[t as usize];
                let resource = &self.resources[t.resource.index()];
                let before = match t.kind {
                    TransitionKind::FirstUse => resource.acquired_access,
                    _ => t.before,
                };
                // a reused allocation may already be in the right state
                if t.kind == TransitionKind::FirstUse && before == t.after && !t.after.is_uav() {
                    return None;
                }
                Some(TransitionInfo {
                    resource: t.resource,
                    backing: resource.backing,
                    range: t.range,
                    before,
                    after: t.after,
                    before_pipes: t.before_pipes,
                    after_pipes: t.after_pipes,
                })
            })
            .collect();

        if transitions.is_empty() {
            return;
        }
        if begin {
            self.sink.begin_transitions(pipe, id, &transitions);
        } else {
            self.sink.end_transitions(pipe, id, &transitions);
        }
    }

    fn render_pass_info(&self, pass: GraphPass) -> RenderPassInfo {
        let params = &self.passes[pass.index()].params;
        RenderPassInfo {
            pass,
            render_targets: params
                .render_targets()
                .iter()
                .map(|rt| (*rt, self.resources[rt.texture.index()].backing))
                .collect(),
            depth_stencil: params
                .depth_stencil_binding()
                .map(|ds| (*ds, self.resources[ds.texture.index()].backing)),
        }
    }

    /// Binds a pooled allocation on first use.
    fn ensure_backing(&mut self, resource: GraphResource) {
        let data = &self.resources[resource.index()];
        if data.backing.is_some() {
            return;
        }
        let acquired = self.allocator.acquire(&data.desc);
        let data = &mut self.resources[resource.index()].inner;
        data.backing = Some(acquired.resource);
        data.acquired_access = acquired.initial_access;
        trace!(
            "Bound {} to pooled allocation #{}",
            self.resource_name(resource),
            acquired.resource.index()
        );
    }

    fn release(&mut self, compiled: &CompiledGraph, resource: GraphResource) {
        let data = &mut self.resources[resource.index()].inner;
        let Some(backing) = data.backing.take() else {
            return;
        };
        let access = compiled.final_access(resource, data.acquired_access);
        self.allocator.release(backing, access);
        trace!("Released {} in {}", self.resource_name(resource), access);
    }

    /// Hands extracted resources to the caller and returns every other allocation.
    fn finish(&mut self, compiled: &CompiledGraph) {
        let mut released = 0;
        for i in 0..self.resources.len() {
            let resource = GraphResource::new(i);
            let data = &self.resources[i];
            if data.is_external() {
                continue;
            }
            if data.extracted {
                if let Some(backing) = data.backing {
                    let access = compiled.final_access(resource, data.acquired_access);
                    self.resources[i].extraction = Some(ExtractedResource {
                        resource: backing,
                        access,
                    });
                }
                continue;
            }
            if data.backing.is_some() {
                self.release(compiled, resource);
                released += 1;
            }
        }
        debug!("Graph finished, {} allocations returned at the end", released);
    }
}
