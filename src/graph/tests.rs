use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use super::{
    barriers::{BatchSite, Transition, TransitionKind},
    *,
};
use crate::pool::{
    AcquiredResource, NullBackingAllocator, PooledResource, ResourceAllocator, ResourcePool,
};

fn buffer_desc(usage: BufferUsage) -> BufferDesc {
    BufferDesc::new(4, 64, usage)
}

fn texture_desc(usage: TextureUsage) -> TextureDesc {
    TextureDesc::new_2d(Format::R8G8B8A8Unorm, 64, 64, usage)
}

fn rw_buffer() -> BufferDesc {
    buffer_desc(BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE)
}

fn rw_texture() -> TextureDesc {
    texture_desc(TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE)
}

fn new_pool() -> ResourcePool<NullBackingAllocator> {
    ResourcePool::new(NullBackingAllocator::default())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Pass(String),
    Release(usize),
}

type EventLog = Rc<RefCell<Vec<Event>>>;

struct LoggingAllocator {
    pool: ResourcePool<NullBackingAllocator>,
    log: EventLog,
}

impl ResourceAllocator for LoggingAllocator {
    fn acquire(&mut self, desc: &ResourceDesc) -> AcquiredResource {
        self.pool.acquire(desc)
    }
    fn release(&mut self, resource: PooledResource, final_access: Access) {
        self.log.borrow_mut().push(Event::Release(resource.index()));
        self.pool.release(resource, final_access);
    }
    fn descriptor(&self, resource: PooledResource) -> Option<ResourceDesc> {
        self.pool.descriptor(resource)
    }
    fn tick(&mut self) {
        self.pool.tick();
    }
}

struct LoggingSink {
    inner: RecordingSink,
    log: EventLog,
}

impl CommandSink for LoggingSink {
    fn begin_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]) {
        self.inner.begin_transitions(pipe, batch, transitions);
    }
    fn end_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]) {
        self.inner.end_transitions(pipe, batch, transitions);
    }
    fn begin_render_pass(&mut self, info: &RenderPassInfo) {
        self.inner.begin_render_pass(info);
    }
    fn end_render_pass(&mut self, pass: GraphPass) {
        self.inner.end_render_pass(pass);
    }
    fn signal_fence(&mut self, pipe: Pipe, fence: FenceId) {
        self.inner.signal_fence(pipe, fence);
    }
    fn wait_fence(&mut self, pipe: Pipe, fence: FenceId) {
        self.inner.wait_fence(pipe, fence);
    }
    fn dispatch(&mut self, pipe: Pipe, groups: [u32; 3]) {
        self.inner.dispatch(pipe, groups);
    }
    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.inner.draw(vertex_count, instance_count);
    }
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.inner.draw_indexed(index_count, instance_count);
    }
    fn copy(&mut self, pipe: Pipe, src: PooledResource, dst: PooledResource) {
        self.inner.copy(pipe, src, dst);
    }
    fn push_event(&mut self, pipe: Pipe, name: &str) {
        self.log.borrow_mut().push(Event::Pass(name.to_owned()));
        self.inner.push_event(pipe, name);
    }
    fn pop_event(&mut self, pipe: Pipe) {
        self.inner.pop_event(pipe);
    }
}

#[test]
fn test_render_then_sample() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let scene = graph.create_texture((
        texture_desc(TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE),
        "scene",
    ));
    let draw = graph.add_raster_pass(
        "draw",
        PassParameters::new().render_target(scene, LoadAction::Clear),
        PassFlags::empty(),
        |list| list.draw(3, 1),
    );
    let blur = graph.add_pass(
        "blur",
        PassParameters::new().texture(scene, Access::SRV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::compute(|list| list.dispatch(8, 8, 1)),
    );
    graph.queue_texture_extraction(scene);
    assert_eq!(graph.resource_refcount(scene), 2);

    graph.execute();
    assert_eq!(graph.resource_refcount(scene), 0);

    let compiled = graph.compiled().unwrap();
    assert!(compiled.is_retained(draw));
    assert!(compiled.is_retained(blur));

    let transitions: Vec<&Transition> = compiled.transitions_of(scene).collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].kind, TransitionKind::FirstUse);
    assert_eq!(transitions[0].before, Access::UNKNOWN);
    assert_eq!(transitions[0].after, Access::RTV);
    assert_eq!(transitions[1].before, Access::RTV);
    assert_eq!(transitions[1].after, Access::SRV_COMPUTE);
    assert_eq!(transitions[1].begin, draw);
    assert_eq!(transitions[1].begin_site, BatchSite::Epilogue);
    assert_eq!(transitions[1].ends.as_slice(), &[(Pipe::Graphics, blur)]);

    let extracted = graph.extracted_texture(scene).unwrap();
    assert_eq!(extracted.access, Access::SRV_COMPUTE);
    drop(graph);

    assert_eq!(pool.refs(extracted.resource), 1);
    assert_eq!(sink.count(|c| matches!(c, SinkCommand::Draw { .. })), 1);
    assert_eq!(
        sink.count(|c| matches!(c, SinkCommand::Dispatch(Pipe::Graphics, [8, 8, 1]))),
        1
    );
}

#[test]
fn test_unreferenced_pass_is_culled() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let ran = Cell::new(false);
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let scratch = graph.create_buffer((rw_buffer(), "scratch"));
    let pass = graph.add_pass(
        "scratch writer",
        PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::compute(|_| ran.set(true)),
    );
    graph.execute();

    let compiled = graph.compiled().unwrap();
    assert!(compiled.is_culled(pass));
    assert!(!compiled.is_resource_alive(scratch));
    assert_eq!(compiled.transitions_of(scratch).count(), 0);
    assert_eq!(graph.resource_refcount(scratch), 0);
    drop(graph);

    assert!(!ran.get());
    assert_eq!(pool.allocated_count(), 0);
}

#[test]
fn test_culling_can_be_disabled() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let config = GraphConfig {
        cull_unreferenced_passes: false,
        ..GraphConfig::default()
    };
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, config);

    let scratch = graph.create_buffer(rw_buffer());
    let pass = graph.add_pass(
        "scratch writer",
        PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    graph.execute();
    assert!(graph.compiled().unwrap().is_retained(pass));
    drop(graph);

    // acquired for the pass and returned right after it
    assert_eq!(pool.allocated_count(), 1);
    assert_eq!(pool.free_count(), 1);
}

#[test]
fn test_soft_edges_do_not_retain() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let buffer = graph.create_buffer((rw_buffer(), "counters"));
    let first = graph.add_pass(
        "clear",
        PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    let reader = graph.add_pass(
        "inspect",
        PassParameters::new().buffer(buffer, Access::SRV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    let second = graph.add_pass(
        "accumulate",
        PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );

    let dependencies: Vec<_> = graph.dependencies(second).collect();
    assert_eq!(dependencies, vec![(first, true), (reader, false)]);

    graph.execute();
    let compiled = graph.compiled().unwrap();
    assert!(compiled.is_retained(first));
    assert!(compiled.is_culled(reader));
    assert!(compiled.is_retained(second));
}

#[test]
fn test_async_compute_fork_and_join() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let field = graph.create_texture((rw_texture(), "field"));
    let result = graph.create_buffer((rw_buffer(), "result"));
    let produce = graph.add_pass(
        "G1",
        PassParameters::new().texture(field, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    let reduce = graph.add_pass(
        "C1",
        PassParameters::new()
            .texture(field, Access::SRV_COMPUTE)
            .buffer(result, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE,
        PassBody::compute(|list| {
            assert_eq!(list.pipe(), Pipe::AsyncCompute);
            list.dispatch(1, 1, 1);
        }),
    );
    let consume = graph.add_pass(
        "G2",
        PassParameters::new().buffer(result, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    assert_eq!(graph.pass_pipe(reduce), Pipe::AsyncCompute);

    for pass in 0..graph.pass_count() {
        let pass = GraphPass::new(pass);
        assert!(graph.dependencies(pass).all(|(dep, _)| dep < pass));
    }

    graph.execute();
    let compiled = graph.compiled().unwrap();
    assert_eq!(compiled.cross_pipeline_producer(reduce), Some(produce));
    assert_eq!(compiled.cross_pipeline_consumer(produce), Some(reduce));
    assert_eq!(compiled.cross_pipeline_producer(consume), Some(reduce));
    assert_eq!(compiled.fork_pass(reduce), Some(produce));
    assert_eq!(compiled.join_pass(reduce), Some(consume));
    assert!(compiled.consumers(produce).any(|p| p == reduce));

    let fences = compiled.fences().to_vec();
    assert_eq!(fences.len(), 2);
    assert_eq!(fences[0].signal, (Pipe::Graphics, produce));
    assert_eq!(fences[0].wait, (Pipe::AsyncCompute, reduce));
    assert_eq!(fences[1].signal, (Pipe::AsyncCompute, reduce));
    assert_eq!(fences[1].wait, (Pipe::Graphics, consume));
    let (fork, join) = (fences[0].id, fences[1].id);
    drop(graph);

    let produce_at = sink.event_position("G1").unwrap();
    let reduce_at = sink.event_position("C1").unwrap();
    let consume_at = sink.event_position("G2").unwrap();
    let fork_signal = sink
        .position(|c| *c == SinkCommand::SignalFence(Pipe::Graphics, fork))
        .unwrap();
    let fork_wait = sink
        .position(|c| *c == SinkCommand::WaitFence(Pipe::AsyncCompute, fork))
        .unwrap();
    let join_signal = sink
        .position(|c| *c == SinkCommand::SignalFence(Pipe::AsyncCompute, join))
        .unwrap();
    let join_wait = sink
        .position(|c| *c == SinkCommand::WaitFence(Pipe::Graphics, join))
        .unwrap();
    assert!(produce_at < fork_signal && fork_signal < reduce_at);
    assert!(reduce_at < fork_wait);
    assert!(join_signal < consume_at && consume_at < join_wait);

    // the graphics pipe starts the transition and the async pipe finishes it
    assert!(sink.ended_transitions().any(|(pipe, _, t)| {
        pipe == Pipe::AsyncCompute && t.resource == field.resource() && t.after == Access::SRV_COMPUTE
    }));
    assert!(sink.begun_transitions().any(|(pipe, _, t)| {
        pipe == Pipe::Graphics && t.resource == field.resource() && t.after == Access::SRV_COMPUTE
    }));
    assert_eq!(pool.free_count(), 2);
}

#[test]
fn test_async_release_waits_for_join() {
    let log = EventLog::default();
    let mut allocator = LoggingAllocator {
        pool: new_pool(),
        log: log.clone(),
    };
    let mut sink = LoggingSink {
        inner: RecordingSink::new(),
        log: log.clone(),
    };
    let mut graph = GraphBuilder::new(&mut allocator, &mut sink, GraphConfig::default());

    let seeds = graph.create_buffer((rw_buffer(), "seeds"));
    let histogram = graph.create_buffer((rw_buffer(), "histogram"));
    graph.add_pass(
        "C1",
        PassParameters::new().buffer(seeds, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE,
        PassBody::empty(),
    );
    let last_async = graph.add_pass(
        "C2",
        PassParameters::new()
            .buffer(seeds, Access::SRV_COMPUTE)
            .buffer(histogram, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE,
        PassBody::empty(),
    );
    graph.add_pass(
        "Gmid",
        PassParameters::new(),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    let join = graph.add_pass(
        "G2",
        PassParameters::new().buffer(histogram, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    graph.execute();

    let compiled = graph.compiled().unwrap();
    assert_eq!(compiled.join_pass(last_async), Some(join));
    // nothing on graphics feeds the run, it starts with the graph
    assert_eq!(compiled.fork_pass(last_async), Some(graph.prologue()));
    drop(graph);

    let log = log.borrow();
    let position = |event: &Event| log.iter().position(|e| e == event).unwrap();
    // seeds was the first allocation
    let released = position(&Event::Release(0));
    assert!(released > position(&Event::Pass("Gmid".into())));
    assert!(released > position(&Event::Pass("G2".into())));
    assert!(released < position(&Event::Pass("epilogue".into())));
    assert_eq!(allocator.pool.free_count(), 2);
}

#[test]
fn test_async_compute_disabled() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let config = GraphConfig {
        enable_async_compute: false,
        ..GraphConfig::default()
    };
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, config);

    let buffer = graph.create_buffer(rw_buffer());
    let pass = graph.add_pass(
        "particles",
        PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassBody::compute(|list| assert_eq!(list.pipe(), Pipe::Graphics)),
    );
    assert_eq!(graph.pass_pipe(pass), Pipe::Graphics);
    graph.execute();

    let compiled = graph.compiled().unwrap();
    assert!(compiled.fences().is_empty());
    assert!(compiled.async_runs().is_empty());
    assert_eq!(compiled.fork_pass(pass), None);
}

#[test]
fn test_async_transients_bound_at_fork() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let (backing_a, backing_b) = (Cell::new(None), Cell::new(None));
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let a = graph.create_buffer((rw_buffer(), "A"));
    let b = graph.create_buffer((rw_buffer(), "B"));
    graph.add_pass(
        "G1",
        PassParameters::new().buffer(a, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::compute(|list| backing_a.set(list.buffer(a))),
    );
    graph.add_pass(
        "G2",
        PassParameters::new().buffer(a, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    let c1 = graph.add_pass(
        "C1",
        PassParameters::new().buffer(b, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassBody::compute(|list| backing_b.set(list.buffer(b))),
    );
    graph.execute();

    let compiled = graph.compiled().unwrap();
    let prologue = graph.prologue();
    assert_eq!(compiled.fork_pass(c1), Some(prologue));
    assert_eq!(compiled.schedule(prologue).acquire.as_slice(), &[b.resource()]);
    drop(graph);

    // A is released after G2 while C1 may still be running, so they can't share memory
    assert!(backing_a.get().is_some());
    assert!(backing_b.get().is_some());
    assert_ne!(backing_a.get(), backing_b.get());
    assert_eq!(pool.allocated_count(), 2);
}

fn uav_pair_transitions(first: Option<u32>, second: Option<u32>) -> (Vec<Transition>, usize) {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let tags = [graph.create_no_barrier_tag(), graph.create_no_barrier_tag()];
    let buffer = graph.create_buffer((rw_buffer(), "splat"));
    let params = |tag: Option<u32>| match tag {
        Some(tag) => {
            PassParameters::new().buffer_uav_no_barrier(buffer, Access::UAV_COMPUTE, tags[tag as usize])
        }
        None => PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
    };
    graph.add_pass("splat 0", params(first), PassFlags::COMPUTE, PassBody::empty());
    graph.add_pass("splat 1", params(second), PassFlags::COMPUTE, PassBody::empty());
    graph.queue_buffer_extraction(buffer);
    graph.execute();

    let transitions = graph
        .compiled()
        .unwrap()
        .transitions_of(buffer)
        .cloned()
        .collect();
    drop(graph);
    (transitions, sink.transitions_of(buffer.resource()).len())
}

#[test]
fn test_uav_hazards_and_no_barrier_tags() {
    let (transitions, submitted) = uav_pair_transitions(Some(0), Some(0));
    assert_eq!(transitions.len(), 1);
    assert_eq!(submitted, 1);

    for (first, second) in [(Some(0), Some(1)), (None, None), (Some(0), None)] {
        let (transitions, submitted) = uav_pair_transitions(first, second);
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1].kind, TransitionKind::UavHazard);
        assert_eq!(transitions[1].before, Access::UAV_COMPUTE);
        assert_eq!(transitions[1].after, Access::UAV_COMPUTE);
        assert_eq!(transitions[1].begin_site, BatchSite::Prologue);
        assert_eq!(submitted, 2);
    }
}

fn count_render_passes(config: GraphConfig, second_flags: PassFlags) -> (usize, usize) {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, config);

    let color = graph.create_texture((texture_desc(TextureUsage::RENDER_TARGET), "color"));
    graph.add_raster_pass(
        "opaque",
        PassParameters::new().render_target(color, LoadAction::Clear),
        PassFlags::empty(),
        |list| list.draw_indexed(36, 4),
    );
    graph.add_raster_pass(
        "transparent",
        PassParameters::new().render_target(color, LoadAction::Load),
        second_flags,
        |list| list.draw(6, 1),
    );
    graph.queue_texture_extraction(color);
    graph.execute();
    drop(graph);

    (
        sink.count(|c| matches!(c, SinkCommand::BeginRenderPass(_))),
        sink.count(|c| matches!(c, SinkCommand::EndRenderPass(_))),
    )
}

#[test]
fn test_render_pass_merging() {
    assert_eq!(
        count_render_passes(GraphConfig::default(), PassFlags::empty()),
        (1, 1)
    );
    assert_eq!(
        count_render_passes(GraphConfig::default(), PassFlags::NEVER_MERGE),
        (2, 2)
    );
    let config = GraphConfig {
        merge_compatible_render_passes: false,
        ..GraphConfig::default()
    };
    assert_eq!(count_render_passes(config, PassFlags::empty()), (2, 2));
}

#[derive(Clone, Copy, Debug)]
enum Between {
    CulledCompute,
    RetainedCompute,
    UnrelatedAsync,
    AsyncReader,
}

/// Two raster passes loading the same target with `between` declared in the middle.
fn count_split_render_passes(between: Between) -> (usize, usize) {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let color = graph.create_texture((
        texture_desc(TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE),
        "color",
    ));
    let scratch = graph.create_buffer((rw_buffer(), "scratch"));
    let opaque = graph.add_raster_pass(
        "opaque",
        PassParameters::new().render_target(color, LoadAction::Clear),
        PassFlags::empty(),
        |list| list.draw_indexed(36, 4),
    );
    let middle = match between {
        Between::CulledCompute => graph.add_pass(
            "unread",
            PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
            PassFlags::COMPUTE,
            PassBody::empty(),
        ),
        Between::RetainedCompute => graph.add_pass(
            "histogram",
            PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
            PassFlags::COMPUTE | PassFlags::NEVER_CULL,
            PassBody::compute(|list| list.dispatch(8, 1, 1)),
        ),
        Between::UnrelatedAsync => graph.add_pass(
            "particles",
            PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
            PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
            PassBody::compute(|list| list.dispatch(8, 1, 1)),
        ),
        Between::AsyncReader => graph.add_pass(
            "luminance",
            PassParameters::new()
                .texture(color, Access::SRV_COMPUTE)
                .buffer(scratch, Access::UAV_COMPUTE),
            PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
            PassBody::compute(|list| list.dispatch(8, 8, 1)),
        ),
    };
    let transparent = graph.add_raster_pass(
        "transparent",
        PassParameters::new().render_target(color, LoadAction::Load),
        PassFlags::empty(),
        |list| list.draw(6, 1),
    );
    graph.queue_texture_extraction(color);
    graph.execute();

    let compiled = graph.compiled().unwrap();
    match between {
        Between::CulledCompute => assert!(compiled.is_culled(middle)),
        Between::RetainedCompute => assert!(compiled.is_retained(middle)),
        Between::UnrelatedAsync => {
            assert_eq!(compiled.fork_pass(middle), Some(graph.prologue()));
            let epilogue = GraphPass::new(graph.pass_count() - 1);
            assert_eq!(compiled.join_pass(middle), Some(epilogue));
        }
        Between::AsyncReader => {
            assert_eq!(compiled.fork_pass(middle), Some(opaque));
            assert_eq!(compiled.join_pass(middle), Some(transparent));
            assert!(!compiled.schedule(opaque).signal_fences.is_empty());
            assert!(!compiled.schedule(transparent).wait_fences.is_empty());
        }
    }
    drop(graph);

    (
        sink.count(|c| matches!(c, SinkCommand::BeginRenderPass(_))),
        sink.count(|c| matches!(c, SinkCommand::EndRenderPass(_))),
    )
}

#[test]
fn test_render_pass_merging_across_other_passes() {
    // a culled pass leaves nothing behind to split the render pass
    assert_eq!(count_split_render_passes(Between::CulledCompute), (1, 1));
    // async work runs on its own queue
    assert_eq!(count_split_render_passes(Between::UnrelatedAsync), (1, 1));
    assert_eq!(count_split_render_passes(Between::RetainedCompute), (2, 2));
    assert_eq!(count_split_render_passes(Between::AsyncReader), (2, 2));
}

#[test]
fn test_mip_chain_transitions() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let desc = TextureDesc::new_2d(
        Format::R16G16B16A16Float,
        8,
        8,
        TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
    )
    .with_mips(4);
    let chain = graph.create_texture((desc, "bloom chain"));
    graph.add_pass(
        "seed",
        PassParameters::new().texture(chain.mip(0), Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    for mip in 1..4 {
        graph.add_pass(
            format!("downsample {mip}"),
            PassParameters::new()
                .texture(chain.mip(mip - 1), Access::SRV_COMPUTE)
                .texture(chain.mip(mip), Access::UAV_COMPUTE),
            PassFlags::COMPUTE,
            PassBody::empty(),
        );
    }
    graph.add_pass(
        "composite",
        PassParameters::new().texture(chain, Access::SRV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    graph.queue_texture_extraction(chain);
    graph.execute();

    let transitions: Vec<Transition> = graph
        .compiled()
        .unwrap()
        .transitions_of(chain)
        .cloned()
        .collect();
    for mip in 0..4 {
        let chain_of_mip: Vec<&Transition> = transitions
            .iter()
            .filter(|t| t.range.base_mip <= mip && mip < t.range.base_mip + t.range.mip_count)
            .collect();
        assert_eq!(chain_of_mip[0].kind, TransitionKind::FirstUse);
        assert_eq!(chain_of_mip[0].after, Access::UAV_COMPUTE);
        for pair in chain_of_mip.windows(2) {
            assert_eq!(pair[0].after, pair[1].before);
        }
        assert_eq!(chain_of_mip.last().unwrap().after, Access::SRV_COMPUTE);
    }
    // each mip is written once and read once
    assert_eq!(transitions.len(), 8);

    let extracted = graph.extracted_texture(chain).unwrap();
    assert_eq!(extracted.access, Access::SRV_COMPUTE);
}

#[test]
fn test_extracted_mips_keep_their_own_state() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let desc = TextureDesc::new_2d(
        Format::R16G16B16A16Float,
        8,
        8,
        TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
    )
    .with_mips(3);
    let chain = graph.create_texture((desc, "luminance chain"));
    graph.add_pass(
        "seed",
        PassParameters::new().texture(chain.mip(0), Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    for mip in 1..3 {
        graph.add_pass(
            format!("reduce {mip}"),
            PassParameters::new()
                .texture(chain.mip(mip - 1), Access::SRV_COMPUTE)
                .texture(chain.mip(mip), Access::UAV_COMPUTE),
            PassFlags::COMPUTE,
            PassBody::empty(),
        );
    }
    graph.queue_texture_extraction(chain);
    graph.execute();

    // the last mip is still being written when the graph ends
    let extracted = graph.extracted_texture(chain).unwrap();
    assert_eq!(extracted.access, Access::UNKNOWN);
    let accesses = graph.extracted_subresource_accesses(chain).unwrap();
    assert_eq!(
        accesses.as_slice(),
        &[Access::SRV_COMPUTE, Access::SRV_COMPUTE, Access::UAV_COMPUTE]
    );
}

#[test]
fn test_repeated_reads_need_no_transition() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let lights = graph.create_buffer((rw_buffer(), "lights"));
    graph.add_pass(
        "cull lights",
        PassParameters::new().buffer(lights, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    for name in ["shade", "fog"] {
        graph.add_pass(
            name,
            PassParameters::new().buffer(lights, Access::SRV_COMPUTE),
            PassFlags::COMPUTE,
            PassBody::empty(),
        );
    }
    graph.queue_buffer_extraction(lights);
    graph.execute();

    assert_eq!(graph.compiled().unwrap().transitions_of(lights).count(), 2);
}

#[test]
fn test_uniform_buffer_accesses() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let constants = graph.create_buffer((
        buffer_desc(BufferUsage::UNIFORM | BufferUsage::COPY_DST),
        "view constants",
    ));
    let output = graph.create_buffer((rw_buffer(), "output"));
    graph.add_pass(
        "upload",
        PassParameters::new().buffer(constants, Access::COPY_DST),
        PassFlags::COPY,
        PassBody::empty(),
    );
    let view = graph.create_uniform_buffer((
        PassParameters::new().buffer(constants, Access::SRV_COMPUTE),
        "view",
    ));
    let shade = graph.add_pass(
        "shade",
        PassParameters::new()
            .uniform_buffer(view)
            .buffer(output, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    graph.queue_buffer_extraction(output);

    assert_eq!(graph.resource_refcount(constants), 2);
    graph.execute();

    let compiled = graph.compiled().unwrap();
    assert!(compiled.is_retained(shade));
    let last = compiled.transitions_of(constants).last().unwrap();
    assert_eq!(last.before, Access::COPY_DST);
    assert_eq!(last.after, Access::SRV_COMPUTE);
    assert_eq!(graph.resource_refcount(constants), 0);
}

#[test]
fn test_depth_prepass() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let depth = graph.create_texture((
        TextureDesc::new_2d(
            Format::D24UnormS8Uint,
            64,
            64,
            TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
        ),
        "depth",
    ));
    let color = graph.create_texture((texture_desc(TextureUsage::RENDER_TARGET), "color"));
    graph.add_raster_pass(
        "prepass",
        PassParameters::new().depth_stencil(depth, DepthStencilAccess::Write, LoadAction::Clear),
        PassFlags::empty(),
        |list| list.draw(3, 1),
    );
    graph.add_raster_pass(
        "opaque",
        PassParameters::new()
            .render_target(color, LoadAction::Clear)
            .depth_stencil(depth, DepthStencilAccess::Read, LoadAction::Load),
        PassFlags::empty(),
        |list| list.draw(3, 1),
    );
    graph.queue_texture_extraction(color);
    graph.execute();

    let transitions: Vec<Transition> = graph
        .compiled()
        .unwrap()
        .transitions_of(depth)
        .cloned()
        .collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[1].before, Access::DSV_WRITE);
    assert_eq!(transitions[1].after, Access::DSV_READ);
    // depth and stencil planes move together
    assert_eq!(transitions[1].range.plane_count, 2);
    drop(graph);

    let begins: Vec<RenderPassInfo> = sink
        .commands
        .iter()
        .filter_map(|c| match c {
            SinkCommand::BeginRenderPass(info) => Some(info.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(begins.len(), 2);
    assert!(begins[0].render_targets.is_empty());
    assert_eq!(begins[1].render_targets.len(), 1);
    assert!(begins[1].depth_stencil.unwrap().1.is_some());
}

#[test]
fn test_validation_warnings() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let staged = graph.create_buffer((
        buffer_desc(
            BufferUsage::SHADER_RESOURCE | BufferUsage::UNORDERED_ACCESS | BufferUsage::COPY_DST,
        ),
        "staged",
    ));
    let orphan = graph.create_buffer((buffer_desc(BufferUsage::UNORDERED_ACCESS), "orphan"));
    let garbage = graph.create_buffer((buffer_desc(BufferUsage::SHADER_RESOURCE), "garbage"));

    graph.add_pass(
        "upload",
        PassParameters::new().buffer(staged, Access::COPY_DST),
        PassFlags::COPY,
        PassBody::empty(),
    );
    graph.add_pass(
        "read staged",
        PassParameters::new().buffer(staged, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    graph.add_pass(
        "write orphan",
        PassParameters::new().buffer(orphan, Access::UAV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    graph.add_pass(
        "read garbage",
        PassParameters::new().buffer(garbage, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    assert!(graph.warnings().iter().any(|w| matches!(
        w,
        ValidationWarning::ReadBeforeWrite { pass, resource }
            if pass == "read garbage" && resource == "garbage"
    )));
    graph.execute();

    let warnings = graph.warnings();
    assert!(warnings.iter().any(|w| matches!(
        w,
        ValidationWarning::UnusedCreateFlag { resource, flag: "UNORDERED_ACCESS" } if resource == "staged"
    )));
    assert!(warnings.iter().any(|w| matches!(
        w,
        ValidationWarning::ProducedNeverConsumed { resource } if resource == "orphan"
    )));
    assert!(!warnings.iter().any(|w| matches!(
        w,
        ValidationWarning::ProducedNeverConsumed { resource } if resource == "staged"
    )));
}

#[test]
fn test_extended_lifetimes_bind_early() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let bound_early = Cell::new(false);
    let config = GraphConfig {
        extend_resource_lifetimes: true,
        ..GraphConfig::default()
    };
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, config);

    let first = graph.create_buffer(rw_buffer());
    let later = graph.create_buffer(rw_buffer());
    graph.add_pass(
        "first",
        PassParameters::new().buffer(first, Access::UAV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::compute(|list| bound_early.set(list.buffer(later).is_some())),
    );
    graph.add_pass(
        "later",
        PassParameters::new().buffer(later, Access::UAV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    graph.execute();
    drop(graph);

    assert!(bound_early.get());
    assert_eq!(pool.stats().in_use, 0);
}

fn pooled_frame(pool: &mut ResourcePool<NullBackingAllocator>) -> Vec<TransitionInfo> {
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(pool, &mut sink, GraphConfig::default());
    let buffer = graph.create_buffer((rw_buffer(), "visibility"));
    graph.add_pass(
        "build",
        PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    graph.add_pass(
        "use",
        PassParameters::new().buffer(buffer, Access::SRV_COMPUTE),
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassBody::empty(),
    );
    graph.execute();
    drop(graph);
    sink.transitions_of(buffer.resource())
        .into_iter()
        .cloned()
        .collect()
}

#[test]
fn test_pool_reuse_across_graphs() {
    let mut pool = new_pool();
    let first = pooled_frame(&mut pool);
    assert_eq!(first[0].before, Access::UNKNOWN);
    pool.tick();

    let second = pooled_frame(&mut pool);
    // the allocation comes back in the state the previous graph left it in
    assert_eq!(second[0].before, Access::SRV_COMPUTE);
    assert_eq!(second[0].after, Access::UAV_COMPUTE);
    assert_eq!(first[0].backing, second[0].backing);

    let stats = pool.stats();
    assert_eq!(stats.created_total, 1);
    assert_eq!(stats.reused_total, 1);
    assert_eq!(stats.in_use, 0);
}

#[test]
fn test_immediate_mode() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let ran = Cell::new(false);
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::immediate());

    let buffer = graph.create_buffer((rw_buffer(), "particles"));
    let pass = graph.add_pass(
        "simulate",
        PassParameters::new().buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::ASYNC_COMPUTE,
        PassBody::compute(|_| ran.set(true)),
    );
    assert!(ran.get());
    assert_eq!(graph.pass_pipe(pass), Pipe::Graphics);
    assert!(graph.resource_backing(buffer).is_some());

    graph.add_pass(
        "render",
        PassParameters::new().buffer(buffer, Access::SRV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
    graph.execute();
    assert!(graph.compiled().unwrap().fences().is_empty());
    assert_eq!(graph.compiled().unwrap().transitions_of(buffer).count(), 2);
    drop(graph);

    assert_eq!(pool.stats().in_use, 0);
    assert_eq!(sink.transitions_of(buffer.resource()).len(), 2);
}

#[test]
fn test_external_registration() {
    let mut pool = new_pool();
    let desc = texture_desc(TextureUsage::RENDER_TARGET | TextureUsage::PRESENT);
    let swapchain = pool.find_or_allocate(&ResourceDesc::Texture(desc)).resource;
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    let access = ExternalAccess::new(Access::PRESENT).with_final(Access::PRESENT);
    let backbuffer =
        graph.register_external_texture((swapchain, "backbuffer"), ResourceFlags::empty(), access);
    let again = graph.register_external_texture(swapchain, ResourceFlags::empty(), access);
    assert_eq!(backbuffer, again);

    graph.add_raster_pass(
        "ui",
        PassParameters::new().render_target(backbuffer, LoadAction::Load),
        PassFlags::empty(),
        |list| {
            assert_eq!(list.texture(backbuffer), Some(swapchain));
            list.draw(4, 1);
        },
    );
    graph.execute();

    let transitions: Vec<Transition> = graph
        .compiled()
        .unwrap()
        .transitions_of(backbuffer)
        .cloned()
        .collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].before, Access::PRESENT);
    assert_eq!(transitions[0].after, Access::RTV);
    // begun right at the start of the graph
    assert_eq!(transitions[0].begin, GraphPass::new(0));
    assert_eq!(transitions[1].after, Access::PRESENT);
    drop(graph);

    // externals stay with their owner
    assert_eq!(pool.refs(swapchain), 1);
    let presented = sink
        .begun_transitions()
        .filter(|(_, _, t)| t.after == Access::PRESENT)
        .count();
    assert_eq!(presented, 1);
}

#[test]
#[should_panic(expected = "Inconsistent registration")]
fn test_external_registered_twice_differently() {
    let mut pool = new_pool();
    let swapchain = pool
        .find_or_allocate(&ResourceDesc::Texture(texture_desc(TextureUsage::RENDER_TARGET)))
        .resource;
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());

    graph.register_external_texture(
        swapchain,
        ResourceFlags::empty(),
        ExternalAccess::new(Access::RTV),
    );
    graph.register_external_texture(
        swapchain,
        ResourceFlags::empty(),
        ExternalAccess::new(Access::SRV_GRAPHICS),
    );
}

#[test]
#[should_panic(expected = "does not know")]
fn test_unknown_external() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    graph.register_external_buffer(
        PooledResource::new(3),
        ResourceFlags::empty(),
        ExternalAccess::new(Access::SRV_COMPUTE),
    );
}

#[test]
#[should_panic(expected = "read only but written")]
fn test_read_only_resource_written() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let lut = graph.create_texture(rw_texture().with_flags(ResourceFlags::READ_ONLY));
    graph.add_pass(
        "bake",
        PassParameters::new().texture(lut, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
}

#[test]
#[should_panic(expected = "mutually exclusive")]
fn test_exclusive_pass_kinds() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let color = graph.create_texture(texture_desc(TextureUsage::RENDER_TARGET));
    graph.add_pass(
        "confused",
        PassParameters::new().render_target(color, LoadAction::Clear),
        PassFlags::RASTER | PassFlags::ASYNC_COMPUTE,
        PassBody::empty(),
    );
}

#[test]
#[should_panic(expected = "RASTER passes need render target bindings")]
fn test_raster_without_targets() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let input = graph.create_texture(rw_texture());
    graph.add_raster_pass(
        "headless",
        PassParameters::new().texture(input, Access::SRV_GRAPHICS),
        PassFlags::empty(),
        |list| list.draw(3, 1),
    );
}

#[test]
#[should_panic(expected = "RASTER passes are declared with add_raster_pass")]
fn test_raster_flag_on_compute_body() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let color = graph.create_texture(texture_desc(TextureUsage::RENDER_TARGET));
    graph.add_pass(
        "dispatches in a render pass",
        PassParameters::new().render_target(color, LoadAction::Clear),
        PassFlags::RASTER | PassFlags::NEVER_CULL,
        PassBody::compute(|list| list.dispatch(1, 1, 1)),
    );
}

#[test]
fn test_graphics_list_stays_on_graphics_pipe() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let seen = Cell::new(None);
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    graph.validate = false;
    let color = graph.create_texture(texture_desc(TextureUsage::RENDER_TARGET));
    let raster = graph.add_raster_pass(
        "draws",
        PassParameters::new().render_target(color, LoadAction::Clear),
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        |list| {
            seen.set(Some(list.pipe()));
            list.draw(3, 1);
        },
    );
    let scratch = graph.create_buffer(rw_buffer());
    let queue = graph.add_pass(
        "dispatches",
        PassParameters::new().buffer(scratch, Access::UAV_COMPUTE),
        PassFlags::RASTER | PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassBody::compute(|list| list.dispatch(1, 1, 1)),
    );
    assert_eq!(graph.pass_pipe(raster), Pipe::Graphics);
    assert_eq!(graph.pass_pipe(queue), Pipe::AsyncCompute);
    graph.execute();
    drop(graph);

    assert_eq!(seen.get(), Some(Pipe::Graphics));
    assert_eq!(sink.count(|c| matches!(c, SinkCommand::Draw { .. })), 1);
    assert_eq!(sink.count(|c| matches!(c, SinkCommand::BeginRenderPass(_))), 1);
}

#[test]
#[should_panic(expected = "uses `history` which has no backing memory")]
fn test_copy_into_undeclared_resource() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let copy_usage = BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
    let current = graph.create_buffer((buffer_desc(copy_usage), "current"));
    let history = graph.create_buffer((buffer_desc(copy_usage), "history"));
    graph.add_pass(
        "save history",
        PassParameters::new().buffer(current, Access::COPY_SRC),
        PassFlags::COPY | PassFlags::NEVER_CULL,
        PassBody::compute(move |list| list.copy_buffer(current, history)),
    );
    graph.execute();
}

#[test]
#[should_panic(expected = "conflicting states")]
fn test_conflicting_accesses_in_one_pass() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let buffer = graph.create_buffer(rw_buffer());
    graph.add_pass(
        "feedback",
        PassParameters::new()
            .buffer(buffer, Access::SRV_COMPUTE)
            .buffer(buffer, Access::UAV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_subresource_out_of_bounds() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    let texture = graph.create_texture(rw_texture());
    graph.add_pass(
        "mip 2",
        PassParameters::new().texture(texture.mip(2), Access::SRV_COMPUTE),
        PassFlags::COMPUTE,
        PassBody::empty(),
    );
}

#[test]
#[should_panic(expected = "already been executed")]
fn test_double_execute() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    graph.execute();
    graph.execute();
}

#[test]
#[should_panic(expected = "after the graph has been executed")]
fn test_declaration_after_execute() {
    let mut pool = new_pool();
    let mut sink = RecordingSink::new();
    let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::default());
    graph.execute();
    graph.create_buffer((rw_buffer(), "late"));
}
