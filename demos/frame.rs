#![allow(unused)]

use std::io::Write;

use rdg::graph::{
    Access, BufferDesc, BufferUsage, DepthStencilAccess, ExternalAccess, ExtractedResource,
    Format, GraphBuilder, GraphConfig, LoadAction, PassBody, PassFlags, PassParameters,
    RecordingSink, ResourceFlags, SinkCommand, TextureDesc, TextureUsage,
};
use rdg::pool::{NullBackingAllocator, ResourceAllocator, ResourcePool};
use rdg::tracing::tracing_subscriber::install_tracing_subscriber;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() {
    install_tracing_subscriber(None);

    let mut pool = ResourcePool::new(NullBackingAllocator::default());
    let swapchain = pool
        .find_or_allocate(&rdg::graph::ResourceDesc::Texture(TextureDesc::new_2d(
            Format::B8G8R8A8Unorm,
            WIDTH,
            HEIGHT,
            TextureUsage::RENDER_TARGET | TextureUsage::PRESENT,
        )))
        .resource;

    let mut history: Option<ExtractedResource> = None;
    for frame in 0..3 {
        let mut sink = RecordingSink::new();
        let mut graph = GraphBuilder::new(&mut pool, &mut sink, GraphConfig::from_env());

        let backbuffer = graph.register_external_texture(
            (swapchain, "backbuffer"),
            ResourceFlags::empty(),
            ExternalAccess::new(Access::PRESENT).with_final(Access::PRESENT),
        );
        let previous = history.map(|h| {
            graph.register_external_texture(
                (h.resource, "previous color"),
                ResourceFlags::empty(),
                ExternalAccess::new(h.access),
            )
        });

        let depth = graph.create_texture((
            TextureDesc::new_2d(
                Format::D32Float,
                WIDTH,
                HEIGHT,
                TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
            ),
            "depth",
        ));
        let color = graph.create_texture((
            TextureDesc::new_2d(
                Format::R16G16B16A16Float,
                WIDTH,
                HEIGHT,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
            ),
            "color",
        ));
        let occlusion = graph.create_texture((
            TextureDesc::new_2d(
                Format::R8Unorm,
                WIDTH / 2,
                HEIGHT / 2,
                TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
            ),
            "occlusion",
        ));
        let exposure = graph.create_buffer((
            BufferDesc::new(4, 1, BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE),
            "exposure",
        ));

        graph.add_raster_pass(
            "depth prepass",
            PassParameters::new().depth_stencil(depth, DepthStencilAccess::Write, LoadAction::Clear),
            PassFlags::empty(),
            |list| list.draw_indexed(36_000, 1),
        );
        graph.add_pass(
            "ambient occlusion",
            PassParameters::new()
                .texture(depth, Access::SRV_COMPUTE)
                .texture(occlusion, Access::UAV_COMPUTE),
            PassFlags::ASYNC_COMPUTE,
            PassBody::compute(|list| list.dispatch(WIDTH / 16, HEIGHT / 16, 1)),
        );
        graph.add_raster_pass(
            "opaque",
            PassParameters::new()
                .texture(occlusion, Access::SRV_GRAPHICS)
                .render_target(color, LoadAction::Clear)
                .depth_stencil(depth, DepthStencilAccess::Read, LoadAction::Load),
            PassFlags::empty(),
            |list| list.draw_indexed(36_000, 1),
        );

        let mut exposure_params = PassParameters::new()
            .texture(color, Access::SRV_COMPUTE)
            .buffer(exposure, Access::UAV_COMPUTE);
        if let Some(previous) = previous {
            exposure_params = exposure_params.texture(previous, Access::SRV_COMPUTE);
        }
        graph.add_pass(
            "exposure",
            exposure_params,
            PassFlags::COMPUTE,
            PassBody::compute(|list| list.dispatch(1, 1, 1)),
        );
        graph.add_raster_pass(
            "tonemap",
            PassParameters::new()
                .texture(color, Access::SRV_GRAPHICS)
                .buffer(exposure, Access::SRV_GRAPHICS)
                .render_target(backbuffer, LoadAction::NoAction),
            PassFlags::empty(),
            |list| list.draw(3, 1),
        );
        // an unused debug view, culled
        graph.add_pass(
            "debug occlusion",
            PassParameters::new().texture(occlusion, Access::SRV_COMPUTE),
            PassFlags::COMPUTE,
            PassBody::compute(|list| list.dispatch(1, 1, 1)),
        );
        graph.queue_texture_extraction(color);

        graph.execute();

        if frame == 2 {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let _ = graph.write_dot_representation(&mut out);
            let _ = graph.dump_resources(&mut out);
            for warning in graph.warnings() {
                let _ = writeln!(out, "warning: {warning}");
            }
        }
        let extracted = graph.extracted_texture(color);
        drop(graph);

        let transitions = sink.count(|c| matches!(c, SinkCommand::BeginTransitions { .. }));
        let render_passes = sink.count(|c| matches!(c, SinkCommand::BeginRenderPass(_)));
        println!(
            "frame {frame}: {} commands, {transitions} transition batches, {render_passes} render passes",
            sink.commands.len()
        );

        // the history of the last frame is no longer needed once this one has read it
        if let Some(old) = history.take() {
            pool.release(old.resource, old.access);
        }
        history = extracted;
        pool.tick();
    }

    let stats = pool.stats();
    println!(
        "pool: {} allocations, {} in use, {} created, {} reused",
        stats.allocated, stats.in_use, stats.created_total, stats.reused_total
    );
}
