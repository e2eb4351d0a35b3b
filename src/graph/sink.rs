use smallvec::SmallVec;

use super::{
    descriptors::SubresourceRange,
    parameters::{DepthStencilBinding, RenderTargetBinding},
    state::{Access, Pipe, Pipes},
    BatchId, FenceId, GraphPass, GraphResource,
};
use crate::pool::PooledResource;

/// One resource state change as handed to the command encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionInfo {
    pub resource: GraphResource,
    pub backing: Option<PooledResource>,
    pub range: SubresourceRange,
    pub before: Access,
    pub after: Access,
    pub before_pipes: Pipes,
    pub after_pipes: Pipes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPassInfo {
    /// The first pass of a merged run.
    pub pass: GraphPass,
    pub render_targets: SmallVec<[(RenderTargetBinding, Option<PooledResource>); 8]>,
    pub depth_stencil: Option<(DepthStencilBinding, Option<PooledResource>)>,
}

/// Receives the commands a graph produces while it executes, standing in for the
/// per-pipe command lists of a real device.
pub trait CommandSink {
    fn begin_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]);
    fn end_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]);
    fn begin_render_pass(&mut self, info: &RenderPassInfo);
    fn end_render_pass(&mut self, pass: GraphPass);
    fn signal_fence(&mut self, pipe: Pipe, fence: FenceId);
    fn wait_fence(&mut self, pipe: Pipe, fence: FenceId);
    fn dispatch(&mut self, pipe: Pipe, groups: [u32; 3]);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32);
    fn copy(&mut self, pipe: Pipe, src: PooledResource, dst: PooledResource);
    fn push_event(&mut self, _pipe: Pipe, _name: &str) {}
    fn pop_event(&mut self, _pipe: Pipe) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCommand {
    BeginTransitions {
        pipe: Pipe,
        batch: BatchId,
        transitions: Vec<TransitionInfo>,
    },
    EndTransitions {
        pipe: Pipe,
        batch: BatchId,
        transitions: Vec<TransitionInfo>,
    },
    BeginRenderPass(RenderPassInfo),
    EndRenderPass(GraphPass),
    SignalFence(Pipe, FenceId),
    WaitFence(Pipe, FenceId),
    Dispatch(Pipe, [u32; 3]),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Copy {
        pipe: Pipe,
        src: PooledResource,
        dst: PooledResource,
    },
    PushEvent(Pipe, String),
    PopEvent(Pipe),
}

/// Keeps every call in order.
#[derive(Default, Debug)]
pub struct RecordingSink {
    pub commands: Vec<SinkCommand>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, fun: impl Fn(&SinkCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(fun)
    }
    pub fn count(&self, fun: impl Fn(&SinkCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| fun(c)).count()
    }

    /// Transitions in the order their batches were begun.
    pub fn begun_transitions(&self) -> impl Iterator<Item = (Pipe, BatchId, &TransitionInfo)> {
        self.commands.iter().flat_map(|c| match c {
            SinkCommand::BeginTransitions {
                pipe,
                batch,
                transitions,
            } => Some(transitions.iter().map(move |t| (*pipe, *batch, t))),
            _ => None,
        })
        .flatten()
    }
    pub fn ended_transitions(&self) -> impl Iterator<Item = (Pipe, BatchId, &TransitionInfo)> {
        self.commands.iter().flat_map(|c| match c {
            SinkCommand::EndTransitions {
                pipe,
                batch,
                transitions,
            } => Some(transitions.iter().map(move |t| (*pipe, *batch, t))),
            _ => None,
        })
        .flatten()
    }
    pub fn transitions_of(&self, resource: GraphResource) -> Vec<&TransitionInfo> {
        self.begun_transitions()
            .filter(|(_, _, t)| t.resource == resource)
            .map(|(_, _, t)| t)
            .collect()
    }
    /// The index of the `PushEvent` marking the start of the named pass.
    pub fn event_position(&self, name: &str) -> Option<usize> {
        self.position(|c| matches!(c, SinkCommand::PushEvent(_, n) if n == name))
    }
}

impl CommandSink for RecordingSink {
    fn begin_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]) {
        self.commands.push(SinkCommand::BeginTransitions {
            pipe,
            batch,
            transitions: transitions.to_vec(),
        });
    }
    fn end_transitions(&mut self, pipe: Pipe, batch: BatchId, transitions: &[TransitionInfo]) {
        self.commands.push(SinkCommand::EndTransitions {
            pipe,
            batch,
            transitions: transitions.to_vec(),
        });
    }
    fn begin_render_pass(&mut self, info: &RenderPassInfo) {
        self.commands.push(SinkCommand::BeginRenderPass(info.clone()));
    }
    fn end_render_pass(&mut self, pass: GraphPass) {
        self.commands.push(SinkCommand::EndRenderPass(pass));
    }
    fn signal_fence(&mut self, pipe: Pipe, fence: FenceId) {
        self.commands.push(SinkCommand::SignalFence(pipe, fence));
    }
    fn wait_fence(&mut self, pipe: Pipe, fence: FenceId) {
        self.commands.push(SinkCommand::WaitFence(pipe, fence));
    }
    fn dispatch(&mut self, pipe: Pipe, groups: [u32; 3]) {
        self.commands.push(SinkCommand::Dispatch(pipe, groups));
    }
    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(SinkCommand::Draw {
            vertex_count,
            instance_count,
        });
    }
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.commands.push(SinkCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }
    fn copy(&mut self, pipe: Pipe, src: PooledResource, dst: PooledResource) {
        self.commands.push(SinkCommand::Copy { pipe, src, dst });
    }
    fn push_event(&mut self, pipe: Pipe, name: &str) {
        self.commands.push(SinkCommand::PushEvent(pipe, name.to_owned()));
    }
    fn pop_event(&mut self, pipe: Pipe) {
        self.commands.push(SinkCommand::PopEvent(pipe));
    }
}
