use std::{
    borrow::Cow,
    hash::{Hash, Hasher},
};

use smallvec::SmallVec;

use super::{
    compile::CompiledGraph,
    config::GraphConfig,
    descriptors::{
        resolve_range, BufferDesc, BufferUsage, ResourceDesc, ResourceFlags, SubresourceLayout,
        TextureDesc, TextureUsage,
    },
    error::{ValidationError, ValidationWarning},
    execute::{GraphicsCommandList, PassBody, PassCallback},
    parameters::{ParameterEntry, PassFlags, PassParameters},
    sink::CommandSink,
    state::{Access, Pipe, ResourceDemand, SubresourceDemand},
    GraphBuffer, GraphObject, GraphPass, GraphPassOption, GraphResource, GraphTexture,
    GraphUniformBuffer, Named, NoBarrierTag, PassDependency,
};
use crate::{
    pool::{PooledResource, ResourceAllocator},
    tracing::shim_macros::{error, trace, warn},
    util::hash::{constant_ahash_hasher, constant_ahash_hashmap, constant_ahash_hashset},
};

/// The states an external resource enters and leaves the graph in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExternalAccess {
    pub initial: Access,
    /// Transition into this access at the end of the graph, `None` leaves it wherever the last pass put it.
    pub final_access: Option<Access>,
}

impl ExternalAccess {
    pub fn new(initial: Access) -> Self {
        Self {
            initial,
            final_access: None,
        }
    }
    pub fn with_final(mut self, access: Access) -> Self {
        self.final_access = Some(access);
        self
    }
}

/// A backing allocation handed to the caller after execution, along with the access it was left in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractedResource {
    pub resource: PooledResource,
    /// `Access::UNKNOWN` when the subresources of a texture end in different states, see
    /// [`GraphBuilder::extracted_subresource_accesses`] for the state of each one.
    pub access: Access,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExternalRecord {
    pub(crate) pooled: PooledResource,
    pub(crate) flags: ResourceFlags,
    pub(crate) access: ExternalAccess,
}

pub(crate) struct ResourceData {
    pub(crate) desc: ResourceDesc,
    pub(crate) layout: SubresourceLayout,
    pub(crate) external: Option<ExternalRecord>,
    pub(crate) extracted: bool,
    /// The last pass to write the resource during declaration.
    pub(crate) producer: GraphPassOption,
    /// Passes which have read the resource since it was last written.
    pub(crate) readers: SmallVec<[GraphPass; 4]>,
    pub(crate) produced: bool,
    /// Outstanding subresource accesses, settles after culling and drains during execution.
    pub(crate) refcount: u32,
    pub(crate) backing: Option<PooledResource>,
    /// The access the pool handed the allocation over in.
    pub(crate) acquired_access: Access,
    pub(crate) extraction: Option<ExtractedResource>,
}

impl ResourceData {
    pub(crate) fn new(desc: ResourceDesc) -> Self {
        Self {
            layout: desc.subresource_layout(),
            desc,
            external: None,
            extracted: false,
            producer: GraphPassOption::NONE,
            readers: SmallVec::new(),
            produced: false,
            refcount: 0,
            backing: None,
            acquired_access: Access::UNKNOWN,
            extraction: None,
        }
    }
    pub(crate) fn is_external(&self) -> bool {
        self.external.is_some()
    }
    pub(crate) fn flags(&self) -> ResourceFlags {
        self.desc.flags()
    }
}

pub(crate) struct PassData<'a> {
    pub(crate) flags: PassFlags,
    pub(crate) pipe: Pipe,
    pub(crate) params: PassParameters,
    /// Merged per resource, sorted by resource index.
    pub(crate) demands: Vec<(GraphResource, ResourceDemand)>,
    pub(crate) dependencies: Vec<PassDependency>,
    pub(crate) body: Option<PassCallback<'a>>,
    /// The prologue and epilogue, they don't count towards resource lifetimes.
    pub(crate) synthetic: bool,
}

impl<'a> PassData<'a> {
    pub(crate) fn demand(&self, resource: GraphResource) -> Option<&ResourceDemand> {
        self.demands
            .binary_search_by_key(&resource, |(r, _)| *r)
            .ok()
            .map(|i| &self.demands[i].1)
    }
    pub(crate) fn is_raster(&self) -> bool {
        self.flags.contains(PassFlags::RASTER)
    }
}

/// One graph instance, resources and passes are declared into it and then it is executed once.
pub struct GraphBuilder<'a> {
    pub(crate) config: GraphConfig,
    pub(crate) validate: bool,
    pub(crate) allocator: &'a mut dyn ResourceAllocator,
    pub(crate) sink: &'a mut dyn CommandSink,
    pub(crate) resources: Vec<GraphObject<ResourceData>>,
    pub(crate) passes: Vec<GraphObject<PassData<'a>>>,
    pub(crate) uniform_buffers: Vec<GraphObject<PassParameters>>,
    externals: ahash::HashMap<PooledResource, GraphResource>,
    pub(crate) warnings: Vec<ValidationWarning>,
    warning_hashes: ahash::HashSet<u64>,
    no_barrier_tags: usize,
    pub(crate) compiled: Option<CompiledGraph>,
    pub(crate) executed: bool,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        allocator: &'a mut dyn ResourceAllocator,
        sink: &'a mut dyn CommandSink,
        config: GraphConfig,
    ) -> Self {
        let prologue = PassData {
            flags: PassFlags::NEVER_CULL,
            pipe: Pipe::Graphics,
            params: PassParameters::new(),
            demands: Vec::new(),
            dependencies: Vec::new(),
            body: None,
            synthetic: true,
        };
        Self {
            config,
            validate: cfg!(debug_assertions),
            allocator,
            sink,
            resources: Vec::new(),
            passes: vec![GraphObject::new(Some(Cow::Borrowed("prologue")), prologue)],
            uniform_buffers: Vec::new(),
            externals: constant_ahash_hashmap(),
            warnings: Vec::new(),
            warning_hashes: constant_ahash_hashset(),
            no_barrier_tags: 0,
            compiled: None,
            executed: false,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
    /// The synthetic pass that owns the initial state of external resources.
    pub fn prologue(&self) -> GraphPass {
        GraphPass::new(0)
    }
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn validation_failure(&self, error: ValidationError) {
        if self.validate {
            error!("{error}");
            panic!("{error}");
        }
    }

    pub(crate) fn report_warning(&mut self, warning: ValidationWarning) {
        if !self.validate {
            return;
        }
        let mut hasher = constant_ahash_hasher();
        warning.to_string().hash(&mut hasher);
        if self.warning_hashes.insert(hasher.finish()) {
            warn!("{warning}");
            self.warnings.push(warning);
        }
    }

    fn assert_declaring(&self, what: &Option<Cow<'static, str>>) {
        if self.executed {
            let what = what.clone().unwrap_or(Cow::Borrowed("unnamed object"));
            panic!("{}", ValidationError::DeclarationAfterExecute(what));
        }
    }

    pub(crate) fn resource_name(&self, resource: GraphResource) -> Cow<'static, str> {
        let display = self.resources[resource.index()].display(resource.index());
        Cow::Owned(display.set_prefix("resource #").to_string())
    }
    pub(crate) fn pass_name(&self, pass: GraphPass) -> Cow<'static, str> {
        let display = self.passes[pass.index()].display(pass.index());
        Cow::Owned(display.set_prefix("pass #").to_string())
    }

    fn push_resource(&mut self, name: Option<Cow<'static, str>>, data: ResourceData) -> GraphResource {
        let handle = GraphResource::new(self.resources.len());
        self.resources.push(GraphObject::new(name, data));
        handle
    }

    pub fn create_texture(&mut self, desc: impl Named<TextureDesc>) -> GraphTexture {
        let (desc, name) = desc.decompose();
        self.assert_declaring(&name);
        if self.validate {
            if let Err(reason) = desc.validate() {
                let name = name.clone().unwrap_or(Cow::Borrowed("unnamed texture"));
                self.validation_failure(ValidationError::InvalidDescriptor { name, reason });
            }
        }
        let resource = self.push_resource(name, ResourceData::new(ResourceDesc::Texture(desc)));
        GraphTexture(resource)
    }

    pub fn create_buffer(&mut self, desc: impl Named<BufferDesc>) -> GraphBuffer {
        let (desc, name) = desc.decompose();
        self.assert_declaring(&name);
        if self.validate {
            if let Err(reason) = desc.validate() {
                let name = name.clone().unwrap_or(Cow::Borrowed("unnamed buffer"));
                self.validation_failure(ValidationError::InvalidDescriptor { name, reason });
            }
        }
        let resource = self.push_resource(name, ResourceData::new(ResourceDesc::Buffer(desc)));
        GraphBuffer(resource)
    }

    pub fn register_external_texture(
        &mut self,
        pooled: impl Named<PooledResource>,
        flags: ResourceFlags,
        access: ExternalAccess,
    ) -> GraphTexture {
        GraphTexture(self.register_external(pooled, true, flags, access))
    }

    pub fn register_external_buffer(
        &mut self,
        pooled: impl Named<PooledResource>,
        flags: ResourceFlags,
        access: ExternalAccess,
    ) -> GraphBuffer {
        GraphBuffer(self.register_external(pooled, false, flags, access))
    }

    fn register_external(
        &mut self,
        pooled: impl Named<PooledResource>,
        texture: bool,
        flags: ResourceFlags,
        access: ExternalAccess,
    ) -> GraphResource {
        let (pooled, name) = pooled.decompose();
        self.assert_declaring(&name);

        let display_name = || {
            name.clone()
                .unwrap_or_else(|| Cow::Owned(format!("pooled resource #{}", pooled.index())))
        };

        let Some(desc) = self.allocator.descriptor(pooled) else {
            panic!("Registering {} which the allocator does not know", display_name());
        };
        if desc.is_texture() != texture {
            let reason = if texture {
                "registered as a texture but the allocation is a buffer"
            } else {
                "registered as a buffer but the allocation is a texture"
            };
            self.validation_failure(ValidationError::InconsistentRegistration {
                name: display_name(),
                reason: reason.into(),
            });
        }

        let record = ExternalRecord {
            pooled,
            flags,
            access,
        };

        if let Some(&existing) = self.externals.get(&pooled) {
            let previous = self.resources[existing.index()].external;
            if previous != Some(record) && self.validate {
                let reason = match previous {
                    Some(previous) if previous.flags != flags => {
                        format!("flags {:?} differ from {:?}", flags, previous.flags)
                    }
                    Some(previous) => format!(
                        "access {:?} differs from {:?}",
                        access, previous.access
                    ),
                    None => "the resource is not external".to_owned(),
                };
                self.validation_failure(ValidationError::InconsistentRegistration {
                    name: display_name(),
                    reason,
                });
            }
            return existing;
        }

        let desc = match desc {
            ResourceDesc::Texture(desc) => ResourceDesc::Texture(TextureDesc { flags, ..desc }),
            ResourceDesc::Buffer(desc) => ResourceDesc::Buffer(BufferDesc { flags, ..desc }),
        };
        let mut data = ResourceData::new(desc);
        data.external = Some(record);
        data.producer = GraphPass::new(0).into();
        data.produced = true;
        data.backing = Some(pooled);
        data.acquired_access = access.initial;

        let handle = self.push_resource(name, data);
        self.externals.insert(pooled, handle);
        trace!("Registered external {}", self.resource_name(handle));
        handle
    }

    /// A named group of accesses which passes can bind as a whole.
    pub fn create_uniform_buffer(&mut self, params: impl Named<PassParameters>) -> GraphUniformBuffer {
        let (params, name) = params.decompose();
        self.assert_declaring(&name);
        if self.validate && (params.has_render_targets() || !params.uniform_buffers.is_empty()) {
            self.validation_failure(ValidationError::MalformedParameters {
                pass: name.clone().unwrap_or(Cow::Borrowed("unnamed uniform buffer")),
                reason: "uniform buffers can only contain plain resource accesses".into(),
            });
        }
        let handle = GraphUniformBuffer::new(self.uniform_buffers.len());
        self.uniform_buffers.push(GraphObject::new(name, params));
        handle
    }

    /// A fresh tag, passes writing the same UAV with the same tag are not separated by a barrier.
    pub fn create_no_barrier_tag(&mut self) -> NoBarrierTag {
        let tag = NoBarrierTag::new(self.no_barrier_tags);
        self.no_barrier_tags += 1;
        tag
    }

    pub fn queue_texture_extraction(&mut self, texture: GraphTexture) {
        self.queue_extraction(texture.resource());
    }
    pub fn queue_buffer_extraction(&mut self, buffer: GraphBuffer) {
        self.queue_extraction(buffer.resource());
    }
    fn queue_extraction(&mut self, resource: GraphResource) {
        let name = Some(self.resource_name(resource));
        self.assert_declaring(&name);
        self.resources[resource.index()].extracted = true;
    }

    pub fn extracted_texture(&self, texture: GraphTexture) -> Option<ExtractedResource> {
        self.resources[texture.index()].extraction
    }
    pub fn extracted_buffer(&self, buffer: GraphBuffer) -> Option<ExtractedResource> {
        self.resources[buffer.index()].extraction
    }
    /// The access each subresource of an extracted texture was left in, indexed like
    /// `SubresourceLayout::index`.
    pub fn extracted_subresource_accesses(&self, texture: GraphTexture) -> Option<SmallVec<[Access; 4]>> {
        let data = &self.resources[texture.index()];
        data.extraction?;
        let states = self.compiled.as_ref()?.tracker.states(texture.resource());
        let accesses = (0..data.layout.count())
            .map(|subresource| {
                let state = states.get(subresource);
                if state.is_untouched() {
                    data.acquired_access
                } else {
                    state.access
                }
            })
            .collect();
        Some(accesses)
    }

    /// Outstanding accesses, the declared count before execution and zero after its last use.
    pub fn resource_refcount(&self, resource: impl Into<GraphResource>) -> u32 {
        self.resources[resource.into().index()].refcount
    }
    /// The allocation currently bound to a resource.
    pub fn resource_backing(&self, resource: impl Into<GraphResource>) -> Option<PooledResource> {
        self.resources[resource.into().index()].backing
    }
    pub fn pass_pipe(&self, pass: GraphPass) -> Pipe {
        self.passes[pass.index()].pipe
    }
    /// The passes `pass` depends on and whether each edge is hard.
    pub fn dependencies(&self, pass: GraphPass) -> impl Iterator<Item = (GraphPass, bool)> + '_ {
        self.passes[pass.index()]
            .dependencies
            .iter()
            .map(|d| (d.get_pass(), d.is_hard()))
    }
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }
    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }

    /// Declares a COMPUTE, ASYNC_COMPUTE or COPY pass, its body only ever sees a
    /// `ComputeCommandList`.
    pub fn add_pass(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        params: PassParameters,
        flags: PassFlags,
        body: PassBody<'a>,
    ) -> GraphPass {
        self.declare_pass(name.into(), params, flags, body.into_callback())
    }

    /// Declares a RASTER pass, `flags` carries the modifiers (NEVER_CULL, NEVER_MERGE, ..).
    pub fn add_raster_pass(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        params: PassParameters,
        flags: PassFlags,
        body: impl FnOnce(&mut GraphicsCommandList<'_>) + 'a,
    ) -> GraphPass {
        let callback = PassCallback::Graphics(Box::new(body));
        self.declare_pass(name.into(), params, flags | PassFlags::RASTER, callback)
    }

    fn declare_pass(
        &mut self,
        name: Cow<'static, str>,
        params: PassParameters,
        mut flags: PassFlags,
        body: PassCallback<'a>,
    ) -> GraphPass {
        let name = Some(name);
        self.assert_declaring(&name);
        let pass = GraphPass::new(self.passes.len());
        let graphics_body = matches!(body, PassCallback::Graphics(_));

        let entries = self.expand_parameters(&params);
        if self.validate {
            if let Err(error) = self.validate_pass(&name, &params, &entries, flags, graphics_body) {
                self.validation_failure(error);
            }
        }
        // the callback decides the command list, the pipe bits follow it
        if graphics_body {
            flags.remove(PassFlags::COMPUTE | PassFlags::ASYNC_COMPUTE);
        } else {
            flags.remove(PassFlags::RASTER);
        }

        let demands = self.merge_demands(&name, &entries);
        let pipe = if flags.contains(PassFlags::ASYNC_COMPUTE)
            && self.config.enable_async_compute
            && !self.config.force_immediate_execution
        {
            Pipe::AsyncCompute
        } else {
            Pipe::Graphics
        };

        let data = PassData {
            flags,
            pipe,
            params,
            demands,
            dependencies: Vec::new(),
            body: Some(body),
            synthetic: false,
        };
        self.push_pass(name, data);
        trace!("Added {} on {}", self.pass_name(pass), pipe);

        if self.config.force_immediate_execution {
            self.execute_immediate(pass);
        }
        pass
    }

    /// Every access of a parameter set, with bound uniform buffers expanded in place.
    fn expand_parameters(&self, params: &PassParameters) -> SmallVec<[ParameterEntry; 16]> {
        let mut entries: SmallVec<[ParameterEntry; 16]> = params.accesses().collect();
        for ub in &params.uniform_buffers {
            if let Some(buffer) = self.uniform_buffers.get(ub.index()) {
                entries.extend(buffer.entries.iter().copied());
            }
        }
        entries
    }

    fn validate_pass(
        &self,
        name: &Option<Cow<'static, str>>,
        params: &PassParameters,
        entries: &[ParameterEntry],
        flags: PassFlags,
        graphics_body: bool,
    ) -> Result<(), ValidationError> {
        let pass = || name.clone().unwrap_or(Cow::Borrowed("unnamed pass"));
        let invalid = |reason: &str| ValidationError::InvalidPassFlags {
            pass: pass(),
            reason: reason.to_owned(),
        };
        let malformed = |reason: String| ValidationError::MalformedParameters {
            pass: pass(),
            reason,
        };

        let kind = flags & (PassFlags::RASTER | PassFlags::COMPUTE | PassFlags::ASYNC_COMPUTE);
        if (flags & PassFlags::TYPE_MASK).is_empty() {
            return Err(invalid(
                "one of RASTER, COMPUTE, ASYNC_COMPUTE or COPY is required",
            ));
        }
        if kind.bits().count_ones() > 1 {
            return Err(invalid(
                "RASTER, COMPUTE and ASYNC_COMPUTE are mutually exclusive",
            ));
        }
        let raster = flags.contains(PassFlags::RASTER);
        let compute = flags.intersects(PassFlags::COMPUTE | PassFlags::ASYNC_COMPUTE);
        if raster && !params.has_render_targets() {
            return Err(invalid("RASTER passes need render target bindings"));
        }
        if !raster && params.has_render_targets() {
            return Err(invalid("render target bindings need RASTER"));
        }
        if !raster && flags.intersects(PassFlags::SKIP_RENDER_PASS | PassFlags::NEVER_MERGE) {
            return Err(invalid("SKIP_RENDER_PASS and NEVER_MERGE only apply to RASTER passes"));
        }
        if raster && !graphics_body {
            return Err(invalid("RASTER passes are declared with add_raster_pass"));
        }
        if params.is_empty() && !flags.contains(PassFlags::NEVER_CULL) {
            return Err(invalid("passes without parameters must be NEVER_CULL"));
        }

        for ub in &params.uniform_buffers {
            if ub.index() >= self.uniform_buffers.len() {
                return Err(malformed(format!("uniform buffer #{} does not exist", ub.index())));
            }
        }

        for (i, entry) in entries.iter().enumerate() {
            let access = entry.access;
            let Some(resource) = self.resources.get(entry.resource.index()) else {
                return Err(malformed(format!(
                    "resource #{} does not exist",
                    entry.resource.index()
                )));
            };
            let resource_name = self.resource_name(entry.resource);

            if access.is_unknown() {
                return Err(malformed(format!("`{resource_name}` is accessed with no access")));
            }
            if access.contains(Access::PRESENT) {
                return Err(invalid("PRESENT is only valid as the final access of an external resource"));
            }
            // bindings come after the plain entries in `accesses()`
            let is_binding = i >= params.entries.len()
                && i < params.entries.len() + params.render_targets.len() + params.depth_stencil.is_some() as usize;
            if !is_binding && access.intersects(Access::RTV | Access::DSV_READ | Access::DSV_WRITE) {
                return Err(malformed(format!(
                    "`{resource_name}` must be bound as a render target or depth stencil"
                )));
            }
            if access.intersects(Access::GRAPHICS_STAGE_MASK) && !raster {
                return Err(invalid("graphics stage accesses need RASTER"));
            }
            if access.intersects(Access::COMPUTE_STAGE_MASK) && !compute {
                return Err(invalid("compute stage accesses need COMPUTE or ASYNC_COMPUTE"));
            }
            if access.intersects(Access::COPY_MASK) && !flags.contains(PassFlags::COPY) {
                return Err(invalid("copy accesses need COPY"));
            }
            if access.contains(Access::INDIRECT_ARGS) && !(raster || compute) {
                return Err(invalid("indirect arguments need RASTER, COMPUTE or ASYNC_COMPUTE"));
            }
            if access.is_writable() && resource.flags().contains(ResourceFlags::READ_ONLY) {
                return Err(malformed(format!("`{resource_name}` is read only but written")));
            }
            if let Err(reason) = check_usage(&resource.desc, access) {
                return Err(malformed(format!("`{resource_name}` {reason}")));
            }
            if entry.range.is_some() && !resource.desc.is_texture() {
                return Err(malformed(format!(
                    "`{resource_name}` is a buffer and can't be accessed by subresource"
                )));
            }
            let range = resolve_range(entry.range, resource.layout);
            if !range.fits(resource.layout) {
                return Err(malformed(format!(
                    "{range:?} is out of bounds of `{resource_name}`"
                )));
            }
        }
        Ok(())
    }

    /// Folds all parameters touching the same resource into one demand.
    fn merge_demands(
        &self,
        name: &Option<Cow<'static, str>>,
        entries: &[ParameterEntry],
    ) -> Vec<(GraphResource, ResourceDemand)> {
        let mut demands: Vec<(GraphResource, ResourceDemand)> = Vec::new();
        for entry in entries {
            let Some(resource) = self.resources.get(entry.resource.index()) else {
                continue;
            };
            let layout = resource.layout;
            let range = resolve_range(entry.range, layout);
            if !range.fits(layout) {
                continue;
            }
            let demand = SubresourceDemand {
                access: entry.access,
                no_barrier: entry.no_barrier.filter(|_| entry.access.is_uav()),
            };

            let existing = demands.iter().position(|(r, _)| *r == entry.resource);
            let Some(i) = existing else {
                let new = if range.is_whole(layout) {
                    ResourceDemand::Whole(demand)
                } else {
                    let mut split = vec![None; layout.count() as usize];
                    for sub in range.indices(layout) {
                        split[sub as usize] = Some(demand);
                    }
                    ResourceDemand::Split(split)
                };
                demands.push((entry.resource, new));
                continue;
            };

            let merged = &mut demands[i].1;
            if let (ResourceDemand::Whole(current), true) = (&*merged, range.is_whole(layout)) {
                let combined = self.merge_or_report(name, entry.resource, *current, demand);
                *merged = ResourceDemand::Whole(combined);
                continue;
            }
            if let ResourceDemand::Whole(current) = *merged {
                *merged = ResourceDemand::Split(vec![Some(current); layout.count() as usize]);
            }
            if let ResourceDemand::Split(split) = merged {
                for sub in range.indices(layout) {
                    let slot = &mut split[sub as usize];
                    *slot = Some(match *slot {
                        Some(current) => self.merge_or_report(name, entry.resource, current, demand),
                        None => demand,
                    });
                }
            }
        }
        for (_, demand) in &mut demands {
            demand.try_coalesce();
        }
        demands.sort_by_key(|(r, _)| *r);
        demands
    }

    fn merge_or_report(
        &self,
        name: &Option<Cow<'static, str>>,
        resource: GraphResource,
        current: SubresourceDemand,
        new: SubresourceDemand,
    ) -> SubresourceDemand {
        match current.merge(new) {
            Some(merged) => merged,
            None => {
                self.validation_failure(ValidationError::ConflictingPassAccess {
                    pass: name.clone().unwrap_or(Cow::Borrowed("unnamed pass")),
                    resource: self.resource_name(resource),
                });
                SubresourceDemand {
                    access: current.access | new.access,
                    no_barrier: None,
                }
            }
        }
    }

    /// Appends a pass, deriving its dependency edges from the resources it demands.
    pub(crate) fn push_pass(&mut self, name: Option<Cow<'static, str>>, mut data: PassData<'a>) -> GraphPass {
        let pass = GraphPass::new(self.passes.len());
        let mut dependencies = Vec::new();

        for (resource, demand) in &data.demands {
            let writes = demand.writes();
            let touched = demand.touched(self.resources[resource.index()].layout.count());
            let resource_data = &mut self.resources[resource.index()].inner;

            if let Some(producer) = resource_data.producer.get() {
                dependencies.push(PassDependency::new(producer, true));
            }
            if writes {
                // the write must wait for everyone still reading the previous contents
                for &reader in &resource_data.readers {
                    dependencies.push(PassDependency::new(reader, false));
                }
                resource_data.readers.clear();
                resource_data.producer = pass.into();
                resource_data.produced = true;
            } else {
                // states are owned by a single pipe, reads on the other one need ordering too
                for &reader in &resource_data.readers {
                    if self.passes[reader.index()].pipe != data.pipe {
                        dependencies.push(PassDependency::new(reader, false));
                    }
                }
                resource_data.readers.push(pass);
            }
            if !data.synthetic {
                resource_data.refcount += touched;
            }
        }

        if self.validate && !data.synthetic {
            let unproduced: SmallVec<[GraphResource; 4]> = data
                .demands
                .iter()
                .filter(|(r, d)| {
                    let resource = &self.resources[r.index()];
                    !d.writes() && !resource.produced && !resource.is_external()
                })
                .map(|(r, _)| *r)
                .collect();
            for resource in unproduced {
                let warning = ValidationWarning::ReadBeforeWrite {
                    pass: name.clone().unwrap_or(Cow::Borrowed("unnamed pass")),
                    resource: self.resource_name(resource),
                };
                self.report_warning(warning);
            }
        }

        dependencies.sort_by_key(|d| d.index());
        dependencies.dedup_by(|next, kept| {
            if next.index() == kept.index() {
                *kept = kept.set_hard(kept.is_hard() || next.is_hard());
                true
            } else {
                false
            }
        });
        assert!(
            dependencies.iter().all(|d| d.index() < pass.index()),
            "Dependencies must point to earlier passes"
        );

        data.dependencies = dependencies;
        self.passes.push(GraphObject::new(name, data));
        pass
    }

    /// Adds a hard edge from the current producer of `resource`, used by the epilogue for outputs.
    pub(crate) fn depend_on_producer(&mut self, pass: GraphPass, resource: GraphResource) {
        let Some(producer) = self.resources[resource.index()].producer.get() else {
            return;
        };
        if producer == pass {
            return;
        }
        let dependencies = &mut self.passes[pass.index()].dependencies;
        match dependencies.binary_search_by_key(&producer.index(), |d| d.index()) {
            Ok(i) => dependencies[i] = dependencies[i].set_hard(true),
            Err(i) => dependencies.insert(i, PassDependency::new(producer, true)),
        }
    }

    /// Whether the allocation stays bound until the whole graph has executed.
    pub(crate) fn holds_to_end(&self, resource: GraphResource) -> bool {
        let data = &self.resources[resource.index()];
        data.is_external()
            || data.extracted
            || data.flags().contains(ResourceFlags::MULTI_FRAME)
            || self.config.extend_resource_lifetimes
            || self.config.force_immediate_execution
    }
}

/// Checks that the descriptor was created with the usage an access needs.
fn check_usage(desc: &ResourceDesc, access: Access) -> Result<(), String> {
    let missing = |usage: &str| Err(format!("lacks {usage} usage for {access}"));
    match desc {
        ResourceDesc::Texture(desc) => {
            let usage = desc.usage;
            let needs = [
                (Access::SRV_MASK, TextureUsage::SHADER_RESOURCE, "SHADER_RESOURCE"),
                (Access::UAV_MASK, TextureUsage::UNORDERED_ACCESS, "UNORDERED_ACCESS"),
                (Access::RTV, TextureUsage::RENDER_TARGET, "RENDER_TARGET"),
                (Access::DSV_READ | Access::DSV_WRITE, TextureUsage::DEPTH_STENCIL, "DEPTH_STENCIL"),
                (Access::COPY_SRC, TextureUsage::COPY_SRC, "COPY_SRC"),
                (Access::COPY_DST, TextureUsage::COPY_DST, "COPY_DST"),
            ];
            for (mask, needed, name) in needs {
                if access.intersects(mask) && !usage.contains(needed) {
                    return missing(name);
                }
            }
            if access.intersects(Access::VERTEX_OR_INDEX | Access::INDIRECT_ARGS) {
                return Err(format!("is a texture and can't be used as {access}"));
            }
        }
        ResourceDesc::Buffer(desc) => {
            let usage = desc.usage;
            let needs = [
                (Access::SRV_MASK, BufferUsage::SHADER_RESOURCE | BufferUsage::UNIFORM, "SHADER_RESOURCE"),
                (Access::UAV_MASK, BufferUsage::UNORDERED_ACCESS, "UNORDERED_ACCESS"),
                (Access::VERTEX_OR_INDEX, BufferUsage::VERTEX | BufferUsage::INDEX, "VERTEX or INDEX"),
                (Access::INDIRECT_ARGS, BufferUsage::INDIRECT_ARGS, "INDIRECT_ARGS"),
                (Access::COPY_SRC, BufferUsage::COPY_SRC, "COPY_SRC"),
                (Access::COPY_DST, BufferUsage::COPY_DST, "COPY_DST"),
            ];
            for (mask, needed, name) in needs {
                if access.intersects(mask) && !usage.intersects(needed) {
                    return missing(name);
                }
            }
            if access.intersects(Access::RTV | Access::DSV_READ | Access::DSV_WRITE) {
                return Err(format!("is a buffer and can't be used as {access}"));
            }
        }
    }
    Ok(())
}
