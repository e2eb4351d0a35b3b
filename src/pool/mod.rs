//! Backing allocations shared by graph instances over time.
//!
//! A graph acquires an allocation the first time a pass touches a resource and
//! hands it back once the last pass using it has run, the next graph (usually the
//! next frame) can then pick up the same memory if its descriptor matches.

use crate::{
    graph::{simple_handle, Access, ResourceDesc},
    tracing::shim_macros::{debug, trace},
};

simple_handle! {
    /// An allocation owned by a [`ResourcePool`], stable until it is evicted.
    pub PooledResource
}

/// The device object behind a pooled allocation, created by a [`BackingAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackingId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredResource {
    pub resource: PooledResource,
    /// The access the memory was left in, `Unknown` for fresh allocations.
    pub initial_access: Access,
}

/// What a graph needs from whoever owns the memory.
pub trait ResourceAllocator {
    fn acquire(&mut self, desc: &ResourceDesc) -> AcquiredResource;
    fn release(&mut self, resource: PooledResource, final_access: Access);
    fn descriptor(&self, resource: PooledResource) -> Option<ResourceDesc>;
    /// Marks a frame boundary.
    fn tick(&mut self);
}

/// Creates and destroys the actual device objects.
pub trait BackingAllocator {
    fn create(&mut self, desc: &ResourceDesc, size: u64) -> BackingId;
    fn destroy(&mut self, backing: BackingId);
}

/// Hands out increasing ids and counts calls, for tests and headless runs.
#[derive(Default, Debug)]
pub struct NullBackingAllocator {
    next: u64,
    pub created: usize,
    pub destroyed: usize,
}

impl BackingAllocator for NullBackingAllocator {
    fn create(&mut self, _desc: &ResourceDesc, _size: u64) -> BackingId {
        let id = BackingId(self.next);
        self.next += 1;
        self.created += 1;
        id
    }
    fn destroy(&mut self, _backing: BackingId) {
        self.destroyed += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Buffer sizes are rounded up to this before matching.
    pub buffer_alignment: u64,
    /// Allocations nobody used for more ticks than this are destroyed.
    pub max_unused_ticks: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_alignment: 256,
            max_unused_ticks: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: usize,
    pub in_use: usize,
    pub allocated_bytes: u64,
    pub created_total: u64,
    pub reused_total: u64,
    pub evicted_total: u64,
}

struct PoolEntry {
    desc: ResourceDesc,
    size: u64,
    backing: BackingId,
    refs: u32,
    last_used: u64,
    last_access: Access,
    contents_valid: bool,
}

impl PoolEntry {
    fn matches(&self, desc: &ResourceDesc, size: u64) -> bool {
        match (&self.desc, desc) {
            (ResourceDesc::Texture(a), ResourceDesc::Texture(b)) => a == b,
            (ResourceDesc::Buffer(a), ResourceDesc::Buffer(b)) => {
                a.usage == b.usage && self.size == size
            }
            _ => false,
        }
    }
}

pub struct ResourcePool<B: BackingAllocator> {
    backing: B,
    config: PoolConfig,
    entries: Vec<Option<PoolEntry>>,
    free_slots: Vec<u32>,
    frame: u64,
    stats: PoolStats,
}

fn round_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

impl<B: BackingAllocator> ResourcePool<B> {
    pub fn new(backing: B) -> Self {
        Self::with_config(backing, PoolConfig::default())
    }
    pub fn with_config(backing: B, config: PoolConfig) -> Self {
        Self {
            backing,
            config,
            entries: Vec::new(),
            free_slots: Vec::new(),
            frame: 0,
            stats: PoolStats::default(),
        }
    }

    fn matching_size(&self, desc: &ResourceDesc) -> u64 {
        match desc {
            ResourceDesc::Texture(desc) => desc.byte_size(),
            ResourceDesc::Buffer(desc) => round_up(desc.size(), self.config.buffer_alignment),
        }
    }

    /// Returns an unreferenced allocation matching `desc`, creating one if none exists.
    ///
    /// Reused allocations come back with their contents marked invalid.
    pub fn find_or_allocate(&mut self, desc: &ResourceDesc) -> AcquiredResource {
        let desc = desc.without_flags();
        let size = self.matching_size(&desc);
        let frame = self.frame;

        let found = self.entries.iter_mut().enumerate().find_map(|(i, e)| match e {
            Some(entry) if entry.refs == 0 && entry.matches(&desc, size) => Some((i, entry)),
            _ => None,
        });

        if let Some((index, entry)) = found {
            entry.refs = 1;
            entry.last_used = frame;
            entry.contents_valid = false;
            self.stats.reused_total += 1;
            trace!("Reusing pooled allocation #{index} ({:?})", entry.backing);
            return AcquiredResource {
                resource: PooledResource::new(index),
                initial_access: entry.last_access,
            };
        }

        let backing = self.backing.create(&desc, size);
        let entry = PoolEntry {
            desc,
            size,
            backing,
            refs: 1,
            last_used: frame,
            last_access: Access::UNKNOWN,
            contents_valid: false,
        };
        let index = match self.free_slots.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                slot as usize
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.stats.created_total += 1;
        trace!("Created pooled allocation #{index} of {size} bytes");

        AcquiredResource {
            resource: PooledResource::new(index),
            initial_access: Access::UNKNOWN,
        }
    }

    /// Adds a reference to an allocation which is already held, for sharing it past a graph.
    pub fn add_ref(&mut self, resource: PooledResource) {
        let entry = self.entry_mut(resource);
        entry.refs += 1;
    }

    fn entry_mut(&mut self, resource: PooledResource) -> &mut PoolEntry {
        match self.entries.get_mut(resource.index()) {
            Some(Some(entry)) => entry,
            _ => panic!("Pooled resource #{} does not exist", resource.index()),
        }
    }
    fn entry(&self, resource: PooledResource) -> Option<&PoolEntry> {
        self.entries.get(resource.index()).and_then(Option::as_ref)
    }

    pub fn backing(&self, resource: PooledResource) -> Option<BackingId> {
        self.entry(resource).map(|e| e.backing)
    }
    pub fn contents_valid(&self, resource: PooledResource) -> bool {
        self.entry(resource).map_or(false, |e| e.contents_valid)
    }
    pub fn refs(&self, resource: PooledResource) -> u32 {
        self.entry(resource).map_or(0, |e| e.refs)
    }
    pub fn last_access(&self, resource: PooledResource) -> Option<Access> {
        self.entry(resource).map(|e| e.last_access)
    }
    pub fn frame(&self) -> u64 {
        self.frame
    }
    pub fn backing_allocator(&self) -> &B {
        &self.backing
    }

    pub fn allocated_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }
    /// Allocations that are currently not referenced by anyone.
    pub fn free_count(&self) -> usize {
        self.entries.iter().flatten().filter(|e| e.refs == 0).count()
    }
    pub fn stats(&self) -> PoolStats {
        let live = self.entries.iter().flatten();
        PoolStats {
            allocated: self.allocated_count(),
            in_use: self.allocated_count() - self.free_count(),
            allocated_bytes: live.map(|e| e.size).sum(),
            ..self.stats
        }
    }

    fn evict_unused(&mut self) {
        let frame = self.frame;
        let max_unused = self.config.max_unused_ticks;
        for (i, slot) in self.entries.iter_mut().enumerate() {
            let evict = match slot {
                Some(entry) => entry.refs == 0 && frame - entry.last_used > max_unused,
                None => false,
            };
            if evict {
                if let Some(entry) = slot.take() {
                    self.backing.destroy(entry.backing);
                    self.free_slots.push(i as u32);
                    self.stats.evicted_total += 1;
                }
            }
        }
    }
}

impl<B: BackingAllocator> ResourceAllocator for ResourcePool<B> {
    fn acquire(&mut self, desc: &ResourceDesc) -> AcquiredResource {
        self.find_or_allocate(desc)
    }
    fn release(&mut self, resource: PooledResource, final_access: Access) {
        let frame = self.frame;
        let entry = self.entry_mut(resource);
        assert!(
            entry.refs > 0,
            "Pooled resource #{} released more times than it was acquired",
            resource.index()
        );
        entry.refs -= 1;
        entry.last_used = frame;
        entry.last_access = final_access;
        entry.contents_valid = true;
    }
    fn descriptor(&self, resource: PooledResource) -> Option<ResourceDesc> {
        self.entry(resource).map(|e| e.desc)
    }
    fn tick(&mut self) {
        self.frame += 1;
        let before = self.allocated_count();
        self.evict_unused();
        let evicted = before - self.allocated_count();
        if evicted > 0 {
            debug!("Evicted {evicted} pooled allocations at frame {}", self.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BufferDesc, BufferUsage, Format, TextureDesc, TextureUsage};

    fn buffer(size: u32) -> ResourceDesc {
        ResourceDesc::Buffer(BufferDesc::new(1, size, BufferUsage::UNORDERED_ACCESS))
    }

    #[test]
    fn released_allocations_are_reused() {
        let mut pool = ResourcePool::new(NullBackingAllocator::default());
        let desc = ResourceDesc::Texture(TextureDesc::new_2d(
            Format::R8G8B8A8Unorm,
            64,
            64,
            TextureUsage::RENDER_TARGET,
        ));
        let first = pool.acquire(&desc);
        assert_eq!(first.initial_access, Access::UNKNOWN);

        // still referenced, a second request needs new memory
        let second = pool.acquire(&desc);
        assert_ne!(first.resource, second.resource);

        pool.release(first.resource, Access::RTV);
        assert!(pool.contents_valid(first.resource));
        let third = pool.acquire(&desc);
        assert_eq!(third.resource, first.resource);
        assert_eq!(third.initial_access, Access::RTV);
        assert!(!pool.contents_valid(third.resource));
        assert_eq!(pool.backing_allocator().created, 2);
        assert_eq!(pool.stats().reused_total, 1);
    }

    #[test]
    fn buffer_sizes_are_rounded() {
        let mut pool = ResourcePool::new(NullBackingAllocator::default());
        let small = pool.acquire(&buffer(100));
        pool.release(small.resource, Access::UAV_COMPUTE);

        // 200 rounds to the same 256 byte bucket
        let larger = pool.acquire(&buffer(200));
        assert_eq!(larger.resource, small.resource);
        pool.release(larger.resource, Access::UAV_COMPUTE);

        let different = pool.acquire(&buffer(300));
        assert_ne!(different.resource, small.resource);
        assert_eq!(pool.allocated_count(), 2);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn unused_allocations_are_evicted() {
        let config = PoolConfig {
            buffer_alignment: 256,
            max_unused_ticks: 2,
        };
        let mut pool = ResourcePool::with_config(NullBackingAllocator::default(), config);
        let kept = pool.acquire(&buffer(16));
        let dropped = pool.acquire(&buffer(16));
        pool.release(dropped.resource, Access::UNKNOWN);

        for _ in 0..3 {
            pool.tick();
        }
        assert_eq!(pool.allocated_count(), 1);
        assert_eq!(pool.backing_allocator().destroyed, 1);
        assert!(pool.descriptor(dropped.resource).is_none());
        assert!(pool.descriptor(kept.resource).is_some());

        // the freed slot is recycled
        let again = pool.acquire(&buffer(16));
        assert_eq!(again.resource, dropped.resource);
        assert_eq!(pool.stats().evicted_total, 1);
    }
}
