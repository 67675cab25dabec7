use log::debug;

use crate::{Object, Value, Visitable};

pub const DEFAULT_GC_THRESHOLD: usize = 4096;
const MIN_GC_THRESHOLD: usize = 64;

// TODO: grow the threshold with the live set like a generational heap would,
// a fixed threshold collects too often once many objects are anchored
#[derive(Debug)]
pub struct HeapSettings {
    /// allocations between two collections at a safepoint
    pub gc_threshold: usize,
    pub initial_capacity: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            initial_capacity: 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GarbageCollectionStats {
    pub collections: usize,
    pub freed: usize,
    pub live: usize,
    pub allocations: usize,
}

#[derive(Debug)]
pub struct HeapEntry {
    /// datatype of the object
    pub ty: Value,
    pub object: Object,
    marked: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<HeapEntry>,
}

/// Slot heap with a stop-the-world mark-and-sweep collector.
///
/// Values name a slot and the generation it had at allocation, freeing a slot
/// bumps its generation so stale values never resolve.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    settings: HeapSettings,
    allocation_count: usize,
    pause_depth: usize,
    collection_requested: bool,
    stats: GarbageCollectionStats,
}

impl Heap {
    pub fn new(mut settings: HeapSettings) -> Self {
        settings.gc_threshold = settings.gc_threshold.max(MIN_GC_THRESHOLD);
        Self {
            slots: Vec::with_capacity(settings.initial_capacity),
            free_list: Vec::new(),
            settings,
            allocation_count: 0,
            pause_depth: 0,
            collection_requested: false,
            stats: GarbageCollectionStats::default(),
        }
    }

    pub fn allocate(&mut self, ty: Value, object: Object) -> Value {
        self.allocation_count += 1;
        self.stats.allocations += 1;
        if self.allocation_count >= self.settings.gc_threshold {
            self.collection_requested = true;
        }

        let entry = HeapEntry {
            ty,
            object,
            marked: false,
        };

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return Value::from_parts(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            entry: Some(entry),
        });
        Value::from_parts(index, 1)
    }

    /// Patches the type header, only needed while bootstrapping `DataType`.
    pub fn set_type(&mut self, value: Value, ty: Value) {
        if let Some(entry) = self.get_mut(value) {
            entry.ty = ty;
        }
    }

    #[inline]
    pub fn get(&self, value: Value) -> Option<&HeapEntry> {
        let slot = self.slots.get(value.index() as usize)?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, value: Value) -> Option<&mut HeapEntry> {
        let slot = self.slots.get_mut(value.index() as usize)?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    #[inline]
    pub fn contains(&self, value: Value) -> bool {
        self.get(value).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn stats(&self) -> GarbageCollectionStats {
        GarbageCollectionStats {
            live: self.live_count(),
            ..self.stats
        }
    }

    pub fn pause(&mut self) {
        self.pause_depth += 1;
    }

    pub fn resume(&mut self) {
        debug_assert!(self.pause_depth > 0, "unbalanced collection resume");
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.pause_depth > 0
    }

    pub fn request_collection(&mut self) {
        self.collection_requested = true;
    }

    /// `true` at a safepoint where a collection is due and allowed
    pub fn should_collect(&self) -> bool {
        self.collection_requested && !self.is_paused()
    }

    /// Marks everything reachable from `roots` and frees the rest.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        debug_assert!(!self.is_paused(), "collection while paused");

        let mut worklist: Vec<Value> = roots.to_vec();
        while let Some(value) = worklist.pop() {
            let Some(entry) = self.get_mut(value) else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            worklist.push(entry.ty);
            entry.object.visit_edges(&mut |edge: Value| worklist.push(edge));
        }

        let freed = self.sweep();
        self.allocation_count = 0;
        self.collection_requested = false;
        self.stats.collections += 1;
        self.stats.freed += freed;
        debug!(
            "collection #{} freed {} objects, {} live",
            self.stats.collections,
            freed,
            self.live_count()
        );
        freed
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            if entry.marked {
                entry.marked = false;
                continue;
            }
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1).max(1);
            self.free_list.push(index as u32);
            freed += 1;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArrayObject, BitsKind, BitsObject};

    fn bits(value: i64) -> Object {
        Object::Bits(BitsObject {
            kind: BitsKind::Int64,
            bits: value as u64,
        })
    }

    fn heap() -> Heap {
        Heap::new(HeapSettings::default())
    }

    #[test]
    fn allocation_returns_resolvable_values() {
        let mut heap = heap();
        let a = heap.allocate(Value::NULL, bits(1));
        let b = heap.allocate(Value::NULL, bits(2));
        assert_ne!(a, b);
        assert!(matches!(
            heap.get(b).map(|e| &e.object),
            Some(Object::Bits(BitsObject { bits: 2, .. }))
        ));
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = heap();
        let kept = heap.allocate(Value::NULL, bits(1));
        let lost = heap.allocate(Value::NULL, bits(2));

        let freed = heap.collect(&[kept]);

        assert_eq!(freed, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(lost));
    }

    #[test]
    fn edges_keep_children_alive() {
        let mut heap = heap();
        let child = heap.allocate(Value::NULL, bits(7));
        let parent = heap.allocate(
            Value::NULL,
            Object::Array(ArrayObject::vector(vec![child])),
        );

        heap.collect(&[parent]);
        assert!(heap.contains(child));

        heap.collect(&[]);
        assert!(!heap.contains(parent));
        assert!(!heap.contains(child));
    }

    #[test]
    fn reused_slots_do_not_resolve_stale_values() {
        let mut heap = heap();
        let stale = heap.allocate(Value::NULL, bits(1));
        heap.collect(&[]);

        let fresh = heap.allocate(Value::NULL, bits(2));
        assert_eq!(stale.index(), fresh.index());
        assert!(heap.get(stale).is_none());
        assert!(heap.get(fresh).is_some());
    }

    #[test]
    fn threshold_requests_collection_but_pause_defers_it() {
        let mut heap = Heap::new(HeapSettings {
            gc_threshold: MIN_GC_THRESHOLD,
            ..Default::default()
        });
        heap.pause();
        for i in 0..MIN_GC_THRESHOLD {
            heap.allocate(Value::NULL, bits(i as i64));
        }
        assert!(!heap.should_collect());
        heap.resume();
        assert!(heap.should_collect());

        heap.collect(&[]);
        assert!(!heap.should_collect());
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn pause_is_reentrant() {
        let mut heap = heap();
        heap.pause();
        heap.pause();
        heap.resume();
        assert!(heap.is_paused());
        heap.resume();
        assert!(!heap.is_paused());
    }
}
