use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    ClassId, Header, HeaderFlags, HeapError, HeapObject, Object, ObjectId, Value, ValueKind,
    Visitable, Visitor,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Space {
    New,
    Old,
}

#[derive(Debug, Default)]
pub struct HeapCreateInfo {
    /// total bytes both spaces may hold
    pub capacity: usize,
    // share of the capacity reserved for new space in discrete percent
    pub new_space_percent: Option<usize>,
    // object alignment in bytes, must be a power of two of at least one word
    pub alignment: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HeapSettings {
    pub capacity: usize,
    pub new_space_percent: usize,
    pub alignment: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            new_space_percent: 25,
            alignment: 16,
        }
    }
}

impl HeapSettings {
    pub fn from_info(info: &HeapCreateInfo) -> Self {
        let mut settings = Self::default();
        if info.capacity != 0 {
            settings.capacity = info.capacity;
        }
        info.new_space_percent
            .inspect(|&val| settings.new_space_percent = val.min(100));
        info.alignment.inspect(|&val| settings.alignment = val);
        debug_assert!(settings.alignment.is_power_of_two() && settings.alignment >= 8);
        settings
    }

    fn new_space_capacity(&self) -> usize {
        self.capacity * self.new_space_percent / 100
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AllocationStats {
    pub count: u64,
    pub bytes: u64,
}

pub struct HeapCell {
    pub header: Header,
    body: RwLock<Object>,
}

impl HeapCell {
    pub fn class_id(&self) -> ClassId {
        self.header.class_id()
    }
}

#[derive(Default)]
struct RootTable {
    slots: Vec<Option<Value>>,
    free: Vec<usize>,
}

pub struct HeapShared {
    settings: HeapSettings,
    cells: RwLock<Vec<Arc<HeapCell>>>,
    used: AtomicUsize,
    new_used: AtomicUsize,
    marking: AtomicBool,
    remembered: Mutex<Vec<ObjectId>>,
    stats: Mutex<Vec<AllocationStats>>,
    roots: Mutex<RootTable>,
}

/// Arena heap, every object is addressed by its `ObjectId`.
#[derive(Clone)]
pub struct Heap {
    inner: Arc<HeapShared>,
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Self {
        let settings = HeapSettings::from_info(&info);
        log::debug!("creating heap with {settings:?}");
        Self {
            inner: Arc::new(HeapShared {
                settings,
                cells: RwLock::new(Vec::new()),
                used: AtomicUsize::new(0),
                new_used: AtomicUsize::new(0),
                marking: AtomicBool::new(false),
                remembered: Mutex::new(Vec::new()),
                stats: Mutex::new(Vec::new()),
                roots: Mutex::new(RootTable::default()),
            }),
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.inner.settings
    }

    pub fn alignment(&self) -> usize {
        self.inner.settings.alignment
    }

    pub fn len(&self) -> usize {
        self.inner.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    // ── allocation ─────────────────────────────────────────────────

    /// Allocates `object` in `space`.
    ///
    /// Objects arrive fully initialized, constructors fill pointer slots with
    /// null before any field is set. New space overflow falls back to old
    /// space, old space overflow is an out-of-memory error.
    pub fn allocate(&self, object: Object, space: Space) -> Result<ObjectId, HeapError> {
        let size = object.heap_size(self.alignment());
        self.check_size(size)?;
        let cid = object.class_id();
        let space = self.reserve(size, space)?;

        let mut flags = HeaderFlags::empty();
        if space == Space::Old {
            flags |= HeaderFlags::OLD;
            // black allocation, the marker will not visit this object again
            if self.inner.marking.load(Ordering::Acquire) {
                flags |= HeaderFlags::MARKED;
            }
        }
        let cell = Arc::new(HeapCell {
            header: Header::new(cid, size, flags),
            body: RwLock::new(object),
        });

        let id = {
            let mut cells = self.inner.cells.write();
            let id = ObjectId(cells.len() as u32);
            cells.push(cell);
            id
        };
        self.record_allocation(cid, size);
        log::trace!("allocated {id} {cid} ({size} bytes, {space:?})");
        Ok(id)
    }

    pub fn check_size(&self, size: usize) -> Result<(), HeapError> {
        let alignment = self.alignment();
        if size % alignment != 0 {
            return Err(HeapError::Misaligned { size, alignment });
        }
        Ok(())
    }

    fn reserve(&self, size: usize, space: Space) -> Result<Space, HeapError> {
        let settings = &self.inner.settings;
        let used = self.inner.used.fetch_add(size, Ordering::AcqRel);
        if used + size > settings.capacity {
            self.inner.used.fetch_sub(size, Ordering::AcqRel);
            return Err(HeapError::OutOfMemory {
                requested: size,
                used,
                capacity: settings.capacity,
            });
        }
        if space == Space::New {
            let new_used = self.inner.new_used.fetch_add(size, Ordering::AcqRel);
            if new_used + size > settings.new_space_capacity() {
                self.inner.new_used.fetch_sub(size, Ordering::AcqRel);
                return Ok(Space::Old);
            }
        }
        Ok(space)
    }

    fn record_allocation(&self, cid: ClassId, size: usize) {
        let mut stats = self.inner.stats.lock();
        if stats.len() <= cid.index() {
            stats.resize(cid.index() + 1, AllocationStats::default());
        }
        let entry = &mut stats[cid.index()];
        entry.count += 1;
        entry.bytes += size as u64;
    }

    pub fn allocation_stats(&self, cid: ClassId) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .get(cid.index())
            .copied()
            .unwrap_or_default()
    }

    /// Classes with at least one allocation, ordered by class id.
    pub fn all_allocation_stats(&self) -> Vec<(ClassId, AllocationStats)> {
        self.inner
            .stats
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, stats)| stats.count > 0)
            .map(|(cid, stats)| (ClassId(cid as u32), *stats))
            .collect()
    }

    // ── access ─────────────────────────────────────────────────────

    pub fn cell(&self, id: ObjectId) -> Arc<HeapCell> {
        let cells = self.inner.cells.read();
        match cells.get(id.index()) {
            Some(cell) => cell.clone(),
            None => panic!("dangling object reference {id}"),
        }
    }

    /// Class id of any value, smis included.
    pub fn class_id_of(&self, value: Value) -> ClassId {
        match value.kind() {
            ValueKind::Smi(_) => ClassId::SMI,
            ValueKind::Ref(id) => self.cell(id).class_id(),
        }
    }

    pub fn space_of(&self, id: ObjectId) -> Space {
        if self.cell(id).header.is_old() {
            Space::Old
        } else {
            Space::New
        }
    }

    pub fn is_canonical(&self, id: ObjectId) -> bool {
        self.cell(id).header.is_canonical()
    }

    pub fn set_canonical(&self, id: ObjectId) {
        self.cell(id).header.add_flag(HeaderFlags::CANONICAL);
    }

    pub fn with_object<R>(&self, id: ObjectId, f: impl FnOnce(&Object) -> R) -> R {
        let cell = self.cell(id);
        let body = cell.body.read_recursive();
        f(&body)
    }

    /// Reads a typed view of `id`, panics on a kind mismatch.
    pub fn read<T: HeapObject, R>(&self, id: ObjectId, f: impl FnOnce(&T) -> R) -> R {
        let cell = self.cell(id);
        let body = cell.body.read_recursive();
        match T::cast(&body) {
            Some(object) => f(object),
            None => panic!("{id} is a {}, not a {}", body.kind_name(), T::NAME),
        }
    }

    pub fn try_read<T: HeapObject, R>(&self, id: ObjectId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.cell(id);
        let body = cell.body.read_recursive();
        T::cast(&body).map(f)
    }

    pub fn is<T: HeapObject>(&self, id: ObjectId) -> bool {
        self.try_read::<T, _>(id, |_| ()).is_some()
    }

    /// Mutates a typed view of `id` and runs the write barrier afterwards.
    ///
    /// The closure must not access `id` through the heap again.
    pub fn write<T: HeapObject, R>(&self, id: ObjectId, f: impl FnOnce(&mut T) -> R) -> R {
        let cell = self.cell(id);
        let result = {
            let mut body = cell.body.write();
            let kind = body.kind_name();
            match T::cast_mut(&mut body) {
                Some(object) => f(object),
                None => panic!("{id} is a {kind}, not a {}", T::NAME),
            }
        };
        self.rescan(id, &cell);
        result
    }

    pub fn mint_value(&self, id: ObjectId) -> Option<i64> {
        self.with_object(id, |object| match object {
            Object::Mint(value) => Some(*value),
            _ => None,
        })
    }

    pub fn double_value(&self, id: ObjectId) -> Option<f64> {
        self.with_object(id, |object| match object {
            Object::Double(value) => Some(*value),
            _ => None,
        })
    }

    pub fn bool_value(&self, id: ObjectId) -> Option<bool> {
        self.with_object(id, |object| match object {
            Object::Bool(value) => Some(*value),
            _ => None,
        })
    }

    pub fn visit_object(&self, id: ObjectId, visitor: &mut impl Visitor) {
        let cell = self.cell(id);
        cell.body.read_recursive().visit_edges(visitor);
    }

    // ── write barrier ──────────────────────────────────────────────

    /// Barrier for a single store of `value` into `holder`.
    pub fn store_barrier(&self, holder: ObjectId, value: Value) {
        let Some(target) = value.as_object() else {
            return;
        };
        let cell = self.cell(holder);
        if cell.header.is_old() && !self.cell(target).header.is_old() {
            self.remember(holder, &cell);
        }
    }

    // re-scan after a bulk rewrite, old objects pointing to new ones get remembered
    fn rescan(&self, id: ObjectId, cell: &HeapCell) {
        if !cell.header.is_old() || cell.header.is_remembered() {
            return;
        }
        let mut points_to_new = false;
        cell.body.read_recursive().visit_edges(&mut |value: Value| {
            if let Some(target) = value.as_object()
                && target != id
                && !self.cell(target).header.is_old()
            {
                points_to_new = true;
            }
        });
        if points_to_new {
            self.remember(id, cell);
        }
    }

    fn remember(&self, id: ObjectId, cell: &HeapCell) {
        if !cell.header.test_and_set(HeaderFlags::REMEMBERED) {
            self.inner.remembered.lock().push(id);
        }
    }

    pub fn remembered_set(&self) -> Vec<ObjectId> {
        self.inner.remembered.lock().clone()
    }

    // ── cloning & promotion ────────────────────────────────────────

    /// Copies a value-like object into `space`.
    pub fn clone_object(&self, id: ObjectId, space: Space) -> Result<ObjectId, HeapError> {
        let copy = self.with_object(id, |object| match object.try_clone() {
            Some(copy) => copy,
            None => panic!("{} objects cannot be cloned", object.kind_name()),
        });
        let clone = self.allocate(copy, space)?;
        let cell = self.cell(clone);
        self.rescan(clone, &cell);
        Ok(clone)
    }

    /// Old space copy of `id`, or `id` itself if it already lives there.
    pub fn promote(&self, id: ObjectId) -> Result<ObjectId, HeapError> {
        if self.cell(id).header.is_old() {
            return Ok(id);
        }
        self.clone_object(id, Space::Old)
    }

    // ── marking ────────────────────────────────────────────────────

    pub fn begin_marking(&self) {
        self.inner.marking.store(true, Ordering::Release);
    }

    pub fn end_marking(&self) {
        self.inner.marking.store(false, Ordering::Release);
    }

    pub fn is_marking(&self) -> bool {
        self.inner.marking.load(Ordering::Acquire)
    }

    pub fn clear_marks(&self) {
        for cell in self.inner.cells.read().iter() {
            cell.header.remove_flag(HeaderFlags::MARKED);
        }
    }

    /// Marks everything reachable from the root table and `extra` roots.
    /// Returns the number of newly marked objects.
    pub fn mark_from_roots(&self, extra: &[Value]) -> usize {
        let mut worklist: Vec<ObjectId> = extra.iter().filter_map(|v| v.as_object()).collect();
        self.visit_roots(&mut |value: Value| {
            if let Some(id) = value.as_object() {
                worklist.push(id);
            }
        });
        let mut marked = 0;
        while let Some(id) = worklist.pop() {
            let cell = self.cell(id);
            if cell.header.test_and_set(HeaderFlags::MARKED) {
                continue;
            }
            marked += 1;
            cell.body.read_recursive().visit_edges(&mut |value: Value| {
                if let Some(id) = value.as_object() {
                    worklist.push(id);
                }
            });
        }
        marked
    }

    pub fn is_marked(&self, id: ObjectId) -> bool {
        self.cell(id).header.is_marked()
    }

    // ── roots ──────────────────────────────────────────────────────

    /// Registers `value` as a root for the lifetime of the guard.
    pub fn root(&self, value: Value) -> Root<'_> {
        let mut roots = self.inner.roots.lock();
        let slot = match roots.free.pop() {
            Some(slot) => {
                roots.slots[slot] = Some(value);
                slot
            }
            None => {
                roots.slots.push(Some(value));
                roots.slots.len() - 1
            }
        };
        Root { heap: self, slot }
    }

    pub fn root_count(&self) -> usize {
        let roots = self.inner.roots.lock();
        roots.slots.len() - roots.free.len()
    }

    pub fn visit_roots(&self, visitor: &mut impl Visitor) {
        let values: Vec<Value> = self.inner.roots.lock().slots.iter().flatten().copied().collect();
        visitor.visit_all(&values);
    }
}

/// Scoped root, unregistered on drop.
pub struct Root<'h> {
    heap: &'h Heap,
    slot: usize,
}

impl Root<'_> {
    pub fn get(&self) -> Value {
        self.heap.inner.roots.lock().slots[self.slot].unwrap_or(Value::NULL)
    }

    pub fn set(&self, value: Value) {
        self.heap.inner.roots.lock().slots[self.slot] = Some(value);
    }
}

impl Drop for Root<'_> {
    fn drop(&mut self) {
        let mut roots = self.heap.inner.roots.lock();
        roots.slots[self.slot] = None;
        roots.free.push(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Array, Instance};

    fn mk_heap(capacity: usize) -> Heap {
        Heap::new(HeapCreateInfo {
            capacity,
            new_space_percent: Some(50),
            alignment: None,
        })
    }

    #[test]
    fn allocate_records_stats_and_header() {
        let heap = mk_heap(4096);
        let id = heap.allocate(Object::Mint(1 << 62), Space::Old).unwrap();
        let cell = heap.cell(id);
        assert_eq!(cell.class_id(), ClassId::MINT);
        assert_eq!(cell.header.size(), 16);
        assert!(cell.header.is_old());
        assert_eq!(heap.allocation_stats(ClassId::MINT).count, 1);
        assert_eq!(heap.allocation_stats(ClassId::MINT).bytes, 16);
        assert_eq!(heap.used_bytes(), 16);
    }

    #[test]
    fn out_of_memory_is_an_error() {
        let heap = mk_heap(32);
        heap.allocate(Object::Mint(1), Space::Old).unwrap();
        heap.allocate(Object::Mint(2), Space::Old).unwrap();
        let error = heap.allocate(Object::Mint(3), Space::Old).unwrap_err();
        assert!(matches!(error, HeapError::OutOfMemory { requested: 16, .. }));
        assert_eq!(heap.used_bytes(), 32, "failed allocation must not leak reserved bytes");
    }

    #[test]
    fn new_space_overflow_falls_back_to_old() {
        let heap = mk_heap(64);
        let a = heap.allocate(Object::Mint(1), Space::New).unwrap();
        let b = heap.allocate(Object::Mint(2), Space::New).unwrap();
        let c = heap.allocate(Object::Mint(3), Space::New).unwrap();
        assert_eq!(heap.space_of(a), Space::New);
        assert_eq!(heap.space_of(b), Space::New);
        assert_eq!(heap.space_of(c), Space::Old);
    }

    #[test]
    fn black_allocation_only_in_old_space_while_marking() {
        let heap = mk_heap(4096);
        heap.begin_marking();
        let old = heap.allocate(Object::Mint(1), Space::Old).unwrap();
        let young = heap.allocate(Object::Mint(2), Space::New).unwrap();
        heap.end_marking();
        let after = heap.allocate(Object::Mint(3), Space::Old).unwrap();
        assert!(heap.is_marked(old));
        assert!(!heap.is_marked(young));
        assert!(!heap.is_marked(after));
    }

    #[test]
    fn fresh_instances_are_null_filled() {
        let heap = mk_heap(4096);
        let id = heap
            .allocate(Instance::new(ClassId::NUM_PREDEFINED, 3).into(), Space::New)
            .unwrap();
        heap.read::<Instance, _>(id, |instance| {
            assert!(instance.fields.iter().all(|field| field.is_null()));
        });
    }

    #[test]
    fn write_barrier_remembers_old_to_new_stores() {
        let heap = mk_heap(4096);
        let holder = heap.allocate(Array::new(2, false).into(), Space::Old).unwrap();
        let young = heap.allocate(Object::Mint(9), Space::New).unwrap();
        let old = heap.allocate(Object::Mint(10), Space::Old).unwrap();

        heap.write::<Array, _>(holder, |array| array.set(0, old.value()));
        assert!(heap.remembered_set().is_empty(), "old to old needs no barrier");

        heap.write::<Array, _>(holder, |array| array.set(1, young.value()));
        assert_eq!(heap.remembered_set(), vec![holder]);

        heap.write::<Array, _>(holder, |array| array.set(1, young.value()));
        assert_eq!(heap.remembered_set().len(), 1, "remembered only once");
    }

    #[test]
    fn roots_unregister_on_drop() {
        let heap = mk_heap(4096);
        let id = heap.allocate(Object::Mint(1), Space::New).unwrap();
        {
            let root = heap.root(id.value());
            assert_eq!(heap.root_count(), 1);
            assert_eq!(root.get(), id.value());
            let _second = heap.root(Value::from_smi(3));
            assert_eq!(heap.root_count(), 2);
        }
        assert_eq!(heap.root_count(), 0);
        let again = heap.root(Value::NULL);
        assert_eq!(heap.root_count(), 1, "free slots are reused");
        drop(again);
    }

    #[test]
    fn marking_follows_edges_from_roots() {
        let heap = mk_heap(4096);
        let leaf = heap.allocate(Object::Mint(1), Space::Old).unwrap();
        let array = heap.allocate(Array::new(1, false).into(), Space::Old).unwrap();
        let unreachable = heap.allocate(Object::Mint(2), Space::Old).unwrap();
        heap.write::<Array, _>(array, |a| a.set(0, leaf.value()));

        let root = heap.root(array.value());
        assert_eq!(heap.mark_from_roots(&[]), 2);
        assert!(heap.is_marked(leaf));
        assert!(!heap.is_marked(unreachable));
        drop(root);
    }

    #[test]
    fn promote_copies_young_objects_once() {
        let heap = mk_heap(4096);
        let young = heap.allocate(Object::Double(2.5), Space::New).unwrap();
        let promoted = heap.promote(young).unwrap();
        assert_ne!(young, promoted);
        assert_eq!(heap.space_of(promoted), Space::Old);
        assert_eq!(heap.double_value(promoted), Some(2.5));
        assert_eq!(heap.promote(promoted).unwrap(), promoted);
    }

    #[test]
    #[should_panic(expected = "not a Array")]
    fn typed_read_rejects_wrong_kind() {
        let heap = mk_heap(4096);
        let id = heap.allocate(Object::Mint(1), Space::New).unwrap();
        heap.read::<Array, _>(id, |_| ());
    }
}
