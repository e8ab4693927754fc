//! Metadata attached to compiled code: pc descriptors, exception handler
//! tables, local variable descriptors and object pools.
use bitflags::bitflags;

use crate::{Isolate, ObjectError, ObjectId, ObjectResult, Space, TokenPosition, Value, Visitable, Visitor};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PcDescriptorKind: u8 {
        const DEOPT = 1 << 0;
        const IC_CALL = 1 << 1;
        const UNOPT_STATIC_CALL = 1 << 2;
        const RUNTIME_CALL = 1 << 3;
        const OSR_ENTRY = 1 << 4;
        const REWIND = 1 << 5;
        const OTHER = 1 << 6;
    }
}

pub const INVALID_TRY_INDEX: i32 = -1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcDescriptor {
    pub kind: PcDescriptorKind,
    pub pc_offset: u32,
    pub deopt_id: i32,
    pub token_pos: TokenPosition,
    pub try_index: i32,
}

fn write_uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_sleb(out: &mut Vec<u8>, value: i64) {
    // zigzag keeps small negative deltas short
    write_uleb(out, ((value << 1) ^ (value >> 63)) as u64);
}

fn read_uleb(bytes: &[u8], cursor: &mut usize) -> u64 {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = bytes[*cursor];
        *cursor += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return result;
        }
        shift += 7;
    }
}

fn read_sleb(bytes: &[u8], cursor: &mut usize) -> i64 {
    let raw = read_uleb(bytes, cursor);
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Pc descriptors, every entry stored as deltas to the previous one.
#[derive(Debug, Clone, Default)]
pub struct PcDescriptors {
    encoded: Box<[u8]>,
    len: usize,
}

impl PcDescriptors {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    pub fn iter(&self, kinds: PcDescriptorKind) -> PcDescriptorIter<'_> {
        PcDescriptorIter {
            bytes: &self.encoded,
            cursor: 0,
            kinds,
            current: PcDescriptor {
                kind: PcDescriptorKind::empty(),
                pc_offset: 0,
                deopt_id: 0,
                token_pos: TokenPosition(0),
                try_index: INVALID_TRY_INDEX,
            },
        }
    }

    pub fn iter_all(&self) -> PcDescriptorIter<'_> {
        self.iter(PcDescriptorKind::all())
    }
}

pub struct PcDescriptorIter<'a> {
    bytes: &'a [u8],
    cursor: usize,
    kinds: PcDescriptorKind,
    current: PcDescriptor,
}

impl Iterator for PcDescriptorIter<'_> {
    type Item = PcDescriptor;

    fn next(&mut self) -> Option<PcDescriptor> {
        while self.cursor < self.bytes.len() {
            let header = read_sleb(self.bytes, &mut self.cursor);
            let current = &mut self.current;
            current.kind = PcDescriptorKind::from_bits_truncate((header & 0xff) as u8);
            current.try_index = (header >> 8) as i32;
            current.pc_offset = (i64::from(current.pc_offset) + read_sleb(self.bytes, &mut self.cursor)) as u32;
            current.deopt_id = (i64::from(current.deopt_id) + read_sleb(self.bytes, &mut self.cursor)) as i32;
            current.token_pos =
                TokenPosition((i64::from(current.token_pos.0) + read_sleb(self.bytes, &mut self.cursor)) as i32);
            if self.kinds.intersects(current.kind) {
                return Some(*current);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct PcDescriptorsBuilder {
    encoded: Vec<u8>,
    len: usize,
    previous_pc: u32,
    previous_deopt_id: i32,
    previous_token_pos: i32,
}

impl PcDescriptorsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, descriptor: PcDescriptor) {
        debug_assert_eq!(descriptor.kind.bits().count_ones(), 1, "one kind per descriptor");
        let header = (i64::from(descriptor.try_index) << 8) | i64::from(descriptor.kind.bits());
        write_sleb(&mut self.encoded, header);
        write_sleb(&mut self.encoded, i64::from(descriptor.pc_offset) - i64::from(self.previous_pc));
        write_sleb(&mut self.encoded, i64::from(descriptor.deopt_id) - i64::from(self.previous_deopt_id));
        write_sleb(&mut self.encoded, i64::from(descriptor.token_pos.0) - i64::from(self.previous_token_pos));
        self.previous_pc = descriptor.pc_offset;
        self.previous_deopt_id = descriptor.deopt_id;
        self.previous_token_pos = descriptor.token_pos.0;
        self.len += 1;
    }

    pub fn finish(self) -> PcDescriptors {
        PcDescriptors {
            encoded: self.encoded.into_boxed_slice(),
            len: self.len,
        }
    }
}

// ── exception handlers ─────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub outer_try_index: i32,
    pub handler_pc_offset: u32,
    pub needs_stacktrace: bool,
    pub has_catch_all: bool,
    pub is_generated: bool,
}

/// Per try index: where its handler starts and which types it catches.
#[derive(Debug, Default)]
pub struct ExceptionHandlers {
    entries: Vec<(HandlerInfo, Option<Vec<ObjectId>>)>,
}

impl ExceptionHandlers {
    pub fn new(num_handlers: usize) -> Self {
        let empty = HandlerInfo {
            outer_try_index: INVALID_TRY_INDEX,
            handler_pc_offset: 0,
            needs_stacktrace: false,
            has_catch_all: false,
            is_generated: false,
        };
        Self {
            entries: vec![(empty, None); num_handlers],
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn handler_info(&self, try_index: usize) -> HandlerInfo {
        self.entries[try_index].0
    }

    pub fn set_handler_info(&mut self, try_index: usize, info: HandlerInfo) {
        self.entries[try_index].0 = info;
    }

    pub fn handled_types(&self, try_index: usize) -> &[ObjectId] {
        self.entries[try_index].1.as_deref().unwrap_or_default()
    }

    pub fn set_handled_types(&mut self, try_index: usize, types: Vec<ObjectId>) {
        self.entries[try_index].1 = Some(types);
    }

    pub fn has_catch_all(&self, try_index: usize) -> bool {
        self.entries[try_index].0.has_catch_all
    }
}

impl Visitable for ExceptionHandlers {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for (_, types) in &self.entries {
            if let Some(types) = types {
                visitor.visit_ids(types);
            }
        }
    }
}

// ── local variables ────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalVarKind {
    StackVar,
    ContextVar,
    ContextLevel,
    SavedCurrentContext,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalVarInfo {
    pub kind: LocalVarKind,
    pub scope_id: u32,
    pub begin_pos: TokenPosition,
    pub end_pos: TokenPosition,
    pub index: i32,
}

#[derive(Debug, Default)]
pub struct LocalVarDescriptors {
    variables: Vec<(ObjectId, LocalVarInfo)>,
}

impl LocalVarDescriptors {
    pub fn new(variables: Vec<(ObjectId, LocalVarInfo)>) -> Self {
        Self { variables }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn name_at(&self, index: usize) -> ObjectId {
        self.variables[index].0
    }

    pub fn info_at(&self, index: usize) -> LocalVarInfo {
        self.variables[index].1
    }

    /// Variables whose scope covers `pos`.
    pub fn visible_at(&self, pos: TokenPosition) -> impl Iterator<Item = (ObjectId, LocalVarInfo)> + '_ {
        self.variables
            .iter()
            .copied()
            .filter(move |(_, info)| info.begin_pos <= pos && pos <= info.end_pos)
    }
}

impl Visitable for LocalVarDescriptors {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for (name, _) in &self.variables {
            visitor.visit_id(*name);
        }
    }
}

// ── object pool ────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Patchability {
    Patchable,
    NotPatchable,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolEntry {
    TaggedObject(Value),
    Immediate(u64),
    NativeFunction(usize),
}

/// Constants and call targets referenced from generated code by index.
#[derive(Debug, Default)]
pub struct ObjectPool {
    entries: Vec<(PoolEntry, Patchability)>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_at(&self, index: usize) -> PoolEntry {
        self.entries[index].0
    }

    pub fn patchability_at(&self, index: usize) -> Patchability {
        self.entries[index].1
    }

    /// Index of the entry, shared with an equal non patchable one.
    pub fn add(&mut self, entry: PoolEntry, patchable: Patchability) -> usize {
        if patchable == Patchability::NotPatchable
            && let Some(index) = self
                .entries
                .iter()
                .position(|&existing| existing == (entry, Patchability::NotPatchable))
        {
            return index;
        }
        self.entries.push((entry, patchable));
        self.entries.len() - 1
    }

    pub fn add_object(&mut self, value: Value) -> usize {
        self.add(PoolEntry::TaggedObject(value), Patchability::NotPatchable)
    }

    pub fn object_at(&self, index: usize) -> Option<Value> {
        match self.entries[index].0 {
            PoolEntry::TaggedObject(value) => Some(value),
            _ => None,
        }
    }

    pub fn patch(&mut self, index: usize, entry: PoolEntry) -> ObjectResult<()> {
        let slot = &mut self.entries[index];
        if slot.1 != Patchability::Patchable {
            return Err(ObjectError::api(format!("object pool entry {index} is not patchable")));
        }
        slot.0 = entry;
        Ok(())
    }
}

impl Visitable for ObjectPool {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for (entry, _) in &self.entries {
            if let PoolEntry::TaggedObject(value) = entry {
                visitor.visit(*value);
            }
        }
    }
}

impl Isolate {
    pub fn new_pc_descriptors(&self, builder: PcDescriptorsBuilder) -> ObjectResult<ObjectId> {
        self.allocate(builder.finish(), Space::Old)
    }

    pub fn new_object_pool(&self, pool: ObjectPool) -> ObjectResult<ObjectId> {
        self.allocate(pool, Space::Old)
    }

    /// Patches a pool entry, the pool is rescanned by the write barrier.
    pub fn patch_object_pool(&self, pool: ObjectId, index: usize, entry: PoolEntry) -> ObjectResult<()> {
        self.heap().write::<ObjectPool, _>(pool, |p| p.patch(index, entry))
    }
}
