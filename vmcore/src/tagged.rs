//! Value: any raw word, small integer (smi) or reference into the heap arena
//!
//! ValueKind: the decoded form of a Value, every dereference pattern-matches on it
//!
//! ObjectId: index of a heap cell, references never carry addresses
use std::fmt;

#[allow(unused)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Smi = 0b0,
    Reference = 0b01,
    Header = 0b11,
}

pub const OBJECT_TAG_MASK: u64 = 0b11;

pub const SMI_BITS: u32 = 63;
pub const SMI_MAX: i64 = (1 << (SMI_BITS - 1)) - 1;
pub const SMI_MIN: i64 = -(1 << (SMI_BITS - 1));

/// Index of a cell in the heap arena.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The null object is always the first allocation of an isolate.
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn value(self) -> Value {
        Value::from_object(self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A generic Value
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

/// Decoded Value
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Smi(i64),
    Ref(ObjectId),
}

impl Value {
    pub const NULL: Self = Self::from_object(ObjectId::NULL);

    /// Smi encoding of `value`, the caller guarantees it is in smi range.
    #[inline]
    pub const fn from_smi(value: i64) -> Self {
        debug_assert!(value >= SMI_MIN && value <= SMI_MAX);
        Self((value as u64) << 1)
    }

    #[inline]
    pub fn try_from_i64(value: i64) -> Option<Self> {
        Self::is_smi_range(value).then(|| Self::from_smi(value))
    }

    #[inline]
    pub const fn from_object(id: ObjectId) -> Self {
        Self(((id.0 as u64) << 2) | ValueTag::Reference as u64)
    }

    #[inline]
    pub const fn is_smi_range(value: i64) -> bool {
        value >= SMI_MIN && value <= SMI_MAX
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// # Safety
    /// the word must have been produced by `raw` of a live value
    #[inline]
    pub const unsafe fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_smi(self) -> bool {
        self.0 & 0b1 == ValueTag::Smi as u64
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        self.0 & OBJECT_TAG_MASK == ValueTag::Reference as u64
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    #[inline]
    pub fn kind(self) -> ValueKind {
        if self.is_smi() {
            ValueKind::Smi((self.0 as i64) >> 1)
        } else {
            debug_assert!(self.is_object(), "header word used as a value");
            ValueKind::Ref(ObjectId((self.0 >> 2) as u32))
        }
    }

    #[inline]
    pub fn as_smi(self) -> Option<i64> {
        match self.kind() {
            ValueKind::Smi(value) => Some(value),
            ValueKind::Ref(_) => None,
        }
    }

    #[inline]
    pub fn as_object(self) -> Option<ObjectId> {
        match self.kind() {
            ValueKind::Ref(id) => Some(id),
            ValueKind::Smi(_) => None,
        }
    }

    /// Reference unless null.
    #[inline]
    pub fn as_non_null(self) -> Option<ObjectId> {
        if self.is_null() { None } else { self.as_object() }
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::from_object(id)
    }
}

impl From<Option<ObjectId>> for Value {
    fn from(id: Option<ObjectId>) -> Self {
        id.map_or(Self::NULL, Self::from_object)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Smi(value) => write!(f, "{value}"),
            ValueKind::Ref(id) if id == ObjectId::NULL => f.write_str("null"),
            ValueKind::Ref(id) => write!(f, "{id}"),
        }
    }
}
