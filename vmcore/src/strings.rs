use std::{cmp::Ordering, fmt, sync::Arc};

use crate::{ClassId, Heap, ObjectId, WORD_SIZE};

pub const STRING_HASH_BITS: u32 = 30;

/// Jenkins one-at-a-time over code units, shared by every representation so
/// equal strings hash equally.
#[derive(Debug, Default, Copy, Clone)]
pub struct StringHasher {
    hash: u32,
}

impl StringHasher {
    #[inline]
    pub fn add(&mut self, code_unit: u32) {
        self.hash = self.hash.wrapping_add(code_unit);
        self.hash = self.hash.wrapping_add(self.hash << 10);
        self.hash ^= self.hash >> 6;
    }

    pub fn finish(self) -> u32 {
        let mut hash = self.hash;
        hash = hash.wrapping_add(hash << 3);
        hash ^= hash >> 11;
        hash = hash.wrapping_add(hash << 15);
        hash &= (1 << STRING_HASH_BITS) - 1;
        if hash == 0 { 1 } else { hash }
    }

    pub fn hash_units(units: impl IntoIterator<Item = u16>) -> u32 {
        let mut hasher = Self::default();
        for unit in units {
            hasher.add(unit as u32);
        }
        hasher.finish()
    }
}

#[derive(Clone)]
enum StringData {
    OneByte(Box<[u8]>),
    TwoByte(Box<[u16]>),
    // external data is owned by the embedder and shared, never copied
    ExternalOneByte(Arc<[u8]>),
    ExternalTwoByte(Arc<[u16]>),
}

/// Immutable string with a precomputed hash.
///
/// One-byte strings hold Latin-1 code units, two-byte strings hold UTF-16.
#[derive(Clone)]
pub struct StringObject {
    data: StringData,
    hash: u32,
}

impl StringObject {
    fn with_data(data: StringData) -> Self {
        let mut string = Self { data, hash: 0 };
        string.hash = StringHasher::hash_units(string.code_units());
        string
    }

    /// Picks the narrowest representation able to hold `value`.
    pub fn new(value: &str) -> Self {
        if value.chars().all(|c| (c as u32) <= 0xFF) {
            Self::from_latin1(value.chars().map(|c| c as u8).collect())
        } else {
            Self::from_utf16(value.encode_utf16().collect())
        }
    }

    pub fn from_latin1(bytes: Vec<u8>) -> Self {
        Self::with_data(StringData::OneByte(bytes.into_boxed_slice()))
    }

    /// Two-byte string, narrowed to one byte when every unit fits.
    pub fn from_utf16(units: Vec<u16>) -> Self {
        if units.iter().all(|&unit| unit <= 0xFF) {
            return Self::from_latin1(units.into_iter().map(|unit| unit as u8).collect());
        }
        Self::with_data(StringData::TwoByte(units.into_boxed_slice()))
    }

    pub fn external_one_byte(bytes: Arc<[u8]>) -> Self {
        Self::with_data(StringData::ExternalOneByte(bytes))
    }

    pub fn external_two_byte(units: Arc<[u16]>) -> Self {
        Self::with_data(StringData::ExternalTwoByte(units))
    }

    pub fn class_id(&self) -> ClassId {
        match self.data {
            StringData::OneByte(_) => ClassId::ONE_BYTE_STRING,
            StringData::TwoByte(_) => ClassId::TWO_BYTE_STRING,
            StringData::ExternalOneByte(_) => ClassId::EXTERNAL_ONE_BYTE_STRING,
            StringData::ExternalTwoByte(_) => ClassId::EXTERNAL_TWO_BYTE_STRING,
        }
    }

    pub(crate) fn payload_words(&self) -> usize {
        // length + hash, then the characters inline unless external
        2 + match &self.data {
            StringData::OneByte(bytes) => bytes.len().div_ceil(WORD_SIZE),
            StringData::TwoByte(units) => (units.len() * 2).div_ceil(WORD_SIZE),
            StringData::ExternalOneByte(_) | StringData::ExternalTwoByte(_) => 1,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            StringData::OneByte(bytes) => bytes.len(),
            StringData::TwoByte(units) => units.len(),
            StringData::ExternalOneByte(bytes) => bytes.len(),
            StringData::ExternalTwoByte(units) => units.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_one_byte(&self) -> bool {
        matches!(
            self.data,
            StringData::OneByte(_) | StringData::ExternalOneByte(_)
        )
    }

    pub fn is_external(&self) -> bool {
        matches!(
            self.data,
            StringData::ExternalOneByte(_) | StringData::ExternalTwoByte(_)
        )
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[inline]
    pub fn code_unit_at(&self, index: usize) -> u16 {
        match &self.data {
            StringData::OneByte(bytes) => bytes[index] as u16,
            StringData::TwoByte(units) => units[index],
            StringData::ExternalOneByte(bytes) => bytes[index] as u16,
            StringData::ExternalTwoByte(units) => units[index],
        }
    }

    pub fn code_units(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len()).map(|index| self.code_unit_at(index))
    }

    pub fn to_utf16(&self) -> Vec<u16> {
        self.code_units().collect()
    }

    /// Equality by code units, independent of representation.
    pub fn equals(&self, other: &StringObject) -> bool {
        self.hash == other.hash && self.len() == other.len() && self.code_units().eq(other.code_units())
    }

    pub fn equals_str(&self, other: &str) -> bool {
        self.code_units().eq(other.encode_utf16())
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        let mut units = self.code_units();
        prefix
            .encode_utf16()
            .all(|unit| units.next() == Some(unit))
    }

    pub fn compare(&self, other: &StringObject) -> Ordering {
        self.code_units().cmp(other.code_units())
    }

    pub fn concat(&self, other: &StringObject) -> StringObject {
        let mut units = self.to_utf16();
        units.extend(other.code_units());
        Self::from_utf16(units)
    }

    /// Copy of `len` code units starting at `start`, `None` when out of range.
    pub fn substring(&self, start: usize, len: usize) -> Option<StringObject> {
        let end = start.checked_add(len)?;
        if end > self.len() {
            return None;
        }
        Some(Self::from_utf16((start..end).map(|i| self.code_unit_at(i)).collect()))
    }

    pub fn to_rust_string(&self) -> String {
        char::decode_utf16(self.code_units())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

impl fmt::Display for StringObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rust_string())
    }
}

impl fmt::Debug for StringObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}, hash {})", self.to_rust_string(), self.class_id(), self.hash)
    }
}

impl Heap {
    pub fn string_value(&self, id: ObjectId) -> String {
        self.read::<StringObject, _>(id, |string| string.to_rust_string())
    }

    pub fn is_string(&self, id: ObjectId) -> bool {
        self.cell(id).class_id().is_string()
    }
}
