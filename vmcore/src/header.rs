use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use bitflags::bitflags;

/// Small integer identifying a class, also the dispatch key in every cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[rustfmt::skip]
impl ClassId {
    pub const ILLEGAL: Self                  = Self(0);

    // ── vm internal kinds ──
    pub const CLASS: Self                    = Self(1);
    pub const FUNCTION: Self                 = Self(2);
    pub const FIELD: Self                    = Self(3);
    pub const LIBRARY: Self                  = Self(4);
    pub const NAMESPACE: Self                = Self(5);
    pub const SCRIPT: Self                   = Self(6);
    pub const CODE: Self                     = Self(7);
    pub const BYTECODE: Self                 = Self(8);
    pub const OBJECT_POOL: Self              = Self(9);
    pub const PC_DESCRIPTORS: Self           = Self(10);
    pub const EXCEPTION_HANDLERS: Self       = Self(11);
    pub const LOCAL_VAR_DESCRIPTORS: Self    = Self(12);
    pub const CONTEXT: Self                  = Self(13);
    pub const IC_DATA: Self                  = Self(14);
    pub const MEGAMORPHIC_CACHE: Self        = Self(15);
    pub const SUBTYPE_TEST_CACHE: Self       = Self(16);
    pub const SINGLE_TARGET_CACHE: Self      = Self(17);
    pub const UNLINKED_CALL: Self            = Self(18);
    pub const TYPE_ARGUMENTS: Self           = Self(19);

    // ── instance kinds ──
    pub const OBJECT: Self                   = Self(20);
    pub const NULL: Self                     = Self(21);
    pub const DYNAMIC: Self                  = Self(22);
    pub const VOID: Self                     = Self(23);
    pub const NEVER: Self                    = Self(24);
    pub const BOOL: Self                     = Self(25);
    pub const SMI: Self                      = Self(26);
    pub const MINT: Self                     = Self(27);
    pub const DOUBLE: Self                   = Self(28);
    pub const ONE_BYTE_STRING: Self          = Self(29);
    pub const TWO_BYTE_STRING: Self          = Self(30);
    pub const EXTERNAL_ONE_BYTE_STRING: Self = Self(31);
    pub const EXTERNAL_TWO_BYTE_STRING: Self = Self(32);
    pub const ARRAY: Self                    = Self(33);
    pub const IMMUTABLE_ARRAY: Self          = Self(34);
    pub const CLOSURE: Self                  = Self(35);
    pub const TYPE: Self                     = Self(36);
    pub const TYPE_REF: Self                 = Self(37);
    pub const TYPE_PARAMETER: Self           = Self(38);

    // ── core interfaces with fixed ids ──
    pub const FUNCTION_INTERFACE: Self       = Self(39);
    pub const FUTURE: Self                   = Self(40);
    pub const FUTURE_OR: Self                = Self(41);
    pub const INT: Self                      = Self(42);
    pub const STRING: Self                   = Self(43);
    pub const NO_SUCH_METHOD_ERROR: Self     = Self(44);
    pub const TYPE_ERROR: Self               = Self(45);
    pub const OUT_OF_MEMORY_ERROR: Self      = Self(46);
    pub const CYCLIC_INITIALIZATION_ERROR: Self = Self(47);
    pub const STACK_TRACE: Self              = Self(48);

    pub const NUM_PREDEFINED: Self           = Self(49);
}

impl ClassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_predefined(self) -> bool {
        self < Self::NUM_PREDEFINED
    }

    pub fn is_string(self) -> bool {
        (Self::ONE_BYTE_STRING.0..=Self::EXTERNAL_TWO_BYTE_STRING.0).contains(&self.0)
    }

    pub fn is_integer(self) -> bool {
        self == Self::SMI || self == Self::MINT
    }

    pub fn is_number(self) -> bool {
        self.is_integer() || self == Self::DOUBLE
    }

    pub fn is_array(self) -> bool {
        self == Self::ARRAY || self == Self::IMMUTABLE_ARRAY
    }

    pub fn is_abstract_type(self) -> bool {
        self == Self::TYPE || self == Self::TYPE_REF || self == Self::TYPE_PARAMETER
    }

    /// VM-internal kinds are not instances of any user-visible class.
    pub fn is_internal_vm_object(self) -> bool {
        self > Self::ILLEGAL && self < Self::OBJECT
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid{}", self.0)
    }
}

bitflags! {
    /// GC and bookkeeping bits kept in the header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const MARKED = 1 << 0;
        const REMEMBERED = 1 << 1;
        const OLD = 1 << 2;
        const CANONICAL = 1 << 3;
    }
}

/// Header of every heap cell.
///
/// ```text
/// cid:   class id of the object
/// size:  heap size in bytes, always a multiple of the object alignment
/// flags: atomic  Marked | Remembered | Old | Canonical
/// ```
pub struct Header {
    cid: ClassId,
    size: u32,
    flags: AtomicU8,
}

impl Header {
    pub fn new(cid: ClassId, size: usize, flags: HeaderFlags) -> Self {
        debug_assert!(size <= u32::MAX as usize);
        Self {
            cid,
            size: size as u32,
            flags: AtomicU8::new(flags.bits()),
        }
    }

    #[inline(always)]
    pub fn class_id(&self) -> ClassId {
        self.cid
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    /// Sets `flag`, returns whether it was already set.
    #[inline(always)]
    pub fn test_and_set(&self, flag: HeaderFlags) -> bool {
        let previous = self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        HeaderFlags::from_bits_truncate(previous).contains(flag)
    }

    // ── shorthands ─────────────────────────────────────────────────

    pub fn is_old(&self) -> bool {
        self.has_flag(HeaderFlags::OLD)
    }

    pub fn is_marked(&self) -> bool {
        self.has_flag(HeaderFlags::MARKED)
    }

    pub fn is_canonical(&self) -> bool {
        self.has_flag(HeaderFlags::CANONICAL)
    }

    pub fn is_remembered(&self) -> bool {
        self.has_flag(HeaderFlags::REMEMBERED)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("cid", &self.cid)
            .field("size", &self.size)
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let header = Header::new(ClassId::MINT, 16, HeaderFlags::OLD);
        assert!(header.is_old());
        assert!(!header.is_marked());
        header.add_flag(HeaderFlags::MARKED);
        header.add_flag(HeaderFlags::CANONICAL);
        assert!(header.is_marked() && header.is_canonical() && header.is_old());
        header.remove_flag(HeaderFlags::MARKED);
        assert!(!header.is_marked());
        assert!(header.is_canonical(), "removing one flag must keep the others");
    }

    #[test]
    fn test_and_set_reports_previous_state() {
        let header = Header::new(ClassId::ARRAY, 32, HeaderFlags::empty());
        assert!(!header.test_and_set(HeaderFlags::REMEMBERED));
        assert!(header.test_and_set(HeaderFlags::REMEMBERED));
    }

    #[test]
    fn class_id_groups() {
        assert!(ClassId::TWO_BYTE_STRING.is_string());
        assert!(!ClassId::ARRAY.is_string());
        assert!(ClassId::MINT.is_integer());
        assert!(ClassId::DOUBLE.is_number());
        assert!(ClassId::TYPE_REF.is_abstract_type());
        assert!(ClassId::IC_DATA.is_internal_vm_object());
        assert!(!ClassId::OBJECT.is_internal_vm_object());
        assert!(!ClassId::NUM_PREDEFINED.is_predefined());
    }
}
