use crate::ObjectId;

/// Cycle guard threaded through every recursive type operation.
///
/// Holds `(type, buddy)` pairs of operations currently in flight. A type
/// paired with itself marks a single-type walk (canonicalization,
/// instantiation checks), a type paired with another marks a two-type walk
/// (equivalence, instantiation with its in-progress result).
#[derive(Debug, Default, Clone)]
pub struct Trail {
    pairs: Vec<(ObjectId, ObjectId)>,
    // canonical representatives found during this walk
    resolved: Vec<(ObjectId, ObjectId)>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The single partner recorded for `ty`, if any.
    pub fn only_buddy(&self, ty: ObjectId) -> Option<ObjectId> {
        let mut found = self.pairs.iter().filter(|(first, _)| *first == ty);
        let buddy = found.next().map(|&(_, buddy)| buddy);
        debug_assert!(found.next().is_none(), "{ty} has more than one buddy");
        buddy
    }

    pub fn add_only_buddy(&mut self, ty: ObjectId, buddy: ObjectId) {
        debug_assert!(self.only_buddy(ty).is_none());
        self.pairs.push((ty, buddy));
    }

    /// Returns true if `ty` is already on the trail, adds it otherwise.
    pub fn test_and_add(&mut self, ty: ObjectId) -> bool {
        self.test_and_add_buddy(ty, ty)
    }

    /// Returns true if the pair is already on the trail, adds it otherwise.
    pub fn test_and_add_buddy(&mut self, ty: ObjectId, buddy: ObjectId) -> bool {
        if self.pairs.contains(&(ty, buddy)) {
            return true;
        }
        self.pairs.push((ty, buddy));
        false
    }

    pub fn contains(&self, ty: ObjectId) -> bool {
        self.pairs.iter().any(|(first, _)| *first == ty)
    }

    /// Canonical representative recorded for `ty` earlier in this walk.
    pub fn resolved(&self, ty: ObjectId) -> Option<ObjectId> {
        self.resolved
            .iter()
            .find(|(first, _)| *first == ty)
            .map(|&(_, canonical)| canonical)
    }

    pub fn set_resolved(&mut self, ty: ObjectId, canonical: ObjectId) {
        debug_assert!(self.resolved(ty).is_none());
        self.resolved.push((ty, canonical));
    }
}
