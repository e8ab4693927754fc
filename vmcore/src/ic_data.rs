use bitflags::bitflags;

use crate::{
    ClassId, Isolate, ObjectError, ObjectId, ObjectResult, Space, StaticTypeExactness, Value,
    Visitable, Visitor,
};

/// How the target of a call site is looked up again after a miss.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RebindRule {
    Instance,
    NoRebind,
    NsmDispatch,
    Optimized,
    Static,
    Super,
}

bitflags! {
    /// Reasons optimized code guarded by this call site deoptimized.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct DeoptReasons: u32 {
        const UNKNOWN                = 1 << 0;
        const POLYMORPHIC_CALL_MISS  = 1 << 1;
        const BINARY_SMI_OP          = 1 << 2;
        const BINARY_INT64_OP        = 1 << 3;
        const DOUBLE_TO_SMI          = 1 << 4;
        const CHECK_CLASS            = 1 << 5;
        const CHECK_SMI              = 1 << 6;
        const CHECK_ARRAY_BOUND      = 1 << 7;
        const AT_CALL                = 1 << 8;
        const GUARD_FIELD            = 1 << 9;
        const TEST_CIDS              = 1 << 10;
    }
}

/// One observed combination at a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ICCheck {
    pub class_ids: Vec<ClassId>,
    pub target: Option<ObjectId>,
    pub count: u32,
    pub exactness: Option<StaticTypeExactness>,
}

/// Inline cache of a call site.
///
/// ```text
/// entry:  cid_0 .. cid_{n-1} | target | count | exactness?
/// ```
///
/// Entries are stored flat and the table always ends in a sentinel entry
/// whose slots are all `ClassId::ILLEGAL`. A table testing zero arguments
/// holds a single static target.
#[derive(Clone)]
pub struct ICData {
    pub owner: ObjectId,
    pub target_name: ObjectId,
    pub arguments_descriptor: ObjectId,
    pub deopt_id: i32,
    pub receivers_static_type: Option<ObjectId>,
    num_args_tested: usize,
    tracking_exactness: bool,
    rebind_rule: RebindRule,
    deopt_reasons: DeoptReasons,
    is_megamorphic: bool,
    entries: Vec<Value>,
}

const SENTINEL_SLOT: Value = Value::from_smi(ClassId::ILLEGAL.0 as i64);

fn exactness_to_smi(exactness: StaticTypeExactness) -> Value {
    let code = match exactness {
        StaticTypeExactness::Uninitialized => 1,
        StaticTypeExactness::NotTracking => 2,
        StaticTypeExactness::NotExact => 3,
        StaticTypeExactness::HasExactSuperType => 4,
        StaticTypeExactness::HasExactSuperClass => 5,
        StaticTypeExactness::TriviallyExact => 6,
    };
    Value::from_smi(code)
}

fn exactness_from_smi(value: Value) -> StaticTypeExactness {
    match value.as_smi() {
        Some(1) => StaticTypeExactness::Uninitialized,
        Some(3) => StaticTypeExactness::NotExact,
        Some(4) => StaticTypeExactness::HasExactSuperType,
        Some(5) => StaticTypeExactness::HasExactSuperClass,
        Some(6) => StaticTypeExactness::TriviallyExact,
        _ => StaticTypeExactness::NotTracking,
    }
}

impl ICData {
    pub fn new(
        owner: ObjectId,
        target_name: ObjectId,
        arguments_descriptor: ObjectId,
        deopt_id: i32,
        num_args_tested: usize,
        rebind_rule: RebindRule,
    ) -> Self {
        let mut ic_data = Self {
            owner,
            target_name,
            arguments_descriptor,
            deopt_id,
            receivers_static_type: None,
            num_args_tested,
            tracking_exactness: false,
            rebind_rule,
            deopt_reasons: DeoptReasons::empty(),
            is_megamorphic: false,
            entries: Vec::new(),
        };
        ic_data.entries = vec![SENTINEL_SLOT; ic_data.entry_len()];
        ic_data
    }

    /// Receiver checks additionally record how exactly the receiver matched
    /// `receivers_static_type`.
    pub fn with_exactness_tracking(mut self, receivers_static_type: ObjectId) -> Self {
        debug_assert!(self.number_of_checks() == 0);
        debug_assert!(self.num_args_tested == 1);
        self.receivers_static_type = Some(receivers_static_type);
        self.tracking_exactness = true;
        self.entries = vec![SENTINEL_SLOT; self.entry_len()];
        self
    }

    pub fn num_args_tested(&self) -> usize {
        self.num_args_tested
    }

    pub fn rebind_rule(&self) -> RebindRule {
        self.rebind_rule
    }

    pub fn is_tracking_exactness(&self) -> bool {
        self.tracking_exactness
    }

    /// Slots per entry.
    pub fn entry_len(&self) -> usize {
        self.num_args_tested + 2 + usize::from(self.tracking_exactness)
    }

    fn target_slot(&self) -> usize {
        self.num_args_tested
    }

    fn count_slot(&self) -> usize {
        self.num_args_tested + 1
    }

    fn entry(&self, index: usize) -> &[Value] {
        let len = self.entry_len();
        &self.entries[index * len..(index + 1) * len]
    }

    fn entry_mut(&mut self, index: usize) -> &mut [Value] {
        let len = self.entry_len();
        &mut self.entries[index * len..(index + 1) * len]
    }

    fn is_sentinel_at(&self, index: usize) -> bool {
        self.entry(index).iter().all(|&slot| slot == SENTINEL_SLOT)
    }

    /// Number of entries in the backing table, sentinel included.
    pub fn table_len(&self) -> usize {
        self.entries.len() / self.entry_len()
    }

    pub fn number_of_checks(&self) -> usize {
        (0..self.table_len())
            .position(|index| self.is_sentinel_at(index))
            .unwrap_or(self.table_len())
    }

    pub fn number_of_checks_is(&self, n: usize) -> bool {
        self.number_of_checks() == n
    }

    /// Checks that were hit at least once.
    pub fn number_of_used_checks(&self) -> usize {
        (0..self.number_of_checks())
            .filter(|&index| self.count_at(index) > 0)
            .count()
    }

    pub fn class_ids_at(&self, index: usize) -> Vec<ClassId> {
        self.entry(index)[..self.num_args_tested]
            .iter()
            .map(|slot| ClassId(slot.as_smi().unwrap_or(0) as u32))
            .collect()
    }

    pub fn receiver_class_id_at(&self, index: usize) -> ClassId {
        debug_assert!(self.num_args_tested > 0);
        ClassId(self.entry(index)[0].as_smi().unwrap_or(0) as u32)
    }

    pub fn target_at(&self, index: usize) -> Option<ObjectId> {
        self.entry(index)[self.target_slot()].as_non_null()
    }

    pub fn count_at(&self, index: usize) -> u32 {
        self.entry(index)[self.count_slot()].as_smi().unwrap_or(0) as u32
    }

    pub fn set_count_at(&mut self, index: usize, count: u32) {
        let slot = self.count_slot();
        self.entry_mut(index)[slot] = Value::from_smi(i64::from(count));
    }

    pub fn exactness_at(&self, index: usize) -> Option<StaticTypeExactness> {
        self.tracking_exactness
            .then(|| exactness_from_smi(self.entry(index)[self.num_args_tested + 2]))
    }

    pub fn check_at(&self, index: usize) -> ICCheck {
        ICCheck {
            class_ids: self.class_ids_at(index),
            target: self.target_at(index),
            count: self.count_at(index),
            exactness: self.exactness_at(index),
        }
    }

    pub fn checks(&self) -> impl Iterator<Item = ICCheck> + '_ {
        (0..self.number_of_checks()).map(|index| self.check_at(index))
    }

    /// Index of the entry guarding exactly `class_ids`.
    pub fn find_check(&self, class_ids: &[ClassId]) -> Option<usize> {
        (0..self.number_of_checks()).find(|&index| {
            self.entry(index)[..self.num_args_tested]
                .iter()
                .zip(class_ids)
                .all(|(slot, cid)| slot.as_smi() == Some(i64::from(cid.0)))
        })
    }

    pub fn has_receiver_class_id(&self, cid: ClassId) -> bool {
        (0..self.number_of_checks()).any(|index| self.receiver_class_id_at(index) == cid)
    }

    pub fn target_for_receiver_class_id(&self, cid: ClassId) -> Option<ObjectId> {
        (0..self.number_of_checks())
            .find(|&index| self.receiver_class_id_at(index) == cid)
            .and_then(|index| self.target_at(index))
    }

    /// Sum of all hit counters.
    pub fn aggregate_count(&self) -> u64 {
        (0..self.number_of_checks())
            .map(|index| u64::from(self.count_at(index)))
            .sum()
    }

    pub fn deopt_reasons(&self) -> DeoptReasons {
        self.deopt_reasons
    }

    pub fn has_deopt_reason(&self, reason: DeoptReasons) -> bool {
        self.deopt_reasons.contains(reason)
    }

    pub fn add_deopt_reason(&mut self, reason: DeoptReasons) {
        self.deopt_reasons |= reason;
    }

    pub fn is_megamorphic(&self) -> bool {
        self.is_megamorphic
    }

    pub fn set_is_megamorphic(&mut self, value: bool) {
        self.is_megamorphic = value;
    }

    // A static call site starts with one entry of Object cids so the stub
    // has something to count against.
    fn is_dummy_entry(&self, index: usize) -> bool {
        self.rebind_rule == RebindRule::Static
            && self.count_at(index) == 0
            && self
                .class_ids_at(index)
                .iter()
                .all(|&cid| cid == ClassId::OBJECT)
    }

    /// Overwrites the sentinel with `entry` and appends a fresh sentinel.
    fn append_entry(&mut self, entry: &[Value]) -> usize {
        debug_assert_eq!(entry.len(), self.entry_len());
        let index = self.number_of_checks();
        let len = self.entry_len();
        self.entries.truncate(index * len);
        self.entries.extend_from_slice(entry);
        self.entries.extend(std::iter::repeat_n(SENTINEL_SLOT, len));
        index
    }

    fn make_entry(
        &self,
        class_ids: &[ClassId],
        target: Option<ObjectId>,
        count: u32,
        exactness: Option<StaticTypeExactness>,
    ) -> Vec<Value> {
        let mut entry: Vec<Value> = class_ids
            .iter()
            .map(|cid| Value::from_smi(i64::from(cid.0)))
            .collect();
        entry.push(Value::from(target));
        entry.push(Value::from_smi(i64::from(count)));
        if self.tracking_exactness {
            entry.push(exactness_to_smi(
                exactness.unwrap_or(StaticTypeExactness::NotTracking),
            ));
        }
        entry
    }

    /// Records a new combination of argument class ids. Adding a
    /// combination that is already present is a caller bug.
    pub fn add_check(&mut self, class_ids: &[ClassId], target: Option<ObjectId>, count: u32) -> usize {
        assert_eq!(class_ids.len(), self.num_args_tested);
        debug_assert!(class_ids.iter().all(|&cid| cid != ClassId::ILLEGAL));
        debug_assert!(
            self.find_check(class_ids).is_none(),
            "duplicate inline cache check {class_ids:?}"
        );
        if self.number_of_checks_is(1) && self.is_dummy_entry(0) {
            let entry = self.make_entry(class_ids, target, count, None);
            self.entry_mut(0).copy_from_slice(&entry);
            return 0;
        }
        let entry = self.make_entry(class_ids, target, count, None);
        let index = self.append_entry(&entry);
        if self.num_args_tested == 2
            && index > 0
            && class_ids == [ClassId::SMI, ClassId::SMI]
        {
            self.swap_entries(0, index);
            return 0;
        }
        index
    }

    pub fn add_receiver_check(
        &mut self,
        receiver_cid: ClassId,
        target: Option<ObjectId>,
        count: u32,
        exactness: StaticTypeExactness,
    ) -> usize {
        debug_assert_eq!(self.num_args_tested, 1);
        debug_assert!(
            !self.has_receiver_class_id(receiver_cid),
            "duplicate receiver check {receiver_cid:?}"
        );
        let entry = self.make_entry(&[receiver_cid], target, count, Some(exactness));
        if self.number_of_checks_is(1) && self.is_dummy_entry(0) {
            self.entry_mut(0).copy_from_slice(&entry);
            return 0;
        }
        self.append_entry(&entry)
    }

    /// Static target of a table testing no arguments.
    pub fn add_target(&mut self, target: ObjectId) {
        debug_assert_eq!(self.num_args_tested, 0);
        if self.number_of_checks_is(0) {
            let entry = self.make_entry(&[], Some(target), 0, None);
            self.append_entry(&entry);
        } else {
            let slot = self.target_slot();
            self.entry_mut(0)[slot] = Value::from(target);
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let len = self.entry_len();
        for slot in 0..len {
            self.entries.swap(a * len + slot, b * len + slot);
        }
    }
}

impl Visitable for ICData {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit_id(self.owner);
        visitor.visit_id(self.target_name);
        visitor.visit_id(self.arguments_descriptor);
        visitor.visit_opt(self.receivers_static_type);
        visitor.visit_all(&self.entries);
    }
}

impl Isolate {
    pub fn new_ic_data(
        &self,
        owner: ObjectId,
        target_name: &str,
        arguments_descriptor: ObjectId,
        deopt_id: i32,
        num_args_tested: usize,
        rebind_rule: RebindRule,
    ) -> ObjectResult<ObjectId> {
        let name = self.symbol(target_name)?;
        self.allocate(
            ICData::new(owner, name, arguments_descriptor, deopt_id, num_args_tested, rebind_rule),
            Space::Old,
        )
    }

    /// Call site of a statically bound target.
    ///
    /// With tested arguments the table starts with a dummy Object entry that
    /// the first real check replaces.
    pub fn new_ic_data_for_static_call(
        &self,
        owner: ObjectId,
        target: ObjectId,
        arguments_descriptor: ObjectId,
        deopt_id: i32,
        num_args_tested: usize,
    ) -> ObjectResult<ObjectId> {
        let name = self.heap().read::<crate::Function, _>(target, |f| f.name);
        let mut ic_data = ICData::new(
            owner,
            name,
            arguments_descriptor,
            deopt_id,
            num_args_tested,
            RebindRule::Static,
        );
        if num_args_tested == 0 {
            ic_data.add_target(target);
        } else {
            let dummy = ic_data.make_entry(&vec![ClassId::OBJECT; num_args_tested], Some(target), 0, None);
            ic_data.append_entry(&dummy);
        }
        self.allocate(ic_data, Space::Old)
    }

    pub fn ic_data_target_name(&self, ic_data: ObjectId) -> String {
        let name = self.heap().read::<ICData, _>(ic_data, |ic| ic.target_name);
        self.heap().string_value(name)
    }

    pub fn add_ic_check(
        &self,
        ic_data: ObjectId,
        class_ids: &[ClassId],
        target: Option<ObjectId>,
    ) -> usize {
        let (index, table_len) = self.heap().write::<ICData, _>(ic_data, |ic| {
            let index = ic.add_check(class_ids, target, 1);
            (index, ic.table_len())
        });
        if table_len.is_power_of_two() {
            log::debug!("inline cache {ic_data} grew to {table_len} entries");
        }
        index
    }

    /// Hit counter bump for entry `index`.
    ///
    /// Read and write are separate steps, concurrent hits may lose updates.
    pub fn increment_ic_count(&self, ic_data: ObjectId, index: usize) {
        let count = self.heap().read::<ICData, _>(ic_data, |ic| ic.count_at(index));
        self.heap()
            .write::<ICData, _>(ic_data, |ic| ic.set_count_at(index, count.saturating_add(1)));
    }

    /// Feeds one receiver class into a one-argument call site.
    ///
    /// Returns false once the site holds `ic_data_max_checks` entries, the
    /// site is then flagged megamorphic and the caller switches to a
    /// megamorphic cache.
    pub fn record_receiver(&self, ic_data: ObjectId, receiver_cid: ClassId, target: ObjectId) -> bool {
        let max_checks = self.settings().ic_data_max_checks;
        self.heap().write::<ICData, _>(ic_data, |ic| {
            // looked up under the write lock so racing misses add one entry
            let existing = (0..ic.number_of_checks())
                .find(|&index| ic.receiver_class_id_at(index) == receiver_cid);
            if let Some(index) = existing {
                ic.set_count_at(index, ic.count_at(index).saturating_add(1));
                return true;
            }
            if ic.number_of_checks() >= max_checks && !(ic.number_of_checks_is(1) && ic.is_dummy_entry(0)) {
                ic.set_is_megamorphic(true);
                return false;
            }
            let exactness = if ic.is_tracking_exactness() {
                StaticTypeExactness::NotExact
            } else {
                StaticTypeExactness::NotTracking
            };
            ic.add_receiver_check(receiver_cid, Some(target), 1, exactness);
            true
        })
    }

    /// Ensures a two-argument site for a binary operator starts with the
    /// Smi/Smi entry. Returns true if the site is a Smi/Smi operation.
    pub fn add_smi_smi_check_for_fast_path(&self, ic_data: ObjectId) -> bool {
        let name = self.ic_data_target_name(ic_data);
        let smi_target = self
            .resolve_dynamic_function(ClassId::SMI, &name)
            .or_else(|| {
                crate::demangle_dynamic_forwarder_name(&name)
                    .and_then(|plain| self.resolve_dynamic_function(ClassId::SMI, plain))
            });
        self.heap().write::<ICData, _>(ic_data, |ic| {
            debug_assert_eq!(ic.num_args_tested(), 2);
            if ic.number_of_checks_is(0) {
                ic.add_check(&[ClassId::SMI, ClassId::SMI], smi_target, 0);
                return true;
            }
            ic.number_of_checks_is(1)
                && ic.target_at(0) == smi_target
                && ic.class_ids_at(0) == [ClassId::SMI, ClassId::SMI]
        })
    }

    /// One-argument copy of `ic_data` aggregated by receiver class, most
    /// hit receivers first. Receivers never hit are dropped.
    pub fn as_unary_class_checks_sorted_by_count(&self, ic_data: ObjectId) -> ObjectResult<ObjectId> {
        let source = self.heap().read::<ICData, _>(ic_data, ICData::clone);
        if source.num_args_tested() == 0 {
            return Err(ObjectError::api("static call sites have no receiver checks"));
        }
        let mut aggregated: Vec<(ClassId, Option<ObjectId>, u32)> = Vec::new();
        for check in source.checks() {
            let receiver = check.class_ids[0];
            match aggregated.iter_mut().find(|(cid, _, _)| *cid == receiver) {
                Some((_, _, count)) => *count = count.saturating_add(check.count),
                None => aggregated.push((receiver, check.target, check.count)),
            }
        }
        aggregated.retain(|&(_, _, count)| count > 0);
        aggregated.sort_by(|a, b| b.2.cmp(&a.2));

        let mut unary = ICData::new(
            source.owner,
            source.target_name,
            source.arguments_descriptor,
            source.deopt_id,
            1,
            source.rebind_rule(),
        );
        unary.deopt_reasons = source.deopt_reasons;
        for (cid, target, count) in aggregated {
            unary.add_receiver_check(cid, target, count, StaticTypeExactness::NotTracking);
        }
        self.allocate(unary, Space::Old)
    }

    /// Independent copy for an inlined instance of the call site.
    pub fn clone_ic_data(&self, ic_data: ObjectId) -> ObjectResult<ObjectId> {
        let copy = self.heap().read::<ICData, _>(ic_data, ICData::clone);
        self.allocate(copy, Space::Old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionKind, testing::*};

    fn site(isolate: &Isolate, name: &str, num_args: usize) -> ObjectId {
        let owner = isolate
            .new_function("caller", FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
            .unwrap();
        let descriptor = isolate
            .new_arguments_descriptor(&crate::ArgumentsDescriptor::positional(0, num_args))
            .unwrap();
        isolate
            .new_ic_data(owner, name, descriptor, 7, num_args, RebindRule::Instance)
            .unwrap()
    }

    fn target(isolate: &Isolate, name: &str) -> ObjectId {
        isolate
            .new_function(name, FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
            .unwrap()
    }

    fn assert_sentinel_terminated(ic: &ICData) {
        let checks = ic.number_of_checks();
        assert_eq!(ic.table_len(), checks + 1, "exactly one trailing sentinel");
        assert!(ic.is_sentinel_at(checks));
    }

    #[test]
    fn table_stays_sentinel_terminated() {
        let isolate = test_isolate();
        let ic = site(&isolate, "foo", 2);
        let a = target(&isolate, "a");
        let pairs = [
            [ClassId::STRING, ClassId::SMI],
            [ClassId::DOUBLE, ClassId::MINT],
            [ClassId::ARRAY, ClassId::ARRAY],
            [ClassId::SMI, ClassId::DOUBLE],
        ];
        for (i, pair) in pairs.iter().enumerate() {
            isolate.add_ic_check(ic, pair, Some(a));
            isolate.heap().read::<ICData, _>(ic, |ic| {
                assert_eq!(ic.number_of_checks(), i + 1);
                assert_sentinel_terminated(ic);
            });
        }
    }

    #[test]
    fn smi_smi_entry_moves_to_front() {
        let isolate = test_isolate();
        let ic = site(&isolate, "+", 2);
        let a = target(&isolate, "a");
        isolate.add_ic_check(ic, &[ClassId::DOUBLE, ClassId::DOUBLE], Some(a));
        let index = isolate.add_ic_check(ic, &[ClassId::SMI, ClassId::SMI], Some(a));
        assert_eq!(index, 0);
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.class_ids_at(0), vec![ClassId::SMI, ClassId::SMI]);
            assert_eq!(ic.class_ids_at(1), vec![ClassId::DOUBLE, ClassId::DOUBLE]);
            assert_sentinel_terminated(ic);
        });
    }

    #[test]
    fn smi_smi_fast_path_is_idempotent() {
        let isolate = test_isolate();
        let plus = isolate
            .new_function("+", FunctionKind::Regular, ClassId::INT, isolate.dynamic_type())
            .unwrap();
        isolate.add_function(ClassId::INT, plus);

        let ic = site(&isolate, "+", 2);
        assert!(isolate.add_smi_smi_check_for_fast_path(ic));
        assert!(isolate.add_smi_smi_check_for_fast_path(ic));
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.number_of_checks(), 1);
            assert_eq!(ic.target_at(0), Some(plus));
            assert_eq!(ic.count_at(0), 0, "fast path entry starts unhit");
        });
    }

    #[test]
    fn fast_path_rejects_other_feedback() {
        let isolate = test_isolate();
        let ic = site(&isolate, "-", 2);
        let a = target(&isolate, "a");
        isolate.add_ic_check(ic, &[ClassId::DOUBLE, ClassId::SMI], Some(a));
        assert!(!isolate.add_smi_smi_check_for_fast_path(ic));
    }

    #[test]
    fn static_call_dummy_is_replaced() {
        let isolate = test_isolate();
        let owner = target(&isolate, "caller");
        let callee = target(&isolate, "callee");
        let descriptor = isolate
            .new_arguments_descriptor(&crate::ArgumentsDescriptor::positional(0, 1))
            .unwrap();
        let ic = isolate
            .new_ic_data_for_static_call(owner, callee, descriptor, 1, 1)
            .unwrap();
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.number_of_checks(), 1);
            assert_eq!(ic.class_ids_at(0), vec![ClassId::OBJECT]);
        });

        assert!(isolate.record_receiver(ic, ClassId::STRING, callee));
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.number_of_checks(), 1, "dummy entry replaced in place");
            assert_eq!(ic.receiver_class_id_at(0), ClassId::STRING);
            assert_eq!(ic.count_at(0), 1);
        });
    }

    #[test]
    fn zero_argument_site_holds_one_target() {
        let isolate = test_isolate();
        let owner = target(&isolate, "caller");
        let callee = target(&isolate, "callee");
        let descriptor = isolate
            .new_arguments_descriptor(&crate::ArgumentsDescriptor::positional(0, 0))
            .unwrap();
        let ic = isolate
            .new_ic_data_for_static_call(owner, callee, descriptor, 1, 0)
            .unwrap();
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.number_of_checks(), 1);
            assert_eq!(ic.target_at(0), Some(callee));
            assert_eq!(ic.entry_len(), 2);
        });
        assert_eq!(isolate.ic_data_target_name(ic), "callee");
    }

    #[test]
    fn receiver_feedback_turns_megamorphic() {
        let isolate = test_isolate();
        let ic = site(&isolate, "toString", 1);
        let a = target(&isolate, "a");
        let max = isolate.settings().ic_data_max_checks;
        for cid in 0..max {
            let cid = ClassId(ClassId::NUM_PREDEFINED.0 + cid as u32);
            assert!(isolate.record_receiver(ic, cid, a));
        }
        assert!(isolate.record_receiver(ic, ClassId(ClassId::NUM_PREDEFINED.0), a));
        let overflow = ClassId(ClassId::NUM_PREDEFINED.0 + max as u32);
        assert!(!isolate.record_receiver(ic, overflow, a));
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert!(ic.is_megamorphic());
            assert_eq!(ic.number_of_checks(), max);
            assert_eq!(ic.aggregate_count(), max as u64 + 1);
            assert_eq!(ic.count_at(0), 2);
        });
    }

    #[test]
    fn unary_compaction_sorts_and_drops_unhit() {
        let isolate = test_isolate();
        let ic = site(&isolate, "compareTo", 2);
        let a = target(&isolate, "a");
        let b = target(&isolate, "b");
        isolate.heap().write::<ICData, _>(ic, |ic| {
            ic.add_check(&[ClassId::STRING, ClassId::STRING], Some(a), 3);
            ic.add_check(&[ClassId::DOUBLE, ClassId::SMI], Some(b), 5);
            ic.add_check(&[ClassId::STRING, ClassId::SMI], Some(a), 4);
            ic.add_check(&[ClassId::ARRAY, ClassId::SMI], Some(b), 0);
            ic.add_deopt_reason(DeoptReasons::CHECK_CLASS);
        });
        let unary = isolate.as_unary_class_checks_sorted_by_count(ic).unwrap();
        isolate.heap().read::<ICData, _>(unary, |ic| {
            assert_eq!(ic.num_args_tested(), 1);
            let order: Vec<_> = ic.checks().map(|c| (c.class_ids[0], c.count)).collect();
            assert_eq!(order, vec![(ClassId::STRING, 7), (ClassId::DOUBLE, 5)]);
            assert_eq!(ic.target_for_receiver_class_id(ClassId::DOUBLE), Some(b));
            assert!(!ic.has_receiver_class_id(ClassId::ARRAY));
            assert!(ic.has_deopt_reason(DeoptReasons::CHECK_CLASS));
            assert_sentinel_terminated(ic);
        });
    }

    #[test]
    fn used_checks_ignore_unhit_entries() {
        let mut ic = ICData::new(ObjectId(1), ObjectId(2), ObjectId(3), 0, 1, RebindRule::Instance);
        ic.add_receiver_check(ClassId::SMI, None, 0, StaticTypeExactness::NotTracking);
        ic.add_receiver_check(ClassId::DOUBLE, None, 2, StaticTypeExactness::NotTracking);
        assert_eq!(ic.number_of_checks(), 2);
        assert_eq!(ic.number_of_used_checks(), 1);
    }

    #[test]
    fn exactness_is_recorded_per_receiver() {
        let ic = ICData::new(ObjectId(1), ObjectId(2), ObjectId(3), 0, 1, RebindRule::Instance);
        let mut ic = ic.with_exactness_tracking(ObjectId(4));
        ic.add_receiver_check(ClassId::ARRAY, None, 1, StaticTypeExactness::HasExactSuperClass);
        assert_eq!(ic.entry_len(), 4);
        assert_eq!(ic.exactness_at(0), Some(StaticTypeExactness::HasExactSuperClass));
    }

    #[test]
    fn clone_is_independent() {
        let isolate = test_isolate();
        let ic = site(&isolate, "foo", 1);
        let a = target(&isolate, "a");
        isolate.record_receiver(ic, ClassId::STRING, a);
        let copy = isolate.clone_ic_data(ic).unwrap();
        isolate.record_receiver(copy, ClassId::DOUBLE, a);
        assert_eq!(isolate.heap().read::<ICData, _>(ic, ICData::number_of_checks), 1);
        assert_eq!(isolate.heap().read::<ICData, _>(copy, ICData::number_of_checks), 2);
    }

    #[test]
    fn racing_counters_never_exceed_hits() {
        let isolate = test_isolate();
        let ic = site(&isolate, "foo", 1);
        let a = target(&isolate, "a");
        isolate.record_receiver(ic, ClassId::STRING, a);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        isolate.increment_ic_count(ic, 0);
                    }
                });
            }
        });
        let count = isolate.heap().read::<ICData, _>(ic, |ic| ic.count_at(0));
        assert!((2..=1001).contains(&count), "count {count}");
    }

    #[test]
    fn racing_receivers_share_one_entry() {
        let isolate = test_isolate();
        let ic = site(&isolate, "bar", 1);
        let a = target(&isolate, "a");
        let receivers = [ClassId::STRING, ClassId::DOUBLE, ClassId::MINT];
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        for cid in receivers {
                            assert!(isolate.record_receiver(ic, cid, a));
                        }
                    }
                });
            }
        });
        isolate.heap().read::<ICData, _>(ic, |ic| {
            assert_eq!(ic.number_of_checks(), receivers.len());
            for cid in receivers {
                let index = ic.find_check(&[cid]).unwrap();
                assert_eq!(ic.count_at(index), 400, "every hit on {cid:?} counted once");
            }
        });
    }
}
