//! Interning of immutable values.
//!
//! Every table maps a structural key to the one registered representative.
//! Keys are computed without holding the table lock (computing them may
//! canonicalize sub-parts), the insert re-probes under the lock.
use std::hash::Hash;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    Array, ClassId, Closure, Instance, Isolate, Object, ObjectError, ObjectId, ObjectResult,
    Space, StringObject, TypeKey, TypeParameterKey, Value, ValueKind,
};

pub struct CanonicalTable<K> {
    name: &'static str,
    entries: RwLock<AHashMap<K, ObjectId>>,
}

impl<K: Hash + Eq> CanonicalTable<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(AHashMap::new()),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<ObjectId> {
        self.entries.read().get(key).copied()
    }

    /// Registers `candidate` unless another thread registered the key first.
    /// Returns the representative and whether `candidate` became it.
    pub fn insert(&self, key: K, candidate: ObjectId) -> (ObjectId, bool) {
        let mut entries = self.entries.write();
        if let Some(&existing) = entries.get(&key) {
            return (existing, false);
        }
        entries.insert(key, candidate);
        let len = entries.len();
        if len.is_power_of_two() && len >= 64 {
            log::debug!("canonical {} table grew to {len} entries", self.name);
        }
        (candidate, true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<ObjectId> {
        self.entries.read().values().copied().collect()
    }
}

/// Constant instances, arrays and closures keyed by class and content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    class_id: ClassId,
    values: Vec<Value>,
}

pub struct CanonicalTables {
    pub symbols: CanonicalTable<Box<[u16]>>,
    pub mints: CanonicalTable<i64>,
    pub doubles: CanonicalTable<u64>,
    pub types: CanonicalTable<TypeKey>,
    pub type_parameters: CanonicalTable<TypeParameterKey>,
    pub type_arguments: CanonicalTable<Vec<ObjectId>>,
    pub instances: CanonicalTable<InstanceKey>,
}

impl Default for CanonicalTables {
    fn default() -> Self {
        Self {
            symbols: CanonicalTable::new("symbol"),
            mints: CanonicalTable::new("mint"),
            doubles: CanonicalTable::new("double"),
            types: CanonicalTable::new("type"),
            type_parameters: CanonicalTable::new("type parameter"),
            type_arguments: CanonicalTable::new("type arguments"),
            instances: CanonicalTable::new("instance"),
        }
    }
}

impl Isolate {
    /// Probe, build the candidate, promote it to old space and insert.
    pub(crate) fn canonicalize_with<K: Hash + Eq>(
        &self,
        table: &CanonicalTable<K>,
        key: K,
        make: impl FnOnce() -> ObjectResult<ObjectId>,
    ) -> ObjectResult<ObjectId> {
        self.register_canonical(table, key, make).map(|(id, _)| id)
    }

    fn register_canonical<K: Hash + Eq>(
        &self,
        table: &CanonicalTable<K>,
        key: K,
        make: impl FnOnce() -> ObjectResult<ObjectId>,
    ) -> ObjectResult<(ObjectId, bool)> {
        if let Some(existing) = table.lookup(&key) {
            return Ok((existing, false));
        }
        let candidate = self.promote(make()?)?;
        let (winner, inserted) = table.insert(key, candidate);
        self.heap().set_canonical(winner);
        Ok((winner, inserted))
    }

    // ── symbols ────────────────────────────────────────────────────

    /// Interned string, equal contents give the identical object.
    pub fn symbol(&self, name: &str) -> ObjectResult<ObjectId> {
        let units: Box<[u16]> = name.encode_utf16().collect();
        self.canonicalize_with(&self.canonical_tables().symbols, units, || {
            self.allocate(StringObject::new(name), Space::Old)
        })
    }

    pub fn symbol_from_utf16(&self, units: Vec<u16>) -> ObjectResult<ObjectId> {
        let key: Box<[u16]> = units.clone().into_boxed_slice();
        self.canonicalize_with(&self.canonical_tables().symbols, key, || {
            self.allocate(StringObject::from_utf16(units), Space::Old)
        })
    }

    pub fn lookup_symbol(&self, name: &str) -> Option<ObjectId> {
        let units: Box<[u16]> = name.encode_utf16().collect();
        self.canonical_tables().symbols.lookup(&units)
    }

    pub fn is_symbol(&self, id: ObjectId) -> bool {
        self.heap().is_string(id) && self.heap().is_canonical(id)
    }

    pub fn canonicalize_string(&self, id: ObjectId) -> ObjectResult<ObjectId> {
        if self.heap().is_canonical(id) {
            return Ok(id);
        }
        let units: Box<[u16]> = self
            .heap()
            .read::<StringObject, _>(id, |s| s.to_utf16())
            .into_boxed_slice();
        self.canonicalize_with(&self.canonical_tables().symbols, units, || Ok(id))
    }

    // ── numbers ────────────────────────────────────────────────────

    /// Smi when in range, otherwise a fresh mint.
    pub fn new_integer(&self, value: i64, space: Space) -> ObjectResult<Value> {
        match Value::try_from_i64(value) {
            Some(smi) => Ok(smi),
            None => self.allocate(Object::Mint(value), space).map(ObjectId::value),
        }
    }

    pub fn canonical_integer(&self, value: i64) -> ObjectResult<Value> {
        if let Some(smi) = Value::try_from_i64(value) {
            return Ok(smi);
        }
        self.canonicalize_with(&self.canonical_tables().mints, value, || {
            self.allocate(Object::Mint(value), Space::Old)
        })
        .map(ObjectId::value)
    }

    pub fn new_double(&self, value: f64, space: Space) -> ObjectResult<ObjectId> {
        self.allocate(Object::Double(value), space)
    }

    /// Canonical doubles are identified by bit pattern.
    pub fn canonical_double(&self, value: f64) -> ObjectResult<ObjectId> {
        self.canonicalize_with(&self.canonical_tables().doubles, value.to_bits(), || {
            self.allocate(Object::Double(value), Space::Old)
        })
    }

    // ── general values ─────────────────────────────────────────────

    pub fn is_canonical_value(&self, value: Value) -> bool {
        match value.kind() {
            ValueKind::Smi(_) => true,
            ValueKind::Ref(id) => self.heap().is_canonical(id),
        }
    }

    /// Canonical representative of any constant value.
    pub fn canonicalize_value(&self, value: Value) -> ObjectResult<Value> {
        let ValueKind::Ref(id) = value.kind() else {
            return Ok(value);
        };
        let heap = self.heap();
        if heap.is_canonical(id) {
            return Ok(value);
        }
        let cid = heap.cell(id).class_id();
        let canonical = match cid {
            ClassId::MINT => {
                let mint = heap.mint_value(id).unwrap_or_default();
                return self.canonical_integer(mint);
            }
            ClassId::DOUBLE => {
                let double = heap.double_value(id).unwrap_or_default();
                self.canonical_double(double)?
            }
            cid if cid.is_string() => self.canonicalize_string(id)?,
            ClassId::TYPE | ClassId::TYPE_REF | ClassId::TYPE_PARAMETER => {
                self.canonicalize_type(id)?
            }
            ClassId::TYPE_ARGUMENTS => {
                return self.canonicalize_type_arguments(Some(id)).map(Value::from);
            }
            // functions, classes and other metadata are unique already
            cid if cid.is_internal_vm_object() => id,
            _ => self.canonicalize_instance(id)?,
        };
        Ok(canonical.value())
    }

    /// Canonicalizes the fields first, then registers the instance and
    /// records it in its class's constants.
    pub fn canonicalize_instance(&self, id: ObjectId) -> ObjectResult<ObjectId> {
        let heap = self.heap();
        if heap.is_canonical(id) {
            return Ok(id);
        }
        let (class_id, values) = heap.with_object(id, |object| match object {
            Object::Instance(instance) => Some((instance.class_id, instance.fields.clone())),
            Object::Array(array) if array.is_immutable() => {
                let mut values = vec![Value::from(array.type_arguments)];
                values.extend_from_slice(array.elements());
                Some((array.class_id(), values))
            }
            Object::Closure(closure) => Some((
                ClassId::CLOSURE,
                vec![
                    Value::from(closure.instantiator_type_arguments),
                    Value::from(closure.function_type_arguments),
                    Value::from(closure.delayed_type_arguments),
                    closure.function.value(),
                    closure.context,
                ],
            )),
            _ => None,
        })
        .ok_or_else(|| {
            let kind = heap.with_object(id, |object| object.kind_name());
            ObjectError::api(format!("{kind} {id} cannot be canonicalized"))
        })?;

        let mut canonical_values = Vec::with_capacity(values.len());
        for value in &values {
            canonical_values.push(self.canonicalize_value(*value)?);
        }
        if canonical_values != values {
            write_back_fields(self, id, &canonical_values);
        }

        let key = InstanceKey {
            class_id,
            values: canonical_values,
        };
        let table = &self.canonical_tables().instances;
        let (canonical, inserted) = self.register_canonical(table, key, || Ok(id))?;
        if inserted {
            self.add_class_constant(class_id, canonical);
        }
        Ok(canonical)
    }
}

fn write_back_fields(isolate: &Isolate, id: ObjectId, values: &[Value]) {
    let heap = isolate.heap();
    let cid = heap.cell(id).class_id();
    match cid {
        ClassId::ARRAY | ClassId::IMMUTABLE_ARRAY => heap.write::<Array, _>(id, |array| {
            array.type_arguments = values[0].as_non_null();
            for (index, value) in values[1..].iter().enumerate() {
                array.set(index, *value);
            }
        }),
        ClassId::CLOSURE => heap.write::<Closure, _>(id, |closure| {
            closure.instantiator_type_arguments = values[0].as_non_null();
            closure.function_type_arguments = values[1].as_non_null();
            closure.delayed_type_arguments = values[2].as_non_null();
            closure.context = values[4];
        }),
        _ => heap.write::<Instance, _>(id, |instance| instance.fields.copy_from_slice(values)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn symbols_are_interned() {
        let isolate = test_isolate();
        let a = isolate.symbol("hello").unwrap();
        let b = isolate.symbol("hello").unwrap();
        let c = isolate.symbol_from_utf16("hello".encode_utf16().collect()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(isolate.is_symbol(a));
        assert_eq!(isolate.lookup_symbol("hello"), Some(a));
        assert_eq!(isolate.lookup_symbol("never interned"), None);
    }

    #[test]
    fn strings_canonicalize_to_the_symbol() {
        let isolate = test_isolate();
        let symbol = isolate.symbol("abc").unwrap();
        let young = isolate
            .allocate(StringObject::new("abc"), Space::New)
            .unwrap();
        assert_eq!(isolate.canonicalize_string(young).unwrap(), symbol);
    }

    #[test]
    fn integers_box_only_outside_smi_range() {
        let isolate = test_isolate();
        assert_eq!(isolate.new_integer(42, Space::New).unwrap(), Value::from_smi(42));
        let big = isolate.new_integer(i64::MAX, Space::New).unwrap();
        assert!(big.is_object());
        let a = isolate.canonical_integer(i64::MAX).unwrap();
        let b = isolate.canonical_integer(i64::MAX).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, big);
        assert_eq!(isolate.canonicalize_value(big).unwrap(), a);
        assert!(isolate.is_canonical_value(Value::from_smi(-1)));
    }

    #[test]
    fn fresh_mints_agree_once_canonical() {
        let isolate = test_isolate();
        let a = isolate.new_integer(1 << 62, Space::New).unwrap();
        let b = isolate.new_integer(1 << 62, Space::New).unwrap();
        assert_ne!(a, b, "fresh boxes are distinct");
        let a = isolate.canonicalize_value(a).unwrap();
        let b = isolate.canonicalize_value(b).unwrap();
        assert_eq!(a, b);
        assert!(isolate.is_canonical_value(a));
    }

    #[test]
    fn doubles_canonicalize_by_bits() {
        let isolate = test_isolate();
        let zero = isolate.canonical_double(0.0).unwrap();
        let negative_zero = isolate.canonical_double(-0.0).unwrap();
        assert_ne!(zero, negative_zero);
        let nan_a = isolate.canonical_double(f64::NAN).unwrap();
        let nan_b = isolate.canonical_double(f64::NAN).unwrap();
        assert_eq!(nan_a, nan_b);
        assert!(isolate.heap().is_canonical(zero));
    }

    #[test]
    fn instances_canonicalize_fields_first() {
        let isolate = test_isolate();
        let class = plain_class(&isolate, "Point", 2);
        let make = |x: f64| {
            let instance = isolate.allocate(Instance::new(class, 2), Space::New).unwrap();
            let x = isolate.new_double(x, Space::New).unwrap();
            isolate.heap().write::<Instance, _>(instance, |i| {
                i.set_field_at(0, x.value());
                i.set_field_at(1, Value::from_smi(7));
            });
            instance
        };
        let a = isolate.canonicalize_instance(make(1.5)).unwrap();
        let b = isolate.canonicalize_instance(make(1.5)).unwrap();
        let c = isolate.canonicalize_instance(make(2.5)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let field = isolate.heap().read::<Instance, _>(a, |i| i.field_at(0));
        assert_eq!(field.as_object(), Some(isolate.canonical_double(1.5).unwrap()));
        assert_eq!(isolate.class_constants(class), vec![a, c]);
    }

    #[test]
    fn only_immutable_arrays_are_constants() {
        let isolate = test_isolate();
        let mutable = isolate.allocate(Array::new(1, false), Space::New).unwrap();
        assert!(isolate.canonicalize_instance(mutable).is_err());
        let frozen = isolate
            .allocate(Array::from_values(vec![Value::from_smi(1)], true), Space::New)
            .unwrap();
        let again = isolate
            .allocate(Array::from_values(vec![Value::from_smi(1)], true), Space::New)
            .unwrap();
        assert_eq!(
            isolate.canonicalize_instance(frozen).unwrap(),
            isolate.canonicalize_instance(again).unwrap()
        );
    }

    #[test]
    fn concurrent_interning_agrees_on_one_symbol() {
        let isolate = test_isolate();
        let results: Vec<ObjectId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| isolate.symbol("shared").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
