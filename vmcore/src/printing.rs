use crate::{
    Array, Bytecode, Class, ClassId, Closure, Code, Context, ExceptionHandlers, Field, Function,
    ICData, Isolate, LocalVarDescriptors, MegamorphicCache, Namespace, ObjectId, ObjectPool,
    PcDescriptors, SingleTargetCache, SubtypeTestCache, TypeParameter, UnlinkedCall, Value,
    ValueKind, scrub_name,
};

impl Isolate {
    /// One line description of `value` for logs and debugging.
    pub fn to_cstring(&self, value: Value) -> String {
        let id = match value.kind() {
            ValueKind::Smi(value) => return value.to_string(),
            ValueKind::Ref(_) if value.is_null() => return "null".to_owned(),
            ValueKind::Ref(id) => id,
        };
        let heap = self.heap();
        let cid = heap.cell(id).class_id();
        let name_of = |symbol: ObjectId| heap.string_value(symbol);
        match cid {
            ClassId::BOOL => heap.bool_value(id).unwrap_or_default().to_string(),
            ClassId::MINT => heap.mint_value(id).unwrap_or_default().to_string(),
            ClassId::DOUBLE => format!("{:?}", heap.double_value(id).unwrap_or_default()),
            cid if cid.is_string() => heap.string_value(id),
            cid if cid.is_array() => {
                let len = heap.read::<Array, _>(id, Array::len);
                format!("{} len:{len}", self.class_name(cid))
            }
            ClassId::CLOSURE => {
                let function = heap.read::<Closure, _>(id, |c| c.function);
                format!("Closure: {}", self.function_qualified_name(function))
            }
            ClassId::CONTEXT => {
                let len = heap.read::<Context, _>(id, |c| c.variables.len());
                format!("Context num_variables: {len}")
            }
            ClassId::TYPE => format!("Type: {}", self.type_name(id)),
            ClassId::TYPE_REF => format!("TypeRef: {}", self.type_name(id)),
            ClassId::TYPE_PARAMETER => {
                let (name, index, class) = heap.read::<TypeParameter, _>(id, |p| {
                    (p.name, p.index, p.parameterized_class)
                });
                let mut out = format!("TypeParameter: name: {}; index: {index};", name_of(name));
                if class != ClassId::ILLEGAL {
                    out.push_str(&format!(" class: {}", self.class_name(class)));
                }
                out
            }
            ClassId::TYPE_ARGUMENTS => {
                let names: Vec<String> = self
                    .type_arguments_types(id)
                    .into_iter()
                    .map(|ty| self.type_name(ty))
                    .collect();
                format!("TypeArguments: [{}]", names.join(", "))
            }
            ClassId::CLASS => {
                let class = heap.read::<Class, _>(id, |c| c.id);
                format!("Class: {}", self.class_name(class))
            }
            ClassId::FUNCTION => {
                let (kind, is_static) = heap.read::<Function, _>(id, |f| (f.kind, f.is_static()));
                let modifier = if is_static { " static" } else { "" };
                format!(
                    "Function '{}':{modifier} {kind:?}",
                    self.function_qualified_name(id)
                )
            }
            ClassId::FIELD => {
                let (name, owner, is_static, is_final) = heap.read::<Field, _>(id, |f| {
                    (f.name, f.owner, f.is_static(), f.is_final())
                });
                let mut out = format!("Field <{}.{}>:", self.class_name(owner), name_of(name));
                if is_static {
                    out.push_str(" static");
                }
                if is_final {
                    out.push_str(" final");
                }
                out
            }
            ClassId::LIBRARY => format!("Library:'{}'", self.library_url(id)),
            ClassId::NAMESPACE => {
                let target = heap.read::<Namespace, _>(id, |n| n.target);
                format!("Namespace for library '{}'", self.library_url(target))
            }
            ClassId::SCRIPT => format!("Script({})", self.script_url(id)),
            ClassId::CODE => {
                let (optimized, size) = heap.read::<Code, _>(id, |c| (c.is_optimized(), c.size()));
                let kind = if optimized { "optimized" } else { "unoptimized" };
                format!("Code({kind}, size: {size})")
            }
            ClassId::BYTECODE => {
                let size = heap.read::<Bytecode, _>(id, Bytecode::size);
                format!("Bytecode(size: {size})")
            }
            ClassId::OBJECT_POOL => {
                format!("ObjectPool len:{}", heap.read::<ObjectPool, _>(id, ObjectPool::len))
            }
            ClassId::PC_DESCRIPTORS => {
                let len = heap.read::<PcDescriptors, _>(id, PcDescriptors::len);
                format!("PcDescriptors({len} entries)")
            }
            ClassId::EXCEPTION_HANDLERS => {
                let len = heap.read::<ExceptionHandlers, _>(id, ExceptionHandlers::num_entries);
                format!("ExceptionHandlers({len} handlers)")
            }
            ClassId::LOCAL_VAR_DESCRIPTORS => {
                let len = heap.read::<LocalVarDescriptors, _>(id, LocalVarDescriptors::len);
                format!("LocalVarDescriptors len:{len}")
            }
            ClassId::IC_DATA => {
                let (name, args, checks, deopt_id) = heap.read::<ICData, _>(id, |ic| {
                    (ic.target_name, ic.num_args_tested(), ic.number_of_checks(), ic.deopt_id)
                });
                format!(
                    "ICData(target:'{}' num-args: {args} num-checks: {checks} deopt-id: {deopt_id})",
                    name_of(name)
                )
            }
            ClassId::MEGAMORPHIC_CACHE => {
                let (name, filled, capacity) = heap.read::<MegamorphicCache, _>(id, |c| {
                    (c.target_name, c.filled_entry_count(), c.capacity())
                });
                format!(
                    "MegamorphicCache(name: {}, filled: {filled}, capacity: {capacity})",
                    name_of(name)
                )
            }
            ClassId::SUBTYPE_TEST_CACHE => {
                let len = heap.read::<SubtypeTestCache, _>(id, SubtypeTestCache::len);
                format!("SubtypeTestCache({len} entries)")
            }
            ClassId::SINGLE_TARGET_CACHE => {
                let (target, lower, upper) = heap.read::<SingleTargetCache, _>(id, |c| {
                    (c.target, c.lower_limit, c.upper_limit)
                });
                match target {
                    Some(target) => format!(
                        "SingleTargetCache({}, cids: [{}, {}])",
                        self.function_qualified_name(target),
                        lower.0,
                        upper.0
                    ),
                    None => "SingleTargetCache(unset)".to_owned(),
                }
            }
            ClassId::UNLINKED_CALL => {
                let name = heap.read::<UnlinkedCall, _>(id, |c| c.target_name);
                format!("UnlinkedCall({})", name_of(name))
            }
            cid => format!("Instance of '{}'", scrub_name(&self.class_name(cid))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Space, StringObject, testing::*};

    #[test]
    fn primitives() {
        let isolate = test_isolate();
        assert_eq!(isolate.to_cstring(Value::from_smi(-42)), "-42");
        assert_eq!(isolate.to_cstring(Value::NULL), "null");
        assert_eq!(isolate.to_cstring(isolate.bool_value(true)), "true");
        let mint = isolate.new_integer(1 << 62, Space::Old).unwrap();
        assert_eq!(isolate.to_cstring(mint), (1i64 << 62).to_string());
        let double = isolate.new_double(1.5, Space::Old).unwrap();
        assert_eq!(isolate.to_cstring(double.value()), "1.5");
        let string = isolate.allocate(StringObject::new("héllo"), Space::New).unwrap();
        assert_eq!(isolate.to_cstring(string.value()), "héllo");
    }

    #[test]
    fn types_and_classes() {
        let isolate = test_isolate();
        assert_eq!(isolate.to_cstring(isolate.int_type().value()), "Type: int");
        let (boxed, param) = generic_class(&isolate, "Box");
        assert_eq!(
            isolate.to_cstring(param.value()),
            "TypeParameter: name: T; index: 0; class: Box"
        );
        let class = isolate.class_object(boxed);
        assert_eq!(isolate.to_cstring(class.value()), "Class: Box");
        let instance = isolate.new_instance(boxed, Space::New).unwrap();
        assert_eq!(isolate.to_cstring(instance.value()), "Instance of 'Box'");
        let args = isolate
            .new_type_arguments(vec![isolate.int_type(), isolate.string_type()], Space::New)
            .unwrap();
        assert_eq!(isolate.to_cstring(args.value()), "TypeArguments: [int, String]");
    }

    #[test]
    fn every_bootstrapped_object_prints() {
        let isolate = test_isolate();
        let store = isolate.object_store();
        assert_eq!(isolate.to_cstring(store.empty_array.value()), "_ImmutableList len:0");
        assert!(isolate.to_cstring(store.out_of_memory.value()).starts_with("Instance of"));
        assert!(
            isolate
                .to_cstring(store.megamorphic_miss_function.value())
                .starts_with("Function '")
        );
    }
}
