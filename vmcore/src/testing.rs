//! Fixtures shared by the unit tests.

use crate::{
    ClassId, FieldFlags, Function, FunctionKind, Isolate, IsolateCreateInfo, Nullability,
    ObjectId, Space, TypeParameter, TypeState,
};

pub(crate) fn test_isolate() -> Isolate {
    Isolate::new(IsolateCreateInfo::default())
}

/// Finalized class `name<T extends Object>` and its type parameter.
pub(crate) fn generic_class(isolate: &Isolate, name: &str) -> (ClassId, ObjectId) {
    let cid = isolate.new_class(name, None).unwrap();
    let t = isolate.symbol("T").unwrap();
    let param = isolate
        .new_type_parameter(TypeParameter::for_class(cid, 0, t, isolate.object_type()))
        .unwrap();
    let params = isolate.new_type_arguments(vec![param], Space::Old).unwrap();
    isolate.set_type_parameters(cid, Some(params));
    isolate.ensure_is_finalized(cid).unwrap();
    (cid, param)
}

/// Finalized subclass of Object with `num_fields` dynamic instance fields.
pub(crate) fn plain_class(isolate: &Isolate, name: &str, num_fields: usize) -> ClassId {
    let cid = isolate.new_class(name, None).unwrap();
    for i in 0..num_fields {
        let field = isolate
            .new_field(&format!("f{i}"), isolate.dynamic_type(), FieldFlags::empty())
            .unwrap();
        isolate.add_field(cid, field);
    }
    isolate.ensure_is_finalized(cid).unwrap();
    cid
}

/// Finalized class extending `super_class`, Object if `None`, with its
/// declaration type.
pub(crate) fn plain_subclass(
    isolate: &Isolate,
    name: &str,
    super_class: Option<ClassId>,
) -> (ClassId, ObjectId) {
    let cid = isolate.new_class(name, None).unwrap();
    if let Some(super_class) = super_class {
        isolate.set_super_type(cid, Some(isolate.declaration_type_of(super_class)));
    }
    isolate.ensure_is_finalized(cid).unwrap();
    (cid, isolate.declaration_type_of(cid))
}

/// Fresh finalized, non-canonical `cid<args>`.
pub(crate) fn class_type(isolate: &Isolate, cid: ClassId, args: &[ObjectId]) -> ObjectId {
    let arguments = (!args.is_empty())
        .then(|| isolate.new_type_arguments(args.to_vec(), Space::Old).unwrap());
    let ty = isolate
        .new_type(cid, arguments, Nullability::Legacy, Space::Old)
        .unwrap();
    isolate.mark_type_finalized(ty);
    ty
}

pub(crate) fn list_of(isolate: &Isolate, element: ObjectId) -> ObjectId {
    class_type(isolate, ClassId::ARRAY, &[element])
}

pub(crate) fn future_or_of(isolate: &Isolate, ty: ObjectId) -> ObjectId {
    class_type(isolate, ClassId::FUTURE_OR, &[ty])
}

/// Finalized `result Function(params)`, the last
/// `num_optional_positional` parameters optional.
pub(crate) fn signature_type(
    isolate: &Isolate,
    result: ObjectId,
    params: &[ObjectId],
    num_optional_positional: usize,
) -> ObjectId {
    let names = (0..params.len())
        .map(|i| isolate.symbol(&format!("p{i}")).unwrap())
        .collect();
    let signature = Function::new_signature(ClassId::OBJECT, None, result).with_parameters(
        params.to_vec(),
        names,
        num_optional_positional,
        false,
    );
    let signature = isolate.allocate(signature, Space::Old).unwrap();
    let ty = isolate
        .new_function_type(signature, Nullability::Legacy, Space::Old)
        .unwrap();
    isolate.mark_type_finalized(ty);
    ty
}

/// Function `name<T>()` and its type parameter.
pub(crate) fn generic_function(isolate: &Isolate, name: &str) -> (ObjectId, ObjectId) {
    let fun = isolate
        .new_function(name, FunctionKind::Regular, ClassId::OBJECT, isolate.dynamic_type())
        .unwrap();
    let t = isolate.symbol("T").unwrap();
    let mut param = TypeParameter::for_function(fun, 0, t, isolate.object_type());
    param.state = TypeState::FinalizedUninstantiated;
    let param = isolate.new_type_parameter(param).unwrap();
    let params = isolate.new_type_arguments(vec![param], Space::Old).unwrap();
    isolate
        .heap()
        .write::<Function, _>(fun, |f| f.type_parameters = Some(params));
    (fun, param)
}
