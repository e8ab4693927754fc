//! Class finalization: supertype resolution, type argument flattening and
//! instance layout.
//!
//! Finalization only runs on the mutator. A background compiler reaching an
//! unfinalized class aborts its compilation instead.
use crate::{
    ALL_FREE, AbstractTypeKind, Class, ClassId, ClassState, Field, Isolate,
    LanguageError, LanguageErrorKind, ObjectError, ObjectId, ObjectResult, Space, ThreadKind,
    Trail, Type, TypeParameter, TypeState, current_thread_kind,
};

impl Isolate {
    /// Finalizes `cid` and its super classes. Idempotent, an error is
    /// returned to the caller and not retried.
    pub fn ensure_is_finalized(&self, cid: ClassId) -> ObjectResult<()> {
        if self.is_class_finalized(cid) {
            return Ok(());
        }
        if current_thread_kind() == ThreadKind::BackgroundCompiler {
            return Err(ObjectError::BackgroundCompilationAborted {
                reason: format!("class {} is not finalized", self.class_name(cid)),
            });
        }
        self.finalize_class(cid, &mut Vec::new())
    }

    /// Finalized state for VM internal classes without a user visible
    /// layout.
    pub fn prefinalize(&self, cid: ClassId) -> ObjectResult<()> {
        let ty = self.canonical_type_of(cid, &[], crate::Nullability::Legacy)?;
        let alignment = self.heap().alignment();
        self.write_class(cid, |c| {
            c.set_num_type_arguments(0);
            c.set_layout(0, None, alignment);
            c.set_declaration_type(ty);
            c.advance_state(ClassState::Prefinalized);
        });
        Ok(())
    }

    fn class_error(&self, cid: ClassId, message: String) -> ObjectError {
        let (script, token_pos) = self.with_class(cid, |c| (c.script, c.token_pos));
        let error = LanguageError::new(LanguageErrorKind::Compilation, message);
        ObjectError::Language(match script {
            Some(script) => error.at(script, token_pos),
            None => error,
        })
    }

    fn finalize_class(&self, cid: ClassId, pending: &mut Vec<ClassId>) -> ObjectResult<()> {
        if self.is_class_finalized(cid) {
            return Ok(());
        }
        if pending.contains(&cid) {
            return Err(self.class_error(
                cid,
                format!("class '{}' has a cycle in its class hierarchy", self.class_name(cid)),
            ));
        }
        pending.push(cid);

        let mut super_type = self.super_type_of(cid);
        if super_type.is_none() && !cid.is_predefined() {
            super_type = Some(self.object_type());
        }
        let super_cid = match super_type {
            Some(ty) => {
                let super_cid = self.resolve_type_class(cid, ty)?;
                self.finalize_class(super_cid, pending)?;
                Some(super_cid)
            }
            None => None,
        };
        let interfaces = self.interfaces_of(cid);
        for &interface in &interfaces {
            let interface_cid = self.resolve_type_class(cid, interface)?;
            self.finalize_class(interface_cid, pending)?;
        }

        self.write_class(cid, |c| {
            if c.state() < ClassState::DeclarationLoaded {
                c.advance_state(ClassState::DeclarationLoaded);
            }
        });
        self.finalize_type_parameters(cid, super_cid)?;

        let super_type = match super_type {
            Some(ty) => Some(self.finalize_type(ty)?),
            None => None,
        };
        let mut finalized_interfaces = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            finalized_interfaces.push(self.finalize_type(interface)?);
        }
        self.write_class(cid, |c| {
            c.replace_super_type(super_type);
            c.advance_state(ClassState::TypeFinalized);
        });
        self.set_interfaces_finalized(cid, finalized_interfaces.clone());

        let declaration_type = self.build_declaration_type(cid, super_type)?;
        self.layout_instance(cid, super_cid)?;

        if let Some(super_cid) = super_cid {
            self.add_direct_subclass(super_cid, cid);
        }
        for interface in finalized_interfaces {
            let interface_cid = self.type_class_id(interface);
            if interface_cid != ClassId::FUNCTION_INTERFACE {
                self.add_direct_implementor(interface_cid, cid);
            }
        }
        self.invalidate_hierarchy_code(super_cid, cid);

        self.write_class(cid, |c| {
            c.set_declaration_type(declaration_type);
            c.advance_state(ClassState::Finalized);
        });
        pending.pop();
        log::debug!(
            "finalized class {} ({cid}): {} type arguments, {} bytes",
            self.class_name(cid),
            self.num_type_arguments(cid),
            self.with_class(cid, Class::instance_size)
        );
        Ok(())
    }

    fn set_interfaces_finalized(&self, cid: ClassId, interfaces: Vec<ObjectId>) {
        self.write_class(cid, |c| c.replace_interfaces(interfaces));
    }

    fn resolve_type_class(&self, cid: ClassId, ty: ObjectId) -> ObjectResult<ClassId> {
        let ty = self.deref_type(ty);
        let resolved = self
            .heap()
            .try_read::<Type, _>(ty, |ty| ty.class_id)
            .filter(|&target| self.try_class_object(target).is_some());
        resolved.ok_or_else(|| {
            self.class_error(
                cid,
                format!("class '{}' has an unresolvable super type", self.class_name(cid)),
            )
        })
    }

    // Own parameters move behind the inherited arguments.
    fn finalize_type_parameters(&self, cid: ClassId, super_cid: Option<ClassId>) -> ObjectResult<()> {
        let inherited = super_cid.map_or(0, |super_cid| self.num_type_arguments(super_cid));
        let own = self.num_type_parameters(cid);
        let total = inherited + own;
        if total > u16::MAX as usize {
            return Err(self.class_error(
                cid,
                format!("class '{}' has too many type arguments", self.class_name(cid)),
            ));
        }
        if let Some(params) = self.type_parameters_of(cid) {
            for (i, param) in self.type_arguments_types(params).into_iter().enumerate() {
                self.heap().write::<TypeParameter, _>(param, |p| {
                    p.parameterized_class = cid;
                    p.index = (inherited + i) as u16;
                    if !p.is_finalized() {
                        p.state = TypeState::FinalizedUninstantiated;
                    }
                });
            }
        }
        self.write_class(cid, |c| c.set_num_type_arguments(total as u16));
        Ok(())
    }

    /// Flattens the arguments of `ty` and of its nested types, then marks
    /// them finalized.
    pub fn finalize_type(&self, ty: ObjectId) -> ObjectResult<ObjectId> {
        if self.is_type_finalized(ty) {
            return Ok(ty);
        }
        match self.abstract_type_kind(ty) {
            AbstractTypeKind::TypeRef | AbstractTypeKind::TypeParameter => Ok(ty),
            AbstractTypeKind::Type => {
                self.heap()
                    .write::<Type, _>(ty, |t| t.state = TypeState::BeingFinalized);
                let (class_id, arguments, signature) =
                    self.heap().read::<Type, _>(ty, |t| (t.class_id, t.arguments, t.signature));
                if let Some(args) = arguments {
                    for (i, arg) in self.type_arguments_types(args).into_iter().enumerate() {
                        let finalized = self.finalize_type(arg)?;
                        if finalized != arg {
                            self.set_type_at(args, i, finalized);
                        }
                    }
                }
                if signature.is_none() {
                    let flattened = self.flatten_type_arguments(class_id, arguments)?;
                    if flattened != arguments {
                        self.heap().write::<Type, _>(ty, |t| t.arguments = flattened);
                    }
                }
                self.mark_type_finalized(ty);
                Ok(ty)
            }
        }
    }

    // Declared arguments cover the own parameters of `cid`, the inherited
    // prefix is derived from the super type.
    fn flatten_type_arguments(
        &self,
        cid: ClassId,
        arguments: Option<ObjectId>,
    ) -> ObjectResult<Option<ObjectId>> {
        let Some(args) = arguments else {
            return Ok(None);
        };
        let total = self.num_type_arguments(cid);
        let own = self.num_type_parameters(cid);
        let len = self.type_arguments_len(Some(args));
        if len == total {
            return Ok(Some(args));
        }
        if len != own {
            return Err(ObjectError::Language(LanguageError::new(
                LanguageErrorKind::Compilation,
                format!(
                    "wrong number of type arguments for class '{}': {len} passed, {own} expected",
                    self.class_name(cid)
                ),
            )));
        }
        let prefix_len = total - own;
        let mut flattened = vec![self.dynamic_type(); prefix_len];
        flattened.extend(self.type_arguments_types(args));
        if let Some(super_args) = self.super_type_of(cid).and_then(|ty| self.type_arguments_of(ty)) {
            let instantiator = self.new_type_arguments(flattened.clone(), Space::Old)?;
            let prefix = self.instantiate_type_arguments_from(
                super_args,
                Some(instantiator),
                None,
                ALL_FREE,
                &mut Trail::new(),
                Space::Old,
            )?;
            if let Some(Some(prefix)) = prefix {
                for (i, ty) in self.type_arguments_types(prefix).into_iter().take(prefix_len).enumerate() {
                    flattened[i] = ty;
                }
            }
        }
        self.new_type_arguments(flattened, Space::Old).map(Some)
    }

    fn build_declaration_type(
        &self,
        cid: ClassId,
        super_type: Option<ObjectId>,
    ) -> ObjectResult<ObjectId> {
        let total = self.num_type_arguments(cid);
        let mut arguments = Vec::with_capacity(total);
        if let Some(super_type) = super_type {
            let inherited = self.num_type_arguments(self.type_class_id(super_type));
            let super_args = self.type_arguments_of(super_type);
            for i in 0..inherited {
                arguments.push(self.type_at_or_dynamic(super_args, i));
            }
        }
        if let Some(params) = self.type_parameters_of(cid) {
            arguments.extend(self.type_arguments_types(params));
        }
        debug_assert_eq!(arguments.len(), total);
        self.canonical_type_of(cid, &arguments, crate::Nullability::Legacy)
    }

    fn layout_instance(&self, cid: ClassId, super_cid: Option<ClassId>) -> ObjectResult<()> {
        let (mut next, inherited_slot) = super_cid.map_or((0, None), |super_cid| {
            self.with_class(super_cid, |c| {
                (c.num_instance_slots(), c.type_arguments_field_offset())
            })
        });
        let type_arguments_slot = if self.num_type_arguments(cid) > 0 {
            inherited_slot.or_else(|| {
                let slot = next;
                next += 1;
                Some(slot)
            })
        } else {
            None
        };
        for field in self.fields_of(cid) {
            if self.heap().read::<Field, _>(field, Field::is_static) {
                self.register_static_field(field);
            } else {
                self.heap().write::<Field, _>(field, |f| f.set_host_offset(next));
                next += 1;
            }
        }
        let alignment = self.heap().alignment();
        self.write_class(cid, |c| c.set_layout(next, type_arguments_slot, alignment));
        Ok(())
    }

    // A new subclass or implementor breaks code that assumed the old
    // hierarchy of every ancestor.
    fn invalidate_hierarchy_code(&self, super_cid: Option<ClassId>, cid: ClassId) {
        let mut current = super_cid;
        while let Some(ancestor) = current {
            self.disable_cha_dependent_code(ancestor);
            current = self.super_class_of(ancestor).filter(|&next| next != ancestor);
        }
        for interface in self.interfaces_of(cid) {
            self.disable_cha_dependent_code(self.type_class_id(interface));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldFlags, Nullability, run_as_background_compiler, testing::*};

    #[test]
    fn finalization_is_idempotent() {
        let isolate = test_isolate();
        let cid = plain_class(&isolate, "Once", 2);
        let size = isolate.with_class(cid, Class::instance_size);
        isolate.ensure_is_finalized(cid).unwrap();
        assert_eq!(isolate.with_class(cid, Class::instance_size), size);
        assert_eq!(isolate.class_state(cid), ClassState::Finalized);
    }

    #[test]
    fn instance_size_is_rounded() {
        let isolate = test_isolate();
        let cid = plain_class(&isolate, "Pair", 3);
        isolate.with_class(cid, |c| {
            assert_eq!(c.num_instance_slots(), 3);
            assert_eq!(c.instance_size() % isolate.heap().alignment(), 0);
            assert!(c.instance_size() >= 8 + 3 * 8);
        });
    }

    #[test]
    fn fields_continue_after_the_super_class() {
        let isolate = test_isolate();
        let base = plain_class(&isolate, "Base", 2);
        let cid = isolate.new_class("Derived", None).unwrap();
        let base_type = isolate.declaration_type_of(base);
        isolate.set_super_type(cid, Some(base_type));
        let field = isolate
            .new_field("extra", isolate.dynamic_type(), FieldFlags::empty())
            .unwrap();
        isolate.add_field(cid, field);
        isolate.ensure_is_finalized(cid).unwrap();
        assert_eq!(isolate.heap().read::<Field, _>(field, Field::host_offset), 2);
        assert_eq!(isolate.super_class_of(cid), Some(base));
    }

    #[test]
    fn generic_classes_get_a_type_argument_slot() {
        let isolate = test_isolate();
        let (cid, param) = generic_class(&isolate, "Box");
        isolate.with_class(cid, |c| assert_eq!(c.type_arguments_field_offset(), Some(0)));
        assert_eq!(isolate.num_type_arguments(cid), 1);
        assert_eq!(isolate.heap().read::<TypeParameter, _>(param, |p| p.index), 0);
        assert_eq!(isolate.type_name(isolate.declaration_type_of(cid)), "Box<T>");
    }

    #[test]
    fn type_arguments_are_flattened() {
        let isolate = test_isolate();
        let (base, _) = generic_class(&isolate, "Base");
        // class Sub<U> extends Base<int>
        let sub = isolate.new_class("Sub", None).unwrap();
        let u = isolate
            .new_type_parameter(TypeParameter::for_class(
                sub,
                0,
                isolate.symbol("U").unwrap(),
                isolate.object_type(),
            ))
            .unwrap();
        let params = isolate.new_type_arguments(vec![u], Space::Old).unwrap();
        isolate.set_type_parameters(sub, Some(params));
        let int_args = isolate
            .new_type_arguments(vec![isolate.int_type()], Space::Old)
            .unwrap();
        let base_of_int = isolate
            .new_type(base, Some(int_args), Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.set_super_type(sub, Some(base_of_int));
        isolate.ensure_is_finalized(sub).unwrap();

        assert_eq!(isolate.num_type_arguments(sub), 2);
        assert_eq!(isolate.num_type_parameters(sub), 1);
        assert_eq!(isolate.heap().read::<TypeParameter, _>(u, |p| p.index), 1);
        let declaration = isolate.declaration_type_of(sub);
        let args = isolate.type_arguments_of(declaration).unwrap();
        assert_eq!(isolate.type_at(args, 0), isolate.int_type());
        assert_eq!(isolate.type_name(declaration), "Sub<U>");

        // Sub<String> is a Base<int>
        let sub_of_string = class_type(&isolate, sub, &[isolate.int_type(), isolate.string_type()]);
        let base_of_int = class_type(&isolate, base, &[isolate.int_type()]);
        assert!(isolate.is_subtype_of(sub_of_string, base_of_int));
    }

    #[test]
    fn hierarchy_cycles_are_language_errors() {
        let isolate = test_isolate();
        let a = isolate.new_class("A", None).unwrap();
        let b = isolate.new_class("B", None).unwrap();
        let a_type = isolate
            .new_type(a, None, Nullability::Legacy, Space::Old)
            .unwrap();
        let b_type = isolate
            .new_type(b, None, Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.set_super_type(a, Some(b_type));
        isolate.set_super_type(b, Some(a_type));
        let error = isolate.ensure_is_finalized(a).unwrap_err();
        assert!(error.is_language_error());
        assert!(error.to_string().contains("cycle"), "{error}");
        assert!(!isolate.is_class_finalized(a));
    }

    #[test]
    fn unknown_super_classes_are_reported() {
        let isolate = test_isolate();
        let cid = isolate.new_class("Orphan", None).unwrap();
        let dangling = isolate
            .new_type(ClassId(9999), None, Nullability::Legacy, Space::Old)
            .unwrap();
        isolate.set_super_type(cid, Some(dangling));
        let error = isolate.ensure_is_finalized(cid).unwrap_err();
        assert!(error.to_string().contains("unresolvable"), "{error}");
    }

    #[test]
    fn background_compiler_aborts_instead_of_finalizing() {
        let isolate = test_isolate();
        let cid = isolate.new_class("Lazy", None).unwrap();
        let result = run_as_background_compiler(|| isolate.ensure_is_finalized(cid));
        assert!(matches!(
            result,
            Err(ObjectError::BackgroundCompilationAborted { .. })
        ));
        assert!(!isolate.is_class_finalized(cid));
        isolate.ensure_is_finalized(cid).unwrap();
    }
}
