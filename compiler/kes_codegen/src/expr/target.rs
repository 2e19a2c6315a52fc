//! Expressions in assignment and deletion position.

use kes_diagnostic::ErrorCode;
use kes_ir::{Span, Type};

use super::{analyse_index, Expr, ExprKind};
use crate::emit::Code;
use crate::env::Env;
use crate::symtab::{EntryFlags, EntryId, StorageKind};

impl Expr {
    /// Declare the names this target binds.
    pub fn analyse_target_declaration(&self, env: &mut Env<'_>) {
        match &self.kind {
            ExprKind::Name { name, .. } => {
                env.declare_name(*name, Type::Object, self.span);
            }
            ExprKind::Tuple { items, .. } => {
                for item in items {
                    item.analyse_target_declaration(env);
                }
            }
            _ => {}
        }
    }

    /// Analyse this expression as an assignment target.
    pub fn analyse_target_types(mut self, env: &mut Env<'_>) -> Expr {
        let span = self.span;
        match self.kind {
            ExprKind::Name { name, .. } => {
                let id = env.lookup(name, span);
                let entry = env.symtab.entry_mut(id);
                entry.flags |= EntryFlags::ASSIGNED;
                let storage = entry.storage;
                let object_slot = entry.is_dynamic_global() || storage == StorageKind::ClassAttribute;
                let ty = entry.ty;
                if storage == StorageKind::NativeFunction {
                    env.error_at(ErrorCode::E2012, span, "cannot assign to a native function");
                    return Expr::error(span);
                }
                self.ty = if object_slot { Type::Object } else { ty };
                self.kind = ExprKind::Name {
                    name,
                    entry: Some(id),
                };
                self
            }
            ExprKind::Attribute { obj, attr } => {
                let obj = obj.analyse_types(env).coerce_to_object(env);
                Expr::new(
                    ExprKind::Attribute {
                        obj: Box::new(obj),
                        attr,
                    },
                    Type::Object,
                    span,
                )
            }
            ExprKind::Index { base, index, .. } => {
                let mut e = analyse_index(*base, *index, span, env, true);
                // The target itself computes nothing.
                e.is_temp = false;
                e
            }
            ExprKind::Tuple { items, .. } => {
                let items: Vec<Expr> = items
                    .into_iter()
                    .map(|item| item.analyse_target_types(env))
                    .collect();
                let unpack = items
                    .iter()
                    .map(|item| Expr::clone_placeholder(Type::Object, item.span).coerce_to(item.ty, env))
                    .collect();
                Expr::new(ExprKind::Tuple { items, unpack }, Type::Object, span)
            }
            ExprKind::Error => self,
            _ => {
                env.error_at(ErrorCode::E2012, span, "cannot assign to this expression");
                Expr::error(span)
            }
        }
    }

    /// Analyse this expression as the operand of `del`.
    pub fn analyse_deletion(self, env: &mut Env<'_>) -> Expr {
        let span = self.span;
        match &self.kind {
            ExprKind::Name { name, .. } => {
                let id = env.lookup(*name, span);
                let entry = env.symtab.entry(id);
                if !entry.ty.needs_refcounting()
                    && !entry.is_dynamic_global()
                    && entry.storage != StorageKind::ClassAttribute
                {
                    let text = env.name_text(*name);
                    env.error_at(ErrorCode::E2011, span, format!("cannot delete native variable '{text}'"));
                    return Expr::error(span);
                }
                env.require_lock(span, "deleting a variable");
                self.analyse_target_types(env)
            }
            ExprKind::Attribute { .. } | ExprKind::Index { .. } => {
                env.require_lock(span, "deleting an attribute or item");
                self.analyse_target_types(env)
            }
            ExprKind::Error => self,
            _ => {
                env.error_at(ErrorCode::E2011, span, "cannot delete this expression");
                Expr::error(span)
            }
        }
    }

    /// Store the already evaluated `rhs` into this target; disposes of `rhs`.
    pub fn generate_assignment_code(&mut self, rhs: &mut Expr, code: &mut Code<'_>) {
        let span = self.span;
        match &mut self.kind {
            ExprKind::Name { entry, .. } => {
                let Some(id) = *entry else {
                    debug_assert!(false, "unresolved assignment target");
                    return;
                };
                let stolen = assign_to_entry(code, id, rhs.result(), rhs.is_temp(), span);
                if stolen {
                    rhs.generate_post_assignment_code(code);
                } else {
                    rhs.generate_disposal_code(code);
                }
            }
            ExprKind::Attribute { obj, attr } => {
                obj.generate_evaluation_code(code);
                let n = code.intern_name(*attr);
                let call = format!("Kes_SetAttr({}, {n}, {})", obj.result(), rhs.result());
                code.put_error_if_neg(&call, span);
                rhs.generate_disposal_code(code);
                obj.generate_disposal_code(code);
            }
            ExprKind::Index {
                base,
                index,
                directives,
                slice,
            } => {
                let (directives, slice) = (*directives, *slice);
                base.generate_evaluation_code(code);
                index.generate_evaluation_code(code);
                if slice {
                    super::put_slice_index_checks(base.result(), index.result(), directives, span, code);
                    code.putln(&format!(
                        "{}.data[{}] = {};",
                        base.result(),
                        index.result(),
                        rhs.result()
                    ));
                } else {
                    let call = format!(
                        "Kes_SetItem({}, {}, {})",
                        base.result(),
                        index.result(),
                        rhs.result()
                    );
                    code.put_error_if_neg(&call, span);
                }
                rhs.generate_disposal_code(code);
                base.generate_disposal_code(code);
                index.generate_disposal_code(code);
            }
            ExprKind::Tuple { items, unpack } => {
                let iter = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{iter} = Kes_GetIter({});", rhs.result()));
                code.put_error_if_null(&iter, span);
                rhs.generate_disposal_code(code);
                for (i, (target, conv)) in items.iter_mut().zip(unpack.iter_mut()).enumerate() {
                    let item = code.allocate_temp(Type::Object, true);
                    code.putln(&format!("{item} = Kes_UnpackNext({iter}, {i});"));
                    code.put_error_if_null(&item, span);
                    conv.set_clone_source(&item);
                    conv.generate_evaluation_code(code);
                    target.generate_assignment_code(conv, code);
                    code.put_decref_clear(&item, Type::Object);
                    code.release_temp(&item);
                }
                code.put_error_if_neg(&format!("Kes_UnpackEnd({iter}, {})", items.len()), span);
                code.put_decref_clear(&iter, Type::Object);
                code.release_temp(&iter);
            }
            _ => debug_assert!(false, "invalid assignment target reached code generation"),
        }
    }

    pub fn generate_deletion_code(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        match &mut self.kind {
            ExprKind::Name { name, entry } => {
                let Some(id) = *entry else { return };
                let e = code.symtab.entry(id);
                let (storage, dynamic, ty) = (e.storage, e.is_dynamic_global(), e.ty);
                let n = code.intern_name(*name);
                if dynamic {
                    code.put_error_if_neg(&format!("Kes_DelModuleGlobal({n})"), span);
                } else if storage == StorageKind::ClassAttribute {
                    let ns = code.class_namespace().map(str::to_owned).unwrap_or_default();
                    code.put_error_if_neg(&format!("Kes_ObjectDelItem({ns}, {n})"), span);
                } else {
                    let access = code.entry_access(id);
                    code.put_xdecref_clear(&access, ty);
                }
            }
            ExprKind::Attribute { obj, attr } => {
                obj.generate_evaluation_code(code);
                let n = code.intern_name(*attr);
                code.put_error_if_neg(&format!("Kes_DelAttr({}, {n})", obj.result()), span);
                obj.generate_disposal_code(code);
            }
            ExprKind::Index { base, index, .. } => {
                base.generate_evaluation_code(code);
                index.generate_evaluation_code(code);
                code.put_error_if_neg(
                    &format!("Kes_DelItem({}, {})", base.result(), index.result()),
                    span,
                );
                base.generate_disposal_code(code);
                index.generate_disposal_code(code);
            }
            _ => debug_assert!(false, "invalid deletion target reached code generation"),
        }
    }
}

/// Store `value` into the variable `id`.
///
/// Returns whether the reference held by an owned `value` was stolen; the
/// caller then runs post-assignment code instead of disposal.
pub fn assign_to_entry(
    code: &mut Code<'_>,
    id: EntryId,
    value: &str,
    owned: bool,
    span: Span,
) -> bool {
    let entry = code.symtab.entry(id);
    let (storage, dynamic, ty, name) = (entry.storage, entry.is_dynamic_global(), entry.ty, entry.name);
    if dynamic || storage == StorageKind::NativeFunction {
        let n = code.intern_name(name);
        code.put_error_if_neg(&format!("Kes_SetModuleGlobal({n}, {value})"), span);
        return false;
    }
    if storage == StorageKind::ClassAttribute {
        let n = code.intern_name(name);
        let Some(ns) = code.class_namespace().map(str::to_owned) else {
            debug_assert!(false, "class attribute assigned outside its class body");
            return false;
        };
        code.put_error_if_neg(&format!("Kes_ObjectSetItem({ns}, {n}, {value})"), span);
        return false;
    }
    let access = code.entry_access(id);
    if ty.needs_refcounting() {
        if !owned {
            code.put_incref(value, ty);
        }
        let setter = if ty.is_slice() {
            "Kes_SLICE_XDECREF_SET"
        } else {
            "Kes_XDECREF_SET"
        };
        code.putln(&format!("{setter}({access}, {value});"));
        return owned;
    }
    code.putln(&format!("{access} = {value};"));
    false
}
