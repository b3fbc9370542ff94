//! Classification of method-call expressions.
//!
//! The converters need to know what a call does, not how it is written:
//! a built-in on a header or stack, a method on an extern instance, a
//! free-standing extern function, or a table apply.

use p4bm_ir::{Decl, DeclArena, DeclId, Expr, ExprArena, ExprId, RefMap, Type};

/// What a method-call expression resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodKind {
    /// A built-in on a header, stack, or similar: `isValid`, `setValid`,
    /// `push_front`, ... `target` is the receiver expression.
    Builtin { target: ExprId, name: String },

    /// `table.apply()`.
    Apply { table: DeclId },

    /// A method on an extern instance (declared or passed as a parameter,
    /// like the packet object).
    ExternMethod {
        instance: DeclId,
        extern_type: String,
        method: String,
    },

    /// A free-standing extern function: `clone3`, `hash`, `verify`, ...
    ExternFunction { name: String },
}

/// Classifies the call expression `call`. Returns `None` for shapes the
/// back end has no handling for (resolved non-extern paths, nested calls).
pub fn resolve_method(
    exprs: &ExprArena,
    decls: &DeclArena,
    refs: &RefMap,
    call: ExprId,
) -> Option<MethodKind> {
    let Expr::MethodCall { method, .. } = exprs.get(call) else {
        return None;
    };
    match exprs.get(*method) {
        Expr::Path(name) => match refs.get_declaration(*method) {
            // A resolved path is an action or similar; those calls are
            // inlined by the front end and never reach the converters.
            Some(_) => None,
            None => Some(MethodKind::ExternFunction { name: name.clone() }),
        },
        Expr::Member { base, member } => {
            if let Expr::Path(_) = exprs.get(*base) {
                if let Some(decl) = refs.get_declaration(*base) {
                    match decls.get(decl) {
                        Decl::Table(_) => {
                            return Some(MethodKind::Apply { table: decl });
                        }
                        Decl::Instance(inst) => {
                            return Some(MethodKind::ExternMethod {
                                instance: decl,
                                extern_type: inst.extern_type.clone(),
                                method: member.clone(),
                            });
                        }
                        Decl::Param(p) => {
                            if let Type::Extern(ext) = &p.ty {
                                return Some(MethodKind::ExternMethod {
                                    instance: decl,
                                    extern_type: ext.clone(),
                                    method: member.clone(),
                                });
                            }
                        }
                        Decl::Variable(v) => {
                            if let Type::Extern(ext) = &v.ty {
                                return Some(MethodKind::ExternMethod {
                                    instance: decl,
                                    extern_type: ext.clone(),
                                    method: member.clone(),
                                });
                            }
                        }
                        Decl::Action(_) => return None,
                    }
                }
            }
            // Receiver is a header, stack, or union expression.
            Some(MethodKind::Builtin {
                target: *base,
                name: member.clone(),
            })
        }
        _ => None,
    }
}

/// If `e` is an `isValid()` call, returns the header expression it applies
/// to.
pub fn as_is_valid_call(
    exprs: &ExprArena,
    decls: &DeclArena,
    refs: &RefMap,
    is_valid_name: &str,
    e: ExprId,
) -> Option<ExprId> {
    match resolve_method(exprs, decls, refs, e) {
        Some(MethodKind::Builtin { target, name }) if name == is_valid_name => Some(target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4bm_ir::{IrBuilder, TableDecl};

    #[test]
    fn free_function_resolves_to_extern_function() {
        let mut b = IrBuilder::new();
        let f = b.free_path("clone3", Type::Void);
        let call = b.method_call(f, vec![], vec![], Type::Void);
        assert_eq!(
            resolve_method(&b.program.exprs, &b.program.decls, &b.refs, call),
            Some(MethodKind::ExternFunction {
                name: "clone3".into()
            })
        );
    }

    #[test]
    fn instance_method_resolves_to_extern_method() {
        let mut b = IrBuilder::new();
        let ctr = b.instance("pkts", "counter", vec![], vec![]);
        let base = b.path(ctr, Type::Extern("counter".into()));
        let m = b.member(base, "count", Type::Void);
        let call = b.method_call(m, vec![], vec![], Type::Void);
        assert_eq!(
            resolve_method(&b.program.exprs, &b.program.decls, &b.refs, call),
            Some(MethodKind::ExternMethod {
                instance: ctr,
                extern_type: "counter".into(),
                method: "count".into(),
            })
        );
    }

    #[test]
    fn table_apply_resolves() {
        let mut b = IrBuilder::new();
        let t = b.table(TableDecl {
            name: "t".into(),
            key: vec![],
            actions: vec![],
            entries: vec![],
            default_action: None,
            size: None,
            implementation: None,
            support_timeout: None,
            direct_counter: None,
            direct_meter: None,
        });
        let base = b.path(t, Type::Void);
        let m = b.member(base, "apply", Type::Void);
        let call = b.method_call(m, vec![], vec![], Type::Void);
        assert_eq!(
            resolve_method(&b.program.exprs, &b.program.decls, &b.refs, call),
            Some(MethodKind::Apply { table: t })
        );
    }

    #[test]
    fn header_builtin_resolves() {
        let mut b = IrBuilder::new();
        let hdr = b.param("hdr", Type::Void);
        let base = b.path(hdr, Type::Void);
        let h = b.member(base, "ipv4", Type::Void);
        let m = b.member(h, "isValid", Type::Boolean);
        let call = b.method_call(m, vec![], vec![], Type::Boolean);
        assert_eq!(
            resolve_method(&b.program.exprs, &b.program.decls, &b.refs, call),
            Some(MethodKind::Builtin {
                target: h,
                name: "isValid".into()
            })
        );

        assert_eq!(
            as_is_valid_call(&b.program.exprs, &b.program.decls, &b.refs, "isValid", call),
            Some(h)
        );
    }
}
