//! Dependent-type representation used throughout signature construction.
//!
//! Types here are deliberately small: generic parameters, dependent members
//! rooted on them, nominal applications, existentials, and tuples. Everything
//! the signature builder manipulates bottoms out in this enum.

use crate::decl::{AssocTypeId, NominalId, ProtocolId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a generic type parameter as a `(depth, index)` pair.
///
/// The derived `Ord` gives the canonical parameter order: lower depths first,
/// then lower indices within a depth.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GenericParamKey {
    pub depth: u32,
    pub index: u32,
}

impl GenericParamKey {
    pub fn new(depth: u32, index: u32) -> Self {
        Self { depth, index }
    }
}

/// Layout restriction attached to a type parameter.
///
/// `merge` computes the meet of two layouts: refinements win, incompatible
/// pairs produce `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutConstraint {
    /// A trivially-copyable value layout.
    Trivial,
    /// Any reference-counted class instance, including foreign classes.
    Class,
    /// A native (non-foreign) class instance.
    NativeClass,
}

impl LayoutConstraint {
    pub fn is_class(self) -> bool {
        matches!(self, LayoutConstraint::Class | LayoutConstraint::NativeClass)
    }

    /// Meet of two layout constraints. `NativeClass` refines `Class`;
    /// mixing a value layout with a class layout is unsatisfiable.
    pub fn merge(self, other: LayoutConstraint) -> Option<LayoutConstraint> {
        use LayoutConstraint::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Class, NativeClass) | (NativeClass, Class) => Some(NativeClass),
            _ => None,
        }
    }
}

/// The type representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A generic type parameter.
    Param(GenericParamKey),
    /// A member type rooted on another type. `assoc` is populated once the
    /// name has been resolved to an associated-type declaration.
    Member {
        base: Box<Type>,
        name: String,
        assoc: Option<AssocTypeId>,
    },
    /// Application of a nominal declaration (struct, enum, or class) to its
    /// generic arguments.
    Nominal { decl: NominalId, args: Vec<Type> },
    /// A protocol composition, possibly carrying a superclass member.
    Existential {
        protocols: Vec<ProtocolId>,
        superclass: Option<Box<Type>>,
    },
    Tuple(Vec<Type>),
    /// The error type; produced when construction failed and absorbed
    /// silently everywhere else.
    Error,
}

impl Type {
    pub fn param(depth: u32, index: u32) -> Type {
        Type::Param(GenericParamKey::new(depth, index))
    }

    pub fn member(base: Type, name: impl Into<String>) -> Type {
        Type::Member {
            base: Box::new(base),
            name: name.into(),
            assoc: None,
        }
    }

    pub fn resolved_member(base: Type, name: impl Into<String>, assoc: AssocTypeId) -> Type {
        Type::Member {
            base: Box::new(base),
            name: name.into(),
            assoc: Some(assoc),
        }
    }

    pub fn nominal(decl: NominalId, args: Vec<Type>) -> Type {
        Type::Nominal { decl, args }
    }

    pub fn protocol(protocol: ProtocolId) -> Type {
        Type::Existential {
            protocols: vec![protocol],
            superclass: None,
        }
    }

    /// Returns true for generic parameters and member chains rooted on one.
    pub fn is_type_parameter(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::Member { base, .. } => base.is_type_parameter(),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Returns true if any component of this type is a type parameter.
    pub fn contains_type_parameters(&self) -> bool {
        let mut found = false;
        self.visit(&mut |ty| {
            if ty.is_type_parameter() {
                found = true;
            }
        });
        found
    }

    /// Returns true if any component matches the predicate.
    pub fn find_if(&self, predicate: &mut impl FnMut(&Type) -> bool) -> bool {
        let mut found = false;
        self.visit(&mut |ty| {
            if predicate(ty) {
                found = true;
            }
        });
        found
    }

    /// Visits this type and every component type, outermost first.
    pub fn visit(&self, f: &mut impl FnMut(&Type)) {
        f(self);
        match self {
            Type::Param(_) | Type::Error => {}
            Type::Member { base, .. } => base.visit(f),
            Type::Nominal { args, .. } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Type::Existential { superclass, .. } => {
                if let Some(superclass) = superclass {
                    superclass.visit(f);
                }
            }
            Type::Tuple(elements) => {
                for element in elements {
                    element.visit(f);
                }
            }
        }
    }

    /// Replaces generic parameters according to the substitution map.
    /// Parameters without a mapping are left in place.
    pub fn substitute(&self, subs: &Substitutions) -> Type {
        match self {
            Type::Param(key) => subs
                .get(*key)
                .cloned()
                .unwrap_or_else(|| Type::Param(*key)),
            Type::Member { base, name, assoc } => Type::Member {
                base: Box::new(base.substitute(subs)),
                name: name.clone(),
                assoc: *assoc,
            },
            Type::Nominal { decl, args } => Type::Nominal {
                decl: *decl,
                args: args.iter().map(|arg| arg.substitute(subs)).collect(),
            },
            Type::Existential {
                protocols,
                superclass,
            } => Type::Existential {
                protocols: protocols.clone(),
                superclass: superclass
                    .as_ref()
                    .map(|sup| Box::new(sup.substitute(subs))),
            },
            Type::Tuple(elements) => {
                Type::Tuple(elements.iter().map(|e| e.substitute(subs)).collect())
            }
            Type::Error => Type::Error,
        }
    }
}

/// Mapping from generic parameters to replacement types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitutions {
    map: BTreeMap<GenericParamKey, Type>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The substitution replacing a protocol's `Self` parameter, which is
    /// always the parameter at depth 0, index 0.
    pub fn for_protocol_self(replacement: Type) -> Self {
        let mut subs = Self::new();
        subs.insert(GenericParamKey::new(0, 0), replacement);
        subs
    }

    pub fn insert(&mut self, key: GenericParamKey, replacement: Type) {
        self.map.insert(key, replacement);
    }

    pub fn get(&self, key: GenericParamKey) -> Option<&Type> {
        self.map.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Wire form of a single generic requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requirement {
    /// `subject : constraint` where the constraint is an existential.
    Conformance { subject: Type, constraint: Type },
    /// `subject : superclass` where the constraint is a class type.
    Superclass { subject: Type, superclass: Type },
    /// `subject : layout`.
    Layout {
        subject: Type,
        layout: LayoutConstraint,
    },
    /// `first == second`.
    SameType { first: Type, second: Type },
}

impl Requirement {
    pub fn subject(&self) -> &Type {
        match self {
            Requirement::Conformance { subject, .. }
            | Requirement::Superclass { subject, .. }
            | Requirement::Layout { subject, .. } => subject,
            Requirement::SameType { first, .. } => first,
        }
    }

    /// Applies a substitution to every type position of the requirement.
    pub fn substitute(&self, subs: &Substitutions) -> Requirement {
        match self {
            Requirement::Conformance {
                subject,
                constraint,
            } => Requirement::Conformance {
                subject: subject.substitute(subs),
                constraint: constraint.substitute(subs),
            },
            Requirement::Superclass {
                subject,
                superclass,
            } => Requirement::Superclass {
                subject: subject.substitute(subs),
                superclass: superclass.substitute(subs),
            },
            Requirement::Layout { subject, layout } => Requirement::Layout {
                subject: subject.substitute(subs),
                layout: *layout,
            },
            Requirement::SameType { first, second } => Requirement::SameType {
                first: first.substitute(subs),
                second: second.substitute(subs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_param_keys_order_by_depth_then_index() {
        let keys = [
            GenericParamKey::new(0, 0),
            GenericParamKey::new(0, 1),
            GenericParamKey::new(1, 0),
        ];
        assert!(keys[0] < keys[1]);
        assert!(keys[1] < keys[2]);
    }

    #[test]
    fn layout_merge_refines_and_conflicts() {
        use LayoutConstraint::*;
        assert_eq!(Class.merge(NativeClass), Some(NativeClass));
        assert_eq!(NativeClass.merge(NativeClass), Some(NativeClass));
        assert_eq!(Trivial.merge(Class), None);
    }

    #[test]
    fn member_chains_are_type_parameters() {
        let ty = Type::member(Type::member(Type::param(0, 0), "A"), "B");
        assert!(ty.is_type_parameter());

        let concrete_member = Type::member(Type::Error, "A");
        assert!(!concrete_member.is_type_parameter());
    }

    #[test]
    fn substitution_replaces_parameters_recursively() {
        let mut subs = Substitutions::new();
        subs.insert(GenericParamKey::new(0, 0), Type::Error);

        let ty = Type::Tuple(vec![Type::param(0, 0), Type::member(Type::param(0, 1), "A")]);
        let substituted = ty.substitute(&subs);
        assert_eq!(
            substituted,
            Type::Tuple(vec![Type::Error, Type::member(Type::param(0, 1), "A")])
        );
    }
}
