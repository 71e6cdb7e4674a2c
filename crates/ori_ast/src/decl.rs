//! Protocol, nominal, and member-type declarations plus the store that owns
//! them.
//!
//! The store doubles as the type-system oracle for signature construction:
//! conformance lookup, superclass queries, existential decomposition, and
//! type rendering all live here so the builder can treat them as pure
//! functions over immutable declarations.

use crate::conformance::{Conformance, ConformanceId, ConformanceRef};
use crate::types::{GenericParamKey, Requirement, Substitutions, Type};
use crate::Span;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Identifier of a protocol declaration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProtocolId(u32);

impl ProtocolId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// Identifier of an associated-type declaration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AssocTypeId(u32);

impl AssocTypeId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// Identifier of a protocol typealias declaration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AliasId(u32);

impl AliasId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// Identifier of a nominal (struct, enum, or class) declaration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NominalId(u32);

impl NominalId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// A protocol declaration.
///
/// Inherited entries and where-clause requirements are written in terms of
/// the protocol's `Self` parameter (depth 0, index 0). Once a requirement
/// signature has been computed it takes precedence over re-walking the
/// inheritance clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolDecl {
    pub name: String,
    pub inherited: Vec<Type>,
    pub class_constrained: bool,
    pub associated_types: Vec<AssocTypeId>,
    pub typealiases: Vec<AliasId>,
    pub where_clauses: Vec<Requirement>,
    pub requirement_signature: Option<Vec<Requirement>>,
    pub span: Span,
}

/// An associated type declared inside a protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociatedTypeDecl {
    pub name: String,
    pub protocol: ProtocolId,
    pub inherited: Vec<Type>,
    pub where_clauses: Vec<Requirement>,
    pub span: Span,
}

/// A typealias declared inside a protocol; the underlying type is written in
/// terms of the protocol's `Self` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAliasDecl {
    pub name: String,
    pub protocol: ProtocolId,
    pub underlying: Type,
    pub span: Span,
}

/// Discriminates nominal declarations; classes carry their superclass link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NominalKind {
    Struct,
    Enum,
    Class {
        superclass: Option<Type>,
        /// Foreign classes only guarantee the weaker `Class` layout.
        foreign: bool,
    },
}

/// A nominal declaration together with its own generic signature, used when
/// inferring requirements from type applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominalDecl {
    pub name: String,
    pub kind: NominalKind,
    pub generic_params: Vec<GenericParamKey>,
    pub requirements: Vec<Requirement>,
    pub span: Span,
}

impl NominalDecl {
    pub fn is_class(&self) -> bool {
        matches!(self.kind, NominalKind::Class { .. })
    }
}

/// Arena owning every declaration and registered conformance.
#[derive(Debug, Default)]
pub struct DeclStore {
    protocols: Vec<ProtocolDecl>,
    assoc_types: Vec<AssociatedTypeDecl>,
    aliases: Vec<TypeAliasDecl>,
    nominals: Vec<NominalDecl>,
    conformances: Vec<Conformance>,
    conformance_index: HashMap<(NominalId, ProtocolId), ConformanceId>,
}

impl DeclStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_protocol(&mut self, name: impl Into<String>) -> ProtocolId {
        let id = ProtocolId::new(self.protocols.len() as u32);
        self.protocols.push(ProtocolDecl {
            name: name.into(),
            inherited: Vec::new(),
            class_constrained: false,
            associated_types: Vec::new(),
            typealiases: Vec::new(),
            where_clauses: Vec::new(),
            requirement_signature: None,
            span: Span::dummy(),
        });
        id
    }

    pub fn add_associated_type(
        &mut self,
        protocol: ProtocolId,
        name: impl Into<String>,
    ) -> AssocTypeId {
        let id = AssocTypeId::new(self.assoc_types.len() as u32);
        self.assoc_types.push(AssociatedTypeDecl {
            name: name.into(),
            protocol,
            inherited: Vec::new(),
            where_clauses: Vec::new(),
            span: Span::dummy(),
        });
        self.protocols[protocol.to_raw() as usize]
            .associated_types
            .push(id);
        id
    }

    pub fn add_typealias(
        &mut self,
        protocol: ProtocolId,
        name: impl Into<String>,
        underlying: Type,
    ) -> AliasId {
        let id = AliasId::new(self.aliases.len() as u32);
        self.aliases.push(TypeAliasDecl {
            name: name.into(),
            protocol,
            underlying,
            span: Span::dummy(),
        });
        self.protocols[protocol.to_raw() as usize]
            .typealiases
            .push(id);
        id
    }

    pub fn add_struct(&mut self, name: impl Into<String>) -> NominalId {
        self.add_nominal(name, NominalKind::Struct)
    }

    pub fn add_enum(&mut self, name: impl Into<String>) -> NominalId {
        self.add_nominal(name, NominalKind::Enum)
    }

    pub fn add_class(&mut self, name: impl Into<String>, superclass: Option<Type>) -> NominalId {
        self.add_nominal(
            name,
            NominalKind::Class {
                superclass,
                foreign: false,
            },
        )
    }

    pub fn add_foreign_class(
        &mut self,
        name: impl Into<String>,
        superclass: Option<Type>,
    ) -> NominalId {
        self.add_nominal(
            name,
            NominalKind::Class {
                superclass,
                foreign: true,
            },
        )
    }

    fn add_nominal(&mut self, name: impl Into<String>, kind: NominalKind) -> NominalId {
        let id = NominalId::new(self.nominals.len() as u32);
        self.nominals.push(NominalDecl {
            name: name.into(),
            kind,
            generic_params: Vec::new(),
            requirements: Vec::new(),
            span: Span::dummy(),
        });
        id
    }

    /// Attaches a generic signature to a nominal declaration so uses of the
    /// nominal can contribute inferred requirements.
    pub fn set_nominal_signature(
        &mut self,
        nominal: NominalId,
        params: Vec<GenericParamKey>,
        requirements: Vec<Requirement>,
    ) {
        let decl = &mut self.nominals[nominal.to_raw() as usize];
        decl.generic_params = params;
        decl.requirements = requirements;
    }

    pub fn add_protocol_inheritance(&mut self, protocol: ProtocolId, inherited: Type) {
        self.protocols[protocol.to_raw() as usize]
            .inherited
            .push(inherited);
    }

    pub fn set_class_constrained(&mut self, protocol: ProtocolId) {
        self.protocols[protocol.to_raw() as usize].class_constrained = true;
    }

    pub fn add_protocol_where_clause(&mut self, protocol: ProtocolId, requirement: Requirement) {
        self.protocols[protocol.to_raw() as usize]
            .where_clauses
            .push(requirement);
    }

    pub fn set_requirement_signature(
        &mut self,
        protocol: ProtocolId,
        requirements: Vec<Requirement>,
    ) {
        self.protocols[protocol.to_raw() as usize].requirement_signature = Some(requirements);
    }

    pub fn add_assoc_type_inheritance(&mut self, assoc: AssocTypeId, inherited: Type) {
        self.assoc_types[assoc.to_raw() as usize]
            .inherited
            .push(inherited);
    }

    pub fn add_assoc_type_where_clause(&mut self, assoc: AssocTypeId, requirement: Requirement) {
        self.assoc_types[assoc.to_raw() as usize]
            .where_clauses
            .push(requirement);
    }

    /// Registers a concrete conformance. Witnesses are written in terms of
    /// the nominal's own generic parameters.
    pub fn add_conformance(
        &mut self,
        nominal: NominalId,
        protocol: ProtocolId,
        witnesses: Vec<(String, Type)>,
    ) -> ConformanceId {
        let id = ConformanceId::new(self.conformances.len() as u32);
        self.conformances.push(Conformance {
            nominal,
            protocol,
            witnesses: witnesses.into_iter().collect(),
        });
        self.conformance_index.insert((nominal, protocol), id);
        id
    }

    pub fn protocol(&self, id: ProtocolId) -> &ProtocolDecl {
        &self.protocols[id.to_raw() as usize]
    }

    pub fn assoc_type(&self, id: AssocTypeId) -> &AssociatedTypeDecl {
        &self.assoc_types[id.to_raw() as usize]
    }

    pub fn typealias(&self, id: AliasId) -> &TypeAliasDecl {
        &self.aliases[id.to_raw() as usize]
    }

    pub fn nominal(&self, id: NominalId) -> &NominalDecl {
        &self.nominals[id.to_raw() as usize]
    }

    pub fn conformance(&self, id: ConformanceId) -> &Conformance {
        &self.conformances[id.to_raw() as usize]
    }

    /// Finds the associated type with the given name declared directly in the
    /// protocol.
    pub fn lookup_assoc_type(&self, protocol: ProtocolId, name: &str) -> Option<AssocTypeId> {
        self.protocol(protocol)
            .associated_types
            .iter()
            .copied()
            .find(|id| self.assoc_type(*id).name == name)
    }

    /// Finds the typealias with the given name declared directly in the
    /// protocol.
    pub fn lookup_typealias(&self, protocol: ProtocolId, name: &str) -> Option<AliasId> {
        self.protocol(protocol)
            .typealiases
            .iter()
            .copied()
            .find(|id| self.typealias(*id).name == name)
    }

    /// Canonical protocol order: by name, tie-broken by declaration order.
    pub fn compare_protocols(&self, a: ProtocolId, b: ProtocolId) -> Ordering {
        self.protocol(a)
            .name
            .cmp(&self.protocol(b).name)
            .then_with(|| a.cmp(&b))
    }

    /// Canonical associated-type order: by name, then by protocol order.
    pub fn compare_assoc_types(&self, a: AssocTypeId, b: AssocTypeId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.assoc_type(a)
            .name
            .cmp(&self.assoc_type(b).name)
            .then_with(|| self.compare_protocols(self.assoc_type(a).protocol, self.assoc_type(b).protocol))
            .then_with(|| a.cmp(&b))
    }

    /// Canonical typealias order: by name, then by protocol order.
    pub fn compare_typealiases(&self, a: AliasId, b: AliasId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.typealias(a)
            .name
            .cmp(&self.typealias(b).name)
            .then_with(|| self.compare_protocols(self.typealias(a).protocol, self.typealias(b).protocol))
            .then_with(|| a.cmp(&b))
    }

    /// All protocols inherited by `protocol`, transitively, excluding itself.
    pub fn inherited_protocols(&self, protocol: ProtocolId) -> Vec<ProtocolId> {
        let mut result = Vec::new();
        let mut visited = vec![protocol];
        let mut stack = vec![protocol];
        while let Some(current) = stack.pop() {
            for inherited in &self.protocol(current).inherited {
                if let Type::Existential { protocols, .. } = inherited {
                    for &next in protocols {
                        if !visited.contains(&next) {
                            visited.push(next);
                            result.push(next);
                            stack.push(next);
                        }
                    }
                }
            }
        }
        result
    }

    /// Returns true if `protocol` inherits from `ancestor`, transitively.
    pub fn inherits_from(&self, protocol: ProtocolId, ancestor: ProtocolId) -> bool {
        self.inherited_protocols(protocol).contains(&ancestor)
    }

    /// The conformance oracle. Returns a concrete conformance for nominal
    /// types (walking the superclass chain), and an abstract conformance for
    /// existentials and type parameters whose composition covers the
    /// protocol.
    pub fn lookup_conformance(&self, ty: &Type, protocol: ProtocolId) -> Option<ConformanceRef> {
        match ty {
            Type::Nominal { decl, args } => {
                if let Some(&id) = self.conformance_index.get(&(*decl, protocol)) {
                    return Some(ConformanceRef::Concrete(id));
                }
                // A class inherits the conformances of its superclass.
                if let NominalKind::Class {
                    superclass: Some(superclass),
                    ..
                } = &self.nominal(*decl).kind
                {
                    let substituted = self.apply_nominal_args(*decl, args, superclass);
                    return self.lookup_conformance(&substituted, protocol);
                }
                None
            }
            Type::Existential { protocols, .. } => {
                let covered = protocols.iter().any(|&member| {
                    member == protocol || self.inherits_from(member, protocol)
                });
                covered.then_some(ConformanceRef::Abstract(protocol))
            }
            _ => None,
        }
    }

    /// Resolves the type witness for `name` in the conformance of the given
    /// concrete type. Returns `None` when the conformance does not record a
    /// witness for the name.
    pub fn type_witness(
        &self,
        conformance: ConformanceId,
        concrete: &Type,
        name: &str,
    ) -> Option<Type> {
        let data = self.conformance(conformance);
        let witness = data.witnesses.get(name)?;
        match concrete {
            Type::Nominal { decl, args } if *decl == data.nominal => {
                Some(self.apply_nominal_args(*decl, args, witness))
            }
            // Witness requested through a subclass; map the superclass chain
            // first so the witness sees the right arguments.
            Type::Nominal { decl, args } => {
                let superclass = self.superclass_of(*decl, args)?;
                self.type_witness(conformance, &superclass, name)
            }
            _ => Some(witness.clone()),
        }
    }

    /// Substitutes a nominal's own generic parameters with `args` inside
    /// `ty`.
    fn apply_nominal_args(&self, decl: NominalId, args: &[Type], ty: &Type) -> Type {
        let params = &self.nominal(decl).generic_params;
        if params.is_empty() {
            return ty.clone();
        }
        let mut subs = Substitutions::new();
        for (param, arg) in params.iter().zip(args.iter()) {
            subs.insert(*param, arg.clone());
        }
        ty.substitute(&subs)
    }

    /// The (substituted) superclass of a class application, if any.
    pub fn superclass_of(&self, decl: NominalId, args: &[Type]) -> Option<Type> {
        match &self.nominal(decl).kind {
            NominalKind::Class {
                superclass: Some(superclass),
                ..
            } => Some(self.apply_nominal_args(decl, args, superclass)),
            _ => None,
        }
    }

    /// Returns true if `ancestor` appears on the exact superclass chain of
    /// `ty`, or equals it.
    pub fn is_exact_superclass_of(&self, ancestor: &Type, ty: &Type) -> bool {
        if ancestor == ty {
            return true;
        }
        let Type::Nominal { decl, args } = ty else {
            return false;
        };
        match self.superclass_of(*decl, args) {
            Some(superclass) => self.is_exact_superclass_of(ancestor, &superclass),
            None => false,
        }
    }

    /// Returns true if the type is an application of a class declaration.
    pub fn is_class_type(&self, ty: &Type) -> bool {
        matches!(ty, Type::Nominal { decl, .. } if self.nominal(*decl).is_class())
    }

    /// Returns true if a class declaration only guarantees foreign layout.
    pub fn is_foreign_class(&self, ty: &Type) -> bool {
        matches!(
            ty,
            Type::Nominal { decl, .. }
                if matches!(self.nominal(*decl).kind, NominalKind::Class { foreign: true, .. })
        )
    }

    /// Decomposes an existential into (protocols, superclass, implied
    /// layout). The layout is implied when any member protocol is
    /// class-constrained.
    pub fn existential_layout(
        &self,
        ty: &Type,
    ) -> Option<(Vec<ProtocolId>, Option<Type>, Option<crate::LayoutConstraint>)> {
        let Type::Existential {
            protocols,
            superclass,
        } = ty
        else {
            return None;
        };
        let class_constrained = protocols.iter().any(|&p| {
            self.protocol(p).class_constrained
                || self
                    .inherited_protocols(p)
                    .iter()
                    .any(|&q| self.protocol(q).class_constrained)
        });
        let layout = class_constrained.then_some(crate::LayoutConstraint::Class);
        Some((
            protocols.clone(),
            superclass.as_deref().cloned(),
            layout,
        ))
    }

    /// Renders a type for diagnostics and debug output.
    pub fn display_type(&self, ty: &Type) -> String {
        match ty {
            Type::Param(key) => {
                if key.depth == 0 {
                    format!("T{}", key.index)
                } else {
                    format!("T{}_{}", key.depth, key.index)
                }
            }
            Type::Member { base, name, .. } => {
                format!("{}.{}", self.display_type(base), name)
            }
            Type::Nominal { decl, args } => {
                let name = &self.nominal(*decl).name;
                if args.is_empty() {
                    name.clone()
                } else {
                    let rendered: Vec<String> =
                        args.iter().map(|arg| self.display_type(arg)).collect();
                    format!("{}<{}>", name, rendered.join(", "))
                }
            }
            Type::Existential {
                protocols,
                superclass,
            } => {
                let mut parts: Vec<String> = Vec::new();
                if let Some(superclass) = superclass {
                    parts.push(self.display_type(superclass));
                }
                parts.extend(protocols.iter().map(|&p| self.protocol(p).name.clone()));
                parts.join(" & ")
            }
            Type::Tuple(elements) => {
                let rendered: Vec<String> =
                    elements.iter().map(|e| self.display_type(e)).collect();
                format!("({})", rendered.join(", "))
            }
            Type::Error => "<<error>>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conformance_lookup_walks_superclass_chain() {
        let mut store = DeclStore::new();
        let proto = store.add_protocol("P");
        let base = store.add_class("Base", None);
        store.add_conformance(base, proto, Vec::new());
        let derived = store.add_class("Derived", Some(Type::nominal(base, Vec::new())));

        let derived_ty = Type::nominal(derived, Vec::new());
        assert!(matches!(
            store.lookup_conformance(&derived_ty, proto),
            Some(ConformanceRef::Concrete(_))
        ));
    }

    #[test]
    fn existential_conformance_is_abstract() {
        let mut store = DeclStore::new();
        let base = store.add_protocol("Base");
        let derived = store.add_protocol("Derived");
        store.add_protocol_inheritance(derived, Type::protocol(base));

        let existential = Type::protocol(derived);
        assert!(matches!(
            store.lookup_conformance(&existential, base),
            Some(ConformanceRef::Abstract(p)) if p == base
        ));
        assert!(store.lookup_conformance(&existential, derived).is_some());
    }

    #[test]
    fn type_witness_substitutes_generic_arguments() {
        let mut store = DeclStore::new();
        let proto = store.add_protocol("Collection");
        store.add_associated_type(proto, "Element");
        let array = store.add_struct("Array");
        store.set_nominal_signature(array, vec![GenericParamKey::new(0, 0)], Vec::new());
        let conf = store.add_conformance(
            array,
            proto,
            vec![("Element".to_string(), Type::param(0, 0))],
        );

        let int = store.add_struct("Int");
        let array_int = Type::nominal(array, vec![Type::nominal(int, Vec::new())]);
        let witness = store.type_witness(conf, &array_int, "Element").unwrap();
        assert_eq!(witness, Type::nominal(int, Vec::new()));
    }

    #[test]
    fn exact_superclass_query_substitutes_arguments() {
        let mut store = DeclStore::new();
        let int = store.add_struct("Int");
        let foo = store.add_class("Foo", None);
        store.set_nominal_signature(foo, vec![GenericParamKey::new(0, 0)], Vec::new());
        let bar = store.add_class(
            "Bar",
            Some(Type::nominal(foo, vec![Type::nominal(int, Vec::new())])),
        );

        let foo_int = Type::nominal(foo, vec![Type::nominal(int, Vec::new())]);
        let bar_ty = Type::nominal(bar, Vec::new());
        assert!(store.is_exact_superclass_of(&foo_int, &bar_ty));
        assert!(!store.is_exact_superclass_of(&bar_ty, &foo_int));
    }

    #[test]
    fn inherited_protocols_are_transitive() {
        let mut store = DeclStore::new();
        let a = store.add_protocol("A");
        let b = store.add_protocol("B");
        let c = store.add_protocol("C");
        store.add_protocol_inheritance(b, Type::protocol(a));
        store.add_protocol_inheritance(c, Type::protocol(b));

        let inherited = store.inherited_protocols(c);
        assert!(inherited.contains(&a));
        assert!(inherited.contains(&b));
        assert!(store.inherits_from(c, a));
    }
}
