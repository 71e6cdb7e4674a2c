//! Potential archetypes and the union-find over them.
//!
//! A potential archetype stands for a dependent type while its signature is
//! being built: either a generic parameter root or a named nested type of
//! another archetype. Same-type requirements merge archetypes into
//! equivalence classes; the class state lives on whichever member is the
//! current union-find root.

use crate::builder::GenericSignatureBuilder;
use crate::equivalence::{ClassId, EquivalenceClass};
use ori_ast::{AliasId, AssocTypeId, GenericParamKey, Type};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Nested archetypes sharing one name; more than two is rare.
pub(crate) type NestedEntries = SmallVec<[PaId; 2]>;

/// Identifier of a potential archetype in the builder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaId(u32);

impl PaId {
    pub(crate) fn new(raw: usize) -> Self {
        Self(raw as u32)
    }

    pub fn to_raw(self) -> usize {
        self.0 as usize
    }
}

/// Whether an archetype is a generic-parameter root or a nested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    Root(GenericParamKey),
    Nested { parent: PaId, name: String },
}

/// Resolution state of a nested archetype's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedResolution {
    /// Roots are never nested; nested archetypes start unresolved.
    None,
    Unresolved,
    AssocType(AssocTypeId),
    Alias(AliasId),
}

/// Union-find link: either a pointer towards the representative, or the
/// owned equivalence class when this archetype is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepOrClass {
    Child(PaId),
    Root(Option<ClassId>),
}

/// A node in the archetype graph.
#[derive(Debug, Clone)]
pub struct PotentialArchetype {
    pub(crate) link: ParentLink,
    pub(crate) resolution: NestedResolution,
    pub(crate) rep_or_class: RepOrClass,
    pub(crate) nested: BTreeMap<String, NestedEntries>,
    pub(crate) recursive_protocol: bool,
    pub(crate) recursive_concrete: bool,
    pub(crate) recursive_superclass: bool,
    pub(crate) renamed_from: Option<String>,
    pub(crate) rename_diagnosed: bool,
    pub(crate) invalid: bool,
}

impl PotentialArchetype {
    pub(crate) fn new_root(key: GenericParamKey) -> Self {
        Self {
            link: ParentLink::Root(key),
            resolution: NestedResolution::None,
            rep_or_class: RepOrClass::Root(None),
            nested: BTreeMap::new(),
            recursive_protocol: false,
            recursive_concrete: false,
            recursive_superclass: false,
            renamed_from: None,
            rename_diagnosed: false,
            invalid: false,
        }
    }

    pub(crate) fn new_nested(parent: PaId, name: String, resolution: NestedResolution) -> Self {
        Self {
            link: ParentLink::Nested { parent, name },
            resolution,
            rep_or_class: RepOrClass::Root(None),
            nested: BTreeMap::new(),
            recursive_protocol: false,
            recursive_concrete: false,
            recursive_superclass: false,
            renamed_from: None,
            rename_diagnosed: false,
            invalid: false,
        }
    }

    pub fn parent(&self) -> Option<PaId> {
        match &self.link {
            ParentLink::Root(_) => None,
            ParentLink::Nested { parent, .. } => Some(*parent),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.link {
            ParentLink::Root(_) => None,
            ParentLink::Nested { name, .. } => Some(name.as_str()),
        }
    }

    pub fn is_generic_param(&self) -> bool {
        matches!(self.link, ParentLink::Root(_))
    }

    pub fn generic_param_key(&self) -> Option<GenericParamKey> {
        match self.link {
            ParentLink::Root(key) => Some(key),
            ParentLink::Nested { .. } => None,
        }
    }

    pub fn is_unresolved_nested(&self) -> bool {
        self.resolution == NestedResolution::Unresolved
    }

    pub fn resolved_assoc_type(&self) -> Option<AssocTypeId> {
        match self.resolution {
            NestedResolution::AssocType(assoc) => Some(assoc),
            _ => None,
        }
    }

    pub fn resolved_alias(&self) -> Option<AliasId> {
        match self.resolution {
            NestedResolution::Alias(alias) => Some(alias),
            _ => None,
        }
    }

    pub fn was_renamed(&self) -> bool {
        self.renamed_from.is_some()
    }

    pub fn original_name(&self) -> Option<&str> {
        self.renamed_from.as_deref()
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }
}

impl<'a> GenericSignatureBuilder<'a> {
    pub fn archetype(&self, pa: PaId) -> &PotentialArchetype {
        &self.pas[pa.to_raw()]
    }

    pub(crate) fn archetype_mut(&mut self, pa: PaId) -> &mut PotentialArchetype {
        &mut self.pas[pa.to_raw()]
    }

    /// Follows representative links to the union-find root without mutating
    /// the arena.
    pub fn representative(&self, pa: PaId) -> PaId {
        let mut current = pa;
        while let RepOrClass::Child(next) = self.archetype(current).rep_or_class {
            current = next;
        }
        current
    }

    /// Follows representative links to the root and fully compresses the
    /// path so every archetype along it points directly at the root.
    pub(crate) fn representative_compressing(&mut self, pa: PaId) -> PaId {
        let root = self.representative(pa);
        let mut current = pa;
        while current != root {
            match self.archetype(current).rep_or_class {
                RepOrClass::Child(next) => {
                    self.archetype_mut(current).rep_or_class = RepOrClass::Child(root);
                    current = next;
                }
                RepOrClass::Root(_) => break,
            }
        }
        root
    }

    pub fn in_same_equivalence_class(&self, a: PaId, b: PaId) -> bool {
        self.representative(a) == self.representative(b)
    }

    /// The equivalence class of an archetype, if one has been created.
    pub fn equivalence_class(&self, pa: PaId) -> Option<&EquivalenceClass> {
        let root = self.representative(pa);
        match self.archetype(root).rep_or_class {
            RepOrClass::Root(Some(class)) => Some(self.class(class)),
            _ => None,
        }
    }

    pub(crate) fn equivalence_class_id(&self, pa: PaId) -> Option<ClassId> {
        let root = self.representative(pa);
        match self.archetype(root).rep_or_class {
            RepOrClass::Root(class) => class,
            RepOrClass::Child(_) => unreachable!("representative is always a root"),
        }
    }

    /// The equivalence class of an archetype, creating a singleton class on
    /// the representative when none exists yet.
    pub(crate) fn get_or_create_equivalence_class(&mut self, pa: PaId) -> ClassId {
        let root = self.representative_compressing(pa);
        if let RepOrClass::Root(Some(class)) = self.archetype(root).rep_or_class {
            return class;
        }
        let class = self.alloc_class(EquivalenceClass::with_member(root));
        self.archetype_mut(root).rep_or_class = RepOrClass::Root(Some(class));
        class
    }

    /// Members of the equivalence class containing `pa`. Singleton classes
    /// that have not materialized yet report just the archetype itself.
    pub fn equivalence_class_members(&self, pa: PaId) -> Vec<PaId> {
        match self.equivalence_class(pa) {
            Some(class) => class.members.clone(),
            None => vec![self.representative(pa)],
        }
    }

    /// Returns true if the archetype's class has been bound to a concrete
    /// type.
    pub fn is_concrete(&self, pa: PaId) -> bool {
        self.equivalence_class(pa)
            .map(|class| class.concrete_type.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn superclass_bound(&self, pa: PaId) -> Option<Type> {
        self.equivalence_class(pa)
            .and_then(|class| class.superclass.clone())
    }

    pub(crate) fn concrete_bound(&self, pa: PaId) -> Option<Type> {
        self.equivalence_class(pa)
            .and_then(|class| class.concrete_type.clone())
    }

    /// The nested archetypes recorded under `pa` for a given name.
    pub fn nested_archetypes(&self, pa: PaId, name: &str) -> &[PaId] {
        self.archetype(pa)
            .nested
            .get(name)
            .map(|entries| entries.as_slice())
            .unwrap_or(&[])
    }

    /// Depth of nesting below the root generic parameter.
    pub fn nesting_depth(&self, pa: PaId) -> usize {
        let mut depth = 0;
        let mut current = self.archetype(pa).parent();
        while let Some(parent) = current {
            depth += 1;
            current = self.archetype(parent).parent();
        }
        depth
    }

    /// The dependent type this archetype stands for. With
    /// `allow_unresolved` cleared, paths through unresolved nested types
    /// produce the error type.
    pub fn dependent_type(&self, pa: PaId, allow_unresolved: bool) -> Type {
        let archetype = self.archetype(pa);
        match &archetype.link {
            ParentLink::Root(key) => Type::Param(*key),
            ParentLink::Nested { parent, name } => {
                let base = self.dependent_type(*parent, allow_unresolved);
                if base.is_error() {
                    return Type::Error;
                }
                match archetype.resolution {
                    NestedResolution::AssocType(assoc) => {
                        Type::resolved_member(base, name.clone(), assoc)
                    }
                    NestedResolution::Alias(_)
                    | NestedResolution::Unresolved
                    | NestedResolution::None => {
                        if allow_unresolved {
                            Type::member(base, name.clone())
                        } else {
                            Type::Error
                        }
                    }
                }
            }
        }
    }

    /// Dotted debug name, including the protocol a nested type resolved
    /// into: `T0[.Sequence].Element`.
    pub fn debug_name(&self, pa: PaId) -> String {
        let archetype = self.archetype(pa);
        match &archetype.link {
            ParentLink::Root(key) => self.store().display_type(&Type::Param(*key)),
            ParentLink::Nested { parent, name } => {
                let mut result = self.debug_name(*parent);
                let protocol = match archetype.resolution {
                    NestedResolution::AssocType(assoc) => {
                        Some(self.store().assoc_type(assoc).protocol)
                    }
                    NestedResolution::Alias(alias) => {
                        Some(self.store().typealias(alias).protocol)
                    }
                    _ => None,
                };
                if let Some(protocol) = protocol {
                    result.push_str("[.");
                    result.push_str(&self.store().protocol(protocol).name);
                    result.push(']');
                }
                result.push('.');
                result.push_str(name);
                result
            }
        }
    }

    /// Canonical ordering over potential archetypes. Drives representative
    /// selection, anchor selection, and the order of the emitted signature.
    pub fn compare_dependent_types(&self, a: PaId, b: PaId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }

        let pa_a = self.archetype(a);
        let pa_b = self.archetype(b);

        // Typealiases rank after everything else so they never become
        // representatives of classes that also contain associated types.
        if pa_a.parent().is_some() && pa_b.parent().is_some() {
            let a_alias = pa_a.resolved_alias().is_some();
            let b_alias = pa_b.resolved_alias().is_some();
            if a_alias != b_alias {
                return if a_alias { Ordering::Greater } else { Ordering::Less };
            }
        }

        // Concretely-bound archetypes follow ones that are still parameters.
        let a_concrete = self.is_concrete(a);
        let b_concrete = self.is_concrete(b);
        if a_concrete != b_concrete {
            return if a_concrete {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        match (pa_a.generic_param_key(), pa_b.generic_param_key()) {
            (Some(key_a), Some(key_b)) => return key_a.cmp(&key_b),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        let parent_a = pa_a.parent().expect("nested archetype has a parent");
        let parent_b = pa_b.parent().expect("nested archetype has a parent");
        let by_parent = self.compare_dependent_types(parent_a, parent_b);
        if by_parent != Ordering::Equal {
            return by_parent;
        }

        let name_a = pa_a.name().expect("nested archetype has a name");
        let name_b = pa_b.name().expect("nested archetype has a name");
        let by_name = name_a.cmp(name_b);
        if by_name != Ordering::Equal {
            return by_name;
        }

        // Resolved associated types order before unresolved ones, and among
        // themselves by (name, protocol).
        match (pa_a.resolved_assoc_type(), pa_b.resolved_assoc_type()) {
            (Some(assoc_a), Some(assoc_b)) => {
                let by_assoc = self.store().compare_assoc_types(assoc_a, assoc_b);
                if by_assoc != Ordering::Equal {
                    return by_assoc;
                }
            }
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        match (pa_a.resolved_alias(), pa_b.resolved_alias()) {
            (Some(alias_a), Some(alias_b)) => {
                let by_alias = self.store().compare_typealiases(alias_a, alias_b);
                if by_alias != Ordering::Equal {
                    return by_alias;
                }
            }
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        // Typo-corrected archetypes order after untouched ones, then by
        // their original spelling.
        if pa_a.was_renamed() || pa_b.was_renamed() {
            if pa_a.was_renamed() != pa_b.was_renamed() {
                return if pa_a.was_renamed() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            let by_original = pa_a.original_name().cmp(&pa_b.original_name());
            if by_original != Ordering::Equal {
                return by_original;
            }
        }

        a.cmp(&b)
    }

    /// The canonically-least member of the archetype's equivalence class,
    /// rebuilt through the anchors of its parent types.
    pub fn archetype_anchor(&mut self, pa: PaId) -> PaId {
        let rep = self.representative_compressing(pa);
        let mut anchor = match self.archetype(pa).parent() {
            Some(parent) => {
                let parent_anchor = self.archetype_anchor(parent);
                let name = self
                    .archetype(pa)
                    .name()
                    .expect("nested archetype has a name")
                    .to_string();
                self.nested_archetype_anchor(
                    parent_anchor,
                    &name,
                    crate::nested::NestedTypeUpdate::ResolveExisting,
                )
                .unwrap_or(rep)
            }
            None => rep,
        };

        let members = self.equivalence_class_members(rep);
        for member in members {
            if self.compare_dependent_types(member, anchor) == Ordering::Less {
                anchor = member;
            }
        }
        anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GenericSignatureBuilder;
    use crate::source::FloatingSource;
    use ori_ast::{DeclStore, GenericParamKey, Requirement};

    #[test]
    fn representative_is_idempotent_and_compresses() {
        let mut store = DeclStore::new();
        let proto = store.add_protocol("P");
        let _ = proto;

        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        builder
            .add_generic_parameter(GenericParamKey::new(0, 1))
            .unwrap();
        builder
            .add_generic_parameter(GenericParamKey::new(0, 2))
            .unwrap();

        // T2 == T1, T1 == T0: chains the classes together.
        builder.add_requirement(
            &Requirement::SameType {
                first: ori_ast::Type::param(0, 2),
                second: ori_ast::Type::param(0, 1),
            },
            FloatingSource::abstract_explicit(),
        );
        builder.add_requirement(
            &Requirement::SameType {
                first: ori_ast::Type::param(0, 1),
                second: ori_ast::Type::param(0, 0),
            },
            FloatingSource::abstract_explicit(),
        );

        let pas: Vec<PaId> = builder.generic_param_archetypes().to_vec();
        let rep = builder.representative(pas[2]);
        assert_eq!(rep, builder.representative(pas[0]));
        assert_eq!(rep, builder.representative(pas[1]));
        assert_eq!(builder.representative(rep), rep);

        // The canonically-least parameter is the representative.
        assert_eq!(builder.archetype(rep).generic_param_key(),
                   Some(GenericParamKey::new(0, 0)));
    }

    #[test]
    fn generic_params_order_before_nested_types() {
        let mut store = DeclStore::new();
        let proto = store.add_protocol("P");
        store.add_associated_type(proto, "A");

        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        builder.add_requirement(
            &Requirement::Conformance {
                subject: ori_ast::Type::param(0, 0),
                constraint: ori_ast::Type::protocol(proto),
            },
            FloatingSource::abstract_explicit(),
        );

        let root = builder.generic_param_archetypes()[0];
        let nested = builder
            .resolve_archetype(
                &ori_ast::Type::member(ori_ast::Type::param(0, 0), "A"),
                crate::builder::ArchetypeResolutionKind::AlwaysPartial,
            )
            .expect("nested type resolves");

        assert_eq!(builder.compare_dependent_types(root, nested), Ordering::Less);
        assert_eq!(
            builder.compare_dependent_types(nested, root),
            Ordering::Greater
        );
    }
}
