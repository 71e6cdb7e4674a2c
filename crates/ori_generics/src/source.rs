//! Requirement-source provenance.
//!
//! Every fact recorded by the builder carries a source describing how it was
//! derived. Sources form a DAG: protocol requirements point at the source of
//! the conformance that introduced them, superclass- and concrete-derived
//! facts point at the constraint they were lifted from, and so on. Sources
//! are content-interned so provenance comparisons are cheap and profile-equal
//! sources are a single node.

use crate::archetype::PaId;
use crate::builder::GenericSignatureBuilder;
use ori_ast::{AssocTypeId, ConformanceId, ProtocolId, Span, Type};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Identifier of an interned requirement source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u32);

impl SourceId {
    pub(crate) fn new(raw: usize) -> Self {
        Self(raw as u32)
    }

    pub fn to_raw(self) -> usize {
        self.0 as usize
    }
}

/// How a requirement came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Written in the requirement list being built.
    Explicit,
    /// Inferred from a type application appearing in the input.
    Inferred,
    /// The `Self: P` root used while building a protocol's own requirement
    /// signature.
    RequirementSignatureSelf,
    /// Introduced because two nested types share a name.
    NestedTypeNameMatch,
    /// Propagated from a parent type to one of its associated types.
    Parent,
    /// A requirement stated in a protocol's requirement signature.
    ProtocolRequirement,
    /// Same, but the conformance that exposed it was inferred.
    InferredProtocolRequirement,
    /// Derived through a superclass conformance.
    Superclass,
    /// Derived through a concrete type binding.
    Concrete,
}

/// Payload stored with each source node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceStorage {
    /// Root sources identify the potential archetype they are rooted at.
    RootArchetype(PaId),
    /// Protocol-requirement frames store the dependent type, written in
    /// terms of the protocol's `Self`, on which the requirement was stated.
    StoredType(Type),
    /// Superclass- and concrete-derived frames record the conformance used,
    /// when one is known.
    Conformance(Option<ConformanceId>),
    /// Parent frames record the associated type being propagated to.
    AssociatedType(AssocTypeId),
}

/// An interned requirement source node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequirementSource {
    pub kind: SourceKind,
    pub parent: Option<SourceId>,
    pub storage: SourceStorage,
    pub protocol: Option<ProtocolId>,
    pub span: Option<Span>,
}

impl RequirementSource {
    pub fn is_protocol_requirement(&self) -> bool {
        matches!(
            self.kind,
            SourceKind::ProtocolRequirement | SourceKind::InferredProtocolRequirement
        )
    }

    pub fn stored_type(&self) -> Option<&Type> {
        match &self.storage {
            SourceStorage::StoredType(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn associated_type(&self) -> Option<AssocTypeId> {
        match self.storage {
            SourceStorage::AssociatedType(assoc) => Some(assoc),
            _ => None,
        }
    }
}

/// Arena interning requirement sources by their full profile.
#[derive(Debug, Default)]
pub struct SourceArena {
    sources: Vec<RequirementSource>,
    interned: FxHashMap<RequirementSource, SourceId>,
}

impl SourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, id: SourceId) -> &RequirementSource {
        &self.sources[id.to_raw()]
    }

    fn intern(&mut self, source: RequirementSource) -> SourceId {
        if let Some(&known) = self.interned.get(&source) {
            return known;
        }
        let id = SourceId::new(self.sources.len());
        self.sources.push(source.clone());
        self.interned.insert(source, id);
        id
    }

    /// An explicit requirement with no written location.
    pub fn for_abstract(&mut self, root: PaId) -> SourceId {
        self.for_explicit(root, None)
    }

    pub fn for_explicit(&mut self, root: PaId, span: Option<Span>) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::Explicit,
            parent: None,
            storage: SourceStorage::RootArchetype(root),
            protocol: None,
            span,
        })
    }

    pub fn for_inferred(&mut self, root: PaId, span: Option<Span>) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::Inferred,
            parent: None,
            storage: SourceStorage::RootArchetype(root),
            protocol: None,
            span,
        })
    }

    pub fn for_requirement_signature(&mut self, root: PaId, protocol: ProtocolId) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::RequirementSignatureSelf,
            parent: None,
            storage: SourceStorage::RootArchetype(root),
            protocol: Some(protocol),
            span: None,
        })
    }

    pub fn for_nested_type_name_match(&mut self, root: PaId) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::NestedTypeNameMatch,
            parent: None,
            storage: SourceStorage::RootArchetype(root),
            protocol: None,
            span: None,
        })
    }

    pub fn via_protocol_requirement(
        &mut self,
        parent: SourceId,
        dependent_type: Type,
        protocol: ProtocolId,
        inferred: bool,
        span: Option<Span>,
    ) -> SourceId {
        let kind = if inferred {
            SourceKind::InferredProtocolRequirement
        } else {
            SourceKind::ProtocolRequirement
        };
        self.intern(RequirementSource {
            kind,
            parent: Some(parent),
            storage: SourceStorage::StoredType(dependent_type),
            protocol: Some(protocol),
            span,
        })
    }

    pub fn via_superclass(
        &mut self,
        parent: SourceId,
        conformance: Option<ConformanceId>,
        protocol: Option<ProtocolId>,
    ) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::Superclass,
            parent: Some(parent),
            storage: SourceStorage::Conformance(conformance),
            protocol,
            span: None,
        })
    }

    pub fn via_concrete(
        &mut self,
        parent: SourceId,
        conformance: Option<ConformanceId>,
        protocol: Option<ProtocolId>,
    ) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::Concrete,
            parent: Some(parent),
            storage: SourceStorage::Conformance(conformance),
            protocol,
            span: None,
        })
    }

    pub fn via_parent(
        &mut self,
        parent: SourceId,
        assoc: AssocTypeId,
        protocol: ProtocolId,
    ) -> SourceId {
        self.intern(RequirementSource {
            kind: SourceKind::Parent,
            parent: Some(parent),
            storage: SourceStorage::AssociatedType(assoc),
            protocol: Some(protocol),
            span: None,
        })
    }

    /// Returns true if any frame on the parent chain was inferred.
    pub fn is_inferred(&self, id: SourceId) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            let source = self.get(id);
            match source.kind {
                SourceKind::Inferred | SourceKind::InferredProtocolRequirement => return true,
                _ => {}
            }
            current = source.parent;
        }
        false
    }

    /// Returns true if the requirement follows from other requirements and
    /// must not appear in the final signature.
    pub fn is_derived(&self, id: SourceId) -> bool {
        let source = self.get(id);
        match source.kind {
            SourceKind::Explicit | SourceKind::Inferred => false,
            SourceKind::NestedTypeNameMatch
            | SourceKind::Parent
            | SourceKind::Superclass
            | SourceKind::Concrete
            | SourceKind::RequirementSignatureSelf => true,
            // Protocol requirements are derived unless they hang directly off
            // the requirement-signature root, which must keep them.
            SourceKind::ProtocolRequirement | SourceKind::InferredProtocolRequirement => {
                let parent = source.parent.expect("protocol requirement has a parent");
                self.get(parent).kind != SourceKind::RequirementSignatureSelf
            }
        }
    }

    /// Number of protocol-requirement frames on the chain.
    pub fn path_length(&self, id: SourceId) -> usize {
        let mut count = 0;
        let mut current = Some(id);
        while let Some(id) = current {
            let source = self.get(id);
            if source.is_protocol_requirement() {
                count += 1;
            }
            current = source.parent;
        }
        count
    }

    /// Total order used to pick a canonical source among several describing
    /// the same fact. Derived sources win, then shorter protocol-requirement
    /// paths. The remaining tie-break is arbitrary but stable across runs:
    /// interning order.
    pub fn compare(&self, a: SourceId, b: SourceId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }

        let a_derived = self.is_derived(a);
        let b_derived = self.is_derived(b);
        if a_derived != b_derived {
            return if a_derived {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        let a_length = self.path_length(a);
        let b_length = self.path_length(b);
        if a_length != b_length {
            return a_length.cmp(&b_length);
        }

        a.cmp(&b)
    }

    pub fn root(&self, id: SourceId) -> SourceId {
        let mut root = id;
        while let Some(parent) = self.get(root).parent {
            root = parent;
        }
        root
    }

    pub fn root_archetype(&self, id: SourceId) -> PaId {
        match self.get(self.root(id)).storage {
            SourceStorage::RootArchetype(pa) => pa,
            _ => unreachable!("source root always stores its archetype"),
        }
    }

    /// Location to report diagnostics at. Protocol-requirement frames defer
    /// to their parents unless they hang off the requirement-signature root.
    pub fn span_of(&self, id: SourceId) -> Option<Span> {
        let source = self.get(id);
        if source.is_protocol_requirement() {
            let parent = source.parent.expect("protocol requirement has a parent");
            if self.get(parent).kind != SourceKind::RequirementSignatureSelf {
                return self.span_of(parent);
            }
        }

        if let Some(span) = source.span {
            if span.is_valid() {
                return Some(span);
            }
        }

        source.parent.and_then(|parent| self.span_of(parent))
    }
}

/// A requirement source that has not yet been anchored to the potential
/// archetype it constrains.
#[derive(Debug, Clone)]
pub enum FloatingSource {
    Explicit { span: Option<Span> },
    Inferred { span: Option<Span> },
    /// A requirement taken from a protocol, to be rebased onto whichever
    /// archetype ends up subject to it.
    AbstractProtocol {
        base: SourceId,
        protocol: ProtocolId,
        span: Option<Span>,
        inferred: bool,
    },
    Resolved(SourceId),
    NestedTypeNameMatch { base: SourceId, name: String },
}

impl FloatingSource {
    pub fn explicit(span: Span) -> Self {
        FloatingSource::Explicit { span: Some(span) }
    }

    pub fn abstract_explicit() -> Self {
        FloatingSource::Explicit { span: None }
    }

    pub fn inferred(span: Option<Span>) -> Self {
        FloatingSource::Inferred { span }
    }

    pub fn via_protocol_requirement(
        base: SourceId,
        protocol: ProtocolId,
        span: Option<Span>,
        inferred: bool,
    ) -> Self {
        FloatingSource::AbstractProtocol {
            base,
            protocol,
            span,
            inferred,
        }
    }

    pub fn resolved(source: SourceId) -> Self {
        FloatingSource::Resolved(source)
    }

    pub fn nested_type_name_match(base: SourceId, name: impl Into<String>) -> Self {
        FloatingSource::NestedTypeNameMatch {
            base,
            name: name.into(),
        }
    }

    /// Written location carried by the floating source, if any.
    pub fn span(&self, arena: &SourceArena) -> Option<Span> {
        match self {
            FloatingSource::Explicit { span } | FloatingSource::Inferred { span } => *span,
            FloatingSource::AbstractProtocol { span, .. } => *span,
            FloatingSource::Resolved(source) => arena.span_of(*source),
            FloatingSource::NestedTypeNameMatch { .. } => None,
        }
    }

    /// Whether materializing this source produces an explicit requirement.
    pub fn is_explicit(&self, arena: &SourceArena) -> bool {
        match self {
            FloatingSource::Explicit { .. } => true,
            FloatingSource::Inferred { .. } | FloatingSource::NestedTypeNameMatch { .. } => false,
            FloatingSource::AbstractProtocol { base, .. } => {
                arena.get(*base).kind == SourceKind::RequirementSignatureSelf
            }
            FloatingSource::Resolved(source) => {
                let resolved = arena.get(*source);
                match resolved.kind {
                    SourceKind::Explicit => true,
                    SourceKind::ProtocolRequirement => {
                        let parent = resolved.parent.expect("protocol requirement has a parent");
                        arena.get(parent).kind == SourceKind::RequirementSignatureSelf
                    }
                    _ => false,
                }
            }
        }
    }

    /// Reinterprets the floating source as an inferred one, used while
    /// walking types mentioned by a requirement.
    pub fn as_inferred(&self, span: Option<Span>) -> FloatingSource {
        match self {
            FloatingSource::Explicit { .. } => FloatingSource::Inferred { span },
            FloatingSource::Inferred { .. }
            | FloatingSource::Resolved(_)
            | FloatingSource::NestedTypeNameMatch { .. } => self.clone(),
            FloatingSource::AbstractProtocol {
                base, protocol, ..
            } => FloatingSource::AbstractProtocol {
                base: *base,
                protocol: *protocol,
                span,
                inferred: true,
            },
        }
    }

    fn stored_source(&self) -> Option<SourceId> {
        match self {
            FloatingSource::AbstractProtocol { base, .. }
            | FloatingSource::Resolved(base)
            | FloatingSource::NestedTypeNameMatch { base, .. } => Some(*base),
            _ => None,
        }
    }
}

impl<'a> GenericSignatureBuilder<'a> {
    /// Materializes a floating source against the potential archetype the
    /// requirement landed on.
    pub(crate) fn materialize_source(&mut self, floating: &FloatingSource, pa: PaId) -> SourceId {
        match floating {
            FloatingSource::Resolved(source) => *source,
            FloatingSource::Explicit { span } => self.sources.for_explicit(pa, *span),
            FloatingSource::Inferred { span } => self.sources.for_inferred(pa, *span),
            FloatingSource::NestedTypeNameMatch { .. } => {
                self.sources.for_nested_type_name_match(pa)
            }
            FloatingSource::AbstractProtocol {
                base,
                protocol,
                span,
                inferred,
            } => {
                // Rebuild the dependent type from the archetype the base
                // source affected down to the archetype being constrained.
                let base_pa = self
                    .affected_archetype(*base)
                    .unwrap_or_else(|| self.sources.root_archetype(*base));
                let dependent = self.protocol_relative_type(base_pa, pa);
                self.sources
                    .via_protocol_requirement(*base, dependent, *protocol, *inferred, *span)
            }
        }
    }

    /// Detects requirement recursion before resolving a type against the
    /// graph: a repeated (dependent type, protocol) pair along the stored
    /// source chain, or a nested-type name that already occurs more than
    /// four times along the ancestry.
    pub(crate) fn is_recursive_source(&self, floating: &FloatingSource) -> bool {
        let mut visited: Vec<(&Type, ProtocolId)> = Vec::new();
        let mut current = floating.stored_source();
        while let Some(id) = current {
            let source = self.sources.get(id);
            if source.is_protocol_requirement() {
                let stored = source.stored_type().expect("protocol requirement stores a type");
                let protocol = source.protocol.expect("protocol requirement names a protocol");
                if visited.contains(&(stored, protocol)) {
                    return true;
                }
                visited.push((stored, protocol));
            }
            current = source.parent;
        }

        // The nested-type guard looks for more than four repetitions of the
        // name along the ancestry. TODO: replace with a depth budget sized to
        // the protocol closure instead of a fixed count.
        if let FloatingSource::NestedTypeNameMatch { base, name } = floating {
            let mut count = 0;
            let mut pa = self
                .affected_archetype(*base)
                .unwrap_or_else(|| self.sources.root_archetype(*base));
            while let Some(parent) = self.archetype(pa).parent() {
                if self.archetype(pa).name() == Some(name.as_str()) {
                    count += 1;
                    if count > 4 {
                        return true;
                    }
                }
                pa = parent;
            }
        }

        false
    }

    /// Folds a source chain down to the potential archetype it affects,
    /// invoking the visitor at each meaningful frame. Returns `None` if the
    /// visitor aborted.
    pub(crate) fn visit_source_path(
        &self,
        id: SourceId,
        visitor: &mut dyn FnMut(PaId, SourceId) -> bool,
    ) -> Option<PaId> {
        let source = self.sources.get(id);
        match source.kind {
            SourceKind::Explicit
            | SourceKind::Inferred
            | SourceKind::RequirementSignatureSelf
            | SourceKind::NestedTypeNameMatch => {
                let root = self.sources.root_archetype(id);
                if visitor(root, id) {
                    return None;
                }
                Some(root)
            }
            SourceKind::Concrete | SourceKind::Superclass => {
                let parent = source.parent.expect("derived source has a parent");
                self.visit_source_path(parent, visitor)
            }
            SourceKind::Parent => {
                let parent = source.parent.expect("parent source has a parent");
                let parent_pa = self.visit_source_path(parent, visitor)?;
                if visitor(parent_pa, id) {
                    return None;
                }
                let assoc = source
                    .associated_type()
                    .expect("parent source stores an associated type");
                let declared = ori_ast::Type::resolved_member(
                    ori_ast::Type::param(0, 0),
                    self.store().assoc_type(assoc).name.clone(),
                    assoc,
                );
                Some(self.replace_self_with_archetype(parent_pa, &declared))
            }
            SourceKind::ProtocolRequirement | SourceKind::InferredProtocolRequirement => {
                let parent = source.parent.expect("protocol requirement has a parent");
                let parent_pa = self.visit_source_path(parent, visitor)?;
                if visitor(parent_pa, id) {
                    return None;
                }
                let stored = source
                    .stored_type()
                    .expect("protocol requirement stores a type")
                    .clone();
                Some(self.replace_self_with_archetype(parent_pa, &stored))
            }
        }
    }

    /// The potential archetype a source ultimately constrains.
    pub(crate) fn affected_archetype(&self, id: SourceId) -> Option<PaId> {
        self.visit_source_path(id, &mut |_, _| false)
    }

    /// Checks whether the derivation of `source` circles back through the
    /// equivalence class of `pa`, making the requirement self-justifying.
    /// Sets `derived_via_concrete` when a protocol-requirement frame sat on
    /// a concretely-bound parent.
    pub(crate) fn is_self_derived_source(
        &self,
        source: SourceId,
        pa: PaId,
        derived_via_concrete: &mut bool,
    ) -> bool {
        *derived_via_concrete = false;

        if !self.sources.is_derived(source) {
            return false;
        }

        let mut via_concrete = false;
        let result = self.visit_source_path(source, &mut |current, frame| {
            match self.sources.get(frame).kind {
                SourceKind::Explicit
                | SourceKind::Inferred
                | SourceKind::RequirementSignatureSelf => {
                    let mut parent = self.archetype(current).parent();
                    while let Some(ancestor) = parent {
                        if self.in_same_equivalence_class(ancestor, pa) {
                            return true;
                        }
                        parent = self.archetype(ancestor).parent();
                    }
                    false
                }
                SourceKind::Parent => self.in_same_equivalence_class(current, pa),
                SourceKind::ProtocolRequirement | SourceKind::InferredProtocolRequirement => {
                    if self.is_concrete(current) {
                        via_concrete = true;
                    }
                    false
                }
                SourceKind::NestedTypeNameMatch
                | SourceKind::Concrete
                | SourceKind::Superclass => false,
            }
        });

        *derived_via_concrete = via_concrete;
        result.is_none()
    }

    /// Conformance-specific self-derivation: walking the source path must
    /// not require the same (archetype, protocol) conformance twice.
    pub(crate) fn is_self_derived_conformance(
        &self,
        source: SourceId,
        pa: PaId,
        protocol: ProtocolId,
        derived_via_concrete: &mut bool,
    ) -> bool {
        let mut seen: Vec<(PaId, ProtocolId)> = vec![(self.representative(pa), protocol)];
        let mut saw_protocol_requirement = false;
        let mut via_concrete = false;
        let mut root_pa = None;

        let result = self.visit_source_path(source, &mut |current, frame| {
            let frame_source = self.sources.get(frame);
            match frame_source.kind {
                SourceKind::ProtocolRequirement | SourceKind::InferredProtocolRequirement => {
                    saw_protocol_requirement = true;
                    if self.is_concrete(current) {
                        via_concrete = true;
                    }
                    let entry = (
                        self.representative(current),
                        frame_source
                            .protocol
                            .expect("protocol requirement names a protocol"),
                    );
                    if seen.contains(&entry) {
                        return true;
                    }
                    seen.push(entry);
                    false
                }
                SourceKind::Concrete | SourceKind::Superclass | SourceKind::Parent => false,
                SourceKind::Explicit
                | SourceKind::Inferred
                | SourceKind::NestedTypeNameMatch
                | SourceKind::RequirementSignatureSelf => {
                    root_pa = Some(current);
                    false
                }
            }
        });

        *derived_via_concrete = via_concrete;

        if result.is_none() {
            return true;
        }
        if !saw_protocol_requirement {
            return false;
        }

        // The root may itself be a nested type, which implies a conformance
        // for each associated type on the way down.
        let mut current = root_pa;
        while let Some(pa) = current {
            let Some(parent) = self.archetype(pa).parent() else {
                break;
            };
            if let Some(assoc) = self.archetype(pa).resolved_assoc_type() {
                let entry = (
                    self.representative(parent),
                    self.store().assoc_type(assoc).protocol,
                );
                if seen.contains(&entry) {
                    return true;
                }
                seen.push(entry);
            }
            current = Some(parent);
        }

        false
    }

    /// Rebuilds the dependent type that reaches `pa` from `base_pa`, written
    /// in terms of the protocol's `Self` parameter.
    pub(crate) fn protocol_relative_type(&self, base_pa: PaId, pa: PaId) -> Type {
        if base_pa == pa {
            return Type::param(0, 0);
        }
        let parent = self
            .archetype(pa)
            .parent()
            .expect("nested archetype has a parent");
        let base = self.protocol_relative_type(base_pa, parent);
        let name = self
            .archetype(pa)
            .name()
            .expect("nested archetype has a name")
            .to_string();
        match self.archetype(pa).resolved_assoc_type() {
            Some(assoc) => Type::resolved_member(base, name, assoc),
            None => Type::member(base, name),
        }
    }

    /// Replaces the protocol `Self` parameter in `dependent` with the given
    /// archetype, reusing existing nested archetypes only. Used when
    /// reconstructing a path that is known to exist.
    pub(crate) fn replace_self_with_archetype(&self, self_pa: PaId, dependent: &Type) -> PaId {
        match dependent {
            Type::Member { base, name, assoc } => {
                let base_pa = self.replace_self_with_archetype(self_pa, base);

                let find_nested = |pa: PaId| -> (Option<PaId>, Option<PaId>) {
                    let Some(entries) = self.archetype(pa).nested.get(name.as_str()) else {
                        return (None, None);
                    };
                    let by_name = entries.first().copied();
                    let Some(assoc) = assoc else {
                        return (by_name, by_name);
                    };
                    let exact = entries
                        .iter()
                        .copied()
                        .find(|&nested| self.archetype(nested).resolved_assoc_type() == Some(*assoc));
                    (by_name, exact)
                };

                let (mut by_name, exact) = find_nested(base_pa);
                if let Some(exact) = exact {
                    return exact;
                }

                // Look through the rest of the equivalence class of the base.
                for other in self.equivalence_class_members(base_pa) {
                    if other == base_pa {
                        continue;
                    }
                    let (other_by_name, other_exact) = find_nested(other);
                    if by_name.is_none() {
                        by_name = other_by_name;
                    }
                    if let Some(exact) = other_exact {
                        return exact;
                    }
                }

                by_name.expect("dependent type path exists in the archetype graph")
            }
            _ => self_pa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_profiles() {
        let mut arena = SourceArena::new();
        let root = PaId::new(0);
        let a = arena.for_explicit(root, None);
        let b = arena.for_explicit(root, None);
        assert_eq!(a, b);

        let spanned = arena.for_explicit(root, Some(Span::new(1, 0, 1, 5)));
        assert_ne!(a, spanned);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn derived_kinds_are_classified() {
        let mut arena = SourceArena::new();
        let root = PaId::new(0);
        let explicit = arena.for_explicit(root, None);
        assert!(!arena.is_derived(explicit));

        let name_match = arena.for_nested_type_name_match(root);
        assert!(arena.is_derived(name_match));

        let protocol = ProtocolId::new(0);
        let req_sig = arena.for_requirement_signature(root, protocol);
        assert!(arena.is_derived(req_sig));

        // Directly off the requirement-signature root: not derived.
        let direct =
            arena.via_protocol_requirement(req_sig, Type::param(0, 0), protocol, false, None);
        assert!(!arena.is_derived(direct));

        // One level further: derived.
        let nested =
            arena.via_protocol_requirement(direct, Type::param(0, 0), protocol, false, None);
        assert!(arena.is_derived(nested));
    }

    #[test]
    fn inferred_propagates_from_ancestors() {
        let mut arena = SourceArena::new();
        let root = PaId::new(0);
        let protocol = ProtocolId::new(0);
        let inferred = arena.for_inferred(root, None);
        let via = arena.via_protocol_requirement(inferred, Type::param(0, 0), protocol, false, None);
        assert!(arena.is_inferred(via));

        let explicit = arena.for_explicit(root, None);
        assert!(!arena.is_inferred(explicit));
    }

    #[test]
    fn compare_prefers_derived_then_shorter_paths() {
        let mut arena = SourceArena::new();
        let root = PaId::new(0);
        let protocol = ProtocolId::new(0);

        let explicit = arena.for_explicit(root, None);
        let name_match = arena.for_nested_type_name_match(root);
        assert_eq!(arena.compare(name_match, explicit), Ordering::Less);

        let one_hop =
            arena.via_protocol_requirement(explicit, Type::param(0, 0), protocol, false, None);
        let two_hops = arena.via_protocol_requirement(
            one_hop,
            Type::member(Type::param(0, 0), "A"),
            protocol,
            false,
            None,
        );
        assert_eq!(arena.compare(one_hop, two_hops), Ordering::Less);
    }
}
