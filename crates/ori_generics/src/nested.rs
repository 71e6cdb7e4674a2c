//! Lazy nested-type resolution.
//!
//! Nested archetypes are created on demand as requirements mention member
//! types. A name can resolve to an associated type or a typealias in any
//! protocol the base conforms to; until a conformance makes a declaration
//! visible, the name is held as an unresolved placeholder. Placeholders left
//! over at finalization go through typo correction.

use crate::archetype::{NestedResolution, PaId, PotentialArchetype};
use crate::builder::{GenericSignatureBuilder, MismatchCtx, UnresolvedHandling, UnresolvedType};
use crate::source::FloatingSource;
use ori_ast::{AliasId, AssocTypeId, ProtocolId, Substitutions};
use std::cmp::Ordering;

/// How a nested-type lookup may change the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedTypeUpdate {
    /// Create the nested archetype if no match exists.
    AddIfMissing,
    /// Create it only when it would improve the anchor.
    AddIfBetterAnchor,
    /// Never create; resolve placeholders against existing declarations.
    ResolveExisting,
}

/// A member-type declaration a nested name can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssocOrAlias {
    Assoc(AssocTypeId),
    Alias(AliasId),
}

impl<'a> GenericSignatureBuilder<'a> {
    /// The nested archetype for `name` under `pa`, creating it if needed.
    pub(crate) fn get_nested_type(&mut self, pa: PaId, name: &str) -> Option<PaId> {
        if let Some(entries) = self.archetype(pa).nested.get(name) {
            if let Some(&front) = entries.first() {
                return Some(front);
            }
        }
        self.nested_archetype_anchor(pa, name, NestedTypeUpdate::AddIfMissing)
    }

    pub(crate) fn update_nested_for_assoc_type(
        &mut self,
        pa: PaId,
        assoc: AssocTypeId,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        self.update_nested_for_decl(pa, AssocOrAlias::Assoc(assoc), kind)
    }

    pub(crate) fn update_nested_for_alias(
        &mut self,
        pa: PaId,
        alias: AliasId,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        self.update_nested_for_decl(pa, AssocOrAlias::Alias(alias), kind)
    }

    /// Resolves `name` against the members `protocol` contributes. When the
    /// protocol declares both an associated type and a typealias with the
    /// name, the associated type wins.
    pub(crate) fn update_nested_for_conformance(
        &mut self,
        pa: PaId,
        name: &str,
        protocol: ProtocolId,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        if let Some(assoc) = self.store().lookup_assoc_type(protocol, name) {
            return self.update_nested_for_decl(pa, AssocOrAlias::Assoc(assoc), kind);
        }
        if let Some(alias) = self.store().lookup_typealias(protocol, name) {
            return self.update_nested_for_decl(pa, AssocOrAlias::Alias(alias), kind);
        }
        None
    }

    /// Core of nested-type resolution: reuse an existing archetype bound to
    /// the declaration, bind an unresolved placeholder, or create a new
    /// archetype, emitting the name-match same-type edges and propagating
    /// superclass witnesses and concrete parents.
    pub(crate) fn update_nested_for_decl(
        &mut self,
        pa: PaId,
        decl: AssocOrAlias,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        let (name, protocol) = match decl {
            AssocOrAlias::Assoc(assoc) => {
                let decl = self.store().assoc_type(assoc);
                (decl.name.clone(), decl.protocol)
            }
            AssocOrAlias::Alias(alias) => {
                let decl = self.store().typealias(alias);
                (decl.name.clone(), decl.protocol)
            }
        };

        let mut result = None;
        let mut should_update = false;

        let entries = self
            .archetype(pa)
            .nested
            .get(&name)
            .cloned()
            .unwrap_or_default();
        for existing in entries.iter().copied() {
            if self.archetype(existing).is_unresolved_nested() {
                let resolution = match decl {
                    AssocOrAlias::Assoc(assoc) => NestedResolution::AssocType(assoc),
                    AssocOrAlias::Alias(alias) => NestedResolution::Alias(alias),
                };
                self.archetype_mut(existing).resolution = resolution;
                self.num_unresolved_nested -= 1;
                result = Some(existing);
                should_update = true;
                break;
            }
            match decl {
                AssocOrAlias::Assoc(assoc) => {
                    if self.archetype(existing).resolved_assoc_type() == Some(assoc) {
                        result = Some(existing);
                        break;
                    }
                }
                AssocOrAlias::Alias(alias) => {
                    if self.archetype(existing).resolved_alias() == Some(alias) {
                        result = Some(existing);
                        break;
                    }
                }
            }
        }

        if result.is_none() {
            match kind {
                NestedTypeUpdate::AddIfBetterAnchor | NestedTypeUpdate::AddIfMissing => {
                    let resolution = match decl {
                        AssocOrAlias::Assoc(assoc) => NestedResolution::AssocType(assoc),
                        AssocOrAlias::Alias(alias) => NestedResolution::Alias(alias),
                    };
                    let new_pa = self.alloc_archetype(PotentialArchetype::new_nested(
                        pa,
                        name.clone(),
                        resolution,
                    ));
                    self.archetype_mut(pa)
                        .nested
                        .entry(name.clone())
                        .or_default()
                        .push(new_pa);

                    // The new archetype may be equivalent to a same-named
                    // type elsewhere: an earlier entry under this name, or
                    // the representative's nested type.
                    let siblings = self.archetype(pa).nested[&name].clone();
                    let existing = if siblings.len() > 1 {
                        Some(siblings[0])
                    } else {
                        let rep = self.representative_compressing(pa);
                        if rep != pa {
                            match decl {
                                AssocOrAlias::Assoc(assoc) => self.update_nested_for_assoc_type(
                                    rep,
                                    assoc,
                                    NestedTypeUpdate::AddIfMissing,
                                ),
                                AssocOrAlias::Alias(_) => self.get_nested_type(rep, &name),
                            }
                        } else {
                            None
                        }
                    };

                    if let Some(existing) = existing {
                        let name_match_source = self.sources.for_nested_type_name_match(existing);
                        self.add_same_type_requirement(
                            UnresolvedType::Archetype(existing),
                            UnresolvedType::Archetype(new_pa),
                            FloatingSource::resolved(name_match_source),
                            UnresolvedHandling::GenerateConstraints,
                            MismatchCtx::Plain { span: None },
                        );
                    }

                    result = Some(new_pa);
                    should_update = true;
                }
                NestedTypeUpdate::ResolveExisting => {}
            }
        }

        let result_pa = result?;

        if should_update {
            // Typealiases equate the nested archetype with their underlying
            // type, rewritten against this base.
            if let AssocOrAlias::Alias(alias) = decl {
                let underlying = self.store().typealias(alias).underlying.clone();
                let base = self.dependent_type(pa, true);
                let substituted = underlying.substitute(&Substitutions::for_protocol_self(base));
                let name_match_source = self.sources.for_nested_type_name_match(result_pa);
                self.add_same_type_requirement(
                    UnresolvedType::Archetype(result_pa),
                    UnresolvedType::Ty(substituted),
                    FloatingSource::resolved(name_match_source),
                    UnresolvedHandling::GenerateConstraints,
                    MismatchCtx::Conflict {
                        source: name_match_source,
                        pa: result_pa,
                    },
                );
            }

            // A superclass conformance contributes the class's type witness.
            if let Some(super_source) = self.resolve_super_conformance(pa, protocol) {
                self.add_same_type_for_superclass_witness(pa, result_pa, super_source);
            }

            // A concrete parent concretizes the nested type for every
            // member of the class.
            if self.is_concrete(pa) {
                let members = self.equivalence_class_members(self.representative(pa));
                let parent_source = self.sources.for_nested_type_name_match(pa);
                for member in members {
                    self.concretize_nested_from_concrete_parent(member, parent_source, result_pa);
                }
            }
        }

        Some(result_pa)
    }

    /// Finds (or creates) the anchor archetype for `name` under `pa`,
    /// consulting every protocol the representative conforms to. With no
    /// matching member and a permissive update kind, an unresolved
    /// placeholder is created instead.
    pub(crate) fn nested_archetype_anchor(
        &mut self,
        pa: PaId,
        name: &str,
        kind: NestedTypeUpdate,
    ) -> Option<PaId> {
        let rep = self.representative_compressing(pa);
        let protocols: Vec<ProtocolId> = self
            .equivalence_class(rep)
            .map(|class| class.protocols().collect())
            .unwrap_or_default();

        let mut best_assoc: Option<AssocTypeId> = None;
        let mut best_alias: Option<AliasId> = None;
        let mut typealiases = Vec::new();
        for protocol in protocols {
            if let Some(assoc) = self.store().lookup_assoc_type(protocol, name) {
                let better = match best_assoc {
                    None => true,
                    Some(best) => {
                        self.store().compare_assoc_types(assoc, best) == Ordering::Less
                    }
                };
                if better {
                    best_assoc = Some(assoc);
                }
            }
            if let Some(alias) = self.store().lookup_typealias(protocol, name) {
                typealiases.push(alias);
                let better = match best_alias {
                    None => true,
                    Some(best) => {
                        self.store().compare_typealiases(alias, best) == Ordering::Less
                    }
                };
                if better {
                    best_alias = Some(alias);
                }
            }
        }

        let mut result = best_assoc.and_then(|assoc| {
            self.update_nested_for_assoc_type(pa, assoc, NestedTypeUpdate::AddIfMissing)
        });

        // Every same-named typealias contributes its own same-type
        // constraints.
        for alias in typealiases {
            let alias_pa = self.update_nested_for_alias(pa, alias, NestedTypeUpdate::AddIfMissing);
            if result.is_none() && Some(alias) == best_alias {
                result = alias_pa;
            }
        }

        if let Some(result) = result {
            return Some(result);
        }

        if kind == NestedTypeUpdate::ResolveExisting {
            return None;
        }

        // Nothing matched: hold the name as an unresolved placeholder.
        if self
            .archetype(pa)
            .nested
            .get(name)
            .map(|entries| entries.is_empty())
            .unwrap_or(true)
        {
            let placeholder = self.alloc_archetype(PotentialArchetype::new_nested(
                pa,
                name.to_string(),
                NestedResolution::Unresolved,
            ));
            self.archetype_mut(pa)
                .nested
                .entry(name.to_string())
                .or_default()
                .push(placeholder);
            self.num_unresolved_nested += 1;

            let rep = self.representative_compressing(pa);
            if rep != pa {
                if let Some(existing) = self.get_nested_type(rep, name) {
                    let name_match_source = self.sources.for_nested_type_name_match(existing);
                    self.add_same_type_requirement(
                        UnresolvedType::Archetype(existing),
                        UnresolvedType::Archetype(placeholder),
                        FloatingSource::resolved(name_match_source),
                        UnresolvedHandling::GenerateConstraints,
                        MismatchCtx::Plain { span: None },
                    );
                }
            }
        }

        self.archetype(pa)
            .nested
            .get(name)
            .and_then(|entries| entries.first().copied())
    }

    /// Attempts typo correction for an unresolved nested name against the
    /// associated types of every protocol the parent conforms to. Ambiguous
    /// corrections (two distinct names at the best distance) abort.
    pub(crate) fn typo_correct_nested_type(&self, pa: PaId) -> Option<String> {
        let name = self.archetype(pa).name()?.to_string();
        let parent = self.archetype(pa).parent()?;

        let max_score = (name.len() + 1).div_ceil(3);
        let mut best_distance = usize::MAX;
        let mut best_matches: Vec<String> = Vec::new();

        let protocols: Vec<ProtocolId> = self
            .equivalence_class(parent)
            .map(|class| class.protocols().collect())
            .unwrap_or_default();
        for protocol in protocols {
            for &assoc in &self.store().protocol(protocol).associated_types {
                let candidate = &self.store().assoc_type(assoc).name;
                let distance = edit_distance(&name, candidate);
                if distance == 0 || distance > max_score {
                    continue;
                }
                match distance.cmp(&best_distance) {
                    Ordering::Less => {
                        best_distance = distance;
                        best_matches.clear();
                        best_matches.push(candidate.clone());
                    }
                    Ordering::Equal => best_matches.push(candidate.clone()),
                    Ordering::Greater => {}
                }
            }
        }

        let first = best_matches.first()?;
        if best_matches.iter().any(|other| other != first) {
            return None;
        }
        Some(first.clone())
    }
}

/// Levenshtein distance with substitutions allowed.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("Element", "Element"), 0);
        assert_eq!(edit_distance("Elemant", "Element"), 1);
        assert_eq!(edit_distance("Index", "Element"), 6);
        assert_eq!(edit_distance("", "abc"), 3);
    }
}
