//! Canonical requirement enumeration and the final signature value.

use crate::archetype::PaId;
use crate::builder::{BuilderError, GenericSignatureBuilder};
use crate::diagnostics::layout_name;
use crate::source::SourceId;
use ori_ast::{DeclStore, GenericParamKey, LayoutConstraint, ProtocolId, Requirement, Type};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Right-hand side of an enumerated requirement.
#[derive(Debug, Clone)]
pub(crate) enum EnumeratedRhs {
    Archetype(PaId),
    Ty(Type),
    Protocol(ProtocolId),
    Layout(LayoutConstraint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumeratedKind {
    Conformance,
    Superclass,
    Layout,
    SameType,
}

/// One requirement in canonical enumeration order, still referring into the
/// builder's arenas.
#[derive(Debug, Clone)]
pub(crate) struct EnumeratedRequirement {
    pub kind: EnumeratedKind,
    pub subject: PaId,
    pub rhs: EnumeratedRhs,
    pub source: SourceId,
}

impl<'a> GenericSignatureBuilder<'a> {
    fn best_constraint_source<T>(
        &self,
        constraints: &[crate::equivalence::Constraint<T>],
    ) -> Option<SourceId> {
        let mut best = constraints.first()?.source;
        for constraint in constraints {
            if self.sources.compare(constraint.source, best) == std::cmp::Ordering::Less {
                best = constraint.source;
            }
        }
        Some(best)
    }

    /// Enumerates requirements in the canonical, deterministic order:
    /// archetypes sorted by the dependent-type order; per component the
    /// concrete binding or the edge to the next anchor; per archetype
    /// anchor the superclass, layout, and conformances.
    pub(crate) fn enumerate_requirements(&mut self) -> Vec<EnumeratedRequirement> {
        let mut archetypes = self.collect_potential_archetypes();
        archetypes.retain(|&pa| !self.archetype(pa).is_invalid());
        archetypes.sort_by(|&a, &b| self.compare_dependent_types(a, b));

        let mut out = Vec::new();
        for archetype in archetypes {
            let rep = self.representative_compressing(archetype);
            self.get_or_create_equivalence_class(rep);
            if self
                .equivalence_class(rep)
                .map(|class| class.derived_same_type_components.is_empty())
                .unwrap_or(true)
            {
                self.check_same_type_constraints(rep);
            }

            let components = self
                .equivalence_class(rep)
                .map(|class| class.derived_same_type_components.clone())
                .unwrap_or_default();

            let mut deferred_same_type: Option<(PaId, PaId)> = None;
            if let Some(index) = components
                .iter()
                .position(|component| component.anchor == archetype)
            {
                let concrete = self
                    .equivalence_class(rep)
                    .and_then(|class| class.concrete_type.clone());
                if let Some(concrete) = concrete {
                    // A concrete parent already renders this whole subtree
                    // concrete; no requirement needed.
                    if let Some(parent) = self.archetype(archetype).parent() {
                        if self.is_concrete(parent) {
                            continue;
                        }
                    }
                    let source = match components[index].concrete_type_source {
                        Some(source) => source,
                        None => self.sources.for_abstract(archetype),
                    };
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::SameType,
                        subject: archetype,
                        rhs: EnumeratedRhs::Ty(concrete),
                        source,
                    });
                    continue;
                }

                if let Some(next) = components.get(index + 1) {
                    // Emitted after this archetype's own requirements.
                    deferred_same_type = Some((archetype, next.anchor));
                }
            }

            if self.archetype_anchor(archetype) == archetype {
                let class = self
                    .equivalence_class(rep)
                    .expect("class created above")
                    .clone();

                if let Some(superclass) = class.superclass.clone() {
                    if let Some(source) =
                        self.best_constraint_source(&class.superclass_constraints)
                    {
                        out.push(EnumeratedRequirement {
                            kind: EnumeratedKind::Superclass,
                            subject: archetype,
                            rhs: EnumeratedRhs::Ty(superclass),
                            source,
                        });
                    }
                }

                if let Some(layout) = class.layout {
                    if let Some(source) = self.best_constraint_source(&class.layout_constraints) {
                        out.push(EnumeratedRequirement {
                            kind: EnumeratedKind::Layout,
                            subject: archetype,
                            rhs: EnumeratedRhs::Layout(layout),
                            source,
                        });
                    }
                }

                let mut protocols: Vec<ProtocolId> = class.protocols().collect();
                protocols.sort_by(|&a, &b| self.store().compare_protocols(a, b));
                for protocol in protocols {
                    let source = self
                        .best_constraint_source(&class.conforms_to[&protocol])
                        .expect("conformance has at least one constraint");
                    out.push(EnumeratedRequirement {
                        kind: EnumeratedKind::Conformance,
                        subject: archetype,
                        rhs: EnumeratedRhs::Protocol(protocol),
                        source,
                    });
                }
            }

            if let Some((subject, next_anchor)) = deferred_same_type {
                let source = self.sources.for_abstract(subject);
                out.push(EnumeratedRequirement {
                    kind: EnumeratedKind::SameType,
                    subject,
                    rhs: EnumeratedRhs::Archetype(next_anchor),
                    source,
                });
            }
        }

        out
    }

    /// Collects the canonical requirement list, filtering out derived
    /// requirements (except concrete bindings of generic parameters, which
    /// the canonical form keeps) and requirements still mentioning
    /// unresolved member types.
    pub fn compute_generic_signature(&mut self) -> Result<GenericSignature, BuilderError> {
        if !self.finalized {
            return Err(BuilderError::NotFinalized);
        }

        let enumerated = self.enumerate_requirements();
        let mut requirements = Vec::new();
        for requirement in enumerated {
            let keep_concrete_param = requirement.kind == EnumeratedKind::SameType
                && self.archetype(requirement.subject).is_generic_param()
                && matches!(requirement.rhs, EnumeratedRhs::Ty(_));
            if self.sources.is_derived(requirement.source) && !keep_concrete_param {
                continue;
            }

            let subject = self.dependent_type(requirement.subject, false);
            if subject.is_error() {
                continue;
            }

            match requirement.rhs {
                EnumeratedRhs::Protocol(protocol) => requirements.push(Requirement::Conformance {
                    subject,
                    constraint: Type::protocol(protocol),
                }),
                EnumeratedRhs::Layout(layout) => {
                    requirements.push(Requirement::Layout {
                        subject,
                        layout,
                    });
                }
                EnumeratedRhs::Ty(ty) => {
                    if has_unresolved_member(&ty) {
                        continue;
                    }
                    match requirement.kind {
                        EnumeratedKind::Superclass => {
                            requirements.push(Requirement::Superclass {
                                subject,
                                superclass: ty,
                            });
                        }
                        EnumeratedKind::SameType => requirements.push(Requirement::SameType {
                            first: subject,
                            second: ty,
                        }),
                        EnumeratedKind::Conformance | EnumeratedKind::Layout => {
                            unreachable!("type rhs is superclass or same-type")
                        }
                    }
                }
                EnumeratedRhs::Archetype(other) => {
                    let second = self.dependent_type(other, false);
                    if second.is_error() || has_unresolved_member(&second) {
                        continue;
                    }
                    requirements.push(Requirement::SameType {
                        first: subject,
                        second,
                    });
                }
            }
        }

        Ok(GenericSignature {
            params: self.generic_params.clone(),
            requirements,
        })
    }

    /// Human-readable rendering of the requirement list and the archetype
    /// forest, for debugging.
    pub fn debug_dump(&mut self) -> String {
        let mut out = String::new();
        out.push_str("Requirements:");
        for requirement in self.enumerate_requirements() {
            let subject = self.debug_name(requirement.subject);
            let source = self.describe_source(requirement.source);
            match &requirement.rhs {
                EnumeratedRhs::Protocol(protocol) => {
                    let _ = write!(
                        out,
                        "\n  {} : {} [{}]",
                        subject,
                        self.store().protocol(*protocol).name,
                        source
                    );
                }
                EnumeratedRhs::Layout(layout) => {
                    let _ = write!(out, "\n  {} : {} [{}]", subject, layout_name(*layout), source);
                }
                EnumeratedRhs::Ty(ty) => {
                    let connector = match requirement.kind {
                        EnumeratedKind::SameType => "==",
                        _ => ":",
                    };
                    let _ = write!(
                        out,
                        "\n  {} {} {} [{}]",
                        subject,
                        connector,
                        self.store().display_type(ty),
                        source
                    );
                }
                EnumeratedRhs::Archetype(other) => {
                    let other = self.debug_name(*other);
                    let _ = write!(out, "\n  {} == {} [{}]", subject, other, source);
                }
            }
        }
        out.push('\n');

        out.push_str("Potential archetypes:\n");
        let roots = self.root_pas.clone();
        for root in roots {
            self.dump_archetype(&mut out, root, 2);
        }
        out
    }

    fn dump_archetype(&self, out: &mut String, pa: PaId, indent: usize) {
        let _ = write!(out, "{:indent$}{}", "", self.debug_name(pa), indent = indent);
        if self.representative(pa) == pa {
            if let Some(class) = self.equivalence_class(pa) {
                let protocols: Vec<&str> = class
                    .protocols()
                    .map(|protocol| self.store().protocol(protocol).name.as_str())
                    .collect();
                if !protocols.is_empty() {
                    let _ = write!(out, " : {}", protocols.join(" & "));
                }
                if let Some(concrete) = &class.concrete_type {
                    let _ = write!(out, " == {}", self.store().display_type(concrete));
                }
                if let Some(superclass) = &class.superclass {
                    let _ = write!(out, " (superclass {})", self.store().display_type(superclass));
                }
                if let Some(layout) = class.layout {
                    let _ = write!(out, " ({})", layout_name(layout));
                }
            }
        } else {
            let _ = write!(out, " -> {}", self.debug_name(self.representative(pa)));
        }
        if self.archetype(pa).is_invalid() {
            out.push_str(" [invalid]");
        }
        if let Some(original) = self.archetype(pa).original_name() {
            let _ = write!(out, " [renamed from {}]", original);
        }
        out.push('\n');

        for entries in self.archetype(pa).nested.values() {
            for &nested in entries {
                self.dump_archetype(out, nested, indent + 2);
            }
        }
    }

    fn describe_source(&self, id: SourceId) -> String {
        let source = self.sources.get(id);
        let kind = match source.kind {
            crate::source::SourceKind::Explicit => "explicit",
            crate::source::SourceKind::Inferred => "inferred",
            crate::source::SourceKind::RequirementSignatureSelf => "requirement signature",
            crate::source::SourceKind::NestedTypeNameMatch => "nested type name match",
            crate::source::SourceKind::Parent => "parent",
            crate::source::SourceKind::ProtocolRequirement => "protocol requirement",
            crate::source::SourceKind::InferredProtocolRequirement => {
                "inferred protocol requirement"
            }
            crate::source::SourceKind::Superclass => "superclass",
            crate::source::SourceKind::Concrete => "concrete",
        };
        let mut rendered = match (&source.protocol, source.kind) {
            (Some(protocol), crate::source::SourceKind::ProtocolRequirement)
            | (Some(protocol), crate::source::SourceKind::InferredProtocolRequirement)
            | (Some(protocol), crate::source::SourceKind::RequirementSignatureSelf) => {
                format!("{} [{}]", kind, self.store().protocol(*protocol).name)
            }
            _ => kind.to_string(),
        };
        if let Some(parent) = source.parent {
            rendered = format!("{} -> {}", self.describe_source(parent), rendered);
        }
        rendered
    }
}

fn has_unresolved_member(ty: &Type) -> bool {
    ty.find_if(&mut |component| {
        matches!(component, Type::Member { assoc: None, .. })
    })
}

/// A canonical generic signature: the parameter list plus the minimal
/// requirement set in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSignature {
    params: Vec<GenericParamKey>,
    requirements: Vec<Requirement>,
}

impl GenericSignature {
    pub fn new(params: Vec<GenericParamKey>, requirements: Vec<Requirement>) -> Self {
        Self {
            params,
            requirements,
        }
    }

    pub fn params(&self) -> &[GenericParamKey] {
        &self.params
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.requirements.is_empty()
    }

    /// Compact rendering: `<T0, T1 where T0: P, T0.Element == T1>`.
    pub fn display(&self, store: &DeclStore) -> String {
        let mut out = String::from("<");
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            out.push_str(&store.display_type(&Type::Param(*param)));
        }

        if !self.requirements.is_empty() {
            out.push_str(" where ");
            for (index, requirement) in self.requirements.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                match requirement {
                    Requirement::Conformance {
                        subject,
                        constraint,
                    } => {
                        let _ = write!(
                            out,
                            "{}: {}",
                            store.display_type(subject),
                            store.display_type(constraint)
                        );
                    }
                    Requirement::Superclass {
                        subject,
                        superclass,
                    } => {
                        let _ = write!(
                            out,
                            "{}: {}",
                            store.display_type(subject),
                            store.display_type(superclass)
                        );
                    }
                    Requirement::Layout { subject, layout } => {
                        let _ = write!(
                            out,
                            "{}: {}",
                            store.display_type(subject),
                            layout_name(*layout)
                        );
                    }
                    Requirement::SameType { first, second } => {
                        let _ = write!(
                            out,
                            "{} == {}",
                            store.display_type(first),
                            store.display_type(second)
                        );
                    }
                }
            }
        }

        out.push('>');
        out
    }

    /// JSON snapshot of the signature.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("signature serializes")
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_params_and_requirements() {
        let mut store = DeclStore::new();
        let proto = store.add_protocol("Sequence");
        let signature = GenericSignature::new(
            vec![GenericParamKey::new(0, 0), GenericParamKey::new(0, 1)],
            vec![
                Requirement::Conformance {
                    subject: Type::param(0, 0),
                    constraint: Type::protocol(proto),
                },
                Requirement::SameType {
                    first: Type::member(Type::param(0, 0), "Element"),
                    second: Type::param(0, 1),
                },
            ],
        );
        assert_eq!(
            signature.display(&store),
            "<T0, T1 where T0: Sequence, T0.Element == T1>"
        );
    }

    #[test]
    fn json_snapshot_round_trips() {
        let signature = GenericSignature::new(vec![GenericParamKey::new(0, 0)], Vec::new());
        let json = signature.to_pretty_json().expect("serializes");
        let parsed: GenericSignature = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(parsed, signature);
    }
}
