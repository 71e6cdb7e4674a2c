//! Finalization: drains the delayed queue, scrubs self-derived constraints,
//! detects recursive bindings, computes derived same-type components and the
//! minimal set of inter-component edges, and reports conflicts and
//! redundancies.

use crate::archetype::{NestedResolution, PaId};
use crate::builder::{
    BuilderError, GenericSignatureBuilder, MismatchCtx, UnresolvedHandling, UnresolvedType,
};
use crate::diagnostics::SignatureDiagnostic;
use crate::equivalence::{Constraint, DerivedSameTypeComponent};
use crate::source::{FloatingSource, SourceId};
use ori_ast::{ProtocolId, Span, Type};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;

/// Relation of a non-representative constraint to the class's resolved
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConstraintRelation {
    Unrelated,
    Redundant,
    Conflicting,
}

impl<'a> GenericSignatureBuilder<'a> {
    /// Every potential archetype reachable from the generic parameters,
    /// including anchors materialized along the way.
    pub(crate) fn collect_potential_archetypes(&mut self) -> Vec<PaId> {
        let mut visited: FxHashSet<PaId> = FxHashSet::default();
        let mut stack: Vec<PaId> = Vec::new();
        let mut collected = Vec::new();

        for &root in &self.root_pas {
            if visited.insert(root) {
                stack.push(root);
            }
        }

        while let Some(pa) = stack.pop() {
            collected.push(pa);

            let anchor = self.archetype_anchor(pa);
            if visited.insert(anchor) {
                stack.push(anchor);
            }

            for member in self.equivalence_class_members(pa) {
                if visited.insert(member) {
                    stack.push(member);
                }
            }

            let nested: Vec<PaId> = self
                .archetype(pa)
                .nested
                .values()
                .flat_map(|entries| entries.iter().copied())
                .collect();
            for nested_pa in nested {
                if visited.insert(nested_pa) {
                    stack.push(nested_pa);
                }
            }
        }

        collected
    }

    /// Runs the delayed queue to a fixed point, then performs the cleanup
    /// and canonicalization pipeline. Must be called exactly once.
    pub fn finalize(
        &mut self,
        _span: Span,
        allow_concrete_generic_params: bool,
    ) -> Result<(), BuilderError> {
        if self.finalized {
            return Err(BuilderError::AlreadyFinalized);
        }

        self.process_delayed_requirements();
        self.finalized = true;

        let archetypes = self.collect_potential_archetypes();
        for pa in archetypes {
            if self.representative(pa) != pa {
                continue;
            }
            self.get_or_create_equivalence_class(pa);

            if self.concrete_bound(pa).is_some() {
                if self.is_recursive_binding(pa, false) {
                    self.archetype_mut(pa).recursive_concrete = true;
                    if let Some(constraint) = self
                        .equivalence_class(pa)
                        .and_then(|class| {
                            class.find_any_concrete_constraint_as_written(&self.sources, None)
                        })
                    {
                        let subject = self.dependent_type(pa, true);
                        let constraint_span = self.sources.span_of(constraint.source);
                        self.diag(SignatureDiagnostic::RecursiveSameType {
                            subject,
                            concrete: constraint.value,
                            span: constraint_span,
                        });
                    }
                } else {
                    self.check_concrete_constraints(pa);
                }
            }

            if self.superclass_bound(pa).is_some() {
                if self.is_recursive_binding(pa, true) {
                    self.archetype_mut(pa).recursive_superclass = true;
                    if let Some(constraint) = self
                        .equivalence_class(pa)
                        .and_then(|class| {
                            class.find_any_superclass_constraint_as_written(&self.sources, None)
                        })
                    {
                        let subject = self.dependent_type(constraint.subject, true);
                        let constraint_span = self.sources.span_of(constraint.source);
                        self.diag(SignatureDiagnostic::RecursiveSuperclass {
                            subject,
                            superclass: constraint.value,
                            span: constraint_span,
                        });
                    }
                } else {
                    self.check_superclass_constraints(pa);
                }
            }

            self.check_conformance_constraints(pa);
            self.check_layout_constraints(pa);
            self.check_same_type_constraints(pa);
        }

        if !allow_concrete_generic_params {
            self.check_concrete_generic_params();
        }

        if self.num_unresolved_nested > 0 {
            self.resolve_remaining_nested_types();
        }

        Ok(())
    }

    /// Reports archetypes that were typo-corrected during finalization.
    /// Returns true if any rename was reported.
    pub fn diagnose_remaining_renames(&mut self, span: Span) -> bool {
        let renamed = self.renamed.clone();
        let mut any = false;
        for pa in renamed {
            if self.archetype(pa).rename_diagnosed {
                continue;
            }
            self.archetype_mut(pa).rename_diagnosed = true;

            let parent = self
                .archetype(pa)
                .parent()
                .expect("renamed archetype is nested");
            let parent_ty = self.dependent_type(parent, true);
            let from = self
                .archetype(pa)
                .original_name()
                .expect("renamed archetype keeps its original name")
                .to_string();
            let to = self
                .archetype(pa)
                .name()
                .expect("renamed archetype has a name")
                .to_string();
            self.diag(SignatureDiagnostic::RenamedNestedType {
                parent: parent_ty,
                from,
                to,
                span: Some(span).filter(|span| span.is_valid()),
            });
            any = true;
        }
        any
    }

    /// Representatives of archetypes directly referenced by the class's
    /// concrete binding.
    fn concrete_referenced_reps(&mut self, rep: PaId) -> Vec<PaId> {
        let Some(concrete) = self.concrete_bound(rep) else {
            return Vec::new();
        };
        self.referenced_reps(&concrete)
    }

    fn referenced_reps(&mut self, ty: &Type) -> Vec<PaId> {
        if !ty.contains_type_parameters() {
            return Vec::new();
        }
        let mut parameters = Vec::new();
        ty.visit(&mut |component| {
            if component.is_type_parameter() {
                parameters.push(component.clone());
            }
        });

        let mut reps = Vec::new();
        for parameter in parameters {
            if let Some(pa) =
                self.resolve_archetype(&parameter, crate::builder::ArchetypeResolutionKind::AlreadyKnown)
            {
                let rep = self.representative(pa);
                if !reps.contains(&rep) {
                    reps.push(rep);
                }
            }
        }
        reps
    }

    /// DFS through type-parameter references in concrete (and optionally
    /// superclass) bindings, looking for a cycle back to `archetype`.
    fn is_recursive_binding(&mut self, archetype: PaId, is_superclass: bool) -> bool {
        let mut visited: FxHashSet<PaId> = FxHashSet::default();
        let mut stack = vec![archetype];
        visited.insert(archetype);

        while let Some(pa) = stack.pop() {
            if is_superclass {
                if let Some(superclass) = self.superclass_bound(pa) {
                    for rep in self.referenced_reps(&superclass) {
                        if rep == archetype {
                            return true;
                        }
                        if visited.insert(rep) {
                            stack.push(rep);
                        }
                    }
                }
            }

            for rep in self.concrete_referenced_reps(pa) {
                if rep == archetype {
                    return true;
                }
                if visited.insert(rep) {
                    stack.push(rep);
                }
            }
        }

        false
    }

    /// Removes self-derived entries from a constraint list. When every
    /// entry was derived-via-concrete, one survivor is kept so the fact is
    /// not lost entirely. Returns true if any derived-via-concrete entry
    /// was seen.
    pub(crate) fn remove_self_derived<T: Clone>(
        &self,
        constraints: &mut Vec<Constraint<T>>,
        drop_derived_via_concrete: bool,
    ) -> bool {
        let mut any_via_concrete = false;
        let mut remaining_concrete: Option<Constraint<T>> = None;

        constraints.retain(|constraint| {
            let mut via_concrete = false;
            if self.is_self_derived_source(constraint.source, constraint.subject, &mut via_concrete)
            {
                return false;
            }
            if !via_concrete {
                return true;
            }
            any_via_concrete = true;
            if !drop_derived_via_concrete {
                return true;
            }
            if remaining_concrete.is_none() {
                remaining_concrete = Some(constraint.clone());
            }
            false
        });

        if constraints.is_empty() {
            if let Some(constraint) = remaining_concrete.take() {
                constraints.push(constraint);
            }
        }

        any_via_concrete
    }

    pub(crate) fn sort_constraints<T>(&self, constraints: &mut [Constraint<T>]) {
        constraints.sort_by(|a, b| {
            self.compare_dependent_types(a.subject, b.subject)
                .then_with(|| self.sources.compare(a.source, b.source))
        });
    }

    /// Picks the constraint diagnostics will treat as the "canonical"
    /// statement of the fact: inferred beats explicit, derived beats
    /// written, located beats unlocated.
    pub(crate) fn find_representative_constraint<T: Clone>(
        &self,
        constraints: &[Constraint<T>],
        is_suitable: impl Fn(&Constraint<T>) -> bool,
    ) -> Option<Constraint<T>> {
        let mut representative: Option<&Constraint<T>> = None;
        for constraint in constraints {
            if !is_suitable(constraint) {
                continue;
            }
            let Some(current) = representative else {
                representative = Some(constraint);
                continue;
            };

            let this_inferred = self.sources.is_inferred(constraint.source);
            let current_inferred = self.sources.is_inferred(current.source);
            if this_inferred != current_inferred {
                if this_inferred {
                    representative = Some(constraint);
                }
                continue;
            }

            let this_derived = self.sources.is_derived(constraint.source);
            let current_derived = self.sources.is_derived(current.source);
            if this_derived != current_derived {
                if this_derived {
                    representative = Some(constraint);
                }
                continue;
            }

            let this_located = self.sources.span_of(constraint.source).is_some();
            let current_located = self.sources.span_of(current.source).is_some();
            if this_located != current_located {
                if this_located {
                    representative = Some(constraint);
                }
                continue;
            }

            let order = self
                .compare_dependent_types(constraint.subject, current.subject)
                .then_with(|| self.sources.compare(constraint.source, current.source));
            if order == Ordering::Less {
                representative = Some(constraint);
            }
        }
        representative.cloned()
    }

    fn constraint_matches<T: PartialEq>(a: &Constraint<T>, b: &Constraint<T>) -> bool {
        a.subject == b.subject && a.value == b.value && a.source == b.source
    }

    fn check_conformance_constraints(&mut self, rep: PaId) {
        let Some(class_id) = self.equivalence_class_id(rep) else {
            return;
        };
        let protocols: Vec<ProtocolId> = self.class(class_id).protocols().collect();

        for protocol in protocols {
            let mut constraints = self.class(class_id).conforms_to[&protocol].clone();

            // Scrub self-derived conformances, keeping one derived-via-
            // concrete fallback if the list would otherwise empty.
            let mut remaining_concrete: Option<Constraint<ProtocolId>> = None;
            let snapshot = constraints.clone();
            constraints.clear();
            for constraint in snapshot {
                let mut via_concrete = false;
                if self.is_self_derived_conformance(
                    constraint.source,
                    constraint.subject,
                    protocol,
                    &mut via_concrete,
                ) {
                    continue;
                }
                if via_concrete {
                    if remaining_concrete.is_none() {
                        remaining_concrete = Some(constraint.clone());
                    }
                    continue;
                }
                constraints.push(constraint);
            }
            if constraints.is_empty() {
                if let Some(constraint) = remaining_concrete {
                    constraints.push(constraint);
                }
            }

            self.sort_constraints(&mut constraints);
            let representative = self.find_representative_constraint(&constraints, |_| true);

            if let Some(representative) = &representative {
                // Duplicate conformances never conflict; they are only
                // redundant.
                for constraint in &constraints {
                    if Self::constraint_matches(constraint, representative) {
                        continue;
                    }
                    self.report_redundant(
                        constraint.source,
                        representative.source,
                        |builder, span, other_span| {
                            let subject = builder.dependent_type(constraint.subject, true);
                            SignatureDiagnostic::RedundantConformance {
                                subject,
                                protocol,
                                span,
                                other_span,
                            }
                        },
                    );
                }
            }

            self.class_mut(class_id)
                .conforms_to
                .insert(protocol, constraints);
        }
    }

    fn check_concrete_constraints(&mut self, rep: PaId) {
        let Some(class_id) = self.equivalence_class_id(rep) else {
            return;
        };
        let concrete = self
            .class(class_id)
            .concrete_type
            .clone()
            .expect("concrete binding checked by caller");

        let mut constraints = self.class(class_id).concrete_type_constraints.clone();
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        if let Some(representative) = self.find_representative_constraint(&constraints, |_| true) {
            for constraint in &constraints {
                if Self::constraint_matches(constraint, &representative) {
                    continue;
                }
                if constraint.value != concrete {
                    // Unrelated concrete statement; the conflict was
                    // reported when the binding was reconciled.
                    continue;
                }
                self.report_redundant(
                    constraint.source,
                    representative.source,
                    |builder, span, other_span| {
                        let subject = builder.dependent_type(constraint.subject, true);
                        SignatureDiagnostic::RedundantConcreteSameType {
                            subject,
                            concrete: constraint.value.clone(),
                            span,
                            other_span,
                        }
                    },
                );
            }
        }

        self.class_mut(class_id).concrete_type_constraints = constraints;
    }

    fn check_superclass_constraints(&mut self, rep: PaId) {
        let Some(class_id) = self.equivalence_class_id(rep) else {
            return;
        };
        let superclass = self
            .class(class_id)
            .superclass
            .clone()
            .expect("superclass bound checked by caller");

        let mut constraints = self.class(class_id).superclass_constraints.clone();
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        let representative = self
            .find_representative_constraint(&constraints, |constraint| {
                constraint.value == superclass
            });

        if let Some(representative) = &representative {
            let mut diagnosed_conflicting_representative = false;
            for constraint in &constraints {
                if Self::constraint_matches(constraint, representative) {
                    continue;
                }
                let relation = if self
                    .store()
                    .is_exact_superclass_of(&constraint.value, &superclass)
                {
                    ConstraintRelation::Redundant
                } else {
                    ConstraintRelation::Conflicting
                };

                match relation {
                    ConstraintRelation::Redundant => {
                        self.report_redundant(
                            constraint.source,
                            representative.source,
                            |builder, span, other_span| {
                                let subject = builder.dependent_type(constraint.subject, true);
                                SignatureDiagnostic::RedundantSuperclass {
                                    subject,
                                    superclass: constraint.value.clone(),
                                    span,
                                    other_span,
                                }
                            },
                        );
                    }
                    ConstraintRelation::Conflicting => {
                        if let Some(span) = self.sources.span_of(constraint.source) {
                            let subject = self.dependent_type(constraint.subject, true);
                            self.diag(SignatureDiagnostic::ConflictingSuperclass {
                                subject,
                                existing: representative.value.clone(),
                                incoming: constraint.value.clone(),
                                span: Some(span),
                            });
                        } else if !diagnosed_conflicting_representative {
                            if let Some(span) = self.sources.span_of(representative.source) {
                                let subject =
                                    self.dependent_type(representative.subject, true);
                                self.diag(SignatureDiagnostic::ConflictingSuperclass {
                                    subject,
                                    existing: constraint.value.clone(),
                                    incoming: representative.value.clone(),
                                    span: Some(span),
                                });
                                diagnosed_conflicting_representative = true;
                            }
                        }
                    }
                    ConstraintRelation::Unrelated => {}
                }
            }
        }

        self.class_mut(class_id).superclass_constraints = constraints;

        // A concrete binding must lie under the superclass bound.
        let concrete = self.class(class_id).concrete_type.clone();
        if let Some(concrete) = concrete {
            if !self.store().is_exact_superclass_of(&superclass, &concrete) {
                let written = self
                    .class(class_id)
                    .find_any_concrete_constraint_as_written(&self.sources, None);
                let (subject_pa, span) = match (&written, &representative) {
                    (Some(constraint), _) => {
                        (constraint.subject, self.sources.span_of(constraint.source))
                    }
                    (None, Some(representative)) => (
                        representative.subject,
                        self.sources.span_of(representative.source),
                    ),
                    (None, None) => (rep, None),
                };
                if span.is_some() {
                    let subject = self.dependent_type(subject_pa, true);
                    self.diag(SignatureDiagnostic::ConcreteDoesNotInheritSuperclass {
                        subject,
                        concrete,
                        superclass,
                        span,
                    });
                }
            } else if let Some(representative) = &representative {
                if let Some(span) = self.sources.span_of(representative.source) {
                    let subject = self.dependent_type(representative.subject, true);
                    self.diag(SignatureDiagnostic::RedundantSuperclass {
                        subject,
                        superclass: representative.value.clone(),
                        span: Some(span),
                        other_span: None,
                    });
                }
            }
        }
    }

    fn check_layout_constraints(&mut self, rep: PaId) {
        let Some(class_id) = self.equivalence_class_id(rep) else {
            return;
        };
        let Some(layout) = self.class(class_id).layout else {
            return;
        };

        let mut constraints = self.class(class_id).layout_constraints.clone();
        self.remove_self_derived(&mut constraints, true);
        self.sort_constraints(&mut constraints);

        let representative = self
            .find_representative_constraint(&constraints, |constraint| constraint.value == layout);

        if let Some(representative) = &representative {
            for constraint in &constraints {
                if Self::constraint_matches(constraint, representative) {
                    continue;
                }
                if constraint.value.merge(layout).is_some() {
                    self.report_redundant(
                        constraint.source,
                        representative.source,
                        |builder, span, other_span| {
                            let subject = builder.dependent_type(constraint.subject, true);
                            SignatureDiagnostic::RedundantLayout {
                                subject,
                                layout: constraint.value,
                                span,
                                other_span,
                            }
                        },
                    );
                } else if let Some(span) = self.sources.span_of(constraint.source) {
                    let subject = self.dependent_type(constraint.subject, true);
                    self.diag(SignatureDiagnostic::ConflictingLayout {
                        subject,
                        existing: layout,
                        incoming: constraint.value,
                        span: Some(span),
                    });
                }
            }
        }

        self.class_mut(class_id).layout_constraints = constraints;
    }

    fn report_redundant<T>(
        &mut self,
        source: SourceId,
        representative_source: SourceId,
        build: impl FnOnce(&mut Self, Option<Span>, Option<Span>) -> T,
    ) where
        T: Into<SignatureDiagnostic>,
    {
        // Redundancy is only interesting for constraints the user wrote.
        if self.sources.is_derived(source) || self.sources.is_inferred(source) {
            return;
        }
        let Some(span) = self.sources.span_of(source) else {
            return;
        };
        let other_span = self.sources.span_of(representative_source);
        let diagnostic = build(self, Some(span), other_span);
        self.diag(diagnostic.into());
    }

    /// DFS over the derived same-type edges, assigning component numbers
    /// and returning the best anchor seen.
    fn same_type_dfs(
        &self,
        pa: PaId,
        component: usize,
        component_of: &mut FxHashMap<PaId, usize>,
    ) -> PaId {
        let mut anchor = pa;
        if component_of.insert(pa, component).is_some() {
            return anchor;
        }

        let constraints = self
            .equivalence_class(pa)
            .and_then(|class| class.same_type_constraints.get(&pa).cloned())
            .unwrap_or_default();
        for constraint in constraints {
            if !self.sources.is_derived(constraint.source) {
                continue;
            }
            let new_anchor = self.same_type_dfs(constraint.value, component, component_of);
            if self.compare_dependent_types(new_anchor, anchor) == Ordering::Less {
                anchor = new_anchor;
            }
        }

        anchor
    }

    /// Computes the connected components of the derived same-type subgraph,
    /// associating each with its best concrete-type source.
    fn compute_derived_same_type_components(
        &mut self,
        rep: PaId,
        component_of: &mut FxHashMap<PaId, usize>,
    ) {
        let members = self.equivalence_class_members(rep);
        let mut components: Vec<DerivedSameTypeComponent> = Vec::new();
        for member in members {
            if component_of.contains_key(&member) {
                continue;
            }
            let anchor = self.same_type_dfs(member, components.len(), component_of);
            components.push(DerivedSameTypeComponent {
                anchor,
                concrete_type_source: None,
            });
        }

        let concrete_constraints = self
            .equivalence_class(rep)
            .map(|class| class.concrete_type_constraints.clone())
            .unwrap_or_default();
        for constraint in concrete_constraints {
            let Some(&component) = component_of.get(&constraint.subject) else {
                continue;
            };

            // Self-derived sources stay out of the component records; the
            // staged derived-via-concrete scrub happens after diagnostics.
            let mut via_concrete = false;
            if self.is_self_derived_source(constraint.source, constraint.subject, &mut via_concrete)
            {
                continue;
            }

            let best = &mut components[component].concrete_type_source;
            let better = match best {
                None => true,
                Some(existing) => {
                    self.sources.compare(constraint.source, *existing) == Ordering::Less
                }
            };
            if better {
                *best = Some(constraint.source);
            }
        }

        components.sort_by(|a, b| self.compare_dependent_types(a.anchor, b.anchor));

        if let Some(class_id) = self.equivalence_class_id(rep) {
            self.class_mut(class_id).derived_same_type_components = components;
        }
    }

    /// Scrubs, canonicalizes, and diagnoses the same-type constraints of a
    /// class: derived components, intra-component redundancies, and the
    /// spanning tree over inter-component edges.
    pub(crate) fn check_same_type_constraints(&mut self, rep: PaId) {
        self.get_or_create_equivalence_class(rep);
        if self
            .equivalence_class(rep)
            .map(|class| !class.derived_same_type_components.is_empty())
            .unwrap_or(true)
        {
            return;
        }

        // Materialize local anchors for every member first; anchors that
        // only exist implicitly still participate in canonicalization.
        let members = self.equivalence_class_members(rep);
        for member in members {
            let _ = self.local_anchor(member);
        }
        let rep = self.representative_compressing(rep);
        let Some(class_id) = self.equivalence_class_id(rep) else {
            return;
        };

        // Scrub the edge lists, keeping derived-via-concrete edges for now.
        let mut any_via_concrete = false;
        let buckets: Vec<PaId> = self
            .class(class_id)
            .same_type_constraints
            .keys()
            .copied()
            .collect();
        for bucket in &buckets {
            let mut constraints = self.class(class_id).same_type_constraints[bucket].clone();
            if self.remove_self_derived(&mut constraints, false) {
                any_via_concrete = true;
            }
            self.sort_constraints(&mut constraints);
            self.class_mut(class_id)
                .same_type_constraints
                .insert(*bucket, constraints);
        }

        let mut component_of: FxHashMap<PaId, usize> = FxHashMap::default();
        self.compute_derived_same_type_components(rep, &mut component_of);
        let num_components = self
            .class(class_id)
            .derived_same_type_components
            .len();

        // Sort every non-derived edge into intra- and inter-component bins.
        let mut intracomponent: Vec<Vec<Constraint<PaId>>> = vec![Vec::new(); num_components];
        let mut intercomponent: Vec<IntercomponentEdge> = Vec::new();
        let all_constraints: Vec<Constraint<PaId>> = self
            .class(class_id)
            .same_type_constraints
            .values()
            .flatten()
            .cloned()
            .collect();
        for constraint in all_constraints {
            if constraint.subject == constraint.value {
                self.report_redundant(constraint.source, constraint.source, {
                    let constraint = constraint.clone();
                    move |builder, span, _| {
                        let first = builder.dependent_type(constraint.subject, true);
                        let second = builder.dependent_type(constraint.value, true);
                        SignatureDiagnostic::RedundantSameType {
                            first,
                            second,
                            span,
                            other_span: None,
                        }
                    }
                });
                continue;
            }

            // Every edge was recorded in both directions; keep the copy
            // whose subject orders first.
            if self.compare_dependent_types(constraint.subject, constraint.value)
                == Ordering::Greater
            {
                continue;
            }

            let first = component_of[&constraint.subject];
            let second = component_of[&constraint.value];
            if first == second {
                intracomponent[first].push(constraint);
            } else {
                intercomponent.push(IntercomponentEdge::new(first, second, constraint));
            }
        }

        // Now that the edge bins are built, run the staged second sweep
        // that drops derived-via-concrete constraints.
        if any_via_concrete {
            for bucket in &buckets {
                let mut constraints = self.class(class_id).same_type_constraints[bucket].clone();
                self.remove_self_derived(&mut constraints, true);
                self.class_mut(class_id)
                    .same_type_constraints
                    .insert(*bucket, constraints);
            }
        }

        // Within a component, every explicitly-written edge is redundant.
        for constraints in &intracomponent {
            if constraints.is_empty() {
                continue;
            }
            let Some(representative) = self.find_representative_constraint(constraints, |_| true)
            else {
                continue;
            };
            for constraint in constraints {
                if Self::constraint_matches(constraint, &representative) {
                    continue;
                }
                self.report_redundant(
                    constraint.source,
                    representative.source,
                    |builder, span, other_span| {
                        let first = builder.dependent_type(constraint.subject, true);
                        let second = builder.dependent_type(constraint.value, true);
                        SignatureDiagnostic::RedundantSameType {
                            first,
                            second,
                            span,
                            other_span,
                        }
                    },
                );
            }
        }

        // Canonicalize the inter-component edges: per component pair keep
        // the first edge, then keep only edges that extend the spanning
        // forest.
        intercomponent.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then(a.target.cmp(&b.target))
                .then_with(|| {
                    let a_inferred = self.sources.is_inferred(a.constraint.source);
                    let b_inferred = self.sources.is_inferred(b.constraint.source);
                    a_inferred.cmp(&b_inferred)
                })
                .then_with(|| {
                    self.compare_dependent_types(a.constraint.subject, b.constraint.subject)
                        .then_with(|| self.sources.compare(a.constraint.source, b.constraint.source))
                })
        });

        let mut deduped: Vec<IntercomponentEdge> = Vec::new();
        for edge in intercomponent {
            let Some(kept) = deduped.last() else {
                deduped.push(edge);
                continue;
            };
            if kept.source != edge.source || kept.target != edge.target {
                deduped.push(edge);
                continue;
            }

            let kept_span = self.sources.span_of(kept.constraint.source);
            let edge_span = self.sources.span_of(edge.constraint.source);
            if kept_span.is_none() || edge_span.is_none() {
                continue;
            }
            if self.sources.is_inferred(kept.constraint.source) {
                continue;
            }
            let first = self.dependent_type(kept.constraint.subject, true);
            let second = self.dependent_type(kept.constraint.value, true);
            self.diag(SignatureDiagnostic::RedundantSameType {
                first,
                second,
                span: kept_span,
                other_span: edge_span,
            });
        }

        if deduped.len() > num_components.saturating_sub(1) {
            let mut connected = vec![false; num_components];
            let first_edge = deduped[0].clone();
            for edge in &deduped {
                if connected[edge.source] && connected[edge.target] {
                    let edge_span = self.sources.span_of(edge.constraint.source);
                    let first_span = self.sources.span_of(first_edge.constraint.source);
                    if edge_span.is_some()
                        && !self.sources.is_inferred(edge.constraint.source)
                        && first_span.is_some()
                    {
                        let first = self.dependent_type(edge.constraint.subject, true);
                        let second = self.dependent_type(edge.constraint.value, true);
                        self.diag(SignatureDiagnostic::RedundantSameType {
                            first,
                            second,
                            span: edge_span,
                            other_span: first_span,
                        });
                    }
                    continue;
                }
                connected[edge.source] = true;
                connected[edge.target] = true;
            }
        }
    }

    /// Local anchor: this archetype rebuilt through the anchors of its
    /// parents.
    fn local_anchor(&mut self, pa: PaId) -> Option<PaId> {
        let Some(parent) = self.archetype(pa).parent() else {
            return Some(pa);
        };
        let parent_anchor = self.local_anchor(parent)?;
        let name = self.archetype(pa).name()?.to_string();
        self.nested_archetype_anchor(
            parent_anchor,
            &name,
            crate::nested::NestedTypeUpdate::AddIfMissing,
        )
    }

    /// Diagnoses generic parameters that were made concrete or merged with
    /// one another.
    fn check_concrete_generic_params(&mut self) {
        let max_depth = self
            .generic_params
            .iter()
            .map(|key| key.depth)
            .max()
            .unwrap_or(0);

        let mut visited: FxHashSet<PaId> = FxHashSet::default();
        let roots = self.root_pas.clone();
        for pa in roots {
            let key = self
                .archetype(pa)
                .generic_param_key()
                .expect("root archetypes are generic parameters");
            if key.depth < max_depth {
                continue;
            }

            let rep = self.representative(pa);
            if !visited.insert(rep) {
                continue;
            }

            let Some(class) = self.equivalence_class(rep) else {
                continue;
            };

            if class.concrete_type.is_some() {
                if let Some(constraint) = self
                    .equivalence_class(rep)
                    .and_then(|class| {
                        class.find_any_concrete_constraint_as_written(&self.sources, None)
                    })
                {
                    let param = self.dependent_type(rep, true);
                    let span = self.sources.span_of(constraint.source);
                    self.diag(SignatureDiagnostic::ConcreteGenericParam { param, span });
                }
                continue;
            }

            let members = self.equivalence_class_members(rep);
            for other in members {
                if other == pa || !self.archetype(other).is_generic_param() {
                    continue;
                }

                let bucket = self
                    .equivalence_class(rep)
                    .and_then(|class| class.same_type_constraints.get(&pa).cloned())
                    .unwrap_or_default();
                let constraint = self
                    .find_representative_constraint(&bucket, |constraint| constraint.value == other)
                    .or_else(|| self.find_representative_constraint(&bucket, |_| true));

                if let Some(constraint) = constraint {
                    if let Some(span) = self.sources.span_of(constraint.source) {
                        let first = self.dependent_type(pa, true);
                        let second = self.dependent_type(other, true);
                        self.diag(SignatureDiagnostic::EquatedGenericParams {
                            first,
                            second,
                            span: Some(span),
                        });
                    }
                }
                break;
            }
        }
    }

    /// Typo-corrects or invalidates nested types that never resolved.
    fn resolve_remaining_nested_types(&mut self) {
        let archetypes = self.collect_potential_archetypes();
        for pa in archetypes {
            let archetype = self.archetype(pa);
            if archetype.parent().is_none()
                || archetype.resolved_assoc_type().is_some()
                || archetype.resolved_alias().is_some()
                || self.superclass_bound(pa).is_some()
            {
                continue;
            }

            let Some(correction) = self.typo_correct_nested_type(pa) else {
                self.archetype_mut(pa).invalid = true;
                let parent = self
                    .archetype(pa)
                    .parent()
                    .expect("unresolved nested archetype has a parent");
                let parent_ty = self.dependent_type(parent, true);
                let name = self
                    .archetype(pa)
                    .name()
                    .expect("nested archetype has a name")
                    .to_string();
                self.diag(SignatureDiagnostic::UnresolvedNestedType {
                    parent: parent_ty,
                    name,
                });
                continue;
            };

            let parent = self
                .archetype(pa)
                .parent()
                .expect("unresolved nested archetype has a parent");
            let replacement = self
                .get_nested_type(parent, &correction)
                .filter(|&replacement| replacement != pa);
            let Some(replacement) = replacement else {
                self.archetype_mut(pa).invalid = true;
                continue;
            };
            let Some(assoc) = self.archetype(replacement).resolved_assoc_type() else {
                self.archetype_mut(pa).invalid = true;
                continue;
            };

            // Rename in place; the original spelling is kept for the
            // rename diagnostic and for canonical ordering.
            let original = self
                .archetype(pa)
                .name()
                .expect("nested archetype has a name")
                .to_string();
            {
                let archetype = self.archetype_mut(pa);
                archetype.renamed_from = Some(original);
                if let crate::archetype::ParentLink::Nested { name, .. } = &mut archetype.link {
                    *name = correction;
                }
                archetype.resolution = NestedResolution::AssocType(assoc);
            }
            self.num_unresolved_nested -= 1;
            self.renamed.push(pa);

            let source = self.sources.for_nested_type_name_match(pa);
            self.add_same_type_requirement(
                UnresolvedType::Archetype(pa),
                UnresolvedType::Archetype(replacement),
                FloatingSource::resolved(source),
                UnresolvedHandling::GenerateConstraints,
                MismatchCtx::Plain { span: None },
            );
        }

        self.process_delayed_requirements();
    }
}

/// An explicit same-type edge between two different derived components.
#[derive(Debug, Clone)]
struct IntercomponentEdge {
    source: usize,
    target: usize,
    constraint: Constraint<PaId>,
}

impl IntercomponentEdge {
    fn new(source: usize, target: usize, constraint: Constraint<PaId>) -> Self {
        let (source, target) = if source <= target {
            (source, target)
        } else {
            (target, source)
        };
        Self {
            source,
            target,
            constraint,
        }
    }
}
