//! The generic signature builder: requirement entry points, resolution
//! against the archetype graph, equivalence-class merging, and the
//! delayed-requirement queue.
//!
//! Requirements arrive as [`ori_ast::Requirement`] values plus a floating
//! source. Each is resolved against the current archetype graph; sides that
//! cannot be resolved yet are parked on the delayed queue, which
//! [`GenericSignatureBuilder::finalize`] later drains to a fixed point.

use crate::archetype::{PaId, PotentialArchetype, RepOrClass};
use crate::diagnostics::SignatureDiagnostic;
use crate::equivalence::{Constraint, EquivalenceClass};
use crate::nested::NestedTypeUpdate;
use crate::source::{FloatingSource, SourceArena, SourceId};
use ori_ast::{
    ConformanceRef, DeclStore, GenericParamKey, LayoutConstraint, ProtocolId, Requirement, Span,
    Substitutions, Type,
};
use thiserror::Error;

/// Outcome of adding one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintResult {
    /// The requirement was recorded (possibly by queueing it).
    Resolved,
    /// A side could not be resolved to an archetype and the caller asked to
    /// be told rather than queue.
    Unresolved,
    /// The requirement was written on a concrete type.
    Concrete,
    /// The requirement is unsatisfiable.
    Conflicting,
}

pub(crate) fn is_error_result(result: ConstraintResult) -> bool {
    matches!(result, ConstraintResult::Conflicting)
}

/// What to do when a side of a requirement fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnresolvedHandling {
    /// Park the requirement on the delayed queue.
    GenerateConstraints,
    /// Report `Unresolved` to the caller; used while draining the queue.
    ReturnUnresolved,
}

/// How aggressively type resolution may extend the archetype graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchetypeResolutionKind {
    /// Only find archetypes that already exist.
    AlreadyKnown,
    /// Create nested archetypes as needed.
    AlwaysPartial,
}

/// A type that may or may not have been resolved to an archetype yet.
#[derive(Debug, Clone)]
pub(crate) enum UnresolvedType {
    Archetype(PaId),
    Ty(Type),
}

/// Result of resolving an [`UnresolvedType`].
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Archetype(PaId),
    Concrete(Type),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DelayedKind {
    /// Conformance or superclass; re-dispatched through the type
    /// requirement entry point.
    TypeConstraint,
    Layout,
    SameType,
}

#[derive(Debug, Clone)]
pub(crate) enum DelayedRhs {
    Ty(Type),
    Archetype(PaId),
    Layout(LayoutConstraint),
}

impl DelayedRhs {
    fn as_unresolved(&self) -> UnresolvedType {
        match self {
            DelayedRhs::Ty(ty) => UnresolvedType::Ty(ty.clone()),
            DelayedRhs::Archetype(pa) => UnresolvedType::Archetype(*pa),
            DelayedRhs::Layout(_) => unreachable!("layout rhs is handled separately"),
        }
    }
}

/// A requirement whose sides could not all be resolved when it was added.
#[derive(Debug, Clone)]
pub(crate) struct DelayedRequirement {
    pub kind: DelayedKind,
    pub lhs: UnresolvedType,
    pub rhs: DelayedRhs,
    pub source: FloatingSource,
}

/// Context used to report a concrete same-type mismatch.
#[derive(Debug, Clone)]
pub(crate) enum MismatchCtx {
    /// Report at the written location, when there is one.
    Plain { span: Option<Span> },
    /// Report against the archetype the conflicting binding landed on.
    Conflict { source: SourceId, pa: PaId },
}

/// API misuse errors. Build-phase failures never travel this channel; they
/// are accumulated as diagnostics instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("generic parameter ({depth}, {index}) added out of order")]
    GenericParameterOutOfOrder { depth: u32, index: u32 },
    #[error("finalize called more than once")]
    AlreadyFinalized,
    #[error("generic signature requested before finalize")]
    NotFinalized,
}

/// Builds one canonical generic signature from a stream of requirements.
#[derive(Debug)]
pub struct GenericSignatureBuilder<'a> {
    store: &'a DeclStore,
    pub(crate) pas: Vec<PotentialArchetype>,
    pub(crate) classes: Vec<Option<EquivalenceClass>>,
    pub(crate) sources: SourceArena,
    pub(crate) generic_params: Vec<GenericParamKey>,
    pub(crate) root_pas: Vec<PaId>,
    pub(crate) delayed: Vec<DelayedRequirement>,
    pub(crate) num_unresolved_nested: usize,
    pub(crate) renamed: Vec<PaId>,
    pub(crate) diagnostics: Vec<SignatureDiagnostic>,
    pub(crate) finalized: bool,
}

impl<'a> GenericSignatureBuilder<'a> {
    pub fn new(store: &'a DeclStore) -> Self {
        Self {
            store,
            pas: Vec::new(),
            classes: Vec::new(),
            sources: SourceArena::new(),
            generic_params: Vec::new(),
            root_pas: Vec::new(),
            delayed: Vec::new(),
            num_unresolved_nested: 0,
            renamed: Vec::new(),
            diagnostics: Vec::new(),
            finalized: false,
        }
    }

    pub fn store(&self) -> &'a DeclStore {
        self.store
    }

    pub fn generic_params(&self) -> &[GenericParamKey] {
        &self.generic_params
    }

    pub fn generic_param_archetypes(&self) -> &[PaId] {
        &self.root_pas
    }

    pub fn diagnostics(&self) -> &[SignatureDiagnostic] {
        &self.diagnostics
    }

    /// The interned requirement sources recorded so far.
    pub fn sources(&self) -> &SourceArena {
        &self.sources
    }

    pub fn num_unresolved_nested_types(&self) -> usize {
        self.num_unresolved_nested
    }

    pub(crate) fn diag(&mut self, diagnostic: SignatureDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn alloc_archetype(&mut self, archetype: PotentialArchetype) -> PaId {
        let id = PaId::new(self.pas.len());
        self.pas.push(archetype);
        id
    }

    /// Registers a generic parameter. Parameters must arrive in
    /// non-decreasing `(depth, index)` order with same-depth indices
    /// contiguous from zero.
    pub fn add_generic_parameter(&mut self, key: GenericParamKey) -> Result<(), BuilderError> {
        if let Some(last) = self.generic_params.last() {
            let contiguous = (key.depth == last.depth && key.index == last.index + 1)
                || (key.depth > last.depth && key.index == 0);
            if !contiguous {
                return Err(BuilderError::GenericParameterOutOfOrder {
                    depth: key.depth,
                    index: key.index,
                });
            }
        } else if key.index != 0 {
            return Err(BuilderError::GenericParameterOutOfOrder {
                depth: key.depth,
                index: key.index,
            });
        }

        let pa = self.alloc_archetype(PotentialArchetype::new_root(key));
        self.generic_params.push(key);
        self.root_pas.push(pa);
        Ok(())
    }

    /// Registers the inheritance clause written on a generic parameter.
    pub fn add_generic_parameter_requirements(
        &mut self,
        key: GenericParamKey,
        inherited: &[Type],
    ) -> ConstraintResult {
        let Some(index) = self.generic_params.iter().position(|&k| k == key) else {
            return ConstraintResult::Unresolved;
        };
        let pa = self.root_pas[index];

        let mut result = ConstraintResult::Resolved;
        for ty in inherited {
            self.infer_requirements_with(ty, &FloatingSource::inferred(None));
            let one = self.add_type_requirement(
                UnresolvedType::Archetype(pa),
                UnresolvedType::Ty(ty.clone()),
                FloatingSource::abstract_explicit(),
                UnresolvedHandling::GenerateConstraints,
            );
            if is_error_result(one) {
                result = one;
            }
        }
        result
    }

    /// Adds one requirement with the given provenance.
    pub fn add_requirement(
        &mut self,
        requirement: &Requirement,
        source: FloatingSource,
    ) -> ConstraintResult {
        self.add_requirement_substituted(requirement, source, None)
    }

    /// Adds one requirement, substituting its type positions first. Used
    /// when replaying the requirements of another declaration in a new
    /// context.
    pub fn add_requirement_substituted(
        &mut self,
        requirement: &Requirement,
        source: FloatingSource,
        subs: Option<&Substitutions>,
    ) -> ConstraintResult {
        let apply = |ty: &Type| match subs {
            Some(subs) => ty.substitute(subs),
            None => ty.clone(),
        };

        match requirement {
            Requirement::Conformance {
                subject,
                constraint,
            }
            | Requirement::Superclass {
                subject,
                superclass: constraint,
            } => {
                let subject = apply(subject);
                let constraint = apply(constraint);
                let inferred = source.as_inferred(None);
                self.infer_requirements_with(&subject, &inferred);
                self.infer_requirements_with(&constraint, &inferred);
                self.add_type_requirement(
                    UnresolvedType::Ty(subject),
                    UnresolvedType::Ty(constraint),
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }
            Requirement::Layout { subject, layout } => {
                let subject = apply(subject);
                self.infer_requirements_with(&subject, &source.as_inferred(None));
                self.add_layout_requirement(
                    UnresolvedType::Ty(subject),
                    *layout,
                    source,
                    UnresolvedHandling::GenerateConstraints,
                )
            }
            Requirement::SameType { first, second } => {
                let first = apply(first);
                let second = apply(second);

                // A written same-type requirement must mention a type
                // parameter on at least one side.
                if !first.contains_type_parameters()
                    && !second.contains_type_parameters()
                    && source.is_explicit(&self.sources)
                {
                    if !first.is_error() && !second.is_error() {
                        let span = source.span(&self.sources);
                        self.diag(SignatureDiagnostic::SameTypeWithoutTypeParameter { span });
                    }
                    return ConstraintResult::Concrete;
                }

                let inferred = source.as_inferred(None);
                self.infer_requirements_with(&first, &inferred);
                self.infer_requirements_with(&second, &inferred);
                let span = source.span(&self.sources);
                self.add_same_type_requirement(
                    UnresolvedType::Ty(first),
                    UnresolvedType::Ty(second),
                    source,
                    UnresolvedHandling::GenerateConstraints,
                    MismatchCtx::Plain { span },
                )
            }
        }
    }

    /// Re-enters the parameters and requirements of an existing signature,
    /// queueing same-type requirements last so nested types referenced by
    /// them already exist.
    pub fn add_existing_signature(
        &mut self,
        signature: &crate::signature::GenericSignature,
    ) -> Result<(), BuilderError> {
        for &param in signature.params() {
            self.add_generic_parameter(param)?;
        }

        let mut same_type = Vec::new();
        for requirement in signature.requirements() {
            if matches!(requirement, Requirement::SameType { .. }) {
                same_type.push(requirement.clone());
                continue;
            }
            self.add_requirement(requirement, FloatingSource::abstract_explicit());
        }
        for requirement in same_type {
            self.add_requirement(&requirement, FloatingSource::abstract_explicit());
        }
        Ok(())
    }

    /// Walks a type expression and applies the generic signature of every
    /// nominal application encountered, adding each requirement as inferred.
    pub fn infer_requirements(&mut self, ty: &Type) {
        self.infer_requirements_with(ty, &FloatingSource::inferred(None));
    }

    pub(crate) fn infer_requirements_with(&mut self, ty: &Type, source: &FloatingSource) {
        match ty {
            Type::Nominal { decl, args } => {
                for arg in args {
                    self.infer_requirements_with(arg, source);
                }
                let decl_data = self.store.nominal(*decl);
                if decl_data.requirements.is_empty() {
                    return;
                }
                let mut subs = Substitutions::new();
                for (param, arg) in decl_data.generic_params.iter().zip(args.iter()) {
                    subs.insert(*param, arg.clone());
                }
                let requirements = decl_data.requirements.clone();
                for requirement in &requirements {
                    self.add_requirement_substituted(requirement, source.clone(), Some(&subs));
                }
            }
            Type::Member { base, .. } => self.infer_requirements_with(base, source),
            Type::Tuple(elements) => {
                for element in elements {
                    self.infer_requirements_with(element, source);
                }
            }
            Type::Existential { superclass, .. } => {
                if let Some(superclass) = superclass {
                    self.infer_requirements_with(superclass, source);
                }
            }
            Type::Param(_) | Type::Error => {}
        }
    }

    /// Resolves a type parameter to a potential archetype, creating nested
    /// archetypes along the way when the resolution kind allows it.
    pub fn resolve_archetype(
        &mut self,
        ty: &Type,
        kind: ArchetypeResolutionKind,
    ) -> Option<PaId> {
        match ty {
            Type::Param(key) => {
                let index = self.generic_params.iter().position(|k| k == key)?;
                Some(self.root_pas[index])
            }
            Type::Member { base, name, assoc } => {
                let base_pa = self.resolve_archetype(base, kind)?;
                let update = match kind {
                    ArchetypeResolutionKind::AlreadyKnown => NestedTypeUpdate::ResolveExisting,
                    ArchetypeResolutionKind::AlwaysPartial => NestedTypeUpdate::AddIfMissing,
                };

                if let Some(assoc) = assoc {
                    return self.update_nested_for_assoc_type(base_pa, *assoc, update);
                }

                match kind {
                    ArchetypeResolutionKind::AlreadyKnown => self
                        .archetype(base_pa)
                        .nested
                        .get(name.as_str())
                        .and_then(|entries| entries.first().copied()),
                    ArchetypeResolutionKind::AlwaysPartial => {
                        self.nested_archetype_anchor(base_pa, name, update)
                    }
                }
            }
            _ => None,
        }
    }

    /// Resolves one side of a requirement. Concrete types resolve to
    /// themselves; type parameters resolve through the archetype graph.
    pub(crate) fn resolve(
        &mut self,
        unresolved: &UnresolvedType,
        source: &FloatingSource,
    ) -> Option<Resolved> {
        match unresolved {
            UnresolvedType::Archetype(pa) => Some(Resolved::Archetype(*pa)),
            UnresolvedType::Ty(ty) => {
                if !ty.is_type_parameter() {
                    return Some(Resolved::Concrete(ty.clone()));
                }
                let kind = if !source.is_explicit(&self.sources) && self.is_recursive_source(source)
                {
                    ArchetypeResolutionKind::AlreadyKnown
                } else {
                    ArchetypeResolutionKind::AlwaysPartial
                };
                self.resolve_archetype(ty, kind).map(Resolved::Archetype)
            }
        }
    }

    pub(crate) fn handle_unresolved(
        &mut self,
        kind: DelayedKind,
        lhs: UnresolvedType,
        rhs: DelayedRhs,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        match handling {
            UnresolvedHandling::GenerateConstraints => {
                self.delayed.push(DelayedRequirement {
                    kind,
                    lhs,
                    rhs,
                    source,
                });
                ConstraintResult::Resolved
            }
            UnresolvedHandling::ReturnUnresolved => ConstraintResult::Unresolved,
        }
    }

    /// Conformance or superclass requirement: `subject : constraint`.
    pub(crate) fn add_type_requirement(
        &mut self,
        subject: UnresolvedType,
        constraint: UnresolvedType,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        // Resolve the constraint side first.
        let resolved_constraint = match self.resolve(&constraint, &source) {
            Some(resolved) => resolved,
            None => {
                let rhs = match constraint {
                    UnresolvedType::Ty(ty) => DelayedRhs::Ty(ty),
                    UnresolvedType::Archetype(pa) => DelayedRhs::Archetype(pa),
                };
                return self.handle_unresolved(
                    DelayedKind::TypeConstraint,
                    subject,
                    rhs,
                    source,
                    handling,
                );
            }
        };

        // The right-hand side must be a statically-known constraint type.
        let constraint_ty = match resolved_constraint {
            Resolved::Archetype(pa) => {
                if let Some(span) = source.span(&self.sources) {
                    let constraint_ty = self.dependent_type(pa, true);
                    self.diag(SignatureDiagnostic::ConstraintTargetNotConcrete {
                        constraint: constraint_ty,
                        span: Some(span),
                    });
                }
                return ConstraintResult::Concrete;
            }
            Resolved::Concrete(ty) => ty,
        };

        let is_existential = matches!(constraint_ty, Type::Existential { .. });
        if !is_existential && !self.store.is_class_type(&constraint_ty) {
            if !constraint_ty.is_error() {
                if let Some(span) = source.span(&self.sources) {
                    let subject_ty = match &subject {
                        UnresolvedType::Ty(ty) => ty.clone(),
                        UnresolvedType::Archetype(pa) => self.dependent_type(*pa, true),
                    };
                    self.diag(SignatureDiagnostic::NonProtocolConstraint {
                        subject: subject_ty,
                        constraint: constraint_ty.clone(),
                        span: Some(span),
                    });
                }
            }
            return ConstraintResult::Conflicting;
        }

        // Now the subject.
        let resolved_subject = match self.resolve(&subject, &source) {
            Some(resolved) => resolved,
            None => {
                return self.handle_unresolved(
                    DelayedKind::TypeConstraint,
                    subject,
                    DelayedRhs::Ty(constraint_ty),
                    source,
                    handling,
                );
            }
        };

        let subject_pa = match resolved_subject {
            Resolved::Concrete(ty) => {
                // A constraint explicitly written on a concrete type.
                if source.is_explicit(&self.sources) {
                    if let Some(span) = source.span(&self.sources) {
                        self.diag(SignatureDiagnostic::ConstraintOnConcreteType {
                            constrained: ty,
                            span: Some(span),
                        });
                    }
                    return ConstraintResult::Concrete;
                }
                return ConstraintResult::Resolved;
            }
            Resolved::Archetype(pa) => pa,
        };

        let resolved_source = self.materialize_source(&source, subject_pa);

        if is_existential {
            let (protocols, superclass, layout) = self
                .store
                .existential_layout(&constraint_ty)
                .expect("existential type decomposes");

            let mut any_errors = false;
            if let Some(layout) = layout {
                if is_error_result(self.add_layout_direct(subject_pa, layout, resolved_source)) {
                    any_errors = true;
                }
            }
            if let Some(superclass) = superclass {
                if is_error_result(self.add_superclass_direct(
                    subject_pa,
                    superclass,
                    resolved_source,
                )) {
                    any_errors = true;
                }
            }
            for protocol in protocols {
                if is_error_result(self.add_conformance_requirement(
                    subject_pa,
                    protocol,
                    resolved_source,
                )) {
                    any_errors = true;
                }
            }
            return if any_errors {
                ConstraintResult::Conflicting
            } else {
                ConstraintResult::Resolved
            };
        }

        self.add_superclass_direct(subject_pa, constraint_ty, resolved_source)
    }

    /// Records a conformance on the archetype's class. Returns false if the
    /// class already conformed (the constraint is still appended).
    pub(crate) fn add_conformance_to_class(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) -> bool {
        let class_id = self.get_or_create_equivalence_class(pa);
        {
            let class = self.class_mut(class_id);
            let constraint = Constraint {
                subject: pa,
                value: protocol,
                source,
            };
            if let Some(constraints) = class.conforms_to.get_mut(&protocol) {
                constraints.push(constraint);
                return false;
            }
            class.conforms_to.insert(protocol, vec![constraint]);
        }

        // A superclass bound may already satisfy this conformance.
        let _ = self.resolve_super_conformance(pa, protocol);

        // Newly-visible associated types may bind existing placeholders.
        let nested_names: Vec<String> = self.archetype(pa).nested.keys().cloned().collect();
        for name in nested_names {
            let _ = self.update_nested_for_conformance(
                pa,
                &name,
                protocol,
                NestedTypeUpdate::ResolveExisting,
            );
        }

        true
    }

    /// Adds `pa : protocol`, expanding the protocol's requirement signature
    /// (or, failing that, its inheritance clause, where clauses, and
    /// associated-type bounds).
    pub(crate) fn add_conformance_requirement(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) -> ConstraintResult {
        if !self.add_conformance_to_class(pa, protocol, source) {
            return ConstraintResult::Resolved;
        }

        let self_ty = self.dependent_type(pa, true);
        let self_subs = Substitutions::for_protocol_self(self_ty.clone());

        // Use the requirement signature when it has been computed; walking
        // the protocol again could recurse infinitely while the signature
        // itself is being built.
        if let Some(signature) = self.store.protocol(protocol).requirement_signature.clone() {
            let floating = FloatingSource::via_protocol_requirement(source, protocol, None, false);
            for requirement in &signature {
                let result =
                    self.add_requirement_substituted(requirement, floating.clone(), Some(&self_subs));
                if is_error_result(result) {
                    return result;
                }
            }
            return ConstraintResult::Resolved;
        }

        // Inheritance clause of the protocol itself.
        let inherited = self.store.protocol(protocol).inherited.clone();
        for ty in &inherited {
            let ty = ty.substitute(&self_subs);
            let floating = FloatingSource::via_protocol_requirement(source, protocol, None, false);
            self.infer_requirements_with(&ty, &floating.as_inferred(None));
            let result = self.add_type_requirement(
                UnresolvedType::Archetype(pa),
                UnresolvedType::Ty(ty),
                floating,
                UnresolvedHandling::GenerateConstraints,
            );
            if is_error_result(result) {
                return result;
            }
        }

        // Where clauses on the protocol.
        let where_clauses = self.store.protocol(protocol).where_clauses.clone();
        for requirement in &where_clauses {
            let floating = FloatingSource::via_protocol_requirement(source, protocol, None, false);
            self.add_requirement_substituted(requirement, floating, Some(&self_subs));
        }

        // Bounds and where clauses on each associated type.
        let assoc_types = self.store.protocol(protocol).associated_types.clone();
        for assoc in assoc_types {
            let assoc_decl = self.store.assoc_type(assoc);
            let assoc_name = assoc_decl.name.clone();
            let assoc_inherited = assoc_decl.inherited.clone();
            let assoc_where = assoc_decl.where_clauses.clone();
            let subject = Type::resolved_member(self_ty.clone(), assoc_name, assoc);

            for ty in &assoc_inherited {
                let ty = ty.substitute(&self_subs);
                let floating =
                    FloatingSource::via_protocol_requirement(source, protocol, None, false);

                // Direct recursion: an associated type bounded by its own
                // protocol (or a refinement of it).
                if let Type::Existential { protocols, .. } = &ty {
                    let recursive = protocols.iter().any(|&inherited_proto| {
                        inherited_proto == protocol
                            || self.store.inherits_from(inherited_proto, protocol)
                    });
                    if recursive {
                        if let Some(Resolved::Archetype(subject_pa)) =
                            self.resolve(&UnresolvedType::Ty(subject.clone()), &floating)
                        {
                            let resolved = self.materialize_source(&floating, subject_pa);
                            self.mark_archetype_recursive(subject_pa, protocol, resolved);
                            return ConstraintResult::Conflicting;
                        }
                    }
                }

                self.infer_requirements_with(&ty, &floating.as_inferred(None));
                let result = self.add_type_requirement(
                    UnresolvedType::Ty(subject.clone()),
                    UnresolvedType::Ty(ty),
                    floating,
                    UnresolvedHandling::GenerateConstraints,
                );
                if is_error_result(result) {
                    return result;
                }
            }

            for requirement in &assoc_where {
                let floating =
                    FloatingSource::via_protocol_requirement(source, protocol, None, false);
                self.add_requirement_substituted(requirement, floating, Some(&self_subs));
            }
        }

        ConstraintResult::Resolved
    }

    /// Marks an archetype as having a recursive protocol reference,
    /// diagnosing the first occurrence.
    pub(crate) fn mark_archetype_recursive(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
        source: SourceId,
    ) {
        if self.archetype(pa).recursive_protocol {
            return;
        }
        self.archetype_mut(pa).recursive_protocol = true;
        self.add_conformance_to_class(pa, protocol, source);

        if self.archetype(pa).parent().is_none() {
            return;
        }
        let Some(assoc) = self.archetype(pa).resolved_assoc_type() else {
            return;
        };
        let assoc_decl = self.store.assoc_type(assoc);
        self.diag(SignatureDiagnostic::RecursiveRequirementReference {
            assoc_name: assoc_decl.name.clone(),
            protocol: assoc_decl.protocol,
            span: Some(assoc_decl.span).filter(|span| span.is_valid()),
        });
    }

    pub(crate) fn add_layout_requirement(
        &mut self,
        subject: UnresolvedType,
        layout: LayoutConstraint,
        source: FloatingSource,
        handling: UnresolvedHandling,
    ) -> ConstraintResult {
        let resolved = match self.resolve(&subject, &source) {
            Some(resolved) => resolved,
            None => {
                return self.handle_unresolved(
                    DelayedKind::Layout,
                    subject,
                    DelayedRhs::Layout(layout),
                    source,
                    handling,
                );
            }
        };

        match resolved {
            Resolved::Concrete(ty) => {
                if source.is_explicit(&self.sources) {
                    if let Some(span) = source.span(&self.sources) {
                        self.diag(SignatureDiagnostic::ConstraintOnConcreteType {
                            constrained: ty,
                            span: Some(span),
                        });
                    }
                    return ConstraintResult::Concrete;
                }
                ConstraintResult::Resolved
            }
            Resolved::Archetype(pa) => {
                let resolved_source = self.materialize_source(&source, pa);
                self.add_layout_direct(pa, layout, resolved_source)
            }
        }
    }

    pub(crate) fn add_layout_direct(
        &mut self,
        pa: PaId,
        layout: LayoutConstraint,
        source: SourceId,
    ) -> ConstraintResult {
        let class_id = self.get_or_create_equivalence_class(pa);
        let class = self.class_mut(class_id);
        class.layout_constraints.push(Constraint {
            subject: pa,
            value: layout,
            source,
        });

        match class.layout {
            None => class.layout = Some(layout),
            Some(existing) => {
                // The meet of the recorded layouts; conflicts are kept for
                // the finalizer to report.
                if let Some(merged) = existing.merge(layout) {
                    class.layout = Some(merged);
                }
            }
        }

        ConstraintResult::Resolved
    }

    pub(crate) fn add_superclass_direct(
        &mut self,
        pa: PaId,
        superclass: Type,
        source: SourceId,
    ) -> ConstraintResult {
        let class_id = self.get_or_create_equivalence_class(pa);
        self.class_mut(class_id).superclass_constraints.push(Constraint {
            subject: pa,
            value: superclass.clone(),
            source,
        });
        self.update_superclass(pa, superclass, source);
        ConstraintResult::Resolved
    }

    /// Installs or tightens the superclass bound of `pa`'s class, deriving
    /// the implied layout and refreshing superclass-satisfied conformances.
    pub(crate) fn update_superclass(&mut self, pa: PaId, superclass: Type, source: SourceId) {
        let class_id = self.get_or_create_equivalence_class(pa);

        let existing = self.class(class_id).superclass.clone();
        match existing {
            None => {
                self.class_mut(class_id).superclass = Some(superclass.clone());
                self.update_superclass_conformances(pa);

                // A superclass bound implies a class layout.
                let layout = if self.store.is_foreign_class(&superclass) {
                    LayoutConstraint::Class
                } else {
                    LayoutConstraint::NativeClass
                };
                let layout_source = self.sources.via_superclass(source, None, None);
                self.add_layout_direct(pa, layout, layout_source);
            }
            Some(existing) => {
                if self.store.is_exact_superclass_of(&existing, &superclass)
                    && existing != superclass
                {
                    self.class_mut(class_id).superclass = Some(superclass);
                    self.update_superclass_conformances(pa);
                }
                // Unrelated superclasses are left for the finalizer to
                // report as conflicting.
            }
        }
    }

    fn update_superclass_conformances(&mut self, pa: PaId) {
        let protocols: Vec<ProtocolId> = self
            .equivalence_class(pa)
            .map(|class| class.protocols().collect())
            .unwrap_or_default();

        for protocol in protocols {
            let Some(super_source) = self.resolve_super_conformance(pa, protocol) else {
                continue;
            };
            let assoc_types = self.store.protocol(protocol).associated_types.clone();
            for assoc in assoc_types {
                let name = self.store.assoc_type(assoc).name.clone();
                let Some(entries) = self.archetype(pa).nested.get(&name).cloned() else {
                    continue;
                };
                for nested in entries {
                    if self.archetype(nested).resolved_assoc_type() == Some(assoc) {
                        self.add_same_type_for_superclass_witness(pa, nested, super_source);
                    }
                }
            }
        }
    }

    /// If the class's superclass conforms to `protocol`, record the derived
    /// conformance and return its source.
    pub(crate) fn resolve_super_conformance(
        &mut self,
        pa: PaId,
        protocol: ProtocolId,
    ) -> Option<SourceId> {
        let superclass = self.superclass_bound(pa)?;
        let conformance = self.store.lookup_conformance(&superclass, protocol)?;
        let ConformanceRef::Concrete(conformance) = conformance else {
            return None;
        };

        let class_id = self.get_or_create_equivalence_class(pa);
        let base_source = self
            .class(class_id)
            .find_any_superclass_constraint_as_written(&self.sources, Some(pa))
            .map(|constraint| constraint.source)
            .or_else(|| {
                self.class(class_id)
                    .superclass_constraints
                    .first()
                    .map(|constraint| constraint.source)
            })?;

        let super_source = self
            .sources
            .via_superclass(base_source, Some(conformance), Some(protocol));
        self.class_mut(class_id)
            .conforms_to
            .entry(protocol)
            .or_default()
            .push(Constraint {
                subject: pa,
                value: protocol,
                source: super_source,
            });
        Some(super_source)
    }

    /// Equates a nested archetype with the type witness provided by the
    /// parent's superclass conformance.
    pub(crate) fn add_same_type_for_superclass_witness(
        &mut self,
        parent: PaId,
        nested: PaId,
        super_source: SourceId,
    ) {
        let Some(assoc) = self.archetype(nested).resolved_assoc_type() else {
            return;
        };
        let Some(superclass) = self.superclass_bound(parent) else {
            return;
        };
        let conformance = match &self.sources.get(super_source).storage {
            crate::source::SourceStorage::Conformance(Some(conformance)) => *conformance,
            _ => return,
        };

        let name = self.store.assoc_type(assoc).name.clone();
        let Some(witness) = self.store.type_witness(conformance, &superclass, &name) else {
            return;
        };

        let protocol = self.store.assoc_type(assoc).protocol;
        let nested_source = self.sources.via_parent(super_source, assoc, protocol);
        let span = self.sources.span_of(nested_source);
        self.add_same_type_requirement(
            UnresolvedType::Archetype(nested),
            UnresolvedType::Ty(witness),
            FloatingSource::resolved(nested_source),
            UnresolvedHandling::GenerateConstraints,
            MismatchCtx::Plain { span },
        );
    }

    pub(crate) fn add_same_type_requirement(
        &mut self,
        lhs: UnresolvedType,
        rhs: UnresolvedType,
        source: FloatingSource,
        handling: UnresolvedHandling,
        ctx: MismatchCtx,
    ) -> ConstraintResult {
        let resolved_lhs = match self.resolve(&lhs, &source) {
            Some(resolved) => resolved,
            None => {
                let rhs = match rhs {
                    UnresolvedType::Ty(ty) => DelayedRhs::Ty(ty),
                    UnresolvedType::Archetype(pa) => DelayedRhs::Archetype(pa),
                };
                return self.handle_unresolved(DelayedKind::SameType, lhs, rhs, source, handling);
            }
        };
        let resolved_rhs = match self.resolve(&rhs, &source) {
            Some(resolved) => resolved,
            None => {
                let rhs = match rhs {
                    UnresolvedType::Ty(ty) => DelayedRhs::Ty(ty),
                    UnresolvedType::Archetype(pa) => DelayedRhs::Archetype(pa),
                };
                return self.handle_unresolved(DelayedKind::SameType, lhs, rhs, source, handling);
            }
        };

        match (resolved_lhs, resolved_rhs) {
            (Resolved::Archetype(a), Resolved::Archetype(b)) => {
                let resolved_source = self.materialize_source(&source, a);
                self.add_same_type_between_archetypes(a, b, resolved_source)
            }
            (Resolved::Archetype(a), Resolved::Concrete(ty))
            | (Resolved::Concrete(ty), Resolved::Archetype(a)) => {
                let resolved_source = self.materialize_source(&source, a);
                self.add_same_type_to_concrete(a, ty, resolved_source)
            }
            (Resolved::Concrete(t1), Resolved::Concrete(t2)) => {
                self.add_same_type_between_concrete(&t1, &t2, &source, &ctx)
            }
        }
    }

    /// Records a same-type edge on both endpoints' constraint bags.
    pub(crate) fn add_same_type_constraint(&mut self, pa: PaId, other: PaId, source: SourceId) {
        let class_id = self.get_or_create_equivalence_class(pa);
        self.class_mut(class_id)
            .same_type_constraints
            .entry(pa)
            .or_default()
            .push(Constraint {
                subject: pa,
                value: other,
                source,
            });

        if pa != other {
            let other_class = self.get_or_create_equivalence_class(other);
            self.class_mut(other_class)
                .same_type_constraints
                .entry(other)
                .or_default()
                .push(Constraint {
                    subject: other,
                    value: pa,
                    source,
                });
        }
    }

    /// Union-find merge of two archetypes' equivalence classes, folding
    /// every constraint bag of the absorbed class into the surviving one.
    pub(crate) fn add_same_type_between_archetypes(
        &mut self,
        orig1: PaId,
        orig2: PaId,
        source: SourceId,
    ) -> ConstraintResult {
        self.add_same_type_constraint(orig1, orig2, source);

        let mut t1 = self.representative_compressing(orig1);
        let mut t2 = self.representative_compressing(orig2);
        if t1 == t2 {
            return ConstraintResult::Resolved;
        }

        // The canonically-smaller archetype becomes the merged root.
        if self.compare_dependent_types(t2, t1) == std::cmp::Ordering::Less {
            std::mem::swap(&mut t1, &mut t2);
        }

        let class1 = self.get_or_create_equivalence_class(t1);
        let members2 = self.equivalence_class_members(t2);
        let class2 = self.equivalence_class_id(t2).map(|id| self.take_class(id));

        // Re-point the absorbed representative before folding constraint
        // bags; recursive requirement additions below must see the merged
        // union-find state.
        self.archetype_mut(t2).rep_or_class = RepOrClass::Child(t1);
        self.class_mut(class1).members.extend(members2.iter().copied());

        let Some(class2) = class2 else {
            // The absorbed archetype had no class; only the membership and
            // nested-type merge below apply.
            return self.merge_nested_types(t1, &members2, source);
        };

        for (subject, constraints) in class2.same_type_constraints {
            let previous = self
                .class_mut(class1)
                .same_type_constraints
                .insert(subject, constraints);
            debug_assert!(previous.is_none(), "same-type bucket merged twice");
        }

        if let Some(concrete2) = class2.concrete_type {
            let existing = self.class(class1).concrete_type.clone();
            match existing {
                Some(concrete1) => {
                    self.add_same_type_requirement(
                        UnresolvedType::Ty(concrete1),
                        UnresolvedType::Ty(concrete2),
                        FloatingSource::resolved(source),
                        UnresolvedHandling::GenerateConstraints,
                        MismatchCtx::Conflict { source, pa: t1 },
                    );
                }
                None => self.class_mut(class1).concrete_type = Some(concrete2),
            }
        }
        self.class_mut(class1)
            .concrete_type_constraints
            .extend(class2.concrete_type_constraints);

        if let Some(superclass2) = class2.superclass {
            let source2 = class2
                .superclass_constraints
                .iter()
                .find(|constraint| {
                    self.sources.span_of(constraint.source).is_some()
                        && constraint.value == superclass2
                })
                .or_else(|| class2.superclass_constraints.first())
                .map(|constraint| constraint.source)
                .unwrap_or(source);
            self.update_superclass(t1, superclass2, source2);
        }
        self.class_mut(class1)
            .superclass_constraints
            .extend(class2.superclass_constraints);

        if let Some(layout2) = class2.layout {
            let existing = self.class(class1).layout;
            match existing {
                None => self.class_mut(class1).layout = Some(layout2),
                Some(existing) => {
                    if let Some(merged) = existing.merge(layout2) {
                        self.class_mut(class1).layout = Some(merged);
                    }
                }
            }
        }
        self.class_mut(class1)
            .layout_constraints
            .extend(class2.layout_constraints);

        for (protocol, constraints) in class2.conforms_to {
            let first_source = constraints
                .first()
                .map(|constraint| constraint.source)
                .unwrap_or(source);
            self.add_conformance_to_class(t1, protocol, first_source);
            self.class_mut(class1)
                .conforms_to
                .entry(protocol)
                .or_default()
                .extend(constraints.into_iter().skip(1));
        }

        self.merge_nested_types(t1, &members2, source)
    }

    /// Re-emits nested-type same-type edges for every nested type of the
    /// absorbed members, so same-named nested archetypes unify.
    fn merge_nested_types(
        &mut self,
        t1: PaId,
        members2: &[PaId],
        source: SourceId,
    ) -> ConstraintResult {
        let dependent_t1 = self.dependent_type(t1, true);
        for &member in members2 {
            let nested: Vec<(String, PaId)> = self
                .archetype(member)
                .nested
                .iter()
                .filter_map(|(name, entries)| {
                    entries.first().map(|&pa| (name.clone(), pa))
                })
                .collect();
            for (name, nested_pa) in nested {
                let nested_t1 = Type::member(dependent_t1.clone(), name.clone());
                let result = self.add_same_type_requirement(
                    UnresolvedType::Ty(nested_t1),
                    UnresolvedType::Archetype(nested_pa),
                    FloatingSource::nested_type_name_match(source, name),
                    UnresolvedHandling::GenerateConstraints,
                    MismatchCtx::Plain { span: None },
                );
                if is_error_result(result) {
                    return ConstraintResult::Conflicting;
                }
            }
        }
        ConstraintResult::Resolved
    }

    /// Binds an archetype's class to a concrete type.
    pub(crate) fn add_same_type_to_concrete(
        &mut self,
        pa: PaId,
        concrete: Type,
        source: SourceId,
    ) -> ConstraintResult {
        let rep = self.representative_compressing(pa);
        let class_id = self.get_or_create_equivalence_class(rep);

        self.class_mut(class_id)
            .concrete_type_constraints
            .push(Constraint {
                subject: pa,
                value: concrete.clone(),
                source,
            });

        if let Some(existing) = self.class(class_id).concrete_type.clone() {
            // Already bound: reconcile the two concrete types instead.
            return self.add_same_type_requirement(
                UnresolvedType::Ty(existing),
                UnresolvedType::Ty(concrete),
                FloatingSource::resolved(source),
                UnresolvedHandling::GenerateConstraints,
                MismatchCtx::Conflict { source, pa },
            );
        }

        self.class_mut(class_id).concrete_type = Some(concrete.clone());

        // The concrete type must satisfy every recorded conformance.
        let protocols: Vec<ProtocolId> = self.class(class_id).protocols().collect();
        for protocol in protocols {
            let Some(conformance) = self.store.lookup_conformance(&concrete, protocol) else {
                if !concrete.is_error() {
                    let span = self.sources.span_of(source);
                    self.diag(SignatureDiagnostic::NonconformantConcreteType {
                        concrete: concrete.clone(),
                        protocol,
                        span,
                    });
                }
                return ConstraintResult::Conflicting;
            };

            let concrete_source =
                self.sources
                    .via_concrete(source, conformance.concrete(), Some(protocol));
            self.class_mut(class_id)
                .conforms_to
                .entry(protocol)
                .or_default()
                .push(Constraint {
                    subject: pa,
                    value: protocol,
                    source: concrete_source,
                });
        }

        // Eagerly concretize existing nested types; new ones are concretized
        // as they are created.
        let members = self.equivalence_class_members(rep);
        for member in members {
            let nested: Vec<PaId> = self
                .archetype(member)
                .nested
                .values()
                .filter_map(|entries| entries.first().copied())
                .collect();
            for nested_pa in nested {
                self.concretize_nested_from_concrete_parent(member, source, nested_pa);
            }
        }

        ConstraintResult::Resolved
    }

    /// Gives a nested archetype the concrete form implied by its parent's
    /// concrete binding: the conformance's type witness when one is known,
    /// or a dependent member of the concrete parent otherwise.
    pub(crate) fn concretize_nested_from_concrete_parent(
        &mut self,
        parent: PaId,
        parent_concrete_source: SourceId,
        nested: PaId,
    ) {
        let Some(concrete_parent) = self.concrete_bound(parent) else {
            return;
        };
        let Some(assoc) = self.archetype(nested).resolved_assoc_type() else {
            return;
        };

        let protocol = self.store.assoc_type(assoc).protocol;
        let name = self.store.assoc_type(assoc).name.clone();
        let conformance = self.store.lookup_conformance(&concrete_parent, protocol);

        let witness = conformance
            .and_then(|conformance| conformance.concrete())
            .and_then(|id| self.store.type_witness(id, &concrete_parent, &name))
            .unwrap_or_else(|| {
                Type::resolved_member(concrete_parent.clone(), name.clone(), assoc)
            });

        let concrete_source = self.sources.via_concrete(
            parent_concrete_source,
            conformance.and_then(|conformance| conformance.concrete()),
            Some(protocol),
        );
        let nested_source = self.sources.via_parent(concrete_source, assoc, protocol);

        self.add_same_type_requirement(
            UnresolvedType::Archetype(nested),
            UnresolvedType::Ty(witness),
            FloatingSource::resolved(nested_source),
            UnresolvedHandling::GenerateConstraints,
            MismatchCtx::Conflict {
                source: nested_source,
                pa: nested,
            },
        );
    }

    /// Structurally matches two concrete types, recursing into same-shaped
    /// children and re-entering the same-type machinery whenever a type
    /// parameter shows up on either side. A mismatch at the outermost layer
    /// is a fundamental conflict; that check is what breaks the mutual
    /// recursion with `add_same_type_requirement`.
    pub(crate) fn add_same_type_between_concrete(
        &mut self,
        t1: &Type,
        t2: &Type,
        source: &FloatingSource,
        ctx: &MismatchCtx,
    ) -> ConstraintResult {
        let outer = (t1.clone(), t2.clone());
        if self.match_concrete(t1, t2, &outer, source, ctx) {
            ConstraintResult::Resolved
        } else {
            ConstraintResult::Conflicting
        }
    }

    fn match_concrete(
        &mut self,
        t1: &Type,
        t2: &Type,
        outer: &(Type, Type),
        source: &FloatingSource,
        ctx: &MismatchCtx,
    ) -> bool {
        if t1 == t2 {
            return true;
        }
        if t1.is_error() || t2.is_error() {
            return true;
        }

        if t1.is_type_parameter() || t2.is_type_parameter() {
            let span = source.span(&self.sources);
            let result = self.add_same_type_requirement(
                UnresolvedType::Ty(t1.clone()),
                UnresolvedType::Ty(t2.clone()),
                source.clone(),
                UnresolvedHandling::GenerateConstraints,
                MismatchCtx::Plain { span },
            );
            return !is_error_result(result);
        }

        match (t1, t2) {
            (
                Type::Nominal { decl: d1, args: a1 },
                Type::Nominal { decl: d2, args: a2 },
            ) if d1 == d2 && a1.len() == a2.len() => a1
                .iter()
                .zip(a2.iter())
                .all(|(c1, c2)| self.match_concrete(c1, c2, outer, source, ctx)),
            (Type::Tuple(e1), Type::Tuple(e2)) if e1.len() == e2.len() => e1
                .iter()
                .zip(e2.iter())
                .all(|(c1, c2)| self.match_concrete(c1, c2, outer, source, ctx)),
            (
                Type::Member {
                    base: b1, name: n1, ..
                },
                Type::Member {
                    base: b2, name: n2, ..
                },
            ) if n1 == n2 => self.match_concrete(b1, b2, outer, source, ctx),
            _ => {
                if (&outer.0, &outer.1) == (t1, t2) {
                    self.diagnose_concrete_mismatch(ctx, t1, t2);
                    return false;
                }
                // A nested mismatch re-enters with the pair as its own
                // outer layer, which diagnoses it at that level.
                let result = self.add_same_type_between_concrete(
                    t1,
                    t2,
                    source,
                    &MismatchCtx::Plain {
                        span: source.span(&self.sources),
                    },
                );
                !is_error_result(result)
            }
        }
    }

    pub(crate) fn diagnose_concrete_mismatch(&mut self, ctx: &MismatchCtx, t1: &Type, t2: &Type) {
        match ctx {
            MismatchCtx::Plain { span } => {
                if span.is_some() {
                    self.diag(SignatureDiagnostic::ConcreteTypeMismatch {
                        first: t1.clone(),
                        second: t2.clone(),
                        span: *span,
                    });
                }
            }
            MismatchCtx::Conflict { source, pa } => {
                let span = self.sources.span_of(*source);
                let archetype = self.archetype(*pa);
                if archetype.parent().is_some()
                    && archetype.resolved_alias().is_some()
                    && span.is_none()
                {
                    let alias = archetype.resolved_alias().expect("checked above");
                    let alias_decl = self.store.typealias(alias);
                    self.diag(SignatureDiagnostic::ProtocolTypealiasConflict {
                        alias_name: alias_decl.name.clone(),
                        first: t1.clone(),
                        second: t2.clone(),
                        span: Some(alias_decl.span).filter(|span| span.is_valid()),
                    });
                    return;
                }
                if span.is_some() {
                    let subject = self.dependent_type(*pa, true);
                    let is_generic_param = self.archetype(*pa).is_generic_param();
                    self.diag(SignatureDiagnostic::SameTypeConflict {
                        is_generic_param,
                        subject,
                        first: t1.clone(),
                        second: t2.clone(),
                        span,
                    });
                }
            }
        }
    }

    /// Re-drains the delayed queue until a full pass makes no progress.
    pub fn process_delayed_requirements(&mut self) {
        let mut any_solved = !self.delayed.is_empty();
        while any_solved {
            any_solved = false;
            let delayed = std::mem::take(&mut self.delayed);

            for requirement in delayed {
                let result = match requirement.kind {
                    DelayedKind::TypeConstraint => self.add_type_requirement(
                        requirement.lhs.clone(),
                        requirement.rhs.as_unresolved(),
                        requirement.source.clone(),
                        UnresolvedHandling::ReturnUnresolved,
                    ),
                    DelayedKind::Layout => {
                        let DelayedRhs::Layout(layout) = requirement.rhs else {
                            unreachable!("layout requirement stores a layout rhs");
                        };
                        self.add_layout_requirement(
                            requirement.lhs.clone(),
                            layout,
                            requirement.source.clone(),
                            UnresolvedHandling::ReturnUnresolved,
                        )
                    }
                    DelayedKind::SameType => {
                        let span = requirement.source.span(&self.sources);
                        self.add_same_type_requirement(
                            requirement.lhs.clone(),
                            requirement.rhs.as_unresolved(),
                            requirement.source.clone(),
                            UnresolvedHandling::ReturnUnresolved,
                            MismatchCtx::Plain { span },
                        )
                    }
                };

                match result {
                    ConstraintResult::Unresolved => self.delayed.push(requirement),
                    ConstraintResult::Resolved
                    | ConstraintResult::Concrete
                    | ConstraintResult::Conflicting => any_solved = true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        store: DeclStore,
        collection: ProtocolId,
        int: ori_ast::NominalId,
    }

    fn collection_fixture() -> Fixture {
        let mut store = DeclStore::new();
        let collection = store.add_protocol("Collection");
        store.add_associated_type(collection, "Element");
        let array = store.add_struct("Array");
        store.set_nominal_signature(array, vec![GenericParamKey::new(0, 0)], Vec::new());
        store.add_conformance(
            array,
            collection,
            vec![("Element".to_string(), Type::param(0, 0))],
        );
        let int = store.add_struct("Int");
        Fixture {
            store,
            collection,
            int,
        }
    }

    #[test]
    fn generic_parameters_enforce_ordering() {
        let store = DeclStore::new();
        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        builder
            .add_generic_parameter(GenericParamKey::new(0, 1))
            .unwrap();
        builder
            .add_generic_parameter(GenericParamKey::new(1, 0))
            .unwrap();

        let err = builder
            .add_generic_parameter(GenericParamKey::new(1, 2))
            .unwrap_err();
        assert_eq!(
            err,
            BuilderError::GenericParameterOutOfOrder { depth: 1, index: 2 }
        );
    }

    #[test]
    fn placeholder_binds_when_conformance_arrives() {
        let fixture = collection_fixture();
        let collection = fixture.collection;
        let int = fixture.int;

        let mut builder = GenericSignatureBuilder::new(&fixture.store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();

        // T.Element == Int arrives before T: Collection; the name is held
        // as an unresolved placeholder.
        let result = builder.add_requirement(
            &Requirement::SameType {
                first: Type::member(Type::param(0, 0), "Element"),
                second: Type::nominal(int, Vec::new()),
            },
            FloatingSource::abstract_explicit(),
        );
        assert_eq!(result, ConstraintResult::Resolved);
        assert_eq!(builder.num_unresolved_nested_types(), 1);

        // The conformance makes Collection.Element visible and binds the
        // placeholder.
        builder.add_requirement(
            &Requirement::Conformance {
                subject: Type::param(0, 0),
                constraint: Type::protocol(collection),
            },
            FloatingSource::abstract_explicit(),
        );
        assert_eq!(builder.num_unresolved_nested_types(), 0);

        let element = builder
            .resolve_archetype(
                &Type::member(Type::param(0, 0), "Element"),
                ArchetypeResolutionKind::AlreadyKnown,
            )
            .expect("Element resolved after conformance");
        assert!(builder.archetype(element).resolved_assoc_type().is_some());
        let class = builder.equivalence_class(element).expect("class exists");
        assert_eq!(class.concrete_type, Some(Type::nominal(int, Vec::new())));
    }

    #[test]
    fn requirement_on_unknown_parameter_is_queued_then_drained() {
        let fixture = collection_fixture();
        let int = fixture.int;

        let mut builder = GenericSignatureBuilder::new(&fixture.store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();

        // T1 is not registered yet, so the requirement parks on the queue.
        builder.add_requirement(
            &Requirement::SameType {
                first: Type::param(0, 1),
                second: Type::nominal(int, Vec::new()),
            },
            FloatingSource::abstract_explicit(),
        );
        let unknown = builder.resolve_archetype(
            &Type::param(0, 1),
            ArchetypeResolutionKind::AlreadyKnown,
        );
        assert!(unknown.is_none());

        builder
            .add_generic_parameter(GenericParamKey::new(0, 1))
            .unwrap();
        builder.process_delayed_requirements();

        let second = builder
            .resolve_archetype(&Type::param(0, 1), ArchetypeResolutionKind::AlreadyKnown)
            .expect("parameter registered");
        let class = builder.equivalence_class(second).expect("class exists");
        assert_eq!(class.concrete_type, Some(Type::nominal(int, Vec::new())));
    }

    #[test]
    fn conformance_recorded_once_with_extra_constraints() {
        let fixture = collection_fixture();
        let collection = fixture.collection;

        let mut builder = GenericSignatureBuilder::new(&fixture.store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();

        let requirement = Requirement::Conformance {
            subject: Type::param(0, 0),
            constraint: Type::protocol(collection),
        };
        builder.add_requirement(&requirement, FloatingSource::abstract_explicit());
        builder.add_requirement(&requirement, FloatingSource::abstract_explicit());

        let root = builder.generic_param_archetypes()[0];
        let class = builder.equivalence_class(root).expect("class exists");
        let constraints = &class.conforms_to[&collection];
        assert_eq!(constraints.len(), 2);
    }

    #[test]
    fn layout_is_the_meet_of_added_constraints() {
        let store = DeclStore::new();
        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();

        builder.add_requirement(
            &Requirement::Layout {
                subject: Type::param(0, 0),
                layout: LayoutConstraint::Class,
            },
            FloatingSource::abstract_explicit(),
        );
        builder.add_requirement(
            &Requirement::Layout {
                subject: Type::param(0, 0),
                layout: LayoutConstraint::NativeClass,
            },
            FloatingSource::abstract_explicit(),
        );

        let root = builder.generic_param_archetypes()[0];
        let class = builder.equivalence_class(root).expect("class exists");
        assert_eq!(class.layout, Some(LayoutConstraint::NativeClass));
        assert_eq!(class.layout_constraints.len(), 2);
    }

    #[test]
    fn conflicting_concrete_types_keep_first_binding() {
        let mut fixture = collection_fixture();
        let int = fixture.int;
        let string = fixture.store.add_struct("String");

        let mut builder = GenericSignatureBuilder::new(&fixture.store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();

        builder.add_requirement(
            &Requirement::SameType {
                first: Type::param(0, 0),
                second: Type::nominal(int, Vec::new()),
            },
            FloatingSource::explicit(Span::new(1, 0, 1, 10)),
        );
        builder.add_requirement(
            &Requirement::SameType {
                first: Type::param(0, 0),
                second: Type::nominal(string, Vec::new()),
            },
            FloatingSource::explicit(Span::new(2, 0, 2, 10)),
        );

        let root = builder.generic_param_archetypes()[0];
        let class = builder.equivalence_class(root).expect("class exists");
        assert_eq!(class.concrete_type, Some(Type::nominal(int, Vec::new())));
        assert!(builder
            .diagnostics()
            .iter()
            .any(|diagnostic| matches!(diagnostic, SignatureDiagnostic::SameTypeConflict { .. })));
    }
}
