//! Diagnostics emitted during signature construction.
//!
//! The builder records typed [`SignatureDiagnostic`] values carrying the
//! operands of each problem. [`render_diagnostics`] turns them into
//! user-facing entries with stable `ORI` codes; nothing is printed here.

use ori_ast::{DeclStore, LayoutConstraint, ProtocolId, Span, Type};

/// A problem discovered while building a generic signature.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureDiagnostic {
    /// Two conflicting same-type-to-concrete bindings for one subject.
    SameTypeConflict {
        is_generic_param: bool,
        subject: Type,
        first: Type,
        second: Type,
        span: Option<Span>,
    },
    /// A protocol typealias was equated with two different types.
    ProtocolTypealiasConflict {
        alias_name: String,
        first: Type,
        second: Type,
        span: Option<Span>,
    },
    /// Two concrete types in a same-type requirement do not match.
    ConcreteTypeMismatch {
        first: Type,
        second: Type,
        span: Option<Span>,
    },
    /// A requirement was written on a concrete type.
    ConstraintOnConcreteType {
        constrained: Type,
        span: Option<Span>,
    },
    /// The right-hand side of a conformance requirement is a type
    /// parameter, not a statically-known constraint.
    ConstraintTargetNotConcrete {
        constraint: Type,
        span: Option<Span>,
    },
    /// The constraint type is neither an existential nor a class.
    NonProtocolConstraint {
        subject: Type,
        constraint: Type,
        span: Option<Span>,
    },
    /// A concrete binding does not satisfy a recorded conformance.
    NonconformantConcreteType {
        concrete: Type,
        protocol: ProtocolId,
        span: Option<Span>,
    },
    /// A written same-type requirement with no type parameter on either
    /// side.
    SameTypeWithoutTypeParameter { span: Option<Span> },
    /// An associated type is bounded by its own protocol.
    RecursiveRequirementReference {
        assoc_name: String,
        protocol: ProtocolId,
        span: Option<Span>,
    },
    /// The concrete binding of a class refers back into the class.
    RecursiveSameType {
        subject: Type,
        concrete: Type,
        span: Option<Span>,
    },
    /// The superclass bound of a class refers back into the class.
    RecursiveSuperclass {
        subject: Type,
        superclass: Type,
        span: Option<Span>,
    },
    /// A generic parameter was equated with a concrete type.
    ConcreteGenericParam { param: Type, span: Option<Span> },
    /// Two generic parameters were equated.
    EquatedGenericParams {
        first: Type,
        second: Type,
        span: Option<Span>,
    },
    /// Redundant conformance restated elsewhere.
    RedundantConformance {
        subject: Type,
        protocol: ProtocolId,
        span: Option<Span>,
        other_span: Option<Span>,
    },
    /// Redundant same-type constraint.
    RedundantSameType {
        first: Type,
        second: Type,
        span: Option<Span>,
        other_span: Option<Span>,
    },
    /// Redundant same-type-to-concrete constraint.
    RedundantConcreteSameType {
        subject: Type,
        concrete: Type,
        span: Option<Span>,
        other_span: Option<Span>,
    },
    /// Redundant superclass constraint.
    RedundantSuperclass {
        subject: Type,
        superclass: Type,
        span: Option<Span>,
        other_span: Option<Span>,
    },
    /// Redundant layout constraint.
    RedundantLayout {
        subject: Type,
        layout: LayoutConstraint,
        span: Option<Span>,
        other_span: Option<Span>,
    },
    /// Superclass constraints name unrelated classes.
    ConflictingSuperclass {
        subject: Type,
        existing: Type,
        incoming: Type,
        span: Option<Span>,
    },
    /// Layout constraints cannot be merged.
    ConflictingLayout {
        subject: Type,
        existing: LayoutConstraint,
        incoming: LayoutConstraint,
        span: Option<Span>,
    },
    /// The concrete binding does not inherit from the superclass bound.
    ConcreteDoesNotInheritSuperclass {
        subject: Type,
        concrete: Type,
        superclass: Type,
        span: Option<Span>,
    },
    /// A nested name never resolved and could not be corrected.
    UnresolvedNestedType { parent: Type, name: String },
    /// A nested name was typo-corrected.
    RenamedNestedType {
        parent: Type,
        from: String,
        to: String,
        span: Option<Span>,
    },
}

impl SignatureDiagnostic {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        use SignatureDiagnostic::*;
        match self {
            SameTypeConflict { .. } => "ORI2001",
            ProtocolTypealiasConflict { .. } => "ORI2002",
            ConcreteTypeMismatch { .. } => "ORI2003",
            ConstraintOnConcreteType { .. } => "ORI2004",
            ConstraintTargetNotConcrete { .. } => "ORI2005",
            NonProtocolConstraint { .. } => "ORI2006",
            NonconformantConcreteType { .. } => "ORI2007",
            SameTypeWithoutTypeParameter { .. } => "ORI2008",
            RedundantConformance { .. } => "ORI2101",
            RedundantSameType { .. } => "ORI2102",
            RedundantConcreteSameType { .. } => "ORI2103",
            RedundantSuperclass { .. } => "ORI2104",
            RedundantLayout { .. } => "ORI2105",
            ConflictingSuperclass { .. } => "ORI2106",
            ConflictingLayout { .. } => "ORI2107",
            ConcreteDoesNotInheritSuperclass { .. } => "ORI2108",
            RecursiveRequirementReference { .. } => "ORI2201",
            RecursiveSameType { .. } => "ORI2202",
            RecursiveSuperclass { .. } => "ORI2203",
            ConcreteGenericParam { .. } => "ORI2301",
            EquatedGenericParams { .. } => "ORI2302",
            UnresolvedNestedType { .. } => "ORI2401",
            RenamedNestedType { .. } => "ORI2402",
        }
    }

    pub fn span(&self) -> Option<Span> {
        use SignatureDiagnostic::*;
        match self {
            SameTypeConflict { span, .. }
            | ProtocolTypealiasConflict { span, .. }
            | ConcreteTypeMismatch { span, .. }
            | ConstraintOnConcreteType { span, .. }
            | ConstraintTargetNotConcrete { span, .. }
            | NonProtocolConstraint { span, .. }
            | NonconformantConcreteType { span, .. }
            | SameTypeWithoutTypeParameter { span }
            | RecursiveRequirementReference { span, .. }
            | RecursiveSameType { span, .. }
            | RecursiveSuperclass { span, .. }
            | ConcreteGenericParam { span, .. }
            | EquatedGenericParams { span, .. }
            | RedundantConformance { span, .. }
            | RedundantSameType { span, .. }
            | RedundantConcreteSameType { span, .. }
            | RedundantSuperclass { span, .. }
            | RedundantLayout { span, .. }
            | ConflictingSuperclass { span, .. }
            | ConflictingLayout { span, .. }
            | ConcreteDoesNotInheritSuperclass { span, .. }
            | RenamedNestedType { span, .. } => *span,
            UnresolvedNestedType { .. } => None,
        }
    }
}

/// Rendered diagnostic entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub span: Option<Span>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

pub(crate) fn layout_name(layout: LayoutConstraint) -> &'static str {
    match layout {
        LayoutConstraint::Trivial => "_Trivial",
        LayoutConstraint::Class => "_Class",
        LayoutConstraint::NativeClass => "_NativeClass",
    }
}

/// Renders one typed diagnostic into its user-facing form.
pub fn render_diagnostic(store: &DeclStore, diagnostic: &SignatureDiagnostic) -> Diagnostic {
    use SignatureDiagnostic::*;

    let ty = |value: &Type| store.display_type(value);
    let mut rendered = match diagnostic {
        SameTypeConflict {
            is_generic_param,
            subject,
            first,
            second,
            ..
        } => {
            let noun = if *is_generic_param {
                "generic parameter"
            } else {
                "member type"
            };
            Diagnostic::new(
                diagnostic.code(),
                format!(
                    "{} `{}` cannot be equal to both `{}` and `{}`",
                    noun,
                    ty(subject),
                    ty(first),
                    ty(second)
                ),
            )
        }
        ProtocolTypealiasConflict {
            alias_name,
            first,
            second,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "typealias `{}` is equated with both `{}` and `{}`",
                alias_name,
                ty(first),
                ty(second)
            ),
        ),
        ConcreteTypeMismatch { first, second, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "same-type requirement makes `{}` and `{}` equivalent, but they are not",
                ty(first),
                ty(second)
            ),
        ),
        ConstraintOnConcreteType { constrained, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "requirement constrains concrete type `{}`",
                ty(constrained)
            ),
        ),
        ConstraintTargetNotConcrete { constraint, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "constraint type `{}` is a type parameter, not a protocol or class",
                ty(constraint)
            ),
        ),
        NonProtocolConstraint {
            subject,
            constraint,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "`{}` requires `{}` to conform to `{}`, which is neither a protocol nor a class",
                ty(subject),
                ty(subject),
                ty(constraint)
            ),
        ),
        NonconformantConcreteType {
            concrete, protocol, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "concrete type `{}` does not conform to `{}`",
                ty(concrete),
                store.protocol(*protocol).name
            ),
        ),
        SameTypeWithoutTypeParameter { .. } => Diagnostic::new(
            diagnostic.code(),
            "same-type requirement does not involve a type parameter".to_string(),
        ),
        RecursiveRequirementReference {
            assoc_name,
            protocol,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "associated type `{}` references protocol `{}` recursively",
                assoc_name,
                store.protocol(*protocol).name
            ),
        ),
        RecursiveSameType {
            subject, concrete, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "same-type constraint `{} == {}` is recursive",
                ty(subject),
                ty(concrete)
            ),
        ),
        RecursiveSuperclass {
            subject,
            superclass,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "superclass constraint `{} : {}` is recursive",
                ty(subject),
                ty(superclass)
            ),
        ),
        ConcreteGenericParam { param, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "generic parameter `{}` has been made equivalent to a concrete type",
                ty(param)
            ),
        ),
        EquatedGenericParams { first, second, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "generic parameters `{}` and `{}` have been made equivalent",
                ty(first),
                ty(second)
            ),
        ),
        RedundantConformance {
            subject, protocol, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "redundant conformance constraint `{}: {}`",
                ty(subject),
                store.protocol(*protocol).name
            ),
        ),
        RedundantSameType { first, second, .. } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "redundant same-type constraint `{} == {}`",
                ty(first),
                ty(second)
            ),
        ),
        RedundantConcreteSameType {
            subject, concrete, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "redundant same-type constraint `{} == {}`",
                ty(subject),
                ty(concrete)
            ),
        ),
        RedundantSuperclass {
            subject,
            superclass,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "redundant superclass constraint `{} : {}`",
                ty(subject),
                ty(superclass)
            ),
        ),
        RedundantLayout {
            subject, layout, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "redundant layout constraint `{} : {}`",
                ty(subject),
                layout_name(*layout)
            ),
        ),
        ConflictingSuperclass {
            subject,
            existing,
            incoming,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "`{}` cannot require both `{}` and `{}` as superclasses",
                ty(subject),
                ty(existing),
                ty(incoming)
            ),
        ),
        ConflictingLayout {
            subject,
            existing,
            incoming,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "`{}` has conflicting layout constraints `{}` and `{}`",
                ty(subject),
                layout_name(*existing),
                layout_name(*incoming)
            ),
        ),
        ConcreteDoesNotInheritSuperclass {
            subject,
            concrete,
            superclass,
            ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "`{}` is bound to `{}`, which does not inherit from `{}`",
                ty(subject),
                ty(concrete),
                ty(superclass)
            ),
        ),
        UnresolvedNestedType { parent, name } => Diagnostic::new(
            diagnostic.code(),
            format!("`{}` has no member type named `{}`", ty(parent), name),
        ),
        RenamedNestedType {
            parent, from, to, ..
        } => Diagnostic::new(
            diagnostic.code(),
            format!(
                "`{}` has no member type named `{}`; did you mean `{}`?",
                ty(parent),
                from,
                to
            ),
        ),
    };

    if let Some(span) = diagnostic.span() {
        rendered = rendered.with_span(span);
    }

    // Redundancy diagnostics remember where the surviving statement lives.
    let other_span = match diagnostic {
        RedundantConformance { other_span, .. }
        | RedundantSameType { other_span, .. }
        | RedundantConcreteSameType { other_span, .. }
        | RedundantSuperclass { other_span, .. }
        | RedundantLayout { other_span, .. } => *other_span,
        _ => None,
    };
    if let Some(other_span) = other_span {
        rendered = rendered.with_note(format!(
            "constraint also stated at {}:{}",
            other_span.start_line, other_span.start_column
        ));
    }

    rendered
}

/// Renders the builder's accumulated diagnostics.
pub fn render_diagnostics(
    store: &DeclStore,
    diagnostics: &[SignatureDiagnostic],
) -> Vec<Diagnostic> {
    diagnostics
        .iter()
        .map(|diagnostic| render_diagnostic(store, diagnostic))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_attaches_code_span_and_note() {
        let mut store = DeclStore::new();
        let int = store.add_struct("Int");
        let string = store.add_struct("String");

        let diagnostic = SignatureDiagnostic::RedundantSameType {
            first: Type::nominal(int, Vec::new()),
            second: Type::nominal(string, Vec::new()),
            span: Some(Span::new(3, 4, 3, 10)),
            other_span: Some(Span::new(1, 2, 1, 8)),
        };
        let rendered = render_diagnostic(&store, &diagnostic);
        assert_eq!(rendered.code, "ORI2102");
        assert!(rendered.message.contains("Int"));
        assert!(rendered.message.contains("String"));
        assert_eq!(rendered.span, Some(Span::new(3, 4, 3, 10)));
        assert_eq!(rendered.notes.len(), 1);
    }
}
