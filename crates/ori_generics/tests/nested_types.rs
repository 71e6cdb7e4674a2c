//! Nested-type resolution: name unification across protocols, typealiases,
//! placeholder binding, and typo correction.

use ori_ast::{DeclStore, GenericParamKey, Requirement, Span, Type};
use ori_generics::{
    ArchetypeResolutionKind, FloatingSource, GenericSignatureBuilder, SignatureDiagnostic,
};

fn span(line: usize) -> Span {
    Span::new(line, 0, line, 20)
}

fn conformance(subject: Type, protocol: ori_ast::ProtocolId) -> Requirement {
    Requirement::Conformance {
        subject,
        constraint: Type::protocol(protocol),
    }
}

#[test]
fn same_named_associated_types_share_one_archetype() {
    let mut store = DeclStore::new();
    let q = store.add_protocol("Q");
    let p1 = store.add_protocol("P1");
    let a1 = store.add_associated_type(p1, "A");
    store.add_assoc_type_inheritance(a1, Type::protocol(q));
    let p2 = store.add_protocol("P2");
    store.add_associated_type(p2, "A");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p1),
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &conformance(Type::param(0, 0), p2),
        FloatingSource::explicit(span(2)),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0 where T0: P1, T0: P2>");

    // Both protocols contribute an `A`, but only one archetype exists and
    // it carries the bound from P1.
    let root = builder.generic_param_archetypes()[0];
    assert_eq!(builder.nested_archetypes(root, "A").len(), 1);

    let nested = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "A"),
            ArchetypeResolutionKind::AlreadyKnown,
        )
        .expect("A resolves");
    assert_eq!(builder.archetype(nested).resolved_assoc_type(), Some(a1));
    let class = builder.equivalence_class(nested).expect("class exists");
    assert!(class.conforms_to(q));
    assert_eq!(class.conforms_to[&q].len(), 1);
}

#[test]
fn typealias_equates_nested_name_with_underlying_type() {
    let mut store = DeclStore::new();
    let sequence = store.add_protocol("Sequence");
    store.add_associated_type(sequence, "Element");
    // `typealias First = Self.Element` inside the protocol.
    store.add_typealias(
        sequence,
        "First",
        Type::member(Type::param(0, 0), "Element"),
    );

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), sequence),
        FloatingSource::explicit(span(1)),
    );

    let first = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "First"),
            ArchetypeResolutionKind::AlwaysPartial,
        )
        .expect("First resolves through the typealias");
    let element = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "Element"),
            ArchetypeResolutionKind::AlreadyKnown,
        )
        .expect("Element was created by the alias");

    assert!(builder.in_same_equivalence_class(first, element));

    // The alias never becomes the representative of the merged class.
    let representative = builder.representative(first);
    assert!(builder.archetype(representative).resolved_alias().is_none());
}

#[test]
fn merged_parameters_unify_their_nested_types() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");
    store.add_associated_type(p, "A");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder
        .add_generic_parameter(GenericParamKey::new(0, 1))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::abstract_explicit(),
    );
    builder.add_requirement(
        &conformance(Type::param(0, 1), p),
        FloatingSource::abstract_explicit(),
    );
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: Type::param(0, 1),
        },
        FloatingSource::explicit(span(1)),
    );

    let t_a = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "A"),
            ArchetypeResolutionKind::AlwaysPartial,
        )
        .expect("T0.A resolves");
    let u_a = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 1), "A"),
            ArchetypeResolutionKind::AlwaysPartial,
        )
        .expect("T1.A resolves");

    assert!(builder.in_same_equivalence_class(t_a, u_a));
}

#[test]
fn typo_corrected_nested_type_resolves_and_reports() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");
    store.add_associated_type(p, "Element");
    let int = store.add_struct("Int");
    let int_ty = Type::nominal(int, Vec::new());

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::member(Type::param(0, 0), "Elemant"),
            second: int_ty.clone(),
        },
        FloatingSource::explicit(span(2)),
    );
    assert_eq!(builder.num_unresolved_nested_types(), 1);

    builder.finalize(Span::dummy(), false).unwrap();
    assert_eq!(builder.num_unresolved_nested_types(), 0);

    // The misspelled name was corrected and the constraint applies to
    // `Element`.
    let element = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "Element"),
            ArchetypeResolutionKind::AlreadyKnown,
        )
        .expect("Element exists after correction");
    let class = builder.equivalence_class(element).expect("class exists");
    assert_eq!(class.concrete_type, Some(int_ty));

    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(
        signature.display(&store),
        "<T0 where T0: P, T0.Element == Int>"
    );

    assert!(builder.diagnose_remaining_renames(span(2)));
    assert!(builder
        .diagnostics()
        .iter()
        .any(|diagnostic| matches!(
            diagnostic,
            SignatureDiagnostic::RenamedNestedType { from, to, .. }
                if from == "Elemant" && to == "Element"
        )));

    // Reporting is once-only.
    assert!(!builder.diagnose_remaining_renames(span(2)));
}

#[test]
fn uncorrectable_nested_name_is_invalidated() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");
    store.add_associated_type(p, "Element");
    let int = store.add_struct("Int");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::member(Type::param(0, 0), "Zzz"),
            second: Type::nominal(int, Vec::new()),
        },
        FloatingSource::explicit(span(2)),
    );

    builder.finalize(Span::dummy(), false).unwrap();

    let zzz = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "Zzz"),
            ArchetypeResolutionKind::AlreadyKnown,
        )
        .expect("the placeholder still exists");
    assert!(builder.archetype(zzz).is_invalid());
    assert!(builder
        .diagnostics()
        .iter()
        .any(|diagnostic| matches!(
            diagnostic,
            SignatureDiagnostic::UnresolvedNestedType { name, .. } if name == "Zzz"
        )));

    // Invalid archetypes stay out of the signature.
    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0 where T0: P>");
}

#[test]
fn union_find_representatives_are_stable_and_coherent() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");
    store.add_associated_type(p, "A");

    let mut builder = GenericSignatureBuilder::new(&store);
    for index in 0..4 {
        builder
            .add_generic_parameter(GenericParamKey::new(0, index))
            .unwrap();
    }
    builder.add_requirement(
        &conformance(Type::param(0, 3), p),
        FloatingSource::abstract_explicit(),
    );

    // Merge 3 into 2, 2 into 1, 1 into 0.
    for index in (1..4).rev() {
        builder.add_requirement(
            &Requirement::SameType {
                first: Type::param(0, index),
                second: Type::param(0, index - 1),
            },
            FloatingSource::abstract_explicit(),
        );
    }

    let roots: Vec<_> = builder.generic_param_archetypes().to_vec();
    let representative = builder.representative(roots[0]);
    for &root in &roots {
        assert_eq!(builder.representative(root), representative);
        assert_eq!(
            builder.representative(builder.representative(root)),
            representative
        );
    }

    // Class coherence: every member's representative owns the class.
    let class = builder.equivalence_class(representative).expect("class");
    assert!(class.conforms_to(p));
    for &member in &class.members {
        assert_eq!(builder.representative(member), representative);
    }
    assert_eq!(class.members.len(), 4);
}

#[test]
fn source_interning_is_structural() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();

    let requirement = conformance(Type::param(0, 0), p);
    builder.add_requirement(&requirement, FloatingSource::explicit(span(7)));
    builder.add_requirement(&requirement, FloatingSource::explicit(span(7)));

    let root = builder.generic_param_archetypes()[0];
    let class = builder.equivalence_class(root).expect("class exists");
    let constraints = &class.conforms_to[&p];
    assert_eq!(constraints.len(), 2);
    assert_eq!(constraints[0].source, constraints[1].source);
}
