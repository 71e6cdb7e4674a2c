//! End-to-end signature construction scenarios.

use ori_ast::{DeclStore, GenericParamKey, Requirement, Span, Type};
use ori_generics::builder::ArchetypeResolutionKind;
use ori_generics::{FloatingSource, GenericSignatureBuilder, SignatureDiagnostic};

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
fn trivial_conformance_signature() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::explicit(span(1)),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0 where T0: P>");

    let root = builder.generic_param_archetypes()[0];
    let class = builder.equivalence_class(root).expect("class exists");
    assert!(class.conforms_to(p));
    assert!(class.concrete_type.is_none());
    assert!(class.superclass.is_none());
    assert!(class.layout.is_none());
    assert!(
        builder.diagnostics().is_empty(),
        "unexpected diagnostics: {:?}",
        builder.diagnostics()
    );
}

#[test]
fn concrete_parent_propagates_to_nested_types() {
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
    let int_ty = Type::nominal(int, Vec::new());
    let array_int = Type::nominal(array, vec![int_ty.clone()]);

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), collection),
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: array_int.clone(),
        },
        FloatingSource::explicit(span(2)),
    );

    let element = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "Element"),
            ArchetypeResolutionKind::AlwaysPartial,
        )
        .expect("Element resolves against the conformance");

    // The nested type picked up the witness from Array<Int>'s conformance,
    // and every constraint recording that fact is derived rather than
    // explicit.
    let class = builder.equivalence_class(element).expect("class exists");
    assert_eq!(class.concrete_type, Some(int_ty));
    assert!(!class.concrete_type_constraints.is_empty());
    assert!(class
        .concrete_type_constraints
        .iter()
        .all(|constraint| builder.sources().is_derived(constraint.source)));

    builder.finalize(Span::dummy(), true).unwrap();
    let signature = builder.compute_generic_signature().unwrap();

    // The derived `T0.Element == Int` stays out of the canonical signature.
    assert_eq!(signature.display(&store), "<T0 where T0 == Array<Int>>");
}

#[test]
fn superclass_conformance_is_derived_and_witness_propagates() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");
    store.add_associated_type(p, "A");
    let int = store.add_struct("Int");
    let int_ty = Type::nominal(int, Vec::new());
    let base = store.add_class("Base", None);
    store.add_conformance(base, p, vec![("A".to_string(), int_ty.clone())]);
    let base_ty = Type::nominal(base, Vec::new());

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &Requirement::Superclass {
            subject: Type::param(0, 0),
            superclass: base_ty.clone(),
        },
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::explicit(span(2)),
    );

    let nested = builder
        .resolve_archetype(
            &Type::member(Type::param(0, 0), "A"),
            ArchetypeResolutionKind::AlwaysPartial,
        )
        .expect("A resolves");
    let class = builder.equivalence_class(nested).expect("class exists");
    assert_eq!(class.concrete_type, Some(int_ty));

    builder.finalize(Span::dummy(), false).unwrap();
    let signature = builder.compute_generic_signature().unwrap();

    // `T0: P` is satisfied by the superclass, so only the superclass bound
    // survives; the witness equivalence stays internal.
    assert_eq!(signature.display(&store), "<T0 where T0: Base>");
    assert!(
        builder
            .diagnostics()
            .iter()
            .any(|diagnostic| matches!(diagnostic, SignatureDiagnostic::RedundantConformance { .. })),
        "the written `T0: P` should be called out as redundant"
    );
}

#[test]
fn conflicting_concrete_types_use_first_winner() {
    let mut store = DeclStore::new();
    let int = store.add_struct("Int");
    let string = store.add_struct("String");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: Type::nominal(int, Vec::new()),
        },
        FloatingSource::explicit(span(1)),
    );
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: Type::nominal(string, Vec::new()),
        },
        FloatingSource::explicit(span(2)),
    );

    assert!(
        builder
            .diagnostics()
            .iter()
            .any(|diagnostic| matches!(diagnostic, SignatureDiagnostic::SameTypeConflict { .. })),
        "the second binding should conflict"
    );

    builder.finalize(Span::dummy(), true).unwrap();
    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0 where T0 == Int>");
}

#[test]
fn equated_parameters_emit_one_canonical_edge() {
    let store = DeclStore::new();

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder
        .add_generic_parameter(GenericParamKey::new(0, 1))
        .unwrap();
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 1),
            second: Type::param(0, 0),
        },
        FloatingSource::explicit(span(1)),
    );

    builder.finalize(Span::dummy(), true).unwrap();
    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0, T1 where T0 == T1>");
}

#[test]
fn equating_parameters_is_diagnosed_when_disallowed() {
    let store = DeclStore::new();

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder
        .add_generic_parameter(GenericParamKey::new(0, 1))
        .unwrap();
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: Type::param(0, 1),
        },
        FloatingSource::explicit(span(1)),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    assert!(builder
        .diagnostics()
        .iter()
        .any(|diagnostic| matches!(diagnostic, SignatureDiagnostic::EquatedGenericParams { .. })));
}

#[test]
fn concrete_parameter_is_diagnosed_when_disallowed() {
    let mut store = DeclStore::new();
    let int = store.add_struct("Int");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &Requirement::SameType {
            first: Type::param(0, 0),
            second: Type::nominal(int, Vec::new()),
        },
        FloatingSource::explicit(span(1)),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    assert!(builder
        .diagnostics()
        .iter()
        .any(|diagnostic| matches!(diagnostic, SignatureDiagnostic::ConcreteGenericParam { .. })));
}

#[test]
fn reordering_requirements_preserves_the_signature() {
    let mut store = DeclStore::new();
    let a = store.add_protocol("Alpha");
    let b = store.add_protocol("Beta");
    let c = store.add_protocol("Gamma");

    let build = |order: &[ori_ast::ProtocolId]| {
        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        for &protocol in order {
            builder.add_requirement(
                &conformance(Type::param(0, 0), protocol),
                FloatingSource::abstract_explicit(),
            );
        }
        builder.finalize(Span::dummy(), false).unwrap();
        builder.compute_generic_signature().unwrap()
    };

    let forward = build(&[a, b, c]);
    let backward = build(&[c, b, a]);
    assert_eq!(forward, backward);
    assert_eq!(
        forward.display(&store),
        "<T0 where T0: Alpha, T0: Beta, T0: Gamma>"
    );
}

#[test]
fn adding_a_requirement_twice_is_idempotent() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");

    let build = |times: usize| {
        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        for _ in 0..times {
            builder.add_requirement(
                &conformance(Type::param(0, 0), p),
                FloatingSource::abstract_explicit(),
            );
        }
        builder.finalize(Span::dummy(), false).unwrap();
        builder.compute_generic_signature().unwrap()
    };

    assert_eq!(build(1), build(2));
}

#[test]
fn existing_signature_can_seed_a_new_builder() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");

    let original = {
        let mut builder = GenericSignatureBuilder::new(&store);
        builder
            .add_generic_parameter(GenericParamKey::new(0, 0))
            .unwrap();
        builder.add_requirement(
            &conformance(Type::param(0, 0), p),
            FloatingSource::abstract_explicit(),
        );
        builder.finalize(Span::dummy(), false).unwrap();
        builder.compute_generic_signature().unwrap()
    };

    let mut builder = GenericSignatureBuilder::new(&store);
    builder.add_existing_signature(&original).unwrap();
    builder.finalize(Span::dummy(), false).unwrap();
    let reconstructed = builder.compute_generic_signature().unwrap();
    assert_eq!(original, reconstructed);
}

#[test]
fn inferred_requirements_come_from_type_applications() {
    let mut store = DeclStore::new();
    let hashable = store.add_protocol("Hashable");
    let dictionary = store.add_struct("Dictionary");
    store.set_nominal_signature(
        dictionary,
        vec![GenericParamKey::new(0, 0), GenericParamKey::new(0, 1)],
        vec![Requirement::Conformance {
            subject: Type::param(0, 0),
            constraint: Type::protocol(hashable),
        }],
    );

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder
        .add_generic_parameter(GenericParamKey::new(0, 1))
        .unwrap();

    // Mentioning Dictionary<T0, T1> anywhere implies `T0: Hashable`.
    builder.infer_requirements(&Type::nominal(
        dictionary,
        vec![Type::param(0, 0), Type::param(0, 1)],
    ));
    builder.finalize(Span::dummy(), false).unwrap();

    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0, T1 where T0: Hashable>");

    let root = builder.generic_param_archetypes()[0];
    let class = builder.equivalence_class(root).expect("class exists");
    let constraint = &class.conforms_to[&hashable][0];
    assert!(builder.sources().is_inferred(constraint.source));
}

#[test]
fn layout_requirements_survive_to_the_signature() {
    let store = DeclStore::new();

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &Requirement::Layout {
            subject: Type::param(0, 0),
            layout: ori_ast::LayoutConstraint::NativeClass,
        },
        FloatingSource::explicit(span(1)),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    let signature = builder.compute_generic_signature().unwrap();
    assert_eq!(signature.display(&store), "<T0 where T0: _NativeClass>");
}

#[test]
fn debug_dump_mentions_requirements_and_archetypes() {
    let mut store = DeclStore::new();
    let p = store.add_protocol("P");

    let mut builder = GenericSignatureBuilder::new(&store);
    builder
        .add_generic_parameter(GenericParamKey::new(0, 0))
        .unwrap();
    builder.add_requirement(
        &conformance(Type::param(0, 0), p),
        FloatingSource::abstract_explicit(),
    );
    builder.finalize(Span::dummy(), false).unwrap();

    let dump = builder.debug_dump();
    assert!(dump.contains("Requirements:"));
    assert!(dump.contains("T0 : P"));
    assert!(dump.contains("Potential archetypes:"));
}
