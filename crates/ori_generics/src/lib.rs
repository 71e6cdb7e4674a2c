//! ori_generics - generic signature construction for the ori compiler.
//!
//! The builder takes a set of generic parameters and a stream of
//! requirements (conformance, superclass, layout, same-type), canonicalizes
//! them into equivalence classes over potential archetypes, and emits a
//! minimal, canonical generic signature. Facts carry interned provenance
//! sources so derived and self-derived requirements can be recognized and
//! kept out of the final signature.

pub mod archetype;
pub mod builder;
pub mod diagnostics;
pub mod equivalence;
pub mod finalize;
pub mod nested;
pub mod signature;
pub mod source;

pub use archetype::{PaId, PotentialArchetype};
pub use builder::{ArchetypeResolutionKind, BuilderError, ConstraintResult, GenericSignatureBuilder};
pub use diagnostics::{render_diagnostics, Diagnostic, SignatureDiagnostic};
pub use equivalence::{Constraint, DerivedSameTypeComponent, EquivalenceClass};
pub use nested::NestedTypeUpdate;
pub use signature::GenericSignature;
pub use source::{FloatingSource, RequirementSource, SourceId, SourceKind};
