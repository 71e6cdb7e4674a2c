// ori_ast - type and declaration model for the ori language
use serde::{Deserialize, Serialize};

pub mod conformance;
pub mod decl;
pub mod types;

pub use conformance::{Conformance, ConformanceId, ConformanceRef};
pub use decl::{
    AliasId, AssocTypeId, AssociatedTypeDecl, DeclStore, NominalDecl, NominalId, NominalKind,
    ProtocolDecl, ProtocolId, TypeAliasDecl,
};
pub use types::{GenericParamKey, LayoutConstraint, Requirement, Substitutions, Type};

/// Position information attached to written requirements and declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    /// Returns true if the span carries real position information.
    pub fn is_valid(&self) -> bool {
        *self != Self::default()
    }
}
