//! Concrete and abstract conformances.

use crate::decl::{NominalId, ProtocolId};
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a registered concrete conformance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConformanceId(u32);

impl ConformanceId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }
}

/// A nominal declaration's conformance to a protocol, with its type
/// witnesses written in terms of the nominal's generic parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conformance {
    pub nominal: NominalId,
    pub protocol: ProtocolId,
    pub witnesses: BTreeMap<String, Type>,
}

/// Result of a conformance lookup: either a concrete conformance that can
/// answer type-witness queries, or an abstract one (existentials and type
/// parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformanceRef {
    Concrete(ConformanceId),
    Abstract(ProtocolId),
}

impl ConformanceRef {
    pub fn is_concrete(&self) -> bool {
        matches!(self, ConformanceRef::Concrete(_))
    }

    pub fn concrete(&self) -> Option<ConformanceId> {
        match self {
            ConformanceRef::Concrete(id) => Some(*id),
            ConformanceRef::Abstract(_) => None,
        }
    }
}
