//! Per-class constraint state shared by a set of equivalent archetypes.

use crate::archetype::PaId;
use crate::builder::GenericSignatureBuilder;
use crate::source::{SourceArena, SourceId};
use ori_ast::{LayoutConstraint, ProtocolId, Type};
use std::collections::BTreeMap;

/// Identifier of an equivalence class in the builder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(u32);

impl ClassId {
    pub(crate) fn new(raw: usize) -> Self {
        Self(raw as u32)
    }

    pub fn to_raw(self) -> usize {
        self.0 as usize
    }
}

/// One recorded constraint: the archetype it was written against, the
/// constrained value, and the provenance of the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint<T> {
    pub subject: PaId,
    pub value: T,
    pub source: SourceId,
}

/// A connected component of the derived same-type subgraph, represented by
/// its canonical anchor. Computed only during finalization.
#[derive(Debug, Clone)]
pub struct DerivedSameTypeComponent {
    pub anchor: PaId,
    pub concrete_type_source: Option<SourceId>,
}

/// Constraint bags shared by one equivalence class of archetypes.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceClass {
    /// Every archetype in the class. The first entry is the archetype the
    /// class was created for.
    pub members: Vec<PaId>,
    /// Protocol conformances, each with the full list of constraints that
    /// asserted it.
    pub conforms_to: BTreeMap<ProtocolId, Vec<Constraint<ProtocolId>>>,
    /// Same-type constraints, bucketed by the archetype they were written
    /// on. Both endpoints of an edge record it.
    pub same_type_constraints: BTreeMap<PaId, Vec<Constraint<PaId>>>,
    /// Concrete binding of the class, if any, and every constraint that
    /// asserted one.
    pub concrete_type: Option<Type>,
    pub concrete_type_constraints: Vec<Constraint<Type>>,
    /// Superclass bound and its constraints.
    pub superclass: Option<Type>,
    pub superclass_constraints: Vec<Constraint<Type>>,
    /// Layout bound (the meet of everything recorded) and its constraints.
    pub layout: Option<LayoutConstraint>,
    pub layout_constraints: Vec<Constraint<LayoutConstraint>>,
    /// Derived same-type components, populated at finalization.
    pub derived_same_type_components: Vec<DerivedSameTypeComponent>,
}

impl EquivalenceClass {
    pub(crate) fn with_member(pa: PaId) -> Self {
        Self {
            members: vec![pa],
            ..Self::default()
        }
    }

    pub fn conforms_to(&self, protocol: ProtocolId) -> bool {
        self.conforms_to.contains_key(&protocol)
    }

    /// Protocols the class conforms to, in map order.
    pub fn protocols(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.conforms_to.keys().copied()
    }

    /// Returns true if the conformance to `protocol` is satisfied through
    /// the superclass bound.
    pub fn is_conformance_satisfied_by_superclass(
        &self,
        protocol: ProtocolId,
        sources: &SourceArena,
    ) -> bool {
        self.conforms_to
            .get(&protocol)
            .map(|constraints| {
                constraints.iter().any(|constraint| {
                    sources.get(constraint.source).kind == crate::source::SourceKind::Superclass
                })
            })
            .unwrap_or(false)
    }

    /// A concrete-type constraint carrying a written location, preferring
    /// one on `preferred` when given.
    pub fn find_any_concrete_constraint_as_written(
        &self,
        sources: &SourceArena,
        preferred: Option<PaId>,
    ) -> Option<Constraint<Type>> {
        self.concrete_type.as_ref()?;
        let mut result = None;
        for constraint in &self.concrete_type_constraints {
            if sources.span_of(constraint.source).is_some() {
                result = Some(constraint.clone());
                if preferred.is_none() || preferred == Some(constraint.subject) {
                    return result;
                }
            }
        }
        result
    }

    /// A superclass constraint carrying a written location whose value is
    /// the current superclass bound.
    pub fn find_any_superclass_constraint_as_written(
        &self,
        sources: &SourceArena,
        preferred: Option<PaId>,
    ) -> Option<Constraint<Type>> {
        let superclass = self.superclass.as_ref()?;
        let mut result = None;
        for constraint in &self.superclass_constraints {
            if sources.span_of(constraint.source).is_some() && &constraint.value == superclass {
                result = Some(constraint.clone());
                if preferred.is_none() || preferred == Some(constraint.subject) {
                    return result;
                }
            }
        }
        result
    }
}

impl<'a> GenericSignatureBuilder<'a> {
    pub(crate) fn class(&self, id: ClassId) -> &EquivalenceClass {
        self.classes[id.to_raw()]
            .as_ref()
            .expect("equivalence class is live")
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut EquivalenceClass {
        self.classes[id.to_raw()]
            .as_mut()
            .expect("equivalence class is live")
    }

    pub(crate) fn alloc_class(&mut self, class: EquivalenceClass) -> ClassId {
        let id = ClassId::new(self.classes.len());
        self.classes.push(Some(class));
        id
    }

    /// Removes a class from the arena when its members are merged into
    /// another class.
    pub(crate) fn take_class(&mut self, id: ClassId) -> EquivalenceClass {
        self.classes[id.to_raw()]
            .take()
            .expect("equivalence class is live")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_is_empty() {
        let class = EquivalenceClass::with_member(PaId::new(0));
        assert_eq!(class.members.len(), 1);
        assert!(class.conforms_to.is_empty());
        assert!(class.concrete_type.is_none());
        assert!(class.superclass.is_none());
        assert!(class.layout.is_none());
        assert!(class.derived_same_type_components.is_empty());
    }
}
