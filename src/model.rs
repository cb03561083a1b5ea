//! Relations: the edges and properties stored in vertex rows.

use std::collections::BTreeMap;

use crate::schema::ImplicitKey;
use crate::types::{Direction, RelationCategory, RelationId, TypeId, Value, VertexId};

/// An edge or a property.
///
/// Properties have no in-vertex and carry their value in [`value`](Self::value). Both
/// kinds may carry further properties, such as the sort-key values of an edge.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    /// Relation id.
    pub id: RelationId,
    /// Relation type.
    pub type_id: TypeId,
    /// Out-vertex; the owner of a property.
    pub out_vertex: VertexId,
    /// In-vertex of an edge.
    pub in_vertex: Option<VertexId>,
    /// Value of a property.
    pub value: Option<Value>,
    /// Properties of the relation itself.
    pub properties: BTreeMap<TypeId, Value>,
}

impl Relation {
    /// Creates an edge `out -> in`.
    pub fn edge(id: RelationId, type_id: TypeId, out: VertexId, inn: VertexId) -> Self {
        Self {
            id,
            type_id,
            out_vertex: out,
            in_vertex: Some(inn),
            value: None,
            properties: BTreeMap::new(),
        }
    }

    /// Creates a property of `owner`.
    pub fn property(id: RelationId, type_id: TypeId, owner: VertexId, value: Value) -> Self {
        Self {
            id,
            type_id,
            out_vertex: owner,
            in_vertex: None,
            value: Some(value),
            properties: BTreeMap::new(),
        }
    }

    /// Adds a property to the relation.
    pub fn with_property(mut self, key: TypeId, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value.into());
        self
    }

    /// Returns true for edges.
    pub fn is_edge(&self) -> bool {
        self.in_vertex.is_some()
    }

    /// [`RelationCategory::Edge`] or [`RelationCategory::Property`].
    pub fn category(&self) -> RelationCategory {
        if self.is_edge() {
            RelationCategory::Edge
        } else {
            RelationCategory::Property
        }
    }

    /// The endpoint that is not `base`; for loops, `base` itself.
    pub fn other_vertex(&self, base: VertexId) -> Option<VertexId> {
        let inn = self.in_vertex?;
        Some(if self.out_vertex == base { inn } else { self.out_vertex })
    }

    /// Returns true if `vertex` is an endpoint.
    pub fn is_incident_on(&self, vertex: VertexId) -> bool {
        self.out_vertex == vertex || self.in_vertex == Some(vertex)
    }

    /// Returns true if `base` sits at `dir` of this relation.
    pub fn matches_direction(&self, base: VertexId, dir: Direction) -> bool {
        match dir {
            Direction::Out => self.out_vertex == base,
            Direction::In => self.in_vertex == Some(base),
            Direction::Both => self.is_incident_on(base),
        }
    }

    /// Value of `key` seen from `base`, resolving implicit keys and the own value.
    pub fn value_of(&self, key: TypeId, base: VertexId) -> Option<Value> {
        match ImplicitKey::from_type_id(key) {
            Some(ImplicitKey::Id) => Some(Value::Int(self.id.0 as i64)),
            Some(ImplicitKey::Label) => Some(Value::Int(i64::from(self.type_id.0))),
            Some(ImplicitKey::AdjacentId) => self.other_vertex(base).map(Value::Vertex),
            None if key == self.type_id => self.value.clone(),
            None => self.properties.get(&key).cloned(),
        }
    }
}
