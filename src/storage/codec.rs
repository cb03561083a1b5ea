//! Column layout of relations inside vertex rows.
//!
//! ```text
//! row key : vertex id (u64 BE)
//! column  : visibility | kind | type id (u32 BE) | direction | sort-key values
//!           | adjacent vertex | own value | relation id
//! value   : JSON-serialized relation
//! ```
//!
//! Sort-key values use the order-preserving value encoding in the sort order of the
//! type; a missing value is the reserved maximal byte. The adjacent vertex is written
//! for edges that are not unique in the row's direction, the own value for
//! set-valued properties and the relation id for unconstrained multiplicities, so
//! every column of a type is distinct. Relation indexes write a second, hidden
//! column per relation ordered by the index's sort key.

use std::ops::Bound;

use serde::{Deserialize, Serialize};

use super::kcv::{Entry, SliceQuery, StaticBuffer};
use crate::error::{GraphError, Result};
use crate::model::Relation;
use crate::primitives::bytes::{ord, successor, value as value_codec};
use crate::schema::{ImplicitKey, RelationType, SchemaProvider};
use crate::types::{
    Direction, Multiplicity, Order, RelationCategory, RelationId, SchemaStatus, TypeId, Value,
    VertexId,
};

const VIS_SYSTEM: u8 = 0x00;
const VIS_NORMAL: u8 = 0x01;
const VIS_HIDDEN: u8 = 0x02;

const KIND_PROPERTY: u8 = 0x10;
const KIND_EDGE: u8 = 0x20;

const DIR_OUT: u8 = 0x00;
const DIR_IN: u8 = 0x01;

/// Sort-key restriction of a type slice: exact values for a prefix of the extended
/// sort key, then an optional range on the following component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyRestriction {
    /// Exact values, one per leading component.
    pub points: Vec<Value>,
    /// Range on the component after the points.
    pub range: Option<(Bound<Value>, Bound<Value>)>,
}

#[derive(Serialize, Deserialize)]
struct StoredRelation {
    id: u64,
    type_id: u32,
    out_vertex: u64,
    in_vertex: Option<u64>,
    value: Option<Value>,
    properties: Vec<(u32, Value)>,
}

impl From<&Relation> for StoredRelation {
    fn from(rel: &Relation) -> Self {
        Self {
            id: rel.id.0,
            type_id: rel.type_id.0,
            out_vertex: rel.out_vertex.0,
            in_vertex: rel.in_vertex.map(|v| v.0),
            value: rel.value.clone(),
            properties: rel
                .properties
                .iter()
                .map(|(k, v)| (k.0, v.clone()))
                .collect(),
        }
    }
}

impl From<StoredRelation> for Relation {
    fn from(stored: StoredRelation) -> Self {
        Self {
            id: RelationId(stored.id),
            type_id: TypeId(stored.type_id),
            out_vertex: VertexId(stored.out_vertex),
            in_vertex: stored.in_vertex.map(VertexId),
            value: stored.value,
            properties: stored
                .properties
                .into_iter()
                .map(|(k, v)| (TypeId(k), v))
                .collect(),
        }
    }
}

/// Encoder and decoder for the relation column layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelationCodec;

impl RelationCodec {
    /// Creates a codec.
    pub fn new() -> Self {
        Self
    }

    /// Row key of `vertex`.
    pub fn row_key(&self, vertex: VertexId) -> StaticBuffer {
        StaticBuffer::copy_from_slice(&vertex.0.to_be_bytes())
    }

    /// Slice over every visible relation of `category`.
    pub fn category_slice(&self, category: RelationCategory, system: bool) -> Result<SliceQuery> {
        let mut prefix = vec![if system { VIS_SYSTEM } else { VIS_NORMAL }];
        match category {
            RelationCategory::Property => prefix.push(KIND_PROPERTY),
            RelationCategory::Edge => prefix.push(KIND_EDGE),
            RelationCategory::Relation => {}
        }
        let end = successor(&prefix)?;
        Ok(SliceQuery::new(prefix, end))
    }

    /// Slice over the columns of `ty` in `dir` matching `restriction`.
    ///
    /// `Direction::Both` covers both directions and only accepts an empty restriction.
    pub fn type_slice(
        &self,
        ty: &RelationType,
        dir: Direction,
        restriction: &KeyRestriction,
    ) -> Result<SliceQuery> {
        let mut prefix = type_prefix(ty);
        match dir_byte(dir) {
            Some(byte) => prefix.push(byte),
            None => {
                if !restriction.points.is_empty() || restriction.range.is_some() {
                    return Err(GraphError::Invalid(
                        "sort-key restrictions need a single direction",
                    ));
                }
                let end = successor(&prefix)?;
                return Ok(SliceQuery::new(prefix, end));
            }
        }
        for (position, point) in restriction.points.iter().enumerate() {
            value_codec::encode(&mut prefix, Some(point), component_order(ty, position));
        }
        let Some((start, end)) = &restriction.range else {
            let end = successor(&prefix)?;
            return Ok(SliceQuery::new(prefix, end));
        };
        let order = component_order(ty, restriction.points.len());
        let (low, high) = match order {
            Order::Asc => (start, end),
            Order::Desc => (end, start),
        };
        let lower = match low {
            Bound::Unbounded => prefix.clone(),
            Bound::Included(v) => with_value(&prefix, v, order),
            Bound::Excluded(v) => successor(&with_value(&prefix, v, order))?,
        };
        let upper = match high {
            Bound::Unbounded => successor(&prefix)?,
            Bound::Included(v) => successor(&with_value(&prefix, v, order))?,
            Bound::Excluded(v) => with_value(&prefix, v, order),
        };
        Ok(SliceQuery::new(lower, upper))
    }

    /// Entries to write for `rel`, keyed by row: one column per stored direction for
    /// the type itself and for each maintained index.
    pub fn entries_for(
        &self,
        rel: &Relation,
        schema: &dyn SchemaProvider,
    ) -> Result<Vec<(StaticBuffer, Entry)>> {
        let base = schema
            .relation_type_by_id(rel.type_id)
            .ok_or(GraphError::NotFound("relation type"))?;
        let value = StaticBuffer::from(serde_json::to_vec(&StoredRelation::from(rel))?);
        let mut rows = vec![(Direction::Out, rel.out_vertex)];
        if let Some(inn) = rel.in_vertex {
            rows.push((Direction::In, inn));
        }
        let mut layouts = vec![base.clone()];
        for index_id in &base.indexes {
            let index = schema
                .relation_type_by_id(*index_id)
                .ok_or(GraphError::NotFound("relation index"))?;
            if index.status != SchemaStatus::Disabled {
                layouts.push(index);
            }
        }
        let mut entries = Vec::new();
        for (dir, vertex) in rows {
            for layout in &layouts {
                if !layout.stores_direction(dir) {
                    continue;
                }
                let column = self.column(layout, &base, rel, dir, vertex)?;
                entries.push((self.row_key(vertex), Entry::new(column, value.clone())));
            }
        }
        Ok(entries)
    }

    /// Decodes the relation stored in `entry`.
    pub fn decode(&self, entry: &Entry) -> Result<Relation> {
        let stored: StoredRelation = serde_json::from_slice(&entry.value)?;
        Ok(stored.into())
    }

    fn column(
        &self,
        layout: &RelationType,
        base: &RelationType,
        rel: &Relation,
        dir: Direction,
        vertex: VertexId,
    ) -> Result<Vec<u8>> {
        let mut column = type_prefix(layout);
        column.push(dir_byte(dir).ok_or(GraphError::Invalid("column needs a single direction"))?);
        for (position, key) in layout.sort_key.iter().enumerate() {
            let value = rel.value_of(*key, vertex);
            value_codec::encode(&mut column, value.as_ref(), component_order(layout, position));
        }
        let multiplicity = layout.multiplicity;
        if base.is_edge_label() && !multiplicity.is_unique(dir) {
            let adjacent = rel
                .other_vertex(vertex)
                .ok_or(GraphError::Invalid("edge without in-vertex"))?;
            value_codec::encode(&mut column, Some(&Value::Vertex(adjacent)), Order::Asc);
        }
        if base.is_property_key() && multiplicity == Multiplicity::Simple {
            value_codec::encode(&mut column, rel.value.as_ref(), Order::Asc);
        }
        if !multiplicity.is_constrained() {
            let id = rel.value_of(ImplicitKey::Id.type_id(), vertex);
            value_codec::encode(&mut column, id.as_ref(), Order::Asc);
        }
        Ok(column)
    }
}

fn type_prefix(ty: &RelationType) -> Vec<u8> {
    let visibility = if ty.is_index() {
        VIS_HIDDEN
    } else if ty.is_system() {
        VIS_SYSTEM
    } else {
        VIS_NORMAL
    };
    let kind = if ty.is_edge_label() {
        KIND_EDGE
    } else {
        KIND_PROPERTY
    };
    let mut prefix = Vec::with_capacity(16);
    prefix.push(visibility);
    prefix.push(kind);
    ord::put_u32_be(&mut prefix, ty.id.0);
    prefix
}

fn dir_byte(dir: Direction) -> Option<u8> {
    match dir {
        Direction::Out => Some(DIR_OUT),
        Direction::In => Some(DIR_IN),
        Direction::Both => None,
    }
}

fn component_order(ty: &RelationType, position: usize) -> Order {
    if position < ty.sort_key.len() {
        ty.sort_order
    } else {
        Order::Asc
    }
}

fn with_value(prefix: &[u8], value: &Value, order: Order) -> Vec<u8> {
    let mut out = prefix.to_vec();
    value_codec::encode(&mut out, Some(value), order);
    out
}
