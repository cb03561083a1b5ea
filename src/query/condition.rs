//! Condition trees in query normal form (QNF) and conversion from user constraints.
//!
//! A query in normal form is a conjunction whose children are leaves or disjunctions
//! of leaves. [`Condition::evaluate`] filters relations in memory; the compiler
//! absorbs what it can into backend slices and keeps the rest for filtering.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::error::{GraphError, Result};
use crate::model::Relation;
use crate::schema::SchemaProvider;
use crate::types::{
    compare_values, Direction, RelationCategory, TypeId, Value, ValueKind, VertexId,
};

/// Comparison operator of a predicate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cmp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Cmp {
    /// Evaluates `actual <op> expected`; `None` stands for an absent value.
    pub fn evaluate(self, actual: Option<&Value>, expected: Option<&Value>) -> bool {
        match self {
            Cmp::Eq => match (actual, expected) {
                (None, None) => true,
                (Some(a), Some(e)) => compare_values(a, e) == Some(Ordering::Equal),
                _ => false,
            },
            Cmp::Ne => !Cmp::Eq.evaluate(actual, expected),
            Cmp::Lt | Cmp::Le | Cmp::Gt | Cmp::Ge => {
                let (Some(a), Some(e)) = (actual, expected) else {
                    return false;
                };
                let Some(ord) = compare_values(a, e) else {
                    return false;
                };
                match self {
                    Cmp::Lt => ord == Ordering::Less,
                    Cmp::Le => ord != Ordering::Greater,
                    Cmp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }
            }
        }
    }
}

/// A node of a condition tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    /// All children hold.
    And(Vec<Condition>),
    /// At least one child holds.
    Or(Vec<Condition>),
    /// Compares the value of `key` on the relation.
    Predicate {
        /// Compared key.
        key: TypeId,
        /// Operator.
        cmp: Cmp,
        /// Expected value; `None` matches absent values.
        value: Option<Value>,
    },
    /// The relation is of the given category.
    Category(RelationCategory),
    /// The relation type is a system type, or not.
    Visibility {
        /// Keep system relations instead of normal ones.
        system: bool,
    },
    /// The relation has one of the given types.
    RelationType(Vec<TypeId>),
    /// `vertex` sits at `dir` of the relation.
    Direction {
        /// Base vertex.
        vertex: VertexId,
        /// Required direction.
        dir: Direction,
    },
    /// The relation connects `vertex` to `adjacent`.
    Incidence {
        /// Base vertex.
        vertex: VertexId,
        /// The other endpoint.
        adjacent: VertexId,
    },
}

impl Condition {
    /// Children of `And`/`Or` nodes; empty for leaves.
    pub fn children(&self) -> &[Condition] {
        match self {
            Condition::And(children) | Condition::Or(children) => children,
            _ => &[],
        }
    }

    /// Returns true for everything except `And`/`Or`.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Condition::And(_) | Condition::Or(_))
    }

    /// Evaluates the condition on `rel` seen from `base`.
    pub fn evaluate(&self, rel: &Relation, base: VertexId) -> bool {
        match self {
            Condition::And(children) => children.iter().all(|c| c.evaluate(rel, base)),
            Condition::Or(children) => children.iter().any(|c| c.evaluate(rel, base)),
            Condition::Predicate { key, cmp, value } => {
                cmp.evaluate(rel.value_of(*key, base).as_ref(), value.as_ref())
            }
            Condition::Category(category) => match category {
                RelationCategory::Relation => true,
                other => rel.category() == *other,
            },
            Condition::Visibility { system } => rel.type_id.is_system() == *system,
            Condition::RelationType(types) => types.contains(&rel.type_id),
            Condition::Direction { vertex, dir } => rel.matches_direction(*vertex, *dir),
            Condition::Incidence { vertex, adjacent } => {
                rel.is_incident_on(*vertex) && rel.other_vertex(*vertex) == Some(*adjacent)
            }
        }
    }
}

/// User-facing constraint on a key given by name.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    /// Key name.
    pub key: String,
    /// What the key must satisfy.
    pub predicate: Predicate,
}

impl Constraint {
    /// `key <cmp> value`; `None` stands for the absent value.
    pub fn cmp(key: impl Into<String>, cmp: Cmp, value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            predicate: Predicate::Cmp(cmp, value),
        }
    }

    /// `key == value`.
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(key, Cmp::Eq, Some(value.into()))
    }
}

/// Predicate of a [`Constraint`].
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Comparison with a single value.
    Cmp(Cmp, Option<Value>),
    /// Membership in a set of values.
    In(Vec<Value>),
    /// Exclusion from a set of values.
    NotIn(Vec<Value>),
}

/// Converts constraints into the children of a QNF conjunction.
///
/// `Ok(None)` means the constraints cannot be satisfied and the query is empty.
pub fn constraints_to_qnf(
    constraints: &[Constraint],
    schema: &dyn SchemaProvider,
) -> Result<Option<Vec<Condition>>> {
    let mut conditions: Vec<Condition> = Vec::with_capacity(constraints.len());
    let mut seen: FxHashSet<Condition> = FxHashSet::default();
    let mut push = |condition: Condition, conditions: &mut Vec<Condition>| {
        if seen.insert(condition.clone()) {
            conditions.push(condition);
        }
    };
    for constraint in constraints {
        let Some(ty) = schema.relation_type(&constraint.key) else {
            // No relation carries an unknown key.
            match &constraint.predicate {
                Predicate::Cmp(Cmp::Eq, None) | Predicate::Cmp(Cmp::Ne, Some(_)) => continue,
                Predicate::NotIn(_) => continue,
                _ => return Ok(None),
            }
        };
        let expected = if ty.is_edge_label() {
            if !ty.is_unidirected(Direction::Out) {
                return Err(GraphError::InvalidOwned(format!(
                    "edge label {} must be unidirected to be used as a constraint",
                    ty.name
                )));
            }
            Some(ValueKind::Vertex)
        } else {
            ty.data_type
        };
        let key = ty.id;
        let coerce = |value: &Value| -> Result<Value> { coerce_value(&ty.name, expected, value) };
        match &constraint.predicate {
            Predicate::Cmp(cmp, value) => {
                let value = value.as_ref().map(coerce).transpose()?;
                push(
                    Condition::Predicate {
                        key,
                        cmp: *cmp,
                        value,
                    },
                    &mut conditions,
                );
            }
            Predicate::NotIn(values) => {
                for value in values {
                    push(
                        Condition::Predicate {
                            key,
                            cmp: Cmp::Ne,
                            value: Some(coerce(value)?),
                        },
                        &mut conditions,
                    );
                }
            }
            Predicate::In(values) => match values.as_slice() {
                [] => return Ok(None),
                [single] => push(
                    Condition::Predicate {
                        key,
                        cmp: Cmp::Eq,
                        value: Some(coerce(single)?),
                    },
                    &mut conditions,
                ),
                many => {
                    let mut alternatives = Vec::with_capacity(many.len());
                    for value in many {
                        let leaf = Condition::Predicate {
                            key,
                            cmp: Cmp::Eq,
                            value: Some(coerce(value)?),
                        };
                        if !alternatives.contains(&leaf) {
                            alternatives.push(leaf);
                        }
                    }
                    push(Condition::Or(alternatives), &mut conditions);
                }
            },
        }
    }
    Ok(Some(conditions))
}

fn coerce_value(name: &str, expected: Option<ValueKind>, value: &Value) -> Result<Value> {
    match (expected, value) {
        (None, v) => Ok(v.clone()),
        (Some(ValueKind::Float), Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (Some(kind), v) if v.kind() == kind => Ok(v.clone()),
        (Some(kind), v) => Err(GraphError::InvalidOwned(format!(
            "value {v} does not match data type {kind:?} of {name}"
        ))),
    }
}

/// Returns `(key, points)` if `alternatives` is a disjunction of equalities on one key.
pub fn extract_or_condition(alternatives: &[Condition]) -> Option<(TypeId, Vec<Value>)> {
    let mut key = None;
    let mut points = Vec::with_capacity(alternatives.len());
    for alternative in alternatives {
        let Condition::Predicate {
            key: k,
            cmp: Cmp::Eq,
            value: Some(value),
        } = alternative
        else {
            return None;
        };
        match key {
            None => key = Some(*k),
            Some(existing) if existing != *k => return None,
            Some(_) => {}
        }
        points.push(value.clone());
    }
    key.map(|k| (k, points))
}

/// Unwraps a conjunction holding a single leaf.
pub fn simplify_qnf(condition: Condition) -> Condition {
    match condition {
        Condition::And(mut children) if children.len() == 1 && children[0].is_leaf() => {
            children.remove(0)
        }
        other => other,
    }
}
