//! Identifier newtypes and small enums shared by the schema, query and storage layers.

use serde::{Deserialize, Serialize};

mod value;

pub use value::{compare_values, Value, ValueKind};

/// Identifier of a vertex (or one physical representative of a partitioned vertex).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VertexId(pub u64);

/// Identifier of a relation (edge or property).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RelationId(pub u64);

/// Identifier of a relation type, relation index or implicit key.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Type ids below this bound belong to system types.
    pub const SYSTEM_LIMIT: u32 = 1024;

    /// Returns true for system types (hidden from user-visible queries).
    pub fn is_system(self) -> bool {
        self.0 < Self::SYSTEM_LIMIT
    }
}

/// Direction of a relation relative to a vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The vertex is the out-vertex.
    Out,
    /// The vertex is the in-vertex.
    In,
    /// Either endpoint.
    Both,
}

impl Direction {
    /// The two concrete directions.
    pub const PROPER: [Direction; 2] = [Direction::Out, Direction::In];

    /// Returns true if `self` admits `other`.
    pub fn contains(self, other: Direction) -> bool {
        self == Direction::Both || self == other
    }

    /// Flips `Out` and `In`; `Both` is its own opposite.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }

    /// Short lowercase name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
            Direction::Both => "both",
        }
    }
}

/// How many relations of a type may exist per vertex and direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Any number of relations, including parallel ones between the same vertices.
    Multi,
    /// At most one relation per pair of vertices (or per value for properties).
    Simple,
    /// At most one outgoing relation per vertex.
    ManyToOne,
    /// At most one incoming relation per vertex.
    OneToMany,
    /// At most one relation in either direction.
    OneToOne,
}

impl Multiplicity {
    /// Returns true if at most one relation of this multiplicity exists per vertex in `dir`.
    pub fn is_unique(self, dir: Direction) -> bool {
        match dir {
            Direction::In => matches!(self, Multiplicity::OneToMany | Multiplicity::OneToOne),
            Direction::Out => matches!(self, Multiplicity::ManyToOne | Multiplicity::OneToOne),
            Direction::Both => self == Multiplicity::OneToOne,
        }
    }

    /// Returns true for every multiplicity except [`Multiplicity::Multi`].
    pub fn is_constrained(self) -> bool {
        self != Multiplicity::Multi
    }
}

/// Property-key cardinality, mapped onto [`Multiplicity`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// One value per vertex.
    Single,
    /// Any number of values, duplicates allowed.
    List,
    /// Any number of distinct values.
    Set,
}

impl From<Cardinality> for Multiplicity {
    fn from(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => Multiplicity::ManyToOne,
            Cardinality::List => Multiplicity::Multi,
            Cardinality::Set => Multiplicity::Simple,
        }
    }
}

/// Lifecycle status of a schema element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaStatus {
    /// Created but not yet known to every instance.
    Installed,
    /// Known everywhere, still being built.
    Registered,
    /// Usable for reads and writes.
    Enabled,
    /// No longer maintained.
    Disabled,
}

/// What a vertex-centric query returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationCategory {
    /// Edges only.
    Edge,
    /// Properties only.
    Property,
    /// Edges and properties.
    Relation,
}

impl RelationCategory {
    /// Lowercase name for messages.
    pub fn as_str(self) -> &'static str {
        match self {
            RelationCategory::Edge => "edges",
            RelationCategory::Property => "properties",
            RelationCategory::Relation => "relations",
        }
    }
}

/// Sort direction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// Applies the direction to an ascending comparison.
    pub fn apply(self, ord: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        }
    }
}
