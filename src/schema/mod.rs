//! Relation types, relation indexes and the schema lookup used by the query compiler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::types::{
    Cardinality, Direction, Multiplicity, Order, SchemaStatus, TypeId, ValueKind,
};

/// Whether a relation type describes properties or edges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Values attached to one vertex.
    PropertyKey,
    /// Connections between two vertices.
    EdgeLabel,
}

impl RelationKind {
    /// Name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::PropertyKey => "a property key",
            RelationKind::EdgeLabel => "an edge label",
        }
    }
}

/// Keys every relation has without declaring them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImplicitKey {
    /// The relation id.
    Id,
    /// The relation type.
    Label,
    /// The vertex on the other end of an edge.
    AdjacentId,
}

impl ImplicitKey {
    /// All implicit keys.
    pub const ALL: [ImplicitKey; 3] = [ImplicitKey::Id, ImplicitKey::Label, ImplicitKey::AdjacentId];

    /// Reserved type id.
    pub fn type_id(self) -> TypeId {
        match self {
            ImplicitKey::Id => TypeId(1),
            ImplicitKey::Label => TypeId(2),
            ImplicitKey::AdjacentId => TypeId(3),
        }
    }

    /// Reserved name.
    pub fn name(self) -> &'static str {
        match self {
            ImplicitKey::Id => "~id",
            ImplicitKey::Label => "~label",
            ImplicitKey::AdjacentId => "~adjacent",
        }
    }

    /// Maps a reserved type id back to its key.
    pub fn from_type_id(id: TypeId) -> Option<ImplicitKey> {
        Self::ALL.into_iter().find(|key| key.type_id() == id)
    }
}

/// A property key, edge label or relation index.
///
/// Relation indexes are relation types whose [`index_of`](Self::index_of) names the
/// indexed type; they share its kind and store a second copy of every relation
/// ordered by their own sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationType {
    /// Type id.
    pub id: TypeId,
    /// Unique name.
    pub name: String,
    /// Property key or edge label.
    pub kind: RelationKind,
    /// Declared value kind of a property key.
    pub data_type: Option<ValueKind>,
    /// Multiplicity per vertex and direction.
    pub multiplicity: Multiplicity,
    /// `Both` for bidirected edges, otherwise the single stored direction.
    pub directionality: Direction,
    /// Property keys ordering relations of this type within a row.
    pub sort_key: Vec<TypeId>,
    /// Order of the sort-key components.
    pub sort_order: Order,
    /// Lifecycle status.
    pub status: SchemaStatus,
    /// True for the built-in implicit keys.
    pub implicit: bool,
    /// Indexes defined over this type, in definition order.
    pub indexes: Vec<TypeId>,
    /// The indexed type, if this is an index.
    pub index_of: Option<TypeId>,
}

impl RelationType {
    /// Returns true for property keys.
    pub fn is_property_key(&self) -> bool {
        self.kind == RelationKind::PropertyKey
    }

    /// Returns true for edge labels.
    pub fn is_edge_label(&self) -> bool {
        self.kind == RelationKind::EdgeLabel
    }

    /// Returns true if relations of this type are stored for `dir` only.
    pub fn is_unidirected(&self, dir: Direction) -> bool {
        self.directionality == dir
    }

    /// Returns true if this type is stored in direction `dir`.
    pub fn stores_direction(&self, dir: Direction) -> bool {
        self.directionality.contains(dir)
    }

    /// Returns true for relation indexes.
    pub fn is_index(&self) -> bool {
        self.index_of.is_some()
    }

    /// Returns true for system types.
    pub fn is_system(&self) -> bool {
        self.id.is_system()
    }
}

/// Type lookup consumed by query compilation and the relation codec.
pub trait SchemaProvider: Send + Sync {
    /// Resolves a type by name.
    fn relation_type(&self, name: &str) -> Option<Arc<RelationType>>;
    /// Resolves a type by id.
    fn relation_type_by_id(&self, id: TypeId) -> Option<Arc<RelationType>>;
}

/// Declaration of a property key or edge label for [`InMemorySchema::define`].
#[derive(Clone, Debug)]
pub struct TypeDef {
    name: String,
    kind: RelationKind,
    data_type: Option<ValueKind>,
    multiplicity: Multiplicity,
    directionality: Direction,
    sort_key: Vec<String>,
    sort_order: Order,
    status: SchemaStatus,
    system: bool,
}

impl TypeDef {
    /// A single-valued property key holding values of `data_type`.
    pub fn property_key(name: impl Into<String>, data_type: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::PropertyKey,
            data_type: Some(data_type),
            multiplicity: Multiplicity::ManyToOne,
            directionality: Direction::Out,
            sort_key: Vec::new(),
            sort_order: Order::Asc,
            status: SchemaStatus::Enabled,
            system: false,
        }
    }

    /// A bidirected multi-edge label.
    pub fn edge_label(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::EdgeLabel,
            data_type: None,
            multiplicity: Multiplicity::Multi,
            directionality: Direction::Both,
            sort_key: Vec::new(),
            sort_order: Order::Asc,
            status: SchemaStatus::Enabled,
            system: false,
        }
    }

    /// Sets the multiplicity.
    pub fn multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    /// Sets the multiplicity of a property key from its cardinality.
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.multiplicity = cardinality.into();
        self
    }

    /// Sets the sort key by property-key name.
    pub fn sort_key(mut self, keys: &[&str]) -> Self {
        self.sort_key = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    /// Sets the sort order.
    pub fn sort_order(mut self, order: Order) -> Self {
        self.sort_order = order;
        self
    }

    /// Stores the edge in the out direction only.
    pub fn unidirected(mut self) -> Self {
        self.directionality = Direction::Out;
        self
    }

    /// Sets the lifecycle status.
    pub fn status(mut self, status: SchemaStatus) -> Self {
        self.status = status;
        self
    }

    /// Allocates the type in the system id range.
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

const FIRST_SYSTEM_ID: u32 = 16;

struct SchemaTables {
    by_name: HashMap<String, Arc<RelationType>>,
    by_id: FxHashMap<TypeId, Arc<RelationType>>,
    next_user: u32,
    next_system: u32,
}

impl SchemaTables {
    fn insert(&mut self, ty: RelationType) -> Arc<RelationType> {
        let ty = Arc::new(ty);
        self.by_name.insert(ty.name.clone(), ty.clone());
        self.by_id.insert(ty.id, ty.clone());
        ty
    }

    fn allocate(&mut self, system: bool) -> Result<TypeId> {
        let slot = if system {
            &mut self.next_system
        } else {
            &mut self.next_user
        };
        let id = *slot;
        if system && id >= TypeId::SYSTEM_LIMIT {
            return Err(GraphError::Invalid("system type id space exhausted"));
        }
        *slot = id
            .checked_add(1)
            .ok_or(GraphError::Invalid("type id space exhausted"))?;
        Ok(TypeId(id))
    }

    fn resolve_sort_key(&self, keys: &[String]) -> Result<Vec<TypeId>> {
        keys.iter()
            .map(|name| {
                let ty = self.by_name.get(name).ok_or_else(|| {
                    GraphError::InvalidOwned(format!("unknown sort key {name}"))
                })?;
                if !ty.is_property_key() || ty.implicit {
                    return Err(GraphError::InvalidOwned(format!(
                        "sort key {name} must be a declared property key"
                    )));
                }
                Ok(ty.id)
            })
            .collect()
    }
}

/// Schema held in memory.
///
/// The implicit keys are registered on construction; user types get ids from
/// [`TypeId::SYSTEM_LIMIT`] upwards.
pub struct InMemorySchema {
    tables: RwLock<SchemaTables>,
}

impl InMemorySchema {
    /// Creates a schema containing only the implicit keys.
    pub fn new() -> Self {
        let mut tables = SchemaTables {
            by_name: HashMap::new(),
            by_id: FxHashMap::default(),
            next_user: TypeId::SYSTEM_LIMIT,
            next_system: FIRST_SYSTEM_ID,
        };
        for key in ImplicitKey::ALL {
            let data_type = match key {
                ImplicitKey::AdjacentId => ValueKind::Vertex,
                ImplicitKey::Id | ImplicitKey::Label => ValueKind::Int,
            };
            tables.insert(RelationType {
                id: key.type_id(),
                name: key.name().to_owned(),
                kind: RelationKind::PropertyKey,
                data_type: Some(data_type),
                multiplicity: Multiplicity::ManyToOne,
                directionality: Direction::Out,
                sort_key: Vec::new(),
                sort_order: Order::Asc,
                status: SchemaStatus::Enabled,
                implicit: true,
                indexes: Vec::new(),
                index_of: None,
            });
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Defines a property key or edge label.
    pub fn define(&self, def: TypeDef) -> Result<Arc<RelationType>> {
        let mut tables = self.tables.write();
        if tables.by_name.contains_key(&def.name) {
            return Err(GraphError::InvalidOwned(format!(
                "relation type {} already defined",
                def.name
            )));
        }
        if def.kind == RelationKind::PropertyKey && def.directionality != Direction::Out {
            return Err(GraphError::Invalid("property keys are stored out only"));
        }
        let sort_key = tables.resolve_sort_key(&def.sort_key)?;
        let id = tables.allocate(def.system)?;
        debug!(name = %def.name, id = id.0, "schema.define");
        Ok(tables.insert(RelationType {
            id,
            name: def.name,
            kind: def.kind,
            data_type: def.data_type,
            multiplicity: def.multiplicity,
            directionality: def.directionality,
            sort_key,
            sort_order: def.sort_order,
            status: def.status,
            implicit: false,
            indexes: Vec::new(),
            index_of: None,
        }))
    }

    /// Builder-style [`define`](Self::define).
    pub fn with_type(self, def: TypeDef) -> Result<Self> {
        self.define(def)?;
        Ok(self)
    }

    /// Defines a relation index `name` over the type `of`.
    pub fn define_index(
        &self,
        of: &str,
        name: &str,
        sort_key: &[&str],
        direction: Direction,
        order: Order,
        status: SchemaStatus,
    ) -> Result<Arc<RelationType>> {
        let mut tables = self.tables.write();
        let base = tables
            .by_name
            .get(of)
            .cloned()
            .ok_or(GraphError::NotFound("indexed relation type"))?;
        if base.implicit || base.is_index() {
            return Err(GraphError::InvalidOwned(format!("{of} cannot be indexed")));
        }
        if tables.by_name.contains_key(name) {
            return Err(GraphError::InvalidOwned(format!(
                "relation type {name} already defined"
            )));
        }
        if !base.stores_direction(direction) || (base.is_property_key() && direction != Direction::Out)
        {
            return Err(GraphError::InvalidOwned(format!(
                "index {name} direction {} incompatible with {of}",
                direction.as_str()
            )));
        }
        let keys: Vec<String> = sort_key.iter().map(|k| (*k).to_owned()).collect();
        let sort_key = tables.resolve_sort_key(&keys)?;
        let id = tables.allocate(base.is_system())?;
        let index = tables.insert(RelationType {
            id,
            name: name.to_owned(),
            kind: base.kind,
            data_type: base.data_type,
            multiplicity: Multiplicity::Multi,
            directionality: direction,
            sort_key,
            sort_order: order,
            status,
            implicit: false,
            indexes: Vec::new(),
            index_of: Some(base.id),
        });
        let mut updated = (*base).clone();
        updated.indexes.push(id);
        tables.insert(updated);
        debug!(name, of, id = id.0, "schema.define_index");
        Ok(index)
    }

    /// Changes the status of a type or index.
    pub fn set_status(&self, name: &str, status: SchemaStatus) -> Result<()> {
        let mut tables = self.tables.write();
        let current = tables
            .by_name
            .get(name)
            .cloned()
            .ok_or(GraphError::NotFound("relation type"))?;
        let mut updated = (*current).clone();
        updated.status = status;
        tables.insert(updated);
        Ok(())
    }
}

impl Default for InMemorySchema {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaProvider for InMemorySchema {
    fn relation_type(&self, name: &str) -> Option<Arc<RelationType>> {
        self.tables.read().by_name.get(name).cloned()
    }

    fn relation_type_by_id(&self, id: TypeId) -> Option<Arc<RelationType>> {
        self.tables.read().by_id.get(&id).cloned()
    }
}
