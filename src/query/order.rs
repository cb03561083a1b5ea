//! Requested result orders.

use std::cmp::Ordering;

use crate::model::Relation;
use crate::types::{Order, TypeId, Value, VertexId};

/// Sort keys of a query, all in one common direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct OrderList {
    keys: Vec<TypeId>,
    order: Option<Order>,
}

impl OrderList {
    /// No ordering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key`; returns false if `order` differs from the common order.
    pub fn add(&mut self, key: TypeId, order: Order) -> bool {
        if self.order.is_some_and(|common| common != order) {
            return false;
        }
        self.order = Some(order);
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        true
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true without keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The `i`-th key.
    pub fn key(&self, i: usize) -> Option<TypeId> {
        self.keys.get(i).copied()
    }

    /// Keys in priority order.
    pub fn keys(&self) -> &[TypeId] {
        &self.keys
    }

    /// Direction shared by all keys.
    pub fn common_order(&self) -> Option<Order> {
        self.order
    }

    /// Compares two relations seen from `base`. Absent values sort as the largest value.
    pub fn compare(&self, a: &Relation, b: &Relation, base: VertexId) -> Ordering {
        let order = self.order.unwrap_or_default();
        for key in &self.keys {
            let ord = compare_nullable(a.value_of(*key, base), b.value_of(*key, base));
            if ord != Ordering::Equal {
                return order.apply(ord);
            }
        }
        Ordering::Equal
    }
}

fn compare_nullable(a: Option<Value>, b: Option<Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationId;

    #[test]
    fn mixed_directions_are_rejected() {
        let mut orders = OrderList::new();
        assert!(orders.add(TypeId(1100), Order::Desc));
        assert!(!orders.add(TypeId(1101), Order::Asc));
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn missing_values_sort_last_ascending_and_first_descending() {
        let key = TypeId(1100);
        let with = Relation::edge(RelationId(1), TypeId(2000), VertexId(1), VertexId(2))
            .with_property(key, 5i64);
        let without = Relation::edge(RelationId(2), TypeId(2000), VertexId(1), VertexId(3));
        let mut asc = OrderList::new();
        asc.add(key, Order::Asc);
        assert_eq!(asc.compare(&with, &without, VertexId(1)), Ordering::Less);
        let mut desc = OrderList::new();
        desc.add(key, Order::Desc);
        assert_eq!(desc.compare(&with, &without, VertexId(1)), Ordering::Greater);
    }
}
