//! Value intervals used to describe sort-key constraints.

use std::cmp::Ordering;
use std::ops::Bound;

use crate::types::Value;

/// A set of values: either discrete points or a contiguous range.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Interval {
    /// Sorted, deduplicated points. No points means the empty interval.
    Points(Vec<Value>),
    /// Values between two bounds.
    Range {
        /// Lower bound.
        start: Bound<Value>,
        /// Upper bound.
        end: Bound<Value>,
    },
}

impl Interval {
    /// The single value `value`.
    pub fn point(value: Value) -> Self {
        Interval::Points(vec![value])
    }

    /// The given values.
    pub fn points(values: impl IntoIterator<Item = Value>) -> Self {
        let mut points: Vec<Value> = values.into_iter().collect();
        points.sort();
        points.dedup();
        Interval::Points(points)
    }

    /// Values between `start` and `end`; an inclusive range over one value is a point.
    pub fn range(start: Bound<Value>, end: Bound<Value>) -> Self {
        match (start, end) {
            (Bound::Included(a), Bound::Included(b)) if a == b => Interval::point(a),
            (start, end) => Interval::Range { start, end },
        }
    }

    /// Every value.
    pub fn all() -> Self {
        Interval::Range {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Returns true if no value lies in the interval.
    pub fn is_empty(&self) -> bool {
        match self {
            Interval::Points(points) => points.is_empty(),
            Interval::Range { start, end } => match (start, end) {
                (Bound::Included(a), Bound::Included(b)) => a > b,
                (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
                    a >= b
                }
                _ => false,
            },
        }
    }

    /// Returns true for point intervals.
    pub fn is_points(&self) -> bool {
        matches!(self, Interval::Points(_))
    }

    /// The points of a point interval.
    pub fn as_points(&self) -> Option<&[Value]> {
        match self {
            Interval::Points(points) => Some(points),
            Interval::Range { .. } => None,
        }
    }

    /// Returns true unless this is a range without an upper bound.
    pub fn has_end(&self) -> bool {
        !matches!(
            self,
            Interval::Range {
                end: Bound::Unbounded,
                ..
            }
        )
    }

    /// Returns true if `value` lies in the interval.
    pub fn contains(&self, value: &Value) -> bool {
        match self {
            Interval::Points(points) => points.binary_search(value).is_ok(),
            Interval::Range { start, end } => {
                let above = match start {
                    Bound::Included(s) => value >= s,
                    Bound::Excluded(s) => value > s,
                    Bound::Unbounded => true,
                };
                let below = match end {
                    Bound::Included(e) => value <= e,
                    Bound::Excluded(e) => value < e,
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }

    /// The values in both intervals.
    pub fn intersect(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Points(a), Interval::Points(b)) => {
                Interval::Points(a.iter().filter(|v| b.binary_search(v).is_ok()).cloned().collect())
            }
            (Interval::Points(points), range) | (range, Interval::Points(points)) => {
                Interval::Points(points.iter().filter(|v| range.contains(v)).cloned().collect())
            }
            (
                Interval::Range { start: s1, end: e1 },
                Interval::Range { start: s2, end: e2 },
            ) => Interval::range(tighter_start(s1, s2), tighter_end(e1, e2)),
        }
    }

    /// The bounds of a range, or `None` for points.
    pub fn bounds(&self) -> Option<(Bound<Value>, Bound<Value>)> {
        match self {
            Interval::Range { start, end } => Some((start.clone(), end.clone())),
            Interval::Points(_) => None,
        }
    }
}

fn tighter_start(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                Ordering::Greater => a.clone(),
                Ordering::Less => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}

fn tighter_end(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.cmp(y) {
                Ordering::Less => a.clone(),
                Ordering::Greater => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}
