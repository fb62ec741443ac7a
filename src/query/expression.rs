//! Query expression model
//!
//! An `Expression` is a boolean tree over series leaves; each leaf may carry a
//! `Filter` evaluated against that series' points.
//!
//! ```text
//!            OR
//!          /    \
//!        AND     root.sg.d2.s1 [value <= 3.5]
//!       /   \
//!  root.sg.d1.s1   root.sg.d1.s2
//!  [value > 10]    [time >= 100]
//! ```

use crate::schema::{SeriesPath, TimeValuePair, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
}

impl Operator {
    /// Parse from a symbol such as `>=`
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// True if `lhs <op> rhs` holds given `lhs.cmp(rhs)`
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }

    /// The operator accepting exactly what `self` rejects
    pub fn negate(&self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Lte,
            Self::Gte => Self::Lt,
            Self::Lt => Self::Gte,
            Self::Lte => Self::Gt,
        }
    }
}

/// Predicate over the points of one series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Time(Operator, i64),
    Value(Operator, Value),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn time(op: Operator, timestamp: i64) -> Self {
        Self::Time(op, timestamp)
    }

    pub fn value(op: Operator, value: Value) -> Self {
        Self::Value(op, value)
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate the predicate on one point
    ///
    /// Comparing values of incompatible types never matches.
    pub fn satisfy(&self, point: &TimeValuePair) -> bool {
        match self {
            Self::Time(op, t) => op.matches(point.timestamp.cmp(t)),
            Self::Value(op, v) => point.value.compare(v).is_some_and(|o| op.matches(o)),
            Self::And(l, r) => l.satisfy(point) && r.satisfy(point),
            Self::Or(l, r) => l.satisfy(point) || r.satisfy(point),
            Self::Not(inner) => !inner.satisfy(point),
        }
    }

    /// Conservatively decide whether any point in `[start, end]` could match
    ///
    /// Only time predicates can rule a range out.
    pub fn may_match_time_range(&self, start: i64, end: i64) -> bool {
        match self {
            Self::Time(op, t) => match op {
                Operator::Eq => start <= *t && *t <= end,
                Operator::Ne => !(start == end && start == *t),
                Operator::Gt => end > *t,
                Operator::Gte => end >= *t,
                Operator::Lt => start < *t,
                Operator::Lte => start <= *t,
            },
            Self::Value(..) => true,
            Self::And(l, r) => l.may_match_time_range(start, end) && r.may_match_time_range(start, end),
            Self::Or(l, r) => l.may_match_time_range(start, end) || r.may_match_time_range(start, end),
            Self::Not(inner) => match inner.as_ref() {
                Self::Time(op, t) => Self::Time(op.negate(), *t).may_match_time_range(start, end),
                Self::Not(twice) => twice.may_match_time_range(start, end),
                _ => true,
            },
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(op, t) => write!(f, "time {} {}", op.symbol(), t),
            Self::Value(op, Value::Text(s)) => write!(f, "value {} '{}'", op.symbol(), s),
            Self::Value(op, v) => write!(f, "value {} {}", op.symbol(), v),
            Self::And(l, r) => write!(f, "({} AND {})", l, r),
            Self::Or(l, r) => write!(f, "({} OR {})", l, r),
            Self::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

/// Boolean expression over series leaves
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// Points of one series, optionally filtered
    Series {
        path: SeriesPath,
        filter: Option<Filter>,
    },
    /// Timestamps present in both children
    And(Box<Expression>, Box<Expression>),
    /// Timestamps present in either child
    Or(Box<Expression>, Box<Expression>),
    /// Time predicate not bound to a series
    GlobalTime(Filter),
}

impl Expression {
    pub fn series(path: SeriesPath, filter: Option<Filter>) -> Self {
        Self::Series { path, filter }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    /// Distinct series paths of all leaves, in order of first appearance
    pub fn series_paths(&self) -> Vec<SeriesPath> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths(&self, out: &mut Vec<SeriesPath>) {
        match self {
            Self::Series { path, .. } => {
                if !out.contains(path) {
                    out.push(path.clone());
                }
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_paths(out);
                r.collect_paths(out);
            }
            Self::GlobalTime(_) => {}
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Series { path, filter: Some(filter) } => write!(f, "{}[{}]", path, filter),
            Self::Series { path, filter: None } => write!(f, "{}", path),
            Self::And(l, r) => write!(f, "({} AND {})", l, r),
            Self::Or(l, r) => write!(f, "({} OR {})", l, r),
            Self::GlobalTime(filter) => write!(f, "{}", filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(t: i64, v: i64) -> TimeValuePair {
        TimeValuePair::new(t, Value::Int64(v))
    }

    #[test]
    fn test_operator_negate_is_complement() {
        for op in [
            Operator::Eq,
            Operator::Ne,
            Operator::Gt,
            Operator::Gte,
            Operator::Lt,
            Operator::Lte,
        ] {
            for ordering in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_ne!(op.matches(ordering), op.negate().matches(ordering));
            }
            assert_eq!(Operator::from_symbol(op.symbol()), Some(op));
        }
    }

    #[test]
    fn test_satisfy() {
        let filter = Filter::time(Operator::Gte, 100).and(Filter::value(Operator::Gt, Value::Int32(10)));
        assert!(filter.satisfy(&point(100, 11)));
        assert!(!filter.satisfy(&point(99, 11)));
        assert!(!filter.satisfy(&point(100, 10)));

        let negated = filter.clone().negate();
        assert!(negated.satisfy(&point(99, 11)));

        let text = Filter::value(Operator::Eq, Value::Text("on".into()));
        assert!(!text.satisfy(&point(1, 1)));
        assert!(text.satisfy(&TimeValuePair::new(1, Value::Text("on".into()))));
    }

    #[test]
    fn test_may_match_time_range() {
        let gte = Filter::time(Operator::Gte, 100);
        assert!(gte.may_match_time_range(50, 100));
        assert!(!gte.may_match_time_range(0, 99));

        let lt = Filter::time(Operator::Lt, 100);
        assert!(lt.may_match_time_range(99, 200));
        assert!(!lt.may_match_time_range(100, 200));

        let window = Filter::time(Operator::Gt, 10).and(Filter::time(Operator::Lte, 20));
        assert!(window.may_match_time_range(15, 30));
        assert!(!window.may_match_time_range(21, 30));
        assert!(!window.may_match_time_range(0, 10));

        // Value predicates can't exclude a range
        let mixed = Filter::time(Operator::Lt, 5).or(Filter::value(Operator::Gt, Value::Int64(1)));
        assert!(mixed.may_match_time_range(100, 200));

        // NOT time >= 100 behaves like time < 100
        let not_gte = gte.negate();
        assert!(!not_gte.may_match_time_range(100, 200));
        assert!(not_gte.may_match_time_range(99, 200));

        assert!(!Filter::time(Operator::Eq, 7).may_match_time_range(8, 9));
        assert!(!Filter::time(Operator::Ne, 7).may_match_time_range(7, 7));
    }

    #[test]
    fn test_series_paths_distinct() {
        let a = SeriesPath::parse("root.sg.d1.s1").unwrap();
        let b = SeriesPath::parse("root.sg.d1.s2").unwrap();
        let expr = Expression::or(
            Expression::and(
                Expression::series(a.clone(), None),
                Expression::series(b.clone(), None),
            ),
            Expression::series(a.clone(), Some(Filter::time(Operator::Gt, 0))),
        );
        assert_eq!(expr.series_paths(), vec![a, b]);
        assert_eq!(
            expr.to_string(),
            "((root.sg.d1.s1 AND root.sg.d1.s2) OR root.sg.d1.s1[time > 0])"
        );
    }
}
