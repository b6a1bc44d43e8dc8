//! Store-agnostic query fragments produced by criterion translation.
//!
//! Query objects are field/operator/value trees; the store implementation
//! decides how to apply them (the bundled JSON-file store evaluates them in
//! memory, a document store would compile them to its native syntax).

use chrono::NaiveDate;
use regex::Regex;

/// A typed constraint value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Bool(bool),
    Int(i64),
    Date(NaiveDate),
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value::String(val.to_owned())
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Value::Bool(val)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::Int(val)
    }
}

impl From<NaiveDate> for Value {
    fn from(val: NaiveDate) -> Self {
        Value::Date(val)
    }
}

/// A single-field constraint.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Field equals the value.
    Eq(Value),
    /// Field value is one of the given strings.
    In(Vec<String>),
    /// Field value is none of the given strings (missing values pass).
    NotIn(Vec<String>),
    /// Field value matches the given regular expression.
    Matches(Regex),
    /// Ordered comparisons (dates and integers).
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Field presence check.
    Exists(bool),
}

/// One `(field, constraint)` clause in record vocabulary.
#[derive(Debug, Clone)]
pub struct FieldClause {
    /// Record-vocabulary field name, e.g. `TRUE_HUGO_SYMBOL`.
    pub field: String,
    /// The constraint on the field.
    pub constraint: Constraint,
}

/// A query fragment tree.
#[derive(Debug, Clone)]
pub enum Query {
    /// All sub-queries must hold; the empty conjunction matches everything.
    All(Vec<Query>),
    /// At least one sub-query must hold.
    Any(Vec<Query>),
    /// A single field constraint.
    Clause(FieldClause),
}

impl Query {
    /// Convenience constructor for a single clause.
    pub fn clause(field: impl Into<String>, constraint: Constraint) -> Self {
        Query::Clause(FieldClause {
            field: field.into(),
            constraint,
        })
    }

    /// The conjunction matching every record.
    pub fn everything() -> Self {
        Query::All(Vec::new())
    }
}

/// Field access by record-vocabulary name, implemented by the record types.
pub trait FieldLookup {
    /// Return the typed value of the named field, or `None` if absent.
    fn field(&self, name: &str) -> Option<Value>;
}

impl Constraint {
    /// Whether the given (possibly absent) field value satisfies the
    /// constraint.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Constraint::Eq(expected) => actual == Some(expected),
            Constraint::In(choices) => match actual {
                Some(Value::String(s)) => choices.iter().any(|c| c == s),
                _ => false,
            },
            Constraint::NotIn(choices) => match actual {
                Some(Value::String(s)) => !choices.iter().any(|c| c == s),
                _ => true,
            },
            Constraint::Matches(re) => match actual {
                Some(Value::String(s)) => re.is_match(s),
                _ => false,
            },
            Constraint::Gt(bound) => cmp_ordered(actual, bound)
                .map(|ord| ord == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Constraint::Gte(bound) => cmp_ordered(actual, bound)
                .map(|ord| ord != std::cmp::Ordering::Less)
                .unwrap_or(false),
            Constraint::Lt(bound) => cmp_ordered(actual, bound)
                .map(|ord| ord == std::cmp::Ordering::Less)
                .unwrap_or(false),
            Constraint::Lte(bound) => cmp_ordered(actual, bound)
                .map(|ord| ord != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Constraint::Exists(expected) => actual.is_some() == *expected,
        }
    }
}

/// Compare an actual field value against an ordered bound of the same type.
fn cmp_ordered(actual: Option<&Value>, bound: &Value) -> Option<std::cmp::Ordering> {
    match (actual?, bound) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Evaluate a query fragment against one record.
pub fn eval_query<R: FieldLookup>(query: &Query, record: &R) -> bool {
    match query {
        Query::All(subs) => subs.iter().all(|sub| eval_query(sub, record)),
        Query::Any(subs) => subs.iter().any(|sub| eval_query(sub, record)),
        Query::Clause(clause) => clause
            .constraint
            .matches(record.field(&clause.field).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRecord;

    impl FieldLookup for FakeRecord {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "GENE" => Some(Value::from("BRAF")),
                "TIER" => Some(Value::Int(2)),
                "WILDTYPE" => Some(Value::Bool(false)),
                _ => None,
            }
        }
    }

    #[test]
    fn eq_and_exists() {
        assert!(eval_query(
            &Query::clause("GENE", Constraint::Eq(Value::from("BRAF"))),
            &FakeRecord
        ));
        assert!(eval_query(
            &Query::clause("MISSING", Constraint::Exists(false)),
            &FakeRecord
        ));
        assert!(!eval_query(
            &Query::clause("GENE", Constraint::Exists(false)),
            &FakeRecord
        ));
    }

    #[test]
    fn not_in_passes_on_missing_field() {
        let query = Query::clause("MISSING", Constraint::NotIn(vec!["x".to_owned()]));
        assert!(eval_query(&query, &FakeRecord));
    }

    #[test]
    fn ordered_comparison_on_ints() {
        assert!(eval_query(
            &Query::clause("TIER", Constraint::Lte(Value::Int(2))),
            &FakeRecord
        ));
        assert!(!eval_query(
            &Query::clause("TIER", Constraint::Lt(Value::Int(2))),
            &FakeRecord
        ));
    }

    #[test]
    fn empty_conjunction_matches_everything() {
        assert!(eval_query(&Query::everything(), &FakeRecord));
    }

    #[test]
    fn any_is_union_of_clauses() {
        let query = Query::Any(vec![
            Query::clause("GENE", Constraint::Eq(Value::from("KRAS"))),
            Query::clause("TIER", Constraint::Eq(Value::Int(2))),
        ]);
        assert!(eval_query(&query, &FakeRecord));
    }
}
