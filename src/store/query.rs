use serde_json::Value as JsonValue;

/// Scalar compared against a stored column.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Str(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Str(v)
    }
}

impl From<&String> for QueryValue {
    fn from(v: &String) -> Self {
        QueryValue::Str(v.clone())
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Int(v)
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::Int(v as i64)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

impl QueryValue {
    fn cmp_json(
        &self,
        v: &JsonValue,
    ) -> Option<std::cmp::Ordering> {
        match (self, v) {
            (QueryValue::Str(a), JsonValue::String(b)) => Some(b.as_str().cmp(a.as_str())),
            (QueryValue::Int(a), JsonValue::Number(b)) => b.as_i64().map(|b| b.cmp(a)),
            (QueryValue::Bool(a), JsonValue::Bool(b)) => Some(b.cmp(a)),
            _ => None,
        }
    }
}

/// Predicate on a single column; the stored value is the left operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(QueryValue),
    Ne(QueryValue),
    Lt(QueryValue),
    Le(QueryValue),
    Gt(QueryValue),
    Ge(QueryValue),
    In(Vec<QueryValue>),
}

impl Cond {
    pub fn eq<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Eq(v.into())
    }

    pub fn ne<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Ne(v.into())
    }

    pub fn lt<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Lt(v.into())
    }

    pub fn le<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Le(v.into())
    }

    pub fn gt<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Gt(v.into())
    }

    pub fn ge<V: Into<QueryValue>>(v: V) -> Self {
        Cond::Ge(v.into())
    }

    pub fn is_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryValue>,
    {
        Cond::In(values.into_iter().map(Into::into).collect())
    }

    /// Evaluates the predicate against a document field, `None` when the field is missing.
    pub fn matches(
        &self,
        value: Option<&JsonValue>,
    ) -> bool {
        use std::cmp::Ordering::*;

        let Some(value) = value else {
            return matches!(self, Cond::Ne(_));
        };
        match self {
            Cond::Eq(v) => v.cmp_json(value) == Some(Equal),
            Cond::Ne(v) => v.cmp_json(value) != Some(Equal),
            Cond::Lt(v) => v.cmp_json(value) == Some(Less),
            Cond::Le(v) => matches!(v.cmp_json(value), Some(Less | Equal)),
            Cond::Gt(v) => v.cmp_json(value) == Some(Greater),
            Cond::Ge(v) => matches!(v.cmp_json(value), Some(Greater | Equal)),
            Cond::In(values) => values.iter().any(|v| v.cmp_json(value) == Some(Equal)),
        }
    }
}

/// Filter, order and page over a collection. Filters are AND-ed.
#[derive(Debug, Clone)]
pub struct Query {
    filters: Vec<(String, Cond)>,
    order_by: Vec<(String, bool)>,
    limit: usize,
    offset: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: 10_000,
            offset: 0,
        }
    }

    pub fn filter(
        mut self,
        key: &str,
        cond: Cond,
    ) -> Self {
        self.filters.push((key.to_string(), cond));
        self
    }

    /// Adds a sort key, `rev = true` for descending.
    pub fn sort(
        mut self,
        key: &str,
        rev: bool,
    ) -> Self {
        self.order_by.push((key.to_string(), rev));
        self
    }

    pub fn set_limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn set_offset(
        mut self,
        offset: usize,
    ) -> Self {
        self.offset = offset;
        self
    }

    pub fn filters(&self) -> &[(String, Cond)] {
        &self.filters
    }

    pub fn order_by(&self) -> &[(String, bool)] {
        &self.order_by
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}
