//! Query descriptors.
//!
//! A [`Query`] is assembled by the caller and validated by
//! [`Query::finalize`] into a [`FinalizedQuery`], which is what backends
//! consume. Validation happens here so that every backend sees the same
//! restrictions: inequality filters on at most one field, that field first in
//! the sort order, and `distinct` only alongside a projection.

use std::{collections::BTreeMap, fmt};

use crate::{
    cursor::Cursor,
    error::{ConfigError, DatastoreResult},
    key::Key,
    property::Property,
};

/// Comparison operator of an inequality filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InequalityOp {
    /// `<`
    LessThan,
    /// `<=`
    LessEq,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterEq,
}

impl InequalityOp {
    /// Returns the operator's filter symbol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessEq => "<=",
            Self::GreaterThan => ">",
            Self::GreaterEq => ">=",
        }
    }

    fn is_lower_bound(self) -> bool {
        matches!(self, Self::GreaterThan | Self::GreaterEq)
    }
}

impl fmt::Display for InequalityOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bound of an inequality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBound {
    /// The comparison operator.
    pub op: InequalityOp,
    /// The value compared against.
    pub value: Property,
}

/// One sort column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexColumn {
    /// Property name.
    pub property: String,
    /// Sort descending when `true`.
    pub descending: bool,
}

/// A query under construction.
///
/// # Example
///
/// ```
/// use entitystore::{Property, Query};
///
/// let fq = Query::new("Article")
///     .eq("author", Property::indexed("ada"))
///     .gte("published", Property::indexed(2016i64))
///     .order_desc("published")
///     .limit(10)
///     .finalize()
///     .unwrap();
///
/// assert_eq!(fq.ineq_filter_prop(), Some("published"));
/// assert_eq!(fq.limit(), Some(10));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    kind: String,
    eq_filters: BTreeMap<String, Vec<Property>>,
    ineq_filters: Vec<(String, QueryBound)>,
    orders: Vec<IndexColumn>,
    ancestor: Option<Key>,
    project: Vec<String>,
    distinct: bool,
    keys_only: bool,
    eventually_consistent: bool,
    limit: Option<i32>,
    offset: Option<i32>,
    start: Option<Cursor>,
    end: Option<Cursor>,
}

impl Query {
    /// Starts a query over `kind`. An empty kind queries across kinds.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Self::default() }
    }

    /// Adds an equality filter. Repeated calls on one field accumulate.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: Property) -> Self {
        self.eq_filters.entry(field.into()).or_default().push(value);
        self
    }

    fn ineq(mut self, field: impl Into<String>, op: InequalityOp, value: Property) -> Self {
        self.ineq_filters.push((field.into(), QueryBound { op, value }));
        self
    }

    /// Adds a `<` filter.
    #[must_use]
    pub fn lt(self, field: impl Into<String>, value: Property) -> Self {
        self.ineq(field, InequalityOp::LessThan, value)
    }

    /// Adds a `<=` filter.
    #[must_use]
    pub fn lte(self, field: impl Into<String>, value: Property) -> Self {
        self.ineq(field, InequalityOp::LessEq, value)
    }

    /// Adds a `>` filter.
    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: Property) -> Self {
        self.ineq(field, InequalityOp::GreaterThan, value)
    }

    /// Adds a `>=` filter.
    #[must_use]
    pub fn gte(self, field: impl Into<String>, value: Property) -> Self {
        self.ineq(field, InequalityOp::GreaterEq, value)
    }

    /// Appends an ascending sort column.
    #[must_use]
    pub fn order(mut self, field: impl Into<String>) -> Self {
        self.orders.push(IndexColumn { property: field.into(), descending: false });
        self
    }

    /// Appends a descending sort column.
    #[must_use]
    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(IndexColumn { property: field.into(), descending: true });
        self
    }

    /// Restricts results to descendants of `ancestor`.
    #[must_use]
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Projects results onto the given fields.
    #[must_use]
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Deduplicates projected results.
    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Returns keys without property maps.
    #[must_use]
    pub fn keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    /// Allows reading possibly-stale index data.
    #[must_use]
    pub fn eventual_consistency(mut self, eventual: bool) -> Self {
        self.eventually_consistent = eventual;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading results.
    #[must_use]
    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Starts iteration at `cursor`.
    #[must_use]
    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    /// Ends iteration at `cursor`.
    #[must_use]
    pub fn end(mut self, cursor: Cursor) -> Self {
        self.end = Some(cursor);
        self
    }

    /// Validates the query and freezes it.
    ///
    /// Repeated bounds of the same direction keep the last one given.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MultipleInequalityFields`] if inequality filters name more than one field.
    /// - [`ConfigError::InvalidQuery`] if the first sort column is not the inequality field, if
    ///   `distinct` is set without a projection, if a projection is combined with keys-only, or if
    ///   limit/offset is negative.
    pub fn finalize(self) -> DatastoreResult<FinalizedQuery> {
        let mut fields: Vec<String> = Vec::new();
        for (field, _) in &self.ineq_filters {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        if fields.len() > 1 {
            return Err(ConfigError::MultipleInequalityFields { fields }.into());
        }

        let ineq = match fields.pop() {
            Some(field) => {
                if let Some(first) = self.orders.first()
                    && first.property != field
                {
                    return Err(invalid(format!(
                        "first sort property must be the inequality field {field:?}, got {:?}",
                        first.property
                    )));
                }
                let mut low = None;
                let mut high = None;
                for (_, bound) in self.ineq_filters {
                    if bound.op.is_lower_bound() {
                        low = Some(bound);
                    } else {
                        high = Some(bound);
                    }
                }
                Some(InequalityFilter { field, low, high })
            },
            None => None,
        };

        if self.distinct && self.project.is_empty() {
            return Err(invalid("distinct requires a projection"));
        }
        if self.keys_only && !self.project.is_empty() {
            return Err(invalid("keys-only queries cannot project fields"));
        }
        if self.limit.is_some_and(|l| l < 0) || self.offset.is_some_and(|o| o < 0) {
            return Err(invalid("limit and offset must be non-negative"));
        }

        Ok(FinalizedQuery {
            kind: self.kind,
            eq_filters: self.eq_filters,
            ineq,
            orders: self.orders,
            ancestor: self.ancestor,
            project: self.project,
            distinct: self.distinct,
            keys_only: self.keys_only,
            eventually_consistent: self.eventually_consistent,
            limit: self.limit,
            offset: self.offset,
            start: self.start,
            end: self.end,
        })
    }
}

fn invalid(reason: impl Into<String>) -> crate::DatastoreError {
    ConfigError::InvalidQuery { reason: reason.into() }.into()
}

#[derive(Debug, Clone, PartialEq)]
struct InequalityFilter {
    field: String,
    low: Option<QueryBound>,
    high: Option<QueryBound>,
}

/// A validated, immutable query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedQuery {
    kind: String,
    eq_filters: BTreeMap<String, Vec<Property>>,
    ineq: Option<InequalityFilter>,
    orders: Vec<IndexColumn>,
    ancestor: Option<Key>,
    project: Vec<String>,
    distinct: bool,
    keys_only: bool,
    eventually_consistent: bool,
    limit: Option<i32>,
    offset: Option<i32>,
    start: Option<Cursor>,
    end: Option<Cursor>,
}

impl FinalizedQuery {
    /// Returns the kind (empty for a kindless query).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the equality filters, field to accepted values.
    #[must_use]
    pub fn eq_filters(&self) -> &BTreeMap<String, Vec<Property>> {
        &self.eq_filters
    }

    /// Returns the inequality-filtered field, if any.
    #[must_use]
    pub fn ineq_filter_prop(&self) -> Option<&str> {
        self.ineq.as_ref().map(|i| i.field.as_str())
    }

    /// Returns the lower bound of the inequality filter.
    #[must_use]
    pub fn ineq_filter_low(&self) -> Option<(&str, &QueryBound)> {
        self.ineq.as_ref().and_then(|i| i.low.as_ref().map(|b| (i.field.as_str(), b)))
    }

    /// Returns the upper bound of the inequality filter.
    #[must_use]
    pub fn ineq_filter_high(&self) -> Option<(&str, &QueryBound)> {
        self.ineq.as_ref().and_then(|i| i.high.as_ref().map(|b| (i.field.as_str(), b)))
    }

    /// Returns the sort columns.
    #[must_use]
    pub fn orders(&self) -> &[IndexColumn] {
        &self.orders
    }

    /// Returns the ancestor restriction.
    #[must_use]
    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    /// Returns the projected fields (empty when not projecting).
    #[must_use]
    pub fn project(&self) -> &[String] {
        &self.project
    }

    /// Returns whether projected results are deduplicated.
    #[must_use]
    pub fn distinct(&self) -> bool {
        self.distinct
    }

    /// Returns whether only keys are returned.
    #[must_use]
    pub fn keys_only(&self) -> bool {
        self.keys_only
    }

    /// Returns whether stale index reads are allowed.
    #[must_use]
    pub fn eventually_consistent(&self) -> bool {
        self.eventually_consistent
    }

    /// Returns the result limit.
    #[must_use]
    pub fn limit(&self) -> Option<i32> {
        self.limit
    }

    /// Returns the result offset.
    #[must_use]
    pub fn offset(&self) -> Option<i32> {
        self.offset
    }

    /// Returns the start and end cursors.
    #[must_use]
    pub fn bounds(&self) -> (Option<&Cursor>, Option<&Cursor>) {
        (self.start.as_ref(), self.end.as_ref())
    }
}
