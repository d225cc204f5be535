//! Equality filters, ordering and pagination for list-style reads.

use sea_orm::sea_query::Order;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select};

use crate::error::ValidationError;
use crate::fields::{self, FieldMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// `"name"` sorts ascending, `"-name"` descending.
impl From<&str> for OrderBy {
    fn from(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(spec),
        }
    }
}

/// Filters plus ordering and pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: FieldMap,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl ListQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filtered(filters: FieldMap) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<sea_orm::Value>) -> Self {
        self.filters.insert(field, value);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: impl Into<OrderBy>) -> Self {
        self.order_by.push(order.into());
        self
    }

    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Conjunction of equality constraints; null values filter with `IS NULL`.
pub(crate) fn filter_condition<E: EntityTrait>(
    filters: &FieldMap,
) -> Result<Condition, ValidationError> {
    let resolved = fields::resolve::<E>(filters, true)?;
    Ok(resolved
        .into_iter()
        .fold(Condition::all(), |cond, (column, value)| {
            if fields::is_null(&value) {
                cond.add(column.is_null())
            } else {
                cond.add(column.eq(value))
            }
        }))
}

/// `E::find()` narrowed by `filters`.
pub(crate) fn select<E: EntityTrait>(filters: &FieldMap) -> Result<Select<E>, ValidationError> {
    Ok(E::find().filter(filter_condition::<E>(filters)?))
}

/// Apply filters, ordering and pagination of `query`.
pub(crate) fn build<E: EntityTrait>(query: &ListQuery) -> Result<Select<E>, ValidationError> {
    if query.limit == Some(0) {
        return Err(ValidationError::Pagination {
            entity: fields::entity_name::<E>(),
            param: "limit",
            reason: "must be greater than zero".to_owned(),
        });
    }

    let mut select = select::<E>(&query.filters)?;
    for term in &query.order_by {
        let Some(column) = fields::find_column::<E>(&term.field) else {
            return Err(ValidationError::UnknownOrderField {
                entity: fields::entity_name::<E>(),
                field: term.field.clone(),
            });
        };
        let order = match term.direction {
            Direction::Asc => Order::Asc,
            Direction::Desc => Order::Desc,
        };
        select = select.order_by(column, order);
    }
    if let Some(skip) = query.skip {
        select = select.offset(skip);
    }
    if let Some(limit) = query.limit {
        select = select.limit(limit);
    }
    Ok(select)
}
