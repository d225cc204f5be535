//! Field mappings and their resolution against entity column metadata.
//!
//! A [`FieldMap`] is the string-keyed form used for filters and data. Before anything
//! touches a query or an active model the map is resolved: every key must name a
//! declared column, and every value is coerced to the column's declared type so that
//! `SeaORM`'s typed setters never see a mismatched `Value`.

use std::collections::BTreeMap;

use sea_orm::sea_query::{ColumnType, Value};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn,
};

use crate::error::ValidationError;

/// Field-name to value mapping used for filters and data.
///
/// Insertion order is irrelevant; entries are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: BTreeMap<String, Value>,
}

impl FieldMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(field.into(), value.into());
        self
    }

    /// Insert or replace one entry, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(field.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries.get(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for FieldMap
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Table name of an entity, used in error messages and log fields.
pub(crate) fn entity_name<E: EntityTrait>() -> String {
    E::default().table_name().to_owned()
}

/// Look up a declared column by its name.
pub(crate) fn find_column<E: EntityTrait>(name: &str) -> Option<E::Column> {
    E::Column::iter().find(|c| c.as_str() == name)
}

pub(crate) fn is_primary_key<E: EntityTrait>(column: E::Column) -> bool {
    E::PrimaryKey::iter().any(|pk| pk.into_column().as_str() == column.as_str())
}

/// Resolve a mapping into typed `(column, value)` pairs.
///
/// `allow_pk` is `false` for updates: primary keys identify the row being updated.
pub(crate) fn resolve<E: EntityTrait>(
    map: &FieldMap,
    allow_pk: bool,
) -> Result<Vec<(E::Column, Value)>, ValidationError> {
    let mut out = Vec::with_capacity(map.len());
    for (field, value) in map.iter() {
        let Some(column) = find_column::<E>(field) else {
            return Err(ValidationError::UnknownField {
                entity: entity_name::<E>(),
                field: field.to_owned(),
            });
        };
        if !allow_pk && is_primary_key::<E>(column) {
            return Err(ValidationError::ImmutablePrimaryKey {
                entity: entity_name::<E>(),
                field: field.to_owned(),
            });
        }
        let def = column.def();
        let coerced = coerce(def.get_column_type(), def.is_null(), value.clone()).map_err(
            |reason| ValidationError::InvalidValue {
                entity: entity_name::<E>(),
                field: field.to_owned(),
                reason,
            },
        )?;
        out.push((column, coerced));
    }
    Ok(out)
}

/// Assign resolved pairs onto `active`, all or nothing.
///
/// Values of column types [`resolve`] leaves unchecked (binary, temporal, decimal,
/// JSON, enums) are checked here by the active model's fallible setter.
pub(crate) fn assign<E>(
    active: &mut E::ActiveModel,
    resolved: Vec<(E::Column, Value)>,
) -> Result<(), ValidationError>
where
    E: EntityTrait,
    E::ActiveModel: ActiveModelTrait<Entity = E>,
{
    let mut next = active.clone();
    for (column, value) in resolved {
        next.try_set(column, value)
            .map_err(|e| ValidationError::InvalidValue {
                entity: entity_name::<E>(),
                field: column.as_str().to_owned(),
                reason: e.to_string(),
            })?;
    }
    *active = next;
    Ok(())
}

/// Coarse storage kind of a column, as far as value coercion cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Text,
    Uuid,
}

impl Kind {
    /// `None` for column types checked only by the active model's own setter.
    fn of(column_type: &ColumnType) -> Option<Self> {
        Some(match column_type {
            ColumnType::Boolean => Self::Bool,
            ColumnType::TinyInteger => Self::I8,
            ColumnType::SmallInteger => Self::I16,
            ColumnType::Integer => Self::I32,
            ColumnType::BigInteger => Self::I64,
            ColumnType::TinyUnsigned => Self::U8,
            ColumnType::SmallUnsigned => Self::U16,
            ColumnType::Unsigned => Self::U32,
            ColumnType::BigUnsigned => Self::U64,
            ColumnType::Float => Self::F32,
            ColumnType::Double => Self::F64,
            ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => Self::Text,
            ColumnType::Uuid => Self::Uuid,
            _ => return None,
        })
    }

    fn null(self) -> Value {
        match self {
            Self::Bool => Value::Bool(None),
            Self::I8 => Value::TinyInt(None),
            Self::I16 => Value::SmallInt(None),
            Self::I32 => Value::Int(None),
            Self::I64 => Value::BigInt(None),
            Self::U8 => Value::TinyUnsigned(None),
            Self::U16 => Value::SmallUnsigned(None),
            Self::U32 => Value::Unsigned(None),
            Self::U64 => Value::BigUnsigned(None),
            Self::F32 => Value::Float(None),
            Self::F64 => Value::Double(None),
            Self::Text => Value::String(None),
            Self::Uuid => Value::Uuid(None),
        }
    }
}

/// Integer payload of any integer `Value`; `Err(())` when the value is not an integer.
fn as_integer(value: &Value) -> Result<Option<i128>, ()> {
    Ok(match value {
        Value::TinyInt(v) => v.map(i128::from),
        Value::SmallInt(v) => v.map(i128::from),
        Value::Int(v) => v.map(i128::from),
        Value::BigInt(v) => v.map(i128::from),
        Value::TinyUnsigned(v) => v.map(i128::from),
        Value::SmallUnsigned(v) => v.map(i128::from),
        Value::Unsigned(v) => v.map(i128::from),
        Value::BigUnsigned(v) => v.map(i128::from),
        _ => return Err(()),
    })
}

/// `true` when the value is SQL NULL of any type.
pub(crate) fn is_null(value: &Value) -> bool {
    match value {
        Value::Bool(v) => v.is_none(),
        Value::TinyInt(v) => v.is_none(),
        Value::SmallInt(v) => v.is_none(),
        Value::Int(v) => v.is_none(),
        Value::BigInt(v) => v.is_none(),
        Value::TinyUnsigned(v) => v.is_none(),
        Value::SmallUnsigned(v) => v.is_none(),
        Value::Unsigned(v) => v.is_none(),
        Value::BigUnsigned(v) => v.is_none(),
        Value::Float(v) => v.is_none(),
        Value::Double(v) => v.is_none(),
        Value::String(v) => v.is_none(),
        Value::Char(v) => v.is_none(),
        Value::Bytes(v) => v.is_none(),
        Value::Uuid(v) => v.is_none(),
        _ => false,
    }
}

fn narrow<T: TryFrom<i128>>(n: i128, wrap: fn(Option<T>) -> Value) -> Result<Value, String> {
    T::try_from(n)
        .map(|v| wrap(Some(v)))
        .map_err(|_| format!("integer {n} is out of range for the column type"))
}

/// Coerce `value` to the storage kind of a column.
fn coerce(column_type: &ColumnType, nullable: bool, value: Value) -> Result<Value, String> {
    let kind = Kind::of(column_type);
    if is_null(&value) {
        return match (nullable, kind) {
            (false, _) => Err("null is not allowed for a non-nullable column".to_owned()),
            (true, Some(kind)) => Ok(kind.null()),
            (true, None) => Ok(value),
        };
    }
    let Some(kind) = kind else {
        return Ok(value);
    };

    let mismatch = |value: &Value| format!("expected {kind:?}-compatible value, got {value:?}");

    match kind {
        Kind::Bool => match value {
            Value::Bool(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        Kind::I8 | Kind::I16 | Kind::I32 | Kind::I64 | Kind::U8 | Kind::U16 | Kind::U32
        | Kind::U64 => {
            let Ok(Some(n)) = as_integer(&value) else {
                return Err(mismatch(&value));
            };
            match kind {
                Kind::I8 => narrow(n, Value::TinyInt),
                Kind::I16 => narrow(n, Value::SmallInt),
                Kind::I32 => narrow(n, Value::Int),
                Kind::I64 => narrow(n, Value::BigInt),
                Kind::U8 => narrow(n, Value::TinyUnsigned),
                Kind::U16 => narrow(n, Value::SmallUnsigned),
                Kind::U32 => narrow(n, Value::Unsigned),
                _ => narrow(n, Value::BigUnsigned),
            }
        }
        Kind::F32 => match value {
            Value::Float(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        Kind::F64 => match value {
            Value::Double(_) => Ok(value),
            Value::Float(Some(f)) => Ok(Value::Double(Some(f64::from(f)))),
            other => Err(mismatch(&other)),
        },
        Kind::Text => match value {
            Value::String(_) => Ok(value),
            Value::Char(Some(c)) => Ok(Value::String(Some(Box::new(c.to_string())))),
            other => Err(mismatch(&other)),
        },
        Kind::Uuid => match value {
            Value::Uuid(_) => Ok(value),
            Value::String(Some(s)) => uuid::Uuid::parse_str(&s)
                .map(|u| Value::Uuid(Some(Box::new(u))))
                .map_err(|e| format!("not a UUID: {e}")),
            other => Err(mismatch(&other)),
        },
    }
}
