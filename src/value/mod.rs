//! # Scalar Value Model
//!
//! Every cell that crosses the sandbox boundary is normalized into a
//! [`SqlValue`]. The model is deliberately small so that the embedded engine
//! and the remote sandbox server produce identical shapes:
//!
//! | Source                     | `SqlValue`            |
//! |----------------------------|-----------------------|
//! | SQL `NULL` / JSON `null`   | `Null`                |
//! | SQLite INTEGER, JSON int   | `Integer`             |
//! | SQLite REAL, JSON float    | `Real`                |
//! | SQLite TEXT, JSON string   | `Text`                |
//! | SQLite BLOB                | `Text("x'..'")`       |
//! | JSON boolean               | `Integer(0 \| 1)`     |
//! | JSON array / object        | `Text(<compact json>)`|
//!
//! On the wire a value is a bare JSON scalar: `null`, a number, or a string.

use rusqlite::types::ValueRef;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A normalized result cell
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render a blob as a SQL hex literal, e.g. `x'00ff'`
    pub fn from_blob(bytes: &[u8]) -> Self {
        SqlValue::Text(format!("x'{}'", hex::encode(bytes)))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::from_blob(bytes),
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
            },
            serde_json::Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SqlValue::Null => serializer.serialize_unit(),
            SqlValue::Integer(v) => serializer.serialize_i64(*v),
            // serde_json writes non-finite floats as null
            SqlValue::Real(v) => serializer.serialize_f64(*v),
            SqlValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
        use serde::de::{self, MapAccess, SeqAccess, Visitor};

        struct SqlValueVisitor;

        impl<'de> Visitor<'de> for SqlValueVisitor {
            type Value = SqlValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a scalar result cell")
            }

            fn visit_unit<E>(self) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Null)
            }

            fn visit_none<E>(self) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Null)
            }

            fn visit_some<T>(self, deserializer: T) -> Result<SqlValue, T::Error>
            where
                T: Deserializer<'de>,
            {
                deserializer.deserialize_any(self)
            }

            fn visit_bool<E>(self, v: bool) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Integer(i64::from(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Integer(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(i64::try_from(v).map_or(SqlValue::Real(v as f64), SqlValue::Integer))
            }

            fn visit_f64<E>(self, v: f64) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Real(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Text(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> Result<SqlValue, E>
            where
                E: de::Error,
            {
                Ok(SqlValue::Text(v))
            }

            fn visit_seq<A>(self, seq: A) -> Result<SqlValue, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let json = serde_json::Value::deserialize(SeqAccessDeserializer::new(seq))?;
                Ok(SqlValue::Text(json.to_string()))
            }

            fn visit_map<M>(self, map: M) -> Result<SqlValue, M::Error>
            where
                M: MapAccess<'de>,
            {
                let json = serde_json::Value::deserialize(MapAccessDeserializer::new(map))?;
                Ok(SqlValue::Text(json.to_string()))
            }
        }

        deserializer.deserialize_any(SqlValueVisitor)
    }
}
