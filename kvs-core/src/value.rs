/*!
Typed values stored in a KVS instance and their on-disk encoding.

Each value is written as `{"t": "<type>", "v": <payload>}` so that the integer
width and signedness chosen by the writer survive a round trip through JSON.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{KvsError, Result};

/// Key-to-value mapping of a store. Ordered so that equal states serialize to
/// equal bytes.
pub type KvsMap = BTreeMap<String, KvsValue>;

/// A single stored value
///
/// The file encoding has no byte-blob type. Raw bytes are stored as an array
/// of `u32` values, one per byte; see the `&[u8]` and `Vec<u8>` conversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum KvsValue {
    #[serde(rename = "i32")]
    I32(i32),
    #[serde(rename = "u32")]
    U32(u32),
    #[serde(rename = "i64")]
    I64(i64),
    #[serde(rename = "u64")]
    U64(u64),
    #[serde(rename = "f64")]
    F64(f64),
    #[serde(rename = "bool")]
    Boolean(bool),
    #[serde(rename = "str")]
    String(String),
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "arr")]
    Array(Vec<KvsValue>),
    #[serde(rename = "obj")]
    Object(KvsMap),
}

impl KvsValue {
    /// Short type tag as used in the file encoding.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F64(_) => "f64",
            Self::Boolean(_) => "bool",
            Self::String(_) => "str",
            Self::Null => "null",
            Self::Array(_) => "arr",
            Self::Object(_) => "obj",
        }
    }

    /// Convert untyped JSON into a value
    ///
    /// Integers become `I64` when they fit and `U64` otherwise; every other
    /// number becomes `F64`.
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value;
        match json {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::I64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::U64(u)
                } else {
                    Self::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Untyped JSON view, dropping the type tags.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::I32(v) => Value::from(*v),
            Self::U32(v) => Value::from(*v),
            Self::I64(v) => Value::from(*v),
            Self::U64(v) => Value::from(*v),
            Self::F64(v) => Value::from(*v),
            Self::Boolean(v) => Value::Bool(*v),
            Self::String(v) => Value::String(v.clone()),
            Self::Null => Value::Null,
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Serialize a map in the on-disk format.
pub fn encode_map(map: &KvsMap) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(map)?)
}

/// Parse a map from the on-disk format.
pub fn decode_map(bytes: &[u8]) -> Result<KvsMap> {
    Ok(serde_json::from_slice(bytes)?)
}

macro_rules! impl_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for KvsValue {
                fn from(value: $ty) -> Self {
                    KvsValue::$variant(value)
                }
            }

            impl TryFrom<KvsValue> for $ty {
                type Error = KvsError;

                fn try_from(value: KvsValue) -> Result<Self> {
                    match value {
                        KvsValue::$variant(inner) => Ok(inner),
                        other => Err(KvsError::conversion(format!(
                            "expected {}, found {}",
                            stringify!($variant),
                            other.type_name()
                        ))),
                    }
                }
            }
        )*
    };
}

impl_conversions! {
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    bool => Boolean,
    String => String,
    Vec<KvsValue> => Array,
    KvsMap => Object,
}

impl From<&str> for KvsValue {
    fn from(value: &str) -> Self {
        KvsValue::String(value.to_string())
    }
}

impl From<()> for KvsValue {
    fn from(_: ()) -> Self {
        KvsValue::Null
    }
}

impl TryFrom<KvsValue> for () {
    type Error = KvsError;

    fn try_from(value: KvsValue) -> Result<Self> {
        match value {
            KvsValue::Null => Ok(()),
            other => Err(KvsError::conversion(format!(
                "expected Null, found {}",
                other.type_name()
            ))),
        }
    }
}

impl From<&[u8]> for KvsValue {
    fn from(bytes: &[u8]) -> Self {
        KvsValue::Array(bytes.iter().map(|&b| KvsValue::U32(u32::from(b))).collect())
    }
}

impl TryFrom<KvsValue> for Vec<u8> {
    type Error = KvsError;

    fn try_from(value: KvsValue) -> Result<Self> {
        let items = match value {
            KvsValue::Array(items) => items,
            other => {
                return Err(KvsError::conversion(format!(
                    "expected byte array, found {}",
                    other.type_name()
                )))
            }
        };
        items
            .into_iter()
            .map(|item| match item {
                KvsValue::U32(b) => u8::try_from(b)
                    .map_err(|_| KvsError::conversion(format!("{b} is not a byte"))),
                other => Err(KvsError::conversion(format!(
                    "expected byte, found {}",
                    other.type_name()
                ))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_encoding() {
        assert_eq!(
            serde_json::to_value(KvsValue::I32(-5)).unwrap(),
            json!({"t": "i32", "v": -5})
        );
        assert_eq!(
            serde_json::to_value(KvsValue::from("hi")).unwrap(),
            json!({"t": "str", "v": "hi"})
        );
        assert_eq!(
            serde_json::to_value(KvsValue::Array(vec![KvsValue::Boolean(true)])).unwrap(),
            json!({"t": "arr", "v": [{"t": "bool", "v": true}]})
        );
    }

    #[test]
    fn test_decode_keeps_integer_widths() {
        let bytes = br#"{
            "a": {"t": "u32", "v": 7},
            "b": {"t": "i64", "v": -7},
            "c": {"t": "null"},
            "d": {"t": "obj", "v": {"x": {"t": "f64", "v": 1.5}}}
        }"#;
        let map = decode_map(bytes).unwrap();
        assert_eq!(map["a"], KvsValue::U32(7));
        assert_eq!(map["b"], KvsValue::I64(-7));
        assert_eq!(map["c"], KvsValue::Null);
        match &map["d"] {
            KvsValue::Object(inner) => assert_eq!(inner["x"], KvsValue::F64(1.5)),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut first = KvsMap::new();
        first.insert("zeta".into(), KvsValue::from(1i32));
        first.insert("alpha".into(), KvsValue::from(2i32));

        let mut second = KvsMap::new();
        second.insert("alpha".into(), KvsValue::from(2i32));
        second.insert("zeta".into(), KvsValue::from(1i32));

        assert_eq!(encode_map(&first).unwrap(), encode_map(&second).unwrap());
    }

    #[test]
    fn test_conversions() {
        let value = KvsValue::from(42u64);
        assert_eq!(u64::try_from(value.clone()).unwrap(), 42);
        match i32::try_from(value) {
            Err(KvsError::ConversionFailed(msg)) => assert!(msg.contains("u64")),
            other => panic!("expected ConversionFailed, got {other:?}"),
        }
        assert!(<()>::try_from(KvsValue::Null).is_ok());
    }

    #[test]
    fn test_bytes_as_u32_array() {
        let value = KvsValue::from(&[0u8, 7, 255][..]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"t": "arr", "v": [
                {"t": "u32", "v": 0},
                {"t": "u32", "v": 7},
                {"t": "u32", "v": 255}
            ]})
        );
        assert_eq!(Vec::<u8>::try_from(value).unwrap(), vec![0, 7, 255]);

        assert!(Vec::<u8>::try_from(KvsValue::Array(vec![KvsValue::U32(256)])).is_err());
        assert!(Vec::<u8>::try_from(KvsValue::Array(vec![KvsValue::I32(1)])).is_err());
        assert!(Vec::<u8>::try_from(KvsValue::from("bytes")).is_err());
    }

    #[test]
    fn test_untyped_json() {
        let value = KvsValue::from_json(json!({"n": 3, "big": u64::MAX, "f": 0.5, "s": [null]}));
        match &value {
            KvsValue::Object(fields) => {
                assert_eq!(fields["n"], KvsValue::I64(3));
                assert_eq!(fields["big"], KvsValue::U64(u64::MAX));
                assert_eq!(fields["f"], KvsValue::F64(0.5));
                assert_eq!(fields["s"], KvsValue::Array(vec![KvsValue::Null]));
            }
            other => panic!("expected object, got {other:?}"),
        }
        assert_eq!(
            value.to_json(),
            json!({"n": 3, "big": u64::MAX, "f": 0.5, "s": [null]})
        );
    }
}
