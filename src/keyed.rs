//! Plain keyed representation of generated messages.
//!
//! Generated messages implement [`Keyed`] to convert to and from a
//! [`serde_json::Value`] tree: objects for messages and maps, arrays for
//! repeated fields, numbers, booleans and strings for scalars. 64-bit
//! integers are written as decimal strings so they survive consumers that
//! read every number as a double; both strings and numbers are accepted
//! when reading them back. Bytes are arrays of numbers.

use std::collections::HashMap;
use std::hash::Hash;

pub use serde_json::Value;

use crate::{ProtolaneError, Result};

/// Keyed object, the representation of a message.
pub type Object = serde_json::Map<String, Value>;

/// Conversion to and from the keyed representation.
pub trait Keyed: Sized {
    fn to_keyed(&self) -> Value;
    fn from_keyed(value: &Value) -> Result<Self>;
}

/// Map keys, which the keyed representation always spells as strings.
pub trait KeyedKey: Sized + Eq + Hash {
    fn to_key(&self) -> String;
    fn from_key(key: &str) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> ProtolaneError {
    ProtolaneError::Keyed(format!("expected {expected}, found {value}"))
}

/// Borrow `value` as an object.
pub fn expect_object<'v>(value: &'v Value, message: &str) -> Result<&'v Object> {
    value
        .as_object()
        .ok_or_else(|| mismatch(&format!("object for {message}"), value))
}

/// Read field `name` from a message object. Missing and `null` fields read
/// as the default value.
pub fn field<T: Keyed + Default>(object: &Object, name: &str) -> Result<T> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => T::from_keyed(value)
            .map_err(|e| ProtolaneError::Keyed(format!("field {name}: {e}"))),
    }
}

macro_rules! keyed_float {
    ($($ty:ty),*) => {$(
        impl Keyed for $ty {
            fn to_keyed(&self) -> Value {
                serde_json::Number::from_f64(f64::from(*self))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }

            fn from_keyed(value: &Value) -> Result<Self> {
                value
                    .as_f64()
                    .map(|v| v as $ty)
                    .ok_or_else(|| mismatch("number", value))
            }
        }
    )*};
}

keyed_float!(f32, f64);

macro_rules! keyed_small_int {
    ($($ty:ty),*) => {$(
        impl Keyed for $ty {
            fn to_keyed(&self) -> Value {
                Value::from(*self)
            }

            fn from_keyed(value: &Value) -> Result<Self> {
                value
                    .as_i64()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| mismatch(stringify!($ty), value))
            }
        }

        impl KeyedKey for $ty {
            fn to_key(&self) -> String {
                self.to_string()
            }

            fn from_key(key: &str) -> Result<Self> {
                key.parse()
                    .map_err(|_| ProtolaneError::Keyed(format!("invalid {} map key {key:?}", stringify!($ty))))
            }
        }
    )*};
}

keyed_small_int!(i32, u32);

macro_rules! keyed_wide_int {
    ($($ty:ty),*) => {$(
        impl Keyed for $ty {
            fn to_keyed(&self) -> Value {
                Value::String(self.to_string())
            }

            fn from_keyed(value: &Value) -> Result<Self> {
                match value {
                    Value::String(s) => s.parse().ok(),
                    Value::Number(n) => n.to_string().parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| mismatch(concat!(stringify!($ty), " as decimal string"), value))
            }
        }

        impl KeyedKey for $ty {
            fn to_key(&self) -> String {
                self.to_string()
            }

            fn from_key(key: &str) -> Result<Self> {
                key.parse()
                    .map_err(|_| ProtolaneError::Keyed(format!("invalid {} map key {key:?}", stringify!($ty))))
            }
        }
    )*};
}

keyed_wide_int!(i64, u64);

impl Keyed for bool {
    fn to_keyed(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("boolean", value))
    }
}

impl KeyedKey for bool {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn from_key(key: &str) -> Result<Self> {
        key.parse()
            .map_err(|_| ProtolaneError::Keyed(format!("invalid bool map key {key:?}")))
    }
}

impl Keyed for String {
    fn to_keyed(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("string", value))
    }
}

impl KeyedKey for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn from_key(key: &str) -> Result<Self> {
        Ok(key.to_string())
    }
}

/// Bytes: an array of numbers.
impl Keyed for u8 {
    fn to_keyed(&self) -> Value {
        Value::from(*self)
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        value
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| mismatch("byte", value))
    }
}

impl<T: Keyed> Keyed for Option<T> {
    fn to_keyed(&self) -> Value {
        self.as_ref().map_or(Value::Null, Keyed::to_keyed)
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            value => T::from_keyed(value).map(Some),
        }
    }
}

impl<T: Keyed> Keyed for Box<T> {
    fn to_keyed(&self) -> Value {
        self.as_ref().to_keyed()
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        T::from_keyed(value).map(Box::new)
    }
}

impl<T: Keyed> Keyed for Vec<T> {
    fn to_keyed(&self) -> Value {
        Value::Array(self.iter().map(Keyed::to_keyed).collect())
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        value
            .as_array()
            .ok_or_else(|| mismatch("array", value))?
            .iter()
            .map(T::from_keyed)
            .collect()
    }
}

impl<K: KeyedKey, V: Keyed> Keyed for HashMap<K, V> {
    fn to_keyed(&self) -> Value {
        // Sorted keys keep the output stable across runs.
        let mut entries: Vec<(String, Value)> = self
            .iter()
            .map(|(k, v)| (k.to_key(), v.to_keyed()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Object(entries.into_iter().collect())
    }

    fn from_keyed(value: &Value) -> Result<Self> {
        value
            .as_object()
            .ok_or_else(|| mismatch("object", value))?
            .iter()
            .map(|(k, v)| Ok((K::from_key(k)?, V::from_keyed(v)?)))
            .collect()
    }
}
