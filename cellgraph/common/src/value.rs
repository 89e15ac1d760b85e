use std::fmt;

use serde::{Deserialize, Serialize};

pub type Nullable<T> = Option<T>;

/// A property, metadata or extended-data cell value.
///
/// Every typed variant is nullable so that a typed null can be told apart from a missing value;
/// null values are rejected by the mutation builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(Nullable<bool>),
    Int32(Nullable<i32>),
    Int64(Nullable<i64>),
    Float64(Nullable<f64>),
    String(Nullable<String>),
    Bytes(Nullable<Vec<u8>>),
}

impl Value {
    /// Returns true for [`Value::Null`] and for any typed variant holding no value.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Boolean(v) => v.is_none(),
            Value::Int32(v) => v.is_none(),
            Value::Int64(v) => v.is_none(),
            Value::Float64(v) => v.is_none(),
            Value::String(v) => v.is_none(),
            Value::Bytes(v) => v.is_none(),
        }
    }

    /// Name of the value type, used by property definitions.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Borrows the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nullable<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &Option<T>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{v}"),
                None => f.write_str("null"),
            }
        }
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => nullable(f, v),
            Value::Int32(v) => nullable(f, v),
            Value::Int64(v) => nullable(f, v),
            Value::Float64(v) => nullable(f, v),
            Value::String(v) => nullable(f, v),
            Value::Bytes(Some(v)) => write!(f, "<{} bytes>", v.len()),
            Value::Bytes(None) => f.write_str("null"),
        }
    }
}

macro_rules! for_each_non_null_variant {
    ($m:ident) => {
        $m!(boolean, bool, Boolean);
        $m!(int32, i32, Int32);
        $m!(int64, i64, Int64);
        $m!(float64, f64, Float64);
        $m!(string, String, String);
        $m!(bytes, Vec<u8>, Bytes);
    };
}

macro_rules! impl_from_for_variant {
    ($_:ident, $ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            #[inline]
            fn from(value: $ty) -> Self {
                Value::$variant(Some(value))
            }
        }
    };
}

for_each_non_null_variant!(impl_from_for_variant);

macro_rules! impl_from_nullable_for_variant {
    ($_:ident, $ty:ty, $variant:ident) => {
        impl From<Nullable<$ty>> for Value {
            #[inline]
            fn from(value: Nullable<$ty>) -> Self {
                Value::$variant(value)
            }
        }
    };
}

for_each_non_null_variant!(impl_from_nullable_for_variant);

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::String(Some(value.to_string()))
    }
}

impl From<Nullable<&str>> for Value {
    #[inline]
    fn from(value: Nullable<&str>) -> Self {
        Value::String(value.map(String::from))
    }
}

macro_rules! impl_as_for_variant {
    ($name:ident, $ty:ty, $variant:ident) => {
        impl Value {
            pastey::paste! {
                #[doc = concat!(" Attempts to downcast `self` to borrowed `Nullable<", stringify!($ty), ">`, returning `None` if not possible.")]
                #[inline]
                pub fn [<try_as_ $name>](&self) -> Option<&Nullable<$ty>> {
                    match self {
                        Value::$variant(value) => Some(value),
                        _ => None
                    }
                }
            }
        }
    };
}

for_each_non_null_variant!(impl_as_for_variant);

macro_rules! impl_into_for_variant {
    ($name:ident, $ty:ty, $variant:ident) => {
        impl Value {
            pastey::paste! {
                #[doc = concat!(" Attempts to downcast `self` to owned `Nullable<", stringify!($ty), ">`, returning `None` if not possible.")]
                #[inline]
                pub fn [<into_ $name>](self) -> Option<Nullable<$ty>> {
                    match self {
                        Value::$variant(value) => Some(value),
                        _ => None
                    }
                }
            }
        }
    };
}

for_each_non_null_variant!(impl_into_for_variant);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_detection() {
        assert!(Value::Null.is_null());
        assert!(Value::String(None).is_null());
        assert!(Value::from(None::<i64>).is_null());
        assert!(!Value::from("x").is_null());
        assert!(!Value::from(0i32).is_null());
    }

    #[test]
    fn test_downcast() {
        let v = Value::from(42i64);
        assert_eq!(v.try_as_int64(), Some(&Some(42)));
        assert_eq!(v.try_as_string(), None);
        assert_eq!(Value::from("abc").into_string(), Some(Some("abc".to_string())));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::from(1.5f64).to_string(), "1.5");
        assert_eq!(Value::Int32(None).to_string(), "null");
        assert_eq!(Value::from(vec![1u8, 2, 3]).to_string(), "<3 bytes>");
    }
}
