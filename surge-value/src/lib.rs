use std::fmt;
use std::sync::Arc;

pub type ObjectMap = ahash::AHashMap<Arc<str>, Value>;

/// Dynamic value carried in a virtual user's variable bag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(Arc<str>),
    Array(Vec<Value>),
    Object(ObjectMap),
}

impl Value {
    #[must_use]
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            Self::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            Self::I64(v) => Some(*v as f64),
            Self::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Walks a dotted path (`user.address.city`, `rows.0`) through nested objects and arrays.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|seg| !seg.is_empty())
            .try_fold(self, |cur, seg| cur.get(seg))
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::I64(v) => serde_json::Value::from(*v),
            Self::U64(v) => serde_json::Value::from(*v),
            Self::F64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Self::U64(v)
                } else if let Some(v) = n.as_i64() {
                    Self::I64(v)
                } else {
                    Self::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (Arc::from(k.as_str()), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// String form used when a value is interpolated into text.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Array(_) | Self::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_numbers_keep_their_width() {
        assert_eq!(Value::from(serde_json::json!(7)), Value::U64(7));
        assert_eq!(Value::from(serde_json::json!(-7)), Value::I64(-7));
        assert_eq!(Value::from(serde_json::json!(1.5)), Value::F64(1.5));
    }

    #[test]
    fn get_path_walks_objects_and_arrays() {
        let v = Value::from(serde_json::json!({
            "user": { "tags": ["a", "b"], "name": "ann" }
        }));
        assert_eq!(v.get_path("user.name").and_then(Value::as_str), Some("ann"));
        assert_eq!(v.get_path("user.tags.1").and_then(Value::as_str), Some("b"));
        assert!(v.get_path("user.missing").is_none());
    }

    #[test]
    fn json_conversion_is_lossless_for_every_variant() {
        let json = serde_json::json!({
            "n": null, "b": true, "i": -1, "u": 2, "f": 0.5,
            "s": "x", "a": [1, "y"], "o": { "k": "v" }
        });
        assert_eq!(Value::from(&json).to_json(), json);
    }

    #[test]
    fn display_renders_scalars_plainly_and_composites_as_json() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::U64(3).to_string(), "3");
        assert_eq!(Value::Null.to_string(), "");
        let arr = Value::Array(vec![Value::U64(1), Value::from("a")]);
        assert_eq!(arr.to_string(), r#"[1,"a"]"#);
    }

    #[test]
    fn numeric_accessors_cross_convert() {
        assert_eq!(Value::U64(5).as_i64(), Some(5));
        assert_eq!(Value::I64(-1).as_u64(), None);
        assert_eq!(Value::I64(2).as_f64(), Some(2.0));
    }
}
