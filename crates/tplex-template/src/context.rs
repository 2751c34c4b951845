//! Dynamic values passed to templates.
//!
//! [`ContextValue`] is the data model of the host template language: the
//! "dot" of every action, the arguments and results of template functions,
//! and the data handed to `fetch`/`render`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tplex_core::error::TplexError;

/// Represents a dynamic value in template data.
///
/// Dictionaries keep their keys sorted so that `range` over a map and the
/// display form of a map are deterministic.
#[derive(Debug, Clone, Default)]
pub enum ContextValue {
    /// A string value, HTML-escaped on output.
    String(String),
    /// A 64-bit integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<ContextValue>),
    /// A key-value mapping.
    Dict(BTreeMap<String, ContextValue>),
    /// The absence of a value.
    #[default]
    None,
    /// A string emitted verbatim, bypassing HTML escaping.
    SafeString(String),
}

impl ContextValue {
    /// Converts any serializable value into a `ContextValue`.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` if the value cannot be serialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use tplex_template::context::ContextValue;
    ///
    /// let mut data = HashMap::new();
    /// data.insert("title", "Home");
    /// let value = ContextValue::from_serialize(&data).unwrap();
    /// assert_eq!(value.resolve_path("title").unwrap().to_display_string(), "Home");
    /// ```
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, TplexError> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|e| TplexError::RenderError(format!("cannot convert template data: {e}")))
    }

    /// Returns `true` if this value is "truthy" for `if`, `with`, `and`, `or`.
    ///
    /// `None`, `false`, zero numbers, and empty strings, lists, and dicts are
    /// falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) | Self::SafeString(s) => !s.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Dict(d) => !d.is_empty(),
        }
    }

    /// Converts this value to its display string (without HTML escaping).
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) | Self::SafeString(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::to_display_string).collect();
                format!("[{}]", inner.join(" "))
            }
            Self::Dict(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}:{}", v.to_display_string()))
                    .collect();
                format!("map[{}]", inner.join(" "))
            }
            Self::None => String::new(),
        }
    }

    /// Returns `true` if this value bypasses auto-escaping.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::SafeString(_))
    }

    /// Marks a string value as safe, bypassing auto-escaping.
    #[must_use]
    pub fn mark_safe(self) -> Self {
        match self {
            Self::String(s) => Self::SafeString(s),
            other => other,
        }
    }

    /// Resolves one field segment on this value (a dict key or a list index).
    pub fn resolve_path(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(map) => map.get(key),
            Self::List(list) => key.parse::<usize>().ok().and_then(|idx| list.get(idx)),
            _ => None,
        }
    }

    /// Resolves a sequence of field segments, returning `None` on the first miss.
    pub fn resolve_fields<S: AsRef<str>>(&self, fields: &[S]) -> Option<&Self> {
        fields
            .iter()
            .try_fold(self, |current, field| current.resolve_path(field.as_ref()))
    }

    /// Returns the length of a list, string, or dict.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) | Self::SafeString(s) => Some(s.len()),
            Self::List(l) => Some(l.len()),
            Self::Dict(d) => Some(d.len()),
            _ => None,
        }
    }

    /// Returns `true` if this is an empty collection or empty string.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|l| l == 0)
    }

    /// Attempts to convert this value to an i64.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::String(s) | Self::SafeString(s) => s.parse::<i64>().ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::String(s) | Self::SafeString(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns the string contents if this is a String or SafeString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::SafeString(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialEq for ContextValue {
    #[allow(clippy::cast_precision_loss)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a) | Self::SafeString(a), Self::String(b) | Self::SafeString(b)) => {
                a == b
            }
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            _ => false,
        }
    }
}

// -- From implementations --

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for ContextValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for ContextValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<usize> for ContextValue {
    #[allow(clippy::cast_possible_wrap)]
    fn from(i: usize) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for ContextValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<ContextValue>> From<Vec<T>> for ContextValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ContextValue>> From<HashMap<String, T>> for ContextValue {
    fn from(m: HashMap<String, T>) -> Self {
        Self::Dict(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<ContextValue>> From<BTreeMap<String, T>> for ContextValue {
    fn from(m: BTreeMap<String, T>) -> Self {
        Self::Dict(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<ContextValue>> From<Option<T>> for ContextValue {
    fn from(o: Option<T>) -> Self {
        o.map_or(Self::None, Into::into)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::None
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Escapes HTML special characters in a string.
///
/// Replaces `&`, `<`, `>`, `"`, and `'` with their HTML entity equivalents.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&#34;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!ContextValue::None.is_truthy());
        assert!(!ContextValue::from("").is_truthy());
        assert!(!ContextValue::Integer(0).is_truthy());
        assert!(!ContextValue::List(vec![]).is_truthy());
        assert!(ContextValue::from("x").is_truthy());
        assert!(ContextValue::Bool(true).is_truthy());
        assert!(ContextValue::Float(0.5).is_truthy());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(ContextValue::Bool(true).to_display_string(), "true");
        assert_eq!(ContextValue::None.to_display_string(), "");
        assert_eq!(
            ContextValue::from(vec!["a", "b"]).to_display_string(),
            "[a b]"
        );
        let value = ContextValue::from(serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(value.to_display_string(), "map[a:1 b:2]");
    }

    #[test]
    fn test_resolve_fields() {
        let value = ContextValue::from(serde_json::json!({
            "user": {"name": "ann", "tags": ["x", "y"]}
        }));
        assert_eq!(
            value.resolve_fields(&["user", "name"]).unwrap().as_str(),
            Some("ann")
        );
        assert_eq!(
            value.resolve_fields(&["user", "tags", "1"]).unwrap().as_str(),
            Some("y")
        );
        assert!(value.resolve_fields(&["user", "missing"]).is_none());
        assert_eq!(value.resolve_fields::<&str>(&[]), Some(&value));
    }

    #[test]
    fn test_equality_across_kinds() {
        assert_eq!(ContextValue::Integer(2), ContextValue::Float(2.0));
        assert_eq!(ContextValue::from("a"), ContextValue::SafeString("a".into()));
        assert_ne!(ContextValue::from("1"), ContextValue::Integer(1));
    }

    #[test]
    fn test_mark_safe() {
        assert!(ContextValue::from("<b>").mark_safe().is_safe());
        assert!(!ContextValue::Integer(1).mark_safe().is_safe());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Page {
            title: &'static str,
            count: u32,
        }
        let value = ContextValue::from_serialize(&Page { title: "t", count: 3 }).unwrap();
        assert_eq!(value.resolve_path("count"), Some(&ContextValue::Integer(3)));
    }
}
