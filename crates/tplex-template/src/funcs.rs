//! Template functions.
//!
//! A [`FuncMap`] maps names to callables invoked from actions such as
//! `{{upper .name}}` or `{{.name | upper}}`. The built-in map provides
//! comparison, logic, and output helpers; callers layer their own maps on
//! top at execution time.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tplex_core::error::TplexError;

use crate::context::{escape_html, ContextValue};

/// A template function: receives evaluated arguments and returns a value.
pub type TemplateFn =
    Arc<dyn Fn(&[ContextValue]) -> Result<ContextValue, TplexError> + Send + Sync>;

/// A named collection of template functions.
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: HashMap<String, TemplateFn>,
}

impl FuncMap {
    /// Creates an empty function map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function, replacing any previous entry with the same name.
    ///
    /// # Examples
    ///
    /// ```
    /// use tplex_template::context::ContextValue;
    /// use tplex_template::funcs::FuncMap;
    ///
    /// let mut funcs = FuncMap::new();
    /// funcs.insert("upper", |args: &[ContextValue]| {
    ///     let s = args.first().map(ContextValue::to_display_string).unwrap_or_default();
    ///     Ok(ContextValue::from(s.to_uppercase()))
    /// });
    /// assert!(funcs.contains("upper"));
    /// ```
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[ContextValue]) -> Result<ContextValue, TplexError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(func));
    }

    /// Registers an already shared function.
    pub fn insert_shared(&mut self, name: impl Into<String>, func: TemplateFn) {
        self.funcs.insert(name.into(), func);
    }

    /// Looks up a function by name.
    pub fn get(&self, name: &str) -> Option<&TemplateFn> {
        self.funcs.get(name)
    }

    /// Returns `true` if a function with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Copies every entry of `other` into this map; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Self) {
        for (name, func) in &other.funcs {
            self.funcs.insert(name.clone(), Arc::clone(func));
        }
    }

    /// Returns the number of registered functions.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Returns `true` if no functions are registered.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.funcs.keys().collect();
        names.sort();
        f.debug_struct("FuncMap").field("funcs", &names).finish()
    }
}

/// Returns the built-in functions available to every template.
pub fn builtins() -> &'static FuncMap {
    static BUILTINS: OnceLock<FuncMap> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let mut m = FuncMap::new();
        register_all(&mut m);
        m
    })
}

fn register_all(m: &mut FuncMap) {
    // Comparison
    m.insert("eq", |args| compare(args, "eq"));
    m.insert("ne", |args| compare(args, "ne"));
    m.insert("lt", |args| compare(args, "lt"));
    m.insert("le", |args| compare(args, "le"));
    m.insert("gt", |args| compare(args, "gt"));
    m.insert("ge", |args| compare(args, "ge"));

    // Logic: `and`/`or` return the deciding argument, not a bool.
    m.insert("and", |args| {
        require_args("and", args, 1)?;
        Ok(args
            .iter()
            .find(|v| !v.is_truthy())
            .unwrap_or(&args[args.len() - 1])
            .clone())
    });
    m.insert("or", |args| {
        require_args("or", args, 1)?;
        Ok(args
            .iter()
            .find(|v| v.is_truthy())
            .unwrap_or(&args[args.len() - 1])
            .clone())
    });
    m.insert("not", |args| {
        exact_args("not", args, 1)?;
        Ok(ContextValue::Bool(!args[0].is_truthy()))
    });

    // Collections
    m.insert("len", |args| {
        exact_args("len", args, 1)?;
        args[0]
            .len()
            .map(ContextValue::from)
            .ok_or_else(|| TplexError::RenderError(format!("len of {}", kind_name(&args[0]))))
    });
    m.insert("index", |args| {
        require_args("index", args, 1)?;
        let mut current = &args[0];
        for key in &args[1..] {
            current = current.resolve_path(&key.to_display_string()).ok_or_else(|| {
                TplexError::RenderError(format!("index of {key} out of range"))
            })?;
        }
        Ok(current.clone())
    });

    // Output
    m.insert("print", |args| {
        Ok(ContextValue::from(
            args.iter()
                .map(ContextValue::to_display_string)
                .collect::<String>(),
        ))
    });
    m.insert("html", |args| {
        let joined: String = args.iter().map(ContextValue::to_display_string).collect();
        Ok(ContextValue::SafeString(escape_html(&joined)))
    });
    m.insert("safe", |args| {
        let joined: String = args.iter().map(ContextValue::to_display_string).collect();
        Ok(ContextValue::SafeString(joined))
    });
}

fn require_args(name: &str, args: &[ContextValue], min: usize) -> Result<(), TplexError> {
    if args.len() < min {
        return Err(TplexError::RenderError(format!(
            "wrong number of args for {name}: want at least {min} got {}",
            args.len()
        )));
    }
    Ok(())
}

fn exact_args(name: &str, args: &[ContextValue], want: usize) -> Result<(), TplexError> {
    if args.len() != want {
        return Err(TplexError::RenderError(format!(
            "wrong number of args for {name}: want {want} got {}",
            args.len()
        )));
    }
    Ok(())
}

/// `eq` accepts several right-hand values and is true if any of them matches.
fn compare(args: &[ContextValue], op: &str) -> Result<ContextValue, TplexError> {
    if op == "eq" {
        require_args(op, args, 2)?;
        return Ok(ContextValue::Bool(args[1..].iter().any(|v| *v == args[0])));
    }
    exact_args(op, args, 2)?;
    let (left, right) = (&args[0], &args[1]);
    if op == "ne" {
        return Ok(ContextValue::Bool(left != right));
    }

    let ordering = match (left, right) {
        (ContextValue::Integer(a), ContextValue::Integer(b)) => a.partial_cmp(b),
        (
            ContextValue::String(a) | ContextValue::SafeString(a),
            ContextValue::String(b) | ContextValue::SafeString(b),
        ) => a.partial_cmp(b),
        (
            ContextValue::Integer(_) | ContextValue::Float(_),
            ContextValue::Integer(_) | ContextValue::Float(_),
        ) => left
            .as_float()
            .zip(right.as_float())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        _ => None,
    }
    .ok_or_else(|| {
        TplexError::RenderError(format!(
            "incompatible types for comparison: {} and {}",
            kind_name(left),
            kind_name(right)
        ))
    })?;

    let result = match op {
        "lt" => ordering.is_lt(),
        "le" => ordering.is_le(),
        "gt" => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(ContextValue::Bool(result))
}

/// Returns a short type name used in error messages.
pub(crate) fn kind_name(value: &ContextValue) -> &'static str {
    match value {
        ContextValue::String(_) | ContextValue::SafeString(_) => "string",
        ContextValue::Integer(_) => "int",
        ContextValue::Float(_) => "float",
        ContextValue::Bool(_) => "bool",
        ContextValue::List(_) => "list",
        ContextValue::Dict(_) => "map",
        ContextValue::None => "nil",
    }
}
