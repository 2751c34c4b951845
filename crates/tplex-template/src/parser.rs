//! Template parser and executor.
//!
//! Converts a stream of lexer [`Token`]s into [`Tree`]s of [`Node`]s and
//! renders them against a [`ContextValue`]. The language is a small action-based
//! template dialect:
//!
//! - output pipelines: `{{.title}}`, `{{$.site.name}}`, `{{upper .title}}`,
//!   `{{.title | upper}}`
//! - control flow: `{{if}}`, `{{else if}}`, `{{else}}`, `{{range}}`,
//!   `{{with}}`, `{{end}}`
//! - named sub-templates: `{{define "name"}}...{{end}}` and
//!   `{{template "name" pipeline}}`

use tplex_core::error::TplexError;

use crate::context::{escape_html, ContextValue};
use crate::funcs::{kind_name, TemplateFn};
use crate::lexer::{self, Delimiters, Token};

/// Maximum nesting of `{{template}}` invocations during one execution.
pub const MAX_TEMPLATE_DEPTH: usize = 256;

/// One argument of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The current value: `.`
    Dot,
    /// A field path on the current value: `.a.b`
    Field(Vec<String>),
    /// A field path on the data passed to the template: `$` or `$.a.b`
    Root(Vec<String>),
    /// A string, number, boolean, or `nil` literal.
    Literal(ContextValue),
    /// A function name.
    Function(String),
}

/// A command: a function call or a single operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// The operands; a leading [`Operand::Function`] is called with the rest.
    pub args: Vec<Operand>,
}

/// A `|`-separated chain of commands. Each result feeds the next command as
/// its final argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// The commands, in evaluation order.
    pub commands: Vec<Command>,
}

/// A node of a parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text.
    Text(String),
    /// An output action: `{{pipeline}}`.
    Action(Pipeline),
    /// `{{if p}}body{{else}}else_body{{end}}`; `else if` nests another `If`.
    If {
        pipeline: Pipeline,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    /// `{{range p}}body{{else}}else_body{{end}}`
    Range {
        pipeline: Pipeline,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    /// `{{with p}}body{{else}}else_body{{end}}`
    With {
        pipeline: Pipeline,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    /// `{{template "name" pipeline}}`
    Template {
        name: String,
        pipeline: Option<Pipeline>,
    },
}

/// A named, parsed template body.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    /// The name the tree is invoked by.
    pub name: String,
    /// The body.
    pub nodes: Vec<Node>,
}

/// The result of parsing one source text.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    /// The top-level body, named after the template being parsed.
    pub root: Tree,
    /// Every `{{define}}` found in the source, in order of appearance.
    pub defines: Vec<Tree>,
}

/// Parses `source` as the body of a template called `name`.
///
/// # Errors
///
/// Returns a `TemplateSyntaxError` naming the template for unclosed actions,
/// unbalanced `end`/`else`, or malformed pipelines.
pub fn parse(name: &str, source: &str, delims: &Delimiters) -> Result<ParsedTemplate, TplexError> {
    let tokens = lexer::tokenize(source, delims).map_err(|e| annotate(name, e))?;
    let mut state = ParserState {
        tokens: &tokens,
        pos: 0,
        defines: Vec::new(),
    };
    let (nodes, stop) = state.parse_nodes().map_err(|e| annotate(name, e))?;
    match stop {
        Stop::Eof => Ok(ParsedTemplate {
            root: Tree {
                name: name.to_string(),
                nodes,
            },
            defines: state.defines,
        }),
        Stop::End => Err(syntax(name, "unexpected {{end}}")),
        Stop::Else(_) => Err(syntax(name, "unexpected {{else}}")),
    }
}

fn syntax(name: &str, message: &str) -> TplexError {
    TplexError::TemplateSyntaxError(format!("{name}: {message}"))
}

fn annotate(name: &str, err: TplexError) -> TplexError {
    match err {
        TplexError::TemplateSyntaxError(msg) => syntax(name, &msg),
        other => other,
    }
}

/// Why a run of nodes ended.
enum Stop {
    Eof,
    End,
    Else(Vec<String>),
}

struct ParserState<'a> {
    tokens: &'a [Token],
    pos: usize,
    defines: Vec<Tree>,
}

impl ParserState<'_> {
    fn parse_nodes(&mut self) -> Result<(Vec<Node>, Stop), TplexError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            let content = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    continue;
                }
                Token::Comment(_) => continue,
                Token::Action(content) => content,
            };

            let words = split_words(content)?;
            let Some((keyword, args)) = words.split_first() else {
                return Err(TplexError::TemplateSyntaxError(
                    "missing value for command".to_string(),
                ));
            };

            match keyword.as_str() {
                "end" => {
                    if !args.is_empty() {
                        return Err(TplexError::TemplateSyntaxError(
                            "unexpected arguments to end".to_string(),
                        ));
                    }
                    return Ok((nodes, Stop::End));
                }
                "else" => return Ok((nodes, Stop::Else(args.to_vec()))),
                "if" => nodes.push(self.parse_if(args)?),
                "range" | "with" => nodes.push(self.parse_scoped(keyword, args)?),
                "define" => self.parse_define(args)?,
                "template" => nodes.push(parse_template_call(args)?),
                _ => nodes.push(Node::Action(parse_pipeline(&words)?)),
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn parse_if(&mut self, args: &[String]) -> Result<Node, TplexError> {
        let pipeline = parse_pipeline(args)?;
        let (body, stop) = self.parse_nodes()?;
        let else_body = match stop {
            Stop::End => Vec::new(),
            Stop::Else(rest) if rest.is_empty() => self.parse_else_body("if")?,
            Stop::Else(rest) if rest[0] == "if" => vec![self.parse_if(&rest[1..])?],
            Stop::Else(_) => {
                return Err(TplexError::TemplateSyntaxError(
                    "unexpected arguments to else".to_string(),
                ))
            }
            Stop::Eof => return Err(unexpected_eof("if")),
        };
        Ok(Node::If {
            pipeline,
            body,
            else_body,
        })
    }

    fn parse_scoped(&mut self, keyword: &str, args: &[String]) -> Result<Node, TplexError> {
        let pipeline = parse_pipeline(args)?;
        let (body, stop) = self.parse_nodes()?;
        let else_body = match stop {
            Stop::End => Vec::new(),
            Stop::Else(rest) if rest.is_empty() => self.parse_else_body(keyword)?,
            Stop::Else(_) => {
                return Err(TplexError::TemplateSyntaxError(format!(
                    "unexpected arguments to else in {keyword}"
                )))
            }
            Stop::Eof => return Err(unexpected_eof(keyword)),
        };
        Ok(if keyword == "range" {
            Node::Range {
                pipeline,
                body,
                else_body,
            }
        } else {
            Node::With {
                pipeline,
                body,
                else_body,
            }
        })
    }

    fn parse_else_body(&mut self, keyword: &str) -> Result<Vec<Node>, TplexError> {
        match self.parse_nodes()? {
            (nodes, Stop::End) => Ok(nodes),
            (_, Stop::Else(_)) => Err(TplexError::TemplateSyntaxError(format!(
                "expected end; found else in {keyword}"
            ))),
            (_, Stop::Eof) => Err(unexpected_eof(keyword)),
        }
    }

    fn parse_define(&mut self, args: &[String]) -> Result<(), TplexError> {
        let [name] = args else {
            return Err(TplexError::TemplateSyntaxError(
                "define takes exactly one quoted name".to_string(),
            ));
        };
        let name = unquote(name)?;
        match self.parse_nodes()? {
            (nodes, Stop::End) => {
                self.defines.push(Tree { name, nodes });
                Ok(())
            }
            (_, Stop::Else(_)) => Err(TplexError::TemplateSyntaxError(
                "unexpected else in define".to_string(),
            )),
            (_, Stop::Eof) => Err(unexpected_eof("define")),
        }
    }
}

fn unexpected_eof(keyword: &str) -> TplexError {
    TplexError::TemplateSyntaxError(format!("unexpected EOF: missing end for {keyword}"))
}

fn parse_template_call(args: &[String]) -> Result<Node, TplexError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(TplexError::TemplateSyntaxError(
            "template takes a quoted name".to_string(),
        ));
    };
    let pipeline = if rest.is_empty() {
        None
    } else {
        Some(parse_pipeline(rest)?)
    };
    Ok(Node::Template {
        name: unquote(name)?,
        pipeline,
    })
}

/// Parses a list of words into a pipeline, splitting commands on `|`.
fn parse_pipeline(words: &[String]) -> Result<Pipeline, TplexError> {
    if words.is_empty() {
        return Err(TplexError::TemplateSyntaxError(
            "missing value for command".to_string(),
        ));
    }

    let mut commands = Vec::new();
    for (idx, group) in words.split(|w| w == "|").enumerate() {
        if group.is_empty() {
            return Err(TplexError::TemplateSyntaxError(
                "missing command in pipeline".to_string(),
            ));
        }
        let args = group
            .iter()
            .map(|w| parse_operand(w))
            .collect::<Result<Vec<_>, _>>()?;
        let is_call = matches!(args[0], Operand::Function(_));
        if !is_call && (args.len() > 1 || idx > 0) {
            return Err(TplexError::TemplateSyntaxError(format!(
                "can't give argument to non-function {}",
                group[0]
            )));
        }
        commands.push(Command { args });
    }
    Ok(Pipeline { commands })
}

fn parse_operand(word: &str) -> Result<Operand, TplexError> {
    if word == "." {
        return Ok(Operand::Dot);
    }
    if let Some(path) = word.strip_prefix('.') {
        return Ok(Operand::Field(split_fields(word, path)?));
    }
    if word == "$" {
        return Ok(Operand::Root(Vec::new()));
    }
    if let Some(path) = word.strip_prefix("$.") {
        return Ok(Operand::Root(split_fields(word, path)?));
    }
    if word.starts_with('"') || word.starts_with('`') {
        return Ok(Operand::Literal(ContextValue::String(unquote(word)?)));
    }
    match word {
        "true" => return Ok(Operand::Literal(ContextValue::Bool(true))),
        "false" => return Ok(Operand::Literal(ContextValue::Bool(false))),
        "nil" => return Ok(Operand::Literal(ContextValue::None)),
        _ => {}
    }
    if let Ok(i) = word.parse::<i64>() {
        return Ok(Operand::Literal(ContextValue::Integer(i)));
    }
    if let Ok(f) = word.parse::<f64>() {
        return Ok(Operand::Literal(ContextValue::Float(f)));
    }
    if is_identifier(word) {
        return Ok(Operand::Function(word.to_string()));
    }
    Err(TplexError::TemplateSyntaxError(format!(
        "unexpected \"{word}\" in command"
    )))
}

fn split_fields(word: &str, path: &str) -> Result<Vec<String>, TplexError> {
    let fields: Vec<String> = path.split('.').map(str::to_string).collect();
    if fields.iter().any(String::is_empty) {
        return Err(TplexError::TemplateSyntaxError(format!(
            "bad field path \"{word}\""
        )));
    }
    Ok(fields)
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Removes the quotes of a string literal, decoding escapes in `"..."` literals.
pub fn unquote(word: &str) -> Result<String, TplexError> {
    if let Some(raw) = word.strip_prefix('`').and_then(|w| w.strip_suffix('`')) {
        return Ok(raw.to_string());
    }
    let inner = word
        .strip_prefix('"')
        .and_then(|w| w.strip_suffix('"'))
        .filter(|_| word.len() >= 2)
        .ok_or_else(|| {
            TplexError::TemplateSyntaxError(format!("expected quoted string, found {word}"))
        })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => {
                return Err(TplexError::TemplateSyntaxError(format!(
                    "unterminated escape in {word}"
                )))
            }
        }
    }
    Ok(out)
}

/// Splits action content into words, keeping quoted strings whole and
/// emitting `|` as a separate word.
fn split_words(content: &str) -> Result<Vec<String>, TplexError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in content.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' && q == '"' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '|' => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                words.push("|".to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(TplexError::TemplateSyntaxError(format!(
            "unterminated quoted string in {content}"
        )));
    }
    if !current.is_empty() {
        words.push(current);
    }
    Ok(words)
}

// ============================================================
// Execution
// ============================================================

/// Resolves named trees and functions while rendering, breaking the
/// dependency between the executor and the template set.
pub trait TemplateLookup {
    /// Returns the tree registered under `name`.
    fn lookup_tree(&self, name: &str) -> Option<&Tree>;

    /// Returns the function registered under `name`.
    fn lookup_func(&self, name: &str) -> Option<&TemplateFn>;
}

/// Renders a tree with `data` as both the dot and `$`.
///
/// # Errors
///
/// Returns a `RenderError` for undefined functions or templates, failing
/// functions, non-iterable `range` values, or exceeding
/// [`MAX_TEMPLATE_DEPTH`].
pub fn render_tree(
    tree: &Tree,
    data: &ContextValue,
    lookup: &dyn TemplateLookup,
) -> Result<String, TplexError> {
    let mut out = String::new();
    let exec = Exec {
        lookup,
        root: data,
        depth: 0,
    };
    exec.render_nodes(&tree.nodes, data, &mut out)?;
    Ok(out)
}

struct Exec<'a> {
    lookup: &'a dyn TemplateLookup,
    root: &'a ContextValue,
    depth: usize,
}

impl Exec<'_> {
    fn render_nodes(
        &self,
        nodes: &[Node],
        dot: &ContextValue,
        out: &mut String,
    ) -> Result<(), TplexError> {
        for node in nodes {
            self.render_node(node, dot, out)?;
        }
        Ok(())
    }

    fn render_node(&self, node: &Node, dot: &ContextValue, out: &mut String) -> Result<(), TplexError> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(pipeline) => {
                let value = self.eval_pipeline(pipeline, dot)?;
                if value.is_safe() {
                    out.push_str(&value.to_display_string());
                } else {
                    out.push_str(&escape_html(&value.to_display_string()));
                }
            }
            Node::If {
                pipeline,
                body,
                else_body,
            } => {
                if self.eval_pipeline(pipeline, dot)?.is_truthy() {
                    self.render_nodes(body, dot, out)?;
                } else {
                    self.render_nodes(else_body, dot, out)?;
                }
            }
            Node::With {
                pipeline,
                body,
                else_body,
            } => {
                let value = self.eval_pipeline(pipeline, dot)?;
                if value.is_truthy() {
                    self.render_nodes(body, &value, out)?;
                } else {
                    self.render_nodes(else_body, dot, out)?;
                }
            }
            Node::Range {
                pipeline,
                body,
                else_body,
            } => {
                let value = self.eval_pipeline(pipeline, dot)?;
                let items = range_items(&value)?;
                if items.is_empty() {
                    self.render_nodes(else_body, dot, out)?;
                }
                for item in &items {
                    self.render_nodes(body, item, out)?;
                }
            }
            Node::Template { name, pipeline } => {
                let tree = self.lookup.lookup_tree(name).ok_or_else(|| {
                    TplexError::RenderError(format!("no such template \"{name}\""))
                })?;
                if self.depth >= MAX_TEMPLATE_DEPTH {
                    return Err(TplexError::RenderError(format!(
                        "exceeded maximum template depth ({MAX_TEMPLATE_DEPTH}) at \"{name}\""
                    )));
                }
                let data = match pipeline {
                    Some(p) => self.eval_pipeline(p, dot)?,
                    None => ContextValue::None,
                };
                let nested = Exec {
                    lookup: self.lookup,
                    root: &data,
                    depth: self.depth + 1,
                };
                nested.render_nodes(&tree.nodes, &data, out)?;
            }
        }
        Ok(())
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, dot: &ContextValue) -> Result<ContextValue, TplexError> {
        let mut piped: Option<ContextValue> = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, dot, piped)?);
        }
        Ok(piped.unwrap_or_default())
    }

    fn eval_command(
        &self,
        command: &Command,
        dot: &ContextValue,
        piped: Option<ContextValue>,
    ) -> Result<ContextValue, TplexError> {
        let Some((first, rest)) = command.args.split_first() else {
            return Ok(ContextValue::None);
        };
        match first {
            Operand::Function(name) => {
                let mut args = rest
                    .iter()
                    .map(|op| self.eval_operand(op, dot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                self.call(name, &args)
            }
            operand => self.eval_operand(operand, dot),
        }
    }

    fn eval_operand(&self, operand: &Operand, dot: &ContextValue) -> Result<ContextValue, TplexError> {
        Ok(match operand {
            Operand::Dot => dot.clone(),
            Operand::Field(fields) => dot.resolve_fields(fields).cloned().unwrap_or_default(),
            Operand::Root(fields) => self.root.resolve_fields(fields).cloned().unwrap_or_default(),
            Operand::Literal(value) => value.clone(),
            Operand::Function(name) => self.call(name, &[])?,
        })
    }

    fn call(&self, name: &str, args: &[ContextValue]) -> Result<ContextValue, TplexError> {
        let func = self
            .lookup
            .lookup_func(name)
            .ok_or_else(|| TplexError::RenderError(format!("function \"{name}\" not defined")))?;
        func(args).map_err(|e| match e {
            TplexError::RenderError(msg) => {
                TplexError::RenderError(format!("error calling {name}: {msg}"))
            }
            other => other,
        })
    }
}

fn range_items(value: &ContextValue) -> Result<Vec<ContextValue>, TplexError> {
    match value {
        ContextValue::None => Ok(Vec::new()),
        ContextValue::List(items) => Ok(items.clone()),
        ContextValue::Dict(map) => Ok(map.values().cloned().collect()),
        ContextValue::Integer(n) => Ok((0..*n).map(ContextValue::Integer).collect()),
        other => Err(TplexError::RenderError(format!(
            "range can't iterate over {}",
            kind_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::funcs::{builtins, FuncMap};

    struct Lookup {
        trees: HashMap<String, Tree>,
        funcs: FuncMap,
    }

    impl TemplateLookup for Lookup {
        fn lookup_tree(&self, name: &str) -> Option<&Tree> {
            self.trees.get(name)
        }

        fn lookup_func(&self, name: &str) -> Option<&TemplateFn> {
            self.funcs.get(name).or_else(|| builtins().get(name))
        }
    }

    fn render(source: &str, data: serde_json::Value) -> Result<String, TplexError> {
        let parsed = parse("test", source, &Delimiters::default())?;
        let mut trees = HashMap::new();
        for tree in parsed.defines {
            trees.insert(tree.name.clone(), tree);
        }
        let mut funcs = FuncMap::new();
        funcs.insert("upper", |args| {
            Ok(ContextValue::from(
                args.last().map(ContextValue::to_display_string).unwrap_or_default().to_uppercase(),
            ))
        });
        let lookup = Lookup { trees, funcs };
        render_tree(&parsed.root, &ContextValue::from(data), &lookup)
    }

    #[test]
    fn test_text_and_fields() {
        let out = render(
            "Hi {{.user.name}} ({{$.user.age}})",
            serde_json::json!({"user": {"name": "Ann", "age": 30}}),
        )
        .unwrap();
        assert_eq!(out, "Hi Ann (30)");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        assert_eq!(render("[{{.nope.deeper}}]", serde_json::json!({})).unwrap(), "[]");
    }

    #[test]
    fn test_auto_escape_and_safe() {
        let data = serde_json::json!({"x": "<b>"});
        assert_eq!(render("{{.x}}", data.clone()).unwrap(), "&lt;b&gt;");
        assert_eq!(render("{{safe .x}}", data).unwrap(), "<b>");
    }

    #[test]
    fn test_function_call_and_pipe() {
        let data = serde_json::json!({"x": "abc"});
        assert_eq!(render("{{upper .x}}", data.clone()).unwrap(), "ABC");
        assert_eq!(render("{{.x | upper}}", data.clone()).unwrap(), "ABC");
        assert_eq!(render(r#"{{print "a" .x | upper}}"#, data).unwrap(), "AABC");
    }

    #[test]
    fn test_if_else_if_chain() {
        let src = "{{if eq .n 1}}one{{else if eq .n 2}}two{{else}}many{{end}}";
        assert_eq!(render(src, serde_json::json!({"n": 1})).unwrap(), "one");
        assert_eq!(render(src, serde_json::json!({"n": 2})).unwrap(), "two");
        assert_eq!(render(src, serde_json::json!({"n": 5})).unwrap(), "many");
    }

    #[test]
    fn test_range_list_map_and_else() {
        assert_eq!(
            render("{{range .r}}[{{.}}]{{end}}", serde_json::json!({"r": ["a", "b"]})).unwrap(),
            "[a][b]"
        );
        assert_eq!(
            render("{{range .m}}{{.}}{{end}}", serde_json::json!({"m": {"b": 2, "a": 1}})).unwrap(),
            "12"
        );
        assert_eq!(
            render("{{range .r}}x{{else}}empty{{end}}", serde_json::json!({"r": []})).unwrap(),
            "empty"
        );
        assert_eq!(render("{{range 3}}{{.}}{{end}}", serde_json::json!({})).unwrap(), "012");
    }

    #[test]
    fn test_range_over_string_fails() {
        assert!(render("{{range .s}}{{end}}", serde_json::json!({"s": "x"})).is_err());
    }

    #[test]
    fn test_with_rebinds_dot() {
        let data = serde_json::json!({"p": {"t": "T"}});
        assert_eq!(render("{{with .p}}{{.t}}{{end}}", data).unwrap(), "T");
        assert_eq!(
            render("{{with .q}}x{{else}}none{{end}}", serde_json::json!({})).unwrap(),
            "none"
        );
    }

    #[test]
    fn test_define_and_template() {
        let src = r#"{{define "item"}}<{{.}}>{{end}}{{range .r}}{{template "item" .}}{{end}}"#;
        assert_eq!(
            render(src, serde_json::json!({"r": [1, 2]})).unwrap(),
            "<1><2>"
        );
    }

    #[test]
    fn test_template_without_pipeline_gets_nil() {
        let src = r#"{{define "x"}}[{{.}}]{{end}}{{template "x"}}"#;
        assert_eq!(render(src, serde_json::json!({"a": 1})).unwrap(), "[]");
    }

    #[test]
    fn test_template_root_is_passed_value() {
        let src = r#"{{define "x"}}{{$.t}}{{end}}{{template "x" .inner}}"#;
        assert_eq!(
            render(src, serde_json::json!({"t": "outer", "inner": {"t": "inner"}})).unwrap(),
            "inner"
        );
    }

    #[test]
    fn test_undefined_template_and_function() {
        assert!(render(r#"{{template "missing" .}}"#, serde_json::json!({})).is_err());
        assert!(render("{{nope .}}", serde_json::json!({})).is_err());
    }

    #[test]
    fn test_recursion_depth_bounded() {
        let src = r#"{{define "loop"}}{{template "loop" .}}{{end}}{{template "loop" .}}"#;
        let err = render(src, serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("maximum template depth"));
    }

    #[test]
    fn test_syntax_errors() {
        let delims = Delimiters::default();
        assert!(parse("t", "{{if .x}}open", &delims).is_err());
        assert!(parse("t", "{{end}}", &delims).is_err());
        assert!(parse("t", "{{.x .y}}", &delims).is_err());
        assert!(parse("t", "{{.x | .y}}", &delims).is_err());
        assert!(parse("t", r#"{{print "open}}"#, &delims).is_err());
        let err = parse("page.html", "{{range .x}}{{else if .y}}{{end}}", &delims).unwrap_err();
        assert!(err.to_string().contains("page.html"));
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(render("a{{/* hidden */}}b", serde_json::json!({})).unwrap(), "ab");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""a\"b\n""#).unwrap(), "a\"b\n");
        assert_eq!(unquote("`raw\\n`").unwrap(), "raw\\n");
        assert!(unquote("bare").is_err());
        assert!(unquote("\"").is_err());
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"template "a b" .|f"#).unwrap(),
            vec!["template", "\"a b\"", ".", "|", "f"]
        );
    }
}
