//! Template lexer (tokenizer).
//!
//! Converts raw template source text into a stream of [`Token`]s: text
//! literals, actions between the configured delimiters, and comments
//! (`{{/* ... */}}`). Trim markers (`{{- ` and ` -}}`) strip the whitespace
//! of the neighbouring text.

use tplex_core::error::TplexError;

/// The left/right action delimiters of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    /// Opening delimiter, `{{` by default.
    pub left: String,
    /// Closing delimiter, `}}` by default.
    pub right: String,
}

impl Delimiters {
    /// Creates a delimiter pair.
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Wraps `content` in the delimiters, e.g. `template "x" .` -> `{{template "x" .}}`.
    pub fn tag(&self, content: &str) -> String {
        format!("{}{content}{}", self.left, self.right)
    }

    /// Checks that both delimiters are non-empty.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if either delimiter is empty.
    pub fn validate(&self) -> Result<(), TplexError> {
        if self.left.is_empty() || self.right.is_empty() {
            return Err(TplexError::ConfigurationError(
                "template delimiters must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

/// A token produced by the template lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A literal text segment.
    Text(String),
    /// The trimmed content of an action: `{{ content }}`.
    Action(String),
    /// A comment: `{{/* comment */}}`.
    Comment(String),
}

/// Tokenizes a template source string into a sequence of [`Token`]s.
///
/// # Errors
///
/// Returns a `TemplateSyntaxError` if an action is opened but never closed,
/// or a comment is not terminated inside its action.
pub fn tokenize(source: &str, delims: &Delimiters) -> Result<Vec<Token>, TplexError> {
    delims.validate()?;

    let mut tokens = Vec::new();
    let mut remaining = source;
    let mut trim_next = false;

    while !remaining.is_empty() {
        let Some(pos) = remaining.find(delims.left.as_str()) else {
            push_text(&mut tokens, remaining, trim_next);
            break;
        };

        let mut inner = &remaining[pos + delims.left.len()..];
        let trim_before = has_left_trim(inner);
        if trim_before {
            inner = &inner[1..];
        }

        let mut text = &remaining[..pos];
        if trim_before {
            text = text.trim_end();
        }
        push_text(&mut tokens, text, trim_next);

        let end = find_action_end(inner, &delims.right).ok_or_else(|| {
            TplexError::TemplateSyntaxError(format!(
                "unclosed action: expected '{}'",
                delims.right
            ))
        })?;

        let mut content = &inner[..end];
        trim_next = has_right_trim(content);
        if trim_next {
            content = &content[..content.len() - 1];
        }
        tokens.push(classify(content.trim())?);
        remaining = &inner[end + delims.right.len()..];
    }

    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

/// `{{- ` trims only when the dash is followed by whitespace, so `{{-3}}` stays a number.
fn has_left_trim(inner: &str) -> bool {
    let mut chars = inner.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn has_right_trim(content: &str) -> bool {
    content.len() >= 2
        && content.ends_with('-')
        && content[..content.len() - 1]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
}

fn classify(content: &str) -> Result<Token, TplexError> {
    if let Some(body) = content.strip_prefix("/*") {
        let body = body.strip_suffix("*/").ok_or_else(|| {
            TplexError::TemplateSyntaxError("unclosed comment: expected '*/'".to_string())
        })?;
        return Ok(Token::Comment(body.trim().to_string()));
    }
    Ok(Token::Action(content.to_string()))
}

/// Finds the right delimiter, skipping over quoted strings.
fn find_action_end(s: &str, right: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' && q == '"' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => {
                if s[i..].starts_with(right) {
                    return Some(i);
                }
                if ch == '"' || ch == '`' {
                    quote = Some(ch);
                }
            }
        }
    }
    None
}
