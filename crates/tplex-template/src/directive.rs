//! Directive syntax and matching.
//!
//! [`Syntax`] holds the runtime-configurable vocabulary: the delimiters and
//! the `Include`, `Extend`, `Block`, and `Super` tag names.
//! [`DirectiveMatcher`] compiles the regular expressions that find those
//! directives and rebuilds them whenever the syntax it was built from
//! changes.

use std::ops::Range;

use regex::Regex;
use tplex_core::error::TplexError;
use tplex_core::settings::TemplateSettings;

use crate::lexer::Delimiters;

/// The directive vocabulary of an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    /// Action delimiters shared with the host template language.
    pub delimiters: Delimiters,
    /// Tag name of `{{Include "name" [pass]}}`.
    pub include_tag: String,
    /// Tag name of `{{Extend "layout" [pass]}}`.
    pub extend_tag: String,
    /// Tag name of `{{Block "name"}}...{{/Block}}`.
    pub block_tag: String,
    /// Tag name of `{{Super}}`; empty disables Super expansion.
    pub super_tag: String,
}

impl Default for Syntax {
    fn default() -> Self {
        Self::from_settings(&TemplateSettings::default())
    }
}

impl Syntax {
    /// Builds the syntax described by `settings`.
    pub fn from_settings(settings: &TemplateSettings) -> Self {
        Self {
            delimiters: Delimiters::new(&settings.delimiter_left, &settings.delimiter_right),
            include_tag: settings.include_tag.clone(),
            extend_tag: settings.extend_tag.clone(),
            block_tag: settings.block_tag.clone(),
            super_tag: settings.super_tag.clone(),
        }
    }

    /// A string that changes whenever any part of the syntax changes.
    pub fn identity(&self) -> String {
        [
            self.delimiters.left.as_str(),
            self.include_tag.as_str(),
            self.extend_tag.as_str(),
            self.block_tag.as_str(),
            self.super_tag.as_str(),
            self.delimiters.right.as_str(),
        ]
        .join("\u{1f}")
    }

    /// Wraps `content` in the delimiters.
    pub fn tag(&self, content: &str) -> String {
        self.delimiters.tag(content)
    }

    /// The host action invoking the named template with `pass` as its data.
    pub fn invocation(&self, name: &str, pass: &str) -> String {
        self.tag(&format!("template \"{name}\" {pass}"))
    }

    /// The `{{Super}}` marker, or `None` when Super expansion is disabled.
    pub fn super_marker(&self) -> Option<String> {
        (!self.super_tag.is_empty()).then(|| self.tag(&self.super_tag))
    }

    /// Checks that the delimiters and the tags directives need are non-empty.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` naming the first empty value.
    pub fn validate(&self) -> Result<(), TplexError> {
        self.delimiters.validate()?;
        for (what, tag) in [
            ("include", &self.include_tag),
            ("extend", &self.extend_tag),
            ("block", &self.block_tag),
        ] {
            if tag.is_empty() {
                return Err(TplexError::ConfigurationError(format!(
                    "{what} tag must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// One `{{Include "name" [pass]}}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// The logical partial name, without extension.
    pub name: String,
    /// The pass-object expression, if given.
    pub pass: Option<String>,
    /// Byte range of the whole directive.
    pub range: Range<usize>,
}

/// The first `{{Extend "layout" [pass]}}` of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendDirective {
    /// The logical layout name, without extension.
    pub layout: String,
    /// The pass-object expression, if given.
    pub pass: Option<String>,
    /// Byte range of the whole directive.
    pub range: Range<usize>,
}

/// One `{{Block "name"}}inner{{/Block}}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDirective {
    /// The block name.
    pub name: String,
    /// The text between the opening and closing tags.
    pub inner: String,
    /// Byte range of the whole directive, both tags included.
    pub range: Range<usize>,
}

#[derive(Debug)]
struct Compiled {
    identity: String,
    include: Regex,
    extend: Regex,
    block: Regex,
}

/// Regular expressions for the directives of one [`Syntax`].
#[derive(Debug, Default)]
pub struct DirectiveMatcher {
    compiled: Option<Compiled>,
}

impl DirectiveMatcher {
    /// Creates a matcher and builds its expressions for `syntax`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the syntax is invalid.
    pub fn new(syntax: &Syntax) -> Result<Self, TplexError> {
        let mut matcher = Self::default();
        matcher.ensure(syntax)?;
        Ok(matcher)
    }

    /// Rebuilds the expressions if `syntax` differs from the one they were
    /// built from. Returns `true` if a rebuild happened.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the syntax is invalid.
    pub fn ensure(&mut self, syntax: &Syntax) -> Result<bool, TplexError> {
        let identity = syntax.identity();
        if self
            .compiled
            .as_ref()
            .is_some_and(|c| c.identity == identity)
        {
            return Ok(false);
        }
        syntax.validate()?;
        tracing::debug!(
            left = %syntax.delimiters.left,
            right = %syntax.delimiters.right,
            "building directive expressions"
        );
        self.compiled = Some(Compiled {
            identity,
            include: build(&tagged_directive(syntax, &syntax.include_tag))?,
            extend: build(&tagged_directive(syntax, &syntax.extend_tag))?,
            block: build(&block_directive(syntax))?,
        });
        Ok(true)
    }

    fn compiled(&self) -> Result<&Compiled, TplexError> {
        self.compiled.as_ref().ok_or_else(|| {
            TplexError::ConfigurationError("directive matcher used before it was built".to_string())
        })
    }

    /// Returns every Include directive in `content`, in order.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the matcher has not been built.
    pub fn includes(&self, content: &str) -> Result<Vec<IncludeDirective>, TplexError> {
        Ok(self
            .compiled()?
            .include
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(IncludeDirective {
                    name: caps.get(1)?.as_str().to_string(),
                    pass: pass_expr(caps.get(2)),
                    range: whole.range(),
                })
            })
            .collect())
    }

    /// Returns the first Extend directive in `content`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the matcher has not been built.
    pub fn find_extend(&self, content: &str) -> Result<Option<ExtendDirective>, TplexError> {
        Ok(self.compiled()?.extend.captures(content).and_then(|caps| {
            Some(ExtendDirective {
                layout: caps.get(1)?.as_str().to_string(),
                pass: pass_expr(caps.get(2)),
                range: caps.get(0)?.range(),
            })
        }))
    }

    /// Returns every Extend directive range in `content`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the matcher has not been built.
    pub fn extend_ranges(&self, content: &str) -> Result<Vec<Range<usize>>, TplexError> {
        Ok(self
            .compiled()?
            .extend
            .find_iter(content)
            .map(|m| m.range())
            .collect())
    }

    /// Returns every Block directive in `content`, in order of appearance.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the matcher has not been built.
    pub fn blocks(&self, content: &str) -> Result<Vec<BlockDirective>, TplexError> {
        Ok(self
            .compiled()?
            .block
            .captures_iter(content)
            .filter_map(|caps| {
                Some(BlockDirective {
                    name: caps.get(1)?.as_str().to_string(),
                    inner: caps.get(2)?.as_str().to_string(),
                    range: caps.get(0)?.range(),
                })
            })
            .collect())
    }
}

fn build(pattern: &str) -> Result<Regex, TplexError> {
    Regex::new(pattern).map_err(|e| {
        TplexError::ConfigurationError(format!("invalid directive expression: {e}"))
    })
}

/// `left TAG\s+"name"(?:\s+pass)?\s*right`; the pass expression may not
/// contain the first character of the right delimiter.
fn tagged_directive(syntax: &Syntax, tag: &str) -> String {
    let left = regex::escape(&syntax.delimiters.left);
    let right = regex::escape(&syntax.delimiters.right);
    let right_first = syntax
        .delimiters
        .right
        .chars()
        .next()
        .map(|c| regex::escape(c.encode_utf8(&mut [0; 4])))
        .unwrap_or_default();
    format!(
        r#"{left}{tag}\s+"([^"]+)"(?:\s+([^{right_first}]+))?\s*{right}"#,
        tag = regex::escape(tag),
    )
}

fn block_directive(syntax: &Syntax) -> String {
    let left = regex::escape(&syntax.delimiters.left);
    let right = regex::escape(&syntax.delimiters.right);
    let tag = regex::escape(&syntax.block_tag);
    format!(r#"(?s){left}{tag}\s+"([^"]+)"\s*{right}(.*?){left}/{tag}{right}"#)
}

fn pass_expr(m: Option<regex::Match<'_>>) -> Option<String> {
    m.map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
