//! Layout inheritance: `Extend`, `Block`, and `Super`.
//!
//! A child template names its layout with `{{Extend "layout" [pass]}}` and
//! supplies overrides in `{{Block "name"}}...{{/Block}}` regions. The
//! layout is walked in order of appearance of its own Block regions:
//!
//! - an overridden region becomes `{{template "name" pass}}` and the
//!   override body is emitted as a named block; `{{Super}}` in the body
//!   expands to the layout's own content for that region;
//! - the second and later occurrences of the same name are emitted as
//!   `name.1`, `name.2`, ... so each keeps its own Super content;
//! - a region without an override is replaced by its own inner content.
//!
//! Overrides that match no region in the layout are dropped. Only one level
//! of inheritance is resolved; an `Extend` inside the layout is removed.

use std::collections::HashMap;

use tplex_core::error::TplexError;
use tracing::warn;

use crate::directive::{DirectiveMatcher, Syntax};

/// Block overrides declared by a child template, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable {
    overrides: HashMap<String, String>,
}

impl BlockTable {
    /// Collects every Block region of `child`. A later region with the same
    /// name replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the matcher has not been built.
    pub fn from_child(child: &str, matcher: &DirectiveMatcher) -> Result<Self, TplexError> {
        let mut table = Self::default();
        for block in matcher.blocks(child)? {
            table.overrides.insert(block.name, block.inner);
        }
        Ok(table)
    }

    /// Returns the override body for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.overrides.get(name).map(String::as_str)
    }

    /// Number of overrides.
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Returns `true` if the child declared no blocks.
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// The layout rewritten for one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOutput {
    /// The layout text with every Block region rewritten.
    pub content: String,
    /// Named block bodies to register next to the root, in layout order.
    pub blocks: Vec<(String, String)>,
}

/// Merges `overrides` into `layout`.
///
/// `pass` is the expression handed to every emitted block invocation and
/// defaults to `.`.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the matcher has not been built.
pub fn apply_layout(
    layout: &str,
    overrides: &BlockTable,
    pass: Option<&str>,
    matcher: &DirectiveMatcher,
    syntax: &Syntax,
) -> Result<ExtendOutput, TplexError> {
    let layout = strip_nested_extends(layout, matcher)?;
    let pass = pass.unwrap_or(".");
    let marker = syntax.super_marker();

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut uses_super: HashMap<&str, bool> = HashMap::new();
    let mut blocks = Vec::new();
    let mut content = String::with_capacity(layout.len());
    let mut cursor = 0;

    let regions = matcher.blocks(&layout)?;
    for region in &regions {
        content.push_str(&layout[cursor..region.range.start]);
        cursor = region.range.end;

        let Some(body) = overrides.get(&region.name) else {
            content.push_str(&region.inner);
            continue;
        };

        let seen = occurrences.entry(region.name.as_str()).or_insert(0);
        let emitted = if *seen == 0 {
            region.name.clone()
        } else {
            format!("{}.{}", region.name, seen)
        };
        *seen += 1;

        let has_super = *uses_super
            .entry(region.name.as_str())
            .or_insert_with(|| marker.as_deref().is_some_and(|m| body.contains(m)));
        let resolved = match marker.as_deref() {
            Some(m) if has_super => body.replace(m, &region.inner),
            _ => body.to_string(),
        };

        content.push_str(&syntax.invocation(&emitted, pass));
        blocks.push((emitted, resolved));
    }
    content.push_str(&layout[cursor..]);

    Ok(ExtendOutput { content, blocks })
}

fn strip_nested_extends(layout: &str, matcher: &DirectiveMatcher) -> Result<String, TplexError> {
    let ranges = matcher.extend_ranges(layout)?;
    if ranges.is_empty() {
        return Ok(layout.to_string());
    }
    warn!(
        count = ranges.len(),
        "layout extends another layout; only one level of inheritance is resolved"
    );
    let mut out = String::with_capacity(layout.len());
    let mut cursor = 0;
    for range in ranges {
        out.push_str(&layout[cursor..range.start]);
        cursor = range.end;
    }
    out.push_str(&layout[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(child: &str, layout: &str, pass: Option<&str>) -> ExtendOutput {
        let syntax = Syntax::default();
        let matcher = DirectiveMatcher::new(&syntax).unwrap();
        let table = BlockTable::from_child(child, &matcher).unwrap();
        apply_layout(layout, &table, pass, &matcher, &syntax).unwrap()
    }

    #[test]
    fn test_override_with_super() {
        let out = run(
            r#"{{Extend "base"}}{{Block "body"}}CHILD-{{Super}}{{/Block}}"#,
            r#"<main>{{Block "body"}}LAYOUT{{/Block}}</main>"#,
            None,
        );
        assert_eq!(out.content, r#"<main>{{template "body" .}}</main>"#);
        assert_eq!(out.blocks, vec![("body".to_string(), "CHILD-LAYOUT".to_string())]);
    }

    #[test]
    fn test_non_overridden_block_keeps_layout_content() {
        let out = run(
            r#"{{Extend "base"}}"#,
            r#"<title>{{Block "title"}}Default{{/Block}}</title>"#,
            None,
        );
        assert_eq!(out.content, "<title>Default</title>");
        assert!(out.blocks.is_empty());
    }

    #[test]
    fn test_unmatched_override_dropped() {
        let out = run(
            r#"{{Block "sidebar"}}SIDE{{/Block}}{{Block "body"}}B{{/Block}}"#,
            r#"{{Block "body"}}x{{/Block}}"#,
            None,
        );
        assert_eq!(out.blocks.len(), 1);
        assert!(!out.content.contains("SIDE"));
        assert!(out.blocks.iter().all(|(_, body)| !body.contains("SIDE")));
    }

    #[test]
    fn test_repeated_block_gets_suffix_and_own_super() {
        let out = run(
            r#"{{Block "cell"}}[{{Super}}]{{/Block}}"#,
            r#"{{Block "cell"}}one{{/Block}}|{{Block "cell"}}two{{/Block}}|{{Block "cell"}}three{{/Block}}"#,
            None,
        );
        assert_eq!(
            out.content,
            r#"{{template "cell" .}}|{{template "cell.1" .}}|{{template "cell.2" .}}"#
        );
        assert_eq!(
            out.blocks,
            vec![
                ("cell".to_string(), "[one]".to_string()),
                ("cell.1".to_string(), "[two]".to_string()),
                ("cell.2".to_string(), "[three]".to_string()),
            ]
        );
    }

    #[test]
    fn test_repeated_block_without_super_reuses_body() {
        let out = run(
            r#"{{Block "b"}}X{{/Block}}"#,
            r#"{{Block "b"}}1{{/Block}}{{Block "b"}}2{{/Block}}"#,
            None,
        );
        assert_eq!(
            out.blocks,
            vec![("b".to_string(), "X".to_string()), ("b.1".to_string(), "X".to_string())]
        );
    }

    #[test]
    fn test_pass_expression() {
        let out = run(
            r#"{{Block "b"}}X{{/Block}}"#,
            r#"{{Block "b"}}{{/Block}}"#,
            Some(".Page"),
        );
        assert_eq!(out.content, r#"{{template "b" .Page}}"#);
    }

    #[test]
    fn test_layout_order_wins() {
        let out = run(
            r#"{{Block "second"}}2{{/Block}}{{Block "first"}}1{{/Block}}"#,
            r#"{{Block "first"}}{{/Block}}{{Block "second"}}{{/Block}}"#,
            None,
        );
        let names: Vec<&str> = out.blocks.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_nested_extend_in_layout_is_stripped() {
        let out = run(
            r#"{{Block "b"}}X{{/Block}}"#,
            r#"{{Extend "root"}}<{{Block "b"}}{{/Block}}>"#,
            None,
        );
        assert_eq!(out.content, r#"<{{template "b" .}}>"#);
    }

    #[test]
    fn test_super_disabled() {
        let syntax = Syntax {
            super_tag: String::new(),
            ..Syntax::default()
        };
        let matcher = DirectiveMatcher::new(&syntax).unwrap();
        let table = BlockTable::from_child(r#"{{Block "b"}}A{{Super}}{{/Block}}"#, &matcher).unwrap();
        let out = apply_layout(r#"{{Block "b"}}L{{/Block}}"#, &table, None, &matcher, &syntax).unwrap();
        assert_eq!(out.blocks[0].1, "A{{Super}}");
    }

    #[test]
    fn test_block_table_last_wins() {
        let matcher = DirectiveMatcher::new(&Syntax::default()).unwrap();
        let table =
            BlockTable::from_child(r#"{{Block "a"}}1{{/Block}}{{Block "a"}}2{{/Block}}"#, &matcher)
                .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a"), Some("2"));
    }
}
