//! Extraction of `@@{ ... }` annotation blocks from SQL comments.
//!
//! The block grammar is a small HOCON-like subset: comma or newline separated
//! `key=value` pairs, quoted strings, `[a, b]` lists, bare `null`/`true`/`false`
//! literals and flag-style bare keys.

use crate::error::{Error, Result};
use crate::overrides::FieldAnnotationOverrides;
use crate::types::is_builtin_type;
use indexmap::IndexMap;
use serde::Serialize;

pub mod keys {
    pub const FIELD: &str = "field";
    pub const DYNAMIC_FIELD: &str = "dynamicField";
    pub const IS_DYNAMIC_FIELD: &str = "isDynamicField";
    pub const PROPERTY_NAME: &str = "propertyName";
    pub const PROPERTY_TYPE: &str = "propertyType";
    pub const ADAPTER: &str = "adapter";
    pub const NOT_NULL: &str = "notNull";
    pub const MAPPING_TYPE: &str = "mappingType";
    pub const SOURCE_TABLE: &str = "sourceTable";
    pub const ALIAS_PREFIX: &str = "aliasPrefix";
    pub const COLLECTION_KEY: &str = "collectionKey";
    pub const QUERY_RESULT: &str = "queryResult";
    pub const IMPLEMENTS: &str = "implements";
    pub const EXCLUDE_OVERRIDE_FIELDS: &str = "excludeOverrideFields";
    pub const PROPERTY_NAME_GENERATOR: &str = "propertyNameGenerator";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const SQL_TYPE_HINT: &str = "sqlTypeHint";
    pub const ENABLE_SYNC: &str = "enableSync";
    pub const SYNC_KEY_COLUMN_NAME: &str = "syncKeyColumnName";

    pub const ADAPTER_CUSTOM: &str = "custom";
    pub const ADAPTER_DEFAULT: &str = "default";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Null,
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

impl AnnotationValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Booleans may be written bare (`true`) or quoted (`"true"`).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationValue::Bool(b) => Some(*b),
            AnnotationValue::Str(s) if s.eq_ignore_ascii_case("true") => Some(true),
            AnnotationValue::Str(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// A single string counts as a one element list; a comma separated string
    /// is split.
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            AnnotationValue::List(items) => Some(items.clone()),
            AnnotationValue::Str(s) if s.is_empty() => Some(Vec::new()),
            AnnotationValue::Str(s) => Some(
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AnnotationValue::Null)
    }
}

pub type AnnotationMap = IndexMap<String, AnnotationValue>;

/// Parse every `@@{...}` block found in `lines` into one map; later keys win.
pub fn extract_annotations<S: AsRef<str>>(lines: &[S]) -> Result<AnnotationMap> {
    let mut out = AnnotationMap::new();
    for block in annotation_blocks(lines)? {
        for (key, value) in parse_block(&block)? {
            out.insert(key, value);
        }
    }
    Ok(out)
}

/// Parse annotation blocks that each describe one field, keyed by the value
/// of their `field` or `dynamicField` key.
pub fn extract_field_associated_annotations<S: AsRef<str>>(
    lines: &[S],
) -> Result<IndexMap<String, AnnotationMap>> {
    let mut out: IndexMap<String, AnnotationMap> = IndexMap::new();
    for block in annotation_blocks(lines)? {
        let map = parse_block(&block)?;
        insert_field_block(&mut out, &block, map)?;
    }
    Ok(out)
}

/// Annotations found in the comments of one statement, split by target.
#[derive(Debug, Clone, Default)]
pub struct CommentAnnotations {
    /// Blocks without a `field`/`dynamicField` key, merged in order.
    pub statement: AnnotationMap,
    pub fields: IndexMap<String, AnnotationMap>,
}

/// Sort every block in `lines` into statement-level or field-level
/// annotations depending on whether it carries an identifying key.
pub fn extract_comment_annotations<S: AsRef<str>>(lines: &[S]) -> Result<CommentAnnotations> {
    let mut out = CommentAnnotations::default();
    for block in annotation_blocks(lines)? {
        let map = parse_block(&block)?;
        if map.contains_key(keys::FIELD) || map.contains_key(keys::DYNAMIC_FIELD) {
            insert_field_block(&mut out.fields, &block, map)?;
        } else {
            out.statement.extend(map);
        }
    }
    Ok(out)
}

fn insert_field_block(
    out: &mut IndexMap<String, AnnotationMap>,
    block: &str,
    mut map: AnnotationMap,
) -> Result<()> {
    let field = map.shift_remove(keys::FIELD);
    let dynamic = map.shift_remove(keys::DYNAMIC_FIELD);
    let (name, is_dynamic) = match (field, dynamic) {
        (Some(_), Some(_)) => {
            return Err(Error::annotation(format!(
                "annotation block {} declares both `{}` and `{}`; exactly one is allowed",
                block.trim(),
                keys::FIELD,
                keys::DYNAMIC_FIELD
            )))
        }
        (None, None) => {
            return Err(Error::annotation(format!(
                "annotation block {} must declare exactly one of `{}` or `{}`",
                block.trim(),
                keys::FIELD,
                keys::DYNAMIC_FIELD
            )))
        }
        (Some(v), None) => (identity_value(keys::FIELD, &v)?, false),
        (None, Some(v)) => (identity_value(keys::DYNAMIC_FIELD, &v)?, true),
    };

    if is_dynamic {
        let has_type = map
            .get(keys::PROPERTY_TYPE)
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !has_type {
            return Err(Error::annotation(format!(
                "dynamic field `{}` must declare `{}`",
                name,
                keys::PROPERTY_TYPE
            )));
        }
        map.insert(keys::IS_DYNAMIC_FIELD.to_string(), AnnotationValue::Bool(true));
    }
    enrich_adapter(&name, &mut map)?;
    FieldAnnotationOverrides::from_map(&name, &map)?;

    match out.get_mut(&name) {
        Some(existing) => {
            let merged = merge_annotations(existing, &map);
            *existing = merged;
        }
        None => {
            out.insert(name, map);
        }
    }
    Ok(())
}

/// Layer `top` over `base`. A `propertyType` in `top` discards any adapter
/// that `base` derived for its own type.
pub fn merge_annotations(base: &AnnotationMap, top: &AnnotationMap) -> AnnotationMap {
    let mut out = base.clone();
    if top.contains_key(keys::PROPERTY_TYPE) && !top.contains_key(keys::ADAPTER) {
        out.shift_remove(keys::ADAPTER);
    }
    for (key, value) in top {
        out.insert(key.clone(), value.clone());
    }
    out
}

fn identity_value(key: &str, value: &AnnotationValue) -> Result<String> {
    match value {
        AnnotationValue::Str(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(Error::annotation(format!("`{}` must have a non-empty value", key))),
    }
}

fn enrich_adapter(field: &str, map: &mut AnnotationMap) -> Result<()> {
    let custom_type = map
        .get(keys::PROPERTY_TYPE)
        .and_then(AnnotationValue::as_str)
        .map(|t| !is_builtin_type(t));
    match map.get(keys::ADAPTER) {
        Some(value) => match value.as_str() {
            Some(keys::ADAPTER_CUSTOM) => {}
            Some(keys::ADAPTER_DEFAULT) => {
                if custom_type == Some(true) {
                    map.insert(
                        keys::ADAPTER.to_string(),
                        AnnotationValue::Str(keys::ADAPTER_CUSTOM.to_string()),
                    );
                }
            }
            _ => {
                return Err(Error::annotation(format!(
                    "field `{}` has invalid adapter value {:?}; expected `{}` or `{}`",
                    field,
                    value,
                    keys::ADAPTER_CUSTOM,
                    keys::ADAPTER_DEFAULT
                )))
            }
        },
        None => {
            if custom_type == Some(true) {
                map.insert(
                    keys::ADAPTER.to_string(),
                    AnnotationValue::Str(keys::ADAPTER_CUSTOM.to_string()),
                );
            }
        }
    }
    Ok(())
}

fn strip_comment_markers(line: &str) -> &str {
    let mut s = line.trim();
    if let Some(rest) = s.strip_prefix("--") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("/*") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("*/") {
        s = rest;
    }
    let s = s.trim_start();
    match s.strip_prefix('*') {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => s,
    }
}

/// Collect the raw text of every `@@{...}` block. A block may continue over
/// several comment lines and closes once its braces balance.
pub fn annotation_blocks<S: AsRef<str>>(lines: &[S]) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;

    for line in lines {
        let mut rest = strip_comment_markers(line.as_ref());
        loop {
            if current.is_none() {
                match rest.find("@@{") {
                    Some(idx) => {
                        current = Some(String::new());
                        depth = 0;
                        rest = &rest[idx + 2..];
                    }
                    None => break,
                }
            }
            let Some(buf) = current.as_mut() else { break };
            let mut closed_at = None;
            for (idx, ch) in rest.char_indices() {
                buf.push(ch);
                if in_quote {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        in_quote = false;
                    }
                    continue;
                }
                match ch {
                    '"' => in_quote = true,
                    '{' => depth += 1,
                    '}' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            closed_at = Some(idx + ch.len_utf8());
                            break;
                        }
                    }
                    _ => {}
                }
            }
            match closed_at {
                Some(end) => {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    rest = &rest[end..];
                }
                None => {
                    buf.push('\n');
                    break;
                }
            }
        }
    }

    if let Some(open) = current {
        return Err(Error::annotation(format!(
            "unterminated annotation block `@@{}`",
            open.trim_end()
        )));
    }
    Ok(blocks)
}

/// Parse one `{ ... }` block.
pub fn parse_block(text: &str) -> Result<AnnotationMap> {
    let mut parser = BlockParser {
        chars: text.chars().collect(),
        pos: 0,
        text,
    };
    parser.block()
}

struct BlockParser<'a> {
    chars: Vec<char>,
    pos: usize,
    text: &'a str,
}

impl BlockParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, msg: &str) -> Error {
        Error::annotation(format!("{} in `@@{}`", msg, self.text.trim()))
    }

    fn skip_inline_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c == ' ' || c == '\t' || c == '\r') {
            self.pos += 1;
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn block(&mut self) -> Result<AnnotationMap> {
        self.skip_ws();
        if self.peek() != Some('{') {
            return Err(self.error("expected `{`"));
        }
        self.pos += 1;
        let mut map = AnnotationMap::new();
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace() || c == ',') {
                self.pos += 1;
            }
            match self.peek() {
                None => return Err(self.error("unbalanced braces")),
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }
            let key = self.key()?;
            self.skip_inline_ws();
            let value = if matches!(self.peek(), Some('=') | Some(':')) {
                self.pos += 1;
                self.skip_inline_ws();
                self.value()?
            } else {
                AnnotationValue::Str(String::new())
            };
            map.insert(key, value);
            self.skip_inline_ws();
            match self.peek() {
                Some(',') | Some('\n') | Some('}') => {}
                None => return Err(self.error("unbalanced braces")),
                Some(c) => return Err(self.error(&format!("unexpected `{}` after value", c))),
            }
        }
        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(self.error("unexpected text after closing brace"));
        }
        Ok(map)
    }

    fn key(&mut self) -> Result<String> {
        if self.peek() == Some('"') {
            return self.quoted();
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || "=:,{}[]\"".contains(c) {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a key"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> Result<AnnotationValue> {
        match self.peek() {
            Some('"') => Ok(AnnotationValue::Str(self.quoted()?)),
            Some('[') => self.list(),
            Some('{') => Err(self.error("nested objects are not supported")),
            _ => {
                let raw = self.unquoted(&[',', '}', '\n'])?;
                Ok(match raw.as_str() {
                    "null" => AnnotationValue::Null,
                    "true" => AnnotationValue::Bool(true),
                    "false" => AnnotationValue::Bool(false),
                    _ => AnnotationValue::Str(raw),
                })
            }
        }
    }

    /// Reads up to a terminator; commas inside `<...>` belong to the value so
    /// generic types such as `HashMap<String, i64>` need no quoting.
    fn unquoted(&mut self, terminators: &[char]) -> Result<String> {
        let start = self.pos;
        let mut angle = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '<' => angle += 1,
                '>' => angle = angle.saturating_sub(1),
                '{' | '[' | '"' => return Err(self.error(&format!("unexpected `{}` in value", c))),
                _ if terminators.contains(&c) && (angle == 0 || c == '\n') => break,
                _ => {}
            }
            self.pos += 1;
        }
        if angle > 0 {
            return Err(self.error("unbalanced `<` in value"));
        }
        Ok(self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .trim()
            .to_string())
    }

    fn list(&mut self) -> Result<AnnotationValue> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.error("unterminated list")),
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some('"') => items.push(self.quoted()?),
                Some(_) => {
                    let item = self.unquoted(&[',', ']', '\n'])?;
                    if item.is_empty() {
                        return Err(self.error("empty list element"));
                    }
                    items.push(item);
                }
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {}
                None => return Err(self.error("unterminated list")),
                Some(c) => return Err(self.error(&format!("unexpected `{}` in list", c))),
            }
        }
        Ok(AnnotationValue::List(items))
    }

    fn quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let Some(esc) = self.peek() else {
                        return Err(self.error("unterminated escape"));
                    };
                    self.pos += 1;
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        'u' => {
                            let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                            let code = u32::from_str_radix(&hex, 16)
                                .ok()
                                .filter(|_| hex.len() == 4)
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            self.pos += 4;
                            out.push(code);
                        }
                        other => {
                            return Err(self.error(&format!("invalid escape `\\{}`", other)))
                        }
                    }
                }
                _ => out.push(c),
            }
        }
    }
}
