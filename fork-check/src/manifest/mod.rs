//! Dependency manifest editing.
//!
//! The manifest is a TOML document. Exactly one source value and one branch
//! value are rewritten by splicing new text over their byte spans; every other
//! byte, line endings and comments included, is written back untouched.

pub mod backup;

use crate::utils::errors::{HarnessError, Result};
use std::fs;
use std::ops::Range;
use std::path::Path;
use toml_edit::{ImDocument, Item, Table, Value};

/// Which keys of the manifest identify the dependency under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFields {
    /// Key holding the fetch URL
    pub source_key: String,

    /// Key holding the ref name
    pub branch_key: String,

    /// Only look below a table or inline table with this name
    pub dependency: Option<String>,
}

impl Default for ManifestFields {
    fn default() -> Self {
        Self {
            source_key: "source".to_string(),
            branch_key: "branch".to_string(),
            dependency: None,
        }
    }
}

/// Current `(source, branch)` values of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub source: String,
    pub branch: String,
}

/// A string value and where its raw text sits in the manifest.
#[derive(Debug, Clone)]
struct Located {
    value: String,
    span: Range<usize>,
}

/// Occurrences of one key seen while walking the document.
struct KeyMatch<'a> {
    key: &'a str,
    /// One entry per occurrence; `None` when the value is not a located string
    found: Vec<Option<Located>>,
}

impl<'a> KeyMatch<'a> {
    fn new(key: &'a str) -> Self {
        Self {
            key,
            found: Vec::new(),
        }
    }

    fn visit(&mut self, value: &Value) {
        let located = match (value.as_str(), value.span()) {
            (Some(text), Some(span)) => Some(Located {
                value: text.to_string(),
                span,
            }),
            _ => None,
        };
        self.found.push(located);
    }

    /// The single string value seen, or why there isn't one.
    fn single(self, scope: Option<&str>) -> Result<Located> {
        let location = match scope {
            Some(dependency) => format!(" under `{dependency}`"),
            None => String::new(),
        };
        match self.found.as_slice() {
            [Some(located)] => Ok(located.clone()),
            [None] => Err(HarnessError::MalformedManifest(format!(
                "`{}`{location} is not a string",
                self.key
            ))),
            [] => Err(HarnessError::MalformedManifest(format!(
                "no `{}` key found{location}",
                self.key
            ))),
            many => Err(HarnessError::MalformedManifest(format!(
                "found {} `{}` keys{location}, expected exactly one",
                many.len(),
                self.key
            ))),
        }
    }
}

struct Walker<'a> {
    scope: Option<&'a str>,
    source: KeyMatch<'a>,
    branch: KeyMatch<'a>,
}

impl<'a> Walker<'a> {
    fn table(&mut self, table: &Table, in_scope: bool) {
        for (name, item) in table.iter() {
            self.entry(name, item, in_scope);
        }
    }

    fn entry(&mut self, name: &str, item: &Item, in_scope: bool) {
        if in_scope {
            if let Some(matcher) = self.matcher(name) {
                match item.as_value() {
                    Some(value) => matcher.visit(value),
                    // A table where a string belongs still counts as an occurrence.
                    None => matcher.found.push(None),
                }
                return;
            }
        }

        let in_scope = in_scope || self.scope == Some(name);
        match item {
            Item::Table(table) => self.table(table, in_scope),
            Item::ArrayOfTables(tables) => {
                for table in tables.iter() {
                    self.table(table, in_scope);
                }
            }
            Item::Value(value) => self.value(value, in_scope),
            Item::None => {}
        }
    }

    fn value(&mut self, value: &Value, in_scope: bool) {
        match value {
            Value::InlineTable(inline) => {
                for (name, value) in inline.iter() {
                    if in_scope {
                        if let Some(matcher) = self.matcher(name) {
                            matcher.visit(value);
                            continue;
                        }
                    }
                    let in_scope = in_scope || self.scope == Some(name);
                    self.value(value, in_scope);
                }
            }
            Value::Array(array) => {
                for value in array.iter() {
                    self.value(value, in_scope);
                }
            }
            _ => {}
        }
    }

    fn matcher(&mut self, name: &str) -> Option<&mut KeyMatch<'a>> {
        if name == self.source.key {
            Some(&mut self.source)
        } else if name == self.branch.key {
            Some(&mut self.branch)
        } else {
            None
        }
    }
}

/// Locate the single source and branch values of `content`.
fn locate(content: &str, fields: &ManifestFields) -> Result<(Located, Located)> {
    if fields.source_key == fields.branch_key {
        return Err(HarnessError::Config(format!(
            "source and branch keys are both `{}`",
            fields.source_key
        )));
    }

    let doc = ImDocument::parse(content)
        .map_err(|e| HarnessError::MalformedManifest(e.to_string()))?;

    let scope = fields.dependency.as_deref();
    let mut walker = Walker {
        scope,
        source: KeyMatch::new(&fields.source_key),
        branch: KeyMatch::new(&fields.branch_key),
    };
    walker.table(doc.as_table(), scope.is_none());

    Ok((walker.source.single(scope)?, walker.branch.single(scope)?))
}

/// TOML text for a basic string holding `value`.
fn encode_string(value: &str) -> String {
    Value::from(value).decorated("", "").to_string()
}

/// Read the current source and branch without changing anything.
pub fn current_pin(content: &str, fields: &ManifestFields) -> Result<Pin> {
    let (source, branch) = locate(content, fields)?;
    Ok(Pin {
        source: source.value,
        branch: branch.value,
    })
}

/// Produce a copy of `content` pointing at `source` / `branch`.
///
/// An empty `branch` falls back to `default_branch`. Fails with
/// `MalformedManifest` unless each key occurs exactly once with a string value.
/// Only the two value literals change; all surrounding bytes are copied as is.
pub fn substitute(
    content: &str,
    fields: &ManifestFields,
    source: &str,
    branch: &str,
    default_branch: &str,
) -> Result<String> {
    let branch = match branch.trim() {
        "" => default_branch,
        branch => branch,
    };
    let (source_at, branch_at) = locate(content, fields)?;

    let mut edits = [
        (source_at.span, encode_string(source)),
        (branch_at.span, encode_string(branch)),
    ];
    edits.sort_by_key(|(span, _)| span.start);

    let mut out = String::with_capacity(content.len() + source.len() + branch.len());
    let mut cursor = 0;
    for (span, text) in &edits {
        out.push_str(&content[cursor..span.start]);
        out.push_str(text);
        cursor = span.end;
    }
    out.push_str(&content[cursor..]);
    Ok(out)
}

/// Read the live manifest.
pub fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))
}

/// Overwrite the live manifest.
pub fn write(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| HarnessError::io(path, e))
}
