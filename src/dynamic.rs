//! Folding of joined columns into nested dynamic fields.
//!
//! A dynamic field with a `mappingType` consumes every projected column that
//! comes from its `sourceTable` (and starts with its `aliasPrefix`, when one
//! is given). Consumed columns form the skip set and never appear as
//! top-level properties of the row type.

use crate::error::{Error, Result};
use crate::overrides::{DynamicMapping, MappingType, StatementAnnotations};
use crate::pipeline::{AnnotatedField, AnnotatedStatement};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// One physical column inside a nested dynamic value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    /// Result column alias.
    pub column: String,
    /// Property name inside the nested type, prefix stripped.
    pub property_name: String,
    pub property_type: String,
    /// Nullability inside the nested value, ignoring the outer join.
    pub not_null: bool,
    pub adapter: bool,
}

impl MappedColumn {
    pub fn rust_type(&self) -> String {
        if self.not_null {
            self.property_type.clone()
        } else {
            format!("Option<{}>", self.property_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicFieldMapping {
    pub field_name: String,
    pub property_name: String,
    /// Nested type (or shared result name for `entity`).
    pub property_type: String,
    pub kind: MappingType,
    pub source_table: String,
    pub alias_prefix: Option<String>,
    pub columns: Vec<MappedColumn>,
    /// `perRow`/`entity`: false when the joined row may be absent.
    /// `collection`: always true, an absent row gives an empty list.
    pub not_null: bool,
    /// Column identifying one parent row when grouping a collection.
    pub parent_key: Option<String>,
    /// Column identifying one collection item.
    pub item_key: Option<String>,
}

fn strip_prefix_ci<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    if name.len() >= prefix.len()
        && name.is_char_boundary(prefix.len())
        && name[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&name[prefix.len()..])
    } else {
        None
    }
}

fn from_source(field: &AnnotatedField, source_table: &str, aliases: &IndexMap<String, String>) -> bool {
    if field
        .source
        .alias_path
        .iter()
        .any(|a| a.eq_ignore_ascii_case(source_table))
    {
        return true;
    }
    let Some(alias) = &field.source.table_alias else {
        return false;
    };
    alias.eq_ignore_ascii_case(source_table)
        || aliases
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(alias) && v.eq_ignore_ascii_case(source_table))
}

/// Projected columns consumed by one mapped dynamic field.
pub fn mapped_columns<'a>(
    mapping: &DynamicMapping,
    fields: &'a [AnnotatedField],
    aliases: &IndexMap<String, String>,
) -> Vec<&'a AnnotatedField> {
    fields
        .iter()
        .filter(|f| !f.is_dynamic())
        .filter(|f| from_source(f, &mapping.source_table, aliases))
        .filter(|f| match &mapping.alias_prefix {
            Some(prefix) => strip_prefix_ci(&f.name, prefix).is_some(),
            None => true,
        })
        .collect()
}

/// Aliases consumed by any dynamic field of `fields`.
pub fn get_mapped_columns(
    fields: &[AnnotatedField],
    aliases: &IndexMap<String, String>,
) -> IndexSet<String> {
    let mut out = IndexSet::new();
    for field in fields {
        if let Some(mapping) = &field.overrides.mapping {
            out.extend(
                mapped_columns(mapping, fields, aliases)
                    .into_iter()
                    .map(|f| f.name.clone()),
            );
        }
    }
    out
}

/// Aliases of a processed statement that must not be emitted flat.
pub fn compute_skip_set(statement: &AnnotatedStatement) -> IndexSet<String> {
    statement
        .dynamic_mappings
        .iter()
        .flat_map(|m| m.columns.iter().map(|c| c.column.clone()))
        .collect()
}

pub fn flat_fields(statement: &AnnotatedStatement) -> Vec<&AnnotatedField> {
    let skip = compute_skip_set(statement);
    statement
        .fields
        .iter()
        .filter(|f| !skip.contains(&f.name))
        .collect()
}

pub fn build_mappings(
    statement: &str,
    annotations: &StatementAnnotations,
    fields: &[AnnotatedField],
    aliases: &IndexMap<String, String>,
) -> Result<Vec<DynamicFieldMapping>> {
    let error = |message: String| Error::DynamicField {
        statement: statement.to_string(),
        message,
    };

    let mut owners: IndexMap<String, String> = IndexMap::new();
    let mut out = Vec::new();
    for field in fields {
        let Some(mapping) = &field.overrides.mapping else {
            continue;
        };
        let consumed = mapped_columns(mapping, fields, aliases);
        if consumed.is_empty() {
            return Err(error(format!(
                "dynamic field `{}` maps no columns from `{}`{}",
                field.name,
                mapping.source_table,
                mapping
                    .alias_prefix
                    .as_ref()
                    .map(|p| format!(" with prefix `{}`", p))
                    .unwrap_or_default()
            )));
        }
        for column in &consumed {
            if let Some(owner) = owners.insert(column.name.clone(), field.name.clone()) {
                return Err(error(format!(
                    "column `{}` is mapped by both `{}` and `{}`",
                    column.name, owner, field.name
                )));
            }
        }

        let columns: Vec<MappedColumn> = consumed
            .iter()
            .map(|c| {
                let stripped = mapping
                    .alias_prefix
                    .as_deref()
                    .and_then(|p| strip_prefix_ci(&c.name, p))
                    .filter(|s| !s.is_empty())
                    .unwrap_or(&c.name);
                MappedColumn {
                    column: c.name.clone(),
                    property_name: c.overrides.property_name.clone().unwrap_or_else(|| {
                        annotations.property_name_generator.property_name(stripped)
                    }),
                    property_type: c.property_type.clone(),
                    not_null: c.overrides.not_null.unwrap_or(c.source.declared_not_null),
                    adapter: c.adapter,
                }
            })
            .collect();

        let (not_null, parent_key, item_key) = match mapping.mapping_type {
            MappingType::PerRow | MappingType::Entity => {
                let not_null = field
                    .overrides
                    .not_null
                    .unwrap_or_else(|| !consumed.iter().any(|c| c.source.joined_nullable));
                (not_null, None, None)
            }
            MappingType::Collection => {
                let parent = annotations.collection_key.clone().ok_or_else(|| {
                    error(format!(
                        "collection `{}` requires a statement-level `collectionKey`",
                        field.name
                    ))
                })?;
                let parent = fields
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case(&parent))
                    .map(|f| f.name.clone())
                    .ok_or_else(|| {
                        error(format!(
                            "collectionKey `{}` is not a result column",
                            parent
                        ))
                    })?;
                let item = item_key(mapping, &columns);
                (true, Some(parent), item)
            }
        };

        out.push(DynamicFieldMapping {
            field_name: field.name.clone(),
            property_name: field.property_name.clone(),
            property_type: field.property_type.clone(),
            kind: mapping.mapping_type,
            source_table: mapping.source_table.clone(),
            alias_prefix: mapping.alias_prefix.clone(),
            columns,
            not_null,
            parent_key,
            item_key,
        });
    }
    Ok(out)
}

/// The field's own `collectionKey`, as a full alias or after the prefix;
/// otherwise the first mapped column.
fn item_key(mapping: &DynamicMapping, columns: &[MappedColumn]) -> Option<String> {
    if let Some(key) = &mapping.collection_key {
        let prefixed = mapping
            .alias_prefix
            .as_ref()
            .map(|p| format!("{}{}", p, key));
        let found = columns.iter().find(|c| {
            c.column.eq_ignore_ascii_case(key)
                || prefixed
                    .as_deref()
                    .map(|p| c.column.eq_ignore_ascii_case(p))
                    .unwrap_or(false)
        });
        if let Some(column) = found {
            return Some(column.column.clone());
        }
    }
    columns.first().map(|c| c.column.clone())
}
