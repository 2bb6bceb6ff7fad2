//! Typed views over raw annotation maps.

use crate::annotations::{keys, AnnotationMap, AnnotationValue};
use crate::error::{Error, Result};
use heck::{ToLowerCamelCase, ToSnakeCase};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingType {
    PerRow,
    Collection,
    Entity,
}

impl FromStr for MappingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "perRow" => Ok(MappingType::PerRow),
            "collection" => Ok(MappingType::Collection),
            "entity" => Ok(MappingType::Entity),
            other => Err(Error::annotation(format!(
                "unsupported mappingType `{}`; expected one of perRow, collection, entity",
                other
            ))),
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingType::PerRow => "perRow",
            MappingType::Collection => "collection",
            MappingType::Entity => "entity",
        };
        f.write_str(s)
    }
}

/// How a dynamic field folds joined columns into a nested value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynamicMapping {
    pub mapping_type: MappingType,
    pub source_table: String,
    pub alias_prefix: Option<String>,
    pub collection_key: Option<String>,
}

/// Resolved per-field overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldAnnotationOverrides {
    pub property_name: Option<String>,
    pub property_type: Option<String>,
    pub not_null: Option<bool>,
    /// A custom conversion function is required for this field.
    pub adapter: bool,
    pub sql_type_hint: Option<String>,
    pub default_value: Option<String>,
    pub is_dynamic_field: bool,
    pub mapping: Option<DynamicMapping>,
}

fn string_value(field: &str, map: &AnnotationMap, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(AnnotationValue::Null) => Ok(None),
        Some(AnnotationValue::Str(s)) => Ok(Some(s.clone())),
        Some(AnnotationValue::Bool(b)) => Ok(Some(b.to_string())),
        Some(AnnotationValue::List(_)) => Err(Error::annotation(format!(
            "`{}` on `{}` must be a single value, not a list",
            key, field
        ))),
    }
}

fn bool_value(field: &str, map: &AnnotationMap, key: &str) -> Result<Option<bool>> {
    match map.get(key) {
        None | Some(AnnotationValue::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            Error::annotation(format!("`{}` on `{}` must be true or false", key, field))
        }),
    }
}

impl FieldAnnotationOverrides {
    /// Validate and convert the annotation map of `field`.
    pub fn from_map(field: &str, map: &AnnotationMap) -> Result<Self> {
        let is_dynamic_field = bool_value(field, map, keys::IS_DYNAMIC_FIELD)?.unwrap_or(false);
        let property_type = string_value(field, map, keys::PROPERTY_TYPE)?;
        let mapping_type = string_value(field, map, keys::MAPPING_TYPE)?;

        if is_dynamic_field && property_type.is_none() {
            return Err(Error::annotation(format!(
                "dynamic field `{}` must declare `{}`",
                field,
                keys::PROPERTY_TYPE
            )));
        }

        let mapping = match mapping_type {
            None => None,
            Some(raw) => {
                if !is_dynamic_field {
                    return Err(Error::annotation(format!(
                        "`{}` on `{}` requires `{}`",
                        keys::MAPPING_TYPE,
                        field,
                        keys::DYNAMIC_FIELD
                    )));
                }
                let mapping_type: MappingType = raw.parse()?;
                let source_table =
                    string_value(field, map, keys::SOURCE_TABLE)?.ok_or_else(|| {
                        Error::annotation(format!(
                            "dynamic field `{}` with `{}` must declare `{}`",
                            field,
                            keys::MAPPING_TYPE,
                            keys::SOURCE_TABLE
                        ))
                    })?;
                Some(DynamicMapping {
                    mapping_type,
                    source_table,
                    alias_prefix: string_value(field, map, keys::ALIAS_PREFIX)?,
                    collection_key: string_value(field, map, keys::COLLECTION_KEY)?,
                })
            }
        };

        let adapter = match string_value(field, map, keys::ADAPTER)?.as_deref() {
            None | Some(keys::ADAPTER_DEFAULT) => false,
            Some(keys::ADAPTER_CUSTOM) => true,
            Some(other) => {
                return Err(Error::annotation(format!(
                    "field `{}` has invalid adapter value `{}`",
                    field, other
                )))
            }
        };

        Ok(FieldAnnotationOverrides {
            property_name: string_value(field, map, keys::PROPERTY_NAME)?,
            property_type,
            not_null: bool_value(field, map, keys::NOT_NULL)?,
            adapter,
            sql_type_hint: string_value(field, map, keys::SQL_TYPE_HINT)?,
            default_value: string_value(field, map, keys::DEFAULT_VALUE)?,
            is_dynamic_field,
            mapping,
        })
    }
}

/// Strategy for turning column aliases into property names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PropertyNameGenerator {
    #[default]
    SnakeCase,
    LowerCamelCase,
    Plain,
}

impl FromStr for PropertyNameGenerator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snake_case" | "snakeCase" => Ok(PropertyNameGenerator::SnakeCase),
            "lowerCamelCase" | "camelCase" => Ok(PropertyNameGenerator::LowerCamelCase),
            "plain" => Ok(PropertyNameGenerator::Plain),
            other => Err(Error::annotation(format!(
                "unsupported propertyNameGenerator `{}`; expected snake_case, lowerCamelCase or plain",
                other
            ))),
        }
    }
}

impl PropertyNameGenerator {
    pub fn property_name(&self, column: &str) -> String {
        match self {
            PropertyNameGenerator::SnakeCase => column.to_snake_case(),
            PropertyNameGenerator::LowerCamelCase => column.to_lower_camel_case(),
            PropertyNameGenerator::Plain => column.to_string(),
        }
    }
}

/// Annotations that apply to a whole statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementAnnotations {
    pub query_result: Option<String>,
    pub collection_key: Option<String>,
    pub implements: Vec<String>,
    pub exclude_override_fields: Vec<String>,
    pub property_name_generator: PropertyNameGenerator,
    /// Keys this crate does not interpret, kept for downstream consumers.
    pub extra: AnnotationMap,
}

impl StatementAnnotations {
    pub fn from_map(statement: &str, map: &AnnotationMap) -> Result<Self> {
        let mut out = StatementAnnotations::default();
        for (key, value) in map {
            match key.as_str() {
                keys::QUERY_RESULT => out.query_result = string_value(statement, map, key)?,
                keys::COLLECTION_KEY => out.collection_key = string_value(statement, map, key)?,
                keys::IMPLEMENTS => out.implements = list_value(statement, key, value)?,
                keys::EXCLUDE_OVERRIDE_FIELDS => {
                    out.exclude_override_fields = list_value(statement, key, value)?
                }
                keys::PROPERTY_NAME_GENERATOR => {
                    if let Some(raw) = string_value(statement, map, key)? {
                        out.property_name_generator = raw.parse()?;
                    }
                }
                _ => {
                    out.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }
}

fn list_value(statement: &str, key: &str, value: &AnnotationValue) -> Result<Vec<String>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    value.as_list().ok_or_else(|| {
        Error::annotation(format!(
            "`{}` on `{}` must be a string or a list of strings",
            key, statement
        ))
    })
}
