//! Row shapes shared by several statements of a namespace through
//! `queryResult`.

use crate::dynamic::DynamicFieldMapping;
use crate::error::{ConflictSide, Error, Result, SharedResultConflict};
use crate::pipeline::{AnnotatedField, AnnotatedStatement};
use indexmap::{IndexMap, IndexSet};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct SharedResult {
    /// `namespace::name`.
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub fields: Vec<AnnotatedField>,
    /// Statement that first registered the result.
    pub statement: String,
    pub source_file: PathBuf,
    pub implements: Vec<String>,
    pub collection_key: Option<String>,
    pub dynamic_mappings: Vec<DynamicFieldMapping>,
}

type Key = (String, String);

/// Registry of shared results for one run.
#[derive(Debug, Default)]
pub struct SharedResultManager {
    results: IndexMap<Key, SharedResult>,
    exclude_override_fields: IndexMap<Key, IndexSet<String>>,
}

impl SharedResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `statement` under its `queryResult` name. The first
    /// registration defines the shape; later ones must agree with it on
    /// every field's name, nullability and property type.
    pub fn register_shared_result(
        &mut self,
        statement: &AnnotatedStatement,
        namespace: &str,
    ) -> Result<&SharedResult> {
        let name = statement.query_result().ok_or_else(|| {
            Error::annotation(format!(
                "statement `{}` has no queryResult to register",
                statement.name
            ))
        })?;
        let key = (namespace.to_string(), name.to_string());

        if let Some(existing) = self.results.get(&key) {
            check_compatible(existing, statement)?;
            debug!(result = %existing.id, statement = %statement.name, "shared result reused");
        }

        self.exclude_override_fields
            .entry(key.clone())
            .or_default()
            .extend(statement.annotations.exclude_override_fields.iter().cloned());

        let result = self.results.entry(key).or_insert_with(|| SharedResult {
            id: format!("{}::{}", namespace, name),
            name: name.to_string(),
            namespace: namespace.to_string(),
            fields: statement.fields.clone(),
            statement: statement.name.clone(),
            source_file: statement.source_file.clone(),
            implements: Vec::new(),
            collection_key: statement.annotations.collection_key.clone(),
            dynamic_mappings: statement.dynamic_mappings.clone(),
        });
        for interface in &statement.annotations.implements {
            if !result.implements.contains(interface) {
                result.implements.push(interface.clone());
            }
        }
        Ok(result)
    }

    /// Union of `excludeOverrideFields` over every statement registered
    /// under the same name, whichever registered first.
    pub fn get_effective_exclude_override_fields(
        &self,
        statement: &AnnotatedStatement,
        namespace: &str,
    ) -> IndexSet<String> {
        let own = statement.annotations.exclude_override_fields.iter().cloned();
        match statement.query_result() {
            Some(name) => {
                let key = (namespace.to_string(), name.to_string());
                let mut out: IndexSet<String> = self
                    .exclude_override_fields
                    .get(&key)
                    .cloned()
                    .unwrap_or_default();
                out.extend(own);
                out
            }
            None => own.collect(),
        }
    }

    pub fn exclude_override_fields(&self, namespace: &str, name: &str) -> IndexSet<String> {
        self.exclude_override_fields
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&SharedResult> {
        self.results.get(&(namespace.to_string(), name.to_string()))
    }

    pub fn results(&self) -> impl Iterator<Item = &SharedResult> {
        self.results.values()
    }

    pub fn in_namespace<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a SharedResult> {
        self.results.values().filter(move |r| r.namespace == namespace)
    }
}

impl Serialize for SharedResultManager {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.results.values())
    }
}

fn check_compatible(existing: &SharedResult, incoming: &AnnotatedStatement) -> Result<()> {
    let conflict = |field: &str, ours: String, theirs: String| {
        Error::SharedResultConflict(Box::new(SharedResultConflict {
            result_name: existing.name.clone(),
            namespace: existing.namespace.clone(),
            field: field.to_string(),
            existing: ConflictSide {
                statement: existing.statement.clone(),
                source_file: existing.source_file.clone(),
                value: ours,
            },
            incoming: ConflictSide {
                statement: incoming.name.clone(),
                source_file: incoming.source_file.clone(),
                value: theirs,
            },
        }))
    };
    let find = |fields: &[AnnotatedField], name: &str| {
        fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    };

    for field in &existing.fields {
        if find(&incoming.fields, &field.name).is_none() {
            return Err(conflict(&field.name, "present".into(), "absent".into()));
        }
    }
    for field in &incoming.fields {
        if find(&existing.fields, &field.name).is_none() {
            return Err(conflict(&field.name, "absent".into(), "present".into()));
        }
    }
    for ours in &existing.fields {
        let Some(theirs) = incoming
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(&ours.name))
        else {
            continue;
        };
        if ours.not_null != theirs.not_null {
            return Err(conflict(
                &ours.name,
                format!("notNull={}", ours.not_null),
                format!("notNull={}", theirs.not_null),
            ));
        }
        if ours.property_type != theirs.property_type {
            return Err(conflict(
                &ours.name,
                format!("propertyType={}", ours.property_type),
                format!("propertyType={}", theirs.property_type),
            ));
        }
    }
    Ok(())
}
