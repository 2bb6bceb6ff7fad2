//! Effective per-column annotations of tables and views, inherited through
//! views that pass columns through from other annotated objects.

use crate::annotations::{keys, merge_annotations, AnnotationMap};
use crate::error::Result;
use crate::overrides::FieldAnnotationOverrides;
use crate::schema::{ColumnOrigin, SchemaCatalog};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Where a view column is copied from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedFrom {
    pub origin: ColumnOrigin,
    /// The column is reached through an outer join inside the view, so a
    /// `notNull` declared on the origin no longer holds.
    pub drop_not_null: bool,
}

/// Annotations declared on one table or view.
#[derive(Debug, Clone, Default)]
pub struct ObjectAnnotations {
    /// Locally declared field annotations, keyed by column name.
    pub fields: IndexMap<String, AnnotationMap>,
    /// Passthrough columns of a view, keyed by column name.
    pub origins: IndexMap<String, InheritedFrom>,
}

type Key = (String, String);

fn key(object: &str, column: &str) -> Key {
    (object.to_ascii_lowercase(), column.to_ascii_lowercase())
}

/// Built once per run; every lookup afterwards is a map read.
#[derive(Debug, Clone, Default)]
pub struct FieldAnnotationResolver {
    objects: IndexMap<String, ObjectAnnotations>,
    resolved: HashMap<Key, AnnotationMap>,
}

impl FieldAnnotationResolver {
    pub fn new(catalog: &SchemaCatalog) -> Self {
        let mut objects = IndexMap::new();
        for table in catalog.tables() {
            objects.insert(
                table.name.clone(),
                ObjectAnnotations {
                    fields: table.field_annotations.clone(),
                    origins: IndexMap::new(),
                },
            );
        }
        for view in catalog.views() {
            let origins = view
                .columns
                .iter()
                .filter_map(|c| {
                    c.origin.clone().map(|origin| {
                        (
                            c.name.clone(),
                            InheritedFrom {
                                origin,
                                drop_not_null: c.joined_nullable,
                            },
                        )
                    })
                })
                .collect();
            objects.insert(
                view.name.clone(),
                ObjectAnnotations {
                    fields: view.field_annotations.clone(),
                    origins,
                },
            );
        }
        Self::from_parts(objects)
    }

    /// Build from explicit per-object annotations. The origin graph may
    /// contain cycles; a cycle ends inheritance at the repeated column.
    pub fn from_parts(objects: IndexMap<String, ObjectAnnotations>) -> Self {
        let objects: IndexMap<String, ObjectAnnotations> = objects
            .into_iter()
            .map(|(name, obj)| {
                let origins = obj
                    .origins
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect();
                (
                    name.to_ascii_lowercase(),
                    ObjectAnnotations {
                        fields: obj.fields,
                        origins,
                    },
                )
            })
            .collect();

        let mut resolver = FieldAnnotationResolver {
            objects,
            resolved: HashMap::new(),
        };
        let columns: Vec<Key> = resolver
            .objects
            .iter()
            .flat_map(|(name, obj)| {
                obj.fields
                    .keys()
                    .chain(obj.origins.keys())
                    .map(move |col| (name.clone(), col.clone()))
            })
            .collect();
        let mut memo: HashMap<Key, Option<AnnotationMap>> = HashMap::new();
        for (object, column) in columns {
            let mut visiting = HashSet::new();
            if let Some(map) = resolver.resolve(&object, &column, &mut visiting, &mut memo) {
                resolver.resolved.insert(key(&object, &column), map);
            }
        }
        debug!(entries = resolver.resolved.len(), "field annotations resolved");
        resolver
    }

    fn resolve(
        &self,
        object: &str,
        column: &str,
        visiting: &mut HashSet<Key>,
        memo: &mut HashMap<Key, Option<AnnotationMap>>,
    ) -> Option<AnnotationMap> {
        let k = key(object, column);
        if let Some(done) = memo.get(&k) {
            return done.clone();
        }
        if !visiting.insert(k.clone()) {
            debug!(object, column, "annotation inheritance cycle cut");
            return None;
        }

        let obj = self.objects.get(&k.0);
        let local = obj.and_then(|o| {
            o.fields
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, map)| map)
        });
        let inherited = obj.and_then(|o| o.origins.get(&k.1)).and_then(|from| {
            let mut map = self.resolve(&from.origin.object, &from.origin.column, visiting, memo)?;
            if from.drop_not_null {
                map.shift_remove(keys::NOT_NULL);
            }
            Some(map)
        });
        visiting.remove(&k);

        let result = match (inherited, local) {
            (None, None) => None,
            (Some(base), None) => Some(base),
            (None, Some(local)) => Some(local.clone()),
            (Some(base), Some(local)) => Some(merge_annotations(&base, local)),
        };
        // Results computed inside a chain may have been cut by a cycle that
        // only exists from the chain's starting point.
        if visiting.is_empty() {
            memo.insert(k, result.clone());
        }
        result
    }

    /// Effective raw annotation map of a column, or `None` when nothing is
    /// declared for it or the object is unknown.
    pub fn get_annotation_map(&self, object: &str, column: &str) -> Option<&AnnotationMap> {
        self.resolved.get(&key(object, column))
    }

    pub fn get_field_annotations(
        &self,
        object: &str,
        column: &str,
    ) -> Result<Option<FieldAnnotationOverrides>> {
        self.get_annotation_map(object, column)
            .map(|map| FieldAnnotationOverrides::from_map(column, map))
            .transpose()
    }

    /// Dynamic fields declared directly on a view.
    pub fn dynamic_fields(&self, object: &str) -> Vec<(String, AnnotationMap)> {
        let Some(obj) = self.objects.get(&object.to_ascii_lowercase()) else {
            return Vec::new();
        };
        obj.fields
            .iter()
            .filter(|(_, map)| {
                map.get(keys::IS_DYNAMIC_FIELD)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .map(|(name, map)| (name.clone(), map.clone()))
            .collect()
    }
}
