use super::models::{
    escape_rust_keyword, field_type, generate_nested_structs, generate_row_struct,
    generate_shared_result, generate_struct, is_generated_type, mapping_for, pascal_case,
    raw_string_literal,
};
use crate::dynamic::DynamicFieldMapping;
use crate::overrides::MappingType;
use crate::pipeline::{AnnotatedField, AnnotatedStatement};
use crate::shared::SharedResultManager;
use heck::{ToShoutySnakeCase, ToSnakeCase};
use indexmap::IndexSet;

/// Source of one namespace module.
pub fn generate_namespace(
    namespace: &str,
    statements: &[AnnotatedStatement],
    shared: &SharedResultManager,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "//! Queries of namespace `{}`. Generated by rowgen; do not edit.\n\n",
        namespace
    ));
    out.push_str("#![allow(dead_code)]\n\n");

    let mut emitted = IndexSet::new();
    for result in shared.in_namespace(namespace) {
        let exclude = shared.exclude_override_fields(namespace, &result.name);
        out.push_str(&generate_shared_result(result, &exclude, &mut emitted));
    }
    for statement in statements {
        out.push_str(&generate_statement(statement, &mut emitted));
    }
    out
}

fn generate_statement(statement: &AnnotatedStatement, emitted: &mut IndexSet<String>) -> String {
    let mut out = String::new();
    let base = pascal_case(&statement.name);
    let konst = statement.name.to_shouty_snake_case();

    out.push_str(&format!("/// `{}`\n", statement.source_file.display()));
    out.push_str(&format!(
        "pub const {}_SQL: &str = {};\n\n",
        konst,
        raw_string_literal(&statement.sql)
    ));
    let bindings: Vec<String> = statement
        .binding_order
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect();
    out.push_str(&format!(
        "/// Parameter names in binding order.\npub const {}_BINDINGS: &[&str] = &[{}];\n\n",
        konst,
        bindings.join(", ")
    ));

    if !statement.parameters.is_empty() {
        let props: Vec<(String, String)> = statement
            .parameters
            .iter()
            .map(|p| (p.property_name.clone(), p.rust_type()))
            .collect();
        out.push_str(&generate_struct(&format!("{}Params", base), None, &props));
    }

    if statement.fields.is_empty() {
        return out;
    }
    let flat = statement.flat_fields();
    let row_name = match statement.query_result() {
        Some(shared) => pascal_case(shared),
        None => {
            let name = format!("{}Row", base);
            out.push_str(&generate_nested_structs(&statement.dynamic_mappings, emitted));
            out.push_str(&generate_row_struct(&name, None, &flat, &statement.dynamic_mappings));
            name
        }
    };

    let nestable = !statement.dynamic_mappings.is_empty()
        && statement
            .dynamic_mappings
            .iter()
            .all(|m| m.kind != MappingType::Entity && is_generated_type(&m.property_type));
    if nestable {
        out.push_str(&generate_nesting(statement, &base, &row_name, &flat));
    }
    out
}

/// The flat row type as returned by SQL, and a function folding flat rows
/// into nested ones.
fn generate_nesting(
    statement: &AnnotatedStatement,
    base: &str,
    row_name: &str,
    flat: &[&AnnotatedField],
) -> String {
    let mappings = &statement.dynamic_mappings;
    let physical: Vec<&AnnotatedField> = statement.fields.iter().filter(|f| !f.is_dynamic()).collect();
    let flat_name = format!("{}FlatRow", base);
    let has_collection = mappings.iter().any(|m| m.kind == MappingType::Collection);
    let parent = mappings
        .iter()
        .find_map(|m| m.parent_key.as_deref())
        .and_then(|key| flat.iter().find(|f| f.name == key))
        .map(|f| escape_rust_keyword(&f.property_name));
    if has_collection && parent.is_none() {
        return String::new();
    }

    let mut out = String::new();
    let props: Vec<(String, String)> = physical
        .iter()
        .map(|f| (f.property_name.clone(), f.rust_type()))
        .collect();
    out.push_str(&generate_struct(&flat_name, Some("One row as returned by SQL."), &props));

    out.push_str(&format!(
        "pub fn nest_{}(rows: Vec<{}>) -> Vec<{}> {{\n",
        statement.name.to_snake_case(),
        flat_name,
        row_name
    ));
    out.push_str(&format!("    let mut out: Vec<{}> = Vec::new();\n", row_name));
    out.push_str("    for row in rows {\n");
    for mapping in mappings {
        let var = format!("{}_value", mapping.property_name.to_snake_case());
        let build = nested_value(mapping, &physical);
        if mapping.kind == MappingType::PerRow && mapping.not_null {
            out.push_str(&format!("        let Some({}) = {} else {{\n            continue;\n        }};\n", var, build));
        } else {
            out.push_str(&format!("        let {} = {};\n", var, build));
        }
    }

    let construct = row_literal(row_name, flat, mappings);
    if let Some(parent) = parent.filter(|_| has_collection) {
        out.push_str(&format!(
            "        let index = match out.iter().position(|r| r.{} == row.{}) {{\n",
            parent, parent
        ));
        out.push_str("            Some(index) => index,\n");
        out.push_str("            None => {\n");
        out.push_str(&format!("                out.push({});\n", construct));
        out.push_str("                out.len() - 1\n");
        out.push_str("            }\n");
        out.push_str("        };\n");
        for mapping in mappings.iter().filter(|m| m.kind == MappingType::Collection) {
            let var = format!("{}_value", mapping.property_name.to_snake_case());
            let list = escape_rust_keyword(&mapping.property_name);
            let item_key = mapping
                .item_key
                .as_deref()
                .and_then(|key| mapping.columns.iter().find(|c| c.column == key))
                .map(|c| escape_rust_keyword(&c.property_name));
            out.push_str(&format!("        if let Some(item) = {} {{\n", var));
            match item_key {
                Some(key) => out.push_str(&format!(
                    "            if !out[index].{}.iter().any(|i| i.{} == item.{}) {{\n                out[index].{}.push(item);\n            }}\n",
                    list, key, key, list
                )),
                None => out.push_str(&format!("            out[index].{}.push(item);\n", list)),
            }
            out.push_str("        }\n");
        }
    } else {
        out.push_str(&format!("        out.push({});\n", construct));
    }
    out.push_str("    }\n    out\n}\n\n");
    out
}

/// `Option<Nested>` built from one flat row; `None` when a column the
/// nested type requires is NULL.
fn nested_value(mapping: &DynamicFieldMapping, physical: &[&AnnotatedField]) -> String {
    let mut fields = Vec::new();
    for column in &mapping.columns {
        let Some(flat) = physical.iter().find(|f| f.name == column.column) else {
            continue;
        };
        let source = format!("row.{}.clone()", escape_rust_keyword(&flat.property_name));
        let value = match (flat.not_null, column.not_null) {
            (false, true) => format!("{}?", source),
            (true, false) => format!("Some({})", source),
            _ => source,
        };
        fields.push(format!("{}: {}", escape_rust_keyword(&column.property_name), value));
    }
    format!(
        "(|| -> Option<{ty}> {{ Some({ty} {{ {} }}) }})()",
        fields.join(", "),
        ty = mapping.property_type
    )
}

fn row_literal(row_name: &str, flat: &[&AnnotatedField], mappings: &[DynamicFieldMapping]) -> String {
    let values: Vec<String> = flat
        .iter()
        .map(|field| {
            let prop = escape_rust_keyword(&field.property_name);
            let value = match mapping_for(field, mappings) {
                Some(m) if m.kind == MappingType::Collection => "Vec::new()".to_string(),
                Some(m) => format!("{}_value", m.property_name.to_snake_case()),
                None if field.is_dynamic() => format!("<{}>::default()", field_type(field, mappings)),
                None => format!("row.{}.clone()", prop),
            };
            format!("{}: {}", prop, value)
        })
        .collect();
    format!("{} {{ {} }}", row_name, values.join(", "))
}
