use crate::dynamic::DynamicFieldMapping;
use crate::overrides::MappingType;
use crate::pipeline::AnnotatedField;
use crate::shared::SharedResult;
use crate::types::is_builtin_type;
use indexmap::IndexSet;

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where", "while", "async", "await", "dyn", "abstract", "become", "box", "do", "final", "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield",
];

pub(crate) fn escape_rust_keyword(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        format!("r#{}", name)
    } else {
        name.to_string()
    }
}

pub(crate) fn pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut c = p.chars();
            match c.next() {
                None => String::new(),
                Some(f) => f.to_ascii_uppercase().to_string() + c.as_str(),
            }
        })
        .collect()
}

/// A raw string literal able to hold `s` unchanged.
pub(crate) fn raw_string_literal(s: &str) -> String {
    let mut hashes = 1;
    let bytes = s.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'"' {
            let run = bytes[i + 1..].iter().take_while(|c| **c == b'#').count();
            hashes = hashes.max(run + 1);
        }
    }
    let fence = "#".repeat(hashes);
    format!("r{}\"{}\"{}", fence, s, fence)
}

/// Nested types this generator defines itself.
pub(crate) fn is_generated_type(ty: &str) -> bool {
    let mut chars = ty.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_builtin_type(ty)
}

pub(crate) fn mapping_for<'a>(
    field: &AnnotatedField,
    mappings: &'a [DynamicFieldMapping],
) -> Option<&'a DynamicFieldMapping> {
    mappings.iter().find(|m| m.field_name == field.name)
}

/// Type of a top-level row property.
pub fn field_type(field: &AnnotatedField, mappings: &[DynamicFieldMapping]) -> String {
    match mapping_for(field, mappings) {
        Some(m) if m.kind == MappingType::Collection => format!("Vec<{}>", m.property_type),
        Some(m) if m.not_null => m.property_type.clone(),
        Some(m) => format!("Option<{}>", m.property_type),
        None => field.rust_type(),
    }
}

pub fn generate_struct(name: &str, doc: Option<&str>, props: &[(String, String)]) -> String {
    let mut out = String::new();
    if let Some(doc) = doc {
        out.push_str(&format!("/// {}\n", doc));
    }
    out.push_str("#[derive(Debug, Clone, PartialEq)]\n");
    out.push_str(&format!("pub struct {} {{\n", name));
    for (prop, ty) in props {
        out.push_str(&format!("    pub {}: {},\n", escape_rust_keyword(prop), ty));
    }
    out.push_str("}\n\n");
    out
}

pub fn generate_row_struct(
    name: &str,
    doc: Option<&str>,
    fields: &[&AnnotatedField],
    mappings: &[DynamicFieldMapping],
) -> String {
    let props: Vec<(String, String)> = fields
        .iter()
        .map(|f| (f.property_name.clone(), field_type(f, mappings)))
        .collect();
    generate_struct(name, doc, &props)
}

/// Structs for `perRow` and `collection` values. `entity` values reuse a
/// shared result type defined elsewhere.
pub fn generate_nested_structs(
    mappings: &[DynamicFieldMapping],
    emitted: &mut IndexSet<String>,
) -> String {
    let mut out = String::new();
    for mapping in mappings {
        if mapping.kind == MappingType::Entity || !is_generated_type(&mapping.property_type) {
            continue;
        }
        if !emitted.insert(mapping.property_type.clone()) {
            continue;
        }
        let props: Vec<(String, String)> = mapping
            .columns
            .iter()
            .map(|c| (c.property_name.clone(), c.rust_type()))
            .collect();
        let doc = format!("Columns of `{}` folded into `{}`.", mapping.source_table, mapping.field_name);
        out.push_str(&generate_struct(&mapping.property_type, Some(&doc), &props));
    }
    out
}

/// Accessor impls for every `implements` trait; fields listed in
/// `excludeOverrideFields` get no accessor.
pub fn generate_trait_impls(
    struct_name: &str,
    fields: &[&AnnotatedField],
    mappings: &[DynamicFieldMapping],
    implements: &[String],
    exclude: &IndexSet<String>,
) -> String {
    let mut out = String::new();
    for interface in implements {
        out.push_str(&format!("impl {} for {} {{\n", interface, struct_name));
        for field in fields {
            if exclude.contains(&field.name) || exclude.contains(&field.property_name) {
                continue;
            }
            let prop = escape_rust_keyword(&field.property_name);
            out.push_str(&format!(
                "    fn {}(&self) -> &{} {{\n        &self.{}\n    }}\n",
                prop,
                field_type(field, mappings),
                prop
            ));
        }
        out.push_str("}\n\n");
    }
    out
}

pub fn generate_shared_result(
    result: &SharedResult,
    exclude: &IndexSet<String>,
    emitted: &mut IndexSet<String>,
) -> String {
    let skip: IndexSet<&str> = result
        .dynamic_mappings
        .iter()
        .flat_map(|m| m.columns.iter().map(|c| c.column.as_str()))
        .collect();
    let fields: Vec<&AnnotatedField> = result
        .fields
        .iter()
        .filter(|f| !skip.contains(f.name.as_str()))
        .collect();
    let name = pascal_case(&result.name);

    let mut out = generate_nested_structs(&result.dynamic_mappings, emitted);
    if !emitted.insert(name.clone()) {
        return out;
    }
    let doc = format!(
        "Shared result `{}`, first defined by `{}`.",
        result.name, result.statement
    );
    out.push_str(&generate_row_struct(&name, Some(&doc), &fields, &result.dynamic_mappings));
    out.push_str(&generate_trait_impls(
        &name,
        &fields,
        &result.dynamic_mappings,
        &result.implements,
        exclude,
    ));
    out
}
