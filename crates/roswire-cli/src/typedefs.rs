//! Pretty-printer for rosapi `typedefs` payloads.
//!
//! rosapi describes a message type as a flat list of typedefs; the first
//! entry is the queried type, the rest are the embedded complex field
//! types. Rendering walks the definition recursively, indenting nested
//! types, the way `rosmsg show` does:
//!
//! ```text
//! uint32 seq
//! time stamp
//! string frame_id
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

/// Render a `typedefs` payload into an indented field listing. Unknown
/// or empty payloads render as an empty string.
pub fn render(details: &Value) -> String {
    let Some(typedefs) = details.get("typedefs").and_then(Value::as_array) else {
        return String::new();
    };
    let Some(main_type) = typedefs
        .first()
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
    else {
        return String::new();
    };

    let def_map: HashMap<&str, &Value> = typedefs
        .iter()
        .filter_map(|t| t.get("type").and_then(Value::as_str).map(|name| (name, t)))
        .collect();

    let mut out = String::new();
    render_typedef(main_type, &def_map, 0, &mut out);
    out
}

fn render_typedef(type_name: &str, def_map: &HashMap<&str, &Value>, level: usize, out: &mut String) {
    // Cycle guard: rosapi typedefs are acyclic, but a malformed payload
    // should not recurse forever.
    if level > 8 {
        return;
    }
    let Some(def) = def_map.get(type_name) else {
        return;
    };
    let names = string_items(def, "fieldnames");
    let types = string_items(def, "fieldtypes");
    let lengths: Vec<i64> = def
        .get("fieldarraylen")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    for (i, (name, field_type)) in names.iter().zip(types.iter()).enumerate() {
        let suffix = match lengths.get(i) {
            Some(-1) | None => String::new(),
            Some(0) => "[]".to_string(),
            Some(n) => format!("[{n}]"),
        };
        let _ = writeln!(out, "{}{field_type}{suffix} {name}", "  ".repeat(level));
        if def_map.contains_key(field_type.as_str()) {
            render_typedef(field_type, def_map, level + 1, out);
        }
    }
}

fn string_items(def: &Value, field: &str) -> Vec<String> {
    def.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
