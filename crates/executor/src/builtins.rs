//! Built-in native tools shipped with the gateway.
//!
//! Registered in the callable table under `tools.*` paths at startup and
//! seeded into the catalog as `PYTHON_CALLABLE` rows when absent.

use serde_json::{json, Map, Value};

use toolhub_core::{ImplementationType, Result, ToolDraft, ToolhubError};

use crate::backends::callable::CallableRegistry;

/// Registers every built-in callable. Call once from the composition root.
pub fn register_builtins(registry: &mut CallableRegistry) {
    registry.register("tools.math.calculator", calculator);
    registry.register("tools.text.uppercase", text_uppercase);
    registry.register("tools.text.lowercase", text_lowercase);
    registry.register("tools.text.reverse", text_reverse);
    registry.register("tools.text.length", text_length);
    registry.register("tools.text.word_count", text_word_count);
    registry.register("tools.data.json_to_csv", json_to_csv);
    registry.register("tools.data.csv_to_json", csv_to_json);
    registry.register("tools.data.flatten_json", flatten_json);
    registry.register("tools.data.nest_json", nest_json);
}

fn text_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"text": {"type": "string", "description": "Input text"}},
        "required": ["text"],
    })
}

fn text_draft(name: &str, description: &str, tags: &[&str], path: &str) -> ToolDraft {
    ToolDraft {
        name: name.to_string(),
        description: description.to_string(),
        category: "text".to_string(),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        input_schema: text_schema(),
        output_schema: None,
        implementation_type: ImplementationType::PythonCallable,
        implementation_code: Some(path.to_string()),
        version: "1.0.0".to_string(),
        metadata: json!({"builtin": true}),
    }
}

/// Catalog drafts for the built-in tools, used by startup seeding.
pub fn builtin_drafts() -> Vec<ToolDraft> {
    vec![
        ToolDraft {
            name: "calculator".to_string(),
            description: "Perform basic arithmetic: add, subtract, multiply, or divide two numbers"
                .to_string(),
            category: "math".to_string(),
            tags: vec!["math".into(), "arithmetic".into(), "add".into(), "numbers".into()],
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"],
                    },
                    "a": {"type": "number"},
                    "b": {"type": "number"},
                },
                "required": ["operation", "a", "b"],
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {"result": {"type": "number"}},
                "required": ["result"],
            })),
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: Some("tools.math.calculator".to_string()),
            version: "1.0.0".to_string(),
            metadata: json!({"builtin": true}),
        },
        text_draft(
            "text_uppercase",
            "Convert text to uppercase",
            &["text", "string", "case"],
            "tools.text.uppercase",
        ),
        text_draft(
            "text_lowercase",
            "Convert text to lowercase",
            &["text", "string", "case"],
            "tools.text.lowercase",
        ),
        text_draft(
            "text_reverse",
            "Reverse the characters of a text",
            &["text", "string"],
            "tools.text.reverse",
        ),
        text_draft(
            "text_length",
            "Count the characters in a text",
            &["text", "string", "count"],
            "tools.text.length",
        ),
        text_draft(
            "text_word_count",
            "Count the words in a text",
            &["text", "string", "count", "words"],
            "tools.text.word_count",
        ),
        ToolDraft {
            name: "json_to_csv".to_string(),
            description: "Convert an array of flat JSON objects into CSV text".to_string(),
            category: "data".to_string(),
            tags: vec!["data".into(), "json".into(), "csv".into(), "convert".into()],
            input_schema: json!({
                "type": "object",
                "properties": {"data": {"type": "array", "items": {"type": "object"}}},
                "required": ["data"],
            }),
            output_schema: None,
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: Some("tools.data.json_to_csv".to_string()),
            version: "1.0.0".to_string(),
            metadata: json!({"builtin": true}),
        },
        ToolDraft {
            name: "csv_to_json".to_string(),
            description: "Parse CSV text with a header row into JSON objects".to_string(),
            category: "data".to_string(),
            tags: vec!["data".into(), "csv".into(), "json".into(), "convert".into()],
            input_schema: json!({
                "type": "object",
                "properties": {"csv": {"type": "string"}},
                "required": ["csv"],
            }),
            output_schema: None,
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: Some("tools.data.csv_to_json".to_string()),
            version: "1.0.0".to_string(),
            metadata: json!({"builtin": true}),
        },
        ToolDraft {
            name: "nest_json".to_string(),
            description: "Rebuild nested JSON from an object with dotted keys".to_string(),
            category: "data".to_string(),
            tags: vec!["data".into(), "json".into(), "nest".into()],
            input_schema: json!({
                "type": "object",
                "properties": {
                    "data": {"type": "object"},
                    "separator": {"type": "string", "default": "."},
                },
                "required": ["data"],
            }),
            output_schema: None,
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: Some("tools.data.nest_json".to_string()),
            version: "1.0.0".to_string(),
            metadata: json!({"builtin": true}),
        },
        ToolDraft {
            name: "flatten_json".to_string(),
            description: "Flatten nested JSON into dotted keys".to_string(),
            category: "data".to_string(),
            tags: vec!["data".into(), "json".into(), "flatten".into()],
            input_schema: json!({
                "type": "object",
                "properties": {
                    "data": {"type": "object"},
                    "separator": {"type": "string", "default": "."},
                },
                "required": ["data"],
            }),
            output_schema: None,
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: Some("tools.data.flatten_json".to_string()),
            version: "1.0.0".to_string(),
            metadata: json!({"builtin": true}),
        },
    ]
}

fn require_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolhubError::InvalidInput(format!("'{key}' must be a string")))
}

fn require_f64(arguments: &Value, key: &str) -> Result<f64> {
    arguments[key]
        .as_f64()
        .ok_or_else(|| ToolhubError::InvalidInput(format!("'{key}' must be a number")))
}

fn calculator(arguments: &Value) -> Result<Value> {
    let operation = require_str(arguments, "operation")?;
    let a = require_f64(arguments, "a")?;
    let b = require_f64(arguments, "b")?;
    let result = match operation {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" => {
            if b == 0.0 {
                return Err(ToolhubError::InvalidInput("division by zero".into()));
            }
            a / b
        }
        other => {
            return Err(ToolhubError::InvalidInput(format!(
                "invalid operation '{other}'"
            )))
        }
    };
    Ok(json!({"result": result, "operation": operation, "a": a, "b": b}))
}

fn text_uppercase(arguments: &Value) -> Result<Value> {
    Ok(json!({"result": require_str(arguments, "text")?.to_uppercase()}))
}

fn text_lowercase(arguments: &Value) -> Result<Value> {
    Ok(json!({"result": require_str(arguments, "text")?.to_lowercase()}))
}

fn text_reverse(arguments: &Value) -> Result<Value> {
    Ok(json!({"result": require_str(arguments, "text")?.chars().rev().collect::<String>()}))
}

fn text_length(arguments: &Value) -> Result<Value> {
    Ok(json!({"result": require_str(arguments, "text")?.chars().count()}))
}

fn text_word_count(arguments: &Value) -> Result<Value> {
    Ok(json!({"result": require_str(arguments, "text")?.split_whitespace().count()}))
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_to_csv(arguments: &Value) -> Result<Value> {
    let rows = arguments["data"]
        .as_array()
        .ok_or_else(|| ToolhubError::InvalidInput("'data' must be an array of objects".into()))?;
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        let object = row
            .as_object()
            .ok_or_else(|| ToolhubError::InvalidInput("every row must be an object".into()))?;
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    let mut lines = vec![headers.iter().map(|h| csv_escape(h)).collect::<Vec<_>>().join(",")];
    for row in rows {
        let object = row.as_object().expect("validated above");
        let line = headers
            .iter()
            .map(|h| csv_escape(&object.get(h).map(render_csv_value).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    Ok(json!({"csv": lines.join("\n"), "rows": rows.len()}))
}

/// Splits one CSV line honoring double-quoted fields with `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn csv_to_json(arguments: &Value) -> Result<Value> {
    let text = require_str(arguments, "csv")?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let headers: Vec<String> = match lines.next() {
        Some(header) => split_csv_line(header),
        None => return Err(ToolhubError::InvalidInput("csv input is empty".into())),
    };
    let mut rows = Vec::new();
    for line in lines {
        let fields = split_csv_line(line);
        let mut object = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let raw = fields.get(i).cloned().unwrap_or_default();
            let value = raw
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or(Value::String(raw));
            object.insert(header.clone(), value);
        }
        rows.push(Value::Object(object));
    }
    let count = rows.len();
    Ok(json!({"data": rows, "rows": count}))
}

fn flatten_into(prefix: &str, separator: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(object) => {
            for (key, nested) in object {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}{separator}{key}")
                };
                flatten_into(&path, separator, nested, out);
            }
        }
        Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                flatten_into(&format!("{prefix}{separator}{i}"), separator, nested, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

fn flatten_json(arguments: &Value) -> Result<Value> {
    let data = arguments
        .get("data")
        .filter(|v| v.is_object())
        .ok_or_else(|| ToolhubError::InvalidInput("'data' must be an object".into()))?;
    let separator = arguments["separator"].as_str().unwrap_or(".");
    let mut out = Map::new();
    flatten_into("", separator, data, &mut out);
    Ok(json!({"result": Value::Object(out)}))
}

fn nest_json(arguments: &Value) -> Result<Value> {
    let data = arguments
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolhubError::InvalidInput("'data' must be an object".into()))?;
    let separator = arguments["separator"].as_str().unwrap_or(".");
    if separator.is_empty() {
        return Err(ToolhubError::InvalidInput("separator cannot be empty".into()));
    }
    let mut root = Map::new();
    for (path, value) in data {
        let mut segments = path.split(separator).peekable();
        let mut cursor = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                cursor.insert(segment.to_string(), value.clone());
            } else {
                cursor = cursor
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .ok_or_else(|| {
                        ToolhubError::InvalidInput(format!(
                            "key '{path}' nests through a non-object value"
                        ))
                    })?;
            }
        }
    }
    Ok(json!({"result": Value::Object(root)}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::callable::CallablePolicy;

    #[test]
    fn calculator_operations() {
        let out = calculator(&json!({"operation": "add", "a": 2, "b": 3})).unwrap();
        assert_eq!(out["result"], 5.0);
        let out = calculator(&json!({"operation": "divide", "a": 9, "b": 3})).unwrap();
        assert_eq!(out["result"], 3.0);
        assert!(calculator(&json!({"operation": "divide", "a": 1, "b": 0})).is_err());
        assert!(calculator(&json!({"operation": "modulo", "a": 1, "b": 2})).is_err());
    }

    #[test]
    fn string_tools() {
        assert_eq!(
            text_uppercase(&json!({"text": "hello"})).unwrap()["result"],
            "HELLO"
        );
        assert_eq!(
            text_reverse(&json!({"text": "abc"})).unwrap()["result"],
            "cba"
        );
        assert_eq!(
            text_word_count(&json!({"text": "one two  three"})).unwrap()["result"],
            3
        );
    }

    #[test]
    fn csv_roundtrip_with_quoting() {
        let out = json_to_csv(&json!({
            "data": [
                {"name": "a,b", "n": 1},
                {"name": "plain", "n": 2},
            ]
        }))
        .unwrap();
        let csv = out["csv"].as_str().unwrap();
        assert!(csv.starts_with("name,n") || csv.starts_with("n,name"));
        assert!(csv.contains("\"a,b\""));

        let back = csv_to_json(&json!({"csv": csv})).unwrap();
        assert_eq!(back["rows"], 2);
        assert_eq!(back["data"][0]["name"], "a,b");
        assert_eq!(back["data"][0]["n"], 1.0);
    }

    #[test]
    fn nest_rebuilds_flattened_objects() {
        let out = nest_json(&json!({
            "data": {"a.b": 1, "a.c": 2, "top": "x"},
        }))
        .unwrap();
        assert_eq!(out["result"]["a"]["b"], 1);
        assert_eq!(out["result"]["a"]["c"], 2);
        assert_eq!(out["result"]["top"], "x");

        let err = nest_json(&json!({
            "data": {"a": 1, "a.b": 2},
        }))
        .unwrap_err();
        assert!(err.to_string().contains("non-object"));
    }

    #[test]
    fn flatten_handles_nesting_and_arrays() {
        let out = flatten_json(&json!({
            "data": {"a": {"b": 1}, "list": [10, 20]},
        }))
        .unwrap();
        assert_eq!(out["result"]["a.b"], 1);
        assert_eq!(out["result"]["list.0"], 10);
        assert_eq!(out["result"]["list.1"], 20);
    }

    #[test]
    fn drafts_and_registrations_line_up() {
        let mut registry = CallableRegistry::new(CallablePolicy::default());
        register_builtins(&mut registry);
        let drafts = builtin_drafts();
        assert_eq!(registry.len(), drafts.len());
        for draft in &drafts {
            let path = draft.implementation_code.as_deref().unwrap();
            registry
                .check_path(path)
                .unwrap_or_else(|e| panic!("builtin path {path} rejected: {e}"));
        }
    }
}
