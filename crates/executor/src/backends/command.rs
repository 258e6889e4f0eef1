//! `COMMAND_LINE` backend.
//!
//! The command template is trusted config; the arguments are not. Argument
//! values are restricted to scalars free of shell metacharacters, the filled
//! template is tokenized without a shell, and the executable must appear in
//! the tool's `allowed_commands` list. The child is spawned with
//! `kill_on_drop` so the router's deadline terminates it.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

use toolhub_core::{Result, Tool, ToolhubError};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Template with `{placeholder}` slots, e.g. `wc -l {file}`.
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Per-tool timeout in seconds; read by the router, not here.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Executables this tool may run. Empty means nothing is allowed.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '\'', '"', '\n', '\r',
];

fn parse_config(tool: &Tool) -> Result<CommandConfig> {
    let raw = tool.implementation_code.as_deref().ok_or_else(|| {
        ToolhubError::InvalidInput(format!("tool '{}' has no command config", tool.name))
    })?;
    let config: CommandConfig = serde_json::from_str(raw)
        .map_err(|e| ToolhubError::InvalidInput(format!("command config: {e}")))?;
    if config.command.trim().is_empty() {
        return Err(ToolhubError::InvalidInput("command template is empty".into()));
    }
    Ok(config)
}

/// Renders arguments into strings, rejecting non-scalars and any value
/// carrying shell metacharacters.
fn sanitize_arguments(arguments: &Value) -> Result<HashMap<String, String>> {
    let Some(object) = arguments.as_object() else {
        return Err(ToolhubError::InvalidInput(
            "command arguments must be an object".into(),
        ));
    };
    let mut sanitized = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let rendered = match value {
            Value::String(s) => {
                if s.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
                    return Err(ToolhubError::InvalidInput(format!(
                        "argument '{key}' contains disallowed shell characters"
                    )));
                }
                s.clone()
            }
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(ToolhubError::InvalidInput(format!(
                    "argument '{key}' must be a string, number, or boolean"
                )))
            }
        };
        sanitized.insert(key.clone(), rendered);
    }
    Ok(sanitized)
}

/// Fills `{placeholder}` slots; any placeholder left unfilled is an error.
fn fill_template(template: &str, arguments: &HashMap<String, String>) -> Result<String> {
    let mut filled = template.to_string();
    for (key, value) in arguments {
        filled = filled.replace(&format!("{{{key}}}"), value);
    }
    if let Some(start) = filled.find('{') {
        let rest = &filled[start..];
        let placeholder: String = rest
            .chars()
            .take_while(|c| *c != '}')
            .chain(std::iter::once('}'))
            .collect();
        return Err(ToolhubError::InvalidInput(format!(
            "missing argument for placeholder {placeholder}"
        )));
    }
    Ok(filled)
}

/// Splits a command line into tokens without invoking a shell. Supports
/// single- and double-quoted tokens in the trusted template.
fn tokenize(command: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return Err(ToolhubError::InvalidInput(
            "unbalanced quote in command template".into(),
        ));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err(ToolhubError::InvalidInput("command is empty".into()));
    }
    Ok(tokens)
}

pub async fn execute(tool: &Tool, arguments: &Value) -> Result<Value> {
    let config = parse_config(tool)?;
    let sanitized = sanitize_arguments(arguments)?;
    let filled = fill_template(&config.command, &sanitized)?;
    let tokens = tokenize(&filled)?;

    let executable = &tokens[0];
    if !config.allowed_commands.iter().any(|c| c == executable) {
        return Err(ToolhubError::InvalidInput(format!(
            "command '{executable}' is not in the allowed commands list"
        )));
    }

    let mut command = Command::new(executable);
    command
        .args(&tokens[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &config.env {
        command.env(key, value);
    }

    let output = command
        .output()
        .await
        .map_err(|e| ToolhubError::Backend(format!("spawning '{executable}': {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(ToolhubError::Backend(format!(
            "command exited with {}: {stderr}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string())
        )));
    }
    Ok(json!({
        "stdout": stdout,
        "stderr": stderr,
        "exit_code": output.status.code().unwrap_or(0),
    }))
}

/// Per-tool timeout override carried in the command config.
pub fn timeout_override(tool: &Tool) -> Option<f64> {
    let raw = tool.implementation_code.as_deref()?;
    let value: Value = serde_json::from_str(raw).ok()?;
    value["timeout"].as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_with_metacharacters_are_rejected() {
        for hostile in ["$(reboot)", "a;b", "x|y", "`id`", "two\nlines", "quo'te"] {
            let err = sanitize_arguments(&json!({"arg": hostile})).unwrap_err();
            assert!(
                err.to_string().contains("disallowed shell characters"),
                "{hostile} must be rejected"
            );
        }
    }

    #[test]
    fn scalars_render_and_objects_fail() {
        let rendered = sanitize_arguments(&json!({"n": 3, "flag": false, "s": "ok"})).unwrap();
        assert_eq!(rendered["n"], "3");
        assert_eq!(rendered["flag"], "false");
        assert!(sanitize_arguments(&json!({"bad": {"nested": 1}})).is_err());
    }

    #[test]
    fn template_fills_and_reports_missing_placeholders() {
        let mut args = HashMap::new();
        args.insert("file".to_string(), "notes.txt".to_string());
        assert_eq!(fill_template("wc -l {file}", &args).unwrap(), "wc -l notes.txt");

        let err = fill_template("wc {mode} {file}", &args).unwrap_err();
        assert!(err.to_string().contains("{mode}"));
    }

    #[test]
    fn tokenizer_honors_quotes() {
        assert_eq!(
            tokenize("echo 'hello world' plain").unwrap(),
            vec!["echo", "hello world", "plain"]
        );
        assert_eq!(
            tokenize("grep \"two words\" file").unwrap(),
            vec!["grep", "two words", "file"]
        );
        assert!(tokenize("echo 'unterminated").is_err());
        assert!(tokenize("   ").is_err());
    }

    fn command_tool(config: Value) -> Tool {
        Tool {
            id: 1,
            name: "cmd".into(),
            description: "command tool".into(),
            category: "shell".into(),
            tags: vec![],
            input_schema: json!({"type": "object"}),
            output_schema: None,
            implementation_type: toolhub_core::ImplementationType::CommandLine,
            implementation_code: Some(config.to_string()),
            version: "1.0.0".into(),
            embedding: None,
            is_active: true,
            metadata: json!({}),
            created_at: time::OffsetDateTime::now_utc(),
            updated_at: time::OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn executable_outside_allow_list_is_rejected() {
        let tool = command_tool(json!({
            "command": "echo {text}",
            "allowed_commands": ["printf"],
        }));
        let err = execute(&tool, &json!({"text": "hi"})).await.unwrap_err();
        assert!(err.to_string().contains("allowed commands list"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn allowed_command_runs_and_captures_stdout() {
        let tool = command_tool(json!({
            "command": "echo {text}",
            "allowed_commands": ["echo"],
        }));
        let output = execute(&tool, &json!({"text": "hello"})).await.unwrap();
        assert_eq!(output["exit_code"], 0);
        assert_eq!(output["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let tool = command_tool(json!({
            "command": "ls {path}",
            "allowed_commands": ["ls"],
        }));
        let err = execute(&tool, &json!({"path": "/definitely-missing-path"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolhubError::Backend(_)));
    }

    #[test]
    fn timeout_override_reads_config() {
        let tool = command_tool(json!({
            "command": "sleep 60",
            "allowed_commands": ["sleep"],
            "timeout": 5.0,
        }));
        assert_eq!(timeout_override(&tool), Some(5.0));
    }
}
