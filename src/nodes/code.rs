/// Code node: sandboxed Lua evaluation
///
/// Expected config: { "script": "return { total = input.price * input.qty }", "input": {...} }
/// The script sees the resolved `input` value as a global and must return the
/// node's output. Each run gets a fresh Lua state with the dangerous globals
/// removed, executed on a blocking thread. An instruction hook stops the
/// script once the attempt is cancelled or its deadline passes.

use super::{require_str, ExecutionContext, NodeHandler};
use crate::error::{FieldError, NodeError};
use crate::workflow::types::NodeType;
use async_trait::async_trait;
use mlua::{HookTriggers, LuaSerdeExt, VmState};
use serde_json::{json, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Globals stripped from every sandbox
const BLOCKED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "require", "load", "loadfile", "loadstring", "dofile",
    "collectgarbage", "rawget", "rawset", "setmetatable", "getmetatable",
];

/// Instructions between cancellation checks
const HOOK_INTERVAL: u32 = 1_000;

#[derive(Debug, Default)]
pub struct CodeHandler;

#[async_trait]
impl NodeHandler for CodeHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Code
    }

    fn description(&self) -> &'static str {
        "Runs a Lua script against the resolved `input` value"
    }

    fn default_config(&self) -> Value {
        json!({
            "script": "return input",
            "input": null
        })
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require_str(config, "script", &mut errors);
        errors
    }

    async fn execute(&self, config: Value, ctx: ExecutionContext) -> Result<Value, NodeError> {
        let script = config
            .get("script")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input = config.get("input").cloned().unwrap_or(Value::Null);

        tracing::debug!("🧠 Executing code node {} ({} bytes of Lua)", ctx.node_id, script.len());

        let cancel = ctx.cancel.clone();
        let deadline = ctx.deadline.into_std();
        let task = tokio::task::spawn_blocking(move || run_script(&script, &input, &cancel, Some(deadline)));
        let joined = ctx.guard(task).await?;
        let output = joined
            .map_err(|e| NodeError::failed(format!("Script worker failed: {}", e)))?
            .map_err(NodeError::Execution)?;

        Ok(output)
    }
}

/// Evaluate a script in a fresh sandbox
///
/// Errors are flattened to strings so nothing Lua-owned leaves the thread.
pub fn run_script(
    script: &str,
    input: &Value,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<Value, String> {
    let lua = mlua::Lua::new();
    let globals = lua.globals();

    let interrupt = cancel.clone();
    lua.set_hook(HookTriggers::new().every_nth_instruction(HOOK_INTERVAL), move |_lua, _debug| {
        if interrupt.is_cancelled() {
            return Err(mlua::Error::runtime("script cancelled"));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(mlua::Error::runtime("script ran past its deadline"));
        }
        Ok(VmState::Continue)
    });

    for name in BLOCKED_GLOBALS {
        globals
            .set(*name, mlua::Nil)
            .map_err(|e| format!("Failed to prepare sandbox: {}", e))?;
    }

    let lua_input = lua
        .to_value(input)
        .map_err(|e| format!("Failed to pass input to script: {}", e))?;
    globals
        .set("input", lua_input)
        .map_err(|e| format!("Failed to pass input to script: {}", e))?;

    let result: mlua::Value = lua
        .load(script)
        .set_name("code-node")
        .eval()
        .map_err(|e| format!("Lua script execution failed: {}", e))?;

    lua.from_value::<Value>(result)
        .map_err(|e| format!("Script returned a value that is not JSON-compatible: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run(script: &str, input: &Value) -> Result<Value, String> {
        run_script(script, input, &CancellationToken::new(), None)
    }

    #[test]
    fn script_reads_input_and_returns_json() {
        let output = run(
            "return { total = input.price * input.qty, tags = { 'a', 'b' } }",
            &json!({"price": 2.5, "qty": 4}),
        )
        .unwrap();
        assert_eq!(output["total"].as_f64(), Some(10.0));
        assert_eq!(output["tags"], json!(["a", "b"]));
    }

    #[test]
    fn sandbox_has_no_os_or_io() {
        let err = run("return os.getenv('HOME')", &Value::Null).unwrap_err();
        assert!(err.contains("Lua script execution failed"));
        assert!(run("return io.open('/etc/passwd')", &Value::Null).is_err());
    }

    #[test]
    fn script_errors_surface_their_message() {
        let err = run("error('boom')", &Value::Null).unwrap_err();
        assert!(err.contains("boom"));
    }

    #[test]
    fn empty_script_is_invalid() {
        assert_eq!(
            CodeHandler.validate_config(&json!({"script": "  "})),
            vec![FieldError::new("script", "is required")]
        );
    }

    #[tokio::test]
    async fn runaway_script_stops_once_cancelled() {
        let cancel = CancellationToken::new();
        let worker = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || run_script("while true do end", &Value::Null, &cancel, None))
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker thread kept running after cancellation")
            .unwrap();
        assert!(outcome.unwrap_err().contains("script cancelled"));
    }

    #[test]
    fn runaway_script_stops_at_its_deadline() {
        let started = Instant::now();
        let err = run_script(
            "while true do end",
            &Value::Null,
            &CancellationToken::new(),
            Some(started + Duration::from_millis(100)),
        )
        .unwrap_err();
        assert!(err.contains("deadline"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
