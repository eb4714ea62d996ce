//! Tool registry and executor.
//!
//! Registration is idempotent: re-registering a name replaces the handler.
//! `execute` validates arguments against the declared schema before the
//! handler ever runs, and shields the reasoning loop from handler timeouts,
//! panics and cancellation. Every failure mode comes back as a `ToolError`
//! the loop folds into an Observation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atlas_core::tools::{Tool, ToolContext, ToolDefinition, ToolError};
use futures::FutureExt;
use tracing::{debug, error, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OBSERVATION_BYTES: usize = 8 * 1024;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Register a tool, replacing any previous handler under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "replaced existing tool registration");
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declared shapes of every tool, sorted by name, for prompt rendering.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Look up, validate and run one tool call.
    ///
    /// Schema mismatches return `InvalidArguments` without invoking the
    /// handler. The handler itself runs under a timeout and a panic guard;
    /// cancellation of `ctx.abort_signal` wins over a still-running handler.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        validate_arguments(&tool.parameters_schema(), &args)
            .map_err(ToolError::InvalidArguments)?;

        let start = Instant::now();
        let guarded = tokio::time::timeout(
            self.tool_timeout,
            std::panic::AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind(),
        );

        let result = tokio::select! {
            _ = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
            result = guarded => result,
        };

        match result {
            Ok(Ok(outcome)) => {
                debug!(
                    tool = %name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "tool finished"
                );
                outcome
            }
            Ok(Err(panic)) => {
                error!(tool = %name, panic = %panic_message(&panic), "tool panicked");
                Err(ToolError::ExecutionFailed("internal tool crash".to_string()))
            }
            Err(_) => {
                warn!(
                    tool = %name,
                    timeout_secs = self.tool_timeout.as_secs(),
                    "tool timed out"
                );
                Err(ToolError::Timeout(self.tool_timeout))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `args` against a JSON-Schema-shaped declaration: required keys must
/// be present and provided values must match their declared `type`.
fn validate_arguments(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let args = args
        .as_object()
        .ok_or_else(|| "参数必须是 JSON 对象".to_string())?;

    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !args.contains_key(key) {
                return Err(format!("缺少必需参数 {key}"));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (key, value) in args {
            let Some(declared) = properties.get(key) else {
                continue; // undeclared extras are ignored, not rejected
            };
            let Some(expected) = declared["type"].as_str() else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!("参数 {key} 应为 {expected} 类型"));
            }
            if expected == "array" {
                if let (Some(item_type), Some(items)) =
                    (declared["items"]["type"].as_str(), value.as_array())
                {
                    if let Some(bad) = items.iter().find(|v| !type_matches(item_type, v)) {
                        return Err(format!("参数 {key} 的元素 {bad} 应为 {item_type} 类型"));
                    }
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Cap an observation before it enters the transcript and the next prompt.
/// Cuts at a char boundary and appends a marker with the original size.
pub fn truncate_observation(text: &str) -> String {
    if text.len() <= MAX_OBSERVATION_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OBSERVATION_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[截断: 原始 {} 字节]", &text[..end], text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atlas_core::ids::SessionId;
    use tokio_util::sync::CancellationToken;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "回显输入"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": {"type": "string"},
                    "repeat": {"type": "integer"}
                }
            })
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({"echo": args["text"]}))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "crashes"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            panic!("boom");
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::new())
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let out = registry()
            .execute("echo", serde_json::json!({"text": "你好"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["echo"], "你好");
    }

    #[tokio::test]
    async fn unknown_tool() {
        let err = registry()
            .execute("teleport", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "teleport"));
    }

    #[tokio::test]
    async fn missing_required_argument_rejected_before_invocation() {
        let err = registry()
            .execute("echo", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(m) if m.contains("text")));
    }

    #[tokio::test]
    async fn wrong_type_rejected() {
        let err = registry()
            .execute("echo", serde_json::json!({"text": 42}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(m) if m.contains("string")));

        let err = registry()
            .execute("echo", serde_json::json!({"text": "x", "repeat": "three"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn non_object_arguments_rejected() {
        let err = registry()
            .execute("echo", serde_json::json!([1, 2]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn reregistration_replaces() {
        struct LoudEcho;

        #[async_trait]
        impl Tool for LoudEcho {
            fn name(&self) -> &str {
                "echo"
            }
            fn description(&self) -> &str {
                "大声回显"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn execute(
                &self,
                _args: serde_json::Value,
                _ctx: &ToolContext,
            ) -> Result<serde_json::Value, ToolError> {
                Ok(serde_json::json!({"echo": "LOUD"}))
            }
        }

        let mut registry = registry();
        registry.register(Arc::new(LoudEcho));
        assert_eq!(registry.count(), 1);

        let out = registry
            .execute("echo", serde_json::json!({}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["echo"], "LOUD");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new().with_tool_timeout(Duration::from_millis(100));
        registry.register(Arc::new(SlowTool));

        let err = registry
            .execute("slow", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn panicking_tool_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickyTool));

        let err = registry
            .execute("panicky", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_running_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));

        let ctx = ctx();
        let cancel = ctx.abort_signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let err = registry
            .execute("slow", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[test]
    fn definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(EchoTool));

        let defs = registry.definitions();
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[1].name, "slow");
        assert_eq!(registry.names(), vec!["echo", "slow"]);
    }

    #[test]
    fn truncation_marks_and_respects_char_boundaries() {
        let short = "一切正常";
        assert_eq!(truncate_observation(short), short);

        let long = "观".repeat(10_000); // 30KB of multi-byte chars
        let cut = truncate_observation(&long);
        assert!(cut.len() < long.len());
        assert!(cut.contains("[截断"));
        assert!(cut.contains("30000 字节"));
    }
}
