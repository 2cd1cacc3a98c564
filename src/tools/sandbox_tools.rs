//! 沙箱工具：bash / write_file / read_file / delete_file / run_python / list_files
//!
//! 所有操作都经由本次运行的 Sandbox 执行，路径约束与命令黑名单在沙箱层统一处理。
//! 命令与脚本的结果渲染为 `stdout:` / `stderr:` / `exit_code:` 段落。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{ToolDefinition, ToolExecutor, ToolSchema};
use super::schema::{input_schema, parse_input};
use crate::capabilities::ToolContext;
use crate::core::ToolError;
use crate::sandbox::Sandbox;

fn sandbox(ctx: &ToolContext) -> Result<&Arc<Sandbox>, ToolError> {
    ctx.sandbox.as_ref().ok_or(ToolError::Unavailable("sandbox"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashInput {
    /// The shell command to execute
    pub command: String,
    /// Optional timeout in seconds (defaults to the sandbox command timeout)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// bash：在沙箱根目录执行 shell 命令
pub struct BashTool;

#[async_trait]
impl ToolExecutor for BashTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: BashInput = parse_input(input)?;
        let sb = sandbox(ctx)?;
        let result = sb
            .run_command(&args.command, args.timeout_secs.map(Duration::from_secs))
            .await;
        Ok(result.render())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileInput {
    /// Relative file path within the sandbox (e.g. 'strategy.py', 'src/utils.py')
    pub path: String,
    /// The full file content to write
    pub content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl ToolExecutor for WriteFileTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: WriteFileInput = parse_input(input)?;
        let chars = sandbox(ctx)?.write_file(&args.path, &args.content)?;
        Ok(format!("OK: wrote {} chars to {}", chars, args.path))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathInput {
    /// Relative file path within the sandbox
    pub path: String,
}

pub struct ReadFileTool;

#[async_trait]
impl ToolExecutor for ReadFileTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: PathInput = parse_input(input)?;
        Ok(sandbox(ctx)?.read_file(&args.path)?)
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl ToolExecutor for DeleteFileTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: PathInput = parse_input(input)?;
        sandbox(ctx)?.delete_file(&args.path)?;
        Ok(format!("OK: deleted {}", args.path))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunPythonInput {
    /// Relative path to the Python script to run (e.g. 'strategy.py')
    pub script_path: String,
    /// Optional timeout in seconds (defaults to the sandbox command timeout)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// run_python：用配置的解释器运行沙箱内的脚本
pub struct RunPythonTool;

#[async_trait]
impl ToolExecutor for RunPythonTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: RunPythonInput = parse_input(input)?;
        let result = sandbox(ctx)?
            .run_script(&args.script_path, args.timeout_secs.map(Duration::from_secs))
            .await;
        Ok(result.render())
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListFilesInput {}

pub struct ListFilesTool;

#[async_trait]
impl ToolExecutor for ListFilesTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        // 允许模型传 null / 空对象
        if !input.is_null() {
            let _: ListFilesInput = parse_input(input)?;
        }
        let files = sandbox(ctx)?.list_files();
        if files.is_empty() {
            return Ok("(no files)".to_string());
        }
        Ok(files.join("\n"))
    }
}

/// 沙箱工具全集，按固定顺序
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ToolSchema::new(
                "bash",
                "Execute a shell command in the sandbox working directory. \
                 Use for: installing packages, listing files, data processing and other shell operations.",
                input_schema::<BashInput>(),
            ),
            BashTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "write_file",
                "Write content to a file in the sandbox. Creates parent directories if needed. \
                 Use for: writing Python scripts, saving intermediate results, creating config files.",
                input_schema::<WriteFileInput>(),
            ),
            WriteFileTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "read_file",
                "Read the content of a file in the sandbox. Long files are truncated. \
                 Use for: inspecting data files, checking script output, reviewing code.",
                input_schema::<PathInput>(),
            ),
            ReadFileTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "delete_file",
                "Delete a file in the sandbox.",
                input_schema::<PathInput>(),
            ),
            DeleteFileTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "run_python",
                "Run a Python script file in the sandbox. \
                 The script runs with the sandbox as its working directory; \
                 `compute_metrics.py` and `data_manifest.json` are available there.",
                input_schema::<RunPythonInput>(),
            ),
            RunPythonTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "list_files",
                "List all files in the sandbox as relative paths.",
                input_schema::<ListFilesInput>(),
            ),
            ListFilesTool,
        ),
    ]
}
