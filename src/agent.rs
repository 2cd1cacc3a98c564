//! 单次运行编排
//!
//! run_agent：创建沙箱 -> 注入数据集与辅助模块 -> 按能力新建注册表 -> 跑 Agentic 循环 ->
//! 收集生成的 `*.py` 源码与文件清单 -> 按配置清理沙箱 -> 返回 RunReport。
//! create_model_client 根据 [llm] 段构建模型客户端（带单次调用重试）。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agentic::{AgenticLoop, ExecutionLog, LoopEvent, Termination};
use crate::browser::BrowserSession;
use crate::capabilities::{Capabilities, ToolContext};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{AnthropicClient, LlmError, ModelClient, RetryingModelClient, ScriptedModelClient};
use crate::sandbox::{Dataset, SandboxManager};
use crate::tools::build_registry;

/// 一次运行的输入
#[derive(Debug, Default)]
pub struct RunRequest {
    /// 工作区名；为空时自动生成
    pub run_id: Option<String>,
    pub task: String,
    /// 覆盖 [agent].system_prompt
    pub system_prompt: Option<String>,
    /// 覆盖 [agent].max_turns
    pub max_turns: Option<usize>,
    pub datasets: BTreeMap<String, Dataset>,
    /// 保留工作区（忽略 cleanup_on_finish）
    pub keep_workspace: bool,
    pub cancel_token: Option<CancellationToken>,
    pub event_tx: Option<UnboundedSender<LoopEvent>>,
}

impl RunRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }
}

/// 一次运行的结果；payload 为空表示模型没有提交
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub payload: Option<Value>,
    pub termination: Termination,
    pub turns: usize,
    pub log: ExecutionLog,
    /// 数据集名 -> 相对路径
    pub manifest: BTreeMap<String, String>,
    /// 运行结束时工作区内的文件
    pub files: Vec<String>,
    /// 生成的 Python 源码（相对路径 -> 内容）
    pub sources: BTreeMap<String, String>,
    /// 保留下来的工作区路径（已清理时为空）
    pub workspace: Option<PathBuf>,
}

/// 自动生成 run_id：时间戳 + 短 uuid
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "run_{}_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        &uuid[..8]
    )
}

/// 根据 [llm] 段创建模型客户端
pub fn create_model_client(cfg: &AppConfig) -> Result<Arc<dyn ModelClient>, AgentError> {
    match cfg.llm.provider.as_str() {
        "mock" => {
            tracing::info!("using scripted model client (offline)");
            Ok(Arc::new(ScriptedModelClient::new()))
        }
        "anthropic" => {
            let key = std::env::var(&cfg.llm.api_key_env).map_err(|_| {
                LlmError::Config(format!("environment variable {} is not set", cfg.llm.api_key_env))
            })?;
            let client = AnthropicClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                cfg.llm.request_timeout(),
            )?;
            tracing::info!(model = %cfg.llm.model, "using anthropic messages client");
            Ok(Arc::new(RetryingModelClient::new(client, cfg.llm.retry_config())))
        }
        other => Err(LlmError::Config(format!("unknown llm provider: {other}")).into()),
    }
}

/// 根据 [browser] 段探测浏览能力
pub fn detect_capabilities(cfg: &AppConfig) -> Capabilities {
    let mut caps = Capabilities::new();
    if cfg.browser.enabled {
        if let Some(session) = BrowserSession::detect(cfg.browser.to_browser_config()) {
            caps = caps.with_browser(Arc::new(session));
        }
    }
    caps
}

/// 执行一次完整运行
pub async fn run_agent(
    client: &dyn ModelClient,
    config: &AppConfig,
    capabilities: Capabilities,
    request: RunRequest,
) -> Result<RunReport, AgentError> {
    let RunRequest {
        run_id,
        task,
        system_prompt,
        max_turns,
        datasets,
        keep_workspace,
        cancel_token,
        event_tx,
    } = request;
    let run_id = run_id.unwrap_or_else(generate_run_id);
    let manager = SandboxManager::new(config.sandbox.to_sandbox_config());
    let sandbox = Arc::new(manager.create(&run_id)?);
    tracing::info!(run_id = %run_id, capabilities = ?capabilities, "run started");

    let result = async {
        let manifest = sandbox.inject_data(&datasets)?;
        sandbox.inject_helpers()?;

        let ctx = ToolContext::new(Some(Arc::clone(&sandbox)), capabilities);
        let registry = build_registry(&ctx, config.agent.tool_timeout());

        let mut loop_config = config.loop_config();
        if let Some(n) = max_turns {
            loop_config.max_turns = n;
        }
        if let Some(prompt) = system_prompt {
            loop_config.system_prompt = prompt;
        }

        let mut agentic = AgenticLoop::new(client, &registry, &ctx, loop_config);
        if let Some(token) = cancel_token {
            agentic = agentic.with_cancel_token(token);
        }
        if let Some(tx) = event_tx {
            agentic = agentic.with_event_tx(tx);
        }
        let outcome = agentic.run(&task).await?;

        Ok::<_, AgentError>(RunReport {
            run_id: run_id.clone(),
            payload: outcome.payload,
            termination: outcome.termination,
            turns: outcome.turns,
            log: outcome.log,
            manifest,
            files: sandbox.list_files(),
            sources: sandbox.collect_sources("py"),
            workspace: None,
        })
    }
    .await;

    let keep = keep_workspace || !config.sandbox.cleanup_on_finish;
    if keep {
        tracing::info!(run_id = %run_id, root = %sandbox.root().display(), "workspace kept");
    } else {
        sandbox.cleanup();
    }
    let mut report = result?;
    if keep {
        report.workspace = Some(sandbox.root().to_path_buf());
    }
    tracing::info!(
        run_id = %report.run_id,
        termination = %report.termination,
        turns = report.turns,
        submitted = report.payload.is_some(),
        "run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_run_id_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("run_"));
        assert!(crate::sandbox::validate_name(&id).is_ok());
        assert_ne!(generate_run_id(), id);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "nope".into();
        let err = create_model_client(&cfg).err().unwrap();
        assert!(err.to_string().contains("unknown llm provider"));
    }

    #[tokio::test]
    async fn test_run_cleans_workspace_and_reports_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.sandbox.base_dir = tmp.path().to_path_buf();

        let client = ScriptedModelClient::new()
            .then_tool_call(
                "c1",
                "write_file",
                json!({"path": "strategy.py", "content": "print(1)"}),
            )
            .then_tool_call("c2", "submit_result", json!({"results": {"metrics": {}}}));
        let mut request = RunRequest::new("write a strategy");
        request.run_id = Some("unit_run".into());
        request.datasets.insert(
            "AAA".into(),
            Dataset::new(["date", "close"]).with_row(["2024-01-02", "1"]),
        );

        let report = run_agent(&client, &cfg, Capabilities::new(), request).await.unwrap();
        assert_eq!(report.termination, Termination::Submitted);
        assert_eq!(report.manifest["AAA"], "data/AAA.csv");
        assert!(report.sources.contains_key("strategy.py"));
        assert!(report.sources.contains_key("compute_metrics.py"));
        assert!(report.files.contains(&"data_manifest.json".to_string()));
        assert!(report.workspace.is_none());
        assert!(!tmp.path().join("unit_run").exists());
    }
}
