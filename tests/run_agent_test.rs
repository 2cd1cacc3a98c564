//! 单次运行端到端测试（脚本化模型，无网络）

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use delve::agent::{run_agent, RunRequest};
use delve::capabilities::{Capabilities, DataFetcher};
use delve::config::AppConfig;
use delve::core::AgentError;
use delve::llm::{LlmError, ScriptedModelClient};
use delve::sandbox::Dataset;
use delve::Termination;

fn config(tmp: &tempfile::TempDir) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.sandbox.base_dir = tmp.path().to_path_buf();
    cfg.agent.max_turns = 6;
    cfg
}

#[tokio::test]
async fn test_run_with_kept_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(&tmp);
    let client = ScriptedModelClient::new()
        .then_tool_call("c1", "list_files", json!({}))
        .then_tool_call(
            "c2",
            "write_file",
            json!({"path": "strategy.py", "content": "import compute_metrics\n"}),
        )
        .then_tool_call("c3", "read_file", json!({"path": "../../etc/passwd"}))
        .then_tool_call("c4", "submit_result", json!({"results": {"metrics": {"sharpe": 0.8}}}));

    let mut request = RunRequest::new("backtest a momentum strategy");
    request.run_id = Some("exp_keep".into());
    request.keep_workspace = true;
    request
        .datasets
        .insert("AAA".into(), Dataset::new(["date", "close"]).with_row(["2024-01-02", "10"]));

    let report = run_agent(&client, &cfg, Capabilities::new(), request)
        .await
        .unwrap();

    assert_eq!(report.run_id, "exp_keep");
    assert_eq!(report.termination, Termination::Submitted);
    assert_eq!(report.turns, 4);
    assert_eq!(
        report.payload,
        Some(json!({"results": {"metrics": {"sharpe": 0.8}}}))
    );
    assert_eq!(report.log.failed_dispatches(), 1);
    assert_eq!(report.sources["strategy.py"], "import compute_metrics\n");

    let root = report.workspace.clone().unwrap();
    assert!(root.join("data/AAA.csv").is_file());
    assert!(root.join("compute_metrics.py").is_file());

    // 第一轮 list_files 的结果里能看到注入的数据
    let first_result = &client.requests()[1];
    let text = serde_json::to_string(&first_result.messages.last().unwrap().content).unwrap();
    assert!(text.contains("data/AAA.csv"));
}

#[tokio::test]
async fn test_model_failure_cleans_up_and_returns_partial_log() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(&tmp);
    let client = ScriptedModelClient::new()
        .then_tool_call("c1", "bash", json!({"command": "echo hi"}))
        .then_error(LlmError::Api {
            status: 400,
            message: "bad request".into(),
        });
    let mut request = RunRequest::new("task");
    request.run_id = Some("exp_abort".into());

    let err = run_agent(&client, &cfg, Capabilities::new(), request)
        .await
        .unwrap_err();
    match err {
        AgentError::Aborted(aborted) => {
            assert_eq!(aborted.turns, 2);
            assert_eq!(aborted.log.successful_dispatches(), 1);
        }
        other => panic!("expected aborted run, got {other}"),
    }
    assert!(!tmp.path().join("exp_abort").exists());
}

#[tokio::test]
async fn test_invalid_run_id_is_rejected_before_model_call() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(&tmp);
    let client = ScriptedModelClient::new();
    let mut request = RunRequest::new("task");
    request.run_id = Some("../outside".into());

    let err = run_agent(&client, &cfg, Capabilities::new(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Sandbox(_)));
    assert_eq!(client.call_count(), 0);
}

struct FixedData;

#[async_trait::async_trait]
impl DataFetcher for FixedData {
    async fn fetch(&self, _request: &Value) -> Result<BTreeMap<String, Dataset>, String> {
        let mut out = BTreeMap::new();
        out.insert(
            "BBB".to_string(),
            Dataset::new(["date", "close"]).with_row(["2024-02-01", "20"]),
        );
        Ok(out)
    }
}

#[tokio::test]
async fn test_data_fetcher_capability_exposes_market_tool() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(&tmp);
    let client = ScriptedModelClient::new()
        .then_tool_call(
            "c1",
            "fetch_market_data",
            json!({"symbols": ["BBB"], "start_date": "2024-01-01", "end_date": "2024-03-01"}),
        )
        .then_tool_call("c2", "submit_result", json!({}));
    let caps = Capabilities::new().with_data_fetcher(Arc::new(FixedData));

    let report = run_agent(&client, &cfg, caps, RunRequest::new("task"))
        .await
        .unwrap();
    assert_eq!(report.log.successful_dispatches(), 1);
    assert!(report.files.contains(&"data/BBB.csv".to_string()));

    let tools: Vec<String> = client.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert!(tools.contains(&"fetch_market_data".to_string()));
    assert!(!tools.contains(&"google_search".to_string()));
}
