//! 沙箱集成测试：数据注入、路径约束、命令拦截、超时与清理

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use delve::capabilities::{Capabilities, ToolContext};
use delve::sandbox::{Dataset, Sandbox, SandboxConfig, SandboxManager};
use delve::tools::build_registry;

fn manager(tmp: &tempfile::TempDir) -> SandboxManager {
    SandboxManager::new(SandboxConfig {
        base_dir: tmp.path().to_path_buf(),
        command_timeout: Duration::from_secs(10),
        ..SandboxConfig::default()
    })
}

fn ten_rows() -> Dataset {
    let mut ds = Dataset::new(["date", "open", "high", "low", "close", "volume"]);
    for day in 1..=10 {
        let close = format!("{}.5", 100 + day);
        ds.push_row([
            format!("2024-01-{day:02}"),
            "100".to_string(),
            "110".to_string(),
            "95".to_string(),
            close,
            "1000".to_string(),
        ]);
    }
    ds
}

fn injected(tmp: &tempfile::TempDir) -> (Sandbox, BTreeMap<String, String>) {
    let sb = manager(tmp).create("exp1").unwrap();
    let mut datasets = BTreeMap::new();
    datasets.insert("AAA".to_string(), ten_rows());
    let manifest = sb.inject_data(&datasets).unwrap();
    (sb, manifest)
}

#[test]
fn test_inject_writes_csv_and_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let (sb, manifest) = injected(&tmp);

    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest["AAA"], "data/AAA.csv");

    let on_disk: BTreeMap<String, String> =
        serde_json::from_str(&sb.read_file("data_manifest.json").unwrap()).unwrap();
    assert_eq!(on_disk, manifest);

    let csv = sb.read_file("data/AAA.csv").unwrap();
    assert_eq!(csv.lines().count(), 11);
    assert!(csv.starts_with("date,open,high,low,close,volume"));

    let files = sb.list_files();
    assert!(files.contains(&"data/AAA.csv".to_string()));
    assert!(files.contains(&"data_manifest.json".to_string()));
}

#[tokio::test]
async fn test_missing_script_is_denied_without_spawning() {
    let tmp = tempfile::tempdir().unwrap();
    let (sb, _) = injected(&tmp);

    let res = sb.run_script("missing.py", None).await;
    assert_eq!(res.returncode, -1);
    assert!(res.stderr.contains("outside sandbox or does not exist"));
    assert_eq!(sb.spawned_processes(), 0);
}

#[tokio::test]
async fn test_blocked_command_never_spawns() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = manager(&tmp).create("blocked").unwrap();

    let res = sb.run_command("sudo rm -rf / --no-preserve-root", None).await;
    assert_eq!(res.returncode, -1);
    assert!(res.stderr.starts_with("Blocked:"));
    assert_eq!(sb.spawned_processes(), 0);
}

#[test]
fn test_traversal_and_absolute_paths_are_denied() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = manager(&tmp).create("paths").unwrap();
    std::fs::write(tmp.path().join("secret.txt"), "top secret").unwrap();

    for path in ["../secret.txt", "data/../../secret.txt"] {
        let err = sb.read_file(path).unwrap_err().to_string();
        assert!(err.contains("outside sandbox"), "{path}: {err}");
        assert!(!err.contains(tmp.path().to_str().unwrap()));
    }
    let abs = tmp.path().join("secret.txt");
    assert!(sb.read_file(abs.to_str().unwrap()).is_err());
    assert!(sb.write_file("../escape.txt", "x").is_err());
    assert!(!tmp.path().join("escape.txt").exists());
}

#[test]
fn test_large_file_read_is_truncated() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = manager(&tmp).create("big").unwrap();
    sb.write_file("big.txt", &"x".repeat(25_000)).unwrap();

    let content = sb.read_file("big.txt").unwrap();
    assert!(content.starts_with(&"x".repeat(10_000)));
    assert!(content.ends_with("[truncated, total 25000 chars]"));
}

#[tokio::test]
async fn test_script_runs_in_workspace_root() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = manager(&tmp).create("script").unwrap();
    sb.write_file("hello.sh", "echo hello from $(basename \"$PWD\")").unwrap();

    let res = sb.run_command("sh hello.sh", None).await;
    assert!(res.success(), "{}", res.render());
    assert_eq!(res.stdout.trim(), "hello from script");
    assert_eq!(sb.spawned_processes(), 1);
}

#[test]
fn test_cleanup_twice_and_sibling_workspaces() {
    let tmp = tempfile::tempdir().unwrap();
    let m = manager(&tmp);
    let a = m.create("exp1").unwrap();
    let b = m.create("exp10").unwrap();
    b.write_file("keep.txt", "b").unwrap();

    // exp1 不能借字符串前缀访问 exp10
    assert!(a.read_file("../exp10/keep.txt").is_err());

    a.cleanup();
    a.cleanup();
    assert!(a.is_cleaned());
    assert!(!tmp.path().join("exp1").exists());
    assert_eq!(b.read_file("keep.txt").unwrap(), "b");
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_background_children() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = manager(&tmp).create("timeout").unwrap();

    let res = sb
        .run_command(
            "(sleep 2; echo late > late.txt) & wait",
            Some(Duration::from_secs(1)),
        )
        .await;
    assert!(res.timed_out);
    assert_eq!(res.returncode, -1);
    assert!(res.stderr.contains("timed out"));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!sb.root().join("late.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_tool_timeout_kills_background_children() {
    let tmp = tempfile::tempdir().unwrap();
    let sb = Arc::new(manager(&tmp).create("tool_timeout").unwrap());
    let ctx = ToolContext::new(Some(Arc::clone(&sb)), Capabilities::new());
    let registry = build_registry(&ctx, Some(Duration::from_millis(500)));

    let out = registry
        .execute(
            "bash",
            json!({"command": "(sleep 2; echo late > late.txt) & wait"}),
            &ctx,
        )
        .await;
    assert_eq!(out, "[ERROR] tool 'bash' timed out after 500ms");

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!sb.root().join("late.txt").exists());
}
