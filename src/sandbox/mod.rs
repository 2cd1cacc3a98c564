//! 沙箱：每次运行独占的隔离工作目录
//!
//! - **workspace**: 目录创建、路径约束（canonicalize + 前缀校验）、文件读写删、列举、清理、数据注入
//! - **process**: 命令 / 脚本子进程执行（黑名单、输出截断、超时杀进程组）
//! - **dataset**: 注入用的表格数据集（写为 data/<name>.csv）
//! - **helpers**: 写入工作区的指标计算辅助模块
//!
//! 磁盘布局：`<base_dir>/<run_id>/{data/<name>.csv, data_manifest.json, compute_metrics.py}`

pub mod dataset;
pub mod helpers;
pub mod process;
pub mod workspace;

use std::path::PathBuf;
use std::time::Duration;

pub use dataset::Dataset;
pub use process::{CommandResult, ScriptResult};
pub use workspace::Sandbox;

use crate::core::SandboxError;

/// 数据目录名
pub const DATA_DIR: &str = "data";
/// 数据清单文件（name -> 相对路径）
pub const MANIFEST_FILE: &str = "data_manifest.json";
/// 注入的辅助模块文件名
pub const HELPER_MODULE: &str = "compute_metrics.py";

/// 命令黑名单（子串匹配，忽略大小写）：破坏性文件系统 / 系统操作
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -fr /",
    "rmdir /s",
    "del /f /s /q c:",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "mkfs",
    "format c:",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){:|:&};:",
    ":(){ :|:& };:", // fork bomb
    "fork bomb",
];

/// 沙箱运行参数（由 [sandbox] 配置段转换而来）
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// 所有工作区的父目录
    pub base_dir: PathBuf,
    pub command_timeout: Duration,
    pub max_stdout: usize,
    pub max_stderr: usize,
    pub max_read_chars: usize,
    /// 运行脚本使用的解释器
    pub interpreter: String,
    pub blacklist: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("sandbox_workspaces"),
            command_timeout: Duration::from_secs(300),
            max_stdout: 10_000,
            max_stderr: 5_000,
            max_read_chars: 10_000,
            interpreter: "python3".to_string(),
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 沙箱管理器：把 run_id 映射到 base_dir 下互不相交的目录
#[derive(Debug, Clone)]
pub struct SandboxManager {
    config: SandboxConfig,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// 创建（或复用）run_id 对应的工作区，幂等
    pub fn create(&self, run_id: &str) -> Result<Sandbox, SandboxError> {
        validate_name(run_id)?;
        Sandbox::open(self.config.base_dir.join(run_id), run_id, self.config.clone())
    }
}

/// run_id / 数据集名只能是单段普通文件名
pub(crate) fn validate_name(name: &str) -> Result<(), SandboxError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains(':');
    if bad {
        return Err(SandboxError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// 按字符数截断（不加标记），用于 stdout / stderr 预算
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
