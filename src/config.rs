//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DELVE__*` 覆盖（双下划线表示嵌套，如 `DELVE__AGENT__MAX_TURNS=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agentic::{default_terminal_schema, LoopConfig};
use crate::browser::BrowserConfig;
use crate::llm::RetryConfig;
use crate::sandbox::{SandboxConfig, DEFAULT_BLACKLIST};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub sandbox: SandboxSection,
    pub browser: BrowserSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、生成参数、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：anthropic / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

impl LlmSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [llm.retry] 段：单次调用内的重试（循环本身不跨回合重试）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

/// [agent] 段：回合上限、终止工具名、日志预览长度、工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    pub terminal_tool: String,
    pub log_preview_chars: usize,
    /// 单次工具调用整体超时（秒），0 表示不限制
    pub tool_timeout_secs: u64,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 30,
            terminal_tool: "submit_result".to_string(),
            log_preview_chars: 500,
            tool_timeout_secs: 0,
            system_prompt: None,
        }
    }
}

impl AgentSection {
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub base_dir: PathBuf,
    pub command_timeout_secs: u64,
    pub max_stdout: usize,
    pub max_stderr: usize,
    pub max_read_chars: usize,
    pub interpreter: String,
    /// 为空时使用内置黑名单
    pub blacklist: Vec<String>,
    /// 运行结束后删除工作区
    pub cleanup_on_finish: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        let d = SandboxConfig::default();
        Self {
            base_dir: d.base_dir,
            command_timeout_secs: d.command_timeout.as_secs(),
            max_stdout: d.max_stdout,
            max_stderr: d.max_stderr,
            max_read_chars: d.max_read_chars,
            interpreter: d.interpreter,
            blacklist: Vec::new(),
            cleanup_on_finish: true,
        }
    }
}

impl SandboxSection {
    pub fn to_sandbox_config(&self) -> SandboxConfig {
        let blacklist = if self.blacklist.is_empty() {
            DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect()
        } else {
            self.blacklist.iter().map(|s| s.to_lowercase()).collect()
        };
        SandboxConfig {
            base_dir: self.base_dir.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_stdout: self.max_stdout,
            max_stderr: self.max_stderr,
            max_read_chars: self.max_read_chars,
            interpreter: self.interpreter.clone(),
            blacklist,
        }
    }
}

/// [browser] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub enabled: bool,
    pub max_text_chars: usize,
    pub navigation_timeout_secs: u64,
    pub search_url: String,
}

impl Default for BrowserSection {
    fn default() -> Self {
        let d = BrowserConfig::default();
        Self {
            enabled: false,
            max_text_chars: d.max_text_chars,
            navigation_timeout_secs: d.navigation_timeout.as_secs(),
            search_url: d.search_url,
        }
    }
}

impl BrowserSection {
    pub fn to_browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            max_text_chars: self.max_text_chars,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            search_url: self.search_url.clone(),
        }
    }
}

impl AppConfig {
    /// 由 [agent] 与 [llm] 段组装循环参数
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_turns: self.agent.max_turns,
            terminal_tool: default_terminal_schema(&self.agent.terminal_tool),
            system_prompt: self.agent.system_prompt.clone().unwrap_or_default(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            log_preview_chars: self.agent.log_preview_chars,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DELVE__* 可覆盖
///
/// 默认查找 `config/default.toml`、`../config/default.toml`、`default.toml`；
/// `config_path` 指定的文件在其后叠加。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DELVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_turns, 30);
        assert_eq!(cfg.agent.terminal_tool, "submit_result");
        assert_eq!(cfg.agent.tool_timeout(), None);
        assert_eq!(cfg.sandbox.max_stdout, 10_000);
        assert_eq!(cfg.sandbox.max_stderr, 5_000);
        assert!(cfg.sandbox.cleanup_on_finish);
        assert!(!cfg.sandbox.to_sandbox_config().blacklist.is_empty());
        assert_eq!(cfg.loop_config().terminal_tool.name, "submit_result");
    }

    #[test]
    fn test_explicit_file_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_turns = 5
terminal_tool = "finish"

[sandbox]
command_timeout_secs = 10
blacklist = ["CURL"]

[llm.retry]
max_retries = 0
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_turns, 5);
        assert_eq!(cfg.loop_config().terminal_tool.name, "finish");
        assert_eq!(cfg.agent.log_preview_chars, 500);
        let sb = cfg.sandbox.to_sandbox_config();
        assert_eq!(sb.command_timeout, Duration::from_secs(10));
        assert_eq!(sb.blacklist, vec!["curl"]);
        assert_eq!(cfg.llm.retry_config().max_retries, 0);
    }
}
