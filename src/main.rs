//! Delve - 研究工作流 Agentic Tool-Use 运行时
//!
//! 入口：加载配置、初始化日志，`run` 执行一次任务并输出日志与提交结果，
//! `tools` 打印当前配置下模型可见的工具 schema。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use delve::agent::{create_model_client, detect_capabilities, generate_run_id, run_agent, RunRequest};
use delve::capabilities::ToolContext;
use delve::config::load_config;
use delve::core::AgentError;
use delve::sandbox::{Dataset, SandboxManager};
use delve::tools::build_registry;

/// 没有提交结果时的退出码
const EXIT_NOT_SUBMITTED: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "delve")]
#[command(about = "Agentic tool-use runtime for sandboxed research workflows")]
struct Cli {
    /// 额外叠加的配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行一次任务
    Run {
        /// 任务描述；以 @ 开头时从文件读取
        #[arg(long)]
        task: String,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        max_turns: Option<usize>,
        /// 系统提示；以 @ 开头时从文件读取
        #[arg(long)]
        system: Option<String>,
        /// 注入数据集：NAME=path.csv，可重复
        #[arg(long = "data", value_name = "NAME=PATH")]
        data: Vec<String>,
        /// 运行结束后保留工作区
        #[arg(long)]
        keep_workspace: bool,
    },
    /// 打印模型可见的工具 schema（JSON）
    Tools,
}

/// `@path` 读取文件内容，否则原样返回
fn read_arg(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}")),
        None => Ok(value.to_string()),
    }
}

fn parse_dataset(arg: &str) -> anyhow::Result<(String, Dataset)> {
    let Some((name, path)) = arg.split_once('=') else {
        bail!("--data expects NAME=PATH, got '{arg}'");
    };
    let dataset =
        Dataset::from_csv_path(path).with_context(|| format!("Failed to load dataset {path}"))?;
    Ok((name.trim().to_string(), dataset))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    delve::observability::init();
    let cli = Cli::parse();
    let config = load_config(cli.config).context("Failed to load config")?;

    match cli.command {
        Command::Tools => {
            let manager = SandboxManager::new(config.sandbox.to_sandbox_config());
            let sandbox = Arc::new(
                manager
                    .create(&generate_run_id())
                    .context("Failed to create sandbox")?,
            );
            let ctx = ToolContext::new(Some(Arc::clone(&sandbox)), detect_capabilities(&config));
            let mut schemas = build_registry(&ctx, None).get_schemas();
            schemas.push(config.loop_config().terminal_tool);
            sandbox.cleanup();
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
        Command::Run {
            task,
            run_id,
            max_turns,
            system,
            data,
            keep_workspace,
        } => {
            let mut request = RunRequest::new(read_arg(&task)?);
            request.run_id = run_id;
            request.max_turns = max_turns;
            request.system_prompt = system.as_deref().map(read_arg).transpose()?;
            request.keep_workspace = keep_workspace;
            for arg in &data {
                let (name, dataset) = parse_dataset(arg)?;
                request.datasets.insert(name, dataset);
            }

            let cancel = CancellationToken::new();
            request.cancel_token = Some(cancel.clone());
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping after current turn");
                    cancel.cancel();
                }
            });

            let client = create_model_client(&config).context("Failed to create model client")?;
            let capabilities = detect_capabilities(&config);
            let report = match run_agent(client.as_ref(), &config, capabilities, request).await {
                Ok(report) => report,
                Err(AgentError::Aborted(aborted)) => {
                    eprintln!("{}", aborted.log);
                    return Err(anyhow::Error::new(AgentError::Aborted(aborted)).context("Run aborted"));
                }
                Err(e) => return Err(e).context("Run failed"),
            };

            eprintln!("{}", report.log);
            if let Some(path) = &report.workspace {
                eprintln!("workspace: {}", path.display());
            }
            match &report.payload {
                Some(payload) => println!("{}", serde_json::to_string_pretty(payload)?),
                None => {
                    eprintln!(
                        "no result submitted ({}, {} turns)",
                        report.termination, report.turns
                    );
                    std::process::exit(EXIT_NOT_SUBMITTED);
                }
            }
        }
    }

    Ok(())
}
