//! 沙箱内子进程执行
//!
//! 命令经 shell（Unix: `sh -c`，Windows: `cmd /C`）在工作区根目录执行；脚本用配置的解释器运行。
//! 启动前做黑名单检查，命中时直接拒绝，不产生任何子进程。
//! Unix 下子进程放入独立进程组，超时时整组 SIGKILL，后台派生的孙进程一并结束。

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{truncate_chars, Sandbox};
use crate::core::error::format_limit;
use crate::core::SandboxError;

/// 超时后等待输出管道关闭的宽限时间
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// 命令执行结果；超时或被拒绝时 returncode 为 -1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// 脚本执行结果与命令结果同构
pub type ScriptResult = CommandResult;

impl CommandResult {
    fn rejected(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            returncode: -1,
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        self.returncode == 0 && !self.timed_out
    }

    /// 渲染为模型可读文本：非空的 stdout / stderr 段落 + exit_code
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(format!("stdout:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("stderr:\n{}", self.stderr));
        }
        parts.push(format!("exit_code: {}", self.returncode));
        parts.join("\n")
    }
}

impl Sandbox {
    /// 黑名单检查（子串匹配，忽略大小写）
    pub fn check_command(&self, command: &str) -> Result<(), SandboxError> {
        let lowered = command.to_lowercase();
        match self
            .config
            .blacklist
            .iter()
            .find(|pattern| !pattern.is_empty() && lowered.contains(&pattern.to_lowercase()))
        {
            Some(pattern) => Err(SandboxError::CommandBlocked(pattern.clone())),
            None => Ok(()),
        }
    }

    /// 在工作区根目录执行 shell 命令；timeout 为空时使用配置的默认值
    pub async fn run_command(&self, command: &str, timeout: Option<Duration>) -> CommandResult {
        if command.trim().is_empty() {
            return CommandResult::rejected("Empty command");
        }
        if let Err(e) = self.check_command(command) {
            tracing::warn!(run_id = %self.run_id(), command = %command, "command blocked");
            return CommandResult::rejected(e.to_string());
        }
        let limit = timeout.unwrap_or(self.config.command_timeout);
        tracing::debug!(run_id = %self.run_id(), command = %command, "running command");
        self.run_process(shell_command(command), limit, "Command").await
    }

    /// 用配置的解释器运行工作区内的脚本
    pub async fn run_script(&self, path: &str, timeout: Option<Duration>) -> ScriptResult {
        let script = match self.resolve(path, true) {
            Ok(p) if p.is_file() => p,
            _ => return CommandResult::rejected(SandboxError::NotFound(path.to_string()).to_string()),
        };
        let limit = timeout.unwrap_or(self.config.command_timeout);
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script);
        tracing::debug!(run_id = %self.run_id(), script = %path, "running script");
        self.run_process(cmd, limit, "Script").await
    }

    async fn run_process(&self, mut cmd: Command, limit: Duration, label: &str) -> CommandResult {
        cmd.current_dir(self.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return CommandResult::rejected(format!("{label} execution error: {e}")),
        };
        // 进程退出后 child.id() 返回 None，这里先记下
        let pid = child.id();
        // 调用方提前丢弃本 future（如工具级超时）时，由 guard 结束整个进程组
        let mut guard = GroupGuard::new(pid);
        let stdout_buf = Captured::default();
        let stderr_buf = Captured::default();
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take(), Arc::clone(&stdout_buf)));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take(), Arc::clone(&stderr_buf)));
        let deadline = Instant::now() + limit;

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                guard.disarm();
                return CommandResult::rejected(format!("{label} execution error: {e}"));
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                guard.disarm();
                let _ = tokio::time::timeout(DRAIN_GRACE, join_reader(&mut stdout_task)).await;
                return self.timed_out(label, limit, take_captured(&stdout_buf));
            }
        };

        // 进程已退出，但后台派生的进程可能仍持有管道
        let drained = tokio::time::timeout_at(deadline, async {
            join_reader(&mut stdout_task).await;
            join_reader(&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            kill_group(pid);
            guard.disarm();
            let _ = tokio::time::timeout(DRAIN_GRACE, join_reader(&mut stdout_task)).await;
            return self.timed_out(label, limit, take_captured(&stdout_buf));
        }
        guard.disarm();

        CommandResult {
            stdout: truncate_chars(
                &String::from_utf8_lossy(&take_captured(&stdout_buf)),
                self.config.max_stdout,
            ),
            stderr: truncate_chars(
                &String::from_utf8_lossy(&take_captured(&stderr_buf)),
                self.config.max_stderr,
            ),
            returncode: status.code().unwrap_or(-1),
            timed_out: false,
        }
    }

    fn timed_out(&self, label: &str, limit: Duration, stdout: Vec<u8>) -> CommandResult {
        let shown = format_limit(&limit);
        tracing::warn!(run_id = %self.run_id(), limit = %shown, "{label} timed out");
        CommandResult {
            stdout: truncate_chars(&String::from_utf8_lossy(&stdout), self.config.max_stdout),
            stderr: format!("{label} timed out after {shown}"),
            returncode: -1,
            timed_out: true,
        }
    }
}

/// 管道读取任务的共享缓冲，超时时也能取到已读出的部分
type Captured = Arc<Mutex<Vec<u8>>>;

/// 未解除时在 drop 中杀掉整个进程组
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.pid.is_some() {
            tracing::debug!(pid = ?self.pid, "process future dropped, killing group");
            kill_group(self.pid.take());
        }
    }
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, sink: Captured) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

/// 等待读取任务结束；已结束的任务不再 poll
async fn join_reader(task: &mut JoinHandle<()>) {
    if !task.is_finished() {
        let _ = task.await;
    }
}

fn take_captured(buf: &Captured) -> Vec<u8> {
    buf.lock().map(|mut b| std::mem::take(&mut *b)).unwrap_or_default()
}

/// 杀掉整个进程组并回收子进程
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    let _ = child.kill().await;
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // 子进程以 process_group(0) 启动，pgid == pid
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
