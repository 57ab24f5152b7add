//! 本地进程运行器
//! 在装置所在机器上运行构建工具等外部命令，逐行捕获输出

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{HarnessError, Result};
use crate::output::append_line;

/// 本地进程运行器
#[derive(Debug, Default)]
pub struct LocalProcessRunner;

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// 执行本地命令并返回合并后的输出（stdout 与 stderr 按行交错）
    ///
    /// `shell` 为真时命令经 `sh -c` 运行。非零退出码视为错误。
    /// 超时会杀死本地子进程（与远程运行器不同，本地进程可控）。
    pub async fn execute(
        &self,
        command: &[String],
        shell: bool,
        working_dir: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        if command.is_empty() {
            return Err(HarnessError::invalid("command must not be empty"));
        }
        let rendered = command.join(" ");

        let mut cmd = if shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&rendered);
            c
        } else {
            let mut c = Command::new(&command[0]);
            c.args(&command[1..]);
            c
        };

        // 构建工具是 Python 脚本，保证其输出不被缓冲
        cmd.env("PYTHONUNBUFFERED", "x");
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(command = %rendered, "Executing local command");

        let mut child = cmd
            .spawn()
            .map_err(|e| HarnessError::process(format!("failed to spawn {}: {}", rendered, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::process("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarnessError::process("stderr not captured"))?;

        let run = async {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut captured = String::new();
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line? {
                        Some(line) => {
                            info!("{}", line);
                            append_line(&mut captured, &line);
                        }
                        None => out_done = true,
                    },
                    line = err_lines.next_line(), if !err_done => match line? {
                        Some(line) => {
                            error!("{}", line);
                            append_line(&mut captured, &line);
                        }
                        None => err_done = true,
                    },
                }
            }

            let status = child.wait().await?;
            Ok::<_, HarnessError>((captured, status))
        };

        let (captured, status) = match timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                HarnessError::Timeout {
                    command: rendered.clone(),
                    timeout_secs: limit.as_secs(),
                }
            })??,
            None => run.await?,
        };

        if !status.success() {
            return Err(HarnessError::process(format!(
                "command failed with exit code {:?}: {}",
                status.code(),
                rendered
            )));
        }

        info!(command = %rendered, "Local command completed");
        Ok(captured)
    }
}
