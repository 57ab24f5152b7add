//! 远程命令运行器
//! 在导演节点上执行命令：墙钟超时、逐行输出捕获、SFTP 上传
//!
//! 超时语义：到达期限后关闭通道并返回超时错误，**不会杀死远程进程**，
//! 远程命令可能继续运行。这是既有契约的一部分。

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, Result};
use crate::output::{append_line, LineBuffer};
use crate::ssh::config::SshConfig;
#[cfg(test)]
use crate::ssh::transport::ExecChannel;
use crate::ssh::transport::{ChannelEvent, FileTransfer, RusshTransport, Transport};

/// 通道关闭轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `remove` 使用的短超时（秒）
const REMOVE_TIMEOUT_SECS: u64 = 10;

/// 未从连接配置构造时的缺省命令超时（秒）
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// 一次远程命令执行的捕获结果
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 远程命令运行器
pub struct RemoteCommandRunner {
    transport: Box<dyn Transport>,
    target: String,
    default_timeout_secs: u64,
}

impl RemoteCommandRunner {
    /// 基于 russh 传输创建运行器
    pub fn new(config: SshConfig) -> Self {
        let target = config.target();
        let default_timeout_secs = config.command_timeout_secs;
        Self {
            transport: Box::new(RusshTransport::new(config)),
            target,
            default_timeout_secs,
        }
    }

    /// 注入自定义传输（测试用）
    pub fn with_transport(transport: Box<dyn Transport>, target: impl Into<String>) -> Self {
        Self {
            transport,
            target: target.into(),
            default_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    /// 连接配置给出的命令缺省超时（秒），用于无协议常量的长命令
    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    /// 建立会话；已连接时为空操作
    pub async fn connect(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        Ok(())
    }

    /// 断开会话；未连接时为空操作。之后的 execute/put 会按需重连
    pub async fn disconnect(&mut self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// 执行远程命令
    ///
    /// 输出按行写入捕获缓冲区：未提供 `stderr_sink` 时标准错误并入
    /// `stdout_sink`。返回远程退出码。超过 `timeout_secs` 时关闭通道并
    /// 返回超时错误（超时判定在期限后的一个轮询间隔内发生）。
    pub async fn execute(
        &mut self,
        command: &str,
        timeout_secs: u64,
        mut stdout_sink: Option<&mut String>,
        mut stderr_sink: Option<&mut String>,
    ) -> Result<i32> {
        if command.trim().is_empty() {
            return Err(HarnessError::invalid("command must not be empty"));
        }
        if timeout_secs == 0 {
            return Err(HarnessError::invalid(format!(
                "timeout must be positive, got {}",
                timeout_secs
            )));
        }

        self.connect().await?;

        info!(
            target_addr = %self.target,
            command = %command,
            timeout_secs = timeout_secs,
            "Executing remote command"
        );

        let mut channel = self.transport.open_exec(command).await?;
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        let mut stdout_lines = LineBuffer::new();
        let mut stderr_lines = LineBuffer::new();
        let mut exit_code: Option<u32> = None;

        loop {
            if Instant::now() >= deadline {
                let _ = channel.close().await;
                warn!(
                    command = %command,
                    timeout_secs = timeout_secs,
                    "Remote command timed out, channel closed (remote process may still be running)"
                );
                return Err(HarnessError::Timeout {
                    command: command.to_string(),
                    timeout_secs,
                });
            }

            match tokio::time::timeout(POLL_INTERVAL, channel.recv()).await {
                // 轮询间隔耗尽，回到循环头重新检查期限
                Err(_) => continue,
                Ok(event) => match event? {
                    Some(ChannelEvent::Stdout(data)) => {
                        for line in stdout_lines.push(&data) {
                            info!("{}", line);
                            Self::emit_stdout(&mut stdout_sink, &line);
                        }
                    }
                    Some(ChannelEvent::Stderr(data)) => {
                        for line in stderr_lines.push(&data) {
                            error!("{}", line);
                            Self::emit_stderr(&mut stdout_sink, &mut stderr_sink, &line);
                        }
                    }
                    // 退出码先于通道关闭到达，继续排空剩余输出
                    Some(ChannelEvent::Exit(code)) => {
                        exit_code = Some(code);
                    }
                    None => break,
                },
            }
        }

        if let Some(line) = stdout_lines.flush() {
            info!("{}", line);
            Self::emit_stdout(&mut stdout_sink, &line);
        }
        if let Some(line) = stderr_lines.flush() {
            error!("{}", line);
            Self::emit_stderr(&mut stdout_sink, &mut stderr_sink, &line);
        }

        let _ = channel.close().await;

        match exit_code {
            Some(code) => {
                info!(command = %command, exit_code = code, "Remote command completed");
                Ok(code as i32)
            }
            None => Err(HarnessError::channel(format!(
                "channel closed without exit status: {}",
                command
            ))),
        }
    }

    /// 执行远程命令并捕获标准输出与标准错误
    pub async fn execute_capture(
        &mut self,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandResult> {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let exit_code = self
            .execute(command, timeout_secs, Some(&mut stdout), Some(&mut stderr))
            .await?;
        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// 通过 SFTP 上传文件
    ///
    /// 远程父目录缺失时自顶向下逐级探测并只创建缺失的目录
    pub async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.connect().await?;

        info!(
            local = %local.display(),
            remote = %remote,
            "Uploading file to director"
        );

        let mut transfer = self.transport.open_file_transfer().await?;
        let result = Self::put_inner(transfer.as_mut(), local, remote).await;
        let close_result = transfer.close().await;
        result?;
        close_result
    }

    async fn put_inner(
        transfer: &mut dyn FileTransfer,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() && !transfer.exists(parent).await? {
                let absolute = parent.starts_with('/');
                let mut current = String::new();
                for component in parent.split('/').filter(|c| !c.is_empty()) {
                    if !current.is_empty() || absolute {
                        current.push('/');
                    }
                    current.push_str(component);
                    if !transfer.exists(&current).await? {
                        debug!(dir = %current, "Creating remote directory");
                        transfer.mkdir(&current).await?;
                    }
                }
            }
        }

        transfer.upload(local, remote).await
    }

    /// 删除远程路径（`rm -rf`，短超时）
    pub async fn remove(&mut self, remote: &str) -> Result<()> {
        let exit_code = self
            .execute(&format!("rm -rf {}", remote), REMOVE_TIMEOUT_SECS, None, None)
            .await?;
        if exit_code != 0 {
            warn!(remote = %remote, exit_code = exit_code, "rm -rf returned non-zero");
        }
        Ok(())
    }

    fn emit_stdout(stdout_sink: &mut Option<&mut String>, line: &str) {
        if let Some(sink) = stdout_sink.as_deref_mut() {
            append_line(sink, line);
        }
    }

    fn emit_stderr(
        stdout_sink: &mut Option<&mut String>,
        stderr_sink: &mut Option<&mut String>,
        line: &str,
    ) {
        if let Some(sink) = stderr_sink.as_deref_mut() {
            append_line(sink, line);
        } else if let Some(sink) = stdout_sink.as_deref_mut() {
            append_line(sink, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// 脚本化通道步骤
    enum Step {
        Emit(ChannelEvent),
        Delay(Duration),
    }

    struct FakeChannel {
        steps: VecDeque<Step>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ExecChannel for FakeChannel {
        async fn recv(&mut self) -> Result<Option<ChannelEvent>> {
            loop {
                let delay = match self.steps.front() {
                    Some(Step::Delay(d)) => Some(*d),
                    Some(Step::Emit(_)) => None,
                    None => return Ok(None),
                };
                match delay {
                    Some(d) => {
                        // 睡眠完成后才移除该步骤，轮询取消时延迟保留在队列里
                        tokio::time::sleep(d).await;
                        self.steps.pop_front();
                    }
                    None => match self.steps.pop_front() {
                        Some(Step::Emit(event)) => return Ok(Some(event)),
                        _ => return Ok(None),
                    },
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct TransferState {
        existing: HashSet<String>,
        mkdirs: Vec<String>,
        uploads: Vec<(PathBuf, String)>,
    }

    struct FakeFileTransfer {
        state: Arc<Mutex<TransferState>>,
    }

    #[async_trait]
    impl FileTransfer for FakeFileTransfer {
        async fn exists(&mut self, path: &str) -> Result<bool> {
            Ok(self.state.lock().unwrap().existing.contains(path))
        }

        async fn mkdir(&mut self, path: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.existing.insert(path.to_string());
            state.mkdirs.push(path.to_string());
            Ok(())
        }

        async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .uploads
                .push((local.to_path_buf(), remote.to_string()));
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        connected: bool,
        connects: Arc<Mutex<usize>>,
        exec_commands: Arc<Mutex<Vec<String>>>,
        scripts: VecDeque<Vec<Step>>,
        channel_closed: Arc<Mutex<bool>>,
        transfer_state: Arc<Mutex<TransferState>>,
    }

    impl FakeTransport {
        fn with_script(steps: Vec<Step>) -> Self {
            let mut transport = Self::default();
            transport.scripts.push_back(steps);
            transport
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<()> {
            *self.connects.lock().unwrap() += 1;
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>> {
            self.exec_commands.lock().unwrap().push(command.to_string());
            let steps = self.scripts.pop_front().unwrap_or_default();
            Ok(Box::new(FakeChannel {
                steps: steps.into(),
                closed: self.channel_closed.clone(),
            }))
        }

        async fn open_file_transfer(&mut self) -> Result<Box<dyn FileTransfer>> {
            Ok(Box::new(FakeFileTransfer {
                state: self.transfer_state.clone(),
            }))
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
    }

    fn runner_with(transport: FakeTransport) -> RemoteCommandRunner {
        RemoteCommandRunner::with_transport(Box::new(transport), "test@director:22")
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_lines_in_order() {
        let transport = FakeTransport::with_script(vec![
            Step::Emit(ChannelEvent::Stdout(b"a\n".to_vec())),
            Step::Delay(Duration::from_millis(100)),
            Step::Emit(ChannelEvent::Stdout(b"b\nc".to_vec())),
            Step::Emit(ChannelEvent::Exit(0)),
        ]);
        let mut runner = runner_with(transport);

        let mut captured = String::new();
        let exit_code = runner
            .execute("printf 'a\\nb\\nc'", 5, Some(&mut captured), None)
            .await
            .unwrap();

        assert_eq!(exit_code, 0);
        assert_eq!(captured, "a\nb\nc");
    }

    #[tokio::test]
    async fn test_line_split_across_data_chunks() {
        let transport = FakeTransport::with_script(vec![
            Step::Emit(ChannelEvent::Stdout(b"hel".to_vec())),
            Step::Emit(ChannelEvent::Stdout(b"lo world\n".to_vec())),
            Step::Emit(ChannelEvent::Exit(0)),
        ]);
        let mut runner = runner_with(transport);

        let mut captured = String::new();
        runner
            .execute("echo hello world", 5, Some(&mut captured), None)
            .await
            .unwrap();

        assert_eq!(captured, "hello world");
    }

    #[tokio::test]
    async fn test_stderr_merges_into_stdout_sink_by_default() {
        let transport = FakeTransport::with_script(vec![
            Step::Emit(ChannelEvent::Stdout(b"out\n".to_vec())),
            Step::Emit(ChannelEvent::Stderr(b"err\n".to_vec())),
            Step::Emit(ChannelEvent::Exit(0)),
        ]);
        let mut runner = runner_with(transport);

        let mut captured = String::new();
        runner
            .execute("cmd", 5, Some(&mut captured), None)
            .await
            .unwrap();

        assert_eq!(captured, "out\nerr");
    }

    #[tokio::test]
    async fn test_separate_stderr_sink() {
        let transport = FakeTransport::with_script(vec![
            Step::Emit(ChannelEvent::Stdout(b"out\n".to_vec())),
            Step::Emit(ChannelEvent::Stderr(b"err\n".to_vec())),
            Step::Emit(ChannelEvent::Exit(0)),
        ]);
        let mut runner = runner_with(transport);

        let mut stdout = String::new();
        let mut stderr = String::new();
        runner
            .execute("cmd", 5, Some(&mut stdout), Some(&mut stderr))
            .await
            .unwrap();

        assert_eq!(stdout, "out");
        assert_eq!(stderr, "err");
    }

    #[tokio::test]
    async fn test_exit_code_passthrough() {
        let transport =
            FakeTransport::with_script(vec![Step::Emit(ChannelEvent::Exit(3))]);
        let mut runner = runner_with(transport);

        let exit_code = runner.execute("false", 5, None, None).await.unwrap();
        assert_eq!(exit_code, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_raised_within_poll_interval() {
        // 通道保持打开 10 秒，超时设为 1 秒
        let transport = FakeTransport::with_script(vec![
            Step::Delay(Duration::from_secs(10)),
            Step::Emit(ChannelEvent::Exit(0)),
        ]);
        let channel_closed = transport.channel_closed.clone();
        let mut runner = runner_with(transport);

        let started = Instant::now();
        let err = runner
            .execute("sleep 10", 1, None, None)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(1600));
        assert!(*channel_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected_before_channel_open() {
        let transport = FakeTransport::default();
        let connects = transport.connects.clone();
        let exec_commands = transport.exec_commands.clone();
        let mut runner = runner_with(transport);

        let err = runner.execute("echo hi", 0, None, None).await.unwrap_err();

        assert!(matches!(err, HarnessError::InvalidInvocation(_)));
        assert_eq!(*connects.lock().unwrap(), 0);
        assert!(exec_commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let transport = FakeTransport::default();
        let exec_commands = transport.exec_commands.clone();
        let mut runner = runner_with(transport);

        let err = runner.execute("   ", 5, None, None).await.unwrap_err();

        assert!(matches!(err, HarnessError::InvalidInvocation(_)));
        assert!(exec_commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconnects_after_disconnect() {
        let mut transport = FakeTransport::default();
        transport
            .scripts
            .push_back(vec![Step::Emit(ChannelEvent::Exit(0))]);
        let connects = transport.connects.clone();
        let mut runner = runner_with(transport);

        runner.connect().await.unwrap();
        runner.disconnect().await.unwrap();
        let exit_code = runner.execute("echo hi", 5, None, None).await.unwrap();

        assert_eq!(exit_code, 0);
        assert_eq!(*connects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = FakeTransport::default();
        let connects = transport.connects.clone();
        let mut runner = runner_with(transport);

        runner.connect().await.unwrap();
        runner.connect().await.unwrap();

        assert_eq!(*connects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_channel_closed_without_exit_status() {
        let transport = FakeTransport::with_script(vec![Step::Emit(ChannelEvent::Stdout(
            b"partial\n".to_vec(),
        ))]);
        let mut runner = runner_with(transport);

        let err = runner.execute("cmd", 5, None, None).await.unwrap_err();
        assert!(matches!(err, HarnessError::Channel(_)));
    }

    #[tokio::test]
    async fn test_put_creates_only_missing_directories() {
        let transport = FakeTransport::default();
        let state = transport.transfer_state.clone();
        state.lock().unwrap().existing.insert("/var".to_string());
        let mut runner = runner_with(transport);

        runner
            .put(Path::new("/tmp/local.csar"), "/var/tmp/stage/pkg.csar")
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.mkdirs, vec!["/var/tmp", "/var/tmp/stage"]);
        assert_eq!(
            state.uploads,
            vec![(
                PathBuf::from("/tmp/local.csar"),
                "/var/tmp/stage/pkg.csar".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_put_skips_mkdir_when_parent_exists() {
        let transport = FakeTransport::default();
        let state = transport.transfer_state.clone();
        state
            .lock()
            .unwrap()
            .existing
            .insert("/var/tmp".to_string());
        let mut runner = runner_with(transport);

        runner
            .put(Path::new("/tmp/values.yaml"), "/var/tmp/values.yaml")
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert!(state.mkdirs.is_empty());
        assert_eq!(state.uploads.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_issues_rm_rf() {
        let transport = FakeTransport::with_script(vec![Step::Emit(ChannelEvent::Exit(0))]);
        let exec_commands = transport.exec_commands.clone();
        let mut runner = runner_with(transport);

        runner.remove("/var/tmp/sdk-testware").await.unwrap();

        assert_eq!(
            *exec_commands.lock().unwrap(),
            vec!["rm -rf /var/tmp/sdk-testware"]
        );
    }

    #[tokio::test]
    async fn test_default_timeout_taken_from_config() {
        let config = SshConfig::with_password(
            "director".to_string(),
            "eccd".to_string(),
            "pass".to_string(),
        )
        .with_command_timeout(600);

        let runner = RemoteCommandRunner::new(config);
        assert_eq!(runner.default_timeout_secs(), 600);
    }

    #[tokio::test]
    async fn test_execute_capture() {
        let transport = FakeTransport::with_script(vec![
            Step::Emit(ChannelEvent::Stdout(b"stdout line\n".to_vec())),
            Step::Emit(ChannelEvent::Stderr(b"stderr line\n".to_vec())),
            Step::Emit(ChannelEvent::Exit(2)),
        ]);
        let mut runner = runner_with(transport);

        let result = runner.execute_capture("cmd", 5).await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(!result.is_success());
        assert_eq!(result.stdout, "stdout line");
        assert_eq!(result.stderr, "stderr line");
    }
}
