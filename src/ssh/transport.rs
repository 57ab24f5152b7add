//! SSH 传输层
//! 会话、执行通道与文件传输的抽象接口及其 russh 实现
//!
//! 命令运行器只依赖这里的 trait，生产环境使用 `RusshTransport`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use russh_keys::load_secret_key;
use russh_keys::PublicKeyBase64;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use sha2::Digest;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, Result};
use crate::ssh::config::{HostKeyVerification, SshAuth, SshConfig};

/// 执行通道上的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 标准输出数据块
    Stdout(Vec<u8>),
    /// 标准错误数据块
    Stderr(Vec<u8>),
    /// 远程进程退出码
    Exit(u32),
}

/// 命令执行通道
#[async_trait]
pub trait ExecChannel: Send {
    /// 接收下一个通道事件；通道关闭后返回 `None`
    async fn recv(&mut self) -> Result<Option<ChannelEvent>>;

    /// 关闭通道
    async fn close(&mut self) -> Result<()>;
}

/// 文件传输会话
#[async_trait]
pub trait FileTransfer: Send {
    /// 远程路径是否存在（"不存在"不是错误，其他失败是）
    async fn exists(&mut self, path: &str) -> Result<bool>;

    /// 创建远程目录（父目录必须已存在）
    async fn mkdir(&mut self, path: &str) -> Result<()>;

    /// 上传本地文件到远程路径
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// 结束传输会话
    async fn close(&mut self) -> Result<()>;
}

/// SSH 传输会话
#[async_trait]
pub trait Transport: Send {
    /// 建立连接并认证（已连接时为幂等空操作由调用方保证）
    async fn connect(&mut self) -> Result<()>;

    /// 当前是否持有活动会话
    fn is_connected(&self) -> bool;

    /// 打开执行通道并启动命令
    async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>>;

    /// 打开 SFTP 传输会话
    async fn open_file_transfer(&mut self) -> Result<Box<dyn FileTransfer>>;

    /// 断开连接
    async fn disconnect(&mut self) -> Result<()>;
}

/// 基于 russh 的生产实现
pub struct RusshTransport {
    config: SshConfig,
    handle: Option<client::Handle<HostKeyHandler>>,
}

impl RusshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    fn create_handler(&self) -> HostKeyHandler {
        HostKeyHandler {
            verification_mode: self.config.host_key_verification.clone(),
            known_hosts: self.config.known_hosts.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }

    fn handle_mut(&mut self) -> Result<&mut client::Handle<HostKeyHandler>> {
        self.handle
            .as_mut()
            .ok_or_else(|| HarnessError::connection("session not established"))
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(&mut self) -> Result<()> {
        debug!(
            target_addr = %self.config.target(),
            "Establishing SSH connection"
        );

        let client_config = Arc::new(client::Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        let overall_timeout = std::cmp::min(
            self.config.connect_timeout_secs,
            self.config.handshake_timeout_secs,
        );
        let handler = self.create_handler();

        let mut handle = timeout(
            Duration::from_secs(overall_timeout),
            client::connect(
                client_config,
                (self.config.host.clone(), self.config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| {
            HarnessError::connection(format!("connection timed out: {}", self.config.target()))
        })?
        .map_err(|e| {
            error!(error = %e, "SSH connection failed");
            if e.to_string().contains("Host key") || e.to_string().contains("fingerprint") {
                HarnessError::connection(format!("host key verification failed: {}", e))
            } else {
                HarnessError::connection(format!("connection failed: {}", e))
            }
        })?;

        let auth_result = match &self.config.auth {
            SshAuth::Password { password } => {
                handle
                    .authenticate_password(self.config.username.clone(), password)
                    .await
            }
            SshAuth::Key {
                key_path,
                passphrase,
            } => {
                let key = load_secret_key(key_path, passphrase.as_deref()).map_err(|e| {
                    error!(error = %e, path = %key_path.display(), "Failed to load private key");
                    HarnessError::Authentication(format!("failed to load private key: {}", e))
                })?;

                handle
                    .authenticate_publickey(self.config.username.clone(), Arc::new(key))
                    .await
            }
        };

        if !auth_result.unwrap_or(false) {
            error!(target_addr = %self.config.target(), "SSH authentication failed");
            return Err(HarnessError::Authentication(format!(
                "authentication rejected for {}",
                self.config.target()
            )));
        }

        info!(target_addr = %self.config.target(), "SSH session established");
        self.handle = Some(handle);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>> {
        let handle = self.handle_mut()?;

        let channel = handle.channel_open_session().await.map_err(|e| {
            error!(error = %e, "Failed to open SSH channel");
            HarnessError::channel(format!("failed to open channel: {}", e))
        })?;

        channel.exec(true, command).await.map_err(|e| {
            error!(error = %e, "Failed to start remote command");
            HarnessError::channel(format!("failed to start command: {}", e))
        })?;

        Ok(Box::new(RusshExecChannel { channel }))
    }

    async fn open_file_transfer(&mut self) -> Result<Box<dyn FileTransfer>> {
        let handle = self.handle_mut()?;

        let channel = handle.channel_open_session().await.map_err(|e| {
            HarnessError::transfer(format!("failed to open SFTP channel: {}", e))
        })?;
        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            HarnessError::transfer(format!("failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| HarnessError::transfer(format!("failed to start SFTP session: {}", e)))?;

        Ok(Box::new(RusshFileTransfer { sftp }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            debug!(target_addr = %self.config.target(), "SSH session closed");
        }
        Ok(())
    }
}

/// russh 执行通道
struct RusshExecChannel {
    channel: russh::Channel<client::Msg>,
}

#[async_trait]
impl ExecChannel for RusshExecChannel {
    async fn recv(&mut self) -> Result<Option<ChannelEvent>> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { ref data }) => {
                    return Ok(Some(ChannelEvent::Stdout(data.to_vec())));
                }
                Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                    return Ok(Some(ChannelEvent::Stderr(data.to_vec())));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Ok(Some(ChannelEvent::Exit(exit_status)));
                }
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.channel.close().await;
        Ok(())
    }
}

/// russh-sftp 文件传输会话
struct RusshFileTransfer {
    sftp: SftpSession,
}

fn is_no_such_file(err: &russh_sftp::client::error::Error) -> bool {
    matches!(
        err,
        russh_sftp::client::error::Error::Status(status)
            if status.status_code == StatusCode::NoSuchFile
    )
}

#[async_trait]
impl FileTransfer for RusshFileTransfer {
    async fn exists(&mut self, path: &str) -> Result<bool> {
        match self.sftp.metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if is_no_such_file(&e) => Ok(false),
            Err(e) => Err(HarnessError::transfer(format!(
                "failed to stat {}: {}",
                path, e
            ))),
        }
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| HarnessError::transfer(format!("failed to create {}: {}", path, e)))
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await.map_err(|e| {
            HarnessError::transfer(format!("failed to read {}: {}", local.display(), e))
        })?;

        let mut file = self.sftp.create(remote).await.map_err(|e| {
            HarnessError::transfer(format!("failed to create remote {}: {}", remote, e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            HarnessError::transfer(format!("failed to write {}: {}", remote, e))
        })?;
        file.shutdown().await.map_err(|e| {
            HarnessError::transfer(format!("failed to finalize {}: {}", remote, e))
        })?;

        debug!(
            local = %local.display(),
            remote = %remote,
            bytes = data.len(),
            "File uploaded"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sftp
            .close()
            .await
            .map_err(|e| HarnessError::transfer(format!("failed to close SFTP session: {}", e)))
    }
}

/// SSH 客户端会话处理器：按策略验证主机密钥
struct HostKeyHandler {
    verification_mode: HostKeyVerification,
    known_hosts: Option<std::collections::HashMap<String, String>>,
    host: String,
    port: u16,
}

impl HostKeyHandler {
    fn fingerprint(server_public_key: &PublicKey) -> String {
        let key_data = server_public_key.public_key_base64();
        let mut hasher = sha2::Sha256::new();
        hasher.update(key_data.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.verification_mode {
            HostKeyVerification::Disabled => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    "Host key verification DISABLED - accepting all keys"
                );
                Ok(true)
            }
            HostKeyVerification::Accept => {
                let fingerprint = Self::fingerprint(server_public_key);
                let host_key = format!("{}:{}", self.host, self.port);

                if let Some(known_hosts) = &self.known_hosts {
                    if let Some(stored_fingerprint) = known_hosts.get(&host_key) {
                        if stored_fingerprint == &fingerprint {
                            debug!(host = %host_key, "Host key verified");
                            return Ok(true);
                        }
                        error!(
                            host = %host_key,
                            expected = %stored_fingerprint,
                            actual = %fingerprint,
                            "Host key mismatch - POSSIBLE SECURITY BREACH"
                        );
                        return Ok(false);
                    }
                }

                info!(
                    host = %host_key,
                    fingerprint = %fingerprint,
                    "First time connecting - accepting host key"
                );
                Ok(true)
            }
            HostKeyVerification::Strict => {
                let fingerprint = Self::fingerprint(server_public_key);
                let host_key = format!("{}:{}", self.host, self.port);

                if let Some(known_hosts) = &self.known_hosts {
                    if let Some(stored_fingerprint) = known_hosts.get(&host_key) {
                        if stored_fingerprint == &fingerprint {
                            debug!(host = %host_key, "Host key verified (strict mode)");
                            return Ok(true);
                        }
                        error!(
                            host = %host_key,
                            expected = %stored_fingerprint,
                            actual = %fingerprint,
                            "Host key mismatch - REJECTING CONNECTION"
                        );
                        return Ok(false);
                    }
                }

                error!(
                    host = %host_key,
                    "Unknown host in strict mode - rejecting connection"
                );
                Ok(false)
            }
        }
    }
}
