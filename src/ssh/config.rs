//! SSH 连接配置模型
//!
//! 面向导演节点（director）的连接参数，可由装置配置构造

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 主机密钥验证策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：首次连接时接受新密钥，之后验证
    #[default]
    Accept,
    /// 禁用验证（不安全，必须在配置中显式开启）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// SSH 认证方式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuth {
    /// 密码认证
    Password { password: String },
    /// 私钥认证
    Key {
        /// 私钥文件路径
        key_path: PathBuf,
        /// 私钥口令（如果有）
        passphrase: Option<String>,
    },
}

/// SSH 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// 主机地址
    pub host: String,

    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// 用户名
    pub username: String,

    /// 认证方式
    pub auth: SshAuth,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// 握手超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub handshake_timeout_secs: u64,

    /// 命令执行默认超时（秒）
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// 主机密钥验证策略
    #[serde(default)]
    pub host_key_verification: HostKeyVerification,

    /// 已知的主机密钥（host:port -> 指纹）
    #[serde(default)]
    pub known_hosts: Option<HashMap<String, String>>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    300
}

impl SshConfig {
    /// 创建新的 SSH 配置
    pub fn new(host: String, username: String, auth: SshAuth) -> Self {
        Self {
            host,
            port: default_ssh_port(),
            username,
            auth,
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            host_key_verification: HostKeyVerification::default(),
            known_hosts: None,
        }
    }

    /// 创建使用密码认证的配置
    pub fn with_password(host: String, username: String, password: String) -> Self {
        Self::new(host, username, SshAuth::Password { password })
    }

    /// 创建使用私钥文件认证的配置
    pub fn with_key(
        host: String,
        username: String,
        key_path: PathBuf,
        passphrase: Option<String>,
    ) -> Self {
        Self::new(
            host,
            username,
            SshAuth::Key {
                key_path,
                passphrase,
            },
        )
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout_secs = timeout_secs;
        self
    }

    /// 设置命令超时
    pub fn with_command_timeout(mut self, timeout_secs: u64) -> Self {
        self.command_timeout_secs = timeout_secs;
        self
    }

    /// 设置主机密钥验证策略
    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_verification_default() {
        assert_eq!(HostKeyVerification::default(), HostKeyVerification::Accept);
    }

    #[test]
    fn test_host_key_verification_from_str() {
        assert_eq!(
            "strict".parse::<HostKeyVerification>().unwrap(),
            HostKeyVerification::Strict
        );
        assert_eq!(
            "accept".parse::<HostKeyVerification>().unwrap(),
            HostKeyVerification::Accept
        );
        assert_eq!(
            "disabled".parse::<HostKeyVerification>().unwrap(),
            HostKeyVerification::Disabled
        );
        assert_eq!(
            "none".parse::<HostKeyVerification>().unwrap(),
            HostKeyVerification::Disabled
        );
        assert!("paranoid".parse::<HostKeyVerification>().is_err());
    }

    #[test]
    fn test_ssh_config_new() {
        let config = SshConfig::new(
            "director.example.com".to_string(),
            "eccd".to_string(),
            SshAuth::Password {
                password: "pass".to_string(),
            },
        );

        assert_eq!(config.host, "director.example.com");
        assert_eq!(config.port, 22);
        assert_eq!(config.username, "eccd");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.command_timeout_secs, 300);
    }

    #[test]
    fn test_ssh_config_with_key() {
        let config = SshConfig::with_key(
            "director".to_string(),
            "eccd".to_string(),
            PathBuf::from("/home/eccd/.ssh/id_rsa"),
            Some("passphrase".to_string()),
        );

        match &config.auth {
            SshAuth::Key {
                key_path,
                passphrase,
            } => {
                assert_eq!(key_path, &PathBuf::from("/home/eccd/.ssh/id_rsa"));
                assert_eq!(passphrase.as_deref(), Some("passphrase"));
            }
            _ => panic!("Expected Key auth"),
        }
    }

    #[test]
    fn test_ssh_config_builder() {
        let config =
            SshConfig::with_password("host".to_string(), "user".to_string(), "pass".to_string())
                .with_port(2222)
                .with_connect_timeout(30)
                .with_command_timeout(600)
                .with_host_key_verification(HostKeyVerification::Strict);

        assert_eq!(config.port, 2222);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.command_timeout_secs, 600);
        assert_eq!(config.host_key_verification, HostKeyVerification::Strict);
    }

    #[test]
    fn test_ssh_config_target() {
        let config = SshConfig::with_password(
            "director".to_string(),
            "eccd".to_string(),
            "pass".to_string(),
        );
        assert_eq!(config.target(), "eccd@director:22");
        assert_eq!(config.with_port(2222).target(), "eccd@director:2222");
    }

    #[test]
    fn test_ssh_config_serde_defaults() {
        let json = r#"{"host":"h","username":"u","auth":{"password":{"password":"p"}}}"#;
        let config: SshConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.host_key_verification, HostKeyVerification::Accept);
        assert!(config.known_hosts.is_none());
    }
}
