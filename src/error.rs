//! 统一错误模型
//! 定义测试装置的所有错误类型
//!
//! 远程命令执行、文件传输、归档、构建与校验共享同一个错误枚举

/// 测试装置错误类型
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("SSH connection error: {0}")]
    Connection(String),

    #[error("SSH authentication failed: {0}")]
    Authentication(String),

    #[error("Command timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("SSH channel error: {0}")]
    Channel(String),

    #[error("File transfer error: {0}")]
    Transfer(String),

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Local process error: {0}")]
    Process(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    // 便捷方法
    pub fn connection(msg: impl Into<String>) -> Self {
        HarnessError::Connection(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        HarnessError::Channel(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        HarnessError::Transfer(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        HarnessError::InvalidInvocation(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        HarnessError::Process(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        HarnessError::Archive(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        HarnessError::Verification(msg.into())
    }

    /// 是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(e: serde_yaml::Error) -> Self {
        HarnessError::Yaml(e.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Json(e.to_string())
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(e: config::ConfigError) -> Self {
        HarnessError::Config(e.to_string())
    }
}

/// 装置统一 Result 类型
pub type Result<T> = std::result::Result<T, HarnessError>;
