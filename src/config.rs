//! 配置系统
//! 从环境变量加载全部配置，启动时构造一次，之后只读传递

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::builder::SdkKind;
use crate::ssh::{HostKeyVerification, SshAuth, SshConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 导演节点（director）连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorConfig {
    /// 主机地址
    pub host: String,
    /// SSH 端口
    pub port: u16,
    /// SSH 用户名
    pub username: String,
    /// SSH 密码（使用 Secret 包装，防止日志泄露）
    #[serde(default)]
    pub password: Option<Secret<String>>,
    /// SSH 私钥文件路径（优先于密码）
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// 私钥口令（使用 Secret 包装）
    #[serde(default)]
    pub key_passphrase: Option<Secret<String>>,
    /// 目标 Kubernetes 命名空间
    pub namespace: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 命令执行默认超时（秒）
    pub command_timeout_secs: u64,
    /// 主机密钥验证策略（strict/accept/disabled），禁用必须显式配置
    pub host_key_verification: String,
}

impl DirectorConfig {
    /// 构造 SSH 连接配置
    pub fn to_ssh_config(&self) -> Result<SshConfig, ConfigError> {
        let auth = if let Some(key_path) = &self.private_key_path {
            SshAuth::Key {
                key_path: key_path.clone(),
                passphrase: self
                    .key_passphrase
                    .as_ref()
                    .map(|p| p.expose_secret().clone()),
            }
        } else if let Some(password) = &self.password {
            SshAuth::Password {
                password: password.expose_secret().clone(),
            }
        } else {
            return Err(ConfigError::Message(
                "director requires either private_key_path or password".to_string(),
            ));
        };

        let verification = self
            .host_key_verification
            .parse::<HostKeyVerification>()
            .map_err(ConfigError::Message)?;

        Ok(
            SshConfig::new(self.host.clone(), self.username.clone(), auth)
                .with_port(self.port)
                .with_connect_timeout(self.connect_timeout_secs)
                .with_command_timeout(self.command_timeout_secs)
                .with_host_key_verification(verification),
        )
    }
}

/// SDK 构建配置
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// sdkBuildManager 交付物的来源（本地路径或 URL）
    pub build_manager_url: String,
    /// 集成安装 values 文件的来源（本地路径或 URL）
    pub integration_values: String,
    /// 镜像仓库 URL（主机/路径）
    pub repository_url: String,
    /// 产品集版本
    pub product_set_version: String,
    /// 本地构建临时目录
    pub temp_dir: PathBuf,
    /// 导演节点上的暂存目录
    pub remote_stage_dir: String,
    /// 是否使用集群本地镜像仓库
    pub use_local_registry: bool,
    /// 是否生成轻量 CSAR
    pub csar_light: bool,
    /// 要构建的 SDK 类型（逗号分隔：fm,pm）
    pub sdk_types: String,
    /// 原型工件生成脚本路径（未设置时不执行 maven 阶段）
    #[serde(default)]
    pub maven_script: Option<PathBuf>,
}

impl BuildConfig {
    pub fn sdk_kinds(&self) -> Result<Vec<SdkKind>, ConfigError> {
        self.sdk_types
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| SdkKind::from_str(s).map_err(ConfigError::Message))
            .collect()
    }
}

/// helm 行为配置
#[derive(Debug, Clone, Deserialize)]
pub struct HelmConfig {
    /// 是否追加 --atomic
    pub atomic: bool,
    /// 是否追加 --dry-run
    pub dry_run: bool,
    /// upgrade --install 的执行超时（秒）
    pub upgrade_timeout_secs: u64,
    /// 额外的 --set 键值对（key=value）
    #[serde(default)]
    pub extra_values: Vec<String>,
}

/// 可跳过的执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipPhase {
    All,
    Maven,
    BuildLoadImages,
    LoadCsarImages,
    RebuildCsar,
    Verify,
    Install,
    SdkExtract,
    CsarUpload,
    DuplicateChart,
}

impl FromStr for SkipPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "maven" => Ok(Self::Maven),
            "build-load-images" => Ok(Self::BuildLoadImages),
            "load-csar-images" => Ok(Self::LoadCsarImages),
            "rebuild-csar" => Ok(Self::RebuildCsar),
            "verify" => Ok(Self::Verify),
            "install" => Ok(Self::Install),
            "sdk-extract" => Ok(Self::SdkExtract),
            "csar-upload" => Ok(Self::CsarUpload),
            "dup-charts" => Ok(Self::DuplicateChart),
            _ => Err(format!("Unknown skip phase: {}", s)),
        }
    }
}

/// 跳过阶段配置（逗号分隔列表）
#[derive(Debug, Clone, Deserialize)]
pub struct SkipConfig {
    #[serde(default)]
    pub phases: String,
}

impl SkipConfig {
    fn parsed(&self) -> Result<HashSet<SkipPhase>, String> {
        self.phases
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SkipPhase::from_str)
            .collect()
    }

    /// 阶段是否被跳过（`all` 覆盖除重复检查外的所有阶段）
    pub fn is_set(&self, phase: SkipPhase) -> bool {
        let Ok(set) = self.parsed() else { return false };
        set.contains(&phase) || (phase != SkipPhase::DuplicateChart && set.contains(&SkipPhase::All))
    }

    /// 只有所有构建阶段都未跳过时才允许清理构建目录
    pub fn can_clean_build_dir(&self) -> bool {
        !self.is_set(SkipPhase::BuildLoadImages)
            && !self.is_set(SkipPhase::RebuildCsar)
            && !self.is_set(SkipPhase::LoadCsarImages)
            && !self.is_set(SkipPhase::SdkExtract)
    }
}

/// 装置配置（不可变，启动时构造一次）
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    pub logging: LoggingConfig,
    pub director: DirectorConfig,
    pub build: BuildConfig,
    pub helm: HelmConfig,
    pub skip: SkipConfig,
}

impl HarnessConfig {
    /// 从环境变量加载配置（前缀为 SDK_）
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        settings = settings
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // 导演节点默认配置
            .set_default("director.port", 22)?
            .set_default("director.namespace", "enm")?
            .set_default("director.connect_timeout_secs", 10)?
            .set_default("director.command_timeout_secs", 300)?
            .set_default("director.host_key_verification", "accept")?
            // 构建默认配置
            .set_default(
                "build.repository_url",
                "armdocker.rnd.ericsson.se/proj_oss_releases/enm",
            )?
            .set_default("build.temp_dir", "/var/tmp/sdk_build_dir")?
            .set_default("build.remote_stage_dir", "/var/tmp/sdk-testware")?
            .set_default("build.use_local_registry", false)?
            .set_default("build.csar_light", false)?
            .set_default("build.sdk_types", "fm")?
            // helm 默认配置
            .set_default("helm.atomic", true)?
            .set_default("helm.dry_run", false)?
            .set_default("helm.upgrade_timeout_secs", 660)?
            // 跳过阶段默认配置
            .set_default("skip.phases", "")?;

        settings = settings.add_source(
            Environment::with_prefix("SDK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("helm.extra_values"),
        );

        let config: HarnessConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.director.host.is_empty() {
            return Err(ConfigError::Message("director.host must be set".to_string()));
        }
        if self.director.username.is_empty() {
            return Err(ConfigError::Message(
                "director.username must be set".to_string(),
            ));
        }
        if self.director.password.is_none() && self.director.private_key_path.is_none() {
            return Err(ConfigError::Message(
                "director requires either private_key_path or password".to_string(),
            ));
        }
        self.director
            .host_key_verification
            .parse::<HostKeyVerification>()
            .map_err(ConfigError::Message)?;

        if self.helm.upgrade_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "helm.upgrade_timeout_secs must be positive".to_string(),
            ));
        }

        self.skip.parsed().map_err(ConfigError::Message)?;
        self.build.sdk_kinds()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip(phases: &str) -> SkipConfig {
        SkipConfig {
            phases: phases.to_string(),
        }
    }

    #[test]
    fn test_skip_phase_from_str() {
        assert_eq!(
            "build-load-images".parse::<SkipPhase>().unwrap(),
            SkipPhase::BuildLoadImages
        );
        assert_eq!("ALL".parse::<SkipPhase>().unwrap(), SkipPhase::All);
        assert!("unknown".parse::<SkipPhase>().is_err());
    }

    #[test]
    fn test_skip_all_covers_phases() {
        let config = skip("all");
        assert!(config.is_set(SkipPhase::Install));
        assert!(config.is_set(SkipPhase::Verify));
        // 重复发布检查不受 all 影响
        assert!(!config.is_set(SkipPhase::DuplicateChart));
    }

    #[test]
    fn test_skip_list_parsing() {
        let config = skip("install, verify");
        assert!(config.is_set(SkipPhase::Install));
        assert!(config.is_set(SkipPhase::Verify));
        assert!(!config.is_set(SkipPhase::RebuildCsar));
    }

    #[test]
    fn test_can_clean_build_dir() {
        assert!(skip("").can_clean_build_dir());
        assert!(skip("verify").can_clean_build_dir());
        assert!(!skip("rebuild-csar").can_clean_build_dir());
        assert!(!skip("all").can_clean_build_dir());
    }

    #[test]
    fn test_director_to_ssh_config_password() {
        let director = DirectorConfig {
            host: "director".to_string(),
            port: 22,
            username: "eccd".to_string(),
            password: Some(Secret::new("pass".to_string())),
            private_key_path: None,
            key_passphrase: None,
            namespace: "enm".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            host_key_verification: "accept".to_string(),
        };

        let ssh = director.to_ssh_config().unwrap();
        assert_eq!(ssh.target(), "eccd@director:22");
        assert!(matches!(ssh.auth, SshAuth::Password { .. }));
        assert_eq!(ssh.host_key_verification, HostKeyVerification::Accept);
    }

    #[test]
    fn test_director_key_takes_precedence() {
        let director = DirectorConfig {
            host: "director".to_string(),
            port: 22,
            username: "eccd".to_string(),
            password: Some(Secret::new("pass".to_string())),
            private_key_path: Some(PathBuf::from("/keys/id_rsa")),
            key_passphrase: None,
            namespace: "enm".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            host_key_verification: "disabled".to_string(),
        };

        let ssh = director.to_ssh_config().unwrap();
        assert!(matches!(ssh.auth, SshAuth::Key { .. }));
        assert_eq!(ssh.host_key_verification, HostKeyVerification::Disabled);
    }

    #[test]
    fn test_director_without_credentials_rejected() {
        let director = DirectorConfig {
            host: "director".to_string(),
            port: 22,
            username: "eccd".to_string(),
            password: None,
            private_key_path: None,
            key_passphrase: None,
            namespace: "enm".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            host_key_verification: "accept".to_string(),
        };

        assert!(director.to_ssh_config().is_err());
    }

    #[test]
    fn test_sdk_kinds_parsing() {
        let build = BuildConfig {
            build_manager_url: "u".to_string(),
            integration_values: "v".to_string(),
            repository_url: "r".to_string(),
            product_set_version: "1.0".to_string(),
            temp_dir: PathBuf::from("/tmp"),
            remote_stage_dir: "/var/tmp/sdk-testware".to_string(),
            use_local_registry: false,
            csar_light: false,
            sdk_types: "fm, pm".to_string(),
            maven_script: None,
        };

        assert_eq!(build.sdk_kinds().unwrap(), vec![SdkKind::Fm, SdkKind::Pm]);
    }
}
