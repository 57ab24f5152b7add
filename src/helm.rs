//! helm 执行器
//! 在导演节点上检查、安装与渲染集成 chart

use std::path::Path;

use tracing::{error, info};

use crate::config::HelmConfig;
use crate::error::{HarnessError, Result};
use crate::ssh::RemoteCommandRunner;

/// 发布状态检查的超时（秒）
const STATUS_TIMEOUT_SECS: u64 = 5;

/// 远程渲染模板的超时（秒）
const TEMPLATE_TIMEOUT_SECS: u64 = 600;

/// helm 执行器
pub struct HelmExecutor<'a> {
    config: &'a HelmConfig,
    namespace: String,
    repository_url: String,
}

impl<'a> HelmExecutor<'a> {
    pub fn new(
        config: &'a HelmConfig,
        namespace: impl Into<String>,
        repository_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            namespace: namespace.into(),
            repository_url: repository_url.into(),
        }
    }

    /// 命名空间里是否已有同名发布
    pub async fn release_exists(
        &self,
        runner: &mut RemoteCommandRunner,
        release: &str,
    ) -> Result<bool> {
        let command = release_check_command(&self.namespace, release);
        let exit_code = runner
            .execute(&command, STATUS_TIMEOUT_SECS, None, None)
            .await?;
        Ok(exit_code == 0)
    }

    /// 安装（或升级）chart 列表
    ///
    /// 发布名取 chart 文件名去掉扩展名。同名发布已存在时视为装置
    /// 环境残留并失败，除非配置跳过重复检查。
    pub async fn upgrade_install(
        &self,
        runner: &mut RemoteCommandRunner,
        charts: &[String],
        values: &str,
        skip_duplicate_check: bool,
    ) -> Result<()> {
        for chart in charts {
            let release = release_name(chart);

            if self.release_exists(runner, &release).await? {
                let msg = format!(
                    "a release called {} already exists in namespace {}",
                    release, self.namespace
                );
                if skip_duplicate_check {
                    info!("{}", msg);
                } else {
                    error!("{}", msg);
                    return Err(HarnessError::verification(msg));
                }
            }

            info!(chart = %chart, release = %release, "Installing chart");
            let command = upgrade_install_command(
                self.config,
                &self.namespace,
                &release,
                chart,
                values,
                &self.repository_url,
            );
            let exit_code = runner
                .execute(&command, self.config.upgrade_timeout_secs, None, None)
                .await?;
            if exit_code != 0 {
                return Err(HarnessError::verification(format!(
                    "chart installation failed (exit {}): {}",
                    exit_code, chart
                )));
            }
        }
        Ok(())
    }

    /// 在导演节点上渲染 chart，返回清单文本
    pub async fn template_remote(
        &self,
        runner: &mut RemoteCommandRunner,
        helm_package: &str,
    ) -> Result<String> {
        let mut stdout = String::new();
        let exit_code = runner
            .execute(
                &format!("helm template {}", helm_package),
                TEMPLATE_TIMEOUT_SECS,
                Some(&mut stdout),
                None,
            )
            .await?;
        if exit_code != 0 {
            return Err(HarnessError::verification(format!(
                "helm template failed (exit {}): {}",
                exit_code, helm_package
            )));
        }
        Ok(stdout)
    }
}

/// 发布名：chart 文件名去掉扩展名
pub fn release_name(chart_path: &str) -> String {
    Path::new(chart_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(chart_path)
        .to_string()
}

pub fn release_check_command(namespace: &str, release: &str) -> String {
    format!("helm -n {} status {}", namespace, release)
}

/// 构造 upgrade --install 命令
///
/// 仓库 URL 按首个 `/` 拆成 registry 主机与 repoPath 两个 --set 覆盖
pub fn upgrade_install_command(
    config: &HelmConfig,
    namespace: &str,
    release: &str,
    chart_path: &str,
    values: &str,
    repository_url: &str,
) -> String {
    let mut command = format!(
        "helm upgrade --install {} {} -f {} -n {} --debug --wait --timeout 10m",
        release, chart_path, values, namespace
    );
    if config.atomic {
        command.push_str(" --atomic");
    }
    if config.dry_run {
        command.push_str(" --dry-run");
    }
    for set_value in &config.extra_values {
        command.push_str(" --set ");
        command.push_str(set_value);
    }
    match repository_url.split_once('/') {
        Some((registry, repo_path)) => {
            command.push_str(" --set global.registry.url=");
            command.push_str(registry);
            command.push_str(" --set imageCredentials.repoPath=");
            command.push_str(repo_path);
        }
        None => {
            command.push_str(" --set global.registry.url=");
            command.push_str(repository_url);
        }
    }
    command
}
