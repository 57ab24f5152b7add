//! 安装验证场景
//! 端到端流程：取交付物、构建自定义 SDK chart、重建集成 CSAR、
//! 上传导演节点安装并逐项校验部署结果

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::{info, warn};

use crate::builder::{SdkBuildManager, SdkKind};
use crate::charts::{self, ChartDependency, IntegrationBuildYaml};
use crate::config::{HarnessConfig, SkipPhase};
use crate::error::{HarnessError, Result};
use crate::fetch;
use crate::helm::HelmExecutor;
use crate::kube::{Kind, KubeClient};
use crate::maven::MavenArtifacts;
use crate::ssh::RemoteCommandRunner;
use crate::archive;

/// 远程目录列举的超时（秒）
const LIST_TIMEOUT_SECS: u64 = 5;

/// Pod 预期所处的阶段
const EXPECTED_POD_PHASE: &str = "Running";

/// 安装验证场景
pub struct InstallAndVerify {
    config: HarnessConfig,
}

impl InstallAndVerify {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    fn build_dir(&self) -> &Path {
        &self.config.build.temp_dir
    }

    fn inputs_dir(&self) -> PathBuf {
        self.build_dir().join("sdk-inputs")
    }

    fn output_dir(&self) -> PathBuf {
        self.build_dir().join("custom")
    }

    fn build_manager_script(&self) -> PathBuf {
        self.build_dir().join("scripts").join("sdkBuildManager.py")
    }

    /// 镜像加载的目标仓库前缀
    fn registry_prefix(&self) -> &str {
        if self.config.build.use_local_registry {
            "localhost:5000"
        } else {
            &self.config.build.repository_url
        }
    }

    /// 运行完整场景
    pub async fn run(&self) -> Result<()> {
        let manager = SdkBuildManager::new(
            self.build_manager_script(),
            self.build_dir(),
            self.config.build.repository_url.clone(),
            self.config.build.product_set_version.clone(),
        );

        self.tear_down(&manager)?;
        self.fetch_build_manager().await?;

        let values_file = fetch::get_external_file(
            &self.config.build.integration_values,
            self.build_dir(),
        )
        .await?;

        let sdk_kinds = self
            .config
            .build
            .sdk_kinds()
            .map_err(HarnessError::from)?;
        let sdk_charts = self.prepare_charts(&manager, &sdk_kinds).await?;
        let csar = self.rebuild_csar(&manager, &sdk_charts).await?;

        let mut runner = RemoteCommandRunner::new(self.config.director.to_ssh_config()?);
        let remote_csar = self.upload_to_director(&mut runner, &csar).await?;
        let remote_values = self.upload_to_director(&mut runner, &values_file).await?;

        self.install_integration_chart(&mut runner, &remote_csar, &remote_values)
            .await?;
        self.verify_installation(&mut runner, &remote_csar).await?;

        runner.disconnect().await?;
        info!("Install and verify scenario completed");
        Ok(())
    }

    /// 清空本地构建目录（任一构建阶段被跳过时保留现场）
    fn tear_down(&self, manager: &SdkBuildManager) -> Result<()> {
        if !self.config.skip.can_clean_build_dir() {
            info!("Skipping build directory cleanup, build phases are skipped");
            return Ok(());
        }
        manager.initialize_build_dir()
    }

    /// 取 sdk-csar-buildmanager 交付物并解压到构建目录
    async fn fetch_build_manager(&self) -> Result<()> {
        let archive_path = fetch::get_external_file(
            &self.config.build.build_manager_url,
            self.build_dir(),
        )
        .await?;
        if self.config.skip.is_set(SkipPhase::SdkExtract) {
            info!(archive = %archive_path.display(), "Skipping extraction, skip flag set");
        } else {
            archive::extract(&archive_path, self.build_dir())?;
        }
        Ok(())
    }

    /// 构建各 SDK 的自定义 chart，返回 SDK 到 chart 归档的映射
    async fn prepare_charts(
        &self,
        manager: &SdkBuildManager,
        sdk_kinds: &[SdkKind],
    ) -> Result<HashMap<SdkKind, PathBuf>> {
        let docker_tar = self.build_dir().join("docker").join("docker.tar");
        let images_txt = self.build_dir().join("docker").join("images.txt");
        let images = manager
            .load_csar_images(
                &docker_tar,
                &images_txt,
                self.registry_prefix(),
                self.config.skip.is_set(SkipPhase::LoadCsarImages),
            )
            .await?;

        charts::update_build_images(&self.inputs_dir(), &images)?;

        let mut sdk_charts = HashMap::new();
        for kind in sdk_kinds {
            let template = manager.sdk_chart_template(*kind)?;
            let inputs = self.inputs_dir().join(kind.inputs_dir());
            self.generate_maven_artifacts(*kind, &inputs).await?;
            let output = self.output_dir().join(kind.to_string());
            std::fs::create_dir_all(&output)?;

            let mut built = manager
                .build_load_images(
                    *kind,
                    &template,
                    &inputs,
                    &output,
                    self.config.skip.is_set(SkipPhase::BuildLoadImages),
                )
                .await?;
            let chart = built.remove(0);
            info!(kind = %kind, chart = %chart.display(), "Created custom chart");
            sdk_charts.insert(*kind, chart);
        }
        Ok(sdk_charts)
    }

    /// 生成示例模型 RPM 并拷入该 SDK 的 chart 构建输入
    ///
    /// 未配置生成脚本时该阶段不执行。
    async fn generate_maven_artifacts(&self, kind: SdkKind, inputs: &Path) -> Result<()> {
        let Some(script) = &self.config.build.maven_script else {
            return Ok(());
        };
        let maven = MavenArtifacts::new(script);
        let maven_dir = self.build_dir().join("maven");
        maven
            .generate(
                kind,
                &maven_dir,
                self.config.skip.is_set(SkipPhase::Maven),
            )
            .await?;
        let packages = maven.collect_packages(&maven_dir, kind)?;
        maven.copy_into_inputs(&packages, inputs)
    }

    /// 把自定义 chart 写入集成构建描述并重建集成 CSAR
    async fn rebuild_csar(
        &self,
        manager: &SdkBuildManager,
        sdk_charts: &HashMap<SdkKind, PathBuf>,
    ) -> Result<PathBuf> {
        let integration_yaml = self.inputs_dir().join("sdk").join("integration.yaml");

        let mut dependencies: Vec<ChartDependency> = sdk_charts
            .iter()
            .map(|(kind, chart)| chart_dependency(*kind, chart))
            .collect::<Result<_>>()?;
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));

        let mut build_yaml = IntegrationBuildYaml::load(&integration_yaml)?;
        build_yaml.set_dependencies(&dependencies)?;
        build_yaml.save()?;

        manager
            .rebuild_csar(
                &integration_yaml,
                &self.output_dir(),
                self.config.build.csar_light,
                self.config.skip.is_set(SkipPhase::RebuildCsar),
            )
            .await
    }

    /// 上传文件到导演节点暂存目录，返回远端路径
    async fn upload_to_director(
        &self,
        runner: &mut RemoteCommandRunner,
        local: &Path,
    ) -> Result<String> {
        let remote = remote_path(&self.config.build.remote_stage_dir, local)?;
        if self.config.skip.is_set(SkipPhase::CsarUpload) {
            info!(remote = %remote, "Skipping upload, skip flag set");
        } else {
            runner.put(local, &remote).await?;
        }
        Ok(remote)
    }

    /// 在导演节点上解包 CSAR 并安装集成 chart
    async fn install_integration_chart(
        &self,
        runner: &mut RemoteCommandRunner,
        remote_csar: &str,
        remote_values: &str,
    ) -> Result<()> {
        if self.config.skip.is_set(SkipPhase::Install) {
            info!(csar = %remote_csar, "Skipping install, skip flag set");
            return Ok(());
        }

        let working_dir = remote_parent(remote_csar);
        // 解包无协议常量可依，沿用连接配置的命令缺省超时
        let unzip_timeout = runner.default_timeout_secs();
        let exit_code = runner
            .execute(
                &format!("unzip -o {} -d {}", remote_csar, working_dir),
                unzip_timeout,
                None,
                None,
            )
            .await?;
        if exit_code != 0 {
            return Err(HarnessError::verification(format!(
                "failed to unpack {} (exit {})",
                remote_csar, exit_code
            )));
        }

        let packages = self.list_remote_charts(runner, &working_dir).await?;
        let chart = match packages.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(HarnessError::verification(format!(
                    "no charts found in {}/Definitions/OtherTemplates",
                    working_dir
                )))
            }
            _ => {
                return Err(HarnessError::verification(format!(
                    "more than one chart found in {}/Definitions/OtherTemplates",
                    working_dir
                )))
            }
        };

        let helm = self.helm_executor();
        helm.upgrade_install(
            runner,
            &[chart],
            remote_values,
            self.config.skip.is_set(SkipPhase::DuplicateChart),
        )
        .await
    }

    async fn list_remote_charts(
        &self,
        runner: &mut RemoteCommandRunner,
        working_dir: &str,
    ) -> Result<Vec<String>> {
        let mut stdout = String::new();
        let exit_code = runner
            .execute(
                &format!("ls {}/Definitions/OtherTemplates/*.tgz", working_dir),
                LIST_TIMEOUT_SECS,
                Some(&mut stdout),
                None,
            )
            .await?;
        if exit_code != 0 {
            return Err(HarnessError::verification(format!(
                "failed to list charts under {} (exit {})",
                working_dir, exit_code
            )));
        }
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    /// 校验安装结果：渲染模板取出 Service，再逐项核对集群状态
    async fn verify_installation(
        &self,
        runner: &mut RemoteCommandRunner,
        remote_csar: &str,
    ) -> Result<()> {
        if self.config.skip.is_set(SkipPhase::Verify) {
            info!("Skipping verification, skip flag set");
            return Ok(());
        }

        let working_dir = remote_parent(remote_csar);
        let packages = self.list_remote_charts(runner, &working_dir).await?;

        let helm = self.helm_executor();
        let mut template_services = Vec::new();
        for package in &packages {
            let manifest = helm.template_remote(runner, package).await?;
            template_services.extend(service_names_from_manifest(&manifest)?);
        }

        let namespace = self.config.director.namespace.clone();
        let mut kube = KubeClient::new(runner, namespace);
        let services = kube.service_names().await?;

        for service in &template_services {
            if !services.contains(service) {
                return Err(HarnessError::verification(format!(
                    "expected Service '{}' does not exist",
                    service
                )));
            }
            info!(service = %service, "Expected Service exists");
            self.verify_service_workload(&mut kube, service).await?;
        }
        Ok(())
    }

    /// 单个 Service 的工作负载校验：恰好一个 ReplicaSet，Pod 数与
    /// spec.replicas 一致且全部处于 Running
    async fn verify_service_workload(
        &self,
        kube: &mut KubeClient<'_>,
        service: &str,
    ) -> Result<()> {
        let selector = format!("app={}", service);

        let replicasets = kube.replicaset_names(&selector).await?;
        let replicaset = match replicasets.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(HarnessError::verification(format!(
                    "no ReplicaSet found for selector '{}'",
                    selector
                )))
            }
            _ => {
                return Err(HarnessError::verification(format!(
                    "wrong number of ReplicaSets found for selector '{}': {}",
                    selector,
                    replicasets.len()
                )))
            }
        };
        info!(replicaset = %replicaset, selector = %selector, "Found one ReplicaSet");

        let json = kube.get_json(Kind::ReplicaSet, &replicaset).await?;
        let expected_pods = json
            .pointer("/spec/replicas")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                HarnessError::verification(format!(
                    "ReplicaSet {} has no spec.replicas",
                    replicaset
                ))
            })?;

        let pods = kube.pod_names(&selector).await?;
        if pods.len() as u64 != expected_pods {
            return Err(HarnessError::verification(format!(
                "wrong number of Pods for selector '{}': expected {} actual {}",
                selector,
                expected_pods,
                pods.len()
            )));
        }
        info!(
            selector = %selector,
            pods = expected_pods,
            "Correct number of Pods found"
        );

        let phases = kube.pod_phases(&selector).await?;
        let mut all_running = true;
        for (pod, phase) in &phases {
            if phase.eq_ignore_ascii_case(EXPECTED_POD_PHASE) {
                info!(pod = %pod, phase = %phase, "Pod in correct phase");
            } else {
                warn!(pod = %pod, phase = %phase, "Pod not in expected phase");
                all_running = false;
            }
        }
        if !all_running {
            return Err(HarnessError::verification(format!(
                "not all Pods for selector '{}' are in the '{}' phase",
                selector, EXPECTED_POD_PHASE
            )));
        }
        info!(selector = %selector, "All Pods are in the correct phase");
        Ok(())
    }

    fn helm_executor(&self) -> HelmExecutor<'_> {
        HelmExecutor::new(
            &self.config.helm,
            self.config.director.namespace.clone(),
            self.config.build.repository_url.clone(),
        )
    }
}

/// chart 归档对应的集成依赖项
///
/// 版本取归档文件名去掉 `<chart 名>-` 前缀，repository 指向构建输出
/// 里解包后的 chart 目录。
fn chart_dependency(kind: SdkKind, chart: &Path) -> Result<ChartDependency> {
    let base_name = chart
        .file_stem()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            HarnessError::invalid(format!("chart has no file name: {}", chart.display()))
        })?;
    let version = base_name
        .strip_prefix(&format!("{}-", kind.chart_name()))
        .unwrap_or(base_name)
        .to_string();

    let parent = chart.parent().unwrap_or_else(|| Path::new(""));
    let location = parent
        .join(kind.chart_name())
        .join("chart")
        .join(kind.chart_name());

    Ok(ChartDependency {
        name: kind.chart_name().to_string(),
        version,
        repository: format!("file://{}", location.display()),
    })
}

/// 本地文件在导演节点暂存目录里的路径
fn remote_path(stage_dir: &str, local: &Path) -> Result<String> {
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            HarnessError::invalid(format!("path has no file name: {}", local.display()))
        })?;
    Ok(format!("{}/{}", stage_dir.trim_end_matches('/'), name))
}

/// 远端路径的父目录
fn remote_parent(remote: &str) -> String {
    match remote.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

/// 从多文档清单里收集 Service 名称
fn service_names_from_manifest(manifest: &str) -> Result<Vec<String>> {
    let mut services = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = Value::deserialize(document)?;
        let Some(kind) = value.get("kind").and_then(|k| k.as_str()) else {
            continue;
        };
        if kind != "Service" {
            continue;
        }
        let name = value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| HarnessError::Yaml("Service without metadata.name".to_string()))?;
        services.push(name.to_string());
    }
    Ok(services)
}
