//! SDK 构建工具封装
//! 驱动 sdkBuildManager 脚本完成镜像构建加载与 CSAR 重建

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::info;

use crate::archive;
use crate::charts::IntegrationBuildYaml;
use crate::error::{HarnessError, Result};
use crate::process::LocalProcessRunner;
use crate::registry;

/// SDK 种类及其交付物命名约定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkKind {
    Fm,
    Pm,
}

impl SdkKind {
    /// 示例服务 chart 名
    pub fn chart_name(&self) -> &'static str {
        match self {
            SdkKind::Fm => "eric-enmsg-fmsdkexample",
            SdkKind::Pm => "eric-enmsg-pmsdkexample",
        }
    }

    /// 构建输入树里的相对目录
    pub fn inputs_dir(&self) -> &'static str {
        match self {
            SdkKind::Fm => "sdk/fmsdk",
            SdkKind::Pm => "sdk/pmsdk",
        }
    }

    /// 模板归档的文件名前缀
    pub fn template_prefix(&self) -> &'static str {
        match self {
            SdkKind::Fm => "fm-sdk-templates",
            SdkKind::Pm => "pm-sdk-templates",
        }
    }

    /// 基础镜像名
    pub fn base_image(&self) -> &'static str {
        match self {
            SdkKind::Fm => "eric-enm-fmsdk",
            SdkKind::Pm => "eric-enm-pmsdk",
        }
    }

    /// 原型描述文件名（相对生成脚本所在目录）
    pub fn archetypes_file(&self) -> &'static str {
        match self {
            SdkKind::Fm => "Archetypes.json",
            SdkKind::Pm => "Archetypes_PM.json",
        }
    }
}

impl std::str::FromStr for SdkKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fm" => Ok(SdkKind::Fm),
            "pm" => Ok(SdkKind::Pm),
            _ => Err(format!("Unknown SDK type: {}", s)),
        }
    }
}

impl std::fmt::Display for SdkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdkKind::Fm => write!(f, "FM"),
            SdkKind::Pm => write!(f, "PM"),
        }
    }
}

/// sdkBuildManager 脚本封装
pub struct SdkBuildManager {
    runner: LocalProcessRunner,
    script: PathBuf,
    build_dir: PathBuf,
    repository_url: String,
    product_set_version: String,
}

impl SdkBuildManager {
    pub fn new(
        script: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        repository_url: impl Into<String>,
        product_set_version: impl Into<String>,
    ) -> Self {
        Self {
            runner: LocalProcessRunner::new(),
            script: script.into(),
            build_dir: build_dir.into(),
            repository_url: repository_url.into(),
            product_set_version: product_set_version.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// 清空并重建构建目录
    pub fn initialize_build_dir(&self) -> Result<()> {
        if self.build_dir.exists() {
            info!(dir = %self.build_dir.display(), "Cleaning build directory");
            std::fs::remove_dir_all(&self.build_dir)?;
        }
        std::fs::create_dir_all(&self.build_dir)?;
        Ok(())
    }

    async fn ensure_executable(&self) -> Result<()> {
        self.runner
            .execute(
                &[
                    "chmod".to_string(),
                    "+x".to_string(),
                    self.script.display().to_string(),
                ],
                false,
                None,
                None,
            )
            .await?;
        Ok(())
    }

    /// 构建并加载 SDK 服务镜像，返回生成的 chart 归档列表
    ///
    /// 跳过执行时仍然收集 `output_dir` 下已有的 chart，找不到任何
    /// chart 视为构建失败。
    pub async fn build_load_images(
        &self,
        kind: SdkKind,
        sdk_chart: &Path,
        sdk_inputs: &Path,
        output_dir: &Path,
        skip: bool,
    ) -> Result<Vec<PathBuf>> {
        if skip {
            info!(kind = %kind, "Skipping build-load-images, skip flag set");
        } else {
            self.ensure_executable().await?;
            let command = vec![
                self.script.display().to_string(),
                "--build-load-images".to_string(),
                "--sdk-path".to_string(),
                sdk_chart.display().to_string(),
                "--sdk-input-path".to_string(),
                sdk_inputs.display().to_string(),
                "--repository-url".to_string(),
                self.repository_url.clone(),
                "--custom-sdk-path".to_string(),
                output_dir.display().to_string(),
                "-d".to_string(),
            ];
            self.runner.execute(&command, false, None, None).await?;
        }

        let mut charts = Vec::new();
        for entry in std::fs::read_dir(output_dir)? {
            let path = entry?.path();
            let is_chart = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_lowercase().ends_with(".tgz"))
                .unwrap_or(false);
            if is_chart {
                charts.push(path);
            }
        }
        if charts.is_empty() {
            return Err(HarnessError::process(format!(
                "no charts generated by build-load-images in {}",
                output_dir.display()
            )));
        }
        charts.sort();
        Ok(charts)
    }

    /// 按构建描述重建集成 CSAR，返回生成的 CSAR 路径
    ///
    /// CSAR 落在 `custom_build_dir/csar/<名>-<版本>/<名>-<版本>.csar`。
    pub async fn rebuild_csar(
        &self,
        build_yaml: &Path,
        custom_build_dir: &Path,
        light: bool,
        skip: bool,
    ) -> Result<PathBuf> {
        let build_data = IntegrationBuildYaml::load(build_yaml)?;
        let csar_name = format!("{}-{}", build_data.name()?, build_data.version()?);
        let csar_path = custom_build_dir
            .join("csar")
            .join(&csar_name)
            .join(format!("{}.csar", csar_name));

        if skip {
            info!("Skipping rebuild-csar, skip flag set");
        } else {
            let mut command = vec![
                self.script.display().to_string(),
                "--rebuild-csar".to_string(),
                build_yaml.display().to_string(),
                "--custom-sdk-path".to_string(),
                custom_build_dir.display().to_string(),
                "--repository-url".to_string(),
                self.repository_url.clone(),
                "--product-set".to_string(),
                self.product_set_version.clone(),
            ];
            if light {
                info!("Generating a light CSAR");
                command.push("--csar-light".to_string());
            }
            self.ensure_executable().await?;
            self.runner
                .execute(&command, false, self.script.parent(), None)
                .await?;
        }

        if !csar_path.is_file() {
            return Err(HarnessError::process(format!(
                "expected CSAR not found: {}",
                csar_path.display()
            )));
        }
        info!(csar = %csar_path.display(), "Created SDK CSAR");
        Ok(csar_path)
    }

    /// 加载 CSAR 附带的基础镜像，返回原标签到目标仓库标签的映射
    ///
    /// `docker.tar` 为空表示轻量交付物，镜像直接取自 CI 仓库，
    /// `images.txt` 里的标签原样返回。
    pub async fn load_csar_images(
        &self,
        docker_tar: &Path,
        images_txt: &Path,
        registry_prefix: &str,
        skip: bool,
    ) -> Result<HashMap<String, String>> {
        let light_delivery = archive::is_tar_empty(docker_tar)?;

        if light_delivery {
            info!("docker.tar is empty, assuming light delivery, using images from CI");
        } else if skip {
            info!(images = %images_txt.display(), "Skipping load-csar-images, skip flag set");
        } else {
            info!("Loading images from docker.tar via build manager");
            self.ensure_executable().await?;
            let command = vec![
                self.script.display().to_string(),
                "--load-csar-images".to_string(),
                "--repository-url".to_string(),
                registry_prefix.to_string(),
                "-i".to_string(),
                images_txt.display().to_string(),
            ];
            self.runner
                .execute(&command, false, self.script.parent(), None)
                .await?;
        }

        let listing = std::fs::read_to_string(images_txt)?;
        let mut mappings = HashMap::new();
        for image in listing.lines().filter(|l| !l.trim().is_empty()) {
            let target = if light_delivery {
                image.to_string()
            } else {
                registry::retagged_image(image, &self.repository_url)
            };
            mappings.insert(image.to_string(), target);
        }
        Ok(mappings)
    }

    /// 构建目录里该 SDK 的模板归档，要求恰好一个匹配
    pub fn sdk_chart_template(&self, kind: SdkKind) -> Result<PathBuf> {
        let base = self.build_dir.join("templates").join("charts");
        let pattern = Regex::new(&format!(r"^{}-.*\.tar\.gz$", kind.template_prefix()))
            .map_err(|e| HarnessError::process(e.to_string()))?;

        let mut matches = Vec::new();
        for entry in std::fs::read_dir(&base)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if pattern.is_match(name) {
                    matches.push(path);
                }
            }
        }

        match matches.len() {
            0 => Err(HarnessError::process(format!(
                "no template archives found in {}",
                base.display()
            ))),
            1 => Ok(matches.remove(0)),
            _ => Err(HarnessError::process(format!(
                "more than one template archive found in {}",
                base.display()
            ))),
        }
    }
}
