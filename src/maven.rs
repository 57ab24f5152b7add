//! 原型工件生成
//! 驱动 generate_sdk_artifacts.py 产出示例模型 RPM 并拷入 chart 构建输入

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::builder::SdkKind;
use crate::error::{HarnessError, Result};
use crate::process::LocalProcessRunner;

/// 安装包携带的模型版本
const INSTALL_VERSION: &str = "1.0.0";
/// 卸载包携带的模型版本
const UNINSTALL_VERSION: &str = "1.0.1";

/// 原型工件生成脚本封装
pub struct MavenArtifacts {
    runner: LocalProcessRunner,
    script: PathBuf,
}

impl MavenArtifacts {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            runner: LocalProcessRunner::new(),
            script: script.into(),
        }
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

    /// 生成并构建某 SDK 的原型工件
    ///
    /// 脚本自行在 `build_dir` 下追加 SDK 名作为输出目录。
    /// 跳过仅在输出目录已存在时生效，目录缺失时仍会执行脚本。
    pub async fn generate(&self, kind: SdkKind, build_dir: &Path, skip: bool) -> Result<()> {
        let output = build_dir.join(kind.to_string());
        if skip && output.is_dir() {
            info!(kind = %kind, "Skipping maven artifact generation, skip flag set");
            return Ok(());
        }

        self.ensure_executable().await?;
        let command = vec![
            self.script.display().to_string(),
            "-a".to_string(),
            kind.archetypes_file().to_string(),
            "-t".to_string(),
            kind.to_string(),
            "-i".to_string(),
            INSTALL_VERSION.to_string(),
            "-u".to_string(),
            UNINSTALL_VERSION.to_string(),
            "-d".to_string(),
            build_dir.display().to_string(),
        ];
        // 脚本按自身所在目录解析原型描述文件
        self.runner
            .execute(&command, false, self.script.parent(), None)
            .await?;
        info!(kind = %kind, output = %output.display(), "Generated maven artifacts");
        Ok(())
    }

    /// 收集生成的 RPM，按输出目录下的相对子目录分组
    ///
    /// 子目录形如 `install/<目标类型>`，找不到任何 RPM 视为生成失败。
    pub fn collect_packages(
        &self,
        build_dir: &Path,
        kind: SdkKind,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        let base = build_dir.join(kind.to_string());
        let mut packages = BTreeMap::new();
        collect_rpms(&base, &base, &mut packages)?;
        if packages.is_empty() {
            return Err(HarnessError::process(format!(
                "no maven artifacts found in {}",
                base.display()
            )));
        }
        for rpms in packages.values_mut() {
            rpms.sort();
        }
        Ok(packages)
    }

    /// 把分组的 RPM 拷入 chart 构建输入目录，保留子目录布局
    pub fn copy_into_inputs(
        &self,
        packages: &BTreeMap<String, Vec<PathBuf>>,
        inputs_dir: &Path,
    ) -> Result<()> {
        for (subdir, rpms) in packages {
            let target = inputs_dir.join(subdir);
            std::fs::create_dir_all(&target)?;
            for rpm in rpms {
                let name = rpm.file_name().ok_or_else(|| {
                    HarnessError::process(format!("invalid artifact path: {}", rpm.display()))
                })?;
                std::fs::copy(rpm, target.join(name))?;
                info!(artifact = %rpm.display(), dest = %target.display(), "Copied maven artifact");
            }
        }
        Ok(())
    }
}

fn collect_rpms(
    base: &Path,
    dir: &Path,
    packages: &mut BTreeMap<String, Vec<PathBuf>>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rpms(base, &path, packages)?;
            continue;
        }
        let is_rpm = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("rpm"))
            .unwrap_or(false);
        if is_rpm {
            let subdir = path
                .parent()
                .and_then(|p| p.strip_prefix(base).ok())
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            packages.entry(subdir).or_default().push(path);
        }
    }
    Ok(())
}
