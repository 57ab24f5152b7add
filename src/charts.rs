//! YAML 处理模块
//! chart 元数据、values 与构建描述文件的读写

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// 带来源路径的 YAML 文档
pub struct YamlFile {
    path: PathBuf,
    pub data: Value,
}

impl YamlFile {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| HarnessError::Yaml(format!("failed to load {}: {}", path.display(), e)))?;
        let data = serde_yaml::from_str(&content)?;
        Ok(Self { path, data })
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(&self.data)?;
        std::fs::write(&self.path, content)
            .map_err(|e| HarnessError::Yaml(format!("failed to save {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn str_at(&self, keys: &[&str]) -> Result<&str> {
        let mut value = &self.data;
        for key in keys {
            value = value.get(key).ok_or_else(|| {
                HarnessError::Yaml(format!(
                    "missing key '{}' in {}",
                    keys.join("."),
                    self.path.display()
                ))
            })?;
        }
        value.as_str().ok_or_else(|| {
            HarnessError::Yaml(format!(
                "key '{}' in {} is not a string",
                keys.join("."),
                self.path.display()
            ))
        })
    }
}

/// chart 依赖项（repository 可为 file:// URL 指向本地构建产物）
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChartDependency {
    pub name: String,
    pub version: String,
    pub repository: String,
}

/// Chart.yaml
pub struct ChartYaml {
    file: YamlFile,
}

impl ChartYaml {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: YamlFile::load(path)?,
        })
    }

    pub fn name(&self) -> Result<&str> {
        self.file.str_at(&["name"])
    }

    pub fn version(&self) -> Result<&str> {
        self.file.str_at(&["version"])
    }

    /// 按名称查找依赖项
    pub fn dependency(&self, sub_chart_name: &str) -> Option<&Mapping> {
        self.file
            .data
            .get("dependencies")?
            .as_sequence()?
            .iter()
            .filter_map(|d| d.as_mapping())
            .find(|d| {
                d.get(Value::from("name")).and_then(|n| n.as_str()) == Some(sub_chart_name)
            })
    }
}

/// values.yaml
pub struct ChartValues {
    file: YamlFile,
}

impl ChartValues {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: YamlFile::load(path)?,
        })
    }

    pub fn image_credentials_repo_path(&self) -> Result<&str> {
        self.file.str_at(&["imageCredentials", "repoPath"])
    }

    pub fn image_name(&self, image_id: &str) -> Result<&str> {
        self.file.str_at(&["images", image_id, "name"])
    }

    pub fn image_tag(&self, image_id: &str) -> Result<&str> {
        self.file.str_at(&["images", image_id, "tag"])
    }
}

/// 集成安装 values 文件
pub struct IntegrationValues {
    file: YamlFile,
}

impl IntegrationValues {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: YamlFile::load(path)?,
        })
    }

    pub fn global_registry_url(&self) -> Result<&str> {
        self.file.str_at(&["global", "registry", "url"])
    }

    pub fn fm_vip_address(&self) -> Result<&str> {
        self.file.str_at(&["global", "vips", "fm_vip_address"])
    }
}

/// 集成 CSAR 的构建描述（integration.yaml）
pub struct IntegrationBuildYaml {
    file: YamlFile,
}

impl IntegrationBuildYaml {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: YamlFile::load(path)?,
        })
    }

    pub fn name(&self) -> Result<&str> {
        self.file.str_at(&["name"])
    }

    pub fn version(&self) -> Result<&str> {
        self.file.str_at(&["version"])
    }

    pub fn set_dependencies(&mut self, dependencies: &[ChartDependency]) -> Result<()> {
        let value = serde_yaml::to_value(dependencies)?;
        if let Some(mapping) = self.file.data.as_mapping_mut() {
            mapping.insert(Value::from("dependencies"), value);
            Ok(())
        } else {
            Err(HarnessError::Yaml(format!(
                "{} is not a mapping",
                self.file.path().display()
            )))
        }
    }

    pub fn save(&self) -> Result<()> {
        self.file.save()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// 递归收集 inputs 树下的所有 build.yaml
pub fn find_build_yamls(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_build_yamls(root, &mut found)?;
    Ok(found)
}

fn collect_build_yamls(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_build_yamls(&path, found)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some("build.yaml") {
            found.push(path);
        }
    }
    Ok(())
}

/// 把加载镜像映射写回 inputs 树里的 build.yaml
///
/// 本地标签按最后一段 `名称:版本` 解析；不含仓库前缀的条目从
/// build.yaml 中删除（镜像无需重新构建）。
pub fn update_build_images(inputs_dir: &Path, images: &HashMap<String, String>) -> Result<()> {
    let mut name_map: HashMap<String, (String, String)> = HashMap::new();
    let mut delete: Vec<String> = Vec::new();

    for local_tag in images.values() {
        let parts: Vec<&str> = local_tag.split('/').collect();
        if parts.len() == 1 {
            delete.push(local_tag.clone());
            continue;
        }
        let repository = parts[..parts.len() - 1].join("/");
        if let Some((name, version)) = parts[parts.len() - 1].split_once(':') {
            name_map.insert(name.to_string(), (version.to_string(), repository));
        }
    }

    for build_yaml in find_build_yamls(inputs_dir)? {
        debug!(file = %build_yaml.display(), "Updating build descriptor images");
        let mut file = YamlFile::load(&build_yaml)?;
        let Some(mapping) = file.data.as_mapping_mut() else {
            continue;
        };

        for tag in &delete {
            mapping.remove(Value::from(tag.as_str()));
        }

        for (name, value) in mapping.iter_mut() {
            let Some(name) = name.as_str() else { continue };
            let Some((version, repository)) = name_map.get(name) else {
                continue;
            };
            if let Some(image) = value.as_mapping_mut() {
                image.insert(Value::from("image-version"), Value::from(version.as_str()));
                image.insert(
                    Value::from("image-repository"),
                    Value::from(repository.as_str()),
                );
            }
        }

        file.save()?;
        info!(file = %build_yaml.display(), "Build descriptor updated");
    }
    Ok(())
}
