//! 镜像重标签规则
//! 把 CSAR 里的镜像引用改写到目标仓库

/// 计算镜像在目标仓库下的标签
///
/// `repository_url` 按首个 `/` 拆为仓库主机与路径；未给路径时沿用
/// 镜像原有路径。主机与路径都未变化时返回原标签。
pub fn retagged_image(image: &str, repository_url: &str) -> String {
    let Some((image_host, rest)) = image.split_once('/') else {
        // 无仓库前缀的本地标签保持不变
        return image.to_string();
    };

    let path_parts: Vec<&str> = rest.split('/').collect();
    let image_name = path_parts[path_parts.len() - 1];
    let image_path = path_parts[..path_parts.len() - 1].join("/");

    let (repo_host, repo_path) = match repository_url.split_once('/') {
        Some((host, path)) => (host, path.to_string()),
        None => (repository_url, image_path.clone()),
    };

    if repo_host != image_host || image_path != repo_path {
        format!("{}/{}/{}", repo_host, repo_path, image_name)
    } else {
        image.to_string()
    }
}

/// 仓库主机部分（`--set global.registry.url` 的取值）
pub fn registry_host(repository_url: &str) -> &str {
    repository_url
        .split_once('/')
        .map(|(host, _)| host)
        .unwrap_or(repository_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retag_to_local_registry() {
        let retagged = retagged_image(
            "armdocker.rnd.se/proj_oss/enm/eric-enm-fmsdk:1.2.3",
            "registry.local:5000/proj-enm",
        );
        assert_eq!(retagged, "registry.local:5000/proj-enm/eric-enm-fmsdk:1.2.3");
    }

    #[test]
    fn test_already_in_target_registry_unchanged() {
        let image = "registry.local:5000/proj-enm/eric-enm-fmsdk:1.2.3";
        assert_eq!(
            retagged_image(image, "registry.local:5000/proj-enm"),
            image
        );
    }

    #[test]
    fn test_repository_without_path_keeps_image_path() {
        let retagged = retagged_image(
            "old.registry/proj/sub/eric-enm-pmsdk:2.0.0",
            "registry.local:5000",
        );
        assert_eq!(
            retagged,
            "registry.local:5000/proj/sub/eric-enm-pmsdk:2.0.0"
        );
    }

    #[test]
    fn test_unprefixed_tag_unchanged() {
        assert_eq!(
            retagged_image("local-image:latest", "registry.local:5000/proj-enm"),
            "local-image:latest"
        );
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("registry.local:5000/proj-enm"), "registry.local:5000");
        assert_eq!(registry_host("registry.local:5000"), "registry.local:5000");
    }
}
