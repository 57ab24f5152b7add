//! kubectl 查询助手
//! 所有 kubectl 命令都在导演节点上通过远程运行器执行

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{HarnessError, Result};
use crate::ssh::RemoteCommandRunner;

/// kubectl 查询的默认超时（秒）
const QUERY_TIMEOUT_SECS: u64 = 5;

const RANGE_SEPARATOR: &str = " ";
const JSONPATH_METADATA_NAME: &str =
    r#"'{range .items[*]}{.metadata.name}{" "}{end}{"\n"}'"#;
const JSONPATH_POD_PHASE: &str =
    r#"'{range .items[*]}{.metadata.name}{"="}{.status.phase}{" "}{end}{"\n"}'"#;

/// Kubernetes 资源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Service,
    Pod,
    ReplicaSet,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Service => "Service",
            Kind::Pod => "Pod",
            Kind::ReplicaSet => "ReplicaSet",
        }
    }
}

/// kubectl 客户端
pub struct KubeClient<'a> {
    runner: &'a mut RemoteCommandRunner,
    namespace: String,
}

impl<'a> KubeClient<'a> {
    pub fn new(runner: &'a mut RemoteCommandRunner, namespace: impl Into<String>) -> Self {
        Self {
            runner,
            namespace: namespace.into(),
        }
    }

    async fn execute_remote(&mut self, command: &str, timeout_secs: u64) -> Result<String> {
        let mut stdout = String::new();
        let exit_code = self
            .runner
            .execute(command, timeout_secs, Some(&mut stdout), None)
            .await?;
        if exit_code != 0 {
            return Err(HarnessError::verification(format!(
                "kubectl command failed (exit {}): {}",
                exit_code, command
            )));
        }
        Ok(stdout.trim().to_string())
    }

    async fn named_items(&mut self, kind: Kind, selector: Option<&str>) -> Result<Vec<String>> {
        let command = item_name_command(kind, selector, &self.namespace);
        let stdout = self.execute_remote(&command, QUERY_TIMEOUT_SECS).await?;
        Ok(stdout
            .split(RANGE_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect())
    }

    /// 命名空间内的所有 Service 名称
    pub async fn service_names(&mut self) -> Result<Vec<String>> {
        self.named_items(Kind::Service, None).await
    }

    /// 匹配选择器的 Pod 名称
    pub async fn pod_names(&mut self, selector: &str) -> Result<Vec<String>> {
        self.named_items(Kind::Pod, Some(selector)).await
    }

    /// 匹配选择器的 ReplicaSet 名称
    pub async fn replicaset_names(&mut self, selector: &str) -> Result<Vec<String>> {
        self.named_items(Kind::ReplicaSet, Some(selector)).await
    }

    /// 匹配选择器的 Pod 及其所处阶段
    pub async fn pod_phases(&mut self, selector: &str) -> Result<HashMap<String, String>> {
        let command = pod_phase_command(selector, &self.namespace);
        let stdout = self.execute_remote(&command, QUERY_TIMEOUT_SECS).await?;
        let mut phases = HashMap::new();
        for entry in stdout.split(RANGE_SEPARATOR).filter(|s| !s.is_empty()) {
            let (name, phase) = entry.split_once('=').ok_or_else(|| {
                HarnessError::verification(format!("malformed pod phase entry: {}", entry))
            })?;
            phases.insert(name.to_string(), phase.to_string());
        }
        Ok(phases)
    }

    /// 资源的完整 JSON 描述
    pub async fn get_json(&mut self, kind: Kind, name: &str) -> Result<Value> {
        let command = item_json_command(kind, name, &self.namespace);
        let stdout = self.execute_remote(&command, QUERY_TIMEOUT_SECS).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// 在 Pod 内执行命令
    pub async fn exec(
        &mut self,
        pod: &str,
        container: Option<&str>,
        command: &str,
        timeout_secs: u64,
    ) -> Result<String> {
        let cmd = format!(
            "{} exec -it {} -- {}",
            kubectl_base(&self.namespace, container),
            pod,
            command
        );
        self.execute_remote(&cmd, timeout_secs).await
    }

    /// 把导演节点上的文件拷贝进 Pod
    pub async fn copy_to_pod(
        &mut self,
        file_path: &str,
        pod: &str,
        container: Option<&str>,
        pod_location: &str,
    ) -> Result<()> {
        let cmd = format!(
            "{} cp {} {}:{}",
            kubectl_base(&self.namespace, container),
            file_path,
            pod,
            pod_location
        );
        self.execute_remote(&cmd, QUERY_TIMEOUT_SECS).await?;
        Ok(())
    }
}

fn kubectl_base(namespace: &str, container: Option<&str>) -> String {
    match container {
        Some(container) => format!("kubectl -n {} -c {}", namespace, container),
        None => format!("kubectl -n {}", namespace),
    }
}

/// 名称查询命令（jsonpath 输出以空格分隔）
pub fn item_name_command(kind: Kind, selector: Option<&str>, namespace: &str) -> String {
    let mut cmd = vec!["kubectl".to_string(), "get".to_string(), kind.as_str().to_string()];
    if let Some(selector) = selector {
        cmd.push(format!("-l{}", selector));
    }
    cmd.push("-n".to_string());
    cmd.push(namespace.to_string());
    cmd.push(format!("-o=jsonpath={}", JSONPATH_METADATA_NAME));
    cmd.join(" ")
}

/// Pod 阶段查询命令（`名称=阶段` 对）
pub fn pod_phase_command(selector: &str, namespace: &str) -> String {
    format!(
        "kubectl get Pod -l{} -n {} -o=jsonpath={}",
        selector, namespace, JSONPATH_POD_PHASE
    )
}

/// 单个资源的 JSON 查询命令
pub fn item_json_command(kind: Kind, name: &str, namespace: &str) -> String {
    format!(
        "kubectl get {} -n {} {} -o=json",
        kind.as_str(),
        namespace,
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_name_command_with_selector() {
        let cmd = item_name_command(Kind::Pod, Some("app=eric-enmsg-fmsdkexample"), "enm");
        assert_eq!(
            cmd,
            r#"kubectl get Pod -lapp=eric-enmsg-fmsdkexample -n enm -o=jsonpath='{range .items[*]}{.metadata.name}{" "}{end}{"\n"}'"#
        );
    }

    #[test]
    fn test_item_name_command_without_selector() {
        let cmd = item_name_command(Kind::Service, None, "enm");
        assert!(cmd.starts_with("kubectl get Service -n enm -o=jsonpath="));
        assert!(!cmd.contains("-l"));
    }

    #[test]
    fn test_pod_phase_command() {
        let cmd = pod_phase_command("app=x", "enm");
        assert_eq!(
            cmd,
            r#"kubectl get Pod -lapp=x -n enm -o=jsonpath='{range .items[*]}{.metadata.name}{"="}{.status.phase}{" "}{end}{"\n"}'"#
        );
    }

    #[test]
    fn test_item_json_command() {
        let cmd = item_json_command(Kind::ReplicaSet, "my-rs", "enm");
        assert_eq!(cmd, "kubectl get ReplicaSet -n enm my-rs -o=json");
    }

    #[test]
    fn test_kubectl_base_with_container() {
        assert_eq!(
            kubectl_base("enm", Some("main")),
            "kubectl -n enm -c main"
        );
        assert_eq!(kubectl_base("enm", None), "kubectl -n enm");
    }
}
