//! 外部文件获取模块
//! 支持本地路径、file:// 与 http(s):// 来源，带 MD5 旁车缓存

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?|file)://").expect("scheme regex"));

/// 获取外部文件到缓存目录，返回缓存中的路径
///
/// HTTP 来源通过 `<url>.md5` 旁车判断缓存是否新鲜；本地来源直接比较
/// 计算出的 MD5。缓存命中时不重复传输。
pub async fn get_external_file(source: &str, cache_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(cache_dir).await?;

    match URL_SCHEME.captures(source) {
        Some(caps) if caps[1].eq_ignore_ascii_case("file") => {
            let path = &source[caps[0].len()..];
            copy_local(Path::new(path), cache_dir).await
        }
        Some(_) => download(source, cache_dir).await,
        None => copy_local(Path::new(source), cache_dir).await,
    }
}

/// 计算文件内容的 MD5 十六进制摘要
pub fn md5_hex(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Md5::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn cache_target(cache_dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(HarnessError::invalid("source has no file name"));
    }
    Ok(cache_dir.join(name))
}

async fn copy_local(source: &Path, cache_dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let target = cache_target(cache_dir, name)?;

    if target.is_file() && md5_hex(&target)? == md5_hex(source)? {
        debug!(file = %target.display(), "Cached copy is up to date");
        return Ok(target);
    }

    info!(
        source = %source.display(),
        target = %target.display(),
        "Copying external file into cache"
    );
    tokio::fs::copy(source, &target).await?;
    Ok(target)
}

async fn download(url: &str, cache_dir: &Path) -> Result<PathBuf> {
    let name = url
        .split('/')
        .next_back()
        .map(|n| n.split('?').next().unwrap_or(n))
        .unwrap_or_default();
    let target = cache_target(cache_dir, name)?;

    if target.is_file() {
        if let Some(remote_md5) = fetch_sidecar(url).await {
            if md5_hex(&target)? == remote_md5 {
                debug!(file = %target.display(), "Cached download matches remote checksum");
                return Ok(target);
            }
        }
    }

    info!(url = %url, target = %target.display(), "Downloading external file");
    let response = reqwest::get(url)
        .await
        .map_err(|e| HarnessError::Download(format!("{}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(HarnessError::Download(format!(
            "{}: HTTP {}",
            url,
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HarnessError::Download(format!("{}: {}", url, e)))?;

    // 先写临时文件再改名，避免半截下载被当作有效缓存
    let part = target.with_extension(format!("part-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&part, &bytes).await?;
    tokio::fs::rename(&part, &target).await?;
    Ok(target)
}

/// 取远程 MD5 旁车；不存在或不可读时返回 None（触发重新下载）
async fn fetch_sidecar(url: &str) -> Option<String> {
    let sidecar_url = format!("{}.md5", url);
    let response = reqwest::get(&sidecar_url).await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.text().await.ok()?;
    // 旁车格式为 "<md5>  <文件名>"，只取首个字段
    body.split_whitespace().next().map(|s| s.to_lowercase())
}
