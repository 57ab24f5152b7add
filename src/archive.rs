//! 归档处理模块
//! 解压 SDK 交付物：zip/jar/csar 与 tgz，以及 docker 镜像 tar 的探测

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// 归档类型，按文件扩展名判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tgz,
}

fn kind_of(archive: &Path) -> Result<ArchiveKind> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".zip") || name.ends_with(".jar") || name.ends_with(".csar") {
        Ok(ArchiveKind::Zip)
    } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        Ok(ArchiveKind::Tgz)
    } else {
        Err(HarnessError::archive(format!(
            "unsupported archive type: {}",
            archive.display()
        )))
    }
}

/// 解压归档到目标目录
pub fn extract(archive: &Path, destination: &Path) -> Result<()> {
    info!(
        archive = %archive.display(),
        destination = %destination.display(),
        "Extracting archive"
    );
    std::fs::create_dir_all(destination)?;

    match kind_of(archive)? {
        ArchiveKind::Zip => extract_zip(archive, destination),
        ArchiveKind::Tgz => extract_tgz(archive, destination),
    }
}

fn extract_zip(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| HarnessError::archive(format!("{}: {}", archive.display(), e)))?;
    zip.extract(destination)
        .map_err(|e| HarnessError::archive(format!("{}: {}", archive.display(), e)))?;
    Ok(())
}

fn extract_tgz(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(destination)?;
    Ok(())
}

/// 从 zip/jar 归档中取出单个条目写到目标文件
pub fn extract_file_from_zip(archive: &Path, inner_path: &str, target: &Path) -> Result<()> {
    debug!(
        archive = %archive.display(),
        entry = %inner_path,
        target = %target.display(),
        "Extracting single archive entry"
    );

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| HarnessError::archive(format!("{}: {}", archive.display(), e)))?;
    let mut entry = zip.by_name(inner_path).map_err(|e| {
        HarnessError::archive(format!(
            "entry {} not found in {}: {}",
            inner_path,
            archive.display(),
            e
        ))
    })?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(&mut entry, &mut out)?;
    Ok(())
}

/// 列出未压缩 tar 的条目路径
pub fn list_tar(archive: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(file);
    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        entries.push(entry.path()?.into_owned());
    }
    Ok(entries)
}

/// 未压缩 tar 是否不含任何条目（空的 docker.tar 表示无镜像需要加载）
pub fn is_tar_empty(archive: &Path) -> Result<bool> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(file);
    Ok(tar.entries()?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(dir: &Path) -> PathBuf {
        let path = dir.join("pkg.zip");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("top.txt", options).unwrap();
        zip.write_all(b"top level").unwrap();
        zip.start_file("Definitions/OtherTemplates/chart.tgz", options)
            .unwrap();
        zip.write_all(b"not a real chart").unwrap();
        zip.finish().unwrap();
        path
    }

    fn make_tgz(dir: &Path) -> PathBuf {
        let path = dir.join("pkg.tgz");
        let file = File::create(&path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);
        let payload = b"chart data";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, "charts/values.yaml", &payload[..])
            .unwrap();
        tar.into_inner().unwrap().finish().unwrap();
        path
    }

    fn make_tar(dir: &Path, entries: &[&str]) -> PathBuf {
        let path = dir.join("docker.tar");
        let file = File::create(&path).unwrap();
        let mut tar = tar::Builder::new(file);
        for entry in entries {
            let payload = b"layer";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, *entry, &payload[..]).unwrap();
        }
        tar.finish().unwrap();
        path
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_zip(dir.path());
        let dest = dir.path().join("out");

        extract(&archive, &dest).unwrap();

        assert!(dest.join("top.txt").is_file());
        assert!(dest.join("Definitions/OtherTemplates/chart.tgz").is_file());
    }

    #[test]
    fn test_extract_tgz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_tgz(dir.path());
        let dest = dir.path().join("out");

        extract(&archive, &dest).unwrap();

        let content = std::fs::read_to_string(dest.join("charts/values.yaml")).unwrap();
        assert_eq!(content, "chart data");
    }

    #[test]
    fn test_extract_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_zip(dir.path());
        let target = dir.path().join("only/top.txt");

        extract_file_from_zip(&archive, "top.txt", &target).unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "top level");
    }

    #[test]
    fn test_extract_missing_entry_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_zip(dir.path());
        let err = extract_file_from_zip(&archive, "absent.txt", &dir.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Archive(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract(&dir.path().join("file.rar"), dir.path()).unwrap_err();
        assert!(matches!(err, HarnessError::Archive(_)));
    }

    #[test]
    fn test_list_tar() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_tar(dir.path(), &["a.json", "layers/b.tar"]);

        let entries = list_tar(&archive).unwrap();
        assert_eq!(
            entries,
            vec![PathBuf::from("a.json"), PathBuf::from("layers/b.tar")]
        );
    }

    #[test]
    fn test_is_tar_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = make_tar(dir.path(), &[]);
        assert!(is_tar_empty(&empty).unwrap());

        let full = make_tar(dir.path(), &["a"]);
        assert!(!is_tar_empty(&full).unwrap());
    }

    #[test]
    fn test_csar_treated_as_zip() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = make_zip(dir.path());
        let csar_path = dir.path().join("pkg.csar");
        std::fs::rename(&zip_path, &csar_path).unwrap();

        let dest = dir.path().join("out");
        extract(&csar_path, &dest).unwrap();
        assert!(dest.join("top.txt").is_file());
    }
}
