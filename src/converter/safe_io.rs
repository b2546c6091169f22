use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::Builder;

/// 原子写入报告文件：先写同目录临时文件再持久化，
/// 并拒绝符号链接输出路径，避免跟随链接覆盖外部文件。
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("输出路径缺少父目录: {}", path.display()))?;

    reject_symlink(path)?;

    let mut tmp = Builder::new()
        .prefix(".music_convert_tmp_")
        .tempfile_in(parent)
        .with_context(|| format!("无法在目录中创建临时文件: {}", parent.display()))?;

    tmp.write_all(data)
        .with_context(|| format!("写入临时文件失败: {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("同步临时文件失败: {}", path.display()))?;

    reject_symlink(path)?;

    tmp.persist(path)
        .map_err(|e| anyhow!(e.error))
        .with_context(|| format!("原子写入失败: {}", path.display()))?;

    Ok(())
}

pub fn atomic_write_string(path: &Path, content: &str) -> Result<()> {
    atomic_write_bytes(path, content.as_bytes())
}

fn reject_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => Err(anyhow!(
            "检测到符号链接输出路径，已拒绝写入: {}",
            path.display()
        )),
        Ok(_) | Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_string_basic() {
        let dir = TempDir::new().expect("tempdir");
        let output = dir.path().join("report.md");
        atomic_write_string(&output, "# 报告").expect("写入失败");
        let content = std::fs::read_to_string(&output).expect("读取失败");
        assert_eq!(content, "# 报告");
    }

    #[test]
    fn test_atomic_write_overwrites_existing() {
        let dir = TempDir::new().expect("tempdir");
        let output = dir.path().join("report.md");
        atomic_write_string(&output, "旧内容").expect("写入失败");
        atomic_write_string(&output, "新内容").expect("覆盖失败");
        let content = std::fs::read_to_string(&output).expect("读取失败");
        assert_eq!(content, "新内容");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_reject_symlink() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("target.md");
        std::fs::write(&target, "旧").expect("写入目标");

        let link = dir.path().join("report.md");
        symlink(&target, &link).expect("建符号链接");

        let err = atomic_write_string(&link, "新").expect_err("应拒绝符号链接");
        assert!(err.to_string().contains("符号链接"));
        let content = std::fs::read_to_string(&target).expect("读取目标");
        assert_eq!(content, "旧");
    }
}
