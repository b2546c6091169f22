use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::decision::TargetCodec;
use super::ffmpeg::{self, ToolConfig};
use super::records::ConversionDecision;

/// 计算输出路径：在目标根目录下镜像源目录结构。
///
/// 转换的文件使用目标编码对应的扩展名；复制的文件保留原容器和扩展名。
pub fn output_path(
    source_dir: &Path,
    target_dir: &Path,
    source: &Path,
    decision: ConversionDecision,
    codec: TargetCodec,
) -> Result<PathBuf> {
    let relative = source.strip_prefix(source_dir).with_context(|| {
        format!(
            "[E_IO] 源文件不在源目录之下: {} (源目录: {})",
            source.display(),
            source_dir.display()
        )
    })?;

    let mirrored = target_dir.join(relative);
    Ok(match decision {
        ConversionDecision::Convert => mirrored.with_extension(codec.extension()),
        ConversionDecision::Copy => mirrored,
    })
}

/// 执行转换或复制，返回最终输出文件的大小（字节）。
///
/// 试运行模式下不调用编码器、不写任何文件，直接返回以源文件大小
/// 投影的结果。任何失败都会清理掉可能残留的半成品输出文件。
pub fn execute(
    decision: ConversionDecision,
    source: &Path,
    target: &Path,
    codec: TargetCodec,
    bitrate_kbps: Option<u32>,
    dry_run: bool,
    tools: &ToolConfig,
) -> Result<u64> {
    if dry_run {
        return file_size(source);
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("[E_IO] 无法创建输出目录: {}", parent.display()))?;
    }

    match decision {
        ConversionDecision::Copy => match fs::copy(source, target) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                remove_partial(target);
                Err(anyhow!(
                    "[E_IO] 复制文件失败: {} -> {}: {err}",
                    source.display(),
                    target.display()
                ))
            }
        },
        ConversionDecision::Convert => {
            if let Err(err) = ffmpeg::encode(source, target, codec, bitrate_kbps, tools) {
                remove_partial(target);
                return Err(err);
            }
            match fs::metadata(target) {
                Ok(meta) => Ok(meta.len()),
                Err(_) => {
                    remove_partial(target);
                    Err(anyhow!(
                        "[E_ENCODE] 编码器未产生输出文件: {}",
                        target.display()
                    ))
                }
            }
        }
    }
}

pub fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .with_context(|| format!("[E_IO] 读取文件大小失败: {}", path.display()))
}

fn remove_partial(target: &Path) {
    let _ = fs::remove_file(target);
}
