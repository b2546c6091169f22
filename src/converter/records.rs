// ----------------------------------------------------------------
// 项目: 音乐批量转换器 (Music Batch Converter)
// 模块: converter/records.rs
// 描述: 此模块定义了整个转换流程中用于数据交换和导出的核心数据结构。
//      这些结构体被设计为可序列化，以便与 JSON 格式的运行数据文件兼容。
// ----------------------------------------------------------------

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// `AudioInfo` 结构体存储通过 ffprobe 从单个音频文件中提取的流信息。
///
/// 每次运行都会对每个文件重新探测，结果不做任何持久化。
///
/// 所有可选字段都定义为 `Option`，因为 ffprobe 在分析过程中可能因各种原因
/// (如容器损坏、字段缺失等) 而无法提取某个特定指标。
#[derive(Debug, Clone, Serialize)]
pub struct AudioInfo {
    /// 音频编码器标识（如 "mp3"、"alac"、"pcm_s16le"）。
    pub codec: String,

    /// 码率（kbps）。无损源通常也会带有容器码率，仅作展示用途；
    /// `None` 表示 ffprobe 未能给出码率（常见于 VBR 文件）。
    pub bitrate_kbps: Option<u32>,

    /// 该编码是否为无损编码。由编码器标识按固定分类表推导，
    /// 未知编码一律按有损处理，宁可多转一次也不漏转。
    pub is_lossless: bool,

    /// 音频时长（秒）。
    pub duration_seconds: Option<f64>,

    /// 采样率（Hz）。
    pub sample_rate_hz: Option<u32>,

    /// 声道数。
    pub channels: Option<u32>,
}

impl AudioInfo {
    /// 生成形如 "alac @ 891kbps" / "flac (无损)" / "mp3 (VBR)" 的来源格式标签。
    pub fn format_label(&self) -> String {
        if self.is_lossless {
            return format!("{} (无损)", self.codec);
        }
        match self.bitrate_kbps {
            Some(kbps) => format!("{} @ {kbps}kbps", self.codec),
            None => format!("{} (VBR)", self.codec),
        }
    }
}

/// `ConversionDecision` 是决策引擎的输出：对单个文件是重新编码还是按字节复制。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionDecision {
    /// 调用外部编码器重新编码到目标格式。
    Convert,
    /// 源文件已满足目标要求，原样复制（保留原容器和扩展名）。
    Copy,
}

impl fmt::Display for ConversionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionDecision::Convert => write!(f, "转换"),
            ConversionDecision::Copy => write!(f, "复制"),
        }
    }
}

/// `ErrorInfo` 记录单个文件处理失败时的错误码与完整错误信息。
///
/// 错误码取自错误信息中形如 `[E_XXX]` 的标记（如 E_PROBE、E_ENCODE、
/// E_IO、E_TAG_READ、E_TAG_WRITE），便于报告按类别统计。
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

lazy_static! {
    static ref ERROR_CODE_REGEX: Regex = Regex::new(r"\[(E_[A-Z0-9_]+)\]").unwrap();
}

impl ErrorInfo {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let message = err.to_string();
        let code = ERROR_CODE_REGEX
            .captures(&message)
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_owned()))
            .unwrap_or_else(|| "E_PIPELINE".to_owned());
        Self { code, message }
    }
}

/// `FileResult` 是核心数据模型之一：单个被发现文件的完整处理结果。
///
/// 每个文件只创建一次，创建后不再修改，由管线按顺序追加到运行结果列表。
/// 字段命名通过 `#[serde(rename = "...")]` 与导出的 `conversion-data.json`
/// 文件格式严格对应。
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    /// 源文件完整路径。
    #[serde(rename = "sourcePath")]
    pub source_path: PathBuf,

    /// 目标文件完整路径。在探测阶段就失败的文件尚未确定目标路径，
    /// 此时回填为源路径。
    #[serde(rename = "targetPath")]
    pub target_path: PathBuf,

    /// 转换决策。`None` 表示在决策之前就已失败。
    #[serde(rename = "decision")]
    pub decision: Option<ConversionDecision>,

    /// 来源格式标签（如 "alac @ 891kbps"）。
    #[serde(rename = "sourceFormat")]
    pub source_format_label: String,

    /// 目标格式标签（如 "MP3 @ 320kbps"）。
    #[serde(rename = "targetFormat")]
    pub target_format_label: String,

    /// 源文件大小（字节）。
    #[serde(rename = "sourceSizeBytes")]
    pub source_size_bytes: u64,

    /// 最终输出文件大小（字节）。出错的文件没有可用的输出大小，
    /// 统计时必须按"不可用"处理而不是按 0 处理。
    #[serde(rename = "finalSizeBytes")]
    pub final_size_bytes: Option<u64>,

    /// 处理失败时的错误信息；成功时为 `None`。
    #[serde(rename = "error")]
    pub error: Option<ErrorInfo>,
}

impl FileResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_converted(&self) -> bool {
        self.decision == Some(ConversionDecision::Convert) && self.error.is_none()
    }

    pub fn is_copied(&self) -> bool {
        self.decision == Some(ConversionDecision::Copy) && self.error.is_none()
    }

    /// 该文件节省的字节数（可为负，表示体积增大）。出错文件返回 `None`。
    pub fn bytes_saved(&self) -> Option<i64> {
        self.final_size_bytes
            .map(|final_size| self.source_size_bytes as i64 - final_size as i64)
    }
}

/// `RunResult` 是整次运行的聚合根：运行参数、起止时间和全部文件结果。
///
/// 它只在报告生成期间被消费，报告写出后即丢弃，不作为应用状态持久化。
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    #[serde(rename = "sourceDir")]
    pub source_dir: PathBuf,

    #[serde(rename = "targetDir")]
    pub target_dir: PathBuf,

    /// 目标编码标识（如 "mp3"）。
    #[serde(rename = "targetCodec")]
    pub target_codec: String,

    /// 目标码率（kbps）。无损目标（flac）为 `None`。
    #[serde(rename = "targetBitrateKbps")]
    pub target_bitrate: Option<u32>,

    #[serde(rename = "files")]
    pub files: Vec<FileResult>,

    #[serde(rename = "startedAt")]
    pub started_at: String,

    #[serde(rename = "finishedAt")]
    pub finished_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_format_label_lossless() {
        let info = AudioInfo {
            codec: "alac".to_string(),
            bitrate_kbps: Some(891),
            is_lossless: true,
            duration_seconds: Some(240.0),
            sample_rate_hz: Some(44_100),
            channels: Some(2),
        };
        assert_eq!(info.format_label(), "alac (无损)");
    }

    #[test]
    fn test_format_label_lossy_with_bitrate() {
        let info = AudioInfo {
            codec: "mp3".to_string(),
            bitrate_kbps: Some(192),
            is_lossless: false,
            duration_seconds: None,
            sample_rate_hz: None,
            channels: None,
        };
        assert_eq!(info.format_label(), "mp3 @ 192kbps");
    }

    #[test]
    fn test_format_label_lossy_without_bitrate() {
        let info = AudioInfo {
            codec: "vorbis".to_string(),
            bitrate_kbps: None,
            is_lossless: false,
            duration_seconds: None,
            sample_rate_hz: None,
            channels: None,
        };
        assert_eq!(info.format_label(), "vorbis (VBR)");
    }

    #[test]
    fn test_error_info_extracts_code() {
        let err = anyhow!("[E_ENCODE] 编码器以非零状态退出");
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.code, "E_ENCODE");
        assert!(info.message.contains("编码器"));
    }

    #[test]
    fn test_error_info_fallback_code() {
        let err = anyhow!("没有任何标记的错误");
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.code, "E_PIPELINE");
    }

    #[test]
    fn test_bytes_saved_unavailable_on_error() {
        let result = FileResult {
            source_path: PathBuf::from("/music/a.mp3"),
            target_path: PathBuf::from("/music/a.mp3"),
            decision: None,
            source_format_label: "未知".to_string(),
            target_format_label: "MP3 @ 320kbps".to_string(),
            source_size_bytes: 1024,
            final_size_bytes: None,
            error: Some(ErrorInfo {
                code: "E_PROBE".to_string(),
                message: "[E_PROBE] 测试".to_string(),
            }),
        };
        assert!(result.is_error());
        assert_eq!(result.bytes_saved(), None);
    }
}
