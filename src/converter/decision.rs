use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::records::{AudioInfo, ConversionDecision};

/// 支持的目标编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetCodec {
    #[serde(rename = "mp3")]
    Mp3,
    #[serde(rename = "aac")]
    Aac,
    #[serde(rename = "flac")]
    Flac,
    #[serde(rename = "opus")]
    Opus,
}

impl TargetCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetCodec::Mp3 => "mp3",
            TargetCodec::Aac => "aac",
            TargetCodec::Flac => "flac",
            TargetCodec::Opus => "opus",
        }
    }

    /// 输出文件扩展名。AAC 使用 MP4 容器，因此落盘为 .m4a。
    pub fn extension(self) -> &'static str {
        match self {
            TargetCodec::Mp3 => "mp3",
            TargetCodec::Aac => "m4a",
            TargetCodec::Flac => "flac",
            TargetCodec::Opus => "opus",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, TargetCodec::Flac)
    }

    /// 生成形如 "MP3 @ 320kbps" / "FLAC (无损)" 的目标格式标签。
    pub fn format_label(self, target_bitrate: Option<u32>) -> String {
        match target_bitrate {
            Some(kbps) => format!("{} @ {kbps}kbps", self.as_str().to_uppercase()),
            None => format!("{} (无损)", self.as_str().to_uppercase()),
        }
    }
}

impl fmt::Display for TargetCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(TargetCodec::Mp3),
            "aac" | "m4a" => Ok(TargetCodec::Aac),
            "flac" => Ok(TargetCodec::Flac),
            "opus" => Ok(TargetCodec::Opus),
            _ => Err(format!("不支持的目标编码: {s}，可选: mp3/aac/flac/opus")),
        }
    }
}

/// 决定单个文件是转换还是复制。
///
/// 纯函数，规则按序匹配，命中即返回：
/// 1. 目标为无损而源为有损 → 转换。有损源转无损目标不会恢复任何信息，
///    但输出必须符合用户请求的目标格式，这是刻意保留的产品行为。
/// 2. 编码相同，且（目标无码率上限 或 源码率不超过目标码率）→ 复制。
/// 3. 源为无损而目标为有损 → 转换（无损源没有可比较的码率）。
/// 4. 源码率高于目标码率（两侧皆有损）→ 转换（降码率）。
/// 5. 其余情况 → 复制。
///
/// 未知码率按 0 参与比较。
pub fn decide(
    source: &AudioInfo,
    target_codec: TargetCodec,
    target_bitrate: Option<u32>,
) -> ConversionDecision {
    let source_codec = source.codec.to_ascii_lowercase();
    let source_bitrate = source.bitrate_kbps.unwrap_or(0);

    if target_codec.is_lossless() && !source.is_lossless {
        return ConversionDecision::Convert;
    }

    if source_codec == target_codec.as_str() {
        match target_bitrate {
            None => return ConversionDecision::Copy,
            Some(limit) if source_bitrate <= limit => return ConversionDecision::Copy,
            Some(_) => {}
        }
    }

    if source.is_lossless && !target_codec.is_lossless() {
        return ConversionDecision::Convert;
    }

    if let Some(limit) = target_bitrate {
        if source_bitrate > limit {
            return ConversionDecision::Convert;
        }
    }

    ConversionDecision::Copy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(codec: &str, bitrate_kbps: Option<u32>, is_lossless: bool) -> AudioInfo {
        AudioInfo {
            codec: codec.to_string(),
            bitrate_kbps,
            is_lossless,
            duration_seconds: Some(180.0),
            sample_rate_hz: Some(44_100),
            channels: Some(2),
        }
    }

    // ===== 规则 1: 有损源 + 无损目标 =====

    #[test]
    fn test_lossy_source_to_lossless_target_converts() {
        let decision = decide(&source("mp3", Some(320), false), TargetCodec::Flac, None);
        assert_eq!(decision, ConversionDecision::Convert);
    }

    #[test]
    fn test_low_bitrate_lossy_to_lossless_still_converts() {
        let decision = decide(&source("aac", Some(96), false), TargetCodec::Flac, None);
        assert_eq!(decision, ConversionDecision::Convert);
    }

    // ===== 规则 2: 编码相同 =====

    #[test]
    fn test_same_codec_below_target_bitrate_copies() {
        let decision = decide(&source("mp3", Some(192), false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Copy);
    }

    #[test]
    fn test_same_codec_equal_bitrate_copies() {
        let decision = decide(&source("mp3", Some(320), false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Copy);
    }

    #[test]
    fn test_same_codec_above_target_bitrate_converts() {
        let decision = decide(&source("mp3", Some(320), false), TargetCodec::Mp3, Some(192));
        assert_eq!(decision, ConversionDecision::Convert);
    }

    #[test]
    fn test_flac_source_to_flac_target_copies() {
        let decision = decide(&source("flac", Some(1024), true), TargetCodec::Flac, None);
        assert_eq!(decision, ConversionDecision::Copy);
    }

    #[test]
    fn test_same_codec_unknown_bitrate_copies() {
        // 未知码率按 0 比较，0 <= 320
        let decision = decide(&source("mp3", None, false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Copy);
    }

    // ===== 规则 3: 无损源 + 有损目标 =====

    #[test]
    fn test_lossless_source_to_lossy_target_converts() {
        let decision = decide(&source("alac", Some(891), true), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Convert);
    }

    #[test]
    fn test_lossless_source_low_container_bitrate_still_converts() {
        // 无损源不参与码率比较，即便容器码率低于目标也要转换
        let decision = decide(&source("flac", Some(300), true), TargetCodec::Opus, Some(320));
        assert_eq!(decision, ConversionDecision::Convert);
    }

    #[test]
    fn test_wav_source_to_mp3_converts() {
        let decision = decide(&source("pcm_s16le", Some(1411), true), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Convert);
    }

    // ===== 规则 4/5: 有损跨编码 =====

    #[test]
    fn test_cross_codec_above_target_bitrate_converts() {
        let decision = decide(&source("wma", Some(448), false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Convert);
    }

    #[test]
    fn test_cross_codec_below_target_bitrate_copies() {
        let decision = decide(&source("wma", Some(128), false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Copy);
    }

    #[test]
    fn test_cross_codec_equal_bitrate_copies() {
        let decision = decide(&source("vorbis", Some(320), false), TargetCodec::Mp3, Some(320));
        assert_eq!(decision, ConversionDecision::Copy);
    }

    // ===== 决定性 =====

    #[test]
    fn test_decide_is_deterministic() {
        let info = source("aac", Some(256), false);
        let first = decide(&info, TargetCodec::Opus, Some(192));
        let second = decide(&info, TargetCodec::Opus, Some(192));
        assert_eq!(first, second);
        assert_eq!(first, ConversionDecision::Convert);
    }

    // ===== TargetCodec =====

    #[test]
    fn test_target_codec_from_str() {
        assert_eq!("MP3".parse::<TargetCodec>(), Ok(TargetCodec::Mp3));
        assert_eq!("m4a".parse::<TargetCodec>(), Ok(TargetCodec::Aac));
        assert!("wav".parse::<TargetCodec>().is_err());
    }

    #[test]
    fn test_target_codec_extension() {
        assert_eq!(TargetCodec::Aac.extension(), "m4a");
        assert_eq!(TargetCodec::Opus.extension(), "opus");
    }

    #[test]
    fn test_target_format_label() {
        assert_eq!(TargetCodec::Mp3.format_label(Some(320)), "MP3 @ 320kbps");
        assert_eq!(TargetCodec::Flac.format_label(None), "FLAC (无损)");
    }
}
