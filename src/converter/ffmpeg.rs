use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use which::which;

use super::decision::TargetCodec;
use super::records::AudioInfo;

/// 单条外部命令的默认超时。超时的编码任务会被强制终止，
/// 残留的半成品输出由执行器负责清理。
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// 外部工具配置：ffmpeg 负责编码，ffprobe 负责探测。
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub command_timeout: Duration,
}

impl ToolConfig {
    /// 在系统 PATH 中定位 ffmpeg 和 ffprobe。
    pub fn locate() -> Result<Self> {
        let ffmpeg_path = which("ffmpeg").map_err(|_| {
            anyhow!(
                "错误: 在系统 PATH 中找不到 ffmpeg 可执行文件。\n\
                 请安装 FFmpeg 并确保其位于您的系统 PATH 中后重试。"
            )
        })?;
        let ffprobe_path = which("ffprobe").map_err(|_| {
            anyhow!(
                "错误: 在系统 PATH 中找不到 ffprobe 可执行文件。\n\
                 ffprobe 通常随 FFmpeg 一同安装，请检查您的 FFmpeg 安装。"
            )
        })?;

        println!("成功在系统 PATH 中找到 FFmpeg: {}", ffmpeg_path.display());
        println!("成功在系统 PATH 中找到 ffprobe: {}", ffprobe_path.display());

        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// 构造用于测试的工具配置，不做任何查找。
    #[cfg(test)]
    pub fn for_tests(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            command_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    status_ok: bool,
    stdout: String,
    stderr: String,
    status_text: String,
}

fn run_command(mut command: Command, timeout: Duration) -> Result<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().context("[E_EXEC_SPAWN] 启动外部命令失败")?;
    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("[E_EXEC_STDOUT] 无法捕获 stdout"))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("[E_EXEC_STDERR] 无法捕获 stderr"))?;

    let stdout_thread = thread::spawn(move || -> Result<Vec<u8>> {
        let mut reader = stdout_pipe;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    });

    let stderr_thread = thread::spawn(move || -> Result<Vec<u8>> {
        let mut reader = stderr_pipe;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    });

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().context("[E_EXEC_WAIT] 等待子进程失败")? {
            break status;
        }

        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();
            return Err(anyhow!(
                "[E_TIMEOUT] 外部命令执行超时 (>{}s)",
                timeout.as_secs()
            ));
        }

        thread::sleep(Duration::from_millis(25));
    };

    let stdout_bytes = stdout_thread
        .join()
        .map_err(|_| anyhow!("[E_EXEC_STDOUT] 读取 stdout 线程崩溃"))??;
    let stderr_bytes = stderr_thread
        .join()
        .map_err(|_| anyhow!("[E_EXEC_STDERR] 读取 stderr 线程崩溃"))??;

    Ok(CommandOutput {
        status_ok: status.success(),
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        status_text: status.to_string(),
    })
}

/// 探测单个音频文件，返回归一化的流信息。
///
/// 幂等且无副作用，可安全重试。文件无音频流、ffprobe 不可用或输出
/// 无法解析时返回 `[E_PROBE]` 错误。
pub fn probe(path: &Path, tools: &ToolConfig) -> Result<AudioInfo> {
    let mut command = Command::new(&tools.ffprobe_path);
    command
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("a:0")
        .arg("-show_entries")
        .arg("stream=codec_name,sample_rate,channels,bit_rate:format=bit_rate,duration")
        .arg("-of")
        .arg("json")
        .arg(path);

    let output = run_command(command, tools.command_timeout)
        .with_context(|| format!("[E_PROBE] 无法执行 ffprobe: {}", path.display()))?;
    if !output.status_ok {
        let preview = output.stderr.chars().take(300).collect::<String>();
        return Err(anyhow!(
            "[E_PROBE] ffprobe 执行失败 (status: {}): {}",
            output.status_text,
            preview
        ));
    }

    parse_probe_json(&output.stdout)
        .with_context(|| format!("[E_PROBE] 探测结果不可用: {}", path.display()))
}

fn parse_probe_json(text: &str) -> Result<AudioInfo> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| anyhow!("[E_PROBE] ffprobe JSON 解析失败"))?;

    let stream = value
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .cloned()
        .unwrap_or(Value::Null);

    let format = value.get("format").cloned().unwrap_or(Value::Null);

    let codec = parse_string(stream.get("codec_name"))
        .ok_or_else(|| anyhow!("[E_PROBE] 文件中未找到音频流"))?;

    let stream_bitrate = parse_u64(stream.get("bit_rate"));
    let format_bitrate = parse_u64(format.get("bit_rate"));
    let bitrate_kbps = stream_bitrate
        .or(format_bitrate)
        .map(|bps| ((bps as f64) / 1000.0).round() as u32);

    Ok(AudioInfo {
        is_lossless: is_lossless_codec(&codec),
        codec,
        bitrate_kbps,
        duration_seconds: parse_f64(format.get("duration")),
        sample_rate_hz: parse_u32(stream.get("sample_rate")),
        channels: parse_u32(stream.get("channels")),
    })
}

/// 按固定分类表判断编码是否无损。未知编码一律视为有损，
/// 以免漏掉本应进行的转换。
pub fn is_lossless_codec(codec: &str) -> bool {
    let codec = codec.to_ascii_lowercase();
    codec == "flac" || codec == "alac" || codec == "wav" || codec.starts_with("pcm")
}

/// 读取容器级标签（key 统一转为小写）。用于 lofty 不支持的容器（ASF/WMA）。
pub fn read_format_tags(path: &Path, tools: &ToolConfig) -> Result<HashMap<String, String>> {
    let mut command = Command::new(&tools.ffprobe_path);
    command
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format_tags")
        .arg("-of")
        .arg("json")
        .arg(path);

    let output = run_command(command, tools.command_timeout)
        .with_context(|| format!("[E_TAG_READ] 无法执行 ffprobe: {}", path.display()))?;
    if !output.status_ok {
        let preview = output.stderr.chars().take(300).collect::<String>();
        return Err(anyhow!(
            "[E_TAG_READ] 读取容器标签失败 (status: {}): {}",
            output.status_text,
            preview
        ));
    }

    let value: Value = serde_json::from_str(&output.stdout)
        .map_err(|_| anyhow!("[E_TAG_READ] ffprobe JSON 解析失败"))?;

    let mut tags = HashMap::new();
    if let Some(map) = value
        .get("format")
        .and_then(|f| f.get("tags"))
        .and_then(|t| t.as_object())
    {
        for (key, val) in map {
            if let Some(text) = val.as_str() {
                tags.insert(key.to_ascii_lowercase(), text.to_string());
            }
        }
    }
    Ok(tags)
}

/// 组装 ffmpeg 编码参数（不含程序名）。
///
/// `-map_metadata 0` 让容器级标签先行透传，之后标签处理器仍会
/// 显式地重写一遍元数据。
pub fn encode_args(
    source: &Path,
    target: &Path,
    codec: TargetCodec,
    bitrate_kbps: Option<u32>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-y".into(),
    ];

    let kbps = bitrate_kbps.unwrap_or(320);
    match codec {
        TargetCodec::Mp3 => {
            args.extend(["-c:a".into(), "libmp3lame".into(), "-b:a".into(), format!("{kbps}k")]);
        }
        TargetCodec::Aac => {
            args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), format!("{kbps}k")]);
            // M4A 容器：封面以视频流形式存在，原样复制
            args.extend(["-c:v".into(), "copy".into()]);
        }
        TargetCodec::Flac => {
            args.extend([
                "-c:a".into(),
                "flac".into(),
                "-compression_level".into(),
                "8".into(),
            ]);
        }
        TargetCodec::Opus => {
            args.extend(["-c:a".into(), "libopus".into(), "-b:a".into(), format!("{kbps}k")]);
        }
    }

    args.extend(["-map_metadata".into(), "0".into()]);

    if codec == TargetCodec::Aac {
        args.extend(["-movflags".into(), "+faststart".into(), "-f".into(), "mp4".into()]);
    }

    args.push(target.to_string_lossy().into_owned());
    args
}

/// 调用外部编码器生成目标文件。失败时返回 `[E_ENCODE]`，
/// 半成品文件的清理由调用方（执行器）负责。
pub fn encode(
    source: &Path,
    target: &Path,
    codec: TargetCodec,
    bitrate_kbps: Option<u32>,
    tools: &ToolConfig,
) -> Result<()> {
    let mut command = Command::new(&tools.ffmpeg_path);
    command.args(encode_args(source, target, codec, bitrate_kbps));

    let output = run_command(command, tools.command_timeout)
        .with_context(|| format!("[E_ENCODE] 无法执行 ffmpeg: {}", source.display()))?;
    if !output.status_ok {
        let preview = output.stderr.chars().take(500).collect::<String>();
        return Err(anyhow!(
            "[E_ENCODE] 编码器以非零状态退出 (status: {}): {}",
            output.status_text,
            preview
        ));
    }
    Ok(())
}

fn parse_u32(value: Option<&Value>) -> Option<u32> {
    parse_u64(value).and_then(|v| u32::try_from(v).ok())
}

fn parse_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(num)) => num.as_u64(),
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        _ => None,
    }
}

fn parse_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(num)) => num.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_string(value: Option<&Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_json_full() {
        let text = r#"{
            "streams": [{
                "codec_name": "alac",
                "sample_rate": "44100",
                "channels": 2,
                "bit_rate": "891000"
            }],
            "format": {
                "bit_rate": "900000",
                "duration": "245.5"
            }
        }"#;
        let info = parse_probe_json(text).expect("解析应成功");
        assert_eq!(info.codec, "alac");
        assert!(info.is_lossless);
        assert_eq!(info.bitrate_kbps, Some(891));
        assert_eq!(info.sample_rate_hz, Some(44_100));
        assert_eq!(info.channels, Some(2));
        assert_eq!(info.duration_seconds, Some(245.5));
    }

    #[test]
    fn test_parse_probe_json_falls_back_to_format_bitrate() {
        let text = r#"{
            "streams": [{"codec_name": "vorbis", "sample_rate": "48000", "channels": 2}],
            "format": {"bit_rate": "192000", "duration": "10.0"}
        }"#;
        let info = parse_probe_json(text).expect("解析应成功");
        assert_eq!(info.codec, "vorbis");
        assert!(!info.is_lossless);
        assert_eq!(info.bitrate_kbps, Some(192));
    }

    #[test]
    fn test_parse_probe_json_no_audio_stream() {
        let text = r#"{"streams": [], "format": {"duration": "1.0"}}"#;
        let err = parse_probe_json(text).expect_err("没有音频流应失败");
        assert!(err.to_string().contains("E_PROBE"));
    }

    #[test]
    fn test_is_lossless_codec_classification() {
        assert!(is_lossless_codec("flac"));
        assert!(is_lossless_codec("alac"));
        assert!(is_lossless_codec("pcm_s16le"));
        assert!(is_lossless_codec("pcm_s24le"));
        assert!(!is_lossless_codec("mp3"));
        assert!(!is_lossless_codec("aac"));
        assert!(!is_lossless_codec("opus"));
        assert!(!is_lossless_codec("vorbis"));
        assert!(!is_lossless_codec("wmav2"));
        // 未知编码按有损处理
        assert!(!is_lossless_codec("codec_of_the_future"));
    }

    #[test]
    fn test_encode_args_mp3() {
        let args = encode_args(
            Path::new("/in/a.flac"),
            Path::new("/out/a.mp3"),
            TargetCodec::Mp3,
            Some(320),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:a libmp3lame"));
        assert!(joined.contains("-b:a 320k"));
        assert!(joined.contains("-map_metadata 0"));
        assert_eq!(args.last().map(String::as_str), Some("/out/a.mp3"));
    }

    #[test]
    fn test_encode_args_flac_has_no_bitrate() {
        let args = encode_args(
            Path::new("/in/a.wav"),
            Path::new("/out/a.flac"),
            TargetCodec::Flac,
            None,
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:a flac"));
        assert!(joined.contains("-compression_level 8"));
        assert!(!joined.contains("-b:a"));
    }

    #[test]
    fn test_encode_args_aac_uses_mp4_container() {
        let args = encode_args(
            Path::new("/in/a.flac"),
            Path::new("/out/a.m4a"),
            TargetCodec::Aac,
            Some(256),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-f mp4"));
    }

    #[test]
    fn test_encode_with_bogus_ffmpeg_fails_with_encode_code() {
        let tools = ToolConfig::for_tests(
            PathBuf::from("/nonexistent/ffmpeg-for-test"),
            PathBuf::from("/nonexistent/ffprobe-for-test"),
        );
        let err = encode(
            Path::new("/in/a.flac"),
            Path::new("/out/a.mp3"),
            TargetCodec::Mp3,
            Some(320),
            &tools,
        )
        .expect_err("不存在的 ffmpeg 应失败");
        assert!(err.to_string().contains("E_ENCODE"));
    }

    #[test]
    fn test_probe_with_bogus_ffprobe_fails_with_probe_code() {
        let tools = ToolConfig::for_tests(
            PathBuf::from("/nonexistent/ffmpeg-for-test"),
            PathBuf::from("/nonexistent/ffprobe-for-test"),
        );
        let err = probe(Path::new("/in/a.mp3"), &tools).expect_err("不存在的 ffprobe 应失败");
        assert!(err.to_string().contains("E_PROBE"));
    }
}
