use anyhow::Result;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::decision::{decide, TargetCodec};
use super::execute;
use super::ffmpeg::{self, ToolConfig};
use super::records::{ConversionDecision, ErrorInfo, FileResult, RunResult};
use super::tags;

/// 支持的音频文件扩展名列表。不在表内的文件在发现阶段被静默跳过。
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "m4a", "aac", "flac", "ogg", "wav", "wma"];

/// 单次运行的完整配置。
///
/// 命令行/交互层在管线构造之前完成全部解析与校验，强制模式的默认值
/// (mp3/320) 也在那里落定为显式配置，这里不存在任何模块级可变状态。
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub target_codec: TargetCodec,
    /// 无损目标（flac）为 `None`。
    pub target_bitrate: Option<u32>,
    /// 试运行：只探测和决策，不调用编码器、不写任何文件。
    pub dry_run: bool,
}

/// 递归扫描源目录，返回按字典序排好的音频文件列表。
///
/// 隐藏文件和隐藏目录（以 `.` 开头的路径组件）被静默跳过；
/// 固定顺序保证对同一棵源目录树的重复试运行产生完全相同的报告。
pub fn scan_audio_files(source_dir: &Path) -> Vec<PathBuf> {
    let mut audio_files: Vec<PathBuf> = WalkDir::new(source_dir)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();

    audio_files.sort();
    audio_files
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// 转换管线：逐个文件执行 探测 → 决策 → 转换/复制 → 元数据回写，
/// 并把每个文件的结果追加到运行结果中。
///
/// 单个文件在任何一步失败都会短路该文件余下的步骤、记录错误，
/// 然后继续处理下一个文件；一次运行总能完成并产出报告。
pub struct Pipeline<'a> {
    config: &'a ConvertConfig,
    tools: &'a ToolConfig,
}

/// 处理过程中逐步收集的轨迹，用于在失败时也能尽量填充结果记录。
#[derive(Default)]
struct FileTrace {
    decision: Option<ConversionDecision>,
    target_path: Option<PathBuf>,
    source_label: Option<String>,
    final_size: Option<u64>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ConvertConfig, tools: &'a ToolConfig) -> Self {
        Self { config, tools }
    }

    /// 顺序处理全部文件。`observe` 在每个文件记录完成后被调用一次，
    /// 供调用方更新进度显示。
    pub fn run<F>(&self, files: &[PathBuf], mut observe: F) -> RunResult
    where
        F: FnMut(&FileResult),
    {
        let started_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut results = Vec::with_capacity(files.len());
        for source in files {
            let result = self.process_file(source);
            observe(&result);
            results.push(result);
        }

        RunResult {
            source_dir: self.config.source_dir.clone(),
            target_dir: self.config.target_dir.clone(),
            target_codec: self.config.target_codec.as_str().to_string(),
            target_bitrate: self.config.target_bitrate,
            files: results,
            started_at,
            finished_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// 处理单个文件，永不失败：任何错误都折叠进返回的结果记录。
    pub fn process_file(&self, source: &Path) -> FileResult {
        let source_size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);

        let mut trace = FileTrace::default();
        let error = match self.try_process(source, &mut trace) {
            Ok(()) => None,
            Err(err) => Some(ErrorInfo::from_error(&err)),
        };

        // 出错的文件没有可用的最终大小
        let final_size_bytes = if error.is_none() { trace.final_size } else { None };

        FileResult {
            source_path: source.to_path_buf(),
            target_path: trace.target_path.unwrap_or_else(|| source.to_path_buf()),
            decision: trace.decision,
            source_format_label: trace.source_label.unwrap_or_else(|| "未知".to_string()),
            target_format_label: self
                .config
                .target_codec
                .format_label(self.config.target_bitrate),
            source_size_bytes: source_size,
            final_size_bytes,
            error,
        }
    }

    fn try_process(&self, source: &Path, trace: &mut FileTrace) -> Result<()> {
        let info = ffmpeg::probe(source, self.tools)?;
        trace.source_label = Some(info.format_label());

        let decision = decide(&info, self.config.target_codec, self.config.target_bitrate);
        trace.decision = Some(decision);

        let target = execute::output_path(
            &self.config.source_dir,
            &self.config.target_dir,
            source,
            decision,
            self.config.target_codec,
        )?;
        trace.target_path = Some(target.clone());

        // 元数据始终从原始源文件读取，在输出文件就绪后显式回写，
        // 复制的文件也不例外
        let metadata = tags::read_metadata(source, self.tools)?;

        let projected_size = execute::execute(
            decision,
            source,
            &target,
            self.config.target_codec,
            self.config.target_bitrate,
            self.config.dry_run,
            self.tools,
        )?;

        if self.config.dry_run {
            trace.final_size = Some(projected_size);
            return Ok(());
        }

        tags::write_metadata(&target, &metadata)?;

        // 标签回写可能改变文件体积，以落盘后的实际大小为准
        trace.final_size = Some(execute::file_size(&target)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn bogus_tools() -> ToolConfig {
        ToolConfig::for_tests(
            PathBuf::from("/nonexistent/ffmpeg-for-test"),
            PathBuf::from("/nonexistent/ffprobe-for-test"),
        )
    }

    fn config(source_dir: &Path, target_dir: &Path) -> ConvertConfig {
        ConvertConfig {
            source_dir: source_dir.to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            target_codec: TargetCodec::Mp3,
            target_bitrate: Some(320),
            dry_run: false,
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("b 专辑")).expect("建子目录");
        fs::create_dir_all(dir.path().join(".hidden_dir")).expect("建隐藏目录");
        fs::write(dir.path().join("z.mp3"), b"x").expect("写文件");
        fs::write(dir.path().join("A.FLAC"), b"x").expect("写文件");
        fs::write(dir.path().join("notes.txt"), b"x").expect("写文件");
        fs::write(dir.path().join(".hidden.mp3"), b"x").expect("写文件");
        fs::write(dir.path().join("b 专辑").join("track.m4a"), b"x").expect("写文件");
        fs::write(dir.path().join(".hidden_dir").join("c.mp3"), b"x").expect("写文件");

        let files = scan_audio_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names.len(), 3);
        // 字典序，大写扩展名同样被识别，隐藏文件与隐藏目录被跳过
        assert!(names.contains(&"A.FLAC".to_string()));
        assert!(names.contains(&"z.mp3".to_string()));
        assert!(names.iter().any(|n| n.ends_with("track.m4a")));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_scan_empty_directory() {
        let dir = TempDir::new().expect("tempdir");
        assert!(scan_audio_files(dir.path()).is_empty());
    }

    #[test]
    fn test_probe_failure_is_recorded_not_propagated() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("song.mp3");
        fs::write(&source, b"not audio").expect("写文件");
        let target_root = dir.path().join("out");

        let config = config(dir.path(), &target_root);
        let tools = bogus_tools();
        let pipeline = Pipeline::new(&config, &tools);

        let result = pipeline.process_file(&source);
        let error = result.error.expect("探测必然失败");
        assert_eq!(error.code, "E_PROBE");
        assert_eq!(result.decision, None);
        assert_eq!(result.final_size_bytes, None);
        assert_eq!(result.source_size_bytes, 9);
        // 尚未决策，目标路径回填为源路径
        assert_eq!(result.target_path, source);
    }

    #[test]
    fn test_run_survives_every_file_failing() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.mp3"), b"x").expect("写文件");
        fs::write(dir.path().join("b.flac"), b"x").expect("写文件");
        let target_root = dir.path().join("out");

        let config = config(dir.path(), &target_root);
        let tools = bogus_tools();
        let pipeline = Pipeline::new(&config, &tools);

        let files = scan_audio_files(dir.path());
        let mut observed = 0usize;
        let run = pipeline.run(&files, |_| observed += 1);

        assert_eq!(observed, 2);
        assert_eq!(run.files.len(), 2);
        assert!(run.files.iter().all(|f| f.is_error()));
        assert!(!run.started_at.is_empty());
        assert!(!run.finished_at.is_empty());
    }
}
