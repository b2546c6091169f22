use anyhow::{Context, Result};
use chrono::Local;
use csv::WriterBuilder;
use serde::Serialize;
use std::path::Path;

use super::records::{FileResult, RunResult};
use super::safe_io;
use super::stats::{ConvertedRow, Summary};

/// 报告生成器：把聚合层产出的汇总与明细渲染成 Markdown / CSV / JSON 三种
/// 落盘格式，并负责运行结束后的控制台摘要。统计数据一律来自聚合层，
/// 这里只做排版。
pub struct ReportGenerator {
    timestamp: String,
}

impl ReportGenerator {
    pub fn new() -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// 生成 Markdown 格式的转换报告。
    pub fn write_markdown(
        &self,
        run: &RunResult,
        summary: &Summary,
        rows: &[ConvertedRow],
        output_path: &Path,
    ) -> Result<()> {
        let content = self.build_markdown(run, summary, rows);
        safe_io::atomic_write_string(output_path, &content)?;
        println!("✅ Markdown 报告已保存到: {}", output_path.display());
        Ok(())
    }

    fn build_markdown(&self, run: &RunResult, summary: &Summary, rows: &[ConvertedRow]) -> String {
        let mut content = String::new();

        content.push_str("# 音乐转换报告\n\n");
        content.push_str(&format!("**生成时间:** {}\n\n", self.timestamp));

        content.push_str("## 摘要\n\n");
        content.push_str(&format!("- **源目录:** `{}`\n", run.source_dir.display()));
        content.push_str(&format!("- **目标目录:** `{}`\n", run.target_dir.display()));
        content.push_str(&format!(
            "- **目标编码:** {}\n",
            run.target_codec.to_uppercase()
        ));
        match run.target_bitrate {
            Some(kbps) => content.push_str(&format!("- **目标码率:** {kbps} kbps\n")),
            None => content.push_str("- **目标码率:** 无损\n"),
        }

        content.push_str("\n## 总体统计\n\n");
        content.push_str(&format!("- **文件总数:** {}\n", summary.total));
        content.push_str(&format!("- **已转换:** {}\n", summary.converted));
        content.push_str(&format!("- **已复制（无需转换）:** {}\n", summary.copied));
        content.push_str(&format!("- **出错:** {}\n", summary.errors));
        content.push_str(&format!("- **成功率:** {:.1}%\n", summary.success_rate));

        content.push_str("\n## 空间统计\n\n");
        content.push_str(&format!(
            "- **原始大小:** {}\n",
            format_size(summary.total_source_bytes)
        ));
        content.push_str(&format!(
            "- **最终大小:** {}\n",
            format_size(summary.total_final_bytes)
        ));
        if summary.bytes_saved >= 0 {
            content.push_str(&format!(
                "- **节省空间:** {} ({:.1}%)\n",
                format_size(summary.bytes_saved.unsigned_abs()),
                summary.percent_saved
            ));
        } else {
            content.push_str(&format!(
                "- **空间增加:** {} ({:.1}%)\n",
                format_size(summary.bytes_saved.unsigned_abs()),
                summary.percent_saved.abs()
            ));
        }

        if !rows.is_empty() {
            content.push_str("\n## 转换明细\n\n");
            content.push_str(&format!("{} 个文件从原始格式转换为目标格式。\n\n", rows.len()));
            content.push_str("| 原始文件 | 原始格式 | 目标格式 | 原始大小 | 最终大小 | 缩减 |\n");
            content.push_str("|---------|---------|---------|---------|---------|------|\n");
            for row in rows {
                content.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} |\n",
                    row.file_name,
                    row.source_format,
                    row.target_format,
                    format_size(row.source_size_bytes),
                    format_size(row.final_size_bytes),
                    format_size(row.reduction_bytes.max(0) as u64)
                ));
            }
        }

        let copied: Vec<&FileResult> = run.files.iter().filter(|f| f.is_copied()).collect();
        if !copied.is_empty() {
            content.push_str("\n## 复制的文件（无需转换）\n\n");
            for file in copied {
                content.push_str(&format!(
                    "- `{}` - 已是 {}，无需转换\n",
                    file_name_of(file),
                    file.source_format_label
                ));
            }
        }

        let failed: Vec<&FileResult> = run.files.iter().filter(|f| f.is_error()).collect();
        if !failed.is_empty() {
            content.push_str("\n## 错误\n\n");
            for file in failed {
                let message = file
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("未知错误");
                content.push_str(&format!("- `{}`: {}\n", file_name_of(file), message));
            }
        }

        content.push_str("\n## 关于本次转换\n\n");
        content.push_str(codec_description(&run.target_codec));
        content.push('\n');

        content.push_str("\n---\n*由音乐批量转换器生成*\n");
        content
    }

    /// 生成 CSV 格式的逐文件报告。
    pub fn write_csv(&self, run: &RunResult, output_path: &Path) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        {
            let mut writer = WriterBuilder::new()
                .has_headers(true)
                .from_writer(&mut buffer);

            for file in &run.files {
                let record = CsvRecord::from_result(file);
                writer.serialize(&record).context("写入CSV记录失败")?;
            }

            writer.flush().context("刷新CSV缓冲失败")?;
        }

        safe_io::atomic_write_bytes(output_path, &buffer)?;
        println!("✅ CSV报告已保存到: {}", output_path.display());
        Ok(())
    }

    /// 保存整次运行的原始 JSON 数据。
    pub fn write_json(&self, run: &RunResult, output_path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(run).context("序列化运行数据失败")?;
        safe_io::atomic_write_string(output_path, &content)?;
        println!("✅ 运行数据已保存到: {}", output_path.display());
        Ok(())
    }

    /// 在控制台显示转换结果摘要。
    pub fn display_summary(&self, summary: &Summary, target_label: &str) {
        println!("\n--- 📊 转换结果摘要 ---");
        println!(" - 目标格式: {target_label}");
        println!(" - 文件总数: {}", summary.total);
        println!(" - 已转换: {}", summary.converted);
        println!(" - 已复制（无需转换）: {}", summary.copied);
        println!(" - 出错: {}", summary.errors);
        println!(" - 成功率: {:.1}%", summary.success_rate);

        println!("\n💾 空间统计:");
        println!(" - 原始大小: {}", format_size(summary.total_source_bytes));
        println!(" - 最终大小: {}", format_size(summary.total_final_bytes));
        if summary.bytes_saved >= 0 {
            println!(
                " - 节省空间: {} ({:.1}%)",
                format_size(summary.bytes_saved.unsigned_abs()),
                summary.percent_saved
            );
        } else {
            println!(
                " - 空间增加: {} ({:.1}%)",
                format_size(summary.bytes_saved.unsigned_abs()),
                summary.percent_saved.abs()
            );
        }
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct CsvRecord {
    #[serde(rename = "源文件")]
    source_path: String,
    #[serde(rename = "处理方式")]
    action: String,
    #[serde(rename = "源格式")]
    source_format: String,
    #[serde(rename = "目标格式")]
    target_format: String,
    #[serde(rename = "源大小(字节)")]
    source_size_bytes: u64,
    #[serde(rename = "最终大小(字节)")]
    final_size_bytes: Option<u64>,
    #[serde(rename = "节省(字节)")]
    bytes_saved: Option<i64>,
    #[serde(rename = "错误码")]
    error_code: String,
    #[serde(rename = "错误信息")]
    error_message: String,
}

impl CsvRecord {
    fn from_result(file: &FileResult) -> Self {
        let action = if file.is_error() {
            "出错".to_string()
        } else {
            file.decision
                .map(|d| d.to_string())
                .unwrap_or_else(|| "出错".to_string())
        };

        Self {
            source_path: file.source_path.to_string_lossy().into_owned(),
            action,
            source_format: file.source_format_label.clone(),
            target_format: file.target_format_label.clone(),
            source_size_bytes: file.source_size_bytes,
            final_size_bytes: file.final_size_bytes,
            bytes_saved: file.bytes_saved(),
            error_code: file
                .error
                .as_ref()
                .map(|e| e.code.clone())
                .unwrap_or_default(),
            error_message: file
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        }
    }
}

fn file_name_of(file: &FileResult) -> String {
    file.source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.source_path.to_string_lossy().into_owned())
}

fn codec_description(codec: &str) -> &'static str {
    match codec.to_ascii_lowercase().as_str() {
        "mp3" => "MP3 是兼容性最广的音频格式，几乎所有设备和播放器都能播放。",
        "aac" => "AAC 在相同码率下音质优于 MP3，是 Apple 设备和流媒体服务的标准格式。",
        "flac" => "FLAC 是无损格式，在完整保留音质的同时比 WAV 节省约 40-50% 的体积。",
        "opus" => "Opus 是现代高效编码，在很低的码率下也能提供出色的音质。",
        _ => "未知格式。",
    }
}

/// 把字节数格式化为人类可读的大小。
pub fn format_size(size_bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if size_bytes < KB {
        format!("{size_bytes} B")
    } else if size_bytes < MB {
        format!("{:.1} KB", size_bytes as f64 / KB as f64)
    } else if size_bytes < GB {
        format!("{:.1} MB", size_bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", size_bytes as f64 / GB as f64)
    }
}
