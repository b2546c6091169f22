use serde::Serialize;

use super::records::RunResult;

/// 整次运行的汇总统计，供控制台摘要和各类报告共用。
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    #[serde(rename = "totalFiles")]
    pub total: usize,
    #[serde(rename = "converted")]
    pub converted: usize,
    #[serde(rename = "copied")]
    pub copied: usize,
    #[serde(rename = "errors")]
    pub errors: usize,

    /// 全部被发现文件的源大小之和（字节）。
    #[serde(rename = "totalSourceBytes")]
    pub total_source_bytes: u64,

    /// 有可用输出的文件的最终大小之和（字节），出错文件不计入。
    #[serde(rename = "totalFinalBytes")]
    pub total_final_bytes: u64,

    /// 节省的字节数，可为负（体积增大）。只在有可用输出的文件上计算：
    /// 出错文件的最终大小是"不可用"而不是 0，两侧都要剔除。
    #[serde(rename = "bytesSaved")]
    pub bytes_saved: i64,

    /// 节省百分比，分母为 0 时取 0，避免除零。
    #[serde(rename = "percentSaved")]
    pub percent_saved: f64,

    /// 成功率 = (总数 − 出错数) / 总数 × 100，空运行取 0。
    #[serde(rename = "successRate")]
    pub success_rate: f64,
}

/// 转换明细表中的一行：只包含决策为转换且成功完成的文件。
/// 复制和出错的文件不进入明细表，但仍计入汇总。
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedRow {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "sourceFormat")]
    pub source_format: String,
    #[serde(rename = "targetFormat")]
    pub target_format: String,
    #[serde(rename = "sourceSizeBytes")]
    pub source_size_bytes: u64,
    #[serde(rename = "finalSizeBytes")]
    pub final_size_bytes: u64,
    #[serde(rename = "reductionBytes")]
    pub reduction_bytes: i64,
}

/// 把逐文件结果归约为汇总统计。
pub fn aggregate(run: &RunResult) -> Summary {
    let total = run.files.len();
    let converted = run.files.iter().filter(|f| f.is_converted()).count();
    let copied = run.files.iter().filter(|f| f.is_copied()).count();
    let errors = run.files.iter().filter(|f| f.is_error()).count();

    let total_source_bytes: u64 = run.files.iter().map(|f| f.source_size_bytes).sum();

    let mut accounted_source_bytes: u64 = 0;
    let mut total_final_bytes: u64 = 0;
    for file in &run.files {
        if let Some(final_size) = file.final_size_bytes {
            accounted_source_bytes += file.source_size_bytes;
            total_final_bytes += final_size;
        }
    }

    let bytes_saved = accounted_source_bytes as i64 - total_final_bytes as i64;
    let percent_saved = if accounted_source_bytes > 0 {
        bytes_saved as f64 / accounted_source_bytes as f64 * 100.0
    } else {
        0.0
    };
    let success_rate = if total > 0 {
        (total - errors) as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Summary {
        total,
        converted,
        copied,
        errors,
        total_source_bytes,
        total_final_bytes,
        bytes_saved,
        percent_saved,
        success_rate,
    }
}

/// 提取转换明细行，保持运行中的文件顺序。
pub fn converted_rows(run: &RunResult) -> Vec<ConvertedRow> {
    run.files
        .iter()
        .filter(|f| f.is_converted())
        .filter_map(|f| {
            let final_size = f.final_size_bytes?;
            Some(ConvertedRow {
                file_name: f
                    .source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| f.source_path.to_string_lossy().into_owned()),
                source_format: f.source_format_label.clone(),
                target_format: f.target_format_label.clone(),
                source_size_bytes: f.source_size_bytes,
                final_size_bytes: final_size,
                reduction_bytes: f.source_size_bytes as i64 - final_size as i64,
            })
        })
        .collect()
}
