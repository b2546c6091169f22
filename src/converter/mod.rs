// ----------------------------------------------------------------
// 项目: 音乐批量转换器 (Music Batch Converter)
// 模块: converter/mod.rs
// 描述: 转换管线的模块汇总。各子模块按职责划分：
//      探测 (ffmpeg) → 决策 (decision) → 执行 (execute) →
//      标签 (tags) → 编排 (pipeline) → 聚合 (stats) → 报告 (report)。
// ----------------------------------------------------------------

pub mod decision;
pub mod execute;
pub mod ffmpeg;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod safe_io;
pub mod stats;
pub mod tags;
