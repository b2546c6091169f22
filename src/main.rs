// ================================================================
// 项目: 音乐批量转换器 (MusicConvert-rs)
// 文件: src/main.rs
// 作者: MusicConvert-rs 开发团队
// 版本: 1.2.0
// 描述: 程序主入口点，负责命令行解析、用户交互和转换流程协调
//
// 功能概述:
// - 支持强制模式和交互模式两种操作方式
// - 集成 ffprobe 音频探测、转换决策和 ffmpeg 编码执行
// - 转换与复制均完整保留并回写音频元数据
// - 生成 Markdown / CSV / JSON 三种格式的转换报告
// ================================================================

mod converter;

// ================================================================
// 依赖导入 (Dependencies Import)
// ================================================================

// --- 内部模块导入 (Internal Modules) ---
use crate::converter::{
    decision::TargetCodec,                     // 目标编码与决策引擎
    ffmpeg::ToolConfig,                        // 外部工具 (ffmpeg/ffprobe) 配置
    pipeline::{self, ConvertConfig, Pipeline}, // 转换管线编排
    report::ReportGenerator,                   // 报告生成模块
    stats,                                     // 结果聚合模块
};

// --- 外部依赖导入 (External Dependencies) ---
use anyhow::{anyhow, Context, Result}; // 错误处理库，提供丰富的错误上下文
use chrono::Local; // 时间处理库，用于显示转换开始/结束时间
use clap::Parser; // 命令行参数解析库
use indicatif::{ProgressBar, ProgressStyle}; // 进度条显示库
use std::fs; // 文件系统操作
use std::io::{self, Write}; // 输入输出操作
use std::path::PathBuf; // 路径处理
use std::str::FromStr; // 字符串解析

// ================================================================
// 命令行接口定义 (Command Line Interface Definition)
// ================================================================

/// 程序命令行接口结构体
///
/// 使用 clap 库定义命令行参数解析规则。支持两种运行模式：
/// 1. 强制/直接模式：通过 --force 或 --codec/--bitrate 指定目标格式
/// 2. 交互模式：未指定目标格式时，进入菜单驱动的格式选择
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "一个基于 FFmpeg 的纯 Rust 音乐批量转换工具",
    long_about = "该工具递归扫描源目录中的音频文件，按目标编码与码率逐个判断转换或复制，\
                  转换与复制均完整保留并回写元数据，最后生成 Markdown、CSV 和 JSON 三种格式\
                  的转换报告。未指定 --force 或 --codec/--bitrate 时进入交互模式选择目标格式。"
)]
struct Cli {
    /// 包含音乐文件的源目录
    #[arg(long, value_name = "DIR", default_value = "music")]
    source: PathBuf,

    /// 转换输出的目标目录
    #[arg(long, value_name = "DIR", default_value = "music-converted")]
    target: PathBuf,

    /// 目标编码 (mp3/aac/flac/opus)，指定后跳过交互选择
    #[arg(long, value_name = "CODEC")]
    codec: Option<String>,

    /// 目标码率 (kbps)，FLAC 目标下被忽略
    #[arg(long, value_name = "KBPS")]
    bitrate: Option<u32>,

    /// 强制模式：跳过所有交互，使用预设 MP3 @ 320kbps
    #[arg(long)]
    force: bool,

    /// 试运行：只显示将要执行的操作，不实际转换
    #[arg(long)]
    dry_run: bool,
}

// ================================================================
// 目标格式解析 (Target Format Resolution)
// ================================================================

/// 把命令行参数解析为显式的目标格式配置。
///
/// 强制模式的默认值 (mp3/320) 在这里一次性落定为配置值，
/// 管线内部不再出现任何隐式默认。
fn resolve_preferences(cli: &Cli) -> Result<(TargetCodec, Option<u32>)> {
    if cli.force || cli.codec.is_some() || cli.bitrate.is_some() {
        let codec = match &cli.codec {
            Some(text) => TargetCodec::from_str(text).map_err(|e| anyhow!(e))?,
            None => TargetCodec::Mp3,
        };
        let bitrate = resolve_bitrate(codec, cli.bitrate);
        if codec.is_lossless() && cli.bitrate.is_some() {
            println!("💡 FLAC 为无损目标，已忽略 --bitrate 参数");
        }
        println!("使用预设: {}", codec.format_label(bitrate));
        Ok((codec, bitrate))
    } else {
        get_codec_preferences_from_user()
    }
}

fn resolve_bitrate(codec: TargetCodec, requested: Option<u32>) -> Option<u32> {
    if codec.is_lossless() {
        None
    } else {
        Some(requested.unwrap_or(320))
    }
}

/// 交互式目标格式选择
///
/// 提供用户友好的格式选择体验，包括：
/// - 清晰的编码选项和适用场景提示
/// - 码率输入的范围校验
/// - 循环输入直到获得有效选择
fn get_codec_preferences_from_user() -> Result<(TargetCodec, Option<u32>)> {
    println!("\n--- 🎵 目标格式选择 ---");
    println!("1. MP3  (兼容性最佳)");
    println!("2. AAC  (同码率下音质更佳)");
    println!("3. FLAC (无损)");
    println!("4. Opus (低码率高效率)");

    let codec = loop {
        print!("请选择目标编码 (1-4，默认 1): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        match input.trim() {
            "" | "1" => break TargetCodec::Mp3,
            "2" => break TargetCodec::Aac,
            "3" => break TargetCodec::Flac,
            "4" => break TargetCodec::Opus,
            other => eprintln!("❌ 无效的选择: {other}，请输入 1-4"),
        }
    };

    if codec.is_lossless() {
        println!("✅ 已选择 {}", codec.format_label(None));
        return Ok((codec, None));
    }

    let bitrate = loop {
        print!("请输入目标码率 kbps (常用 128/192/256/320，默认 320): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let text = input.trim();
        if text.is_empty() {
            break 320;
        }
        match text.parse::<u32>() {
            Ok(kbps) if (32..=512).contains(&kbps) => break kbps,
            Ok(kbps) => eprintln!("❌ 码率超出合理范围 (32-512): {kbps}"),
            Err(_) => eprintln!("❌ 无法解析的码率: {text}"),
        }
    };

    println!("✅ 已选择 {}", codec.format_label(Some(bitrate)));
    Ok((codec, Some(bitrate)))
}

// ================================================================
// 核心转换流程 (Core Conversion Flow)
// ================================================================

/// 对配置指定的源目录执行完整的转换流程。
fn run_conversion(config: &ConvertConfig) -> Result<()> {
    println!("\n--- ✨ 开始执行转换流程 ---");
    println!("转换开始时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    // --- 环境检查：定位外部工具 ---
    let tools = ToolConfig::locate()?;

    // --- 文件扫描 ---
    println!("正在扫描文件夹: {}", config.source_dir.display());
    let audio_files = pipeline::scan_audio_files(&config.source_dir);

    if audio_files.is_empty() {
        println!("在指定路径下没有找到支持的音频文件。");
        return Ok(());
    }

    let total_files = audio_files.len();
    println!("扫描完成，找到 {total_files} 个音频文件待处理。开始顺序处理...");

    println!("\n📋 转换预览:");
    println!(" - 源目录: {}", config.source_dir.display());
    println!(" - 目标目录: {}", config.target_dir.display());
    println!(
        " - 目标格式: {}",
        config.target_codec.format_label(config.target_bitrate)
    );
    if config.dry_run {
        println!(" - 模式: 试运行（不写任何文件）");
    }

    if !config.dry_run {
        fs::create_dir_all(&config.target_dir)
            .with_context(|| format!("无法创建目标目录: {}", config.target_dir.display()))?;
    }

    // --- 顺序处理 ---
    let bar = ProgressBar::new(total_files as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) - {msg}")
            .unwrap()
            .progress_chars("#>- "),
    );

    let pipeline = Pipeline::new(config, &tools);
    let run = pipeline.run(&audio_files, |result| {
        let name = result
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(error) = &result.error {
            bar.println(format!("❌ {name}: {}", error.message));
        } else if result.is_converted() {
            bar.println(format!(
                "🔄 {name}: {} -> {}",
                result.source_format_label, result.target_format_label
            ));
        } else {
            bar.println(format!("📋 {name}: 已满足目标格式，直接复制"));
        }
        bar.set_message(name);
        bar.inc(1);
    });
    bar.finish_with_message("全部文件处理完成。");

    // --- 聚合与摘要 ---
    let summary = stats::aggregate(&run);
    let rows = stats::converted_rows(&run);

    let generator = ReportGenerator::new();
    generator.display_summary(
        &summary,
        &config.target_codec.format_label(config.target_bitrate),
    );

    // --- 生成报告 ---
    if config.dry_run {
        println!("\n💡 试运行完成，没有实际转换任何文件。");
        println!("💡 去掉 --dry-run 参数即可执行真正的转换。");
    } else {
        generator.write_markdown(
            &run,
            &summary,
            &rows,
            &config.target_dir.join("conversion-report.md"),
        )?;
        generator.write_csv(&run, &config.target_dir.join("conversion-report.csv"))?;
        generator.write_json(&run, &config.target_dir.join("conversion-data.json"))?;
    }

    // --- 任务结束 ---
    println!("\n转换结束时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("--- ✅ 转换流程顺利完成 ---");

    Ok(())
}

// --- 程序入口 ---

/// 程序的主函数：校验源目录，解析目标格式偏好，然后启动转换流程。
fn main() -> Result<()> {
    let cli = Cli::parse();

    println!("欢迎使用音乐批量转换器 (Rust 重构版)");

    if !cli.source.is_dir() {
        return Err(anyhow!(
            "错误: 源目录 \"{}\" 不是一个有效的文件夹或不存在。",
            cli.source.display()
        ));
    }
    let source_dir = cli.source.canonicalize()?;

    let (target_codec, target_bitrate) = resolve_preferences(&cli)?;

    let config = ConvertConfig {
        source_dir,
        target_dir: cli.target.clone(),
        target_codec,
        target_bitrate,
        dry_run: cli.dry_run,
    };

    run_conversion(&config)
}
