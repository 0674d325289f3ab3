//! hwdec-cli - 解码编排回放工具
//!
//! 读取 JSON 帧参数轨迹, 在模拟设备上驱动 HEVC 解码编排,
//! 输出每帧的阶段路径、命令数量、码流拷贝次数与状态.

mod replay;

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hwdec::logging::{self, LoggingConfig};
use hwdec_hevc::{DecoderConfig, Generation};

use replay::{FrameSummary, ReplayTrace, run_replay};

#[derive(Parser, Debug)]
#[command(name = "hwdec-cli", version, about = "硬件解码编排回放工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 回放帧参数轨迹
    Replay(ReplayArgs),
}

#[derive(clap::Args, Debug)]
struct ReplayArgs {
    /// 轨迹文件 (JSON)
    trace: PathBuf,

    /// 解码器配置文件 (JSON), 命令行选项覆盖其中的字段
    #[arg(long)]
    config: Option<PathBuf>,

    /// 硬件代际 (gen9 / gen11 / gen12)
    #[arg(long, value_parser = parse_generation)]
    generation: Option<Generation>,

    /// 视频引擎数量
    #[arg(long)]
    pipes: Option<u8>,

    /// 短格式码流 (启用预处理通道)
    #[arg(long)]
    short_format: bool,

    /// 以 JSON 输出状态报告
    #[arg(long)]
    json: bool,
}

fn parse_generation(value: &str) -> Result<Generation, String> {
    match value.to_ascii_lowercase().as_str() {
        "gen9" | "9" => Ok(Generation::Gen9),
        "gen11" | "11" => Ok(Generation::Gen11),
        "gen12" | "12" => Ok(Generation::Gen12),
        other => Err(format!("未知的硬件代际: {other}")),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(LoggingConfig::for_cli("hwdec-cli", cli.verbose)) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    let result = match &cli.command {
        Command::Replay(args) => replay_command(args),
    };
    if let Err(e) = result {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &ReplayArgs) -> Result<DecoderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("解析配置文件失败, path={}", path.display()))?
        }
        None => DecoderConfig::default(),
    };
    if let Some(generation) = args.generation {
        config.generation = generation;
    }
    if let Some(pipes) = args.pipes {
        config.num_vdbox = pipes;
    }
    if args.short_format {
        config.short_format = true;
    }
    Ok(config)
}

fn replay_command(args: &ReplayArgs) -> Result<()> {
    let config = load_config(args)?;
    let text = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("读取轨迹文件失败, path={}", args.trace.display()))?;
    let trace: ReplayTrace = serde_json::from_str(&text)
        .with_context(|| format!("解析轨迹文件失败, path={}", args.trace.display()))?;

    log::info!(
        "回放 {} 帧: {}, {} 个视频引擎",
        trace.frames.len(),
        config.generation,
        config.num_vdbox
    );
    let outcome = run_replay(config, &trace)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.reports)?);
        return Ok(());
    }
    print_summaries(&outcome.frames);
    Ok(())
}

fn print_summaries(frames: &[FrameSummary]) {
    println!(
        "{:>5}  {:<10}  {:>5}  {:>5}  {:<10}  phases",
        "frame", "status", "cmds", "copy", "mode"
    );
    for frame in frames {
        println!(
            "{:>5}  {:<10}  {:>5}  {:>5}  {:<10}  {}",
            frame.index,
            frame.status,
            frame.commands,
            frame.copy_passes,
            frame.mode,
            frame.phases.join(" -> ")
        );
        if let Some(error) = &frame.error {
            println!("       {error}");
        }
    }
}
