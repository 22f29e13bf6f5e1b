// 该文件是 Guanlan （观澜） 项目的一部分。
// src/config.rs - 会话参数配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("缩放比例必须大于 0%")]
  InvalidRescale,
  #[error("置信度阈值必须在 0% 到 100% 之间, 实际 {0}%")]
  InvalidThreshold(u32),
  #[error("参数 {0} 必须为正数")]
  NotPositive(&'static str),
  #[error("参数 {0} 超出范围（0 到 1 天）")]
  OutOfRange(&'static str),
}

/// 空闲窗口与重连间隔的上限
const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Guanlan 参数配置，命令行未给出时从环境变量读取
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 订阅地址
  /// 支持格式:
  /// - tcp://host:port 按行分隔的 JSON 记录
  /// - file:///path/records.jsonl 回放记录文件
  #[arg(
    long,
    env = "SUBSCRIBE_URL",
    default_value = "tcp://localhost:31416",
    value_name = "URL"
  )]
  pub subscribe: Url,

  /// 是否记录性能数据
  #[arg(long, env = "LOG_PERFOMANCE", default_value = "false", action = ArgAction::Set,
        value_parser = BoolishValueParser::new(), value_name = "BOOL")]
  pub log_performance: bool,

  /// 是否水平翻转检测框
  #[arg(long, env = "ENABLE_CAMERA_FLIP", default_value = "false", action = ArgAction::Set,
        value_parser = BoolishValueParser::new(), value_name = "BOOL")]
  pub flip: bool,

  /// 显示缩放比例（百分比）
  #[arg(long, env = "DISPLAY_RESCALE", default_value_t = 50, value_name = "PERCENT")]
  pub rescale: u32,

  /// 检测置信度阈值（百分比）
  #[arg(long, env = "PROB_THRESHOLD", default_value_t = 30, value_name = "PERCENT")]
  pub prob_threshold: u32,

  #[arg(long, env = "DISPLAY_MODEL_TYPE", default_value = "")]
  pub model_type: String,

  #[arg(long, env = "DISPLAY_MODEL", default_value = "")]
  pub model_name: String,

  #[arg(long, env = "DISPLAY_EP", default_value = "")]
  pub execution_provider: String,

  #[arg(long, env = "DISPLAY_DEVICE", default_value = "")]
  pub device: String,

  /// 会话 ID，未指定时自动生成
  #[arg(long, env = "SESSION_ID")]
  pub session_id: Option<String>,

  /// 输出目录
  #[arg(long, env = "TEST_OUTPUT_SESSION", default_value = "out", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 帧图像输出目录，默认与输出目录相同
  #[arg(long, env = "TEST_OUTPUT", value_name = "DIR")]
  pub image_dir: Option<PathBuf>,

  /// 性能表文件名（位于输出目录下），为空时不写表
  #[arg(long, env = "TEST_CSV", default_value = "perfsheet.csv", value_name = "FILE")]
  pub perf_table: String,

  /// 显示输出地址，例如 gstdisplay://autovideosink
  #[arg(long, env = "DISPLAY_URL", value_name = "URL")]
  pub display: Option<Url>,

  /// 未配置显示时是否把帧保存到磁盘
  #[arg(long, default_value = "true", action = ArgAction::Set,
        value_parser = BoolishValueParser::new(), value_name = "BOOL")]
  pub save_images: bool,

  /// 无数据多少秒后结束会话
  #[arg(long, default_value_t = 5.0, value_name = "SECONDS")]
  pub idle_window: f64,

  #[arg(long, default_value_t = 20, value_name = "COUNT")]
  pub connect_attempts: u32,

  #[arg(long, default_value_t = 2.0, value_name = "SECONDS")]
  pub connect_backoff: f64,

  /// 标签字体文件
  #[arg(long, env = "DISPLAY_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 未知坐标编码视为错误，而不是按 yolo 处理
  #[arg(long, action = ArgAction::SetTrue)]
  pub strict_coords: bool,
}

/// 会话与模型标识，写入性能报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
  pub session_id: String,
  pub model_type: String,
  pub model_name: String,
  pub execution_provider: String,
  pub device: String,
}

/// 启动时确定、运行期间只读的会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub identity: SessionIdentity,
  pub subscribe_url: Url,
  pub telemetry: bool,
  pub flip_horizontal: bool,
  pub rescale: f32,
  pub prob_threshold: f64,
  pub strict_coords: bool,
  pub display: Option<Url>,
  /// 为 None 时不保存帧
  pub image_dir: Option<PathBuf>,
  /// 为 None 时不写性能表
  pub perf_table: Option<PathBuf>,
  pub font: Option<PathBuf>,
  pub idle_window: Duration,
  pub connect_attempts: u32,
  pub connect_backoff: Duration,
}

pub fn generate_session_id() -> String {
  format!(
    "{}-{}",
    chrono::Local::now().format("%Y%m%d%H%M%S"),
    std::process::id()
  )
}

impl TryFrom<Args> for SessionConfig {
  type Error = ConfigError;

  fn try_from(args: Args) -> Result<Self, Self::Error> {
    if args.rescale == 0 {
      return Err(ConfigError::InvalidRescale);
    }
    if args.prob_threshold > 100 {
      return Err(ConfigError::InvalidThreshold(args.prob_threshold));
    }
    let idle_window = Duration::try_from_secs_f64(args.idle_window)
      .ok()
      .filter(|window| !window.is_zero() && *window <= MAX_WINDOW)
      .ok_or(ConfigError::OutOfRange("idle-window"))?;
    let connect_backoff = Duration::try_from_secs_f64(args.connect_backoff)
      .ok()
      .filter(|backoff| *backoff <= MAX_WINDOW)
      .ok_or(ConfigError::OutOfRange("connect-backoff"))?;
    if args.connect_attempts == 0 {
      return Err(ConfigError::NotPositive("connect-attempts"));
    }

    let image_dir = args
      .save_images
      .then(|| args.image_dir.clone().unwrap_or_else(|| args.output_dir.clone()));
    let perf_table =
      (!args.perf_table.is_empty()).then(|| args.output_dir.join(&args.perf_table));

    Ok(SessionConfig {
      identity: SessionIdentity {
        session_id: args.session_id.unwrap_or_else(generate_session_id),
        model_type: args.model_type,
        model_name: args.model_name,
        execution_provider: args.execution_provider,
        device: args.device,
      },
      subscribe_url: args.subscribe,
      telemetry: args.log_performance,
      flip_horizontal: args.flip,
      rescale: args.rescale as f32 / 100.0,
      prob_threshold: args.prob_threshold as f64 / 100.0,
      strict_coords: args.strict_coords,
      display: args.display,
      image_dir,
      perf_table,
      font: args.font,
      idle_window,
      connect_attempts: args.connect_attempts,
      connect_backoff,
    })
  }
}
