// 该文件是 Guanlan （观澜） 项目的一部分。
// src/perf.rs - 帧间隔统计与性能报告
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::SessionIdentity;

mod platform;
pub use self::platform::PlatformInfo;

const TABLE_HEADER: [&str; 15] = [
  "Session ID",
  "Date",
  "Execution Provider",
  "Device",
  "Model type",
  "Model Name",
  "Num Iterations",
  "Overall Proc (s)",
  "Overall Proc (fps)",
  "System",
  "OS Name",
  "CPU Model",
  "CPU Type",
  "Full Platform",
  "Note",
];
const TABLE_DELIMITER: char = ',';
// 仅当字段含分隔符、引号或换行时才加引号，字段内的引号写两次；
// 以 `SEP=` 开头的字段不做处理，各列的值都不会以它开头
const TABLE_QUOTE: char = '|';
const MODEL_FILE_SUFFIX: &str = ".onnx";
// 让表格软件自动识别分隔符
const TABLE_SEPARATOR_HINT: &str = "SEP=,";
const REPORT_RULE: &str = "--------------------------------------------------------";

pub(crate) const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Error, Debug)]
pub enum PerfError {
  #[error("写入性能表失败 {path}: {source}")]
  Table {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// 单帧计时结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
  /// 与上一帧的间隔，第一帧没有
  pub interval: Option<Duration>,
  /// 取整后的瞬时帧率，第一帧为 0
  pub rate: f64,
}

/// 帧到达计时
#[derive(Debug, Default)]
pub struct RateMeter {
  previous: Option<Instant>,
  ticks: u64,
}

impl RateMeter {
  pub fn tick(&mut self, now: Instant) -> Tick {
    self.ticks += 1;
    let Some(previous) = self.previous.replace(now) else {
      return Tick {
        interval: None,
        rate: 0.0,
      };
    };

    let interval = now.saturating_duration_since(previous);
    let secs = interval.as_secs_f64();
    let rate = if secs > 0.0 { (1.0 / secs).trunc() } else { 0.0 };
    debug!("time iter={} diff={:.6} rate={}", self.ticks, secs, rate);

    Tick {
      interval: Some(interval),
      rate,
    }
  }

  pub fn last_arrival(&self) -> Option<Instant> {
    self.previous
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfStats {
  pub count: usize,
  pub avg_seconds: f64,
  /// 没有样本时为 -1
  pub avg_fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerfSummary {
  pub session_id: String,
  pub date: String,
  pub execution_provider: String,
  pub device: String,
  pub model_type: String,
  pub model_name: String,
  pub stats: PerfStats,
  pub platform: PlatformInfo,
}

impl PerfSummary {
  fn to_row(&self) -> Vec<String> {
    vec![
      self.session_id.clone(),
      self.date.clone(),
      self.execution_provider.clone(),
      self.table_device(),
      self.model_type.clone(),
      self.table_model_name(),
      self.stats.count.to_string(),
      self.stats.avg_seconds.to_string(),
      self.stats.avg_fps.to_string(),
      self.platform.system.clone(),
      self.platform.os_name.clone(),
      self.platform.cpu_model.clone(),
      self.platform.machine.clone(),
      self.platform.full.clone(),
      String::new(),
    ]
  }

  // 表中记录模型文件名
  fn table_model_name(&self) -> String {
    if self.model_name.is_empty() || self.model_name.ends_with(MODEL_FILE_SUFFIX) {
      self.model_name.clone()
    } else {
      format!("{}{}", self.model_name, MODEL_FILE_SUFFIX)
    }
  }

  // 只有 OpenVINO 区分设备
  fn table_device(&self) -> String {
    if self.execution_provider.eq_ignore_ascii_case("openvino") {
      self.device.clone()
    } else {
      String::new()
    }
  }
}

/// 会话内的帧间隔样本，只追加不删除
#[derive(Debug)]
pub struct PerfAggregator {
  identity: SessionIdentity,
  date: String,
  table: Option<PathBuf>,
  samples: Vec<f64>,
}

impl PerfAggregator {
  pub fn new(identity: SessionIdentity, table: Option<PathBuf>) -> Self {
    Self {
      identity,
      date: chrono::Local::now().format(DATE_FORMAT).to_string(),
      table,
      samples: Vec::new(),
    }
  }

  pub fn record(&mut self, secs: f64) {
    self.samples.push(secs);
  }

  pub fn summarize(&self) -> PerfStats {
    let count = self.samples.len();
    let total: f64 = self.samples.iter().sum();
    if count == 0 || total <= 0.0 {
      return PerfStats {
        count,
        avg_seconds: 0.0,
        avg_fps: -1.0,
      };
    }

    PerfStats {
      count,
      avg_seconds: round3(total / count as f64),
      avg_fps: round3(count as f64 / total),
    }
  }

  /// 输出性能报告并向性能表追加一行
  pub fn finalize(&self) -> Result<PerfSummary, PerfError> {
    let summary = PerfSummary {
      session_id: self.identity.session_id.clone(),
      date: self.date.clone(),
      execution_provider: self.identity.execution_provider.clone(),
      device: self.identity.device.clone(),
      model_type: self.identity.model_type.clone(),
      model_name: self.identity.model_name.clone(),
      stats: self.summarize(),
      platform: PlatformInfo::detect(),
    };

    log_report(&summary);

    if let Some(table) = &self.table {
      append_row(table, &summary).map_err(|source| PerfError::Table {
        path: table.clone(),
        source,
      })?;
      info!("性能数据已写入: {}", table.display());
    }

    Ok(summary)
  }
}

fn round3(value: f64) -> f64 {
  (value * 1000.0).round() / 1000.0
}

fn log_report(summary: &PerfSummary) {
  info!("");
  info!("{}", REPORT_RULE);
  info!("性能报告");
  info!("Session ID          : {}", summary.session_id);
  info!("Date                : {}", summary.date);
  info!("{}", REPORT_RULE);
  info!("Platform            : {}", summary.platform.full);
  info!("OS Name             : {}", summary.platform.os_name);
  info!("System              : {}", summary.platform.node);
  info!("CPU Model Name      : {}", summary.platform.cpu_model);
  info!("Processor Type      : {}", summary.platform.machine);
  info!("{}", REPORT_RULE);
  info!("Model Type          : {}", summary.model_type);
  info!("Model Name          : {}", summary.model_name);
  info!("Execution Provider  : {}", summary.execution_provider);
  info!("Device              : {}", summary.device);
  info!("{}", REPORT_RULE);
  info!(
    "Overall Processing Time (Ave of {} Image)    : {:.3} s / {:.2} fps",
    summary.stats.count, summary.stats.avg_seconds, summary.stats.avg_fps
  );
}

fn append_row(path: &Path, summary: &PerfSummary) -> std::io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  let write_header = !path.exists();
  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  if write_header {
    writeln!(file, "{}", TABLE_SEPARATOR_HINT)?;
    writeln!(file, "{}", format_row(TABLE_HEADER.iter().copied()))?;
  }
  writeln!(
    file,
    "{}",
    format_row(summary.to_row().iter().map(String::as_str))
  )?;

  Ok(())
}

fn format_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
  fields
    .map(|field| {
      if field.contains([TABLE_DELIMITER, TABLE_QUOTE, '\n', '\r']) {
        let escaped = field.replace(TABLE_QUOTE, "||");
        format!("{TABLE_QUOTE}{escaped}{TABLE_QUOTE}")
      } else {
        field.to_string()
      }
    })
    .collect::<Vec<_>>()
    .join(&TABLE_DELIMITER.to_string())
}
