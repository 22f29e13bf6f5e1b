// 该文件是 Guanlan （观澜） 项目的一部分。
// src/perf/platform.rs - 运行平台信息
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

const UNKNOWN: &str = "unknown";

/// 性能报告中附带的平台字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
  pub system: String,
  pub os_name: String,
  pub node: String,
  pub cpu_model: String,
  pub machine: String,
  pub full: String,
}

impl PlatformInfo {
  pub fn detect() -> Self {
    let system = system_name().to_string();
    let machine = std::env::consts::ARCH.to_string();
    let os_name = std::fs::read_to_string("/etc/os-release")
      .ok()
      .and_then(|text| parse_os_release(&text))
      .unwrap_or_else(|| system.clone());
    let cpu_model = cpu_model().unwrap_or_else(|| UNKNOWN.to_string());
    let node = hostname::get()
      .ok()
      .and_then(|name| name.into_string().ok())
      .filter(|name| !name.is_empty())
      .unwrap_or_else(|| UNKNOWN.to_string());
    let full = format!("{}-{}-with-{}", system, machine, os_name);

    PlatformInfo {
      system,
      os_name,
      node,
      cpu_model,
      machine,
      full,
    }
  }
}

fn system_name() -> &'static str {
  match std::env::consts::OS {
    "linux" => "Linux",
    "macos" => "Darwin",
    "windows" => "Windows",
    other => other,
  }
}

#[cfg(target_os = "linux")]
fn cpu_model() -> Option<String> {
  use procfs::{CpuInfo, Current};

  let info = CpuInfo::current().ok()?;
  info.model_name(0).map(|name| name.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn cpu_model() -> Option<String> {
  None
}

fn parse_os_release(text: &str) -> Option<String> {
  text.lines().find_map(|line| {
    line
      .strip_prefix("PRETTY_NAME=")
      .map(|value| value.trim().trim_matches('"').to_string())
  })
}
