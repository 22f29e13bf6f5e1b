// 该文件是 Guanlan （观澜） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use guanlan::{
  config::{Args, SessionConfig},
  input::UrlSubscriber,
  output::{DirectoryRecordOutput, create_display, draw},
  perf::PerfAggregator,
  render::{FrameRenderer, RenderOptions},
  task::{StreamSupervisor, SupervisorOptions, install_interrupt_handler},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let config = SessionConfig::try_from(Args::parse())?;

  info!("会话 ID: {}", config.identity.session_id);
  info!("订阅地址: {}", config.subscribe_url);
  info!("缩放比例: {}", config.rescale);
  info!("置信度阈值: {}", config.prob_threshold);

  let font = draw::load_font(config.font.as_deref());
  if font.is_none() {
    warn!("未找到可用字体，标签与状态文字将不会绘制");
  }
  let draw = draw::Draw::new(font, config.prob_threshold, config.rescale);

  let mut renderer = FrameRenderer::new(draw, RenderOptions::from(&config));
  if let Some(display_target) = &config.display {
    info!("显示输出: {}", display_target);
    renderer = renderer.with_display(create_display(display_target)?);
  }
  if let Some(dir) = &config.image_dir {
    info!("帧保存目录: {}", dir.display());
    renderer = renderer.with_store(DirectoryRecordOutput::new(dir));
  }

  let mut supervisor =
    StreamSupervisor::new(SupervisorOptions::from(&config)).with_interrupt(install_interrupt_handler()?);
  if config.telemetry {
    supervisor = supervisor.with_telemetry(PerfAggregator::new(
      config.identity.clone(),
      config.perf_table.clone(),
    ));
  }

  let report = supervisor.run(&mut UrlSubscriber, &config.subscribe_url, &mut renderer)?;
  info!(
    "会话结束: {:?}，共 {} 条记录",
    report.end_reason, report.frames
  );

  Ok(())
}
