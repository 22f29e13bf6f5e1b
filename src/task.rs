// 该文件是 Guanlan （观澜） 项目的一部分。
// src/task.rs - 订阅会话调度
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  config::SessionConfig,
  input::{Delivery, Subscribe, Subscription},
  perf::{PerfAggregator, PerfError, PerfSummary, RateMeter},
  record::FrameRecord,
  render::{FrameRenderer, RenderOutcome},
};

/// 会话使用的时间来源
pub trait Clock {
  fn now(&self) -> Instant;
  fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }

  fn sleep(&self, duration: Duration) {
    thread::sleep(duration);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
  Connecting,
  Active,
  Idle,
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
  IdleTimeout,
  StreamClosed,
  Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorOptions {
  pub connect_attempts: u32,
  pub connect_backoff: Duration,
  pub idle_window: Duration,
  /// 从未收到记录时，空闲窗口放大的倍数
  pub startup_idle_factor: u32,
  pub poll_interval: Duration,
}

impl Default for SupervisorOptions {
  fn default() -> Self {
    SupervisorOptions {
      connect_attempts: 20,
      connect_backoff: Duration::from_secs(2),
      idle_window: Duration::from_secs(5),
      startup_idle_factor: 10,
      poll_interval: Duration::from_millis(100),
    }
  }
}

impl From<&SessionConfig> for SupervisorOptions {
  fn from(config: &SessionConfig) -> Self {
    SupervisorOptions {
      connect_attempts: config.connect_attempts,
      connect_backoff: config.connect_backoff,
      idle_window: config.idle_window,
      ..Default::default()
    }
  }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
  #[error("连接失败，已尝试 {attempts} 次: {source}")]
  ConnectExhausted {
    attempts: u32,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("性能统计失败: {0}")]
  Perf(#[from] PerfError),
}

#[derive(Debug)]
pub struct SessionReport {
  /// 收到的有效记录数
  pub frames: u64,
  pub end_reason: EndReason,
  /// 仅在启用性能统计时存在
  pub summary: Option<PerfSummary>,
}

/// 订阅会话：连接重试、逐条分发、空闲超时与中断
pub struct StreamSupervisor<C: Clock = SystemClock> {
  options: SupervisorOptions,
  clock: C,
  state: SupervisorState,
  rate_meter: RateMeter,
  telemetry: Option<PerfAggregator>,
  interrupt: Option<Receiver<()>>,
  interrupted: bool,
}

impl StreamSupervisor<SystemClock> {
  pub fn new(options: SupervisorOptions) -> Self {
    Self::with_clock(options, SystemClock)
  }
}

impl<C: Clock> StreamSupervisor<C> {
  pub fn with_clock(options: SupervisorOptions, clock: C) -> Self {
    StreamSupervisor {
      options,
      clock,
      state: SupervisorState::Connecting,
      rate_meter: RateMeter::default(),
      telemetry: None,
      interrupt: None,
      interrupted: false,
    }
  }

  pub fn with_telemetry(mut self, telemetry: PerfAggregator) -> Self {
    self.telemetry = Some(telemetry);
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn state(&self) -> SupervisorState {
    self.state
  }

  pub fn run<S: Subscribe>(
    &mut self,
    subscriber: &mut S,
    url: &Url,
    renderer: &mut FrameRenderer,
  ) -> Result<SessionReport, SupervisorError> {
    self.state = SupervisorState::Connecting;
    info!("订阅 {}", url);

    let Some(mut subscription) = self.connect(subscriber, url)? else {
      return self.finish(0, EndReason::Interrupted);
    };

    self.state = SupervisorState::Active;
    let started = self.clock.now();
    let mut last_activity: Option<Instant> = None;
    let mut frames = 0u64;

    let end_reason = loop {
      if self.check_interrupt() {
        warn!("中断信号接收，退出订阅循环");
        break EndReason::Interrupted;
      }

      match subscription.poll(self.options.poll_interval) {
        Delivery::Record(record) => {
          frames += 1;
          let now = self.clock.now();
          last_activity = Some(now);
          self.dispatch(&record, now, renderer);
        }
        Delivery::Rejected(e) => {
          last_activity = Some(self.clock.now());
          warn!("丢弃无法解析的记录: {}", e);
        }
        Delivery::Empty => {}
        Delivery::Closed => {
          info!("订阅已关闭");
          break EndReason::StreamClosed;
        }
      }

      let (since, window) = match last_activity {
        Some(at) => (at, self.options.idle_window),
        None => (
          started,
          self
            .options
            .idle_window
            .saturating_mul(self.options.startup_idle_factor),
        ),
      };
      if self.clock.now().saturating_duration_since(since) > window {
        self.state = SupervisorState::Idle;
        info!("{:?} 内没有新数据，结束会话", window);
        break EndReason::IdleTimeout;
      }
    };

    self.finish(frames, end_reason)
  }

  fn connect<S: Subscribe>(
    &mut self,
    subscriber: &mut S,
    url: &Url,
  ) -> Result<Option<S::Subscription>, SupervisorError> {
    let max_attempts = self.options.connect_attempts.max(1);
    let mut attempt = 0;
    loop {
      attempt += 1;
      match subscriber.subscribe(url) {
        Ok(subscription) => {
          info!("订阅成功（第 {} 次尝试）", attempt);
          return Ok(Some(subscription));
        }
        Err(e) if attempt >= max_attempts => {
          error!("连接失败，放弃: {}", e);
          self.state = SupervisorState::Terminated;
          return Err(SupervisorError::ConnectExhausted {
            attempts: attempt,
            source: Box::new(e),
          });
        }
        Err(e) => {
          warn!(
            "连接失败 ({}/{}): {}，{:?} 后重试",
            attempt, max_attempts, e, self.options.connect_backoff
          );
        }
      }

      if self.check_interrupt() {
        warn!("中断信号接收，停止连接");
        return Ok(None);
      }
      self.clock.sleep(self.options.connect_backoff);
      if self.check_interrupt() {
        warn!("中断信号接收，停止连接");
        return Ok(None);
      }
    }
  }

  fn dispatch(&mut self, record: &FrameRecord, now: Instant, renderer: &mut FrameRenderer) {
    let tick = self.rate_meter.tick(now);
    if let (Some(telemetry), Some(interval)) = (self.telemetry.as_mut(), tick.interval) {
      telemetry.record(interval.as_secs_f64());
    }

    match renderer.render(record, tick.rate) {
      Ok(RenderOutcome::Skipped(reason)) => {
        warn!("跳过第 {} 帧: {:?}", renderer.frame_counter(), reason)
      }
      Ok(RenderOutcome::Saved(path)) => debug!("帧已保存: {}", path.display()),
      Ok(outcome) => debug!("第 {} 帧: {:?}", renderer.frame_counter(), outcome),
      Err(e) => error!("处理第 {} 帧失败: {}", renderer.frame_counter(), e),
    }
  }

  fn check_interrupt(&mut self) -> bool {
    if !self.interrupted
      && let Some(interrupt) = &self.interrupt
    {
      self.interrupted = interrupt.try_recv().is_ok();
    }
    self.interrupted
  }

  fn finish(&mut self, frames: u64, end_reason: EndReason) -> Result<SessionReport, SupervisorError> {
    self.state = SupervisorState::Terminated;
    info!("会话结束 ({:?})，共收到 {} 条记录", end_reason, frames);

    let summary = self
      .telemetry
      .as_ref()
      .map(PerfAggregator::finalize)
      .transpose()?;

    Ok(SessionReport {
      frames,
      end_reason,
      summary,
    })
  }
}

/// 注册 Ctrl-C 处理，信号到达后 30 秒仍未退出则强制结束进程
pub fn install_interrupt_handler() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}
