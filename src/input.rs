// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input.rs - 推理结果订阅
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
  io::{BufRead, Read},
  time::Duration,
};

use thiserror::Error;
use url::Url;

use crate::record::{FrameRecord, RecordError};

#[cfg(feature = "tcp_input")]
mod tcp_json;
#[cfg(feature = "tcp_input")]
pub use self::tcp_json::{TcpJsonError, TcpJsonSubscription};

#[cfg(feature = "file_replay")]
mod file_replay;
#[cfg(feature = "file_replay")]
pub use self::file_replay::{FileReplayError, FileReplaySubscription};

/// 单条记录（含 base64 图像）的字节上限
pub(crate) const MAX_LINE_BYTES: u64 = 64 * 1024 * 1024;

/// 一次轮询的结果
#[derive(Debug)]
pub enum Delivery {
  Record(FrameRecord),
  /// 收到了数据但无法解析为记录
  Rejected(RecordError),
  /// 超时内没有数据
  Empty,
  /// 对端已关闭
  Closed,
}

/// 已建立的订阅，由调用方循环拉取
pub trait Subscription {
  /// 最多阻塞 `timeout`
  fn poll(&mut self, timeout: Duration) -> Delivery;
}

impl<T: Subscription + ?Sized> Subscription for Box<T> {
  fn poll(&mut self, timeout: Duration) -> Delivery {
    (**self).poll(timeout)
  }
}

/// 建立订阅
pub trait Subscribe {
  type Subscription: Subscription;
  type Error: std::error::Error + Send + Sync + 'static;

  fn subscribe(&mut self, url: &Url) -> Result<Self::Subscription, Self::Error>;
}

#[derive(Error, Debug)]
pub enum SubscribeError {
  #[cfg(feature = "tcp_input")]
  #[error("TCP 订阅错误: {0}")]
  TcpJsonError(#[from] TcpJsonError),
  #[cfg(feature = "file_replay")]
  #[error("回放文件错误: {0}")]
  FileReplayError(#[from] FileReplayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择传输方式
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlSubscriber;

impl Subscribe for UrlSubscriber {
  type Subscription = Box<dyn Subscription>;
  type Error = SubscribeError;

  fn subscribe(&mut self, url: &Url) -> Result<Self::Subscription, Self::Error> {
    #[cfg(feature = "tcp_input")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == TcpJsonSubscription::SCHEME {
        return Ok(Box::new(TcpJsonSubscription::from_url(url)?));
      }
    }
    #[cfg(feature = "file_replay")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == FileReplaySubscription::SCHEME {
        return Ok(Box::new(FileReplaySubscription::from_url(url)?));
      }
    }
    Err(SubscribeError::SchemeMismatch(url.scheme().to_string()))
  }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
  Complete,
  /// 超出上限，该行剩余部分已被跳过
  TooLong,
  End,
}

/// 按字节读取一行（含换行符），不要求 UTF-8
pub(crate) fn next_line<R: BufRead>(
  reader: &mut R,
  line: &mut Vec<u8>,
  limit: u64,
) -> std::io::Result<Line> {
  line.clear();
  let read = reader.by_ref().take(limit).read_until(b'\n', line)?;
  if read == 0 {
    return Ok(Line::End);
  }
  if line.ends_with(b"\n") || (read as u64) < limit {
    return Ok(Line::Complete);
  }
  reader.skip_until(b'\n')?;
  Ok(Line::TooLong)
}
