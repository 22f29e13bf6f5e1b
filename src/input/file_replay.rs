// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/file_replay.rs - 记录文件回放
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

//! `file:///path/records.jsonl?interval_ms=40`：按行回放保存下来的记录。
//!
//! 文件读完后订阅保持静默，由空闲超时结束会话。

use std::{
  fs::File,
  io::BufReader,
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Delivery, Line, MAX_LINE_BYTES, Subscription, next_line},
  record::{FrameRecord, RecordError},
};

#[derive(Error, Debug)]
pub enum FileReplayError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("无法打开记录文件 {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

pub struct FileReplaySubscription {
  reader: BufReader<File>,
  line: Vec<u8>,
  interval: Duration,
  delivered: u64,
  finished: bool,
}

impl FromUrlWithScheme for FileReplaySubscription {
  const SCHEME: &'static str = "file";
}

impl FromUrl for FileReplaySubscription {
  type Error = FileReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FileReplayError::SchemeMismatch);
    }

    let path = crate::url_path(url);
    let file = File::open(&path).map_err(|source| FileReplayError::Open {
      path: path.clone(),
      source,
    })?;
    let interval = url
      .query_pairs()
      .find(|(k, _)| k == "interval_ms")
      .and_then(|(_, v)| v.parse().ok())
      .map(Duration::from_millis)
      .unwrap_or_default();
    info!("回放记录文件: {} (间隔 {:?})", path, interval);

    Ok(FileReplaySubscription {
      reader: BufReader::new(file),
      line: Vec::new(),
      interval,
      delivered: 0,
      finished: false,
    })
  }
}

impl Subscription for FileReplaySubscription {
  fn poll(&mut self, timeout: Duration) -> Delivery {
    if self.finished {
      thread::sleep(timeout);
      return Delivery::Empty;
    }

    loop {
      let delivery = match next_line(&mut self.reader, &mut self.line, MAX_LINE_BYTES) {
        Ok(Line::Complete) => {
          let bytes = self.line.trim_ascii();
          if bytes.is_empty() {
            continue;
          }
          match FrameRecord::from_json_bytes(bytes) {
            Ok(record) => Delivery::Record(record),
            Err(e) => Delivery::Rejected(e),
          }
        }
        Ok(Line::TooLong) => Delivery::Rejected(RecordError::TooLarge(MAX_LINE_BYTES)),
        Ok(Line::End) => {
          info!("记录文件回放结束，共 {} 条", self.delivered);
          self.finished = true;
          return Delivery::Empty;
        }
        Err(e) => {
          warn!("读取记录文件失败: {}", e);
          return Delivery::Closed;
        }
      };

      if self.delivered > 0 && !self.interval.is_zero() {
        thread::sleep(self.interval);
      }
      self.delivered += 1;
      return delivery;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn replays_lines_then_goes_quiet() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{\"model_type\":\"ObjectDetection\",\"n_objects\":0}}").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "{{\"model_name\":\"missing type\"}}").unwrap();
    file.write_all(b"{\"model_type\":\"Open\xffPose\"}\n").unwrap();
    writeln!(file, "{{\"model_type\":\"OpenPose\",\"id\":7}}").unwrap();
    file.flush().unwrap();

    let url = Url::from_file_path(file.path()).unwrap();
    let mut subscription = FileReplaySubscription::from_url(&url).unwrap();
    let timeout = Duration::from_millis(1);

    assert!(matches!(subscription.poll(timeout), Delivery::Record(_)));
    assert!(matches!(subscription.poll(timeout), Delivery::Rejected(_)));
    assert!(matches!(subscription.poll(timeout), Delivery::Rejected(_)));
    match subscription.poll(timeout) {
      Delivery::Record(record) => assert_eq!(record.id, Some(7)),
      other => panic!("unexpected delivery: {:?}", other),
    }
    assert!(matches!(subscription.poll(timeout), Delivery::Empty));
    assert!(matches!(subscription.poll(timeout), Delivery::Empty));
  }

  #[test]
  fn missing_file_is_an_open_error() {
    let url = Url::parse("file:///definitely/not/here.jsonl").unwrap();
    assert!(matches!(
      FileReplaySubscription::from_url(&url),
      Err(FileReplayError::Open { .. })
    ));
  }
}
