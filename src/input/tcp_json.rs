// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/tcp_json.rs - TCP 按行 JSON 订阅
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

//! `tcp://host:port`：每行一条 JSON 记录。
//!
//! 读取线程把解析结果放入有界队列，订阅方用 [`Subscription::poll`] 拉取；
//! 队列满时读取线程阻塞，形成背压。

use std::{
  io::BufReader,
  net::TcpStream,
  sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
  thread::{self, JoinHandle},
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

const RECORD_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum TcpJsonError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("缺少主机或端口: {0}")]
  MissingAddress(String),
  #[error("连接失败: {0}")]
  Connect(#[from] std::io::Error),
}

pub struct TcpJsonSubscription {
  receiver: Receiver<Delivery>,
  peer: String,
  _reader: JoinHandle<()>,
}

impl FromUrlWithScheme for TcpJsonSubscription {
  const SCHEME: &'static str = "tcp";
}

impl FromUrl for TcpJsonSubscription {
  type Error = TcpJsonError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TcpJsonError::SchemeMismatch);
    }
    let (Some(host), Some(port)) = (url.host_str(), url.port()) else {
      return Err(TcpJsonError::MissingAddress(url.to_string()));
    };

    let stream = TcpStream::connect((host, port))?;
    let peer = format!("{}:{}", host, port);
    info!("已连接到 {}", peer);

    let (sender, receiver) = mpsc::sync_channel(RECORD_QUEUE_DEPTH);
    let reader_peer = peer.clone();
    let reader = thread::spawn(move || read_records(stream, sender, reader_peer));

    Ok(TcpJsonSubscription {
      receiver,
      peer,
      _reader: reader,
    })
  }
}

fn read_records(stream: TcpStream, sender: SyncSender<Delivery>, peer: String) {
  let mut reader = BufReader::new(stream);
  let mut line = Vec::new();
  loop {
    let delivery = match next_line(&mut reader, &mut line, MAX_LINE_BYTES) {
      Ok(Line::End) => break,
      Ok(Line::Complete) => {
        let bytes = line.trim_ascii();
        if bytes.is_empty() {
          continue;
        }
        match FrameRecord::from_json_bytes(bytes) {
          Ok(record) => Delivery::Record(record),
          Err(e) => Delivery::Rejected(e),
        }
      }
      Ok(Line::TooLong) => {
        warn!("{} 发送的记录过长，已丢弃", peer);
        Delivery::Rejected(RecordError::TooLarge(MAX_LINE_BYTES))
      }
      Err(e) => {
        warn!("读取 {} 失败: {}", peer, e);
        break;
      }
    };
    if sender.send(delivery).is_err() {
      break;
    }
  }
  info!("{} 连接关闭", peer);
}

impl Subscription for TcpJsonSubscription {
  fn poll(&mut self, timeout: Duration) -> Delivery {
    match self.receiver.recv_timeout(timeout) {
      Ok(delivery) => delivery,
      Err(RecvTimeoutError::Timeout) => Delivery::Empty,
      Err(RecvTimeoutError::Disconnected) => {
        info!("订阅 {} 已结束", self.peer);
        Delivery::Closed
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{io::Write, net::TcpListener};

  use super::*;

  #[test]
  fn streams_records_until_peer_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
      let (mut socket, _) = listener.accept().unwrap();
      socket
        .write_all(b"{\"model_type\":\"OpenPose\",\"id\":1}\n\nnot json\n")
        .unwrap();
    });

    let url = Url::parse(&format!("tcp://127.0.0.1:{}", port)).unwrap();
    let mut subscription = TcpJsonSubscription::from_url(&url).unwrap();
    server.join().unwrap();

    let timeout = Duration::from_secs(5);
    match subscription.poll(timeout) {
      Delivery::Record(record) => assert_eq!(record.id, Some(1)),
      other => panic!("unexpected delivery: {:?}", other),
    }
    assert!(matches!(subscription.poll(timeout), Delivery::Rejected(_)));
    assert!(matches!(subscription.poll(timeout), Delivery::Closed));
  }

  #[test]
  fn invalid_utf8_line_is_rejected_without_closing() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
      let (mut socket, _) = listener.accept().unwrap();
      socket
        .write_all(b"{\"model_type\":\"Open\xffPose\"}\n{\"model_type\":\"OpenPose\",\"id\":2}\n")
        .unwrap();
    });

    let url = Url::parse(&format!("tcp://127.0.0.1:{}", port)).unwrap();
    let mut subscription = TcpJsonSubscription::from_url(&url).unwrap();
    server.join().unwrap();

    let timeout = Duration::from_secs(5);
    assert!(matches!(subscription.poll(timeout), Delivery::Rejected(RecordError::Parse(_))));
    match subscription.poll(timeout) {
      Delivery::Record(record) => assert_eq!(record.id, Some(2)),
      other => panic!("unexpected delivery: {:?}", other),
    }
    assert!(matches!(subscription.poll(timeout), Delivery::Closed));
  }

  #[test]
  fn requires_host_and_port() {
    let url = Url::parse("tcp://localhost").unwrap();
    assert!(matches!(
      TcpJsonSubscription::from_url(&url),
      Err(TcpJsonError::MissingAddress(_))
    ));
  }
}
