// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

pub mod draw;

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "gstreamer_display")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_display")]
pub use self::gstreamer_display::{GStreamerDisplay, GStreamerDisplayError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "gstreamer_display")]
  #[error("GStreamer 显示错误: {0}")]
  GStreamerDisplayError(#[from] GStreamerDisplayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 显示输出：同步地把一帧交给显示后端
pub trait Present {
  fn present(&mut self, window: &str, image: &RgbImage) -> Result<(), OutputError>;
}

#[cfg(feature = "gstreamer_display")]
impl Present for GStreamerDisplay {
  fn present(&mut self, window: &str, image: &RgbImage) -> Result<(), OutputError> {
    GStreamerDisplay::present(self, window, image).map_err(OutputError::from)
  }
}

/// 按 URL 方案创建显示输出
pub fn create_display(url: &Url) -> Result<Box<dyn Present>, OutputError> {
  #[cfg(feature = "gstreamer_display")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == GStreamerDisplay::SCHEME {
      let display = GStreamerDisplay::from_url(url)?;
      return Ok(Box::new(display));
    }
  }
  Err(OutputError::SchemeMismatch(url.scheme().to_string()))
}
