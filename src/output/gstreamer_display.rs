// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 画面显示
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

//! # GStreamer 显示输出
//!
//! 将标注后的帧推入 `appsrc ! videoconvert ! <sink>` 管道。
//!
//! ## URL Scheme
//!
//! `gstdisplay://<sink 元素>`，省略时使用 `autovideosink`：
//!
//! ```no_run
//! use guanlan::{FromUrl, output::GStreamerDisplay};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gstdisplay://ximagesink")?;
//! let _display = GStreamerDisplay::from_url(&url)?;
//! # Ok(())
//! # }
//! ```
//!
//! 帧尺寸在第一帧到达时确定，尺寸变化时重新设置 caps。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// GStreamer 显示错误类型
#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

const DEFAULT_SINK: &str = "autovideosink";

pub struct GStreamerDisplay {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: Option<gst_video::VideoInfo>,
  frame_count: u64,
}

impl FromUrlWithScheme for GStreamerDisplay {
  const SCHEME: &'static str = "gstdisplay";
}

impl FromUrl for GStreamerDisplay {
  type Error = GStreamerDisplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayError::SchemeMismatch);
    }

    gst::init()?;

    let sink = url
      .host_str()
      .filter(|host| !host.is_empty())
      .unwrap_or(DEFAULT_SINK);
    let pipeline_desc = format!(
      "appsrc name=src is-live=true format=time ! videoconvert ! {} sync=false",
      sink
    );
    info!("创建显示管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayError::AppSrcConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerDisplay {
      pipeline,
      appsrc,
      info: None,
      frame_count: 0,
    })
  }
}

impl GStreamerDisplay {
  fn ensure_caps(&mut self, width: u32, height: u32) -> Result<&gst_video::VideoInfo, GStreamerDisplayError> {
    let stale = self
      .info
      .as_ref()
      .is_none_or(|info| (info.width(), info.height()) != (width, height));
    if stale {
      let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height).build()?;
      self.appsrc.set_caps(Some(&info.to_caps()?));
      info!("显示尺寸: {}x{}", width, height);
      self.info = Some(info);
    }
    self.info.as_ref().ok_or(GStreamerDisplayError::BufferCreationError)
  }

  pub fn present(&mut self, window: &str, image: &RgbImage) -> Result<(), GStreamerDisplayError> {
    let info = self.ensure_caps(image.width(), image.height())?;
    let buffer = frame_buffer(info, image)?;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayError::PipelineError(format!("[{}] 推送缓冲区失败: {:?}", window, e))
    })?;
    self.frame_count += 1;

    Ok(())
  }
}

// caps 中的 RGB 行按 4 字节对齐，逐行拷贝到对应步长
fn frame_buffer(
  info: &gst_video::VideoInfo,
  image: &RgbImage,
) -> Result<gst::Buffer, GStreamerDisplayError> {
  let stride = info.stride()[0] as usize;
  let row_bytes = image.width() as usize * 3;

  let mut buffer =
    gst::Buffer::with_size(info.size()).map_err(|_| GStreamerDisplayError::BufferCreationError)?;
  {
    let buffer_ref = buffer
      .get_mut()
      .ok_or(GStreamerDisplayError::BufferCreationError)?;
    let mut buffer_map = buffer_ref
      .map_writable()
      .map_err(|_| GStreamerDisplayError::PipelineError("无法映射缓冲区".to_string()))?;
    for (src, dst) in image
      .as_raw()
      .chunks_exact(row_bytes)
      .zip(buffer_map.chunks_mut(stride))
    {
      dst[..row_bytes].copy_from_slice(src);
    }
  }
  Ok(buffer)
}

impl Drop for GStreamerDisplay {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("关闭显示管道失败: {}", e);
    }
    info!("显示输出关闭，共显示 {} 帧", self.frame_count);
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  #[test]
  fn rows_follow_the_padded_stride() {
    gst::init().unwrap();
    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, 50, 40)
      .build()
      .unwrap();
    let image = RgbImage::from_fn(50, 40, |_, y| Rgb([y as u8, 0, 255]));

    let buffer = frame_buffer(&info, &image).unwrap();
    let map = buffer.map_readable().unwrap();
    let stride = info.stride()[0] as usize;

    assert_eq!(stride, 152);
    assert_eq!(map.len(), info.size());
    for y in [0usize, 1, 39] {
      let row = &map[y * stride..y * stride + 150];
      assert_eq!(&row[..3], &[y as u8, 0, 255]);
      assert_eq!(&row[147..150], &[y as u8, 0, 255]);
    }
  }
}
