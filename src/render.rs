// 该文件是 Guanlan （观澜） 项目的一部分。
// src/render.rs - 单帧渲染
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

use std::path::PathBuf;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::SessionConfig,
  output::{
    DirectoryRecordOutput, OutputError, Present,
    draw::{Draw, StatusCaption},
  },
  perf::DATE_FORMAT,
  record::{DetectionView, FrameRecord, ModelType, PoseView, RecordError},
};

/// 前几帧的帧率不稳定，不保存
pub const WARMUP_FRAMES: u64 = 3;
pub const DISPLAY_WINDOW: &str = "guanlan";

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("记录格式错误: {0}")]
  Record(#[from] RecordError),
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("输出失败: {0}")]
  Output(#[from] OutputError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
  pub rescale: f32,
  pub flip_horizontal: bool,
  pub strict_coords: bool,
}

impl From<&SessionConfig> for RenderOptions {
  fn from(config: &SessionConfig) -> Self {
    RenderOptions {
      rescale: config.rescale,
      flip_horizontal: config.flip_horizontal,
      strict_coords: config.strict_coords,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  NoImage,
  UnknownModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
  Skipped(SkipReason),
  Presented,
  Saved(PathBuf),
  WarmingUp,
  Duplicate,
  /// 既没有显示也没有保存
  Discarded,
}

enum Annotation<'a> {
  Detections(DetectionView<'a>),
  Pose(PoseView),
}

pub struct FrameRenderer {
  draw: Draw,
  options: RenderOptions,
  display: Option<Box<dyn Present>>,
  store: Option<DirectoryRecordOutput>,
  frame_counter: u64,
  previous_frame: Option<RgbImage>,
}

impl FrameRenderer {
  pub fn new(draw: Draw, options: RenderOptions) -> Self {
    Self {
      draw,
      options,
      display: None,
      store: None,
      frame_counter: 0,
      previous_frame: None,
    }
  }

  pub fn with_display(mut self, display: Box<dyn Present>) -> Self {
    self.display = Some(display);
    self
  }

  pub fn with_store(mut self, store: DirectoryRecordOutput) -> Self {
    self.store = Some(store);
    self
  }

  pub fn frame_counter(&self) -> u64 {
    self.frame_counter
  }

  /// 最近一次写入磁盘的帧
  pub fn previous_frame(&self) -> Option<&RgbImage> {
    self.previous_frame.as_ref()
  }

  /// 处理一条记录：解码、叠加标注与状态文字，再交给显示或保存。
  ///
  /// 每条记录都会使帧计数加一，包括被跳过的记录。
  pub fn render(&mut self, record: &FrameRecord, rate: f64) -> Result<RenderOutcome, RenderError> {
    self.frame_counter += 1;

    let annotation = match &record.model_type {
      ModelType::ObjectDetection => {
        Annotation::Detections(record.detections(self.options.strict_coords)?)
      }
      ModelType::OpenPose => Annotation::Pose(record.pose()?),
      ModelType::Other(tag) => {
        warn!("{} 未实现，跳过第 {} 帧", tag, self.frame_counter);
        return Ok(RenderOutcome::Skipped(SkipReason::UnknownModel));
      }
    };

    let Some(bytes) = record.image.as_deref() else {
      warn!("第 {} 帧没有图像数据", self.frame_counter);
      return Ok(RenderOutcome::Skipped(SkipReason::NoImage));
    };

    let mut image = decode_frame(bytes, self.options.rescale)?;
    match annotation {
      Annotation::Detections(view) => {
        let drawn = self
          .draw
          .draw_detections(&mut image, &view, self.options.flip_horizontal);
        debug!("第 {} 帧绘制 {} 个目标", self.frame_counter, drawn);
      }
      Annotation::Pose(pose) => self.draw.draw_poses(&mut image, &pose),
    }

    let caption = StatusCaption {
      rate,
      frame_id: self.frame_counter,
      model_name: record.display_name(),
      timestamp: chrono::Local::now().format(DATE_FORMAT).to_string(),
    };
    self.draw.draw_status(&mut image, &caption);

    self.deliver(record.display_name(), image)
  }

  fn deliver(&mut self, model_name: &str, image: RgbImage) -> Result<RenderOutcome, RenderError> {
    if let Some(display) = self.display.as_mut() {
      display.present(DISPLAY_WINDOW, &image)?;
      return Ok(RenderOutcome::Presented);
    }

    let Some(store) = &self.store else {
      return Ok(RenderOutcome::Discarded);
    };
    if self.frame_counter <= WARMUP_FRAMES {
      return Ok(RenderOutcome::WarmingUp);
    }
    // 逐字节比较，只能过滤完全相同的帧
    if self
      .previous_frame
      .as_ref()
      .is_some_and(|previous| same_frame(previous, &image))
    {
      debug!("第 {} 帧与上一帧相同，不保存", self.frame_counter);
      return Ok(RenderOutcome::Duplicate);
    }

    let path = store
      .save(model_name, self.frame_counter, &image)
      .map_err(OutputError::from)?;
    self.previous_frame = Some(image);
    Ok(RenderOutcome::Saved(path))
  }
}

fn same_frame(a: &RgbImage, b: &RgbImage) -> bool {
  a.dimensions() == b.dimensions() && a.as_raw() == b.as_raw()
}

/// 解码图像并按比例线性缩放
pub fn decode_frame(bytes: &[u8], rescale: f32) -> Result<RgbImage, image::ImageError> {
  let image = image::load_from_memory(bytes)?.to_rgb8();
  let (width, height) = image.dimensions();
  let target = (
    ((width as f32 * rescale) as u32).max(1),
    ((height as f32 * rescale) as u32).max(1),
  );
  if target == (width, height) {
    return Ok(image);
  }
  Ok(image::imageops::resize(
    &image,
    target.0,
    target.1,
    FilterType::Triangle,
  ))
}

#[cfg(test)]
pub(crate) mod testing {
  use std::io::Cursor;

  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

  pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::{testing::png_bytes, *};

  const GRAY: [u8; 3] = [128, 128, 128];

  #[derive(Clone, Default)]
  struct CapturingDisplay {
    frames: Rc<RefCell<Vec<RgbImage>>>,
  }

  impl Present for CapturingDisplay {
    fn present(&mut self, window: &str, image: &RgbImage) -> Result<(), OutputError> {
      assert_eq!(window, DISPLAY_WINDOW);
      self.frames.borrow_mut().push(image.clone());
      Ok(())
    }
  }

  fn options() -> RenderOptions {
    RenderOptions {
      rescale: 0.5,
      flip_horizontal: false,
      strict_coords: false,
    }
  }

  fn renderer() -> FrameRenderer {
    FrameRenderer::new(Draw::new(None, 0.30, 0.5), options())
  }

  fn detection(score: f64, color: [u8; 3]) -> FrameRecord {
    let mut record = FrameRecord::new("ObjectDetection", Some(png_bytes(100, 80, color)));
    record.object_count = Some(1);
    record.labels = Some(vec!["person".to_string()]);
    record.scores = Some(vec![score]);
    record.coords = Some(vec![0.5, 0.5, 0.4, 0.4]);
    record
  }

  fn has_box_pixels(image: &RgbImage) -> bool {
    image.pixels().any(|p| p.0 == [255, 0, 0])
  }

  #[test]
  fn unknown_model_is_skipped_without_touching_state() {
    let root = tempfile::tempdir().unwrap();
    let mut renderer = renderer().with_store(DirectoryRecordOutput::new(root.path()));
    for _ in 0..=WARMUP_FRAMES {
      renderer.render(&detection(0.9, GRAY), 0.0).unwrap();
    }
    let saved = renderer.previous_frame().cloned().unwrap();

    let record = FrameRecord::new("Unknown", Some(png_bytes(10, 10, [1, 2, 3])));
    let outcome = renderer.render(&record, 0.0).unwrap();

    assert_eq!(outcome, RenderOutcome::Skipped(SkipReason::UnknownModel));
    assert_eq!(renderer.frame_counter(), WARMUP_FRAMES + 2);
    assert_eq!(renderer.previous_frame(), Some(&saved));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
  }

  #[test]
  fn unknown_model_never_reaches_the_display() {
    let display = CapturingDisplay::default();
    let mut renderer = renderer().with_display(Box::new(display.clone()));
    let record = FrameRecord::new("Unknown", Some(png_bytes(10, 10, GRAY)));

    assert_eq!(
      renderer.render(&record, 0.0).unwrap(),
      RenderOutcome::Skipped(SkipReason::UnknownModel)
    );
    assert!(display.frames.borrow().is_empty());
  }

  #[test]
  fn record_without_image_is_skipped() {
    let mut renderer = renderer();
    let record = FrameRecord::new("OpenPose", None);
    assert_eq!(
      renderer.render(&record, 0.0).unwrap(),
      RenderOutcome::Skipped(SkipReason::NoImage)
    );
  }

  #[test]
  fn display_receives_rescaled_annotated_frame() {
    let display = CapturingDisplay::default();
    let mut renderer = renderer().with_display(Box::new(display.clone()));

    assert_eq!(
      renderer.render(&detection(0.5, GRAY), 12.0).unwrap(),
      RenderOutcome::Presented
    );
    assert_eq!(
      renderer.render(&detection(0.1, GRAY), 12.0).unwrap(),
      RenderOutcome::Presented
    );

    let frames = display.frames.borrow();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].dimensions(), (50, 40));
    assert!(has_box_pixels(&frames[0]));
    assert!(!has_box_pixels(&frames[1]));
  }

  #[test]
  fn display_takes_priority_over_store() {
    let root = tempfile::tempdir().unwrap();
    let display = CapturingDisplay::default();
    let mut renderer = renderer()
      .with_display(Box::new(display.clone()))
      .with_store(DirectoryRecordOutput::new(root.path()));

    for _ in 0..5 {
      assert_eq!(
        renderer.render(&detection(0.9, GRAY), 0.0).unwrap(),
        RenderOutcome::Presented
      );
    }
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
  }

  #[test]
  fn store_skips_warm_up_and_duplicates() {
    let root = tempfile::tempdir().unwrap();
    let mut renderer = renderer().with_store(DirectoryRecordOutput::new(root.path()));
    let record = detection(0.9, GRAY);

    for _ in 0..WARMUP_FRAMES {
      assert_eq!(
        renderer.render(&record, 0.0).unwrap(),
        RenderOutcome::WarmingUp
      );
    }
    assert!(renderer.previous_frame().is_none());

    let saved = renderer.render(&record, 0.0).unwrap();
    assert_eq!(saved, RenderOutcome::Saved(root.path().join("_img_4.jpg")));
    assert_eq!(
      renderer.render(&record, 0.0).unwrap(),
      RenderOutcome::Duplicate
    );

    let mut other = detection(0.9, [10, 200, 30]);
    other.model_name = "yolov5s.onnx".to_string();
    assert_eq!(
      renderer.render(&other, 0.0).unwrap(),
      RenderOutcome::Saved(root.path().join("yolov5s_img_6.jpg"))
    );
    assert!(root.path().join("yolov5s_img_6.jpg").exists());
  }

  #[test]
  fn no_sink_discards_frames() {
    let mut renderer = renderer();
    assert_eq!(
      renderer.render(&detection(0.9, GRAY), 0.0).unwrap(),
      RenderOutcome::Discarded
    );
  }

  #[test]
  fn malformed_and_undecodable_records_are_errors() {
    let mut renderer = renderer();

    let mut malformed = detection(0.9, GRAY);
    malformed.coords = Some(vec![0.5, 0.5]);
    assert!(matches!(
      renderer.render(&malformed, 0.0),
      Err(RenderError::Record(_))
    ));

    let garbage = FrameRecord::new("OpenPose", Some(vec![0, 1, 2, 3]));
    assert!(matches!(
      renderer.render(&garbage, 0.0),
      Err(RenderError::Decode(_))
    ));
    assert_eq!(renderer.frame_counter(), 2);
  }

  #[test]
  fn decode_frame_never_collapses_to_zero() {
    let image = decode_frame(&png_bytes(3, 2, GRAY), 0.1).unwrap();
    assert_eq!(image.dimensions(), (1, 1));

    let image = decode_frame(&png_bytes(64, 48, GRAY), 1.0).unwrap();
    assert_eq!(image.dimensions(), (64, 48));
  }
}
