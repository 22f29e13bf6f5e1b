// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/draw.rs - 推理结果叠加绘制
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

use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_polygon_mut,
    draw_text_mut, text_size,
  },
  point::Point,
  rect::Rect,
};
use tracing::{info, warn};

use crate::{
  coords::{self, PixelBox},
  record::{DetectionView, PoseView},
};

// 字号以 1.0 倍字体比例下的像素高度为基准
const FONT_EM_PX: f32 = 30.0;
// 无字体时的文字尺寸估计
const EST_CHAR_WIDTH: f32 = 0.55;
const EST_TEXT_HEIGHT: f32 = 0.7;
const EST_BASELINE: f32 = 0.2;

// 检测框标签固定使用的字号与线宽，与缩放比例无关
const LABEL_FONT_SCALE: f32 = 0.35;
const LABEL_THICKNESS: i32 = 1;
const LABEL_MARGIN: i32 = 2;
const TEXT_LUMA_THRESHOLD: u32 = 140;

const BOX_COLOR: [u8; 3] = [255, 0, 0];
const LINE_COLOR: [u8; 3] = [0, 255, 255];
const LINE_THICKNESS: f32 = 4.0;
const POINT_COLOR: [u8; 3] = [255, 255, 0];
const POINT_RADIUS: i32 = 3;
const CAPTION_COLOR: [u8; 3] = [240, 240, 240];
const HALO_COLOR: [u8; 3] = [0, 0, 0];
const LIGHT_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const DARK_TEXT_COLOR: [u8; 3] = [16, 16, 16];

const FONT_CANDIDATES: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 加载标签字体，未指定路径时依次尝试常见的系统字体。
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
  let candidates: Vec<&Path> = match path {
    Some(path) => vec![path],
    None => FONT_CANDIDATES.iter().map(Path::new).collect(),
  };

  for candidate in candidates {
    let Ok(data) = std::fs::read(candidate) else {
      continue;
    };
    match FontArc::try_from_vec(data) {
      Ok(font) => {
        info!("加载字体: {}", candidate.display());
        return Some(font);
      }
      Err(e) => warn!("字体文件无效 {}: {}", candidate.display(), e),
    }
  }

  warn!("未找到可用字体，文字将不会绘制");
  None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextMetrics {
  width: i32,
  height: i32,
  baseline: i32,
}

/// 右下角与左下角的状态文字
#[derive(Debug, Clone)]
pub struct StatusCaption<'a> {
  /// 为 0 时不显示帧率
  pub rate: f64,
  pub frame_id: u64,
  /// 为空时不显示模型名与时间
  pub model_name: &'a str,
  pub timestamp: String,
}

pub struct Draw {
  font: Option<FontArc>,
  prob_threshold: f64,
  rescale: f32,
  box_color: Rgb<u8>,
}

impl Draw {
  pub fn new(font: Option<FontArc>, prob_threshold: f64, rescale: f32) -> Self {
    Self {
      font,
      prob_threshold,
      rescale,
      box_color: Rgb(BOX_COLOR),
    }
  }

  fn measure(&self, text: &str, font_scale: f32) -> TextMetrics {
    let px = font_scale * FONT_EM_PX;
    match &self.font {
      Some(font) => {
        let scale = PxScale::from(px);
        let (width, height) = text_size(scale, font, text);
        let descent = font.as_scaled(scale).descent();
        TextMetrics {
          width: width as i32,
          height: height as i32,
          baseline: (-descent).ceil() as i32,
        }
      }
      None => TextMetrics {
        width: (text.chars().count() as f32 * px * EST_CHAR_WIDTH) as i32,
        height: (px * EST_TEXT_HEIGHT) as i32,
        baseline: (px * EST_BASELINE) as i32,
      },
    }
  }

  // 通过偏移叠绘模拟线宽
  fn put_text(
    &self,
    image: &mut RgbImage,
    text: &str,
    (x, top): (i32, i32),
    font_scale: f32,
    color: Rgb<u8>,
    thickness: i32,
  ) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(font_scale * FONT_EM_PX);
    let spread = thickness.max(1) - 1;
    for dy in -spread..=spread {
      for dx in -spread..=spread {
        draw_text_mut(image, color, x + dx, top + dy, scale, font, text);
      }
    }
  }

  /// 绘制检测框与标签，返回实际绘制的目标数。
  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    view: &DetectionView<'_>,
    flip_horizontal: bool,
  ) -> usize {
    let (width, height) = image.dimensions();
    let mut drawn = 0;

    for entry in &view.entries {
      if entry.score < self.prob_threshold {
        continue;
      }

      let bbox = coords::decode(view.encoding, entry.coords, width, height, flip_horizontal);
      let bbox = clip_to_canvas(bbox, width, height);
      self.draw_box(image, bbox);

      if let Some(label) = entry.label {
        let text = format!("{} ({:.1}%)", label, entry.score * 100.0);
        self.draw_label(image, bbox, &text);
      }
      drawn += 1;
    }

    drawn
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: PixelBox) {
    let left = bbox.x_min.min(bbox.x_max);
    let right = bbox.x_min.max(bbox.x_max);
    let top = bbox.y_min.min(bbox.y_max);
    let bottom = bbox.y_min.max(bbox.y_max);

    let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
    draw_hollow_rect_mut(image, rect, self.box_color);
  }

  fn draw_label(&self, image: &mut RgbImage, bbox: PixelBox, text: &str) {
    let metrics = self.measure(text, LABEL_FONT_SCALE);
    let [r, g, b] = self.box_color.0;
    let text_color = if (r as u32 + g as u32 + b as u32) / 3 < TEXT_LUMA_THRESHOLD {
      Rgb(LIGHT_TEXT_COLOR)
    } else {
      Rgb(DARK_TEXT_COLOR)
    };

    // 文字基线位于框上沿之上，背景紧贴框上沿
    let text_x = bbox.x_min + LABEL_MARGIN;
    let baseline_y = bbox.y_min - metrics.baseline - LABEL_MARGIN;
    let background_top = baseline_y - metrics.height - LABEL_MARGIN;
    let background_right = text_x + metrics.width + LABEL_MARGIN;

    let background = Rect::at(bbox.x_min, background_top).of_size(
      (background_right - bbox.x_min + 1) as u32,
      (bbox.y_min - background_top + 1) as u32,
    );
    draw_filled_rect_mut(image, background, self.box_color);

    self.put_text(
      image,
      text,
      (text_x, baseline_y - metrics.height),
      LABEL_FONT_SCALE,
      text_color,
      LABEL_THICKNESS,
    );
  }

  /// 绘制姿态连线与关键点。
  ///
  /// 注意：姿态坐标不做水平翻转，与检测框的处理不一致，保持现有行为。
  pub fn draw_poses(&self, image: &mut RgbImage, pose: &PoseView) {
    let (width, height) = (image.width() as f64, image.height() as f64);

    for &[x0, y0, x1, y1] in &pose.lines {
      let start = (
        (clip_unit(x0) * width) as i32 as f32,
        (clip_unit(y0) * height) as i32 as f32,
      );
      let end = (
        (clip_unit(x1) * width) as i32 as f32,
        (clip_unit(y1) * height) as i32 as f32,
      );
      draw_thick_line(image, start, end, Rgb(LINE_COLOR));
    }

    for &[x, y] in &pose.points {
      let center = (
        (clip_unit(x) * width) as i32,
        (clip_unit(y) * height) as i32,
      );
      draw_filled_circle_mut(image, center, POINT_RADIUS, Rgb(POINT_COLOR));
    }
  }

  /// 在画面底部绘制状态文字，黑色描边后再绘制浅灰色文字。
  pub fn draw_status(&self, image: &mut RgbImage, caption: &StatusCaption<'_>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let font_scale = self.rescale;
    let thickness = ((2.0 * self.rescale) as i32).max(1);

    if caption.rate != 0.0 {
      let text = format!("FPS={:.2} FrameId={}", caption.rate, caption.frame_id);
      let metrics = self.measure(&text, font_scale);
      let baseline_y = height - metrics.height;
      self.put_caption(
        image,
        &text,
        (5, baseline_y - metrics.height),
        font_scale,
        thickness,
      );
    }

    if !caption.model_name.is_empty() {
      let text = format!("{} {}", caption.model_name, caption.timestamp);
      let metrics = self.measure(&text, font_scale);
      let baseline_y = height - metrics.height;
      self.put_caption(
        image,
        &text,
        (width - metrics.width - 2, baseline_y - metrics.height),
        font_scale,
        thickness,
      );
    }
  }

  fn put_caption(
    &self,
    image: &mut RgbImage,
    text: &str,
    origin: (i32, i32),
    font_scale: f32,
    thickness: i32,
  ) {
    self.put_text(image, text, origin, font_scale, Rgb(HALO_COLOR), thickness + 1);
    self.put_text(image, text, origin, font_scale, Rgb(CAPTION_COLOR), thickness);
  }
}

// 画布外的边不可见，收拢到画布外一像素即可，避免逐点遍历巨大的框
fn clip_to_canvas(bbox: PixelBox, width: u32, height: u32) -> PixelBox {
  let (w, h) = (width as i32, height as i32);
  PixelBox {
    x_min: bbox.x_min.clamp(-1, w),
    y_min: bbox.y_min.clamp(-1, h),
    x_max: bbox.x_max.clamp(-1, w),
    y_max: bbox.y_max.clamp(-1, h),
  }
}

fn clip_unit(value: f64) -> f64 {
  value.clamp(-1.0, 2.0)
}

fn draw_thick_line(image: &mut RgbImage, start: (f32, f32), end: (f32, f32), color: Rgb<u8>) {
  let half = LINE_THICKNESS / 2.0;
  let (dx, dy) = (end.0 - start.0, end.1 - start.1);
  let length = (dx * dx + dy * dy).sqrt();

  if length < 1.0 {
    draw_filled_circle_mut(
      image,
      (start.0.round() as i32, start.1.round() as i32),
      half as i32,
      color,
    );
    return;
  }

  let (nx, ny) = (-dy / length * half, dx / length * half);
  let corner = |x: f32, y: f32| Point::new(x.round() as i32, y.round() as i32);
  let polygon = [
    corner(start.0 + nx, start.1 + ny),
    corner(end.0 + nx, end.1 + ny),
    corner(end.0 - nx, end.1 - ny),
    corner(start.0 - nx, start.1 - ny),
  ];
  draw_polygon_mut(image, &polygon, color);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{coords::CoordsEncoding, record::DetectionEntry};

  fn view(scores: &[f64]) -> DetectionView<'static> {
    DetectionView {
      encoding: CoordsEncoding::Rect,
      entries: scores
        .iter()
        .map(|&score| DetectionEntry {
          label: Some("person"),
          score,
          coords: [0.2, 0.5, 0.4, 0.3],
        })
        .collect(),
    }
  }

  fn red_pixels(image: &RgbImage) -> usize {
    image.pixels().filter(|p| p.0 == BOX_COLOR).count()
  }

  #[test]
  fn low_scores_are_not_drawn() {
    let draw = Draw::new(None, 0.30, 0.5);
    let mut image = RgbImage::new(100, 100);

    assert_eq!(draw.draw_detections(&mut image, &view(&[0.1]), false), 0);
    assert_eq!(red_pixels(&image), 0);
  }

  #[test]
  fn boxes_above_threshold_are_drawn_once() {
    let draw = Draw::new(None, 0.30, 0.5);
    let mut image = RgbImage::new(100, 100);

    assert_eq!(draw.draw_detections(&mut image, &view(&[0.5]), false), 1);
    // 左下角与右下角都在框的边上
    assert_eq!(image.get_pixel(20, 80).0, BOX_COLOR);
    assert_eq!(image.get_pixel(60, 80).0, BOX_COLOR);
    // 框内部保持不变
    assert_eq!(image.get_pixel(40, 70).0, [0, 0, 0]);
    // 标签背景在框上沿之上
    assert_eq!(image.get_pixel(22, 48).0, BOX_COLOR);
  }

  #[test]
  fn mixed_scores_count_only_kept_objects() {
    let draw = Draw::new(None, 0.30, 0.5);
    let mut image = RgbImage::new(100, 100);
    assert_eq!(
      draw.draw_detections(&mut image, &view(&[0.9, 0.29, 0.3]), false),
      2
    );
  }

  #[test]
  fn flip_moves_box_to_mirrored_side() {
    let draw = Draw::new(None, 0.0, 0.5);
    let mut image = RgbImage::new(100, 100);
    draw.draw_detections(&mut image, &view(&[0.9]), true);
    // rect (20..60) 镜像后为 (40..80)
    assert_eq!(image.get_pixel(80, 80).0, BOX_COLOR);
    assert_eq!(image.get_pixel(20, 80).0, [0, 0, 0]);
  }

  #[test]
  fn boxes_far_outside_the_frame_are_tolerated() {
    let draw = Draw::new(None, 0.0, 0.5);
    let mut image = RgbImage::new(50, 40);
    let view = DetectionView {
      encoding: CoordsEncoding::Yolo,
      entries: vec![DetectionEntry {
        label: Some("far"),
        score: 1.0,
        coords: [1e9, -1e9, 3.0, 3.0],
      }],
    };
    assert_eq!(draw.draw_detections(&mut image, &view, false), 1);
  }

  #[test]
  fn poses_draw_lines_and_points_without_flip() {
    let draw = Draw::new(None, 0.3, 0.5);
    let mut image = RgbImage::new(100, 100);
    let pose = PoseView {
      lines: vec![[0.1, 0.1, 0.9, 0.1]],
      points: vec![[0.25, 0.5]],
    };

    draw.draw_poses(&mut image, &pose);
    assert_eq!(image.get_pixel(50, 10).0, LINE_COLOR);
    assert_eq!(image.get_pixel(25, 50).0, POINT_COLOR);
    assert_eq!(image.get_pixel(75, 50).0, [0, 0, 0]);
  }

  #[test]
  fn status_caption_without_font_is_a_no_op() {
    let draw = Draw::new(None, 0.3, 0.5);
    let mut image = RgbImage::new(2, 2);
    let caption = StatusCaption {
      rate: 30.0,
      frame_id: 4,
      model_name: "yolov5s",
      timestamp: "01/01/2026 00:00:00".to_string(),
    };
    draw.draw_status(&mut image, &caption);
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
  }

  #[test]
  fn estimated_metrics_scale_with_font_scale() {
    let draw = Draw::new(None, 0.3, 0.5);
    let small = draw.measure("label", 0.35);
    let large = draw.measure("label", 1.0);
    assert!(small.width < large.width);
    assert!(small.height < large.height);
    assert!(small.width > 0 && small.height > 0);
  }

  fn caption() -> StatusCaption<'static> {
    StatusCaption {
      rate: 30.0,
      frame_id: 4,
      model_name: "yolov5s",
      timestamp: "01/01/2026 00:00:00".to_string(),
    }
  }

  fn region_has(
    image: &RgbImage,
    xs: std::ops::Range<u32>,
    ys: std::ops::Range<u32>,
    f: impl Fn(&Rgb<u8>) -> bool,
  ) -> bool {
    ys.clone()
      .flat_map(|y| xs.clone().map(move |x| (x, y)))
      .any(|(x, y)| f(image.get_pixel(x, y)))
  }

  fn is_light(p: &Rgb<u8>) -> bool {
    p.0.iter().all(|&c| c > 200)
  }

  fn is_dark(p: &Rgb<u8>) -> bool {
    p.0.iter().all(|&c| c < 40)
  }

  // 以下测试需要系统字体，找不到时跳过
  #[test]
  fn status_captions_sit_in_the_bottom_corners() {
    let Some(font) = load_font(None) else {
      return;
    };
    let draw = Draw::new(Some(font), 0.3, 1.0);
    let mut image = RgbImage::from_pixel(1000, 200, Rgb([100, 100, 100]));

    draw.draw_status(&mut image, &caption());

    // 左下角帧率，右下角模型名与时间；浅色文字外有黑色描边
    assert!(region_has(&image, 0..300, 100..200, is_light));
    assert!(region_has(&image, 0..300, 100..200, is_dark));
    assert!(region_has(&image, 700..1000, 100..200, is_light));
    assert!(region_has(&image, 700..1000, 100..200, is_dark));
    assert!(image.rows().take(100).flatten().all(|p| p.0 == [100, 100, 100]));
  }

  #[test]
  fn empty_caption_draws_nothing_even_with_font() {
    let Some(font) = load_font(None) else {
      return;
    };
    let draw = Draw::new(Some(font), 0.3, 1.0);
    let mut image = RgbImage::from_pixel(300, 100, Rgb([100, 100, 100]));
    let caption = StatusCaption {
      rate: 0.0,
      frame_id: 1,
      model_name: "",
      timestamp: String::new(),
    };

    draw.draw_status(&mut image, &caption);
    assert!(image.pixels().all(|p| p.0 == [100, 100, 100]));
  }

  #[test]
  fn label_text_is_light_on_the_red_plate() {
    let Some(font) = load_font(None) else {
      return;
    };
    let draw = Draw::new(Some(font), 0.3, 1.0);
    let mut image = RgbImage::new(200, 200);

    assert_eq!(draw.draw_detections(&mut image, &view(&[0.9]), false), 1);
    // rect 框上沿 y=100，标签位于其上方
    assert!(region_has(&image, 40..160, 60..100, |p| p.0 == BOX_COLOR));
    // 白色文字与红底混合后绿、蓝通道升高
    assert!(region_has(&image, 40..160, 60..100, |p| p.0[1] > 100 && p.0[2] > 100));
  }
}
