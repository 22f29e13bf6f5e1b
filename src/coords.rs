// 该文件是 Guanlan （观澜） 项目的一部分。
// src/coords.rs - 检测框坐标解码
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

/// 检测框四个浮点数的几何约定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordsEncoding {
  /// 中心点 + 宽高
  #[default]
  Yolo,
  /// 左上角 + 右下角
  Coco,
  /// 左上角 + 宽高
  Rect,
}

impl CoordsEncoding {
  pub fn from_tag(tag: &str) -> Option<Self> {
    match tag {
      "yolo" => Some(CoordsEncoding::Yolo),
      "coco" => Some(CoordsEncoding::Coco),
      "rect" => Some(CoordsEncoding::Rect),
      _ => None,
    }
  }
}

/// 像素坐标系下的矩形，可能超出图像范围，由绘制阶段裁剪
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x_min: i32,
  pub y_min: i32,
  pub x_max: i32,
  pub y_max: i32,
}

impl PixelBox {
  /// 以图像竖直中线做镜像
  pub fn flip_horizontal(self, width: u32) -> Self {
    let width = width as i32;
    PixelBox {
      x_min: width - self.x_max,
      x_max: width - self.x_min,
      ..self
    }
  }
}

/// 将归一化坐标 `[x, y, w, h]` 解码为像素矩形。
///
/// 浮点到整数的转换向零截断。翻转在解码之后进行。
pub fn decode(
  encoding: CoordsEncoding,
  coords: [f64; 4],
  width: u32,
  height: u32,
  flip_horizontal: bool,
) -> PixelBox {
  let [x, y, w, h] = coords;
  let (img_w, img_h) = (width as f64, height as f64);

  let decoded = match encoding {
    CoordsEncoding::Yolo => PixelBox {
      x_min: (img_w * (x - w / 2.0)) as i32,
      y_min: (img_h * (y - h / 2.0)) as i32,
      x_max: (img_w * (x + w / 2.0)) as i32,
      y_max: (img_h * (y + h / 2.0)) as i32,
    },
    // 后两个字段已经是右下角，而不是宽高
    CoordsEncoding::Coco => PixelBox {
      x_min: (img_w * x) as i32,
      y_min: (img_h * y) as i32,
      x_max: (img_w * w) as i32,
      y_max: (img_h * h) as i32,
    },
    CoordsEncoding::Rect => PixelBox {
      x_min: (img_w * x) as i32,
      y_min: (img_h * y) as i32,
      x_max: (img_w * (x + w)) as i32,
      y_max: (img_h * (y + h)) as i32,
    },
  };

  if flip_horizontal {
    decoded.flip_horizontal(width)
  } else {
    decoded
  }
}
