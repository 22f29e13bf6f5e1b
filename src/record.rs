// 该文件是 Guanlan （观澜） 项目的一部分。
// src/record.rs - 推理结果记录
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

//! 每个推理周期产生一条 [`FrameRecord`]：原始图像加上检测框或姿态关键点。
//!
//! 记录以 JSON 形式在流上传输，字段同时兼容旧的命名（`n_objects`、
//! `coords_type`、`lines_coords`、`points_coords` 等）。

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

use crate::coords::CoordsEncoding;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("记录缺少字段: {0}")]
  MissingField(&'static str),
  #[error("字段 {field} 长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    field: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("字段 {field} 长度 {len} 不是 {stride} 的整数倍")]
  StrideMismatch {
    field: &'static str,
    len: usize,
    stride: usize,
  },
  #[error("未知坐标编码: {0}")]
  UnknownEncoding(String),
  #[error("记录解析失败: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("记录超过 {0} 字节上限")]
  TooLarge(u64),
}

/// 模型类型标签
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ModelType {
  ObjectDetection,
  OpenPose,
  Other(String),
}

impl From<String> for ModelType {
  fn from(tag: String) -> Self {
    match tag.as_str() {
      "ObjectDetection" | "Object_Detection" => ModelType::ObjectDetection,
      "OpenPose" | "Open_Pose" => ModelType::OpenPose,
      _ => ModelType::Other(tag),
    }
  }
}

impl From<&str> for ModelType {
  fn from(tag: &str) -> Self {
    ModelType::from(tag.to_string())
  }
}

impl std::fmt::Display for ModelType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ModelType::ObjectDetection => write!(f, "ObjectDetection"),
      ModelType::OpenPose => write!(f, "OpenPose"),
      ModelType::Other(tag) => write!(f, "{}", tag),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
  #[serde(default)]
  pub id: Option<u64>,
  pub model_type: ModelType,
  #[serde(default)]
  pub model_name: String,
  #[serde(default, deserialize_with = "deserialize_image")]
  pub image: Option<Vec<u8>>,

  #[serde(default, alias = "n_objects")]
  pub object_count: Option<usize>,
  #[serde(default, deserialize_with = "deserialize_labels")]
  pub labels: Option<Vec<String>>,
  #[serde(default)]
  pub scores: Option<Vec<f64>>,
  #[serde(default)]
  pub coords: Option<Vec<f64>>,
  #[serde(default, alias = "coords_type")]
  pub coords_encoding: Option<String>,

  #[serde(default, alias = "lines_coords")]
  pub line_coords: Option<Vec<f64>>,
  #[serde(default, alias = "points_coords")]
  pub point_coords: Option<Vec<f64>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageField {
  Encoded(String),
  Raw(Vec<u8>),
}

fn deserialize_image<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
  Option::<ImageField>::deserialize(de)?
    .map(|field| match field {
      ImageField::Encoded(text) => BASE64_STANDARD
        .decode(text.as_bytes())
        .map_err(serde::de::Error::custom),
      ImageField::Raw(bytes) => Ok(bytes),
    })
    .transpose()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelsField {
  Joined(String),
  List(Vec<String>),
}

fn deserialize_labels<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<String>>, D::Error> {
  Ok(
    Option::<LabelsField>::deserialize(de)?.map(|field| match field {
      LabelsField::Joined(text) if text.is_empty() => Vec::new(),
      LabelsField::Joined(text) => text.split(',').map(str::to_string).collect(),
      LabelsField::List(list) => list,
    }),
  )
}

/// 一个待绘制的检测目标（尚未解码为像素坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEntry<'a> {
  pub label: Option<&'a str>,
  pub score: f64,
  pub coords: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionView<'a> {
  pub encoding: CoordsEncoding,
  pub entries: Vec<DetectionEntry<'a>>,
}

/// 归一化的姿态线段与关键点
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseView {
  pub lines: Vec<[f64; 4]>,
  pub points: Vec<[f64; 2]>,
}

impl FrameRecord {
  pub fn new(model_type: impl Into<ModelType>, image: Option<Vec<u8>>) -> Self {
    FrameRecord {
      id: None,
      model_type: model_type.into(),
      model_name: String::new(),
      image,
      object_count: None,
      labels: None,
      scores: None,
      coords: None,
      coords_encoding: None,
      line_coords: None,
      point_coords: None,
    }
  }

  pub fn from_json(line: &str) -> Result<Self, RecordError> {
    Ok(serde_json::from_str(line)?)
  }

  /// 直接解析原始字节，非法 UTF-8 同样按格式错误处理
  pub fn from_json_bytes(line: &[u8]) -> Result<Self, RecordError> {
    Ok(serde_json::from_slice(line)?)
  }

  /// 用于显示的模型名（去掉 `.onnx` 后缀）
  pub fn display_name(&self) -> &str {
    self
      .model_name
      .strip_suffix(".onnx")
      .unwrap_or(&self.model_name)
  }

  /// 校验检测字段并按目标拆分。
  ///
  /// 缺少 `object_count` 视为没有目标；`labels` 可以缺省，此时只画框不画标签。
  /// `strict` 为真时未知的坐标编码直接判为格式错误，否则按 yolo 处理。
  pub fn detections(&self, strict: bool) -> Result<DetectionView<'_>, RecordError> {
    let encoding = self.resolve_encoding(strict)?;
    let count = self.object_count.unwrap_or(0);
    if count == 0 {
      return Ok(DetectionView {
        encoding,
        entries: Vec::new(),
      });
    }

    let scores = self
      .scores
      .as_deref()
      .ok_or(RecordError::MissingField("scores"))?;
    let coords = self
      .coords
      .as_deref()
      .ok_or(RecordError::MissingField("coords"))?;
    check_len("scores", scores.len(), count)?;
    check_len("coords", coords.len(), count * 4)?;
    if let Some(labels) = &self.labels {
      check_len("labels", labels.len(), count)?;
    }

    let entries = (0..count)
      .map(|i| DetectionEntry {
        label: self.labels.as_ref().map(|labels| labels[i].as_str()),
        score: scores[i],
        coords: [
          coords[i * 4],
          coords[i * 4 + 1],
          coords[i * 4 + 2],
          coords[i * 4 + 3],
        ],
      })
      .collect();

    Ok(DetectionView { encoding, entries })
  }

  pub fn pose(&self) -> Result<PoseView, RecordError> {
    let lines = match &self.line_coords {
      Some(flat) => {
        check_stride("line_coords", flat.len(), 4)?;
        flat
          .chunks_exact(4)
          .map(|c| [c[0], c[1], c[2], c[3]])
          .collect()
      }
      None => Vec::new(),
    };
    let points = match &self.point_coords {
      Some(flat) => {
        check_stride("point_coords", flat.len(), 2)?;
        flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect()
      }
      None => Vec::new(),
    };

    Ok(PoseView { lines, points })
  }

  fn resolve_encoding(&self, strict: bool) -> Result<CoordsEncoding, RecordError> {
    let Some(tag) = self.coords_encoding.as_deref() else {
      return Ok(CoordsEncoding::default());
    };
    match CoordsEncoding::from_tag(tag) {
      Some(encoding) => Ok(encoding),
      None if strict => Err(RecordError::UnknownEncoding(tag.to_string())),
      None => {
        warn!("未知坐标编码 '{}'，按 yolo 处理", tag);
        Ok(CoordsEncoding::Yolo)
      }
    }
  }
}

fn check_len(field: &'static str, actual: usize, expected: usize) -> Result<(), RecordError> {
  if actual != expected {
    return Err(RecordError::LengthMismatch {
      field,
      expected,
      actual,
    });
  }
  Ok(())
}

fn check_stride(field: &'static str, len: usize, stride: usize) -> Result<(), RecordError> {
  if len % stride != 0 {
    return Err(RecordError::StrideMismatch { field, len, stride });
  }
  Ok(())
}
