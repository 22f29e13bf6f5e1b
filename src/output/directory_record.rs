// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 将标注后的帧逐张写入目录，文件名为 `<模型名>_img_<帧号>.jpg`
#[derive(Debug, Clone)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn frame_path(&self, model_name: &str, frame_id: u64) -> PathBuf {
    self
      .directory
      .join(format!("{}_img_{}.jpg", model_name, frame_id))
  }

  pub fn save(
    &self,
    model_name: &str,
    frame_id: u64,
    image: &RgbImage,
  ) -> Result<PathBuf, DirectoryRecordOutputError> {
    if !self.directory.exists() {
      std::fs::create_dir_all(&self.directory)?;
    }

    let path = self.frame_path(model_name, frame_id);
    image.save(&path)?;
    debug!("保存帧到文件: {}", path.display());

    Ok(path)
  }
}
