// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::ImageFrame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, LabelPolicy},
    font::FontError,
  },
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("无法创建输出目录 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("无法写入图像 {0}: {1}")]
  ImageError(PathBuf, image::ImageError),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
}

/// 将标注后的图像保存为 `<directory>/<name>.png`
pub struct SaveImageFileOutput {
  directory: PathBuf,
  draw: Draw,
  policy: LabelPolicy,
}

impl SaveImageFileOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, policy: LabelPolicy) -> Self {
    Self {
      directory: directory.into(),
      draw,
      policy,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn image_path(&self, name: &str) -> PathBuf {
    self.directory.join(format!("{}.png", name))
  }

  fn save_image(&self, name: &str, image: &RgbaImage) -> Result<PathBuf, SaveImageFileError> {
    std::fs::create_dir_all(&self.directory)
      .map_err(|e| SaveImageFileError::IoError(self.directory.clone(), e))?;

    let path = self.image_path(name);
    image
      .save_with_format(&path, ImageFormat::Png)
      .map_err(|e| SaveImageFileError::ImageError(path.clone(), e))?;

    debug!("保存图像到文件: {}", path.display());

    Ok(path)
  }
}

impl Render<ImageFrame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let image = self
      .draw
      .draw_detections(&frame.image, result, &self.policy)?;
    self.save_image(&frame.name, &image)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectItem};
  use image::Rgba;

  #[test]
  fn saves_png_into_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(
      dir.path().join("output").join("transformers"),
      Draw::default(),
      LabelPolicy::default(),
    );
    let frame = ImageFrame::new(
      "images/cat.jpg",
      RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255])),
    );

    output.render_result(&frame, &DetectResult::default()).unwrap();

    let path = output.image_path("cat");
    assert!(path.ends_with("output/transformers/cat.png"));
    let saved = image::open(&path).unwrap().into_rgba8();
    assert_eq!(saved, frame.image);
  }

  #[test]
  fn label_without_font_is_a_font_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path(), Draw::default(), LabelPolicy::default());
    let frame = ImageFrame::new("cat.png", RgbaImage::new(16, 16));
    let result = DetectResult::from(vec![DetectItem::new(
      "cat",
      0.5,
      BoundingBox::new(2.0, 2.0, 8.0, 8.0),
    )]);

    let err = output.render_result(&frame, &result).unwrap_err();
    assert!(matches!(err, SaveImageFileError::FontError(FontError::Missing)));
    assert!(!output.image_path("cat").exists());
  }
}
