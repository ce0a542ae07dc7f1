// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::error;

use crate::frame::ImageFrame;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("无法读取图像 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("无法解码图像 {0}: {1}")]
  ImageLoadError(PathBuf, image::ImageError),
}

impl ImageFrame {
  /// 读取并解码图像，无论原始色彩模式如何都转换为 RGBA
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .and_then(|reader| reader.with_guessed_format())
      .map_err(|e| {
        error!("无法打开图像文件 {}: {}", path.display(), e);
        ImageFileInputError::IoError(path.to_path_buf(), e)
      })?
      .decode()
      .map_err(|e| {
        error!("无法解码图像文件 {}: {}", path.display(), e);
        ImageFileInputError::ImageLoadError(path.to_path_buf(), e)
      })?;

    Ok(ImageFrame::new(path, image.into_rgba8()))
  }
}

/// 按输入顺序逐张解码图像，前一张释放后才读取下一张
pub struct ImageFileInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl ImageFileInput {
  pub fn new<P: AsRef<Path>>(paths: &[P]) -> Self {
    let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    Self {
      paths: paths.into_iter(),
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<ImageFrame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.next().map(ImageFrame::open)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.paths.size_hint()
  }
}
