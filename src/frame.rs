// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 图像帧定义
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

use image::RgbaImage;

/// 已解码的单张图像，处理循环独占，保存后即释放
#[derive(Debug, Clone)]
pub struct ImageFrame {
  pub path: PathBuf,
  /// 输出文件基础名
  pub name: String,
  pub image: RgbaImage,
}

impl ImageFrame {
  pub fn new(path: impl Into<PathBuf>, image: RgbaImage) -> Self {
    let path = path.into();
    let name = base_name(&path);
    Self { path, name, image }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 文件名中第一个 `.` 之前的部分，`cat.tar.jpg` 得到 `cat`
pub fn base_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy())
    .and_then(|name| name.split('.').next().map(str::to_string))
    .unwrap_or_default()
}
