// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/font.rs - 字体加载
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

use ab_glyph::{Font, FontArc, PxScale};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("无效的字体文件 {0}: {1}")]
  InvalidFont(PathBuf, ab_glyph::InvalidFont),
  #[error("未配置字体，无法绘制标签文本")]
  Missing,
}

/// 从配置的路径加载字体，不做任何回退
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, FontError> {
  let path = path.as_ref();
  let data = std::fs::read(path).map_err(|e| {
    error!("无法读取字体文件 {}: {}", path.display(), e);
    FontError::IoError(path.to_path_buf(), e)
  })?;
  debug!("字体文件大小: {} 字节", data.len());

  FontArc::try_from_vec(data).map_err(|e| FontError::InvalidFont(path.to_path_buf(), e))
}

/// 字号按 em 像素计算（与 TrueType 加载器一致），转换为 ab_glyph 的行高缩放
pub fn em_scale(font: &impl Font, size: f32) -> PxScale {
  match font.units_per_em() {
    Some(units_per_em) if units_per_em > 0.0 => {
      PxScale::from(size * font.height_unscaled() / units_per_em)
    }
    _ => PxScale::from(size),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_font_file() {
    let result = load_font("/nonexistent/tahoma.ttf");
    assert!(matches!(result, Err(FontError::IoError(_, _))));
  }

  #[test]
  fn load_font_and_scale() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets/DejaVuSans.ttf");
    let font = load_font(&path).unwrap();

    // 行高大于 em，缩放值应大于字号
    let scale = em_scale(&font, 12.0);
    assert!(scale.y > 12.0);
    assert_eq!(scale.x, scale.y);
  }

  #[test]
  fn invalid_font_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ttf");
    std::fs::write(&path, b"definitely not a font").unwrap();

    let result = load_font(&path);
    assert!(matches!(result, Err(FontError::InvalidFont(_, _))));
  }
}
