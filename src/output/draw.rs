// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::FontArc;
use image::{Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::{
  model::{BoundingBox, DetectItem, DetectResult},
  output::font::{FontError, em_scale},
};

// 边框与标签的绘制常量
const BOX_RADIUS: i32 = 5;
const BOX_OUTLINE_WIDTH: i32 = 2;
const LABEL_RADIUS: i32 = 2;
const LABEL_OFFSET: i32 = 4;
const LABEL_TEXT_INSET: i32 = 4;
// 标签背景的上、右、下内边距
const LABEL_PADDING: (i32, i32, i32) = (4, 7, 3);

const BOX_COLOR: [u8; 3] = [0, 172, 255];
const BOX_ALPHA: f32 = 0.25;
const TEXT_COLOR: [u8; 3] = [0, 0, 0];
const TEXT_BG_COLOR: [u8; 3] = [255, 255, 255];
const FONT_SIZE: f32 = 12.0;

/// 绘制样式，一次运行内保持不变
#[derive(Clone)]
pub struct RenderStyle {
  pub box_color: [u8; 3],
  /// 边框填充的不透明度 (0.0 - 1.0)
  pub box_alpha: f32,
  pub text_color: [u8; 3],
  pub text_bg_color: [u8; 3],
  pub font: Option<FontArc>,
  /// em 像素字号
  pub font_size: f32,
}

impl Default for RenderStyle {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      box_alpha: BOX_ALPHA,
      text_color: TEXT_COLOR,
      text_bg_color: TEXT_BG_COLOR,
      font: None,
      font_size: FONT_SIZE,
    }
  }
}

impl std::fmt::Debug for RenderStyle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RenderStyle")
      .field("box_color", &self.box_color)
      .field("box_alpha", &self.box_alpha)
      .field("text_color", &self.text_color)
      .field("text_bg_color", &self.text_bg_color)
      .field("font", &self.font.is_some())
      .field("font_size", &self.font_size)
      .finish()
  }
}

impl RenderStyle {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  fn fill_color(&self) -> Rgba<u8> {
    let [r, g, b] = self.box_color;
    Rgba([r, g, b, (self.box_alpha.clamp(0.0, 1.0) * 255.0) as u8])
  }

  fn outline_color(&self) -> Rgba<u8> {
    let [r, g, b] = self.box_color;
    Rgba([r, g, b, 255])
  }
}

/// 决定哪些检测结果需要绘制，以及标签上显示什么
#[derive(Debug, Clone)]
pub struct LabelPolicy {
  pub label_filter: Option<String>,
  pub show_score: bool,
  /// 过滤生效时仍显示匹配目标的标签
  pub label_when_filtered: bool,
}

impl Default for LabelPolicy {
  fn default() -> Self {
    Self {
      label_filter: None,
      show_score: true,
      label_when_filtered: false,
    }
  }
}

impl LabelPolicy {
  fn filter(&self) -> Option<&str> {
    self.label_filter.as_deref().filter(|label| !label.is_empty())
  }

  pub fn should_draw(&self, item: &DetectItem) -> bool {
    self.filter().is_none_or(|label| item.label == label)
  }

  pub fn display_label<'a>(&self, item: &'a DetectItem) -> Option<&'a str> {
    if self.filter().is_none() || self.label_when_filtered {
      Some(item.label.as_str())
    } else {
      None
    }
  }

  pub fn display_score(&self, item: &DetectItem) -> Option<f32> {
    self.show_score.then_some(item.score)
  }

  /// 是否可能需要绘制文字
  pub fn needs_text(&self) -> bool {
    self.show_score || self.filter().is_none() || self.label_when_filtered
  }
}

/// 标签文本：`label | 0.93`、`label`、`0.93` 或空
pub fn label_text(label: Option<&str>, score: Option<f32>) -> String {
  let mut text = label.unwrap_or_default().to_string();
  if let Some(score) = score {
    if text.is_empty() {
      text = format!("{:.2}", score);
    } else {
      text.push_str(&format!(" | {:.2}", score));
    }
  }
  text
}

type Corners = (i32, i32, i32, i32);

fn inside_rounded_rect(x: i32, y: i32, (x0, y0, x1, y1): Corners, radius: i32) -> bool {
  if x < x0 || x > x1 || y < y0 || y > y1 {
    return false;
  }
  let r = radius
    .min(x1.saturating_sub(x0) / 2)
    .min(y1.saturating_sub(y0) / 2)
    .max(0);
  let dx = (x - x.clamp(x0 + r, x1 - r)) as f32;
  let dy = (y - y.clamp(y0 + r, y1 - r)) as f32;
  dx * dx + dy * dy <= (r as f32 + 0.5).powi(2)
}

/// 在画布上绘制圆角矩形，坐标包含边界，超出画布的部分被裁剪。
/// 像素直接写入而不混合，覆盖层随后统一合成。
fn draw_rounded_rect_mut(
  canvas: &mut RgbaImage,
  rect: Corners,
  radius: i32,
  fill: Option<Rgba<u8>>,
  outline: Option<(Rgba<u8>, i32)>,
) {
  let (x0, y0, x1, y1) = rect;
  let (w, h) = (canvas.width() as i32, canvas.height() as i32);

  for y in y0.max(0)..=y1.min(h - 1) {
    for x in x0.max(0)..=x1.min(w - 1) {
      if !inside_rounded_rect(x, y, rect, radius) {
        continue;
      }

      let border = outline.and_then(|(color, width)| {
        let inner = (
          x0.saturating_add(width),
          y0.saturating_add(width),
          x1.saturating_sub(width),
          y1.saturating_sub(width),
        );
        (!inside_rounded_rect(x, y, inner, (radius - width).max(0))).then_some(color)
      });

      if let Some(color) = border.or(fill) {
        canvas.put_pixel(x as u32, y as u32, color);
      }
    }
  }
}

/// 将覆盖层按 alpha 合成到底图上，覆盖层全透明处保持底图原值
pub fn alpha_composite(base: &RgbaImage, overlay: &RgbaImage) -> RgbaImage {
  let mut image = base.clone();
  imageops::overlay(&mut image, overlay, 0, 0);
  image
}

pub struct Draw {
  style: RenderStyle,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(RenderStyle::default())
  }
}

impl Draw {
  pub fn new(style: RenderStyle) -> Self {
    Self { style }
  }

  /// 绘制一个检测框及其标签，返回合成后的新图像，输入图像不变
  pub fn annotate(
    &self,
    image: &RgbaImage,
    bbox: &BoundingBox,
    label: Option<&str>,
    score: Option<f32>,
  ) -> Result<RgbaImage, FontError> {
    let text = label_text(label.filter(|l| !l.is_empty()), score);
    let mut overlay = RgbaImage::new(image.width(), image.height());

    let x_min = bbox.xmin.round() as i32;
    let y_min = bbox.ymin.round() as i32;
    let x_max = bbox.xmax.round() as i32;
    let y_max = bbox.ymax.round() as i32;

    draw_rounded_rect_mut(
      &mut overlay,
      (x_min, y_min, x_max, y_max),
      BOX_RADIUS,
      Some(self.style.fill_color()),
      Some((self.style.outline_color(), BOX_OUTLINE_WIDTH)),
    );

    if !text.is_empty() {
      let font = self.style.font.as_ref().ok_or(FontError::Missing)?;
      let scale = em_scale(font, self.style.font_size);
      let (text_width, text_height) = text_size(scale, font, &text);

      let left = x_min;
      let top = y_max.saturating_add(LABEL_OFFSET);
      let (pad_top, pad_right, pad_bottom) = LABEL_PADDING;
      let plate = (
        left,
        top.saturating_sub(pad_top),
        left
          .saturating_add(text_width as i32)
          .saturating_add(pad_right),
        top
          .saturating_add(text_height as i32)
          .saturating_add(pad_bottom),
      );

      // 标签完全落在画布外时不绘制
      let (w, h) = (overlay.width() as i32, overlay.height() as i32);
      if plate.0 < w && plate.1 < h && plate.2 >= 0 && plate.3 >= 0 {
        let [r, g, b] = self.style.text_bg_color;
        draw_rounded_rect_mut(
          &mut overlay,
          plate,
          LABEL_RADIUS,
          Some(Rgba([r, g, b, 255])),
          None,
        );

        let [r, g, b] = self.style.text_color;
        draw_text_mut(
          &mut overlay,
          Rgba([r, g, b, 255]),
          left.saturating_add(LABEL_TEXT_INSET),
          top,
          scale,
          font,
          &text,
        );
      }
    }

    Ok(alpha_composite(image, &overlay))
  }

  /// 按标签策略逐个绘制检测结果，未通过过滤的目标不绘制
  pub fn draw_detections(
    &self,
    image: &RgbaImage,
    result: &DetectResult,
    policy: &LabelPolicy,
  ) -> Result<RgbaImage, FontError> {
    let mut image = image.clone();
    for item in result.iter().filter(|item| policy.should_draw(item)) {
      image = self.annotate(
        &image,
        &item.bbox,
        policy.display_label(item),
        policy.display_score(item),
      )?;
    }
    Ok(image)
  }
}
