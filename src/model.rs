// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

/// 目标检测器
///
/// 检测器由调用方构造一次后注入，推理过程对调用方无状态，可在多次调用间复用。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

/// 像素坐标下的轴对齐边界框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl BoundingBox {
  pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
    Self {
      xmin,
      ymin,
      xmax,
      ymax,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: BoundingBox,
}

impl DetectItem {
  pub fn new(label: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }
}

/// 单张图像的检测结果，保持检测器的输出顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::Value::Array(
      self
        .items
        .iter()
        .map(|item| {
          serde_json::json!({
            "label": item.label,
            "score": item.score,
            "box": {
              "xmin": item.bbox.xmin,
              "ymin": item.bbox.ymin,
              "xmax": item.bbox.xmax,
              "ymax": item.bbox.ymax,
            },
          })
        })
        .collect(),
    )
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod coco;
pub use self::coco::{COCO_LABELS, coco_label};

#[cfg(feature = "model_detr")]
mod detr;
#[cfg(feature = "model_detr")]
pub use self::detr::{Detr, DetrBuilder, DetrError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_keeps_detector_fields() {
    let result = DetectResult::from(vec![DetectItem::new(
      "cat",
      0.93,
      BoundingBox::new(10.0, 10.0, 50.0, 50.0),
    )]);

    let json = result.to_json();
    assert_eq!(json[0]["label"], "cat");
    assert_eq!(json[0]["box"]["xmax"], 50.0);
    assert_eq!(result.len(), 1);
  }

  #[test]
  fn model_by_reference() {
    struct Fixed;
    impl Model for Fixed {
      type Input = u32;
      type Output = u32;
      type Error = std::convert::Infallible;

      fn infer(&self, input: &u32) -> Result<u32, Self::Error> {
        Ok(*input + 1)
      }
    }

    fn call<M: Model<Input = u32, Output = u32>>(model: M) -> Option<u32> {
      model.infer(&1).ok()
    }

    let model = Fixed;
    assert_eq!(call(&model), Some(2));
    assert_eq!(call(&model), Some(2));
  }
}
