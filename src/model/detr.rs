// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/detr.rs - DETR 目标检测模型
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

use std::sync::Mutex;

use image::{RgbaImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{BoundingBox, DetectItem, DetectResult, Model, coco_label},
};

const DETR_SHORTEST_EDGE: u32 = 800;
const DETR_LONGEST_EDGE: u32 = 1333;
const DETR_IMAGE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DETR_IMAGE_STD: [f32; 3] = [0.229, 0.224, 0.225];
const DETR_DEFAULT_THRESHOLD: f32 = 0.5;

const DETR_INPUT_PIXEL_VALUES: &str = "pixel_values";
const DETR_INPUT_PIXEL_MASK: &str = "pixel_mask";
const DETR_OUTPUT_LOGITS: &str = "logits";
const DETR_OUTPUT_BOXES: &str = "pred_boxes";

#[derive(Error, Debug)]
pub enum DetrError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数错误: {0}")]
  InvalidParameter(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状错误: 期望 {expected}, 实际 {actual:?}")]
  OutputShape { expected: String, actual: Vec<i64> },
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

impl DetrError {
  fn ort<E: std::fmt::Display>(err: E) -> Self {
    DetrError::OrtError(err.to_string())
  }
}

pub struct DetrBuilder {
  model_path: String,
  threshold: f32,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for DetrBuilder {
  const SCHEME: &'static str = "detr";
}

impl FromUrl for DetrBuilder {
  type Error = DetrError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetrError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = DetrBuilder {
      model_path: url.path().to_string(),
      threshold: DETR_DEFAULT_THRESHOLD,
      intra_threads: None,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threshold" => {
          let threshold = value
            .parse::<f32>()
            .map_err(|_| DetrError::InvalidParameter(format!("threshold={}", value)))?;
          builder = builder.threshold(threshold);
        }
        "threads" => {
          let threads = value
            .parse::<usize>()
            .map_err(|_| DetrError::InvalidParameter(format!("threads={}", value)))?;
          builder = builder.intra_threads(threads);
        }
        _ => debug!("忽略未知模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

impl DetrBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      threshold: DETR_DEFAULT_THRESHOLD,
      intra_threads: None,
    }
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<Detr, DetrError> {
    debug!("加载模型文件: {}", self.model_path);
    if !std::path::Path::new(&self.model_path).is_file() {
      error!("模型文件不存在: {}", self.model_path);
      return Err(DetrError::ModelPathError(self.model_path));
    }

    let mut builder = Session::builder()
      .map_err(DetrError::ort)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(DetrError::ort)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads).map_err(DetrError::ort)?;
    }

    debug!("创建 ONNX Runtime 推理会话");
    let session = builder
      .commit_from_file(&self.model_path)
      .map_err(DetrError::ort)?;

    let has_input = |name: &str| session.inputs.iter().any(|input| input.name == name);
    let has_output = |name: &str| session.outputs.iter().any(|output| output.name == name);

    if !has_input(DETR_INPUT_PIXEL_VALUES) {
      error!("模型缺少输入: {}", DETR_INPUT_PIXEL_VALUES);
      return Err(DetrError::ModelInvalid(format!(
        "缺少输入 {}",
        DETR_INPUT_PIXEL_VALUES
      )));
    }
    for name in [DETR_OUTPUT_LOGITS, DETR_OUTPUT_BOXES] {
      if !has_output(name) {
        error!("模型缺少输出: {}", name);
        return Err(DetrError::ModelInvalid(format!("缺少输出 {}", name)));
      }
    }
    let pixel_mask = has_input(DETR_INPUT_PIXEL_MASK);

    debug!("模型输入数量: {}", session.inputs.len());
    debug!("模型输出数量: {}", session.outputs.len());
    debug!("置信度阈值: {}", self.threshold);
    debug!("模型加载完成");

    Ok(Detr {
      session: Mutex::new(session),
      threshold: self.threshold,
      pixel_mask,
    })
  }
}

pub struct Detr {
  session: Mutex<Session>,
  threshold: f32,
  pixel_mask: bool,
}

/// 按 DETR 预处理规则计算缩放后尺寸：短边 800，长边不超过 1333
fn resized_shape(width: u32, height: u32) -> (u32, u32) {
  let (w, h) = (width as f64, height as f64);
  let (min_orig, max_orig) = (w.min(h), w.max(h));

  let mut size = DETR_SHORTEST_EDGE as f64;
  if max_orig / min_orig * size > DETR_LONGEST_EDGE as f64 {
    size = (DETR_LONGEST_EDGE as f64 * min_orig / max_orig).round();
  }

  if (height <= width && h == size) || (width <= height && w == size) {
    return (width, height);
  }

  if width < height {
    (size as u32, (size * h / w) as u32)
  } else {
    ((size * w / h) as u32, size as u32)
  }
}

/// RGBA 图像转 NCHW 浮点张量数据，丢弃 alpha 通道
fn preprocess(image: &RgbaImage) -> (Vec<f32>, usize, usize) {
  let (width, height) = resized_shape(image.width(), image.height());
  let resized = image::imageops::resize(image, width, height, FilterType::Triangle);

  let (w, h) = (width as usize, height as usize);
  let plane = w * h;
  let mut data = vec![0f32; 3 * plane];
  for (x, y, pixel) in resized.enumerate_pixels() {
    let idx = y as usize * w + x as usize;
    for c in 0..3 {
      let value = pixel[c] as f32 / 255.0;
      data[c * plane + idx] = (value - DETR_IMAGE_MEAN[c]) / DETR_IMAGE_STD[c];
    }
  }

  (data, h, w)
}

fn check_shape(
  shape: &[i64],
  last: Option<i64>,
  expected: &str,
) -> Result<(usize, usize), DetrError> {
  let valid = shape.len() == 3 && shape[0] == 1 && last.is_none_or(|last| shape[2] == last);
  if !valid || shape[1] < 0 || shape[2] < 2 {
    return Err(DetrError::OutputShape {
      expected: expected.to_string(),
      actual: shape.to_vec(),
    });
  }
  Ok((shape[1] as usize, shape[2] as usize))
}

/// softmax 后去掉最后的 "无目标" 类，取最高分类别，
/// 超过阈值的框由归一化 (cx, cy, w, h) 转为原图像素角点并截断取整
fn postprocess(
  logits: &[f32],
  logits_shape: &[i64],
  boxes: &[f32],
  boxes_shape: &[i64],
  width: u32,
  height: u32,
  threshold: f32,
) -> Result<Vec<DetectItem>, DetrError> {
  let (queries, classes) = check_shape(logits_shape, None, "[1, queries, classes + 1]")?;
  let (box_queries, _) = check_shape(boxes_shape, Some(4), "[1, queries, 4]")?;
  if box_queries != queries
    || logits.len() != queries * classes
    || boxes.len() != queries * 4
  {
    return Err(DetrError::OutputShape {
      expected: format!("[1, {}, 4]", queries),
      actual: boxes_shape.to_vec(),
    });
  }

  let (w, h) = (width as f32, height as f32);
  let mut items = Vec::new();
  for (row, bbox) in logits.chunks_exact(classes).zip(boxes.chunks_exact(4)) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|&l| (l - max).exp()).sum();

    let Some((class_id, &best)) = row[..classes - 1]
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.total_cmp(b.1))
    else {
      continue;
    };
    let score = (best - max).exp() / sum;
    if score <= threshold {
      continue;
    }

    let (cx, cy, bw, bh) = (bbox[0], bbox[1], bbox[2], bbox[3]);
    let bbox = BoundingBox::new(
      ((cx - 0.5 * bw) * w).trunc(),
      ((cy - 0.5 * bh) * h).trunc(),
      ((cx + 0.5 * bw) * w).trunc(),
      ((cy + 0.5 * bh) * h).trunc(),
    );
    items.push(DetectItem::new(coco_label(class_id), score, bbox));
  }

  Ok(items)
}

impl Model for Detr {
  type Input = RgbaImage;
  type Output = DetectResult;
  type Error = DetrError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (data, h, w) = preprocess(input);
    debug!("模型输入尺寸: {}x{}", w, h);

    let pixel_values =
      Tensor::from_array(([1usize, 3, h, w], data.into_boxed_slice())).map_err(DetrError::ort)?;

    let mut session = self.session.lock().map_err(|_| DetrError::SessionPoisoned)?;
    let outputs = if self.pixel_mask {
      let pixel_mask = Tensor::from_array(([1usize, h, w], vec![1i64; h * w].into_boxed_slice()))
        .map_err(DetrError::ort)?;
      session.run(ort::inputs![
        DETR_INPUT_PIXEL_VALUES => pixel_values,
        DETR_INPUT_PIXEL_MASK => pixel_mask
      ])
    } else {
      session.run(ort::inputs![DETR_INPUT_PIXEL_VALUES => pixel_values])
    }
    .map_err(DetrError::ort)?;

    let (logits_shape, logits) = outputs[DETR_OUTPUT_LOGITS]
      .try_extract_tensor::<f32>()
      .map_err(DetrError::ort)?;
    let (boxes_shape, boxes) = outputs[DETR_OUTPUT_BOXES]
      .try_extract_tensor::<f32>()
      .map_err(DetrError::ort)?;

    let items = postprocess(
      logits,
      logits_shape,
      boxes,
      boxes_shape,
      input.width(),
      input.height(),
      self.threshold,
    )?;

    Ok(DetectResult::from(items))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_keeps_aspect_ratio() {
    assert_eq!(resized_shape(640, 480), (1066, 800));
    assert_eq!(resized_shape(480, 640), (800, 1066));
    assert_eq!(resized_shape(1200, 800), (1200, 800));
  }

  #[test]
  fn resize_caps_longest_edge() {
    assert_eq!(resized_shape(2000, 500), (1332, 333));
  }

  #[test]
  fn builder_from_url() {
    let url = Url::parse("detr:///models/detr-resnet-101.onnx?threshold=0.9&threads=2").unwrap();
    let builder = DetrBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/detr-resnet-101.onnx");
    assert_eq!(builder.threshold, 0.9);
    assert_eq!(builder.intra_threads, Some(2));
  }

  #[test]
  fn builder_rejects_other_scheme() {
    let url = Url::parse("yolo26:///models/yolo.rknn").unwrap();
    assert!(matches!(
      DetrBuilder::from_url(&url),
      Err(DetrError::ModelPathError(_))
    ));

    let url = Url::parse("detr:///models/detr.onnx?threshold=high").unwrap();
    assert!(matches!(
      DetrBuilder::from_url(&url),
      Err(DetrError::InvalidParameter(_))
    ));
  }

  #[test]
  fn build_missing_model_file() {
    let result = DetrBuilder::new("/nonexistent/detr.onnx").build();
    assert!(matches!(result, Err(DetrError::ModelPathError(_))));
  }

  #[test]
  fn postprocess_thresholds_and_scales() {
    // 3 个查询，4 个类别，最后一类为无目标
    let logits = [
      10.0, 0.0, 0.0, 0.0, // 类别 0，高置信度
      0.0, 0.0, 0.0, 10.0, // 无目标
      0.0, 1.0, 0.0, 0.0, // 类别 1，低置信度
    ];
    let boxes = [
      0.5, 0.5, 0.5, 0.5, //
      0.1, 0.1, 0.1, 0.1, //
      0.2, 0.2, 0.2, 0.2,
    ];

    let items = postprocess(&logits, &[1, 3, 4], &boxes, &[1, 3, 4], 200, 100, 0.5).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "N/A");
    assert!(items[0].score > 0.99);
    assert_eq!(items[0].bbox, BoundingBox::new(50.0, 25.0, 150.0, 75.0));
  }

  #[test]
  fn postprocess_truncates_coordinates() {
    let mut logits = vec![0.0f32; 92];
    logits[17] = 20.0;
    let boxes = [0.333, 0.333, 0.2, 0.2];

    let items = postprocess(&logits, &[1, 1, 92], &boxes, &[1, 1, 4], 100, 100, 0.9).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "cat");
    assert_eq!(items[0].bbox, BoundingBox::new(23.0, 23.0, 43.0, 43.0));
  }

  #[test]
  fn postprocess_rejects_bad_shape() {
    let result = postprocess(&[0.0; 4], &[1, 4], &[0.0; 4], &[1, 1, 4], 10, 10, 0.5);
    assert!(matches!(result, Err(DetrError::OutputShape { .. })));
  }
}
