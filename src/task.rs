// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 检测任务
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
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::ImageFrame,
  input::{ImageFileInput, ImageFileInputError},
  model::{DetectResult, Model},
  output::{
    Render, SaveImageFileError, SaveImageFileOutput,
    draw::{Draw, LabelPolicy, RenderStyle},
    font::FontError,
  },
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("图像加载错误: {0}")]
  ImageLoad(#[from] ImageFileInputError),
  #[error("字体资源错误: {0}")]
  FontResource(#[from] FontError),
  #[error("输出写入错误: {0}")]
  OutputWrite(SaveImageFileError),
  #[error("检测器错误: {0}")]
  Detector(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<SaveImageFileError> for TaskError {
  fn from(err: SaveImageFileError) -> Self {
    match err {
      SaveImageFileError::FontError(err) => TaskError::FontResource(err),
      err => TaskError::OutputWrite(err),
    }
  }
}

/// 逐张图像检测、标注并保存，返回每张图像未经过滤的完整检测结果。
/// 遇到第一个错误即中止，已处理图像的输出文件保留。
#[derive(Default, Debug)]
pub struct DetectTask {
  verbose: bool,
}

impl DetectTask {
  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }
}

impl<I, M, O> Task<I, M, O> for DetectTask
where
  I: Iterator<Item = Result<ImageFrame, ImageFileInputError>>,
  M: Model<Input = RgbaImage, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ImageFrame, DetectResult, Error = SaveImageFileError>,
{
  type Output = Vec<DetectResult>;
  type Error = TaskError;

  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error> {
    let mut detections = Vec::with_capacity(input.size_hint().0);

    for frame in input {
      let frame = frame?;
      if self.verbose {
        info!("[+] 已加载图像 {}", frame.name);
      }

      let now = std::time::Instant::now();
      let result = model
        .infer(&frame.image)
        .map_err(|e| TaskError::Detector(Box::new(e)))?;
      debug!("推理完成，耗时: {:.2?}", now.elapsed());
      if self.verbose {
        info!("[-] 检测到 {} 个目标", result.len());
      }

      output.render_result(&frame, &result)?;
      detections.push(result);
    }

    Ok(detections)
  }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
  /// 只绘制该标签的目标
  pub label_filter: Option<String>,
  pub show_score: bool,
  pub font_size: f32,
  pub output_dir: PathBuf,
  pub verbose: bool,
  /// 过滤生效时仍显示匹配目标的标签
  pub label_when_filtered: bool,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      label_filter: None,
      show_score: true,
      font_size: 12.0,
      output_dir: PathBuf::from("output/transformers"),
      verbose: true,
      label_when_filtered: false,
    }
  }
}

impl RunOptions {
  pub fn label_policy(&self) -> LabelPolicy {
    LabelPolicy {
      label_filter: self.label_filter.clone(),
      show_score: self.show_score,
      label_when_filtered: self.label_when_filtered,
    }
  }
}

/// 对一组图像运行检测并保存标注结果
///
/// 检测器由调用方构造并注入，可在多次调用间复用。返回值按输入顺序给出每张图像
/// 的完整检测结果，标签过滤只影响绘制。可能需要绘制文字却未配置字体时，
/// 在处理任何图像之前返回字体错误。
pub fn run<M, P>(
  model: &M,
  images: &[P],
  style: RenderStyle,
  options: &RunOptions,
) -> Result<Vec<DetectResult>, TaskError>
where
  M: Model<Input = RgbaImage, Output = DetectResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
  P: AsRef<Path>,
{
  let policy = options.label_policy();
  if style.font.is_none() && policy.needs_text() {
    return Err(FontError::Missing.into());
  }

  let input = ImageFileInput::new(images);
  let draw = Draw::new(style.with_font_size(options.font_size));
  let output = SaveImageFileOutput::new(&options.output_dir, draw, policy);

  debug!("输出目录: {}", output.directory().display());
  DetectTask::default()
    .with_verbose(options.verbose)
    .run_task(input, model, &output)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectItem};
  use std::cell::RefCell;

  /// 记录收到的图像尺寸，返回固定结果
  struct Recording {
    seen: RefCell<Vec<(u32, u32)>>,
  }

  impl Model for Recording {
    type Input = RgbaImage;
    type Output = DetectResult;
    type Error = std::io::Error;

    fn infer(&self, input: &RgbaImage) -> Result<DetectResult, Self::Error> {
      self.seen.borrow_mut().push(input.dimensions());
      Ok(DetectResult::from(vec![DetectItem::new(
        "dog",
        0.7,
        BoundingBox::new(1.0, 1.0, 3.0, 3.0),
      )]))
    }
  }

  struct Collect {
    names: RefCell<Vec<String>>,
  }

  impl Render<ImageFrame, DetectResult> for Collect {
    type Error = SaveImageFileError;

    fn render_result(&self, frame: &ImageFrame, _: &DetectResult) -> Result<(), Self::Error> {
      self.names.borrow_mut().push(frame.name.clone());
      Ok(())
    }
  }

  #[test]
  fn task_keeps_input_order() {
    let frames: Vec<Result<ImageFrame, ImageFileInputError>> = vec![
      Ok(ImageFrame::new("a.png", RgbaImage::new(4, 2))),
      Ok(ImageFrame::new("b.png", RgbaImage::new(5, 3))),
    ];
    let model = Recording {
      seen: RefCell::new(Vec::new()),
    };
    let output = Collect {
      names: RefCell::new(Vec::new()),
    };

    let results = DetectTask::default()
      .run_task(frames.into_iter(), &model, &output)
      .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(*model.seen.borrow(), vec![(4, 2), (5, 3)]);
    assert_eq!(*output.names.borrow(), vec!["a", "b"]);
  }

  #[test]
  fn task_stops_at_first_error() {
    let frames = vec![
      Err(ImageFileInputError::IoError(
        PathBuf::from("missing.png"),
        std::io::Error::from(std::io::ErrorKind::NotFound),
      )),
      Ok(ImageFrame::new("b.png", RgbaImage::new(5, 3))),
    ];
    let model = Recording {
      seen: RefCell::new(Vec::new()),
    };
    let output = Collect {
      names: RefCell::new(Vec::new()),
    };

    let err = DetectTask::default()
      .with_verbose(true)
      .run_task(frames.into_iter(), &model, &output)
      .unwrap_err();

    assert!(matches!(err, TaskError::ImageLoad(_)));
    assert!(model.seen.borrow().is_empty());
    assert!(output.names.borrow().is_empty());
  }

  #[test]
  fn save_errors_map_to_taxonomy() {
    let font = TaskError::from(SaveImageFileError::FontError(FontError::Missing));
    assert!(matches!(font, TaskError::FontResource(FontError::Missing)));

    let io = TaskError::from(SaveImageFileError::IoError(
      PathBuf::from("/readonly"),
      std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    ));
    assert!(matches!(io, TaskError::OutputWrite(_)));
  }

  #[test]
  fn missing_font_fails_before_any_image() {
    let model = Recording {
      seen: RefCell::new(Vec::new()),
    };
    let dir = tempfile::tempdir().unwrap();
    let options = RunOptions {
      output_dir: dir.path().join("out"),
      ..RunOptions::default()
    };

    let err = run(
      &model,
      &["missing-a.png", "missing-b.png"],
      RenderStyle::default(),
      &options,
    )
    .unwrap_err();

    assert!(matches!(err, TaskError::FontResource(FontError::Missing)));
    assert!(model.seen.borrow().is_empty());
    assert!(!options.output_dir.exists());
  }

  #[test]
  fn default_options() {
    let options = RunOptions::default();
    assert_eq!(options.output_dir, PathBuf::from("output/transformers"));
    assert_eq!(options.font_size, 12.0);
    assert!(options.show_score && options.verbose);
    assert!(options.label_policy().label_filter.is_none());
  }
}
