// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/annotate.rs - 图像目标检测标注
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_annotate::{
  FromUrl, RunOptions,
  model::DetrBuilder,
  output::{RenderStyle, load_font},
};
use tracing::{debug, info};

/// Shanan 图像标注参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// DETR ONNX 模型，例如 detr:///models/detr-resnet-101.onnx?threshold=0.9
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像路径
  #[arg(required = true, value_name = "IMAGES")]
  pub images: Vec<PathBuf>,
  /// 只绘制该标签的目标
  #[arg(long, value_name = "LABEL")]
  pub object: Option<String>,
  /// 不显示置信度
  #[arg(long)]
  pub no_score: bool,
  /// 标签字体文件（TrueType/OpenType）
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 标签字号
  #[arg(long, default_value = "12", value_name = "SIZE")]
  pub font_size: f32,
  /// 输出目录
  #[arg(long, default_value = "output/transformers", value_name = "DIR")]
  pub output_dir: PathBuf,
  /// 不输出状态信息
  #[arg(long)]
  pub quiet: bool,
  /// 过滤生效时仍显示匹配目标的标签
  #[arg(long)]
  pub label_when_filtered: bool,
  /// 以 JSON 格式输出全部检测结果
  #[arg(long)]
  pub json: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  debug!("模型文件路径: {}", args.model);
  debug!("输入图像数量: {}", args.images.len());
  debug!("输出目录: {}", args.output_dir.display());

  let mut style = RenderStyle::default();
  if let Some(path) = &args.font {
    style = style.with_font(load_font(path)?);
  }

  let model = DetrBuilder::from_url(&args.model)?.build()?;

  let options = RunOptions {
    label_filter: args.object,
    show_score: !args.no_score,
    font_size: args.font_size,
    output_dir: args.output_dir,
    verbose: !args.quiet,
    label_when_filtered: args.label_when_filtered,
  };

  let now = std::time::Instant::now();
  let detections = shanan_annotate::run(&model, &args.images, style, &options)?;
  if options.verbose {
    info!("处理完成，耗时: {:.2?}", now.elapsed());
  }

  if args.json {
    let json: Vec<_> = detections.iter().map(|result| result.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
  }

  Ok(())
}
