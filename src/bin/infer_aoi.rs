// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/bin/infer_aoi.rs - 单个 AOI 栅格推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use tidewatch::{
  FromUrl,
  args::{ConfigArgs, EndpointArgs},
  model::OnnxModelBuilder,
  output::{SinkWrapper, upsert_in_batch},
  pipeline::TilePipeline,
  raster::RasterWrapper,
};

/// 对单个 AOI 栅格分块推理并写入结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// AOI 标识
  #[arg(long, value_name = "ID")]
  pub aoi_id: String,
  /// 11 波段栅格地址，例如 geotiff:///data/aoi.tif 或 file:///data/aoi.tif
  #[arg(long, value_name = "RASTER")]
  pub input: Url,
  #[command(flatten)]
  pub endpoints: EndpointArgs,
  #[command(flatten)]
  pub config: ConfigArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.endpoints.model);
  info!("输入栅格: {}", args.input);
  info!("结果存储: {}", args.endpoints.output);

  let config = args.config.load()?;
  let model = OnnxModelBuilder::from_url(&args.endpoints.model)?.build()?;
  let sink = SinkWrapper::from_url(&args.endpoints.output)?;
  let raster = RasterWrapper::from_url(&args.input)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let pipeline = TilePipeline::new(&model, &config)?;
  let result = pipeline.process_raster(&args.aoi_id, &raster)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  if result.payloads.is_empty() {
    info!("没有需要写入的结果");
  } else {
    upsert_in_batch(&sink, &result.payloads, config.batch_size)?;
  }
  println!("{}", serde_json::to_string_pretty(&result.summary)?);

  Ok(())
}
