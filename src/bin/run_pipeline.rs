// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/bin/run_pipeline.rs - 按清单处理全部 AOI
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tidewatch::{
  FromUrl,
  args::{ConfigArgs, EndpointArgs},
  config::PipelineConfig,
  model::OnnxModelBuilder,
  output::SinkWrapper,
  task::{
    AoiEntry, JsonRunLog, LocalFetcher, PipelineRun, RunLog, RunStatus, RunSummary, Task,
    TracingRunLog, load_manifest, new_run_id,
  },
};

/// 按 AOI 清单顺序处理全部文件分片
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// AOI 清单（JSON 数组: aoi_id, aoi_name, file_ids）
  #[arg(long, value_name = "FILE")]
  pub manifest: PathBuf,
  /// 已下载栅格所在目录
  #[arg(long, value_name = "DIR")]
  pub data_dir: PathBuf,
  /// 运行状态记录文件，缺省时只输出日志
  #[arg(long, value_name = "FILE")]
  pub run_log: Option<PathBuf>,
  /// 运行 ID，缺省时按时间生成
  #[arg(long, value_name = "ID")]
  pub run_id: Option<String>,
  #[command(flatten)]
  pub endpoints: EndpointArgs,
  #[command(flatten)]
  pub config: ConfigArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.endpoints.model);
  info!("AOI 清单: {}", args.manifest.display());
  info!("结果存储: {}", args.endpoints.output);

  let config = args.config.load()?;
  let aois = load_manifest(&args.manifest)?;
  match &args.run_log {
    Some(path) => execute(&args, &config, &aois, JsonRunLog::new(path)),
    None => execute(&args, &config, &aois, TracingRunLog),
  }
}

fn execute<L: RunLog>(
  args: &Args,
  config: &PipelineConfig,
  aois: &[AoiEntry],
  log: L,
) -> Result<()> {
  let run = PipelineRun::new(
    args.run_id.clone().unwrap_or_else(new_run_id),
    config,
    LocalFetcher::new(&args.data_dir),
    log,
  );
  run.report(RunStatus::Started, &RunSummary::new(), false);

  let model = OnnxModelBuilder::from_url(&args.endpoints.model)
    .and_then(|builder| builder.build())
    .inspect_err(|_| run.report(RunStatus::Error, &RunSummary::new(), true))?;
  let sink = SinkWrapper::from_url(&args.endpoints.output)
    .inspect_err(|_| run.report(RunStatus::Error, &RunSummary::new(), true))?;

  let report = run.run_task(aois, &model, &sink)?;
  info!("运行 {} 写入 {} 条结果", report.run_id, report.saved);
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
