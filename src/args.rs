// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Args;
use tracing::info;
use url::Url;

use crate::config::{ConfigError, PipelineConfig, TileErrorPolicy};

/// 流水线配置参数，优先级高于配置文件与环境变量
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
  /// JSON 配置文件路径
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 图块边长（像素）
  #[arg(long, value_name = "PIXELS")]
  pub tile_size: Option<usize>,

  /// 水体指数阈值，平均值严格大于该值才判定为水体
  #[arg(long, value_name = "THRESHOLD", allow_hyphen_values = true)]
  pub water_threshold: Option<f32>,

  /// 单块推理失败时的处理方式
  /// - abort: 中止整个 AOI（默认）
  /// - skip: 记录警告并跳过该块
  #[arg(long, value_name = "POLICY")]
  pub tile_error_policy: Option<TileErrorPolicy>,

  /// 每批写入的记录数
  #[arg(long, value_name = "COUNT")]
  pub batch_size: Option<usize>,
}

impl ConfigArgs {
  /// 默认值 → 配置文件 → TIDEWATCH_* 环境变量 → 命令行参数
  pub fn load(&self) -> Result<PipelineConfig, ConfigError> {
    let base = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };
    let config = self.apply(base.with_env()?);
    config.validate()?;
    info!(
      "图块边长 {}, 水体阈值 {}, 失败策略 {:?}",
      config.tile_size, config.water_threshold, config.tile_error_policy
    );
    Ok(config)
  }

  pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
    if let Some(tile_size) = self.tile_size {
      config.tile_size = tile_size;
    }
    if let Some(threshold) = self.water_threshold {
      config.water_threshold = threshold;
    }
    if let Some(policy) = self.tile_error_policy {
      config.tile_error_policy = policy;
    }
    if let Some(batch_size) = self.batch_size {
      config.batch_size = batch_size;
    }
    config
  }
}

/// 模型与结果存储位置
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
  /// 模型地址，例如 onnx:///models?variant=resnet50
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 结果存储地址，例如 json:///var/lib/tidewatch/tiles.json 或 memory:
  #[arg(long, value_name = "OUTPUT", default_value = "memory:")]
  pub output: Url,
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(flatten)]
    endpoints: EndpointArgs,
  }

  #[test]
  fn command_line_overrides_defaults() {
    let cli = Cli::try_parse_from([
      "tidewatch",
      "--model",
      "onnx:///models",
      "--tile-size",
      "128",
      "--water-threshold",
      "-0.1",
      "--tile-error-policy",
      "skip",
    ])
    .unwrap();
    let config = cli.config.apply(PipelineConfig::default());
    assert_eq!(config.tile_size, 128);
    assert_eq!(config.water_threshold, -0.1);
    assert_eq!(config.tile_error_policy, TileErrorPolicy::Skip);
    assert_eq!(config.batch_size, PipelineConfig::default().batch_size);
    assert_eq!(cli.endpoints.output.scheme(), "memory");
  }

  #[test]
  fn unknown_policy_is_rejected() {
    let result = Cli::try_parse_from([
      "tidewatch",
      "--model",
      "onnx:///models",
      "--tile-error-policy",
      "retry",
    ]);
    assert!(result.is_err());
  }
}
