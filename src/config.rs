// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// 模型输出类别数
pub const NUM_CLASSES: usize = 11;
/// 栅格要求的波段数
pub const REQUIRED_BANDS: usize = 11;
pub const DEFAULT_TILE_SIZE: usize = 256;
pub const DEFAULT_WATER_THRESHOLD: f32 = 0.0;
pub const DEFAULT_BATCH_SIZE: usize = 100;

const ENV_LABELS: &str = "TIDEWATCH_LABELS";
const ENV_ALLOWED_LABEL_INDEX: &str = "TIDEWATCH_ALLOWED_LABEL_INDEX";
const ENV_PER_CLASS_THRESHOLD: &str = "TIDEWATCH_PER_CLASS_THRESHOLD";
const ENV_TILE_SIZE: &str = "TIDEWATCH_TILE_SIZE";
const ENV_WATER_THRESHOLD: &str = "TIDEWATCH_WATER_THRESHOLD";
const ENV_BATCH_SIZE: &str = "TIDEWATCH_BATCH_SIZE";
const ENV_TILE_ERROR_POLICY: &str = "TIDEWATCH_TILE_ERROR_POLICY";

const DEFAULT_LABELS: [&str; NUM_CLASSES] = [
  "Marine Debris",
  "Dense Sargassum",
  "Sparse Sargassum",
  "Natural Organic Material",
  "Ship",
  "Clouds",
  "Marine Water",
  "Sediment-Laden Water",
  "Foam",
  "Turbid Water",
  "Shallow Water",
];

const DEFAULT_ALLOWED_LABEL_INDEX: [usize; 5] = [0, 2, 3, 7, 8];

const DEFAULT_PER_CLASS_THRESHOLD: [f32; NUM_CLASSES] = [
  0.677_416_2,
  0.071_884_95,
  0.396_420_87,
  0.171_601_85,
  0.808_419,
  0.252_727_87,
  0.304_654_4,
  0.781_203,
  0.523_540_5,
  0.762_006_76,
  0.291_528_37,
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("环境变量 {name} 无效: {reason}")]
  InvalidEnv { name: &'static str, reason: String },
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 单块推理失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileErrorPolicy {
  /// 任意一块失败即中止整个 AOI
  #[default]
  Abort,
  /// 记录警告并跳过该块
  Skip,
}

impl std::str::FromStr for TileErrorPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "abort" => Ok(TileErrorPolicy::Abort),
      "skip" => Ok(TileErrorPolicy::Skip),
      other => Err(ConfigError::Invalid(format!("未知的失败处理策略: {}", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub tile_size: usize,
  pub band_count: usize,
  pub water_threshold: f32,
  pub green_band: usize,
  pub swir_band: usize,
  pub validity_bands: Vec<usize>,
  pub per_class_threshold: Vec<f32>,
  pub allowed_label_index: Vec<usize>,
  pub labels: Vec<String>,
  pub batch_size: usize,
  pub tile_error_policy: TileErrorPolicy,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      tile_size: DEFAULT_TILE_SIZE,
      band_count: REQUIRED_BANDS,
      water_threshold: DEFAULT_WATER_THRESHOLD,
      green_band: 2,
      swir_band: 9,
      validity_bands: vec![2, 3, 4],
      per_class_threshold: DEFAULT_PER_CLASS_THRESHOLD.to_vec(),
      allowed_label_index: DEFAULT_ALLOWED_LABEL_INDEX.to_vec(),
      labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
      batch_size: DEFAULT_BATCH_SIZE,
      tile_error_policy: TileErrorPolicy::default(),
    }
  }
}

impl PipelineConfig {
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    info!("读取配置文件: {}", path.as_ref().display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = serde_json::from_str(text)?;
    Ok(config)
  }

  /// 用环境变量覆盖当前配置，列表类变量使用 JSON 数组
  pub fn with_env(self) -> Result<Self, ConfigError> {
    self.with_vars(|name| std::env::var(name).ok())
  }

  pub fn with_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(raw) = lookup(ENV_LABELS) {
      self.labels = parse_env(ENV_LABELS, &raw)?;
    }
    if let Some(raw) = lookup(ENV_ALLOWED_LABEL_INDEX) {
      self.allowed_label_index = parse_env(ENV_ALLOWED_LABEL_INDEX, &raw)?;
    }
    if let Some(raw) = lookup(ENV_PER_CLASS_THRESHOLD) {
      self.per_class_threshold = parse_env(ENV_PER_CLASS_THRESHOLD, &raw)?;
    }
    if let Some(raw) = lookup(ENV_TILE_SIZE) {
      self.tile_size = parse_env(ENV_TILE_SIZE, &raw)?;
    }
    if let Some(raw) = lookup(ENV_WATER_THRESHOLD) {
      self.water_threshold = parse_env(ENV_WATER_THRESHOLD, &raw)?;
    }
    if let Some(raw) = lookup(ENV_BATCH_SIZE) {
      self.batch_size = parse_env(ENV_BATCH_SIZE, &raw)?;
    }
    if let Some(raw) = lookup(ENV_TILE_ERROR_POLICY) {
      self.tile_error_policy = raw.trim().parse().map_err(|e: ConfigError| {
        ConfigError::InvalidEnv {
          name: ENV_TILE_ERROR_POLICY,
          reason: e.to_string(),
        }
      })?;
    }
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.tile_size == 0 {
      return Err(ConfigError::Invalid("tile_size 必须大于 0".to_string()));
    }
    if self.batch_size == 0 {
      return Err(ConfigError::Invalid("batch_size 必须大于 0".to_string()));
    }
    if self.labels.len() != NUM_CLASSES {
      return Err(ConfigError::Invalid(format!(
        "标签表长度应为 {}, 实际为 {}",
        NUM_CLASSES,
        self.labels.len()
      )));
    }
    if self.per_class_threshold.len() != NUM_CLASSES {
      return Err(ConfigError::Invalid(format!(
        "类别阈值长度应为 {}, 实际为 {}",
        NUM_CLASSES,
        self.per_class_threshold.len()
      )));
    }
    if let Some(idx) = self
      .allowed_label_index
      .iter()
      .find(|&&idx| idx >= NUM_CLASSES)
    {
      return Err(ConfigError::Invalid(format!("允许的标签索引越界: {}", idx)));
    }
    let bands = [self.green_band, self.swir_band]
      .into_iter()
      .chain(self.validity_bands.iter().copied());
    for band in bands {
      if band >= self.band_count {
        return Err(ConfigError::Invalid(format!(
          "波段索引 {} 超出波段数 {}",
          band, self.band_count
        )));
      }
    }
    debug!("配置校验通过: {:?}", self);
    Ok(())
  }
}

fn parse_env<T: serde::de::DeserializeOwned>(
  name: &'static str,
  raw: &str,
) -> Result<T, ConfigError> {
  serde_json::from_str(raw.trim()).map_err(|e| ConfigError::InvalidEnv {
    name,
    reason: e.to_string(),
  })
}
