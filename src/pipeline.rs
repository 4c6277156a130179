// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/pipeline.rs - 单个 AOI 的分块推理
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
use tracing::{debug, info, warn};

use crate::{
  config::{ConfigError, PipelineConfig, TileErrorPolicy},
  frame::BandTile,
  gate::{ClassificationTally, GateDecision, InferenceGate, WaterClass},
  label::{LabelDecoder, PredictionError},
  model::{ClassProbabilities, Model, ModelError},
  payload::InferencePayload,
  raster::{RasterError, RasterSource, RasterWrapper},
  tiling::{TileGrid, TileWindow},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("栅格错误: {0}")]
  Raster(#[from] RasterError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("预测结果无效: {0}")]
  Prediction(#[from] PredictionError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("波段数不符: 期望 {expected}, 实际 {actual}")]
  BandCount { expected: usize, actual: usize },
}

/// 一次 AOI 处理的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSummary {
  #[serde(flatten)]
  pub tally: ClassificationTally,
  pub detected_tiles: usize,
  /// 校验波段含 NaN 而跳过的图块
  pub skipped_invalid: usize,
  /// 边缘不足一整块而丢弃的窗口
  pub skipped_partial: usize,
  /// Skip 策略下推理失败的图块
  pub failed_tiles: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AoiInference {
  pub payloads: Vec<InferencePayload>,
  pub summary: TileSummary,
}

/// 驱动分块、准入、推理与解码的编排器；模型由调用方构建并借用
pub struct TilePipeline<'a, M> {
  model: &'a M,
  config: &'a PipelineConfig,
  gate: InferenceGate,
  decoder: LabelDecoder,
}

impl<'a, M> TilePipeline<'a, M>
where
  M: Model<Input = BandTile, Output = ClassProbabilities, Error = ModelError>,
{
  pub fn new(model: &'a M, config: &'a PipelineConfig) -> Result<Self, PipelineError> {
    config.validate()?;
    Ok(Self {
      model,
      config,
      gate: InferenceGate::from_config(config),
      decoder: LabelDecoder::from_config(config),
    })
  }

  /// 打开栅格文件并处理；文件句柄在本函数返回时释放，包括出错路径
  pub fn process_path<P: AsRef<Path>>(
    &self,
    aoi_id: &str,
    path: P,
  ) -> Result<AoiInference, PipelineError> {
    let raster = RasterWrapper::open(path)?;
    self.process_raster(aoi_id, &raster)
  }

  pub fn process_raster<R: RasterSource>(
    &self,
    aoi_id: &str,
    raster: &R,
  ) -> Result<AoiInference, PipelineError> {
    info!(
      "开始处理 AOI {}: {}x{}, {} 波段",
      aoi_id,
      raster.width(),
      raster.height(),
      raster.band_count()
    );
    if raster.band_count() != self.config.band_count {
      return Err(PipelineError::BandCount {
        expected: self.config.band_count,
        actual: raster.band_count(),
      });
    }

    let (payloads, mut summary) = self.tile_raster(aoi_id, raster, TileSummary::default())?;
    summary.detected_tiles = payloads.len();
    info!(
      "AOI {} 处理完成: 水体 {}, 非水体 {}, 检出 {}",
      aoi_id, summary.tally.water, summary.tally.non_water, summary.detected_tiles
    );
    Ok(AoiInference { payloads, summary })
  }

  /// 计数随调用传入并返回，不在运行之间共享
  pub fn tile_raster<R: RasterSource>(
    &self,
    aoi_id: &str,
    raster: &R,
    mut summary: TileSummary,
  ) -> Result<(Vec<InferencePayload>, TileSummary), PipelineError> {
    let tile_size = self.config.tile_size;
    let grid = TileGrid::new(raster.width(), raster.height(), tile_size);
    debug!(
      "候选窗口 {}, 完整窗口 {}",
      grid.candidate_count(),
      grid.full_count()
    );

    let mut payloads = Vec::new();
    for window in grid.windows() {
      let tile = raster.read_window(&window)?;
      if !tile.is_full(tile_size) {
        debug!("丢弃边缘窗口 ({}, {}): {:?}", window.col, window.row, tile.shape());
        summary.skipped_partial += 1;
        continue;
      }

      let class = match self.gate.evaluate(&tile) {
        GateDecision::Skip => {
          debug!("窗口 ({}, {}) 校验波段含 NaN, 跳过", window.col, window.row);
          summary.skipped_invalid += 1;
          continue;
        }
        GateDecision::Classified { class, mean_index } => {
          debug!("窗口 ({}, {}) 平均水体指数 {}", window.col, window.row, mean_index);
          class
        }
      };
      summary.tally.increment(class);
      if class != WaterClass::Water {
        continue;
      }

      match self.infer_tile(aoi_id, raster, &window, &tile) {
        Ok(Some(payload)) => payloads.push(payload),
        Ok(None) => {}
        Err(e) if self.config.tile_error_policy == TileErrorPolicy::Skip => {
          warn!("窗口 ({}, {}) 推理失败, 跳过: {}", window.col, window.row, e);
          summary.failed_tiles += 1;
        }
        Err(e) => return Err(e),
      }
    }

    Ok((payloads, summary))
  }

  fn infer_tile<R: RasterSource>(
    &self,
    aoi_id: &str,
    raster: &R,
    window: &TileWindow,
    tile: &BandTile,
  ) -> Result<Option<InferencePayload>, PipelineError> {
    let probs = self.model.infer(tile)?;
    let decision = probs.decide(&self.config.per_class_threshold);
    let decoded = self.decoder.decode(&decision);
    if decoded.is_empty() {
      debug!("窗口 ({}, {}) 无有效标签", window.col, window.row);
      return Ok(None);
    }

    let bounds = raster.transform().window_bounds(window);
    debug!(
      "窗口 ({}, {}) 检出 {:?} @ {:?}",
      window.col, window.row, decoded.labels, bounds
    );
    let prediction = decoded.into_prediction(&probs)?;
    Ok(Some(InferencePayload::new(aoi_id, bounds, prediction)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::{GeoTransform, Raster};
  use ndarray::Array3;

  struct Unreliable;

  impl Model for Unreliable {
    type Input = BandTile;
    type Output = ClassProbabilities;
    type Error = ModelError;

    fn infer(&self, _input: &BandTile) -> Result<ClassProbabilities, ModelError> {
      Err(ModelError::Backend("device lost".to_string()))
    }
  }

  fn water_raster(size: usize) -> Raster {
    let mut data = Array3::from_elem((11, size, size), 0.1f32);
    data.index_axis_mut(ndarray::Axis(0), 2).fill(0.8);
    data.index_axis_mut(ndarray::Axis(0), 9).fill(0.2);
    Raster::new(data, GeoTransform::default())
  }

  fn config(tile_size: usize, policy: TileErrorPolicy) -> PipelineConfig {
    PipelineConfig {
      tile_size,
      tile_error_policy: policy,
      ..PipelineConfig::default()
    }
  }

  #[test]
  fn tile_error_aborts_by_default() {
    let config = config(4, TileErrorPolicy::Abort);
    let pipeline = TilePipeline::new(&Unreliable, &config).unwrap();
    let err = pipeline.process_raster("aoi", &water_raster(8)).unwrap_err();
    assert!(matches!(err, PipelineError::Model(ModelError::Backend(_))));
  }

  #[test]
  fn skip_policy_counts_failures() {
    let config = config(4, TileErrorPolicy::Skip);
    let pipeline = TilePipeline::new(&Unreliable, &config).unwrap();
    let result = pipeline.process_raster("aoi", &water_raster(8)).unwrap();
    assert!(result.payloads.is_empty());
    assert_eq!(result.summary.failed_tiles, 4);
    assert_eq!(result.summary.tally.water, 4);
  }

  #[test]
  fn band_count_mismatch_is_rejected() {
    let config = config(4, TileErrorPolicy::Abort);
    let pipeline = TilePipeline::new(&Unreliable, &config).unwrap();
    let raster = Raster::new(Array3::zeros((3, 8, 8)), GeoTransform::default());
    assert!(matches!(
      pipeline.process_raster("aoi", &raster),
      Err(PipelineError::BandCount { expected: 11, actual: 3 })
    ));
  }

  #[test]
  fn invalid_config_is_rejected() {
    let config = config(0, TileErrorPolicy::Abort);
    assert!(matches!(
      TilePipeline::new(&Unreliable, &config),
      Err(PipelineError::Config(_))
    ));
  }

  #[test]
  fn missing_file_propagates_raster_error() {
    let config = config(4, TileErrorPolicy::Skip);
    let pipeline = TilePipeline::new(&Unreliable, &config).unwrap();
    let err = pipeline
      .process_path("aoi", "/nonexistent/tidewatch/aoi.tif")
      .unwrap_err();
    assert!(matches!(err, PipelineError::Raster(_)));
  }

  #[test]
  fn summary_serializes_flat() {
    let summary = TileSummary {
      tally: ClassificationTally { water: 3, non_water: 1 },
      detected_tiles: 2,
      ..TileSummary::default()
    };
    let value = serde_json::to_value(summary).unwrap();
    assert_eq!(value["water"], 3);
    assert_eq!(value["non_water"], 1);
    assert_eq!(value["detected_tiles"], 2);
  }
}
