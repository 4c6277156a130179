// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/gate.rs - 推理准入判定
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

use serde::{Deserialize, Serialize};

use crate::{config::PipelineConfig, frame::BandTile, index::WaterIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterClass {
  Water,
  NonWater,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
  /// 校验波段含 NaN，既不推理也不计数
  Skip,
  Classified { class: WaterClass, mean_index: f32 },
}

impl GateDecision {
  pub fn is_water(&self) -> bool {
    matches!(
      self,
      GateDecision::Classified {
        class: WaterClass::Water,
        ..
      }
    )
  }
}

/// 水体/非水体计数，每次运行独占一份
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationTally {
  pub water: usize,
  pub non_water: usize,
}

impl ClassificationTally {
  pub fn increment(&mut self, class: WaterClass) {
    match class {
      WaterClass::Water => self.water += 1,
      WaterClass::NonWater => self.non_water += 1,
    }
  }

  pub fn total(&self) -> usize {
    self.water + self.non_water
  }
}

/// 无状态的逐块判定
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceGate {
  index: WaterIndex,
  validity_bands: Vec<usize>,
  water_threshold: f32,
}

impl InferenceGate {
  pub fn new(index: WaterIndex, validity_bands: Vec<usize>, water_threshold: f32) -> Self {
    Self {
      index,
      validity_bands,
      water_threshold,
    }
  }

  pub fn from_config(config: &PipelineConfig) -> Self {
    Self::new(
      WaterIndex::new(config.green_band, config.swir_band),
      config.validity_bands.clone(),
      config.water_threshold,
    )
  }

  /// 只检查校验波段；其他波段中的 NaN 不影响判定
  pub fn is_valid(&self, tile: &BandTile) -> bool {
    self
      .validity_bands
      .iter()
      .all(|&band| matches!(tile.band_mean(band), Some(mean) if !mean.is_nan()))
  }

  pub fn evaluate(&self, tile: &BandTile) -> GateDecision {
    if !self.is_valid(tile) {
      return GateDecision::Skip;
    }

    let mean_index = self.index.mean(tile).unwrap_or(f32::NAN);
    // NaN 比较恒为 false，归为非水体
    let class = if mean_index > self.water_threshold {
      WaterClass::Water
    } else {
      WaterClass::NonWater
    };
    GateDecision::Classified { class, mean_index }
  }
}

impl Default for InferenceGate {
  fn default() -> Self {
    Self::from_config(&PipelineConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array3, Axis};

  fn tile(green: f32, swir: f32) -> Array3<f32> {
    let mut data = Array3::from_elem((11, 8, 8), 0.1f32);
    data.index_axis_mut(Axis(0), 2).fill(green);
    data.index_axis_mut(Axis(0), 9).fill(swir);
    data
  }

  #[test]
  fn water_tile_is_eligible() {
    let decision = InferenceGate::default().evaluate(&BandTile::new(tile(0.8, 0.2)));
    assert!(decision.is_water());
  }

  #[test]
  fn negative_index_is_non_water() {
    let decision = InferenceGate::default().evaluate(&BandTile::new(tile(0.2, 0.8)));
    assert!(matches!(
      decision,
      GateDecision::Classified {
        class: WaterClass::NonWater,
        ..
      }
    ));
  }

  #[test]
  fn threshold_is_strict() {
    let decision = InferenceGate::default().evaluate(&BandTile::new(tile(0.5, 0.5)));
    assert!(!decision.is_water());
  }

  #[test]
  fn nan_index_is_non_water() {
    let decision = InferenceGate::default().evaluate(&BandTile::new(tile(0.0, 0.0)));
    match decision {
      GateDecision::Classified { class, mean_index } => {
        assert_eq!(class, WaterClass::NonWater);
        assert!(mean_index.is_nan());
      }
      GateDecision::Skip => panic!("tile should not be skipped"),
    }
  }

  #[test]
  fn nan_in_validity_band_skips() {
    for band in [2, 3, 4] {
      let mut data = tile(0.8, 0.2);
      data[[band, 3, 3]] = f32::NAN;
      assert_eq!(
        InferenceGate::default().evaluate(&BandTile::new(data)),
        GateDecision::Skip
      );
    }
  }

  #[test]
  fn nan_outside_validity_bands_is_ignored() {
    let mut data = tile(0.8, 0.2);
    data.index_axis_mut(Axis(0), 7).fill(f32::NAN);
    assert!(InferenceGate::default().evaluate(&BandTile::new(data)).is_water());
  }

  #[test]
  fn tally_counts_each_class() {
    let mut tally = ClassificationTally::default();
    tally.increment(WaterClass::Water);
    tally.increment(WaterClass::NonWater);
    tally.increment(WaterClass::Water);
    assert_eq!(tally, ClassificationTally { water: 2, non_water: 1 });
    assert_eq!(tally.total(), 3);
  }
}
