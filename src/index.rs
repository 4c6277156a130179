// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/index.rs - 水体光谱指数
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

use ndarray::{Array2, Zip};

use crate::frame::BandTile;

/// 归一化差值水体指数 (green - swir) / (green + swir)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterIndex {
  pub green_band: usize,
  pub swir_band: usize,
}

impl Default for WaterIndex {
  fn default() -> Self {
    Self {
      green_band: 2,
      swir_band: 9,
    }
  }
}

/// 分母恰为 0 时返回 NaN
pub fn normalized_difference(a: f32, b: f32) -> f32 {
  let denom = a + b;
  if denom == 0.0 {
    f32::NAN
  } else {
    (a - b) / denom
  }
}

impl WaterIndex {
  pub fn new(green_band: usize, swir_band: usize) -> Self {
    Self {
      green_band,
      swir_band,
    }
  }

  /// 逐像素指数；所需波段不存在时返回 None
  pub fn evaluate(&self, tile: &BandTile) -> Option<Array2<f32>> {
    let green = tile.band(self.green_band)?;
    let swir = tile.band(self.swir_band)?;
    Some(Zip::from(&green).and(&swir).map_collect(|&g, &s| normalized_difference(g, s)))
  }

  /// 全图块平均指数，NaN 照常传播
  pub fn mean(&self, tile: &BandTile) -> Option<f32> {
    self.evaluate(tile)?.mean()
  }
}
