// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/frame.rs - 多波段图块数据
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

use ndarray::{Array3, ArrayView2, Axis};

/// 一个窗口读出的像素数据，布局为 (bands, rows, cols)，可能包含 NaN
#[derive(Debug, Clone, PartialEq)]
pub struct BandTile {
  data: Array3<f32>,
}

impl From<Array3<f32>> for BandTile {
  fn from(data: Array3<f32>) -> Self {
    Self::new(data)
  }
}

impl BandTile {
  pub fn new(data: Array3<f32>) -> Self {
    Self { data }
  }

  pub fn bands(&self) -> usize {
    self.data.dim().0
  }

  pub fn height(&self) -> usize {
    self.data.dim().1
  }

  pub fn width(&self) -> usize {
    self.data.dim().2
  }

  /// (bands, height, width)
  pub fn shape(&self) -> (usize, usize, usize) {
    self.data.dim()
  }

  /// 宽高都等于 tile_size 才算完整图块
  pub fn is_full(&self, tile_size: usize) -> bool {
    self.height() == tile_size && self.width() == tile_size
  }

  pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
    (index < self.bands()).then(|| self.data.index_axis(Axis(0), index))
  }

  /// 单波段算术平均；含 NaN 时结果为 NaN，空波段返回 None
  pub fn band_mean(&self, index: usize) -> Option<f32> {
    self.band(index)?.mean()
  }

  pub fn data(&self) -> &Array3<f32> {
    &self.data
  }

  /// 按 CHW 逻辑顺序展开，供模型输入使用
  pub fn to_chw_vec(&self) -> Vec<f32> {
    self.data.iter().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn band_mean_propagates_nan() {
    let mut data = Array3::from_elem((3, 2, 2), 1.0f32);
    data[[1, 0, 1]] = f32::NAN;
    let tile = BandTile::new(data);
    assert_eq!(tile.band_mean(0), Some(1.0));
    assert!(tile.band_mean(1).unwrap().is_nan());
    assert_eq!(tile.band_mean(3), None);
  }

  #[test]
  fn full_tile_requires_both_dimensions() {
    let tile = BandTile::new(Array3::zeros((11, 4, 3)));
    assert!(!tile.is_full(4));
    assert!(BandTile::new(Array3::zeros((11, 4, 4))).is_full(4));
  }

  #[test]
  fn chw_vec_is_band_major() {
    let data = Array3::from_shape_fn((2, 2, 2), |(b, r, c)| (b * 4 + r * 2 + c) as f32);
    let tile = BandTile::new(data);
    assert_eq!(tile.to_chw_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
  }
}
