// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/tiling.rs - 栅格分块窗口
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

/// 像素窗口，原点为 (col, row)，范围为 width x height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileWindow {
  pub col: usize,
  pub row: usize,
  pub width: usize,
  pub height: usize,
}

impl TileWindow {
  /// 正方形窗口
  pub fn new(col: usize, row: usize, size: usize) -> Self {
    Self {
      col,
      row,
      width: size,
      height: size,
    }
  }

  /// 在 raster_width x raster_height 的栅格上实际能读出的 (height, width)
  pub fn read_shape(&self, raster_width: usize, raster_height: usize) -> (usize, usize) {
    let h = raster_height.saturating_sub(self.row).min(self.height);
    let w = raster_width.saturating_sub(self.col).min(self.width);
    (h, w)
  }

  pub fn is_full_in(&self, raster_width: usize, raster_height: usize) -> bool {
    self.read_shape(raster_width, raster_height) == (self.height, self.width)
  }
}

/// 按 tile_size 对齐的规则网格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
  width: usize,
  height: usize,
  tile_size: usize,
}

impl TileGrid {
  pub fn new(width: usize, height: usize, tile_size: usize) -> Self {
    assert!(tile_size > 0, "tile_size 必须大于 0");
    Self {
      width,
      height,
      tile_size,
    }
  }

  pub fn tile_size(&self) -> usize {
    self.tile_size
  }

  /// 候选窗口数 ceil(W/T) * ceil(H/T)
  pub fn candidate_count(&self) -> usize {
    self.width.div_ceil(self.tile_size) * self.height.div_ceil(self.tile_size)
  }

  /// 完整窗口数 floor(W/T) * floor(H/T)
  pub fn full_count(&self) -> usize {
    (self.width / self.tile_size) * (self.height / self.tile_size)
  }

  /// 全部候选窗口，列在外层、行在内层；每次调用都从头开始
  pub fn windows(&self) -> TileWindows {
    TileWindows {
      grid: *self,
      col: 0,
      row: 0,
    }
  }

  /// 仅完整窗口，边缘残块被丢弃
  pub fn full_windows(&self) -> impl Iterator<Item = TileWindow> {
    let (width, height) = (self.width, self.height);
    self
      .windows()
      .filter(move |w| w.is_full_in(width, height))
  }
}

#[derive(Debug, Clone)]
pub struct TileWindows {
  grid: TileGrid,
  col: usize,
  row: usize,
}

impl Iterator for TileWindows {
  type Item = TileWindow;

  fn next(&mut self) -> Option<Self::Item> {
    let TileGrid {
      width,
      height,
      tile_size,
    } = self.grid;
    if self.col >= width || height == 0 {
      return None;
    }

    let window = TileWindow::new(self.col, self.row, tile_size);
    self.row += tile_size;
    if self.row >= height {
      self.row = 0;
      self.col += tile_size;
    }
    Some(window)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let TileGrid {
      width,
      height,
      tile_size,
    } = self.grid;
    if self.col >= width || height == 0 {
      return (0, Some(0));
    }
    let rows = height.div_ceil(tile_size);
    let cols_left = (width - self.col).div_ceil(tile_size);
    let remaining = cols_left * rows - self.row / tile_size;
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for TileWindows {}
