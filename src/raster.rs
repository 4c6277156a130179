// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/raster.rs - 多波段栅格输入
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

#[cfg(feature = "geotiff_input")]
use std::{fs::File, io::BufReader};
use std::path::Path;

use ndarray::{Array3, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::BandTile, tiling::TileWindow};

#[cfg(feature = "geotiff_input")]
mod geotiff;
#[cfg(feature = "geotiff_input")]
pub use self::geotiff::{GEOTIFF_SCHEME, GeoTiffRaster, read_geotiff, read_geotiff_from_buffer};

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("栅格解码错误: {0}")]
  Decode(String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
  #[error("栅格尺寸无效: {0}")]
  InvalidShape(String),
  #[error("读取窗口越界: 窗口 ({col}, {row}), 栅格 {width}x{height}")]
  WindowOutOfBounds {
    col: usize,
    row: usize,
    width: usize,
    height: usize,
  },
  #[error("栅格缺少地理参考 (ModelTransformation 或 PixelScale + Tiepoint)")]
  MissingGeoreference,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 像素坐标到地理坐标的仿射变换
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
  pub origin_x: f64,
  pub origin_y: f64,
  pub pixel_width: f64,
  /// 北向上影像通常为负
  pub pixel_height: f64,
  pub row_rotation: f64,
  pub col_rotation: f64,
}

impl Default for GeoTransform {
  fn default() -> Self {
    Self::new(0.0, 0.0, 1.0, -1.0)
  }
}

impl GeoTransform {
  pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
    Self {
      origin_x,
      origin_y,
      pixel_width,
      pixel_height,
      row_rotation: 0.0,
      col_rotation: 0.0,
    }
  }

  /// GDAL 顺序: [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
  pub fn from_gdal(coeffs: [f64; 6]) -> Self {
    Self {
      origin_x: coeffs[0],
      pixel_width: coeffs[1],
      row_rotation: coeffs[2],
      origin_y: coeffs[3],
      col_rotation: coeffs[4],
      pixel_height: coeffs[5],
    }
  }

  /// 像素角点 (col, row) 对应的地理坐标
  pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
    let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
    let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
    (x, y)
  }

  /// 以窗口左上角为原点的子变换
  pub fn for_window(&self, window: &TileWindow) -> GeoTransform {
    let (origin_x, origin_y) = self.apply(window.col as f64, window.row as f64);
    GeoTransform {
      origin_x,
      origin_y,
      ..*self
    }
  }

  pub fn window_bounds(&self, window: &TileWindow) -> GeoBounds {
    let local = self.for_window(window);
    let (w, h) = (window.width as f64, window.height as f64);
    let corners = [
      local.apply(0.0, 0.0),
      local.apply(w, 0.0),
      local.apply(0.0, h),
      local.apply(w, h),
    ];

    let mut bounds = GeoBounds {
      minx: f64::INFINITY,
      miny: f64::INFINITY,
      maxx: f64::NEG_INFINITY,
      maxy: f64::NEG_INFINITY,
    };
    for (x, y) in corners {
      bounds.minx = bounds.minx.min(x);
      bounds.miny = bounds.miny.min(y);
      bounds.maxx = bounds.maxx.max(x);
      bounds.maxy = bounds.maxy.max(y);
    }
    bounds
  }
}

/// 地理范围 (minx, miny, maxx, maxy)，序列化为 4 个浮点数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct GeoBounds {
  pub minx: f64,
  pub miny: f64,
  pub maxx: f64,
  pub maxy: f64,
}

impl From<[f64; 4]> for GeoBounds {
  fn from(v: [f64; 4]) -> Self {
    GeoBounds {
      minx: v[0],
      miny: v[1],
      maxx: v[2],
      maxy: v[3],
    }
  }
}

impl From<GeoBounds> for [f64; 4] {
  fn from(b: GeoBounds) -> Self {
    [b.minx, b.miny, b.maxx, b.maxy]
  }
}

impl GeoBounds {
  /// 入库时用作去重键
  pub fn key(&self) -> String {
    format!("{},{},{},{}", self.minx, self.miny, self.maxx, self.maxy)
  }
}

/// 栅格格式元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterProfile {
  pub driver: &'static str,
  pub width: usize,
  pub height: usize,
  pub count: usize,
  pub dtype: String,
  pub transform: GeoTransform,
}

pub trait RasterSource {
  fn width(&self) -> usize;
  fn height(&self) -> usize;
  fn band_count(&self) -> usize;
  fn transform(&self) -> &GeoTransform;
  fn profile(&self) -> RasterProfile;

  /// 读取窗口内全部波段；越过右/下边缘的部分被裁掉，返回形状可能小于窗口
  fn read_window(&self, window: &TileWindow) -> Result<BandTile, RasterError>;
}

/// 已解码到内存中的多波段栅格，数据布局为 (bands, rows, cols)
#[derive(Debug, Clone)]
pub struct Raster {
  data: Array3<f32>,
  transform: GeoTransform,
}

impl Raster {
  pub fn new(data: Array3<f32>, transform: GeoTransform) -> Self {
    Self { data, transform }
  }

  pub fn data(&self) -> &Array3<f32> {
    &self.data
  }
}

impl RasterSource for Raster {
  fn width(&self) -> usize {
    self.data.dim().2
  }

  fn height(&self) -> usize {
    self.data.dim().1
  }

  fn band_count(&self) -> usize {
    self.data.dim().0
  }

  fn transform(&self) -> &GeoTransform {
    &self.transform
  }

  fn profile(&self) -> RasterProfile {
    RasterProfile {
      driver: "MEM",
      width: self.width(),
      height: self.height(),
      count: self.band_count(),
      dtype: "float32".to_string(),
      transform: self.transform,
    }
  }

  fn read_window(&self, window: &TileWindow) -> Result<BandTile, RasterError> {
    let (width, height) = (self.width(), self.height());
    if window.col >= width || window.row >= height {
      return Err(RasterError::WindowOutOfBounds {
        col: window.col,
        row: window.row,
        width,
        height,
      });
    }

    let col_end = (window.col + window.width).min(width);
    let row_end = (window.row + window.height).min(height);
    let data = self
      .data
      .slice(s![.., window.row..row_end, window.col..col_end])
      .to_owned();
    Ok(BandTile::new(data))
  }
}

/// 按文件类型或 URL 选择的栅格输入
pub enum RasterWrapper {
  Memory(Raster),
  #[cfg(feature = "geotiff_input")]
  GeoTiff(GeoTiffRaster<BufReader<File>>),
}

impl RasterWrapper {
  /// 打开栅格文件，按扩展名选择解码器
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RasterError> {
    let path = path.as_ref();
    let ext = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase())
      .unwrap_or_default();
    match ext.as_str() {
      #[cfg(feature = "geotiff_input")]
      "tif" | "tiff" => read_geotiff(path).map(RasterWrapper::GeoTiff),
      _ => Err(RasterError::UnsupportedFormat(format!(
        "无法识别的栅格文件: {}",
        path.display()
      ))),
    }
  }

  fn inner(&self) -> &dyn RasterSource {
    match self {
      RasterWrapper::Memory(raster) => raster,
      #[cfg(feature = "geotiff_input")]
      RasterWrapper::GeoTiff(raster) => raster,
    }
  }
}

impl From<Raster> for RasterWrapper {
  fn from(raster: Raster) -> Self {
    RasterWrapper::Memory(raster)
  }
}

impl FromUrl for RasterWrapper {
  type Error = RasterError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "geotiff_input")]
      GEOTIFF_SCHEME => read_geotiff(url.path()).map(RasterWrapper::GeoTiff),
      "file" => RasterWrapper::open(url.path()),
      other => Err(RasterError::SchemeMismatch(other.to_string())),
    }
  }
}

impl RasterSource for RasterWrapper {
  fn width(&self) -> usize {
    self.inner().width()
  }

  fn height(&self) -> usize {
    self.inner().height()
  }

  fn band_count(&self) -> usize {
    self.inner().band_count()
  }

  fn transform(&self) -> &GeoTransform {
    self.inner().transform()
  }

  fn profile(&self) -> RasterProfile {
    self.inner().profile()
  }

  fn read_window(&self, window: &TileWindow) -> Result<BandTile, RasterError> {
    self.inner().read_window(window)
  }
}
