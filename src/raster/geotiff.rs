// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/raster/geotiff.rs - GeoTIFF 栅格读取
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

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::Array3;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, info};

use super::{GeoTransform, RasterError, RasterProfile, RasterSource};
use crate::{frame::BandTile, tiling::TileWindow};

pub const GEOTIFF_SCHEME: &str = "geotiff";

const PLANAR_SEPARATE: u16 = 2;

impl From<tiff::TiffError> for RasterError {
  fn from(err: tiff::TiffError) -> Self {
    RasterError::Decode(err.to_string())
  }
}

/// 条带或瓦片的排布；分离存储时每个波段各占一组分块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkLayout {
  width: usize,
  height: usize,
  chunk_width: usize,
  chunk_height: usize,
  bands: usize,
  planar: bool,
}

impl ChunkLayout {
  fn across(&self) -> usize {
    self.width.div_ceil(self.chunk_width)
  }

  fn down(&self) -> usize {
    self.height.div_ceil(self.chunk_height)
  }

  fn planes(&self) -> usize {
    if self.planar { self.bands } else { 1 }
  }

  fn samples_per_chunk(&self) -> usize {
    if self.planar { 1 } else { self.bands }
  }

  fn chunk_index(&self, plane: usize, chunk_col: usize, chunk_row: usize) -> usize {
    plane * self.across() * self.down() + chunk_row * self.across() + chunk_col
  }

  /// 去掉右/下填充后的分块尺寸 (宽, 高)
  fn data_dims(&self, chunk_col: usize, chunk_row: usize) -> (usize, usize) {
    let x0 = chunk_col * self.chunk_width;
    let y0 = chunk_row * self.chunk_height;
    (
      self.chunk_width.min(self.width - x0),
      self.chunk_height.min(self.height - y0),
    )
  }

  /// 与像素区间 [col0, col1) x [row0, row1) 相交的分块 (列, 行)
  fn overlapping(
    &self,
    col0: usize,
    row0: usize,
    col1: usize,
    row1: usize,
  ) -> impl Iterator<Item = (usize, usize)> + use<> {
    let cols = col0 / self.chunk_width..col1.div_ceil(self.chunk_width);
    let rows = row0 / self.chunk_height..row1.div_ceil(self.chunk_height);
    rows.flat_map(move |cy| cols.clone().map(move |cx| (cx, cy)))
  }

  /// 解码结果每行的像素数；瓦片可能带填充
  fn row_stride(&self, len: usize, data_width: usize, data_height: usize) -> Option<usize> {
    let spp = self.samples_per_chunk();
    if len == data_width * data_height * spp {
      Some(data_width)
    } else if len == self.chunk_width * self.chunk_height * spp {
      Some(self.chunk_width)
    } else {
      None
    }
  }
}

/// 以解码器为句柄的 GeoTIFF 栅格；每次窗口读取只解码相交的条带或瓦片
pub struct GeoTiffRaster<R: Read + Seek> {
  decoder: Mutex<Decoder<R>>,
  layout: ChunkLayout,
  dtype: &'static str,
  transform: GeoTransform,
}

/// 打开 GeoTIFF 文件；文件句柄随返回值释放
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<GeoTiffRaster<BufReader<File>>, RasterError> {
  let path = path.as_ref();
  info!("打开 GeoTIFF 文件: {}", path.display());
  let file = File::open(path)?;
  GeoTiffRaster::new(BufReader::new(file))
}

pub fn read_geotiff_from_buffer(data: Vec<u8>) -> Result<GeoTiffRaster<Cursor<Vec<u8>>>, RasterError> {
  GeoTiffRaster::new(Cursor::new(data))
}

impl<R: Read + Seek> GeoTiffRaster<R> {
  pub fn new(reader: R) -> Result<Self, RasterError> {
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let bands = decoder
      .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
      .unwrap_or(1) as usize;
    let planar = decoder
      .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
      .is_some_and(|p| p == PLANAR_SEPARATE);
    debug!(
      "GeoTIFF 尺寸: {}x{}, 颜色类型: {:?}, 分离存储: {}",
      width,
      height,
      decoder.colortype()?,
      planar
    );

    let dtype = sample_dtype(&mut decoder)?;
    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let layout = ChunkLayout {
      width: width as usize,
      height: height as usize,
      chunk_width: chunk_width as usize,
      chunk_height: chunk_height as usize,
      bands,
      planar,
    };
    if layout.width == 0 || layout.height == 0 || layout.chunk_width == 0 || layout.chunk_height == 0 {
      return Err(RasterError::InvalidShape(format!(
        "尺寸 {}x{}, 分块 {}x{}",
        width, height, chunk_width, chunk_height
      )));
    }

    let transform = read_geotransform(&mut decoder)?.ok_or(RasterError::MissingGeoreference)?;

    info!(
      "GeoTIFF 就绪: {} 波段, {}x{}, 类型 {}, 分块 {}x{}",
      bands, width, height, dtype, chunk_width, chunk_height
    );
    Ok(Self {
      decoder: Mutex::new(decoder),
      layout,
      dtype,
      transform,
    })
  }
}

impl<R: Read + Seek> RasterSource for GeoTiffRaster<R> {
  fn width(&self) -> usize {
    self.layout.width
  }

  fn height(&self) -> usize {
    self.layout.height
  }

  fn band_count(&self) -> usize {
    self.layout.bands
  }

  fn transform(&self) -> &GeoTransform {
    &self.transform
  }

  fn profile(&self) -> RasterProfile {
    RasterProfile {
      driver: "GTiff",
      width: self.width(),
      height: self.height(),
      count: self.band_count(),
      dtype: self.dtype.to_string(),
      transform: self.transform,
    }
  }

  fn read_window(&self, window: &TileWindow) -> Result<BandTile, RasterError> {
    let layout = &self.layout;
    if window.col >= layout.width || window.row >= layout.height {
      return Err(RasterError::WindowOutOfBounds {
        col: window.col,
        row: window.row,
        width: layout.width,
        height: layout.height,
      });
    }
    let col_end = (window.col + window.width).min(layout.width);
    let row_end = (window.row + window.height).min(layout.height);

    let mut data = Array3::<f32>::zeros((layout.bands, row_end - window.row, col_end - window.col));
    let spp = layout.samples_per_chunk();
    let mut decoder = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);

    for (cx, cy) in layout.overlapping(window.col, window.row, col_end, row_end) {
      let (data_width, data_height) = layout.data_dims(cx, cy);
      let x0 = cx * layout.chunk_width;
      let y0 = cy * layout.chunk_height;
      let cols = x0.max(window.col)..(x0 + data_width).min(col_end);
      let rows = y0.max(window.row)..(y0 + data_height).min(row_end);

      for plane in 0..layout.planes() {
        let index = layout.chunk_index(plane, cx, cy);
        let values = samples_to_f32(decoder.read_chunk(index as u32)?);
        let stride = layout
          .row_stride(values.len(), data_width, data_height)
          .ok_or_else(|| {
            RasterError::InvalidShape(format!("分块 {} 的样本数 {} 与尺寸不符", index, values.len()))
          })?;

        for y in rows.clone() {
          for x in cols.clone() {
            let base = ((y - y0) * stride + (x - x0)) * spp;
            for s in 0..spp {
              data[[plane + s, y - window.row, x - window.col]] = values[base + s];
            }
          }
        }
      }
    }

    Ok(BandTile::new(data))
  }
}

fn samples_to_f32(result: DecodingResult) -> Vec<f32> {
  match result {
    DecodingResult::F32(buf) => buf,
    DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::F16(buf) => buf.into_iter().map(f32::from).collect(),
    DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
    DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
    DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
    DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
    DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
    DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
  }
}

fn sample_dtype<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<&'static str, RasterError> {
  let bits = decoder
    .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
    .and_then(|v| v.first().copied())
    .unwrap_or(1);
  let format = decoder
    .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
    .and_then(|v| v.first().copied())
    .unwrap_or(1);

  // SampleFormat: 1 无符号整数, 2 有符号整数, 3 浮点
  match (format, bits) {
    (1, 8) => Ok("uint8"),
    (1, 16) => Ok("uint16"),
    (1, 32) => Ok("uint32"),
    (1, 64) => Ok("uint64"),
    (2, 8) => Ok("int8"),
    (2, 16) => Ok("int16"),
    (2, 32) => Ok("int32"),
    (2, 64) => Ok("int64"),
    (3, 16) => Ok("float16"),
    (3, 32) => Ok("float32"),
    (3, 64) => Ok("float64"),
    _ => Err(RasterError::UnsupportedFormat(format!(
      "样本格式 {} / {} 位",
      format, bits
    ))),
  }
}

fn read_geotransform<R: Read + Seek>(
  decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, RasterError> {
  // ModelTransformationTag: 4x4 行主序矩阵
  if let Some(m) = decoder.find_tag(Tag::ModelTransformationTag)? {
    let m = m.into_f64_vec()?;
    if m.len() >= 8 {
      return Ok(Some(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]])));
    }
  }

  let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
  let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?;
  let (Some(scale), Some(tiepoint)) = (scale, tiepoint) else {
    return Ok(None);
  };
  let (scale, tiepoint) = (scale.into_f64_vec()?, tiepoint.into_f64_vec()?);

  if scale.len() >= 2 && tiepoint.len() >= 6 {
    // tiepoint: [I, J, K, X, Y, Z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    return Ok(Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1])));
  }
  Ok(None)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::FromUrl;
  use crate::raster::RasterWrapper;
  use approx::assert_relative_eq;
  use tiff::encoder::colortype::{ColorType, Gray32Float};
  use tiff::encoder::TiffEncoder;
  use tiff::tags::{PhotometricInterpretation, SampleFormat};
  use url::Url;

  struct Bands11Float;

  impl ColorType for Bands11Float {
    type Inner = f32;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[32; 11];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::IEEEFP; 11];

    fn horizontal_predict(_: &[f32], _: &mut Vec<f32>) {
      unreachable!()
    }
  }

  fn encode<C: ColorType<Inner = f32>>(
    cols: u32,
    rows: u32,
    data: &[f32],
    rows_per_strip: Option<u32>,
    georef: bool,
  ) -> Vec<u8> {
    let mut buf = Vec::new();
    {
      let mut encoder = TiffEncoder::new(Cursor::new(&mut buf)).unwrap();
      let mut image = encoder.new_image::<C>(cols, rows).unwrap();
      if let Some(n) = rows_per_strip {
        image.rows_per_strip(n).unwrap();
      }
      if georef {
        let scale = [10.0f64, 10.0, 0.0];
        image
          .encoder()
          .write_tag(Tag::ModelPixelScaleTag, &scale[..])
          .unwrap();
        let tiepoint = [0.0f64, 0.0, 0.0, 300_000.0, 4_000_000.0, 0.0];
        image
          .encoder()
          .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
          .unwrap();
      }
      image.write_data(data).unwrap();
    }
    buf
  }

  /// 像素交错：band b 在 (r, c) 的值为 b * 1000 + r * 10 + c
  fn interleaved(bands: usize, rows: usize, cols: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(bands * rows * cols);
    for r in 0..rows {
      for c in 0..cols {
        for b in 0..bands {
          data.push((b * 1000 + r * 10 + c) as f32);
        }
      }
    }
    data
  }

  #[test]
  fn decodes_pixels_and_geotransform() {
    let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
    let raster = read_geotiff_from_buffer(encode::<Gray32Float>(6, 4, &data, None, true)).unwrap();
    assert_eq!(raster.width(), 6);
    assert_eq!(raster.height(), 4);
    assert_eq!(raster.band_count(), 1);
    assert_eq!(raster.profile().driver, "GTiff");
    assert_eq!(raster.profile().dtype, "float32");

    let gt = raster.transform();
    assert_relative_eq!(gt.origin_x, 300_000.0);
    assert_relative_eq!(gt.origin_y, 4_000_000.0);
    assert_relative_eq!(gt.pixel_height, -10.0);

    let tile = raster.read_window(&TileWindow::new(2, 1, 2)).unwrap();
    assert_eq!(tile.shape(), (1, 2, 2));
    assert_eq!(tile.data()[[0, 0, 0]], 8.0);
    assert_eq!(tile.data()[[0, 1, 1]], 15.0);
  }

  #[test]
  fn eleven_band_windows_span_strips() {
    let (rows, cols) = (9, 7);
    let data = interleaved(11, rows, cols);
    // 每条带 2 行，窗口跨越多个条带
    let raster =
      read_geotiff_from_buffer(encode::<Bands11Float>(cols as u32, rows as u32, &data, Some(2), true))
        .unwrap();
    assert_eq!(raster.band_count(), 11);

    let tile = raster.read_window(&TileWindow::new(3, 3, 5)).unwrap();
    // 右侧与下侧被裁到 4x5
    assert_eq!(tile.shape(), (11, 5, 4));
    for b in [0, 2, 9, 10] {
      for (r, c) in [(0, 0), (2, 1), (4, 3)] {
        let expected = (b * 1000 + (r + 3) * 10 + (c + 3)) as f32;
        assert_eq!(tile.data()[[b, r, c]], expected);
      }
    }
  }

  #[test]
  fn missing_georeference_is_an_error() {
    let data = vec![0.0f32; 16];
    let err = read_geotiff_from_buffer(encode::<Gray32Float>(4, 4, &data, None, false))
      .err()
      .unwrap();
    assert!(matches!(err, RasterError::MissingGeoreference));
  }

  #[test]
  fn garbage_bytes_fail_to_decode() {
    let err = read_geotiff_from_buffer(b"definitely not a tiff".to_vec())
      .err()
      .unwrap();
    assert!(matches!(err, RasterError::Decode(_)));
  }

  #[test]
  fn separate_planes_are_indexed_after_each_other() {
    let layout = ChunkLayout {
      width: 10,
      height: 7,
      chunk_width: 4,
      chunk_height: 3,
      bands: 11,
      planar: true,
    };
    assert_eq!(layout.planes(), 11);
    assert_eq!(layout.samples_per_chunk(), 1);
    // 每个平面 3x3 个分块
    assert_eq!(layout.chunk_index(0, 2, 1), 5);
    assert_eq!(layout.chunk_index(4, 2, 1), 4 * 9 + 5);
    assert_eq!(layout.data_dims(2, 2), (2, 1));
    // 带填充的边缘瓦片按完整宽度跨行
    assert_eq!(layout.row_stride(2, 2, 1), Some(2));
    assert_eq!(layout.row_stride(12, 2, 1), Some(4));
    assert_eq!(layout.row_stride(7, 2, 1), None);

    let chunks: Vec<_> = layout.overlapping(3, 2, 9, 4).collect();
    assert_eq!(chunks, vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
  }

  #[test]
  fn opens_through_url() {
    let path = std::env::temp_dir().join(format!("tidewatch-geotiff-{}.tif", std::process::id()));
    let data = interleaved(11, 4, 4);
    std::fs::write(&path, encode::<Bands11Float>(4, 4, &data, None, true)).unwrap();

    let url = Url::parse(&format!("geotiff://{}", path.display())).unwrap();
    let raster = RasterWrapper::from_url(&url).unwrap();
    assert_eq!(raster.band_count(), 11);
    assert_eq!(raster.profile().driver, "GTiff");
    let tile = raster.read_window(&TileWindow::new(0, 0, 4)).unwrap();
    assert_eq!(tile.data()[[9, 3, 2]], 9032.0);

    std::fs::remove_file(&path).unwrap();
  }
}
