// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/output.rs - 推理结果持久化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::FromUrl;
#[cfg(feature = "json_store")]
use crate::FromUrlWithScheme;
use crate::payload::InferencePayload;

#[cfg(feature = "json_store")]
mod json_store;
#[cfg(feature = "json_store")]
pub use self::json_store::JsonStoreSink;

/// 按地理范围 upsert 推理结果
pub trait PersistenceSink {
  type Error;
  fn upsert(&self, payloads: &[InferencePayload]) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("批大小必须大于 0")]
  ZeroBatchSize,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 先写入同目录下的 `<文件名>.tmp` 再重命名，读者不会看到写了一半的文件
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SinkError> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)?;
    }
  }
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);
  std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
  std::fs::rename(&tmp, path)?;
  Ok(())
}

/// 逐批写入，每条记录恰好写一次；返回批次数
pub fn upsert_in_batch<S>(
  sink: &S,
  payloads: &[InferencePayload],
  batch_size: usize,
) -> Result<usize, S::Error>
where
  S: PersistenceSink + ?Sized,
  S::Error: From<SinkError>,
{
  if batch_size == 0 {
    return Err(SinkError::ZeroBatchSize.into());
  }

  info!("批量写入开始: {} 条记录, 批大小 {}", payloads.len(), batch_size);
  let mut batches = 0;
  for batch in payloads.chunks(batch_size) {
    debug!("写入第 {} 批, {} 条", batches + 1, batch.len());
    sink.upsert(batch)?;
    batches += 1;
  }
  info!("批量写入完成: {} 批", batches);
  Ok(batches)
}

/// 内存中的写入记录，每次 upsert 保存为一批
#[derive(Debug, Default)]
pub struct MemorySink {
  batches: Mutex<Vec<Vec<InferencePayload>>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn batches(&self) -> Vec<Vec<InferencePayload>> {
    let batches = self.batches.lock().unwrap_or_else(PoisonError::into_inner);
    batches.clone()
  }

  pub fn payloads(&self) -> Vec<InferencePayload> {
    self.batches().into_iter().flatten().collect()
  }
}

impl PersistenceSink for MemorySink {
  type Error = SinkError;

  fn upsert(&self, payloads: &[InferencePayload]) -> Result<(), Self::Error> {
    let mut batches = self.batches.lock().unwrap_or_else(PoisonError::into_inner);
    batches.push(payloads.to_vec());
    Ok(())
  }
}

pub enum SinkWrapper {
  Memory(MemorySink),
  #[cfg(feature = "json_store")]
  JsonStore(JsonStoreSink),
}

impl FromUrl for SinkWrapper {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "memory" => Ok(SinkWrapper::Memory(MemorySink::new())),
      #[cfg(feature = "json_store")]
      JsonStoreSink::SCHEME => Ok(SinkWrapper::JsonStore(JsonStoreSink::from_url(url)?)),
      _ => Err(SinkError::SchemeMismatch),
    }
  }
}

impl PersistenceSink for SinkWrapper {
  type Error = SinkError;

  fn upsert(&self, payloads: &[InferencePayload]) -> Result<(), Self::Error> {
    match self {
      SinkWrapper::Memory(sink) => sink.upsert(payloads),
      #[cfg(feature = "json_store")]
      SinkWrapper::JsonStore(sink) => sink.upsert(payloads),
    }
  }
}
