// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/output/json_store.rs - JSON 文件结果存储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{PersistenceSink, SinkError, write_json_atomic},
  payload::InferencePayload,
};

/// 以地理范围为键的 JSON 文档，同一范围的记录被新结果替换
pub struct JsonStoreSink {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FromUrlWithScheme for JsonStoreSink {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonStoreSink {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

impl JsonStoreSink {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 读取当前存储内容，文件不存在时为空
  pub fn load(&self) -> Result<BTreeMap<String, InferencePayload>, SinkError> {
    if !self.path.exists() {
      return Ok(BTreeMap::new());
    }
    let text = std::fs::read_to_string(&self.path)?;
    Ok(serde_json::from_str(&text)?)
  }

}

impl PersistenceSink for JsonStoreSink {
  type Error = SinkError;

  fn upsert(&self, payloads: &[InferencePayload]) -> Result<(), Self::Error> {
    let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut records = self.load()?;
    for payload in payloads {
      records.insert(payload.bounds().key(), payload.clone());
    }
    debug!("写入 {} 条, 存储共 {} 条", payloads.len(), records.len());
    write_json_atomic(&self.path, &records)
  }
}
