// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/payload.rs - 推理结果记录
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

use crate::{label::Prediction, raster::GeoBounds};

/// 一个水体图块的带地理范围的预测，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferencePayload {
  aoi_id: String,
  bounds: GeoBounds,
  prediction: Prediction,
}

impl InferencePayload {
  pub fn new(aoi_id: impl Into<String>, bounds: GeoBounds, prediction: Prediction) -> Self {
    Self {
      aoi_id: aoi_id.into(),
      bounds,
      prediction,
    }
  }

  pub fn aoi_id(&self) -> &str {
    &self.aoi_id
  }

  pub fn bounds(&self) -> &GeoBounds {
    &self.bounds
  }

  pub fn prediction(&self) -> &Prediction {
    &self.prediction
  }
}
