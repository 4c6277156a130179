// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/model/onnx.rs - ONNX 分类模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::BandTile,
  model::{Device, ModelError, ModelHandle, ModelTask, ModelVariant, Network},
};

pub const ONNX_SCHEME: &str = "onnx";

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

fn backend<E: std::fmt::Display>(msg: &str) -> impl FnOnce(E) -> ModelError + '_ {
  move |e| {
    error!("{}: {}", msg, e);
    ModelError::Backend(format!("{}: {}", msg, e))
  }
}

pub struct OnnxNetwork {
  plan: OnnxPlan,
  input_shape: (usize, usize, usize),
}

impl Network for OnnxNetwork {
  fn forward(&self, input: &BandTile) -> Result<Vec<f32>, ModelError> {
    let (bands, height, width) = self.input_shape;
    let tensor = Tensor::from_shape(&[1, bands, height, width], &input.to_chw_vec())
      .map_err(backend("构建输入张量失败"))?;

    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(backend("模型推理失败"))?;
    let first = outputs
      .first()
      .ok_or_else(|| ModelError::Backend("模型没有输出".to_string()))?;
    let logits = first
      .to_array_view::<f32>()
      .map_err(backend("读取模型输出失败"))?;
    Ok(logits.iter().copied().collect())
  }
}

/// `onnx:///path/to/resnet50.onnx?task=classification&variant=resnet50`
///
/// 路径是目录时使用变体的默认权重文件名。
pub struct OnnxModelBuilder {
  model_path: PathBuf,
  task: ModelTask,
  variant: ModelVariant,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl FromUrl for OnnxModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut task = ModelTask::default();
    let mut variant = ModelVariant::default();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "task" => task = v.parse()?,
        "variant" => variant = v.parse()?,
        _ => debug!("忽略未知的模型参数: {}={}", k, v),
      }
    }

    Ok(OnnxModelBuilder {
      model_path: PathBuf::from(url.path()),
      task,
      variant,
    })
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      task: ModelTask::default(),
      variant: ModelVariant::default(),
    }
  }

  pub fn variant(mut self, variant: ModelVariant) -> Self {
    self.variant = variant;
    self
  }

  pub fn weights_path(&self) -> PathBuf {
    if self.model_path.is_dir() {
      self.model_path.join(self.variant.weights_file())
    } else {
      self.model_path.clone()
    }
  }

  pub fn build(self) -> Result<ModelHandle<OnnxNetwork>, ModelError> {
    let path = self.weights_path();
    info!("加载模型文件: {}", path.display());
    let bytes = std::fs::read(&path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      bytes.len() as f64 / (1024.0 * 1024.0)
    );

    let input_shape = self.variant.input_shape();
    let (bands, height, width) = input_shape;
    let plan = tract_onnx::onnx()
      .model_for_read(&mut bytes.as_slice())
      .map_err(backend("模型解析失败"))?
      .with_input_fact(0, f32::fact([1, bands, height, width]).into())
      .map_err(backend("设置输入形状失败"))?
      .into_optimized()
      .map_err(backend("模型优化失败"))?
      .into_runnable()
      .map_err(backend("模型无法运行"))?;
    info!("模型加载完成");

    Ok(ModelHandle::new(
      OnnxNetwork { plan, input_shape },
      self.task,
      self.variant,
      Device::Cpu,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_parses_task_and_variant() {
    let url = Url::parse("onnx:///models/resnet50.onnx?task=classification&variant=resnet50").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/resnet50.onnx"));
    assert_eq!(builder.variant, ModelVariant::Resnet50);
    assert_eq!(builder.weights_path(), PathBuf::from("/models/resnet50.onnx"));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("tflite:///models/resnet50.onnx").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn unknown_variant_is_rejected() {
    let url = Url::parse("onnx:///models/x.onnx?variant=vit").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(ModelError::UnknownModel(_))
    ));
  }

  #[test]
  fn directory_resolves_default_weights() {
    let dir = std::env::temp_dir();
    let builder = OnnxModelBuilder::new(&dir);
    assert_eq!(builder.weights_path(), dir.join("resnet50.onnx"));
  }

  #[test]
  fn missing_weights_fail_to_load() {
    let err = OnnxModelBuilder::new("/nonexistent/tidewatch/resnet50.onnx")
      .build()
      .err()
      .unwrap();
    assert!(matches!(err, ModelError::ModelLoadError(_)));
  }
}
