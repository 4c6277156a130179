// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{NUM_CLASSES, REQUIRED_BANDS},
  frame::BandTile,
};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{ONNX_SCHEME, OnnxModelBuilder, OnnxNetwork};

pub const MODEL_INPUT_SIZE: usize = 256;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 已加载的网络，输出未经激活的逐类 logits
pub trait Network {
  fn forward(&self, input: &BandTile) -> Result<Vec<f32>, ModelError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("输入形状无效: 期望 {expected:?}, 实际 {actual:?}")]
  InvalidShape {
    expected: (usize, usize, usize),
    actual: (usize, usize, usize),
  },
  #[error("输出长度无效: 期望 {expected}, 实际 {actual}")]
  InvalidOutput { expected: usize, actual: usize },
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("未知的模型: {0}")]
  UnknownModel(String),
  #[error("推理后端错误: {0}")]
  Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  /// tract 仅在 CPU 上执行
  #[default]
  Cpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTask {
  #[default]
  Classification,
}

impl FromStr for ModelTask {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "classification" => Ok(ModelTask::Classification),
      other => Err(ModelError::UnknownModel(format!("任务 {}", other))),
    }
  }
}

impl fmt::Display for ModelTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelTask::Classification => write!(f, "classification"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVariant {
  #[default]
  Resnet50,
}

impl ModelVariant {
  /// 模型目录下的默认权重文件名
  pub fn weights_file(&self) -> &'static str {
    match self {
      ModelVariant::Resnet50 => "resnet50.onnx",
    }
  }

  pub fn input_shape(&self) -> (usize, usize, usize) {
    match self {
      ModelVariant::Resnet50 => (REQUIRED_BANDS, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE),
    }
  }

  pub fn num_classes(&self) -> usize {
    match self {
      ModelVariant::Resnet50 => NUM_CLASSES,
    }
  }
}

impl FromStr for ModelVariant {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "resnet50" => Ok(ModelVariant::Resnet50),
      other => Err(ModelError::UnknownModel(format!("变体 {}", other))),
    }
  }
}

impl fmt::Display for ModelVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelVariant::Resnet50 => write!(f, "resnet50"),
    }
  }
}

/// 多标签分类的逐类概率，各类相互独立
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
  values: Box<[f32]>,
}

impl ClassProbabilities {
  pub fn from_logits(logits: &[f32]) -> Self {
    Self {
      values: logits.iter().map(|&x| sigmoid(x)).collect(),
    }
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<f32> {
    self.values.get(index).copied()
  }

  /// 逐类与阈值比较 (>=)；阈值缺失的类别视为未命中
  pub fn decide(&self, thresholds: &[f32]) -> Vec<bool> {
    self
      .values
      .iter()
      .enumerate()
      .map(|(i, &p)| thresholds.get(i).is_some_and(|&t| p >= t))
      .collect()
  }
}

impl From<Vec<f32>> for ClassProbabilities {
  fn from(values: Vec<f32>) -> Self {
    Self {
      values: values.into_boxed_slice(),
    }
  }
}

/// 运行期间只构建一次的模型句柄，所有图块共享只读引用
pub struct ModelHandle<N> {
  network: N,
  device: Device,
  task: ModelTask,
  variant: ModelVariant,
  input_shape: (usize, usize, usize),
  num_classes: usize,
}

impl<N: Network> ModelHandle<N> {
  pub fn new(network: N, task: ModelTask, variant: ModelVariant, device: Device) -> Self {
    info!("模型就绪: 任务 {}, 变体 {}, 设备 {}", task, variant, device);
    Self {
      network,
      device,
      task,
      variant,
      input_shape: variant.input_shape(),
      num_classes: variant.num_classes(),
    }
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn task(&self) -> ModelTask {
    self.task
  }

  pub fn variant(&self) -> ModelVariant {
    self.variant
  }

  pub fn input_shape(&self) -> (usize, usize, usize) {
    self.input_shape
  }

  pub fn network(&self) -> &N {
    &self.network
  }
}

impl<N: Network> Model for ModelHandle<N> {
  type Input = BandTile;
  type Output = ClassProbabilities;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.shape() != self.input_shape {
      return Err(ModelError::InvalidShape {
        expected: self.input_shape,
        actual: input.shape(),
      });
    }

    debug!("执行模型推理");
    let logits = self.network.forward(input)?;
    if logits.len() != self.num_classes {
      return Err(ModelError::InvalidOutput {
        expected: self.num_classes,
        actual: logits.len(),
      });
    }

    let probs = ClassProbabilities::from_logits(&logits);
    debug!("模型推理结果：{:?}", probs.as_slice());
    Ok(probs)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;
  use ndarray::Array3;
  use std::cell::Cell;

  struct FixedLogits {
    logits: Vec<f32>,
    calls: Cell<usize>,
  }

  impl Network for FixedLogits {
    fn forward(&self, _input: &BandTile) -> Result<Vec<f32>, ModelError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.logits.clone())
    }
  }

  fn handle(logits: Vec<f32>) -> ModelHandle<FixedLogits> {
    ModelHandle::new(
      FixedLogits {
        logits,
        calls: Cell::new(0),
      },
      ModelTask::Classification,
      ModelVariant::Resnet50,
      Device::Cpu,
    )
  }

  #[test]
  fn sigmoid_is_applied_per_class() {
    let model = handle(vec![0.0, 2.0, -2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0]);
    let probs = model.infer(&BandTile::new(Array3::zeros((11, 256, 256)))).unwrap();
    assert_eq!(probs.len(), 11);
    assert_relative_eq!(probs.get(0).unwrap(), 0.5);
    assert_relative_eq!(probs.get(1).unwrap(), 0.880_797, epsilon = 1e-5);
    assert_relative_eq!(probs.get(2).unwrap(), 0.119_203, epsilon = 1e-5);
    assert_relative_eq!(probs.get(10).unwrap(), 1.0);
    // 多标签: 概率之和不归一化
    assert!(probs.as_slice().iter().sum::<f32>() > 1.0);
  }

  #[test]
  fn wrong_shape_is_rejected_before_forward() {
    let model = handle(vec![0.0; 11]);
    for shape in [(10, 256, 256), (11, 255, 256), (11, 256, 128)] {
      let err = model.infer(&BandTile::new(Array3::zeros(shape))).unwrap_err();
      assert!(matches!(err, ModelError::InvalidShape { .. }));
    }
    assert_eq!(model.network().calls.get(), 0);
  }

  #[test]
  fn wrong_output_length_is_an_error() {
    let model = handle(vec![0.0; 5]);
    let err = model
      .infer(&BandTile::new(Array3::zeros((11, 256, 256))))
      .unwrap_err();
    assert!(matches!(err, ModelError::InvalidOutput { expected: 11, actual: 5 }));
  }

  #[test]
  fn decide_uses_inclusive_threshold() {
    let probs = ClassProbabilities::from(vec![0.5, 0.49, 0.9]);
    assert_eq!(probs.decide(&[0.5, 0.5, 0.95]), vec![true, false, false]);
    assert_eq!(probs.decide(&[0.1]), vec![true, false, false]);
  }

  #[test]
  fn task_and_variant_parse() {
    assert_eq!("classification".parse::<ModelTask>().unwrap(), ModelTask::Classification);
    assert_eq!("resnet50".parse::<ModelVariant>().unwrap(), ModelVariant::Resnet50);
    assert!("segmentation".parse::<ModelTask>().is_err());
    assert!("vit".parse::<ModelVariant>().is_err());
  }
}
