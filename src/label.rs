// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/label.rs - 标签解码与预测结果
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
use thiserror::Error;

use crate::{config::PipelineConfig, model::ClassProbabilities};

/// 单个图块最多保留的标签数
pub const MAX_LABELS: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum PredictionError {
  #[error("标签列表为空")]
  EmptyLabels,
  #[error("标签数量 {0} 超过上限 3")]
  TooManyLabels(usize),
  #[error("标签数 {labels} 与置信度数 {confidence} 不一致")]
  LengthMismatch { labels: usize, confidence: usize },
  #[error("置信度 {0} 不在 [0, 1] 区间内")]
  ConfidenceOutOfRange(f32),
}

/// 1 到 3 个标签及其置信度，构造时校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPrediction")]
pub struct Prediction {
  labels: Vec<String>,
  confidence: Vec<f32>,
}

#[derive(Deserialize)]
struct RawPrediction {
  labels: Vec<String>,
  confidence: Vec<f32>,
}

impl TryFrom<RawPrediction> for Prediction {
  type Error = PredictionError;

  fn try_from(raw: RawPrediction) -> Result<Self, Self::Error> {
    Prediction::new(raw.labels, raw.confidence)
  }
}

impl Prediction {
  pub fn new(labels: Vec<String>, confidence: Vec<f32>) -> Result<Self, PredictionError> {
    if labels.is_empty() {
      return Err(PredictionError::EmptyLabels);
    }
    if labels.len() > MAX_LABELS {
      return Err(PredictionError::TooManyLabels(labels.len()));
    }
    if labels.len() != confidence.len() {
      return Err(PredictionError::LengthMismatch {
        labels: labels.len(),
        confidence: confidence.len(),
      });
    }
    if let Some(&c) = confidence.iter().find(|c| !(0.0..=1.0).contains(*c)) {
      return Err(PredictionError::ConfidenceOutOfRange(c));
    }
    Ok(Self { labels, confidence })
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedLabels {
  pub labels: Vec<String>,
  pub index: Vec<usize>,
}

impl DecodedLabels {
  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 取对应类别的概率组装预测
  pub fn into_prediction(self, probs: &ClassProbabilities) -> Result<Prediction, PredictionError> {
    let confidence = self
      .index
      .iter()
      .map(|&i| probs.get(i).unwrap_or(f32::NAN))
      .collect();
    Prediction::new(self.labels, confidence)
  }
}

/// 按允许列表把二值判定向量转换成标签
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDecoder {
  labels: Vec<String>,
  allowed: Vec<bool>,
}

impl LabelDecoder {
  pub fn new(labels: Vec<String>, allowed_label_index: &[usize]) -> Self {
    let mut allowed = vec![false; labels.len()];
    for &i in allowed_label_index {
      if let Some(slot) = allowed.get_mut(i) {
        *slot = true;
      }
    }
    Self { labels, allowed }
  }

  pub fn from_config(config: &PipelineConfig) -> Self {
    Self::new(config.labels.clone(), &config.allowed_label_index)
  }

  /// 升序保留命中且被允许的类别，最多 MAX_LABELS 个
  pub fn decode(&self, decision: &[bool]) -> DecodedLabels {
    let (labels, index) = decision
      .iter()
      .enumerate()
      .filter(|&(i, &hit)| hit && self.allowed.get(i).copied().unwrap_or(false))
      .take(MAX_LABELS)
      .map(|(i, _)| (self.labels[i].clone(), i))
      .unzip();
    DecodedLabels { labels, index }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decoder() -> LabelDecoder {
    LabelDecoder::from_config(&PipelineConfig::default())
  }

  fn bits(v: &[u8]) -> Vec<bool> {
    v.iter().map(|&b| b == 1).collect()
  }

  #[test]
  fn decodes_allowed_hits_in_index_order() {
    let decoded = decoder().decode(&bits(&[1, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0]));
    assert_eq!(decoded.index, vec![0, 2, 7]);
    assert_eq!(
      decoded.labels,
      vec!["Marine Debris", "Sparse Sargassum", "Sediment-Laden Water"]
    );
  }

  #[test]
  fn disallowed_classes_are_dropped() {
    // Clouds (5) 和 Marine Water (6) 不在允许列表中
    let decoded = decoder().decode(&bits(&[0, 1, 0, 0, 1, 1, 1, 0, 0, 1, 1]));
    assert!(decoded.is_empty());
  }

  #[test]
  fn never_more_than_three_labels() {
    let decoded = decoder().decode(&[true; 11]);
    assert_eq!(decoded.index, vec![0, 2, 3]);
    for mask in 0u32..(1 << 11) {
      let decision: Vec<bool> = (0..11).map(|i| mask & (1 << i) != 0).collect();
      let decoded = decoder().decode(&decision);
      assert!(decoded.labels.len() <= MAX_LABELS);
      assert!(decoded.index.iter().all(|i| [0, 2, 3, 7, 8].contains(i)));
      assert!(decoded.index.windows(2).all(|w| w[0] < w[1]));
    }
  }

  #[test]
  fn out_of_range_allowed_index_is_ignored() {
    let decoder = LabelDecoder::new(vec!["a".into(), "b".into()], &[1, 9]);
    assert_eq!(decoder.decode(&[true, true, true]).index, vec![1]);
  }

  #[test]
  fn prediction_label_count_is_bounded() {
    let label = |n: usize| (0..n).map(|i| format!("l{}", i)).collect::<Vec<_>>();
    assert_eq!(Prediction::new(vec![], vec![]), Err(PredictionError::EmptyLabels));
    assert_eq!(
      Prediction::new(label(4), vec![0.5; 4]),
      Err(PredictionError::TooManyLabels(4))
    );
    for n in 1..=3 {
      assert!(Prediction::new(label(n), vec![0.5; n]).is_ok());
    }
  }

  #[test]
  fn prediction_rejects_mismatched_or_invalid_confidence() {
    assert!(matches!(
      Prediction::new(vec!["a".into()], vec![0.1, 0.2]),
      Err(PredictionError::LengthMismatch { .. })
    ));
    assert!(matches!(
      Prediction::new(vec!["a".into()], vec![1.5]),
      Err(PredictionError::ConfidenceOutOfRange(_))
    ));
    assert!(matches!(
      Prediction::new(vec!["a".into()], vec![f32::NAN]),
      Err(PredictionError::ConfidenceOutOfRange(_))
    ));
  }

  #[test]
  fn deserialization_validates() {
    let err = serde_json::from_str::<Prediction>(r#"{"labels": [], "confidence": []}"#);
    assert!(err.is_err());
    let ok: Prediction =
      serde_json::from_str(r#"{"labels": ["Foam"], "confidence": [0.7]}"#).unwrap();
    assert_eq!(ok.labels(), ["Foam"]);
  }
}
