// 该文件是 Tidewatch （潮汐守望） 项目的一部分。
// src/task.rs - 流水线运行任务
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

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::PipelineConfig,
  frame::BandTile,
  model::{ClassProbabilities, Model, ModelError},
  output::{PersistenceSink, SinkError, upsert_in_batch, write_json_atomic},
  pipeline::{PipelineError, TilePipeline, TileSummary},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
  Started,
  InProgress,
  DownloadingAoi,
  Inferencing,
  SavingResults,
  Completed,
  Error,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Started => "STARTED",
      RunStatus::InProgress => "IN_PROGRESS",
      RunStatus::DownloadingAoi => "DOWNLOADING_AOI",
      RunStatus::Inferencing => "INFERENCING",
      RunStatus::SavingResults => "SAVING_RESULTS",
      RunStatus::Completed => "COMPLETED",
      RunStatus::Error => "ERROR",
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 每个文件分片 `{aoi_name}_part_{index}` 的统计
pub type RunSummary = BTreeMap<String, TileSummary>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id: String,
  pub status: RunStatus,
  pub summary: RunSummary,
  pub finished_at: Option<String>,
}

/// 外部运行状态日志
pub trait RunLog {
  type Error: fmt::Display;
  fn log(&self, record: &RunRecord) -> Result<(), Self::Error>;
}

impl<L: RunLog + ?Sized> RunLog for &L {
  type Error = L::Error;

  fn log(&self, record: &RunRecord) -> Result<(), Self::Error> {
    (**self).log(record)
  }
}

/// 只输出日志行
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunLog;

impl RunLog for TracingRunLog {
  type Error = std::convert::Infallible;

  fn log(&self, record: &RunRecord) -> Result<(), Self::Error> {
    info!(
      "运行 {} 状态: {}{}",
      record.run_id,
      record.status,
      if record.finished_at.is_some() { " (结束)" } else { "" }
    );
    Ok(())
  }
}

/// 以 run_id 为键 upsert 到 JSON 文件
#[derive(Debug, Clone)]
pub struct JsonRunLog {
  path: PathBuf,
}

impl JsonRunLog {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn load(&self) -> Result<BTreeMap<String, RunRecord>, SinkError> {
    if !self.path.exists() {
      return Ok(BTreeMap::new());
    }
    let text = std::fs::read_to_string(&self.path)?;
    Ok(serde_json::from_str(&text)?)
  }
}

impl RunLog for JsonRunLog {
  type Error = SinkError;

  fn log(&self, record: &RunRecord) -> Result<(), Self::Error> {
    let mut records = self.load()?;
    records.insert(record.run_id.clone(), record.clone());
    write_json_atomic(&self.path, &records)
  }
}

/// AOI 清单条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoiEntry {
  pub aoi_id: String,
  pub aoi_name: String,
  pub file_ids: Vec<String>,
}

pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<AoiEntry>, RunError> {
  let text = std::fs::read_to_string(path.as_ref()).map_err(RunError::Manifest)?;
  serde_json::from_str(&text).map_err(|e| RunError::ManifestFormat(e.to_string()))
}

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("AOI 文件 ID 为空")]
  EmptyFileId,
  #[error("找不到 AOI 文件: {0}")]
  NotFound(String),
}

/// 按文件 ID 取得本地栅格路径
pub trait AoiFetcher {
  fn fetch(&self, file_id: &str, part_name: &str) -> Result<PathBuf, FetchError>;
}

/// 在本地缓存目录中查找已下载的文件
#[derive(Debug, Clone)]
pub struct LocalFetcher {
  root: PathBuf,
}

impl LocalFetcher {
  pub fn new(root: impl AsRef<Path>) -> Self {
    Self {
      root: root.as_ref().to_path_buf(),
    }
  }
}

impl AoiFetcher for LocalFetcher {
  fn fetch(&self, file_id: &str, part_name: &str) -> Result<PathBuf, FetchError> {
    if file_id.is_empty() {
      return Err(FetchError::EmptyFileId);
    }
    let candidates = [
      self.root.join(file_id),
      self.root.join(format!("{}.tif", file_id)),
      self.root.join(format!("aoi_{}.tif", part_name)),
    ];
    candidates
      .into_iter()
      .find(|p| p.is_file())
      .ok_or_else(|| FetchError::NotFound(format!("{} ({})", file_id, self.root.display())))
  }
}

#[derive(Error, Debug)]
pub enum RunError {
  #[error("没有可处理的 AOI")]
  NoAois,
  #[error("AOI 清单读取错误: {0}")]
  Manifest(std::io::Error),
  #[error("AOI 清单格式错误: {0}")]
  ManifestFormat(String),
  #[error("获取 AOI 失败: {0}")]
  Fetch(#[from] FetchError),
  #[error("流水线错误: {0}")]
  Pipeline(#[from] PipelineError),
  #[error("写入结果失败: {0}")]
  Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
  pub run_id: String,
  pub summary: RunSummary,
  pub saved: usize,
}

pub fn new_run_id() -> String {
  format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"))
}

/// 顺序处理全部 AOI 的各个文件分片，并向状态日志报告进度
pub struct PipelineRun<'c, F, L> {
  run_id: String,
  config: &'c PipelineConfig,
  fetcher: F,
  log: L,
}

impl<'c, F: AoiFetcher, L: RunLog> PipelineRun<'c, F, L> {
  pub fn new(run_id: impl Into<String>, config: &'c PipelineConfig, fetcher: F, log: L) -> Self {
    Self {
      run_id: run_id.into(),
      config,
      fetcher,
      log,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn report(&self, status: RunStatus, summary: &RunSummary, finished: bool) {
    let record = RunRecord {
      run_id: self.run_id.clone(),
      status,
      summary: summary.clone(),
      finished_at: finished.then(|| Utc::now().to_rfc3339()),
    };
    if let Err(e) = self.log.log(&record) {
      error!("记录运行状态 {} 失败: {}", status, e);
    }
  }

  pub fn run<M, S>(self, aois: &[AoiEntry], model: &M, sink: &S) -> Result<RunReport, RunError>
  where
    M: Model<Input = BandTile, Output = ClassProbabilities, Error = ModelError>,
    S: PersistenceSink<Error = SinkError> + ?Sized,
  {
    info!("开始运行 {}: {} 个 AOI", self.run_id, aois.len());
    let mut summary = RunSummary::new();
    self.report(RunStatus::InProgress, &summary, false);

    match self.execute(aois, model, sink, &mut summary) {
      Ok(saved) => {
        self.report(RunStatus::Completed, &summary, true);
        info!("运行 {} 完成, 共写入 {} 条结果", self.run_id, saved);
        Ok(RunReport {
          run_id: self.run_id,
          summary,
          saved,
        })
      }
      Err(e) => {
        error!("运行 {} 失败: {}", self.run_id, e);
        self.report(RunStatus::Error, &summary, true);
        Err(e)
      }
    }
  }

  fn execute<M, S>(
    &self,
    aois: &[AoiEntry],
    model: &M,
    sink: &S,
    summary: &mut RunSummary,
  ) -> Result<usize, RunError>
  where
    M: Model<Input = BandTile, Output = ClassProbabilities, Error = ModelError>,
    S: PersistenceSink<Error = SinkError> + ?Sized,
  {
    if aois.is_empty() {
      return Err(RunError::NoAois);
    }
    let pipeline = TilePipeline::new(model, self.config)?;

    let mut saved = 0;
    for aoi in aois {
      info!("处理 AOI: {} (ID: {})", aoi.aoi_name, aoi.aoi_id);
      for (index, file_id) in aoi.file_ids.iter().enumerate() {
        let part = format!("{}_part_{}", aoi.aoi_name, index);

        self.report(RunStatus::DownloadingAoi, summary, false);
        let path = self.fetcher.fetch(file_id, &part)?;
        info!("AOI 文件就绪: {}", path.display());

        self.report(RunStatus::Inferencing, summary, false);
        let result = pipeline.process_path(&aoi.aoi_id, &path)?;
        summary.insert(part.clone(), result.summary);

        if result.payloads.is_empty() {
          warn!("AOI {} 分片 {} 没有推理结果", aoi.aoi_name, index);
          continue;
        }
        self.report(RunStatus::SavingResults, summary, false);
        upsert_in_batch(sink, &result.payloads, self.config.batch_size)?;
        saved += result.payloads.len();
      }
    }
    Ok(saved)
  }
}

impl<'c, 'i, 'm, 's, F, L, M, S> Task<&'i [AoiEntry], &'m M, &'s S> for PipelineRun<'c, F, L>
where
  F: AoiFetcher,
  L: RunLog,
  M: Model<Input = BandTile, Output = ClassProbabilities, Error = ModelError>,
  S: PersistenceSink<Error = SinkError> + ?Sized,
{
  type Output = RunReport;
  type Error = RunError;

  fn run_task(self, aois: &'i [AoiEntry], model: &'m M, sink: &'s S) -> Result<RunReport, RunError> {
    self.run(aois, model, sink)
  }
}
