use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::errors::StorageError;
use crate::models::analysis::AnalysisResult;
use crate::models::dataset::Dataset;
use crate::util::{arrow_utils, write_bytes_atomic};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATASET_FILE: &str = "latest_dataset.arrow";
pub const ANALYSIS_FILE: &str = "latest_analysis.json";

/// 最近一次运行的持久化结果
#[derive(Debug, Clone)]
pub struct LatestRun {
    pub dataset: Dataset,
    /// `None` when the dataset was written but the analysis was not.
    pub analysis: Option<AnalysisResult>,
}

impl LatestRun {
    /// Dataset and analysis belong to the same run.
    pub fn is_consistent(&self) -> bool {
        self.analysis
            .as_ref()
            .map_or(false, |a| a.run_id == self.dataset.run_id())
    }
}

/// Per-symbol overview of a stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolCoverage {
    pub symbol: String,
    pub records: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub sources: Vec<String>,
    pub last_close: Option<f64>,
    pub outliers: usize,
    pub imputed: usize,
}

pub fn coverage(dataset: &Dataset) -> Vec<SymbolCoverage> {
    dataset
        .symbols()
        .into_iter()
        .filter_map(|symbol| {
            let records = dataset.records_for(symbol);
            let first = records.iter().map(|r| r.timestamp).min()?;
            let last = records.iter().map(|r| r.timestamp).max()?;
            let sources: BTreeSet<&str> = records.iter().map(|r| r.source.as_str()).collect();
            Some(SymbolCoverage {
                symbol: symbol.to_string(),
                records: records.len(),
                first,
                last,
                sources: sources.into_iter().map(|s| s.to_string()).collect(),
                last_close: dataset.series(symbol).iter().rev().find_map(|r| r.close),
                outliers: records.iter().filter(|r| r.outlier).count(),
                imputed: records.iter().filter(|r| r.imputed).count(),
            })
        })
        .collect()
}

/// 数据集与分析结果的本地存储
///
/// Holds only the latest run: `latest_dataset.arrow` and
/// `latest_analysis.json` under one data directory. Both are replaced
/// atomically, so a reader never observes a half-written file.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    data_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(DATASET_FILE)
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.data_dir.join(ANALYSIS_FILE)
    }

    /// 保存数据集到Arrow文件
    pub fn save_dataset(&self, dataset: &Dataset) -> Result<(), StorageError> {
        arrow_utils::save_dataset_to_arrow(dataset, &self.dataset_path())
    }

    pub fn save_analysis(&self, analysis: &AnalysisResult) -> Result<(), StorageError> {
        let path = self.analysis_path();
        let json = serde_json::to_vec_pretty(analysis)?;
        write_bytes_atomic(&path, &json)?;
        info!("Saved analysis for run {} to {}", analysis.run_id, path.display());
        Ok(())
    }

    /// Dataset first, then analysis. A crash in between leaves a dataset
    /// whose run id does not match the stored analysis.
    pub fn persist(&self, dataset: &Dataset, analysis: &AnalysisResult) -> Result<(), StorageError> {
        if analysis.run_id != dataset.run_id() {
            return Err(StorageError::Corrupt(format!(
                "analysis run {} does not match dataset run {}",
                analysis.run_id,
                dataset.run_id()
            )));
        }
        self.save_dataset(dataset)?;
        self.save_analysis(analysis)
    }

    /// 从文件加载数据集，文件不存在时返回None
    pub fn load_dataset(&self) -> Result<Option<Dataset>, StorageError> {
        let path = self.dataset_path();
        if !path.exists() {
            return Ok(None);
        }
        arrow_utils::read_dataset_from_arrow(&path).map(Some)
    }

    pub fn load_analysis(&self) -> Result<Option<AnalysisResult>, StorageError> {
        let path = self.analysis_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn load_latest(&self) -> Result<Option<LatestRun>, StorageError> {
        let Some(dataset) = self.load_dataset()? else {
            return Ok(None);
        };
        let analysis = self.load_analysis()?;
        let latest = LatestRun { dataset, analysis };
        if latest.analysis.is_some() && !latest.is_consistent() {
            warn!(
                "Stored analysis does not belong to dataset run {}",
                latest.dataset.run_id()
            );
        }
        Ok(Some(latest))
    }
}
