// 公开导出的模块，供外部使用
pub mod models;
pub mod data_provider;
pub mod errors;
pub mod config;
pub mod schedule;

pub mod analysis;
pub mod notify;
pub mod parsers;
pub mod scrapers;
pub mod services;
pub mod util;

// 重新导出常用类型，方便使用
pub use config::{ConfigSource, PipelineConfig};
pub use data_provider::{DatasetStore, LatestRun};
pub use errors::{PipelineError, Result};
pub use models::{AnalysisResult, Dataset, Record, TimeWindow};
pub use services::{Pipeline, Scheduler};
