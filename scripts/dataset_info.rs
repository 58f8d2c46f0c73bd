use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use arrow::ipc::reader::FileReader;
use stock_pipeline::data_provider::{coverage, DATASET_FILE};
use stock_pipeline::util::arrow_utils;

fn main() -> Result<(), Box<dyn Error>> {
    // 默认读取 data/latest_dataset.arrow，可通过第一个参数指定路径
    let arrow_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data").join(DATASET_FILE));
    if !arrow_path.exists() {
        return Err(format!(
            "数据文件 {} 不存在，请先运行 'cargo run -- run'",
            arrow_path.display()
        )
        .into());
    }

    // 先打印schema元数据
    let reader = FileReader::try_new(fs::File::open(&arrow_path)?, None)?;
    let schema = reader.schema();
    let mut keys: Vec<_> = schema.metadata().iter().collect();
    keys.sort();
    println!("文件: {}", arrow_path.display());
    for (key, value) in keys {
        println!("  {}: {}", key, value);
    }
    println!("  columns: {}", schema.fields().len());

    let dataset = arrow_utils::read_dataset_from_arrow(&arrow_path)?;
    match dataset.latest_timestamp() {
        Some(ts) => println!("最新数据时间: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("未找到有效的数据"),
    }

    println!(
        "{:<8} {:>7} {:<12} {:<12} {:>10} {:>8} {:>8} {}",
        "Symbol", "Records", "First", "Last", "Close", "Outlier", "Imputed", "Sources"
    );
    println!("{:-<88}", "");
    for c in coverage(&dataset) {
        println!(
            "{:<8} {:>7} {:<12} {:<12} {:>10} {:>8} {:>8} {}",
            c.symbol,
            c.records,
            c.first.format("%Y-%m-%d"),
            c.last.format("%Y-%m-%d"),
            c.last_close.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into()),
            c.outliers,
            c.imputed,
            c.sources.join(",")
        );
    }

    let missing: Vec<&String> = dataset
        .requested_symbols()
        .iter()
        .filter(|s| !dataset.contains_symbol(s))
        .collect();
    if !missing.is_empty() {
        println!("无数据的标的: {:?}", missing);
    }

    Ok(())
}
