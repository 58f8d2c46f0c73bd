use crate::errors::StorageError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Run identifier: UTC start time plus a short random suffix.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!("{}-{:04x}", now.format("%Y%m%dT%H%M%SZ"), suffix)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write through a sibling temp file and rename it over `path`, so readers
/// see either the previous file or the complete new one.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut File) -> Result<(), StorageError>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        write(&mut file)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    write_atomic(path, |file| Ok(file.write_all(bytes)?))
}

// Arrow数据转换工具
pub mod arrow_utils {
    use crate::errors::StorageError;
    use crate::models::dataset::{Dataset, TimeWindow};
    use crate::models::record::Record;
    use arrow::array::{ArrayRef, StringBuilder};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use arrow::ipc::reader::FileReader;
    use arrow::ipc::writer::FileWriter;
    use arrow::record_batch::RecordBatch;
    use arrow_array::{Array, BooleanArray, Float64Array, StringArray, TimestampMillisecondArray, UInt64Array};
    use chrono::{DateTime, TimeZone, Utc};
    use log::info;
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::{Cursor, Read, Seek, Write};
    use std::path::Path;
    use std::sync::Arc;

    const META_RUN_ID: &str = "run_id";
    const META_CREATED_AT: &str = "created_at";
    const META_SYMBOLS: &str = "symbols";
    const META_WINDOW_START: &str = "window_start";
    const META_WINDOW_END: &str = "window_end";

    fn timestamp_type() -> DataType {
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
    }

    /// Flat record table; run metadata lives in the schema metadata.
    pub fn dataset_schema(metadata: HashMap<String, String>) -> Schema {
        Schema::new_with_metadata(
            vec![
                Field::new("symbol", DataType::Utf8, false),
                Field::new("timestamp", timestamp_type(), false),
                Field::new("source", DataType::Utf8, false),
                Field::new("open", DataType::Float64, true),
                Field::new("high", DataType::Float64, true),
                Field::new("low", DataType::Float64, true),
                Field::new("close", DataType::Float64, true),
                Field::new("volume", DataType::UInt64, true),
                Field::new("outlier", DataType::Boolean, false),
                Field::new("imputed", DataType::Boolean, false),
            ],
            metadata,
        )
    }

    fn run_metadata(dataset: &Dataset) -> HashMap<String, String> {
        let window = dataset.window();
        HashMap::from([
            (META_RUN_ID.to_string(), dataset.run_id().to_string()),
            (META_CREATED_AT.to_string(), dataset.created_at().to_rfc3339()),
            (META_SYMBOLS.to_string(), dataset.requested_symbols().join(",")),
            (META_WINDOW_START.to_string(), window.start.to_rfc3339()),
            (META_WINDOW_END.to_string(), window.end.to_rfc3339()),
        ])
    }

    // 将数据集转换为Arrow记录批次
    pub fn dataset_to_record_batch(dataset: &Dataset) -> Result<RecordBatch, StorageError> {
        let records = dataset.records();
        let mut symbol_builder = StringBuilder::new();
        let mut source_builder = StringBuilder::new();
        for r in records {
            symbol_builder.append_value(&r.symbol);
            source_builder.append_value(&r.source);
        }

        let timestamps = TimestampMillisecondArray::from(
            records.iter().map(|r| r.timestamp.timestamp_millis()).collect::<Vec<_>>(),
        )
        .with_timezone("UTC");
        let price = |f: fn(&Record) -> Option<f64>| -> ArrayRef {
            Arc::new(Float64Array::from(records.iter().map(f).collect::<Vec<_>>()))
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(symbol_builder.finish()),
            Arc::new(timestamps),
            Arc::new(source_builder.finish()),
            price(|r| r.open),
            price(|r| r.high),
            price(|r| r.low),
            price(|r| r.close),
            Arc::new(UInt64Array::from(records.iter().map(|r| r.volume).collect::<Vec<_>>())),
            Arc::new(BooleanArray::from(records.iter().map(|r| r.outlier).collect::<Vec<_>>())),
            Arc::new(BooleanArray::from(records.iter().map(|r| r.imputed).collect::<Vec<_>>())),
        ];

        Ok(RecordBatch::try_new(Arc::new(dataset_schema(run_metadata(dataset))), columns)?)
    }

    pub fn write_dataset_to<W: Write>(dataset: &Dataset, writer: W) -> Result<(), StorageError> {
        let batch = dataset_to_record_batch(dataset)?;
        // 使用默认选项，不启用压缩
        let mut writer = FileWriter::try_new(writer, &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
        Ok(())
    }

    /// Save through a temp file + rename.
    pub fn save_dataset_to_arrow(dataset: &Dataset, path: &Path) -> Result<(), StorageError> {
        info!(
            "Saving run {} ({} records, {} symbols) to {}",
            dataset.run_id(),
            dataset.len(),
            dataset.symbols().len(),
            path.display()
        );
        crate::util::write_atomic(path, |file| write_dataset_to(dataset, file))
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StorageError> {
        batch
            .column_by_name(name)
            .and_then(|a| a.as_any().downcast_ref::<T>())
            .ok_or_else(|| StorageError::Corrupt(format!("Failed to downcast {} column", name)))
    }

    fn meta<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str, StorageError> {
        metadata
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| StorageError::Corrupt(format!("missing schema metadata {}", key)))
    }

    fn meta_time(metadata: &HashMap<String, String>, key: &str) -> Result<DateTime<Utc>, StorageError> {
        let raw = meta(metadata, key)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt(format!("bad {} {:?}: {}", key, raw, e)))
    }

    fn optional<T: Array>(array: &T, i: usize) -> bool {
        !array.is_null(i)
    }

    pub fn read_dataset_from<R: Read + Seek>(reader: R) -> Result<Dataset, StorageError> {
        let reader = FileReader::try_new(reader, None)?;
        let schema = reader.schema();
        let metadata = schema.metadata();

        let run_id = meta(metadata, META_RUN_ID)?.to_string();
        let created_at = meta_time(metadata, META_CREATED_AT)?;
        let window = TimeWindow::new(
            meta_time(metadata, META_WINDOW_START)?,
            meta_time(metadata, META_WINDOW_END)?,
        );
        let symbols: Vec<String> = meta(metadata, META_SYMBOLS)?
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        let mut records = Vec::new();
        for batch in reader {
            let batch = batch?;
            let symbol = column::<StringArray>(&batch, "symbol")?;
            let timestamp = column::<TimestampMillisecondArray>(&batch, "timestamp")?;
            let source = column::<StringArray>(&batch, "source")?;
            let open = column::<Float64Array>(&batch, "open")?;
            let high = column::<Float64Array>(&batch, "high")?;
            let low = column::<Float64Array>(&batch, "low")?;
            let close = column::<Float64Array>(&batch, "close")?;
            let volume = column::<UInt64Array>(&batch, "volume")?;
            let outlier = column::<BooleanArray>(&batch, "outlier")?;
            let imputed = column::<BooleanArray>(&batch, "imputed")?;

            let price = |a: &Float64Array, i: usize| optional(a, i).then(|| a.value(i));
            for i in 0..batch.num_rows() {
                let ts = Utc
                    .timestamp_millis_opt(timestamp.value(i))
                    .single()
                    .ok_or_else(|| StorageError::Corrupt(format!("bad timestamp at row {}", i)))?;
                let mut record = Record::new(symbol.value(i), ts, source.value(i));
                record.open = price(open, i);
                record.high = price(high, i);
                record.low = price(low, i);
                record.close = price(close, i);
                record.volume = optional(volume, i).then(|| volume.value(i));
                record.outlier = outlier.value(i);
                record.imputed = imputed.value(i);
                records.push(record);
            }
        }

        Ok(Dataset::new(&run_id, created_at, &symbols, window, records))
    }

    // 从Arrow文件读取数据集
    pub fn read_dataset_from_arrow(path: &Path) -> Result<Dataset, StorageError> {
        read_dataset_from(File::open(path)?)
    }

    // 从内存中读取Arrow数据
    pub fn read_dataset_from_memory(data: &[u8]) -> Result<Dataset, StorageError> {
        read_dataset_from(Cursor::new(data))
    }
}
