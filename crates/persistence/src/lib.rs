#![deny(warnings)]

//! Run output: timestamped run folders, Parquet tick tables, JSON summaries
//! and bincode checkpoints of firm state.

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Builder, StringBuilder, UInt32Builder, UInt64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Local;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sim_core::{FirmId, TickFrame};
use sim_econ::Firm;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Rows buffered before a batch is handed to the Parquet writer.
const BATCH_ROWS: usize = 4_096;

/// Create `base/run_YYYY_MM_DD_HHMM[_name]` and return its path.
pub fn create_run_folder(base: &Path, scenario_name: Option<&str>) -> Result<PathBuf> {
    let mut name = format!("run_{}", Local::now().format("%Y_%m_%d_%H%M"));
    if let Some(s) = scenario_name.filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(s);
    }
    let path = base.join(name);
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating run folder {}", path.display()))?;
    Ok(path)
}

/// A flattened firm tick record.
#[derive(Clone, Debug, PartialEq)]
struct Row {
    tick: u64,
    firm_id: u32,
    price: String,
    inventory: f64,
    production_quantity: f64,
    employee_count: u32,
    revenue: String,
    revenue_f64: f64,
    unmet_demand: f64,
}

/// Streams [`TickFrame`]s into a Snappy-compressed Parquet file.
///
/// Money columns are stored twice: as exact decimal strings and as `f64` for
/// quick plotting.
pub struct FirmParquetWriter {
    schema: Arc<Schema>,
    buffer: Vec<Row>,
    writer: Option<ArrowWriter<File>>,
    rows_written: usize,
}

impl FirmParquetWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let schema = Arc::new(Self::schema());
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .context("opening parquet writer")?;
        Ok(Self {
            schema,
            buffer: Vec::with_capacity(BATCH_ROWS),
            writer: Some(writer),
            rows_written: 0,
        })
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("tick", DataType::UInt64, false),
            Field::new("firm_id", DataType::UInt32, false),
            Field::new("price", DataType::Utf8, false),
            Field::new("inventory", DataType::Float64, false),
            Field::new("production_quantity", DataType::Float64, false),
            Field::new("employee_count", DataType::UInt32, false),
            Field::new("revenue", DataType::Utf8, false),
            Field::new("revenue_f64", DataType::Float64, false),
            Field::new("unmet_demand", DataType::Float64, false),
        ])
    }

    pub fn write_frame(&mut self, frame: &TickFrame) -> Result<()> {
        for r in &frame.records {
            self.buffer.push(Row {
                tick: frame.tick,
                firm_id: r.firm_id.0,
                price: r.price.to_string(),
                inventory: r.inventory,
                production_quantity: r.production_quantity,
                employee_count: r.employee_count,
                revenue: r.revenue.to_string(),
                revenue_f64: r.revenue.to_f64().unwrap_or(f64::NAN),
                unmet_demand: r.unmet_demand,
            });
        }
        if self.buffer.len() >= BATCH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = self.batch()?;
        if let Some(w) = self.writer.as_mut() {
            w.write(&batch).context("writing record batch")?;
        }
        self.rows_written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    fn batch(&self) -> Result<RecordBatch> {
        let n = self.buffer.len();
        let mut tick = UInt64Builder::with_capacity(n);
        let mut firm = UInt32Builder::with_capacity(n);
        let mut price = StringBuilder::with_capacity(n, n * 12);
        let mut inventory = Float64Builder::with_capacity(n);
        let mut production = Float64Builder::with_capacity(n);
        let mut staff = UInt32Builder::with_capacity(n);
        let mut revenue = StringBuilder::with_capacity(n, n * 16);
        let mut revenue_f64 = Float64Builder::with_capacity(n);
        let mut unmet = Float64Builder::with_capacity(n);

        for r in &self.buffer {
            tick.append_value(r.tick);
            firm.append_value(r.firm_id);
            price.append_value(&r.price);
            inventory.append_value(r.inventory);
            production.append_value(r.production_quantity);
            staff.append_value(r.employee_count);
            revenue.append_value(&r.revenue);
            revenue_f64.append_value(r.revenue_f64);
            unmet.append_value(r.unmet_demand);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(tick.finish()),
            Arc::new(firm.finish()),
            Arc::new(price.finish()),
            Arc::new(inventory.finish()),
            Arc::new(production.finish()),
            Arc::new(staff.finish()),
            Arc::new(revenue.finish()),
            Arc::new(revenue_f64.finish()),
            Arc::new(unmet.finish()),
        ];
        RecordBatch::try_new(self.schema.clone(), columns).context("building record batch")
    }

    /// Flush and close the file. Returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        if let Some(w) = self.writer.take() {
            w.close().context("closing parquet writer")?;
        }
        Ok(self.rows_written)
    }
}

/// Write every frame to `path` in one go.
pub fn write_frames(path: &Path, frames: &[TickFrame]) -> Result<usize> {
    let mut w = FirmParquetWriter::create(path)?;
    for f in frames {
        w.write_frame(f)?;
    }
    let rows = w.finish()?;
    info!(path = %path.display(), rows, "tick table written");
    Ok(rows)
}

/// Pretty-printed JSON summary.
pub fn save_summary<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, summary).context("writing summary")?;
    w.flush().context("flushing summary")?;
    Ok(())
}

/// Firm state at a tick boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Next tick to run.
    pub tick: u64,
    pub firms: Vec<Firm>,
    /// Consecutive ticks each firm has spent on its price floor.
    pub floor_streaks: BTreeMap<FirmId, u32>,
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    bincode::serialize_into(&mut w, checkpoint).context("encoding checkpoint")?;
    w.flush().context("flushing checkpoint")?;
    info!(path = %path.display(), tick = checkpoint.tick, "checkpoint saved");
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let cp = bincode::deserialize_from(BufReader::new(file)).context("decoding checkpoint")?;
    Ok(cp)
}
