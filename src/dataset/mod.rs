//! Tabular datasets (Arrow `RecordBatch`)
//!
//! A [`Dataset`] is a single `RecordBatch` read from CSV or Parquet.
//! The experiment runner splits it into numeric [`Features`] and an integer
//! [`Target`], which is what the model and the evaluator consume.
//!
//! Datasets are append-free and immutable once loaded: every transformation
//! (`take`, projection, casting) produces a new batch.

pub mod iris;
pub mod split;

pub use split::{split_sizes, train_test_split, TrainTestSplit, DEFAULT_TEST_SIZE};

use crate::model::Matrix;
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, UInt32Array};
use arrow::compute::{cast, concat_batches, take, take_record_batch};
use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Name of the integer class-id column.
pub const TARGET_COLUMN: &str = "target";

/// Name of the human-readable label column.
pub const SPECIES_COLUMN: &str = "species";

/// An immutable table of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    batch: RecordBatch,
}

impl Dataset {
    /// Wrap an existing record batch.
    #[must_use]
    pub const fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Parse CSV with a header row, inferring column types.
    ///
    /// # Errors
    /// Returns error if the bytes are not valid CSV or the file is empty
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let format = arrow::csv::reader::Format::default().with_header(true);
        let (schema, _) = format.infer_schema(Cursor::new(bytes), None)?;
        let schema = Arc::new(schema);
        if schema.fields().is_empty() {
            return Err(Error::Dataset("CSV input has no columns".to_string()));
        }

        let reader = arrow::csv::ReaderBuilder::new(schema.clone())
            .with_header(true)
            .build(Cursor::new(bytes))?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self::new(concat_batches(&schema, &batches)?))
    }

    /// Decode a Parquet file held in memory.
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid Parquet file
    pub fn from_parquet_bytes(bytes: Bytes) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self::new(concat_batches(&schema, &batches)?))
    }

    /// Read a local CSV file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_csv_bytes(&bytes)
    }

    /// Serialize to CSV (header row, no index column).
    ///
    /// # Errors
    /// Returns error if a column type cannot be rendered as CSV
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        batch_to_csv(&self.batch)
    }

    /// Write CSV to `path`. The parent directory must already exist.
    ///
    /// # Errors
    /// Returns the underlying IO error if the file cannot be created
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_csv_bytes()?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Underlying record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Split into features (every column not in `exclude`) and the `target`
    /// column.
    ///
    /// Feature columns are cast to `Float64`; the target is cast to `Int64`.
    ///
    /// # Errors
    /// Returns error if the target column is missing, contains nulls, or a
    /// feature column is not numeric
    pub fn features_and_target(&self, target: &str, exclude: &[&str]) -> Result<(Features, Target)> {
        let schema = self.batch.schema();
        let target_idx = schema
            .index_of(target)
            .map_err(|_| Error::Dataset(format!("missing target column '{target}'")))?;

        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();
        for (idx, field) in schema.fields().iter().enumerate() {
            if idx == target_idx || exclude.contains(&field.name().as_str()) {
                continue;
            }
            if !field.data_type().is_numeric() {
                return Err(Error::Dataset(format!(
                    "feature column '{}' has non-numeric type {}",
                    field.name(),
                    field.data_type()
                )));
            }
            columns.push(cast(self.batch.column(idx), &DataType::Float64)?);
            fields.push(Field::new(field.name(), DataType::Float64, false));
        }
        if columns.is_empty() {
            return Err(Error::Dataset("dataset has no feature columns".to_string()));
        }

        let features = Features::new(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)?;
        let target = Target::new(target, self.batch.column(target_idx))?;
        Ok((features, target))
    }
}

/// Numeric feature columns (all `Float64`, no nulls).
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    batch: RecordBatch,
}

impl Features {
    /// Wrap a batch of `Float64` columns.
    ///
    /// # Errors
    /// Returns error if any column is not `Float64` or contains nulls
    pub fn new(batch: RecordBatch) -> Result<Self> {
        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            if field.data_type() != &DataType::Float64 {
                return Err(Error::Dataset(format!(
                    "feature column '{}' must be Float64, got {}",
                    field.name(),
                    field.data_type()
                )));
            }
            if column.null_count() > 0 {
                return Err(Error::Dataset(format!(
                    "feature column '{}' contains {} nulls",
                    field.name(),
                    column.null_count()
                )));
            }
        }
        Ok(Self { batch })
    }

    /// Underlying record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Feature names in column order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of feature columns.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.batch.num_columns()
    }

    fn column(&self, idx: usize) -> &Float64Array {
        // Checked in `new`: every column is Float64.
        self.batch
            .column(idx)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap_or_else(|| unreachable!("feature columns are Float64"))
    }

    /// Values of row `i`, or `None` if out of bounds.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<Vec<f64>> {
        (i < self.num_rows())
            .then(|| (0..self.num_features()).map(|c| self.column(c).value(i)).collect())
    }

    /// First `n` rows (fewer if the table is shorter).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            batch: self.batch.slice(0, n.min(self.num_rows())),
        }
    }

    /// Gather rows by index.
    ///
    /// # Errors
    /// Returns error if an index is out of bounds
    pub fn take(&self, indices: &UInt32Array) -> Result<Self> {
        Ok(Self {
            batch: take_record_batch(&self.batch, indices)?,
        })
    }

    /// Row-major copy for model fitting.
    ///
    /// # Errors
    /// Returns error if the table is empty
    pub fn to_matrix(&self) -> Result<Matrix> {
        let n_rows = self.num_rows();
        let n_cols = self.num_features();
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in 0..n_rows {
            for col in 0..n_cols {
                data.push(self.column(col).value(row));
            }
        }
        Matrix::new(data, n_rows, n_cols)
    }
}

/// Integer class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    name: String,
    values: Int64Array,
}

impl Target {
    /// Build from any numeric array, casting to `Int64`.
    ///
    /// Float labels must be whole numbers; `1.0` becomes class `1`.
    ///
    /// # Errors
    /// Returns error if the array cannot be cast, contains nulls, or holds
    /// a float label with a fractional part
    pub fn new(name: impl Into<String>, array: &ArrayRef) -> Result<Self> {
        let name = name.into();
        if array.null_count() > 0 {
            return Err(Error::Dataset(format!(
                "target column '{name}' contains {} nulls",
                array.null_count()
            )));
        }
        if !array.data_type().is_numeric() {
            return Err(Error::Dataset(format!(
                "target column '{name}' has non-numeric type {}",
                array.data_type()
            )));
        }
        if array.data_type().is_floating() {
            let floats = cast(array, &DataType::Float64)?;
            let floats = floats
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| Error::Dataset(format!("target column '{name}' is not Float64")))?;
            if let Some(v) = floats
                .values()
                .iter()
                .find(|v| !v.is_finite() || v.fract() != 0.0)
            {
                return Err(Error::Dataset(format!(
                    "target column '{name}' holds non-integer label {v}"
                )));
            }
        }
        let casted = cast(array, &DataType::Int64)?;
        let values = casted
            .as_any()
            .downcast_ref::<Int64Array>()
            .cloned()
            .ok_or_else(|| Error::Dataset(format!("target column '{name}' is not Int64")))?;
        Ok(Self { name, values })
    }

    /// Build from plain labels.
    #[must_use]
    pub fn from_labels(name: impl Into<String>, labels: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            values: Int64Array::from(labels),
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Labels as a plain vector.
    #[must_use]
    pub fn labels(&self) -> Vec<i64> {
        self.values.values().to_vec()
    }

    /// Labels as an Arrow array.
    #[must_use]
    pub fn array(&self) -> ArrayRef {
        Arc::new(self.values.clone())
    }

    /// Gather labels by index.
    ///
    /// # Errors
    /// Returns error if an index is out of bounds
    pub fn take(&self, indices: &UInt32Array) -> Result<Self> {
        let taken = take(&self.values, indices, None)?;
        Self::new(self.name.clone(), &taken)
    }
}

/// Render a batch as CSV with a header row.
pub(crate) fn batch_to_csv(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .build(&mut buf);
        writer.write(batch)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "a,b,target,species\n1.0,2.5,0,x\n3.0,4.5,1,y\n5.0,6.5,1,y\n";

    #[test]
    fn test_from_csv_bytes_infers_columns() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.column_names(), vec!["a", "b", "target", "species"]);
    }

    #[test]
    fn test_features_and_target_excludes_label_columns() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        let (x, y) = ds
            .features_and_target(TARGET_COLUMN, &[TARGET_COLUMN, SPECIES_COLUMN])
            .unwrap();

        assert_eq!(x.names(), vec!["a", "b"]);
        assert_eq!(x.row(1), Some(vec![3.0, 4.5]));
        assert_eq!(y.labels(), vec![0, 1, 1]);
        assert_eq!(y.name(), "target");
    }

    #[test]
    fn test_missing_target_column() {
        let ds = Dataset::from_csv_bytes(b"a,b\n1,2\n").unwrap();
        let err = ds.features_and_target("target", &[]).unwrap_err();
        assert!(err.to_string().contains("missing target column"));
    }

    #[test]
    fn test_string_feature_rejected() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        let err = ds.features_and_target(TARGET_COLUMN, &[]).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_to_matrix_is_row_major() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        let (x, _) = ds
            .features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])
            .unwrap();
        let m = x.to_matrix().unwrap();
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.n_cols(), 2);
        assert_eq!(m.row(2), &[5.0, 6.5]);
    }

    #[test]
    fn test_take_rows() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        let (x, y) = ds
            .features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])
            .unwrap();
        let idx = UInt32Array::from(vec![2, 0]);
        assert_eq!(x.take(&idx).unwrap().row(0), Some(vec![5.0, 6.5]));
        assert_eq!(y.take(&idx).unwrap().labels(), vec![1, 0]);
    }

    #[test]
    fn test_csv_round_trip_keeps_header() {
        let ds = Dataset::from_csv_bytes(CSV.as_bytes()).unwrap();
        let out = String::from_utf8(ds.to_csv_bytes().unwrap()).unwrap();
        assert!(out.starts_with("a,b,target,species\n"));
        assert_eq!(out.lines().count(), 4);
    }
}
