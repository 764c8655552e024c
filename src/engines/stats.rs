use {
    anyhow::Result,
    polars::prelude::{
        DataFrame,
        NamedFrom,
        ParquetWriter,
        Series,
    },
    std::{
        collections::{
            BTreeMap,
            VecDeque,
        },
        fs::File,
        ops::AddAssign,
        path::Path,
    },
};


/// The mean of the values added so far.
///
/// NaN values are skipped; the average of nothing is NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct Average {
    total: f64,
    count: usize,
}
impl Average {
    pub fn get(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.total / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
impl AddAssign<f64> for Average {
    fn add_assign(&mut self, value: f64) {
        if !value.is_nan() {
            self.total += value;
            self.count += 1;
        }
    }
}


/// The last `capacity` values.
#[derive(Debug, Clone)]
pub struct History {
    values: VecDeque<f64>,
    capacity: usize,
}
impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(
        &mut self,
        value: f64,
    ) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        let mut average = Average::default();
        for value in &self.values {
            average += *value;
        }
        average.get()
    }
}


/// One row of combined statistics per epoch.
///
/// A key that shows up late is backfilled with NaN, as is a key that is
/// missing from a row, so every column always has one value per row.
#[derive(Debug, Clone, Default)]
pub struct ProgressTable {
    columns: BTreeMap<String, Vec<f64>>,
    rows: usize,
}
impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(
        &self,
        key: &str,
    ) -> Option<&[f64]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn push(
        &mut self,
        row: &BTreeMap<String, f64>,
    ) {
        for (key, value) in row {
            self.columns
                .entry(key.clone())
                .or_insert_with(|| vec![f64::NAN; self.rows])
                .push(*value);
        }
        self.rows += 1;
        for column in self.columns.values_mut() {
            column.resize(self.rows, f64::NAN);
        }
    }

    /// Write the table as a parquet file, one column per statistic.
    pub fn write(
        &self,
        path: &dyn AsRef<Path>,
    ) -> Result<()> {
        let mut df = DataFrame::new(
            self.columns
                .iter()
                .map(|(key, values)| Series::new(key, values))
                .collect(),
        )?;
        ParquetWriter::new(File::create(path)?).finish(&mut df)?;
        Ok(())
    }
}
