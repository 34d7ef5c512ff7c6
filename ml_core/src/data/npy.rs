//! Readers for corruption benchmarks stored as `.npy` files.
//!
//! The expected layout is the one used by the CIFAR-C family:
//!
//! ```text
//! <root>/
//!     labels.npy          # [severities * samples_per_level]
//!     origin.npy          # clean test inputs [samples_per_level, ...]
//!     <corruption>.npy    # [severities * samples_per_level, ...]
//! ```
//!
//! Inputs of any rank are flattened to one feature vector per sample. Byte
//! images are scaled to `[0, 1]`.

use std::{fs::File, ops::Range, path::Path};

use ndarray::{Array2, ArrayD, ArrayViewD, Axis};
use ndarray_npy::ReadNpyExt;

use super::{DataError, InMemoryDataset};

/// Loads the clean test split.
///
/// # Arguments
/// * `root` - The benchmark directory.
/// * `samples_per_level` - The amount of samples per severity block.
pub fn load_origin(root: &Path, samples_per_level: usize) -> Result<InMemoryDataset, DataError> {
    let (inputs, rows) = load_inputs(&root.join("origin.npy"), |total| {
        Ok(0..total.min(samples_per_level))
    })?;
    assemble(root, inputs, rows)
}

/// Loads one severity block of a corruption.
///
/// # Arguments
/// * `root` - The benchmark directory.
/// * `corruption` - The corruption name, matching the file stem.
/// * `level` - The 1-based severity level.
/// * `samples_per_level` - The amount of samples per severity block.
pub fn load_corrupted(
    root: &Path,
    corruption: &str,
    level: u8,
    samples_per_level: usize,
) -> Result<InMemoryDataset, DataError> {
    if level == 0 {
        return Err(DataError::InvalidSample("severity levels start at 1"));
    }

    let start = (level as usize - 1) * samples_per_level;
    let rows = start..start + samples_per_level;

    let (inputs, rows) = load_inputs(&root.join(format!("{corruption}.npy")), |total| {
        if rows.end > total {
            return Err(DataError::Format(format!(
                "{corruption}.npy has {total} rows, level {level} needs rows {rows:?}"
            )));
        }
        Ok(rows)
    })?;

    assemble(root, inputs, rows)
}

fn assemble(root: &Path, inputs: Array2<f32>, rows: Range<usize>) -> Result<InMemoryDataset, DataError> {
    let labels = load_labels(&root.join("labels.npy"))?;

    if rows.end > labels.len() {
        return Err(DataError::Format(format!(
            "labels.npy has {} entries, expected at least {}",
            labels.len(),
            rows.end
        )));
    }

    InMemoryDataset::new(inputs, labels[rows].to_vec())
}

/// Reads the rows picked by `select` out of an inputs file.
///
/// Only the selected block is converted to `f32` and flattened.
///
/// # Arguments
/// * `path` - The `.npy` file.
/// * `select` - Maps the amount of rows in the file to the rows to keep.
///
/// # Returns
/// The selected inputs, one flattened sample per row, and the row range.
fn load_inputs<F>(path: &Path, select: F) -> Result<(Array2<f32>, Range<usize>), DataError>
where
    F: FnOnce(usize) -> Result<Range<usize>, DataError>,
{
    let (block, rows) = match ArrayD::<f32>::read_npy(File::open(path)?) {
        Ok(array) => {
            let (block, rows) = row_block(path, array.view(), select)?;
            (block.to_owned(), rows)
        }
        Err(_) => {
            let array = ArrayD::<u8>::read_npy(File::open(path)?).map_err(|e| format_err(path, e))?;
            let (block, rows) = row_block(path, array.view(), select)?;
            (block.mapv(|v| v as f32 / 255.0), rows)
        }
    };

    let features = block.len().checked_div(rows.len()).unwrap_or(0);
    let block = block
        .into_shape_with_order((rows.len(), features))
        .map_err(|e| format_err(path, e))?;

    Ok((block, rows))
}

fn row_block<'a, T, F>(
    path: &Path,
    array: ArrayViewD<'a, T>,
    select: F,
) -> Result<(ArrayViewD<'a, T>, Range<usize>), DataError>
where
    F: FnOnce(usize) -> Result<Range<usize>, DataError>,
{
    if array.ndim() == 0 {
        return Err(format_err(path, "expected at least one axis"));
    }

    let rows = select(array.len_of(Axis(0)))?;
    Ok((array.slice_axis_move(Axis(0), rows.clone().into()), rows))
}

fn load_labels(path: &Path) -> Result<Vec<usize>, DataError> {
    let labels: Vec<i64> = match ArrayD::<i64>::read_npy(File::open(path)?) {
        Ok(array) => array.iter().copied().collect(),
        Err(_) => ArrayD::<u8>::read_npy(File::open(path)?)
            .map_err(|e| format_err(path, e))?
            .iter()
            .map(|&v| v as i64)
            .collect(),
    };

    labels
        .into_iter()
        .map(|label| {
            usize::try_from(label).map_err(|_| {
                DataError::Format(format!("negative label {label} in {}", path.display()))
            })
        })
        .collect()
}

fn format_err(path: &Path, e: impl std::fmt::Display) -> DataError {
    DataError::Format(format!("{}: {e}", path.display()))
}
