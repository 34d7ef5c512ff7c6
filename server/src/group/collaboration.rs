use std::{fs::File, io::BufWriter, path::Path};

use ndarray::{Array2, ArrayView2};
use serde_pickle::SerOptions;

use crate::group::Result;

/// Accumulated interaction weights between every pair of clients.
///
/// Entry `(i, j)` is the total weight client `i` gave to client `j`'s
/// statistics across every adaptive aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationGraph {
    weights: Array2<f64>,
}

impl CollaborationGraph {
    /// Creates an all-zero graph for `clients` clients.
    pub fn new(clients: usize) -> Self {
        Self {
            weights: Array2::zeros((clients, clients)),
        }
    }

    #[inline]
    pub fn clients(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    pub(crate) fn grow(&mut self, clients: usize) {
        let n = self.clients();
        if clients <= n {
            return;
        }

        let mut weights = Array2::zeros((clients, clients));
        weights.slice_mut(ndarray::s![..n, ..n]).assign(&self.weights);
        self.weights = weights;
    }

    pub(crate) fn add(&mut self, from: usize, to: usize, weight: f64) {
        self.weights[[from, to]] += weight;
    }

    /// Returns the graph as nested rows.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.weights.rows().into_iter().map(|row| row.to_vec()).collect()
    }

    /// Writes the graph to `path` as a pickled list of lists.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_pickle::to_writer(&mut writer, &self.to_rows(), SerOptions::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use serde_pickle::DeOptions;

    use super::*;

    #[test]
    fn grow_keeps_existing_weights() {
        let mut graph = CollaborationGraph::new(1);
        graph.add(0, 0, 0.5);
        graph.grow(2);
        graph.add(1, 0, 0.25);

        assert_eq!(graph.to_rows(), vec![vec![0.5, 0.0], vec![0.25, 0.0]]);
    }

    #[test]
    fn save_writes_a_readable_pickle() {
        let mut graph = CollaborationGraph::new(2);
        graph.add(0, 1, 1.5);
        let path = env::temp_dir().join(format!("fedtta-{}-graph.pkl", process::id()));

        graph.save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let rows: Vec<Vec<f64>> = serde_pickle::from_slice(&bytes, DeOptions::new()).unwrap();
        assert_eq!(rows, graph.to_rows());

        let _ = fs::remove_file(path);
    }
}
