use std::{num::NonZeroUsize, sync::Arc};

use log::debug;
use ml_core::Dataset;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::{Distribution, Gamma};

use super::{Partition, PartitionErr, balanced_ranges};

/// How a dataset's indices are spread among clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleMethod {
    /// Shuffled indices split into balanced contiguous shards.
    Iid,
    /// Per-class proportions drawn from a symmetric Dirichlet distribution.
    Dirichlet { alpha: f64 },
}

/// Which side of a dataset is being partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

/// The sampling strategies used to partition datasets among clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionSpec {
    pub client_num: NonZeroUsize,
    pub sample_method: SampleMethod,
    /// Falls back to `sample_method` when unset.
    pub test_sample_method: Option<SampleMethod>,
}

impl PartitionSpec {
    /// Returns the strategy that applies to `split`.
    pub fn method(&self, split: Split) -> SampleMethod {
        match split {
            Split::Train => self.sample_method,
            Split::Test => self.test_sample_method.unwrap_or(self.sample_method),
        }
    }
}

/// Splits `dataset` into one `Partition` per client.
///
/// Every index of the dataset ends up in exactly one partition. The result
/// only depends on the dataset's labels, `spec` and `seed`.
///
/// # Arguments
/// * `dataset` - The dataset to split, shared by every resulting partition.
/// * `spec` - The client count and sampling strategies.
/// * `seed` - The seed of the shuffles and proportion draws.
/// * `split` - Selects the strategy in `spec`.
///
/// # Errors
/// Returns `PartitionErr::InvalidSpec` for a non-positive Dirichlet `alpha`
/// and `PartitionErr::Data` if a label can't be read.
pub fn partition(
    dataset: Arc<dyn Dataset>,
    spec: &PartitionSpec,
    seed: u64,
    split: Split,
) -> Result<Vec<Partition>, PartitionErr> {
    let mut rng = StdRng::seed_from_u64(seed);
    let client_num = spec.client_num;
    let method = spec.method(split);

    let shards = match method {
        SampleMethod::Iid => iid(dataset.len(), client_num, &mut rng),
        SampleMethod::Dirichlet { alpha } => {
            dirichlet(dataset.as_ref(), client_num, alpha, &mut rng)?
        }
    };

    debug!(
        samples = dataset.len(),
        clients = client_num.get();
        "partitioned dataset with {method:?}"
    );

    Ok(shards
        .into_iter()
        .map(|indices| Partition::new(Arc::clone(&dataset), indices))
        .collect())
}

fn iid(total: usize, client_num: NonZeroUsize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..total).collect();
    indices.shuffle(rng);

    balanced_ranges(total, client_num)
        .map(|range| indices[range].to_vec())
        .collect()
}

fn dirichlet(
    dataset: &dyn Dataset,
    clients: NonZeroUsize,
    alpha: f64,
    rng: &mut StdRng,
) -> Result<Vec<Vec<usize>>, PartitionErr> {
    let gamma = Gamma::new(alpha, 1.0)
        .map_err(|_| PartitionErr::InvalidSpec(format!("dirichlet alpha {alpha} must be > 0")))?;

    let mut by_class: Vec<Vec<usize>> = Vec::new();
    for index in 0..dataset.len() {
        let class_id = dataset.class_id(index)?;
        if class_id >= by_class.len() {
            by_class.resize_with(class_id + 1, Vec::new);
        }
        by_class[class_id].push(index);
    }

    let client_num = clients.get();
    let mut shards = vec![Vec::new(); client_num];

    for mut members in by_class {
        members.shuffle(rng);

        let draws: Vec<f64> = (0..client_num).map(|_| gamma.sample(rng)).collect();
        let total: f64 = draws.iter().sum();
        let n = members.len();

        let mut start = 0;
        let mut acc = 0.0;
        for (client_id, draw) in draws.iter().enumerate() {
            let end = if client_id + 1 == client_num {
                n
            } else if total > 0.0 {
                acc += draw / total;
                ((acc * n as f64).floor() as usize).clamp(start, n)
            } else {
                balanced_ranges(n, clients)
                    .nth(client_id)
                    .map_or(n, |range| range.end)
            };

            shards[client_id].extend_from_slice(&members[start..end]);
            start = end;
        }
    }

    for shard in &mut shards {
        shard.shuffle(rng);
    }

    Ok(shards)
}
