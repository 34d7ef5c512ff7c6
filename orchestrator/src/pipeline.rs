//! The adapt / aggregate sweep over levels, macro-loops and corruption slots.

use std::path::PathBuf;

use client::{Client, Partition, Split, data::partition};
use log::{debug, info};
use ml_core::{Metrics, Model, VariableMonitor, stats::TEST_ACC};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use server::{CollaborationGraph, Group, ReferenceSet, Server};

use crate::{
    PipelineError,
    budget::RoundBudget,
    configs::{ExperimentConfig, FedPass},
    corruption::CorruptionMap,
    providers::{CorruptionKey, DatasetProvider},
    report::{OUTCOME_FILE, Role, ScoreTable},
};

/// File name of the pickled collaboration graph.
pub const COLLABORATION_FILE: &str = "collaboration.pkl";

/// Something that happened during the sweep, reported in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    /// Every client was reset to the checkpoint. `step` is `None` for a
    /// reset at the start of a corruption slot.
    GroupReset {
        level: u8,
        lp: usize,
        cidx: usize,
        step: Option<usize>,
    },
    /// A participant evaluated its fresh batch before adapting.
    TestSource {
        client_id: usize,
        cidx: usize,
        corruption: usize,
        acc: Option<f64>,
    },
    /// A participant adapted on its batch.
    Adapt {
        client_id: usize,
        cidx: usize,
        acc: Option<f64>,
    },
    /// The participants' statistics were merged.
    Aggregate { round: usize, participants: usize },
    /// A participant was scored after aggregation.
    Fed {
        client_id: usize,
        cidx: usize,
        acc: Option<f64>,
    },
}

/// Receives the sweep's events.
pub trait RoundObserver {
    fn on_event(&mut self, _event: &RoundEvent) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RoundObserver for NoopObserver {}

/// The result of a finished sweep.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub table: ScoreTable,
    /// The amount of aggregations that merged anything.
    pub aggregations: usize,
    /// The accumulated collaboration weights of an adaptive group.
    pub graph: Option<CollaborationGraph>,
}

/// A fully set up experiment, ready to sweep.
pub struct Pipeline<M: Model> {
    config: ExperimentConfig,
    checkpoint: M,
    group: Group<M>,
    /// Indexed by `[client][corruption][level]`.
    partitions: Vec<Vec<Vec<Partition>>>,
    map: CorruptionMap,
    budget: RoundBudget,
    rng: StdRng,
    /// Indexed by `[role][corruption slot]`.
    monitors: [Vec<VariableMonitor>; 3],
    round: usize,
}

impl<M: Model> Pipeline<M> {
    /// Loads the data, builds the group and checks the round budget.
    ///
    /// # Arguments
    /// * `config` - The compiled experiment configuration.
    /// * `provider` - Where the corrupted test sets come from.
    /// * `checkpoint` - The pre-trained model every client starts from.
    ///
    /// # Errors
    /// Returns `PipelineError::InvalidConfig` if the checkpoint doesn't fit
    /// the data, a partition is too small for a single batch, or a continual
    /// assignment would consume more than a partition holds. Data, partition
    /// and assignment errors are forwarded.
    pub fn setup(
        config: ExperimentConfig,
        provider: &dyn DatasetProvider,
        checkpoint: M,
    ) -> Result<Self, PipelineError> {
        let data = &config.data;

        if checkpoint.num_features() != data.features || checkpoint.num_classes() != data.class_number
        {
            return Err(PipelineError::InvalidConfig(format!(
                "checkpoint maps {} features to {} classes, data has {} and {}",
                checkpoint.num_features(),
                checkpoint.num_classes(),
                data.features,
                data.class_number
            )));
        }

        let clients = config.client_num();
        let corruptions = data.corruption.len();
        let levels = data.level.len();

        let mut references = Vec::with_capacity(corruptions * levels);
        let mut partitions: Vec<Vec<Vec<Partition>>> = (0..clients)
            .map(|_| (0..corruptions).map(|_| Vec::with_capacity(levels)).collect())
            .collect();

        for (k, corruption) in data.corruption.iter().enumerate() {
            for &level in &data.level {
                let key = CorruptionKey {
                    corruption: corruption.as_str(),
                    level,
                };
                let dataset = provider.get_dataset(data, Split::Test, Some(key))?;
                let shards =
                    partition(dataset.clone(), &config.partition, config.seed, Split::Test)?;

                references.push(ReferenceSet {
                    corruption: corruption.clone(),
                    level,
                    dataset,
                });

                for (c, shard) in shards.into_iter().enumerate() {
                    partitions[c][k].push(shard);
                }
            }
        }

        let map = match (&data.partition_path, config.run.niid) {
            (Some(path), true) => CorruptionMap::load(path, clients, corruptions)?,
            _ => CorruptionMap::identity(clients, corruptions),
        };

        let min_len = min_share(&partitions, &map);
        let budget = RoundBudget::new(min_len, config.run.ttt_batch, config.run.loops);
        if budget.all_loop() == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "the smallest partition share holds {min_len} samples, fewer than one batch of {}",
                config.run.ttt_batch
            )));
        }

        let mut group = Group::new(config.group, Server::new(references))?;
        for client_id in 0..clients {
            group.append(Client::new(client_id, config.adapt))?;
        }
        group.initialize(&checkpoint);

        info!(
            all_loop = budget.all_loop();
            "set up {clients} clients over {corruptions} corruptions and {levels} levels, steps per loop {:?}",
            budget.global_eps()
        );

        let rng = StdRng::seed_from_u64(config.seed);
        let monitors: [Vec<VariableMonitor>; 3] =
            [(); 3].map(|_| (0..corruptions).map(|_| VariableMonitor::new()).collect());

        Ok(Self {
            config,
            checkpoint,
            group,
            partitions,
            map,
            budget,
            rng,
            monitors,
            round: 0,
        })
    }

    #[inline]
    pub fn budget(&self) -> &RoundBudget {
        &self.budget
    }

    #[inline]
    pub fn group(&self) -> &Group<M> {
        &self.group
    }

    #[inline]
    pub fn corruption_map(&self) -> &CorruptionMap {
        &self.map
    }

    /// Evaluates the un-adapted checkpoint on every reference set.
    ///
    /// # Returns
    /// The mean accuracy over the reference sets, `None` if none was measured.
    pub fn evaluate_source(&self) -> Result<Option<f64>, PipelineError> {
        let scores = self
            .group
            .server()
            .reference_metrics(&self.checkpoint, self.config.eval_batch_size)?;

        let accs: Vec<f64> = scores
            .iter()
            .filter_map(|score| score.metrics.get(TEST_ACC).copied())
            .collect();

        for score in &scores {
            debug!(level = score.level; "source {}: {:?}", score.corruption, score.metrics);
        }

        if accs.is_empty() {
            return Ok(None);
        }

        let mean = accs.iter().sum::<f64>() / accs.len() as f64;
        info!("source accuracy {mean:.4} over {} reference sets", accs.len());
        Ok(Some(mean))
    }

    /// Runs the whole sweep and exports the scoreboard.
    ///
    /// # Errors
    /// Any error stops the sweep; nothing is exported in that case.
    pub fn run(mut self, observer: &mut dyn RoundObserver) -> Result<Outcome, PipelineError> {
        if self.config.evaluate_source {
            self.evaluate_source()?;
        }

        let levels = self.config.data.level.clone();
        let corruptions = self.map.corruptions();

        for (li, &level) in levels.iter().enumerate() {
            for lp in 0..self.config.run.loops.get() {
                for cidx in 0..corruptions {
                    self.slot(li, level, lp, cidx, observer)?;
                }
            }
        }

        self.finish()
    }

    /// Runs the inner steps of one corruption slot.
    fn slot(
        &mut self,
        li: usize,
        level: u8,
        lp: usize,
        cidx: usize,
        observer: &mut dyn RoundObserver,
    ) -> Result<(), PipelineError> {
        let participants = self.sample_participants();

        info!(
            level = level, lp = lp, cidx = cidx;
            "{} with clients {participants:?}",
            self.config.data.corruption[cidx]
        );

        if !self.config.run.is_continue {
            self.reset(observer, level, lp, cidx, None);
        }

        for step in 0..self.budget.steps(lp) {
            if !self.config.run.online {
                self.reset(observer, level, lp, cidx, Some(step));
            }

            self.step(li, cidx, &participants, observer)?;
        }

        Ok(())
    }

    fn step(
        &mut self,
        li: usize,
        cidx: usize,
        participants: &[usize],
        observer: &mut dyn RoundObserver,
    ) -> Result<(), PipelineError> {
        let ttt_batch = self.config.run.ttt_batch.get();
        let mut stats = Vec::with_capacity(participants.len());
        let mut indicators = Vec::with_capacity(participants.len());

        for &client_id in participants {
            let corruption = self.map.get(client_id, cidx);
            let batch = self.partitions[client_id][corruption][li].take_batch(ttt_batch)?;
            let weight = batch.len() as f64;

            let client = self.group.client_mut(client_id)?;
            let (before, indicator) = client.test_source(&batch)?;
            observer.on_event(&RoundEvent::TestSource {
                client_id,
                cidx,
                corruption,
                acc: accuracy(&before),
            });

            let (client_stats, adapted) = client.adapt(batch)?;
            observer.on_event(&RoundEvent::Adapt {
                client_id,
                cidx,
                acc: accuracy(&adapted),
            });

            self.monitors[Role::Before as usize][cidx].append(before, weight);
            self.monitors[Role::Adapt as usize][cidx].append(adapted, weight);
            stats.push(client_stats);
            indicators.push(indicator);
        }

        if self.config.run.is_average {
            self.group.aggregate_bn(self.round, &stats, &indicators)?;
            observer.on_event(&RoundEvent::Aggregate {
                round: self.round,
                participants: stats.len(),
            });
        }
        self.round += 1;

        for client_stats in &stats {
            let client_id = client_stats.client_id;
            let client = self.group.client_mut(client_id)?;

            let metrics = match self.config.fed_pass {
                FedPass::FineTune => client.fine_tune()?,
                FedPass::InferenceOnly => client.inference()?,
            };

            observer.on_event(&RoundEvent::Fed {
                client_id,
                cidx,
                acc: accuracy(&metrics),
            });
            self.monitors[Role::Fed as usize][cidx].append(metrics, client_stats.samples as f64);
        }

        Ok(())
    }

    /// Picks `max(1, floor(n * rate))` distinct clients, in sample order.
    fn sample_participants(&mut self) -> Vec<usize> {
        let clients = self.config.client_num();
        let amount = ((clients as f64 * self.config.sample_rate).floor() as usize).clamp(1, clients);

        index::sample(&mut self.rng, clients, amount).into_vec()
    }

    fn reset(
        &mut self,
        observer: &mut dyn RoundObserver,
        level: u8,
        lp: usize,
        cidx: usize,
        step: Option<usize>,
    ) {
        self.group.initialize(&self.checkpoint);
        observer.on_event(&RoundEvent::GroupReset {
            level,
            lp,
            cidx,
            step,
        });
    }

    fn table(&self) -> ScoreTable {
        let rows: [Vec<Option<f64>>; 3] = Role::ALL.map(|role| {
            self.monitors[role as usize]
                .iter()
                .map(|monitor| monitor.variable_mean().get(TEST_ACC).copied())
                .collect()
        });

        ScoreTable::new(self.config.data.corruption.clone(), rows)
    }

    fn finish(self) -> Result<Outcome, PipelineError> {
        let table = self.table();
        info!("outcome\n{table}");

        table.write_xlsx(&self.output(OUTCOME_FILE))?;

        let collaboration = self.output(COLLABORATION_FILE);
        if self.group.save_collaboration(&collaboration)? {
            info!("collaboration graph written to {}", collaboration.display());
        }

        Ok(Outcome {
            table,
            aggregations: self.group.aggregations(),
            graph: self.group.collaboration_graph().cloned(),
        })
    }

    fn output(&self, name: &str) -> PathBuf {
        self.config.logging_path.join(name)
    }
}

/// Returns the smallest amount of samples a client may draw from one of its
/// partitions per slot that maps to it.
///
/// A continual assignment that repeats a corruption reads the same partition
/// once per repetition, so its length is split among them. Partitions no slot
/// maps to are ignored.
fn min_share(partitions: &[Vec<Vec<Partition>>], map: &CorruptionMap) -> usize {
    partitions
        .iter()
        .enumerate()
        .flat_map(|(client, per_corruption)| {
            per_corruption
                .iter()
                .enumerate()
                .filter_map(move |(corruption, per_level)| {
                    let uses = map.uses(client, corruption);
                    (uses > 0).then(move || per_level.iter().map(move |shard| shard.len() / uses))
                })
                .flatten()
        })
        .min()
        .unwrap_or(0)
}

fn accuracy(metrics: &Metrics) -> Option<f64> {
    metrics.get(TEST_ACC).copied()
}
