mod collaboration;

use std::path::Path;

use client::{Client, ClientErr, ClientStats, FeatureIndicator};
use log::{debug, info};
use ml_core::{Model, NormStats};

pub use collaboration::CollaborationGraph;

pub use crate::error::Result;
use crate::{GroupErr, Server, aggregation};

/// How a group merges its clients' statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupKind {
    /// Every client receives the sample-weighted average of the participants.
    Base,
    /// Every participant receives a personalized average, weighted by the
    /// similarity of its feature indicator to the other participants'.
    Adaptive { temperature: f64 },
}

/// A server and its ordered clients.
///
/// The group owns the only shared mutable state of a run, the aggregated
/// normalization statistics, and writes it exclusively in `aggregate_bn`.
#[derive(Debug)]
pub struct Group<M: Model> {
    kind: GroupKind,
    server: Server,
    clients: Vec<Client<M>>,
    graph: Option<CollaborationGraph>,
    aggregations: usize,
}

impl<M: Model> Group<M> {
    /// Creates a new empty `Group`.
    ///
    /// # Errors
    /// Returns `GroupErr::InvalidTemperature` for an adaptive group with a
    /// non-positive or non-finite temperature.
    pub fn new(kind: GroupKind, server: Server) -> Result<Self> {
        let graph = match kind {
            GroupKind::Base => None,
            GroupKind::Adaptive { temperature } => {
                if !(temperature > 0.0 && temperature.is_finite()) {
                    return Err(GroupErr::InvalidTemperature(temperature));
                }
                Some(CollaborationGraph::new(0))
            }
        };

        Ok(Self {
            kind,
            server,
            clients: Vec::new(),
            graph,
            aggregations: 0,
        })
    }

    /// Adds a client to the group.
    ///
    /// # Errors
    /// Returns `GroupErr::UnknownClient` unless the client's id equals its
    /// position in the group.
    pub fn append(&mut self, client: Client<M>) -> Result<()> {
        if client.client_id() != self.clients.len() {
            return Err(GroupErr::UnknownClient {
                client_id: client.client_id(),
                clients: self.clients.len(),
            });
        }

        self.clients.push(client);
        if let Some(graph) = &mut self.graph {
            graph.grow(self.clients.len());
        }
        Ok(())
    }

    #[inline]
    pub fn server(&self) -> &Server {
        &self.server
    }

    #[inline]
    pub fn clients(&self) -> &[Client<M>] {
        &self.clients
    }

    pub fn client(&self, client_id: usize) -> Result<&Client<M>> {
        let clients = self.clients.len();
        self.clients
            .get(client_id)
            .ok_or(GroupErr::UnknownClient { client_id, clients })
    }

    pub fn client_mut(&mut self, client_id: usize) -> Result<&mut Client<M>> {
        let clients = self.clients.len();
        self.clients
            .get_mut(client_id)
            .ok_or(GroupErr::UnknownClient { client_id, clients })
    }

    /// Returns the amount of `aggregate_bn` calls that merged anything.
    #[inline]
    pub fn aggregations(&self) -> usize {
        self.aggregations
    }

    /// Broadcasts `checkpoint` to every client and resets the server's
    /// aggregated statistics to the checkpoint's.
    ///
    /// Clients lose any adaptation and their last batch. The collaboration
    /// graph is kept.
    pub fn initialize(&mut self, checkpoint: &M) {
        for client in &mut self.clients {
            client.init_weight(checkpoint);
        }

        self.server.set_global_stats(Some(checkpoint.norm_stats()));
        debug!("group initialized with {} clients", self.clients.len());
    }

    /// Merges the participants' normalization statistics and writes the
    /// result back into the clients.
    ///
    /// # Arguments
    /// * `round` - The inner step this aggregation belongs to.
    /// * `stats` - The participants' statistics after adaptation.
    /// * `indicators` - The participants' feature indicators, paired with `stats`.
    ///
    /// # Errors
    /// Returns `GroupErr` if the inputs don't pair up, reference unknown or
    /// duplicated clients, or a client isn't initialized. Nothing is written
    /// when an error is returned.
    pub fn aggregate_bn(
        &mut self,
        round: usize,
        stats: &[ClientStats],
        indicators: &[FeatureIndicator],
    ) -> Result<()> {
        self.validate(stats, indicators)?;

        if stats.is_empty() {
            return Ok(());
        }

        let Some(global) = aggregation::sample_weighted(stats)? else {
            return Ok(());
        };
        self.check_dim(&global)?;

        match self.kind {
            GroupKind::Base => {
                for client in &mut self.clients {
                    client.load_norm_stats(&global)?;
                }
            }
            GroupKind::Adaptive { temperature } => {
                let weights = aggregation::similarity_weights(indicators, temperature);

                let mut personalized = Vec::with_capacity(stats.len());
                for row in weights.rows() {
                    personalized.push(aggregation::weighted(stats, row)?);
                }

                for (i, (own, merged)) in stats.iter().zip(personalized).enumerate() {
                    if let Some(merged) = merged {
                        self.clients[own.client_id].load_norm_stats(&merged)?;
                    }

                    if let Some(graph) = &mut self.graph {
                        for (j, other) in stats.iter().enumerate() {
                            graph.add(own.client_id, other.client_id, weights[[i, j]]);
                        }
                    }
                }
            }
        }

        self.server.set_global_stats(Some(global));
        self.aggregations += 1;

        info!(round = round; "aggregated statistics of {} clients", stats.len());
        Ok(())
    }

    fn validate(&self, stats: &[ClientStats], indicators: &[FeatureIndicator]) -> Result<()> {
        if stats.len() != indicators.len() {
            return Err(GroupErr::LengthMismatch {
                stats: stats.len(),
                indicators: indicators.len(),
            });
        }

        let clients = self.clients.len();
        let mut seen = vec![false; clients];
        let dim = indicators.first().map(|f| f.mean.len());

        for (index, (s, f)) in stats.iter().zip(indicators).enumerate() {
            if s.client_id != f.client_id {
                return Err(GroupErr::IdMismatch {
                    index,
                    stats: s.client_id,
                    indicator: f.client_id,
                });
            }

            let Some(slot) = seen.get_mut(s.client_id) else {
                return Err(GroupErr::UnknownClient {
                    client_id: s.client_id,
                    clients,
                });
            };

            if *slot {
                return Err(GroupErr::DuplicateClient {
                    client_id: s.client_id,
                });
            }
            *slot = true;

            let expected = dim.unwrap_or(f.mean.len());
            if f.mean.len() != expected {
                return Err(GroupErr::Dimension {
                    got: f.mean.len(),
                    expected,
                });
            }
        }

        if stats.is_empty() {
            return Ok(());
        }

        match self.clients.iter().find(|c| !c.is_ready()) {
            Some(unready) => Err(ClientErr::Uninitialized {
                client_id: unready.client_id(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn check_dim(&self, stats: &NormStats) -> Result<()> {
        for client in &self.clients {
            let expected = client.norm_stats()?.dim();
            if stats.dim() != expected {
                return Err(GroupErr::Dimension {
                    got: stats.dim(),
                    expected,
                });
            }
        }

        Ok(())
    }

    /// Returns the collaboration graph of an adaptive group.
    pub fn collaboration_graph(&self) -> Option<&CollaborationGraph> {
        self.graph.as_ref()
    }

    /// Pickles the collaboration graph to `path`.
    ///
    /// # Returns
    /// `Ok(false)` without writing anything if the group isn't adaptive.
    pub fn save_collaboration(&self, path: &Path) -> Result<bool> {
        match &self.graph {
            Some(graph) => {
                graph.save(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
