use std::{num::NonZeroUsize, sync::Arc};

use client::Client;
use ml_core::{
    AdaptMethod, Batch, Dataset, InMemoryDataset, Model, NormLinear,
    data::synthetic::{self, SyntheticCorruption, SyntheticSpec},
};
use server::{Group, GroupKind, ReferenceSet, Server};

const SPEC: SyntheticSpec = SyntheticSpec {
    samples: 40,
    features: 3,
    classes: 2,
    spread: 0.2,
    seed: 5,
};

fn checkpoint() -> NormLinear {
    let clean = synthetic::generate(&SPEC, None).unwrap();
    let stats = synthetic::input_stats(&clean).unwrap();
    NormLinear::nearest_centroid(synthetic::centers(&SPEC).unwrap().view(), stats).unwrap()
}

fn corrupted(kind: SyntheticCorruption) -> InMemoryDataset {
    synthetic::generate(&SPEC, Some((kind, 3))).unwrap()
}

fn first_batch(dataset: &InMemoryDataset, n: usize) -> Batch {
    let indices: Vec<usize> = (0..n).collect();
    Batch::gather(dataset, &indices).unwrap()
}

#[test]
fn one_round_adapt_aggregate_and_reset() {
    let brightness = corrupted(SyntheticCorruption::Brightness);
    let contrast = corrupted(SyntheticCorruption::Contrast);
    let server = Server::new(vec![
        ReferenceSet {
            corruption: "brightness".to_string(),
            level: 3,
            dataset: Arc::new(brightness.clone()),
        },
        ReferenceSet {
            corruption: "contrast".to_string(),
            level: 3,
            dataset: Arc::new(contrast.clone()),
        },
    ]);

    let ckpt = checkpoint();
    let mut group = Group::new(GroupKind::Base, server).unwrap();
    for id in 0..3 {
        group
            .append(Client::new(id, AdaptMethod::Norm { momentum: 1.0 }))
            .unwrap();
    }
    group.initialize(&ckpt);

    let mut stats = Vec::new();
    let mut indicators = Vec::new();
    for (id, dataset) in [(0, &brightness), (1, &contrast)] {
        let batch = first_batch(dataset, 10);
        let client = group.client_mut(id).unwrap();
        let (_, indicator) = client.test_source(&batch).unwrap();
        let (client_stats, _) = client.adapt(batch).unwrap();
        stats.push(client_stats);
        indicators.push(indicator);
    }

    group.aggregate_bn(0, &stats, &indicators).unwrap();

    let shared = group.server().global_stats().unwrap().clone();
    for client in group.clients() {
        assert_eq!(client.norm_stats().unwrap(), shared);
    }
    // The non-participant received the broadcast but never saw a batch.
    assert!(group.client(2).unwrap().inference().is_err());
    assert!(group.client(0).unwrap().inference().is_ok());

    let scores = group
        .server()
        .reference_metrics(group.client(0).unwrap().model().unwrap(), NonZeroUsize::new(8).unwrap())
        .unwrap();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores[1].corruption, "contrast");

    group.initialize(&ckpt);
    for client in group.clients() {
        assert_eq!(client.model(), Some(&ckpt));
        assert!(client.last_batch().is_none());
    }
    assert_eq!(group.server().global_stats(), Some(&ckpt.norm_stats()));
    assert_eq!(brightness.len(), 40);
}
