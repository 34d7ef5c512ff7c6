use std::{env, fs, path::PathBuf, process};

use ml_core::Model;
use ndarray::{Array2, array};
use ndarray_npy::write_npy;
use orchestrator::{
    ExperimentConfig, Outcome, Pipeline, PipelineError, RawConfig, Role, RoundEvent,
    RoundObserver, compile_config,
    pipeline::COLLABORATION_FILE,
    providers::{SyntheticProvider, synthetic_checkpoint},
    report::OUTCOME_FILE,
    run_with,
};
use serde_json::{Value, json};
use server::{CheckpointLayout, initialization::save_checkpoint};

#[derive(Default)]
struct Recorder {
    events: Vec<RoundEvent>,
}

impl RoundObserver for Recorder {
    fn on_event(&mut self, event: &RoundEvent) {
        self.events.push(event.clone());
    }
}

fn scratch(name: &str) -> PathBuf {
    env::temp_dir().join(format!("fedtta-{}-sweep-{name}", process::id()))
}

/// Two clients sharing ten synthetic samples per corruption and level.
fn config(name: &str, overrides: Value) -> ExperimentConfig {
    let mut json = json!({
        "data": {
            "dataset": "synthetic",
            "source": { "synthetic": { "samples": 10, "spread": 0.3, "seed": 7 } },
            "corruption": ["brightness"],
            "level": [12],
            "class_number": 2,
            "features": 4
        },
        "client": { "client_num": 2, "sample_rate": 1.0 },
        "other": {
            "ttt_batch": 5,
            "model_path": scratch(name).join("model.safetensors"),
            "logging_path": scratch(name)
        },
        "seed": 5
    });

    merge(&mut json, overrides);
    let raw: RawConfig = serde_json::from_value(json).unwrap();
    compile_config(raw, None).unwrap()
}

fn merge(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, value) => *base = value,
    }
}

fn sweep(config: ExperimentConfig) -> (Outcome, Vec<RoundEvent>) {
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();
    let mut recorder = Recorder::default();
    let outcome = run_with(config, &SyntheticProvider, checkpoint, &mut recorder).unwrap();
    (outcome, recorder.events)
}

#[test]
fn two_clients_ten_samples_run_a_single_round() {
    let config = config("single", json!({}));
    let logging_path = config.logging_path.clone();
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();

    let pipeline = Pipeline::setup(config.clone(), &SyntheticProvider, checkpoint).unwrap();
    assert_eq!(pipeline.budget().all_loop(), 1);
    assert_eq!(pipeline.budget().global_eps(), &[1]);

    let (outcome, events) = sweep(config);

    assert_eq!(outcome.aggregations, 1);
    assert_eq!(outcome.table.shape(), (3, 2));
    for role in Role::ALL {
        assert!(outcome.table.get(role, 0).is_some(), "{role:?} is missing");
    }

    let aggregates = events
        .iter()
        .filter(|e| matches!(e, RoundEvent::Aggregate { .. }))
        .count();
    assert_eq!(aggregates, 1);

    assert!(logging_path.join(OUTCOME_FILE).is_file());
    assert!(!logging_path.join(COLLABORATION_FILE).exists());
}

#[test]
fn events_follow_adapt_then_aggregate_then_fed() {
    let (_, events) = sweep(config(
        "order",
        json!({ "other": { "is_continue": false, "online": false } }),
    ));

    assert!(matches!(events[0], RoundEvent::GroupReset { step: None, .. }));
    assert!(matches!(events[1], RoundEvent::GroupReset { step: Some(0), .. }));

    let phase = |e: &RoundEvent| match e {
        RoundEvent::GroupReset { .. } => 0,
        RoundEvent::TestSource { .. } | RoundEvent::Adapt { .. } => 1,
        RoundEvent::Aggregate { .. } => 2,
        RoundEvent::Fed { .. } => 3,
    };
    let phases: Vec<_> = events.iter().map(phase).collect();

    assert_eq!(phases, vec![0, 0, 1, 1, 1, 1, 2, 3, 3]);

    for pair in events[2..6].chunks(2) {
        match pair {
            [
                RoundEvent::TestSource { client_id: a, .. },
                RoundEvent::Adapt { client_id: b, .. },
            ] => assert_eq!(a, b),
            other => panic!("unexpected events {other:?}"),
        }
    }
}

#[test]
fn discontinuous_runs_restart_every_slot_from_the_checkpoint() {
    // Both slots see identical batches, so a reset client scores the same
    // before adapting in each of them.
    let overrides = |is_continue: bool| {
        json!({
            "data": { "corruption": ["brightness", "brightness"] },
            "other": { "is_continue": is_continue, "is_average": false }
        })
    };

    let (reset, events) = sweep(config("reset", overrides(false)));
    let resets = events
        .iter()
        .filter(|e| matches!(e, RoundEvent::GroupReset { .. }))
        .count();
    assert_eq!(resets, 2);

    let first = reset.table.get(Role::Before, 0).unwrap();
    let second = reset.table.get(Role::Before, 1).unwrap();
    assert!((first - second).abs() < 1e-12);

    // Without resets the second slot starts from the model the first one
    // left behind, which is exactly what the Fed pass measured.
    let (kept, _) = sweep(config("continue", overrides(true)));
    let fed = kept.table.get(Role::Fed, 0).unwrap();
    let before = kept.table.get(Role::Before, 1).unwrap();
    assert!((fed - before).abs() < 1e-12);
}

#[test]
fn partial_participation_samples_one_client() {
    let (outcome, events) = sweep(config("partial", json!({ "client": { "sample_rate": 0.5 } })));

    let sources = events
        .iter()
        .filter(|e| matches!(e, RoundEvent::TestSource { .. }))
        .count();
    assert_eq!(sources, 1);
    assert_eq!(outcome.aggregations, 1);
}

#[test]
fn adaptive_group_exports_its_collaboration_graph() {
    let config = config(
        "adaptive",
        json!({ "group": { "name": "adapt_group", "temperature": 0.1 } }),
    );
    let logging_path = config.logging_path.clone();

    let (outcome, _) = sweep(config);

    let graph = outcome.graph.unwrap();
    assert_eq!(graph.clients(), 2);
    assert!(logging_path.join(COLLABORATION_FILE).is_file());
}

#[test]
fn a_partition_smaller_than_one_batch_is_rejected() {
    let config = config("tiny", json!({ "other": { "ttt_batch": 6 } }));
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();

    let res = Pipeline::setup(config, &SyntheticProvider, checkpoint);
    assert!(matches!(res, Err(PipelineError::InvalidConfig(_))));
}

fn continual(name: &str, map: Array2<i64>, samples: usize) -> (ExperimentConfig, PathBuf) {
    let path = scratch(name).with_extension("npy");
    write_npy(&path, &map).unwrap();

    let config = config(
        name,
        json!({
            "data": {
                "source": { "synthetic": { "samples": samples } },
                "corruption": ["brightness", "contrast"],
                "partition_path": path
            },
            "other": { "niid": true }
        }),
    );
    (config, path)
}

#[test]
fn continual_map_routes_each_client_to_its_corruption() {
    let (config, path) = continual("routing", array![[1_i64, 0], [0, 1]], 10);

    let (outcome, events) = sweep(config);

    let mut routed: Vec<_> = events
        .iter()
        .filter_map(|e| match *e {
            RoundEvent::TestSource {
                client_id,
                cidx,
                corruption,
                ..
            } => Some((client_id, cidx, corruption)),
            _ => None,
        })
        .collect();
    routed.sort_unstable();

    assert_eq!(routed, vec![(0, 0, 1), (0, 1, 0), (1, 0, 0), (1, 1, 1)]);
    assert_eq!(outcome.aggregations, 2);
    let _ = fs::remove_file(path);
}

#[test]
fn repeated_continual_corruptions_share_the_partition() {
    // Client 0 reads its brightness partition in both slots, so each slot
    // gets half of it.
    let (config, path) = continual("repeated", array![[0_i64, 0], [1, 0]], 20);
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();

    let pipeline = Pipeline::setup(config.clone(), &SyntheticProvider, checkpoint).unwrap();
    assert_eq!(pipeline.budget().all_loop(), 1);

    let (outcome, events) = sweep(config);

    let sources = events
        .iter()
        .filter(|e| matches!(e, RoundEvent::TestSource { .. }))
        .count();
    assert_eq!(sources, 4);
    assert_eq!(outcome.aggregations, 2);
    let _ = fs::remove_file(path);
}

#[test]
fn repeated_continual_corruptions_smaller_than_a_batch_are_rejected() {
    let (config, path) = continual("repeated-tiny", array![[0_i64, 0], [1, 0]], 10);
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();

    let res = Pipeline::setup(config, &SyntheticProvider, checkpoint);
    assert!(matches!(res, Err(PipelineError::InvalidConfig(_))));
    let _ = fs::remove_file(path);
}

#[test]
fn fine_tune_method_adapts_again_after_aggregation() {
    let (outcome, events) = sweep(config(
        "fine-tune",
        json!({
            "adapt": { "name": "tent" },
            "learn": { "lr": 0.05 },
            "other": { "method": "tent_ft" }
        }),
    ));

    let fed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RoundEvent::Fed { acc, .. } => Some(*acc),
            _ => None,
        })
        .collect();

    assert_eq!(fed.len(), 2);
    assert!(fed.iter().all(Option::is_some));
    assert!(outcome.table.get(Role::Fed, 0).is_some());
}

#[test]
fn run_loads_the_checkpoint_from_disk() {
    let config = config("disk", json!({}));
    let checkpoint = synthetic_checkpoint(&config.data).unwrap();
    fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
    save_checkpoint(&config.model_path, &checkpoint.state_dict(), CheckpointLayout::Flat).unwrap();

    let outcome = orchestrator::run(config).unwrap();

    assert_eq!(outcome.aggregations, 1);
    assert_eq!(outcome.table.shape(), (3, 2));
}

#[test]
fn shipped_configs_parse() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs");

    for name in ["synthetic.json", "cifar10_c.json"] {
        let text = fs::read_to_string(root.join(name)).unwrap();
        let raw: RawConfig = serde_json::from_str(&text).unwrap();
        assert!(!raw.data.corruption.is_empty(), "{name}");
    }
}
