//! Unit tests for execution and instance compositions.

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::rstest;
use serde_json::json;
use tokio::io::AsyncReadExt;

use super::*;
use crate::containers::ContainersError;
use crate::test_support::{ContainerCall, FakeContainers};
use crate::volumes::Volume;

fn range(start: u32, end: u32) -> IndexRange {
    IndexRange::new(start, end).expect("valid range")
}

fn sample_indices() -> ExecutionComposition {
    let mut composition = ExecutionComposition::indices("parent", range(0, 4));
    let indices = composition.as_indices_mut().expect("indices node");
    indices
        .set_composition(0, ExecutionComposition::atomic("a"))
        .expect("index 0");
    indices
        .set_composition(2, ExecutionComposition::atomic("c"))
        .expect("index 2");
    indices
        .set_composition(3, ExecutionComposition::atomic("x"))
        .expect("index 3");
    indices.tombstone("x").expect("tombstone x");
    composition
}

#[rstest]
#[case(0, 0, true)]
#[case(2, 5, true)]
#[case(5, 2, false)]
fn index_range_validation(#[case] start: u32, #[case] end: u32, #[case] valid: bool) {
    assert_eq!(IndexRange::new(start, end).is_ok(), valid);
}

#[test]
fn index_range_renders_half_open() {
    assert_eq!(range(5, 7).to_string(), "[5, 7)");
    assert_eq!(range(5, 7).len(), 2);
    assert!(range(5, 7).contains(6));
    assert!(!range(5, 7).contains(7));
}

#[test]
fn indices_composition_serialises_nested_record() {
    let value = sample_indices().to_json().expect("serialise");

    assert_eq!(
        value,
        json!({
            "execution_id": "parent",
            "indices_to_compositions": {
                "0": {"execution_id": "a"},
                "1": null,
                "2": {"execution_id": "c"},
                "3": null,
            },
            "tombstone_executions": ["x"],
        })
    );
}

#[test]
fn atomic_composition_serialises_to_id_only() {
    let value = ExecutionComposition::atomic("solo")
        .to_json()
        .expect("serialise");
    assert_eq!(value, json!({"execution_id": "solo"}));
}

#[test]
fn composition_round_trips_through_json() {
    let composition = sample_indices();
    let text = serde_json::to_string(&composition).expect("serialise");
    let parsed: ExecutionComposition = serde_json::from_str(&text).expect("deserialise");
    assert_eq!(parsed, composition);
}

#[test]
fn deserialising_sparse_indices_fails() {
    let text = r#"{"execution_id":"p","indices_to_compositions":{"0":null,"2":null}}"#;
    let err = serde_json::from_str::<ExecutionComposition>(text).expect_err("sparse keys");
    assert!(err.to_string().contains("contiguous"), "unexpected error: {err}");
}

#[test]
fn deserialising_live_tombstone_fails() {
    let text = r#"{
        "execution_id": "p",
        "indices_to_compositions": {"0": {"execution_id": "x"}},
        "tombstone_executions": ["x"]
    }"#;
    let err = serde_json::from_str::<ExecutionComposition>(text).expect_err("live tombstone");
    assert!(err.to_string().contains("tombstoned"), "unexpected error: {err}");
}

#[rstest]
#[case(range(5, 5))]
#[case(range(0, 0))]
fn empty_fan_out_keeps_its_range(#[case] declared: IndexRange) {
    let composition = ExecutionComposition::indices("p", declared);

    let value = composition.to_json().expect("serialise");
    let back: ExecutionComposition = serde_json::from_value(value).expect("deserialise");

    assert_eq!(back, composition);
    assert_eq!(
        back.as_indices().map(IndicesComposition::range),
        Some(declared)
    );
}

#[test]
fn populated_fan_out_omits_range_field() {
    let value = sample_indices().to_json().expect("serialise");
    assert!(value.get("range").is_none());
}

#[test]
fn declared_range_must_be_empty_without_keys() {
    let text = r#"{
        "execution_id": "p",
        "indices_to_compositions": {},
        "tombstone_executions": [],
        "range": [2, 4]
    }"#;
    let err = serde_json::from_str::<ExecutionComposition>(text).expect_err("keys missing");
    assert!(err.to_string().contains("contiguous"), "unexpected error: {err}");
}

#[test]
fn sealed_tree_equals_its_record_round_trip() {
    let mut composition = sample_indices();
    composition.as_indices_mut().expect("indices node").seal();

    let text = serde_json::to_string(&composition).expect("serialise");
    let back: ExecutionComposition = serde_json::from_str(&text).expect("deserialise");

    assert_eq!(back, composition);
    assert!(!back.as_indices().expect("indices node").is_sealed());
}

#[test]
fn tombstone_clears_every_index_of_the_execution() {
    let mut composition = ExecutionComposition::indices("parent", range(0, 3));
    let indices = composition.as_indices_mut().expect("indices node");
    for index in 0..3 {
        indices
            .set_composition(index, ExecutionComposition::atomic("worker-1"))
            .expect("set");
    }

    let cleared = indices.tombstone("worker-1").expect("tombstone");

    assert_eq!(cleared, vec![0, 1, 2]);
    assert_eq!(indices.pending_indices(), vec![0, 1, 2]);
    assert_eq!(
        indices.set_composition(1, ExecutionComposition::atomic("worker-1")),
        Err(CompositionError::Tombstoned {
            execution_id: String::from("worker-1"),
        })
    );
}

#[test]
fn set_composition_rejects_out_of_range_index() {
    let mut indices = IndicesComposition::new("parent", range(2, 4));
    assert_eq!(
        indices.set_composition(4, ExecutionComposition::atomic("w")),
        Err(CompositionError::IndexOutOfRange {
            index: 4,
            range: range(2, 4),
        })
    );
}

#[test]
fn sealed_composition_refuses_mutation() {
    let mut indices = IndicesComposition::new("parent", range(0, 1));
    indices
        .set_composition(0, ExecutionComposition::atomic("w"))
        .expect("set");
    assert!(indices.is_complete());
    indices.seal();

    let sealed: Result<(), CompositionError> = Err(CompositionError::Sealed {
        execution_id: String::from("parent"),
    });
    assert_eq!(
        indices.set_composition(0, ExecutionComposition::atomic("v")),
        sealed.clone().map(|()| None)
    );
    assert_eq!(indices.tombstone("w"), sealed.map(|()| Vec::new()));
}

#[test]
fn atomic_execution_ids_are_listed_once_in_index_order() {
    let mut child = ExecutionComposition::indices("child", range(0, 2));
    let child_indices = child.as_indices_mut().expect("indices node");
    child_indices
        .set_composition(0, ExecutionComposition::atomic("b"))
        .expect("set");
    child_indices
        .set_composition(1, ExecutionComposition::atomic("a"))
        .expect("set");

    let mut root = ExecutionComposition::indices("root", range(0, 3));
    let root_indices = root.as_indices_mut().expect("indices node");
    root_indices
        .set_composition(0, ExecutionComposition::atomic("a"))
        .expect("set");
    root_indices.set_composition(1, child).expect("set");

    assert_eq!(root.atomic_execution_ids(), vec!["a", "b"]);
}

#[test]
fn indices_startup_config_declares_volumes_per_index() {
    let config = InstanceComposition::create_for(Some(range(0, 2))).get_startup_config();

    assert_eq!(
        config.volumes(),
        [
            Volume::empty_directory("output/0"),
            Volume::empty_directory("measures/0"),
            Volume::empty_directory("output/1"),
            Volume::empty_directory("measures/1"),
        ]
    );
    assert_eq!(
        config.get(INDICES_KEY),
        Some(&ConfigValue::Indices { range: range(0, 2) })
    );
    let value = serde_json::to_value(&config).expect("serialise");
    assert_eq!(value["config_keys"]["indices"], json!({"range": [0, 2]}));
    assert_eq!(
        value["config_keys"]["index_to_summary_measures_path"],
        json!({"0": "/plz/measures/0/summary", "1": "/plz/measures/1/summary"})
    );
}

#[test]
fn atomic_startup_config_has_no_index_tables() {
    let config = InstanceComposition::create_for(None).get_startup_config();
    assert!(config.get(INDICES_KEY).is_none());
    assert!(config.get(INDEX_TO_OUTPUT_DIRECTORY_KEY).is_none());
    assert_eq!(
        config.get(OUTPUT_DIRECTORY_KEY),
        Some(&ConfigValue::Path("/plz/output".into()))
    );
}

#[test]
fn compose_measures_atomic_calls_accessor_with_none() {
    let composed = InstanceComposition::Atomic.compose_measures(|index| index.is_none());
    assert_eq!(composed, ComposedMeasures::Atomic(true));
}

#[test]
fn compose_measures_indices_maps_every_index() {
    let composed =
        InstanceComposition::create_for(Some(range(5, 7))).compose_measures(|index| index.map(|i| i * 10));
    assert_eq!(
        composed,
        ComposedMeasures::Indices(BTreeMap::from([(5, Some(50)), (6, Some(60))]))
    );
}

#[test]
fn try_compose_measures_stops_at_first_error() {
    let mut calls = Vec::new();
    let composed: Result<ComposedMeasures<u32>, String> =
        InstanceComposition::Indices(range(0, 4)).try_compose_measures(|index| {
            calls.push(index);
            match index {
                Some(1) => Err(String::from("bad summary")),
                other => Ok(other.unwrap_or_default()),
            }
        });
    assert_eq!(composed, Err(String::from("bad summary")));
    assert_eq!(calls, vec![Some(0), Some(1)]);
}

#[tokio::test]
async fn output_tarballs_are_labelled_per_index() {
    let containers = Arc::new(FakeContainers::new());
    let strategy = InstanceComposition::Indices(range(3, 5));

    let tarballs = strategy
        .get_output_dirs_and_tarballs("exec", containers.as_ref(), Some("/models"))
        .await
        .expect("fetch succeeds");

    let mut labelled = Vec::new();
    for (label, mut stream) in tarballs {
        let mut body = String::new();
        stream.read_to_string(&mut body).await.expect("read stream");
        labelled.push((label, body));
    }
    assert_eq!(
        labelled,
        vec![
            (Some(String::from("3")), String::from("/plz/output/3/models")),
            (Some(String::from("4")), String::from("/plz/output/4/models")),
        ]
    );
}

#[tokio::test]
async fn atomic_measures_tarball_has_no_label() {
    let containers = Arc::new(FakeContainers::new());

    let tarballs = InstanceComposition::Atomic
        .get_measures_dirs_and_tarballs("exec", containers.as_ref())
        .await
        .expect("fetch succeeds");

    assert_eq!(tarballs.len(), 1);
    assert!(tarballs.iter().all(|(label, _)| label.is_none()));
    assert_eq!(
        containers.calls(),
        vec![ContainerCall::GetFiles {
            execution_id: String::from("exec"),
            path: String::from("/plz/measures"),
        }]
    );
}

#[tokio::test]
async fn missing_index_directory_surfaces_runtime_error() {
    let containers = Arc::new(FakeContainers::new().with_missing_path("/plz/measures/1"));

    let result = InstanceComposition::Indices(range(0, 2))
        .get_measures_dirs_and_tarballs("exec", containers.as_ref())
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::Containers(ContainersError::MissingPath { ref path, .. }))
            if path == "/plz/measures/1"
    ));
}

#[tokio::test]
async fn escaping_output_path_is_rejected_before_fetching() {
    let containers = Arc::new(FakeContainers::new());

    let result = InstanceComposition::Atomic
        .get_output_dirs_and_tarballs("exec", containers.as_ref(), Some("../secrets"))
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::InvalidOutputPath { .. })
    ));
    assert!(containers.calls().is_empty());
}
