//! Node integration tests: config loading and a full run on a paused clock.

use rondo_agent::AffinityRule;
use rondo_node::{ConfigError, Node, NodeConfig, NodeError};
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_config(
        r#"
agent_address: foobar
behaviour_name: greeter
rounds: [register, collect, settle]
round_duration_ms: 250
routing:
  kind: current_round
"#,
    );

    let config = NodeConfig::load_yaml(file.path()).unwrap();
    assert_eq!(config.agent_address, "foobar");
    assert_eq!(config.behaviour_name, "greeter");
    assert_eq!(config.rounds.len(), 3);
    assert_eq!(config.engine_config().round_duration, Duration::from_millis(250));
    assert_eq!(config.routing, AffinityRule::CurrentRound);
}

#[test]
fn test_load_yaml_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = NodeConfig::load_yaml(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_load_yaml_rejects_garbage() {
    let file = write_config("rounds: {not: a list}");
    assert!(matches!(
        NodeConfig::load_yaml(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_load_yaml_rejects_invalid_values() {
    let file = write_config("round_duration_ms: 0");
    assert!(matches!(
        NodeConfig::load_yaml(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_node_routes_and_commits() {
    let config = NodeConfig {
        agent_address: "agent-7".into(),
        rounds: vec!["collect".into(), "settle".into()],
        round_duration_ms: 100,
        message_interval_ms: 30,
        ..Default::default()
    };
    let node = Node::new(config).unwrap();
    let consensus = node.consensus().clone();
    let context = node.context().clone();

    let report = node.run(CancellationToken::new(), Some(4)).await.unwrap();

    assert_eq!(report.cycles, 4);
    assert!(report.messages_sent > 0);
    // One current-round and one spam message per tick; spam is never dispatched.
    let dropped = context.metrics().routed("dropped");
    assert!(report.dispatched >= 1);
    assert!(dropped >= 1);
    assert!(report.dispatched <= report.messages_sent / 2);
    assert!(report.dispatched + dropped <= report.messages_sent);

    assert_eq!(consensus.get_round(0).unwrap().round_id, "collect");
    assert_eq!(consensus.get_round(1).unwrap().round_id, "settle");
    // Every round of the schedule gets exactly one submission.
    for height in 0..4 {
        let record = consensus.get_round(height).unwrap();
        assert_eq!(record.transactions.len(), 1, "round {height}");
        assert_eq!(record.transactions[0].sender, "agent-7");
        assert_eq!(record.transactions[0].round.height, height);
    }
    let settle_commits = (0..4)
        .filter_map(|height| consensus.get_round(height))
        .filter(|record| record.round_id == "settle")
        .map(|record| record.transactions.len())
        .sum::<usize>();
    assert_eq!(settle_commits, 2);
    assert!(context.waiters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_node_stops_on_cancel() {
    let config = NodeConfig {
        round_duration_ms: 100,
        ..Default::default()
    };
    let node = Node::new(config).unwrap();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(node.run(cancel.clone(), None));
    tokio::time::sleep(Duration::from_millis(250)).await;
    cancel.cancel();

    let report = handle.await.unwrap().unwrap();
    assert!(report.cycles >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_node_matching_round_only_acts_once_per_schedule() {
    let config = NodeConfig {
        rounds: vec!["collect".into(), "settle".into()],
        matching_round: Some("settle".into()),
        round_duration_ms: 100,
        message_interval_ms: 0,
        ..Default::default()
    };
    let node = Node::new(config).unwrap();
    let consensus = node.consensus().clone();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(node.run(cancel.clone(), Some(2)));
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.cycles, 2);
    assert!(consensus.get_round(0).unwrap().transactions.is_empty());
    assert_eq!(consensus.get_round(1).unwrap().transactions.len(), 1);
    assert!(consensus.get_round(2).unwrap().transactions.is_empty());
    assert_eq!(consensus.get_round(3).unwrap().transactions.len(), 1);
}

#[test]
fn test_node_error_wraps_config() {
    let config = NodeConfig {
        agent_address: String::new(),
        ..Default::default()
    };
    assert!(matches!(Node::new(config), Err(NodeError::Config(_))));
}
