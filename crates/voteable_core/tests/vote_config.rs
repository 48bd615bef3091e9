use std::io::Write;
use uuid::Uuid;
use voteable_core::{ConfigError, EntityKind, VoteConfig, VoteValue, VoteWeights, Voteable};

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name).unwrap()
}

const FORUM_CONFIG: &str = r#"{
    "rules": [
        {"votee": "comment", "related": "comment", "up": 1, "down": -3},
        {"votee": "comment", "related": "post", "up": 2, "down": -1,
         "propagate_counters": false, "foreign_key": "post_id"},
        {"votee": "comment", "related": "post", "up": 9, "down": -9},
        {"votee": "post", "related": "post", "up": 1, "down": -1}
    ]
}"#;

#[test]
fn json_config_registers_rules_first_wins() {
    let config = VoteConfig::from_json_str(FORUM_CONFIG).unwrap();

    assert_eq!(config.self_weights(&kind("comment")), Some(VoteWeights::new(1, -3)));
    assert!(config.is_voteable(&kind("post")));
    assert!(!config.is_voteable(&kind("user")));

    let ancestors = config.ancestors(&kind("comment"));
    assert_eq!(ancestors.len(), 1);
    assert_eq!(ancestors[0].weights, VoteWeights::new(2, -1).without_counters());
    assert_eq!(ancestors[0].weights.point(VoteValue::Up), 2);

    let post_id = Uuid::new_v4();
    let comment = Voteable::new(kind("comment")).link("post_id", post_id).unwrap();
    let link = ancestors[0].link.as_ref().unwrap();
    assert_eq!(link.resolve(&comment), Some(post_id));

    assert!(config.ancestors(&kind("post")).is_empty());
    assert_eq!(config.votee_kinds().count(), 2);
}

#[test]
fn json_config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FORUM_CONFIG.as_bytes()).unwrap();

    let config = VoteConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.self_weights(&kind("post")), Some(VoteWeights::new(1, -1)));
}

#[test]
fn json_config_rejects_invalid_kind_and_missing_self_entry() {
    let bad_kind =
        r#"{"rules": [{"votee": "Comment", "related": "Comment", "up": 1, "down": -1}]}"#;
    assert!(matches!(
        VoteConfig::from_json_str(bad_kind),
        Err(ConfigError::Json(_))
    ));

    let no_self = r#"{"rules": [{"votee": "comment", "related": "post", "up": 1, "down": -1}]}"#;
    assert!(matches!(
        VoteConfig::from_json_str(no_self),
        Err(ConfigError::MissingSelfWeights(_))
    ));
}

#[test]
fn missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = VoteConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn json_config_rejects_weights_that_could_overflow_points() {
    let err = VoteConfig::from_json_str(
        r#"{"rules": [
            {"votee": "post", "related": "post", "up": 9223372036854775807, "down": -1}
        ]}"#,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ConfigError::WeightOutOfRange { votee, weight, .. }
            if votee == kind("post") && weight == i64::MAX
    ));
}
