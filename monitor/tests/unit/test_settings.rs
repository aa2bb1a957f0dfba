//! Settings loading tests

use std::path::Path;
use std::time::Duration;

use serde_json::json;

use servmon::config::settings::{ConfigError, Settings};
use servmon::deploy::step::StepOrder;
use servmon::logs::LogLevel;
use servmon::models::server::Visibility;

use crate::support::Fixture;

fn write_settings(dir: &Path, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("monitor.json");
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn test_load_keeps_only_valid_servers() {
    let fixture = Fixture::new();
    let path = write_settings(
        &fixture.root,
        json!({
            "log_level": "debug",
            "api": {"port": 4000, "allowed_hosts": ["127.0.0.1", "10.0.0.0/8"]},
            "restart_cooldown_secs": 5,
            "step_order": "lifo",
            "servers": {
                "Main": fixture.entry(2506, &["R_ADMIN"]),
                "Broken": {
                    "game_path": fixture.game,
                    "git_path": fixture.root.join("missing"),
                    "git_branch": "master",
                    "byond_path": fixture.byond,
                    "port": 2507,
                    "visibility": "public"
                },
                "Unnamed port": {"game_path": fixture.game}
            }
        }),
    );

    let settings = Settings::load(&path).await.unwrap();
    assert_eq!(settings.log_level, LogLevel::Debug);
    assert_eq!(settings.servers.len(), 3);

    let records = settings.server_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name(), "Main");
    assert_eq!(records[0].visibility(), Visibility::Public);

    let api = settings.api_options().unwrap();
    assert_eq!(api.port, 4000);
    assert!(api.allowed_hosts.contains("10.1.2.3".parse().unwrap()));
    assert!(!api.allowed_hosts.contains("192.168.1.1".parse().unwrap()));

    let orchestrator = settings.orchestrator_options();
    assert_eq!(orchestrator.restart_cooldown, Duration::from_secs(5));
    assert_eq!(orchestrator.step_order, StepOrder::Lifo);
    assert_eq!(orchestrator.step_timeout, None);
    assert_eq!(orchestrator.terminate_grace, Duration::from_secs(10));
}

#[tokio::test]
async fn test_hyphenated_server_keys_are_accepted() {
    let fixture = Fixture::new();
    let path = write_settings(
        &fixture.root,
        json!({
            "servers": {
                "Legacy": {
                    "game-path": fixture.game,
                    "git-path": fixture.git,
                    "git-branch": "dev",
                    "byond-path": fixture.byond,
                    "port": 2508,
                    "visibility": "-invisible",
                    "start": true
                }
            }
        }),
    );

    let records = Settings::load(&path).await.unwrap().server_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].git_branch(), "dev");
    assert_eq!(records[0].visibility(), Visibility::Invisible);
    assert!(records[0].start_on_boot());
}

#[tokio::test]
async fn test_missing_file_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Settings::load(&tmp.path().join("nope.json")).await.unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[tokio::test]
async fn test_unparseable_file_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("monitor.json");
    std::fs::write(&path, "servers: {}").unwrap();

    let err = Settings::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::Unreadable(_)));
}

#[tokio::test]
async fn test_invalid_allow_list_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_settings(tmp.path(), json!({"api": {"allowed_hosts": ["not-an-address"]}}));

    let err = Settings::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::InvalidAllowList(_)));
}

#[test]
fn test_deployer_options_from_settings() {
    let settings: Settings = serde_json::from_value(json!({
        "changelog_interpreter": "python3",
        "git_author_name": "Changelog Bot"
    }))
    .unwrap();

    let options = settings.deployer_options();
    assert_eq!(options.changelog_interpreter, "python3");
    assert_eq!(options.git_author.name, "Changelog Bot");
    assert_eq!(options.git_author.email, "monitor@localhost");
    assert_eq!(settings.scheduler_options().interval, Duration::from_secs(30));
}
