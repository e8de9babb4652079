// tests/ingest_config.rs
use std::{env, fs};

use reddit_harvester::config::{HarvesterConfig, StoreBackend, ENV_CONFIG_PATH, ENV_CONFIG_SECTION};

const FILE: &str = r#"
[default.reddit]
username = "ENV"
password = "ENV"
app_id = "ENV"
app_secret = "ENV"
user_agent = "harvester/test"
query_limit = 25
subreddits = ["stories", "jokes"]

[default.store]
url = "ENV"
collections = ["posts", "comments"]

[default.scheduler]
run_frequency_secs = 120

[default.retry]
initial_delay_ms = 250
max_elapsed_secs = 5

[default.metrics]
listen = "127.0.0.1:9100"

[test.reddit]
subreddits = ["rust"]

[test.store]
backend = "memory"
"#;

fn set_secrets() {
    env::set_var("REDDIT_USERNAME", "bot");
    env::set_var("REDDIT_PASSWORD", "pw");
    env::set_var("REDDIT_APP_ID", "id");
    env::set_var("REDDIT_APP_SECRET", "secret");
    env::set_var("DATABASE_URL", "postgres://db/harvest");
}

fn clear_secrets() {
    for k in [
        "REDDIT_USERNAME",
        "REDDIT_PASSWORD",
        "REDDIT_APP_ID",
        "REDDIT_APP_SECRET",
        "DATABASE_URL",
    ] {
        env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn env_placeholders_are_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harvester.toml");
    fs::write(&path, FILE).unwrap();
    set_secrets();

    let cfg = HarvesterConfig::load_from(&path, "default").unwrap();
    clear_secrets();

    let creds = cfg.reddit_client_config().credentials.expect("credentials");
    assert_eq!(creds.username, "bot");
    assert_eq!(creds.app_secret, "secret");
    assert_eq!(cfg.pg_store_config().unwrap().url, "postgres://db/harvest");
    assert_eq!(cfg.store.backend, StoreBackend::Postgres);
    assert_eq!(cfg.reddit.query_limit, 25);
    assert_eq!(cfg.scheduler_cfg().interval.as_secs(), 120);
    assert_eq!(cfg.retry_policy().initial_delay.as_millis(), 250);
    assert_eq!(cfg.retry_policy().max_elapsed.as_secs(), 5);
    assert_eq!(cfg.metrics.listen.as_deref(), Some("127.0.0.1:9100"));
}

#[serial_test::serial]
#[test]
fn missing_env_secret_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harvester.toml");
    fs::write(&path, FILE).unwrap();
    clear_secrets();

    let err = HarvesterConfig::load_from(&path, "default").unwrap_err();
    assert!(format!("{err:#}").contains("REDDIT_USERNAME"));
}

#[serial_test::serial]
#[test]
fn default_path_and_section_come_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, FILE).unwrap();

    env::set_var(ENV_CONFIG_PATH, path.display().to_string());
    env::set_var(ENV_CONFIG_SECTION, "TEST");
    let cfg = HarvesterConfig::load_default();
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_CONFIG_SECTION);

    let cfg = cfg.unwrap();
    assert_eq!(cfg.sources(), ["rust".to_string()]);
    assert_eq!(cfg.store.backend, StoreBackend::Memory);
    assert!(cfg.reddit_client_config().credentials.is_none());
}

#[serial_test::serial]
#[test]
fn nonexistent_file_is_reported_with_path() {
    let err = HarvesterConfig::load_from(std::path::Path::new("/nonexistent/h.toml"), "default")
        .unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/h.toml"));
}
