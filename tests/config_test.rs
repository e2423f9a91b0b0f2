//! Loading membership configuration from TOML files

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use viewsync::{GmsConfig, GmsError};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
join_timeout_ms = 1500
leave_timeout_ms = 6000
view_ack_collection_timeout_ms = 750
max_join_attempts = 2
max_batch_size = 16
"#,
    );
    let config = GmsConfig::from_file(file.path()).unwrap();
    assert_eq!(config.join_timeout(), Duration::from_millis(1500));
    assert_eq!(config.leave_timeout(), Duration::from_secs(6));
    assert_eq!(config.view_ack_collection_timeout(), Duration::from_millis(750));
    assert_eq!(config.max_join_attempts, 2);
    assert_eq!(config.max_batch_size, 16);
}

#[test]
fn test_empty_file_gives_defaults() {
    let file = write_config("");
    assert_eq!(GmsConfig::from_file(file.path()).unwrap(), GmsConfig::default());
}

#[test]
fn test_saved_config_loads_back() {
    let config = GmsConfig {
        leave_timeout_ms: 250,
        max_join_attempts: 1,
        ..GmsConfig::default()
    };
    let file = write_config(&config.to_toml_string().unwrap());
    assert_eq!(GmsConfig::from_file(file.path()).unwrap(), config);
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config("max_join_attempts = 0\n");
    let err = GmsConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, GmsError::Config(_)));
    assert!(err.to_string().contains("max_join_attempts"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = GmsConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, GmsError::Io(_)));
}
