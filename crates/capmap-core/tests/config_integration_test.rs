use capmap_core::{ConfigManager, LogFormat};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_layered_files_override_defaults() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        r#"
[database]
max_connections = 4
tenant_setting = "capmap.tenant"

[logging]
level = "debug"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("staging.toml"),
        r#"
[database]
max_connections = 16

[logging]
format = "json"
"#,
    )
    .unwrap();

    let settings = ConfigManager::load_from_sources(dir.path(), "staging").unwrap();
    assert_eq!(settings.database.max_connections, 16);
    assert_eq!(settings.database.tenant_setting, "capmap.tenant");
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.projection.max_hierarchy_depth, 10);
    assert!(settings.validate().is_ok());
}

#[test]
fn test_missing_files_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = ConfigManager::load_from_sources(dir.path(), "nowhere").unwrap();
    assert_eq!(settings.database.tenant_setting, "app.current_tenant");
    assert!(settings.validate().is_ok());
}

#[test]
fn test_load_rejects_invalid_tenant_setting() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        r#"
[database]
tenant_setting = "no_dot_here"
"#,
    )
    .unwrap();

    let err = ConfigManager::load(Some(dir.path().to_path_buf()), Some("test".into()));
    assert!(err.is_err());
}
