use jobpool::config::PoolConfig;
use jobpool::ErrorKind;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.name, "");
    assert_eq!(config.size, PoolConfig::DEFAULT_NUM_THREADS);
    assert!(config.lazy_start);
    assert_eq!(config.sleep(), Duration::from_millis(10));
}

#[test]
fn missing_fields_take_defaults() {
    let config = PoolConfig::from_json(r#"{ "size": 3, "sleep_ms": 25 }"#).unwrap();
    assert_eq!(config.size, 3);
    assert_eq!(config.name, "");
    assert!(config.lazy_start);
    assert_eq!(config.sleep(), Duration::from_millis(25));
}

#[test]
fn invalid_configs_are_rejected() {
    let err = PoolConfig::from_json(r#"{ "size": 0 }"#).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Config(_)));

    let err = PoolConfig::from_json("{ size: ").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Json(_)));
}

#[test]
fn read_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.json");
    let written = PoolConfig::new("from file", 6)
        .with_lazy_start(false)
        .with_sleep(Duration::from_millis(2));
    fs::write(&path, serde_json::to_string(&written).unwrap()).unwrap();

    assert_eq!(PoolConfig::from_path(&path).unwrap(), written);

    let err = PoolConfig::from_path(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::IO(_)));
}
