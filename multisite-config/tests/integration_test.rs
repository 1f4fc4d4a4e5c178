//! Integration tests for multisite-config

use multisite_config::*;
use std::env;
use std::io::Write;

fn temp_file(name: &str, content: &str) -> String {
    let path = env::temp_dir().join(format!("multisite-config-{}-{}", std::process::id(), name));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_env_overrides_file() {
    let path = temp_file(
        "override.toml",
        r#"
            port = 3000
            short_name_prefix = "from-file-"
        "#,
    );

    unsafe {
        env::set_var("MSTEST_A_PORT", "4100");
    }

    let service = ConfigService::builder()
        .with_prefix("MSTEST_A")
        .add_file(path.clone(), FileFormat::Toml)
        .load_env()
        .build()
        .unwrap();
    let options = service.options().unwrap();

    assert_eq!(options.port, 4100);
    assert_eq!(options.short_name_prefix, "from-file-");

    unsafe {
        env::remove_var("MSTEST_A_PORT");
    }
    std::fs::remove_file(path).ok();
}

#[test]
fn test_nested_env_keys_reach_tier_maps() {
    unsafe {
        env::set_var("MSTEST_B_BASE_URL_DOMAINS__DEV", "site.test");
        env::set_var("MSTEST_B_MAX_REQUESTS_BEFORE_SHUTDOWN", "250");
        env::set_var("MSTEST_B_EXIT", "true");
    }

    let manager = ConfigManager::with_prefix("MSTEST_B");
    tokio_test::assert_ok!(manager.load_env());
    let options: MultisiteOptions = manager.load_validated().unwrap();

    assert_eq!(options.base_url_domains.get(&Tier::Dev).map(String::as_str), Some("site.test"));
    assert_eq!(options.max_requests_before_shutdown, Some(250));
    assert!(options.exit);

    unsafe {
        env::remove_var("MSTEST_B_BASE_URL_DOMAINS__DEV");
        env::remove_var("MSTEST_B_MAX_REQUESTS_BEFORE_SHUTDOWN");
        env::remove_var("MSTEST_B_EXIT");
    }
}

#[test]
fn test_optional_file_is_skipped() {
    let service = ConfigService::builder()
        .add_optional_file("/nonexistent/multisite.toml", FileFormat::Toml)
        .build()
        .unwrap();

    assert_eq!(service.options().unwrap(), MultisiteOptions::default());
}

#[test]
fn test_required_file_must_exist() {
    let result = ConfigService::builder()
        .add_file("/nonexistent/multisite.toml", FileFormat::Toml)
        .build();

    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_json_file_with_overrides() {
    let path = temp_file(
        "overrides.json",
        r#"{
            "dashboard_hostname": "dashboard.test",
            "hostname_overrides": { "dev": { "localhost": "aaa" } }
        }"#,
    );

    let manager = ConfigManager::new();
    manager.load_file(&path, FileFormat::Json).unwrap();
    let options: MultisiteOptions = manager.load_validated().unwrap();

    assert_eq!(options.dashboard_hostname, "dashboard.test");
    assert_eq!(options.hostname_overrides[&Tier::Dev]["localhost"], "aaa");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::KeyNotFound("port".to_string());
    assert!(err.to_string().contains("port"));
}
