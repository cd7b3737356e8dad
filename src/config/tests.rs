use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.url, "ws://127.0.0.1:8080");
    assert_eq!(settings.broker.connect_retries, 3);
    assert_eq!(settings.session.operation_timeout_ms, 1000);
    assert_eq!(settings.session.request_timeout_ms, 2000);
    assert_eq!(settings.game.namespace, "entangled-cannon");
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_broker_url_validation() {
    let mut settings = Settings::default();
    assert!(settings.broker.validate().is_ok());

    settings.broker.url = "wss://broker.example.com:443".to_string();
    assert!(settings.broker.validate().is_ok());

    settings.broker.url = "http://broker.example.com".to_string();
    let err = settings.broker.validate().unwrap_err();
    assert!(err.contains("ws://"));

    settings.broker.url = String::new();
    assert!(settings.broker.validate().is_err());
}

#[test]
#[serial]
fn load_config_reads_environment_overrides() {
    temp_env::with_vars(
        [
            ("CANNON_BROKER__URL", Some("wss://broker.example.com")),
            ("CANNON_BROKER__VPN_NAME", Some("arcade")),
            ("CANNON_SESSION__OPERATION_TIMEOUT_MS", Some("250")),
            ("CANNON_GAME__NAMESPACE", Some("cannon-test")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.broker.url, "wss://broker.example.com");
            assert_eq!(cfg.broker.vpn_name, "arcade");
            assert_eq!(cfg.session.operation_timeout_ms, 250);
            assert_eq!(cfg.game.namespace, "cannon-test");
            // untouched values keep their defaults
            assert_eq!(cfg.session.request_timeout_ms, 2000);
            assert_eq!(cfg.server.port, 8080);
        },
    );
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config picks up config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [broker]
        url = "ws://10.0.0.5:8008"
        username = "display"
        connect_retries = 5

        [server]
        port = 9000

        [log]
        level = "debug"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();

    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.broker.url, "ws://10.0.0.5:8008");
    assert_eq!(cfg.broker.username, "display");
    assert_eq!(cfg.broker.connect_retries, 5);
    assert_eq!(cfg.broker.vpn_name, "default");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.log.level, "debug");
}
