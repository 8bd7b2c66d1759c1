use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use http_mqtt_bridge::{BridgeConfig, ConfigLayer};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MQTT_URL",
        "MQTT_HOST",
        "MQTT_USER",
        "MQTT_PASS",
        "MQTT_CLIENT_ID",
        "KEEP_ALIVE_TOPIC",
        "KEEP_ALIVE_MESSAGE",
        "DEBUG_MODE",
        "SECRET",
        "AUTH_KEY",
        "PORT",
    ] {
        std::env::remove_var(key);
    }
}

fn settings_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("temp settings");
    file.write_all(contents.as_bytes()).expect("write settings");
    file
}

#[test]
fn flags_override_file_override_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = settings_file(
        ".json",
        r#"{
            "mqtt_url": "mqtt://file-broker:1884",
            "mqtt_user": "file-user",
            "keep_alive_topic": "file/alive",
            "port": 6000
        }"#,
    );
    std::env::set_var("MQTT_URL", "mqtt://env-broker");
    std::env::set_var("MQTT_USER", "env-user");
    std::env::set_var("MQTT_PASS", "env-pass");
    std::env::set_var("KEEP_ALIVE_MESSAGE", "env-ping");
    std::env::set_var("PORT", "7000");

    let flags = ConfigLayer {
        mqtt_user: Some("flag-user".to_string()),
        ..ConfigLayer::default()
    };
    let cfg = BridgeConfig::load(flags, Some(file.path())).expect("load config");

    assert_eq!(cfg.mqtt.url, "mqtt://file-broker:1884");
    assert_eq!(cfg.mqtt.endpoint.host, "file-broker");
    assert_eq!(cfg.mqtt.endpoint.port, 1884);
    assert_eq!(cfg.mqtt.username, "flag-user");
    assert_eq!(cfg.mqtt.password, "env-pass");
    assert_eq!(cfg.keep_alive.topic, "file/alive");
    assert_eq!(cfg.keep_alive.message, "env-ping");
    assert_eq!(cfg.http_port, 6000);

    clear_env();
}

#[test]
fn legacy_env_names_are_honoured() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MQTT_HOST", "mqtts://legacy-broker");
    std::env::set_var("AUTH_KEY", "legacy-secret");
    std::env::set_var("DEBUG_MODE", "true");

    let cfg = BridgeConfig::load(ConfigLayer::default(), None).expect("load config");
    assert_eq!(cfg.mqtt.endpoint.host, "legacy-broker");
    assert_eq!(cfg.mqtt.endpoint.port, 8883);
    assert!(cfg.mqtt.endpoint.use_tls);
    assert_eq!(cfg.secret, "legacy-secret");
    assert!(cfg.debug);

    clear_env();
}

#[test]
fn empty_env_values_use_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MQTT_URL", "mqtt://broker");
    std::env::set_var("KEEP_ALIVE_TOPIC", "");
    std::env::set_var("SECRET", "");

    let cfg = BridgeConfig::load(ConfigLayer::default(), None).expect("load config");
    assert_eq!(cfg.keep_alive.topic, "keep_alive");
    assert_eq!(cfg.secret, "");
    assert_eq!(cfg.http_port, 5000);

    clear_env();
}

#[test]
fn toml_settings_files_are_supported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = settings_file(
        ".toml",
        r#"
mqtt_url = "tcp://toml-broker"
mqtt_clientid = "bridge-7"
secret = "from-toml"
debug = true
"#,
    );
    let cfg = BridgeConfig::load(ConfigLayer::default(), Some(file.path())).expect("load config");
    assert_eq!(cfg.mqtt.endpoint.host, "toml-broker");
    assert_eq!(cfg.mqtt.client_id.as_deref(), Some("bridge-7"));
    assert_eq!(cfg.secret, "from-toml");
    assert!(cfg.debug);
}

#[test]
fn invalid_port_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MQTT_URL", "mqtt://broker");
    std::env::set_var("PORT", "not-a-port");
    assert!(BridgeConfig::load(ConfigLayer::default(), None).is_err());

    clear_env();
}

#[test]
fn missing_broker_url_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = BridgeConfig::load(ConfigLayer::default(), None).unwrap_err();
    assert!(err.to_string().contains("MQTT broker URL"));
}
