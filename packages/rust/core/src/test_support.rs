//! Fixtures shared by the core test modules.

use std::sync::Arc;

use chrono::Utc;
use espforge_extractor::Extractor;
use espforge_shared::{
    Catalog, Component, ComponentInstance, ConfigVariable, Constraints, ScrapeConfig, Value,
    VarType,
};
use espforge_storage::Storage;
use uuid::Uuid;

use crate::ingest::Ingestor;

fn var(name: &str, var_type: VarType, required: bool) -> ConfigVariable {
    ConfigVariable {
        name: name.into(),
        var_type,
        required,
        default: None,
        constraints: Constraints::default(),
        description: String::new(),
    }
}

pub(crate) fn now_component(key: &str, category: &str) -> Component {
    let now = Utc::now();
    Component {
        key: key.into(),
        name: key.into(),
        category: category.into(),
        description: String::new(),
        variables: Vec::new(),
        platforms: Vec::new(),
        source_url: format!("https://esphome.io/components/{}.html", key.replace('.', "/")),
        checksum: "0".repeat(64),
        refreshed_at: now,
        checked_at: now,
    }
}

/// `sensor.dht`, `sensor.template`, `wifi` and `logger` (no declared variables).
pub(crate) fn catalog() -> Catalog {
    let mut dht = now_component("sensor.dht", "sensor");
    dht.variables = vec![
        var("pin", VarType::Pin, true),
        ConfigVariable {
            default: Some(Value::text("AUTO_DETECT")),
            constraints: Constraints {
                allowed_values: vec!["AUTO_DETECT".into(), "DHT11".into(), "DHT22".into()],
                ..Constraints::default()
            },
            ..var("model", VarType::Enumeration, false)
        },
        ConfigVariable {
            default: Some(Value::text("60s")),
            ..var("update_interval", VarType::Duration, false)
        },
        ConfigVariable {
            constraints: Constraints {
                min: Some(0.0),
                max: Some(3.0),
                ..Constraints::default()
            },
            ..var("accuracy_decimals", VarType::Integer, false)
        },
        var("filters", VarType::Unknown, false),
    ];

    let mut template = now_component("sensor.template", "sensor");
    template.variables = vec![var("source_id", VarType::ComponentReference, true)];

    let mut wifi = now_component("wifi", "wifi");
    wifi.variables = vec![
        var("ssid", VarType::String, true),
        var("password", VarType::String, false),
        ConfigVariable {
            constraints: Constraints {
                pattern: Some("[a-z0-9.-]+".into()),
                ..Constraints::default()
            },
            ..var("domain", VarType::String, false)
        },
    ];

    let logger = now_component("logger", "logger");

    Catalog::new([dht, template, wifi, logger])
}

pub(crate) fn dht_instance(id: &str, pin: &str) -> ComponentInstance {
    ComponentInstance::new(id, "sensor.dht").with("pin", Value::text(pin))
}

pub(crate) fn load_fixture(name: &str) -> String {
    let path = format!("../../../fixtures/html/{name}");
    std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
}

pub(crate) fn test_config() -> ScrapeConfig {
    ScrapeConfig {
        concurrency: 2,
        rate_limit_ms: 0,
        max_attempts: 2,
        initial_backoff_ms: 10,
        timeout_secs: 5,
    }
}

/// Ingestor over a fresh temp-file database, allowed to reach mock servers.
pub(crate) async fn test_ingestor() -> Ingestor {
    let tmp = std::env::temp_dir().join(format!("espforge_test_{}.db", Uuid::now_v7()));
    let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
    let extractor = Extractor::new(&test_config())
        .expect("build extractor")
        .allow_localhost(true);
    Ingestor::new(extractor, storage)
}
