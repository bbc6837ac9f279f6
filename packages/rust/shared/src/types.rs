//! Core domain types: catalog entities, raw extraction records, and configurations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// VarType
// ---------------------------------------------------------------------------

/// Declared type of a configuration variable.
///
/// `Unknown` is the terminal fallback for variables whose type could not be
/// determined; such variables are exempt from type and constraint checks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum VarType {
    String,
    Integer,
    Float,
    Boolean,
    Enumeration,
    Pin,
    Duration,
    ComponentReference,
    #[default]
    Unknown,
}

impl VarType {
    /// Stable tag stored in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Enumeration => "enumeration",
            Self::Pin => "pin",
            Self::Duration => "duration",
            Self::ComponentReference => "component-reference",
            Self::Unknown => "unknown",
        }
    }

    /// Whether values of this type are numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VarType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "enumeration" => Ok(Self::Enumeration),
            "pin" => Ok(Self::Pin),
            "duration" => Ok(Self::Duration),
            "component-reference" => Ok(Self::ComponentReference),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown variable type tag '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A value bound to a configuration variable.
///
/// Deserializes from plain YAML/JSON scalars; a `{ secret: name }` mapping is a
/// reference into the device's `secrets.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Secret { secret: String },
    Text(String),
}

impl Value {
    /// Build a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Scalar rendered as text, as a user would have typed it.
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Secret { secret } => format!("!secret {secret}"),
            Self::Text(s) => s.clone(),
        }
    }

    /// Name of the referenced secret, if this is a secret reference.
    pub fn secret_name(&self) -> Option<&str> {
        match self {
            Self::Secret { secret } => Some(secret),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

// ---------------------------------------------------------------------------
// Catalog entities
// ---------------------------------------------------------------------------

/// Constraint set attached to a variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Inclusive lower bound for numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Permitted values for enumerations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Regex that string values must fully match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.allowed_values.is_empty()
            && self.pattern.is_none()
    }
}

/// A configuration variable declared by a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVariable {
    /// Variable name, unique within its component.
    pub name: String,
    /// Declared type.
    pub var_type: VarType,
    /// Whether the variable must be bound.
    pub required: bool,
    /// Default value; always satisfies the variable's own type and constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Constraints checked by the validator.
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// A canonical component record as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Canonical key derived from the source URL (e.g. `sensor.dht`).
    pub key: String,
    /// Display name.
    pub name: String,
    /// Category; also the top-level YAML section the component lives under.
    pub category: String,
    /// Free-text description.
    pub description: String,
    /// Declared variables, in documentation order.
    pub variables: Vec<ConfigVariable>,
    /// Supported hardware platforms mentioned by the documentation.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Documentation page this record was extracted from.
    pub source_url: String,
    /// SHA-256 of the extracted content.
    pub checksum: String,
    /// When the content last changed.
    pub refreshed_at: DateTime<Utc>,
    /// When a scrape last saw this component (changed or not).
    pub checked_at: DateTime<Utc>,
}

impl Component {
    /// Look up a declared variable by name.
    pub fn variable(&self, name: &str) -> Option<&ConfigVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Platform components (`sensor.dht`) are list items under their category;
    /// top-level components (`wifi`) own their section outright.
    pub fn is_platform(&self) -> bool {
        self.key != self.category
    }

    /// Platform name used in the `platform:` field (last key segment).
    pub fn platform_name(&self) -> &str {
        self.key.rsplit('.').next().unwrap_or(&self.key)
    }
}

/// Read-only snapshot of the catalog for one validation or generation call.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    components: BTreeMap<String, Component>,
}

impl Catalog {
    /// Build a snapshot from a list of components.
    pub fn new(components: impl IntoIterator<Item = Component>) -> Self {
        Self {
            components: components
                .into_iter()
                .map(|c| (c.key.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Component> {
        self.components.get(key)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Components in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }
}

// ---------------------------------------------------------------------------
// Raw extraction records
// ---------------------------------------------------------------------------

/// A loosely-typed variable definition as found on a documentation page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVariable {
    pub name: String,
    /// Type parsed from the documentation; `Unknown` when absent or unrecognized.
    pub var_type: VarType,
    /// The type text exactly as documented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_text: Option<String>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Finite list of permitted values, if the documentation gave one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regex the documentation says string values must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Everything the extractor learned about one component page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComponent {
    /// Page the record was extracted from.
    pub source_url: String,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub variables: Vec<RawVariable>,
    /// Name of the extraction strategy that produced `variables`.
    pub strategy: String,
}

impl RawComponent {
    /// SHA-256 over the normalized extracted content.
    ///
    /// The source URL and strategy name are excluded: the same content served
    /// from a mirror, or found by a different strategy, is not a change.
    pub fn checksum(&self) -> String {
        #[derive(Serialize)]
        struct Content<'a> {
            name: &'a str,
            category: &'a str,
            description: &'a str,
            platforms: &'a [String],
            variables: &'a [RawVariable],
        }

        let content = Content {
            name: self.name.trim(),
            category: self.category.trim(),
            description: self.description.trim(),
            platforms: &self.platforms,
            variables: &self.variables,
        };
        // Serializing plain structs and vectors cannot fail.
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        compute_hash(&bytes)
    }
}

/// Hex-encoded SHA-256 of `content`.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Configuration (caller-owned)
// ---------------------------------------------------------------------------

/// One placement of a catalog component inside a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstance {
    /// Opaque identifier, stable for the editing session.
    pub id: String,
    /// Canonical key of the placed component.
    pub component: String,
    /// Bound values; may be partial.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl ComponentInstance {
    pub fn new(id: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component: component.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style binding, mostly for tests and programmatic callers.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// Device-level settings emitted ahead of every component section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Device node name.
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// Target platform block (`esp32`, `esp8266`, `rp2040`, ...).
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_board")]
    pub board: String,
    /// Extra device-level sections (`logger`, `api`, `ota`, `wifi`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            friendly_name: None,
            platform: default_platform(),
            board: default_board(),
            sections: BTreeMap::new(),
        }
    }
}

fn default_device_name() -> String {
    "my-device".into()
}
fn default_platform() -> String {
    "esp32".into()
}
fn default_board() -> String {
    "nodemcu-32s".into()
}

/// A user-assembled device configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub device: GlobalSettings,
    #[serde(default)]
    pub instances: Vec<ComponentInstance>,
}

impl Configuration {
    /// Find an instance by id (first match).
    pub fn instance(&self, id: &str) -> Option<&ComponentInstance> {
        self.instances.iter().find(|i| i.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(description: &str) -> RawComponent {
        RawComponent {
            source_url: "https://esphome.io/components/sensor/dht.html".into(),
            name: "DHT Temperature+Humidity Sensor".into(),
            category: "sensor".into(),
            description: description.into(),
            platforms: vec!["ESP32".into()],
            variables: vec![RawVariable {
                name: "pin".into(),
                var_type: VarType::Pin,
                required: true,
                ..RawVariable::default()
            }],
            strategy: "config-list".into(),
        }
    }

    #[test]
    fn var_type_tags_roundtrip() {
        for t in [
            VarType::String,
            VarType::Integer,
            VarType::Float,
            VarType::Boolean,
            VarType::Enumeration,
            VarType::Pin,
            VarType::Duration,
            VarType::ComponentReference,
            VarType::Unknown,
        ] {
            assert_eq!(t.as_str().parse::<VarType>().unwrap(), t);
        }
        assert!("frequency".parse::<VarType>().is_err());
    }

    #[test]
    fn checksum_ignores_source_and_strategy() {
        let a = raw("Reads temperature.");
        let mut b = a.clone();
        b.source_url = "https://mirror.example.com/components/sensor/dht.html".into();
        b.strategy = "table".into();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);
    }

    #[test]
    fn checksum_tracks_content() {
        assert_ne!(raw("Reads temperature.").checksum(), raw("Reads humidity.").checksum());
    }

    #[test]
    fn compute_hash_known_vector() {
        assert_eq!(
            compute_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn configuration_from_yaml() {
        let yaml = r#"
device:
  name: kitchen
  platform: esp8266
  board: d1_mini
  sections:
    wifi:
      ssid: { secret: wifi_ssid }
    logger: {}
instances:
  - id: temp
    component: sensor.dht
    values:
      pin: GPIO5
      update_interval: 60s
      accuracy_decimals: 2
      invert: true
"#;
        let config: Configuration = serde_yaml::from_str(yaml).expect("parse configuration");
        assert_eq!(config.device.platform, "esp8266");
        assert_eq!(
            config.device.sections["wifi"]["ssid"].secret_name(),
            Some("wifi_ssid")
        );
        let inst = config.instance("temp").unwrap();
        assert_eq!(inst.values["pin"], Value::text("GPIO5"));
        assert_eq!(inst.values["accuracy_decimals"], Value::Integer(2));
        assert_eq!(inst.values["invert"], Value::Bool(true));
    }

    #[test]
    fn configuration_defaults_device() {
        let config: Configuration = serde_json::from_str(r#"{"instances": []}"#).unwrap();
        assert_eq!(config.device, GlobalSettings::default());
    }

    #[test]
    fn platform_component_detection() {
        let now = Utc::now();
        let mut comp = Component {
            key: "sensor.dht".into(),
            name: "DHT".into(),
            category: "sensor".into(),
            description: String::new(),
            variables: vec![],
            platforms: vec![],
            source_url: String::new(),
            checksum: String::new(),
            refreshed_at: now,
            checked_at: now,
        };
        assert!(comp.is_platform());
        assert_eq!(comp.platform_name(), "dht");

        comp.key = "wifi".into();
        comp.category = "wifi".into();
        assert!(!comp.is_platform());
    }
}
