//! Raw record → canonical component.
//!
//! The canonical key comes from the source URL path only, never from the
//! display name, so the same page always lands on the same record.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, instrument, warn};
use url::Url;

use espforge_extractor::component_segments;
use espforge_shared::{
    Component, ConfigVariable, Constraints, EspforgeError, RawComponent, RawVariable, Result,
    Value, VarType,
};

use crate::validator::{self, PinRules};

/// `pin`, `*_pin`, `pin_*`, `gpio*`.
static PIN_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:pin|.+_pin|pin_.+|gpio.*)$").expect("valid regex"));

/// Result of normalizing one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    /// Content checksum equals the stored record's; nothing to write beyond `checked_at`.
    Unchanged { key: String, checksum: String },
    /// No record was stored under this key.
    Created(Component),
    /// A stored record exists with a different checksum.
    Updated(Component),
}

impl NormalizeOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Unchanged { key, .. } => key,
            Self::Created(c) | Self::Updated(c) => &c.key,
        }
    }
}

/// Canonical key for a component page: `sensor/dht.html` → `sensor.dht`.
///
/// Segments keep ASCII letters, digits, `_` and `-`; every other byte is
/// written as `%XX`, so distinct page paths never share a key.
pub fn canonical_key(source_url: &str) -> Result<String> {
    let url = Url::parse(source_url)
        .map_err(|e| EspforgeError::validation(format!("invalid source URL '{source_url}': {e}")))?;

    let segments: Vec<String> = component_segments(&url)
        .iter()
        .map(|s| escape_segment(s))
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(EspforgeError::validation(format!(
            "'{source_url}' does not name a component page"
        )));
    }
    Ok(segments.join("."))
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => out.push(char::from(b)),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Canonicalize `raw`, comparing against the currently stored record.
#[instrument(skip_all, fields(url = %raw.source_url))]
pub fn normalize(
    raw: &RawComponent,
    stored: Option<&Component>,
    now: DateTime<Utc>,
) -> Result<NormalizeOutcome> {
    let key = canonical_key(&raw.source_url)?;
    let checksum = raw.checksum();

    if let Some(existing) = stored {
        if existing.checksum == checksum {
            debug!(%key, "checksum unchanged");
            return Ok(NormalizeOutcome::Unchanged { key, checksum });
        }
    }

    let category = key.split('.').next().unwrap_or(&key).to_string();
    let is_platform = key != category;

    let mut variables = Vec::new();
    for var in dedupe(&raw.variables) {
        // The generator owns `platform:` on platform components.
        if is_platform && var.name == "platform" {
            continue;
        }
        variables.push(canonical_variable(&key, var));
    }

    let name = match raw.name.trim() {
        "" => key.clone(),
        n => n.to_string(),
    };

    let component = Component {
        key,
        name,
        category,
        description: raw.description.trim().to_string(),
        variables,
        platforms: raw.platforms.clone(),
        source_url: raw.source_url.clone(),
        checksum,
        refreshed_at: now,
        checked_at: now,
    };

    Ok(match stored {
        Some(_) => NormalizeOutcome::Updated(component),
        None => NormalizeOutcome::Created(component),
    })
}

/// Merge variables sharing a trimmed name: the first occurrence wins and later
/// ones fill in whatever it lacks.
fn dedupe(raw: &[RawVariable]) -> Vec<RawVariable> {
    let mut out: Vec<RawVariable> = Vec::with_capacity(raw.len());

    for var in raw {
        let name = var.name.trim();
        if name.is_empty() {
            continue;
        }
        match out.iter_mut().find(|v| v.name == name) {
            Some(first) => fill_missing(first, var),
            None => {
                let mut var = var.clone();
                var.name = name.to_string();
                out.push(var);
            }
        }
    }
    out
}

fn fill_missing(first: &mut RawVariable, later: &RawVariable) {
    if first.var_type == VarType::Unknown {
        first.var_type = later.var_type;
    }
    first.required |= later.required;
    if first.type_text.is_none() {
        first.type_text.clone_from(&later.type_text);
    }
    if first.default.is_none() {
        first.default.clone_from(&later.default);
    }
    if first.candidates.is_empty() {
        first.candidates.clone_from(&later.candidates);
    }
    if first.min.is_none() && first.max.is_none() {
        first.min = later.min;
        first.max = later.max;
    }
    if first.pattern.is_none() {
        first.pattern.clone_from(&later.pattern);
    }
    if first.description.is_empty() {
        first.description.clone_from(&later.description);
    }
}

/// Type inference for `unknown`, first match wins.
fn infer_type(var: &RawVariable) -> VarType {
    if var.var_type != VarType::Unknown {
        return var.var_type;
    }
    if !var.candidates.is_empty() {
        return VarType::Enumeration;
    }
    if PIN_NAME_RE.is_match(&var.name.to_ascii_lowercase()) {
        return VarType::Pin;
    }
    match var.default.as_deref().map(unquote) {
        Some(d) if d.parse::<i64>().is_ok() => VarType::Integer,
        Some(d) if d.parse::<f64>().is_ok() => VarType::Float,
        Some(d) if !d.is_empty() => VarType::String,
        _ => VarType::Unknown,
    }
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches(['"', '\''])
}

fn canonical_variable(key: &str, raw: RawVariable) -> ConfigVariable {
    let var_type = infer_type(&raw);
    let mut constraints = Constraints::default();

    if var_type == VarType::Enumeration {
        constraints.allowed_values = raw.candidates.clone();
    }

    if var_type.is_numeric() {
        match (raw.min, raw.max) {
            (Some(min), Some(max)) if min > max => {
                warn!(%key, variable = %raw.name, min, max, "dropping inverted range");
            }
            (min, max) => {
                constraints.min = min;
                constraints.max = max;
            }
        }
    }

    if let Some(pattern) = raw.pattern.as_deref() {
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(_) => constraints.pattern = Some(pattern.to_string()),
            Err(e) => warn!(%key, variable = %raw.name, error = %e, "dropping invalid pattern"),
        }
    }

    let mut var = ConfigVariable {
        name: raw.name,
        var_type,
        required: raw.required,
        default: None,
        constraints,
        description: raw.description.trim().to_string(),
    };

    if let Some(text) = raw.default.as_deref() {
        let value = typed_default(var_type, unquote(text));
        match validator::check_value(&var, &value, PinRules::Generic) {
            None => var.default = Some(value),
            Some((code, message)) => {
                warn!(%key, variable = %var.name, %code, %message, "dropping invalid default");
            }
        }
    }

    var
}

/// Interpret documented default text according to the variable's type.
fn typed_default(var_type: VarType, text: &str) -> Value {
    match var_type {
        VarType::Integer => text
            .parse()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::text(text)),
        VarType::Float => text
            .parse()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::text(text)),
        VarType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Value::Bool(true),
            "false" | "no" | "off" => Value::Bool(false),
            _ => Value::text(text),
        },
        _ => Value::text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_var(name: &str) -> RawVariable {
        RawVariable {
            name: name.into(),
            ..RawVariable::default()
        }
    }

    fn raw(variables: Vec<RawVariable>) -> RawComponent {
        RawComponent {
            source_url: "https://esphome.io/components/sensor/dht.html".into(),
            name: "DHT Temperature+Humidity Sensor".into(),
            category: "sensor".into(),
            description: "  Reads temperature and humidity.  ".into(),
            platforms: vec!["ESP32".into()],
            variables,
            strategy: "config-list".into(),
        }
    }

    fn created(outcome: NormalizeOutcome) -> Component {
        match outcome {
            NormalizeOutcome::Created(c) => c,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn distinct_paths_get_distinct_keys() {
        let key = |page: &str| {
            canonical_key(&format!("https://esphome.io/components/sensor/{page}.html")).unwrap()
        };
        let keys = ["a+b", "a_b", "a.b", "a%2Bb", "ADC", "adc"].map(key);
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(keys[0], "sensor.a%2Bb");
        assert_eq!(keys[2], "sensor.a%2Eb");
        assert_eq!(keys[4], "sensor.ADC");
    }

    #[test]
    fn canonical_keys() {
        assert_eq!(
            canonical_key("https://esphome.io/components/sensor/dht.html").unwrap(),
            "sensor.dht"
        );
        assert_eq!(canonical_key("https://esphome.io/components/wifi.html").unwrap(), "wifi");
        assert_eq!(
            canonical_key("https://esphome.io/components/display/ssd1306%20oled.html").unwrap(),
            "display.ssd1306%2520oled"
        );
        assert_eq!(
            canonical_key("https://esphome.io/components/sensor/index.html").unwrap(),
            "sensor"
        );
        assert!(canonical_key("https://esphome.io/components/").is_err());
        assert!(canonical_key("not a url").is_err());
    }

    #[test]
    fn key_ignores_display_name() {
        let mut a = raw(vec![]);
        a.name = "Old Name".into();
        let mut b = raw(vec![]);
        b.name = "New Name".into();
        let now = Utc::now();
        assert_eq!(
            created(normalize(&a, None, now).unwrap()).key,
            created(normalize(&b, None, now).unwrap()).key
        );
    }

    #[test]
    fn created_then_unchanged_then_updated() {
        let now = Utc::now();
        let first = created(normalize(&raw(vec![raw_var("pin")]), None, now).unwrap());
        assert_eq!(first.category, "sensor");
        assert_eq!(first.description, "Reads temperature and humidity.");

        let again = normalize(&raw(vec![raw_var("pin")]), Some(&first), now).unwrap();
        assert_eq!(
            again,
            NormalizeOutcome::Unchanged {
                key: "sensor.dht".into(),
                checksum: first.checksum.clone(),
            }
        );

        let changed = normalize(&raw(vec![raw_var("pin"), raw_var("model")]), Some(&first), now)
            .unwrap();
        assert!(matches!(changed, NormalizeOutcome::Updated(ref c) if c.variables.len() == 2));
    }

    #[test]
    fn duplicates_merge_first_wins() {
        let now = Utc::now();
        let first = RawVariable {
            description: "First.".into(),
            ..raw_var(" pin ")
        };
        let later = RawVariable {
            var_type: VarType::Pin,
            required: true,
            description: "Second.".into(),
            ..raw_var("pin")
        };
        let comp = created(normalize(&raw(vec![first, later]), None, now).unwrap());
        assert_eq!(comp.variables.len(), 1);
        let pin = &comp.variables[0];
        assert_eq!(pin.name, "pin");
        assert_eq!(pin.var_type, VarType::Pin);
        assert!(pin.required);
        assert_eq!(pin.description, "First.");
    }

    #[test]
    fn inference_order() {
        let now = Utc::now();
        let vars = vec![
            RawVariable {
                candidates: vec!["A".into(), "B".into()],
                default: Some("5".into()),
                ..raw_var("mode_pin")
            },
            raw_var("clk_pin"),
            raw_var("gpio12"),
            RawVariable {
                default: Some("5".into()),
                ..raw_var("retries")
            },
            RawVariable {
                default: Some("0.5".into()),
                ..raw_var("gain")
            },
            RawVariable {
                default: Some("\"auto\"".into()),
                ..raw_var("label")
            },
            raw_var("filters"),
        ];
        let comp = created(normalize(&raw(vars), None, now).unwrap());
        let types: Vec<VarType> = comp.variables.iter().map(|v| v.var_type).collect();
        assert_eq!(
            types,
            vec![
                VarType::Enumeration,
                VarType::Pin,
                VarType::Pin,
                VarType::Integer,
                VarType::Float,
                VarType::String,
                VarType::Unknown,
            ]
        );
        assert_eq!(comp.variables[3].default, Some(Value::Integer(5)));
        assert_eq!(comp.variables[5].default, Some(Value::text("auto")));
        // "5" is not among the candidates.
        assert!(comp.variables[0].default.is_none());
    }

    #[test]
    fn invalid_defaults_patterns_and_ranges_are_dropped() {
        let now = Utc::now();
        let vars = vec![
            RawVariable {
                var_type: VarType::Integer,
                default: Some("ten".into()),
                min: Some(5.0),
                max: Some(1.0),
                ..raw_var("count")
            },
            RawVariable {
                var_type: VarType::String,
                pattern: Some("([a-z".into()),
                ..raw_var("name")
            },
            RawVariable {
                var_type: VarType::Integer,
                default: Some("9".into()),
                min: Some(0.0),
                max: Some(3.0),
                ..raw_var("accuracy_decimals")
            },
            RawVariable {
                var_type: VarType::Duration,
                default: Some("60s".into()),
                ..raw_var("update_interval")
            },
        ];
        let comp = created(normalize(&raw(vars), None, now).unwrap());

        let count = comp.variable("count").unwrap();
        assert!(count.default.is_none());
        assert!(count.constraints.min.is_none() && count.constraints.max.is_none());
        assert!(comp.variable("name").unwrap().constraints.pattern.is_none());

        let decimals = comp.variable("accuracy_decimals").unwrap();
        assert_eq!(decimals.constraints.max, Some(3.0));
        assert!(decimals.default.is_none());

        assert_eq!(
            comp.variable("update_interval").unwrap().default,
            Some(Value::text("60s"))
        );
    }

    #[test]
    fn platform_field_is_dropped_on_platform_components() {
        let now = Utc::now();
        let comp = created(normalize(&raw(vec![raw_var("platform"), raw_var("pin")]), None, now).unwrap());
        assert!(comp.variable("platform").is_none());
        assert!(comp.is_platform());
    }

    #[test]
    fn empty_title_falls_back_to_key() {
        let mut r = raw(vec![]);
        r.name = "  ".into();
        let comp = created(normalize(&r, None, Utc::now()).unwrap());
        assert_eq!(comp.name, "sensor.dht");
    }
}
