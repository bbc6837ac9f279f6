//! Configuration → ESPHome YAML.
//!
//! Output layout:
//! - a constant header comment
//! - `esphome:` (name, friendly_name), then the platform block (`esp32: { board }`)
//! - extra device sections in key order
//! - one section per normalized category, in order of first appearance
//!
//! Platform components (`sensor.dht`) become list items carrying
//! `platform: dht`; top-level components (`wifi`) become a mapping.
//! Generation is deterministic: the same configuration and catalog always
//! produce the same bytes.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value as Yaml};
use tracing::{debug, instrument};

use espforge_shared::{
    Catalog, Component, ComponentInstance, ConfigVariable, Configuration, EspforgeError, Value,
    VarType,
};

use crate::validator::{self, as_bool, as_float, as_integer, is_bound, parse_pin};

/// First line of every generated file.
pub const HEADER: &str = "# Generated by espforge. Edits will be overwritten on the next generation.\n";

/// Errors that abort generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// The configuration violates something generation depends on.
    #[error("cannot generate: {0}")]
    Precondition(String),

    /// Two contributions claim the same output key incompatibly.
    #[error("structural conflict at '{key}' between {first} and {second}")]
    StructuralConflict {
        key: String,
        first: String,
        second: String,
    },

    #[error("YAML serialization failed: {0}")]
    Serialize(String),
}

impl From<GenerateError> for EspforgeError {
    fn from(e: GenerateError) -> Self {
        EspforgeError::Generation(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Section key for a category: lowercase, `-` and spaces become `_`.
pub fn section_key(category: &str) -> String {
    category
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c })
        .collect()
}

enum Body {
    List(Vec<Yaml>),
    Map(Mapping),
}

struct Section {
    key: String,
    /// Raw category of the first contribution.
    category: String,
    /// Instance id of the first contribution.
    first: String,
    body: Body,
    /// Instance that defined each mapping field.
    owners: Vec<(String, String)>,
}

/// Compile `config` into ESPHome YAML.
#[instrument(skip_all, fields(instances = config.instances.len()))]
pub fn generate(config: &Configuration, catalog: &Catalog) -> Result<String, GenerateError> {
    let resolved = resolve_instances(config, catalog)?;
    let referenced = referenced_instances(config, &resolved)?;
    check_emitted_ids(config, &referenced)?;

    let mut root = Mapping::new();
    let global_keys = emit_globals(config, &mut root)?;

    let mut sections: Vec<Section> = Vec::new();
    for (idx, (instance, component)) in resolved.iter().enumerate() {
        let item = build_item(instance, component, config, referenced.contains(&idx));
        contribute(&mut sections, &global_keys, instance, component, item)?;
    }

    for section in sections {
        let body = match section.body {
            Body::List(items) => Yaml::Sequence(items),
            Body::Map(map) => Yaml::Mapping(map),
        };
        root.insert(Yaml::String(section.key), body);
    }

    let yaml = serde_yaml::to_string(&root).map_err(|e| GenerateError::Serialize(e.to_string()))?;
    debug!(bytes = yaml.len(), "configuration generated");
    Ok(format!("{HEADER}{yaml}"))
}

/// Every instance paired with its catalog component.
fn resolve_instances<'a>(
    config: &'a Configuration,
    catalog: &'a Catalog,
) -> Result<Vec<(&'a ComponentInstance, &'a Component)>, GenerateError> {
    config
        .instances
        .iter()
        .map(|instance| {
            catalog
                .get(&instance.component)
                .map(|c| (instance, c))
                .ok_or_else(|| {
                    GenerateError::Precondition(format!(
                        "instance '{}' uses unknown component '{}'",
                        instance.id, instance.component
                    ))
                })
        })
        .collect()
}

/// Indexes of instances that some reference points at.
fn referenced_instances(
    config: &Configuration,
    resolved: &[(&ComponentInstance, &Component)],
) -> Result<HashSet<usize>, GenerateError> {
    let mut referenced = HashSet::new();

    for (instance, component) in resolved {
        for var in reference_vars(component) {
            let Some(value) = instance.values.get(&var.name).filter(|v| is_bound(v)) else {
                continue;
            };
            let target = value.as_text();
            let found = validator::resolve_reference(config, &target).ok_or_else(|| {
                GenerateError::Precondition(format!(
                    "instance '{}' references '{target}', which is not in the configuration",
                    instance.id
                ))
            })?;
            if let Some(idx) = config.instances.iter().position(|i| std::ptr::eq(i, found)) {
                referenced.insert(idx);
            }
        }
    }
    Ok(referenced)
}

/// Every `id:` written to the output must be unique.
fn check_emitted_ids(
    config: &Configuration,
    referenced: &HashSet<usize>,
) -> Result<(), GenerateError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (idx, instance) in config.instances.iter().enumerate() {
        let binds_id = instance.values.get("id").is_some_and(is_bound);
        if !binds_id && !referenced.contains(&idx) {
            continue;
        }
        let id = emitted_id(instance);
        if let Some(first) = seen.get(&id) {
            return Err(GenerateError::StructuralConflict {
                key: format!("id '{id}'"),
                first: format!("instance '{first}'"),
                second: format!("instance '{}'", instance.id),
            });
        }
        seen.insert(id, &instance.id);
    }
    Ok(())
}

fn reference_vars(component: &Component) -> impl Iterator<Item = &ConfigVariable> {
    component
        .variables
        .iter()
        .filter(|v| v.var_type == VarType::ComponentReference)
}

/// Emit the device block and extra global sections; returns the keys used.
fn emit_globals(config: &Configuration, root: &mut Mapping) -> Result<Vec<String>, GenerateError> {
    let device = &config.device;

    let mut esphome = Mapping::new();
    esphome.insert("name".into(), device.name.clone().into());
    if let Some(friendly) = &device.friendly_name {
        esphome.insert("friendly_name".into(), friendly.clone().into());
    }
    root.insert("esphome".into(), Yaml::Mapping(esphome));

    let platform = section_key(&device.platform);
    if platform == "esphome" {
        return Err(GenerateError::StructuralConflict {
            key: platform,
            first: "device settings".into(),
            second: "device platform".into(),
        });
    }
    let mut board = Mapping::new();
    board.insert("board".into(), device.board.clone().into());
    root.insert(platform.clone().into(), Yaml::Mapping(board));

    let mut keys = vec!["esphome".to_string(), platform];
    for (name, fields) in &device.sections {
        let key = section_key(name);
        if keys.contains(&key) {
            return Err(GenerateError::StructuralConflict {
                key,
                first: "device settings".into(),
                second: format!("device section '{name}'"),
            });
        }
        let mut map = Mapping::new();
        for (field, value) in fields {
            map.insert(field.clone().into(), plain_value(value));
        }
        root.insert(key.clone().into(), Yaml::Mapping(map));
        keys.push(key);
    }
    Ok(keys)
}

/// Add one instance's item to its section, enforcing the merge rules.
fn contribute(
    sections: &mut Vec<Section>,
    global_keys: &[String],
    instance: &ComponentInstance,
    component: &Component,
    item: Mapping,
) -> Result<(), GenerateError> {
    let key = section_key(&component.category);
    if global_keys.contains(&key) {
        return Err(GenerateError::StructuralConflict {
            key,
            first: "device settings".into(),
            second: format!("instance '{}'", instance.id),
        });
    }

    let Some(pos) = sections.iter().position(|s| s.key == key) else {
        let (body, owners) = if component.is_platform() {
            (Body::List(vec![Yaml::Mapping(item)]), Vec::new())
        } else {
            let owners = field_owners(&item, &instance.id);
            (Body::Map(item), owners)
        };
        sections.push(Section {
            key,
            category: component.category.clone(),
            first: instance.id.clone(),
            body,
            owners,
        });
        return Ok(());
    };
    let section = &mut sections[pos];

    let conflict = |first: String| GenerateError::StructuralConflict {
        key: section.key.clone(),
        first,
        second: format!("instance '{}'", instance.id),
    };

    if section.category != component.category {
        return Err(conflict(format!(
            "category '{}' of instance '{}'",
            section.category, section.first
        )));
    }

    let existing = match section.body {
        Body::List(_) => "list",
        Body::Map(_) => "mapping",
    };
    match (&mut section.body, component.is_platform()) {
        (Body::List(items), true) => items.push(Yaml::Mapping(item)),
        (Body::Map(map), false) => {
            for (field, value) in item {
                let name = field.as_str().unwrap_or_default().to_string();
                if let Some((_, owner)) = section.owners.iter().find(|(f, _)| *f == name) {
                    return Err(GenerateError::StructuralConflict {
                        key: format!("{}.{name}", section.key),
                        first: format!("instance '{owner}'"),
                        second: format!("instance '{}'", instance.id),
                    });
                }
                section.owners.push((name, instance.id.clone()));
                map.insert(field, value);
            }
        }
        _ => {
            return Err(conflict(format!(
                "the {existing} contribution of instance '{}'",
                section.first
            )));
        }
    }
    Ok(())
}

fn field_owners(item: &Mapping, instance_id: &str) -> Vec<(String, String)> {
    item.keys()
        .filter_map(|k| k.as_str())
        .map(|k| (k.to_string(), instance_id.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

fn build_item(
    instance: &ComponentInstance,
    component: &Component,
    config: &Configuration,
    referenced: bool,
) -> Mapping {
    let mut item = Mapping::new();
    let bound = |name: &str| instance.values.get(name).filter(|v| is_bound(v));

    if component.is_platform() {
        item.insert("platform".into(), component.platform_name().into());
    }
    if referenced && bound("id").is_none() {
        item.insert("id".into(), sanitize_id(&instance.id).into());
    }

    for var in &component.variables {
        if component.is_platform() && var.name == "platform" {
            continue;
        }
        let value = match bound(&var.name) {
            Some(v) => v,
            None if var.required => match &var.default {
                Some(default) => default,
                None => continue,
            },
            None => continue,
        };
        item.insert(var.name.clone().into(), typed_value(var, value, config));
    }

    for (name, value) in &instance.values {
        let reserved = component.is_platform() && name == "platform";
        if reserved || component.variable(name).is_some() || !is_bound(value) {
            continue;
        }
        item.insert(name.clone().into(), plain_value(value));
    }
    item
}

/// ESPHome ids: `[A-Za-z0-9_]`, not starting with a digit.
fn sanitize_id(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Id a referencing instance should emit for `target`.
fn emitted_id(target: &ComponentInstance) -> String {
    match target.values.get("id").filter(|v| is_bound(v)) {
        Some(v) => v.as_text(),
        None => sanitize_id(&target.id),
    }
}

fn typed_value(var: &ConfigVariable, value: &Value, config: &Configuration) -> Yaml {
    if let Some(name) = value.secret_name() {
        return secret(name);
    }
    match var.var_type {
        VarType::Integer => as_integer(value).map_or_else(|| plain_value(value), Yaml::from),
        VarType::Float => as_float(value).map_or_else(|| plain_value(value), Yaml::from),
        VarType::Boolean => as_bool(value).map_or_else(|| plain_value(value), Yaml::Bool),
        VarType::Pin => parse_pin(value)
            .map_or_else(|| plain_value(value), |n| Yaml::String(format!("GPIO{n}"))),
        VarType::ComponentReference => {
            let name = value.as_text();
            match validator::resolve_reference(config, &name) {
                Some(target) => Yaml::String(emitted_id(target)),
                None => Yaml::String(name),
            }
        }
        VarType::String | VarType::Duration | VarType::Enumeration => {
            Yaml::String(value.as_text())
        }
        VarType::Unknown => plain_value(value),
    }
}

fn plain_value(value: &Value) -> Yaml {
    match value {
        Value::Bool(b) => Yaml::Bool(*b),
        Value::Integer(n) => Yaml::from(*n),
        Value::Float(f) => Yaml::from(*f),
        Value::Secret { secret: name } => secret(name),
        Value::Text(s) => Yaml::String(s.clone()),
    }
}

fn secret(name: &str) -> Yaml {
    Yaml::Tagged(Box::new(TaggedValue {
        tag: Tag::new("secret"),
        value: Yaml::String(name.to_string()),
    }))
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// `secrets.yaml` skeleton listing every secret the configuration references.
pub fn secrets_template(config: &Configuration) -> String {
    let names: BTreeSet<&str> = config
        .device
        .sections
        .values()
        .flat_map(|fields| fields.values())
        .chain(config.instances.iter().flat_map(|i| i.values.values()))
        .filter_map(Value::secret_name)
        .collect();

    let mut out = String::from("# secrets.yaml: fill in a value for each entry.\n");
    for name in names {
        let mut entry = Mapping::new();
        entry.insert(name.into(), "".into());
        // Single-entry mappings of plain strings always serialize.
        out.push_str(&serde_yaml::to_string(&entry).unwrap_or_default());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, dht_instance, now_component};
    use espforge_shared::GlobalSettings;

    fn config(instances: Vec<ComponentInstance>) -> Configuration {
        let mut device = GlobalSettings::default();
        device.name = "kitchen".into();
        Configuration { device, instances }
    }

    fn sample() -> Configuration {
        let mut cfg = config(vec![
            dht_instance("temp", "5").with("accuracy_decimals", Value::text("2")),
            ComponentInstance::new("net", "wifi")
                .with("ssid", Value::text("home"))
                .with("password", Value::Secret { secret: "wifi_password".into() }),
            ComponentInstance::new("avg", "sensor.template").with("source_id", Value::text("temp")),
        ]);
        cfg.device
            .sections
            .insert("logger".into(), [("level".to_string(), Value::text("DEBUG"))].into());
        cfg
    }

    #[test]
    fn generates_expected_document() {
        let yaml = generate(&sample(), &catalog()).unwrap();
        assert!(yaml.starts_with(HEADER));

        let expected = "\
esphome:
  name: kitchen
esp32:
  board: nodemcu-32s
logger:
  level: DEBUG
sensor:
- platform: dht
  id: temp
  pin: GPIO5
  accuracy_decimals: 2
- platform: template
  source_id: temp
wifi:
  ssid: home
  password: !secret wifi_password
";
        assert_eq!(&yaml[HEADER.len()..], expected);
    }

    #[test]
    fn output_is_deterministic_and_reparses() {
        let a = generate(&sample(), &catalog()).unwrap();
        let b = generate(&sample(), &catalog()).unwrap();
        assert_eq!(a, b);

        let parsed: serde_yaml::Value = serde_yaml::from_str(&a).unwrap();
        assert_eq!(parsed["sensor"][0]["platform"], Yaml::from("dht"));
        assert_eq!(parsed["sensor"][0]["accuracy_decimals"], Yaml::from(2));
    }

    #[test]
    fn references_use_target_bound_id() {
        let cfg = config(vec![
            dht_instance("temp", "GPIO4").with("id", Value::text("kitchen_temp")),
            ComponentInstance::new("avg", "sensor.template")
                .with("source_id", Value::text("kitchen_temp")),
        ]);
        let yaml = generate(&cfg, &catalog()).unwrap();
        assert!(yaml.contains("  id: kitchen_temp\n"));
        assert!(yaml.contains("  source_id: kitchen_temp\n"));
        assert_eq!(yaml.matches("id: kitchen_temp").count(), 2);
    }

    #[test]
    fn required_default_is_emitted_when_unbound() {
        let mut cat = catalog();
        let mut wifi = cat.get("wifi").unwrap().clone();
        wifi.variables[0].default = Some(Value::text("fallback"));
        cat = Catalog::new(cat.iter().cloned().filter(|c| c.key != "wifi").chain([wifi]));

        let yaml = generate(&config(vec![ComponentInstance::new("net", "wifi")]), &cat).unwrap();
        assert!(yaml.contains("wifi:\n  ssid: fallback\n"));
    }

    #[test]
    fn undeclared_bindings_follow_declared_ones() {
        let cfg = config(vec![
            ComponentInstance::new("log", "logger")
                .with("level", Value::text("DEBUG"))
                .with("baud_rate", Value::Integer(0)),
        ]);
        let yaml = generate(&cfg, &catalog()).unwrap();
        assert!(yaml.ends_with("logger:\n  baud_rate: 0\n  level: DEBUG\n"));
    }

    #[test]
    fn preconditions_fail_fast() {
        let unknown = config(vec![ComponentInstance::new("x", "sensor.nope")]);
        assert!(matches!(
            generate(&unknown, &catalog()),
            Err(GenerateError::Precondition(_))
        ));

        let dangling = config(vec![
            ComponentInstance::new("avg", "sensor.template").with("source_id", Value::text("ghost")),
        ]);
        assert!(matches!(
            generate(&dangling, &catalog()),
            Err(GenerateError::Precondition(_))
        ));
    }

    #[test]
    fn categories_normalizing_to_the_same_key_conflict() {
        let mut dashed = now_component("binary-sensor.gpio", "binary-sensor");
        dashed.variables.clear();
        let mut underscored = now_component("binary_sensor.template", "binary_sensor");
        underscored.variables.clear();
        let cat = Catalog::new(catalog().iter().cloned().chain([dashed, underscored]));

        let cfg = config(vec![
            ComponentInstance::new("a", "binary-sensor.gpio"),
            ComponentInstance::new("b", "binary_sensor.template"),
        ]);
        let err = generate(&cfg, &cat).unwrap_err();
        assert!(matches!(err, GenerateError::StructuralConflict { ref key, .. } if key == "binary_sensor"));
    }

    #[test]
    fn section_colliding_with_global_conflicts() {
        let mut cfg = config(vec![ComponentInstance::new("log", "logger")]);
        cfg.device.sections.insert("logger".into(), Default::default());
        let err = generate(&cfg, &catalog()).unwrap_err();
        assert!(matches!(err, GenerateError::StructuralConflict { ref key, .. } if key == "logger"));
    }

    #[test]
    fn mapping_field_collision_conflicts() {
        let cfg = config(vec![
            ComponentInstance::new("net1", "wifi").with("ssid", Value::text("a")),
            ComponentInstance::new("net2", "wifi").with("ssid", Value::text("b")),
        ]);
        let err = generate(&cfg, &catalog()).unwrap_err();
        assert_eq!(
            err,
            GenerateError::StructuralConflict {
                key: "wifi.ssid".into(),
                first: "instance 'net1'".into(),
                second: "instance 'net2'".into(),
            }
        );
    }

    #[test]
    fn disjoint_mapping_contributions_merge() {
        let cfg = config(vec![
            ComponentInstance::new("net1", "wifi").with("ssid", Value::text("a")),
            ComponentInstance::new("net2", "wifi").with("domain", Value::text("lan")),
        ]);
        let yaml = generate(&cfg, &catalog()).unwrap();
        assert!(yaml.contains("wifi:\n  ssid: a\n  domain: lan\n"));
    }

    #[test]
    fn colliding_emitted_ids_conflict() {
        let cfg = config(vec![
            dht_instance("temp-1", "GPIO4"),
            dht_instance("temp_1", "GPIO5"),
            ComponentInstance::new("avg1", "sensor.template").with("source_id", Value::text("temp-1")),
            ComponentInstance::new("avg2", "sensor.template").with("source_id", Value::text("temp_1")),
        ]);
        assert_eq!(
            generate(&cfg, &catalog()).unwrap_err(),
            GenerateError::StructuralConflict {
                key: "id 'temp_1'".into(),
                first: "instance 'temp-1'".into(),
                second: "instance 'temp_1'".into(),
            }
        );
    }

    #[test]
    fn bound_id_colliding_with_generated_id_conflicts() {
        let cfg = config(vec![
            dht_instance("temp-x", "GPIO4"),
            dht_instance("other", "GPIO5").with("id", Value::text("temp_x")),
            ComponentInstance::new("avg", "sensor.template").with("source_id", Value::text("temp-x")),
        ]);
        let err = generate(&cfg, &catalog()).unwrap_err();
        assert!(matches!(err, GenerateError::StructuralConflict { ref key, .. } if key == "id 'temp_x'"));
    }

    #[test]
    fn sanitized_ids() {
        assert_eq!(sanitize_id("temp-1"), "temp_1");
        assert_eq!(sanitize_id("1st"), "_1st");
    }

    #[test]
    fn secrets_template_is_sorted_and_unique() {
        let mut cfg = sample();
        cfg.instances.push(
            ComponentInstance::new("net2", "wifi")
                .with("password", Value::Secret { secret: "wifi_password".into() })
                .with("ssid", Value::Secret { secret: "ap_ssid".into() }),
        );
        let template = secrets_template(&cfg);
        let body: Vec<&str> = template.lines().skip(1).collect();
        assert_eq!(body, vec!["ap_ssid: ''", "wifi_password: ''"]);
    }
}
