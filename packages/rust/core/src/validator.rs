//! Configuration validation against the catalog's declared schemas.
//!
//! [`validate`] never fails: every problem it finds becomes a
//! [`ValidationError`] in the returned [`ValidationReport`], sorted so that
//! the report for a given configuration is the same regardless of instance
//! order.
//!
//! Per instance, in order:
//! 1. the component key resolves (`unknown-component`, remaining checks skipped)
//! 2. required variables are bound or defaulted (`missing-required`)
//! 3. bound values satisfy type and constraints
//! 4. component references resolve to an instance of the same configuration
//!
//! A cross-instance pass then reports duplicate instance ids and pin contention.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use espforge_shared::{
    Catalog, Component, ComponentInstance, ConfigVariable, Configuration, Value, VarType,
};

static PIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:gpio)?(\d{1,3})\s*$").expect("valid regex"));

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(ms|s|min|h)\s*$").expect("valid regex")
});

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

const MAX_DURATION_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Binding every component accepts regardless of its declared schema.
const ID_FIELD: &str = "id";

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    UnknownComponent,
    MissingRequired,
    TypeMismatch,
    OutOfRange,
    NotInEnum,
    PatternMismatch,
    InvalidPin,
    InvalidDuration,
    UnknownVariable,
    DanglingReference,
    DuplicateInstance,
    PinConflict,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownComponent => "unknown-component",
            Self::MissingRequired => "missing-required",
            Self::TypeMismatch => "type-mismatch",
            Self::OutOfRange => "out-of-range",
            Self::NotInEnum => "not-in-enum",
            Self::PatternMismatch => "pattern-mismatch",
            Self::InvalidPin => "invalid-pin",
            Self::InvalidDuration => "invalid-duration",
            Self::UnknownVariable => "unknown-variable",
            Self::DanglingReference => "dangling-reference",
            Self::DuplicateInstance => "duplicate-instance",
            Self::PinConflict => "pin-conflict",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an error is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Scope {
    /// One variable of one instance (empty for instance-level errors).
    Field { variable: String },
    /// Several instances at once; both lists are sorted.
    CrossInstance {
        instances: Vec<String>,
        variables: Vec<String>,
    },
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// The instance the error is reported against (first sorted id for
    /// cross-instance errors).
    pub instance_id: String,
    pub scope: Scope,
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    fn field(instance_id: &str, variable: &str, code: ErrorCode, message: String) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            scope: Scope::Field {
                variable: variable.to_string(),
            },
            code,
            message,
        }
    }

    /// Ordering key: instance, field before cross-instance, variable, code, message.
    fn sort_key(&self) -> (&str, u8, String, ErrorCode, &str) {
        let (rank, variable) = match &self.scope {
            Scope::Field { variable } => (0, variable.clone()),
            Scope::CrossInstance { variables, .. } => (1, variables.join(",")),
        };
        (&self.instance_id, rank, variable, self.code, &self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Field { variable } if !variable.is_empty() => write!(
                f,
                "{}.{}: [{}] {}",
                self.instance_id, variable, self.code, self.message
            ),
            _ => write!(f, "{}: [{}] {}", self.instance_id, self.code, self.message),
        }
    }
}

/// Outcome of validating one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "errors", rename_all = "kebab-case")]
pub enum ValidationReport {
    Valid,
    /// Non-empty, sorted.
    Invalid(Vec<ValidationError>),
}

impl ValidationReport {
    fn from_errors(mut errors: Vec<ValidationError>) -> Self {
        if errors.is_empty() {
            return Self::Valid;
        }
        errors.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Self::Invalid(errors)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn errors(&self) -> &[ValidationError] {
        match self {
            Self::Valid => &[],
            Self::Invalid(errors) => errors,
        }
    }
}

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// GPIO numbers usable on a target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRules {
    Esp32,
    Esp8266,
    Rp2040,
    Generic,
}

impl PinRules {
    pub fn for_platform(platform: &str) -> Self {
        match platform.trim().to_ascii_lowercase().as_str() {
            "esp32" => Self::Esp32,
            "esp8266" => Self::Esp8266,
            "rp2040" => Self::Rp2040,
            _ => Self::Generic,
        }
    }

    pub fn allows(&self, gpio: u32) -> bool {
        match self {
            // 6-11 are wired to the SPI flash.
            Self::Esp32 => gpio <= 39 && !(6..=11).contains(&gpio),
            Self::Esp8266 => gpio <= 5 || (12..=16).contains(&gpio),
            Self::Rp2040 => gpio <= 29,
            Self::Generic => gpio <= 49,
        }
    }
}

/// Physical pin number of a bound value (`GPIO5`, `gpio5`, `5`).
pub fn parse_pin(value: &Value) -> Option<u32> {
    match value {
        Value::Integer(n) => u32::try_from(*n).ok(),
        Value::Text(s) => PIN_RE.captures(s).and_then(|c| c[1].parse().ok()),
        _ => None,
    }
}

/// Duration in milliseconds of `<number>(ms|s|min|h)`.
pub fn parse_duration_ms(text: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(text)?;
    let amount: f64 = caps[1].parse().ok()?;
    let factor = match &caps[2] {
        "ms" => 1.0,
        "s" => 1_000.0,
        "min" => 60_000.0,
        "h" => 3_600_000.0,
        _ => return None,
    };
    Some(amount * factor)
}

// ---------------------------------------------------------------------------
// Value rules
// ---------------------------------------------------------------------------

/// Check one value against a variable's declared type and constraints.
///
/// Returns the first violation. `Unknown` variables and secret references are
/// exempt: neither can be checked locally.
pub fn check_value(var: &ConfigVariable, value: &Value, pins: PinRules) -> Option<(ErrorCode, String)> {
    if var.var_type == VarType::Unknown || value.secret_name().is_some() {
        return None;
    }

    match var.var_type {
        VarType::String => check_pattern(var, &value.as_text()),
        VarType::Integer => {
            let Some(n) = as_integer(value) else {
                return Some(mismatch(var, value, "an integer"));
            };
            check_range(var, n as f64)
        }
        VarType::Float => {
            let Some(n) = as_float(value) else {
                return Some(mismatch(var, value, "a number"));
            };
            check_range(var, n)
        }
        VarType::Boolean => as_bool(value)
            .is_none()
            .then(|| mismatch(var, value, "a boolean")),
        VarType::Enumeration => {
            let text = value.as_text();
            let allowed = &var.constraints.allowed_values;
            if allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(&text)) {
                None
            } else {
                Some((
                    ErrorCode::NotInEnum,
                    format!("'{text}' is not one of {}", allowed.join(", ")),
                ))
            }
        }
        VarType::Pin => match parse_pin(value) {
            Some(gpio) if pins.allows(gpio) => None,
            Some(gpio) => Some((
                ErrorCode::InvalidPin,
                format!("GPIO{gpio} is not usable on this platform"),
            )),
            None => Some((
                ErrorCode::InvalidPin,
                format!("'{value}' is not a GPIO pin"),
            )),
        },
        VarType::Duration => check_duration(value),
        VarType::ComponentReference => match value {
            Value::Text(s) if REFERENCE_RE.is_match(s) => None,
            _ => Some(mismatch(var, value, "a component id")),
        },
        VarType::Unknown => None,
    }
}

fn mismatch(var: &ConfigVariable, value: &Value, expected: &str) -> (ErrorCode, String) {
    (
        ErrorCode::TypeMismatch,
        format!("'{value}' is not {expected} ({} expected)", var.var_type),
    )
}

fn check_range(var: &ConfigVariable, n: f64) -> Option<(ErrorCode, String)> {
    let bounded = var.constraints.min.is_some() || var.constraints.max.is_some();
    if bounded && !n.is_finite() {
        return Some((ErrorCode::OutOfRange, format!("{n} is not a finite number")));
    }
    if let Some(min) = var.constraints.min {
        if n < min {
            return Some((
                ErrorCode::OutOfRange,
                format!("{n} is below the minimum of {min}"),
            ));
        }
    }
    if let Some(max) = var.constraints.max {
        if n > max {
            return Some((
                ErrorCode::OutOfRange,
                format!("{n} is above the maximum of {max}"),
            ));
        }
    }
    None
}

fn check_pattern(var: &ConfigVariable, text: &str) -> Option<(ErrorCode, String)> {
    let pattern = var.constraints.pattern.as_deref()?;
    // Malformed patterns are dropped at normalization; treat any survivor as absent.
    let re = Regex::new(&format!("^(?:{pattern})$")).ok()?;
    (!re.is_match(text)).then(|| {
        (
            ErrorCode::PatternMismatch,
            format!("'{text}' does not match {pattern}"),
        )
    })
}

fn check_duration(value: &Value) -> Option<(ErrorCode, String)> {
    let text = value.as_text();
    match value {
        Value::Text(_) => match parse_duration_ms(&text) {
            Some(ms) if ms > 0.0 && ms <= MAX_DURATION_MS => None,
            Some(_) => Some((
                ErrorCode::InvalidDuration,
                format!("'{text}' must be positive and at most 24h"),
            )),
            None => Some((
                ErrorCode::InvalidDuration,
                format!("'{text}' is not a duration like 500ms, 60s, 5min or 1h"),
            )),
        },
        _ => Some((
            ErrorCode::InvalidDuration,
            format!("'{text}' has no unit (ms, s, min or h)"),
        )),
    }
}

pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Some(true),
            "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a binding counts as present. Empty text is treated as unbound.
pub(crate) fn is_bound(value: &Value) -> bool {
    !matches!(value, Value::Text(s) if s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Find the instance a reference names: first by its bound `id`, then by
/// instance id.
pub(crate) fn resolve_reference<'a>(
    config: &'a Configuration,
    name: &str,
) -> Option<&'a ComponentInstance> {
    config
        .instances
        .iter()
        .find(|i| {
            i.values
                .get(ID_FIELD)
                .is_some_and(|v| v.as_text() == name)
        })
        .or_else(|| config.instances.iter().find(|i| i.id == name))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate `config` against the catalog snapshot.
#[instrument(skip_all, fields(instances = config.instances.len()))]
pub fn validate(config: &Configuration, catalog: &Catalog) -> ValidationReport {
    let pins = PinRules::for_platform(&config.device.platform);
    let mut errors = Vec::new();

    for instance in &config.instances {
        match catalog.get(&instance.component) {
            Some(component) => check_instance(instance, component, config, pins, &mut errors),
            None => errors.push(ValidationError::field(
                &instance.id,
                "",
                ErrorCode::UnknownComponent,
                format!("component '{}' is not in the catalog", instance.component),
            )),
        }
    }

    check_duplicate_ids(config, &mut errors);
    check_pin_conflicts(config, catalog, &mut errors);

    debug!(errors = errors.len(), "configuration validated");
    ValidationReport::from_errors(errors)
}

fn check_instance(
    instance: &ComponentInstance,
    component: &Component,
    config: &Configuration,
    pins: PinRules,
    errors: &mut Vec<ValidationError>,
) {
    for var in &component.variables {
        let bound = instance.values.get(&var.name).filter(|v| is_bound(v));
        match bound {
            None if var.required && var.default.is_none() => {
                errors.push(ValidationError::field(
                    &instance.id,
                    &var.name,
                    ErrorCode::MissingRequired,
                    format!("'{}' is required by {}", var.name, component.key),
                ));
            }
            None => {}
            Some(value) => {
                if let Some((code, message)) = check_value(var, value, pins) {
                    errors.push(ValidationError::field(&instance.id, &var.name, code, message));
                } else if var.var_type == VarType::ComponentReference {
                    let target = value.as_text();
                    if resolve_reference(config, &target).is_none() {
                        errors.push(ValidationError::field(
                            &instance.id,
                            &var.name,
                            ErrorCode::DanglingReference,
                            format!("no instance with id '{target}'"),
                        ));
                    }
                }
            }
        }
    }

    if !component.variables.is_empty() {
        for name in instance.values.keys() {
            if name != ID_FIELD && component.variable(name).is_none() {
                errors.push(ValidationError::field(
                    &instance.id,
                    name,
                    ErrorCode::UnknownVariable,
                    format!("{} declares no variable '{name}'", component.key),
                ));
            }
        }
    }
}

fn check_duplicate_ids(config: &Configuration, errors: &mut Vec<ValidationError>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for instance in &config.instances {
        *counts.entry(instance.id.as_str()).or_default() += 1;
    }

    for (id, count) in counts.into_iter().filter(|(_, n)| *n > 1) {
        errors.push(ValidationError {
            instance_id: id.to_string(),
            scope: Scope::CrossInstance {
                instances: vec![id.to_string()],
                variables: Vec::new(),
            },
            code: ErrorCode::DuplicateInstance,
            message: format!("instance id '{id}' is used {count} times"),
        });
    }
}

/// One error per unordered pair of instances sharing a physical pin.
fn check_pin_conflicts(config: &Configuration, catalog: &Catalog, errors: &mut Vec<ValidationError>) {
    // gpio -> instance index -> variables binding it
    let mut usage: BTreeMap<u32, BTreeMap<usize, BTreeSet<&str>>> = BTreeMap::new();

    for (idx, instance) in config.instances.iter().enumerate() {
        let Some(component) = catalog.get(&instance.component) else {
            continue;
        };
        for var in component.variables.iter().filter(|v| v.var_type == VarType::Pin) {
            if let Some(gpio) = instance.values.get(&var.name).and_then(parse_pin) {
                usage
                    .entry(gpio)
                    .or_default()
                    .entry(idx)
                    .or_default()
                    .insert(var.name.as_str());
            }
        }
    }

    for (gpio, users) in usage {
        let users: Vec<(&str, &BTreeSet<&str>)> = users
            .iter()
            .map(|(idx, vars)| (config.instances[*idx].id.as_str(), vars))
            .collect();

        for (i, a) in users.iter().enumerate() {
            for b in &users[i + 1..] {
                // Same id on both sides: order by the variables instead.
                let (first, second) = if a <= b { (a, b) } else { (b, a) };
                errors.push(pin_conflict(gpio, first, second));
            }
        }
    }
}

fn pin_conflict(
    gpio: u32,
    first: &(&str, &BTreeSet<&str>),
    second: &(&str, &BTreeSet<&str>),
) -> ValidationError {
    let variables: BTreeSet<&str> = first.1.union(second.1).copied().collect();
    let describe = |(id, vars): &(&str, &BTreeSet<&str>)| {
        format!("'{id}' ({})", vars.iter().copied().collect::<Vec<_>>().join(", "))
    };

    ValidationError {
        instance_id: first.0.to_string(),
        scope: Scope::CrossInstance {
            instances: vec![first.0.to_string(), second.0.to_string()],
            variables: variables.into_iter().map(str::to_string).collect(),
        },
        code: ErrorCode::PinConflict,
        message: format!(
            "GPIO{gpio} is used by both {} and {}",
            describe(first),
            describe(second)
        ),
    }
}

/// Errors grouped by instance id, for display.
pub fn group_by_instance(report: &ValidationReport) -> HashMap<&str, Vec<&ValidationError>> {
    let mut grouped: HashMap<&str, Vec<&ValidationError>> = HashMap::new();
    for error in report.errors() {
        grouped.entry(error.instance_id.as_str()).or_default().push(error);
    }
    grouped
}
