//! Wire schema of the printer's `device/<serial>/report` messages.
//!
//! Firmware omits fields depending on its state and is not consistent about
//! scalar encodings (the same field can arrive as `"50"` or `50`), so every
//! scalar goes through a `lenient` deserializer: a mismatched shape becomes
//! the field's zero value instead of failing the whole report.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceReport {
    pub print: PrintReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintReport {
    #[serde(deserialize_with = "lenient::object")]
    pub ams: AmsSection,
    #[serde(deserialize_with = "lenient::float")]
    pub bed_target_temper: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub bed_temper: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub big_fan1_speed: String,
    #[serde(deserialize_with = "lenient::string")]
    pub big_fan2_speed: String,
    #[serde(deserialize_with = "lenient::float")]
    pub chamber_temper: f64,
    #[serde(deserialize_with = "lenient::string")]
    pub cooling_fan_speed: String,
    #[serde(deserialize_with = "lenient::string")]
    pub fail_reason: String,
    #[serde(deserialize_with = "lenient::int")]
    pub fan_gear: i64,
    #[serde(deserialize_with = "lenient::string")]
    pub gcode_state: String,
    #[serde(deserialize_with = "lenient::string")]
    pub heatbreak_fan_speed: String,
    #[serde(deserialize_with = "lenient::int")]
    pub layer_num: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub mc_percent: i64,
    #[serde(deserialize_with = "lenient::string")]
    pub mc_print_error_code: String,
    #[serde(deserialize_with = "lenient::string")]
    pub mc_print_stage: String,
    #[serde(deserialize_with = "lenient::int")]
    pub mc_print_sub_stage: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub mc_remaining_time: i64,
    #[serde(deserialize_with = "lenient::float")]
    pub nozzle_target_temper: f64,
    #[serde(deserialize_with = "lenient::float")]
    pub nozzle_temper: f64,
    #[serde(deserialize_with = "lenient::int")]
    pub print_error: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub total_layer_num: i64,
    /// Signal strength with its unit, e.g. `"-59dBm"`. Empty on partial pushes.
    #[serde(deserialize_with = "lenient::string")]
    pub wifi_signal: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AmsSection {
    #[serde(deserialize_with = "lenient::list")]
    pub ams: Vec<AmsReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AmsReport {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub humidity: String,
    #[serde(deserialize_with = "lenient::string")]
    pub temp: String,
    #[serde(deserialize_with = "lenient::list")]
    pub tray: Vec<TrayReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrayReport {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub bed_temp: String,
    #[serde(deserialize_with = "lenient::string")]
    pub tray_color: String,
    #[serde(deserialize_with = "lenient::string")]
    pub tray_type: String,
    #[serde(deserialize_with = "lenient::int")]
    pub remain: i64,
}

/// Command topic paired with a `device/<serial>/report` topic.
///
/// Returns `None` for topics that do not follow the printer's layout, in
/// which case no full-report request can be addressed.
pub fn request_topic(report_topic: &str) -> Option<String> {
    let serial = report_topic
        .strip_prefix("device/")?
        .strip_suffix("/report")?;
    if serial.is_empty() || serial.contains(|c: char| matches!(c, '/' | '+' | '#')) {
        return None;
    }
    Some(format!("device/{serial}/request"))
}

/// Asks the printer to publish a complete status report instead of deltas.
pub fn pushall_request() -> Vec<u8> {
    serde_json::json!({
        "pushing": {
            "sequence_id": "0",
            "command": "pushall"
        }
    })
    .to_string()
    .into_bytes()
}

pub(crate) mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }

    pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            Value::Bool(b) => f64::from(u8::from(b)),
            _ => 0.0,
        })
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Value::String(s) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
            Value::Bool(b) => i64::from(b),
            _ => 0,
        })
    }

    pub fn object<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(T::deserialize(Value::deserialize(d)?).unwrap_or_default())
    }

    /// Elements that fail to decode are kept as defaults so that the
    /// positional index of the remaining entries is preserved.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| T::deserialize(item).unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        })
    }
}
