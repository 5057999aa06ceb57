//! JSON fixtures shaped like the printer's `device/<serial>/report` pushes.

use bambu_exporter::decoder::encode_report;
use bambu_exporter::TelemetrySnapshot;
use serde_json::{json, Map, Value};

pub const REPORT_TOPIC: &str = "device/01S00C000000001/report";
pub const REQUEST_TOPIC: &str = "device/01S00C000000001/request";

/// Builds one report payload, starting from a printer that is idle with
/// every reading populated.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    print: Map<String, Value>,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportBuilder {
    pub fn new() -> Self {
        let base = json!({
            "wifi_signal": "-45dBm",
            "layer_num": 12,
            "total_layer_num": 240,
            "print_error": 0,
            "big_fan1_speed": "0",
            "big_fan2_speed": "0",
            "cooling_fan_speed": "15",
            "heatbreak_fan_speed": "10",
            "fan_gear": 0,
            "chamber_temper": 28.0,
            "bed_temper": 55.0,
            "bed_target_temper": 55.0,
            "nozzle_temper": 219.5,
            "nozzle_target_temper": 220.0,
            "mc_percent": 5,
            "mc_print_error_code": "0",
            "mc_print_stage": "2",
            "mc_print_sub_stage": 0,
            "mc_remaining_time": 87,
            "fail_reason": "0",
            "gcode_state": "RUNNING"
        });
        let print = match base {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { print }
    }

    pub fn wifi_signal(self, signal: &str) -> Self {
        self.field("wifi_signal", json!(signal))
    }

    /// A partial push: the printer leaves the signal out of delta updates.
    pub fn without_wifi_signal(mut self) -> Self {
        self.print.remove("wifi_signal");
        self
    }

    pub fn nozzle(self, temper: f64, target: f64) -> Self {
        self.field("nozzle_temper", json!(temper))
            .field("nozzle_target_temper", json!(target))
    }

    pub fn layers(self, current: i64, total: i64) -> Self {
        self.field("layer_num", json!(current))
            .field("total_layer_num", json!(total))
    }

    pub fn gcode_state(self, state: &str) -> Self {
        self.field("gcode_state", json!(state))
    }

    /// `units` AMS units with `trays` trays each; values derive from the
    /// position so assertions can tell series apart.
    pub fn ams(self, units: usize, trays: usize) -> Self {
        let ams: Vec<Value> = (0..units)
            .map(|u| {
                let tray: Vec<Value> = (0..trays)
                    .map(|t| {
                        json!({
                            "id": t.to_string(),
                            "bed_temp": format!("{}", 50 + t),
                            "tray_color": format!("FF{u}{t}00FF"),
                            "tray_type": if t % 2 == 0 { "PLA" } else { "PETG" },
                            "remain": 100 - (10 * t as i64)
                        })
                    })
                    .collect();
                json!({
                    "id": u.to_string(),
                    "humidity": format!("{}", 3 + u),
                    "temp": format!("{}.5", 24 + u),
                    "tray": tray
                })
            })
            .collect();
        self.field("ams", json!({ "ams": ams }))
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.print.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Value {
        json!({ "print": Value::Object(self.print) })
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}

/// Payload that decodes back into `snapshot`.
pub fn report_for(snapshot: &TelemetrySnapshot) -> anyhow::Result<Vec<u8>> {
    Ok(encode_report(snapshot)?)
}
