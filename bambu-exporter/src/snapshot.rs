use serde::Serialize;

/// Canonical, fully coerced state of one printer report.
///
/// Every reading is an `f64` so the collector can emit it as a gauge
/// without further conversion. AMS units and trays keep the order the
/// printer listed them in; their position is their identity downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub layer_number: f64,
    pub total_layer_number: f64,
    pub print_error: f64,
    /// dBm, unit already stripped.
    pub wifi_signal: f64,
    pub big_fan1_speed: f64,
    pub big_fan2_speed: f64,
    pub cooling_fan_speed: f64,
    pub heatbreak_fan_speed: f64,
    pub fan_gear: f64,
    pub chamber_temper: f64,
    pub bed_temper: f64,
    pub bed_target_temper: f64,
    pub nozzle_temper: f64,
    pub nozzle_target_temper: f64,
    pub mc_percent: f64,
    pub mc_print_error_code: f64,
    pub mc_print_stage: f64,
    pub mc_print_sub_stage: f64,
    /// Minutes.
    pub mc_remaining_time: f64,
    pub fail_reason: f64,
    pub gcode_state: String,
    pub ams: Vec<AmsUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmsUnit {
    pub humidity: f64,
    pub temperature: f64,
    pub trays: Vec<Tray>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tray {
    pub bed_temperature: f64,
    /// Hex RGBA as reported, e.g. `FF6A13FF`.
    pub color: String,
    /// Material type, e.g. `PLA`.
    pub material: String,
    /// Remaining filament in percent, `-1` when the spool is unknown.
    pub remain: f64,
}

impl TelemetrySnapshot {
    pub fn tray_count(&self) -> usize {
        self.ams.iter().map(|unit| unit.trays.len()).sum()
    }
}
