//! Metric taxonomy and emission.
//!
//! Names and help texts match the series dashboards already query
//! (`*_metric` suffix). Scalars are unlabeled gauges; AMS units and trays are
//! labeled by their position in the report.

use crate::snapshot::TelemetrySnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Metric {
    AmsHumidity,
    AmsTemp,
    AmsTrayColor,
    AmsBedTemp,
    AmsTrayRemain,
    LayerNumber,
    TotalLayerNumber,
    PrintError,
    WifiSignal,
    BigFan1Speed,
    BigFan2Speed,
    ChamberTemper,
    CoolingFanSpeed,
    HeatbreakFanSpeed,
    FailReason,
    FanGear,
    McPercent,
    McPrintErrorCode,
    McPrintStage,
    McPrintSubStage,
    McRemainingTime,
    NozzleTargetTemper,
    NozzleTemper,
    BedTemper,
    BedTargetTemper,
    PrintStateInfo,
}

const AMS: &[&str] = &["ams_number"];
const TRAY: &[&str] = &["ams_number", "tray_number"];
const TRAY_IDENTITY: &[&str] = &["ams_number", "tray_number", "tray_color", "tray_type"];
const STATE: &[&str] = &["gcode_state"];
const NONE: &[&str] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Descriptor {
    pub metric: Metric,
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const ALL: [Metric; 26] = [
        Metric::AmsHumidity,
        Metric::AmsTemp,
        Metric::AmsTrayColor,
        Metric::AmsBedTemp,
        Metric::AmsTrayRemain,
        Metric::LayerNumber,
        Metric::TotalLayerNumber,
        Metric::PrintError,
        Metric::WifiSignal,
        Metric::BigFan1Speed,
        Metric::BigFan2Speed,
        Metric::ChamberTemper,
        Metric::CoolingFanSpeed,
        Metric::HeatbreakFanSpeed,
        Metric::FailReason,
        Metric::FanGear,
        Metric::McPercent,
        Metric::McPrintErrorCode,
        Metric::McPrintStage,
        Metric::McPrintSubStage,
        Metric::McRemainingTime,
        Metric::NozzleTargetTemper,
        Metric::NozzleTemper,
        Metric::BedTemper,
        Metric::BedTargetTemper,
        Metric::PrintStateInfo,
    ];

    pub const fn descriptor(self) -> Descriptor {
        let (name, help, labels) = match self {
            Metric::AmsHumidity => ("ams_humidity_metric", "humidity of the ams", AMS),
            Metric::AmsTemp => ("ams_temp_metric", "temperature of the ams", AMS),
            Metric::AmsTrayColor => (
                "ams_tray_color_metric",
                "ID of the ams with color hex values",
                TRAY_IDENTITY,
            ),
            Metric::AmsBedTemp => ("ams_bed_temp_metric", "temperature of the ams bed", TRAY),
            Metric::AmsTrayRemain => (
                "ams_tray_remain_metric",
                "Remaining filament of the tray in percent",
                TRAY,
            ),
            Metric::LayerNumber => (
                "layer_number_metric",
                "layer number of the print head in gcode",
                NONE,
            ),
            Metric::TotalLayerNumber => (
                "total_layer_number_metric",
                "total layer count of the current print",
                NONE,
            ),
            Metric::PrintError => ("print_error_metric", "Print error int", NONE),
            Metric::WifiSignal => ("wifi_signal_metric", "Wifi signal in dBm", NONE),
            Metric::BigFan1Speed => ("big_fan1_speed_metric", "Big Fan 1 Speed", NONE),
            Metric::BigFan2Speed => ("big_fan2_speed_metric", "Big Fan 2 Speed", NONE),
            Metric::ChamberTemper => (
                "chamber_temper_metric",
                "Chamber Temperature of Printer",
                NONE,
            ),
            Metric::CoolingFanSpeed => ("cooling_fan_speed_metric", "Cooling Fan Speed", NONE),
            Metric::HeatbreakFanSpeed => (
                "heatbreak_fan_speed_metric",
                "Heatbreak Fan Speed",
                NONE,
            ),
            Metric::FailReason => ("fail_reason_metric", "Print Failure Reason", NONE),
            Metric::FanGear => ("fan_gear_metric", "Fan Gear", NONE),
            Metric::McPercent => (
                "mc_percent_metric",
                "Percentage of Progress of print",
                NONE,
            ),
            Metric::McPrintErrorCode => (
                "mc_print_error_code_metric",
                "Print Progress Error Code",
                NONE,
            ),
            Metric::McPrintStage => ("mc_print_stage_metric", "Print Progress Stage", NONE),
            Metric::McPrintSubStage => (
                "mc_print_sub_stage_metric",
                "Print Progress Sub Stage",
                NONE,
            ),
            Metric::McRemainingTime => (
                "mc_remaining_time_metric",
                "Print Progress Remaining Time in minutes",
                NONE,
            ),
            Metric::NozzleTargetTemper => (
                "nozzle_target_temper_metric",
                "Nozzle Target Temperature Metric",
                NONE,
            ),
            Metric::NozzleTemper => ("nozzle_temper_metric", "Nozzle Temperature Metric", NONE),
            Metric::BedTemper => ("bed_temper_metric", "Bed Temperature Metric", NONE),
            Metric::BedTargetTemper => (
                "bed_target_temper_metric",
                "Bed Target Temperature Metric",
                NONE,
            ),
            Metric::PrintStateInfo => (
                "print_state_info_metric",
                "Current gcode state of the printer",
                STATE,
            ),
        };
        Descriptor {
            metric: self,
            name,
            help,
            labels,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

/// Static descriptor table, independent of any snapshot.
pub fn describe() -> Vec<Descriptor> {
    Metric::ALL.iter().map(|m| m.descriptor()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("{metric} expects {expected} label values, got {got}")]
    LabelMismatch {
        metric: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{0} is not registered with this sink")]
    Unregistered(&'static str),
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Receiver of emitted samples, one call per series.
pub trait MetricSink {
    fn record(&mut self, metric: Metric, labels: &[&str], value: f64) -> Result<(), EmitError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub metric: Metric,
    pub labels: Vec<String>,
    pub value: f64,
}

impl MetricSink for Vec<Sample> {
    fn record(&mut self, metric: Metric, labels: &[&str], value: f64) -> Result<(), EmitError> {
        let expected = metric.descriptor().labels.len();
        if labels.len() != expected {
            return Err(EmitError::LabelMismatch {
                metric: metric.name(),
                expected,
                got: labels.len(),
            });
        }
        self.push(Sample {
            metric,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            value,
        });
        Ok(())
    }
}

/// Emits every series for `snapshot` into `sink` and returns the number of
/// samples written. Stops at the first sink error.
pub fn emit<S: MetricSink + ?Sized>(
    snapshot: &TelemetrySnapshot,
    sink: &mut S,
) -> Result<usize, EmitError> {
    let scalars = [
        (Metric::LayerNumber, snapshot.layer_number),
        (Metric::TotalLayerNumber, snapshot.total_layer_number),
        (Metric::PrintError, snapshot.print_error),
        (Metric::WifiSignal, snapshot.wifi_signal),
        (Metric::BigFan1Speed, snapshot.big_fan1_speed),
        (Metric::BigFan2Speed, snapshot.big_fan2_speed),
        (Metric::ChamberTemper, snapshot.chamber_temper),
        (Metric::CoolingFanSpeed, snapshot.cooling_fan_speed),
        (Metric::HeatbreakFanSpeed, snapshot.heatbreak_fan_speed),
        (Metric::FailReason, snapshot.fail_reason),
        (Metric::FanGear, snapshot.fan_gear),
        (Metric::McPercent, snapshot.mc_percent),
        (Metric::McPrintErrorCode, snapshot.mc_print_error_code),
        (Metric::McPrintStage, snapshot.mc_print_stage),
        (Metric::McPrintSubStage, snapshot.mc_print_sub_stage),
        (Metric::McRemainingTime, snapshot.mc_remaining_time),
        (Metric::NozzleTargetTemper, snapshot.nozzle_target_temper),
        (Metric::NozzleTemper, snapshot.nozzle_temper),
        (Metric::BedTemper, snapshot.bed_temper),
        (Metric::BedTargetTemper, snapshot.bed_target_temper),
    ];

    let mut emitted = 0;
    for (metric, value) in scalars {
        sink.record(metric, &[], value)?;
        emitted += 1;
    }

    if !snapshot.gcode_state.is_empty() {
        sink.record(Metric::PrintStateInfo, &[snapshot.gcode_state.as_str()], 1.0)?;
        emitted += 1;
    }

    for (x, unit) in snapshot.ams.iter().enumerate() {
        let ams_number = x.to_string();
        sink.record(Metric::AmsTemp, &[ams_number.as_str()], unit.temperature)?;
        sink.record(Metric::AmsHumidity, &[ams_number.as_str()], unit.humidity)?;
        emitted += 2;

        for (i, tray) in unit.trays.iter().enumerate() {
            let tray_number = i.to_string();
            let position = [ams_number.as_str(), tray_number.as_str()];
            sink.record(Metric::AmsBedTemp, &position, tray.bed_temperature)?;
            sink.record(Metric::AmsTrayRemain, &position, tray.remain)?;
            let identity = [
                ams_number.as_str(),
                tray_number.as_str(),
                tray.color.as_str(),
                tray.material.as_str(),
            ];
            sink.record(Metric::AmsTrayColor, &identity, 1.0)?;
            emitted += 3;
        }
    }

    Ok(emitted)
}
