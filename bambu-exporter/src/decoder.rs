//! Report decoding: raw MQTT payload -> [`TelemetrySnapshot`].
//!
//! Coercion never aborts a decode. Numeric strings that fail to parse become
//! `0.0`, the wifi reading loses its `dBm` suffix first, and integer fields
//! widen to `f64`. Only a payload that is not a JSON report at all is an
//! error, and a report without a signal reading is not an error but a
//! non-report (the printer sends those as partial or cleared pushes).

use crate::health::HealthTracker;
use crate::models::{AmsReport, AmsSection, DeviceReport, PrintReport, TrayReport};
use crate::snapshot::{AmsUnit, TelemetrySnapshot, Tray};
use crate::state::SnapshotStore;
use crate::transport::DeliveryHandler;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

pub const SIGNAL_UNIT: &str = "dBm";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed report payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decodes one payload.
///
/// `Ok(None)` means the payload parsed but carries no signal reading and
/// must not replace the current snapshot.
pub fn decode(payload: &[u8]) -> Result<Option<TelemetrySnapshot>, DecodeError> {
    let report: DeviceReport = serde_json::from_slice(payload)?;
    let print = report.print;

    if print.wifi_signal.is_empty() {
        return Ok(None);
    }

    Ok(Some(TelemetrySnapshot {
        layer_number: print.layer_num as f64,
        total_layer_number: print.total_layer_num as f64,
        print_error: print.print_error as f64,
        wifi_signal: coerce(&print.wifi_signal.replace(SIGNAL_UNIT, "")),
        big_fan1_speed: coerce(&print.big_fan1_speed),
        big_fan2_speed: coerce(&print.big_fan2_speed),
        cooling_fan_speed: coerce(&print.cooling_fan_speed),
        heatbreak_fan_speed: coerce(&print.heatbreak_fan_speed),
        fan_gear: print.fan_gear as f64,
        chamber_temper: print.chamber_temper,
        bed_temper: print.bed_temper,
        bed_target_temper: print.bed_target_temper,
        nozzle_temper: print.nozzle_temper,
        nozzle_target_temper: print.nozzle_target_temper,
        mc_percent: print.mc_percent as f64,
        mc_print_error_code: coerce(&print.mc_print_error_code),
        mc_print_stage: coerce(&print.mc_print_stage),
        mc_print_sub_stage: print.mc_print_sub_stage as f64,
        mc_remaining_time: print.mc_remaining_time as f64,
        fail_reason: coerce(&print.fail_reason),
        gcode_state: print.gcode_state,
        ams: print.ams.ams.into_iter().map(ams_unit).collect(),
    }))
}

fn ams_unit(raw: AmsReport) -> AmsUnit {
    AmsUnit {
        humidity: coerce(&raw.humidity),
        temperature: coerce(&raw.temp),
        trays: raw
            .tray
            .into_iter()
            .map(|t| Tray {
                bed_temperature: coerce(&t.bed_temp),
                color: t.tray_color,
                material: t.tray_type,
                remain: t.remain as f64,
            })
            .collect(),
    }
}

fn coerce(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

/// Renders a snapshot back into the printer's report shape.
///
/// Numeric-string fields are written as strings and the signal reading
/// regains its unit, so the output decodes to the same values.
pub fn encode_report(snapshot: &TelemetrySnapshot) -> serde_json::Result<Vec<u8>> {
    let print = PrintReport {
        ams: AmsSection {
            ams: snapshot
                .ams
                .iter()
                .enumerate()
                .map(|(i, unit)| AmsReport {
                    id: i.to_string(),
                    humidity: unit.humidity.to_string(),
                    temp: unit.temperature.to_string(),
                    tray: unit
                        .trays
                        .iter()
                        .enumerate()
                        .map(|(j, tray)| TrayReport {
                            id: j.to_string(),
                            bed_temp: tray.bed_temperature.to_string(),
                            tray_color: tray.color.clone(),
                            tray_type: tray.material.clone(),
                            remain: tray.remain as i64,
                        })
                        .collect(),
                })
                .collect(),
        },
        bed_target_temper: snapshot.bed_target_temper,
        bed_temper: snapshot.bed_temper,
        big_fan1_speed: snapshot.big_fan1_speed.to_string(),
        big_fan2_speed: snapshot.big_fan2_speed.to_string(),
        chamber_temper: snapshot.chamber_temper,
        cooling_fan_speed: snapshot.cooling_fan_speed.to_string(),
        fail_reason: snapshot.fail_reason.to_string(),
        fan_gear: snapshot.fan_gear as i64,
        gcode_state: snapshot.gcode_state.clone(),
        heatbreak_fan_speed: snapshot.heatbreak_fan_speed.to_string(),
        layer_num: snapshot.layer_number as i64,
        mc_percent: snapshot.mc_percent as i64,
        mc_print_error_code: snapshot.mc_print_error_code.to_string(),
        mc_print_stage: snapshot.mc_print_stage.to_string(),
        mc_print_sub_stage: snapshot.mc_print_sub_stage as i64,
        mc_remaining_time: snapshot.mc_remaining_time as i64,
        nozzle_target_temper: snapshot.nozzle_target_temper,
        nozzle_temper: snapshot.nozzle_temper,
        print_error: snapshot.print_error as i64,
        total_layer_num: snapshot.total_layer_number as i64,
        wifi_signal: format!("{}{SIGNAL_UNIT}", snapshot.wifi_signal),
    };
    serde_json::to_vec(&DeviceReport { print })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted,
    Ignored,
    Malformed,
}

/// Delivery-side entry point: decodes a payload and stores the result.
#[derive(Clone)]
pub struct ReportHandler {
    store: SnapshotStore,
    health: HealthTracker,
}

impl ReportHandler {
    pub fn new(store: SnapshotStore, health: HealthTracker) -> Self {
        Self { store, health }
    }

    pub fn handle(&self, payload: &[u8]) -> IngestOutcome {
        let outcome = match decode(payload) {
            Ok(Some(snapshot)) => {
                debug!(
                    ams_units = snapshot.ams.len(),
                    trays = snapshot.tray_count(),
                    "report accepted"
                );
                self.store.write(snapshot);
                IngestOutcome::Accepted
            }
            Ok(None) => {
                trace!(bytes = payload.len(), "report without signal reading ignored");
                IngestOutcome::Ignored
            }
            Err(e) => {
                debug!(bytes = payload.len(), error = %e, "dropping report");
                IngestOutcome::Malformed
            }
        };
        self.health.record_report(outcome);
        outcome
    }

    pub fn into_delivery(self) -> DeliveryHandler {
        Arc::new(move |payload: &[u8]| {
            self.handle(payload);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "print": {
            "ams": {
                "ams": [
                    {"id": "0", "humidity": "4", "temp": "24.6", "tray": [
                        {"id": "0", "bed_temp": "55", "tray_color": "FF6A13FF", "tray_type": "PLA", "remain": 80},
                        {"id": "1", "bed_temp": "70", "tray_color": "000000FF", "tray_type": "PETG", "remain": -1}
                    ]},
                    {"id": "1", "humidity": "5", "temp": "25.1", "tray": []}
                ],
                "tray_now": "0"
            },
            "big_fan1_speed": "50",
            "big_fan2_speed": "0",
            "bed_temper": 54.9,
            "bed_target_temper": 55.0,
            "chamber_temper": 31.5,
            "cooling_fan_speed": "15",
            "fail_reason": "0",
            "fan_gear": 13,
            "gcode_state": "RUNNING",
            "heatbreak_fan_speed": "10",
            "layer_num": 42,
            "total_layer_num": 120,
            "mc_percent": 35,
            "mc_print_error_code": "0",
            "mc_print_stage": "2",
            "mc_print_sub_stage": 0,
            "mc_remaining_time": 87,
            "nozzle_temper": 219.8,
            "nozzle_target_temper": 220.0,
            "print_error": 0,
            "wifi_signal": "-59dBm",
            "ipcam": {"timelapse": "disable"},
            "lights_report": [{"node": "chamber_light", "mode": "on"}]
        }
    }"#;

    #[test]
    fn test_decode_full_report() {
        let snap = decode(REPORT.as_bytes()).unwrap().unwrap();
        assert_eq!(snap.wifi_signal, -59.0);
        assert_eq!(snap.big_fan1_speed, 50.0);
        assert_eq!(snap.cooling_fan_speed, 15.0);
        assert_eq!(snap.heatbreak_fan_speed, 10.0);
        assert_eq!(snap.fan_gear, 13.0);
        assert_eq!(snap.layer_number, 42.0);
        assert_eq!(snap.total_layer_number, 120.0);
        assert_eq!(snap.chamber_temper, 31.5);
        assert_eq!(snap.nozzle_temper, 219.8);
        assert_eq!(snap.nozzle_target_temper, 220.0);
        assert_eq!(snap.mc_percent, 35.0);
        assert_eq!(snap.mc_print_stage, 2.0);
        assert_eq!(snap.mc_remaining_time, 87.0);
        assert_eq!(snap.gcode_state, "RUNNING");

        assert_eq!(snap.ams.len(), 2);
        assert_eq!(snap.ams[0].humidity, 4.0);
        assert_eq!(snap.ams[1].temperature, 25.1);
        assert_eq!(snap.ams[0].trays[1].material, "PETG");
        assert_eq!(snap.ams[0].trays[1].bed_temperature, 70.0);
        assert_eq!(snap.ams[0].trays[0].remain, 80.0);
        assert!(snap.ams[1].trays.is_empty());
    }

    #[test]
    fn test_empty_signal_is_not_a_report() {
        let payload = br#"{"print": {"wifi_signal": "", "layer_num": 5}}"#;
        assert!(decode(payload).unwrap().is_none());
    }

    #[test]
    fn test_absent_print_section_is_not_a_report() {
        assert!(decode(br#"{"info": {"command": "get_version"}}"#).unwrap().is_none());
        assert!(decode(b"{}").unwrap().is_none());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(decode(b"{\"print\": {").is_err());
        assert!(decode(b"not json").is_err());
        assert!(decode(b"[1, 2, 3]").is_err());
        assert!(decode(br#"{"print": "offline"}"#).is_err());
    }

    #[test]
    fn test_bad_field_defaults_to_zero() {
        let payload = br#"{"print": {"wifi_signal": "-48dBm", "big_fan1_speed": "fast",
            "cooling_fan_speed": "30", "mc_print_stage": ""}}"#;
        let snap = decode(payload).unwrap().unwrap();
        assert_eq!(snap.big_fan1_speed, 0.0);
        assert_eq!(snap.mc_print_stage, 0.0);
        assert_eq!(snap.cooling_fan_speed, 30.0);
        assert_eq!(snap.wifi_signal, -48.0);
    }

    #[test]
    fn test_unparsable_signal_still_accepted() {
        let snap = decode(br#"{"print": {"wifi_signal": "weak"}}"#).unwrap().unwrap();
        assert_eq!(snap.wifi_signal, 0.0);
    }

    #[test]
    fn test_numbers_where_strings_expected() {
        let payload = br#"{"print": {"wifi_signal": "-70dBm", "big_fan1_speed": 50, "layer_num": "12"}}"#;
        let snap = decode(payload).unwrap().unwrap();
        assert_eq!(snap.big_fan1_speed, 50.0);
        assert_eq!(snap.layer_number, 12.0);
    }

    #[test]
    fn test_round_trip() {
        let original = decode(REPORT.as_bytes()).unwrap().unwrap();
        let encoded = encode_report(&original).unwrap();
        let decoded = decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, original);

        let raw: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw["print"]["wifi_signal"], "-59dBm");
        assert_eq!(raw["print"]["big_fan1_speed"], "50");
    }

    #[test]
    fn test_handler_writes_and_ignores() {
        let store = SnapshotStore::new();
        let health = HealthTracker::new();
        let handler = ReportHandler::new(store.clone(), health.clone());

        assert_eq!(handler.handle(REPORT.as_bytes()), IngestOutcome::Accepted);
        let before = store.read().unwrap();

        assert_eq!(
            handler.handle(br#"{"print": {"wifi_signal": "", "layer_num": 99}}"#),
            IngestOutcome::Ignored
        );
        assert_eq!(handler.handle(b"{garbage"), IngestOutcome::Malformed);

        let after = store.read().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.layer_number, 42.0);

        let counts = health.get_health(&store);
        assert_eq!(counts.reports_accepted, 1);
        assert_eq!(counts.reports_ignored, 1);
        assert_eq!(counts.reports_malformed, 1);
    }

    #[test]
    fn test_delivery_closure_feeds_store() {
        let store = SnapshotStore::new();
        let deliver = ReportHandler::new(store.clone(), HealthTracker::new()).into_delivery();
        deliver(br#"{"print": {"wifi_signal": "-33dBm"}}"#);
        assert_eq!(store.read().unwrap().wifi_signal, -33.0);
    }
}
