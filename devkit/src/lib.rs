/*!
# bambu-devkit

Test tooling for the exporter:
- a mock MQTT transport that counts sessions and scripts deliveries
- report payload fixtures
- a scrape harness wired to the real collector and HTTP router
*/

pub mod mqtt_stub;
pub mod report_builder;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockTransport};
pub use report_builder::{report_for, ReportBuilder, REPORT_TOPIC, REQUEST_TOPIC};
pub use test_utils::{count, init_tracing, value_of, FailingSink, PanickingSink, ScrapeHarness};
