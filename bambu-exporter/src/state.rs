use crate::snapshot::TelemetrySnapshot;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use time::OffsetDateTime;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Debug, Clone)]
struct Stored {
    snapshot: Arc<TelemetrySnapshot>,
    received_at: OffsetDateTime,
}

/// Latest accepted snapshot, shared between the MQTT delivery task and
/// scrapes.
///
/// The whole snapshot sits behind one `Arc`: a write swaps the pointer and a
/// read clones it, so a reader holds either the previous report or the new
/// one in full, never a mix of both.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Option<Stored>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, snapshot: TelemetrySnapshot) {
        let stored = Stored {
            snapshot: Arc::new(snapshot),
            received_at: OffsetDateTime::now_utc(),
        };
        *self.current.write() = Some(stored);
    }

    /// `None` until the first report has been accepted.
    pub fn read(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.current.read().as_ref().map(|s| s.snapshot.clone())
    }

    /// Current snapshot together with the time it was accepted.
    pub fn read_with_time(&self) -> Option<(Arc<TelemetrySnapshot>, OffsetDateTime)> {
        self.current
            .read()
            .as_ref()
            .map(|s| (s.snapshot.clone(), s.received_at))
    }

    pub fn last_updated(&self) -> Option<OffsetDateTime> {
        self.current.read().as_ref().map(|s| s.received_at)
    }

    pub fn is_present(&self) -> bool {
        self.current.read().is_some()
    }
}
