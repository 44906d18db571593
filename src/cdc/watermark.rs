//! Raise-only per-table timestamp floors.

use std::{collections::HashMap, sync::Mutex};

use crate::{
    events::{Event, Reporter},
    mutation::TableId,
};

/// Per-table floor below which mutations are considered already handled.
///
/// Floors only rise. A mutation at or below its table's floor is stale:
/// either it was already published or the pipeline has moved past it.
pub struct Watermarker {
    floors: Mutex<HashMap<TableId, i64>>,
}

impl Watermarker {
    /// Watermarker with no floors set.
    pub fn new() -> Self {
        Self {
            floors: Mutex::new(HashMap::new()),
        }
    }

    /// Current floor for `table`, if one has been set.
    pub fn floor(&self, table: TableId) -> Option<i64> {
        self.lock().get(&table).copied()
    }

    /// Whether a mutation at `timestamp_micros` is at or below the floor.
    pub fn is_stale(&self, table: TableId, timestamp_micros: i64) -> bool {
        self.floor(table)
            .is_some_and(|floor| timestamp_micros <= floor)
    }

    /// Raise the floor for `table` to `timestamp_micros`. Lower values are
    /// ignored; returns whether the floor moved.
    pub fn advance(
        &self,
        table: TableId,
        timestamp_micros: i64,
        reporter: &dyn Reporter,
    ) -> bool {
        let advanced = {
            let mut floors = self.lock();
            let floor = floors.entry(table).or_insert(i64::MIN);
            if timestamp_micros > *floor {
                *floor = timestamp_micros;
                true
            } else {
                false
            }
        };
        if advanced {
            reporter.report(Event::WatermarkAdvanced {
                table,
                timestamp_micros,
            });
        }
        advanced
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TableId, i64>> {
        // Floor updates cannot panic while holding the lock, so a poisoned
        // mutex still holds consistent data.
        match self.floors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for Watermarker {
    fn default() -> Self {
        Self::new()
    }
}
