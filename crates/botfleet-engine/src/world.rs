use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use botfleet_core::client::GameHandle;
use botfleet_core::world::{NearbyEntity, WorldSnapshot, WorldSnapshotProvider};
use botfleet_core::{FleetError, SessionId};
use botfleet_settings::WorldSettings;
use tracing::debug;

/// Sparse block scan around the session plus the nearest entities.
/// Requests arriving faster than `min_interval_ms` get the cached result.
pub struct ScanProvider {
    settings: WorldSettings,
    cache: Mutex<HashMap<SessionId, (Instant, WorldSnapshot)>>,
    scans: AtomicU64,
}

impl ScanProvider {
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
            scans: AtomicU64::new(0),
        }
    }

    /// Scans actually performed, cache hits excluded.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    fn scan(&self, handle: &dyn GameHandle) -> Result<WorldSnapshot, FleetError> {
        let vitals = handle.vitals();
        let position = vitals
            .position
            .ok_or_else(|| FleetError::Precondition("position not yet known".into()))?;
        let origin = position.block();
        let radius = self.settings.scan_radius;
        let stride = self.settings.scan_stride.max(1) as usize;

        let mut blocks = Vec::new();
        'scan: for dx in (-radius..=radius).step_by(stride) {
            for dz in (-radius..=radius).step_by(stride) {
                for dy in -1..=2 {
                    if blocks.len() >= self.settings.max_blocks {
                        break 'scan;
                    }
                    if let Some(block) = handle.block_at(origin.offset(dx, dy, dz)) {
                        if !block.is_air() {
                            blocks.push(block);
                        }
                    }
                }
            }
        }

        let mut entities: Vec<NearbyEntity> = handle
            .entities()
            .into_iter()
            .map(|entity| {
                let distance = position.distance_to(&entity.position);
                NearbyEntity { entity, distance }
            })
            .filter(|e| e.distance <= self.settings.entity_radius)
            .collect();
        entities.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        entities.truncate(self.settings.max_entities);

        Ok(WorldSnapshot {
            position,
            health: vitals.health,
            food: vitals.food,
            blocks,
            entities,
            captured_at: Utc::now(),
        })
    }
}

impl WorldSnapshotProvider for ScanProvider {
    fn snapshot(&self, session_id: &SessionId, handle: &dyn GameHandle) -> Result<WorldSnapshot, FleetError> {
        let min_interval = Duration::from_millis(self.settings.min_interval_ms);
        if let Some((at, snap)) = self.cache.lock().get(session_id) {
            if at.elapsed() < min_interval {
                return Ok(snap.clone());
            }
        }
        let snap = self.scan(handle)?;
        let scans = self.scans.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session_id = %session_id, blocks = snap.blocks.len(), entities = snap.entities.len(), scans, "world scanned");
        self.cache.lock().insert(session_id.clone(), (Instant::now(), snap.clone()));
        Ok(snap)
    }

    fn forget(&self, session_id: &SessionId) {
        self.cache.lock().remove(session_id);
    }
}
