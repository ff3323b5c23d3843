// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What a diagnostic record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    PoolStats,
    ResourceUsage,
    LimitsAdjusted,
    Transition,
    TransitionRejected,
    StingerStarted,
    StingerStopped,
    NoteSkipped,
    NotesShed,
    Degraded,
    Recovered,
    Crossfade,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::PoolStats => "pool_stats",
            RecordKind::ResourceUsage => "resource_usage",
            RecordKind::LimitsAdjusted => "limits_adjusted",
            RecordKind::Transition => "transition",
            RecordKind::TransitionRejected => "transition_rejected",
            RecordKind::StingerStarted => "stinger_started",
            RecordKind::StingerStopped => "stinger_stopped",
            RecordKind::NoteSkipped => "note_skipped",
            RecordKind::NotesShed => "notes_shed",
            RecordKind::Degraded => "degraded",
            RecordKind::Recovered => "recovered",
            RecordKind::Crossfade => "crossfade",
        };
        write!(f, "{}", name)
    }
}

/// A structured record for an external observability layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    /// Seconds on the engine clock.
    pub timestamp: f64,
    pub kind: RecordKind,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<&'static str, String>,
    pub payload: BTreeMap<&'static str, f64>,
}

impl DiagnosticRecord {
    pub fn new(now: Duration, kind: RecordKind) -> DiagnosticRecord {
        DiagnosticRecord {
            timestamp: now.as_secs_f64(),
            kind,
            labels: BTreeMap::new(),
            payload: BTreeMap::new(),
        }
    }

    pub fn value(mut self, name: &'static str, value: f64) -> DiagnosticRecord {
        self.payload.insert(name, value);
        self
    }

    pub fn label(mut self, name: &'static str, value: impl Into<String>) -> DiagnosticRecord {
        self.labels.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.payload.get(name).copied()
    }
}

/// Receives the engine's diagnostic records.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, record: DiagnosticRecord);
}

/// Emits records as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, record: DiagnosticRecord) {
        let kind = record.kind;
        match kind {
            RecordKind::Degraded | RecordKind::LimitsAdjusted | RecordKind::TransitionRejected => {
                warn!(
                    timestamp = record.timestamp,
                    kind = %kind,
                    labels = ?record.labels,
                    payload = ?record.payload,
                    "Diagnostics"
                )
            }
            RecordKind::Transition | RecordKind::Recovered => info!(
                timestamp = record.timestamp,
                kind = %kind,
                labels = ?record.labels,
                payload = ?record.payload,
                "Diagnostics"
            ),
            _ => debug!(
                timestamp = record.timestamp,
                kind = %kind,
                labels = ?record.labels,
                payload = ?record.payload,
                "Diagnostics"
            ),
        }
    }
}

/// Keeps every record in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryDiagnostics {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl MemoryDiagnostics {
    pub fn new() -> MemoryDiagnostics {
        MemoryDiagnostics::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }

    pub fn of_kind(&self, kind: RecordKind) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.records.lock())
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn record(&self, record: DiagnosticRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{DiagnosticRecord, DiagnosticsSink, MemoryDiagnostics, RecordKind};

    #[test]
    fn test_memory_diagnostics() {
        let diagnostics = MemoryDiagnostics::new();
        let shared = diagnostics.clone();
        shared.record(
            DiagnosticRecord::new(Duration::from_millis(1500), RecordKind::PoolStats)
                .value("hit_rate", 0.5),
        );
        shared.record(
            DiagnosticRecord::new(Duration::from_secs(2), RecordKind::Transition)
                .label("from", "silence")
                .label("to", "forest")
                .value("progress", 0.0),
        );

        assert_eq!(2, diagnostics.records().len());
        let stats = diagnostics.of_kind(RecordKind::PoolStats);
        assert_eq!(1.5, stats[0].timestamp);
        assert_eq!(Some(0.5), stats[0].get("hit_rate"));
        assert_eq!(None, stats[0].get("misses"));

        let json: serde_json::Value =
            serde_json::from_str(&diagnostics.to_json().unwrap()).unwrap();
        assert_eq!("pool_stats", json[0]["kind"]);
        assert!(json[0].get("labels").is_none());
        assert_eq!("forest", json[1]["labels"]["to"]);
        assert_eq!(0.5, json[0]["payload"]["hit_rate"]);

        diagnostics.clear();
        assert!(shared.records().is_empty());
    }
}
