use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use ctf_core::{CtfError, CtfValue};

use crate::helpers::value_path::{assign_path, read_path};

/// Read access to the latest telemetry of a target.
pub trait TelemetrySource: Send + Sync {
    fn tlm_value(
        &self,
        mid: &str,
        path: &str,
        is_header: bool,
        target: Option<&str>,
    ) -> Result<CtfValue, CtfError>;
}

/// An inbound telemetry channel drained once per poll cycle.
pub trait TelemetryLink: Send + Sync {
    /// Moves pending packets into the readable view and returns how many
    /// were consumed.
    fn read_packets(&self) -> Result<usize, CtfError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPacket {
    pub target: String,
    pub mid: String,
    pub header: CtfValue,
    pub payload: CtfValue,
}

#[derive(Debug, Default)]
struct CacheState {
    inbox: Vec<TelemetryPacket>,
    latest: BTreeMap<(String, String), TelemetryPacket>,
}

/// Latest-value telemetry store. Receivers `enqueue` from any thread;
/// packets become readable after the next `read_packets`.
#[derive(Debug, Default)]
pub struct TelemetryCache {
    state: Mutex<CacheState>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn enqueue(&self, packet: TelemetryPacket) {
        self.state().inbox.push(packet);
    }

    pub fn pending(&self) -> usize {
        self.state().inbox.len()
    }

    /// Overwrites one field of the latest payload for `(target, mid)`.
    pub fn update_field(
        &self,
        target: &str,
        mid: &str,
        path: &str,
        value: CtfValue,
    ) -> Result<(), CtfError> {
        let mut state = self.state();
        let packet = state
            .latest
            .get_mut(&(target.to_string(), mid.to_string()))
            .ok_or_else(|| no_packet(mid, Some(target)))?;
        assign_path(&mut packet.payload, path, value)
    }
}

impl TelemetryLink for TelemetryCache {
    fn read_packets(&self) -> Result<usize, CtfError> {
        let mut state = self.state();
        let inbox = std::mem::take(&mut state.inbox);
        let count = inbox.len();
        for packet in inbox {
            state
                .latest
                .insert((packet.target.clone(), packet.mid.clone()), packet);
        }
        if count > 0 {
            log::debug!("Received {} telemetry packets", count);
        }
        Ok(count)
    }
}

impl TelemetrySource for TelemetryCache {
    fn tlm_value(
        &self,
        mid: &str,
        path: &str,
        is_header: bool,
        target: Option<&str>,
    ) -> Result<CtfValue, CtfError> {
        let state = self.state();
        let packet = match target {
            Some(target) => state.latest.get(&(target.to_string(), mid.to_string())),
            None => state.latest.values().find(|packet| packet.mid == mid),
        }
        .ok_or_else(|| no_packet(mid, target))?;

        let root = if is_header {
            &packet.header
        } else {
            &packet.payload
        };
        read_path(root, path).cloned()
    }
}

fn no_packet(mid: &str, target: Option<&str>) -> CtfError {
    CtfError::new(
        "TELEMETRY_NO_PACKET",
        match target {
            Some(target) => format!("No telemetry received for {} from {}.", mid, target),
            None => format!("No telemetry received for {}.", mid),
        },
    )
}

#[cfg(test)]
mod telemetry_tests {
    use super::*;

    fn packet(target: &str, mid: &str, counter: i64) -> TelemetryPacket {
        TelemetryPacket {
            target: target.to_string(),
            mid: mid.to_string(),
            header: serde_json::from_str(r#"{"Seq": 3}"#).expect("header"),
            payload: serde_json::from_value(serde_json::json!({
                "CommandCounter": counter,
                "Apps": [{"Name": "SAMPLE"}]
            }))
            .expect("payload"),
        }
    }

    #[test]
    fn packets_are_visible_only_after_draining() {
        let cache = TelemetryCache::new();
        cache.enqueue(packet("cfs", "HK", 1));
        assert_eq!(cache.pending(), 1);
        assert!(cache.tlm_value("HK", "CommandCounter", false, None).is_err());

        assert_eq!(cache.read_packets().expect("drain"), 1);
        assert_eq!(
            cache
                .tlm_value("HK", "CommandCounter", false, Some("cfs"))
                .expect("value"),
            CtfValue::Int(1)
        );
        assert_eq!(
            cache.tlm_value("HK", "Seq", true, None).expect("header"),
            CtfValue::Int(3)
        );
        assert_eq!(
            cache.tlm_value("HK", "Apps[0].Name", false, None).expect("nested"),
            CtfValue::from("SAMPLE")
        );
    }

    #[test]
    fn latest_packet_wins_and_fields_can_be_patched() {
        let cache = TelemetryCache::new();
        cache.enqueue(packet("cfs", "HK", 1));
        cache.enqueue(packet("cfs", "HK", 2));
        cache.read_packets().expect("drain");
        assert_eq!(
            cache.tlm_value("HK", "CommandCounter", false, None).expect("value"),
            CtfValue::Int(2)
        );

        cache
            .update_field("cfs", "HK", "Apps[0].Name", CtfValue::from("CI"))
            .expect("patch");
        assert_eq!(
            cache.tlm_value("HK", "Apps[0].Name", false, None).expect("value"),
            CtfValue::from("CI")
        );

        let error = cache
            .update_field("other", "HK", "CommandCounter", CtfValue::Int(0))
            .expect_err("unknown target");
        assert_eq!(error.code, "TELEMETRY_NO_PACKET");
    }
}
