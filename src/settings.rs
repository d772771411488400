//! SETTINGS registry (C1): local/remote parameter tables plus the pending
//! queue that correlates outbound SETTINGS frames with their ACKs.

use crate::error::ConnectionError;
use crate::types::SettingsParameter;
use enum_map::EnumMap;
use std::collections::VecDeque;

/// RFC 7540 §6.5.2 initial values, with MAX_CONCURRENT_STREAMS locally
/// capped at 100 per spec.md's resolved Open Question.
fn protocol_defaults() -> EnumMap<SettingsParameter, u32> {
    let mut defaults = EnumMap::default();
    defaults[SettingsParameter::HeaderTableSize] = 4_096;
    defaults[SettingsParameter::EnablePush] = 1;
    defaults[SettingsParameter::MaxConcurrentStreams] = u32::MAX;
    defaults[SettingsParameter::InitialWindowSize] = 65_535;
    defaults[SettingsParameter::MaxFrameSize] = 16_384;
    defaults[SettingsParameter::MaxHeaderListSize] = u32::MAX;
    defaults
}

fn local_defaults() -> EnumMap<SettingsParameter, u32> {
    let mut defaults = protocol_defaults();
    defaults[SettingsParameter::MaxConcurrentStreams] = 100;
    defaults
}

/// A batch of local settings this endpoint sent, awaiting the peer's ACK.
#[derive(Debug, Clone)]
pub struct PendingSettingsChange {
    pub seq: u64,
    pub values: Vec<(SettingsParameter, u32)>,
}

/// Side effects a connection must apply once a batch of local settings
/// takes effect on ACK, beyond updating the `local` table itself.
#[derive(Debug, Clone)]
pub struct AppliedSettingsChange {
    pub values: Vec<(SettingsParameter, u32)>,
    /// Delta to apply to every open stream's inbound flow-control window,
    /// per RFC 7540 §6.9.2, if this batch touched INITIAL_WINDOW_SIZE.
    pub initial_window_size_delta: Option<i64>,
    /// The new local HEADER_TABLE_SIZE, if this batch touched it. Bounds
    /// our own HPACK decoder once the peer has acknowledged it, so the
    /// decoder never accepts a dynamic table size update past what we
    /// promised to support.
    pub header_table_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SettingsRegistry {
    /// Values this endpoint has advertised (acknowledged or not).
    pub local: EnumMap<SettingsParameter, u32>,
    /// Values the peer has advertised to us; fully in effect once received.
    pub remote: EnumMap<SettingsParameter, u32>,
    pending: VecDeque<PendingSettingsChange>,
    next_seq: u64,
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self {
            local: local_defaults(),
            remote: protocol_defaults(),
            pending: VecDeque::new(),
            next_seq: 0,
        }
    }
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a local settings change to be sent, returning the frame
    /// payload to emit and the sequence number that will identify its ACK.
    pub fn update_local(&mut self, values: Vec<(SettingsParameter, u32)>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(PendingSettingsChange {
            seq,
            values,
        });
        seq
    }

    /// Applies the peer's SETTINGS frame to the remote table, validating
    /// each value per RFC 7540 §6.5.2. Returns the delta to apply to every
    /// open stream's outbound window if this batch changed
    /// INITIAL_WINDOW_SIZE (RFC 7540 §6.9.2): the peer is telling us the
    /// window it now uses to receive from us, retroactively resizing the
    /// window we send against on every stream already open.
    pub fn receive_remote_settings(
        &mut self,
        values: &[(SettingsParameter, u32)],
    ) -> Result<Option<i64>, ConnectionError> {
        for &(parameter, value) in values {
            validate_settings_value(parameter, value)?;
        }
        let initial_window_size_delta = values
            .iter()
            .find(|(parameter, _)| *parameter == SettingsParameter::InitialWindowSize)
            .map(|&(_, new)| new as i64 - self.remote[SettingsParameter::InitialWindowSize] as i64);
        for &(parameter, value) in values {
            self.remote[parameter] = value;
        }
        Ok(initial_window_size_delta)
    }

    /// Applies the oldest pending local change on receipt of an ACK,
    /// returning the settings that just took effect plus the side effects
    /// the connection must apply alongside the `local` table update.
    pub fn receive_ack(&mut self) -> Option<AppliedSettingsChange> {
        let change = self.pending.pop_front()?;
        let initial_window_size_delta = change
            .values
            .iter()
            .find(|(parameter, _)| *parameter == SettingsParameter::InitialWindowSize)
            .map(|&(_, new)| new as i64 - self.local[SettingsParameter::InitialWindowSize] as i64);
        let header_table_size = change
            .values
            .iter()
            .find(|(parameter, _)| *parameter == SettingsParameter::HeaderTableSize)
            .map(|&(_, new)| new);
        for &(parameter, value) in &change.values {
            self.local[parameter] = value;
        }
        Some(AppliedSettingsChange {
            values: change.values,
            initial_window_size_delta,
            header_table_size,
        })
    }

    pub fn has_pending_ack(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn validate_settings_value(parameter: SettingsParameter, value: u32) -> Result<(), ConnectionError> {
    let ok = match parameter {
        SettingsParameter::EnablePush => value == 0 || value == 1,
        SettingsParameter::InitialWindowSize => value <= crate::types::U31_MAX,
        SettingsParameter::MaxFrameSize => (16_384..=16_777_215).contains(&value),
        SettingsParameter::HeaderTableSize
        | SettingsParameter::MaxConcurrentStreams
        | SettingsParameter::MaxHeaderListSize => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ConnectionError::InvalidSettingsValue { parameter, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc_7540() {
        let registry = SettingsRegistry::new();
        assert_eq!(registry.remote[SettingsParameter::InitialWindowSize], 65_535);
        assert_eq!(registry.local[SettingsParameter::MaxConcurrentStreams], 100);
    }

    #[test]
    fn rejects_out_of_range_enable_push() {
        let mut registry = SettingsRegistry::new();
        let err = registry
            .receive_remote_settings(&[(SettingsParameter::EnablePush, 2)])
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidSettingsValue { .. }));
    }

    #[test]
    fn rejects_max_frame_size_below_floor() {
        let mut registry = SettingsRegistry::new();
        let err = registry
            .receive_remote_settings(&[(SettingsParameter::MaxFrameSize, 100)])
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidSettingsValue { .. }));
    }

    #[test]
    fn local_changes_apply_only_on_ack_in_fifo_order() {
        let mut registry = SettingsRegistry::new();
        registry.update_local(vec![(SettingsParameter::MaxConcurrentStreams, 10)]);
        registry.update_local(vec![(SettingsParameter::MaxConcurrentStreams, 20)]);
        assert_eq!(registry.local[SettingsParameter::MaxConcurrentStreams], 100);
        registry.receive_ack();
        assert_eq!(registry.local[SettingsParameter::MaxConcurrentStreams], 10);
        registry.receive_ack();
        assert_eq!(registry.local[SettingsParameter::MaxConcurrentStreams], 20);
    }

    #[test]
    fn remote_initial_window_size_change_reports_the_delta() {
        let mut registry = SettingsRegistry::new();
        let delta = registry
            .receive_remote_settings(&[(SettingsParameter::InitialWindowSize, 1_000)])
            .unwrap();
        assert_eq!(delta, Some(1_000 - 65_535));
    }

    #[test]
    fn remote_settings_without_initial_window_size_report_no_delta() {
        let mut registry = SettingsRegistry::new();
        let delta = registry
            .receive_remote_settings(&[(SettingsParameter::EnablePush, 0)])
            .unwrap();
        assert_eq!(delta, None);
    }

    #[test]
    fn ack_of_local_initial_window_size_and_header_table_size_reports_both_effects() {
        let mut registry = SettingsRegistry::new();
        registry.update_local(vec![
            (SettingsParameter::InitialWindowSize, 1_000),
            (SettingsParameter::HeaderTableSize, 2_048),
        ]);
        let applied = registry.receive_ack().unwrap();
        assert_eq!(applied.initial_window_size_delta, Some(1_000 - 65_535));
        assert_eq!(applied.header_table_size, Some(2_048));
    }
}
