//! Flow control (C2): signed 31-bit windows for the connection and for each
//! stream, per RFC 7540 §6.9.

use crate::error::ConnectionError;
use crate::types::U31_MAX;

/// A flow-control window. Kept as `i64` internally so that a SETTINGS-driven
/// shrink of `INITIAL_WINDOW_SIZE` can legally drive it negative (RFC 7540
/// §6.9.2) without overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    value: i64,
}

impl FlowWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            value: initial as i64,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Applies an outbound WINDOW_UPDATE increment, per spec.md C2 the
    /// caller has already checked `value <= U31_MAX` and the cumulative sum
    /// doesn't overflow a signed 32-bit window.
    pub fn increment(&mut self, amount: u32) -> Result<(), ConnectionError> {
        let new_value = self.value + amount as i64;
        if new_value > U31_MAX as i64 {
            return Err(ConnectionError::FlowControlError);
        }
        self.value = new_value;
        Ok(())
    }

    /// Consumes `amount` bytes of window for an outbound transmission.
    /// Returns `None` (do not send yet) if there isn't enough room.
    pub fn try_consume(&mut self, amount: u32) -> bool {
        if (amount as i64) > self.value {
            return false;
        }
        self.value -= amount as i64;
        true
    }

    /// Reduces the window by `amount` for inbound data already received
    /// (the window can go negative here only if the peer is misbehaving,
    /// which is checked by the caller before this is reached).
    pub fn consume_recv(&mut self, amount: u32) -> Result<(), ConnectionError> {
        if (amount as i64) > self.value {
            return Err(ConnectionError::FlowControlError);
        }
        self.value -= amount as i64;
        Ok(())
    }

    /// Shifts the window by a signed delta, used when a host explicitly
    /// grows its own receive window via `increment_flow_control_window`.
    pub fn shift(&mut self, delta: i64) {
        self.value += delta;
    }

    /// Shifts the window by a signed delta, rejecting the change if the
    /// result would exceed the legal 2^31-1 maximum. Used when
    /// INITIAL_WINDOW_SIZE changes retroactively resize every open stream's
    /// window (RFC 7540 §6.9.2), which must terminate the connection with
    /// FLOW_CONTROL_ERROR rather than silently wrap or grow unboundedly.
    pub fn try_shift(&mut self, delta: i64) -> Result<(), ConnectionError> {
        let new_value = self.value + delta;
        if new_value > U31_MAX as i64 {
            return Err(ConnectionError::FlowControlError);
        }
        self.value = new_value;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionFlow {
    pub send: FlowWindow,
    pub recv: FlowWindow,
}

impl ConnectionFlow {
    pub fn new(initial_send: u32, initial_recv: u32) -> Self {
        Self {
            send: FlowWindow::new(initial_send),
            recv: FlowWindow::new(initial_recv),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamFlow {
    pub send: FlowWindow,
    pub recv: FlowWindow,
}

impl StreamFlow {
    pub fn new(initial_send: u32, initial_recv: u32) -> Self {
        Self {
            send: FlowWindow::new(initial_send),
            recv: FlowWindow::new(initial_recv),
        }
    }
}

/// Checks (without mutating) whether `amount` bytes of DATA can be sent on
/// both the stream and connection windows, per spec.md C2's "both windows
/// must independently allow it" rule.
pub fn can_send(connection: &ConnectionFlow, stream: &StreamFlow, amount: u32) -> bool {
    connection.send.value() >= amount as i64 && stream.send.value() >= amount as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_rejects_overflow_past_u31_max() {
        let mut window = FlowWindow::new(U31_MAX);
        assert!(window.increment(1).is_err());
    }

    #[test]
    fn shift_can_drive_window_negative() {
        let mut window = FlowWindow::new(100);
        window.shift(-150);
        assert_eq!(window.value(), -50);
        assert!(!window.try_consume(1));
    }

    #[test]
    fn try_shift_rejects_growth_past_u31_max() {
        let mut window = FlowWindow::new(U31_MAX);
        assert!(window.try_shift(1).is_err());
        assert_eq!(window.value(), U31_MAX as i64);
    }

    #[test]
    fn try_shift_allows_a_shrink_that_drives_the_window_negative() {
        let mut window = FlowWindow::new(100);
        window.try_shift(-150).unwrap();
        assert_eq!(window.value(), -50);
    }

    #[test]
    fn can_send_requires_room_on_both_windows() {
        let connection = ConnectionFlow::new(10, 65_535);
        let stream = StreamFlow::new(100, 65_535);
        assert!(!can_send(&connection, &stream, 20));
        assert!(can_send(&connection, &stream, 10));
    }
}
