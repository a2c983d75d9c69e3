//! Transient-error classifier (C10, spec §4.10). Pluggable: a caller can
//! supply a custom classifier for non-default error catalogues.

use sqlrt_core::Error;

/// SQL Server error numbers the default classifier treats as retryable.
const DEADLOCK_VICTIM: i32 = 1205;
const CLIENT_TIMEOUT: i32 = -2;
const NETWORK_FAMILY: [i32; 5] = [53, 233, 10053, 10054, 10060];
const AZURE_THROTTLING_FAMILY: [i32; 4] = [40613, 40197, 40501, 49918];

pub trait TransientClassifier: Send + Sync {
    fn is_transient(&self, error: &Error) -> bool;

    /// Whether this specific error calls for deadlock-priority elevation
    /// on the next retry (spec §4.10: a 1205 retried against a still-open
    /// connection issues `SET DEADLOCK_PRIORITY HIGH` first).
    fn is_deadlock(&self, error: &Error) -> bool {
        error.sql_error_number() == Some(DEADLOCK_VICTIM)
    }
}

/// The default classifier (spec §4.10's default set).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl TransientClassifier for DefaultClassifier {
    fn is_transient(&self, error: &Error) -> bool {
        // Cancellation is never transient — a caller-driven cancel bypasses
        // retry regardless of what caused it.
        if matches!(error, Error::Cancelled) {
            return false;
        }
        if matches!(error, Error::Transient { .. }) {
            return true;
        }
        match error.sql_error_number() {
            Some(DEADLOCK_VICTIM) | Some(CLIENT_TIMEOUT) => true,
            Some(n) if NETWORK_FAMILY.contains(&n) => true,
            Some(n) if AZURE_THROTTLING_FAMILY.contains(&n) => true,
            _ => false,
        }
    }
}
