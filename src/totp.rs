use std::time::SystemTime;

use compact_str::CompactString;
use ring::{constant_time, hmac};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize_token;
use crate::provisioning::TotpSpec;

/// Default number of adjacent time steps accepted on either side of the
/// current one during verification
pub const DEFAULT_WINDOW: u32 = 1;

/// Rejection reason for candidates that are empty or not digit-shaped
/// after normalization
pub const REASON_MALFORMED_CANDIDATE: &str = "empty or non-numeric-shaped";

/// Rejection reason when no step in the window produced the candidate
pub const REASON_NO_MATCH: &str = "no match within window";

/// Outcome of verifying a candidate code. Always returned as data;
/// a non-match is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the candidate matched some step in the window
    pub ok: bool,
    /// Signed step offset of the match relative to the current step
    /// (0 = exact, -1 = previous step); `None` when `ok` is false
    pub delta: Option<i64>,
    /// Why the candidate was rejected; `None` when `ok` is true
    pub reason: Option<CompactString>,
}

impl VerificationResult {
    fn matched(delta: i64) -> Self {
        Self { ok: true, delta: Some(delta), reason: None }
    }

    fn rejected(reason: &'static str) -> Self {
        Self { ok: false, delta: None, reason: Some(reason.into()) }
    }
}

impl TotpSpec {
    /// Generate the code for the time step containing `at`.
    ///
    /// RFC 6238 derivation: HMAC over the 8-byte big-endian step counter,
    /// RFC 4226 dynamic truncation, reduced modulo `10^digits` and
    /// zero-padded to exactly `digits` characters. Deterministic for a
    /// fixed spec and instant.
    pub fn code_at(&self, at: SystemTime) -> String {
        self.code_for_step(self.step_at(at))
    }

    /// Generate the currently valid code
    pub fn code(&self) -> String {
        self.code_at(SystemTime::now())
    }

    /// Verify a candidate code against the window of time steps around `at`.
    ///
    /// The candidate is normalized first; steps are checked nearest-first
    /// with ties broken toward the earlier step (0, -1, +1, -2, +2, …),
    /// and codes are compared in constant time.
    pub fn verify_at(&self, candidate: &str, window: u32, at: SystemTime) -> VerificationResult {
        let token = normalize_token(candidate);
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return VerificationResult::rejected(REASON_MALFORMED_CANDIDATE);
        }

        let base = self.step_at(at) as i64;
        for delta in step_offsets(window) {
            let step = base + delta;
            if step < 0 {
                continue;
            }
            let expected = self.code_for_step(step as u64);
            if constant_time::verify_slices_are_equal(expected.as_bytes(), token.as_bytes())
                .is_ok()
            {
                return VerificationResult::matched(delta);
            }
        }
        VerificationResult::rejected(REASON_NO_MATCH)
    }

    /// Verify a candidate against the window around the current instant
    pub fn verify(&self, candidate: &str, window: u32) -> VerificationResult {
        self.verify_at(candidate, window, SystemTime::now())
    }

    /// Seconds left before the code for the step containing `at` expires
    pub fn seconds_remaining_at(&self, at: SystemTime) -> u64 {
        self.period - (unix_seconds(at) % self.period)
    }

    fn step_at(&self, at: SystemTime) -> u64 {
        unix_seconds(at) / self.period
    }

    fn code_for_step(&self, step: u64) -> String {
        let key = hmac::Key::new(self.algorithm.hmac_algorithm(), self.secret.as_ref());
        let tag = hmac::sign(&key, &step.to_be_bytes());
        let mac = tag.as_ref();

        // Dynamic truncation, RFC 4226 §5.3
        let offset = (mac[mac.len() - 1] & 0x0f) as usize;
        let binary = ((mac[offset] as u32 & 0x7f) << 24)
            | ((mac[offset + 1] as u32) << 16)
            | ((mac[offset + 2] as u32) << 8)
            | (mac[offset + 3] as u32);

        let code = binary as u64 % 10u64.pow(self.digits as u32);
        format!("{code:0>width$}", width = self.digits as usize)
    }
}

/// Offsets in verification order: 0, -1, +1, -2, +2, …
fn step_offsets(window: u32) -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=window as i64).flat_map(|d| [-d, d]))
}

/// Instants before the Unix epoch clamp to zero
fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
