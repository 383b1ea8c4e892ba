use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::config::{ConfigStore, ConfigurationError, ProvisioningSource, resolve};
use crate::provisioning::{ProvisioningError, TotpSpec, parse_provisioning_uri};
use crate::totp::VerificationResult;

/// Error type for engine operations.
///
/// Both variants are fatal to the calling flow: no code can be generated
/// or validated without a usable parameter set. Candidate mismatches are
/// never reported here — they come back as a negative
/// [`VerificationResult`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No resolvable provisioning source
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Provisioning string present but unusable
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

/// TOTP engine owning one provisioning source and a cached parameter set.
///
/// The provisioning string is resolved and parsed lazily on first use and
/// the parsed [`TotpSpec`] is reused until [`refresh`](Self::refresh)
/// discards it. Safe to share across concurrent callers; the cache slot
/// is lock-guarded and a half-constructed spec is never observable.
pub struct TotpEngine<S: ConfigStore> {
    store: S,
    source: ProvisioningSource,
    cached: Mutex<Option<Arc<TotpSpec>>>,
}

impl<S: ConfigStore> TotpEngine<S> {
    /// Create an engine over a configuration store and provisioning source
    pub fn new(store: S, source: ProvisioningSource) -> Self {
        Self {
            store,
            source,
            cached: Mutex::new(None),
        }
    }

    /// Generate the code for the time step containing `at`
    pub fn code_at(&self, at: SystemTime) -> Result<String, EngineError> {
        Ok(self.spec()?.code_at(at))
    }

    /// Generate the currently valid code
    pub fn code(&self) -> Result<String, EngineError> {
        self.code_at(SystemTime::now())
    }

    /// Verify a candidate code against the window of steps around `at`
    pub fn verify_at(
        &self,
        candidate: &str,
        window: u32,
        at: SystemTime,
    ) -> Result<VerificationResult, EngineError> {
        Ok(self.spec()?.verify_at(candidate, window, at))
    }

    /// Verify a candidate code against the window around the current instant
    pub fn verify(&self, candidate: &str, window: u32) -> Result<VerificationResult, EngineError> {
        self.verify_at(candidate, window, SystemTime::now())
    }

    /// Boolean shorthand for [`verify_at`](Self::verify_at)
    pub fn verify_bool_at(
        &self,
        candidate: &str,
        window: u32,
        at: SystemTime,
    ) -> Result<bool, EngineError> {
        Ok(self.verify_at(candidate, window, at)?.ok)
    }

    /// Boolean shorthand for [`verify`](Self::verify)
    pub fn verify_bool(&self, candidate: &str, window: u32) -> Result<bool, EngineError> {
        Ok(self.verify(candidate, window)?.ok)
    }

    /// Discard the cached parameter set.
    ///
    /// The next generate or validate call re-resolves the provisioning
    /// source and re-parses it, picking up configuration changed at
    /// runtime. This is the only mutator of the cache slot.
    pub fn refresh(&self) {
        tracing::debug!(source = %self.source.describe(), "discarding cached TOTP parameters");
        *self.lock() = None;
    }

    /// Cached spec, resolving and parsing it under the lock if absent
    fn spec(&self) -> Result<Arc<TotpSpec>, EngineError> {
        let mut slot = self.lock();
        if let Some(spec) = slot.as_ref() {
            return Ok(Arc::clone(spec));
        }
        let raw = resolve(&self.source, &self.store)?;
        let spec = Arc::new(parse_provisioning_uri(&raw)?);
        tracing::debug!(
            source = %self.source.describe(),
            algorithm = %spec.algorithm,
            digits = spec.digits,
            period = spec.period,
            "resolved TOTP provisioning parameters",
        );
        *slot = Some(Arc::clone(&spec));
        Ok(spec)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<TotpSpec>>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::totp::{DEFAULT_WINDOW, REASON_NO_MATCH};
    use std::time::Duration;

    const URI: &str = "otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&issuer=Acme";
    const OTHER_URI: &str = "otpauth://totp/Acme:alice?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn at(unix: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(unix)
    }

    fn engine_with_key(uri: &str) -> (TotpEngine<MemoryStore>, &'static str) {
        let store = MemoryStore::new();
        store.set("LOGIN_OTP_URI", uri);
        (
            TotpEngine::new(store, ProvisioningSource::key("LOGIN_OTP_URI")),
            "LOGIN_OTP_URI",
        )
    }

    #[test]
    fn generates_from_literal_source() {
        let engine = TotpEngine::new(MemoryStore::new(), ProvisioningSource::literal(URI));
        assert_eq!(engine.code_at(at(59)).unwrap(), "996554");
    }

    #[test]
    fn generates_from_key_source() {
        let (engine, _) = engine_with_key(URI);
        assert_eq!(engine.code_at(at(1_000_000_000)).unwrap(), "949556");
    }

    #[test]
    fn verify_and_bool_agree() {
        let (engine, _) = engine_with_key(URI);
        let t = at(1_000_000_000);
        let code = engine.code_at(t).unwrap();
        let result = engine.verify_at(&code, DEFAULT_WINDOW, t).unwrap();
        assert!(result.ok);
        assert_eq!(result.delta, Some(0));
        assert!(engine.verify_bool_at(&code, DEFAULT_WINDOW, t).unwrap());
        assert!(!engine.verify_bool_at("000000", 0, t).unwrap());
    }

    #[test]
    fn non_match_is_data_not_error() {
        let (engine, _) = engine_with_key(URI);
        let result = engine.verify_at("000001", 0, at(1_000_000_000)).unwrap();
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some(REASON_NO_MATCH));
    }

    #[test]
    fn missing_source_is_a_configuration_error() {
        let engine = TotpEngine::new(MemoryStore::new(), ProvisioningSource::key("ABSENT"));
        assert!(matches!(
            engine.code(),
            Err(EngineError::Configuration(ConfigurationError::MissingKey(_)))
        ));
    }

    #[test]
    fn malformed_secret_fails_on_first_use() {
        let store = MemoryStore::new();
        store.set("K", "otpauth://totp/alice?secret=!!!notbase32");
        let engine = TotpEngine::new(store, ProvisioningSource::key("K"));
        assert!(matches!(
            engine.code(),
            Err(EngineError::Provisioning(ProvisioningError::InvalidSecret(_)))
        ));
    }

    #[test]
    fn hotp_uri_is_unsupported() {
        let engine = TotpEngine::new(
            MemoryStore::new(),
            ProvisioningSource::literal("otpauth://hotp/alice?secret=JBSWY3DPEHPK3PXP"),
        );
        assert!(matches!(
            engine.code(),
            Err(EngineError::Provisioning(ProvisioningError::UnsupportedType(_)))
        ));
    }

    #[test]
    fn store_change_is_observed_only_after_refresh() {
        let (engine, key) = engine_with_key(URI);
        let t = at(59);
        assert_eq!(engine.code_at(t).unwrap(), "996554");

        engine.store.set(key, OTHER_URI);
        // Still the cached spec
        assert_eq!(engine.code_at(t).unwrap(), "996554");

        engine.refresh();
        // GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ at t=59, 6 digits
        assert_eq!(engine.code_at(t).unwrap(), "287082");
    }

    #[test]
    fn refresh_without_change_keeps_working() {
        let (engine, _) = engine_with_key(URI);
        assert_eq!(engine.code_at(at(59)).unwrap(), "996554");
        engine.refresh();
        assert_eq!(engine.code_at(at(59)).unwrap(), "996554");
    }

    #[test]
    fn refresh_does_not_resolve_eagerly() {
        let (engine, key) = engine_with_key(URI);
        engine.store.remove(key);
        // refresh only clears the slot; the missing key surfaces on next use
        engine.refresh();
        assert!(engine.code().is_err());
    }

    #[test]
    fn concurrent_callers_share_one_spec() {
        let (engine, _) = engine_with_key(URI);
        let engine = Arc::new(engine);
        let t = at(1_000_000_000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.code_at(t).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "949556");
        }
    }
}
