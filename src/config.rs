use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use compact_str::CompactString;

/// Error type for configuration resolution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The literal provisioning value was blank
    #[error("literal provisioning value is blank")]
    BlankLiteral,

    /// The named configuration key is absent or resolves to an empty string
    #[error("configuration key `{0}` is missing or empty")]
    MissingKey(CompactString),

    /// The key is present but its value does not parse as the requested type
    #[error("configuration key `{key}` is not a valid {expected}")]
    InvalidValue {
        /// The offending key
        key: CompactString,
        /// Human-readable name of the expected type
        expected: &'static str,
    },
}

/// Synchronous key-to-string configuration lookup.
///
/// The provided accessors form a small closed set with explicit
/// required/default/trim semantics; implementors only supply [`raw`](Self::raw).
pub trait ConfigStore {
    /// Raw value for a key, exactly as stored
    fn raw(&self, key: &str) -> Option<String>;

    /// Trimmed value for a key; `None` when absent or blank
    fn string(&self, key: &str) -> Option<CompactString> {
        self.raw(key)
            .map(|v| CompactString::from(v.trim()))
            .filter(|v| !v.is_empty())
    }

    /// Trimmed value for a key, failing when absent or blank
    fn required(&self, key: &str) -> Result<CompactString, ConfigurationError> {
        self.string(key)
            .ok_or_else(|| ConfigurationError::MissingKey(key.into()))
    }

    /// Unsigned integer value for a key, with a default when absent
    fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigurationError> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigurationError::InvalidValue {
                key: key.into(),
                expected: "unsigned integer",
            }),
        }
    }

    /// Boolean value for a key, with a default when absent.
    ///
    /// Accepts `true`/`false`, `1`/`0`, `yes`/`no`, case-insensitively.
    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigurationError::InvalidValue {
                    key: key.into(),
                    expected: "boolean",
                }),
            },
        }
    }
}

/// Configuration store backed by the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStore;

impl ConfigStore for EnvStore {
    fn raw(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory configuration store, safe for concurrent readers and writers
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<CompactString, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value
    pub fn set(&self, key: impl Into<CompactString>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    /// Remove a key
    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CompactString, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigStore for MemoryStore {
    fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }
}

/// Where the provisioning string comes from: a literal value, or a named
/// key in an external configuration store. Exactly one, by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningSource {
    /// Directly supplied provisioning string
    Literal(CompactString),
    /// Name of the configuration key holding the provisioning string
    Key(CompactString),
}

impl ProvisioningSource {
    /// Source carrying the provisioning string itself
    pub fn literal(value: impl Into<CompactString>) -> Self {
        Self::Literal(value.into())
    }

    /// Source naming an external configuration key
    pub fn key(name: impl Into<CompactString>) -> Self {
        Self::Key(name.into())
    }

    /// Loggable description that never exposes a literal value
    pub fn describe(&self) -> CompactString {
        match self {
            Self::Literal(_) => CompactString::const_new("literal"),
            Self::Key(name) => compact_str::format_compact!("key `{name}`"),
        }
    }
}

/// Resolve the raw provisioning string for a source.
///
/// Literal values are trimmed and must be non-blank; key sources go
/// through the store's [`required`](ConfigStore::required) accessor.
/// No caching happens here, so a lookup after an engine refresh observes
/// current store state.
pub fn resolve(
    source: &ProvisioningSource,
    store: &impl ConfigStore,
) -> Result<CompactString, ConfigurationError> {
    match source {
        ProvisioningSource::Literal(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(ConfigurationError::BlankLiteral);
            }
            Ok(trimmed.into())
        }
        ProvisioningSource::Key(name) => store.required(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_trims_and_drops_blank() {
        let store = MemoryStore::new();
        store.set("A", "  value  ");
        store.set("B", "   ");
        assert_eq!(store.string("A").as_deref(), Some("value"));
        assert_eq!(store.string("B"), None);
        assert_eq!(store.string("C"), None);
    }

    #[test]
    fn required_fails_on_missing_or_blank() {
        let store = MemoryStore::new();
        store.set("BLANK", " ");
        assert_eq!(
            store.required("BLANK"),
            Err(ConfigurationError::MissingKey("BLANK".into()))
        );
        assert_eq!(
            store.required("ABSENT"),
            Err(ConfigurationError::MissingKey("ABSENT".into()))
        );
    }

    #[test]
    fn u64_accessor_default_and_parse() {
        let store = MemoryStore::new();
        store.set("N", "42");
        store.set("BAD", "forty-two");
        assert_eq!(store.u64_or("N", 7), Ok(42));
        assert_eq!(store.u64_or("ABSENT", 7), Ok(7));
        assert!(matches!(
            store.u64_or("BAD", 7),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn bool_accessor_accepted_spellings() {
        let store = MemoryStore::new();
        for (raw, expected) in [("true", true), ("YES", true), ("1", true), ("no", false)] {
            store.set("F", raw);
            assert_eq!(store.bool_or("F", false), Ok(expected), "raw {raw:?}");
        }
        store.set("F", "maybe");
        assert!(store.bool_or("F", false).is_err());
        assert_eq!(store.bool_or("ABSENT", true), Ok(true));
    }

    #[test]
    fn resolve_literal_trims() {
        let store = MemoryStore::new();
        let got = resolve(&ProvisioningSource::literal("  otpauth://x  "), &store);
        assert_eq!(got.as_deref(), Ok("otpauth://x"));
    }

    #[test]
    fn resolve_blank_literal_fails() {
        let store = MemoryStore::new();
        let got = resolve(&ProvisioningSource::literal("   "), &store);
        assert_eq!(got, Err(ConfigurationError::BlankLiteral));
    }

    #[test]
    fn resolve_key_reads_store() {
        let store = MemoryStore::new();
        store.set("OTP_URI", "otpauth://totp/x?secret=AAAA");
        let got = resolve(&ProvisioningSource::key("OTP_URI"), &store);
        assert_eq!(got.as_deref(), Ok("otpauth://totp/x?secret=AAAA"));
    }

    #[test]
    fn resolve_missing_key_names_it() {
        let store = MemoryStore::new();
        let err = resolve(&ProvisioningSource::key("NOPE"), &store).unwrap_err();
        assert_eq!(err.to_string(), "configuration key `NOPE` is missing or empty");
    }

    #[test]
    fn resolve_is_uncached() {
        let store = MemoryStore::new();
        store.set("K", "first");
        let source = ProvisioningSource::key("K");
        assert_eq!(resolve(&source, &store).as_deref(), Ok("first"));
        store.set("K", "second");
        assert_eq!(resolve(&source, &store).as_deref(), Ok("second"));
    }

    #[test]
    fn describe_hides_literal_value() {
        let s = ProvisioningSource::literal("otpauth://totp/x?secret=TOPSECRET");
        assert!(!s.describe().contains("TOPSECRET"));
        assert_eq!(ProvisioningSource::key("OTP").describe(), "key `OTP`");
    }

    #[test]
    fn env_store_reads_process_env() {
        // set_var is safe enough in a single test with a unique name
        unsafe { std::env::set_var("OTP_ENGINE_CONFIG_TEST_KEY", "present") };
        assert_eq!(
            EnvStore.string("OTP_ENGINE_CONFIG_TEST_KEY").as_deref(),
            Some("present")
        );
        assert_eq!(EnvStore.string("OTP_ENGINE_CONFIG_TEST_MISSING"), None);
    }
}
