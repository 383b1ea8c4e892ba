use std::fmt;

use compact_str::CompactString;
use fast32::base32;
use rand::Rng;
use url::Url;

/// The default length of a generated TOTP secret in bytes
pub const RFC6238_TOTP_KEY_LENGTH: usize = 20;

/// The default number of code digits
pub const DEFAULT_DIGITS: u8 = 6;

/// The default time-step duration in seconds
pub const DEFAULT_PERIOD: u64 = 30;

/// Error type for provisioning-string parsing
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The provisioning string is not a parseable URI
    #[error("provisioning string is not a valid URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    /// The URI scheme is not `otpauth`
    #[error("unexpected URI scheme `{0}`, expected `otpauth`")]
    UnexpectedScheme(CompactString),

    /// The OTP type is recognized but not time-based (e.g. `hotp`)
    #[error("unsupported OTP type `{0}`, only `totp` is supported")]
    UnsupportedType(CompactString),

    /// The required `secret` query parameter is missing
    #[error("missing required `secret` parameter")]
    MissingSecret,

    /// The secret is not valid base32. The message never carries the value.
    #[error("secret is not valid base32")]
    InvalidSecret(#[source] fast32::DecodeError),

    /// The secret decodes to zero bytes
    #[error("secret decodes to zero bytes")]
    EmptySecret,

    /// The `algorithm` parameter names no supported hash
    #[error("unknown algorithm token `{0}`")]
    UnknownAlgorithm(CompactString),

    /// The `digits` parameter is out of range or non-numeric
    #[error("invalid `digits` value `{0}`, expected an integer in 1..=10")]
    InvalidDigits(CompactString),

    /// The `period` parameter is zero or non-numeric
    #[error("invalid `period` value `{0}`, expected a positive integer")]
    InvalidPeriod(CompactString),
}

/// HMAC hash used for code derivation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TotpAlgorithm {
    /// HMAC-SHA1, the RFC 6238 default
    #[default]
    Sha1,
    /// HMAC-SHA256
    Sha256,
    /// HMAC-SHA512
    Sha512,
}

impl TotpAlgorithm {
    /// Parse a case-insensitive algorithm token (`SHA1`, `sha-256`, `HMACSHA512`, …)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" | "HMACSHA1" | "HMAC-SHA1" => Some(Self::Sha1),
            "SHA256" | "SHA-256" | "HMACSHA256" | "HMAC-SHA256" => Some(Self::Sha256),
            "SHA512" | "SHA-512" | "HMACSHA512" | "HMAC-SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical token used in provisioning URIs
    pub fn uri_token(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    pub(crate) fn hmac_algorithm(self) -> ring::hmac::Algorithm {
        match self {
            Self::Sha1 => ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => ring::hmac::HMAC_SHA256,
            Self::Sha512 => ring::hmac::HMAC_SHA512,
        }
    }
}

impl fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri_token())
    }
}

/// Decoded TOTP shared secret
#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret(Box<[u8]>);

impl AsRef<[u8]> for TotpSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TotpSecret({} bytes)", self.0.len())
    }
}

impl TotpSecret {
    /// Create a secret from raw bytes
    pub fn new(secret: &[u8]) -> Self {
        Self(secret.into())
    }

    /// Generate a random secret of the RFC 6238 recommended length
    pub fn generate() -> Self {
        let mut secret = [0u8; RFC6238_TOTP_KEY_LENGTH];
        rand::rng().fill(&mut secret);
        Self(secret.into())
    }

    /// Decode a base32 secret.
    ///
    /// Tolerates lowercase, interior spaces and dashes, and trailing `=`
    /// padding. Fails on any other alphabet violation, or when the value
    /// decodes to zero bytes.
    pub fn try_from_base32(secret: impl AsRef<str>) -> Result<Self, ProvisioningError> {
        let cleaned: String = secret
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let cleaned = cleaned.trim_end_matches('=');
        let bytes = base32::RFC4648_NOPAD
            .decode_str(cleaned)
            .map_err(ProvisioningError::InvalidSecret)?;
        if bytes.is_empty() {
            return Err(ProvisioningError::EmptySecret);
        }
        Ok(Self(bytes.into_boxed_slice()))
    }

    /// Encode the secret as unpadded base32
    pub fn to_base32(&self) -> String {
        base32::RFC4648_NOPAD.encode(&self.0)
    }
}

/// Parsed, immutable TOTP parameter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpSpec {
    /// Decoded shared secret
    pub secret: TotpSecret,
    /// HMAC hash for code derivation
    pub algorithm: TotpAlgorithm,
    /// Output code length, 1..=10
    pub digits: u8,
    /// Time-step duration in seconds, non-zero
    pub period: u64,
    /// Account label, descriptive only
    pub label: CompactString,
    /// Issuer, descriptive only
    pub issuer: Option<CompactString>,
}

impl TotpSpec {
    /// Spec with default algorithm, digits, and period for a secret
    pub fn new(secret: TotpSecret, label: impl Into<CompactString>) -> Self {
        Self {
            secret,
            algorithm: TotpAlgorithm::default(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            label: label.into(),
            issuer: None,
        }
    }

    /// Builder: set the HMAC algorithm
    pub fn with_algorithm(mut self, algorithm: TotpAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Builder: set the code length
    pub fn with_digits(mut self, digits: u8) -> Self {
        self.digits = digits;
        self
    }

    /// Builder: set the time-step duration in seconds
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// Builder: set the issuer
    pub fn with_issuer(mut self, issuer: impl Into<CompactString>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Rebuild an `otpauth://totp/` URI for this spec, omitting parameters
    /// that hold their default values
    pub fn provisioning_uri(&self) -> String {
        let label = urlencoding::encode(&self.label);
        let path = match &self.issuer {
            Some(issuer) if !issuer.is_empty() => {
                format!("{}:{label}", urlencoding::encode(issuer))
            }
            _ => label.into_owned(),
        };

        let mut uri = format!("otpauth://totp/{path}?secret={}", self.secret.to_base32());
        if let Some(issuer) = &self.issuer {
            uri.push_str("&issuer=");
            uri.push_str(&urlencoding::encode(issuer));
        }
        if self.algorithm != TotpAlgorithm::Sha1 {
            uri.push_str("&algorithm=");
            uri.push_str(self.algorithm.uri_token());
        }
        if self.digits != DEFAULT_DIGITS {
            uri.push_str(&format!("&digits={}", self.digits));
        }
        if self.period != DEFAULT_PERIOD {
            uri.push_str(&format!("&period={}", self.period));
        }
        uri
    }
}

/// Parse an `otpauth://totp/` provisioning URI into a [`TotpSpec`].
///
/// Grammar: `otpauth://totp/[ISSUER:]LABEL?secret=BASE32` with optional
/// `algorithm` (default SHA1), `digits` (default 6, accepted range 1..=10),
/// `period` (default 30, must be positive), and `issuer` parameters. An
/// `issuer` query parameter takes precedence over an issuer path prefix.
///
/// Pure function: the same input always yields the same spec or error.
pub fn parse_provisioning_uri(uri: &str) -> Result<TotpSpec, ProvisioningError> {
    let url = Url::parse(uri.trim())?;

    if url.scheme() != "otpauth" {
        return Err(ProvisioningError::UnexpectedScheme(url.scheme().into()));
    }
    match url.host_str() {
        Some("totp") => {}
        other => {
            return Err(ProvisioningError::UnsupportedType(
                other.unwrap_or_default().into(),
            ));
        }
    }

    // Path is "/LABEL" or "/ISSUER:LABEL", percent-encoded
    let path = url.path().trim_start_matches('/');
    let path = match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_owned(),
    };
    let (path_issuer, label) = match path.split_once(':') {
        Some((issuer, label)) => (Some(issuer.trim()), label.trim()),
        None => (None, path.trim()),
    };

    let mut secret = None;
    let mut param_issuer: Option<CompactString> = None;
    let mut algorithm = TotpAlgorithm::default();
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "secret" => secret = Some(TotpSecret::try_from_base32(value.as_ref())?),
            "issuer" => param_issuer = Some(value.as_ref().into()),
            "algorithm" => {
                algorithm = TotpAlgorithm::from_token(&value)
                    .ok_or_else(|| ProvisioningError::UnknownAlgorithm(value.as_ref().into()))?;
            }
            "digits" => {
                digits = value
                    .parse::<u8>()
                    .ok()
                    .filter(|d| (1..=10).contains(d))
                    .ok_or_else(|| ProvisioningError::InvalidDigits(value.as_ref().into()))?;
            }
            "period" => {
                period = value
                    .parse::<u64>()
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| ProvisioningError::InvalidPeriod(value.as_ref().into()))?;
            }
            // Unknown parameters (e.g. image=) are ignored
            _ => {}
        }
    }

    let secret = secret.ok_or(ProvisioningError::MissingSecret)?;
    let issuer = param_issuer.or_else(|| path_issuer.map(Into::into));

    let mut spec = TotpSpec::new(secret, label)
        .with_algorithm(algorithm)
        .with_digits(digits)
        .with_period(period);
    spec.issuer = issuer;
    Ok(spec)
}
