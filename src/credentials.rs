use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// App-level credentials used to authenticate token requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl AppCredentials {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Encodes the pair as `base64(client_id:client_secret)`.
    #[must_use]
    pub fn to_basic(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
    }

    /// Decodes a value produced by [`to_basic`](Self::to_basic).
    ///
    /// Returns `None` for invalid base64, non-UTF-8 data, a missing `:`
    /// separator or an empty half.
    #[must_use]
    pub fn from_basic(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(bytes).ok()?;
        let (id, secret) = decoded.split_once(':')?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(id, secret))
    }

    /// Checks the provider's documented shape: 32 ASCII alphanumerics each.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        fn valid(s: &str) -> bool {
            s.len() == 32 && s.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        valid(&self.client_id) && valid(&self.client_secret)
    }
}

/// Where a set of app credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Supplied by the user for the pending login (nonce staging).
    Staged,
    /// Persisted alongside the session that they minted.
    Stored,
    /// Process-wide configuration.
    Configured,
}

/// Candidate credentials for each source; any may be absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialCandidates<'a> {
    pub staged: Option<&'a AppCredentials>,
    pub stored: Option<&'a AppCredentials>,
    pub configured: Option<&'a AppCredentials>,
}

impl<'a> CredentialCandidates<'a> {
    fn get(&self, source: CredentialSource) -> Option<&'a AppCredentials> {
        match source {
            CredentialSource::Staged => self.staged,
            CredentialSource::Stored => self.stored,
            CredentialSource::Configured => self.configured,
        }
    }
}

/// Returns the first available credentials following `order`.
#[must_use]
pub fn resolve_credentials<'a>(
    order: &[CredentialSource],
    candidates: &CredentialCandidates<'a>,
) -> Option<&'a AppCredentials> {
    order.iter().find_map(|source| candidates.get(*source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(tag: &str) -> AppCredentials {
        AppCredentials::new(format!("{tag}-id"), format!("{tag}-secret"))
    }

    #[test]
    fn basic_encoding_roundtrips() {
        let original = creds("app");
        assert_eq!(original.to_basic(), "YXBwLWlkOmFwcC1zZWNyZXQ=");
        assert_eq!(AppCredentials::from_basic(&original.to_basic()), Some(original));
    }

    #[test]
    fn basic_decoding_rejects_garbage() {
        assert!(AppCredentials::from_basic("not base64!").is_none());
        assert!(AppCredentials::from_basic(&STANDARD.encode("no-separator")).is_none());
        assert!(AppCredentials::from_basic(&STANDARD.encode(":secret")).is_none());
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let rendered = format!("{:?}", creds("app"));
        assert!(rendered.contains("app-id"));
        assert!(!rendered.contains("app-secret"));
    }

    #[test]
    fn well_formed_requires_32_alphanumerics() {
        let good = AppCredentials::new("a".repeat(32), "B9".repeat(16));
        assert!(good.is_well_formed());

        assert!(!AppCredentials::new("a".repeat(31), "b".repeat(32)).is_well_formed());
        assert!(!AppCredentials::new("a".repeat(32), "b-".repeat(16)).is_well_formed());
    }

    #[test]
    fn resolution_follows_order() {
        let staged = creds("staged");
        let configured = creds("configured");
        let candidates = CredentialCandidates {
            staged: Some(&staged),
            stored: None,
            configured: Some(&configured),
        };

        let first = resolve_credentials(
            &[CredentialSource::Staged, CredentialSource::Configured],
            &candidates,
        );
        assert_eq!(first, Some(&staged));

        let reversed = resolve_credentials(
            &[CredentialSource::Configured, CredentialSource::Staged],
            &candidates,
        );
        assert_eq!(reversed, Some(&configured));
    }

    #[test]
    fn resolution_skips_missing_sources() {
        let configured = creds("configured");
        let candidates = CredentialCandidates {
            configured: Some(&configured),
            ..Default::default()
        };

        let resolved = resolve_credentials(
            &[CredentialSource::Stored, CredentialSource::Configured],
            &candidates,
        );
        assert_eq!(resolved, Some(&configured));
        assert!(resolve_credentials(&[CredentialSource::Staged], &candidates).is_none());
    }
}
