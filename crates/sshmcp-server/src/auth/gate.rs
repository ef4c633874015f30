use sha2::{Digest, Sha256};

/// Where a credential was found on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChannel {
    /// `Authorization: Bearer <token>`.
    Header,
    /// `?token=<token>` query-string fallback.
    Query,
}

impl CredentialChannel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Query => "query",
        }
    }
}

impl std::fmt::Display for CredentialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header => f.write_str("Authorization header"),
            Self::Query => f.write_str("token query parameter"),
        }
    }
}

/// Attached to request extensions once the gate lets a request through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub channel: CredentialChannel,
    /// First 12 hex chars of the credential's SHA-256 digest.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// No secret is configured; nothing can authenticate.
    Misconfigured,
    /// Neither channel supplied a credential.
    Missing,
    Invalid { channel: CredentialChannel },
    Ok(AuthContext),
}

/// Decides whether a request may proceed, from its credential channels and
/// the configured shared secret.
///
/// Only the secret's digest is retained.
pub struct CredentialGate {
    secret_digest: Option<[u8; 32]>,
}

impl CredentialGate {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret_digest: secret.filter(|s| !s.is_empty()).map(digest),
        }
    }

    pub const fn is_configured(&self) -> bool {
        self.secret_digest.is_some()
    }

    /// Evaluate the raw `Authorization` header value and the `token` query
    /// field. A well-formed header always wins over the query field.
    pub fn evaluate(&self, authorization: Option<&str>, query_token: Option<&str>) -> GateOutcome {
        let Some(expected) = &self.secret_digest else {
            return GateOutcome::Misconfigured;
        };

        let presented = authorization
            .and_then(bearer_token)
            .map(|t| (CredentialChannel::Header, t))
            .or_else(|| {
                query_token
                    .filter(|t| !t.is_empty())
                    .map(|t| (CredentialChannel::Query, t))
            });
        let Some((channel, token)) = presented else {
            return GateOutcome::Missing;
        };

        let actual = digest(token);
        if digests_equal(&actual, expected) {
            GateOutcome::Ok(AuthContext {
                channel,
                fingerprint: hex::encode(&actual[..6]),
            })
        } else {
            GateOutcome::Invalid { channel }
        }
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme must be exactly `Bearer` and the token non-empty.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    (scheme == "Bearer" && !token.is_empty()).then_some(token)
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

// Folds over every byte so timing does not depend on the first mismatch.
fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
