//! Resumption token registry
//!
//! Tokens are 32 bytes from the thread-local CSPRNG, encoded as URL-safe
//! base64 without padding so they can be dropped into a query string as-is.
//! Only the SHA-256 digest is persisted; the plaintext travels in the
//! confirmation link and nowhere else.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::persistence::{ExecutionStore, StoreError, TokenRecord};

/// Random bytes per token (256 bits of entropy)
pub const TOKEN_BYTES: usize = 32;

/// An opaque, single-use credential to resume one suspended execution
///
/// `Debug` prints only a digest prefix so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ResumptionToken(String);

impl ResumptionToken {
    /// Generate a fresh token
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a token received from outside, if it is well-formed
    pub fn parse(token: &str) -> Option<Self> {
        is_valid_token_format(token).then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest under which the registry stores this token
    pub fn digest(&self) -> String {
        hash_token(&self.0)
    }
}

impl std::fmt::Debug for ResumptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResumptionToken({}...)", &self.digest()[..8])
    }
}

/// Hash a token for storage/lookup
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Validate token format: URL-safe base64 of exactly [`TOKEN_BYTES`] bytes
pub fn is_valid_token_format(token: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() == TOKEN_BYTES)
}

/// Result of resolving a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenResolution {
    /// Never issued, or malformed
    Unknown,

    /// Already used or invalidated
    Consumed { execution_id: Uuid },

    /// Issued and unused, but past its deadline at resolution time
    Expired { execution_id: Uuid },

    /// Issued, unused and in time
    Valid { execution_id: Uuid },
}

impl TokenResolution {
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::Unknown => None,
            Self::Consumed { execution_id }
            | Self::Expired { execution_id }
            | Self::Valid { execution_id } => Some(*execution_id),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Issues, resolves and invalidates resumption tokens
///
/// Registry state lives in the [`ExecutionStore`] next to the execution it is
/// bound to, so it shares the execution's lifetime.
#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn ExecutionStore>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Issue a token bound to `execution_id`, valid until `expires_at`
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        execution_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ResumptionToken, StoreError> {
        let token = ResumptionToken::generate();
        self.store
            .insert_token(TokenRecord {
                token_hash: token.digest(),
                execution_id,
                issued_at: now,
                expires_at,
                consumed_at: None,
            })
            .await?;

        debug!(?token, "issued resumption token");
        Ok(token)
    }

    /// Resolve a token as of `now`
    ///
    /// `now` is the authoritative sampling point for expiry: a token whose
    /// deadline lapsed before this call resolves as `Expired` even if the
    /// confirmation was sent earlier.
    #[instrument(skip_all)]
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<TokenResolution, StoreError> {
        let Some(token) = ResumptionToken::parse(token) else {
            return Ok(TokenResolution::Unknown);
        };

        let Some(record) = self.store.find_token(&token.digest()).await? else {
            return Ok(TokenResolution::Unknown);
        };

        let execution_id = record.execution_id;
        Ok(if record.is_consumed() {
            TokenResolution::Consumed { execution_id }
        } else if now > record.expires_at {
            TokenResolution::Expired { execution_id }
        } else {
            TokenResolution::Valid { execution_id }
        })
    }

    /// Mark a token consumed. Invalidating twice, or an unknown token, is not an error.
    #[instrument(skip_all)]
    pub async fn invalidate(&self, token: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.store.consume_token(&hash_token(token), now).await? {
            debug!("invalidated resumption token");
        }
        Ok(())
    }

    /// Invalidate every outstanding token of an execution
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self, execution_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let consumed = self.store.consume_tokens_for(execution_id, now).await?;
        debug!(consumed, "invalidated execution tokens");
        Ok(())
    }
}
