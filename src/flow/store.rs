//! In-memory transaction and authorization-code stores.
//!
//! Two small maps from opaque handle to state record, plus the consumed-jti
//! set that makes refresh tokens single-use. `DashMap::remove` gives the
//! exactly-once consumption guarantee: of two racing redemptions, only one
//! gets the record back.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::tokens::{ScopeSet, UserIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "S256" => Some(CodeChallengeMethod::S256),
            "plain" => Some(CodeChallengeMethod::Plain),
            _ => None,
        }
    }
}

/// An in-flight authorization, created at `/authorize` and consumed exactly
/// once by the upstream callback.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub client_id: String,
    pub scopes: ScopeSet,
    /// The redirect URI as the relying party presented it (post-fix); this
    /// is what `/token` must see again and what upstream was told.
    pub redirect_uri: String,
    /// The true destination recovered from the `/r/` encoding.
    pub destination: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub referer: Option<String>,
    pub return_to_referrer: bool,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything `/token` needs to redeem a code, captured at consent time.
#[derive(Debug, Clone)]
pub struct CodeRecord {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: ScopeSet,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// JWE-sealed upstream token.
    pub upstream_jwe: String,
    /// Identity snapshot at consent time; ID-token claims come from here.
    pub identity: UserIdentity,
    pub expires_at: DateTime<Utc>,
}

pub struct FlowStore {
    transactions: DashMap<String, Transaction>,
    codes: DashMap<String, CodeRecord>,
    /// Consumed refresh-token jtis, mapped to the token's own expiry.
    used_jtis: DashMap<String, i64>,
    ttl: Duration,
}

fn opaque_handle() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl FlowStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            transactions: DashMap::new(),
            codes: DashMap::new(),
            used_jtis: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(10)),
        }
    }

    /// Store a transaction and hand back its opaque `state_ref`.
    pub fn insert_transaction(&self, mut tx: Transaction, now: DateTime<Utc>) -> String {
        tx.expires_at = now + self.ttl;
        let state_ref = opaque_handle();
        self.transactions.insert(state_ref.clone(), tx);
        state_ref
    }

    /// Consume a transaction. Expired records count as absent.
    pub fn take_transaction(&self, state_ref: &str, now: DateTime<Utc>) -> Option<Transaction> {
        let (_, tx) = self.transactions.remove(state_ref)?;
        (tx.expires_at > now).then_some(tx)
    }

    pub fn insert_code(&self, mut record: CodeRecord, now: DateTime<Utc>) -> String {
        record.expires_at = now + self.ttl;
        let code = opaque_handle();
        self.codes.insert(code.clone(), record);
        code
    }

    /// Consume an authorization code. A second call for the same code
    /// returns `None` no matter how the two calls interleave.
    pub fn take_code(&self, code: &str, now: DateTime<Utc>) -> Option<CodeRecord> {
        let (_, record) = self.codes.remove(code)?;
        (record.expires_at > now).then_some(record)
    }

    /// Mark a refresh-token jti as used. Returns false on replay.
    pub fn consume_jti(&self, jti: &str, token_exp: i64) -> bool {
        self.used_jtis.insert(jti.to_string(), token_exp).is_none()
    }

    /// Drop expired transactions, codes, and jti marks.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before =
            self.transactions.len() + self.codes.len() + self.used_jtis.len();
        self.transactions.retain(|_, tx| tx.expires_at > now);
        self.codes.retain(|_, rec| rec.expires_at > now);
        let now_unix = now.timestamp();
        self.used_jtis.retain(|_, exp| *exp > now_unix);
        before - (self.transactions.len() + self.codes.len() + self.used_jtis.len())
    }
}
