//! `TokenEngine` (spec §4.3): mints and validates HMAC-SHA256-signed,
//! base64-encoded, expiring session tokens. Grounded on `pbs-ticket`'s
//! `Ticket<T>` (sign/verify/time-frame shape), adapted from RSA-signed
//! colon-joined strings to HMAC-signed canonical JSON.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use pdata_api_types::{MountTable, PDataError, PDataResult, Role, Token, Username};

type HmacSha256 = Hmac<Sha256>;

/// `HMAC-SHA256(secret, canonical JSON of all fields except `sig`)`,
/// signs and validates session tokens (spec §4.3).
pub struct TokenEngine {
    secret: Vec<u8>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// serde_json's `Map` is BTreeMap-backed unless the `preserve_order`
/// feature is enabled (it isn't here), so serializing through `Value`
/// yields lexicographically sorted keys with no whitespace — the
/// deterministic encoding spec §4.3 requires.
fn canonical_json(payload: &serde_json::Map<String, serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(payload).expect("JSON map serialization cannot fail")
}

fn sign(secret: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

impl TokenEngine {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        TokenEngine { secret: secret.into() }
    }

    /// Builds the payload, sets `exp = now_ms + ttl*1000`, signs it, and
    /// base64-encodes the whole JSON object including `sig` (spec §4.3).
    pub fn mint(
        &self,
        username: &Username,
        roles: &[Role],
        caps: &[String],
        mounts: &MountTable,
        ttl_seconds: i64,
    ) -> String {
        let mut payload = serde_json::Map::new();
        payload.insert("username".into(), serde_json::Value::String(username.as_str().to_string()));
        payload.insert(
            "roles".into(),
            serde_json::Value::Array(
                roles.iter().map(|r| serde_json::Value::String(r.as_str().to_string())).collect(),
            ),
        );
        payload.insert(
            "caps".into(),
            serde_json::Value::Array(
                caps.iter().cloned().map(serde_json::Value::String).collect(),
            ),
        );
        let mounts_map: BTreeMap<String, String> = mounts
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string_lossy().into_owned()))
            .collect();
        payload.insert(
            "mounts".into(),
            serde_json::to_value(&mounts_map).expect("BTreeMap<String,String> always serializes"),
        );
        let exp = now_ms() + ttl_seconds * 1000;
        payload.insert("exp".into(), serde_json::Value::from(exp));

        let sig = sign(&self.secret, &canonical_json(&payload));
        payload.insert("sig".into(), serde_json::Value::String(sig));

        log::debug!("minted token for {username} expiring at {exp}");
        base64::encode(canonical_json(&payload))
    }

    /// Base64-decodes, JSON-parses, separates `sig` from the rest,
    /// recomputes the HMAC over the rest, and constant-time compares (spec
    /// §4.3). Also checks `exp > now_ms`.
    pub fn validate(&self, token: &str) -> PDataResult<Token> {
        let raw = base64::decode(token).map_err(|_| PDataError::AuthFailure)?;
        let mut payload: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&raw).map_err(|_| PDataError::AuthFailure)?;

        let sig = payload
            .remove("sig")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(PDataError::AuthFailure)?;

        let expected = sign(&self.secret, &canonical_json(&payload));
        if expected.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
            return Err(PDataError::AuthFailure);
        }

        let username = payload
            .get("username")
            .and_then(|v| v.as_str())
            .ok_or(PDataError::AuthFailure)?;
        let username = Username::try_from(username.to_string()).map_err(|_| PDataError::AuthFailure)?;

        let roles: Vec<Role> = payload
            .get("roles")
            .and_then(|v| v.as_array())
            .ok_or(PDataError::AuthFailure)?
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| Role::try_from(s.to_string()))
            .collect::<Result<_, _>>()
            .map_err(|_| PDataError::AuthFailure)?;

        let caps: Vec<String> = payload
            .get("caps")
            .and_then(|v| v.as_array())
            .ok_or(PDataError::AuthFailure)?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mounts_map: BTreeMap<String, String> = payload
            .get("mounts")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| PDataError::AuthFailure)?
            .ok_or(PDataError::AuthFailure)?;
        let mut mounts = MountTable::new();
        for (alias, target) in mounts_map {
            mounts.insert(alias, target.into());
        }

        let exp = payload.get("exp").and_then(|v| v.as_i64()).ok_or(PDataError::AuthFailure)?;
        if exp <= now_ms() {
            return Err(PDataError::AuthFailure);
        }

        log::debug!("validated token for {username}");
        Ok(Token { username, roles, caps, mounts, exp })
    }
}
