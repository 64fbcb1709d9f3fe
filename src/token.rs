//! Manage session tokens.
//!
//! Tokens are HS256 json web tokens. Verification only ever accepts HS256,
//! whatever the token header announces.

use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::user::Role;

/// Lifetime of a server token when none is requested.
pub const SERVER_TOKEN_DURATION: i64 = 24 * 60 * 60; // 24 hours.
/// HTTP header carrying a requested token duration, in seconds.
pub const TOKEN_DURATION_HEADER: &str = "tokenduration";

const ALGORITHM: Algorithm = Algorithm::HS256;
const SERVER: &str = "yes";
const NOT_SERVER: &str = "no";

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token subject is missing")]
    InvalidSubject,
    #[error("requested duration must be positive, got {0}")]
    InvalidDuration(i64),
    #[error("token is empty")]
    EmptySubject,
    #[error("token is malformed or wrongly signed")]
    MalformedToken,
    #[error("token is expired")]
    ExpiredToken,
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Identity asserted by a session token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(rename = "isserver")]
    pub is_server: bool,
    #[serde(rename = "userid")]
    pub user_id: String,
    pub roles: Vec<Role>,
    /// Requested lifetime on issuance, resolved lifetime on verification.
    #[serde(skip)]
    pub duration_secs: i64,
}

impl TokenData {
    /// Data of a user token.
    pub fn user(user_id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            is_server: false,
            user_id: user_id.into(),
            roles,
            duration_secs: 0,
        }
    }

    /// Data of a server token.
    pub fn server(server_id: impl Into<String>) -> Self {
        Self {
            is_server: true,
            user_id: server_id.into(),
            roles: Vec::new(),
            duration_secs: 0,
        }
    }

    /// Request a non-default duration.
    pub fn with_duration(mut self, duration_secs: i64) -> Self {
        self.duration_secs = duration_secs;
        self
    }
}

/// Issued token. The signed string doubles as identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub is_server: bool,
    /// User id or server id depending on `is_server`.
    pub subject_id: String,
    /// Empty for server tokens.
    pub roles: Vec<Role>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub extended: bool,
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"[REDACTED]")
            .field("is_server", &self.is_server)
            .field("subject_id", &self.subject_id)
            .field("roles", &self.roles)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("extended", &self.extended)
            .finish()
    }
}

/// Pieces of information asserted on a token.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    svr: String,
    usr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ext: bool,
    iat: i64,
    exp: i64,
}

/// Issue and verify session tokens with a single shared secret.
#[derive(Clone)]
pub struct TokenEngine {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    default_duration: i64,
    clock: Arc<dyn Clock>,
}

impl TokenEngine {
    /// Create a new [`TokenEngine`].
    ///
    /// `default_duration` applies to user tokens issued without an explicit
    /// duration.
    pub fn new(secret: &str, default_duration: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            default_duration,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sign a new token for `data`.
    pub fn issue(&self, data: &TokenData) -> Result<SessionToken> {
        if data.user_id.is_empty() {
            return Err(TokenError::InvalidSubject);
        }

        let (duration, extended) = match data.duration_secs {
            0 if data.is_server => (SERVER_TOKEN_DURATION, false),
            0 => (self.default_duration, false),
            requested if requested < 0 => {
                return Err(TokenError::InvalidDuration(requested));
            },
            requested => (requested, true),
        };
        if duration <= 0 {
            return Err(TokenError::InvalidDuration(duration));
        }

        let issued_at = self.clock.timestamp();
        let expires_at = issued_at
            .checked_add(duration)
            .ok_or(TokenError::InvalidDuration(duration))?;
        let roles = if data.is_server {
            Vec::new()
        } else {
            data.roles.clone()
        };

        let claims = Claims {
            svr: if data.is_server { SERVER } else { NOT_SERVER }.to_owned(),
            usr: data.user_id.clone(),
            roles: roles.clone(),
            ext: extended,
            iat: issued_at,
            exp: expires_at,
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(SessionToken {
            token,
            is_server: data.is_server,
            subject_id: data.user_id.clone(),
            roles,
            issued_at,
            expires_at,
            extended,
        })
    }

    /// Decode and check a token.
    pub fn verify(&self, token: &str) -> Result<TokenData> {
        if token.is_empty() {
            return Err(TokenError::EmptySubject);
        }

        // expiry is checked below against our own clock, without leeway.
        let mut validation = Validation::new(ALGORITHM);
        validation.algorithms = vec![ALGORITHM];
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                TokenError::MalformedToken
            })?
            .claims;

        if claims.usr.is_empty() || claims.exp <= claims.iat {
            return Err(TokenError::MalformedToken);
        }
        if self.clock.timestamp() >= claims.exp {
            return Err(TokenError::ExpiredToken);
        }

        let is_server = claims.svr == SERVER;

        Ok(TokenData {
            is_server,
            user_id: claims.usr,
            roles: if is_server { Vec::new() } else { claims.roles },
            duration_secs: claims.exp - claims.iat,
        })
    }

    /// Whether `token` is a valid server token. Never fails.
    pub fn is_server_token(&self, token: &str) -> bool {
        self.verify(token).map(|data| data.is_server).unwrap_or(false)
    }
}

impl std::fmt::Debug for TokenEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEngine")
            .field("algorithm", &ALGORITHM)
            .field("default_duration", &self.default_duration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::clock::FixedClock;

    const SECRET: &str = "This is a local API secret for everyone. BsscSHqSHiwrBMJsEGqbvXiuIUPAjQXU";
    const NOW: i64 = 1_700_000_000;
    const DEFAULT_DURATION: i64 = 3600;

    fn engine() -> (TokenEngine, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(NOW));
        let engine = TokenEngine::new(SECRET, DEFAULT_DURATION)
            .with_clock(clock.clone());
        (engine, clock)
    }

    fn claims_of(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap())
            .unwrap()
    }

    #[test]
    fn test_user_token_round_trip() {
        let (engine, _) = engine();
        let data = TokenData::user("0123456789", vec![Role::Clinic])
            .with_duration(600);

        let token = engine.issue(&data).unwrap();
        assert!(token.extended);
        assert_eq!(token.issued_at, NOW);
        assert_eq!(token.expires_at, NOW + 600);
        assert_eq!(token.subject_id, "0123456789");

        let decoded = engine.verify(&token.token).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_server_token_round_trip() {
        let (engine, _) = engine();
        let mut data = TokenData::server("shoreline");
        data.roles = vec![Role::Admin];

        let token = engine.issue(&data).unwrap();
        assert!(!token.extended);
        assert!(token.roles.is_empty());
        assert_eq!(token.expires_at - token.issued_at, SERVER_TOKEN_DURATION);

        let decoded = engine.verify(&token.token).unwrap();
        assert!(decoded.is_server);
        assert_eq!(decoded.user_id, "shoreline");
        assert!(decoded.roles.is_empty());
        assert_eq!(decoded.duration_secs, SERVER_TOKEN_DURATION);
        assert!(engine.is_server_token(&token.token));
    }

    #[test]
    fn test_default_user_duration() {
        let (engine, _) = engine();
        let token = engine
            .issue(&TokenData::user("0123456789", vec![Role::Patient]))
            .unwrap();

        assert!(!token.extended);
        assert_eq!(token.expires_at - token.issued_at, DEFAULT_DURATION);
        assert!(!engine.is_server_token(&token.token));
    }

    #[test]
    fn test_wire_claims() {
        let (engine, _) = engine();

        let server = engine.issue(&TokenData::server("svc")).unwrap();
        let claims = claims_of(&server.token);
        assert_eq!(claims["svr"], "yes");
        assert_eq!(claims["usr"], "svc");
        assert!(claims.get("roles").is_none());
        assert!(claims.get("ext").is_none());
        assert_eq!(claims["iat"], NOW);

        let user = engine
            .issue(&TokenData::user("u1", vec![Role::Patient]).with_duration(60))
            .unwrap();
        let claims = claims_of(&user.token);
        assert_eq!(claims["svr"], "no");
        assert_eq!(claims["roles"], serde_json::json!(["patient"]));
        assert_eq!(claims["ext"], true);
        assert_eq!(claims["exp"], NOW + 60);
    }

    #[test]
    fn test_expiry_boundary() {
        let (engine, clock) = engine();
        let token = engine
            .issue(&TokenData::user("u1", vec![]).with_duration(100))
            .unwrap();

        clock.set(NOW + 99);
        assert!(engine.verify(&token.token).is_ok());

        clock.set(NOW + 100);
        assert!(matches!(engine.verify(&token.token), Err(TokenError::ExpiredToken)));

        clock.set(NOW + 101);
        assert!(matches!(engine.verify(&token.token), Err(TokenError::ExpiredToken)));
        assert!(!engine.is_server_token(&token.token));
    }

    #[test]
    fn test_issue_rejects_invalid_input() {
        let (engine, _) = engine();

        assert!(matches!(
            engine.issue(&TokenData::user("", vec![])),
            Err(TokenError::InvalidSubject)
        ));
        assert!(matches!(
            engine.issue(&TokenData::user("u1", vec![]).with_duration(-5)),
            Err(TokenError::InvalidDuration(-5))
        ));
        // expiry would not fit a timestamp.
        assert!(matches!(
            engine.issue(&TokenData::user("u1", vec![]).with_duration(i64::MAX)),
            Err(TokenError::InvalidDuration(i64::MAX))
        ));
        assert!(matches!(
            engine.issue(&TokenData::server("svc").with_duration(i64::MAX)),
            Err(TokenError::InvalidDuration(i64::MAX))
        ));
    }

    #[test]
    fn test_verify_rejects_bad_tokens() {
        let (engine, _) = engine();
        let token = engine.issue(&TokenData::user("u1", vec![])).unwrap();

        assert!(matches!(engine.verify(""), Err(TokenError::EmptySubject)));
        assert!(matches!(engine.verify("a.b.c"), Err(TokenError::MalformedToken)));

        // signature made with another secret.
        let other = TokenEngine::new("another secret", DEFAULT_DURATION)
            .with_clock(Arc::new(FixedClock::new(NOW)));
        assert!(matches!(other.verify(&token.token), Err(TokenError::MalformedToken)));

        // tampered claims.
        let forged = URL_SAFE_NO_PAD.encode(
            r#"{"svr":"yes","usr":"u1","iat":1700000000,"exp":1800000000}"#,
        );
        let mut parts: Vec<&str> = token.token.split('.').collect();
        parts[1] = forged.as_str();
        assert!(matches!(engine.verify(&parts.join(".")), Err(TokenError::MalformedToken)));
    }

    #[test]
    fn test_verify_rejects_other_algorithms() {
        let (engine, _) = engine();
        let claims = Claims {
            svr: SERVER.into(),
            usr: "svc".into(),
            roles: Vec::new(),
            ext: false,
            iat: NOW,
            exp: NOW + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(engine.verify(&token), Err(TokenError::MalformedToken)));
        assert!(!engine.is_server_token(&token));
    }
}
