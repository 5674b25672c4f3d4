//! Password -> bearer session operator auth (§4.D).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

use crate::error::{FleetError, FleetResult};
use crate::tokens::random_token;

pub struct OperatorAuth {
    password: String,
    ttl: Duration,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OperatorAuth {
    pub fn new(password: String, ttl: Duration) -> Self {
        OperatorAuth {
            password,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Constant-time compares `password` against the configured secret; on
    /// match allocates a new `op_`-prefixed bearer token.
    pub fn login(&self, password: &str, now: DateTime<Utc>) -> FleetResult<(String, DateTime<Utc>)> {
        let ok: bool = self.password.as_bytes().ct_eq(password.as_bytes()).into();
        if !ok {
            return Err(FleetError::InvalidOperatorPassword);
        }

        let mut sessions = self.sessions.lock().expect("auth lock poisoned");
        sessions.retain(|_, expires_at| *expires_at > now);

        let token = random_token("op", 24);
        let expires_at = now + self.ttl;
        sessions.insert(token.clone(), expires_at);
        Ok((token, expires_at))
    }

    /// Looks up `token`; absent or expired tokens are evicted and rejected.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> FleetResult<()> {
        let mut sessions = self.sessions.lock().expect("auth lock poisoned");
        match sessions.get(token) {
            Some(expires_at) if *expires_at > now => Ok(()),
            Some(_) => {
                sessions.remove(token);
                Err(FleetError::InvalidOperatorToken)
            }
            None => Err(FleetError::InvalidOperatorToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_with_wrong_password_fails() {
        let auth = OperatorAuth::new("secret".into(), Duration::hours(1));
        let err = auth.login("wrong", Utc::now()).unwrap_err();
        assert!(matches!(err, FleetError::InvalidOperatorPassword));
    }

    #[test]
    fn login_then_validate_round_trips() {
        let auth = OperatorAuth::new("secret".into(), Duration::hours(1));
        let now = Utc::now();
        let (token, _) = auth.login("secret", now).unwrap();
        assert!(auth.validate(&token, now).is_ok());
    }

    #[test]
    fn expired_token_is_rejected_and_then_stays_rejected() {
        let auth = OperatorAuth::new("secret".into(), Duration::seconds(1));
        let now = Utc::now();
        let (token, _) = auth.login("secret", now).unwrap();
        let later = now + Duration::seconds(2);
        assert!(auth.validate(&token, later).is_err());
        assert!(auth.validate(&token, later).is_err());
    }
}
