use anyhow::Result;
use log::debug;

pub const USER_ID_VAR: &str = "FABLE_USER_ID";
pub const ACCESS_TOKEN_VAR: &str = "FABLE_ACCESS_TOKEN";

/// A signed-in user as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Sent as a bearer token on backend calls when present.
    pub access_token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }
}

/// Source of the current session. Sign-in itself happens elsewhere.
pub trait IdentitySession {
    fn current(&self) -> Option<Session>;
}

/// Session taken from `FABLE_USER_ID` / `FABLE_ACCESS_TOKEN`.
pub struct EnvSession;

impl IdentitySession for EnvSession {
    fn current(&self) -> Option<Session> {
        let non_empty = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        let user_id = non_empty(USER_ID_VAR)?;
        debug!("Session found for user {user_id}");
        Some(Session {
            user_id,
            access_token: non_empty(ACCESS_TOKEN_VAR),
        })
    }
}

/// Fixed session, used for `--user` overrides and tests.
pub struct StaticSession(pub Option<Session>);

impl IdentitySession for StaticSession {
    fn current(&self) -> Option<Session> {
        self.0.clone()
    }
}

/// Gate for commands that act on behalf of a user.
pub fn require(identity: &dyn IdentitySession) -> Result<Session> {
    identity.current().ok_or_else(|| {
        anyhow::anyhow!("not signed in: set {USER_ID_VAR} (and optionally {ACCESS_TOKEN_VAR}) or pass --user")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_without_session_fails() {
        let err = require(&StaticSession(None)).unwrap_err();
        assert!(err.to_string().contains(USER_ID_VAR));
    }

    #[test]
    fn test_require_with_session() {
        let session = require(&StaticSession(Some(Session::new("u-42")))).unwrap();
        assert_eq!(session.user_id, "u-42");
        assert!(session.access_token.is_none());
    }
}
