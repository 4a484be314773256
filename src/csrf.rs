//! Cross-site request forgery protection. Each session carries one random
//! token; every form posts it back in a hidden `csrf_token` field and the
//! handler compares it before acting.

use serde::Deserialize;
use tower_sessions::session::Error;
use tower_sessions::Session;
use uuid::Uuid;

/// Session key holding the token.
pub const CSRF_KEY: &str = "csrf_token";

/// Returns the session's token, creating one if the session has none yet.
pub async fn token(session: &Session) -> Result<String, Error> {
    if let Some(token) = session.get::<String>(CSRF_KEY).await? {
        return Ok(token);
    }
    let token = Uuid::new_v4().to_string();
    session.insert(CSRF_KEY, token.clone()).await?;
    Ok(token)
}

/// A submitted form together with the token that came with it.
#[derive(Debug, Deserialize)]
pub struct CsrfProtectedForm<T> {
    #[serde(default)]
    pub csrf_token: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> CsrfProtectedForm<T> {
    /// True if the submitted token is the session's. A session that never
    /// rendered a form has no token, so nothing matches it.
    pub async fn verify(&self, session: &Session) -> Result<bool, Error> {
        if self.csrf_token.is_empty() {
            return Ok(false);
        }
        Ok(session
            .get::<String>(CSRF_KEY)
            .await?
            .is_some_and(|stored| stored == self.csrf_token))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::forms::ChatInput;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_token_is_stable_per_session() -> Result<(), Error> {
        let session = session();
        let first = token(&session).await?;
        assert_eq!(first, token(&session).await?);
        assert_ne!(first, token(&self::session()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_verify() -> Result<(), Error> {
        let session = session();
        let form = CsrfProtectedForm {
            csrf_token: String::from("forged"),
            data: ChatInput::default(),
        };
        assert!(!form.verify(&session).await?);

        let issued = token(&session).await?;
        assert!(!form.verify(&session).await?);
        let form = CsrfProtectedForm {
            csrf_token: issued,
            data: form.data,
        };
        assert!(form.verify(&session).await?);

        let missing = CsrfProtectedForm {
            csrf_token: String::new(),
            data: ChatInput::default(),
        };
        assert!(!missing.verify(&session).await?);
        Ok(())
    }
}
