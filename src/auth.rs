//! Password hashing, credential checks, and what the session carries about
//! the visitor.

use std::fmt;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tower_sessions::Session;

use crate::csrf;
use crate::models::{Identity, RememberedAuthor, User};
use crate::store::{self, Store};

/// Session key holding the logged-in [`Identity`].
pub const IDENTITY_KEY: &str = "identity";

/// Session key holding an anonymous commenter's [`RememberedAuthor`].
pub const REMEMBERED_KEY: &str = "user_data";

/// Hashes `password` into an Argon2id PHC string with a fresh salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Checks `password` against a PHC string produced by [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// [`hash_password`] on the blocking thread pool, for use from request
/// handlers.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?
}

/// The outcome of a login attempt.
#[derive(Debug, PartialEq)]
pub enum Login {
    Success(User),

    /// The credentials matched, but the account has been disabled.
    Inactive,

    /// No such user, or the password didn't match.
    Invalid,
}

pub async fn authenticate(store: &Store, username: &str, password: &str) -> Result<Login> {
    let user = match store.user_by_username(username).await? {
        Some(user) => user,
        None => return Ok(Login::Invalid),
    };
    if !verify_password_blocking(password.to_owned(), user.password_hash.clone()).await? {
        return Ok(Login::Invalid);
    }
    Ok(if user.is_active {
        Login::Success(user)
    } else {
        Login::Inactive
    })
}

/// Everything a request handler needs to know about who is asking, read out
/// of the session once per request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Visitor {
    pub identity: Option<Identity>,
    pub remembered: Option<RememberedAuthor>,

    /// The session's form token, issued on first use.
    pub csrf_token: String,
}

impl Visitor {
    pub async fn from_session(session: &Session) -> Result<Visitor> {
        Ok(Visitor {
            identity: session.get::<Identity>(IDENTITY_KEY).await?,
            remembered: session.get::<RememberedAuthor>(REMEMBERED_KEY).await?,
            csrf_token: csrf::token(session).await?,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_superuser(&self) -> bool {
        self.identity.as_ref().map_or(false, |i| i.is_superuser)
    }

    pub fn username(&self) -> &str {
        self.identity.as_ref().map_or("", |i| i.username.as_str())
    }

    /// The author fields to pre-fill a new comment with: a logged-in user's
    /// name and email with the site's root URL, or whatever an anonymous
    /// visitor last submitted.
    pub fn comment_author(&self, site_root: &str) -> RememberedAuthor {
        match &self.identity {
            Some(identity) => RememberedAuthor {
                user_name: identity.username.clone(),
                user_email: identity.email.clone(),
                user_url: site_root.trim_end_matches('/').to_owned(),
            },
            None => self.remembered.clone().unwrap_or_default(),
        }
    }
}

/// Logs `user` in: a new session id is issued so a pre-login id can't be
/// reused.
pub async fn login(session: &Session, user: &User) -> Result<()> {
    session.cycle_id().await?;
    session.insert(IDENTITY_KEY, Identity::from(user)).await?;
    Ok(())
}

pub async fn logout(session: &Session) -> Result<()> {
    session.flush().await?;
    Ok(())
}

pub async fn remember_author(session: &Session, author: RememberedAuthor) -> Result<()> {
    session.insert(REMEMBERED_KEY, author).await?;
    Ok(())
}

/// The result of a fallible authentication operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error hashing, checking, or persisting credentials.
#[derive(Debug)]
pub enum Error {
    /// Returned when Argon2 can't hash, or a stored hash can't be parsed.
    Hash(argon2::password_hash::Error),

    /// Returned when the session store fails.
    Session(tower_sessions::session::Error),

    /// Returned when looking the user up fails.
    Store(store::Error),

    /// Returned when a hashing task panics or is cancelled.
    Task(tokio::task::JoinError),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Hash(err) => write!(f, "password hash: {}", err),
            Error::Session(err) => write!(f, "session: {}", err),
            Error::Store(err) => err.fmt(f),
            Error::Task(err) => write!(f, "password task: {}", err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Hash(_) => None,
            Error::Session(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Task(err) => Some(err),
        }
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Error {
        Error::Hash(err)
    }
}

impl From<tower_sessions::session::Error> for Error {
    fn from(err: tower_sessions::session::Error) -> Error {
        Error::Session(err)
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Error {
        Error::Store(err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Error {
        Error::Task(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test::memory_store;
    use crate::store::NewUser;

    #[test]
    fn test_hash_round_trip() -> Result<()> {
        let hash = hash_password("hunter2")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &hash)?);
        assert!(!verify_password("hunter3", &hash)?);
        Ok(())
    }

    #[test]
    fn test_hashes_are_salted() -> Result<()> {
        assert_ne!(hash_password("same")?, hash_password("same")?);
        Ok(())
    }

    #[tokio::test]
    async fn test_hash_off_the_runtime() -> Result<()> {
        let hash = hash_password_blocking(String::from("hunter2")).await?;
        assert!(verify_password_blocking(String::from("hunter2"), hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_authenticate() -> Result<()> {
        let store = memory_store().await;
        let user = store
            .create_user(
                &NewUser {
                    username: String::from("ann"),
                    email: String::from("ann@example.com"),
                    password_hash: hash_password("secret")?,
                    is_superuser: false,
                },
                "",
            )
            .await?;

        assert!(matches!(
            authenticate(&store, "ann", "secret").await?,
            Login::Success(_)
        ));
        assert_eq!(Login::Invalid, authenticate(&store, "ann", "wrong").await?);
        assert_eq!(Login::Invalid, authenticate(&store, "nobody", "secret").await?);

        store.set_user_active(user.id, false).await?;
        assert_eq!(Login::Inactive, authenticate(&store, "ann", "secret").await?);
        Ok(())
    }

    #[test]
    fn test_comment_author_prefill() {
        let anonymous = Visitor {
            identity: None,
            remembered: Some(RememberedAuthor {
                user_name: String::from("Bob"),
                user_email: String::from("bob@example.org"),
                user_url: String::new(),
            }),
            ..Visitor::default()
        };
        assert_eq!("Bob", anonymous.comment_author("https://blog.example/").user_name);
        assert_eq!(RememberedAuthor::default(), Visitor::default().comment_author("x"));

        let member = Visitor {
            identity: Some(Identity {
                user_id: 1,
                username: String::from("ann"),
                email: String::from("ann@example.com"),
                is_superuser: true,
            }),
            remembered: None,
            ..Visitor::default()
        };
        let author = member.comment_author("https://blog.example/");
        assert_eq!("ann", author.user_name);
        assert_eq!("https://blog.example", author.user_url);
        assert!(member.is_superuser());
    }
}
