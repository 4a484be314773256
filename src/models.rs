//! Row types for everything the blog keeps in its store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::tree::Threaded;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
}

impl Category {
    pub fn url(&self) -> String {
        format!("/category/{}/", self.slug)
    }

    pub fn feed_url(&self) -> String {
        format!("/category/{}/feed/", self.slug)
    }
}

/// A blog article. `content` holds markdown; see [`crate::markdown`].
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Article {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub category_id: Option<i64>,
    pub is_published: bool,

    /// Standalone articles (an "about" page, say) are reachable by slug but
    /// are left out of the chronological lists and feeds.
    pub is_standalone: bool,
    pub created: DateTime<Utc>,
}

impl Article {
    pub fn url(&self) -> String {
        format!("/{}/", self.slug)
    }

    pub fn comments_feed_url(&self) -> String {
        format!("/{}/comments/feed/", self.slug)
    }

    /// Returns the part of the content above the `<!-- more -->` fold and
    /// whether anything was cut.
    pub fn summary(&self) -> (&str, bool) {
        const FOLD_TAG: &str = "<!-- more -->";
        match self.content.find(FOLD_TAG) {
            Some(i) => (&self.content[..i], true),
            None => (&self.content, false),
        }
    }
}

/// An [`Article`] as shown on list pages, annotated with its comment count.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ArticleSummary {
    #[sqlx(flatten)]
    pub article: Article,
    pub comment_count: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Comment {
    pub id: i64,
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub user_name: String,
    pub user_email: String,
    pub user_url: String,
    pub content: String,
    pub is_approved: bool,
    pub created: DateTime<Utc>,
}

impl Threaded for Comment {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
}

impl Comment {
    pub fn anchor(&self) -> String {
        format!("comment-{}", self.id)
    }
}

/// A validated comment submission, ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub user_name: String,
    pub user_email: String,
    pub user_url: String,
    pub content: String,
    pub is_approved: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub author: String,
    pub text: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,

    /// Argon2 PHC string; see [`crate::auth::hash_password`].
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UserProfile {
    pub user_id: i64,
    pub website: String,
}

/// What the session remembers about a logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub is_superuser: bool,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Identity {
        Identity {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_superuser: user.is_superuser,
        }
    }
}

/// The author fields of an anonymous visitor's last accepted comment, kept
/// in their session to pre-fill the next comment form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RememberedAuthor {
    pub user_name: String,
    pub user_email: String,
    pub user_url: String,
}
