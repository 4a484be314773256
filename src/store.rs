//! The content store: a thin layer of queries over a SQLite pool.

use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::models::*;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        category_id INTEGER REFERENCES categories (id),
        is_published INTEGER NOT NULL DEFAULT 0,
        is_standalone INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        article_id INTEGER NOT NULL REFERENCES articles (id),
        parent_id INTEGER REFERENCES comments (id),
        user_name TEXT NOT NULL,
        user_email TEXT NOT NULL,
        user_url TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        is_approved INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS comments_article ON comments (article_id, created)",
    "CREATE TABLE IF NOT EXISTS settings (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author TEXT NOT NULL,
        text TEXT NOT NULL,
        created TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL DEFAULT '',
        password_hash TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_superuser INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_profiles (
        user_id INTEGER PRIMARY KEY REFERENCES users (id),
        website TEXT NOT NULL DEFAULT ''
    )",
];

const ARTICLE_COLUMNS: &str =
    "a.id, a.slug, a.title, a.content, a.category_id, a.is_published, a.is_standalone, a.created";

const COMMENT_COLUMNS: &str =
    "id, article_id, parent_id, user_name, user_email, user_url, content, is_approved, created";

/// Handle to the blog's database. Cheap to clone; clones share the pool.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

/// Fields needed to create or update an article by slug.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDraft {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub category_id: Option<i64>,
    pub is_published: bool,
    pub is_standalone: bool,
    pub created: DateTime<Utc>,
}

/// Fields needed to create a user account.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_superuser: bool,
}

impl Store {
    /// Opens a pool on `database_url`. A `sqlite::memory:` URL gets a single
    /// connection, since every connection would otherwise see its own empty
    /// database.
    pub async fn connect(database_url: &str) -> Result<Store> {
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        Ok(Store { pool })
    }

    /// Creates any missing tables and indexes.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Fetches an article by slug. Unpublished articles are only returned
    /// when `include_unpublished` is set (superusers).
    pub async fn article_by_slug(
        &self,
        slug: &str,
        include_unpublished: bool,
    ) -> Result<Option<Article>> {
        let sql = format!(
            "SELECT {} FROM articles a WHERE a.slug = ? AND (a.is_published = 1 OR ?)",
            ARTICLE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Article>(&sql)
            .bind(slug)
            .bind(include_unpublished)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn article_by_id(&self, id: i64) -> Result<Option<Article>> {
        let sql = format!("SELECT {} FROM articles a WHERE a.id = ?", ARTICLE_COLUMNS);
        Ok(sqlx::query_as::<_, Article>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Lists published, non-standalone articles, newest first, optionally
    /// restricted to one category.
    pub async fn published_regular(
        &self,
        category_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArticleSummary>> {
        let sql = format!(
            "SELECT {}, (SELECT COUNT(*) FROM comments c WHERE c.article_id = a.id) AS comment_count
             FROM articles a
             WHERE a.is_published = 1 AND a.is_standalone = 0
               AND (? IS NULL OR a.category_id = ?)
             ORDER BY a.created DESC, a.id DESC
             LIMIT ? OFFSET ?",
            ARTICLE_COLUMNS
        );
        Ok(sqlx::query_as::<_, ArticleSummary>(&sql)
            .bind(category_id)
            .bind(category_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn count_published_regular(&self, category_id: Option<i64>) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles a
             WHERE a.is_published = 1 AND a.is_standalone = 0
               AND (? IS NULL OR a.category_id = ?)",
        )
        .bind(category_id)
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    pub async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, slug, name, description FROM categories WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn category_by_id(&self, id: i64) -> Result<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, slug, name, description FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, slug, name, description FROM categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Creates the category or updates its name and description.
    pub async fn upsert_category(
        &self,
        slug: &str,
        name: &str,
        description: &str,
    ) -> Result<Category> {
        Ok(sqlx::query_as::<_, Category>(
            "INSERT INTO categories (slug, name, description) VALUES (?, ?, ?)
             ON CONFLICT (slug) DO UPDATE SET name = excluded.name, description = excluded.description
             RETURNING id, slug, name, description",
        )
        .bind(slug)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Creates the article or overwrites the one with the same slug.
    pub async fn upsert_article(&self, draft: &ArticleDraft) -> Result<Article> {
        Ok(sqlx::query_as::<_, Article>(
            "INSERT INTO articles (slug, title, content, category_id, is_published, is_standalone, created)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (slug) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                category_id = excluded.category_id,
                is_published = excluded.is_published,
                is_standalone = excluded.is_standalone,
                created = excluded.created
             RETURNING id, slug, title, content, category_id, is_published, is_standalone, created",
        )
        .bind(&draft.slug)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(draft.category_id)
        .bind(draft.is_published)
        .bind(draft.is_standalone)
        .bind(draft.created)
        .fetch_one(&self.pool)
        .await?)
    }

    /// All comments on an article, approved or not, oldest first.
    pub async fn comments_for_article(&self, article_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {} FROM comments WHERE article_id = ? ORDER BY created, id",
            COMMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(article_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn approved_comments(&self, article_id: i64, limit: usize) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {} FROM comments WHERE article_id = ? AND is_approved = 1
             ORDER BY created, id LIMIT ?",
            COMMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(article_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn comment_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments WHERE id = ?", COMMENT_COLUMNS);
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn insert_comment(&self, comment: &NewComment) -> Result<Comment> {
        let sql = format!(
            "INSERT INTO comments
                (article_id, parent_id, user_name, user_email, user_url, content, is_approved, created)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {}",
            COMMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(comment.article_id)
            .bind(comment.parent_id)
            .bind(&comment.user_name)
            .bind(&comment.user_email)
            .bind(&comment.user_url)
            .bind(&comment.content)
            .bind(comment.is_approved)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?)
    }

    /// Marks a comment approved. Returns `false` if there is no such comment.
    pub async fn approve_comment(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE comments SET is_approved = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn setting(&self, name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (name, value) VALUES (?, ?)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_chat_message(&self, author: &str, text: &str) -> Result<ChatMessage> {
        Ok(sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO chat_messages (author, text, created) VALUES (?, ?, ?)
             RETURNING id, author, text, created",
        )
        .bind(author)
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?)
    }

    /// The most recent chat messages, newest first.
    pub async fn recent_chat_messages(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        Ok(sqlx::query_as::<_, ChatMessage>(
            "SELECT id, author, text, created FROM chat_messages
             ORDER BY created DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, is_active, is_superuser, created
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        Ok(sqlx::query_as::<_, UserProfile>(
            "SELECT user_id, website FROM user_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Creates a user and its profile in one transaction. Fails with
    /// [`Error::Conflict`] if the username is taken.
    pub async fn create_user(&self, user: &NewUser, website: &str) -> Result<User> {
        let mut tx = self.pool.begin().await?;
        let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(&user.username)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(Error::Conflict(format!(
                "username `{}` is already taken",
                user.username
            )));
        }

        let created = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, is_active, is_superuser, created)
             VALUES (?, ?, ?, 1, ?, ?)
             RETURNING id, username, email, password_hash, is_active, is_superuser, created",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_superuser)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO user_profiles (user_id, website) VALUES (?, ?)")
            .bind(created.id)
            .bind(website)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    pub async fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// The result of a fallible store operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error talking to the store.
#[derive(Debug)]
pub enum Error {
    /// Returned when the database rejects or fails a query.
    Database(sqlx::Error),

    /// Returned when a write would violate a uniqueness rule.
    Conflict(String),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Database(err) => err.fmt(f),
            Error::Conflict(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Conflict(_) => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    /// Converts a [`sqlx::Error`] into an [`Error`] so queries can use `?`.
    fn from(err: sqlx::Error) -> Error {
        Error::Database(err)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use chrono::TimeZone;

    pub(crate) async fn memory_store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    pub(crate) fn draft(slug: &str, day: u32) -> ArticleDraft {
        ArticleDraft {
            slug: slug.to_owned(),
            title: format!("Title of {}", slug),
            content: format!("Body of {}", slug),
            category_id: None,
            is_published: true,
            is_standalone: false,
            created: Utc.with_ymd_and_hms(2021, 4, day, 12, 0, 0).unwrap(),
        }
    }

    pub(crate) fn new_comment(article_id: i64, parent_id: Option<i64>, name: &str) -> NewComment {
        NewComment {
            article_id,
            parent_id,
            user_name: name.to_owned(),
            user_email: format!("{}@example.com", name),
            user_url: String::new(),
            content: format!("hello from {}", name),
            is_approved: false,
        }
    }

    /// Inserts a comment whose parent row doesn't exist, as left behind when
    /// a parent is deleted by hand.
    pub(crate) async fn orphan_comment(store: &Store, article_id: i64, name: &str) -> Comment {
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&store.pool)
            .await
            .unwrap();
        let orphan = store
            .insert_comment(&new_comment(article_id, Some(9999), name))
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&store.pool)
            .await
            .unwrap();
        orphan
    }

    #[tokio::test]
    async fn test_unpublished_article_hidden_unless_privileged() -> Result<()> {
        let store = memory_store().await;
        let mut hidden = draft("hidden", 1);
        hidden.is_published = false;
        store.upsert_article(&hidden).await?;

        assert!(store.article_by_slug("hidden", false).await?.is_none());
        assert!(store.article_by_slug("hidden", true).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_published_regular_filters_and_orders() -> Result<()> {
        let store = memory_store().await;
        let rust = store.upsert_category("rust", "Rust", "").await?;

        store.upsert_article(&draft("old", 1)).await?;
        let mut newer = draft("newer", 2);
        newer.category_id = Some(rust.id);
        store.upsert_article(&newer).await?;
        let mut about = draft("about", 3);
        about.is_standalone = true;
        store.upsert_article(&about).await?;
        let mut unpublished = draft("draft", 4);
        unpublished.is_published = false;
        store.upsert_article(&unpublished).await?;

        let all = store.published_regular(None, 10, 0).await?;
        let slugs: Vec<&str> = all.iter().map(|s| s.article.slug.as_str()).collect();
        assert_eq!(vec!["newer", "old"], slugs);
        assert_eq!(2, store.count_published_regular(None).await?);

        let in_rust = store.published_regular(Some(rust.id), 10, 0).await?;
        assert_eq!(1, in_rust.len());
        assert_eq!("newer", in_rust[0].article.slug);
        assert_eq!(1, store.count_published_regular(Some(rust.id)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_comment_counts_and_ordering() -> Result<()> {
        let store = memory_store().await;
        let article = store.upsert_article(&draft("post", 1)).await?;
        let first = store.insert_comment(&new_comment(article.id, None, "ann")).await?;
        store
            .insert_comment(&new_comment(article.id, Some(first.id), "bob"))
            .await?;

        let comments = store.comments_for_article(article.id).await?;
        assert_eq!(2, comments.len());
        assert_eq!(first.id, comments[0].id);
        assert_eq!(Some(first.id), comments[1].parent_id);

        let listed = store.published_regular(None, 10, 0).await?;
        assert_eq!(2, listed[0].comment_count);
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_comment() -> Result<()> {
        let store = memory_store().await;
        let article = store.upsert_article(&draft("post", 1)).await?;
        let comment = store.insert_comment(&new_comment(article.id, None, "ann")).await?;
        assert!(store.approved_comments(article.id, 25).await?.is_empty());

        assert!(store.approve_comment(comment.id).await?);
        assert!(!store.approve_comment(comment.id + 100).await?);
        assert_eq!(1, store.approved_comments(article.id, 25).await?.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_article_overwrites_by_slug() -> Result<()> {
        let store = memory_store().await;
        let first = store.upsert_article(&draft("post", 1)).await?;
        let mut edited = draft("post", 1);
        edited.title = String::from("Edited");
        let second = store.upsert_article(&edited).await?;

        assert_eq!(first.id, second.id);
        assert_eq!("Edited", second.title);
        Ok(())
    }

    #[tokio::test]
    async fn test_settings() -> Result<()> {
        let store = memory_store().await;
        assert_eq!(None, store.setting("site_title").await?);
        store.set_setting("site_title", "My blog").await?;
        store.set_setting("site_title", "Our blog").await?;
        assert_eq!(Some(String::from("Our blog")), store.setting("site_title").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicate_username() -> Result<()> {
        let store = memory_store().await;
        let user = NewUser {
            username: String::from("ann"),
            email: String::from("ann@example.com"),
            password_hash: String::from("not-a-real-hash"),
            is_superuser: false,
        };
        let created = store.create_user(&user, "https://ann.example.com").await?;
        assert!(created.is_active);
        assert_eq!(
            Some(String::from("https://ann.example.com")),
            store.profile(created.id).await?.map(|p| p.website)
        );

        match store.create_user(&user, "").await {
            Err(Error::Conflict(_)) => Ok(()),
            other => panic!("expected a conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_log_newest_first() -> Result<()> {
        let store = memory_store().await;
        store.insert_chat_message("ann", "first").await?;
        store.insert_chat_message("bob", "second").await?;
        let messages = store.recent_chat_messages(50).await?;
        assert_eq!("second", messages[0].text);
        assert_eq!("first", messages[1].text);
        Ok(())
    }
}
