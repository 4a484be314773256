//! Wires the handlers in [`crate::views`] into an axum [`Router`] and serves
//! it.

use axum::handler::HandlerWithoutStateExt;
use axum::http::{header, HeaderValue};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::mail::Mailer;
use crate::render::Theme;
use crate::store::Store;
use crate::views;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub theme: Arc<Theme>,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("theme", &self.theme)
            .field("site_root", &self.config.site_root.as_str())
            .field("mailer", &"dyn Mailer { ... }")
            .finish()
    }
}

/// Builds the blog's router. Sessions live in memory, so logins and
/// remembered commenter details don't survive a restart.
pub fn router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_name("lbe-session")
        .with_http_only(true);

    Router::new()
        .route("/", get(views::article_list))
        .route("/feed/", get(views::site_feed))
        .route("/category/:slug/", get(views::category_list))
        .route("/category/:slug/feed/", get(views::category_feed))
        .route("/comment/add/", post(views::comment_add))
        .route(
            "/comment/reply/:article/:pk",
            get(views::comment_reply_form).post(views::comment_reply),
        )
        .route(
            "/lbe/contact/",
            get(views::contact_page).post(views::contact_send),
        )
        .route("/lbe/thanks/", get(views::thanks))
        .route(
            "/lbe/register/",
            get(views::register_page).post(views::register),
        )
        .route("/lbe/login/", get(views::login_page).post(views::login))
        .route("/lbe/logout/", get(views::logout))
        .route("/lbe/chat/", get(views::chat_page).post(views::chat_post))
        .route("/:slug/", get(views::article_detail))
        .route("/:slug/comments/feed/", get(views::comments_feed))
        .nest_service(
            "/static",
            ServeDir::new(&state.config.static_directory)
                .not_found_service(views::not_found.into_service()),
        )
        .fallback(views::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            views::themed_errors,
        ))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Serves the blog on the configured address until the process is stopped.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let listen = state.config.listen;
    if !state.config.secure_cookies {
        warn!("Secure cookies disabled - set `secure_cookies: true` when serving over HTTPS");
    }
    let listener = TcpListener::bind(listen).await?;
    info!("Serving {} on http://{}", state.config.site_root, listen);
    axum::serve(listener, router(state)).await
}
