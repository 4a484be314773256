//! Request handlers. Each one reads what it needs from the store, renders a
//! theme page, and maps failures onto themed 404/403 pages or a plain 500.

use axum::extract::{Form, Path as AxumPath, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use gtmpl_value::Value;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::auth::{self, Login, Visitor};
use crate::csrf::CsrfProtectedForm;
use crate::feed::{self, FeedConfig};
use crate::forms::{
    ChatInput, CommentInput, ContactInput, FieldErrors, LoginInput, RegistrationInput,
};
use crate::mail::{self, OutgoingMail};
use crate::models::{Article, Category, NewComment, RememberedAuthor};
use crate::page::Page;
use crate::render::{self, text, DisplayComment};
use crate::server::AppState;
use crate::store::{self, NewUser};
use crate::tree::build_tree;

/// How many chat messages the chat page shows.
pub const CHAT_HISTORY: usize = 50;

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";

/// The data handed to a page template: the site-wide fields every page
/// gets, plus whatever the page adds.
struct PageData(HashMap<String, Value>);

impl PageData {
    fn with(mut self, key: &str, value: Value) -> PageData {
        self.0.insert(key.to_owned(), value);
        self
    }
}

async fn page_data(state: &AppState, visitor: &Visitor) -> Result<PageData> {
    let store = &state.store;
    let site_title = store.setting("site_title").await?.unwrap_or_default();
    let site_description = store.setting("site_description").await?.unwrap_or_default();
    let categories = store.categories().await?;
    Ok(PageData(HashMap::new())
        .with("site_title", text(&site_title))
        .with("site_description", text(&site_description))
        .with("username", text(visitor.username()))
        .with("is_authenticated", Value::Bool(visitor.is_authenticated()))
        .with("is_superuser", Value::Bool(visitor.is_superuser()))
        .with("csrf_token", text(&visitor.csrf_token))
        .with(
            "categories",
            Value::Array(categories.iter().map(Value::from).collect()),
        ))
}

fn render_page(state: &AppState, kind: &str, data: PageData) -> Result<Html<String>> {
    Ok(Html(state.theme.render(kind, Value::Object(data.0))?))
}

/// Unwraps a posted form, refusing it unless it carries the session's token.
async fn checked<T>(session: &Session, form: CsrfProtectedForm<T>) -> Result<T> {
    if form.verify(session).await? {
        Ok(form.data)
    } else {
        warn!("form posted without a valid CSRF token");
        Err(Error::Forbidden)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
}

pub async fn article_list(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    list_page(&state, &visitor, None, query.page.as_deref()).await
}

pub async fn category_list(
    State(state): State<AppState>,
    session: Session,
    AxumPath(slug): AxumPath<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    let category = state
        .store
        .category_by_slug(&slug)
        .await?
        .ok_or(Error::NotFound)?;
    list_page(&state, &visitor, Some(&category), query.page.as_deref()).await
}

async fn list_page(
    state: &AppState,
    visitor: &Visitor,
    category: Option<&Category>,
    requested_page: Option<&str>,
) -> Result<Html<String>> {
    let category_id = category.map(|c| c.id);
    let base_url = category.map_or_else(|| String::from("/"), Category::url);
    let total = state.store.count_published_regular(category_id).await?;
    let page = Page::resolve(
        &base_url,
        requested_page,
        total,
        state.config.index_page_size,
    )
    .map_err(|_| Error::NotFound)?;

    let summaries = state
        .store
        .published_regular(category_id, page.limit, page.offset)
        .await?;
    let categories: HashMap<i64, Category> = state
        .store
        .categories()
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let articles = summaries
        .iter()
        .map(|summary| {
            let category = summary
                .article
                .category_id
                .and_then(|id| categories.get(&id));
            render::summary_value(summary, category)
        })
        .collect();

    let data = page_data(state, visitor)
        .await?
        .with("articles", Value::Array(articles))
        .with("page", Value::from(&page))
        .with(
            "category",
            category.map(Value::from).unwrap_or(Value::Nil),
        );
    render_page(state, "article_list", data)
}

pub async fn article_detail(
    State(state): State<AppState>,
    session: Session,
    AxumPath(slug): AxumPath<String>,
) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    let article = state
        .store
        .article_by_slug(&slug, visitor.is_superuser())
        .await?
        .ok_or(Error::NotFound)?;
    let category = match article.category_id {
        Some(id) => state.store.category_by_id(id).await?,
        None => None,
    };

    let comments = state
        .store
        .comments_for_article(article.id)
        .await?
        .into_iter()
        .map(DisplayComment::masked)
        .collect();
    let tree = build_tree(comments);

    let author = visitor.comment_author(state.config.site_root.as_str());
    let form = comment_form(
        &article.id.to_string(),
        "",
        &author,
        "",
        &FieldErrors::new(),
    );
    let data = page_data(&state, &visitor)
        .await?
        .with("article", render::article_value(&article, category.as_ref()))
        .with("comments", render::comment_tree_value(&tree))
        .with("form", form);
    render_page(&state, "article_detail", data)
}

fn comment_form(
    article: &str,
    parent: &str,
    author: &RememberedAuthor,
    content: &str,
    errors: &FieldErrors,
) -> Value {
    render::form_value(
        &[
            ("article", article),
            ("parent", parent),
            ("user_name", author.user_name.as_str()),
            ("user_email", author.user_email.as_str()),
            ("user_url", author.user_url.as_str()),
            ("content", content),
        ],
        errors,
    )
}

pub async fn comment_add(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfProtectedForm<CommentInput>>,
) -> Result<Response> {
    let input = checked(&session, form).await?;
    submit_comment(&state, &session, input).await
}

#[derive(Debug, Deserialize)]
pub struct ReplyPath {
    article: String,
    pk: String,
}

impl ReplyPath {
    fn ids(&self) -> Result<(i64, i64)> {
        match (self.article.parse(), self.pk.parse()) {
            (Ok(article), Ok(pk)) => Ok((article, pk)),
            _ => Err(Error::NotFound),
        }
    }
}

/// Renders the reply form. Since this is reachable with a plain GET, the
/// Referer's path must name the article being replied to.
pub async fn comment_reply_form(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    AxumPath(path): AxumPath<ReplyPath>,
) -> Result<Html<String>> {
    let (article_id, parent_id) = path.ids()?;
    let article = state
        .store
        .article_by_id(article_id)
        .await?
        .ok_or(Error::NotFound)?;
    if !referred_by(&headers, &article) {
        warn!(article = %article.slug, "reply form requested without a matching referer");
        return Err(Error::Forbidden);
    }

    let visitor = Visitor::from_session(&session).await?;
    let author = visitor.comment_author(state.config.site_root.as_str());
    let form = comment_form(
        &article_id.to_string(),
        &parent_id.to_string(),
        &author,
        "",
        &FieldErrors::new(),
    );
    let data = page_data(&state, &visitor).await?.with("form", form);
    render_page(&state, "comment_add", data)
}

fn referred_by(headers: &HeaderMap, article: &Article) -> bool {
    let referer = match headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        Some(referer) => referer,
        None => return false,
    };
    match url::Url::parse(referer) {
        Ok(url) => url.path().contains(&article.slug),
        Err(_) => false,
    }
}

/// Creates a reply. The article and parent come from the path.
pub async fn comment_reply(
    State(state): State<AppState>,
    session: Session,
    AxumPath(path): AxumPath<ReplyPath>,
    Form(form): Form<CsrfProtectedForm<CommentInput>>,
) -> Result<Response> {
    let (article_id, parent_id) = path.ids()?;
    let mut input = checked(&session, form).await?;
    input.article = article_id.to_string();
    input.parent = Some(parent_id.to_string());
    submit_comment(&state, &session, input).await
}

async fn submit_comment(
    state: &AppState,
    session: &Session,
    input: CommentInput,
) -> Result<Response> {
    let visitor = Visitor::from_session(session).await?;
    let submission = match input.validate() {
        Ok(submission) => submission,
        Err(errors) => return comment_form_errors(state, &visitor, &input, errors).await,
    };

    let mut errors = FieldErrors::new();
    let article = state.store.article_by_id(submission.article_id).await?;
    if article.is_none() {
        errors.add("article", "Select a valid choice.");
    }
    if let Some(parent_id) = submission.parent_id {
        match state.store.comment_by_id(parent_id).await? {
            Some(parent) if parent.article_id == submission.article_id => {}
            _ => errors.add("parent", "Select a valid choice."),
        }
    }
    let article = match article {
        Some(article) if errors.is_empty() => article,
        _ => return comment_form_errors(state, &visitor, &input, errors).await,
    };

    if !visitor.is_authenticated() {
        auth::remember_author(
            session,
            RememberedAuthor {
                user_name: submission.user_name.clone(),
                user_email: submission.user_email.clone(),
                user_url: submission.user_url.clone(),
            },
        )
        .await?;
    }

    let comment = state
        .store
        .insert_comment(&NewComment {
            article_id: submission.article_id,
            parent_id: submission.parent_id,
            user_name: submission.user_name,
            user_email: submission.user_email,
            user_url: submission.user_url,
            content: submission.content,
            is_approved: visitor.is_superuser(),
        })
        .await?;
    info!(
        comment = comment.id,
        article = %article.slug,
        approved = comment.is_approved,
        "comment added"
    );
    Ok(Redirect::to(&format!("{}#{}", article.url(), comment.anchor())).into_response())
}

async fn comment_form_errors(
    state: &AppState,
    visitor: &Visitor,
    input: &CommentInput,
    errors: FieldErrors,
) -> Result<Response> {
    let author = RememberedAuthor {
        user_name: input.user_name.clone(),
        user_email: input.user_email.clone(),
        user_url: input.user_url.clone(),
    };
    let form = comment_form(
        &input.article,
        input.parent.as_deref().unwrap_or(""),
        &author,
        &input.content,
        &errors,
    );
    let data = page_data(state, visitor).await?.with("form", form);
    Ok(render_page(state, "comment_add", data)?.into_response())
}

fn rss(xml: String) -> Response {
    ([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], xml).into_response()
}

pub async fn site_feed(State(state): State<AppState>) -> Result<Response> {
    let store = &state.store;
    let config = FeedConfig::site(
        store.setting("site_title").await?,
        store.setting("site_description").await?,
    );
    let articles: Vec<Article> = store
        .published_regular(None, state.config.feed_size, 0)
        .await?
        .into_iter()
        .map(|summary| summary.article)
        .collect();
    Ok(rss(feed::articles_feed(
        config,
        &state.config.site_root,
        &articles,
    )?))
}

pub async fn category_feed(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    let store = &state.store;
    let category = store
        .category_by_slug(&slug)
        .await?
        .ok_or(Error::NotFound)?;
    let config = FeedConfig::category(store.setting("site_title").await?, &category);
    let articles: Vec<Article> = store
        .published_regular(Some(category.id), state.config.feed_size, 0)
        .await?
        .into_iter()
        .map(|summary| summary.article)
        .collect();
    Ok(rss(feed::articles_feed(
        config,
        &state.config.site_root,
        &articles,
    )?))
}

pub async fn comments_feed(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
) -> Result<Response> {
    let store = &state.store;
    let article = store
        .article_by_slug(&slug, false)
        .await?
        .ok_or(Error::NotFound)?;
    let comments = store
        .approved_comments(article.id, state.config.comments_feed_size)
        .await?;
    Ok(rss(feed::comments_feed(
        FeedConfig::comments(&article),
        &state.config.site_root,
        &article,
        &comments,
    )?))
}

fn contact_form(input: &ContactInput, errors: &FieldErrors) -> Value {
    let mut form = render::form_value(
        &[
            ("subject", input.subject.as_str()),
            ("sender", input.sender.as_str()),
            ("message", input.message.as_str()),
        ],
        errors,
    );
    if let Value::Object(fields) = &mut form {
        fields.insert("copy".to_owned(), Value::Bool(input.copy.is_some()));
    }
    form
}

pub async fn contact_page(State(state): State<AppState>, session: Session) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    let form = contact_form(&ContactInput::default(), &FieldErrors::new());
    let data = page_data(&state, &visitor).await?.with("form", form);
    render_page(&state, "contact", data)
}

pub async fn contact_send(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfProtectedForm<ContactInput>>,
) -> Result<Response> {
    let input = checked(&session, form).await?;
    let message = match input.validate() {
        Ok(message) => message,
        Err(errors) => {
            let visitor = Visitor::from_session(&session).await?;
            let data = page_data(&state, &visitor)
                .await?
                .with("form", contact_form(&input, &errors));
            return Ok(render_page(&state, "contact", data)?.into_response());
        }
    };

    let mail = OutgoingMail::contact(&state.config.contact, &message);
    match state.mailer.send(&mail).await {
        Ok(()) => Ok(Redirect::to("/lbe/thanks/").into_response()),
        Err(mail::Error::BadHeader(value)) => {
            warn!(value = %value, "contact form rejected: invalid header");
            Ok((StatusCode::BAD_REQUEST, "Invalid header found").into_response())
        }
        Err(err) => {
            error!("Failed to send contact mail: {}", err);
            Ok((StatusCode::BAD_GATEWAY, "Your message could not be sent").into_response())
        }
    }
}

pub async fn thanks(State(state): State<AppState>, session: Session) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    render_page(&state, "thanks", page_data(&state, &visitor).await?)
}

fn registration_form(input: &RegistrationInput, errors: &FieldErrors) -> Value {
    // The password is never echoed back.
    render::form_value(
        &[
            ("username", input.username.as_str()),
            ("email", input.email.as_str()),
            ("password", ""),
            ("website", input.website.as_str()),
        ],
        errors,
    )
}

pub async fn register_page(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    let data = page_data(&state, &visitor)
        .await?
        .with(
            "form",
            registration_form(&RegistrationInput::default(), &FieldErrors::new()),
        )
        .with("registered", Value::Bool(false));
    render_page(&state, "register", data)
}

pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfProtectedForm<RegistrationInput>>,
) -> Result<Html<String>> {
    let input = checked(&session, form).await?;
    let visitor = Visitor::from_session(&session).await?;
    let result = match input.validate() {
        Ok((account, profile)) => {
            let user = NewUser {
                username: account.username,
                email: account.email,
                password_hash: auth::hash_password_blocking(account.password).await?,
                is_superuser: false,
            };
            match state.store.create_user(&user, &profile.website).await {
                Ok(created) => {
                    info!(user = %created.username, "user registered");
                    Ok(())
                }
                Err(store::Error::Conflict(_)) => {
                    let mut errors = FieldErrors::new();
                    errors.add("username", "A user with that username already exists.");
                    Err(errors)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(errors) => Err(errors),
    };

    let (registered, errors) = match result {
        Ok(()) => (true, FieldErrors::new()),
        Err(errors) => (false, errors),
    };
    let data = page_data(&state, &visitor)
        .await?
        .with("form", registration_form(&input, &errors))
        .with("registered", Value::Bool(registered));
    render_page(&state, "register", data)
}

pub async fn login_page(State(state): State<AppState>, session: Session) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    render_page(&state, "login", page_data(&state, &visitor).await?)
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfProtectedForm<LoginInput>>,
) -> Result<Response> {
    let input = checked(&session, form).await?;
    match auth::authenticate(&state.store, &input.username, &input.password).await? {
        Login::Success(user) => {
            auth::login(&session, &user).await?;
            info!(user = %user.username, "logged in");
            Ok(Redirect::to("/").into_response())
        }
        Login::Inactive => Ok("Your account is disabled.".into_response()),
        Login::Invalid => {
            warn!(username = %input.username, "invalid login");
            let visitor = Visitor::from_session(&session).await?;
            let data = page_data(&state, &visitor).await?;
            Ok(render_page(&state, "login_error", data)?.into_response())
        }
    }
}

pub async fn logout(session: Session) -> Result<Redirect> {
    let visitor = Visitor::from_session(&session).await?;
    if !visitor.is_authenticated() {
        return Ok(Redirect::to("/lbe/login/?next=/lbe/logout/"));
    }
    auth::logout(&session).await?;
    info!(user = %visitor.username(), "logged out");
    Ok(Redirect::to("/"))
}

async fn chat_page_data(
    state: &AppState,
    visitor: &Visitor,
    input: &ChatInput,
    errors: &FieldErrors,
) -> Result<PageData> {
    let messages = state.store.recent_chat_messages(CHAT_HISTORY).await?;
    Ok(page_data(state, visitor)
        .await?
        .with(
            "form",
            render::form_value(
                &[
                    ("Author", input.author.as_str()),
                    ("Text", input.text.as_str()),
                ],
                errors,
            ),
        )
        .with(
            "messages",
            Value::Array(messages.iter().map(Value::from).collect()),
        ))
}

pub async fn chat_page(State(state): State<AppState>, session: Session) -> Result<Html<String>> {
    let visitor = Visitor::from_session(&session).await?;
    let data = chat_page_data(&state, &visitor, &ChatInput::default(), &FieldErrors::new()).await?;
    render_page(&state, "chat", data)
}

pub async fn chat_post(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfProtectedForm<ChatInput>>,
) -> Result<Response> {
    let input = checked(&session, form).await?;
    match input.validate() {
        Ok(line) => {
            state.store.insert_chat_message(&line.author, &line.text).await?;
            Ok(Redirect::to("/lbe/chat/").into_response())
        }
        Err(errors) => {
            let visitor = Visitor::from_session(&session).await?;
            let data = chat_page_data(&state, &visitor, &input, &errors).await?;
            Ok(render_page(&state, "chat", data)?.into_response())
        }
    }
}

pub async fn not_found() -> Error {
    Error::NotFound
}

/// Marks a response whose body should be replaced by a themed error page.
#[derive(Debug, Clone, Copy)]
struct ErrorPage(&'static str);

/// Replaces the body of 404 and 403 responses produced by handlers with the
/// theme's page for them.
pub async fn themed_errors(
    State(state): State<AppState>,
    session: Session,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let kind = match response.extensions().get::<ErrorPage>() {
        Some(ErrorPage(kind)) => *kind,
        None => return response,
    };
    let status = response.status();
    match error_page(&state, &session, kind).await {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn error_page(state: &AppState, session: &Session, kind: &str) -> Result<Html<String>> {
    let visitor = Visitor::from_session(session).await?;
    let data = page_data(state, &visitor).await?;
    render_page(state, kind, data)
}

/// The ways a request can fail.
#[derive(Debug)]
pub enum Error {
    /// Rendered as the theme's not-found page.
    NotFound,

    /// Rendered as the theme's permission-denied page.
    Forbidden,

    /// Anything else; logged and answered with a bare 500.
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Forbidden => write!(f, "permission denied"),
            Error::Internal(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => {
                let mut response = StatusCode::NOT_FOUND.into_response();
                response.extensions_mut().insert(ErrorPage("not_found"));
                response
            }
            Error::Forbidden => {
                let mut response = StatusCode::FORBIDDEN.into_response();
                response.extensions_mut().insert(ErrorPage("forbidden"));
                response
            }
            Error::Internal(err) => {
                error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Error {
        Error::Internal(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for Error {
    fn from(err: tower_sessions::session::Error) -> Error {
        Error::Internal(err.to_string())
    }
}

impl From<auth::Error> for Error {
    fn from(err: auth::Error) -> Error {
        Error::Internal(err.to_string())
    }
}

impl From<render::Error> for Error {
    fn from(err: render::Error) -> Error {
        Error::Internal(err.to_string())
    }
}

impl From<feed::Error> for Error {
    fn from(err: feed::Error) -> Error {
        Error::Internal(err.to_string())
    }
}
