//! Loads the theme's templates and converts models into template
//! [`Value`]s. Templates are plain `gtmpl` (Go template syntax), which does
//! no escaping of its own: every piece of visitor- or author-supplied text is
//! HTML-escaped here, and only markdown rendered by [`crate::markdown`]
//! reaches the page raw.

use gtmpl::{Context, Template};
use gtmpl_value::Value;
use pulldown_cmark::escape::escape_html;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::forms::FieldErrors;
use crate::htmlrenderer::Trust;
use crate::markdown;
use crate::models::{Article, ArticleSummary, Category, ChatMessage, Comment};
use crate::page::Page;
use crate::tree::{thread, CommentNode, ThreadEntry, Threaded};

/// Every page kind a theme must provide.
pub const PAGE_KINDS: &[&str] = &[
    "article_list",
    "article_detail",
    "comment_add",
    "contact",
    "thanks",
    "register",
    "login",
    "login_error",
    "chat",
    "not_found",
    "forbidden",
];

/// The parsed-and-checked template sources of a theme, one per page kind.
/// `gtmpl` templates can't be shared between threads, so each render parses
/// its own copy of the (already validated) source.
#[derive(Clone, Debug)]
pub struct Theme {
    sources: HashMap<String, String>,
}

impl Theme {
    /// Concatenates each page kind's template files and checks that the
    /// result parses.
    pub fn load(templates: &HashMap<String, Vec<PathBuf>>) -> Result<Theme> {
        let mut sources = HashMap::new();
        for kind in PAGE_KINDS {
            let files = templates
                .get(*kind)
                .ok_or_else(|| Error::MissingTemplate(kind.to_string()))?;
            let source = read_template(files.iter())?;
            parse(&source).map_err(|err| Error::ParseTemplate(kind.to_string(), err))?;
            sources.insert(kind.to_string(), source);
        }
        Ok(Theme { sources })
    }

    /// Renders the page kind `kind` with `value` as the root of the data.
    pub fn render(&self, kind: &str, value: Value) -> Result<String> {
        let source = self
            .sources
            .get(kind)
            .ok_or_else(|| Error::MissingTemplate(kind.to_owned()))?;
        let template = parse(source).map_err(|err| Error::ParseTemplate(kind.to_owned(), err))?;
        let context = Context::from(value).map_err(Error::Execute)?;
        let mut out: Vec<u8> = Vec::new();
        template.execute(&mut out, &context).map_err(Error::Execute)?;
        String::from_utf8(out).map_err(|err| Error::Execute(err.to_string()))
    }
}

fn parse(source: &str) -> std::result::Result<Template, String> {
    let mut template = Template::default();
    template.parse(source)?;
    Ok(template)
}

// Loads the template file contents, appending them one after the other.
fn read_template<P: AsRef<Path>>(template_files: impl Iterator<Item = P>) -> Result<String> {
    let mut contents = String::new();
    for template_file in template_files {
        let template_file = template_file.as_ref();
        File::open(template_file)
            .and_then(|mut file| file.read_to_string(&mut contents))
            .map_err(|e| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err: e,
            })?;
        contents.push(' ');
    }
    Ok(contents)
}

/// HTML-escapes `s`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    // Writing into a `String` can't fail.
    let _ = escape_html(&mut out, s);
    out
}

/// An escaped text value.
pub fn text(s: &str) -> Value {
    Value::String(escape(s))
}

/// A value that is already HTML and goes into the page unescaped.
pub fn html(s: String) -> Value {
    Value::String(s)
}

pub fn object<I>(fields: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    Value::Object(
        fields
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect(),
    )
}

fn optional(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Nil)
}

fn date(created: &chrono::DateTime<chrono::Utc>) -> Value {
    Value::String(created.format("%Y-%m-%d %H:%M").to_string())
}

impl From<&Category> for Value {
    /// Converts a [`Category`] for templating.
    fn from(c: &Category) -> Value {
        object(vec![
            ("slug", text(&c.slug)),
            ("name", text(&c.name)),
            ("description", text(&c.description)),
            ("url", text(&c.url())),
            ("feed_url", text(&c.feed_url())),
        ])
    }
}

/// The list-page view of an article: only the part above the fold, with
/// footnote links pointing at the article page.
pub fn summary_value(summary: &ArticleSummary, category: Option<&Category>) -> Value {
    let article = &summary.article;
    let url = article.url();
    let (above_fold, summarized) = article.summary();
    object(vec![
        ("title", text(&article.title)),
        ("url", text(&url)),
        ("created", date(&article.created)),
        ("summary", html(markdown::render(above_fold, &url, Trust::Trusted))),
        ("summarized", Value::Bool(summarized)),
        ("comment_count", Value::from(summary.comment_count)),
        ("category", optional(category.map(Value::from))),
    ])
}

pub fn article_value(article: &Article, category: Option<&Category>) -> Value {
    object(vec![
        ("id", Value::from(article.id)),
        ("title", text(&article.title)),
        ("url", text(&article.url())),
        ("created", date(&article.created)),
        ("content", html(markdown::render(&article.content, "", Trust::Trusted))),
        ("is_published", Value::Bool(article.is_published)),
        ("comments_feed_url", text(&article.comments_feed_url())),
        ("category", optional(category.map(Value::from))),
    ])
}

/// A comment as it is displayed. Unapproved comments are masked before the
/// tree is built; masking never touches the id or parent.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayComment {
    pub comment: Comment,
    pub under_moderation: bool,
}

pub const MODERATION_NOTICE: &str = "Comment is under moderation";
pub const MODERATION_CLASS: &str = "comment-under-moderation";

impl DisplayComment {
    /// Wraps `comment`, hiding its content and URL unless it is approved.
    pub fn masked(mut comment: Comment) -> DisplayComment {
        let under_moderation = !comment.is_approved;
        if under_moderation {
            comment.user_url = String::new();
            comment.content = String::from(MODERATION_NOTICE);
        }
        DisplayComment {
            comment,
            under_moderation,
        }
    }
}

impl Threaded for DisplayComment {
    fn id(&self) -> i64 {
        self.comment.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.comment.parent_id
    }
}

fn comment_value(entry: &ThreadEntry<'_, DisplayComment>) -> Value {
    let display = entry.comment;
    let c = &display.comment;
    let content = if display.under_moderation {
        text(&c.content)
    } else {
        html(markdown::render(&c.content, "", Trust::Untrusted))
    };
    object(vec![
        ("id", Value::from(c.id)),
        ("anchor", text(&c.anchor())),
        ("user_name", text(&c.user_name)),
        ("user_url", text(&c.user_url)),
        ("content", content),
        ("created", date(&c.created)),
        (
            "css_class",
            text(if display.under_moderation { MODERATION_CLASS } else { "" }),
        ),
        (
            "reply_url",
            text(&format!("/comment/reply/{}/{}", c.article_id, c.id)),
        ),
        ("depth", Value::from(entry.depth as i64)),
        ("has_replies", Value::Bool(entry.has_replies)),
        // gtmpl can't count, so the closing tags are driven by ranging over
        // this.
        ("closes", Value::Array(vec![Value::Nil; entry.closes])),
    ])
}

/// Converts a comment forest into a flat, pre-order list of values. The
/// theme opens a reply list after each comment with `has_replies` and
/// closes one level per element of `closes`, so neither building nor
/// rendering the page recurses with the depth of a thread.
pub fn comment_tree_value(roots: &[CommentNode<DisplayComment>]) -> Value {
    Value::Array(thread(roots).iter().map(comment_value).collect())
}

impl From<&ChatMessage> for Value {
    fn from(m: &ChatMessage) -> Value {
        object(vec![
            ("author", text(&m.author)),
            ("text", text(&m.text)),
            ("created", date(&m.created)),
        ])
    }
}

impl From<&Page> for Value {
    /// Converts a [`Page`] into a [`Value::Object`] with fields `number`,
    /// `num_pages`, `prev`, and `next`.
    fn from(p: &Page) -> Value {
        let option_to_value = |opt: &Option<String>| match opt {
            Some(url) => text(url),
            None => Value::Nil,
        };
        object(vec![
            ("number", Value::from(p.number as i64)),
            ("num_pages", Value::from(p.num_pages as i64)),
            ("prev", option_to_value(&p.prev)),
            ("next", option_to_value(&p.next)),
        ])
    }
}

/// A form's state for re-display: each field's current value and messages.
pub fn form_value(fields: &[(&'static str, &str)], errors: &FieldErrors) -> Value {
    let mut m: HashMap<String, Value> = HashMap::new();
    for (name, value) in fields {
        m.insert(
            name.to_string(),
            object(vec![
                ("value", text(value)),
                (
                    "errors",
                    Value::Array(errors.get(name).iter().map(|e| text(e)).collect()),
                ),
            ]),
        );
    }
    m.insert("has_errors".to_owned(), Value::Bool(!errors.is_empty()));
    Value::Object(m)
}

/// Represents a problem loading or applying templates.
#[derive(Debug)]
pub enum Error {
    /// Returned when the theme lacks a template for a page kind.
    MissingTemplate(String),

    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: std::io::Error },

    /// Returned for errors parsing template files.
    ParseTemplate(String, String),

    /// Returned for errors while executing a template.
    Execute(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingTemplate(kind) => write!(f, "theme has no `{}` template", kind),
            Error::OpenTemplateFile { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
            Error::ParseTemplate(kind, err) => write!(f, "Parsing `{}` template: {}", kind, err),
            Error::Execute(err) => write!(f, "Executing template: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OpenTemplateFile { path: _, err } => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::build_tree;
    use chrono::Utc;

    fn comment(id: i64, parent_id: Option<i64>, is_approved: bool) -> Comment {
        Comment {
            id,
            article_id: 1,
            parent_id,
            user_name: String::from("<Ann>"),
            user_email: String::from("ann@example.com"),
            user_url: String::from("https://ann.example.com/"),
            content: String::from("**hi**"),
            is_approved,
            created: Utc::now(),
        }
    }

    fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
        match value {
            Value::Object(m) => &m[name],
            other => panic!("not an object: {:?}", other),
        }
    }

    fn string(value: &Value) -> &str {
        match value {
            Value::String(s) => s,
            other => panic!("not a string: {:?}", other),
        }
    }

    fn array(value: &Value) -> &[Value] {
        match value {
            Value::Array(items) => items,
            other => panic!("not an array: {:?}", other),
        }
    }

    #[test]
    fn test_masking_keeps_linkage() {
        let masked = DisplayComment::masked(comment(2, Some(1), false));
        assert!(masked.under_moderation);
        assert_eq!(MODERATION_NOTICE, masked.comment.content);
        assert_eq!("", masked.comment.user_url);
        assert_eq!(Some(1), masked.parent_id());
        assert_eq!(2, masked.id());

        let approved = DisplayComment::masked(comment(3, None, true));
        assert!(!approved.under_moderation);
        assert_eq!("**hi**", approved.comment.content);
    }

    #[test]
    fn test_comment_tree_value() {
        let tree = build_tree(vec![
            DisplayComment::masked(comment(1, None, true)),
            DisplayComment::masked(comment(2, Some(1), false)),
            DisplayComment::masked(comment(3, None, true)),
        ]);
        let value = comment_tree_value(&tree);
        let comments = array(&value);
        assert_eq!(3, comments.len());

        let first = &comments[0];
        assert_eq!("&lt;Ann&gt;", string(field(first, "user_name")));
        assert_eq!("<p><strong>hi</strong></p>", string(field(first, "content")));
        assert_eq!("/comment/reply/1/1", string(field(first, "reply_url")));
        assert_eq!(&Value::Bool(true), field(first, "has_replies"));

        let reply = &comments[1];
        assert_eq!(&Value::from(1i64), field(reply, "depth"));
        assert_eq!(MODERATION_NOTICE, string(field(reply, "content")));
        assert_eq!(MODERATION_CLASS, string(field(reply, "css_class")));
        assert_eq!(1, array(field(reply, "closes")).len());

        assert_eq!(&Value::from(0i64), field(&comments[2], "depth"));
        assert!(array(field(&comments[2], "closes")).is_empty());
    }

    #[test]
    fn test_deep_thread_renders() -> Result<()> {
        let chain: Vec<DisplayComment> = (1..=1000)
            .map(|id| {
                let parent = if id == 1 { None } else { Some(id - 1) };
                DisplayComment::masked(comment(id, parent, true))
            })
            .collect();
        let tree = build_tree(chain);
        let value = comment_tree_value(&tree);
        assert_eq!(1000, array(&value).len());

        let theme = shipped_theme()?;
        let mut data = base_data();
        data.insert("comments".to_owned(), value);
        let fields = ["article", "parent", "user_name", "user_email", "user_url", "content"];
        let fields: Vec<(&'static str, &str)> = fields.iter().map(|&name| (name, "")).collect();
        data.insert("form".to_owned(), form_value(&fields, &FieldErrors::new()));
        let article = Article {
            id: 1,
            slug: String::from("deep"),
            title: String::from("Deep"),
            content: String::from("A long thread."),
            category_id: None,
            is_published: true,
            is_standalone: false,
            created: Utc::now(),
        };
        data.insert("article".to_owned(), article_value(&article, None));
        let page = theme.render("article_detail", Value::Object(data))?;
        assert_eq!(999, page.matches(r#"<ul class="replies">"#).count());
        assert_eq!(1000, page.matches("</li>").count());
        Ok(())
    }

    #[test]
    fn test_form_value() {
        let mut errors = FieldErrors::new();
        errors.add("content", "This field is required.");
        let value = form_value(&[("user_name", "<b>"), ("content", "")], &errors);
        assert_eq!("&lt;b&gt;", string(field(field(&value, "user_name"), "value")));
        assert_eq!(1, array(field(field(&value, "content"), "errors")).len());
        assert_eq!(&Value::Bool(true), field(&value, "has_errors"));
    }

    fn shipped_theme() -> Result<Theme> {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
        let config = crate::config::Config::from_directory(root)
            .map_err(|e| Error::Execute(e.to_string()))?;
        Theme::load(&config.templates)
    }

    fn base_data() -> HashMap<String, Value> {
        vec![
            ("site_title", text("A & B")),
            ("site_description", text("")),
            ("username", text("")),
            ("is_authenticated", Value::Bool(false)),
            ("is_superuser", Value::Bool(false)),
            ("categories", Value::Array(Vec::new())),
            ("csrf_token", text("token")),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
    }

    #[test]
    fn test_shipped_theme_renders() -> Result<()> {
        let theme = shipped_theme()?;
        let page = theme.render("thanks", Value::Object(base_data()))?;
        assert!(page.contains("A &amp; B"), "{}", page);
        Ok(())
    }
}
