//! Loads articles from markdown source files into the store. This is how
//! articles get written: authoring happens in a text editor, and `lbe import`
//! upserts the results by slug.
//!
//! A source directory holds `{slug}.md` files and `{slug}/index.md` bundles,
//! each structured as follows:
//!
//! 1. Initial frontmatter fence (`---`)
//! 2. YAML frontmatter with fields `Title`, `Date`, and optionally
//!    `Category`, `Published` (default `true`) and `Standalone` (default
//!    `false`)
//! 3. Terminal frontmatter fence (`---`)
//! 4. Article body (markdown)
//!
//! For example:
//!
//! ```md
//! ---
//! Title: Hello, world!
//! Date: 2021-04-16
//! Category: rust
//! ---
//! # Hello
//!
//! World
//! ```
//!
//! An optional `categories.yaml` in the same directory names and describes
//! the categories articles refer to.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::store::{self, ArticleDraft, Store};

const MARKDOWN_EXTENSION: &str = "md";
const BUNDLE_INDEX: &str = "index.md";
const CATEGORIES_FILE: &str = "categories.yaml";

#[derive(Deserialize, Clone, Debug)]
struct Frontmatter {
    #[serde(rename = "Title")]
    title: String,

    #[serde(rename = "Date")]
    date: String,

    #[serde(default, rename = "Category")]
    category: Option<String>,

    #[serde(default = "default_published", rename = "Published")]
    published: bool,

    #[serde(default, rename = "Standalone")]
    standalone: bool,
}

fn default_published() -> bool {
    true
}

/// A category's display fields, as given in `categories.yaml`.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CategorySource {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// One parsed article source file.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub slug: String,
    pub title: String,
    pub created: DateTime<Utc>,

    /// The slug of the article's category, if any.
    pub category: Option<String>,
    pub is_published: bool,
    pub is_standalone: bool,
    pub content: String,
}

/// Everything found in a source directory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sources {
    pub articles: Vec<Source>,
    pub categories: HashMap<String, CategorySource>,
}

/// First path segments taken by fixed routes. An article with one of these
/// slugs would be shadowed.
pub const RESERVED_SLUGS: &[&str] = &["category", "comment", "feed", "lbe", "static"];

/// Parses a single source file. `slug` comes from the file (or bundle
/// directory) name.
pub fn parse_source(slug: &str, input: &str) -> Result<Source> {
    fn frontmatter_indices(input: &str) -> Result<(usize, usize, usize)> {
        const FENCE: &str = "---";
        if !input.starts_with(FENCE) {
            return Err(Error::FrontmatterMissingStartFence);
        }
        match input[FENCE.len()..].find(FENCE) {
            None => Err(Error::FrontmatterMissingEndFence),
            Some(offset) => Ok((
                FENCE.len(),                        // yaml_start
                FENCE.len() + offset,               // yaml_stop
                FENCE.len() + offset + FENCE.len(), // body_start
            )),
        }
    }

    let slug = slug::slugify(slug);
    if slug.is_empty() || RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(Error::ReservedSlug(slug));
    }

    let (yaml_start, yaml_stop, body_start) = frontmatter_indices(input)?;
    let frontmatter: Frontmatter = serde_yaml::from_str(&input[yaml_start..yaml_stop])?;
    Ok(Source {
        slug,
        title: frontmatter.title,
        created: parse_date(&frontmatter.date)?,
        category: frontmatter
            .category
            .as_deref()
            .map(slug::slugify)
            .filter(|c| !c.is_empty()),
        is_published: frontmatter.published,
        is_standalone: frontmatter.standalone,
        content: input[body_start..].trim_start_matches(['\r', '\n']).to_owned(),
    })
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_date(date: &str) -> Result<DateTime<Utc>> {
    let date = date.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(date) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| Error::InvalidDate(date.to_owned()))
}

/// Searches `source_directory` for article files and bundles and returns
/// them sorted by date (oldest first), along with `categories.yaml` if
/// present.
pub fn parse_sources(source_directory: &Path) -> Result<Sources> {
    let mut articles = Vec::new();
    for result in WalkDir::new(source_directory)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = result?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let slug = match (entry.depth(), path.extension()) {
            (1, Some(ext)) if ext == MARKDOWN_EXTENSION => path.file_stem(),
            (2, _) if entry.file_name() == BUNDLE_INDEX => {
                path.parent().and_then(|bundle| bundle.file_name())
            }
            _ => continue,
        }
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidFileName(path.to_owned()))?;

        let contents = read(path)?;
        let source = parse_source(slug, &contents)
            .map_err(|e| Error::Annotated(format!("parsing `{}`", path.display()), Box::new(e)))?;
        articles.push(source);
    }
    articles.sort_by(|a, b| a.created.cmp(&b.created));

    let categories_path = source_directory.join(CATEGORIES_FILE);
    let categories = if categories_path.is_file() {
        serde_yaml::from_str(&read(&categories_path)?)?
    } else {
        HashMap::new()
    };
    Ok(Sources {
        articles,
        categories,
    })
}

fn read(path: &Path) -> Result<String> {
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Upserts every category and article in `sources`. Categories referenced by
/// an article but missing from `categories.yaml` are named after their slug.
pub async fn import(store: &Store, sources: &Sources) -> Result<usize> {
    let mut category_ids: HashMap<&str, i64> = HashMap::new();
    for article in &sources.articles {
        let slug = match &article.category {
            Some(slug) => slug.as_str(),
            None => continue,
        };
        if category_ids.contains_key(slug) {
            continue;
        }
        let described = sources.categories.get(slug).cloned().unwrap_or_default();
        let name = if described.name.is_empty() {
            slug.to_owned()
        } else {
            described.name
        };
        let category = store
            .upsert_category(slug, &name, &described.description)
            .await?;
        category_ids.insert(slug, category.id);
    }

    for article in &sources.articles {
        let stored = store
            .upsert_article(&ArticleDraft {
                slug: article.slug.clone(),
                title: article.title.clone(),
                content: article.content.clone(),
                category_id: article
                    .category
                    .as_deref()
                    .and_then(|slug| category_ids.get(slug).copied()),
                is_published: article.is_published,
                is_standalone: article.is_standalone,
                created: article.created,
            })
            .await?;
        info!(slug = %stored.slug, id = stored.id, "imported article");
    }
    Ok(sources.articles.len())
}

/// Represents the result of an import operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error importing articles.
#[derive(Debug)]
pub enum Error {
    /// Returned when a source file is missing its starting frontmatter
    /// fence (`---`).
    FrontmatterMissingStartFence,

    /// Returned when a source file is missing its terminal frontmatter
    /// fence (`---` i.e., the starting fence was found but the ending one was
    /// missing).
    FrontmatterMissingEndFence,

    /// Returned when there was an error parsing YAML.
    DeserializeYaml(serde_yaml::Error),

    /// Returned when `Date` is neither RFC 3339 nor `YYYY-MM-DD`.
    InvalidDate(String),

    /// Returned when a source file name isn't valid UTF-8.
    InvalidFileName(PathBuf),

    /// Returned when a file name slugifies to nothing or to a path the site
    /// already routes elsewhere.
    ReservedSlug(String),

    /// Returned for other I/O errors.
    Io(std::io::Error),

    /// Returned for WalkDir I/O errors.
    WalkDir(walkdir::Error),

    /// Returned when writing to the store fails.
    Store(store::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FrontmatterMissingStartFence => {
                write!(f, "Article must begin with `---`")
            }
            Error::FrontmatterMissingEndFence => {
                write!(f, "Missing closing `---`")
            }
            Error::DeserializeYaml(err) => err.fmt(f),
            Error::InvalidDate(date) => write!(f, "invalid date: {:?}", date),
            Error::InvalidFileName(path) => write!(f, "invalid file name: {:?}", path),
            Error::ReservedSlug(slug) => write!(f, "unusable article slug: {:?}", slug),
            Error::Io(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Store(err) => err.fmt(f),
            Error::Annotated(annotation, err) => {
                write!(f, "{}: {}", &annotation, err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DeserializeYaml(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    /// Converts a [`serde_yaml::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for [`serde_yaml`] deserialization functions.
    fn from(err: serde_yaml::Error) -> Error {
        Error::DeserializeYaml(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`].
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

impl From<std::io::Error> for Error {
    /// Converts a [`std::io::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator for fallible I/O functions.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Error {
        Error::Store(err)
    }
}
