//! Loads the project file (`lbe.yaml`) and the theme description
//! (`theme/theme.yaml`) into a [`Config`].

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

pub const PROJECT_FILE: &str = "lbe.yaml";

#[derive(Deserialize)]
struct PageSize(usize);
impl Default for PageSize {
    fn default() -> Self {
        PageSize(10)
    }
}

#[derive(Deserialize)]
struct FeedSize(usize);
impl Default for FeedSize {
    fn default() -> Self {
        FeedSize(10)
    }
}

#[derive(Deserialize)]
struct CommentsFeedSize(usize);
impl Default for CommentsFeedSize {
    fn default() -> Self {
        CommentsFeedSize(25)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_database_url() -> String {
    String::from("sqlite://lbe.db?mode=rwc")
}

#[derive(Deserialize)]
struct Project {
    site_root: Url,

    #[serde(default = "default_listen")]
    listen: SocketAddr,

    #[serde(default = "default_database_url")]
    database_url: String,

    #[serde(default)]
    index_page_size: PageSize,

    #[serde(default)]
    feed_size: FeedSize,

    #[serde(default)]
    comments_feed_size: CommentsFeedSize,

    #[serde(default)]
    secure_cookies: bool,

    contact: Contact,

    #[serde(default)]
    smtp: Option<Smtp>,
}

/// Where contact-form mail comes from and goes to.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Contact {
    pub from: String,
    pub recipients: Vec<String>,
}

/// SMTP relay settings. Without them, outgoing mail is only logged.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Smtp {
    pub host: String,

    #[serde(default = "Smtp::default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Smtp {
    fn default_port() -> u16 {
        25
    }
}

/// The theme description: for each page kind, the template files that are
/// concatenated (in order) into that page's template.
#[derive(Deserialize)]
struct Theme {
    #[serde(default = "Theme::default_static")]
    static_directory: PathBuf,
    templates: HashMap<String, Vec<PathBuf>>,
}

impl Theme {
    fn default_static() -> PathBuf {
        PathBuf::from("static")
    }
}

pub struct Config {
    pub site_root: Url,
    pub listen: SocketAddr,
    pub database_url: String,
    pub index_page_size: usize,
    pub feed_size: usize,
    pub comments_feed_size: usize,
    pub secure_cookies: bool,
    pub contact: Contact,
    pub smtp: Option<Smtp>,

    /// Absolute template file lists, keyed by page kind.
    pub templates: HashMap<String, Vec<PathBuf>>,
    pub static_directory: PathBuf,
}

impl Config {
    /// Searches `dir` and then its ancestors for `lbe.yaml` and loads the
    /// first one found. `dir` is made absolute first, so a relative path
    /// such as `.` still reaches directories above it.
    pub fn from_directory(dir: &Path) -> Result<Config> {
        let dir = dir
            .canonicalize()
            .map_err(|err| Error::Open(dir.to_owned(), err))?;
        for candidate in dir.ancestors() {
            let path = candidate.join(PROJECT_FILE);
            if path.exists() {
                return Config::from_project_file(&path);
            }
        }
        Err(Error::ProjectNotFound)
    }

    pub fn from_project_file(path: &Path) -> Result<Config> {
        let project: Project = serde_yaml::from_reader(open(path)?)
            .map_err(|err| Error::Yaml(path.to_owned(), err))?;
        let project_root = path
            .parent()
            .ok_or_else(|| Error::NoParent(path.to_owned()))?;

        let theme_dir = project_root.join("theme");
        let theme_path = theme_dir.join("theme.yaml");
        let theme: Theme = serde_yaml::from_reader(open(&theme_path)?)
            .map_err(|err| Error::Yaml(theme_path.clone(), err))?;

        Ok(Config {
            site_root: project.site_root,
            listen: project.listen,
            database_url: project.database_url,
            index_page_size: project.index_page_size.0,
            feed_size: project.feed_size.0,
            comments_feed_size: project.comments_feed_size.0,
            secure_cookies: project.secure_cookies,
            contact: project.contact,
            smtp: project.smtp,
            templates: theme
                .templates
                .into_iter()
                .map(|(page, files)| {
                    let files = files.iter().map(|relpath| theme_dir.join(relpath)).collect();
                    (page, files)
                })
                .collect(),
            static_directory: theme_dir.join(theme.static_directory),
        })
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| Error::Open(path.to_owned(), err))
}

pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem loading configuration.
#[derive(Debug)]
pub enum Error {
    /// Returned when no `lbe.yaml` exists in the directory or its ancestors.
    ProjectNotFound,

    /// Returned when a configuration file can't be opened.
    Open(PathBuf, std::io::Error),

    /// Returned when a configuration file isn't valid YAML for its shape.
    Yaml(PathBuf, serde_yaml::Error),

    /// Returned when the project file path has no parent directory.
    NoParent(PathBuf),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ProjectNotFound => write!(
                f,
                "Could not find `{}` in any parent directory",
                PROJECT_FILE
            ),
            Error::Open(path, err) => write!(f, "Opening `{}`: {}", path.display(), err),
            Error::Yaml(path, err) => write!(f, "Loading `{}`: {}", path.display(), err),
            Error::NoParent(path) => write!(
                f,
                "Can't get parent directory for provided project file path '{}'",
                path.display()
            ),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ProjectNotFound => None,
            Error::Open(_, err) => Some(err),
            Error::Yaml(_, err) => Some(err),
            Error::NoParent(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_shipped_project() -> Result<()> {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let config = Config::from_directory(&root.join("theme").join("static"))?;
        assert_eq!("http://127.0.0.1:8000/", config.site_root.as_str());
        assert_eq!(10, config.index_page_size);
        assert_eq!(25, config.comments_feed_size);
        assert!(config.smtp.is_none());
        assert_eq!(
            Some(&root.join("theme").join("base.html")),
            config.templates["article_detail"].first()
        );
        Ok(())
    }

    #[test]
    fn test_relative_directory() -> Result<()> {
        // Tests run from the package root.
        let config = Config::from_directory(Path::new("theme"))?;
        assert!(config.templates["article_list"]
            .iter()
            .all(|path| path.is_absolute()));
        assert!(config.static_directory.is_absolute());
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let dir = std::env::temp_dir().join("lbe-config-test-does-not-exist");
        assert!(matches!(
            Config::from_directory(&dir),
            Err(Error::Open(_, _))
        ));
    }

    #[test]
    fn test_missing_project() {
        let dir = std::env::temp_dir().join("lbe-config-test-missing");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            Config::from_directory(&dir),
            Err(Error::ProjectNotFound)
        ));
    }
}
