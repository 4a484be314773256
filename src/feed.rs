//! Support for creating RSS 2.0 feeds from lists of articles and comments.

use crate::htmlrenderer::Trust;
use crate::markdown;
use crate::models::{Article, Category, Comment};
use rss::{Channel, Error as RssError, Guid, Item};
use std::fmt;
use url::Url;

/// Bundled channel-level fields for creating a feed.
pub struct FeedConfig {
    pub title: String,
    pub description: String,

    /// The feed's own location, relative to the site root.
    pub link: String,
}

impl FeedConfig {
    /// The site-wide feed: titled and described by the `site_title` and
    /// `site_description` settings.
    pub fn site(title: Option<String>, description: Option<String>) -> FeedConfig {
        FeedConfig {
            title: title.unwrap_or_default(),
            description: description.unwrap_or_default(),
            link: String::from("/feed/"),
        }
    }

    /// A category's feed: `"{site title} » {category}"`, or just the category
    /// name when the site has no title.
    pub fn category(site_title: Option<String>, category: &Category) -> FeedConfig {
        FeedConfig {
            title: match site_title {
                Some(title) => [title.as_str(), " » ", &category.name].concat(),
                None => category.name.clone(),
            },
            description: category.description.clone(),
            link: category.feed_url(),
        }
    }

    /// An article's comment feed.
    pub fn comments(article: &Article) -> FeedConfig {
        FeedConfig {
            title: [article.title.as_str(), " » ", "comments"].concat(),
            description: String::from("Comments"),
            link: article.comments_feed_url(),
        }
    }
}

/// Creates a feed of articles and serializes it to XML. Relative links are
/// resolved against `site_root`.
pub fn articles_feed(config: FeedConfig, site_root: &Url, articles: &[Article]) -> Result<String> {
    let items = articles
        .iter()
        .map(|article| {
            let link = absolute(site_root, &article.url())?;
            Ok(Item {
                title: Some(article.title.clone()),
                link: Some(link.clone()),
                description: Some(markdown::render(&article.content, &link, Trust::Trusted)),
                pub_date: Some(article.created.to_rfc2822()),
                guid: Some(Guid {
                    value: link,
                    permalink: true,
                }),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<Item>>>()?;
    write_channel(config, site_root, items)
}

/// Creates a feed of an article's comments. Items are titled by the
/// commenter's name and link to the comment's anchor on the article page.
pub fn comments_feed(
    config: FeedConfig,
    site_root: &Url,
    article: &Article,
    comments: &[Comment],
) -> Result<String> {
    let article_url = absolute(site_root, &article.url())?;
    let items = comments
        .iter()
        .map(|comment| {
            let link = format!("{}#{}", article_url, comment.anchor());
            Item {
                title: Some(comment.user_name.clone()),
                link: Some(link.clone()),
                description: Some(markdown::render(&comment.content, "", Trust::Untrusted)),
                pub_date: Some(comment.created.to_rfc2822()),
                guid: Some(Guid {
                    value: link,
                    permalink: true,
                }),
                ..Default::default()
            }
        })
        .collect();
    write_channel(config, site_root, items)
}

fn write_channel(config: FeedConfig, site_root: &Url, items: Vec<Item>) -> Result<String> {
    let channel = Channel {
        link: absolute(site_root, &config.link)?,
        title: config.title,
        description: config.description,
        items,
        ..Default::default()
    };
    let bytes = channel.write_to(Vec::new())?;
    String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

fn absolute(site_root: &Url, path: &str) -> Result<String> {
    Ok(site_root.join(path)?.to_string())
}

type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed.
#[derive(Debug)]
pub enum Error {
    /// Returned when the RSS writer fails.
    Rss(RssError),

    /// Returned when a link can't be resolved against the site root.
    UrlParse(url::ParseError),

    /// Returned when the serialized feed isn't valid UTF-8.
    Encoding(String),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Rss(err) => err.fmt(f),
            Error::UrlParse(err) => err.fmt(f),
            Error::Encoding(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rss(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::Encoding(_) => None,
        }
    }
}

impl From<RssError> for Error {
    /// Converts [`RssError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: RssError) -> Error {
        Error::Rss(err)
    }
}

impl From<url::ParseError> for Error {
    /// Converts [`url::ParseError`]s into [`Error`].
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn article(slug: &str) -> Article {
        Article {
            id: 1,
            slug: slug.to_owned(),
            title: String::from("Hello"),
            content: String::from("Some *markdown*"),
            category_id: None,
            is_published: true,
            is_standalone: false,
            created: Utc.with_ymd_and_hms(2021, 4, 16, 0, 0, 0).unwrap(),
        }
    }

    fn root() -> Url {
        Url::parse("https://blog.example.org/").unwrap()
    }

    #[test]
    fn test_site_feed() -> Result<()> {
        let xml = articles_feed(
            FeedConfig::site(Some(String::from("My blog")), None),
            &root(),
            &[article("hello")],
        )?;
        let channel = Channel::read_from(xml.as_bytes())?;
        assert_eq!("My blog", channel.title);
        assert_eq!("https://blog.example.org/feed/", channel.link);
        assert_eq!(1, channel.items.len());

        let item = &channel.items[0];
        assert_eq!(Some("https://blog.example.org/hello/"), item.link.as_deref());
        assert_eq!(Some("Fri, 16 Apr 2021 00:00:00 +0000"), item.pub_date.as_deref());
        assert_eq!(
            Some("<p>Some <em>markdown</em></p>"),
            item.description.as_deref()
        );
        Ok(())
    }

    #[test]
    fn test_category_title() {
        let category = Category {
            id: 1,
            slug: String::from("rust"),
            name: String::from("Rust"),
            description: String::from("Crabs"),
        };
        let with_site = FeedConfig::category(Some(String::from("Blog")), &category);
        assert_eq!("Blog » Rust", with_site.title);
        assert_eq!("/category/rust/feed/", with_site.link);
        assert_eq!("Rust", FeedConfig::category(None, &category).title);
    }

    #[test]
    fn test_comments_feed() -> Result<()> {
        let post = article("hello");
        let comment = Comment {
            id: 7,
            article_id: 1,
            parent_id: None,
            user_name: String::from("Ann"),
            user_email: String::from("ann@example.com"),
            user_url: String::new(),
            content: String::from("<b>hi</b>"),
            is_approved: true,
            created: Utc.with_ymd_and_hms(2021, 4, 17, 0, 0, 0).unwrap(),
        };
        let xml = comments_feed(FeedConfig::comments(&post), &root(), &post, &[comment])?;
        let channel = Channel::read_from(xml.as_bytes())?;
        assert_eq!("Hello » comments", channel.title);

        let item = &channel.items[0];
        assert_eq!(Some("Ann"), item.title.as_deref());
        assert_eq!(
            Some("https://blog.example.org/hello/#comment-7"),
            item.link.as_deref()
        );
        assert_eq!(
            Some("<p>&lt;b&gt;hi&lt;/b&gt;</p>"),
            item.description.as_deref()
        );
        Ok(())
    }
}
