//! Splits a list into numbered pages (`?page=N`, starting at 1).

use std::fmt;

/// Where one page of a listing sits among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,

    /// Total number of pages; at least 1, even for an empty listing.
    pub num_pages: usize,

    /// Offset of the page's first item in the whole listing.
    pub offset: usize,

    /// Maximum number of items on the page.
    pub limit: usize,

    /// The URL for the previous page, if any.
    pub prev: Option<String>,

    /// The URL for the next page, if any.
    pub next: Option<String>,
}

/// Returned when a requested page doesn't exist or isn't a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPage(pub String);

impl fmt::Display for InvalidPage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid page: {:?}", self.0)
    }
}

impl std::error::Error for InvalidPage {}

impl Page {
    /// Resolves the `page` query parameter for a listing at `base_url`
    /// holding `total` items. A missing parameter and `last` are accepted;
    /// anything else must be a number between 1 and the page count.
    pub fn resolve(
        base_url: &str,
        requested: Option<&str>,
        total: usize,
        page_size: usize,
    ) -> Result<Page, InvalidPage> {
        let page_size = page_size.max(1);
        let num_pages = match total % page_size {
            0 => (total / page_size).max(1),
            _ => total / page_size + 1,
        };

        let number = match requested {
            None => 1,
            Some("last") => num_pages,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 && n <= num_pages => n,
                _ => return Err(InvalidPage(raw.to_owned())),
            },
        };

        Ok(Page {
            number,
            num_pages,
            offset: (number - 1) * page_size,
            limit: page_size,
            prev: match number {
                1 => None,
                2 => Some(base_url.to_owned()),
                _ => Some(format!("{}?page={}", base_url, number - 1)),
            },
            next: match number < num_pages {
                false => None,
                true => Some(format!("{}?page={}", base_url, number + 1)),
            },
        })
    }
}
