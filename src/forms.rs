//! Explicit validation for every form the site accepts. Each form has a raw
//! shape (`*Input`, deserialized straight from the request body and echoed
//! back on failure) and a `validate` function returning either a typed record
//! or per-field messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use url::Url;
use validator::{ValidateEmail, ValidateLength, ValidateUrl};

/// Per-field validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn new() -> FieldErrors {
        FieldErrors::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[String])> + '_ {
        self.0.iter().map(|(field, messages)| (*field, messages.as_slice()))
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    /// `Ok(value)` if no message was recorded, otherwise the messages.
    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (field, messages) in self.iter() {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

const REQUIRED: &str = "This field is required.";

fn required(errors: &mut FieldErrors, field: &'static str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.add(field, REQUIRED);
    }
    value.to_owned()
}

fn max_length<V>(errors: &mut FieldErrors, field: &'static str, value: &V, max: usize)
where
    V: ValidateLength<u64> + AsRef<str>,
{
    if !value.validate_length(None, Some(max as u64), None) {
        errors.add(
            field,
            format!(
                "Ensure this value has at most {} characters (it has {}).",
                max,
                value.as_ref().chars().count()
            ),
        );
    }
}

fn email<V>(errors: &mut FieldErrors, field: &'static str, value: &V)
where
    V: ValidateEmail + AsRef<str>,
{
    if !value.as_ref().is_empty() && !value.validate_email() {
        errors.add(field, "Enter a valid email address.");
    }
}

/// Accepts absolute `http` and `https` URLs with a host. Other schemes
/// parse as URLs too but have no place in a link to someone's site.
fn website<V>(errors: &mut FieldErrors, field: &'static str, value: &V)
where
    V: ValidateUrl + AsRef<str>,
{
    let value_str = value.as_ref();
    if value_str.is_empty() {
        return;
    }
    let web = match Url::parse(value_str) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    };
    if !web || !value.validate_url() {
        errors.add(field, "Enter a valid URL.");
    }
}

/// Treats a missing or blank optional field as absent.
fn optional_id(
    errors: &mut FieldErrors,
    field: &'static str,
    value: Option<&str>,
) -> Option<i64> {
    match value.map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add(field, "Select a valid choice.");
                None
            }
        },
    }
}

/// The raw comment form. `article` and `parent` travel as hidden inputs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentInput {
    #[serde(default)]
    pub article: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub user_url: String,
    #[serde(default)]
    pub content: String,
}

/// A syntactically valid comment. Whether the article exists and the parent
/// belongs to it is checked against the store by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentSubmission {
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub user_name: String,
    pub user_email: String,
    pub user_url: String,
    pub content: String,
}

pub const USER_NAME_MAX: usize = 50;
pub const USER_EMAIL_MAX: usize = 75;
pub const USER_URL_MAX: usize = 200;

impl CommentInput {
    pub fn validate(&self) -> Result<CommentSubmission, FieldErrors> {
        let mut errors = FieldErrors::new();

        let article_id = match self.article.trim().parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                errors.add("article", "Select a valid choice.");
                0
            }
        };
        let parent_id = optional_id(&mut errors, "parent", self.parent.as_deref());

        let user_name = required(&mut errors, "user_name", &self.user_name);
        max_length(&mut errors, "user_name", &user_name, USER_NAME_MAX);

        let user_email = required(&mut errors, "user_email", &self.user_email);
        max_length(&mut errors, "user_email", &user_email, USER_EMAIL_MAX);
        email(&mut errors, "user_email", &user_email);

        let user_url = self.user_url.trim().to_owned();
        max_length(&mut errors, "user_url", &user_url, USER_URL_MAX);
        website(&mut errors, "user_url", &user_url);

        let content = required(&mut errors, "content", &self.content);

        errors.into_result(CommentSubmission {
            article_id,
            parent_id,
            user_name,
            user_email,
            user_url,
            content,
        })
    }
}

/// The raw contact form. `copy` is a checkbox: present means ticked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactInput {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub copy: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactMessage {
    pub subject: String,
    pub sender: String,
    pub message: String,
    pub copy: bool,
}

impl ContactInput {
    pub fn validate(&self) -> Result<ContactMessage, FieldErrors> {
        let mut errors = FieldErrors::new();

        let subject = required(&mut errors, "subject", &self.subject);
        max_length(&mut errors, "subject", &subject, 100);

        let sender = required(&mut errors, "sender", &self.sender);
        email(&mut errors, "sender", &sender);

        let message = required(&mut errors, "message", &self.message);

        errors.into_result(ContactMessage {
            subject,
            sender,
            message,
            copy: self.copy.is_some(),
        })
    }
}

/// The raw registration form: the account fields plus the profile's
/// website, posted together.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub website: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub website: String,
}

pub const USERNAME_MAX: usize = 150;

fn is_username_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')
}

impl RegistrationInput {
    /// Validates the account half of the form.
    pub fn validate_account(&self) -> Result<Account, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = required(&mut errors, "username", &self.username);
        max_length(&mut errors, "username", &username, USERNAME_MAX);
        if !username.chars().all(is_username_char) {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }

        let email_address = self.email.trim().to_owned();
        email(&mut errors, "email", &email_address);

        // Passwords are taken verbatim; surrounding whitespace is significant.
        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        }

        errors.into_result(Account {
            username,
            email: email_address,
            password: self.password.clone(),
        })
    }

    /// Validates the profile half of the form.
    pub fn validate_profile(&self) -> Result<Profile, FieldErrors> {
        let mut errors = FieldErrors::new();
        let site = self.website.trim().to_owned();
        max_length(&mut errors, "website", &site, USER_URL_MAX);
        website(&mut errors, "website", &site);
        errors.into_result(Profile { website: site })
    }

    /// Validates both halves, collecting the messages of each.
    pub fn validate(&self) -> Result<(Account, Profile), FieldErrors> {
        match (self.validate_account(), self.validate_profile()) {
            (Ok(account), Ok(profile)) => Ok((account, profile)),
            (account, profile) => {
                let mut errors = FieldErrors::new();
                if let Err(e) = account {
                    errors.merge(e);
                }
                if let Err(e) = profile {
                    errors.merge(e);
                }
                Err(errors)
            }
        }
    }
}

/// The raw login form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// The raw chat form. Field names are capitalised on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatInput {
    #[serde(default, rename = "Author")]
    pub author: String,
    #[serde(default, rename = "Text")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub author: String,
    pub text: String,
}

impl ChatInput {
    pub fn validate(&self) -> Result<ChatLine, FieldErrors> {
        let mut errors = FieldErrors::new();
        let author = required(&mut errors, "Author", &self.author);
        max_length(&mut errors, "Author", &author, USER_NAME_MAX);
        let text = required(&mut errors, "Text", &self.text);
        errors.into_result(ChatLine { author, text })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn comment_input() -> CommentInput {
        CommentInput {
            article: String::from("3"),
            parent: Some(String::new()),
            user_name: String::from("  Ann "),
            user_email: String::from("ann@example.com"),
            user_url: String::from("https://ann.example.com/"),
            content: String::from("Nice post"),
        }
    }

    #[test]
    fn test_comment_valid() {
        let submission = comment_input().validate().unwrap();
        assert_eq!(3, submission.article_id);
        assert_eq!(None, submission.parent_id);
        assert_eq!("Ann", submission.user_name);
    }

    #[test]
    fn test_comment_parent_parsed() {
        let mut input = comment_input();
        input.parent = Some(String::from("7"));
        assert_eq!(Some(7), input.validate().unwrap().parent_id);
    }

    #[test]
    fn test_comment_reports_every_bad_field() {
        let input = CommentInput {
            article: String::from("x"),
            parent: Some(String::from("y")),
            user_name: "n".repeat(USER_NAME_MAX + 1),
            user_email: String::from("not-an-email"),
            user_url: String::from("javascript:alert(1)"),
            content: String::from("   "),
        };
        let errors = input.validate().unwrap_err();
        for field in &["article", "parent", "user_name", "user_email", "user_url", "content"] {
            assert!(!errors.get(field).is_empty(), "no error for {}", field);
        }
        assert_eq!(
            vec![String::from(
                "Ensure this value has at most 50 characters (it has 51)."
            )],
            errors.get("user_name")
        );
    }

    #[test]
    fn test_contact_copy_checkbox() {
        let mut input = ContactInput {
            subject: String::from("Hi"),
            sender: String::from("bob@example.org"),
            message: String::from("Hello"),
            copy: None,
        };
        assert!(!input.validate().unwrap().copy);
        input.copy = Some(String::from("on"));
        assert!(input.validate().unwrap().copy);
    }

    #[test]
    fn test_contact_subject_too_long() {
        let input = ContactInput {
            subject: "s".repeat(101),
            sender: String::from("bob@example.org"),
            message: String::from("Hello"),
            copy: None,
        };
        assert_eq!(1, input.validate().unwrap_err().get("subject").len());
    }

    #[test]
    fn test_registration_collects_both_halves() {
        let input = RegistrationInput {
            username: String::from("bad name"),
            email: String::new(),
            password: String::new(),
            website: String::from("not a url"),
        };
        let errors = input.validate().unwrap_err();
        assert!(!errors.get("username").is_empty());
        assert!(!errors.get("password").is_empty());
        assert!(!errors.get("website").is_empty());
        assert!(errors.get("email").is_empty());
    }

    #[test]
    fn test_registration_valid() {
        let input = RegistrationInput {
            username: String::from("ann.b+blog@home"),
            email: String::from("ann@example.com"),
            password: String::from(" secret "),
            website: String::new(),
        };
        let (account, profile) = input.validate().unwrap();
        assert_eq!(" secret ", account.password);
        assert_eq!("", profile.website);
    }

    #[test]
    fn test_chat_requires_both_fields() {
        let errors = ChatInput::default().validate().unwrap_err();
        assert_eq!(&[String::from(REQUIRED)], errors.get("Author"));
        assert_eq!(&[String::from(REQUIRED)], errors.get("Text"));
    }

    fn email_errors(value: &str) -> usize {
        let mut errors = FieldErrors::new();
        email(&mut errors, "email", &value.to_owned());
        errors.get("email").len()
    }

    #[test]
    fn test_email_check() {
        assert_eq!(0, email_errors("a@b.co"));
        assert_eq!(0, email_errors(""));
        assert_eq!(1, email_errors("@b.co"));
        assert_eq!(1, email_errors("a@@b.co"));
        assert_eq!(1, email_errors("a b@c.co"));
        assert_eq!(1, email_errors("a@b..co"));
        assert_eq!(1, email_errors("a@-.x"));
    }

    fn url_errors(value: &str) -> usize {
        let mut errors = FieldErrors::new();
        website(&mut errors, "website", &value.to_owned());
        errors.get("website").len()
    }

    #[test]
    fn test_url_check() {
        assert_eq!(0, url_errors("https://ann.example.com/"));
        assert_eq!(0, url_errors("http://127.0.0.1:8000/"));
        assert_eq!(0, url_errors(""));
        assert_eq!(1, url_errors("javascript:alert(1)"));
        assert_eq!(1, url_errors("mailto:ann@example.com"));
        assert_eq!(1, url_errors("not a url"));
    }

    #[test]
    fn test_length_counts_characters() {
        let mut errors = FieldErrors::new();
        max_length(&mut errors, "user_name", &"é".repeat(50), 50);
        assert!(errors.is_empty());
        max_length(&mut errors, "user_name", &"é".repeat(51), 50);
        assert_eq!(1, errors.get("user_name").len());
    }
}
