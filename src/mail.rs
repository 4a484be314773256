//! Outgoing mail: the contact form's one message per submission.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use tracing::info;

use crate::config::{Contact, Smtp};
use crate::forms::ContactMessage;

/// A plain-text message ready to be handed to a [`Mailer`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
}

impl OutgoingMail {
    /// Builds the contact-form message: sent to the configured recipients,
    /// plus the sender when they asked for a copy.
    pub fn contact(contact: &Contact, message: &ContactMessage) -> OutgoingMail {
        let mut to = contact.recipients.clone();
        if message.copy {
            to.push(message.sender.clone());
        }
        OutgoingMail {
            subject: message.subject.clone(),
            body: message.message.clone(),
            from: contact.from.clone(),
            to,
        }
    }

    /// Rejects header values containing line breaks, which would let a
    /// visitor inject extra headers.
    pub fn check_headers(&self) -> Result<()> {
        let headers = std::iter::once(&self.subject)
            .chain(std::iter::once(&self.from))
            .chain(self.to.iter());
        for value in headers {
            if value.contains('\n') || value.contains('\r') {
                return Err(Error::BadHeader(value.clone()));
            }
        }
        Ok(())
    }
}

/// Something that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Delivers mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(smtp: &Smtp) -> SmtpMailer {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.host.as_str())
                .port(smtp.port);
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        SmtpMailer {
            transport: builder.build(),
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse::<Mailbox>()
        .map_err(|_| Error::BadHeader(address.to_owned()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        mail.check_headers()?;
        let mut builder = Message::builder()
            .from(mailbox(&mail.from)?)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &mail.to {
            builder = builder.to(mailbox(recipient)?);
        }
        let message = builder
            .body(mail.body.clone())
            .map_err(|err| Error::Transport(err.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        info!(subject = %mail.subject, recipients = mail.to.len(), "mail sent");
        Ok(())
    }
}

/// Writes mail to the log instead of sending it; used when no SMTP relay is
/// configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        mail.check_headers()?;
        info!(
            from = %mail.from,
            to = ?mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "no SMTP relay configured; mail not sent"
        );
        Ok(())
    }
}

/// The result of a fallible mail operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure to send mail.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Returned when a header value is malformed or attempts injection.
    BadHeader(String),

    /// Returned when the relay refuses or can't be reached.
    Transport(String),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadHeader(value) => write!(f, "invalid header value {:?}", value),
            Error::Transport(err) => write!(f, "mail transport: {}", err),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every message it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub(crate) sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutgoingMail) -> Result<()> {
            mail.check_headers()?;
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn contact() -> Contact {
        Contact {
            from: String::from("blog@example.org"),
            recipients: vec![String::from("owner@example.org")],
        }
    }

    fn message(copy: bool) -> ContactMessage {
        ContactMessage {
            subject: String::from("Hello"),
            sender: String::from("visitor@example.com"),
            message: String::from("Nice blog"),
            copy,
        }
    }

    #[test]
    fn test_copy_adds_sender() {
        assert_eq!(
            vec![String::from("owner@example.org")],
            OutgoingMail::contact(&contact(), &message(false)).to
        );
        assert_eq!(
            vec![
                String::from("owner@example.org"),
                String::from("visitor@example.com")
            ],
            OutgoingMail::contact(&contact(), &message(true)).to
        );
    }

    #[tokio::test]
    async fn test_header_injection_rejected() {
        let mut mail = OutgoingMail::contact(&contact(), &message(false));
        mail.subject = String::from("Hi\r\nBcc: everyone@example.com");
        assert!(matches!(LogMailer.send(&mail).await, Err(Error::BadHeader(_))));
    }
}
