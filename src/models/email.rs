//! Transactional email templates.
//!
//! Templates are a closed set; the JSON field `template` selects the variant
//! and the remaining fields are its props.

use serde::{Deserialize, Serialize};

/// Email template with its props
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum EmailTemplate {
    /// Passwordless login link
    MagicLink { url: String },
    /// Sent after the first successful login
    Welcome {
        #[serde(default)]
        name: Option<String>,
    },
    /// Notification that a multipart upload finished
    UploadComplete { filename: String },
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MagicLink { .. } => "magic_link",
            Self::Welcome { .. } => "welcome",
            Self::UploadComplete { .. } => "upload_complete",
        }
    }

    /// Render subject, plain text and HTML bodies
    pub fn render(&self) -> RenderedEmail {
        match self {
            Self::MagicLink { url } => RenderedEmail {
                subject: "Your sign-in link".to_string(),
                text: format!(
                    "Use the link below to sign in. It expires shortly and works once.\n\n{}\n",
                    url
                ),
                html: format!(
                    "<p>Use the link below to sign in. It expires shortly and works once.</p>\
                     <p><a href=\"{0}\">{0}</a></p>",
                    escape_html(url)
                ),
            },
            Self::Welcome { name } => {
                let greeting = match name {
                    Some(name) => format!("Welcome, {}!", name),
                    None => "Welcome!".to_string(),
                };
                RenderedEmail {
                    subject: "Welcome aboard".to_string(),
                    text: format!("{}\n\nYour account is ready.\n", greeting),
                    html: format!(
                        "<p>{}</p><p>Your account is ready.</p>",
                        escape_html(&greeting)
                    ),
                }
            }
            Self::UploadComplete { filename } => RenderedEmail {
                subject: format!("Upload finished: {}", filename),
                text: format!("Your file {} has been uploaded.\n", filename),
                html: format!(
                    "<p>Your file <strong>{}</strong> has been uploaded.</p>",
                    escape_html(filename)
                ),
            },
        }
    }
}

/// Body of the email-send endpoint: `{template, email, ...props}`
#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub email: String,
    #[serde(flatten)]
    pub template: EmailTemplate,
}

/// Rendered message parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// A message ready for a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
