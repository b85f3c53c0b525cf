//! Outbound mail client.
//!
//! A single `Mailer` is built at startup and cloned into every request
//! context. It is stateless apart from the pooled HTTP client, so concurrent
//! requests share it freely.

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid mail API base URL: {0}")]
    InvalidEndpoint(String),

    #[error("Mail client configuration incomplete: {0}")]
    Incomplete(&'static str),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail API rejected message with status {status}")]
    Rejected { status: u16 },
}

/// A message ready to hand to the mail API. Rendering the body is the
/// caller's concern.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[derive(Clone)]
pub struct Mailer {
    client: Client,
    endpoint: Url,
    api_key: String,
    sender: String,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("endpoint", &self.endpoint.as_str())
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Self::with_client(config, client)
    }

    pub(crate) fn with_client(config: &MailConfig, client: Client) -> Result<Self, NotifyError> {
        if config.domain.trim().is_empty() {
            return Err(NotifyError::Incomplete("domain"));
        }
        if config.sender.trim().is_empty() {
            return Err(NotifyError::Incomplete("sender"));
        }

        let mut base = Url::parse(&config.api_base)
            .map_err(|e| NotifyError::InvalidEndpoint(format!("{}: {}", config.api_base, e)))?;
        // `join` replaces the last segment unless the base ends in a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(&format!("v3/{}/messages", config.domain))
            .map_err(|e| NotifyError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn send(&self, mail: &OutboundMail) -> Result<(), NotifyError> {
        let mut form = vec![
            ("from", self.sender.as_str()),
            ("to", mail.to.as_str()),
            ("subject", mail.subject.as_str()),
            ("text", mail.text.as_str()),
        ];
        if let Some(html) = &mail.html {
            form.push(("html", html.as_str()));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Mail API rejected message");
            return Err(NotifyError::Rejected { status: status.as_u16() });
        }

        tracing::debug!(subject = %mail.subject, "Mail accepted by API");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{header, HeaderMap, StatusCode, Uri},
        routing::post,
        Form, Router,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Received {
        path: String,
        authorization: Option<String>,
        form: HashMap<String, String>,
    }

    #[derive(Clone)]
    struct MailApi {
        received: Arc<Mutex<Option<Received>>>,
        reply: StatusCode,
    }

    async fn accept_message(
        State(api): State<MailApi>,
        uri: Uri,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        *api.received.lock().unwrap() = Some(Received {
            path: uri.path().to_string(),
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            form,
        });
        api.reply
    }

    /// Local mail API mounted under `/mailgun`; returns its base URL
    async fn spawn_mail_api(reply: StatusCode) -> (String, Arc<Mutex<Option<Received>>>) {
        let received = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route("/mailgun/v3/:domain/messages", post(accept_message))
            .with_state(MailApi {
                received: Arc::clone(&received),
                reply,
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/mailgun", addr), received)
    }

    fn local_mailer(api_base: String) -> Mailer {
        let mut config = mail_config();
        config.api_base = api_base;
        let client = Client::builder().no_proxy().build().unwrap();
        Mailer::with_client(&config, client).unwrap()
    }

    fn welcome() -> OutboundMail {
        OutboundMail {
            to: "ada@example.com".into(),
            subject: "Welcome".into(),
            text: "Hello Ada".into(),
            html: Some("<p>Hello Ada</p>".into()),
        }
    }

    fn mail_config() -> MailConfig {
        MailConfig {
            domain: "mg.featmap.example".into(),
            api_key: "key-abc".into(),
            api_base: "https://api.mailgun.net".into(),
            sender: "Featmap <no-reply@featmap.example>".into(),
        }
    }

    #[test]
    fn builds_messages_endpoint_from_domain() {
        let mailer = Mailer::from_config(&mail_config()).unwrap();
        assert_eq!(
            mailer.endpoint().as_str(),
            "https://api.mailgun.net/v3/mg.featmap.example/messages"
        );
    }

    #[test]
    fn base_path_is_kept_when_joining() {
        let mut config = mail_config();
        config.api_base = "https://proxy.example/mailgun".into();
        let mailer = Mailer::from_config(&config).unwrap();
        assert_eq!(
            mailer.endpoint().as_str(),
            "https://proxy.example/mailgun/v3/mg.featmap.example/messages"
        );
    }

    #[tokio::test]
    async fn send_posts_form_with_basic_auth() {
        let (base, received) = spawn_mail_api(StatusCode::OK).await;
        let mailer = local_mailer(base);

        mailer.send(&welcome()).await.unwrap();

        let received = received.lock().unwrap().take().unwrap();
        assert_eq!(received.path, "/mailgun/v3/mg.featmap.example/messages");
        // base64("api:key-abc")
        assert_eq!(received.authorization.as_deref(), Some("Basic YXBpOmtleS1hYmM="));
        assert_eq!(received.form["from"], "Featmap <no-reply@featmap.example>");
        assert_eq!(received.form["to"], "ada@example.com");
        assert_eq!(received.form["subject"], "Welcome");
        assert_eq!(received.form["text"], "Hello Ada");
        assert_eq!(received.form["html"], "<p>Hello Ada</p>");
    }

    #[tokio::test]
    async fn non_success_reply_is_rejected() {
        let (base, _) = spawn_mail_api(StatusCode::UNAUTHORIZED).await;
        let mailer = local_mailer(base);

        let result = mailer.send(&welcome()).await;

        assert!(matches!(result, Err(NotifyError::Rejected { status: 401 })));
    }

    #[test]
    fn invalid_base_url_is_a_construction_error() {
        let mut config = mail_config();
        config.api_base = "not a url".into();
        assert!(matches!(Mailer::from_config(&config), Err(NotifyError::InvalidEndpoint(_))));
    }

    #[test]
    fn empty_domain_is_a_construction_error() {
        let mut config = mail_config();
        config.domain = "  ".into();
        assert!(matches!(Mailer::from_config(&config), Err(NotifyError::Incomplete("domain"))));
    }

    #[test]
    fn debug_output_omits_api_key() {
        let mailer = Mailer::from_config(&mail_config()).unwrap();
        assert!(!format!("{:?}", mailer).contains("key-abc"));
    }
}
