//! Blocking HTTP transport built on `reqwest`.

use super::{Method, Request, Response, Transport};
use crate::config::ClientConfig;
use crate::core::error::Result;
use reqwest::blocking::Client;
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone)]
enum Auth {
    Basic { username: String, password: String },
    ApiKey(String),
}

/// Sends requests to a cluster over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Option<Auth>,
}

impl HttpTransport {
    /// Create a transport from validated connection settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;

        let auth = match (&config.username, &config.password, &config.api_key) {
            (Some(username), Some(password), _) => Some(Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (_, _, Some(key)) => Some(Auth::ApiKey(key.clone())),
            _ => None,
        };
        if !config.verify_certs {
            log::warn!("TLS certificate verification is disabled");
        }

        Ok(HttpTransport {
            client,
            base_url: config.url.clone(),
            auth,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, request: &Request) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        ))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn perform(&self, request: &Request) -> Result<Response> {
        let url = self.endpoint(request)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Put => self.client.put(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        builder = match &self.auth {
            Some(Auth::Basic { username, password }) => builder.basic_auth(username, Some(password)),
            Some(Auth::ApiKey(key)) => builder.header("Authorization", format!("ApiKey {}", key)),
            None => builder,
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(Response { status, body })
    }
}
