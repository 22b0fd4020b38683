use serde_json::Value;

use crate::common::config::{BrokerConfig, ClientConfig};
use crate::transport::{Method, Transport, TransportFailure, TransportFuture};

/// [`Transport`] speaking JSON over HTTP(S) to a broker REST API.
pub struct HttpTransport {
    base: reqwest::Url,
    client: reqwest::Client,
    username: Option<String>,
}

impl HttpTransport {
    pub fn new(broker: &BrokerConfig, config: &ClientConfig) -> anyhow::Result<Self> {
        let mut base = broker.parsed_url()?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let base = base.join(&config.api_prefix)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(broker.ssl_ignore)
            .build()?;

        Ok(Self {
            base,
            client,
            username: broker.username.clone(),
        })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl Transport for HttpTransport {
    fn send_request(&self, method: Method, path: &str, body: Option<Value>) -> TransportFuture<'_> {
        let url = self.base.join(path);
        let path = path.to_string();

        Box::pin(async move {
            let url = url.map_err(|error| {
                TransportFailure::Connection(format!("invalid request path {path}: {error}"))
            })?;
            log::trace!("{method} {url}");

            let mut request = self.client.request(method.into(), url);
            match (method, body) {
                // GET parameters travel in the query string, with JSON encoded values
                (Method::Get, Some(Value::Object(params))) => {
                    let query: Vec<(String, String)> = params
                        .into_iter()
                        .map(|(key, value)| match value {
                            Value::String(value) => (key, value),
                            value => (key, value.to_string()),
                        })
                        .collect();
                    request = request.query(&query);
                }
                (_, Some(body)) => request = request.json(&body),
                (_, None) => {}
            }

            let response = request
                .send()
                .await
                .map_err(|error| TransportFailure::Connection(error.to_string()))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|error| TransportFailure::Connection(error.to_string()))?;

            if !status.is_success() {
                return Err(TransportFailure::Http {
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }
            if text.trim().is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            serde_json::from_str(&text).map_err(|error| TransportFailure::Decode(error.to_string()))
        })
    }

    fn logged_in_username(&self) -> Option<String> {
        self.username.clone()
    }
}

/// Brokers describe failures in the `_message` field of a JSON body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("_message")
                .and_then(|message| message.as_str())
                .map(|message| message.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::{HttpTransport, error_message};
    use crate::common::config::{BrokerConfig, ClientConfig};
    use crate::transport::Transport;

    #[test]
    fn base_url_contains_api_prefix() {
        let mut broker = BrokerConfig::new("https://broker1:5000");
        broker.username = Some("alice".to_string());
        let transport = HttpTransport::new(&broker, &ClientConfig::default()).unwrap();
        assert_eq!(
            transport.base_url().as_str(),
            "https://broker1:5000/ttb-v2/"
        );
        assert_eq!(
            transport.base_url().join("allocation/abc").unwrap().as_str(),
            "https://broker1:5000/ttb-v2/allocation/abc"
        );
        assert_eq!(transport.logged_in_username().as_deref(), Some("alice"));
    }

    #[test]
    fn message_from_json_body() {
        assert_eq!(
            error_message(r#"{"_message": "abc: invalid allocation"}"#),
            "abc: invalid allocation"
        );
        assert_eq!(error_message("  Bad gateway \n"), "Bad gateway");
    }
}
