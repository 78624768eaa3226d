use std::time::Duration;

use isybridge_core::devices::LISTING_PATH;
use isybridge_core::{CommandRequest, DeviceRegistry, HttpMethod};
use tracing::{debug, info, warn};

use crate::config::IsyConfig;
use crate::error::FetchError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Basic-auth client for the controller's REST endpoints.
#[derive(Clone)]
pub struct IsyRest {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl IsyRest {
    pub fn new(config: &IsyConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::from_reqwest(&config.base_url(), &config.username, &config.password, http))
    }

    pub fn from_reqwest(base_url: &str, username: &str, password: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn request(&self, method: HttpMethod, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = match method {
            HttpMethod::Get => self.http.get(url),
        };
        builder.basic_auth(&self.username, Some(&self.password))
    }

    /// Issue a command. The controller's reply is logged, never interpreted.
    pub async fn send_command(&self, request: &CommandRequest) -> Result<(), reqwest::Error> {
        let response = self.request(request.method, &request.path).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            info!(path = %request.path, status = status.as_u16(), body = %body.trim(), "Controller accepted command");
        } else {
            warn!(path = %request.path, status = status.as_u16(), body = %body.trim(), "Controller rejected command");
        }
        Ok(())
    }

    pub async fn fetch_listing(&self) -> Result<String, FetchError> {
        debug!(path = LISTING_PATH, "Requesting device listing");
        let response = self.request(HttpMethod::Get, LISTING_PATH).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Fetch, parse and swap in the device table. Any failure leaves the
    /// registry as it was.
    pub async fn load_devices(&self, registry: &DeviceRegistry) -> Result<usize, FetchError> {
        let listing = self.fetch_listing().await?;
        let count = registry.replace_from_listing(&listing)?;
        info!(count, "Loaded device information from controller");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isybridge_core::{Command, ControlTopic};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?><nodes><node flag="128"><address>1E 4 58 1</address><name>Kitchen Lights</name><parent type="3">12345</parent><type>1.32.65.0</type></node></nodes>"#;

    async fn setup() -> (MockServer, IsyRest) {
        let server = MockServer::start().await;
        let client = IsyRest::from_reqwest(&server.uri(), "admin", "secret", reqwest::Client::new());
        (server, client)
    }

    #[tokio::test]
    async fn sends_escaped_command_path_with_basic_auth() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/rest/nodes/1E%204%2058%201/CLISPH/68"))
            .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<RestResponse succeeded=\"true\"/>"))
            .expect(1)
            .mount(&server)
            .await;

        let request = Command::from_control(
            ControlTopic { node: "1E.4.58.1".into(), verb: Some("clisph".into()) },
            "68",
        )
        .unwrap()
        .translate()
        .unwrap();
        client.send_command(&request).await.unwrap();
    }

    #[tokio::test]
    async fn controller_error_status_is_not_a_send_failure() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = CommandRequest { method: HttpMethod::Get, path: "/rest/query/0032".into() };
        assert!(client.send_command(&request).await.is_ok());
    }

    #[tokio::test]
    async fn loads_device_listing() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/rest/nodes/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;

        let registry = DeviceRegistry::new();
        assert_eq!(client.load_devices(&registry).await.unwrap(), 1);
        assert_eq!(registry.lookup("1E 4 58 1").unwrap().name, "Kitchen Lights");
    }

    #[tokio::test]
    async fn failed_reload_keeps_loaded_devices() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/rest/nodes/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/nodes/devices"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = DeviceRegistry::new();
        client.load_devices(&registry).await.unwrap();
        let err = client.load_devices(&registry).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(500)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("1E.4.58.1").unwrap().parent, "12345");
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_fetch_error() {
        let client = IsyRest::from_reqwest("http://127.0.0.1:1", "admin", "secret", reqwest::Client::new());
        let registry = DeviceRegistry::new();
        assert!(matches!(client.load_devices(&registry).await, Err(FetchError::Http(_))));
        assert!(registry.is_empty());
    }
}
