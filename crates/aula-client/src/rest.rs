use std::{sync::Arc, time::Duration};

use aula_core::{
    AulaError, ErrorCategory, api_error_message, classify_http_status, collect_validation_errors,
    normalize_list_response,
};
use aula_platform::TokenProvider;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

const REFRESH_PATH: &str = "users/refresh/";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

enum Body<'a> {
    Empty,
    Json(&'a Value),
}

/// Authenticated JSON client for the Aula REST backend.
///
/// Every request carries the provider's bearer token. A 401 triggers one
/// token refresh and one retry.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl RestClient {
    pub fn new(config: RestConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, AulaError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                AulaError::new(ErrorCategory::Config, "http_client_build_failed", err.to_string())
            })?;

        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, AulaError> {
        let mut url = self.base_url.join(path).map_err(|err| {
            AulaError::new(
                ErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot build endpoint '{path}': {err}"),
            )
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AulaError> {
        let url = self.endpoint(path, query)?;
        let bytes = self.execute(Method::GET, url, Body::Empty).await?;
        decode_json(&bytes)
    }

    /// GET a list endpoint, accepting paginated and bare-array bodies.
    pub async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, AulaError> {
        let payload: Value = self.get_json(path, query).await?;
        normalize_list_response(payload)
    }

    pub async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>, AulaError> {
        let url = self.endpoint(path, query)?;
        self.execute(Method::GET, url, Body::Empty).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, AulaError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path, &[])?;
        let body = serde_json::to_value(body).map_err(|err| {
            AulaError::new(ErrorCategory::Serialization, "request_encode_error", err.to_string())
        })?;
        let bytes = self.execute(Method::POST, url, Body::Json(&body)).await?;
        decode_json(&bytes)
    }

    async fn execute(&self, method: Method, url: Url, body: Body<'_>) -> Result<Vec<u8>, AulaError> {
        let token = self.tokens.access_token();
        let response = self.send_once(&method, &url, &body, token.as_deref()).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!(%url, "request unauthorized; trying token refresh");
            match self.refresh_access_token().await {
                Some(fresh) => self.send_once(&method, &url, &body, Some(&fresh)).await?,
                None => response,
            }
        } else {
            response
        };

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            let err = error_from_response(status.as_u16(), &bytes);
            warn!(%url, status = status.as_u16(), code = %err.code, "request failed");
            return Err(err);
        }
        Ok(bytes.to_vec())
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: &Body<'_>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, AulaError> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Body::Json(value) = body {
            request = request.json(value);
        }
        request.send().await.map_err(map_transport_error)
    }

    /// Exchange the refresh token for a new access token and store it.
    ///
    /// A rejected refresh clears the stored session.
    async fn refresh_access_token(&self) -> Option<String> {
        let refresh = self.tokens.refresh_token()?;
        let url = self.endpoint(REFRESH_PATH, &[]).ok()?;

        let result = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh: &refresh })
            .send()
            .await;

        let access = match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<RefreshResponse>().await {
                    Ok(body) => Some(body.access),
                    Err(err) => {
                        warn!(error = %err, "token refresh returned an unreadable body");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "token refresh rejected");
                None
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                None
            }
        };

        match access {
            Some(access) => {
                if let Err(err) = self.tokens.replace_access_token(&access) {
                    warn!(error = %err, "could not persist refreshed access token");
                }
                info!("access token refreshed");
                Some(access)
            }
            None => {
                if let Err(err) = self.tokens.clear_session() {
                    warn!(error = %err, "could not clear session after failed refresh");
                }
                None
            }
        }
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AulaError> {
    serde_json::from_slice(bytes).map_err(|err| {
        AulaError::new(ErrorCategory::Serialization, "response_decode_error", err.to_string())
    })
}

/// Map a non-success response into the shared error shape.
pub fn error_from_response(status: u16, body: &[u8]) -> AulaError {
    let category = classify_http_status(status);
    let parsed = serde_json::from_slice::<Value>(body).ok();

    let message = parsed
        .as_ref()
        .and_then(api_error_message)
        .unwrap_or_else(|| {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("unexpected status");
            format!("server returned {status} {reason}")
        });

    let mut err = AulaError::new(category, format!("http_{status}"), message);
    if category == ErrorCategory::Validation
        && let Some(body) = parsed.as_ref()
    {
        err = err.with_details(collect_validation_errors(body));
    }
    err
}

pub fn map_transport_error(err: reqwest::Error) -> AulaError {
    if err.is_timeout() {
        AulaError::new(ErrorCategory::Network, "request_timeout", err.to_string())
    } else if err.is_connect() {
        AulaError::new(ErrorCategory::Network, "connection_failed", err.to_string())
    } else if err.is_decode() {
        AulaError::new(ErrorCategory::Serialization, "response_decode_error", err.to_string())
    } else if err.is_builder() {
        AulaError::new(ErrorCategory::Config, "invalid_request", err.to_string())
    } else {
        AulaError::new(ErrorCategory::Network, "http_transport_error", err.to_string())
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! One-shot HTTP responder for exercising the real client.

    use std::sync::{Arc, Mutex};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use url::Url;

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub request_line: String,
        pub authorization: Option<String>,
        pub body: String,
    }

    pub struct StubServer {
        pub base_url: Url,
        pub requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl StubServer {
        pub fn recorded(&self) -> Vec<Recorded> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    /// Answer each incoming request with the next canned `(status, body)`.
    pub async fn spawn(responses: Vec<(u16, &'static str)>) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let recorded = read_request(&mut socket).await;
                log.lock().expect("requests lock").push(recorded);

                let response = format!(
                    "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        StubServer {
            base_url: Url::parse(&format!("http://{addr}/api/")).expect("stub url"),
            requests,
        }
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> Recorded {
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 1024];
        let header_end = loop {
            let read = socket.read(&mut chunk).await.expect("read request");
            if read == 0 {
                break raw.len();
            }
            raw.extend_from_slice(&chunk[..read]);
            if let Some(pos) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default().to_owned();
        let mut authorization = None;
        let mut content_length = 0;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "authorization" => authorization = Some(value.trim().to_owned()),
                    "content-length" => content_length = value.trim().parse().unwrap_or(0),
                    _ => {}
                }
            }
        }

        let mut body = raw[header_end..].to_vec();
        while body.len() < content_length {
            let read = socket.read(&mut chunk).await.expect("read body");
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Recorded {
            request_line,
            authorization,
            body: String::from_utf8_lossy(&body).to_string(),
        }
    }
}
