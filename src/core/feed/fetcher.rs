use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LOCATION};
use reqwest::StatusCode;

use crate::config::Config;

/// Conditional GET state carried over from the previous scan of a feed.
#[derive(Debug, Clone, Default)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One followed redirect: the status returned and the URL that returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    pub status: u16,
    pub url: String,
}

#[derive(Debug)]
pub struct FeedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub final_url: String,
    pub redirects: Vec<RedirectHop>,
}

impl FeedResponse {
    /// True when the last redirect hop was a 301, i.e. the source has
    /// permanently moved and the stored feed URL should follow.
    pub fn permanently_moved(&self) -> bool {
        self.redirects
            .last()
            .map(|hop| hop.status == StatusCode::MOVED_PERMANENTLY.as_u16())
            .unwrap_or(false)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Charset declared by the transport, from the Content-Type header.
    pub fn charset(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("charset") {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }

    /// Media type of the response without charset or other parameters.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type")
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timeout error")]
    Timeout,
    #[error("connection error: {0}")]
    Connect(String),
    #[error("HTTP error: {0}")]
    Transport(String),
    #[error("too many redirects after {0} hops")]
    TooManyRedirects(usize),
    #[error("invalid redirect location: {0}")]
    BadRedirect(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if error.is_connect() {
            FetchError::Connect(error.to_string())
        } else {
            FetchError::Transport(error.to_string())
        }
    }
}

/// Build the shared HTTP client. Redirects are handled manually in
/// [`fetch`] so the hop chain can be reported to the scheduler.
pub fn build_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.timeout)
        .user_agent(&config.user_agent)
        .build()?;
    Ok(client)
}

/// Conditional GET with bounded manual redirect following. Conditional
/// headers are re-attached on every hop.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    conditional: &ConditionalHeaders,
    max_redirects: usize,
) -> Result<FeedResponse, FetchError> {
    let mut current_url = url.to_string();
    let mut redirects: Vec<RedirectHop> = Vec::new();

    loop {
        let mut request = client.get(&current_url);
        if let Some(etag) = conditional.etag.as_deref().filter(|value| !value.is_empty()) {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = conditional.last_modified {
            request = request.header(IF_MODIFIED_SINCE, http_date(last_modified));
        }

        let response = request.send().await?;
        let status = response.status();

        if is_redirect(status) {
            if redirects.len() >= max_redirects {
                return Err(FetchError::TooManyRedirects(redirects.len()));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| FetchError::BadRedirect("missing Location header".to_string()))?;
            let next_url = response
                .url()
                .join(location)
                .map_err(|error| FetchError::BadRedirect(error.to_string()))?;
            redirects.push(RedirectHop {
                status: status.as_u16(),
                url: current_url,
            });
            current_url = next_url.to_string();
            continue;
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        return Ok(FeedResponse {
            status: status.as_u16(),
            headers,
            body,
            final_url,
            redirects,
        });
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(value: DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// `key=value` dump of request headers for the scan log.
pub fn request_header_dump(user_agent: &str, conditional: &ConditionalHeaders) -> String {
    let mut pairs = vec![format!("user-agent={user_agent}")];
    if let Some(etag) = conditional.etag.as_deref().filter(|value| !value.is_empty()) {
        pairs.push(format!("if-none-match={etag}"));
    }
    if let Some(last_modified) = conditional.last_modified {
        pairs.push(format!("if-modified-since={}", http_date(last_modified)));
    }
    pairs.join(", ")
}

/// `key=value` dump of response headers for the scan log.
pub fn response_header_dump(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}={}", name, value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaderMap, StatusCode};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use chrono::TimeZone;

    const ETAG: &str = "\"feedpress-v1\"";

    async fn conditional_handler(headers: AxumHeaderMap) -> Response {
        if headers
            .get("if-none-match")
            .and_then(|value| value.to_str().ok())
            == Some(ETAG)
        {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            return response;
        }

        assert!(headers.get("if-modified-since").is_none() || {
            let value = headers["if-modified-since"].to_str().expect("ascii header");
            parse_http_date(value).is_some()
        });

        let mut response = Response::new(axum::body::Body::from("<rss/>"));
        response
            .headers_mut()
            .insert("etag", ETAG.parse().expect("header must parse"));
        response
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        format!("http://{address}")
    }

    fn test_client() -> reqwest::Client {
        build_client(&Config::default()).expect("client should build")
    }

    #[tokio::test]
    async fn sends_conditional_headers_and_reports_not_modified() {
        let base = spawn_server(Router::new().route("/feed.xml", get(conditional_handler))).await;
        let client = test_client();
        let url = format!("{base}/feed.xml");

        let first = fetch(&client, &url, &ConditionalHeaders::default(), 3)
            .await
            .expect("first fetch should succeed");
        assert_eq!(first.status, 200);
        assert_eq!(first.header("etag"), Some(ETAG));
        assert!(first.redirects.is_empty());

        let conditional = ConditionalHeaders {
            etag: Some(ETAG.to_string()),
            last_modified: Some(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap()),
        };
        let second = fetch(&client, &url, &conditional, 3)
            .await
            .expect("second fetch should succeed");
        assert_eq!(second.status, 304);
    }

    #[tokio::test]
    async fn records_redirect_chain_and_final_url() {
        async fn hop_one() -> Response {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            response
                .headers_mut()
                .insert("location", "/hop2".parse().expect("header must parse"));
            response
        }
        async fn hop_two() -> Response {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            response
                .headers_mut()
                .insert("location", "/final".parse().expect("header must parse"));
            response
        }
        let app = Router::new()
            .route("/hop1", get(hop_one))
            .route("/hop2", get(hop_two))
            .route("/final", get(|| async { "done" }));
        let base = spawn_server(app).await;
        let client = test_client();

        let response = fetch(
            &client,
            &format!("{base}/hop1"),
            &ConditionalHeaders::default(),
            3,
        )
        .await
        .expect("fetch should follow redirects");

        assert_eq!(response.status, 200);
        assert_eq!(response.final_url, format!("{base}/final"));
        assert_eq!(response.redirects.len(), 2);
        assert_eq!(response.redirects[0].status, 301);
        assert_eq!(response.redirects[0].url, format!("{base}/hop1"));
        assert_eq!(response.redirects[1].status, 302);
        // last hop was temporary, so this is not a permanent move
        assert!(!response.permanently_moved());
    }

    #[tokio::test]
    async fn bails_out_on_redirect_loops() {
        async fn looping() -> Response {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            response
                .headers_mut()
                .insert("location", "/loop".parse().expect("header must parse"));
            response
        }
        let base = spawn_server(Router::new().route("/loop", get(looping))).await;
        let client = test_client();

        let result = fetch(
            &client,
            &format!("{base}/loop"),
            &ConditionalHeaders::default(),
            3,
        )
        .await;

        assert!(matches!(result, Err(FetchError::TooManyRedirects(3))));
    }

    #[tokio::test]
    async fn connection_failures_map_to_connect_errors() {
        let client = test_client();
        // port 1 is never listening
        let result = fetch(
            &client,
            "http://127.0.0.1:1/feed.xml",
            &ConditionalHeaders::default(),
            3,
        )
        .await;
        assert!(matches!(
            result,
            Err(FetchError::Connect(_)) | Err(FetchError::Timeout)
        ));
    }

    #[test]
    fn http_date_round_trips_rfc1123() {
        let moment = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let formatted = http_date(moment);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(moment));
    }

    #[test]
    fn charset_is_read_from_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            "application/rss+xml; charset=ISO-8859-1"
                .parse()
                .expect("header must parse"),
        );
        let response = FeedResponse {
            status: 200,
            headers,
            body: Vec::new(),
            final_url: "http://example.com/feed".to_string(),
            redirects: Vec::new(),
        };
        assert_eq!(response.charset().as_deref(), Some("ISO-8859-1"));
        assert_eq!(response.media_type().as_deref(), Some("application/rss+xml"));
    }
}
