use std::time::Duration;

/// Default timeout for forum/skill calls. LLM calls pass their own.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    build_http_client_with_timeout(Some(DEFAULT_HTTP_TIMEOUT))
}

/// System proxy discovery is opt-in (`MEMEYA_ENABLE_SYSTEM_PROXY=1`); when it
/// fails the client is rebuilt with `no_proxy`.
pub fn build_http_client_with_timeout(
    timeout: Option<Duration>,
) -> Result<reqwest::Client, reqwest::Error> {
    let allow_system_proxy = std::env::var("MEMEYA_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => tracing::warn!(
                "HTTP client initialization with system proxy failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    attempt_build(timeout, true)
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
