pub mod http;
pub mod metadata;
pub mod parent;
pub mod progress_stream;

use url::Url;

pub use http::HttpTransport;
pub use parent::HttpParentService;
pub use progress_stream::ProgressStream;

/// 解析服务地址，保证路径以 `/` 结尾以便 join
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, String> {
    let mut url = Url::parse(endpoint.trim()).map_err(|err| format!("{:?}: {}", endpoint, err))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{:?}: unsupported scheme {}", endpoint, url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// 相对的 Location 按服务地址解析
pub(crate) fn resolve_location(endpoint: &Url, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    endpoint
        .join(location)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// 错误响应里截取一段可读信息
pub(crate) fn error_message(body: &str, fallback: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return fallback.to_string();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(|message| message.as_str()) {
                return message.to_string();
            }
        }
    }
    body.chars().take(200).collect()
}
