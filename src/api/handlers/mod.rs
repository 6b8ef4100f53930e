mod admin;
mod downloads;
mod transfers;

use axum::http::HeaderMap;

use crate::config::Config;

pub use admin::health;
pub use downloads::download_file;
pub use transfers::{create_transfer, get_transfer};

/// Public base URL for links handed back to clients.
///
/// The configured `BASE_URL` wins; otherwise the proxy headers, then `Host`.
fn base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(ref base) = config.node.base_url {
        return base.clone();
    }

    let first_value = |name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let proto = first_value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = first_value("x-forwarded-host")
        .or_else(|| first_value("host"))
        .unwrap_or_default();
    format!("{proto}://{host}")
}
