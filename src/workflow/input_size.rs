use log::{debug, warn};
use reqwest::header::CONTENT_LENGTH;

use crate::workflow::materialize::is_remote;

/// Total size in bytes of the inputs a job will read
///
/// Remote inputs are sized with a HEAD request and never downloaded. Inputs that can't be sized
/// count as zero: missing local files are reported by input generation instead.
pub async fn total_input_size(http: &reqwest::Client, paths: &[&str]) -> u64 {
    let mut total = 0;
    for path in paths {
        let size = if is_remote(path) {
            remote_size(http, path).await
        } else {
            local_size(path).await
        };
        total += size.unwrap_or(0);
    }
    total
}

async fn local_size(path: &str) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Some(metadata.len()),
        Err(err) => {
            debug!("Can't size {path}: {err}");
            None
        }
    }
}

async fn remote_size(http: &reqwest::Client, url: &str) -> Option<u64> {
    let response = match http.head(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(err) => {
            warn!("Size request for {url} failed: {err}");
            return None;
        }
    };
    // read the header, a HEAD response has no body to measure
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
