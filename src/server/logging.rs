use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;

const LOG_TARGET: &str = "server::http";

/// Table or round a dealer request addresses, read from its path.
fn subject(path: &str) -> Option<(&'static str, &str)> {
    let mut segments = path.trim_start_matches('/').split('/');
    let kind = match segments.next()? {
        "tables" => "table",
        "rounds" => "round",
        _ => return None,
    };
    let id = segments.next()?;
    id.chars().all(|c| c.is_ascii_digit()).then_some((kind, id))
}

/// Log each operator request inside a span carrying the table or round it
/// targets, so controller logs emitted while serving it nest under it.
/// Business rejections travel as 200 responses and are logged by the
/// controller itself; only transport failures raise the level here.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = match subject(&path) {
        Some((kind, id)) => tracing::info_span!("request", %method, %path, subject = kind, id),
        None => tracing::info_span!("request", %method, %path),
    };

    async move {
        tracing::debug!(target: LOG_TARGET, "incoming request");
        let start = Instant::now();
        let response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        if response.status().is_server_error() {
            tracing::error!(target: LOG_TARGET, status, duration_ms, "request failed");
        } else if response.status().is_client_error() {
            tracing::warn!(target: LOG_TARGET, status, duration_ms, "request rejected");
        } else {
            tracing::info!(target: LOG_TARGET, status, duration_ms, "request completed");
        }
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::subject;

    #[test]
    fn subject_comes_from_table_and_round_paths() {
        assert_eq!(subject("/tables/12/start"), Some(("table", "12")));
        assert_eq!(subject("/rounds/7/cancel"), Some(("round", "7")));
        assert_eq!(subject("/rounds/settle"), None);
        assert_eq!(subject("/jobs/settlement/dead"), None);
    }
}
