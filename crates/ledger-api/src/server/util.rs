fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

/// Runs a store-touching service call off the async workers.
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, HttpApiError>
where
    T: Send + 'static,
    F: FnOnce(&LedgerService) -> Result<T, LedgerError> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || op(&service))
        .await
        .map_err(|err| HttpApiError::internal("request worker failed", Some(err.to_string())))?
        .map_err(HttpApiError::from_ledger)
}

fn parse_job(raw: &str) -> Result<JobKind, HttpApiError> {
    JobKind::parse(raw).ok_or_else(|| {
        HttpApiError::invalid_request(
            "unknown job",
            Some(format!(
                "job={raw} expected one of daily_accrual, maturity_sweep, retention_sweep"
            )),
        )
    })
}
