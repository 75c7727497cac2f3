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

fn sqlite_path_or_default(requested: Option<String>) -> String {
    requested
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn load_catalog(source: &CatalogSource) -> Result<Arc<Catalog>, HttpApiError> {
    let catalog = match (&source.catalog, &source.catalog_path) {
        (Some(document), _) => Catalog::from_document(document),
        (None, Some(path)) if !path.trim().is_empty() => Catalog::from_path(path),
        _ => {
            return Err(HttpApiError::invalid_command(
                "either catalog or catalog_path is required",
                None,
            ))
        }
    };
    catalog.map(Arc::new).map_err(HttpApiError::from_catalog)
}

fn paginate(
    total: usize,
    cursor: Option<usize>,
    page_size: Option<usize>,
) -> Result<(usize, usize, Option<usize>), HttpApiError> {
    let start = cursor.unwrap_or(0);
    if start > total {
        return Err(HttpApiError::invalid_command(
            "cursor is out of bounds",
            Some(format!("cursor={start} total={total}")),
        ));
    }

    let size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let end = start.saturating_add(size).min(total);
    let next_cursor = if end < total { Some(end) } else { None };

    Ok((start, end, next_cursor))
}

fn parse_event_type(value: &str) -> Result<ContractEventType, HttpApiError> {
    let normalized = value.trim().to_lowercase();
    match normalized.as_str() {
        "accepted" => Ok(ContractEventType::Accepted),
        "completed" => Ok(ContractEventType::Completed),
        "cancelled" | "canceled" => Ok(ContractEventType::Cancelled),
        "draft_constructed" | "draftconstructed" => Ok(ContractEventType::DraftConstructed),
        "day_advanced" | "dayadvanced" => Ok(ContractEventType::DayAdvanced),
        _ => Err(HttpApiError::invalid_command(
            "unknown event_type filter",
            Some(format!("event_type={value}")),
        )),
    }
}
