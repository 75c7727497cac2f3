#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    config: SessionConfig,
    #[serde(flatten)]
    catalog: CatalogSource,
    #[serde(default)]
    known_drafts: Vec<String>,
    persist: Option<bool>,
    sqlite_path: Option<String>,
    replace_existing: Option<bool>,
}

/// Inline catalog document or a path to one; inline wins when both are set.
#[derive(Debug, Default, Deserialize)]
struct CatalogSource {
    catalog: Option<Value>,
    catalog_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    schema_version: String,
    session_id: String,
    status: SessionStatus,
    catalog_size: usize,
    replaced_loaded_session: bool,
    replaced_persisted_session: bool,
    persistent: bool,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, HttpApiError> {
    let catalog = load_catalog(&request.catalog)?;
    let catalog_size = catalog.len();
    let config = request.config;
    let session_id = config.session_id.clone();

    let city = CityModel::from_config(&config).with_known_drafts(request.known_drafts);
    let session = CitySession::with_city(config, catalog, Arc::clone(&state.registry), city);
    let mut api = ContractApi::from_session(session);

    let persistent = request.persist.unwrap_or(true);
    let mut replaced_persisted_session = false;
    if persistent {
        api.attach_sqlite_store(sqlite_path_or_default(request.sqlite_path))
            .map_err(HttpApiError::from_persistence)?;
        replaced_persisted_session = api
            .initialize_session_storage(request.replace_existing.unwrap_or(true))
            .map_err(HttpApiError::from_persistence)?;
    }

    let status = api.status();
    let mut inner = state.inner.lock().await;
    let replaced_loaded_session = inner.sessions.insert(session_id.clone(), api).is_some();
    info!(%session_id, catalog_size, persistent, "session created");

    Ok(Json(CreateSessionResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        session_id,
        status,
        catalog_size,
        replaced_loaded_session,
        replaced_persisted_session,
        persistent,
    }))
}

#[derive(Debug, Deserialize)]
struct ResumeSessionRequest {
    #[serde(flatten)]
    catalog: CatalogSource,
    sqlite_path: Option<String>,
}

async fn resume_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ResumeSessionRequest>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let catalog = load_catalog(&request.catalog)?;
    let api = ContractApi::resume_from_sqlite(
        sqlite_path_or_default(request.sqlite_path),
        &session_id,
        catalog,
        Arc::clone(&state.registry),
    )
    .map_err(HttpApiError::from_persistence)?;

    let status = api.status();
    let mut inner = state.inner.lock().await;
    inner.sessions.insert(session_id, api);
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    page_size: Option<usize>,
    sqlite_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListSessionsResponse {
    schema_version: String,
    loaded: Vec<SessionStatus>,
    persisted: Vec<PersistedSessionSummary>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, HttpApiError> {
    let page_size = query.page_size.unwrap_or(200).clamp(1, MAX_PAGE_SIZE);

    let loaded = {
        let inner = state.inner.lock().await;
        inner.sessions.values().map(ContractApi::status).collect()
    };

    let persisted = match query.sqlite_path.filter(|path| !path.trim().is_empty()) {
        Some(path) => crate::persistence::SqliteSessionStore::open(path)
            .and_then(|store| store.list_sessions(page_size))
            .map_err(HttpApiError::from_persistence)?,
        None => Vec::new(),
    };

    Ok(Json(ListSessionsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        loaded,
        persisted,
    }))
}

async fn get_status(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;
    Ok(Json(api.status()))
}

#[derive(Debug, Deserialize)]
struct SaveSessionQuery {
    sqlite_path: Option<String>,
}

async fn save_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<SaveSessionQuery>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;

    if api.is_persistent() {
        api.flush_persistence_checked()
            .map_err(HttpApiError::from_persistence)?;
    } else {
        api.attach_sqlite_store(sqlite_path_or_default(query.sqlite_path))
            .map_err(HttpApiError::from_persistence)?;
        api.initialize_session_storage(true)
            .map_err(HttpApiError::from_persistence)?;
    }

    Ok(Json(api.status()))
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    schema_version: String,
    result: CommandResult,
    status: SessionStatus,
}

async fn submit_command(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Result<Json<CommandResponse>, HttpApiError> {
    if command.session_id != session_id {
        return Err(HttpApiError::invalid_command(
            "command.session_id must match path session_id",
            Some(format!(
                "path_session_id={session_id} command_session_id={}",
                command.session_id
            )),
        ));
    }

    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;
    let result = api.submit_command(command);

    Ok(Json(CommandResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        result,
        status: api.status(),
    }))
}

#[derive(Debug, Serialize)]
struct CommandsResponse {
    schema_version: String,
    session_id: String,
    commands: Vec<PersistedCommandEntry>,
}

async fn get_commands(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CommandsResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;

    Ok(Json(CommandsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        session_id,
        commands: api.command_log().to_vec(),
    }))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    cursor: Option<usize>,
    page_size: Option<usize>,
    event_type: Option<String>,
    contract_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventsResponse {
    schema_version: String,
    session_id: String,
    events: Vec<ContractEvent>,
    next_cursor: Option<usize>,
}

async fn get_events(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, HttpApiError> {
    let event_type = query
        .event_type
        .as_deref()
        .map(parse_event_type)
        .transpose()?;

    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;

    let filtered = api
        .events()
        .iter()
        .filter(|event| event_type.map_or(true, |kind| event.event_type == kind))
        .filter(|event| {
            query
                .contract_id
                .as_deref()
                .map_or(true, |contract_id| event.contract_id.as_deref() == Some(contract_id))
        })
        .collect::<Vec<_>>();

    let (start, end, next_cursor) = paginate(filtered.len(), query.cursor, query.page_size)?;

    Ok(Json(EventsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        session_id,
        events: filtered[start..end].iter().map(|event| (*event).clone()).collect(),
        next_cursor,
    }))
}
