#[derive(Debug, Serialize)]
struct ContractListResponse {
    schema_version: String,
    session_id: String,
    contracts: Vec<ContractView>,
}

impl ContractListResponse {
    fn new(session_id: String, contracts: Vec<ContractView>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id,
            contracts,
        }
    }
}

async fn get_active_contracts(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ContractListResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let contracts = require_session(&inner, &session_id)?.active_contracts();
    Ok(Json(ContractListResponse::new(session_id, contracts)))
}

async fn get_available_contracts(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ContractListResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let contracts = require_session(&inner, &session_id)?.available_contracts();
    Ok(Json(ContractListResponse::new(session_id, contracts)))
}

async fn get_almost_available_contracts(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ContractListResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let contracts = require_session(&inner, &session_id)?.almost_available_contracts();
    Ok(Json(ContractListResponse::new(session_id, contracts)))
}

async fn accept_contract(
    Path((session_id, contract_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<CommandResponse>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;
    submit_lifecycle_command(api, CommandPayload::AcceptContract { contract_id })
}

#[derive(Debug, Default, Deserialize)]
struct CancelContractQuery {
    #[serde(default)]
    force: bool,
}

async fn cancel_contract(
    Path((session_id, contract_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Query(query): Query<CancelContractQuery>,
) -> Result<Json<CommandResponse>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner, &session_id)?;
    submit_lifecycle_command(
        api,
        CommandPayload::CancelContract {
            contract_id,
            force: query.force,
        },
    )
}

#[derive(Debug, Serialize)]
struct NextActionResponse {
    schema_version: String,
    session_id: String,
    contract_id: String,
    next_action: Option<String>,
}

async fn get_next_action(
    Path((session_id, contract_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<NextActionResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner, &session_id)?;
    if api.session().book().catalog().get(&contract_id).is_none() {
        return Err(HttpApiError::from_api_error(ApiError::new(
            ErrorCode::UnknownContract,
            "contract_id is not in the catalog",
            Some(format!("contract_id={contract_id}")),
        )));
    }

    Ok(Json(NextActionResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        next_action: api.next_action(&contract_id),
        session_id,
        contract_id,
    }))
}

/// Routes a convenience endpoint through the audited command path. Rejected
/// commands surface as HTTP errors.
fn submit_lifecycle_command(
    api: &mut ContractApi,
    payload: CommandPayload,
) -> Result<Json<CommandResponse>, HttpApiError> {
    let command = Command::new(api.next_command_id("http"), api.session_id(), payload);
    let result = api.submit_command(command);
    if let Some(error) = result.error.clone() {
        return Err(HttpApiError::from_api_error(error));
    }

    Ok(Json(CommandResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        result,
        status: api.status(),
    }))
}
