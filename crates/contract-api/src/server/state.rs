#[derive(Clone)]
struct AppState {
    inner: Arc<Mutex<ServerInner>>,
    registry: Arc<GoalRegistry>,
}

impl AppState {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServerInner::default())),
            registry: Arc::new(GoalRegistry::with_default_handlers()),
        }
    }
}

/// Loaded sessions keyed by id. Every handler holds the lock for its whole
/// operation, so a session's contract book is only ever touched by one
/// request at a time.
#[derive(Debug, Default)]
struct ServerInner {
    sessions: BTreeMap<String, ContractApi>,
}

fn require_session<'a>(
    inner: &'a ServerInner,
    session_id: &str,
) -> Result<&'a ContractApi, HttpApiError> {
    inner
        .sessions
        .get(session_id)
        .ok_or_else(|| HttpApiError::session_not_found(session_id))
}

fn require_session_mut<'a>(
    inner: &'a mut ServerInner,
    session_id: &str,
) -> Result<&'a mut ContractApi, HttpApiError> {
    inner
        .sessions
        .get_mut(session_id)
        .ok_or_else(|| HttpApiError::session_not_found(session_id))
}
