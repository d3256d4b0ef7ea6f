#[derive(Clone)]
struct AppState {
    service: Arc<LedgerService>,
}

impl AppState {
    fn new(service: Arc<LedgerService>) -> Self {
        Self { service }
    }
}
