#[derive(Debug, Deserialize)]
struct EnrollRequest {
    user_id: String,
    username: String,
    referrer_id: Option<String>,
}

const DEFAULT_HISTORY_LIMIT: usize = 30;
const MAX_HISTORY_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DepositBody {
    user_id: String,
    tier: String,
    amount: f64,
}

async fn enroll_user(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<User>, HttpApiError> {
    if request.user_id.trim().is_empty() {
        return Err(HttpApiError::invalid_request("user_id must not be empty", None));
    }
    blocking(&state, move |service| {
        service.enroll_user(
            &request.user_id,
            &request.username,
            request.referrer_id.as_deref(),
            Utc::now(),
        )
    })
    .await
    .map(Json)
}

async fn open_investment(
    State(state): State<AppState>,
    Json(request): Json<DepositBody>,
) -> Result<Json<Investment>, HttpApiError> {
    blocking(&state, move |service| {
        service.open_investment(&request.user_id, &request.tier, request.amount, Utc::now())
    })
    .await
    .map(Json)
}

async fn get_investment(
    State(state): State<AppState>,
    Path(investment_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<InvestmentDetail>, HttpApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    blocking(&state, move |service| {
        service.investment_detail(&investment_id, limit)
    })
    .await
    .map(Json)
}

async fn mature_investment(
    State(state): State<AppState>,
    Path(investment_id): Path<String>,
) -> Result<Json<Investment>, HttpApiError> {
    blocking(&state, move |service| {
        service.mature_investment(&investment_id, Utc::now())
    })
    .await
    .map(Json)
}

async fn get_account_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AccountSummary>, HttpApiError> {
    blocking(&state, move |service| service.account_summary(&user_id))
        .await
        .map(Json)
}

async fn get_downline(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DownlineSummary>, HttpApiError> {
    blocking(&state, move |service| service.downline(&user_id))
        .await
        .map(Json)
}
