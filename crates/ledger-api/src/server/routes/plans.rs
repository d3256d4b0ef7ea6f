#[derive(Debug, Serialize)]
struct PlansResponse {
    schema_version: String,
    plans: Vec<PlanTerms>,
}

#[derive(Debug, Deserialize)]
struct PlanAmountQuery {
    tier: String,
    amount: f64,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    schema_version: String,
    valid: bool,
    terms: PlanTerms,
}

async fn list_plans(State(state): State<AppState>) -> Json<PlansResponse> {
    Json(PlansResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        plans: state.service.plans(),
    })
}

async fn quote_plan(
    State(state): State<AppState>,
    Query(query): Query<PlanAmountQuery>,
) -> Result<Json<ProjectedReturn>, HttpApiError> {
    state
        .service
        .projected_return(query.amount, &query.tier)
        .map(Json)
        .map_err(HttpApiError::from_ledger)
}

async fn validate_amount(
    State(state): State<AppState>,
    Query(query): Query<PlanAmountQuery>,
) -> Result<Json<ValidateResponse>, HttpApiError> {
    let terms = state
        .service
        .validate_investment_amount(&query.tier, query.amount)
        .map_err(HttpApiError::from_ledger)?;
    Ok(Json(ValidateResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        valid: true,
        terms,
    }))
}
