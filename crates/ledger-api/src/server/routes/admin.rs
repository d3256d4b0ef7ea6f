async fn trigger_accrual(
    State(state): State<AppState>,
) -> Result<Json<ManualAccrualResult>, HttpApiError> {
    blocking(&state, |service| {
        Ok(service.trigger_manual_accrual(Utc::now()))
    })
    .await
    .map(Json)
}

async fn trigger_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<JobReport>, HttpApiError> {
    let job = parse_job(&job)?;
    state
        .service
        .dispatch(job, Utc::now())
        .await
        .map(Json)
        .map_err(HttpApiError::from_ledger)
}

async fn get_scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.service.scheduler_status(Utc::now()))
}
