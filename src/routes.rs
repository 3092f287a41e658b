use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::models::{NewExercise, NewFoodLog, NewUser, NewWorkout, NutritionEstimate, User};
use crate::services::storage::DuplicateUsername;
use crate::services::{AnalysisError, NutritionAnalyzer, Storage};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub analyzer: Arc<NutritionAnalyzer>,
}

/// Build the API router from injected collaborators. Nothing here is a
/// module-level singleton; main constructs storage and the analyzer once
/// and hands them in.
pub fn create_router(storage: Arc<dyn Storage>, analyzer: Arc<NutritionAnalyzer>) -> Router {
    let state = AppState { storage, analyzer };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(create_user))
        .route("/api/users/:id", get(get_user))
        .route("/api/exercises", get(list_exercises).post(create_exercise))
        .route("/api/workouts", get(list_workouts).post(create_workout))
        .route("/api/nutrition", get(list_food_logs).post(create_food_log))
        .route("/api/nutrition/analyze", post(analyze_nutrition))
        .with_state(state)
}

/// Transport-level error: a status code plus a `{"error": ...}` body.
/// Typed analyzer errors are translated here; internal detail stays in
/// the logs.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(err: anyhow::Error) -> Self {
        log::error!("Storage error: {:#}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match &err {
            // Deployment defects: the operator has to fix the credential.
            AnalysisError::MissingCredential | AnalysisError::CredentialRejected(_) => {
                log::error!("Analyzer configuration error: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AnalysisError::Blocked { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            AnalysisError::Provider(_) => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
            // The raw payload stays in the logs; users get the generic
            // retry message from the error display.
            AnalysisError::Parse { .. } => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn create_user(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    if new_user.username.trim().is_empty() {
        return Err(ApiError::bad_request("username must not be empty"));
    }

    let existing = state
        .storage
        .get_user_by_username(&new_user.username)
        .await
        .map_err(ApiError::internal)?;
    if existing.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "username already taken",
        ));
    }

    let user = match state.storage.create_user(new_user).await {
        Ok(user) => user,
        // Lost a create race: the existence check above passed for both
        // requests and the backend rejected the second insert.
        Err(err) if err.downcast_ref::<DuplicateUsername>().is_some() => {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "username already taken",
            ));
        }
        Err(err) => return Err(ApiError::internal(err)),
    };
    log::info!("Created user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .storage
        .get_user(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    Ok(Json(user))
}

async fn list_exercises(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let exercises = state
        .storage
        .list_exercises()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(exercises))
}

async fn create_exercise(
    State(state): State<AppState>,
    Json(new_exercise): Json<NewExercise>,
) -> Result<impl IntoResponse, ApiError> {
    if new_exercise.name.trim().is_empty() || new_exercise.muscle_group.trim().is_empty() {
        return Err(ApiError::bad_request(
            "name and muscle_group must not be empty",
        ));
    }

    let exercise = state
        .storage
        .create_exercise(new_exercise)
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(exercise)))
}

#[derive(Deserialize)]
struct UserScope {
    user_id: i64,
}

async fn require_user(state: &AppState, user_id: i64) -> Result<(), ApiError> {
    state
        .storage
        .get_user(user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(())
}

async fn list_workouts(
    State(state): State<AppState>,
    Query(scope): Query<UserScope>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&state, scope.user_id).await?;

    let workouts = state
        .storage
        .list_workouts(scope.user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(workouts))
}

async fn create_workout(
    State(state): State<AppState>,
    Json(new_workout): Json<NewWorkout>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&state, new_workout.user_id).await?;

    let workout = state
        .storage
        .create_workout(new_workout)
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(workout)))
}

async fn list_food_logs(
    State(state): State<AppState>,
    Query(scope): Query<UserScope>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&state, scope.user_id).await?;

    let logs = state
        .storage
        .list_food_logs(scope.user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(logs))
}

async fn create_food_log(
    State(state): State<AppState>,
    Json(new_log): Json<NewFoodLog>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&state, new_log.user_id).await?;

    if new_log.food_name.trim().is_empty() {
        return Err(ApiError::bad_request("food_name must not be empty"));
    }

    let food_log = state
        .storage
        .create_food_log(new_log)
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(food_log)))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub description: String,
}

async fn analyze_nutrition(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<NutritionEstimate>, ApiError> {
    let description = request.description.trim();
    if description.is_empty() {
        return Err(ApiError::bad_request("description must not be empty"));
    }

    let estimate = state.analyzer.analyze(description).await?;
    Ok(Json(estimate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemStorage;
    use crate::services::TextGenerator;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    enum StubProvider {
        Text(&'static str),
        Blocked(&'static str),
        Failure(&'static str),
        MissingKey,
    }

    #[async_trait::async_trait]
    impl TextGenerator for StubProvider {
        async fn generate(&self, _prompt: &str) -> Result<String, AnalysisError> {
            match self {
                StubProvider::Text(text) => Ok(text.to_string()),
                StubProvider::Blocked(reason) => Err(AnalysisError::Blocked {
                    reason: reason.to_string(),
                }),
                StubProvider::Failure(msg) => Err(AnalysisError::Provider(msg.to_string())),
                StubProvider::MissingKey => Err(AnalysisError::MissingCredential),
            }
        }
    }

    fn test_router(provider: StubProvider) -> Router {
        let storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
        let analyzer = Arc::new(NutritionAnalyzer::new(Arc::new(provider)));
        create_router(storage, analyzer)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = test_router(StubProvider::Text("{}"));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_analyze_happy_path() {
        let router = test_router(StubProvider::Text(
            r#"{"foodName":"Grilled Chicken with Rice","calories":450,"protein":40,"carbs":45,"fat":10}"#,
        ));

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "a grilled chicken breast with a cup of brown rice and broccoli"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["foodName"], "Grilled Chicken with Rice");
        assert_eq!(body["calories"], 450);
        assert_eq!(body["protein"], 40);
        assert_eq!(body["carbs"], 45);
        assert_eq!(body["fat"], 10);
    }

    #[tokio::test]
    async fn test_analyze_rejects_blank_description() {
        let router = test_router(StubProvider::Text("{}"));
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_missing_credential_is_500() {
        let router = test_router(StubProvider::MissingKey);
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "an apple"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_analyze_blocked_is_422_with_reason() {
        let router = test_router(StubProvider::Blocked("SAFETY"));
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "something dubious"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_analyze_provider_failure_is_502() {
        let router = test_router(StubProvider::Failure("connection timed out"));
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "a sandwich"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_analyze_invalid_json_is_502_without_raw_payload() {
        let router = test_router(StubProvider::Text(
            r#"{"foodName": "Apple", "calories": 95"#,
        ));
        let response = router
            .oneshot(json_request(
                "POST",
                "/api/nutrition/analyze",
                json!({"description": "an apple"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("try again"));
        assert!(!message.contains("Apple"));
    }

    #[tokio::test]
    async fn test_user_then_food_log_flow() {
        let router = test_router(StubProvider::Text("{}"));

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let user = body_json(response).await;
        let user_id = user["id"].as_i64().unwrap();

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/nutrition",
                json!({
                    "user_id": user_id,
                    "date": "2026-08-27",
                    "meal_type": "lunch",
                    "food_name": "Grilled Chicken with Rice",
                    "calories": 450,
                    "protein": 40,
                    "carbs": 45,
                    "fat": 10
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(
                Request::get(format!("/api/nutrition?user_id={}", user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let logs = body_json(response).await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(logs[0]["food_name"], "Grilled Chicken with Rice");
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let router = test_router(StubProvider::Text("{}"));

        let first = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "bob"}),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = router
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "bob"}),
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_user_id_wider_than_32_bits_is_404() {
        let router = test_router(StubProvider::Text("{}"));

        let created = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let user_id = body_json(created).await["id"].as_i64().unwrap();

        // Aliases the first user's id modulo 2^32; must miss, not
        // resolve to it.
        let aliased = user_id + (1i64 << 32);
        let response = router
            .oneshot(
                Request::get(format!("/api/users/{}", aliased))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Simulates the loser of a concurrent create: the route's existence
    /// check sees nothing, then the backend rejects the insert.
    struct RacingStorage {
        inner: MemStorage,
    }

    #[async_trait::async_trait]
    impl Storage for RacingStorage {
        async fn create_user(&self, new_user: crate::models::NewUser) -> anyhow::Result<User> {
            self.inner.create_user(new_user).await
        }
        async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>> {
            self.inner.get_user(id).await
        }
        async fn get_user_by_username(&self, _username: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
        async fn list_exercises(&self) -> anyhow::Result<Vec<crate::models::Exercise>> {
            self.inner.list_exercises().await
        }
        async fn create_exercise(
            &self,
            new_exercise: NewExercise,
        ) -> anyhow::Result<crate::models::Exercise> {
            self.inner.create_exercise(new_exercise).await
        }
        async fn create_workout(
            &self,
            new_workout: NewWorkout,
        ) -> anyhow::Result<crate::models::Workout> {
            self.inner.create_workout(new_workout).await
        }
        async fn list_workouts(&self, user_id: i64) -> anyhow::Result<Vec<crate::models::Workout>> {
            self.inner.list_workouts(user_id).await
        }
        async fn create_food_log(
            &self,
            new_log: NewFoodLog,
        ) -> anyhow::Result<crate::models::FoodLog> {
            self.inner.create_food_log(new_log).await
        }
        async fn list_food_logs(
            &self,
            user_id: i64,
        ) -> anyhow::Result<Vec<crate::models::FoodLog>> {
            self.inner.list_food_logs(user_id).await
        }
        async fn put_session(&self, token: &str, user_id: i64) -> anyhow::Result<()> {
            self.inner.put_session(token, user_id).await
        }
        async fn get_session(&self, token: &str) -> anyhow::Result<Option<i64>> {
            self.inner.get_session(token).await
        }
        async fn delete_session(&self, token: &str) -> anyhow::Result<()> {
            self.inner.delete_session(token).await
        }
    }

    #[tokio::test]
    async fn test_create_race_loser_is_conflict_not_500() {
        let storage: Arc<dyn Storage> = Arc::new(RacingStorage {
            inner: MemStorage::new(),
        });
        let analyzer = Arc::new(NutritionAnalyzer::new(Arc::new(StubProvider::Text("{}"))));
        let router = create_router(storage, analyzer);

        let first = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "carol"}),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        // Existence check reports no user, so this reaches the backend
        // and must surface its duplicate rejection as 409.
        let second = router
            .oneshot(json_request(
                "POST",
                "/api/users",
                json!({"username": "carol"}),
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_workouts_for_unknown_user_is_404() {
        let router = test_router(StubProvider::Text("{}"));
        let response = router
            .oneshot(
                Request::get("/api/workouts?user_id=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exercise_create_and_list() {
        let router = test_router(StubProvider::Text("{}"));

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/exercises",
                json!({"name": "Bench Press", "muscle_group": "chest", "description": null}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(Request::get("/api/exercises").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let exercises = body_json(response).await;
        assert_eq!(exercises[0]["name"], "Bench Press");
    }
}
