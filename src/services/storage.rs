use anyhow::Result;
use std::env;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    Exercise, FoodLog, NewExercise, NewFoodLog, NewUser, NewWorkout, User, Workout,
};
use crate::services::database::PgStorage;
use crate::services::memory::MemStorage;

/// Raised by both backends when an insert loses a uniqueness race; the
/// route layer downcasts this to answer 409 instead of 500.
#[derive(Debug, Error)]
#[error("username '{0}' already exists")]
pub struct DuplicateUsername(pub String);

/// Storage capability interface: user, exercise, workout and food-log
/// access plus session-store provisioning. One concrete backend is picked
/// at startup; handlers only ever see `Arc<dyn Storage>`.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User>;
    async fn get_user(&self, id: i64) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn list_exercises(&self) -> Result<Vec<Exercise>>;
    async fn create_exercise(&self, new_exercise: NewExercise) -> Result<Exercise>;

    async fn create_workout(&self, new_workout: NewWorkout) -> Result<Workout>;
    async fn list_workouts(&self, user_id: i64) -> Result<Vec<Workout>>;

    async fn create_food_log(&self, new_log: NewFoodLog) -> Result<FoodLog>;
    async fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLog>>;

    // Session store for the auth layer sitting in front of these routes.
    async fn put_session(&self, token: &str, user_id: i64) -> Result<()>;
    async fn get_session(&self, token: &str) -> Result<Option<i64>>;
    async fn delete_session(&self, token: &str) -> Result<()>;
}

/// Select the storage backend once at initialization: Postgres when
/// `DATABASE_URL` is configured, the in-memory map otherwise.
pub async fn storage_from_env() -> Result<Arc<dyn Storage>> {
    match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let storage = PgStorage::connect(&database_url).await?;
            log::info!("PostgreSQL storage initialized");
            Ok(Arc::new(storage))
        }
        Err(_) => {
            log::warn!("DATABASE_URL not set, using in-memory storage (data is not persisted)");
            Ok(Arc::new(MemStorage::new()))
        }
    }
}
