use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::{
    Exercise, FoodLog, MealType, NewExercise, NewFoodLog, NewUser, NewWorkout, User, Workout,
};
use crate::services::storage::{DuplicateUsername, Storage};

// Postgres unique_violation; create_user maps it to DuplicateUsername.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = PgStorage { pool };
        storage.init_tables().await?;
        Ok(storage)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exercises (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                muscle_group TEXT NOT NULL,
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workouts (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id),
                date DATE NOT NULL,
                name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS food_logs (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id),
                date DATE NOT NULL,
                meal_type TEXT NOT NULL,
                food_name TEXT NOT NULL,
                calories INTEGER NOT NULL,
                protein INTEGER NOT NULL,
                carbs INTEGER NOT NULL,
                fat INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get(0),
        username: row.get(1),
        created_at: row.get(2),
    }
}

fn row_to_exercise(row: &sqlx::postgres::PgRow) -> Exercise {
    Exercise {
        id: row.get(0),
        name: row.get(1),
        muscle_group: row.get(2),
        description: row.get(3),
    }
}

fn row_to_workout(row: &sqlx::postgres::PgRow) -> Workout {
    Workout {
        id: row.get(0),
        user_id: row.get(1),
        date: row.get(2),
        name: row.get(3),
    }
}

fn row_to_food_log(row: &sqlx::postgres::PgRow) -> FoodLog {
    let meal_type_str: String = row.get(3);
    let meal_type = MealType::from_string(&meal_type_str).unwrap_or_else(|| {
        log::warn!("Unknown meal type '{}', defaulting to snack", meal_type_str);
        MealType::Snack
    });

    FoodLog {
        id: row.get(0),
        user_id: row.get(1),
        date: row.get(2),
        meal_type,
        food_name: row.get(4),
        calories: row.get(5),
        protein: row.get(6),
        carbs: row.get(7),
        fat: row.get(8),
    }
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, created_at)
            VALUES ($1, NOW())
            RETURNING id, username, created_at
            "#,
        )
        .bind(&new_user.username)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row_to_user(&row)),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(anyhow::Error::new(DuplicateUsername(new_user.username)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_user))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_user))
    }

    async fn list_exercises(&self) -> Result<Vec<Exercise>> {
        let rows =
            sqlx::query("SELECT id, name, muscle_group, description FROM exercises ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(row_to_exercise).collect())
    }

    async fn create_exercise(&self, new_exercise: NewExercise) -> Result<Exercise> {
        let row = sqlx::query(
            r#"
            INSERT INTO exercises (name, muscle_group, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, muscle_group, description
            "#,
        )
        .bind(&new_exercise.name)
        .bind(&new_exercise.muscle_group)
        .bind(&new_exercise.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_exercise(&row))
    }

    async fn create_workout(&self, new_workout: NewWorkout) -> Result<Workout> {
        let row = sqlx::query(
            r#"
            INSERT INTO workouts (user_id, date, name)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, date, name
            "#,
        )
        .bind(new_workout.user_id)
        .bind(new_workout.date)
        .bind(&new_workout.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_workout(&row))
    }

    async fn list_workouts(&self, user_id: i64) -> Result<Vec<Workout>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, date, name
            FROM workouts
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_workout).collect())
    }

    async fn create_food_log(&self, new_log: NewFoodLog) -> Result<FoodLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO food_logs (user_id, date, meal_type, food_name, calories, protein, carbs, fat)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, date, meal_type, food_name, calories, protein, carbs, fat
            "#,
        )
        .bind(new_log.user_id)
        .bind(new_log.date)
        .bind(new_log.meal_type.to_string())
        .bind(&new_log.food_name)
        .bind(new_log.calories)
        .bind(new_log.protein)
        .bind(new_log.carbs)
        .bind(new_log.fat)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_food_log(&row))
    }

    async fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, date, meal_type, food_name, calories, protein, carbs, fat
            FROM food_logs
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_food_log).collect())
    }

    async fn put_session(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id)
            VALUES ($1, $2)
            ON CONFLICT (token) DO UPDATE SET user_id = EXCLUDED.user_id
            "#,
        )
        .bind(token)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
