use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{
    Exercise, FoodLog, NewExercise, NewFoodLog, NewUser, NewWorkout, User, Workout,
};
use crate::services::storage::{DuplicateUsername, Storage};

#[derive(Default)]
struct MemInner {
    users: HashMap<i64, User>,
    exercises: HashMap<i64, Exercise>,
    workouts: HashMap<i64, Workout>,
    food_logs: HashMap<i64, FoodLog>,
    sessions: HashMap<String, i64>,
    next_id: i64,
}

impl MemInner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Map-backed storage used when no database is configured. Holds all
/// entities behind one lock; fine for a single-process deployment.
pub struct MemStorage {
    inner: Mutex<MemInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemInner::default()),
        }
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemStorage {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut inner = self.inner.lock().await;

        if inner
            .users
            .values()
            .any(|u| u.username == new_user.username)
        {
            return Err(anyhow::Error::new(DuplicateUsername(new_user.username)));
        }

        let user = User {
            id: inner.next_id(),
            username: new_user.username,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_exercises(&self) -> Result<Vec<Exercise>> {
        let inner = self.inner.lock().await;
        let mut exercises: Vec<Exercise> = inner.exercises.values().cloned().collect();
        exercises.sort_by_key(|e| e.id);
        Ok(exercises)
    }

    async fn create_exercise(&self, new_exercise: NewExercise) -> Result<Exercise> {
        let mut inner = self.inner.lock().await;
        let exercise = Exercise {
            id: inner.next_id(),
            name: new_exercise.name,
            muscle_group: new_exercise.muscle_group,
            description: new_exercise.description,
        };
        inner.exercises.insert(exercise.id, exercise.clone());
        Ok(exercise)
    }

    async fn create_workout(&self, new_workout: NewWorkout) -> Result<Workout> {
        let mut inner = self.inner.lock().await;
        let workout = Workout {
            id: inner.next_id(),
            user_id: new_workout.user_id,
            date: new_workout.date,
            name: new_workout.name,
        };
        inner.workouts.insert(workout.id, workout.clone());
        Ok(workout)
    }

    async fn list_workouts(&self, user_id: i64) -> Result<Vec<Workout>> {
        let inner = self.inner.lock().await;
        let mut workouts: Vec<Workout> = inner
            .workouts
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        workouts.sort_by_key(|w| w.id);
        Ok(workouts)
    }

    async fn create_food_log(&self, new_log: NewFoodLog) -> Result<FoodLog> {
        let mut inner = self.inner.lock().await;
        let log = FoodLog {
            id: inner.next_id(),
            user_id: new_log.user_id,
            date: new_log.date,
            meal_type: new_log.meal_type,
            food_name: new_log.food_name,
            calories: new_log.calories,
            protein: new_log.protein,
            carbs: new_log.carbs,
            fat: new_log.fat,
        };
        inner.food_logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLog>> {
        let inner = self.inner.lock().await;
        let mut logs: Vec<FoodLog> = inner
            .food_logs
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.id);
        Ok(logs)
    }

    async fn put_session(&self, token: &str, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(token.to_string(), user_id);
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<i64>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(token).copied())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(token);
        Ok(())
    }
}
