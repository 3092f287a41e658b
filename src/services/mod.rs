pub mod database;
pub mod gemini; // Gemini text-generation client
pub mod memory;
pub mod nutrition; // AI meal analyzer
pub mod storage;

pub use gemini::GeminiClient;
pub use nutrition::{AnalysisError, NutritionAnalyzer, TextGenerator};
pub use storage::{storage_from_env, Storage};
