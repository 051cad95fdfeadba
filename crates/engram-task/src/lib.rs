pub mod engine;

pub use engine::{TaskCompletion, TaskEngine};
