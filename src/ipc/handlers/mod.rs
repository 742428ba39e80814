pub mod components;
pub mod core;
pub mod grades;
pub mod scores;
pub mod sections;
pub mod students;
pub mod thresholds;
