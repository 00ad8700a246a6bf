pub mod chatbot;
pub mod core;
pub mod directory;
pub mod grades;
pub mod reports;
pub mod schedule;
