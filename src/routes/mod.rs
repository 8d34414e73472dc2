pub mod authoring;
pub mod health;
pub mod student;
