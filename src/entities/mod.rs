pub mod project;
pub mod reminder;
pub mod task;
