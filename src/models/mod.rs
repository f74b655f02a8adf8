pub mod api;
pub mod evaluation;
pub mod extraction;
pub mod job;
