pub mod jobs;
pub mod summary;
pub mod sweep;
