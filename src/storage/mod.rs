pub mod db;
mod expert_requests;
mod manuscripts;
pub mod models;
mod tables;
mod users;

pub use db::{Database, DatabaseError, Guarded, PurgeStats};
pub use manuscripts::ManuscriptFilter;
pub use tables::*;
