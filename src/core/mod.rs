pub mod cache;
pub mod db;
pub mod errors;
pub mod forms;
pub mod helpers;
pub mod paginator;
pub mod query_params;
pub mod static_server;
