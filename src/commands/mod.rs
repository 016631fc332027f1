pub mod extract;
pub mod setup_db;
pub mod status;
