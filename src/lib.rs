pub mod auth;
pub mod booking;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod offline;
pub mod routes;
pub mod schedule;
pub mod state;
