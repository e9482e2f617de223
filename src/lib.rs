//! User image catalog: image uploads into an object store, user/image
//! metadata in SQLite, and a cache-aside image list per user.

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
