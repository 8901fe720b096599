//! Read and delete access to registered users, behind bearer authentication.

pub mod handlers;
mod service;

pub use service::UserService;
