pub mod admin;
pub mod chat;
pub mod health;
pub mod memory;
