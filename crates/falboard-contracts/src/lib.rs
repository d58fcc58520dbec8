pub mod chat;
pub mod events;
pub mod form;
pub mod models;
