pub mod blocks;
pub mod connections;
pub mod events;
pub mod follows;
pub mod health;
pub mod notifications;
pub mod presence;
pub mod users;
pub mod websocket;
