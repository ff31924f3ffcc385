pub mod auth;
pub mod chats;
pub mod posts;
pub mod uploads;
pub mod users;
