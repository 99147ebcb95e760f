pub mod db;
pub mod leaderboard;
pub mod message;
pub mod notice;
pub mod player;
pub mod rating;
pub mod standings;
