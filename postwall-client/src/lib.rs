pub mod comments;
pub mod compose;
pub mod config;
pub mod detail;
pub mod error;
pub mod feed;
pub mod recommend;
pub mod scroll;
pub mod search;
pub mod session;
pub mod settings;
pub mod stats;
pub mod theme;
