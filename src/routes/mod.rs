pub mod assets;
pub mod auth;
pub mod home;
pub mod posts;
pub mod users;

use chrono::{DateTime, Utc};

pub fn display_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}
