pub mod browser;
pub mod cbz;
pub mod config;
pub mod crawler;
pub mod ledger;
pub mod logger;
pub mod normalizer;
pub mod utils;

pub use config::Config;
pub use crawler::MangaCrawler;
pub use utils::get_user_input;
