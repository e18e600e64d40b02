pub mod app;
pub mod assets;
pub mod camera;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod playback;
pub mod pose;
pub mod renderer;
pub mod spring;
pub mod time;

pub use app::App;
pub use catalog::Catalog;
pub use config::AppConfig;
