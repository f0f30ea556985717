pub mod health;
pub mod info;
pub mod proxy;
pub mod screen;

// Re-export all handlers for easy route registration
pub use health::{health_handler, metrics_handler};
pub use info::{about_handler, error_handler};
pub use proxy::proxy_handler;
pub use screen::screen_handler;
