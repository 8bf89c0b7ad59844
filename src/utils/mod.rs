pub mod api_errors;
pub mod http;
pub mod logging;
pub mod progress;
pub mod telegram;
pub mod timing;
