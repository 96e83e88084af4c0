mod action;
mod models;

pub use action::HttpRequestAction;
pub use models::*;
