#[allow(clippy::module_inception)]
mod dispatcher;
pub mod retry;

pub use dispatcher::Dispatcher;
