pub mod config;
pub mod error;
pub mod geo;
pub mod hub;
pub mod link;
pub mod server;
pub mod task;

pub use error::HubError;
pub use hub::HubHandle;
pub use task::Task;
