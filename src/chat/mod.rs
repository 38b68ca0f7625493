pub mod engine;
pub mod log;
pub mod stream;

pub use engine::ChatEngine;
pub use log::ChatLog;
pub use stream::{StreamCoordinator, StreamSession};
