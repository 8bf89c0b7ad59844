pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod session;
pub mod tasks;

pub use error::ResearchError;
pub use orchestrator::{ResearchOrchestrator, ResearchSettings};
pub use session::{Phase, ResearchSession, Task};
