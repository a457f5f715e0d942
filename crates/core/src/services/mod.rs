pub mod block_syncer;
pub mod context;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod scheduler;
pub mod supervisor;
pub mod worker;

pub use block_syncer::BlockSyncerPipeline;
pub use context::ParserContext;
pub use pipeline::{BlockPipeline, ExplorerPipeline};
pub use queue::{HeightQueue, HeightSender};
pub use scheduler::PeriodicScheduler;
pub use supervisor::Supervisor;
pub use worker::Worker;
