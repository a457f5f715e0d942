mod chain_source;
mod codec;
mod module;
mod repository;

pub use chain_source::*;
pub use codec::*;
pub use module::*;
pub use repository::*;
