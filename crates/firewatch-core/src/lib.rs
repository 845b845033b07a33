pub mod backend;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod mirror;
pub mod recorder;
pub mod replayer;
pub mod stats;
pub mod store;
pub mod types;

pub use backend::*;
pub use error::*;
pub use ledger::*;
pub use memory::*;
pub use mirror::*;
pub use recorder::*;
pub use replayer::*;
pub use stats::*;
pub use store::*;
pub use types::*;
