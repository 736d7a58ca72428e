mod config;
mod context;
mod customer_id;
mod error;
mod eval;
mod evaluator;
mod filter;
mod flight;
mod gate;
mod gate_store;
mod ip_range;
mod overrides;
mod rollout;
mod store;
mod test_common;
mod util;

pub use config::*;
pub use context::*;
pub use customer_id::*;
pub use error::*;
pub use eval::*;
pub use evaluator::*;
pub use filter::*;
pub use flight::*;
pub use gate::*;
pub use gate_store::*;
pub use ip_range::*;
pub use overrides::*;
pub use rollout::*;
pub use store::*;
