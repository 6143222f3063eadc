mod attribute_value;
pub mod bucketing;
mod context;
mod document;
mod eval;
mod flag;
mod flag_state;
mod flag_value;
mod legacy;
mod progressive;
pub mod query;
mod rule;
mod scheduled;
mod store;
mod test_common;
mod util;
mod variation;

pub use attribute_value::*;
pub use context::*;
pub use document::*;
pub use eval::*;
pub use flag::*;
pub use flag_state::*;
pub use flag_value::*;
pub use legacy::*;
pub use progressive::*;
pub use rule::*;
pub use scheduled::*;
pub use store::*;
pub use variation::*;
