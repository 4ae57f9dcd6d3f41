pub mod schema;
pub mod inventory;
pub mod active;
pub mod blacklist;
pub mod fallback;

pub use schema::*;
pub use inventory::*;
pub use active::*;
pub use blacklist::*;
pub use fallback::*;
