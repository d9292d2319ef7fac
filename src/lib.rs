pub mod config;
pub mod convert;
pub mod dependency;
pub mod error;
pub mod fields;
pub mod lag;
pub mod load;
pub mod model;
pub mod reconcile;
pub mod server;
pub mod sync;
pub mod table;
pub mod wire;
