pub mod config;
pub mod connection;
pub mod crud;
pub mod definitions;
pub mod error;
pub mod helper;
pub mod query_builder;
pub mod reconcile;
pub mod schema;
pub mod typed;

// Re-export them for easier access from the crate root
pub use config::*;
pub use connection::*;
pub use crud::*;
pub use definitions::*;
pub use error::*;
pub use helper::*;
pub use query_builder::*;
pub use reconcile::*;
pub use schema::*;
pub use typed::*;
