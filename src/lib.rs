//! Client core for browsing a Docker/OCI Registry V2 instance: listing,
//! manifest resolution, tag and repository deletion, client-side
//! search/filter/sort, and persisted favourites and search history.

pub mod config;
pub mod delete;
pub mod error;
pub mod manifest;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod search;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{AppError, RegistryError};
pub use registry::RegistryClient;
pub use state::ClientState;
