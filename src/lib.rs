//! # Elroi
//!
//! A self-hostable hub for personal notes and files with role-based
//! administration, usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! elroi = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use elroi::config::ServerConfig;
//! use elroi::rbac::{ProtectedEntities, catalog};
//! use elroi::server::{AppState, create_router};
//! use elroi::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//! catalog::seed(&store, &config.default_guard, &ProtectedEntities::default()).unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store), config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `elroi` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod ownership;
pub mod rbac;
pub mod server;
pub mod storage;
pub mod store;
pub mod tree;
pub mod types;
