pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod service;
pub mod state;
pub mod storage;
pub mod store;
pub mod validation;

pub use service::{DocumentError, DocumentService, DownloadLink, ErrorKind, UploadFile};
pub use store::{DocumentFilter, Visibility};
