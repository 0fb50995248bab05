#![doc = include_str!("../README.md")]

pub mod attributes;
pub mod encryptor;
pub mod error;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod nonce;
pub mod oauth;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use attributes::{AttributeKind, UserAttribute};
pub use encryptor::{EncryptorError, StringEncryptor};
pub use error::Error;
pub use nonce::{generate_nonce, generate_state};
pub use oauth::{OAuthResponse, OidcClient, OidcConfig, TokenResponse};
pub use session::{AccountSession, CURRENT_VERSION, LoginCredentials, SessionError};
pub use store::{MemoryUserStore, StoreError, UserRecord, UserStore};
pub use types::Sub;
