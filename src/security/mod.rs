//! Credential handling: password hashing and signed tokens.

pub mod password;
pub mod tokens;

pub use password::{PasswordError, PasswordHasher, random_password, validate_password};
pub use tokens::{Claims, TokenError, TokenPair, TokenService, TokenSubject, TokenType};
