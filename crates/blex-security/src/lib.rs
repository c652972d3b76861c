//! # BLEX Security
//! Encryption of small secret fields (API tokens, 2FA seeds) kept in the database.

pub mod cipher;

pub use cipher::Cipher;
