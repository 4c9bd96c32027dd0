//! Server password hashing.
//!
//! Existing servers expect the MD5 hex digest of the password in `Hello`.
//! MD5 is not a password hash; it is kept only for interoperability.

use md5::{Digest, Md5};

pub fn hash_password(password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
