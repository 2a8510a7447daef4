//! Lookups into services Parlor does not own.
//!
//! Identity and the post graph live elsewhere. The messaging core only needs
//! to ask "does this user exist" and "does this post exist" before it writes.

use crate::error::Result;
use crate::ids::UserId;

/// Answers whether a user id names a real account.
pub trait UserDirectory: Send + Sync {
    fn user_exists(&self, user: &UserId) -> Result<bool>;
}

/// Answers whether a post id can be shared.
pub trait PostDirectory: Send + Sync {
    fn post_exists(&self, post_id: &str) -> Result<bool>;
}

/// Directory that accepts every id.
///
/// Used when the relay runs behind a gateway that has already resolved users
/// and posts.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl UserDirectory for OpenDirectory {
    fn user_exists(&self, _user: &UserId) -> Result<bool> {
        Ok(true)
    }
}

impl PostDirectory for OpenDirectory {
    fn post_exists(&self, _post_id: &str) -> Result<bool> {
        Ok(true)
    }
}
