//! Ownership checks for callers outside the store.
//!
//! The store filters collection reads by owner itself; single-item
//! operations take ids and rely on these helpers being called first.

use super::{Address, Mail, MailStore};
use crate::{DispomailError, Result};

/// Whether `user` may change the owner of, or delete, `address`.
///
/// Allowed for the current owner, and for anyone while the address is
/// unowned.
pub fn can_modify_address(address: &Address, user: Option<&str>) -> bool {
    address.is_visible_to(user)
}

/// Fetch an address and apply the visibility predicate.
pub async fn authorize_address(
    store: &dyn MailStore,
    addr: &str,
    user: Option<&str>,
) -> Result<Address> {
    let address = store
        .get_address(addr)
        .await?
        .ok_or_else(|| DispomailError::NotFound("address".to_string()))?;

    if !address.is_visible_to(user) {
        return Err(DispomailError::Unauthorized(format!(
            "address {} belongs to another user",
            address.addr
        )));
    }
    Ok(address)
}

/// Fetch a mail and apply the visibility predicate of its recipient.
pub async fn authorize_mail(store: &dyn MailStore, id: &str, user: Option<&str>) -> Result<Mail> {
    let mail = store
        .get_mail(id)
        .await?
        .ok_or_else(|| DispomailError::NotFound("mail".to_string()))?;

    authorize_address(store, &mail.recipient, user).await?;
    Ok(mail)
}
