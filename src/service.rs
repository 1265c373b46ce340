//! Mailbox service for the external API layer.
//!
//! Each workflow re-checks ownership inside the call, performs the store
//! operation and publishes the matching [`MailEvent`]. Events are only
//! published when something actually changed.

use std::sync::Arc;

use tracing::info;

use crate::events::{EventBus, MailEvent};
use crate::store::{
    authorize_address, authorize_mail, can_modify_address, validate_new_address, Address, Mail,
    MailPage, MailQuery, MailStore, UnreadCount,
};
use crate::{DispomailError, Result};

/// Ownership-checked address and mail workflows.
#[derive(Clone)]
pub struct MailboxService {
    store: Arc<dyn MailStore>,
    events: EventBus,
}

impl MailboxService {
    /// Create a new MailboxService.
    pub fn new(store: Arc<dyn MailStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Register a new address, optionally claimed by `owner` right away.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the name is not a bare local part or is
    /// already registered.
    pub async fn register_address(&self, addr: &str, owner: Option<&str>) -> Result<Address> {
        let addr = validate_new_address(addr)?;
        if self.store.get_address(&addr).await?.is_some() {
            return Err(DispomailError::Validation(format!(
                "address {addr} is already registered"
            )));
        }

        self.store.add_address(&addr).await?;
        if owner.is_some() {
            self.store.update_address_owner(&addr, owner).await?;
        }

        info!("Registered address {}", addr);
        self.events
            .publish(MailEvent::AddressAdded(owner.map(str::to_string)))
            .await;
        Ok(Address {
            addr,
            owner: owner.map(str::to_string),
        })
    }

    /// List the addresses visible to `user`.
    pub async fn list_addresses(&self, user: Option<&str>) -> Result<Vec<Address>> {
        self.store.get_addresses(user).await
    }

    /// Claim a public address (or re-claim one already owned) for `user`.
    pub async fn claim_address(&self, addr: &str, user: &str) -> Result<Address> {
        let address = self.modifiable_address(addr, Some(user)).await?;
        if address.owner.as_deref() != Some(user) {
            self.store
                .update_address_owner(&address.addr, Some(user))
                .await?;
            self.events
                .publish(MailEvent::AddressUpdated(Some(user.to_string())))
                .await;
        }
        Ok(Address {
            addr: address.addr,
            owner: Some(user.to_string()),
        })
    }

    /// Release an address owned by `user`, making it public.
    pub async fn release_address(&self, addr: &str, user: &str) -> Result<Address> {
        let address = self.modifiable_address(addr, Some(user)).await?;
        if address.owner.is_some() {
            self.store.update_address_owner(&address.addr, None).await?;
            self.events.publish(MailEvent::AddressUpdated(None)).await;
        }
        Ok(Address {
            addr: address.addr,
            owner: None,
        })
    }

    /// Delete an address and all of its mail.
    pub async fn delete_address(&self, addr: &str, user: Option<&str>) -> Result<()> {
        let address = self.modifiable_address(addr, user).await?;
        if self.store.delete_address(&address.addr).await? > 0 {
            info!("Deleted address {}", address.addr);
            self.events
                .publish(MailEvent::AddressDeleted(address.owner))
                .await;
        }
        Ok(())
    }

    /// Fetch one page of mail.
    ///
    /// A query naming a recipient the caller cannot see fails with
    /// `Unauthorized` instead of returning an empty page.
    pub async fn page_mails(&self, query: &MailQuery) -> Result<MailPage> {
        if let Some(recipient) = &query.recipient {
            authorize_address(self.store.as_ref(), recipient, query.user.as_deref()).await?;
        }
        self.store.get_mails(query).await
    }

    /// Open a mail, marking it read.
    pub async fn open_mail(&self, id: &str, user: Option<&str>) -> Result<Mail> {
        let mut mail = authorize_mail(self.store.as_ref(), id, user).await?;
        if !mail.read && self.store.mark_mail_as_read(id).await? > 0 {
            self.events
                .publish(MailEvent::Read(mail.recipient.clone()))
                .await;
        }
        mail.read = true;
        Ok(mail)
    }

    /// Mark every mail of an address read. Returns the number changed.
    pub async fn mark_all_read(&self, addr: &str, user: Option<&str>) -> Result<u64> {
        let address = authorize_address(self.store.as_ref(), addr, user).await?;
        let changed = self.store.mark_all_as_read(&address.addr).await?;
        if changed > 0 {
            self.events.publish(MailEvent::Read(address.addr)).await;
        }
        Ok(changed)
    }

    /// Move a mail to the deleted folder.
    pub async fn soft_delete_mail(&self, id: &str, user: Option<&str>) -> Result<u64> {
        let mail = authorize_mail(self.store.as_ref(), id, user).await?;
        let changed = self.store.soft_delete_mail(id).await?;
        if changed > 0 {
            self.events.publish(MailEvent::SoftDeleted(mail.recipient)).await;
        }
        Ok(changed)
    }

    /// Permanently delete a mail.
    pub async fn delete_mail(&self, id: &str, user: Option<&str>) -> Result<u64> {
        let mail = authorize_mail(self.store.as_ref(), id, user).await?;
        let changed = self.store.delete_mail(id).await?;
        if changed > 0 {
            self.events.publish(MailEvent::HardDeleted(mail.recipient)).await;
        }
        Ok(changed)
    }

    /// Move all live mail of an address to the deleted folder.
    pub async fn clear_address(&self, addr: &str, user: Option<&str>) -> Result<u64> {
        let address = authorize_address(self.store.as_ref(), addr, user).await?;
        let changed = self.store.delete_mails_for_address(&address.addr).await?;
        if changed > 0 {
            self.events.publish(MailEvent::SoftDeleted(address.addr)).await;
        }
        Ok(changed)
    }

    /// Permanently delete every soft-deleted mail visible to `user`.
    pub async fn empty_bin(&self, user: Option<&str>) -> Result<u64> {
        let changed = self.store.empty_deleted_mails(user).await?;
        if changed > 0 {
            info!("Emptied {} deleted mails", changed);
            self.events
                .publish(MailEvent::BinEmptied(user.map(str::to_string)))
                .await;
        }
        Ok(changed)
    }

    /// Restore every soft-deleted mail visible to `user`.
    pub async fn restore_bin(&self, user: Option<&str>) -> Result<u64> {
        let changed = self.store.restore_deleted_mails(user).await?;
        if changed > 0 {
            self.events
                .publish(MailEvent::BinRestored(user.map(str::to_string)))
                .await;
        }
        Ok(changed)
    }

    /// Unread counts per visible address.
    pub async fn unread_counts(&self, user: Option<&str>) -> Result<Vec<UnreadCount>> {
        self.store.get_unread(user).await
    }

    async fn modifiable_address(&self, addr: &str, user: Option<&str>) -> Result<Address> {
        let address = self
            .store
            .get_address(addr)
            .await?
            .ok_or_else(|| DispomailError::NotFound("address".to_string()))?;
        if !can_modify_address(&address, user) {
            return Err(DispomailError::Unauthorized(format!(
                "address {} belongs to another user",
                address.addr
            )));
        }
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::NewMail;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn setup() -> (MailboxService, Arc<dyn MailStore>, UnboundedReceiver<MailEvent>) {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();
        let events = EventBus::new();
        let rx = events.subscribe_channel();
        (MailboxService::new(Arc::clone(&store), events), store, rx)
    }

    async fn deliver(store: &Arc<dyn MailStore>, addr: &str) -> Mail {
        store
            .add_mail(&NewMail::new(addr, "a@example.org", "hi", "body"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_with_owner() {
        let (service, store, mut rx) = setup().await;

        let address = service.register_address("Box", Some("alice")).await.unwrap();
        assert_eq!(address.addr, "box");
        assert_eq!(
            store.get_address("box").await.unwrap().unwrap().owner.as_deref(),
            Some("alice")
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            MailEvent::AddressAdded(Some("alice".into()))
        );
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let (service, _store, _rx) = setup().await;
        service.register_address("box", None).await.unwrap();

        let result = service.register_address("BOX", None).await;
        assert!(matches!(result, Err(DispomailError::Validation(_))));
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let (service, _store, mut rx) = setup().await;
        service.register_address("box", None).await.unwrap();
        let _ = rx.try_recv();

        service.claim_address("box", "alice").await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            MailEvent::AddressUpdated(Some("alice".into()))
        );

        let result = service.claim_address("box", "bob").await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));
        let result = service.release_address("box", "bob").await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));

        let released = service.release_address("box", "alice").await.unwrap();
        assert!(released.is_public());
        assert_eq!(rx.try_recv().unwrap(), MailEvent::AddressUpdated(None));
    }

    #[tokio::test]
    async fn test_delete_address_checks_owner() {
        let (service, store, mut rx) = setup().await;
        service.register_address("box", Some("alice")).await.unwrap();
        let _ = rx.try_recv();
        deliver(&store, "box").await;

        let result = service.delete_address("box", Some("bob")).await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));

        service.delete_address("box", Some("alice")).await.unwrap();
        assert!(store.get_address("box").await.unwrap().is_none());
        assert_eq!(store.get_all_mails(Some("alice")).await.unwrap().len(), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            MailEvent::AddressDeleted(Some("alice".into()))
        );
    }

    #[tokio::test]
    async fn test_page_mails_for_foreign_recipient() {
        let (service, _store, _rx) = setup().await;
        service.register_address("box", Some("alice")).await.unwrap();

        let query = MailQuery::inbox().for_recipient("box").for_user(Some("bob"));
        let result = service.page_mails(&query).await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));

        let query = MailQuery::inbox().for_recipient("box").for_user(Some("alice"));
        assert!(service.page_mails(&query).await.unwrap().mails.is_empty());
    }

    #[tokio::test]
    async fn test_open_mail_marks_read_once() {
        let (service, store, mut rx) = setup().await;
        service.register_address("box", None).await.unwrap();
        let _ = rx.try_recv();
        let mail = deliver(&store, "box").await;

        let opened = service.open_mail(&mail.id, None).await.unwrap();
        assert!(opened.read);
        assert_eq!(rx.try_recv().unwrap(), MailEvent::Read("box".into()));

        service.open_mail(&mail.id, None).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_open_foreign_mail_is_unauthorized() {
        let (service, store, _rx) = setup().await;
        service.register_address("box", Some("alice")).await.unwrap();
        let mail = deliver(&store, "box").await;

        let result = service.open_mail(&mail.id, Some("bob")).await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));
        let result = service.open_mail("missing", Some("alice")).await;
        assert!(matches!(result, Err(DispomailError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_and_bin_workflows() {
        let (service, store, mut rx) = setup().await;
        service.register_address("box", Some("alice")).await.unwrap();
        let _ = rx.try_recv();
        let first = deliver(&store, "box").await;
        let second = deliver(&store, "box").await;

        assert_eq!(service.soft_delete_mail(&first.id, Some("alice")).await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), MailEvent::SoftDeleted("box".into()));
        assert_eq!(service.soft_delete_mail(&first.id, Some("alice")).await.unwrap(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(service.restore_bin(Some("alice")).await.unwrap(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            MailEvent::BinRestored(Some("alice".into()))
        );

        service.soft_delete_mail(&second.id, Some("alice")).await.unwrap();
        let _ = rx.try_recv();
        assert_eq!(service.empty_bin(Some("alice")).await.unwrap(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            MailEvent::BinEmptied(Some("alice".into()))
        );
        assert_eq!(service.restore_bin(Some("alice")).await.unwrap(), 0);

        assert_eq!(service.delete_mail(&first.id, Some("alice")).await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), MailEvent::HardDeleted("box".into()));
    }

    #[tokio::test]
    async fn test_clear_address() {
        let (service, store, mut rx) = setup().await;
        service.register_address("box", Some("alice")).await.unwrap();
        let _ = rx.try_recv();
        deliver(&store, "box").await;
        deliver(&store, "box").await;

        let result = service.clear_address("box", None).await;
        assert!(matches!(result, Err(DispomailError::Unauthorized(_))));

        assert_eq!(service.clear_address("box", Some("alice")).await.unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), MailEvent::SoftDeleted("box".into()));
        assert_eq!(service.clear_address("box", Some("alice")).await.unwrap(), 0);
        assert_eq!(service.restore_bin(Some("alice")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_unread_counts() {
        let (service, store, mut rx) = setup().await;
        service.register_address("box", None).await.unwrap();
        let _ = rx.try_recv();
        deliver(&store, "box").await;
        deliver(&store, "box").await;

        let counts = service.unread_counts(None).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].unread, 2);

        assert_eq!(service.mark_all_read("box", None).await.unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), MailEvent::Read("box".into()));
        assert!(service.unread_counts(None).await.unwrap().is_empty());
    }
}
