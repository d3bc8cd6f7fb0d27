//! ACL table and PINs
//!
//! PINs are never kept in the clear: the drive stores an HMAC-SHA256 tag of
//! each PIN under a secret drawn at startup and compares supplied PINs with
//! `verify_slice` (constant time).

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{KineticError, Result};
use crate::protocol::Acl;

type HmacSha256 = Hmac<Sha256>;

/// Max identities in the ACL table
pub const MAX_IDENTITY_COUNT: usize = 100;

pub struct Security {
    acls: HashMap<i64, Acl>,
    erase_pin: Option<Vec<u8>>,
    lock_pin: Option<Vec<u8>>,
    secret: [u8; 32],
}

impl Security {
    pub fn new(acls: Vec<Acl>) -> Result<Self> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        let mut security = Self {
            acls: HashMap::new(),
            erase_pin: None,
            lock_pin: None,
            secret,
        };
        security.set_acls(acls)?;
        Ok(security)
    }

    pub fn acl(&self, identity: i64) -> Option<&Acl> {
        self.acls.get(&identity)
    }

    /// Replace the whole table
    pub fn set_acls(&mut self, acls: Vec<Acl>) -> Result<()> {
        if acls.is_empty() {
            return Err(KineticError::InvalidRequest("ACL table is empty".to_string()));
        }
        if acls.len() > MAX_IDENTITY_COUNT {
            return Err(KineticError::InvalidRequest(format!(
                "{} identities exceed the limit of {}",
                acls.len(),
                MAX_IDENTITY_COUNT
            )));
        }

        let mut table = HashMap::with_capacity(acls.len());
        for acl in acls {
            if acl.key.is_empty() {
                return Err(KineticError::InvalidRequest(format!(
                    "identity {} has an empty key",
                    acl.identity
                )));
            }
            if table.insert(acl.identity, acl).is_some() {
                return Err(KineticError::InvalidRequest("duplicate identity in ACL".to_string()));
            }
        }

        self.acls = table;
        Ok(())
    }

    pub fn has_lock_pin(&self) -> bool {
        self.lock_pin.is_some()
    }

    pub fn check_erase_pin(&self, pin: &[u8]) -> Result<()> {
        self.check(self.erase_pin.as_deref(), pin)
    }

    pub fn check_lock_pin(&self, pin: &[u8]) -> Result<()> {
        self.check(self.lock_pin.as_deref(), pin)
    }

    /// `old_pin` must match the current PIN; an empty `new_pin` clears it
    pub fn set_erase_pin(&mut self, old_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        self.check_erase_pin(old_pin)?;
        self.erase_pin = self.store(new_pin)?;
        Ok(())
    }

    pub fn set_lock_pin(&mut self, old_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        self.check_lock_pin(old_pin)?;
        self.lock_pin = self.store(new_pin)?;
        Ok(())
    }

    /// Erase forgets both PINs; the ACL table survives
    pub fn reset_pins(&mut self) {
        self.erase_pin = None;
        self.lock_pin = None;
    }

    fn store(&self, pin: &[u8]) -> Result<Option<Vec<u8>>> {
        if pin.is_empty() {
            return Ok(None);
        }
        let mut mac = self.keyed()?;
        mac.update(pin);
        Ok(Some(mac.finalize().into_bytes().to_vec()))
    }

    // With no PIN configured any PIN, including none, is accepted
    fn check(&self, stored: Option<&[u8]>, pin: &[u8]) -> Result<()> {
        let Some(stored) = stored else {
            return Ok(());
        };
        let mut mac = self.keyed()?;
        mac.update(pin);
        mac.verify_slice(stored)
            .map_err(|_| KineticError::NotAuthorized("PIN mismatch".to_string()))
    }

    fn keyed(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| KineticError::Internal(format!("PIN key: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_acl;

    #[test]
    fn test_pin_lifecycle() {
        let mut security = Security::new(vec![default_acl()]).unwrap();
        assert!(security.check_erase_pin(b"").is_ok());

        security.set_erase_pin(b"", b"123").unwrap();
        assert!(security.check_erase_pin(b"123").is_ok());
        assert!(matches!(
            security.check_erase_pin(b"456"),
            Err(KineticError::NotAuthorized(_))
        ));
        assert!(security.set_erase_pin(b"456", b"789").is_err());

        security.reset_pins();
        assert!(security.check_erase_pin(b"456").is_ok());
    }

    #[test]
    fn test_acl_table_rules() {
        let mut security = Security::new(vec![default_acl()]).unwrap();
        assert!(security.acl(1).is_some());
        assert!(security.acl(2).is_none());

        assert!(security.set_acls(Vec::new()).is_err());
        assert!(security
            .set_acls(vec![default_acl(), default_acl()])
            .is_err());
        assert!(security.acl(1).is_some());
    }
}
