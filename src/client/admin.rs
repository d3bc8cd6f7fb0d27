//! Administrative client
//!
//! Security, setup and log operations. The authenticated identity needs the
//! matching ACL permission (SECURITY, SETUP, GETLOG) on the drive.

use bytes::Bytes;

use crate::config::ClientConfig;
use crate::error::{KineticError, Result};
use crate::network::Connector;
use crate::protocol::{Acl, Body, Command, DriveLog, LogType, MessageType, SecurityOp, Setup};
use super::kinetic::KineticClient;

/// Admin operations over a regular client connection
pub struct AdminClient {
    client: KineticClient,
}

impl AdminClient {
    pub fn connect(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            client: KineticClient::connect(config)?,
        })
    }

    pub fn connect_with(config: ClientConfig, connector: &dyn Connector) -> Result<Self> {
        Ok(Self {
            client: KineticClient::connect_with(config, connector)?,
        })
    }

    pub fn from_client(client: KineticClient) -> Self {
        Self { client }
    }

    /// The underlying key-value client
    pub fn client(&self) -> &KineticClient {
        &self.client
    }

    // =========================================================================
    // PINs and Erase
    // =========================================================================

    /// Change the erase PIN; `old_pin` is required when one is set
    pub fn set_erase_pin(&self, old_pin: Option<&[u8]>, new_pin: Option<&[u8]>) -> Result<()> {
        self.security(SecurityOp::SetErasePin {
            old_pin: pin(old_pin),
            new_pin: pin(new_pin),
        })
    }

    /// Change the lock PIN; `old_pin` is required when one is set
    pub fn set_lock_pin(&self, old_pin: Option<&[u8]>, new_pin: Option<&[u8]>) -> Result<()> {
        self.security(SecurityOp::SetLockPin {
            old_pin: pin(old_pin),
            new_pin: pin(new_pin),
        })
    }

    /// Remove all data and reset both PINs
    pub fn instant_erase(&self, erase_pin: Option<&[u8]>) -> Result<()> {
        self.security(SecurityOp::InstantErase { pin: pin(erase_pin) })
    }

    pub fn secure_erase(&self, erase_pin: Option<&[u8]>) -> Result<()> {
        self.security(SecurityOp::SecureErase { pin: pin(erase_pin) })
    }

    /// Lock the drive; everything but unlock and getlog then fails
    pub fn lock_device(&self, lock_pin: &[u8]) -> Result<()> {
        self.security(SecurityOp::Lock { pin: lock_pin.to_vec() })
    }

    pub fn unlock_device(&self, lock_pin: &[u8]) -> Result<()> {
        self.security(SecurityOp::Unlock { pin: lock_pin.to_vec() })
    }

    /// Replace the drive's ACL table
    pub fn set_acl(&self, acls: Vec<Acl>) -> Result<()> {
        if acls.is_empty() {
            return Err(KineticError::InvalidRequest(
                "ACL table must hold at least one identity".to_string(),
            ));
        }
        self.security(SecurityOp::SetAcl(acls))
    }

    fn security(&self, op: SecurityOp) -> Result<()> {
        let command = Command::new(MessageType::Security, Body::Security(op));
        self.client.request(command, Bytes::new())?;
        Ok(())
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Move the drive to `new_version`
    ///
    /// Requests must carry the drive's current version, so this connection
    /// has to reconnect with `new_version` afterwards.
    pub fn set_cluster_version(&self, new_version: i64) -> Result<()> {
        self.setup(
            Setup {
                new_cluster_version: Some(new_version),
                ..Setup::default()
            },
            Bytes::new(),
        )
    }

    /// Send a firmware image; the erase PIN is checked when one is set
    pub fn firmware_download(&self, erase_pin: Option<&[u8]>, image: &[u8]) -> Result<()> {
        if image.is_empty() {
            return Err(KineticError::InvalidRequest("firmware image is empty".to_string()));
        }
        self.setup(
            Setup {
                new_cluster_version: None,
                firmware_download: true,
                pin: pin(erase_pin),
            },
            Bytes::copy_from_slice(image),
        )
    }

    fn setup(&self, setup: Setup, value: Bytes) -> Result<()> {
        let command = Command::new(MessageType::Setup, Body::Setup(setup));
        self.client.request(command, value)?;
        Ok(())
    }

    // =========================================================================
    // Log
    // =========================================================================

    /// Fetch the requested log sections
    pub fn get_log(&self, types: &[LogType]) -> Result<DriveLog> {
        if types.is_empty() {
            return Err(KineticError::InvalidRequest("no log types requested".to_string()));
        }
        let command = Command::new(MessageType::GetLog, Body::GetLog(types.to_vec()));
        let response = self.client.request(command, Bytes::new())?;
        match response.command.body {
            Body::Log(log) => Ok(log),
            other => Err(KineticError::Internal(format!(
                "unexpected GETLOG response body: {:?}",
                other
            ))),
        }
    }

    pub fn close(&self) {
        self.client.close();
    }
}

fn pin(pin: Option<&[u8]>) -> Vec<u8> {
    pin.map(<[u8]>::to_vec).unwrap_or_default()
}
