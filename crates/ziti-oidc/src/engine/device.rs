//! Device authorization grant storage.

use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use crate::error::{OidcError, OidcResult};
use crate::oauth::DeviceAuthorizationState;
use crate::oauth::device::DeviceAuthorizationEntry;

use super::StorageEngine;

impl StorageEngine {
    /// Registers a device-code / user-code pair for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `OidcError::DuplicateUserCode` if the user code is already in
    /// use, `OidcError::DuplicateDeviceCode` if the device code is, and
    /// `NotFound` for an unknown client.
    pub fn store_device_authorization(
        &self,
        client_id: &str,
        device_code: &str,
        user_code: &str,
        expires: OffsetDateTime,
        scopes: Vec<String>,
    ) -> OidcResult<()> {
        if !self.clients.contains_key(client_id) {
            return Err(OidcError::not_found("client"));
        }

        match self.user_codes.entry(user_code.to_string()) {
            Entry::Occupied(_) => return Err(OidcError::DuplicateUserCode),
            Entry::Vacant(slot) => {
                slot.insert(device_code.to_string());
            }
        }

        let stored = match self.device_codes.entry(device_code.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(DeviceAuthorizationEntry {
                    device_code: device_code.to_string(),
                    user_code: user_code.to_string(),
                    state: DeviceAuthorizationState::new(client_id, scopes, expires),
                });
                true
            }
        };
        if !stored {
            self.user_codes
                .remove_if(user_code, |_, bound| bound == device_code);
            return Err(OidcError::DuplicateDeviceCode);
        }

        tracing::debug!(client_id = %client_id, "device authorization stored");
        Ok(())
    }

    /// State polled by the device. The client must match the one that stored it.
    pub fn device_authorization_state(
        &self,
        client_id: &str,
        device_code: &str,
    ) -> OidcResult<DeviceAuthorizationState> {
        self.device_codes
            .get(device_code)
            .filter(|e| e.state.client_id == client_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| OidcError::not_found("device code for client"))
    }

    pub fn device_authorization_by_user_code(
        &self,
        user_code: &str,
    ) -> OidcResult<DeviceAuthorizationState> {
        let device_code = self.device_code_for(user_code)?;
        self.device_codes
            .get(&device_code)
            .map(|e| e.state.clone())
            .ok_or_else(|| OidcError::not_found("user code"))
    }

    /// Approves the pair behind `user_code` for `subject`.
    pub fn complete_device_authorization(&self, user_code: &str, subject: &str) -> OidcResult<()> {
        let device_code = self.device_code_for(user_code)?;
        let mut entry = self
            .device_codes
            .get_mut(&device_code)
            .ok_or_else(|| OidcError::not_found("user code"))?;
        entry.state.subject = subject.to_string();
        entry.state.done = true;
        Ok(())
    }

    pub fn deny_device_authorization(&self, user_code: &str) -> OidcResult<()> {
        let device_code = self.device_code_for(user_code)?;
        let mut entry = self
            .device_codes
            .get_mut(&device_code)
            .ok_or_else(|| OidcError::not_found("device authorization"))?;
        entry.state.denied = true;
        Ok(())
    }

    fn device_code_for(&self, user_code: &str) -> OidcResult<String> {
        self.user_codes
            .get(user_code)
            .map(|c| c.value().clone())
            .ok_or_else(|| OidcError::not_found("user code"))
    }
}
