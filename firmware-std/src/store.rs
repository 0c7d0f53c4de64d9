//! NVS-backed settings persistence.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;

use zonetrac::settings::SettingsStore;

/// NVS namespace holding every persisted setting
pub const NAMESPACE: &str = "zonetrac";

pub struct NvsStore(EspNvs<NvsDefault>);

impl NvsStore {
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        Ok(Self(EspNvs::new(partition, NAMESPACE, true)?))
    }
}

impl SettingsStore for NvsStore {
    type Error = EspError;

    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, Self::Error> {
        self.0.get_u32(key)
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), Self::Error> {
        self.0.set_u32(key, value)
    }

    fn get_str<'a>(&mut self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a str>, Self::Error> {
        self.0.get_str(key, buf)
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.0.set_str(key, value)
    }
}
