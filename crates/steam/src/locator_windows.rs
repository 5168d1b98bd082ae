use std::io;

use winreg::RegKey;
use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ};

use crate::locator::RegistrySource;

/// The live Windows registry, read through `HKEY_LOCAL_MACHINE`.
pub(crate) struct WindowsRegistry;

impl RegistrySource for WindowsRegistry {
    fn read_string(&self, subkey: &str, value: &str) -> io::Result<Option<String>> {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let key = match hklm.open_subkey_with_flags(subkey, KEY_READ) {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match key.get_value::<String, _>(value) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
