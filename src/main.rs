//! uuid-to-btaddr — print the BLE address a Sesame device advertises from.
//!
//! ```text
//! $ uuid-to-btaddr 12345678-90ab-cdef-1234-567890abcdef
//! uuid 12345678-90ab-cdef-1234-567890abcdef => addr d6:78:90:ab:cd:ef
//! ```
//!
//! On ESP-IDF there is no argv; the UUID comes from `SESAME_SERVER_UUID`
//! at build time.

use anyhow::{Context, Result, bail};
use log::info;
use uuid::Uuid;

use sesame_server::uuid_to_ble_address;

fn uuid_argument() -> Result<String> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(arg);
    }
    match option_env!("SESAME_SERVER_UUID") {
        Some(uuid) => Ok(uuid.to_owned()),
        None => bail!("usage: uuid-to-btaddr <uuid>"),
    }
}

fn main() -> Result<()> {
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }

    let text = uuid_argument()?;
    let uuid = Uuid::parse_str(text.trim()).with_context(|| format!("invalid uuid '{text}'"))?;
    let address = uuid_to_ble_address(&uuid);
    info!("derived {address} from {uuid}");
    println!("uuid {uuid} => addr {address}");
    Ok(())
}
