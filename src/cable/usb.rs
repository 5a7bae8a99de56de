//! USB device matching shared by the USB cable backends.

use nusb::DeviceInfo;

use crate::cable::CableError;

/// Find the device to open: vendor/product must match, product string and
/// serial number only when a filter was supplied. When several devices
/// qualify the first one wins, with a warning naming the rest.
pub(crate) fn find_device(
    vendor: u16,
    product: u16,
    description: Option<&str>,
    serial: Option<&str>,
) -> Result<DeviceInfo, CableError> {
    let matches = |info: &DeviceInfo| {
        if (info.vendor_id(), info.product_id()) != (vendor, product) {
            return false;
        }
        if let Some(wanted) = description
            && info.product_string() != Some(wanted)
        {
            return false;
        }
        if let Some(wanted) = serial
            && info.serial_number() != Some(wanted)
        {
            return false;
        }
        true
    };

    let mut candidates = nusb::list_devices()
        .map_err(CableError::Usb)?
        .filter(matches)
        .collect::<Vec<_>>();

    if candidates.len() > 1 {
        log::warn!(
            "{} devices match {:04x}:{:04x}, using the first (narrow with a serial filter)",
            candidates.len(),
            vendor,
            product
        );
    }
    match candidates.drain(..).next() {
        Some(info) => {
            log::debug!(
                "using {:04x}:{:04x} serial {}",
                vendor,
                product,
                info.serial_number().unwrap_or("-")
            );
            Ok(info)
        }
        None => Err(CableError::NotFound { vendor, product }),
    }
}
