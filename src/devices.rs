// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test device reconciliation.
//!
//! Desired devices come from the CI environment; the reconciler mirrors any
//! missing ones onto the portal and returns the device set relevant to the
//! target platform for profile inclusion.

use {
    crate::{
        app_store_connect::devices::{Device, DeviceClass, DevicePlatform},
        client::DeviceClient,
        model::{Platform, TestDevice},
        AppleProvisioningError,
    },
    log::{debug, info, warn},
};

/// Strip characters that cannot appear in a UDID (whitespace, punctuation
/// from copy-paste).
pub fn sanitize_udid(udid: &str) -> String {
    udid.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Normalize a UDID for comparison.
///
/// UDIDs entered by hand can differ from the portal's records in casing and
/// in the `-` separator, so comparisons ignore both.
pub fn normalize_udid(udid: &str) -> String {
    sanitize_udid(udid).replace('-', "").to_lowercase()
}

/// Whether two UDIDs identify the same device.
pub fn is_equal_udid(a: &str, b: &str) -> bool {
    normalize_udid(a) == normalize_udid(b)
}

/// Drop desired devices whose UDID duplicates an earlier entry; the first
/// occurrence wins. Kept devices get a sanitized UDID.
pub fn dedup_test_devices(devices: &[TestDevice]) -> (Vec<TestDevice>, Vec<TestDevice>) {
    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::new();
    let mut duplicated = Vec::new();

    for device in devices {
        if seen.insert(normalize_udid(&device.udid)) {
            let mut device = device.clone();
            device.udid = sanitize_udid(&device.udid);
            valid.push(device);
        } else {
            duplicated.push(device.clone());
        }
    }

    (valid, duplicated)
}

/// Ensure the desired test devices exist on the portal and return the
/// registered devices relevant to the target platform.
pub fn ensure_test_devices<C>(
    device_client: &C,
    test_devices: &[TestDevice],
    platform: Platform,
) -> Result<Vec<Device>, AppleProvisioningError>
where
    C: DeviceClient + ?Sized,
{
    info!("fetching Developer Portal devices");

    // The IOS device platform covers the watch, pad, phone, pod and TV
    // device classes.
    let mut portal_devices = device_client.list_devices(None, DevicePlatform::Ios)?;

    debug!(
        "{} devices are registered on the Developer Portal",
        portal_devices.len()
    );
    for device in &portal_devices {
        debug!(
            "- {}, {:?}, UDID ({}), ID ({})",
            device.attributes.name, device.attributes.device_class, device.attributes.udid,
            device.id
        );
    }

    if !test_devices.is_empty() {
        let (desired, duplicated) = dedup_test_devices(test_devices);

        if !duplicated.is_empty() {
            warn!(
                "{} duplicated test device(s) are ignored:",
                duplicated.len()
            );
            for device in &duplicated {
                warn!("- {} ({})", device.title, device.udid);
            }
        }

        info!(
            "checking if {} test device(s) are registered on the Developer Portal",
            desired.len()
        );

        let new_devices = register_missing_test_devices(device_client, &desired, &portal_devices)?;
        portal_devices.extend(new_devices);
    }

    Ok(filter_portal_devices(portal_devices, platform))
}

fn register_missing_test_devices<C>(
    device_client: &C,
    test_devices: &[TestDevice],
    portal_devices: &[Device],
) -> Result<Vec<Device>, AppleProvisioningError>
where
    C: DeviceClient + ?Sized,
{
    let mut new_devices = Vec::new();

    for test_device in test_devices {
        debug!("checking if the device ({}) is registered", test_device.udid);

        let already_registered = portal_devices
            .iter()
            .any(|d| is_equal_udid(&d.attributes.udid, &test_device.udid));

        if already_registered {
            debug!("device already registered");
            continue;
        }

        debug!("registering device {}", test_device.udid);
        match device_client.register_device(test_device) {
            Ok(device) => new_devices.push(device),
            Err(AppleProvisioningError::DeviceRegistration { reason }) => {
                warn!(
                    "failed to register device (can be caused by an invalid UDID or trying to register a Mac device): {}",
                    reason
                );
            }
            Err(err) => return Err(err),
        }
    }

    Ok(new_devices)
}

/// Keep the device classes a platform's profiles can include.
fn filter_portal_devices(devices: Vec<Device>, platform: Platform) -> Vec<Device> {
    devices
        .into_iter()
        .filter(|device| {
            let class = device.attributes.device_class;

            match platform {
                Platform::Ios => matches!(
                    class,
                    DeviceClass::AppleWatch
                        | DeviceClass::Ipad
                        | DeviceClass::Iphone
                        | DeviceClass::Ipod
                ),
                Platform::TvOs => class == DeviceClass::AppleTv,
                Platform::MacOs => false,
            }
        })
        .collect()
}
