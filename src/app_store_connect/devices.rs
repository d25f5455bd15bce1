// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registered device resources.

use {
    super::{
        bundle_ids::BundleIdPlatform, list_all, AppStoreConnectClient, Identified, PageOptions,
        PagedResponse,
    },
    crate::AppleProvisioningError,
    serde::{Deserialize, Serialize},
};

const DEVICES_ENDPOINT: &str = "devices";

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DeviceClass {
    #[serde(rename = "APPLE_WATCH")]
    AppleWatch,
    #[serde(rename = "IPAD")]
    Ipad,
    #[serde(rename = "IPHONE")]
    Iphone,
    #[serde(rename = "IPOD")]
    Ipod,
    #[serde(rename = "APPLE_TV")]
    AppleTv,
    #[serde(rename = "MAC")]
    Mac,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DevicePlatform {
    #[serde(rename = "IOS")]
    Ios,
    #[serde(rename = "MAC_OS")]
    MacOs,
}

impl DevicePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "IOS",
            Self::MacOs => "MAC_OS",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DeviceStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub device_class: DeviceClass,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    pub status: DeviceStatus,
    pub udid: String,
    #[serde(default)]
    pub added_date: Option<String>,
}

/// A test device registered on the portal.
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: DeviceAttributes,
}

impl Identified for Device {
    fn portal_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceResponse {
    pub data: Device,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceCreateRequestAttributes<'a> {
    name: &'a str,
    platform: BundleIdPlatform,
    udid: &'a str,
}

#[derive(Debug, Serialize)]
struct DeviceCreateRequestData<'a> {
    attributes: DeviceCreateRequestAttributes<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct DeviceCreateRequest<'a> {
    data: DeviceCreateRequestData<'a>,
}

impl AppStoreConnectClient {
    /// Fetch a single page of registered devices.
    pub fn list_devices(
        &self,
        filter_udid: Option<&str>,
        platform: DevicePlatform,
        status: DeviceStatus,
        options: &PageOptions,
    ) -> Result<PagedResponse<Device>, AppleProvisioningError> {
        let mut filters = vec![
            ("filter[platform]", platform.as_str().to_string()),
            ("filter[status]", status.as_str().to_string()),
        ];
        if let Some(udid) = filter_udid {
            filters.push(("filter[udid]", udid.to_string()));
        }

        self.get_paged(DEVICES_ENDPOINT, &filters, options)
    }

    /// Fetch every enabled device of a platform, following pagination.
    pub fn list_all_devices(
        &self,
        filter_udid: Option<&str>,
        platform: DevicePlatform,
    ) -> Result<Vec<Device>, AppleProvisioningError> {
        list_all(DEVICES_ENDPOINT, |options| {
            self.list_devices(filter_udid, platform, DeviceStatus::Enabled, &options)
        })
    }

    /// Register a new device.
    pub fn register_device(
        &self,
        name: &str,
        platform: BundleIdPlatform,
        udid: &str,
    ) -> Result<Device, AppleProvisioningError> {
        let request = DeviceCreateRequest {
            data: DeviceCreateRequestData {
                attributes: DeviceCreateRequestAttributes {
                    name,
                    platform,
                    udid,
                },
                kind: "devices",
            },
        };

        let response: DeviceResponse = self.post(DEVICES_ENDPOINT, &request)?;
        Ok(response.data)
    }
}
