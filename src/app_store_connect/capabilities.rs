// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bundle ID capability resources.

use {
    super::AppStoreConnectClient,
    crate::AppleProvisioningError,
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

const BUNDLE_ID_CAPABILITIES_ENDPOINT: &str = "bundleIdCapabilities";

/// Service kinds that can be enabled on a bundle ID.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CapabilityType {
    #[serde(rename = "ICLOUD")]
    ICloud,
    #[serde(rename = "IN_APP_PURCHASE")]
    InAppPurchase,
    #[serde(rename = "GAME_CENTER")]
    GameCenter,
    #[serde(rename = "PUSH_NOTIFICATIONS")]
    PushNotifications,
    #[serde(rename = "WALLET")]
    Wallet,
    #[serde(rename = "INTER_APP_AUDIO")]
    InterAppAudio,
    #[serde(rename = "MAPS")]
    Maps,
    #[serde(rename = "ASSOCIATED_DOMAINS")]
    AssociatedDomains,
    #[serde(rename = "PERSONAL_VPN")]
    PersonalVpn,
    #[serde(rename = "APP_GROUPS")]
    AppGroups,
    #[serde(rename = "HEALTHKIT")]
    HealthKit,
    #[serde(rename = "HOMEKIT")]
    HomeKit,
    #[serde(rename = "WIRELESS_ACCESSORY_CONFIGURATION")]
    WirelessAccessoryConfiguration,
    #[serde(rename = "APPLE_PAY")]
    ApplePay,
    #[serde(rename = "DATA_PROTECTION")]
    DataProtection,
    #[serde(rename = "SIRIKIT")]
    SiriKit,
    #[serde(rename = "NETWORK_EXTENSIONS")]
    NetworkExtensions,
    #[serde(rename = "MULTIPATH")]
    Multipath,
    #[serde(rename = "HOT_SPOT")]
    HotSpot,
    #[serde(rename = "NFC_TAG_READING")]
    NfcTagReading,
    #[serde(rename = "CLASSKIT")]
    ClassKit,
    #[serde(rename = "AUTOFILL_CREDENTIAL_PROVIDER")]
    AutofillCredentialProvider,
    #[serde(rename = "ACCESS_WIFI_INFORMATION")]
    AccessWifiInformation,
    #[serde(rename = "NETWORK_CUSTOM_PROTOCOL")]
    NetworkCustomProtocol,
    #[serde(rename = "COREMEDIA_HLS_LOW_LATENCY")]
    CoreMediaHlsLowLatency,
    #[serde(rename = "SYSTEM_EXTENSION_INSTALL")]
    SystemExtensionInstall,
    #[serde(rename = "USER_MANAGEMENT")]
    UserManagement,
    #[serde(rename = "APPLE_ID_AUTH")]
    SignInWithApple,
    #[serde(rename = "ODIC_PARENT_BUNDLEID")]
    ParentApplicationIdentifiers,
    #[serde(rename = "ON_DEMAND_INSTALL_CAPABLE")]
    OnDemandInstallCapable,
    #[serde(other)]
    Unknown,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ICloud => "ICLOUD",
            Self::InAppPurchase => "IN_APP_PURCHASE",
            Self::GameCenter => "GAME_CENTER",
            Self::PushNotifications => "PUSH_NOTIFICATIONS",
            Self::Wallet => "WALLET",
            Self::InterAppAudio => "INTER_APP_AUDIO",
            Self::Maps => "MAPS",
            Self::AssociatedDomains => "ASSOCIATED_DOMAINS",
            Self::PersonalVpn => "PERSONAL_VPN",
            Self::AppGroups => "APP_GROUPS",
            Self::HealthKit => "HEALTHKIT",
            Self::HomeKit => "HOMEKIT",
            Self::WirelessAccessoryConfiguration => "WIRELESS_ACCESSORY_CONFIGURATION",
            Self::ApplePay => "APPLE_PAY",
            Self::DataProtection => "DATA_PROTECTION",
            Self::SiriKit => "SIRIKIT",
            Self::NetworkExtensions => "NETWORK_EXTENSIONS",
            Self::Multipath => "MULTIPATH",
            Self::HotSpot => "HOT_SPOT",
            Self::NfcTagReading => "NFC_TAG_READING",
            Self::ClassKit => "CLASSKIT",
            Self::AutofillCredentialProvider => "AUTOFILL_CREDENTIAL_PROVIDER",
            Self::AccessWifiInformation => "ACCESS_WIFI_INFORMATION",
            Self::NetworkCustomProtocol => "NETWORK_CUSTOM_PROTOCOL",
            Self::CoreMediaHlsLowLatency => "COREMEDIA_HLS_LOW_LATENCY",
            Self::SystemExtensionInstall => "SYSTEM_EXTENSION_INSTALL",
            Self::UserManagement => "USER_MANAGEMENT",
            Self::SignInWithApple => "APPLE_ID_AUTH",
            Self::ParentApplicationIdentifiers => "ODIC_PARENT_BUNDLEID",
            Self::OnDemandInstallCapable => "ON_DEMAND_INSTALL_CAPABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Display for CapabilityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for CapabilityType {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CapabilitySettingKey {
    #[serde(rename = "ICLOUD_VERSION")]
    ICloudVersion,
    #[serde(rename = "DATA_PROTECTION_PERMISSION_LEVEL")]
    DataProtectionPermissionLevel,
    #[serde(rename = "APPLE_ID_AUTH_APP_CONSENT")]
    AppleIdAuthAppConsent,
    #[serde(rename = "APP_GROUP_IDENTIFIERS")]
    AppGroupIdentifiers,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CapabilityOptionKey {
    #[serde(rename = "XCODE_5")]
    Xcode5,
    #[serde(rename = "XCODE_6")]
    Xcode6,
    #[serde(rename = "COMPLETE_PROTECTION")]
    CompleteProtection,
    #[serde(rename = "PROTECTED_UNLESS_OPEN")]
    ProtectedUnlessOpen,
    #[serde(rename = "PROTECTED_UNTIL_FIRST_USER_AUTH")]
    ProtectedUntilFirstUserAuth,
    #[serde(rename = "PRIMARY_APP_CONSENT")]
    PrimaryAppConsent,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enabled_by_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CapabilityOptionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supports_wildcard: bool,
}

impl CapabilityOption {
    pub fn with_key(key: CapabilityOptionKey) -> Self {
        Self {
            key: Some(key),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_instances: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enabled_by_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CapabilitySettingKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CapabilityOption>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<i64>,
}

impl CapabilitySetting {
    /// A setting with a single keyed option, the shape used when enabling
    /// capabilities.
    pub fn with_option(key: CapabilitySettingKey, option: CapabilityOptionKey) -> Self {
        Self {
            key: Some(key),
            options: vec![CapabilityOption::with_key(option)],
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdCapabilityAttributes {
    pub capability_type: CapabilityType,
    #[serde(default)]
    pub settings: Vec<CapabilitySetting>,
}

/// A capability enabled on a bundle ID.
#[derive(Clone, Debug, Deserialize)]
pub struct BundleIdCapability {
    #[serde(default)]
    pub attributes: BundleIdCapabilityAttributes,
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct BundleIdCapabilityResponse {
    pub data: BundleIdCapability,
}

#[derive(Debug, Default, Deserialize)]
pub struct BundleIdCapabilitiesResponse {
    #[serde(default)]
    pub data: Vec<BundleIdCapability>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityCreateRequestAttributes<'a> {
    capability_type: CapabilityType,
    settings: &'a [CapabilitySetting],
}

#[derive(Debug, Serialize)]
struct CapabilityRelationshipData<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct CapabilityRelationshipBundleId<'a> {
    data: CapabilityRelationshipData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityCreateRequestRelationships<'a> {
    bundle_id: CapabilityRelationshipBundleId<'a>,
}

#[derive(Debug, Serialize)]
struct CapabilityCreateRequestData<'a> {
    attributes: CapabilityCreateRequestAttributes<'a>,
    relationships: CapabilityCreateRequestRelationships<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct CapabilityCreateRequest<'a> {
    data: CapabilityCreateRequestData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityUpdateRequestAttributes<'a> {
    capability_type: CapabilityType,
    settings: &'a [CapabilitySetting],
}

#[derive(Debug, Serialize)]
struct CapabilityUpdateRequestData<'a> {
    attributes: CapabilityUpdateRequestAttributes<'a>,
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct CapabilityUpdateRequest<'a> {
    data: CapabilityUpdateRequestData<'a>,
}

impl AppStoreConnectClient {
    /// Enable a capability on a bundle ID.
    pub fn enable_capability(
        &self,
        bundle_id: &str,
        capability_type: CapabilityType,
        settings: &[CapabilitySetting],
    ) -> Result<BundleIdCapability, AppleProvisioningError> {
        let request = CapabilityCreateRequest {
            data: CapabilityCreateRequestData {
                attributes: CapabilityCreateRequestAttributes {
                    capability_type,
                    settings,
                },
                relationships: CapabilityCreateRequestRelationships {
                    bundle_id: CapabilityRelationshipBundleId {
                        data: CapabilityRelationshipData {
                            id: bundle_id,
                            kind: "bundleIds",
                        },
                    },
                },
                kind: "bundleIdCapabilities",
            },
        };

        let response: BundleIdCapabilityResponse =
            self.post(BUNDLE_ID_CAPABILITIES_ENDPOINT, &request)?;
        Ok(response.data)
    }

    /// Update an already enabled capability.
    pub fn update_capability(
        &self,
        capability_id: &str,
        capability_type: CapabilityType,
        settings: &[CapabilitySetting],
    ) -> Result<BundleIdCapability, AppleProvisioningError> {
        let request = CapabilityUpdateRequest {
            data: CapabilityUpdateRequestData {
                attributes: CapabilityUpdateRequestAttributes {
                    capability_type,
                    settings,
                },
                id: capability_id,
                kind: "bundleIdCapabilities",
            },
        };

        let response: BundleIdCapabilityResponse = self.patch(
            &format!("{}/{}", BUNDLE_ID_CAPABILITIES_ENDPOINT, capability_id),
            &request,
        )?;
        Ok(response.data)
    }

    /// Fetch the capabilities enabled on a bundle ID via its relationship link.
    pub fn capabilities_at(
        &self,
        relationship_link: &str,
    ) -> Result<Vec<BundleIdCapability>, AppleProvisioningError> {
        let response: BundleIdCapabilitiesResponse =
            self.get_url(url::Url::parse(relationship_link)?)?;
        Ok(response.data)
    }
}
