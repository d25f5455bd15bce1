// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project entitlements and their mapping to portal capabilities.
//!
//! Entitlement keys classify into three groups: registrable portal
//! capabilities, keys the portal ignores, and profile-attached entitlements
//! that must be requested from Apple manually and block automatic profile
//! generation.

use {
    crate::{
        app_store_connect::capabilities::{
            BundleIdCapability, CapabilityOptionKey, CapabilitySetting, CapabilitySettingKey,
            CapabilityType,
        },
        AppleProvisioningError,
    },
    log::warn,
    once_cell::sync::Lazy,
    std::collections::HashMap,
};

pub const ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY: &str =
    "com.apple.developer.icloud-container-identifiers";
pub const PARENT_APPLICATION_IDENTIFIERS_ENTITLEMENT_KEY: &str =
    "com.apple.developer.parent-application-identifiers";
pub const SIGN_IN_WITH_APPLE_ENTITLEMENT_KEY: &str = "com.apple.developer.applesignin";

/// How an entitlement key relates to the portal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntitlementClass {
    /// Mirrored as a bundle ID capability.
    Portal(CapabilityType),
    /// Not registrable on the portal; carried only inside the profile.
    Ignored,
    /// Granted by Apple on request; cannot be provisioned automatically.
    ProfileAttached,
}

/// Entitlement key to portal capability classification.
///
/// Registrable services: <https://developer.apple.com/documentation/appstoreconnectapi/capabilitytype>.
static ENTITLEMENT_CLASS_BY_KEY: Lazy<HashMap<&'static str, EntitlementClass>> = Lazy::new(|| {
    use {CapabilityType::*, EntitlementClass::*};

    HashMap::from([
        ("com.apple.security.application-groups", Portal(AppGroups)),
        ("com.apple.developer.in-app-payments", Portal(ApplePay)),
        (
            "com.apple.developer.associated-domains",
            Portal(AssociatedDomains),
        ),
        ("com.apple.developer.healthkit", Portal(HealthKit)),
        ("com.apple.developer.homekit", Portal(HomeKit)),
        (
            "com.apple.developer.networking.HotspotConfiguration",
            Portal(HotSpot),
        ),
        ("com.apple.InAppPurchase", Portal(InAppPurchase)),
        ("inter-app-audio", Portal(InterAppAudio)),
        (
            "com.apple.developer.networking.multipath",
            Portal(Multipath),
        ),
        (
            "com.apple.developer.networking.networkextension",
            Portal(NetworkExtensions),
        ),
        (
            "com.apple.developer.nfc.readersession.formats",
            Portal(NfcTagReading),
        ),
        (
            "com.apple.developer.networking.vpn.api",
            Portal(PersonalVpn),
        ),
        ("aps-environment", Portal(PushNotifications)),
        ("com.apple.developer.siri", Portal(SiriKit)),
        (SIGN_IN_WITH_APPLE_ENTITLEMENT_KEY, Portal(SignInWithApple)),
        (
            "com.apple.developer.on-demand-install-capable",
            Portal(OnDemandInstallCapable),
        ),
        (
            "com.apple.developer.pass-type-identifiers",
            Portal(Wallet),
        ),
        (
            "com.apple.external-accessory.wireless-configuration",
            Portal(WirelessAccessoryConfiguration),
        ),
        (
            "com.apple.developer.default-data-protection",
            Portal(DataProtection),
        ),
        ("com.apple.developer.icloud-services", Portal(ICloud)),
        (
            "com.apple.developer.authentication-services.autofill-credential-provider",
            Portal(AutofillCredentialProvider),
        ),
        (
            "com.apple.developer.networking.wifi-info",
            Portal(AccessWifiInformation),
        ),
        (
            "com.apple.developer.ClassKit-environment",
            Portal(ClassKit),
        ),
        (
            "com.apple.developer.coremedia.hls.low-latency",
            Portal(CoreMediaHlsLowLatency),
        ),
        // Not registrable on the portal.
        (ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY, Ignored),
        ("com.apple.developer.ubiquity-container-identifiers", Ignored),
        (PARENT_APPLICATION_IDENTIFIERS_ENTITLEMENT_KEY, Ignored),
        // Added to profiles by Apple after a manual request; these block
        // automatic generation.
        ("com.apple.developer.contacts.notes", ProfileAttached),
        ("com.apple.developer.carplay-audio", ProfileAttached),
        ("com.apple.developer.carplay-communication", ProfileAttached),
        ("com.apple.developer.carplay-charging", ProfileAttached),
        ("com.apple.developer.carplay-maps", ProfileAttached),
        ("com.apple.developer.carplay-parking", ProfileAttached),
        ("com.apple.developer.carplay-quick-ordering", ProfileAttached),
        ("com.apple.developer.exposure-notification", ProfileAttached),
    ])
});

/// Data protection entitlement values to portal permission levels.
static DATA_PROTECTION_OPTION_BY_VALUE: Lazy<HashMap<&'static str, CapabilityOptionKey>> =
    Lazy::new(|| {
        HashMap::from([
            (
                "NSFileProtectionComplete",
                CapabilityOptionKey::CompleteProtection,
            ),
            (
                "NSFileProtectionCompleteUnlessOpen",
                CapabilityOptionKey::ProtectedUnlessOpen,
            ),
            (
                "NSFileProtectionCompleteUntilFirstUserAuthentication",
                CapabilityOptionKey::ProtectedUntilFirstUserAuth,
            ),
        ])
    });

/// Capabilities whose details must be completed manually on the portal after
/// enabling. Keyed by capability with the human readable name as value.
static MANUAL_DETAIL_CAPABILITIES: Lazy<HashMap<CapabilityType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (CapabilityType::AppGroups, "App Groups"),
        (CapabilityType::ApplePay, "Apple Pay Payment Processing"),
        (CapabilityType::ICloud, "iCloud"),
        (CapabilityType::SignInWithApple, "Sign In with Apple"),
    ])
});

/// Capabilities the portal API cannot enable at all; identifier creation
/// must happen manually.
static UNSUPPORTED_CAPABILITIES: Lazy<HashMap<CapabilityType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            CapabilityType::OnDemandInstallCapable,
            "On Demand Install Capable (App Clips)",
        ),
        (
            CapabilityType::ParentApplicationIdentifiers,
            "Parent Bundle ID",
        ),
    ])
});

/// A capability to enable on a bundle ID, derived from an entitlement.
#[derive(Clone, Debug)]
pub struct CapabilitySpec {
    pub capability_type: CapabilityType,
    pub settings: Vec<CapabilitySetting>,
}

/// A single project-declared entitlement.
#[derive(Clone, Copy, Debug)]
pub struct Entitlement<'a> {
    pub key: &'a str,
    pub value: &'a plist::Value,
}

impl<'a> Entitlement<'a> {
    /// Classify the entitlement key.
    pub fn classification(&self) -> Result<EntitlementClass, AppleProvisioningError> {
        ENTITLEMENT_CLASS_BY_KEY
            .get(self.key)
            .copied()
            .ok_or_else(|| AppleProvisioningError::UnknownEntitlement(self.key.to_string()))
    }

    /// Whether the entitlement needs to be registered on the portal.
    pub fn appears_on_portal(&self) -> bool {
        matches!(self.classification(), Ok(EntitlementClass::Portal(_)))
    }

    /// Whether the entitlement can only be added to a profile by Apple after
    /// a manual request.
    pub fn is_profile_attached(&self) -> bool {
        matches!(self.classification(), Ok(EntitlementClass::ProfileAttached))
    }

    /// The capability to enable for this entitlement, with type-specific
    /// settings. `None` for keys the portal does not register.
    pub fn capability(&self) -> Result<Option<CapabilitySpec>, AppleProvisioningError> {
        let capability_type = match self.classification()? {
            EntitlementClass::Portal(capability_type) => capability_type,
            EntitlementClass::Ignored | EntitlementClass::ProfileAttached => return Ok(None),
        };

        if let Some(name) = UNSUPPORTED_CAPABILITIES.get(&capability_type).copied() {
            return Err(AppleProvisioningError::UnsupportedCapability(name));
        }

        let settings = match capability_type {
            CapabilityType::ICloud => vec![CapabilitySetting::with_option(
                CapabilitySettingKey::ICloudVersion,
                CapabilityOptionKey::Xcode6,
            )],
            CapabilityType::DataProtection => {
                let value = self.value.as_string().ok_or_else(|| {
                    AppleProvisioningError::EntitlementValue(self.key.to_string())
                })?;

                let option = DATA_PROTECTION_OPTION_BY_VALUE.get(value).ok_or_else(|| {
                    AppleProvisioningError::DataProtectionLevel(value.to_string())
                })?;

                vec![CapabilitySetting::with_option(
                    CapabilitySettingKey::DataProtectionPermissionLevel,
                    *option,
                )]
            }
            CapabilityType::SignInWithApple => vec![CapabilitySetting::with_option(
                CapabilitySettingKey::AppleIdAuthAppConsent,
                CapabilityOptionKey::PrimaryAppConsent,
            )],
            _ => Vec::new(),
        };

        if let Some(name) = MANUAL_DETAIL_CAPABILITIES.get(&capability_type) {
            warn!(
                "this will enable the \"{}\" capability but details will have to be configured manually on the Apple Developer Portal",
                name
            );
        }

        Ok(Some(CapabilitySpec {
            capability_type,
            settings,
        }))
    }

    /// Whether the entitlement is satisfied by an enabled capability.
    ///
    /// Most capabilities compare by type presence alone; iCloud and Data
    /// Protection additionally compare their settings shape.
    pub fn matches_capability(
        &self,
        capability: &BundleIdCapability,
        all_entitlements: &Entitlements,
    ) -> Result<bool, AppleProvisioningError> {
        let capability_type = match self.classification()? {
            EntitlementClass::Portal(capability_type) => capability_type,
            _ => return Ok(false),
        };

        if capability.attributes.capability_type != capability_type {
            return Ok(false);
        }

        match capability_type {
            CapabilityType::ICloud => Ok(icloud_equals(all_entitlements, capability)),
            CapabilityType::DataProtection => {
                let value = self.value.as_string().ok_or_else(|| {
                    AppleProvisioningError::EntitlementValue(self.key.to_string())
                })?;
                data_protection_equals(value, capability)
            }
            _ => Ok(true),
        }
    }
}

/// All entitlements of a target or profile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entitlements(plist::Dictionary);

impl From<plist::Dictionary> for Entitlements {
    fn from(dict: plist::Dictionary) -> Self {
        Self(dict)
    }
}

impl Entitlements {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&plist::Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = Entitlement<'_>> {
        self.0.iter().map(|(key, value)| Entitlement { key, value })
    }

    /// Whether these entitlements describe an App Clip target.
    pub fn is_app_clip(&self) -> bool {
        self.0.contains_key(PARENT_APPLICATION_IDENTIFIERS_ENTITLEMENT_KEY)
    }

    pub fn has_sign_in_with_apple(&self) -> bool {
        self.0.contains_key(SIGN_IN_WITH_APPLE_ENTITLEMENT_KEY)
    }

    /// Which iCloud services the entitlements use:
    /// (documents, CloudKit, key-value storage).
    pub fn icloud_services(&self) -> (bool, bool, bool) {
        let key_value_storage = self
            .get("com.apple.developer.ubiquity-kvstore-identifier")
            .and_then(|v| v.as_string())
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let services: Vec<&str> = self
            .get("com.apple.developer.icloud-services")
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_string()).collect())
            .unwrap_or_default();

        let documents = services.contains(&"CloudDocuments");
        let cloud_kit = services.contains(&"CloudKit");

        (documents, cloud_kit, key_value_storage)
    }

    /// The iCloud containers the entitlements reference, when an iCloud
    /// service needing containers is in use.
    pub fn icloud_containers(&self) -> Vec<String> {
        let (documents, cloud_kit, _) = self.icloud_services();

        if !documents && !cloud_kit {
            return Vec::new();
        }

        self.get(ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY)
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_string())
                    .map(|v| v.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn icloud_equals(entitlements: &Entitlements, capability: &BundleIdCapability) -> bool {
    let (documents, cloud_kit, key_value_storage) = entitlements.icloud_services();

    let settings = &capability.attributes.settings;
    if settings.len() != 1 {
        return false;
    }

    let setting = &settings[0];
    if setting.key != Some(CapabilitySettingKey::ICloudVersion) {
        return false;
    }
    if setting.options.len() != 1 {
        return false;
    }

    let option = &setting.options[0];
    if (documents || cloud_kit || key_value_storage)
        && option.key != Some(CapabilityOptionKey::Xcode6)
    {
        return false;
    }

    true
}

fn data_protection_equals(
    value: &str,
    capability: &BundleIdCapability,
) -> Result<bool, AppleProvisioningError> {
    let expected = DATA_PROTECTION_OPTION_BY_VALUE
        .get(value)
        .ok_or_else(|| AppleProvisioningError::DataProtectionLevel(value.to_string()))?;

    let settings = &capability.attributes.settings;
    if settings.len() != 1 {
        return Ok(false);
    }

    let setting = &settings[0];
    if setting.key != Some(CapabilitySettingKey::DataProtectionPermissionLevel) {
        return Ok(false);
    }
    if setting.options.len() != 1 {
        return Ok(false);
    }

    Ok(setting.options[0].key == Some(*expected))
}

/// The iCloud containers the project needs that the profile does not embed.
pub fn find_missing_containers(
    project_entitlements: &Entitlements,
    profile_entitlements: &Entitlements,
) -> Vec<String> {
    let project_containers: Vec<String> = project_entitlements
        .get(ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY)
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_string())
                .map(|v| v.to_string())
                .collect()
        })
        .unwrap_or_default();

    if project_containers.is_empty() {
        return Vec::new();
    }

    let profile_containers: Vec<&str> = profile_entitlements
        .get(ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY)
        .and_then(|v| v.as_array())
        .map(|values| values.iter().filter_map(|v| v.as_string()).collect())
        .unwrap_or_default();

    project_containers
        .into_iter()
        .filter(|container| !profile_containers.contains(&container.as_str()))
        .collect()
}

/// Check all targets' entitlements for profile-attached keys that prevent
/// automatic profile generation. Returns the first offending
/// (entitlement, bundle ID) pair.
pub fn find_profile_attached_entitlement(
    entitlements_by_bundle_id: &std::collections::HashMap<String, Entitlements>,
) -> Option<(String, String)> {
    for (bundle_id, entitlements) in entitlements_by_bundle_id {
        for entitlement in entitlements.iter() {
            if entitlement.is_profile_attached() {
                return Some((entitlement.key.to_string(), bundle_id.clone()));
            }
        }
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app_store_connect::capabilities::BundleIdCapabilityAttributes;

    fn entitlements(pairs: &[(&str, plist::Value)]) -> Entitlements {
        let mut dict = plist::Dictionary::new();
        for (key, value) in pairs {
            dict.insert(key.to_string(), value.clone());
        }
        Entitlements(dict)
    }

    fn capability(
        capability_type: CapabilityType,
        settings: Vec<CapabilitySetting>,
    ) -> BundleIdCapability {
        BundleIdCapability {
            attributes: BundleIdCapabilityAttributes {
                capability_type,
                settings,
            },
            id: "cap-1".to_string(),
            kind: "bundleIdCapabilities".to_string(),
        }
    }

    #[test]
    fn classification_of_known_keys() {
        let ents = entitlements(&[
            ("aps-environment", plist::Value::from("production")),
            (
                ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
                plist::Value::Array(vec![]),
            ),
            (
                "com.apple.developer.carplay-maps",
                plist::Value::from(true),
            ),
        ]);

        let classes: HashMap<&str, EntitlementClass> = ents
            .iter()
            .map(|e| (e.key, e.classification().unwrap()))
            .collect();

        assert_eq!(
            classes["aps-environment"],
            EntitlementClass::Portal(CapabilityType::PushNotifications)
        );
        assert_eq!(
            classes[ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY],
            EntitlementClass::Ignored
        );
        assert_eq!(
            classes["com.apple.developer.carplay-maps"],
            EntitlementClass::ProfileAttached
        );
    }

    #[test]
    fn unknown_key_is_an_error() {
        let ents = entitlements(&[("com.example.not-an-entitlement", plist::Value::from(true))]);
        let entitlement = ents.iter().next().unwrap();

        assert!(matches!(
            entitlement.classification(),
            Err(AppleProvisioningError::UnknownEntitlement(_))
        ));
    }

    #[test]
    fn app_clip_capability_is_unsupported() {
        let ents = entitlements(&[(
            "com.apple.developer.on-demand-install-capable",
            plist::Value::from(true),
        )]);
        let entitlement = ents.iter().next().unwrap();

        assert!(matches!(
            entitlement.capability(),
            Err(AppleProvisioningError::UnsupportedCapability(_))
        ));
    }

    #[test]
    fn data_protection_capability_settings() {
        let ents = entitlements(&[(
            "com.apple.developer.default-data-protection",
            plist::Value::from("NSFileProtectionComplete"),
        )]);
        let entitlement = ents.iter().next().unwrap();

        let spec = entitlement.capability().unwrap().unwrap();
        assert_eq!(spec.capability_type, CapabilityType::DataProtection);
        assert_eq!(
            spec.settings[0].key,
            Some(CapabilitySettingKey::DataProtectionPermissionLevel)
        );
        assert_eq!(
            spec.settings[0].options[0].key,
            Some(CapabilityOptionKey::CompleteProtection)
        );
    }

    #[test]
    fn push_capability_matches_by_type_presence() {
        let ents = entitlements(&[("aps-environment", plist::Value::from("production"))]);
        let entitlement = ents.iter().next().unwrap();

        assert!(entitlement
            .matches_capability(
                &capability(CapabilityType::PushNotifications, vec![]),
                &ents
            )
            .unwrap());
        assert!(!entitlement
            .matches_capability(&capability(CapabilityType::HealthKit, vec![]), &ents)
            .unwrap());
    }

    #[test]
    fn icloud_capability_compares_settings_shape() {
        let ents = entitlements(&[
            (
                "com.apple.developer.icloud-services",
                plist::Value::Array(vec![plist::Value::from("CloudKit")]),
            ),
            (
                ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
                plist::Value::Array(vec![plist::Value::from("iCloud.com.acme.app")]),
            ),
        ]);
        let entitlement = ents
            .iter()
            .find(|e| e.key == "com.apple.developer.icloud-services")
            .unwrap();

        let matching = capability(
            CapabilityType::ICloud,
            vec![CapabilitySetting::with_option(
                CapabilitySettingKey::ICloudVersion,
                CapabilityOptionKey::Xcode6,
            )],
        );
        assert!(entitlement.matches_capability(&matching, &ents).unwrap());

        let legacy = capability(
            CapabilityType::ICloud,
            vec![CapabilitySetting::with_option(
                CapabilitySettingKey::ICloudVersion,
                CapabilityOptionKey::Xcode5,
            )],
        );
        assert!(!entitlement.matches_capability(&legacy, &ents).unwrap());
    }

    #[test]
    fn icloud_containers_require_a_container_service() {
        let with_kit = entitlements(&[
            (
                "com.apple.developer.icloud-services",
                plist::Value::Array(vec![plist::Value::from("CloudKit")]),
            ),
            (
                ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
                plist::Value::Array(vec![plist::Value::from("iCloud.com.acme.app")]),
            ),
        ]);
        assert_eq!(with_kit.icloud_containers(), vec!["iCloud.com.acme.app"]);

        let kv_only = entitlements(&[
            (
                "com.apple.developer.ubiquity-kvstore-identifier",
                plist::Value::from("kv-store"),
            ),
            (
                ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
                plist::Value::Array(vec![plist::Value::from("iCloud.com.acme.app")]),
            ),
        ]);
        assert!(kv_only.icloud_containers().is_empty());
    }

    #[test]
    fn missing_containers_is_a_superset_check() {
        let project = entitlements(&[(
            ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
            plist::Value::Array(vec![
                plist::Value::from("iCloud.com.acme.app"),
                plist::Value::from("iCloud.com.acme.shared"),
            ]),
        )]);
        let profile = entitlements(&[(
            ICLOUD_IDENTIFIERS_ENTITLEMENT_KEY,
            plist::Value::Array(vec![plist::Value::from("iCloud.com.acme.app")]),
        )]);

        assert_eq!(
            find_missing_containers(&project, &profile),
            vec!["iCloud.com.acme.shared"]
        );
        assert!(find_missing_containers(&profile, &project).is_empty());
    }

    #[test]
    fn profile_attached_entitlement_blocks_generation() {
        let by_bundle_id = HashMap::from([(
            "com.acme.app".to_string(),
            entitlements(&[(
                "com.apple.developer.exposure-notification",
                plist::Value::from(true),
            )]),
        )]);

        let (entitlement, bundle_id) =
            find_profile_attached_entitlement(&by_bundle_id).unwrap();
        assert_eq!(entitlement, "com.apple.developer.exposure-notification");
        assert_eq!(bundle_id, "com.acme.app");
    }

    #[test]
    fn app_clip_detection() {
        let ents = entitlements(&[(
            PARENT_APPLICATION_IDENTIFIERS_ENTITLEMENT_KEY,
            plist::Value::Array(vec![plist::Value::from("ABC123.com.acme.app")]),
        )]);
        assert!(ents.is_app_clip());
        assert!(!entitlements(&[]).is_app_clip());
    }
}
