// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common types shared by the reconcilers and the orchestrator.

use {
    crate::{
        app_store_connect::{
            bundle_ids::BundleId,
            certificates::CertificateType,
            profiles::{ProfileAttributes, ProfileType},
        },
        certificates::CertificateInfo,
        entitlements::Entitlements,
        AppleProvisioningError,
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::HashMap,
        fmt::{Display, Formatter},
    },
};

/// Apple platform a project targets.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Platform {
    #[serde(rename = "iOS")]
    Ios,
    #[serde(rename = "tvOS")]
    TvOs,
    #[serde(rename = "macOS")]
    MacOs,
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ios => "iOS",
            Self::TvOs => "tvOS",
            Self::MacOs => "macOS",
        })
    }
}

/// The intended release channel, driving which certificate and profile kinds
/// are required.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DistributionType {
    #[serde(rename = "development")]
    Development,
    #[serde(rename = "app-store")]
    AppStore,
    #[serde(rename = "ad-hoc")]
    AdHoc,
    #[serde(rename = "enterprise")]
    Enterprise,
}

impl DistributionType {
    /// The certificate type a distribution requires.
    pub fn certificate_type(&self) -> CertificateType {
        match self {
            Self::Development => CertificateType::IosDevelopment,
            Self::AppStore | Self::AdHoc | Self::Enterprise => CertificateType::IosDistribution,
        }
    }
}

impl Display for DistributionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::AppStore => "app-store",
            Self::AdHoc => "ad-hoc",
            Self::Enterprise => "enterprise",
        })
    }
}

/// Resolve the portal profile type for a (platform, distribution) pair.
pub fn profile_type_for(
    platform: Platform,
    distribution: DistributionType,
) -> Result<ProfileType, AppleProvisioningError> {
    match platform {
        Platform::Ios => Ok(match distribution {
            DistributionType::Development => ProfileType::IosAppDevelopment,
            DistributionType::AppStore => ProfileType::IosAppStore,
            DistributionType::AdHoc => ProfileType::IosAppAdHoc,
            DistributionType::Enterprise => ProfileType::IosAppInHouse,
        }),
        Platform::TvOs => Ok(match distribution {
            DistributionType::Development => ProfileType::TvOsAppDevelopment,
            DistributionType::AppStore => ProfileType::TvOsAppStore,
            DistributionType::AdHoc => ProfileType::TvOsAppAdHoc,
            DistributionType::Enterprise => ProfileType::TvOsAppInHouse,
        }),
        Platform::MacOs => Err(AppleProvisioningError::UnsupportedPlatform(platform)),
    }
}

/// The platform a profile type provisions for, where managed profiles are
/// supported.
pub fn profile_type_platform(profile_type: ProfileType) -> Option<Platform> {
    match profile_type {
        ProfileType::IosAppDevelopment
        | ProfileType::IosAppStore
        | ProfileType::IosAppAdHoc
        | ProfileType::IosAppInHouse => Some(Platform::Ios),
        ProfileType::TvOsAppDevelopment
        | ProfileType::TvOsAppStore
        | ProfileType::TvOsAppAdHoc
        | ProfileType::TvOsAppInHouse => Some(Platform::TvOs),
        _ => None,
    }
}

/// The distribution a profile type serves, where managed profiles are
/// supported.
pub fn profile_type_distribution(profile_type: ProfileType) -> Option<DistributionType> {
    match profile_type {
        ProfileType::IosAppDevelopment | ProfileType::TvOsAppDevelopment => {
            Some(DistributionType::Development)
        }
        ProfileType::IosAppStore | ProfileType::TvOsAppStore => Some(DistributionType::AppStore),
        ProfileType::IosAppAdHoc | ProfileType::TvOsAppAdHoc => Some(DistributionType::AdHoc),
        ProfileType::IosAppInHouse | ProfileType::TvOsAppInHouse => {
            Some(DistributionType::Enterprise)
        }
        _ => None,
    }
}

/// Whether any of the distribution types needs profiles carrying a device
/// list.
pub fn distribution_requires_device_list(types: &[DistributionType]) -> bool {
    types
        .iter()
        .any(|t| matches!(t, DistributionType::Development | DistributionType::AdHoc))
}

/// A certificate present on the portal, matched to a local certificate with
/// a private key.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub certificate_info: CertificateInfo,
    pub id: String,
}

/// A test device known to the CI environment, to be mirrored on the portal.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TestDevice {
    /// The Apple device UDID.
    pub udid: String,
    pub title: String,
    pub device_type: String,
}

/// The project's signing requirements, supplied by the external project or
/// archive inspector.
#[derive(Clone, Debug)]
pub struct AppLayout {
    pub platform: Platform,
    pub entitlements_by_archivable_target_bundle_id: HashMap<String, Entitlements>,
    pub uitest_target_bundle_ids: Vec<String>,
}

/// A provisioning profile owned by the reconciler, however it is backed.
///
/// Implementations may answer the relationship queries from the portal or
/// from a locally installed profile.
pub trait ManagedProfile {
    fn id(&self) -> &str;
    fn attributes(&self) -> &ProfileAttributes;
    fn certificate_ids(&self) -> Result<Vec<String>, AppleProvisioningError>;
    fn device_udids(&self) -> Result<Vec<String>, AppleProvisioningError>;
    fn bundle_id(&self) -> Result<BundleId, AppleProvisioningError>;
    fn entitlements(&self) -> Result<Entitlements, AppleProvisioningError>;
}

/// The resolved asset bundle for one distribution type.
pub struct AppCodesignAssets {
    pub archivable_target_profiles_by_bundle_id: HashMap<String, Box<dyn ManagedProfile>>,
    pub uitest_target_profiles_by_bundle_id: HashMap<String, Box<dyn ManagedProfile>>,
    pub certificate: CertificateInfo,
}

/// Codesigning parameters not specified by the project or archive.
pub struct CodesignAssetsOpts {
    pub distribution_type: DistributionType,
    pub type_to_local_certificates: HashMap<CertificateType, Vec<CertificateInfo>>,
    pub test_devices: Vec<TestDevice>,
    pub min_profile_validity_days: i64,
    pub fallback_to_local_assets_on_api_failure: bool,
    pub verbose_log: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distribution_to_certificate_type() {
        assert_eq!(
            DistributionType::Development.certificate_type(),
            CertificateType::IosDevelopment
        );
        for distribution in [
            DistributionType::AppStore,
            DistributionType::AdHoc,
            DistributionType::Enterprise,
        ] {
            assert_eq!(
                distribution.certificate_type(),
                CertificateType::IosDistribution
            );
        }
    }

    #[test]
    fn profile_type_round_trips_platform_and_distribution() {
        for platform in [Platform::Ios, Platform::TvOs] {
            for distribution in [
                DistributionType::Development,
                DistributionType::AppStore,
                DistributionType::AdHoc,
                DistributionType::Enterprise,
            ] {
                let profile_type = profile_type_for(platform, distribution).unwrap();
                assert_eq!(profile_type_platform(profile_type), Some(platform));
                assert_eq!(profile_type_distribution(profile_type), Some(distribution));
            }
        }
    }

    #[test]
    fn macos_has_no_managed_profile_type() {
        assert!(profile_type_for(Platform::MacOs, DistributionType::Development).is_err());
    }

    #[test]
    fn device_list_requirement() {
        assert!(distribution_requires_device_list(&[
            DistributionType::AppStore,
            DistributionType::Development,
        ]));
        assert!(distribution_requires_device_list(&[DistributionType::AdHoc]));
        assert!(!distribution_requires_device_list(&[
            DistributionType::AppStore,
            DistributionType::Enterprise,
        ]));
    }
}
