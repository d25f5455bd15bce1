// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Developer Portal client abstraction.
//!
//! [DevPortalClient] is the capability-set seam between the reconcilers and
//! whatever backend answers portal queries. [ApiDevPortalClient] implements
//! it over the App Store Connect API; an Apple-ID-backed implementation can
//! replace it without the reconcilers noticing.

use {
    crate::{
        app_store_connect::{
            bundle_ids::{BundleId, BundleIdPlatform},
            certificates::CertificateType,
            cursor_from_next,
            devices::{Device, DevicePlatform},
            profiles::{Profile as ProfileResource, ProfileAttributes, ProfileType},
            AppStoreConnectClient, PageOptions, MAX_PAGE_SIZE, PAGE_SIZE,
        },
        certificates::CertificateInfo,
        entitlements::Entitlements,
        model::{Certificate, ManagedProfile, TestDevice},
        AppleProvisioningError,
    },
    cryptographic_message_syntax::SignedData,
    log::warn,
    std::{collections::HashMap, io::Cursor, sync::Arc},
};

/// The name under which test devices are registered on the portal.
const REGISTERED_DEVICE_NAME: &str = "Bitrise test device";

/// Queries resolving portal certificates.
pub trait CertificateSource {
    /// Look up the portal certificate with the given normalized serial.
    fn query_certificate_by_serial(
        &self,
        serial: &str,
    ) -> Result<Certificate, AppleProvisioningError>;

    /// Fetch every signing certificate, grouped by type.
    fn query_all_certificates(
        &self,
    ) -> Result<HashMap<CertificateType, Vec<Certificate>>, AppleProvisioningError>;
}

/// Queries and mutations for registered devices.
pub trait DeviceClient {
    /// List enabled devices, optionally filtered by UDID.
    fn list_devices(
        &self,
        udid: Option<&str>,
        platform: DevicePlatform,
    ) -> Result<Vec<Device>, AppleProvisioningError>;

    /// Register a test device.
    ///
    /// A rejected registration (already registered under different casing, or
    /// an unexpected device kind) surfaces as
    /// [AppleProvisioningError::DeviceRegistration].
    fn register_device(&self, device: &TestDevice) -> Result<Device, AppleProvisioningError>;
}

/// Queries and mutations for bundle IDs, capabilities and profiles.
pub trait ProfileClient {
    fn find_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
    ) -> Result<Option<Box<dyn ManagedProfile>>, AppleProvisioningError>;

    fn delete_profile(&self, id: &str) -> Result<(), AppleProvisioningError>;

    fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError>;

    fn find_bundle_id(
        &self,
        identifier: &str,
    ) -> Result<Option<BundleId>, AppleProvisioningError>;

    fn create_bundle_id(
        &self,
        identifier: &str,
        name: &str,
    ) -> Result<BundleId, AppleProvisioningError>;

    fn check_bundle_id_entitlements(
        &self,
        bundle_id: &BundleId,
        entitlements: &Entitlements,
    ) -> Result<(), AppleProvisioningError>;

    fn sync_bundle_id(
        &self,
        bundle_id: &BundleId,
        entitlements: &Entitlements,
    ) -> Result<(), AppleProvisioningError>;
}

/// The full Developer Portal capability set the reconcilers depend on.
pub trait DevPortalClient: CertificateSource + DeviceClient + ProfileClient {
    /// Authenticate eagerly where the backing implementation requires a
    /// session. API-key-backed clients authenticate per request.
    fn login(&self) -> Result<(), AppleProvisioningError> {
        Ok(())
    }
}

/// Wrap portal 404s observed while resolving profile relationships.
///
/// A vanished relationship target means another actor mutated the team's
/// profiles between our find and act; the reconciler retries on this class.
fn wrap_in_profile_error(err: AppleProvisioningError) -> AppleProvisioningError {
    if err.api_status() == Some(404) {
        AppleProvisioningError::ProfilesInconsistent {
            detail: err.to_string(),
        }
    } else {
        err
    }
}

/// A provisioning profile backed by the App Store Connect API.
pub struct ApiProfile {
    client: Arc<AppStoreConnectClient>,
    profile: ProfileResource,
}

impl ApiProfile {
    pub fn new(client: Arc<AppStoreConnectClient>, profile: ProfileResource) -> Self {
        Self { client, profile }
    }

    /// Decode the profile plist out of its CMS envelope.
    fn payload(&self) -> Result<plist::Value, AppleProvisioningError> {
        let der = base64::decode(&self.profile.attributes.profile_content)
            .map_err(|e| AppleProvisioningError::CertificateParse(e.to_string()))?;

        let signed_data = SignedData::parse_ber(&der)?;
        let content = signed_data
            .signed_content()
            .ok_or(AppleProvisioningError::ProfilePayloadMissing)?;

        Ok(plist::Value::from_reader(Cursor::new(content))?)
    }
}

impl ManagedProfile for ApiProfile {
    fn id(&self) -> &str {
        &self.profile.id
    }

    fn attributes(&self) -> &ProfileAttributes {
        &self.profile.attributes
    }

    fn certificate_ids(&self) -> Result<Vec<String>, AppleProvisioningError> {
        let related = match &self.profile.relationships.certificates.links.related {
            Some(related) => related.clone(),
            None => return Ok(Vec::new()),
        };

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.client.certificates_at(
                &related,
                &PageOptions {
                    limit: Some(PAGE_SIZE),
                    cursor: cursor.clone(),
                    sort: None,
                },
            ) {
                Ok(page) => page,
                Err(err) if err.is_cursor_invalid() => {
                    warn!(
                        "cursor is invalid, falling back to listing certificates with {} limit",
                        MAX_PAGE_SIZE
                    );
                    return self.certificate_ids_single_page(&related);
                }
                Err(err) => return Err(wrap_in_profile_error(err)),
            };

            ids.extend(page.data.into_iter().map(|c| c.id));

            match page.links.next.as_deref() {
                Some(next) if !next.is_empty() => {
                    cursor = cursor_from_next(next)?;
                }
                _ => return Ok(ids),
            }
        }
    }

    fn device_udids(&self) -> Result<Vec<String>, AppleProvisioningError> {
        let payload = self.payload()?;

        Ok(payload
            .as_dictionary()
            .and_then(|dict| dict.get("ProvisionedDevices"))
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_string())
                    .map(|v| v.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn bundle_id(&self) -> Result<BundleId, AppleProvisioningError> {
        let related = self
            .profile
            .relationships
            .bundle_id
            .links
            .related
            .clone()
            .ok_or_else(|| AppleProvisioningError::ProfilesInconsistent {
                detail: format!(
                    "profile {} has no bundle ID relationship",
                    self.profile.id
                ),
            })?;

        self.client
            .bundle_id_at(&related)
            .map_err(wrap_in_profile_error)
    }

    fn entitlements(&self) -> Result<Entitlements, AppleProvisioningError> {
        let payload = self.payload()?;

        Ok(payload
            .as_dictionary()
            .and_then(|dict| dict.get("Entitlements"))
            .and_then(|v| v.as_dictionary())
            .cloned()
            .map(Entitlements::from)
            .unwrap_or_default())
    }
}

impl ApiProfile {
    fn certificate_ids_single_page(
        &self,
        related: &str,
    ) -> Result<Vec<String>, AppleProvisioningError> {
        let page = self
            .client
            .certificates_at(
                related,
                &PageOptions {
                    limit: Some(MAX_PAGE_SIZE),
                    cursor: None,
                    sort: None,
                },
            )
            .map_err(wrap_in_profile_error)?;

        if page.meta.paging.total > MAX_PAGE_SIZE as usize {
            warn!(
                "more than {} certificates ({}) found",
                MAX_PAGE_SIZE, page.meta.paging.total
            );
        }

        Ok(page.data.into_iter().map(|c| c.id).collect())
    }
}

/// [DevPortalClient] implementation backed by the App Store Connect API,
/// authenticating with an API key.
pub struct ApiDevPortalClient {
    client: Arc<AppStoreConnectClient>,
}

impl ApiDevPortalClient {
    pub fn new(client: Arc<AppStoreConnectClient>) -> Self {
        Self { client }
    }

    fn parse_certificate(
        &self,
        certificate: crate::app_store_connect::certificates::Certificate,
    ) -> Result<Option<Certificate>, AppleProvisioningError> {
        if certificate.kind != "certificates" {
            return Ok(None);
        }

        let certificate_info =
            CertificateInfo::from_base64_der(&certificate.attributes.certificate_content)?;

        Ok(Some(Certificate {
            certificate_info,
            id: certificate.id,
        }))
    }

    /// Expired profiles are invisible to the profiles list endpoint, so a
    /// name clash on create means an expired profile holds the name. Walk the
    /// bundle ID's profiles relationship to find and delete it.
    fn delete_expired_profile(
        &self,
        bundle_id: &BundleId,
        profile_name: &str,
    ) -> Result<(), AppleProvisioningError> {
        let related = bundle_id
            .relationships
            .profiles
            .links
            .related
            .clone()
            .ok_or_else(|| {
                AppleProvisioningError::ExpiredProfileCleanup(format!(
                    "bundle ID {} has no profiles relationship",
                    bundle_id.attributes.identifier
                ))
            })?;

        let mut cursor: Option<String> = None;

        loop {
            let page = match self.client.profiles_at(
                &related,
                &PageOptions {
                    limit: Some(PAGE_SIZE),
                    cursor: cursor.clone(),
                    sort: None,
                },
            ) {
                Ok(page) => page,
                Err(err) if err.is_cursor_invalid() => {
                    warn!(
                        "cursor is invalid, falling back to listing profiles with {} limit",
                        MAX_PAGE_SIZE
                    );

                    let page = self.client.profiles_at(
                        &related,
                        &PageOptions {
                            limit: Some(MAX_PAGE_SIZE),
                            cursor: None,
                            sort: None,
                        },
                    )?;

                    if page.meta.paging.total > MAX_PAGE_SIZE as usize {
                        warn!(
                            "more than {} profiles ({}) found",
                            MAX_PAGE_SIZE, page.meta.paging.total
                        );
                    }

                    let profile = page
                        .data
                        .into_iter()
                        .find(|p| p.attributes.name == profile_name);

                    return match profile {
                        Some(profile) => ProfileClient::delete_profile(self, &profile.id),
                        None => Err(AppleProvisioningError::ExpiredProfileCleanup(format!(
                            "failed to find profile: {}",
                            profile_name
                        ))),
                    };
                }
                Err(err) => return Err(err),
            };

            if let Some(profile) = page.data.iter().find(|p| p.attributes.name == profile_name) {
                return ProfileClient::delete_profile(self, &profile.id);
            }

            match page.links.next.as_deref() {
                Some(next) if !next.is_empty() => {
                    cursor = cursor_from_next(next)?;
                }
                _ => {
                    return Err(AppleProvisioningError::ExpiredProfileCleanup(format!(
                        "failed to find profile: {}",
                        profile_name
                    )))
                }
            }
        }
    }

    fn create_profile_once(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError> {
        let profile = self.client.create_profile(
            name,
            profile_type,
            &bundle_id.id,
            certificate_ids,
            device_ids,
        )?;

        Ok(Box::new(ApiProfile::new(self.client.clone(), profile)))
    }
}

impl CertificateSource for ApiDevPortalClient {
    fn query_certificate_by_serial(
        &self,
        serial: &str,
    ) -> Result<Certificate, AppleProvisioningError> {
        let certificate = self.client.certificate_by_serial(serial)?;

        self.parse_certificate(certificate)?
            .ok_or_else(|| AppleProvisioningError::CertificateNotFound(serial.to_string()))
    }

    fn query_all_certificates(
        &self,
    ) -> Result<HashMap<CertificateType, Vec<Certificate>>, AppleProvisioningError> {
        let mut by_type = HashMap::new();

        for certificate_type in [
            CertificateType::Development,
            CertificateType::IosDevelopment,
            CertificateType::Distribution,
            CertificateType::IosDistribution,
        ] {
            let mut certificates = Vec::new();
            for certificate in self.client.list_all_certificates(certificate_type)? {
                if let Some(certificate) = self.parse_certificate(certificate)? {
                    certificates.push(certificate);
                }
            }
            by_type.insert(certificate_type, certificates);
        }

        Ok(by_type)
    }
}

impl DeviceClient for ApiDevPortalClient {
    fn list_devices(
        &self,
        udid: Option<&str>,
        platform: DevicePlatform,
    ) -> Result<Vec<Device>, AppleProvisioningError> {
        self.client.list_all_devices(udid, platform)
    }

    fn register_device(&self, device: &TestDevice) -> Result<Device, AppleProvisioningError> {
        // The portal recognizes existing devices even with different casing
        // or the '-' separator removed, so the UDID passes through unchanged.
        match self.client.register_device(
            REGISTERED_DEVICE_NAME,
            BundleIdPlatform::Ios,
            &device.udid,
        ) {
            Ok(device) => Ok(device),
            Err(err) if err.api_status() == Some(409) => {
                Err(AppleProvisioningError::DeviceRegistration {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

impl ProfileClient for ApiDevPortalClient {
    fn find_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
    ) -> Result<Option<Box<dyn ManagedProfile>>, AppleProvisioningError> {
        let response = self.client.list_profiles(
            Some(name),
            Some(profile_type),
            &PageOptions {
                limit: Some(1),
                cursor: None,
                sort: None,
            },
        )?;

        Ok(response
            .data
            .into_iter()
            .next()
            .map(|profile| {
                Box::new(ApiProfile::new(self.client.clone(), profile)) as Box<dyn ManagedProfile>
            }))
    }

    fn delete_profile(&self, id: &str) -> Result<(), AppleProvisioningError> {
        match self.client.delete_profile(id) {
            Ok(()) => Ok(()),
            // Already gone; another actor beat us to it.
            Err(err) if err.api_status() == Some(404) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError> {
        match self.create_profile_once(name, profile_type, bundle_id, certificate_ids, device_ids)
        {
            Ok(profile) => Ok(profile),
            Err(AppleProvisioningError::Api(api_error))
                if api_error.has_detail_containing("multiple profiles found with the name") =>
            {
                warn!("profile already exists, but expired, cleaning up");
                self.delete_expired_profile(bundle_id, name)?;
                self.create_profile_once(
                    name,
                    profile_type,
                    bundle_id,
                    certificate_ids,
                    device_ids,
                )
            }
            Err(err) => Err(err),
        }
    }

    fn find_bundle_id(
        &self,
        identifier: &str,
    ) -> Result<Option<BundleId>, AppleProvisioningError> {
        let bundle_ids = self.client.list_all_bundle_ids(identifier)?;

        // The identifier filter behaves like a contains search, so the exact
        // match must be picked out of the result set.
        Ok(bundle_ids
            .into_iter()
            .find(|b| b.attributes.identifier == identifier))
    }

    fn create_bundle_id(
        &self,
        identifier: &str,
        name: &str,
    ) -> Result<BundleId, AppleProvisioningError> {
        self.client
            .create_bundle_id(identifier, name, BundleIdPlatform::Ios)
    }

    fn check_bundle_id_entitlements(
        &self,
        bundle_id: &BundleId,
        entitlements: &Entitlements,
    ) -> Result<(), AppleProvisioningError> {
        let capabilities = match &bundle_id.relationships.capabilities.links.related {
            Some(related) => self.client.capabilities_at(related)?,
            None => Vec::new(),
        };

        for entitlement in entitlements.iter() {
            if !entitlement.appears_on_portal() {
                continue;
            }

            let mut found = false;
            for capability in &capabilities {
                if entitlement.matches_capability(capability, entitlements)? {
                    found = true;
                    break;
                }
            }

            if !found {
                return Err(AppleProvisioningError::NonmatchingProfile {
                    reason: format!(
                        "bundle ID missing capability required by project entitlement ({})",
                        entitlement.key
                    ),
                });
            }
        }

        Ok(())
    }

    fn sync_bundle_id(
        &self,
        bundle_id: &BundleId,
        entitlements: &Entitlements,
    ) -> Result<(), AppleProvisioningError> {
        for entitlement in entitlements.iter() {
            let spec = match entitlement.capability()? {
                Some(spec) => spec,
                None => continue,
            };

            self.client
                .enable_capability(&bundle_id.id, spec.capability_type, &spec.settings)?;
        }

        Ok(())
    }
}

impl DevPortalClient for ApiDevPortalClient {}
