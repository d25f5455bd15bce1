// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provisioning profile reconciler.
//!
//! For each (bundle ID, distribution type) pair the reconciler finds the
//! managed profile by its deterministic name, validates it against the
//! desired state and deletes-and-recreates it when drifted. Correctness
//! under concurrent portal mutation relies on these idempotent semantics
//! plus a bounded retry, not on locking.

use {
    crate::{
        app_store_connect::{
            bundle_ids::BundleId,
            certificates::CertificateType,
            profiles::{ProfileState, ProfileType},
        },
        certificates::select_certificate,
        client::{DevPortalClient, ProfileClient},
        devices::normalize_udid,
        entitlements::{find_missing_containers, Entitlements},
        model::{
            distribution_requires_device_list, profile_type_distribution, profile_type_for,
            profile_type_platform, AppCodesignAssets, AppLayout, Certificate, DistributionType,
            ManagedProfile,
        },
        AppleProvisioningError,
    },
    chrono::{Duration, Utc},
    log::{debug, info, warn},
    std::collections::{BTreeMap, HashMap},
};

/// Attempts of the ensure operation when the portal is concurrently mutated.
const ENSURE_PROFILE_ATTEMPTS: u32 = 5;

/// Wait between ensure attempts.
const ENSURE_PROFILE_RETRY_WAIT: std::time::Duration = std::time::Duration::from_secs(10);

/// The application identifier name registered for a bundle ID.
pub fn app_id_name(bundle_id: &str) -> String {
    let prefix = if bundle_id.ends_with(".*") {
        "Wildcard "
    } else {
        ""
    };

    let name: String = bundle_id
        .chars()
        .map(|c| match c {
            '.' | '_' | '-' | '*' => ' ',
            c => c,
        })
        .collect();

    format!("{}Bitrise {}", prefix, name)
}

/// The managed profile name for a (profile type, bundle ID) pair.
///
/// A pure function of its inputs so the same logical profile is always found
/// by name: `[Wildcard ]Bitrise <platform> <distribution> - (<bundle id>)`.
pub fn profile_name(
    profile_type: ProfileType,
    bundle_id: &str,
) -> Result<String, AppleProvisioningError> {
    let platform = profile_type_platform(profile_type)
        .ok_or(AppleProvisioningError::UnsupportedProfileType(profile_type))?;
    let distribution = profile_type_distribution(profile_type)
        .ok_or(AppleProvisioningError::UnsupportedProfileType(profile_type))?;

    // The '*' char is not allowed in profile names.
    let (prefix, bundle_id) = match bundle_id.strip_suffix(".*") {
        Some(stripped) => ("Wildcard ", stripped),
        None => ("", bundle_id),
    };

    Ok(format!(
        "{}Bitrise {} {} - ({})",
        prefix, platform, distribution, bundle_id
    ))
}

/// Replace the last component of a bundle ID with `*`.
///
/// UI-test targets are signed with wildcard profiles covering their host
/// app's namespace.
pub fn wildcard_bundle_id(bundle_id: &str) -> Result<String, AppleProvisioningError> {
    match bundle_id.rfind('.') {
        Some(index) => Ok(format!("{}.*", &bundle_id[..index])),
        None => Err(AppleProvisioningError::InvalidBundleId(
            bundle_id.to_string(),
        )),
    }
}

/// Validate an existing profile against the desired state.
///
/// All checks must hold for the profile to be reused: not expiring inside
/// the validity window, entitlements in sync (including the iCloud container
/// superset rule), every required certificate embedded and every required
/// device present.
fn check_profile<C>(
    client: &C,
    profile: &dyn ManagedProfile,
    entitlements: &Entitlements,
    device_udids: &[String],
    certificate_ids: &[String],
    min_profile_days_valid: i64,
) -> Result<(), AppleProvisioningError>
where
    C: ProfileClient + ?Sized,
{
    let relative_expiry_time = Utc::now() + Duration::days(min_profile_days_valid.max(0));
    if profile.attributes().expiration_date < relative_expiry_time {
        return Err(AppleProvisioningError::NonmatchingProfile {
            reason: format!(
                "profile expired, or will expire in less than {} day(s)",
                min_profile_days_valid
            ),
        });
    }

    check_profile_entitlements(client, profile, entitlements)?;

    let profile_certificate_ids = profile.certificate_ids()?;
    for id in certificate_ids {
        if !profile_certificate_ids.contains(id) {
            return Err(AppleProvisioningError::NonmatchingProfile {
                reason: format!("certificate with ID ({}) not included in the profile", id),
            });
        }
    }

    check_profile_devices(&profile.device_udids()?, device_udids)
}

fn check_profile_entitlements<C>(
    client: &C,
    profile: &dyn ManagedProfile,
    entitlements: &Entitlements,
) -> Result<(), AppleProvisioningError>
where
    C: ProfileClient + ?Sized,
{
    let profile_entitlements = profile.entitlements()?;

    let missing_containers = find_missing_containers(entitlements, &profile_entitlements);
    if !missing_containers.is_empty() {
        return Err(AppleProvisioningError::NonmatchingProfile {
            reason: format!(
                "project uses containers that are missing from the provisioning profile: {:?}",
                missing_containers
            ),
        });
    }

    let bundle_id = profile.bundle_id()?;

    client.check_bundle_id_entitlements(&bundle_id, entitlements)
}

fn check_profile_devices(
    profile_device_udids: &[String],
    device_udids: &[String],
) -> Result<(), AppleProvisioningError> {
    let normalized_profile_udids: Vec<String> = profile_device_udids
        .iter()
        .map(|udid| normalize_udid(udid))
        .collect();

    for udid in device_udids {
        if !normalized_profile_udids.contains(&normalize_udid(udid)) {
            return Err(AppleProvisioningError::NonmatchingProfile {
                reason: format!("device with UDID ({}) not included in the profile", udid),
            });
        }
    }

    Ok(())
}

/// Per-pass reconciler state: the client plus single-owned caches living for
/// one reconciliation pass.
pub struct ProfileManager<'a, C: DevPortalClient + ?Sized> {
    client: &'a C,
    /// Bundle IDs already resolved during this pass.
    bundle_id_by_identifier: HashMap<String, BundleId>,
    /// iCloud containers that could not be assigned automatically, reported
    /// once at the end of the pass.
    containers_by_bundle_id: BTreeMap<String, Vec<String>>,
    retry_wait: std::time::Duration,
}

impl<'a, C: DevPortalClient + ?Sized> ProfileManager<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            bundle_id_by_identifier: HashMap::new(),
            containers_by_bundle_id: BTreeMap::new(),
            retry_wait: ENSURE_PROFILE_RETRY_WAIT,
        }
    }

    #[cfg(test)]
    fn with_retry_wait(mut self, wait: std::time::Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    /// Ensure an application identifier exists for a bundle ID with the
    /// capabilities the entitlements require.
    fn ensure_bundle_id(
        &mut self,
        identifier: &str,
        entitlements: &Entitlements,
    ) -> Result<BundleId, AppleProvisioningError> {
        info!("searching for app ID for bundle ID: {}", identifier);

        let bundle_id = match self.bundle_id_by_identifier.get(identifier) {
            Some(bundle_id) => Some(bundle_id.clone()),
            None => self.client.find_bundle_id(identifier)?,
        };

        if let Some(bundle_id) = bundle_id {
            debug!("app ID found: {}", bundle_id.attributes.name);

            self.bundle_id_by_identifier
                .insert(identifier.to_string(), bundle_id.clone());

            // Check if the bundle ID is in sync with the project.
            match self
                .client
                .check_bundle_id_entitlements(&bundle_id, entitlements)
            {
                Ok(()) => {
                    debug!("app ID capabilities are in sync with the project capabilities");
                    return Ok(bundle_id);
                }
                Err(AppleProvisioningError::NonmatchingProfile { reason }) => {
                    if entitlements.is_app_clip() && entitlements.has_sign_in_with_apple() {
                        return Err(AppleProvisioningError::AppClipAppIdWithAppleSigning);
                    }

                    warn!("app ID capabilities invalid: {}", reason);
                    warn!("app ID capabilities are not in sync with the project capabilities, synchronizing");
                    self.client.sync_bundle_id(&bundle_id, entitlements)?;

                    return Ok(bundle_id);
                }
                Err(err) => return Err(err),
            }
        }

        if entitlements.is_app_clip() {
            return Err(AppleProvisioningError::AppClipAppId);
        }

        warn!("app ID not found, generating");

        let bundle_id = self
            .client
            .create_bundle_id(identifier, &app_id_name(identifier))?;

        let containers = entitlements.icloud_containers();
        if !containers.is_empty() {
            warn!(
                "app ID created but couldn't add iCloud containers: {:?}",
                containers
            );
            self.containers_by_bundle_id
                .insert(identifier.to_string(), containers);
        }

        self.client.sync_bundle_id(&bundle_id, entitlements)?;

        self.bundle_id_by_identifier
            .insert(identifier.to_string(), bundle_id.clone());

        Ok(bundle_id)
    }

    /// One pass of the ensure state machine for a single bundle ID.
    fn ensure_profile(
        &mut self,
        profile_type: ProfileType,
        identifier: &str,
        entitlements: &Entitlements,
        certificate_ids: &[String],
        device_ids: &[String],
        device_udids: &[String],
        min_profile_days_valid: i64,
    ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError> {
        info!("checking bundle ID: {}", identifier);

        let name = profile_name(profile_type, identifier)?;
        let profile = self.client.find_profile(&name, profile_type)?;

        match profile {
            None => {
                warn!("profile does not exist, generating");
            }
            Some(profile) => {
                debug!(
                    "managed profile found: {} ID: {} UUID: {} expiry: {}",
                    profile.attributes().name,
                    profile.id(),
                    profile.attributes().uuid,
                    profile.attributes().expiration_date
                );

                if profile.attributes().profile_state == ProfileState::Active {
                    match check_profile(
                        self.client,
                        profile.as_ref(),
                        entitlements,
                        device_udids,
                        certificate_ids,
                        min_profile_days_valid,
                    ) {
                        Ok(()) => {
                            debug!("profile is in sync with the project requirements");
                            return Ok(profile);
                        }
                        Err(AppleProvisioningError::NonmatchingProfile { reason }) => {
                            warn!(
                                "the profile is not in sync with the project requirements ({}), regenerating",
                                reason
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }

                if profile.attributes().profile_state == ProfileState::Invalid {
                    // A modified bundle ID turns its profiles invalid.
                    warn!("the profile state is invalid, regenerating");
                }

                self.client.delete_profile(profile.id())?;
            }
        }

        let bundle_id = self.ensure_bundle_id(identifier, entitlements)?;

        info!("creating profile for bundle ID: {}", bundle_id.attributes.name);

        let profile = self.client.create_profile(
            &name,
            profile_type,
            &bundle_id,
            certificate_ids,
            device_ids,
        )?;

        debug!("profile created: {}", profile.attributes().name);

        Ok(profile)
    }

    /// The ensure state machine wrapped in a bounded retry for the
    /// profiles-inconsistent error class.
    ///
    /// Accessing the same team from parallel runs can race: between finding
    /// and acting on a profile, another actor may have deleted it. Any other
    /// error class aborts immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn ensure_profile_with_retry(
        &mut self,
        profile_type: ProfileType,
        identifier: &str,
        entitlements: &Entitlements,
        certificate_ids: &[String],
        device_ids: &[String],
        device_udids: &[String],
        min_profile_days_valid: i64,
    ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError> {
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                debug!("retrying profile preparation (attempt {})", attempt);
            }

            match self.ensure_profile(
                profile_type,
                identifier,
                entitlements,
                certificate_ids,
                device_ids,
                device_udids,
                min_profile_days_valid,
            ) {
                Err(err) if err.is_profiles_inconsistent() => {
                    warn!("{}", err);

                    attempt += 1;
                    if attempt >= ENSURE_PROFILE_ATTEMPTS {
                        return Err(err);
                    }

                    std::thread::sleep(self.retry_wait);
                }
                result => return result,
            }
        }
    }
}

/// Ensure provisioning profiles for every target of a distribution type.
///
/// `app_layout` holds the targets still missing assets. The result is a
/// complete asset bundle for the distribution type, or the first fatal
/// error.
pub fn ensure_profiles<C>(
    client: &C,
    distribution: DistributionType,
    certs_by_type: &HashMap<CertificateType, Vec<Certificate>>,
    app_layout: &AppLayout,
    device_ids: &[String],
    device_udids: &[String],
    min_profile_days_valid: i64,
) -> Result<AppCodesignAssets, AppleProvisioningError>
where
    C: DevPortalClient + ?Sized,
{
    let mut manager = ProfileManager::new(client);

    info!("checking {} provisioning profiles", distribution);

    let certificate = select_certificate(certs_by_type, distribution)?;

    let mut assets = AppCodesignAssets {
        archivable_target_profiles_by_bundle_id: HashMap::new(),
        uitest_target_profiles_by_bundle_id: HashMap::new(),
        certificate: certificate.certificate_info,
    };

    let certificate_ids: Vec<String> = certs_by_type
        .get(&distribution.certificate_type())
        .map(|certs| certs.iter().map(|c| c.id.clone()).collect())
        .unwrap_or_default();

    let profile_type = profile_type_for(app_layout.platform, distribution)?;

    let needs_devices = distribution_requires_device_list(&[distribution]);
    let (profile_device_ids, profile_device_udids) = if needs_devices {
        (device_ids, device_udids)
    } else {
        (&[] as &[String], &[] as &[String])
    };

    // Deterministic processing order keeps log output and portal side
    // effects stable across runs.
    let targets: BTreeMap<&String, &Entitlements> = app_layout
        .entitlements_by_archivable_target_bundle_id
        .iter()
        .collect();

    for (identifier, entitlements) in targets {
        let profile = manager.ensure_profile_with_retry(
            profile_type,
            identifier,
            entitlements,
            &certificate_ids,
            profile_device_ids,
            profile_device_udids,
            min_profile_days_valid,
        )?;

        assets
            .archivable_target_profiles_by_bundle_id
            .insert(identifier.clone(), profile);
    }

    if !app_layout.uitest_target_bundle_ids.is_empty()
        && distribution == DistributionType::Development
    {
        // Capabilities are not supported for UI-test targets; Xcode managed
        // signing covers them with wildcard profiles instead.
        let no_entitlements = Entitlements::default();

        for identifier in &app_layout.uitest_target_bundle_ids {
            let wildcard = wildcard_bundle_id(identifier)?;

            let profile = manager.ensure_profile_with_retry(
                profile_type,
                &wildcard,
                &no_entitlements,
                &certificate_ids,
                device_ids,
                device_udids,
                min_profile_days_valid,
            )?;

            assets
                .uitest_target_profiles_by_bundle_id
                .insert(identifier.clone(), profile);
        }
    }

    if !manager.containers_by_bundle_id.is_empty() {
        let mut description = String::new();
        for (bundle_id, containers) in &manager.containers_by_bundle_id {
            description.push_str(&format!("{}, containers:\n", bundle_id));
            for container in containers {
                description.push_str(&format!("- {}\n", container));
            }
            description.push('\n');
        }

        return Err(AppleProvisioningError::Configuration {
            title: "Unable to automatically assign iCloud containers to the following app IDs:"
                .to_string(),
            description,
            recommendation: "You have to manually add the listed containers to your app ID at: https://developer.apple.com/account/resources/identifiers/list.".to_string(),
        });
    }

    Ok(assets)
}
