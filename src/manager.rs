// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The codesign asset manager.
//!
//! Composes the certificate selector, the device reconciler and the profile
//! reconciler: for every distribution type it sources still-valid local
//! assets first, fills the gaps from the portal and merges both into the
//! final asset bundle. Collaborators (certificate download, local asset
//! lookup, asset installation) stay behind narrow traits.

use {
    crate::{
        app_store_connect::certificates::CertificateType,
        certificates::{select_certificates_and_distribution_types, CertificateInfo},
        client::DevPortalClient,
        devices::ensure_test_devices,
        entitlements::find_profile_attached_entitlement,
        model::{
            distribution_requires_device_list, AppCodesignAssets, AppLayout, Certificate,
            CodesignAssetsOpts, DistributionType, ManagedProfile, Platform,
        },
        profiles::ensure_profiles,
        AppleProvisioningError,
    },
    log::{debug, info, warn},
    std::collections::HashMap,
};

/// Supplies the desired signing state discovered from a project or archive.
///
/// Build-file parsing happens behind this trait; the reconcilers only ever
/// see the resulting [AppLayout].
pub trait ProjectInspector {
    fn platform(&self) -> Platform;

    fn get_app_layout(
        &self,
        include_uitest_targets: bool,
    ) -> Result<AppLayout, AppleProvisioningError>;

    fn is_signing_managed_automatically(&self) -> Result<bool, AppleProvisioningError>;
}

/// Source of local signing certificates (with private keys).
pub trait CertificateProvider {
    fn get_certificates(&self) -> Result<Vec<CertificateInfo>, AppleProvisioningError>;
}

/// Installs resolved assets for the out-of-scope signing step to consume.
pub trait AssetWriter {
    fn write(
        &self,
        assets_by_distribution_type: &HashMap<DistributionType, AppCodesignAssets>,
    ) -> Result<(), AppleProvisioningError>;

    fn install_certificate(
        &self,
        certificate: &CertificateInfo,
    ) -> Result<(), AppleProvisioningError>;

    fn install_profile(&self, profile: &dyn ManagedProfile)
        -> Result<(), AppleProvisioningError>;
}

/// Source of still-valid locally installed codesign assets.
///
/// Returns the assets found and, when some targets remain uncovered, the
/// layout subset still missing assets.
pub trait LocalAssetSource {
    #[allow(clippy::type_complexity)]
    fn find_codesign_assets(
        &self,
        app_layout: &AppLayout,
        distribution: DistributionType,
        certs_by_type: &HashMap<CertificateType, Vec<Certificate>>,
        device_udids: &[String],
        min_profile_days_valid: i64,
    ) -> Result<(Option<AppCodesignAssets>, Option<AppLayout>), AppleProvisioningError>;
}

/// Merge freshly reconciled assets with still-valid local ones.
///
/// Remote-reconciled entries win on key collision. When two distribution
/// types in one run require conflicting state for the same bundle ID the
/// last write wins here; the portal-side state is whatever the later
/// reconciliation produced.
fn merge_codesign_assets(
    base: Option<AppCodesignAssets>,
    additional: Option<AppCodesignAssets>,
) -> Option<AppCodesignAssets> {
    match (base, additional) {
        (base, None) => base,
        (None, additional) => additional,
        (Some(base), Some(mut additional)) => {
            for (bundle_id, profile) in base.archivable_target_profiles_by_bundle_id {
                additional
                    .archivable_target_profiles_by_bundle_id
                    .entry(bundle_id)
                    .or_insert(profile);
            }
            for (bundle_id, profile) in base.uitest_target_profiles_by_bundle_id {
                additional
                    .uitest_target_profiles_by_bundle_id
                    .entry(bundle_id)
                    .or_insert(profile);
            }
            Some(additional)
        }
    }
}

fn print_existing_codesign_assets(assets: &AppCodesignAssets, distribution: DistributionType) {
    info!("local code signing assets for {} distribution:", distribution);
    info!("certificate: {}", assets.certificate);

    info!(
        "archivable targets ({})",
        assets.archivable_target_profiles_by_bundle_id.len()
    );
    for (bundle_id, profile) in &assets.archivable_target_profiles_by_bundle_id {
        info!(
            "- {}: {} (ID: {} expiry: {})",
            bundle_id,
            profile.attributes().name,
            profile.id(),
            profile.attributes().expiration_date
        );
    }

    info!(
        "UITest targets ({})",
        assets.uitest_target_profiles_by_bundle_id.len()
    );
    for (bundle_id, profile) in &assets.uitest_target_profiles_by_bundle_id {
        info!(
            "- {}: {} (ID: {} expiry: {})",
            bundle_id,
            profile.attributes().name,
            profile.id(),
            profile.attributes().expiration_date
        );
    }
}

fn print_missing_codesign_assets(missing: &AppLayout) {
    info!("local code signing assets not found for:");

    info!(
        "archivable targets ({})",
        missing.entitlements_by_archivable_target_bundle_id.len()
    );
    for bundle_id in missing.entitlements_by_archivable_target_bundle_id.keys() {
        info!("- {}", bundle_id);
    }

    info!("UITest targets ({})", missing.uitest_target_bundle_ids.len());
    for bundle_id in &missing.uitest_target_bundle_ids {
        info!("- {}", bundle_id);
    }
}

/// Ensures exactly the code signing assets a build needs, creating or
/// repairing them on the Developer Portal when local and remote state has
/// drifted.
pub struct CodesignAssetManager {
    dev_portal_client: Box<dyn DevPortalClient>,
    asset_writer: Box<dyn AssetWriter>,
    local_asset_source: Box<dyn LocalAssetSource>,
}

impl CodesignAssetManager {
    pub fn new(
        dev_portal_client: Box<dyn DevPortalClient>,
        asset_writer: Box<dyn AssetWriter>,
        local_asset_source: Box<dyn LocalAssetSource>,
    ) -> Self {
        Self {
            dev_portal_client,
            asset_writer,
            local_asset_source,
        }
    }

    /// The main entry point of the codesigning logic.
    pub fn ensure_codesign_assets(
        &self,
        app_layout: &AppLayout,
        opts: &CodesignAssetsOpts,
    ) -> Result<HashMap<DistributionType, AppCodesignAssets>, AppleProvisioningError> {
        // Profile-attached entitlements can only be granted by Apple; fail
        // fast with guidance instead of discovering it profile by profile.
        if let Some((entitlement, bundle_id)) =
            find_profile_attached_entitlement(&app_layout.entitlements_by_archivable_target_bundle_id)
        {
            return Err(AppleProvisioningError::ProfileAttachedEntitlement {
                entitlement,
                bundle_id,
            });
        }

        let client = self.dev_portal_client.as_ref();
        client.login()?;

        let sign_uitest_targets = !app_layout.uitest_target_bundle_ids.is_empty();
        let (certs_by_type, distribution_types) = select_certificates_and_distribution_types(
            client,
            &opts.type_to_local_certificates,
            opts.distribution_type,
            sign_uitest_targets,
            opts.verbose_log,
        )?;

        let mut device_ids: Vec<String> = Vec::new();
        let mut device_udids: Vec<String> = Vec::new();
        if distribution_requires_device_list(&distribution_types) {
            let devices = ensure_test_devices(client, &opts.test_devices, app_layout.platform)?;

            for device in devices {
                device_ids.push(device.id);
                device_udids.push(device.attributes.udid);
            }
        }

        let mut assets_by_distribution_type = HashMap::new();

        for distribution in distribution_types {
            let (local_assets, missing_layout) = self.local_asset_source.find_codesign_assets(
                app_layout,
                distribution,
                &certs_by_type,
                &device_udids,
                opts.min_profile_validity_days,
            )?;

            if let Some(local_assets) = &local_assets {
                print_existing_codesign_assets(local_assets, distribution);

                info!("installing certificate");
                debug!("certificate: {}", local_assets.certificate.common_name);
                self.asset_writer
                    .install_certificate(&local_assets.certificate)?;
            }

            let mut final_assets = local_assets;

            if let Some(missing_layout) = missing_layout {
                print_missing_codesign_assets(&missing_layout);

                let new_assets = match ensure_profiles(
                    client,
                    distribution,
                    &certs_by_type,
                    &missing_layout,
                    &device_ids,
                    &device_udids,
                    opts.min_profile_validity_days,
                ) {
                    Ok(assets) => assets,
                    Err(err) => {
                        match &err {
                            AppleProvisioningError::AppClipAppId => {
                                warn!("can't create application identifier for App Clip targets");
                                warn!("please generate the application identifier manually on the Apple Developer Portal, then rerun");
                            }
                            AppleProvisioningError::AppClipAppIdWithAppleSigning => {
                                warn!("can't manage application identifier for App Clip target with 'Sign In With Apple' capability");
                                warn!("please configure capabilities on the Apple Developer Portal for the App Clip target manually, then rerun");
                            }
                            _ => {}
                        }

                        return Err(err);
                    }
                };

                info!("installing certificates and profiles");
                let mut to_install = HashMap::new();
                to_install.insert(distribution, new_assets);
                self.asset_writer.write(&to_install)?;
                let new_assets = to_install
                    .remove(&distribution)
                    .expect("just inserted assets");

                final_assets = merge_codesign_assets(final_assets, Some(new_assets));
            }

            if let Some(final_assets) = final_assets {
                assets_by_distribution_type.insert(distribution, final_assets);
            }
        }

        Ok(assets_by_distribution_type)
    }

    /// Install manually managed certificates and profiles as-is.
    ///
    /// The explicit fallback path for when automatic reconciliation failed
    /// and the caller opted into `fallback_to_local_assets_on_api_failure`:
    /// nothing is validated against the portal.
    pub fn prepare_manual_assets(
        &self,
        certificates: &[CertificateInfo],
        profiles: &[Box<dyn ManagedProfile>],
    ) -> Result<(), AppleProvisioningError> {
        info!("installing manually managed codesigning assets");

        for certificate in certificates {
            self.asset_writer.install_certificate(certificate)?;
        }

        for profile in profiles {
            self.asset_writer.install_profile(profile.as_ref())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use {
        crate::{
            app_store_connect::{
                bundle_ids::{BundleId, BundleIdAttributes, BundleIdRelationships},
                devices::{Device, DevicePlatform},
                profiles::{ProfileAttributes, ProfileState, ProfileType},
            },
            client::{CertificateSource, DeviceClient, ProfileClient},
            entitlements::Entitlements,
            model::{Platform, TestDevice},
        },
        chrono::{Duration, Utc},
        std::cell::RefCell,
    };

    fn certificate_info(common_name: &str, serial: &str) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            common_name: common_name.to_string(),
            team_id: "TEAM123456".to_string(),
            serial: serial.to_string(),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(100),
            der: Vec::new(),
        }
    }

    #[derive(Clone)]
    struct StoredProfile {
        id: String,
        attributes: ProfileAttributes,
        certificate_ids: Vec<String>,
        bundle_id: BundleId,
    }

    struct StoredProfileHandle(StoredProfile);

    impl ManagedProfile for StoredProfileHandle {
        fn id(&self) -> &str {
            &self.0.id
        }

        fn attributes(&self) -> &ProfileAttributes {
            &self.0.attributes
        }

        fn certificate_ids(&self) -> Result<Vec<String>, AppleProvisioningError> {
            Ok(self.0.certificate_ids.clone())
        }

        fn device_udids(&self) -> Result<Vec<String>, AppleProvisioningError> {
            Ok(Vec::new())
        }

        fn bundle_id(&self) -> Result<BundleId, AppleProvisioningError> {
            Ok(self.0.bundle_id.clone())
        }

        fn entitlements(&self) -> Result<Entitlements, AppleProvisioningError> {
            Ok(Entitlements::default())
        }
    }

    fn make_bundle_id(identifier: &str) -> BundleId {
        BundleId {
            attributes: BundleIdAttributes {
                identifier: identifier.to_string(),
                name: format!("Bitrise {}", identifier.replace('.', " ")),
                platform: Some("IOS".to_string()),
            },
            relationships: BundleIdRelationships::default(),
            id: format!("bundle-{}", identifier),
            kind: "bundleIds".to_string(),
        }
    }

    struct FakePortal {
        remote_serial: String,
        profiles: RefCell<HashMap<String, StoredProfile>>,
        bundle_ids: RefCell<HashMap<String, BundleId>>,
        deleted_profiles: RefCell<Vec<String>>,
        created_profiles: RefCell<Vec<String>>,
    }

    impl FakePortal {
        fn new(remote_serial: &str) -> Self {
            Self {
                remote_serial: remote_serial.to_string(),
                profiles: RefCell::new(HashMap::new()),
                bundle_ids: RefCell::new(HashMap::new()),
                deleted_profiles: RefCell::new(Vec::new()),
                created_profiles: RefCell::new(Vec::new()),
            }
        }
    }

    impl CertificateSource for FakePortal {
        fn query_certificate_by_serial(
            &self,
            serial: &str,
        ) -> Result<Certificate, AppleProvisioningError> {
            if serial == self.remote_serial {
                Ok(Certificate {
                    certificate_info: certificate_info("remote", serial),
                    id: "cert-1".to_string(),
                })
            } else {
                Err(AppleProvisioningError::CertificateNotFound(
                    serial.to_string(),
                ))
            }
        }

        fn query_all_certificates(
            &self,
        ) -> Result<HashMap<CertificateType, Vec<Certificate>>, AppleProvisioningError> {
            Ok(HashMap::new())
        }
    }

    impl DeviceClient for FakePortal {
        fn list_devices(
            &self,
            _udid: Option<&str>,
            _platform: DevicePlatform,
        ) -> Result<Vec<Device>, AppleProvisioningError> {
            Ok(Vec::new())
        }

        fn register_device(
            &self,
            _device: &TestDevice,
        ) -> Result<Device, AppleProvisioningError> {
            unreachable!("no test devices in these scenarios")
        }
    }

    impl ProfileClient for FakePortal {
        fn find_profile(
            &self,
            name: &str,
            _profile_type: ProfileType,
        ) -> Result<Option<Box<dyn ManagedProfile>>, AppleProvisioningError> {
            Ok(self
                .profiles
                .borrow()
                .get(name)
                .cloned()
                .map(|p| Box::new(StoredProfileHandle(p)) as Box<dyn ManagedProfile>))
        }

        fn delete_profile(&self, id: &str) -> Result<(), AppleProvisioningError> {
            self.deleted_profiles.borrow_mut().push(id.to_string());
            self.profiles.borrow_mut().retain(|_, p| p.id != id);
            Ok(())
        }

        fn create_profile(
            &self,
            name: &str,
            profile_type: ProfileType,
            bundle_id: &BundleId,
            certificate_ids: &[String],
            _device_ids: &[String],
        ) -> Result<Box<dyn ManagedProfile>, AppleProvisioningError> {
            self.created_profiles.borrow_mut().push(name.to_string());

            let profile = StoredProfile {
                id: format!("profile-{}", name),
                attributes: ProfileAttributes {
                    name: name.to_string(),
                    platform: Some("IOS".to_string()),
                    profile_content: String::new(),
                    uuid: "uuid-new".to_string(),
                    created_date: None,
                    profile_state: ProfileState::Active,
                    profile_type,
                    expiration_date: Utc::now() + Duration::days(365),
                },
                certificate_ids: certificate_ids.to_vec(),
                bundle_id: bundle_id.clone(),
            };

            self.profiles
                .borrow_mut()
                .insert(name.to_string(), profile.clone());

            Ok(Box::new(StoredProfileHandle(profile)))
        }

        fn find_bundle_id(
            &self,
            identifier: &str,
        ) -> Result<Option<BundleId>, AppleProvisioningError> {
            Ok(self.bundle_ids.borrow().get(identifier).cloned())
        }

        fn create_bundle_id(
            &self,
            identifier: &str,
            _name: &str,
        ) -> Result<BundleId, AppleProvisioningError> {
            let created = make_bundle_id(identifier);
            self.bundle_ids
                .borrow_mut()
                .insert(identifier.to_string(), created.clone());
            Ok(created)
        }

        fn check_bundle_id_entitlements(
            &self,
            _bundle_id: &BundleId,
            _entitlements: &Entitlements,
        ) -> Result<(), AppleProvisioningError> {
            Ok(())
        }

        fn sync_bundle_id(
            &self,
            _bundle_id: &BundleId,
            _entitlements: &Entitlements,
        ) -> Result<(), AppleProvisioningError> {
            Ok(())
        }
    }

    impl DevPortalClient for FakePortal {}

    #[derive(Default)]
    struct RecordingAssetWriter {
        installed_certificates: RefCell<Vec<String>>,
        written_distributions: RefCell<Vec<DistributionType>>,
    }

    impl AssetWriter for &RecordingAssetWriter {
        fn write(
            &self,
            assets_by_distribution_type: &HashMap<DistributionType, AppCodesignAssets>,
        ) -> Result<(), AppleProvisioningError> {
            self.written_distributions
                .borrow_mut()
                .extend(assets_by_distribution_type.keys().copied());
            Ok(())
        }

        fn install_certificate(
            &self,
            certificate: &CertificateInfo,
        ) -> Result<(), AppleProvisioningError> {
            self.installed_certificates
                .borrow_mut()
                .push(certificate.common_name.clone());
            Ok(())
        }

        fn install_profile(
            &self,
            _profile: &dyn ManagedProfile,
        ) -> Result<(), AppleProvisioningError> {
            Ok(())
        }
    }

    struct NoLocalAssets;

    impl LocalAssetSource for NoLocalAssets {
        fn find_codesign_assets(
            &self,
            app_layout: &AppLayout,
            _distribution: DistributionType,
            _certs_by_type: &HashMap<CertificateType, Vec<Certificate>>,
            _device_udids: &[String],
            _min_profile_days_valid: i64,
        ) -> Result<(Option<AppCodesignAssets>, Option<AppLayout>), AppleProvisioningError>
        {
            Ok((None, Some(app_layout.clone())))
        }
    }

    fn development_opts() -> CodesignAssetsOpts {
        CodesignAssetsOpts {
            distribution_type: DistributionType::Development,
            type_to_local_certificates: HashMap::from([(
                CertificateType::IosDevelopment,
                vec![certificate_info(
                    "Apple Development: Jane Doe (ABC123)",
                    "ab12",
                )],
            )]),
            test_devices: Vec::new(),
            min_profile_validity_days: 30,
            fallback_to_local_assets_on_api_failure: false,
            verbose_log: false,
        }
    }

    fn app_layout(bundle_id: &str) -> AppLayout {
        AppLayout {
            platform: Platform::Ios,
            entitlements_by_archivable_target_bundle_id: HashMap::from([(
                bundle_id.to_string(),
                Entitlements::default(),
            )]),
            uitest_target_bundle_ids: Vec::new(),
        }
    }

    fn manager_for(portal: FakePortal, writer: &'static RecordingAssetWriter) -> CodesignAssetManager {
        CodesignAssetManager::new(Box::new(portal), Box::new(writer), Box::new(NoLocalAssets))
    }

    fn leaked_writer() -> &'static RecordingAssetWriter {
        Box::leak(Box::new(RecordingAssetWriter::default()))
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn development_assets_are_created_from_scratch() {
        init_logging();
        let portal = FakePortal::new("ab12");
        let writer = leaked_writer();
        let manager = manager_for(portal, writer);

        let assets = manager
            .ensure_codesign_assets(&app_layout("com.acme.app"), &development_opts())
            .unwrap();

        assert_eq!(assets.len(), 1);
        let development = &assets[&DistributionType::Development];
        let profile = &development.archivable_target_profiles_by_bundle_id["com.acme.app"];
        assert_eq!(
            profile.attributes().name,
            "Bitrise iOS development - (com.acme.app)"
        );
        assert_eq!(
            writer.written_distributions.borrow().as_slice(),
            [DistributionType::Development]
        );
    }

    #[test]
    fn expired_remote_profile_is_replaced() {
        init_logging();
        let portal = FakePortal::new("ab12");
        portal.bundle_ids.borrow_mut().insert(
            "com.acme.app".to_string(),
            make_bundle_id("com.acme.app"),
        );
        portal.profiles.borrow_mut().insert(
            "Bitrise iOS development - (com.acme.app)".to_string(),
            StoredProfile {
                id: "profile-old".to_string(),
                attributes: ProfileAttributes {
                    name: "Bitrise iOS development - (com.acme.app)".to_string(),
                    platform: Some("IOS".to_string()),
                    profile_content: String::new(),
                    uuid: "uuid-old".to_string(),
                    created_date: None,
                    profile_state: ProfileState::Active,
                    profile_type: ProfileType::IosAppDevelopment,
                    expiration_date: Utc::now() + Duration::days(2),
                },
                certificate_ids: vec!["cert-1".to_string()],
                bundle_id: make_bundle_id("com.acme.app"),
            },
        );

        let writer = leaked_writer();
        let manager = manager_for(portal, writer);

        let assets = manager
            .ensure_codesign_assets(&app_layout("com.acme.app"), &development_opts())
            .unwrap();

        let development = &assets[&DistributionType::Development];
        let profile = &development.archivable_target_profiles_by_bundle_id["com.acme.app"];
        assert!(profile.attributes().expiration_date > Utc::now() + Duration::days(300));
    }

    #[test]
    fn app_clip_bundle_id_fails_with_typed_error() {
        let portal = FakePortal::new("ab12");
        let writer = leaked_writer();

        let mut dict = plist::Dictionary::new();
        dict.insert(
            crate::entitlements::PARENT_APPLICATION_IDENTIFIERS_ENTITLEMENT_KEY.to_string(),
            plist::Value::Array(vec![plist::Value::from("ABC123.com.acme.app")]),
        );

        let layout = AppLayout {
            platform: Platform::Ios,
            entitlements_by_archivable_target_bundle_id: HashMap::from([(
                "com.acme.app.clip".to_string(),
                Entitlements::from(dict),
            )]),
            uitest_target_bundle_ids: Vec::new(),
        };

        let manager = manager_for(portal, writer);
        let result = manager.ensure_codesign_assets(&layout, &development_opts());

        assert!(matches!(result, Err(AppleProvisioningError::AppClipAppId)));
        assert!(writer.written_distributions.borrow().is_empty());
    }

    #[test]
    fn profile_attached_entitlement_fails_fast() {
        let portal = FakePortal::new("ab12");
        let writer = leaked_writer();

        let mut dict = plist::Dictionary::new();
        dict.insert(
            "com.apple.developer.carplay-maps".to_string(),
            plist::Value::from(true),
        );

        let layout = AppLayout {
            platform: Platform::Ios,
            entitlements_by_archivable_target_bundle_id: HashMap::from([(
                "com.acme.app".to_string(),
                Entitlements::from(dict),
            )]),
            uitest_target_bundle_ids: Vec::new(),
        };

        let manager = manager_for(portal, writer);
        let result = manager.ensure_codesign_assets(&layout, &development_opts());

        assert!(matches!(
            result,
            Err(AppleProvisioningError::ProfileAttachedEntitlement { .. })
        ));
    }

    #[test]
    fn merge_prefers_freshly_reconciled_entries() {
        let local = AppCodesignAssets {
            archivable_target_profiles_by_bundle_id: HashMap::from([(
                "com.acme.app".to_string(),
                Box::new(StoredProfileHandle(StoredProfile {
                    id: "profile-local".to_string(),
                    attributes: ProfileAttributes {
                        name: "local".to_string(),
                        platform: Some("IOS".to_string()),
                        profile_content: String::new(),
                        uuid: "uuid-local".to_string(),
                        created_date: None,
                        profile_state: ProfileState::Active,
                        profile_type: ProfileType::IosAppDevelopment,
                        expiration_date: Utc::now() + Duration::days(30),
                    },
                    certificate_ids: Vec::new(),
                    bundle_id: make_bundle_id("com.acme.app"),
                })) as Box<dyn ManagedProfile>,
            )]),
            uitest_target_profiles_by_bundle_id: HashMap::new(),
            certificate: certificate_info("local", "01"),
        };

        let remote = AppCodesignAssets {
            archivable_target_profiles_by_bundle_id: HashMap::from([(
                "com.acme.app".to_string(),
                Box::new(StoredProfileHandle(StoredProfile {
                    id: "profile-remote".to_string(),
                    attributes: ProfileAttributes {
                        name: "remote".to_string(),
                        platform: Some("IOS".to_string()),
                        profile_content: String::new(),
                        uuid: "uuid-remote".to_string(),
                        created_date: None,
                        profile_state: ProfileState::Active,
                        profile_type: ProfileType::IosAppDevelopment,
                        expiration_date: Utc::now() + Duration::days(365),
                    },
                    certificate_ids: Vec::new(),
                    bundle_id: make_bundle_id("com.acme.app"),
                })) as Box<dyn ManagedProfile>,
            )]),
            uitest_target_profiles_by_bundle_id: HashMap::new(),
            certificate: certificate_info("remote", "02"),
        };

        let merged = merge_codesign_assets(Some(local), Some(remote)).unwrap();

        assert_eq!(
            merged.archivable_target_profiles_by_bundle_id["com.acme.app"].id(),
            "profile-remote"
        );
        assert_eq!(merged.certificate.common_name, "remote");
    }
}
