// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local signing certificates and the certificate selector.
//!
//! Local certificates (with private keys, installed by an external
//! collaborator) are matched to their portal counterparts by serial number.
//! The selector decides which certificate types a requested distribution
//! needs and which distribution types end up being reconciled.

use {
    crate::{
        app_store_connect::certificates::CertificateType,
        client::CertificateSource,
        model::{Certificate, DistributionType},
        AppleProvisioningError,
    },
    bcder::Oid,
    chrono::{DateTime, Utc},
    log::{debug, warn},
    std::{
        collections::HashMap,
        fmt::{Display, Formatter},
    },
    x509_certificate::{rfc4519::OID_ORGANIZATIONAL_UNIT_NAME, rfc5280, CapturedX509Certificate},
};

/// Common-name prefixes identifying distribution certificates.
///
/// See <https://help.apple.com/xcode/mac/current/#/dev80c6204ec> for Apple's
/// certificate taxonomy.
const DISTRIBUTION_CERTIFICATE_PREFIXES: &[&str] = &["iphone distribution", "apple distribution"];

/// Normalize a certificate serial for comparison: lowercase hex without
/// leading zeros.
pub fn normalize_serial(serial: &str) -> String {
    let normalized = serial.to_lowercase();
    let trimmed = normalized.trim_start_matches('0');

    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A code signing certificate, parsed from DER.
///
/// Instances describe either a certificate installed locally (with its
/// private key held elsewhere) or one downloaded from the portal.
#[derive(Clone, Debug)]
pub struct CertificateInfo {
    pub common_name: String,
    pub team_id: String,
    /// Normalized lowercase hex serial, comparable across sources.
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub der: Vec<u8>,
}

fn asn1_time_to_utc(time: &x509_certificate::asn1time::Time) -> DateTime<Utc> {
    match time {
        x509_certificate::asn1time::Time::UtcTime(t) => **t,
        x509_certificate::asn1time::Time::GeneralTime(gt) => DateTime::<Utc>::from(gt.clone()),
    }
}

impl CertificateInfo {
    /// Parse a certificate from DER data.
    pub fn from_der(data: &[u8]) -> Result<Self, AppleProvisioningError> {
        let cert = CapturedX509Certificate::from_der(data.to_vec())?;

        let common_name = cert
            .subject_name()
            .iter_common_name()
            .next()
            .and_then(|atv| atv.to_string().ok())
            .unwrap_or_default();

        // The team ID is embedded as the Organizational Unit of the subject.
        let team_id = cert
            .subject_name()
            .find_first_attribute_string(Oid(OID_ORGANIZATIONAL_UNIT_NAME.as_ref().into()))
            .unwrap_or(None)
            .unwrap_or_default();

        let serial = normalize_serial(&hex::encode(cert.serial_number_asn1().as_slice()));

        let parsed: &rfc5280::Certificate = cert.as_ref();
        let validity = &parsed.tbs_certificate.validity;
        let not_before = asn1_time_to_utc(&validity.not_before);
        let not_after = asn1_time_to_utc(&validity.not_after);

        Ok(Self {
            common_name,
            team_id,
            serial,
            not_before,
            not_after,
            der: data.to_vec(),
        })
    }

    /// Parse a certificate from the portal's base64 encoded DER content.
    pub fn from_base64_der(content: &str) -> Result<Self, AppleProvisioningError> {
        let der = base64::decode(content)
            .map_err(|e| AppleProvisioningError::CertificateParse(e.to_string()))?;

        Self::from_der(&der)
    }

    /// Whether the certificate is inside its validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Classify the certificate by its common-name prefix.
    pub fn certificate_type(&self) -> CertificateType {
        let common_name = self.common_name.to_lowercase();

        if DISTRIBUTION_CERTIFICATE_PREFIXES
            .iter()
            .any(|prefix| common_name.starts_with(prefix))
        {
            CertificateType::IosDistribution
        } else {
            CertificateType::IosDevelopment
        }
    }
}

impl Display for CertificateInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (team: {}, serial: {}, expires: {})",
            self.common_name,
            self.team_id,
            self.serial,
            self.not_after.format("%Y-%m-%d")
        )
    }
}

/// Local certificates partitioned by usability.
#[derive(Debug, Default)]
pub struct FilteredCertificates {
    pub valid: Vec<CertificateInfo>,
    pub invalid: Vec<CertificateInfo>,
    pub duplicated: Vec<CertificateInfo>,
}

/// Partition local certificates into valid, expired/not-yet-valid and
/// duplicated sets.
///
/// Certificates sharing a common name count as duplicates; the one expiring
/// last is kept.
pub fn filter_valid_certificates(
    certificates: Vec<CertificateInfo>,
    now: DateTime<Utc>,
) -> FilteredCertificates {
    let mut result = FilteredCertificates::default();
    let mut latest_by_name: HashMap<String, CertificateInfo> = HashMap::new();

    for certificate in certificates {
        if !certificate.is_valid_at(now) {
            result.invalid.push(certificate);
            continue;
        }

        match latest_by_name.remove(&certificate.common_name) {
            Some(existing) if existing.not_after >= certificate.not_after => {
                result.duplicated.push(certificate);
                latest_by_name.insert(existing.common_name.clone(), existing);
            }
            Some(existing) => {
                result.duplicated.push(existing);
                latest_by_name.insert(certificate.common_name.clone(), certificate);
            }
            None => {
                latest_by_name.insert(certificate.common_name.clone(), certificate);
            }
        }
    }

    result.valid = latest_by_name.into_values().collect();
    result.valid.sort_by(|a, b| a.serial.cmp(&b.serial));

    result
}

/// Validate, deduplicate and classify local certificates by type.
pub fn valid_local_certificates(
    certificates: Vec<CertificateInfo>,
) -> HashMap<CertificateType, Vec<CertificateInfo>> {
    let filtered = filter_valid_certificates(certificates, Utc::now());

    if !filtered.invalid.is_empty() {
        warn!(
            "ignoring expired or not yet valid certificates: {}",
            certs_to_string(&filtered.invalid)
        );
    }
    if !filtered.duplicated.is_empty() {
        warn!(
            "ignoring duplicated certificates with the same name: {}",
            certs_to_string(&filtered.duplicated)
        );
    }

    let mut by_type: HashMap<CertificateType, Vec<CertificateInfo>> = HashMap::new();
    for certificate_type in [
        CertificateType::IosDevelopment,
        CertificateType::IosDistribution,
    ] {
        by_type.insert(
            certificate_type,
            filtered
                .valid
                .iter()
                .filter(|c| c.certificate_type() == certificate_type)
                .cloned()
                .collect(),
        );
    }

    by_type
}

fn certs_to_string(certificates: &[CertificateInfo]) -> String {
    certificates
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Determine the required certificate types and the distribution types to
/// reconcile, matching local certificates to their portal counterparts.
pub fn select_certificates_and_distribution_types<C>(
    certificate_source: &C,
    local_certificates: &HashMap<CertificateType, Vec<CertificateInfo>>,
    distribution: DistributionType,
    sign_uitest_targets: bool,
    verbose_log: bool,
) -> Result<
    (
        HashMap<CertificateType, Vec<Certificate>>,
        Vec<DistributionType>,
    ),
    AppleProvisioningError,
>
where
    C: CertificateSource + ?Sized,
{
    let certificate_type = distribution.certificate_type();

    let mut distribution_types = vec![distribution];
    let mut required_certificate_types: HashMap<CertificateType, bool> =
        HashMap::from([(certificate_type, true)]);

    if distribution != DistributionType::Development {
        distribution_types.push(DistributionType::Development);

        if sign_uitest_targets {
            warn!(
                "UITest target requires development code signing in addition to the specified {} code signing",
                distribution
            );
            required_certificate_types.insert(CertificateType::IosDevelopment, true);
        } else {
            required_certificate_types.insert(CertificateType::IosDevelopment, false);
        }
    }

    let certs_by_type = match get_valid_certificates(
        certificate_source,
        local_certificates,
        &required_certificate_types,
        verbose_log,
    ) {
        Ok(certs) => certs,
        Err(AppleProvisioningError::MissingCertificate(certificate_type)) => {
            return Err(AppleProvisioningError::Configuration {
                title: format!("No valid {} type certificates uploaded", certificate_type),
                description: format!(
                    "Maybe you forgot to provide a(n) {} type certificate.",
                    certificate_type
                ),
                recommendation: format!(
                    "Upload a {} type certificate (.p12) to your certificate storage.",
                    certificate_type
                ),
            });
        }
        Err(err) => return Err(err),
    };

    if certs_by_type.len() == 1 && distribution != DistributionType::Development {
        // No development certificate uploaded, so drop the speculatively
        // added development distribution.
        distribution_types = vec![distribution];
    }

    debug!(
        "ensuring codesigning files for distribution types: {:?}",
        distribution_types
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
    );

    Ok((certs_by_type, distribution_types))
}

fn get_valid_certificates<C>(
    certificate_source: &C,
    local_certificates: &HashMap<CertificateType, Vec<CertificateInfo>>,
    required_certificate_types: &HashMap<CertificateType, bool>,
    verbose_log: bool,
) -> Result<HashMap<CertificateType, Vec<Certificate>>, AppleProvisioningError>
where
    C: CertificateSource + ?Sized,
{
    for (&certificate_type, &required) in required_certificate_types {
        let local = local_certificates
            .get(&certificate_type)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if required && local.is_empty() {
            return Err(AppleProvisioningError::MissingCertificate(certificate_type));
        }
    }

    if verbose_log {
        if let Err(err) = log_all_api_certificates(certificate_source) {
            debug!("failed to log all Developer Portal certificates: {}", err);
        }
    }

    let mut matched_by_type = HashMap::new();

    for (&certificate_type, local) in local_certificates {
        let matched = match_local_to_api_certificates(certificate_source, local);

        if !matched.is_empty() {
            debug!(
                "certificate type {} has matches on the Developer Portal:",
                certificate_type
            );
            for certificate in &matched {
                debug!("- {}", certificate.certificate_info);
            }
        }

        if required_certificate_types
            .get(&certificate_type)
            .copied()
            .unwrap_or(false)
            && matched.is_empty()
        {
            return Err(AppleProvisioningError::Configuration {
                title: format!(
                    "None of the following {} certificates are present on the Developer Portal:",
                    certificate_type
                ),
                description: certs_to_string(local),
                recommendation:
                    "Upload a certificate that is registered on the Developer Portal.".to_string(),
            });
        }

        if !matched.is_empty() {
            matched_by_type.insert(certificate_type, matched);
        }
    }

    Ok(matched_by_type)
}

/// Match local certificates to portal certificates by serial number.
///
/// Local certificates absent from the portal are reported and skipped, not
/// errored: the caller decides whether the remaining set suffices.
fn match_local_to_api_certificates<C>(
    certificate_source: &C,
    local_certificates: &[CertificateInfo],
) -> Vec<Certificate>
where
    C: CertificateSource + ?Sized,
{
    let mut matched = Vec::new();

    for local in local_certificates {
        match certificate_source.query_certificate_by_serial(&local.serial) {
            Ok(mut certificate) => {
                debug!("certificate ({}) found with ID: {}", local, certificate.id);
                certificate.certificate_info = local.clone();
                matched.push(certificate);
            }
            Err(err) => {
                warn!(
                    "certificate ({}) not found on the Developer Portal: {}",
                    local, err
                );
            }
        }
    }

    matched
}

fn log_all_api_certificates<C>(certificate_source: &C) -> Result<(), AppleProvisioningError>
where
    C: CertificateSource + ?Sized,
{
    let certificates = certificate_source.query_all_certificates()?;

    for (certificate_type, certificates) in certificates {
        debug!("Developer Portal {} certificates:", certificate_type);
        for certificate in certificates {
            debug!("- {}", certificate.certificate_info);
        }
    }

    Ok(())
}

/// Select the certificate to embed for a distribution type: the first match,
/// warning when several are available.
pub fn select_certificate(
    certs_by_type: &HashMap<CertificateType, Vec<Certificate>>,
    distribution: DistributionType,
) -> Result<Certificate, AppleProvisioningError> {
    let certificate_type = distribution.certificate_type();
    let certificates = certs_by_type
        .get(&certificate_type)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let selected = certificates
        .first()
        .ok_or(AppleProvisioningError::NoCertificateForDistribution(
            distribution,
        ))?;

    if certificates.len() > 1 {
        warn!("multiple certificates provided for {} distribution:", distribution);
        for certificate in certificates {
            warn!("- {}", certificate.certificate_info.common_name);
        }
    }

    debug!(
        "using certificate for {} distribution: {}",
        distribution, selected.certificate_info.common_name
    );

    Ok(selected.clone())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    fn cert(common_name: &str, serial: &str, days_valid: i64) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            common_name: common_name.to_string(),
            team_id: "TEAM123456".to_string(),
            serial: normalize_serial(serial),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(days_valid),
            der: Vec::new(),
        }
    }

    struct FakeCertificateSource {
        remote_serials: Vec<(&'static str, &'static str)>,
    }

    impl CertificateSource for FakeCertificateSource {
        fn query_certificate_by_serial(
            &self,
            serial: &str,
        ) -> Result<Certificate, AppleProvisioningError> {
            self.remote_serials
                .iter()
                .find(|(remote, _)| normalize_serial(remote) == serial)
                .map(|(remote, id)| Certificate {
                    certificate_info: cert("remote", remote, 100),
                    id: id.to_string(),
                })
                .ok_or_else(|| AppleProvisioningError::CertificateNotFound(serial.to_string()))
        }

        fn query_all_certificates(
            &self,
        ) -> Result<HashMap<CertificateType, Vec<Certificate>>, AppleProvisioningError> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn serial_normalization() {
        assert_eq!(normalize_serial("00AB12"), "ab12");
        assert_eq!(normalize_serial("ab12"), "ab12");
        assert_eq!(normalize_serial("0000"), "0");
    }

    #[test]
    fn certificate_type_from_common_name() {
        assert_eq!(
            cert("Apple Development: Jane Doe (ABC123)", "01", 10).certificate_type(),
            CertificateType::IosDevelopment
        );
        assert_eq!(
            cert("iPhone Developer: Jane Doe (ABC123)", "02", 10).certificate_type(),
            CertificateType::IosDevelopment
        );
        assert_eq!(
            cert("Apple Distribution: Acme Inc (ABC123)", "03", 10).certificate_type(),
            CertificateType::IosDistribution
        );
        assert_eq!(
            cert("iPhone Distribution: Acme Inc (ABC123)", "04", 10).certificate_type(),
            CertificateType::IosDistribution
        );
    }

    #[test]
    fn filter_rejects_expired_and_duplicated() {
        let now = Utc::now();
        let expired = CertificateInfo {
            not_after: now - Duration::days(1),
            ..cert("Apple Development: Jane Doe (ABC123)", "01", 10)
        };
        let older = cert("Apple Development: Jane Doe (ABC123)", "02", 10);
        let newer = cert("Apple Development: Jane Doe (ABC123)", "03", 20);

        let filtered = filter_valid_certificates(vec![expired, older, newer], now);

        assert_eq!(filtered.invalid.len(), 1);
        assert_eq!(filtered.duplicated.len(), 1);
        assert_eq!(filtered.duplicated[0].serial, "2");
        assert_eq!(filtered.valid.len(), 1);
        assert_eq!(filtered.valid[0].serial, "3");
    }

    #[test]
    fn matching_is_by_serial_intersection() {
        // Local serials {S1, S2}, remote serials {S2, S3}: the matched set is
        // exactly {S2}.
        let source = FakeCertificateSource {
            remote_serials: vec![("S2AB", "cert-2"), ("S3AB", "cert-3")],
        };

        let matched = match_local_to_api_certificates(
            &source,
            &[
                cert("Apple Development: Jane Doe (ABC123)", "S1AB", 10),
                cert("Apple Development: Jane Doe (ABC123)", "S2AB", 10),
            ],
        );

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "cert-2");
        assert_eq!(matched[0].certificate_info.serial, normalize_serial("S2AB"));
    }

    #[test]
    fn selector_requires_matching_certificate_for_distribution() {
        let source = FakeCertificateSource {
            remote_serials: vec![],
        };

        let locals = HashMap::from([(
            CertificateType::IosDevelopment,
            vec![cert("Apple Development: Jane Doe (ABC123)", "01", 10)],
        )]);

        let result = select_certificates_and_distribution_types(
            &source,
            &locals,
            DistributionType::Development,
            false,
            false,
        );

        assert!(matches!(
            result,
            Err(AppleProvisioningError::Configuration { .. })
        ));
    }

    #[test]
    fn selector_reports_missing_required_type() {
        let source = FakeCertificateSource {
            remote_serials: vec![],
        };

        let result = select_certificates_and_distribution_types(
            &source,
            &HashMap::new(),
            DistributionType::AppStore,
            false,
            false,
        );

        match result {
            Err(AppleProvisioningError::Configuration { title, .. }) => {
                assert!(title.contains("IOS_DISTRIBUTION"));
            }
            other => panic!("expected configuration error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn speculative_development_distribution_is_dropped_without_dev_certificate() {
        let source = FakeCertificateSource {
            remote_serials: vec![("D15T", "cert-dist")],
        };

        let locals = HashMap::from([(
            CertificateType::IosDistribution,
            vec![cert("Apple Distribution: Acme Inc (ABC123)", "D15T", 10)],
        )]);

        let (certs_by_type, distribution_types) = select_certificates_and_distribution_types(
            &source,
            &locals,
            DistributionType::AppStore,
            false,
            false,
        )
        .unwrap();

        assert_eq!(certs_by_type.len(), 1);
        assert_eq!(distribution_types, vec![DistributionType::AppStore]);
    }

    #[test]
    fn uitest_signing_keeps_development_distribution() {
        let source = FakeCertificateSource {
            remote_serials: vec![("D15T", "cert-dist"), ("DE5E", "cert-dev")],
        };

        let locals = HashMap::from([
            (
                CertificateType::IosDistribution,
                vec![cert("Apple Distribution: Acme Inc (ABC123)", "D15T", 10)],
            ),
            (
                CertificateType::IosDevelopment,
                vec![cert("Apple Development: Jane Doe (ABC123)", "DE5E", 10)],
            ),
        ]);

        let (certs_by_type, distribution_types) = select_certificates_and_distribution_types(
            &source,
            &locals,
            DistributionType::AdHoc,
            true,
            false,
        )
        .unwrap();

        assert_eq!(certs_by_type.len(), 2);
        assert_eq!(
            distribution_types,
            vec![DistributionType::AdHoc, DistributionType::Development]
        );
    }
}
