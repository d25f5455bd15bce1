// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing certificate resources.

use {
    super::{list_all, AppStoreConnectClient, Identified, PageOptions, PagedResponse},
    crate::AppleProvisioningError,
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

const CERTIFICATES_ENDPOINT: &str = "certificates";

/// Certificate kinds known to the portal.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CertificateType {
    #[serde(rename = "DEVELOPMENT")]
    Development,
    #[serde(rename = "DISTRIBUTION")]
    Distribution,
    #[serde(rename = "IOS_DEVELOPMENT")]
    IosDevelopment,
    #[serde(rename = "IOS_DISTRIBUTION")]
    IosDistribution,
    #[serde(rename = "MAC_APP_DISTRIBUTION")]
    MacAppDistribution,
    #[serde(rename = "MAC_INSTALLER_DISTRIBUTION")]
    MacInstallerDistribution,
    #[serde(rename = "MAC_APP_DEVELOPMENT")]
    MacAppDevelopment,
    #[serde(rename = "DEVELOPER_ID_KEXT")]
    DeveloperIdKext,
    #[serde(rename = "DEVELOPER_ID_APPLICATION")]
    DeveloperIdApplication,
    #[serde(other)]
    Unknown,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "DEVELOPMENT",
            Self::Distribution => "DISTRIBUTION",
            Self::IosDevelopment => "IOS_DEVELOPMENT",
            Self::IosDistribution => "IOS_DISTRIBUTION",
            Self::MacAppDistribution => "MAC_APP_DISTRIBUTION",
            Self::MacInstallerDistribution => "MAC_INSTALLER_DISTRIBUTION",
            Self::MacAppDevelopment => "MAC_APP_DEVELOPMENT",
            Self::DeveloperIdKext => "DEVELOPER_ID_KEXT",
            Self::DeveloperIdApplication => "DEVELOPER_ID_APPLICATION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Display for CertificateType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAttributes {
    /// Base64 encoded DER of the certificate.
    #[serde(default)]
    pub certificate_content: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub serial_number: String,
    pub certificate_type: CertificateType,
}

/// A signing certificate registered on the portal.
#[derive(Clone, Debug, Deserialize)]
pub struct Certificate {
    pub attributes: CertificateAttributes,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Identified for Certificate {
    fn portal_id(&self) -> &str {
        &self.id
    }
}

impl AppStoreConnectClient {
    /// Fetch a single page of certificates.
    pub fn list_certificates(
        &self,
        certificate_type: Option<CertificateType>,
        serial_number: Option<&str>,
        options: &PageOptions,
    ) -> Result<PagedResponse<Certificate>, AppleProvisioningError> {
        let mut filters = Vec::new();
        if let Some(certificate_type) = certificate_type {
            filters.push((
                "filter[certificateType]",
                certificate_type.as_str().to_string(),
            ));
        }
        if let Some(serial_number) = serial_number {
            filters.push(("filter[serialNumber]", serial_number.to_string()));
        }

        self.get_paged(CERTIFICATES_ENDPOINT, &filters, options)
    }

    /// Fetch every certificate of a type, following pagination.
    pub fn list_all_certificates(
        &self,
        certificate_type: CertificateType,
    ) -> Result<Vec<Certificate>, AppleProvisioningError> {
        list_all(CERTIFICATES_ENDPOINT, |options| {
            self.list_certificates(Some(certificate_type), None, &options)
        })
    }

    /// Fetch the certificate with the given serial number.
    ///
    /// Exactly one match is expected; zero and multiple matches are errors.
    pub fn certificate_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<Certificate, AppleProvisioningError> {
        let response = self.list_certificates(None, Some(serial_number), &PageOptions::default())?;

        let mut certificates = response.data;
        match certificates.len() {
            0 => Err(AppleProvisioningError::CertificateNotFound(
                serial_number.to_string(),
            )),
            1 => Ok(certificates.remove(0)),
            _ => Err(AppleProvisioningError::MultipleCertificates(
                serial_number.to_string(),
            )),
        }
    }

    /// Fetch a page of certificates pointed to by a relationship link.
    pub fn certificates_at(
        &self,
        relationship_link: &str,
        options: &PageOptions,
    ) -> Result<PagedResponse<Certificate>, AppleProvisioningError> {
        self.get_url_paged(url::Url::parse(relationship_link)?, &[], options)
    }
}
