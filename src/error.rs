// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::app_store_connect::{certificates::CertificateType, ApiError},
    cryptographic_message_syntax::CmsError,
    thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for Apple provisioning.
#[derive(Debug, Error)]
pub enum AppleProvisioningError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("App Store Connect API error: {0}")]
    Api(ApiError),

    #[error("App Store Connect API key error: {0}")]
    ApiKey(String),

    #[error("unable to find App Store Connect API key in default search locations")]
    ApiKeyNotFound,

    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    #[error("no certificate found on the Developer Portal with serial {0}")]
    CertificateNotFound(String),

    #[error("multiple certificates found on the Developer Portal with serial {0}")]
    MultipleCertificates(String),

    #[error("no valid {0} type certificates uploaded")]
    MissingCertificate(CertificateType),

    #[error("no valid certificate provided for distribution type: {0}")]
    NoCertificateForDistribution(crate::model::DistributionType),

    #[error("{title}\n{description}\n\n{recommendation}")]
    Configuration {
        title: String,
        description: String,
        recommendation: String,
    },

    #[error("provisioning profile does not match requirements: {reason}")]
    NonmatchingProfile { reason: String },

    #[error("provisioning profiles were concurrently changed on the Developer Portal: {detail}")]
    ProfilesInconsistent { detail: String },

    #[error("can't create application identifier for App Clip target")]
    AppClipAppId,

    #[error(
        "can't manage application identifier for App Clip target with 'Sign In With Apple' capability"
    )]
    AppClipAppIdWithAppleSigning,

    #[error("device registration rejected: {reason}")]
    DeviceRegistration { reason: String },

    #[error("unknown entitlement key: {0}")]
    UnknownEntitlement(String),

    #[error(
        "cannot create an application identifier using the \"{0}\" capability, please add your application identifier manually on the Apple Developer Portal"
    )]
    UnsupportedCapability(&'static str),

    #[error(
        "cannot generate profile with entitlement ({entitlement}) for bundle ID {bundle_id}, please generate the provisioning profile manually on the Apple Developer Portal"
    )]
    ProfileAttachedEntitlement {
        entitlement: String,
        bundle_id: String,
    },

    #[error("no entitlements value for key: {0}")]
    EntitlementValue(String),

    #[error("no data protection level found for entitlement value: {0}")]
    DataProtectionLevel(String),

    #[error("invalid bundle id ({0}): does not contain a '.' separator")]
    InvalidBundleId(String),

    #[error("no profile types defined for platform: {0}")]
    UnsupportedPlatform(crate::model::Platform),

    #[error("no managed profile naming for profile type: {0}")]
    UnsupportedProfileType(crate::app_store_connect::profiles::ProfileType),

    #[error("provisioning profile payload has no signed content")]
    ProfilePayloadMissing,

    #[error("expired profile cleanup failed: {0}")]
    ExpiredProfileCleanup(String),
}

impl AppleProvisioningError {
    /// Whether this error signals a concurrent remote mutation that the
    /// profile reconciler may retry.
    pub fn is_profiles_inconsistent(&self) -> bool {
        matches!(self, Self::ProfilesInconsistent { .. })
    }

    /// Whether this error carries a portal error response reporting an
    /// invalid pagination cursor.
    pub fn is_cursor_invalid(&self) -> bool {
        match self {
            Self::Api(err) => err.is_cursor_invalid(),
            _ => false,
        }
    }

    /// The HTTP status of the underlying portal error response, if any.
    pub fn api_status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => Some(err.status),
            _ => None,
        }
    }
}
