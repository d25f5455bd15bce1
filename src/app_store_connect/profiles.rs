// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile resources.

use {
    super::{
        bundle_ids::RelationshipLinks, AppStoreConnectClient, Identified, PageOptions,
        PagedResponse,
    },
    crate::AppleProvisioningError,
    chrono::{DateTime, NaiveDateTime, Utc},
    serde::{Deserialize, Deserializer, Serialize},
    std::fmt::{Display, Formatter},
};

const PROFILES_ENDPOINT: &str = "profiles";

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ProfileState {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INVALID")]
    Invalid,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ProfileType {
    #[serde(rename = "IOS_APP_DEVELOPMENT")]
    IosAppDevelopment,
    #[serde(rename = "IOS_APP_STORE")]
    IosAppStore,
    #[serde(rename = "IOS_APP_ADHOC")]
    IosAppAdHoc,
    #[serde(rename = "IOS_APP_INHOUSE")]
    IosAppInHouse,
    #[serde(rename = "MAC_APP_DEVELOPMENT")]
    MacAppDevelopment,
    #[serde(rename = "MAC_APP_STORE")]
    MacAppStore,
    #[serde(rename = "MAC_APP_DIRECT")]
    MacAppDirect,
    #[serde(rename = "TVOS_APP_DEVELOPMENT")]
    TvOsAppDevelopment,
    #[serde(rename = "TVOS_APP_STORE")]
    TvOsAppStore,
    #[serde(rename = "TVOS_APP_ADHOC")]
    TvOsAppAdHoc,
    #[serde(rename = "TVOS_APP_INHOUSE")]
    TvOsAppInHouse,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IosAppDevelopment => "IOS_APP_DEVELOPMENT",
            Self::IosAppStore => "IOS_APP_STORE",
            Self::IosAppAdHoc => "IOS_APP_ADHOC",
            Self::IosAppInHouse => "IOS_APP_INHOUSE",
            Self::MacAppDevelopment => "MAC_APP_DEVELOPMENT",
            Self::MacAppStore => "MAC_APP_STORE",
            Self::MacAppDirect => "MAC_APP_DIRECT",
            Self::TvOsAppDevelopment => "TVOS_APP_DEVELOPMENT",
            Self::TvOsAppStore => "TVOS_APP_STORE",
            Self::TvOsAppAdHoc => "TVOS_APP_ADHOC",
            Self::TvOsAppInHouse => "TVOS_APP_INHOUSE",
        }
    }

    /// The readable version of the profile type, e.g. `IOS_APP_STORE` => `app store`.
    pub fn readable_string(&self) -> &'static str {
        match self {
            Self::IosAppStore | Self::MacAppStore | Self::TvOsAppStore => "app store",
            Self::IosAppInHouse | Self::TvOsAppInHouse => "enterprise",
            Self::IosAppAdHoc | Self::TvOsAppAdHoc => "ad-hoc",
            Self::IosAppDevelopment | Self::MacAppDevelopment | Self::TvOsAppDevelopment => {
                "development"
            }
            Self::MacAppDirect => "development ID",
        }
    }
}

impl Display for ProfileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a portal timestamp.
///
/// The portal emits ISO 8601 with interchangeable UTC offset spellings
/// (`+07:00`, `+0700`, `+07`), which RFC 3339 parsing alone does not cover,
/// and some profile sources emit `2006-01-02 15:04:05 UTC`.
pub(crate) fn parse_portal_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S UTC") {
        return Ok(DateTime::from_utc(parsed, Utc));
    }

    Err(format!("unrecognized portal timestamp: {}", value))
}

fn deserialize_portal_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_portal_time(&value).map_err(serde::de::Error::custom)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    /// Base64 encoded CMS envelope holding the profile plist.
    #[serde(default)]
    pub profile_content: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub created_date: Option<String>,
    pub profile_state: ProfileState,
    pub profile_type: ProfileType,
    #[serde(deserialize_with = "deserialize_portal_time")]
    pub expiration_date: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRelationships {
    #[serde(default)]
    pub bundle_id: RelationshipLinks,
    #[serde(default)]
    pub certificates: RelationshipLinks,
    #[serde(default)]
    pub devices: RelationshipLinks,
}

/// A provisioning profile registered on the portal.
#[derive(Clone, Debug, Deserialize)]
pub struct Profile {
    pub attributes: ProfileAttributes,
    #[serde(default)]
    pub relationships: ProfileRelationships,
    pub id: String,
}

impl Identified for Profile {
    fn portal_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileResponse {
    pub data: Profile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileCreateRequestAttributes<'a> {
    name: &'a str,
    profile_type: ProfileType,
}

#[derive(Debug, Serialize)]
struct ProfileRelationshipData<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ProfileRelationshipSingle<'a> {
    data: ProfileRelationshipData<'a>,
}

#[derive(Debug, Serialize)]
struct ProfileRelationshipMany<'a> {
    data: Vec<ProfileRelationshipData<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileCreateRequestRelationships<'a> {
    bundle_id: ProfileRelationshipSingle<'a>,
    certificates: ProfileRelationshipMany<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    devices: Option<ProfileRelationshipMany<'a>>,
}

#[derive(Debug, Serialize)]
struct ProfileCreateRequestData<'a> {
    attributes: ProfileCreateRequestAttributes<'a>,
    relationships: ProfileCreateRequestRelationships<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ProfileCreateRequest<'a> {
    data: ProfileCreateRequestData<'a>,
}

impl AppStoreConnectClient {
    /// Fetch a single page of profiles.
    pub fn list_profiles(
        &self,
        filter_name: Option<&str>,
        filter_profile_type: Option<ProfileType>,
        options: &PageOptions,
    ) -> Result<PagedResponse<Profile>, AppleProvisioningError> {
        let mut filters = Vec::new();
        if let Some(name) = filter_name {
            filters.push(("filter[name]", name.to_string()));
        }
        if let Some(profile_type) = filter_profile_type {
            filters.push(("filter[profileType]", profile_type.as_str().to_string()));
        }

        self.get_paged(PROFILES_ENDPOINT, &filters, options)
    }

    /// Create a provisioning profile bound to a bundle ID, certificate set
    /// and (optionally) device set.
    pub fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &str,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile, AppleProvisioningError> {
        let certificates = ProfileRelationshipMany {
            data: certificate_ids
                .iter()
                .map(|id| ProfileRelationshipData {
                    id,
                    kind: "certificates",
                })
                .collect(),
        };

        let devices = if device_ids.is_empty() {
            None
        } else {
            Some(ProfileRelationshipMany {
                data: device_ids
                    .iter()
                    .map(|id| ProfileRelationshipData {
                        id,
                        kind: "devices",
                    })
                    .collect(),
            })
        };

        let request = ProfileCreateRequest {
            data: ProfileCreateRequestData {
                attributes: ProfileCreateRequestAttributes { name, profile_type },
                relationships: ProfileCreateRequestRelationships {
                    bundle_id: ProfileRelationshipSingle {
                        data: ProfileRelationshipData {
                            id: bundle_id,
                            kind: "bundleIds",
                        },
                    },
                    certificates,
                    devices,
                },
                kind: "profiles",
            },
        };

        let response: ProfileResponse = self.post(PROFILES_ENDPOINT, &request)?;
        Ok(response.data)
    }

    /// Delete a provisioning profile by its portal ID.
    pub fn delete_profile(&self, id: &str) -> Result<(), AppleProvisioningError> {
        self.delete(&format!("{}/{}", PROFILES_ENDPOINT, id))
    }

    /// Fetch a page of profiles pointed to by a relationship link.
    pub fn profiles_at(
        &self,
        relationship_link: &str,
        options: &PageOptions,
    ) -> Result<PagedResponse<Profile>, AppleProvisioningError> {
        self.get_url_paged(url::Url::parse(relationship_link)?, &[], options)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn portal_time_formats() {
        let expected = "2023-02-15T10:30:00Z";

        for value in [
            "2023-02-15T10:30:00Z",
            "2023-02-15T10:30:00+00:00",
            "2023-02-15T12:30:00+02:00",
            "2023-02-15T12:30:00.000+0200",
            "2023-02-15T12:30:00.000+02",
            "2023-02-15 10:30:00 UTC",
        ] {
            let parsed = parse_portal_time(value).unwrap();
            assert_eq!(parsed.to_rfc3339_opts(chrono::SecondsFormat::Secs, true), expected);
        }
    }

    #[test]
    fn unrecognized_portal_time_is_an_error() {
        assert!(parse_portal_time("February 15, 2023").is_err());
    }

    #[test]
    fn profile_create_request_omits_empty_device_relationship() {
        let request = ProfileCreateRequest {
            data: ProfileCreateRequestData {
                attributes: ProfileCreateRequestAttributes {
                    name: "Bitrise iOS development - (com.acme.app)",
                    profile_type: ProfileType::IosAppDevelopment,
                },
                relationships: ProfileCreateRequestRelationships {
                    bundle_id: ProfileRelationshipSingle {
                        data: ProfileRelationshipData {
                            id: "bundle-1",
                            kind: "bundleIds",
                        },
                    },
                    certificates: ProfileRelationshipMany {
                        data: vec![ProfileRelationshipData {
                            id: "cert-1",
                            kind: "certificates",
                        }],
                    },
                    devices: None,
                },
                kind: "profiles",
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json["data"]["relationships"].get("devices").is_none());
        assert_eq!(json["data"]["attributes"]["profileType"], "IOS_APP_DEVELOPMENT");
    }
}
