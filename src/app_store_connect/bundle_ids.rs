// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application identifier (bundle ID) resources.

use {
    super::{list_all, AppStoreConnectClient, Identified, PageOptions, PagedResponse},
    crate::AppleProvisioningError,
    serde::{Deserialize, Serialize},
};

const BUNDLE_IDS_ENDPOINT: &str = "bundleIds";

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BundleIdPlatform {
    #[serde(rename = "IOS")]
    Ios,
    #[serde(rename = "MAC_OS")]
    MacOs,
    #[serde(rename = "UNIVERSAL")]
    Universal,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub related: Option<String>,
    #[serde(default, rename = "self")]
    pub this: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelationshipLinks {
    #[serde(default)]
    pub links: Links,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdAttributes {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdRelationships {
    #[serde(default)]
    pub profiles: RelationshipLinks,
    #[serde(default, rename = "bundleIdCapabilities")]
    pub capabilities: RelationshipLinks,
}

/// A registered application identifier.
#[derive(Clone, Debug, Deserialize)]
pub struct BundleId {
    pub attributes: BundleIdAttributes,
    #[serde(default)]
    pub relationships: BundleIdRelationships,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Identified for BundleId {
    fn portal_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct BundleIdResponse {
    pub data: BundleId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleIdCreateRequestAttributes<'a> {
    identifier: &'a str,
    name: &'a str,
    platform: BundleIdPlatform,
}

#[derive(Debug, Serialize)]
struct BundleIdCreateRequestData<'a> {
    attributes: BundleIdCreateRequestAttributes<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct BundleIdCreateRequest<'a> {
    data: BundleIdCreateRequestData<'a>,
}

impl AppStoreConnectClient {
    /// Fetch a single page of bundle IDs matching an identifier filter.
    ///
    /// The identifier filter behaves like a `contains` search on the portal;
    /// callers needing an exact match must post-filter.
    pub fn list_bundle_ids(
        &self,
        filter_identifier: &str,
        options: &PageOptions,
    ) -> Result<PagedResponse<BundleId>, AppleProvisioningError> {
        let filters = vec![("filter[identifier]", filter_identifier.to_string())];

        self.get_paged(BUNDLE_IDS_ENDPOINT, &filters, options)
    }

    /// Fetch every bundle ID matching an identifier filter.
    pub fn list_all_bundle_ids(
        &self,
        filter_identifier: &str,
    ) -> Result<Vec<BundleId>, AppleProvisioningError> {
        list_all(BUNDLE_IDS_ENDPOINT, |options| {
            self.list_bundle_ids(filter_identifier, &options)
        })
    }

    /// Register a new application identifier.
    pub fn create_bundle_id(
        &self,
        identifier: &str,
        name: &str,
        platform: BundleIdPlatform,
    ) -> Result<BundleId, AppleProvisioningError> {
        let request = BundleIdCreateRequest {
            data: BundleIdCreateRequestData {
                attributes: BundleIdCreateRequestAttributes {
                    identifier,
                    name,
                    platform,
                },
                kind: "bundleIds",
            },
        };

        let response: BundleIdResponse = self.post(BUNDLE_IDS_ENDPOINT, &request)?;
        Ok(response.data)
    }

    /// Fetch the bundle ID pointed to by a relationship link.
    pub fn bundle_id_at(
        &self,
        relationship_link: &str,
    ) -> Result<BundleId, AppleProvisioningError> {
        let response: BundleIdResponse = self.get_url(url::Url::parse(relationship_link)?)?;
        Ok(response.data)
    }
}
