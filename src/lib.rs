// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Automatic provisioning of Apple code signing assets.
//!
//! This crate reconciles the code signing assets an Apple-platform build
//! needs - certificates, provisioning profiles, registered devices and
//! application identifiers with their capabilities - against the live state
//! held by Apple's Developer Portal (the App Store Connect API). Given a
//! declared desired state it ends up with exactly the assets required to
//! sign the build, creating or repairing them remotely when local and
//! remote state has drifted, while tolerating the portal being mutated
//! concurrently by other actors (such as parallel CI runs against the same
//! team).
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Talk to the App Store Connect API with short-lived ES256 bearer tokens
//!   minted from an API key, proactively refreshed before expiry. (See
//!   [AppStoreConnectClient] and [ConnectTokenEncoder].)
//! * Page through portal list endpoints via opaque cursors, with a bounded
//!   dual-sort fallback when the portal reports the cursor itself as
//!   corrupted mid-pagination.
//! * Match locally installed signing certificates to their portal
//!   counterparts by serial number and decide which certificate types a
//!   distribution requires. (See [select_certificates_and_distribution_types].)
//! * Mirror missing test devices onto the portal, comparing UDIDs case- and
//!   separator-insensitively. (See [ensure_test_devices].)
//! * Register application identifiers and keep their capabilities in sync
//!   with the project's entitlements. (See [Entitlements] and
//!   [ProfileClient::sync_bundle_id].)
//! * Find, validate and delete-and-recreate managed provisioning profiles
//!   idempotently, retrying a bounded number of times when a concurrent
//!   actor mutates the team's profiles mid-operation. (See
//!   [ensure_profiles].)
//!
//! The [CodesignAssetManager] composes all of the above behind a single
//! entry point, [CodesignAssetManager::ensure_codesign_assets].
//!
//! # What this crate does not do
//!
//! Producing archives, exporting IPAs, parsing Xcode projects and
//! performing the cryptographic signing itself are out of scope. Those
//! collaborators are consumed through narrow traits ([CertificateProvider],
//! [AssetWriter], [LocalAssetSource]) so the reconciliation logic stays
//! independent of any build system. Apple-ID (password based) portal access
//! is likewise represented only by the [DevPortalClient] seam: implement the
//! trait to plug in an alternative backend.

pub mod app_store_connect;
mod certificates;
pub use certificates::*;
mod client;
pub use client::*;
mod devices;
pub use devices::*;
mod entitlements;
pub use entitlements::*;
mod error;
pub use error::*;
mod manager;
pub use manager::*;
mod model;
pub use model::*;
mod profiles;
pub use profiles::*;

pub use app_store_connect::{
    api_token::{AppStoreConnectToken, ConnectTokenEncoder, UnifiedApiKey},
    AppStoreConnectClient, PortalEnvironment,
};
