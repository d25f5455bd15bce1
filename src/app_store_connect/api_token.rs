// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! App Store Connect API keys and bearer tokens.

use {
    crate::AppleProvisioningError,
    chrono::{DateTime, Duration, Utc},
    jsonwebtoken::{Algorithm, EncodingKey, Header},
    serde::{Deserialize, Serialize},
    std::path::Path,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConnectTokenClaims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
}

/// A signed bearer token for the App Store Connect API, together with the
/// wall clock time after which it must not be reused.
#[derive(Clone, Debug)]
pub struct AppStoreConnectToken {
    pub bearer: String,
    pub expires_at: DateTime<Utc>,
}

impl AppStoreConnectToken {
    /// Whether the token is still usable given a refresh safety margin.
    ///
    /// Tokens nearing expiration are reported unusable so a fresh one is
    /// minted before the portal starts rejecting requests over clock
    /// inaccuracies.
    pub fn is_usable(&self, margin: Duration) -> bool {
        Utc::now() + margin < self.expires_at
    }
}

/// Represents all metadata for an App Store Connect API Key.
///
/// This is a convenience type to aid in the generic representation of all the
/// components of an App Store Connect API Key. The type supports serialization
/// so the 3 pieces of the key can be saved and loaded as a single JSON payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnifiedApiKey {
    /// Who issued the key.
    ///
    /// Likely a UUID.
    issuer_id: String,

    /// Key identifier.
    ///
    /// An alphanumeric string like `DEADBEEF42`.
    key_id: String,

    /// Base64 encoded DER of ECDSA private key material.
    private_key: String,
}

impl UnifiedApiKey {
    /// Construct an instance from constituent parts and a PEM encoded ECDSA private key.
    ///
    /// This is what you want to use if importing a private key from the `.p8`
    /// file downloaded from the App Store Connect web interface.
    pub fn from_ecdsa_pem_path(
        issuer_id: impl ToString,
        key_id: impl ToString,
        path: impl AsRef<Path>,
    ) -> Result<Self, AppleProvisioningError> {
        let pem_data = std::fs::read(path.as_ref())?;

        let parsed = pem::parse(pem_data)
            .map_err(|e| AppleProvisioningError::ApiKey(format!("error parsing PEM: {}", e)))?;

        if parsed.tag != "PRIVATE KEY" {
            return Err(AppleProvisioningError::ApiKey(
                "does not look like a PRIVATE KEY".to_string(),
            ));
        }

        let private_key = base64::encode(parsed.contents);

        Ok(Self {
            issuer_id: issuer_id.to_string(),
            key_id: key_id.to_string(),
            private_key,
        })
    }

    /// Construct an instance from serialized JSON.
    pub fn from_json(data: impl AsRef<[u8]>) -> Result<Self, AppleProvisioningError> {
        Ok(serde_json::from_slice(data.as_ref())?)
    }

    /// Construct an instance from a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, AppleProvisioningError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_json(data)
    }

    /// Serialize this instance to a JSON object.
    pub fn to_json_string(&self) -> Result<String, AppleProvisioningError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }
}

impl TryFrom<UnifiedApiKey> for ConnectTokenEncoder {
    type Error = AppleProvisioningError;

    fn try_from(value: UnifiedApiKey) -> Result<Self, Self::Error> {
        let der = base64::decode(value.private_key).map_err(|e| {
            AppleProvisioningError::ApiKey(format!("failed to base64 decode private key: {}", e))
        })?;

        Self::from_ecdsa_der(value.key_id, value.issuer_id, &der)
    }
}

/// Represents a private key used to mint bearer tokens for App Store Connect.
///
/// App Store Connect API tokens/JWTs are derived from:
///
/// * A key identifier. This is a short alphanumeric string like `DEADBEEF42`.
/// * An issuer ID. This is likely a UUID.
/// * An ECDSA private key.
///
/// All of these are issued by Apple. You can log in to App Store Connect and
/// see/manage your keys at <https://appstoreconnect.apple.com/access/api>.
#[derive(Clone)]
pub struct ConnectTokenEncoder {
    key_id: String,
    issuer_id: String,
    encoding_key: EncodingKey,
}

impl ConnectTokenEncoder {
    /// Construct an instance from an [EncodingKey] instance.
    ///
    /// This is the lowest level API and ultimately what all constructors use.
    pub fn from_jwt_encoding_key(
        key_id: String,
        issuer_id: String,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            key_id,
            issuer_id,
            encoding_key,
        }
    }

    /// Construct an instance from a DER encoded ECDSA private key.
    pub fn from_ecdsa_der(
        key_id: String,
        issuer_id: String,
        der_data: &[u8],
    ) -> Result<Self, AppleProvisioningError> {
        let encoding_key = EncodingKey::from_ec_der(der_data);

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    /// Construct an instance from a PEM encoded ECDSA private key.
    pub fn from_ecdsa_pem(
        key_id: String,
        issuer_id: String,
        pem_data: &[u8],
    ) -> Result<Self, AppleProvisioningError> {
        let encoding_key = EncodingKey::from_ec_pem(pem_data)?;

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    /// Construct an instance from a PEM encoded ECDSA private key in a filesystem path.
    pub fn from_ecdsa_pem_path(
        key_id: String,
        issuer_id: String,
        path: impl AsRef<Path>,
    ) -> Result<Self, AppleProvisioningError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_ecdsa_pem(key_id, issuer_id, &data)
    }

    /// Attempt to construct an instance from an API Key ID.
    ///
    /// e.g. `DEADBEEF42`. This looks for an `AuthKey_<id>.p8` file in default
    /// search locations like `~/.appstoreconnect/private_keys`.
    pub fn from_api_key_id(
        key_id: String,
        issuer_id: String,
    ) -> Result<Self, AppleProvisioningError> {
        let mut search_paths = vec![std::env::current_dir()?.join("private_keys")];

        if let Some(home) = dirs::home_dir() {
            search_paths.extend([
                home.join("private_keys"),
                home.join(".private_keys"),
                home.join(".appstoreconnect").join("private_keys"),
            ]);
        }

        // AuthKey_<apiKey>.p8
        let filename = format!("AuthKey_{}.p8", key_id);

        for path in search_paths {
            let candidate = path.join(&filename);

            if candidate.exists() {
                return Self::from_ecdsa_pem_path(key_id, issuer_id, candidate);
            }
        }

        Err(AppleProvisioningError::ApiKeyNotFound)
    }

    /// Mint a new bearer token valid for the requested duration.
    ///
    /// `audience` is the `aud` claim the target portal host expects.
    pub fn new_token(
        &self,
        audience: &str,
        duration: Duration,
    ) -> Result<AppStoreConnectToken, AppleProvisioningError> {
        let header = Header {
            kid: Some(self.key_id.clone()),
            alg: Algorithm::ES256,
            ..Default::default()
        };

        let issued_at = Utc::now();
        let expires_at = issued_at + duration;

        let claims = ConnectTokenClaims {
            iss: self.issuer_id.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            aud: audience.to_string(),
        };

        let bearer = jsonwebtoken::encode(&header, &claims, &self.encoding_key)?;

        Ok(AppStoreConnectToken { bearer, expires_at })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_usability_window() {
        let token = AppStoreConnectToken {
            bearer: "token".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };

        assert!(token.is_usable(Duration::minutes(2)));
        assert!(!token.is_usable(Duration::minutes(11)));
    }

    #[test]
    fn unified_key_json_round_trip() {
        let key = UnifiedApiKey {
            issuer_id: "issuer".to_string(),
            key_id: "DEADBEEF42".to_string(),
            private_key: base64::encode(b"not really a key"),
        };

        let json = key.to_json_string().unwrap();
        let parsed = UnifiedApiKey::from_json(json.as_bytes()).unwrap();

        assert_eq!(parsed.key_id, "DEADBEEF42");
        assert_eq!(parsed.issuer_id, "issuer");
    }
}
