use bitflags::bitflags;
use num_bigint::{BigInt, Sign};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::net::{InvalidSecret, SHARED_SECRET_LEN};

pub const VERIFICATION_TOKEN_LEN: usize = 4;
pub const DEFAULT_KEY_BITS: usize = 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AuthorizationStatus: u32 {
        const ENCRYPTION_ENABLED = 1 << 0;
        const PASSWORD_REQUIRED = 1 << 1;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("rsa failure: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("verification token mismatch")]
    TokenMismatch,
    #[error(transparent)]
    InvalidSecret(#[from] InvalidSecret),
    #[error("encryption is not enabled on this module")]
    EncryptionNotEnabled,
    #[error("wrong password")]
    WrongPassword,
    #[error("handshake step out of order")]
    OutOfOrder,
    #[error("empty display name")]
    EmptyName,
}

impl HandshakeError {
    /// Text shown to the client before it is dropped.
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::EncryptionNotEnabled => "Encryption not enabled!",
            HandshakeError::WrongPassword => "Password is wrong!",
            HandshakeError::EmptyName => "Invalid name!",
            _ => "Unable to authenticate.",
        }
    }
}

/// The server's RSA key pair with the public half pre-split for the wire.
pub struct ServerKeys {
    private: RsaPrivateKey,
    modulus: BigInt,
    exponent: BigInt,
}

impl ServerKeys {
    pub fn generate(bits: usize) -> Result<Self, HandshakeError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        Ok(Self::from_private(private))
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        let modulus = BigInt::from_bytes_be(Sign::Plus, &private.n().to_bytes_be());
        let exponent = BigInt::from_bytes_be(Sign::Plus, &private.e().to_bytes_be());
        Self {
            private,
            modulus,
            exponent,
        }
    }

    pub fn modulus(&self) -> &BigInt {
        &self.modulus
    }

    pub fn exponent(&self) -> &BigInt {
        &self.exponent
    }

    pub fn bits(&self) -> usize {
        self.private.size() * 8
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, sealed)?)
    }
}

/// Client half of the exchange: seals `data` under a public key received as
/// modulus and exponent.
pub fn seal_for(modulus: &BigInt, exponent: &BigInt, data: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let n = BigUint::from_bytes_be(&modulus.to_bytes_be().1);
    let e = BigUint::from_bytes_be(&exponent.to_bytes_be().1);
    let public = RsaPublicKey::new(n, e)?;
    Ok(public.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)?)
}

pub fn random_secret() -> [u8; SHARED_SECRET_LEN] {
    let mut secret = [0u8; SHARED_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Lowercase hex SHA-256 digest, the form passwords travel and rest in.
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    AwaitingName,
    AwaitingEncryptionResponse {
        token: [u8; VERIFICATION_TOKEN_LEN],
    },
    AwaitingPassword,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionRequest {
    pub modulus: BigInt,
    pub exponent: BigInt,
    pub token: [u8; VERIFICATION_TOKEN_LEN],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Greeting {
    pub status: AuthorizationStatus,
    pub encryption: Option<EncryptionRequest>,
}

/// Per-connection handshake. `Ready` is reachable only by walking the
/// states in order, so it is entered at most once.
#[derive(Debug)]
pub struct Negotiator {
    state: NegotiationState,
    encryption_required: bool,
    password_required: bool,
    name: Option<String>,
}

impl Negotiator {
    pub fn new(encryption_required: bool, password_required: bool) -> Self {
        Self {
            state: NegotiationState::AwaitingName,
            encryption_required,
            password_required,
            name: None,
        }
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == NegotiationState::Ready
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn status(&self) -> AuthorizationStatus {
        let mut status = AuthorizationStatus::empty();
        status.set(AuthorizationStatus::ENCRYPTION_ENABLED, self.encryption_required);
        status.set(AuthorizationStatus::PASSWORD_REQUIRED, self.password_required);
        status
    }

    /// Accepts the client's display name.
    pub fn begin(&mut self, name: &str, keys: &ServerKeys) -> Result<Greeting, HandshakeError> {
        if self.state != NegotiationState::AwaitingName {
            return Err(HandshakeError::OutOfOrder);
        }
        if name.trim().is_empty() {
            self.state = NegotiationState::Failed;
            return Err(HandshakeError::EmptyName);
        }
        self.name = Some(name.to_string());

        let encryption = if self.encryption_required {
            let mut token = [0u8; VERIFICATION_TOKEN_LEN];
            OsRng.fill_bytes(&mut token);
            self.state = NegotiationState::AwaitingEncryptionResponse { token };
            Some(EncryptionRequest {
                modulus: keys.modulus().clone(),
                exponent: keys.exponent().clone(),
                token,
            })
        } else {
            self.advance_past_encryption();
            None
        };
        Ok(Greeting {
            status: self.status(),
            encryption,
        })
    }

    /// Checks the sealed token and returns the shared secret to key the
    /// transport with.
    pub fn complete_encryption(
        &mut self,
        keys: &ServerKeys,
        sealed_secret: &[u8],
        sealed_token: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        let NegotiationState::AwaitingEncryptionResponse { token } = self.state else {
            return Err(if self.encryption_required {
                HandshakeError::OutOfOrder
            } else {
                HandshakeError::EncryptionNotEnabled
            });
        };
        let result = Self::unseal(keys, &token, sealed_secret, sealed_token);
        match result {
            Ok(_) => self.advance_past_encryption(),
            Err(_) => self.state = NegotiationState::Failed,
        }
        result
    }

    pub fn verify_password(&mut self, hash: &str, expected: &str) -> Result<(), HandshakeError> {
        if self.state != NegotiationState::AwaitingPassword {
            return Err(HandshakeError::OutOfOrder);
        }
        if !hash.eq_ignore_ascii_case(expected) {
            self.state = NegotiationState::Failed;
            return Err(HandshakeError::WrongPassword);
        }
        self.state = NegotiationState::Ready;
        Ok(())
    }

    fn unseal(
        keys: &ServerKeys,
        token: &[u8; VERIFICATION_TOKEN_LEN],
        sealed_secret: &[u8],
        sealed_token: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        let returned = keys.decrypt(sealed_token)?;
        if returned.as_slice() != token.as_slice() {
            return Err(HandshakeError::TokenMismatch);
        }
        let secret = keys.decrypt(sealed_secret)?;
        if secret.len() != SHARED_SECRET_LEN {
            return Err(InvalidSecret(secret.len()).into());
        }
        Ok(secret)
    }

    fn advance_past_encryption(&mut self) {
        self.state = if self.password_required {
            NegotiationState::AwaitingPassword
        } else {
            NegotiationState::Ready
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, OnceLock};

    use super::*;

    pub(crate) fn test_keys() -> Arc<ServerKeys> {
        static KEYS: OnceLock<Arc<ServerKeys>> = OnceLock::new();
        Arc::clone(KEYS.get_or_init(|| Arc::new(ServerKeys::generate(DEFAULT_KEY_BITS).unwrap())))
    }

    fn respond(request: &EncryptionRequest, token: &[u8], secret: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (
            seal_for(&request.modulus, &request.exponent, secret).unwrap(),
            seal_for(&request.modulus, &request.exponent, token).unwrap(),
        )
    }

    #[test]
    fn test_plain_handshake_is_ready_after_name() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(false, false);
        let greeting = negotiator.begin("Ash", &keys).unwrap();
        assert_eq!(greeting.status, AuthorizationStatus::empty());
        assert!(greeting.encryption.is_none());
        assert!(negotiator.is_ready());
        assert_eq!(negotiator.name(), Some("Ash"));
        assert!(matches!(
            negotiator.begin("Ash", &keys),
            Err(HandshakeError::OutOfOrder)
        ));
    }

    #[test]
    fn test_encrypted_handshake_returns_secret() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(true, false);
        let greeting = negotiator.begin("Ash", &keys).unwrap();
        assert!(greeting.status.contains(AuthorizationStatus::ENCRYPTION_ENABLED));
        let request = greeting.encryption.unwrap();
        assert!(!negotiator.is_ready());

        let secret = [9u8; SHARED_SECRET_LEN];
        let (sealed_secret, sealed_token) = respond(&request, &request.token, &secret);
        let unsealed = negotiator
            .complete_encryption(&keys, &sealed_secret, &sealed_token)
            .unwrap();
        assert_eq!(unsealed, secret);
        assert!(negotiator.is_ready());
    }

    #[test]
    fn test_altered_token_fails() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(true, false);
        let request = negotiator.begin("Ash", &keys).unwrap().encryption.unwrap();

        let mut token = request.token;
        token[2] ^= 0x01;
        let (sealed_secret, sealed_token) = respond(&request, &token, &[1u8; SHARED_SECRET_LEN]);
        let error = negotiator
            .complete_encryption(&keys, &sealed_secret, &sealed_token)
            .unwrap_err();
        assert!(matches!(error, HandshakeError::TokenMismatch));
        assert_eq!(error.reason(), "Unable to authenticate.");
        assert_eq!(negotiator.state(), &NegotiationState::Failed);
    }

    #[test]
    fn test_truncated_token_fails() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(true, false);
        let request = negotiator.begin("Ash", &keys).unwrap().encryption.unwrap();
        let (sealed_secret, sealed_token) =
            respond(&request, &request.token[..3], &[1u8; SHARED_SECRET_LEN]);
        assert!(matches!(
            negotiator.complete_encryption(&keys, &sealed_secret, &sealed_token),
            Err(HandshakeError::TokenMismatch)
        ));
    }

    #[test]
    fn test_encryption_response_without_encryption() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(false, false);
        negotiator.begin("Ash", &keys).unwrap();
        let error = negotiator.complete_encryption(&keys, &[], &[]).unwrap_err();
        assert_eq!(error.reason(), "Encryption not enabled!");
    }

    #[test]
    fn test_password_step() {
        let keys = test_keys();
        let expected = hash_password("hunter2");
        let mut negotiator = Negotiator::new(false, true);
        let greeting = negotiator.begin("admin", &keys).unwrap();
        assert!(greeting.status.contains(AuthorizationStatus::PASSWORD_REQUIRED));
        assert_eq!(negotiator.state(), &NegotiationState::AwaitingPassword);

        let mut wrong = Negotiator::new(false, true);
        wrong.begin("admin", &keys).unwrap();
        assert!(matches!(
            wrong.verify_password(&hash_password("nope"), &expected),
            Err(HandshakeError::WrongPassword)
        ));

        negotiator.verify_password(&expected.to_uppercase(), &expected).unwrap();
        assert!(negotiator.is_ready());
    }

    #[test]
    fn test_hash_password_is_hex_sha256() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let keys = test_keys();
        let mut negotiator = Negotiator::new(false, false);
        assert!(matches!(
            negotiator.begin("  ", &keys),
            Err(HandshakeError::EmptyName)
        ));
    }
}
