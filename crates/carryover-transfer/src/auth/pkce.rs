//! PKCE (RFC 7636) verifier/challenge generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

/// Length of the generated code verifier, in characters.
pub const CODE_VERIFIER_LENGTH: usize = 43;

/// The challenge method sent alongside the challenge.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// A code verifier and its S256 challenge.
///
/// Lives for exactly one authorization round trip: the challenge goes
/// out with the authorization URL, the verifier goes out verbatim with
/// the token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    code_verifier: String,
    code_challenge: String,
}

impl PkcePair {
    /// Builds a pair from an existing verifier.
    pub fn from_verifier(code_verifier: impl Into<String>) -> Self {
        let code_verifier = code_verifier.into();
        let code_challenge = PkceCodeGenerator::challenge_for(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }

    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

/// Generates PKCE pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PkceCodeGenerator;

impl PkceCodeGenerator {
    /// Generates a fresh pair from the thread-local CSPRNG.
    pub fn generate() -> PkcePair {
        PkcePair::from_verifier(Self::generate_verifier())
    }

    /// 43 characters drawn uniformly from `[A-Za-z0-9]`.
    fn generate_verifier() -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(CODE_VERIFIER_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Computes `base64url_nopad(sha256(verifier))`.
    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// Extra authorization parameters a provider's flow carries.
///
/// Empty for providers using a client secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthExtras {
    None,
    Pkce(PkcePair),
}

impl AuthExtras {
    /// Returns the PKCE pair, if any.
    pub fn pkce(&self) -> Option<&PkcePair> {
        match self {
            Self::None => None,
            Self::Pkce(pair) => Some(pair),
        }
    }
}
