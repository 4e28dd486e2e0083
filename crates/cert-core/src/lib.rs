//! Client certificate material for authenticated call setup.
//!
//! The SIP server hands out client certificates in exchange for a
//! PKCS#10 certificate-signing request signed with an account-scoped RSA
//! key pair. This crate generates that key pair, produces the CSR,
//! decodes what the server returns, imports peer certificates, and
//! answers validity questions for the TLS layer. Everything else about
//! certificate provisioning lives with the transport.

pub mod error;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use tracing::{debug, info};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;
use ::time::{Duration, OffsetDateTime};

pub use error::{Error, Result};

/// Default RSA modulus size in bits, public exponent 65537.
///
/// The signer refuses moduli below 2048 bits, so there is no smaller
/// escape hatch for instrumented test runs.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Subject and issuer of the throwaway self-signed certificate.
const TEST_SUBJECT: &str = "test@test.com";

/// Lifetime of the throwaway self-signed certificate, in seconds.
const TEST_VALIDITY_SECS: i64 = 600;

/// An account-scoped RSA key pair used to sign certificate requests.
pub struct CertCrypto {
    /// PKCS#8 encoding of the private key. The signer is rebuilt from
    /// this on every operation; `rcgen::KeyPair` is consumed by the
    /// certificate builder.
    pkcs8_der: Vec<u8>,
}

impl CertCrypto {
    /// Generates a fresh key pair. This can take a while.
    pub fn generate() -> Result<Self> {
        info!("generating {}-bit RSA key pair, this might take a while...", DEFAULT_RSA_BITS);

        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, DEFAULT_RSA_BITS)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let pkcs8_der = private
            .to_pkcs8_der()
            .map_err(|e| Error::KeyEncoding(e.to_string()))?
            .as_bytes()
            .to_vec();

        // Fail now rather than at request time if the signer dislikes
        // the key.
        KeyPair::from_der(&pkcs8_der)?;

        info!("key pair generated");
        Ok(Self { pkcs8_der })
    }

    fn signer(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_der(&self.pkcs8_der)?)
    }

    fn request_params(&self, subject: &str) -> Result<CertificateParams> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, subject);

        let mut params = CertificateParams::default();
        params.alg = &rcgen::PKCS_RSA_SHA256;
        params.key_pair = Some(self.signer()?);
        params.distinguished_name = dn;
        Ok(params)
    }

    /// Builds a PKCS#10 certificate-signing request with `CN=<subject>`
    /// and returns it as base64-encoded DER.
    pub fn request(&self, subject: &str) -> Result<String> {
        let params = self.request_params(subject)?;
        let csr = rcgen::Certificate::from_params(params)?.serialize_request_der()?;
        debug!(subject, len = csr.len(), "signed certificate request");
        Ok(BASE64.encode(csr))
    }

    /// Decodes a server-signed client certificate issued for our CSR.
    pub fn decode(&self, base64: &str) -> Result<Certificate> {
        let der = BASE64.decode(base64).map_err(|_| Error::InvalidBase64)?;
        let length = der.len();

        // Must parse, otherwise the TLS layer has nothing to offer.
        X509Certificate::from_der(&der).map_err(|_| Error::InvalidCertificate)?;

        Ok(Certificate {
            der,
            own_key: true,
            length,
        })
    }

    /// Issues a self-signed certificate for the internal key pair.
    /// Only useful for test code; the subject is fixed and the validity
    /// window is ten minutes.
    pub fn test_certificate(&self) -> Result<Certificate> {
        let mut params = self.request_params(TEST_SUBJECT)?;
        params.serial_number = Some(SerialNumber::from(vec![1u8]));
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = params.not_before + Duration::seconds(TEST_VALIDITY_SECS);

        let der = rcgen::Certificate::from_params(params)?.serialize_der()?;
        let length = der.len();

        Ok(Certificate {
            der,
            own_key: true,
            length,
        })
    }
}

/// A decoded certificate.
///
/// Two flavors exist: certificates tied to our own key pair (issued by
/// the server from our CSR, or self-signed for tests) carry the full
/// DER artefact for the TLS layer; imported peer certificates only
/// answer public-key and validity questions.
pub struct Certificate {
    der: Vec<u8>,
    own_key: bool,
    length: usize,
}

impl Certificate {
    /// Imports a peer certificate from raw DER.
    pub fn import(raw: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(raw).map_err(|_| Error::InvalidCertificate)?;

        // Peer certificates are only consulted for their public key;
        // remember the modulus strength instead of the artefact size.
        let length = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => rsa.key_size() / 8,
            _ => cert.public_key().raw.len(),
        };

        Ok(Certificate {
            der: raw.to_vec(),
            own_key: false,
            length,
        })
    }

    /// Whether this certificate belongs to the account key pair.
    pub fn has_own_key(&self) -> bool {
        self.own_key
    }

    /// The DER artefact for certificates we can present ourselves.
    pub fn raw(&self) -> Option<&[u8]> {
        if self.own_key {
            Some(&self.der)
        } else {
            None
        }
    }

    /// DER length for own certificates, modulus length for imported
    /// peer certificates.
    pub fn raw_length(&self) -> usize {
        self.length
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key(&self) -> Option<Vec<u8>> {
        X509Certificate::from_der(&self.der)
            .ok()
            .map(|(_, cert)| cert.public_key().raw.to_vec())
    }

    /// Returns true when `now + offset` falls inside the validity
    /// window. A certificate whose validity cannot be determined counts
    /// as valid; if the server sent it, it presumably meant it.
    pub fn valid(&self, offset_secs: u32) -> bool {
        let parsed = match X509Certificate::from_der(&self.der) {
            Ok((_, cert)) => cert,
            Err(_) => return true,
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        match ASN1Time::from_timestamp(now + i64::from(offset_secs)) {
            Ok(at) => parsed.validity().is_valid_at(at),
            Err(_) => true,
        }
    }

    /// Seconds until `notAfter`, 0 when expired or undecodable.
    pub fn expires(&self) -> u64 {
        X509Certificate::from_der(&self.der)
            .ok()
            .and_then(|(_, cert)| cert.validity().time_to_expiration())
            .map(|d| d.whole_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}
