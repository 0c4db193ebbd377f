//! Dial credentials
//!
//! Key material is held in [`Zeroizing`] buffers and never printed.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::TransportError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const PRIVATE_KEY_SUFFIX: &str = "PRIVATE KEY";

/// Parse every block in `data`, requiring at least one and that each tag passes `tag_ok`
fn require_pem(
    kind: &str,
    data: &str,
    tag_ok: impl Fn(&str) -> bool,
) -> Result<(), TransportError> {
    let blocks = ::pem::parse_many(data.as_bytes())
        .map_err(|e| TransportError::Credentials(format!("{} is not valid PEM: {}", kind, e)))?;
    if blocks.is_empty() {
        return Err(TransportError::Credentials(format!("{} is not PEM encoded", kind)));
    }
    match blocks.iter().find(|block| !tag_ok(block.tag())) {
        Some(block) => Err(TransportError::Credentials(format!(
            "{} has unexpected PEM block {:?}",
            kind,
            block.tag()
        ))),
        None => Ok(()),
    }
}

fn is_certificate(tag: &str) -> bool {
    tag == CERTIFICATE_TAG
}

fn is_private_key(tag: &str) -> bool {
    tag.ends_with(PRIVATE_KEY_SUFFIX)
}

/// Client TLS identity plus the roots used to verify the server
#[derive(Clone)]
pub struct TlsCredentials {
    /// Client certificate chain PEM
    pub cert_pem: String,
    /// Client private key PEM (zeroized on drop)
    pub key_pem: Zeroizing<String>,
    /// Cluster CA certificates PEM
    pub ca_pem: String,
}

impl TlsCredentials {
    /// Build credentials, checking each part parses as PEM with the expected block type
    pub fn from_pem(
        cert_pem: impl Into<String>,
        key_pem: Zeroizing<String>,
        ca_pem: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let creds = Self {
            cert_pem: cert_pem.into(),
            key_pem,
            ca_pem: ca_pem.into(),
        };
        require_pem("certificate", &creds.cert_pem, is_certificate)?;
        require_pem("private key", &creds.key_pem, is_private_key)?;
        require_pem("CA bundle", &creds.ca_pem, is_certificate)?;
        Ok(creds)
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("cert_pem", &format_args!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("<{} bytes>", self.ca_pem.len()))
            .finish()
    }
}

/// SSH client credentials for the reverse-tunnel path
#[derive(Clone)]
pub struct SshCredentials {
    /// Principal presented to the proxy
    pub user: String,
    /// Private key PEM (zeroized on drop)
    pub private_key_pem: Zeroizing<String>,
    /// SSH certificate for the key, in authorized_keys format
    pub certificate: String,
    /// Host CA keys trusted when verifying the proxy
    pub host_ca_keys: Vec<String>,
}

impl SshCredentials {
    /// Build credentials, checking the key parses as a PEM private key
    pub fn new(
        user: impl Into<String>,
        private_key_pem: Zeroizing<String>,
        certificate: impl Into<String>,
        host_ca_keys: Vec<String>,
    ) -> Result<Self, TransportError> {
        require_pem("SSH private key", &private_key_pem, is_private_key)?;
        Ok(Self {
            user: user.into(),
            private_key_pem,
            certificate: certificate.into(),
            host_ca_keys,
        })
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("private_key_pem", &"<redacted>")
            .field("host_ca_keys", &self.host_ca_keys.len())
            .finish()
    }
}
