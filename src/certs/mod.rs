//! # Local Certificate Authority
//!
//! Hatch issues leaf certificates for project domains through the proxy
//! engine's internal issuer. The material it consumes is a two-tier local
//! PKI generated here: a self-signed root and an intermediate signed by it,
//! both ECDSA P-256 with ten-year validity. The intermediate is what the
//! proxy consumes, so the root can be rotated without re-trusting.

mod ca;

pub use ca::{
    generate_intermediate, generate_root, intermediate_exists, load, root_exists, CaMaterial,
};

use std::path::{Path, PathBuf};

pub const ROOT_CERT_FILE: &str = "rootCA.pem";
pub const ROOT_KEY_FILE: &str = "rootCA-key.pem";
pub const INTERMEDIATE_CERT_FILE: &str = "intermediateCA.pem";
pub const INTERMEDIATE_KEY_FILE: &str = "intermediateCA-key.pem";

pub const CA_COMMON_NAME: &str = "Hatch Local CA";
pub const INTERMEDIATE_COMMON_NAME: &str = "Hatch Local CA - Intermediate";
pub const CA_ORG: &str = "Hatch";
pub const CA_VALID_YEARS: i64 = 10;

/// File locations of the root and intermediate certificate/key PEMs.
#[derive(Debug, Clone)]
pub struct CaPaths {
    pub root_cert: PathBuf,
    pub root_key: PathBuf,
    pub intermediate_cert: PathBuf,
    pub intermediate_key: PathBuf,
}

impl CaPaths {
    /// CaPaths rooted in the given certs directory.
    pub fn new(certs_dir: &Path) -> Self {
        Self {
            root_cert: certs_dir.join(ROOT_CERT_FILE),
            root_key: certs_dir.join(ROOT_KEY_FILE),
            intermediate_cert: certs_dir.join(INTERMEDIATE_CERT_FILE),
            intermediate_key: certs_dir.join(INTERMEDIATE_KEY_FILE),
        }
    }
}
