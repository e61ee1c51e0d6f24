//! Root and intermediate CA generation, loading and presence checks.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use time::{Duration, OffsetDateTime};

use crate::errors::{Error, Result};

use super::{CaPaths, CA_COMMON_NAME, CA_ORG, CA_VALID_YEARS, INTERMEDIATE_COMMON_NAME};

/// PEM material for the two-tier PKI, as handed to the proxy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaMaterial {
    pub root_cert: String,
    pub root_key: String,
    pub intermediate_cert: String,
    pub intermediate_key: String,
}

/// Generate the self-signed root CA and write its certificate (0644) and
/// private key (0600) as PEM files, creating parent directories as needed.
pub fn generate_root(paths: &CaPaths) -> Result<()> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::certs(format!("generating root CA key: {}", e)))?;

    let params = ca_params(CA_COMMON_NAME, BasicConstraints::Constrained(1));
    let cert = params
        .self_signed(&key)
        .map_err(|e| Error::certs(format!("creating root CA certificate: {}", e)))?;

    write_pem(&paths.root_cert, &cert.pem(), 0o644)?;
    write_pem(&paths.root_key, &key.serialize_pem(), 0o600)?;
    Ok(())
}

/// Generate the intermediate CA, signed by the root on disk. Fails when the
/// root material is missing.
pub fn generate_intermediate(paths: &CaPaths) -> Result<()> {
    if !root_exists(paths) {
        return Err(Error::certs(format!(
            "root CA not found at {}; generate it first",
            paths.root_cert.display()
        )));
    }

    let root_cert_pem = fs::read_to_string(&paths.root_cert)?;
    let root_key_pem = fs::read_to_string(&paths.root_key)?;
    let root_key = KeyPair::from_pem(&root_key_pem)
        .map_err(|e| Error::certs(format!("parsing root CA key: {}", e)))?;

    // Reconstitute the issuer from the on-disk certificate so the
    // intermediate's issuer name and authority key id match it.
    let issuer_params = CertificateParams::from_ca_cert_pem(&root_cert_pem)
        .map_err(|e| Error::certs(format!("parsing root CA certificate: {}", e)))?;
    let issuer = issuer_params
        .self_signed(&root_key)
        .map_err(|e| Error::certs(format!("reconstructing root CA issuer: {}", e)))?;

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| Error::certs(format!("generating intermediate CA key: {}", e)))?;

    let params = ca_params(INTERMEDIATE_COMMON_NAME, BasicConstraints::Constrained(0));
    let cert = params
        .signed_by(&key, &issuer, &root_key)
        .map_err(|e| Error::certs(format!("creating intermediate CA certificate: {}", e)))?;

    write_pem(&paths.intermediate_cert, &cert.pem(), 0o644)?;
    write_pem(&paths.intermediate_key, &key.serialize_pem(), 0o600)?;
    Ok(())
}

/// Read all four PEM files and verify each parses as certificate or
/// private-key material.
pub fn load(paths: &CaPaths) -> Result<CaMaterial> {
    let material = CaMaterial {
        root_cert: read_pem(&paths.root_cert)?,
        root_key: read_pem(&paths.root_key)?,
        intermediate_cert: read_pem(&paths.intermediate_cert)?,
        intermediate_key: read_pem(&paths.intermediate_key)?,
    };

    for (pem, path) in [
        (&material.root_cert, &paths.root_cert),
        (&material.intermediate_cert, &paths.intermediate_cert),
    ] {
        CertificateDer::from_pem_slice(pem.as_bytes())
            .map_err(|e| Error::certs(format!("parsing {}: {:?}", path.display(), e)))?;
    }
    for (pem, path) in [
        (&material.root_key, &paths.root_key),
        (&material.intermediate_key, &paths.intermediate_key),
    ] {
        PrivateKeyDer::from_pem_slice(pem.as_bytes())
            .map_err(|e| Error::certs(format!("parsing {}: {:?}", path.display(), e)))?;
    }

    Ok(material)
}

/// Whether both root CA files exist.
pub fn root_exists(paths: &CaPaths) -> bool {
    paths.root_cert.exists() && paths.root_key.exists()
}

/// Whether both intermediate CA files exist.
pub fn intermediate_exists(paths: &CaPaths) -> bool {
    paths.intermediate_cert.exists() && paths.intermediate_key.exists()
}

fn ca_params(common_name: &str, constraints: BasicConstraints) -> CertificateParams {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, CA_ORG);

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(constraints);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = params.not_before + Duration::days(365 * CA_VALID_YEARS);
    params
}

fn write_pem(path: &Path, pem: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::certs(format!("creating directory for {}: {}", path.display(), e)))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| Error::certs(format!("creating {}: {}", path.display(), e)))?;
    file.write_all(pem.as_bytes())
        .map_err(|e| Error::certs(format!("writing {}: {}", path.display(), e)))?;
    Ok(())
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::certs(format!("reading {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;

    fn temp_paths() -> (TempDir, CaPaths) {
        let dir = TempDir::new().unwrap();
        let paths = CaPaths::new(&dir.path().join("certs"));
        (dir, paths)
    }

    #[test]
    fn test_generate_root_writes_both_files() {
        let (_dir, paths) = temp_paths();
        assert!(!root_exists(&paths));

        generate_root(&paths).unwrap();

        assert!(root_exists(&paths));
        let cert = fs::read_to_string(&paths.root_cert).unwrap();
        assert!(cert.contains("BEGIN CERTIFICATE"));
        let key = fs::read_to_string(&paths.root_key).unwrap();
        assert!(key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_key_file_is_private() {
        let (_dir, paths) = temp_paths();
        generate_root(&paths).unwrap();

        let mode = fs::metadata(&paths.root_key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let cert_mode = fs::metadata(&paths.root_cert).unwrap().permissions().mode();
        assert_eq!(cert_mode & 0o777, 0o644);
    }

    #[test]
    fn test_intermediate_requires_root() {
        let (_dir, paths) = temp_paths();
        let err = generate_intermediate(&paths).unwrap_err();
        assert!(err.to_string().contains("root CA not found"));
    }

    #[test]
    fn test_full_chain_generates_and_loads() {
        let (_dir, paths) = temp_paths();
        generate_root(&paths).unwrap();
        generate_intermediate(&paths).unwrap();
        assert!(intermediate_exists(&paths));

        let material = load(&paths).unwrap();
        assert!(material.root_cert.contains("BEGIN CERTIFICATE"));
        assert!(material.intermediate_cert.contains("BEGIN CERTIFICATE"));
        assert_ne!(material.root_cert, material.intermediate_cert);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let (_dir, paths) = temp_paths();
        generate_root(&paths).unwrap();
        generate_intermediate(&paths).unwrap();
        fs::write(&paths.intermediate_cert, "not a pem").unwrap();

        assert!(load(&paths).is_err());
    }
}
