//! TLS material loading. All failures here are `TLS003` and fatal before
//! the listener accepts anything; the process never partially serves.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use aos_tree::HostError;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tracing::debug;

fn tls_error(context: String) -> HostError {
    HostError::new("TLS003", context)
}

/// Loads a PEM certificate chain and private key into a TLS acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, HostError> {
    let cert_file = File::open(cert_path).map_err(|err| {
        tls_error(format!("cannot open certificate {}: {err}", cert_path.display()))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            tls_error(format!("invalid certificate PEM {}: {err}", cert_path.display()))
        })?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = File::open(key_path).map_err(|err| {
        tls_error(format!("cannot open private key {}: {err}", key_path.display()))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|err| tls_error(format!("invalid private key PEM {}: {err}", key_path.display())))?
        .ok_or_else(|| tls_error(format!("no private key found in {}", key_path.display())))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| tls_error(format!("TLS configuration rejected: {err}")))?;

    debug!(cert = %cert_path.display(), key = %key_path.display(), "TLS material loaded");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::load_acceptor;

    #[test]
    fn missing_material_is_tls003() {
        let err = load_acceptor(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .err()
        .unwrap();
        assert_eq!(err.code, "TLS003");
    }

    #[test]
    fn non_pem_material_is_tls003() {
        let root = std::env::temp_dir().join(format!(
            "aos-server-tls-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        std::fs::create_dir_all(&root).unwrap();
        let cert = root.join("cert.pem");
        let key = root.join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = load_acceptor(&cert, &key).err().unwrap();
        assert_eq!(err.code, "TLS003");

        let _ = std::fs::remove_dir_all(root);
    }
}
