//! Shared TLS client configuration.
//!
//! One builder serves both transports: the pooled HTTP clients (bulk
//! transfers, self probes, config fetch) get a configuration with ALPN
//! enabled, and the raw foreign-probe path gets one without, since it
//! speaks HTTP/1.1 by hand.

use crate::keylog::KeyLogWriter;
use std::sync::Arc;

/// Build a TLS client configuration.
///
/// `insecure` disables server certificate verification. `key_log`
/// installs the session-key writer. `enable_alpn` offers h2 and
/// http/1.1; leave it off for the hand-rolled HTTP/1.1 probe socket.
pub fn client_tls_config(
    insecure: bool,
    key_log: Option<Arc<KeyLogWriter>>,
    enable_alpn: bool,
) -> rustls::ClientConfig {
    let mut config = if insecure {
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(
            danger::NoCertificateVerification::new(
                rustls::crypto::ring::default_provider(),
            ),
        ))
        .with_no_client_auth()
    } else {
        let mut root_store = rustls::RootCertStore::empty();
        root_store
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(root_store)
        .with_no_client_auth()
    };

    if let Some(writer) = key_log {
        config.key_log = writer;
    }
    if enable_alpn {
        config.alpn_protocols =
            vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    }
    config
}

mod danger {
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{
        verify_tls12_signature, verify_tls13_signature, CryptoProvider,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate. Only installed when the user asks
    /// for --insecure-skip-verify.
    #[derive(Debug)]
    pub struct NoCertificateVerification(CryptoProvider);

    impl NoCertificateVerification {
        pub fn new(provider: CryptoProvider) -> Self {
            Self(provider)
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_configuration() {
        let with_alpn = client_tls_config(false, None, true);
        assert_eq!(
            with_alpn.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );

        let without_alpn = client_tls_config(false, None, false);
        assert!(without_alpn.alpn_protocols.is_empty());
    }

    #[test]
    fn test_insecure_config_builds() {
        let config = client_tls_config(true, None, true);
        assert_eq!(config.alpn_protocols.len(), 2);
    }
}
