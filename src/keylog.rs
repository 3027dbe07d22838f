//! NSS-format SSL key logging.
//!
//! The writer is shared across every TLS session the test opens, so the
//! file handle sits behind a mutex. Lines follow the SSLKEYLOGFILE
//! convention: `<label> <client_random_hex> <secret_hex>`.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug)]
pub struct KeyLogWriter {
    file: Mutex<File>,
}

impl KeyLogWriter {
    /// Open (or create) the key-log file for appending.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self { file: Mutex::new(file) })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

impl rustls::KeyLog for KeyLogWriter {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format!(
            "{} {} {}\n",
            label,
            hex_encode(client_random),
            hex_encode(secret)
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn will_log(&self, _label: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::KeyLog;

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x0a]), "00ff0a");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_key_log_lines() {
        let path = std::env::temp_dir()
            .join(format!("netquality-keylog-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let writer = KeyLogWriter::create(&path).unwrap();
        writer.log("CLIENT_RANDOM", &[0xab, 0xcd], &[0x01, 0x02]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "CLIENT_RANDOM abcd 0102\n");

        let _ = std::fs::remove_file(&path);
    }
}
