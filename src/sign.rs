//! The detached-signature envelope.
//!
//! Records are signed by an external tool over their canonical serialization
//! with the signature field blanked to a fixed placeholder; see
//! [`crate::records::sign_record`]. This module supplies the tool boundary:
//! a [`Signer`] trait, a gpg-backed implementation, and an in-process fake
//! for tests.
//!
//! Verification failures are reported, never fatal for reads: a record with
//! a bad signature is still present, and tooling should warn the reviewer
//! rather than silently drop it.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::errors::ReviewError;

/// Computes and checks armored detached signatures.
pub trait Signer {
    /// Produce an armored detached signature over `payload`.
    fn sign(&self, payload: &[u8]) -> Result<String, ReviewError>;

    /// Check `signature` against `payload`. `Ok(false)` means the signature
    /// is well-formed but does not verify.
    fn verify(&self, payload: &[u8], signature: &str) -> Result<bool, ReviewError>;
}

/// Signs with the `gpg` binary and the configured key.
pub struct GpgSigner {
    key_id: String,
    program: String,
}

impl GpgSigner {
    pub fn new(key_id: &str) -> GpgSigner {
        GpgSigner {
            key_id: key_id.to_string(),
            program: "gpg".to_string(),
        }
    }

    /// Use a different gpg-compatible program (e.g. `gpg2`).
    pub fn with_program(mut self, program: &str) -> GpgSigner {
        self.program = program.to_string();
        self
    }
}

impl Signer for GpgSigner {
    fn sign(&self, payload: &[u8]) -> Result<String, ReviewError> {
        let mut child = Command::new(&self.program)
            .args(["--detach-sign", "--armor", "--local-user", &self.key_id])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .ok_or_else(|| ReviewError::Signature("gpg stdin unavailable".to_string()))?
            .write_all(payload)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ReviewError::Signature(format!(
                "gpg --detach-sign failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn verify(&self, payload: &[u8], signature: &str) -> Result<bool, ReviewError> {
        // gpg --verify wants the signature in a file and the payload on stdin.
        let mut sig_file = tempfile::NamedTempFile::new()?;
        sig_file.write_all(signature.as_bytes())?;
        sig_file.flush()?;

        let mut child = Command::new(&self.program)
            .arg("--verify")
            .arg(sig_file.path())
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .ok_or_else(|| ReviewError::Signature("gpg stdin unavailable".to_string()))?
            .write_all(payload)?;
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(true)
        } else {
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "signature did not verify"
            );
            Ok(false)
        }
    }
}

/// In-process signer for tests: the "signature" is a stable digest of the
/// payload, so tampering is detectable without any external tooling.
pub mod test_signer {
    use sha1::{Digest, Sha1};

    use super::Signer;
    use crate::errors::ReviewError;

    pub struct EchoSigner;

    impl Signer for EchoSigner {
        fn sign(&self, payload: &[u8]) -> Result<String, ReviewError> {
            Ok(format!("echo:{}", hex::encode(Sha1::digest(payload))))
        }

        fn verify(&self, payload: &[u8], signature: &str) -> Result<bool, ReviewError> {
            Ok(signature == self.sign(payload)?)
        }
    }

    /// A signer that always fails, for exercising the fatal-signing path.
    pub struct BrokenSigner;

    impl Signer for BrokenSigner {
        fn sign(&self, _payload: &[u8]) -> Result<String, ReviewError> {
            Err(ReviewError::Signature("signing tool unavailable".to_string()))
        }

        fn verify(&self, _payload: &[u8], _signature: &str) -> Result<bool, ReviewError> {
            Err(ReviewError::Signature("signing tool unavailable".to_string()))
        }
    }
}
