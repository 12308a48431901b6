//! Out-of-band display of pairing artifacts.
//!
//! QR payloads are rendered as a terminal QR code on stderr; short numeric
//! pairing codes are printed as-is for entry on the phone.

use qrcode::QrCode;
use tracing::{info, warn};

use super::events::PairingArtifact;
use super::WhatsAppError;

/// Longest payload treated as a typed pairing code rather than a QR payload.
const MAX_PAIRING_CODE_LEN: usize = 9;

/// Whether the artifact is a short code to type in, not a QR payload.
pub fn is_typed_code(artifact: &PairingArtifact) -> bool {
    artifact.code.len() <= MAX_PAIRING_CODE_LEN
        && artifact.code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Render a QR payload as a block of terminal characters.
///
/// # Errors
///
/// Returns [`WhatsAppError::Pairing`] if the payload does not fit in a QR code.
pub fn render_qr(code: &str) -> Result<String, WhatsAppError> {
    let qr = QrCode::new(code.as_bytes()).map_err(|e| WhatsAppError::Pairing(e.to_string()))?;
    Ok(qr
        .render::<char>()
        .quiet_zone(false)
        .module_dimensions(2, 1)
        .build())
}

/// Show the artifact to the operator on stderr.
pub fn display(artifact: &PairingArtifact) {
    if is_typed_code(artifact) {
        info!("pairing code received");
        eprintln!("\nWhatsApp pairing code: {}\nEnter it under Linked devices on the phone.\n", artifact.code);
        return;
    }

    info!("pairing QR code received");
    match render_qr(&artifact.code) {
        Ok(rendered) => eprintln!("\nScan with WhatsApp > Linked devices:\n\n{rendered}\n"),
        Err(e) => {
            warn!(error = %e, "failed to render pairing QR code");
            eprintln!("\nRaw pairing payload: {}\n", artifact.code);
        }
    }
}
