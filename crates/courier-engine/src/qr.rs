//! Local fallback for pairing payloads when no bridge is configured.

use tracing::info;

/// Surface the pairing payload on the operator's terminal. The payload is
/// the string a QR encoder would render; printing goes to stdout so it shows
/// regardless of the log filter.
pub fn render_to_terminal(qr: &str) {
    println!("+----------------------------------------------+");
    println!("| Pair this session: render the payload below  |");
    println!("| as a QR code and scan it from the phone app. |");
    println!("+----------------------------------------------+");
    println!("{qr}");
    info!("pairing payload printed to terminal");
}
