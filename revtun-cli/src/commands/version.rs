//! Version subcommand implementation

use revtun::protocol::constants::PROTOCOL_VERSION;

pub fn run() {
    println!("revtun {}", env!("CARGO_PKG_VERSION"));
    println!("protocol version: {PROTOCOL_VERSION:#04x}");

    #[cfg(target_os = "linux")]
    println!("target: linux");
    #[cfg(target_os = "macos")]
    println!("target: macos");
    #[cfg(target_os = "windows")]
    println!("target: windows");
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    println!("target: unknown");
}
