//! Banner printing.

use clipbridge_core::Mode;

/// Print the application banner with the mode we start in.
pub fn print_banner(mode: Mode) {
    let role = match mode {
        Mode::Server => "server",
        Mode::Client => "client",
    };
    println!("\n\x1b[1;36m╔══════════════════════════════════════╗\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m         \x1b[1mClipbridge\x1b[0m ({:<6})          \x1b[1;36m║\x1b[0m", role);
    println!("\x1b[1;36m║\x1b[0m   Clipboard sync between machines    \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m╚══════════════════════════════════════╝\x1b[0m\n");
}
