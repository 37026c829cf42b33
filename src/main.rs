// SPDX-License-Identifier: GPL-3.0-or-later

// CLI entrypoint for z80forge.

fn main() {
    std::process::exit(z80forge::assembler::cli::run());
}
