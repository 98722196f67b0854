//! vitte-cli/src/main.rs — point d'entrée du binaire `vitte`.
//!
//! Installe color-eyre puis délègue toute la logique à `vitte_cli::run()`.
//! `lib.rs` reste testable en isolation ; `main.rs` ne fait que le setup.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("impossible d'initialiser color-eyre: {e}");
    }

    if let Err(err) = vitte_cli::run() {
        eprintln!("erreur: {err:?}");
        std::process::exit(1);
    }
}
