//! vitte-cli/src/lib.rs — CLI pour la VM Vitte.
//!
//! Une seule responsabilité : charger une image bytecode déjà compilée et
//! l'exécuter jusqu'à terminaison (§6). Pas de compilateur ni de
//! désassembleur embarqués dans ce binaire — ce sont des outils séparés,
//! hors du périmètre de ce crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use vitte_core::Image;
use vitte_vm::Vm;

/// Point d'entrée du binaire (à appeler depuis `src/main.rs`).
///
/// Analyse les arguments via `try_parse` plutôt que `parse` : ce dernier
/// appelle `process::exit(2)` lui-même sur une erreur d'arguments, court-
/// circuitant le code de sortie 1 que `main.rs` applique à toute erreur
/// fatale (§6 : "exit code 0 on normal termination; 1 on argument error or
/// fatal runtime error"). `--help`/`--version` restent des sorties 0 (ce ne
/// sont pas des erreurs), toute autre erreur d'arguments sort en 1.
pub fn run() -> Result<()> {
    let cli = Cli::try_parse().unwrap_or_else(|e| exit_for_parse_error(e));
    init_tracing(cli.verbose, cli.trace_opcodes);

    let image = Image::load(&cli.image)
        .with_context(|| format!("chargement de l'image {}", cli.image.display()))?;
    info!(
        functions = image.function_count(),
        strings = image.string_count(),
        "image chargée"
    );

    Vm::run_image(Arc::new(image), cli.trace_opcodes)
        .with_context(|| format!("exécution de {}", cli.image.display()))?;

    Ok(())
}

/// Exécute une image bytecode Vitte (`.vitbc`).
#[derive(Parser, Debug)]
#[command(name = "vitte", version, about = "Vitte VM runner")]
struct Cli {
    /// Fichier image bytecode à exécuter.
    image: PathBuf,

    /// Augmente la verbosité des logs (`-v`, `-vv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Trace chaque opcode exécuté sur la sortie d'erreur (`tracing`, niveau TRACE).
    #[arg(long)]
    trace_opcodes: bool,
}

/// Affiche le message de `clap` puis quitte avec le code attendu par §6 :
/// 0 pour `--help`/`--version` (ce ne sont pas des erreurs), 1 sinon — jamais
/// le 2 par défaut de `clap::Error::exit()`.
fn exit_for_parse_error(err: clap::Error) -> ! {
    use clap::error::ErrorKind;
    let _ = err.print();
    let code = match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    };
    std::process::exit(code);
}

fn init_tracing(verbose: u8, trace_opcodes: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if trace_opcodes {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
