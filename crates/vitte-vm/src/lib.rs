//! vitte-vm — moteur d'exécution de la VM Vitte.
//!
//! Ce crate assemble le tas ([`heap`]), le collecteur ([`gc`]), les canaux
//! ([`channel`]), les frames d'appel ([`frame`]), la table de fonctions
//! natives ([`native`]), le runtime de tâches ([`task`]) et la boucle de
//! dispatch ([`interp`]) autour du format d'image et de l'encodage des
//! valeurs fournis par `vitte-core`.
//!
//! Un compilateur, un désassembleur ne font pas partie de ce crate : il
//! consomme une image déjà compilée et l'exécute jusqu'à sa terminaison.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod channel;
pub mod frame;
pub mod gc;
pub mod heap;
pub mod interp;
pub mod native;
pub mod task;

pub use channel::ChanShared;
pub use frame::CallFrame;
pub use heap::{Heap, ObjData, StrData};
pub use interp::Vm;

use std::io::Write;

use thiserror::Error;

/// Environnement hôte pour les sorties `PRINT`/`print` natif (§4.9, §6).
///
/// Une tâche est un thread OS (§5) : contrairement à l'hôte mono-thread du
/// teacher (`Box<dyn Host>`), celui-ci doit pouvoir être partagé entre la VM
/// racine et toutes les tâches qu'elle engendre, d'où `Send` et son partage
/// via `Arc<Mutex<dyn Host>>` plutôt qu'un `Box` possédé par une seule VM.
pub trait Host: Send + 'static {
    /// Émet du texte (sans saut de ligne implicite ajouté par le runtime).
    fn print(&mut self, s: &str);
}

/// Hôte par défaut : écrit sur la sortie standard du process, sans saut de
/// ligne implicite — `original_source/sahl.c`'s `handle_print` commente
/// explicitement son propre `putchar('\n')` comme désactivé.
#[derive(Default)]
pub struct DefaultHost;

impl Host for DefaultHost {
    fn print(&mut self, s: &str) {
        print!("{s}");
        let _ = std::io::stdout().flush();
    }
}

/// Erreurs fatales de l'exécution (§7) : toutes terminent le process
/// (y compris les threads de tâches enfants), conformément à la spec — il
/// n'existe pas de mécanisme d'exception au niveau du langage.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow (max {max})")]
    StackOverflow { max: usize },

    #[error("maximum call depth exceeded ({max})")]
    CallDepthExceeded { max: u32 },

    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: u64, length: u64 },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown opcode byte {0}")]
    UnknownOpcode(u8),

    #[error("function index {0} out of range")]
    UnknownFunction(u32),

    #[error("native function index {0} out of range")]
    UnknownNative(u32),

    #[error("native function {name} expected at least {expected} argument(s), got {got}")]
    NativeArity {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Core(#[from] vitte_core::CoreError),
}

/// Alias de résultat du moteur d'exécution.
pub type VmResult<T> = Result<T, VmError>;
