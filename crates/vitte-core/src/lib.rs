//! vitte-core — cœur partagé de la VM Vitte.
//!
//! Ce crate ne connaît ni compilateur ni désassembleur : il fournit
//! uniquement ce que l'exécuteur (`vitte-vm`) a besoin de partager entre
//! threads et entre appels :
//!
//! - [`value`] : encodage NaN-boxé des valeurs (`Value`).
//! - [`image`] : décodeur du format d'image bytecode (en-tête, table de
//!   chaînes, table de fonctions).
//! - [`opcode`] : jeu d'opcodes (un octet), mnémoniques, constantes de
//!   limites partagées par le décodeur et l'interpréteur.
//!
//! ## Features
//! Aucune feature optionnelle : le format d'image est fixe (voir §4.1 de la
//! spécification) et ne dépend d'aucune sérialisation générique (pas de
//! serde/bincode ici — le wire format est un flux d'octets imposé).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod image;
pub mod limits;
pub mod opcode;
pub mod value;

pub use image::{FuncDef, Image};
pub use limits::*;
pub use opcode::Op;
pub use value::Value;

use thiserror::Error;

/// Erreurs du cœur (format d'image, décodage).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Impossible d'ouvrir ou de lire le fichier image.
    #[error("cannot read bytecode image {path}: {source}")]
    Io {
        /// Chemin du fichier demandé.
        path: String,
        /// Erreur d'I/O sous-jacente.
        #[source]
        source: std::io::Error,
    },

    /// Image tronquée ou mal formée (longueur annoncée hors bornes, etc.)
    #[error("malformed bytecode image: {0}")]
    Decode(String),
}

/// Alias de résultat du cœur.
pub type CoreResult<T> = Result<T, CoreError>;
