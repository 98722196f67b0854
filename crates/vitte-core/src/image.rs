//! image.rs — décodeur du format d'image bytecode.
//!
//! ```text
//! u32  start_function_index
//! u32  string_count
//! repeated string_count times:
//!      u32 length
//!      length bytes (raw, pas de nul-terminator)
//! u32  function_count
//! repeated function_count times:
//!      u32 code_length
//!      code_length bytes
//! ```
//!
//! Tous les entiers sont little-endian. Pas de checksum, pas de numéro de
//! version : un fichier tronqué ou mal formé produit une [`CoreError::Decode`],
//! jamais un panic.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::CoreError;

/// Emplacement d'une fonction dans le buffer de l'image : un offset et une
/// longueur, plutôt qu'un pointeur brut, pour permettre un découpage
/// zero-copy via [`Image::function_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncDef {
    offset: usize,
    length: usize,
}

impl FuncDef {
    /// Longueur du code de cette fonction, en octets.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Vrai si la fonction n'a aucun octet de code.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Image bytecode décodée : index de la fonction de démarrage, table de
/// chaînes, table de fonctions, et le buffer brut dont les deux tables
/// empruntent des tranches (zero-copy).
#[derive(Debug)]
pub struct Image {
    buf: Arc<Vec<u8>>,
    start_function_index: u32,
    string_ranges: Vec<(usize, usize)>,
    funcs: Vec<FuncDef>,
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, CoreError> {
    let end = *pos + 4;
    let slice = buf
        .get(*pos..end)
        .ok_or_else(|| CoreError::Decode(format!("truncated u32 at offset {}", *pos)))?;
    *pos = end;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

impl Image {
    /// Charge et décode une image bytecode depuis un fichier.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(bytes = bytes.len(), path = %path.display(), "loaded bytecode image file");
        Self::decode(bytes)
    }

    /// Décode une image déjà chargée en mémoire.
    pub fn decode(buf: Vec<u8>) -> Result<Self, CoreError> {
        let mut pos = 0usize;

        let start_function_index = read_u32(&buf, &mut pos)?;

        let string_count = read_u32(&buf, &mut pos)?;
        let mut string_ranges = Vec::with_capacity(string_count as usize);
        for _ in 0..string_count {
            let len = read_u32(&buf, &mut pos)? as usize;
            let end = pos + len;
            if end > buf.len() {
                return Err(CoreError::Decode(format!(
                    "string table entry at offset {pos} claims length {len} past end of image"
                )));
            }
            string_ranges.push((pos, end));
            pos = end;
        }

        let function_count = read_u32(&buf, &mut pos)?;
        let mut funcs = Vec::with_capacity(function_count as usize);
        for _ in 0..function_count {
            let len = read_u32(&buf, &mut pos)? as usize;
            let end = pos + len;
            if end > buf.len() {
                return Err(CoreError::Decode(format!(
                    "function code blob at offset {pos} claims length {len} past end of image"
                )));
            }
            funcs.push(FuncDef {
                offset: pos,
                length: len,
            });
            pos = end;
        }

        if (start_function_index as usize) >= funcs.len() {
            return Err(CoreError::Decode(format!(
                "start function index {start_function_index} out of range ({} functions)",
                funcs.len()
            )));
        }

        debug!(
            strings = string_ranges.len(),
            functions = funcs.len(),
            start = start_function_index,
            "decoded bytecode image"
        );

        Ok(Image {
            buf: Arc::new(buf),
            start_function_index,
            string_ranges,
            funcs,
        })
    }

    /// Index de la fonction de démarrage.
    #[must_use]
    pub const fn start_function_index(&self) -> u32 {
        self.start_function_index
    }

    /// Nombre de fonctions dans l'image.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.funcs.len()
    }

    /// Nombre d'entrées de la table de chaînes.
    #[must_use]
    pub fn string_count(&self) -> usize {
        self.string_ranges.len()
    }

    /// Métadonnées (offset/longueur) d'une fonction par son index.
    #[must_use]
    pub fn func_def(&self, index: u32) -> Option<FuncDef> {
        self.funcs.get(index as usize).copied()
    }

    /// Tranche de code (zero-copy) d'une fonction par son index.
    #[must_use]
    pub fn function_code(&self, index: u32) -> Option<&[u8]> {
        let def = self.funcs.get(index as usize)?;
        Some(&self.buf[def.offset..def.offset + def.length])
    }

    /// Chaîne de la table de chaînes par son index, telle quelle (pas de
    /// validation UTF-8 — l'image peut contenir des octets arbitraires, la
    /// conversion est à la charge de l'appelant au moment de la matérialiser
    /// en objet `String`).
    #[must_use]
    pub fn string_bytes(&self, index: u32) -> Option<&[u8]> {
        let (start, end) = *self.string_ranges.get(index as usize)?;
        Some(&self.buf[start..end])
    }
}
