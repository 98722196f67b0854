//! frame.rs — enregistrement d'activation d'un appel (§4.3, §9).
//!
//! L'original relie les frames par un pointeur brut `prev`, formant une pile
//! chaînée. Ce crate les range dans un `Vec<CallFrame>` — le dernier élément
//! est la frame courante — ce qui donne la même sémantique de chaîne sans
//! pointeurs intrusifs.

use vitte_core::Value;

/// Capacité minimale des locales d'une frame, imposée dès la première
/// écriture (§9, "Frame locals growth").
const MIN_LOCALS_CAPACITY: usize = 16;

/// Un enregistrement d'activation : index de fonction, pointeur d'instruction,
/// locales, profondeur d'appel.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub func_index: u32,
    pub ip: usize,
    pub locals: Vec<Value>,
    pub depth: u32,
}

impl CallFrame {
    /// Crée la frame racine (profondeur 0, aucune locale).
    #[must_use]
    pub fn root(func_index: u32) -> Self {
        CallFrame {
            func_index,
            ip: 0,
            locals: Vec::new(),
            depth: 0,
        }
    }

    /// Crée une frame d'appel dont les locales initiales sont les arguments
    /// déjà dépilés par l'appelant, à la profondeur donnée.
    #[must_use]
    pub fn called(func_index: u32, args: Vec<Value>, depth: u32) -> Self {
        CallFrame {
            func_index,
            ip: 0,
            locals: args,
            depth,
        }
    }

    /// Garantit que `locals[index]` est adressable, en complétant par des
    /// zéros si besoin. Politique : prochaine puissance de deux ≥ `index+1`,
    /// minimum 16 (§4.3, `DEF_LOCAL`).
    pub fn ensure_local_slot(&mut self, index: u32) {
        let needed = (index as usize) + 1;
        if self.locals.len() >= needed {
            return;
        }
        let mut capacity = needed.next_power_of_two().max(MIN_LOCALS_CAPACITY);
        if capacity < needed {
            capacity = needed;
        }
        self.locals.resize(capacity, Value::from_f64(0.0));
    }
}
