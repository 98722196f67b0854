//! limits.rs — constantes de capacité partagées par le décodeur et la VM.
//!
//! Ces valeurs sont des invariants de la spécification (§3), pas des options
//! de configuration : les dépasser est une erreur fatale, pas un warning.

/// Profondeur maximale de la pile d'opérandes d'une VM.
pub const MAX_STACK: usize = 1024;

/// Profondeur maximale de la chaîne de frames d'appel.
pub const MAX_CALL_DEPTH: u32 = 1024;

/// Nombre maximal de tâches (coroutines) actives avant que le parent ne
/// bloque sur un `join` pour faire de la place à un nouveau `SPAWN; CALL`.
pub const MAX_COROS: usize = 128;

/// Capacité par défaut d'un canal nouvellement créé par `MAKE_CHAN`.
pub const DEFAULT_CHAN_CAPACITY: usize = 128;

/// Facteur de croissance du tas déclenchant la prochaine collecte.
pub const GC_HEAP_GROW_FACTOR: f64 = 1.4;

/// Calcule la nouvelle capacité d'un tableau qui croît (listes, pile grise,
/// tas de l'index d'allocation…) : facteur 1.5, minimum 8.
pub const fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity + capacity / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_capacity_floor_is_eight() {
        assert_eq!(grow_capacity(0), 8);
        assert_eq!(grow_capacity(4), 8);
    }

    #[test]
    fn grow_capacity_scales_by_one_and_a_half() {
        assert_eq!(grow_capacity(8), 12);
        assert_eq!(grow_capacity(100), 150);
    }
}
