//! channel.rs — canal borné FIFO partagé entre tâches.
//!
//! Un seul mutex protège la file ; deux variables de condition séparent les
//! lecteurs des écrivains (§5, "Locking discipline") : `r_cond` est signalée
//! par l'émetteur et attendue par le récepteur, `w_cond` l'inverse. Les
//! réveils parasites sont tolérés : on boucle sur le prédicat.
//!
//! Le code d'origine dépile par la queue (`items[--length]`), ce qui rend le
//! canal LIFO — §4.7 prescrit explicitement FIFO ; ce module utilise donc une
//! `VecDeque` (`push_back`/`pop_front`) plutôt qu'une pile.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use vitte_core::Value;

/// État partagé d'un canal, détenu par un `Arc` entre toutes les tâches qui
/// en gardent une référence (portée par un objet `Chan` du tas).
#[derive(Debug)]
pub struct ChanShared {
    capacity: usize,
    queue: Mutex<VecDeque<Value>>,
    r_cond: Condvar,
    w_cond: Condvar,
}

impl ChanShared {
    /// Crée un canal de la capacité donnée.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        ChanShared {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(128))),
            r_cond: Condvar::new(),
            w_cond: Condvar::new(),
        }
    }

    /// Envoie une valeur ; bloque tant que le canal est plein.
    pub fn send(&self, value: Value) {
        let mut queue = self.queue.lock().expect("channel mutex poisoned");
        while queue.len() == self.capacity {
            queue = self.w_cond.wait(queue).expect("channel mutex poisoned");
        }
        queue.push_back(value);
        self.r_cond.notify_one();
    }

    /// Reçoit la prochaine valeur ; bloque tant que le canal est vide.
    pub fn recv(&self) -> Value {
        let mut queue = self.queue.lock().expect("channel mutex poisoned");
        while queue.is_empty() {
            queue = self.r_cond.wait(queue).expect("channel mutex poisoned");
        }
        let value = queue.pop_front().expect("predicate just checked non-empty");
        self.w_cond.notify_one();
        value
    }

    /// Longueur courante de la file (utilisé par les tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().expect("channel mutex poisoned").len()
    }

    /// Vrai si la file est vide (utilisé par les tests).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
