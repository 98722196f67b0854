//! heap.rs — modèle d'objets du tas et arène d'allocation.
//!
//! Le format original relie les objets vivants d'une VM par une liste
//! intrusive de pointeurs bruts (`Obj::next`). Ce crate interdit `unsafe`
//! (voir le lint d'espace de travail), donc l'arène ci-dessous joue le même
//! rôle avec un slab sûr : un `Vec<Option<Slot>>` indexé par un entier 32
//! bits, plus une liste de trous réutilisables. Cet entier est exactement ce
//! que la valeur NaN-boxée porte dans ses bits bas à la place d'un pointeur.

use std::sync::Arc;

use vitte_core::Value;

use crate::channel::ChanShared;

/// Contenu d'une chaîne de caractères du tas : soit possédée, soit empruntée
/// à la table de chaînes de l'image (chaîne "constante" — ne doit jamais
/// être libérée indépendamment de l'image qui la porte).
#[derive(Debug, Clone)]
pub enum StrData {
    /// Chaîne possédée par cet objet (résultat d'une concaténation, par ex.).
    Owned(Box<str>),
    /// Chaîne empruntée à la table de chaînes de l'image source.
    Constant {
        image: Arc<vitte_core::Image>,
        index: u32,
    },
}

impl StrData {
    /// Vue texte de la chaîne, quelle que soit son origine.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            StrData::Owned(s) => s,
            StrData::Constant { image, index } => {
                let bytes = image.string_bytes(*index).unwrap_or(&[]);
                std::str::from_utf8(bytes).unwrap_or("")
            }
        }
    }

    /// Vrai si cette chaîne emprunte son buffer à l'image (ne doit pas être
    /// considérée comme mutable ni comptée séparément par le GC).
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, StrData::Constant { .. })
    }
}

/// Charge utile d'un objet du tas. Un header `marked` commun est porté par
/// [`Slot`], pas par chaque variante.
#[derive(Debug, Clone)]
pub enum ObjData {
    Str(StrData),
    List(Vec<Value>),
    Tuple(Box<[Value]>),
    Chan(Arc<ChanShared>),
}

impl ObjData {
    /// Coût approximatif en octets, pour le déclenchement heuristique du GC.
    /// Il ne s'agit pas d'une comptabilité précise (cf. `sizeof` du C
    /// d'origine) : seule la tendance de croissance compte pour §4.6.
    fn approx_size(&self) -> u64 {
        const HEADER: u64 = 24;
        match self {
            ObjData::Str(StrData::Owned(s)) => HEADER + s.len() as u64,
            ObjData::Str(StrData::Constant { .. }) => HEADER,
            ObjData::List(items) => HEADER + items.len() as u64 * 8,
            ObjData::Tuple(items) => HEADER + items.len() as u64 * 8,
            ObjData::Chan(_) => HEADER + 64,
        }
    }

    /// Type d'objet, pour les messages d'erreur ("expected channel", etc.).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ObjData::Str(_) => "string",
            ObjData::List(_) => "list",
            ObjData::Tuple(_) => "tuple",
            ObjData::Chan(_) => "channel",
        }
    }
}

#[derive(Debug)]
struct Slot {
    marked: bool,
    data: ObjData,
}

/// Le tas d'une VM : une arène d'objets, une liste de trous, et les
/// compteurs pilotant le déclenchement du GC (§4.6).
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    allocated: u64,
    next_gc: u64,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            allocated: 0,
            next_gc: 1024 * 1024,
        }
    }

    /// Octets actuellement comptés comme alloués (somme de `approx_size`).
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Seuil au-delà duquel une collecte doit être déclenchée.
    #[must_use]
    pub const fn next_gc(&self) -> u64 {
        self.next_gc
    }

    /// Vrai si l'allocation cumulée a dépassé le seuil courant.
    #[must_use]
    pub const fn should_collect(&self) -> bool {
        self.allocated > self.next_gc
    }

    /// Recalcule le prochain seuil après une collecte (§4.6 : `allocated * 1.4`).
    pub fn rearm_next_gc(&mut self) {
        self.next_gc = (self.allocated as f64 * vitte_core::GC_HEAP_GROW_FACTOR) as u64;
    }

    /// Alloue un nouvel objet et retourne son index d'arène.
    pub fn alloc(&mut self, data: ObjData) -> u32 {
        self.allocated += data.approx_size();
        let slot = Slot {
            marked: false,
            data,
        };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(slot));
            index
        }
    }

    fn slot(&self, index: u32) -> &Slot {
        self.slots[index as usize]
            .as_ref()
            .expect("arena index refers to a freed or never-allocated slot")
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        self.slots[index as usize]
            .as_mut()
            .expect("arena index refers to a freed or never-allocated slot")
    }

    /// Référence vers la charge utile d'un objet vivant.
    #[must_use]
    pub fn get(&self, index: u32) -> &ObjData {
        &self.slot(index).data
    }

    /// Référence mutable vers la charge utile d'un objet vivant.
    pub fn get_mut(&mut self, index: u32) -> &mut ObjData {
        &mut self.slot_mut(index).data
    }

    /// Marque un objet et retourne `true` s'il n'était pas déjà marqué (pour
    /// piloter l'ajout à la pile grise sans redondance).
    pub fn mark(&mut self, index: u32) -> bool {
        let slot = self.slot_mut(index);
        if slot.marked {
            false
        } else {
            slot.marked = true;
            true
        }
    }

    /// Balaye l'arène : libère tout objet non marqué, démarque les survivants.
    /// Retourne le nombre d'objets libérés.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() as u32 {
            let is_garbage = match &mut self.slots[index as usize] {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if is_garbage {
                if let Some(slot) = self.slots[index as usize].take() {
                    self.allocated = self.allocated.saturating_sub(slot.data.approx_size());
                }
                self.free.push(index);
                freed += 1;
            }
        }
        freed
    }

    /// Nombre d'objets vivants (pour les tests de solidité du GC).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[cfg(test)]
    pub(crate) fn is_marked(&self, index: u32) -> bool {
        self.slot(index).marked
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_freed_slots() {
        let mut heap = Heap::new();
        let a = heap.alloc(ObjData::List(vec![]));
        let b = heap.alloc(ObjData::List(vec![]));
        assert_ne!(a, b);
        heap.mark(b);
        heap.sweep();
        assert_eq!(heap.live_count(), 1);
        let c = heap.alloc(ObjData::List(vec![]));
        assert_eq!(c, a, "freed slot a should be recycled");
    }

    #[test]
    fn sweep_unmarks_survivors() {
        let mut heap = Heap::new();
        let a = heap.alloc(ObjData::Tuple(Box::new([])));
        heap.mark(a);
        heap.sweep();
        assert!(!heap.is_marked(a));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn allocated_counter_drops_on_sweep() {
        let mut heap = Heap::new();
        heap.alloc(ObjData::List(vec![Value::from_f64(1.0); 16]));
        let before = heap.allocated();
        assert!(before > 0);
        heap.sweep();
        assert_eq!(heap.allocated(), 0);
    }
}
