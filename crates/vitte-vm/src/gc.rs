//! gc.rs — collecteur tricolore mark-sweep (§4.6).
//!
//! La collecte est déclenchée une fois par instruction complète (au début de
//! la boucle de dispatch), jamais au milieu de la construction d'un objet :
//! l'original déclenche une collecte à l'intérieur même de `allocate()`, ce
//! qui peut surprendre un objet fraîchement créé avant qu'il ne soit
//! rattaché à la pile ou aux locales (son unique propriétaire potentiel).
//! Échantillonner aux frontières d'instruction élimine ce risque sans rien
//! changer à l'algorithme ni aux invariants observables : entre deux
//! instructions complètes, la pile et les frames sont toujours entièrement
//! cohérentes, donc tout objet vivant y est déjà racine.

use vitte_core::Value;

use crate::frame::CallFrame;
use crate::heap::{Heap, ObjData};

fn mark_value(heap: &mut Heap, gray: &mut Vec<u32>, value: Value) {
    if value.is_obj() {
        let index = value.as_obj_index();
        if heap.mark(index) {
            gray.push(index);
        }
    }
}

fn blacken(heap: &mut Heap, gray: &mut Vec<u32>, index: u32) {
    match heap.get(index) {
        ObjData::List(items) => {
            let items = items.clone();
            for item in items {
                mark_value(heap, gray, item);
            }
        }
        ObjData::Tuple(items) => {
            let items = items.clone();
            for item in items.iter() {
                mark_value(heap, gray, *item);
            }
        }
        ObjData::Str(_) | ObjData::Chan(_) => {}
    }
}

/// Exécute un cycle complet : marquage des racines (pile + locales de
/// chaque frame de la chaîne), traçage, balayage, puis réarmement du seuil.
pub fn collect(heap: &mut Heap, stack: &[Value], frames: &[CallFrame]) {
    let mut gray = Vec::with_capacity(8);

    for &value in stack {
        mark_value(heap, &mut gray, value);
    }
    for frame in frames {
        for &value in &frame.locals {
            mark_value(heap, &mut gray, value);
        }
    }

    while let Some(index) = gray.pop() {
        blacken(heap, &mut gray, index);
    }

    heap.sweep();
    heap.rearm_next_gc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::ObjData;

    #[test]
    fn unreachable_object_is_collected() {
        let mut heap = Heap::new();
        heap.alloc(ObjData::List(vec![]));
        collect(&mut heap, &[], &[]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn object_reachable_from_stack_survives() {
        let mut heap = Heap::new();
        let idx = heap.alloc(ObjData::List(vec![]));
        let stack = [Value::from_obj_index(idx)];
        collect(&mut heap, &stack, &[]);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn nested_list_children_are_traced() {
        let mut heap = Heap::new();
        let inner = heap.alloc(ObjData::List(vec![]));
        let outer = heap.alloc(ObjData::List(vec![Value::from_obj_index(inner)]));
        let stack = [Value::from_obj_index(outer)];
        collect(&mut heap, &stack, &[]);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn next_gc_scales_by_growth_factor() {
        let mut heap = Heap::new();
        heap.alloc(ObjData::List(vec![Value::from_f64(0.0); 100]));
        let stack = [];
        collect(&mut heap, &stack, &[]);
        let allocated = heap.allocated() as f64;
        let expected = allocated * vitte_core::GC_HEAP_GROW_FACTOR;
        assert!((heap.next_gc() as f64 - expected).abs() <= 1.0);
    }
}
