//! task.rs — runtime de tâches : une VM indépendante par OS thread (§4.8, §5).
//!
//! `SPAWN` arme un drapeau sur la VM courante ; le `CALL` suivant le consulte
//! et, s'il est posé, construit une VM enfant (partageant `funcs`/`strings`
//! via l'image, avec sa propre pile/tas/chaîne de frames) et l'exécute sur un
//! thread neuf plutôt que de pousser une frame sur la VM courante.
//!
//! Le parent garde trace de ses enfants et les rejoint par backpressure dès
//! que `MAX_COROS` tâches actives sont atteintes, puis rejoint tout ce qui
//! reste à la sortie de sa propre boucle.

use std::collections::VecDeque;
use std::thread::JoinHandle;

use vitte_core::MAX_COROS;

use crate::VmError;

/// Résultat d'une tâche enfant, tel que rejoint par le parent.
pub type TaskHandle = JoinHandle<Result<(), VmError>>;

/// Suivi des tâches enfants actives d'une VM.
#[derive(Debug, Default)]
pub struct Coroutines {
    handles: VecDeque<TaskHandle>,
}

impl Coroutines {
    #[must_use]
    pub fn new() -> Self {
        Coroutines {
            handles: VecDeque::new(),
        }
    }

    /// Nombre de tâches actuellement suivies (rejointes ou non).
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Enregistre une tâche fraîchement démarrée ; si la limite `MAX_COROS`
    /// est atteinte, rejoint d'abord la plus ancienne tâche non suivie
    /// (backpressure primitive décrite en §4.8).
    pub fn push(&mut self, handle: TaskHandle) -> Result<(), VmError> {
        if self.handles.len() >= MAX_COROS {
            self.join_oldest()?;
        }
        self.handles.push_back(handle);
        Ok(())
    }

    fn join_oldest(&mut self) -> Result<(), VmError> {
        if let Some(handle) = self.handles.pop_front() {
            return join_one(handle);
        }
        Ok(())
    }

    /// Rejoint toutes les tâches restantes (fin de la boucle d'interprétation
    /// du parent, §4.8).
    pub fn join_all(&mut self) -> Result<(), VmError> {
        while let Some(handle) = self.handles.pop_front() {
            join_one(handle)?;
        }
        Ok(())
    }
}

fn join_one(handle: TaskHandle) -> Result<(), VmError> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Ok(()), // un panic de tâche ne doit pas faire paniquer le parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn join_all_waits_for_every_task() {
        let mut coros = Coroutines::new();
        for _ in 0..4 {
            coros
                .push(thread::spawn(|| {
                    thread::sleep(std::time::Duration::from_millis(5));
                    Ok(())
                }))
                .unwrap();
        }
        coros.join_all().unwrap();
        assert!(coros.is_empty());
    }

    #[test]
    fn push_past_max_coros_joins_oldest_first() {
        let mut coros = Coroutines::new();
        for _ in 0..MAX_COROS {
            coros.push(thread::spawn(|| Ok(()))).unwrap();
        }
        assert_eq!(coros.len(), MAX_COROS);
        coros.push(thread::spawn(|| Ok(()))).unwrap();
        assert_eq!(coros.len(), MAX_COROS);
    }
}
