//! Valeurs observables et abonnements à portée limitée.
//!
//! Remplace l'observation clé-valeur de la plateforme : chaque propriété
//! est un [`Observable`] auquel on s'abonne individuellement. L'abonnement
//! retourne une [`Observation`] ; la supprimer (drop) désabonne le callback.
//!
//! Tout vit sur le thread principal, d'où `Rc`/`RefCell` plutôt que
//! `Arc`/`Mutex`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Callback<T> = Rc<dyn Fn(&T)>;

struct Observers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Valeur dont chaque changement est notifié aux observateurs.
///
/// Les notifications n'ont lieu que si la nouvelle valeur diffère de
/// l'ancienne.
pub struct Observable<T> {
    value: RefCell<T>,
    observers: Rc<RefCell<Observers<T>>>,
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
            observers: Rc::new(RefCell::new(Observers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Copie de la valeur courante.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Remplace la valeur. Retourne `true` si elle a changé.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| *current = value)
    }

    /// Modifie la valeur en place puis notifie si elle a changé.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) -> bool {
        let snapshot = {
            let mut value = self.value.borrow_mut();
            let before = value.clone();
            mutate(&mut value);
            if *value == before {
                return false;
            }
            value.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Enregistre un callback appelé à chaque changement.
    #[must_use = "l'abonnement est annulé dès que l'Observation est supprimée"]
    pub fn observe(&self, callback: impl Fn(&T) + 'static) -> Observation {
        let mut observers = self.observers.borrow_mut();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.entries.push((id, Rc::new(callback)));

        let weak: Weak<RefCell<Observers<T>>> = Rc::downgrade(&self.observers);
        Observation {
            cancel: Some(Box::new(move || {
                if let Some(observers) = weak.upgrade() {
                    observers.borrow_mut().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Nombre d'observateurs encore abonnés.
    pub fn observer_count(&self) -> usize {
        self.observers.borrow().entries.len()
    }

    fn notify(&self, value: &T) {
        // Copie de la liste : un callback peut s'abonner ou se désabonner.
        let callbacks: Vec<Callback<T>> = self
            .observers
            .borrow()
            .entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// Jeton d'abonnement. Le callback est retiré quand il est supprimé.
///
/// Ne garde qu'une référence faible vers la liste d'observateurs : la
/// propriété observée peut disparaître avant l'observation.
pub struct Observation {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_notifies_on_change_only() {
        let value = Observable::new(1);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let _observation = value.observe(move |_| counter.set(counter.get() + 1));

        assert!(value.set(2));
        assert!(!value.set(2));
        assert_eq!(calls.get(), 1);
        assert_eq!(value.get(), 2);
    }

    #[test]
    fn test_callback_receives_new_value() {
        let value = Observable::new(String::from("a"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _observation = value.observe(move |v: &String| sink.borrow_mut().push(v.clone()));

        value.set("b".into());
        value.update(|v| v.push('c'));
        assert_eq!(*seen.borrow(), vec!["b".to_string(), "bc".to_string()]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let value = Observable::new(false);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let observation = value.observe(move |_| counter.set(counter.get() + 1));
        assert_eq!(value.observer_count(), 1);

        drop(observation);
        assert_eq!(value.observer_count(), 0);
        value.set(true);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_observation_outliving_observable() {
        let value = Observable::new(0u8);
        let observation = value.observe(|_| {});
        drop(value);
        drop(observation);
    }

    #[test]
    fn test_callback_may_read_value() {
        let value = Rc::new(Observable::new(0));
        let inner = value.clone();
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let _observation = value.observe(move |_| sink.set(inner.get()));

        value.set(7);
        assert_eq!(seen.get(), 7);
    }
}
