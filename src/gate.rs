//! Admission control for concurrent logins.
//!
//! Every attempt is counted, admitted or not, and must be released with
//! [`LoginGate::leave`]. [`LoginGate::enter`] returns a guard doing so on
//! drop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Reason a login was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("too many logins in progress")]
    Capacity,
    #[error("a login is already in progress for this user")]
    Duplicate,
}

/// Reference to an admitted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    index: usize,
    generation: u64,
}

/// Outcome of [`LoginGate::try_enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub denial: Option<Denial>,
    /// Present only when admitted.
    pub handle: Option<EntryHandle>,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        self.denial.is_none()
    }
}

#[derive(Debug)]
struct Node {
    username: String,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    node: Option<Node>,
}

/// Ordered list of logins in progress, stored in an arena.
///
/// Slots are recycled through a free list. A generation counter per slot
/// makes a handle of a released entry harmless.
#[derive(Debug, Default)]
struct EntryList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl EntryList {
    fn push_back(&mut self, username: String) -> EntryHandle {
        let node = Node {
            username,
            prev: self.tail,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            },
        };
        let slot = &mut self.slots[index];
        slot.node = Some(node);
        let generation = slot.generation;

        match self.tail {
            Some(tail) => {
                if let Some(node) = self.slots[tail].node.as_mut() {
                    node.next = Some(index);
                }
            },
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        EntryHandle { index, generation }
    }

    /// Unlink the entry. Stale handles are ignored.
    fn remove(&mut self, handle: EntryHandle) -> Option<String> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        match node.prev {
            Some(prev) => {
                if let Some(prev) = self.slots[prev].node.as_mut() {
                    prev.next = node.next;
                }
            },
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next) = self.slots[next].node.as_mut() {
                    next.prev = node.prev;
                }
            },
            None => self.tail = node.prev,
        }

        self.free.push(handle.index);
        self.len -= 1;
        Some(node.username)
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.slots.get(cursor?)?.node.as_ref()?;
            cursor = node.next;
            Some(node.username.as_str())
        })
    }

    fn contains(&self, username: &str) -> bool {
        self.iter().any(|entry| entry == username)
    }
}

#[derive(Debug, Default)]
struct State {
    in_progress: usize,
    users: EntryList,
}

/// Bounds logins in progress, optionally one per username.
#[derive(Debug)]
pub struct LoginGate {
    capacity: usize,
    dedup: bool,
    state: Mutex<State>,
}

impl LoginGate {
    pub fn new(capacity: usize, dedup: bool) -> Self {
        Self {
            capacity,
            dedup,
            state: Mutex::new(State::default()),
        }
    }

    // gate state stays consistent under a panic: each mutation is complete
    // before any call that could unwind.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count an attempt and admit it if there is room.
    ///
    /// Must be paired with [`LoginGate::leave`], even when denied.
    pub fn try_enter(&self, username: &str) -> Admission {
        let mut state = self.lock();
        state.in_progress += 1;

        if state.in_progress > self.capacity {
            return Admission {
                denial: Some(Denial::Capacity),
                handle: None,
            };
        }

        let username = username.to_lowercase();
        if self.dedup && state.users.contains(&username) {
            return Admission {
                denial: Some(Denial::Duplicate),
                handle: None,
            };
        }

        Admission {
            denial: None,
            handle: Some(state.users.push_back(username)),
        }
    }

    /// Release an attempt.
    pub fn leave(&self, handle: Option<EntryHandle>) {
        let mut state = self.lock();
        state.in_progress = state.in_progress.saturating_sub(1);

        if let Some(handle) = handle {
            state.users.remove(handle);
        }
    }

    /// Enter the gate, releasing it when the returned permit drops.
    pub fn enter(self: &Arc<Self>, username: &str) -> LoginPermit {
        let admission = self.try_enter(username);

        LoginPermit {
            gate: Arc::clone(self),
            admission,
        }
    }

    /// Attempts currently counted.
    pub fn in_progress(&self) -> usize {
        self.lock().in_progress
    }

    /// Admitted users, oldest first.
    pub fn users_in_progress(&self) -> Vec<String> {
        self.lock().users.iter().map(str::to_owned).collect()
    }
}

/// Scoped gate entry.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct LoginPermit {
    gate: Arc<LoginGate>,
    admission: Admission,
}

impl LoginPermit {
    /// Whether the login may proceed.
    pub fn check(&self) -> Result<(), Denial> {
        match self.admission.denial {
            Some(denial) => Err(denial),
            None => Ok(()),
        }
    }
}

impl Drop for LoginPermit {
    fn drop(&mut self) {
        self.gate.leave(self.admission.handle.take());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    #[test]
    fn test_capacity() {
        let gate = LoginGate::new(2, false);

        let first = gate.try_enter("a@b.com");
        let second = gate.try_enter("c@d.com");
        assert!(first.is_admitted());
        assert!(second.is_admitted());

        let third = gate.try_enter("e@f.com");
        assert_eq!(third.denial, Some(Denial::Capacity));
        assert_eq!(third.handle, None);
        // denied attempts are counted too.
        assert_eq!(gate.in_progress(), 3);

        gate.leave(third.handle);
        gate.leave(first.handle);
        assert_eq!(gate.in_progress(), 1);
        assert_eq!(gate.users_in_progress(), vec!["c@d.com"]);

        let fourth = gate.try_enter("e@f.com");
        assert!(fourth.is_admitted());
        assert_eq!(gate.users_in_progress(), vec!["c@d.com", "e@f.com"]);
    }

    #[test]
    fn test_zero_capacity() {
        let gate = LoginGate::new(0, false);
        assert_eq!(gate.try_enter("a@b.com").denial, Some(Denial::Capacity));
    }

    #[test]
    fn test_dedup() {
        let gate = LoginGate::new(10, true);

        let first = gate.try_enter("a@b.com");
        assert!(first.is_admitted());
        assert_eq!(gate.try_enter("a@b.com").denial, Some(Denial::Duplicate));
        assert_eq!(gate.try_enter("A@B.COM").denial, Some(Denial::Duplicate));
        assert!(gate.try_enter("c@d.com").is_admitted());

        gate.leave(first.handle);
        assert!(gate.try_enter("a@b.com").is_admitted());

        let gate = LoginGate::new(10, false);
        assert!(gate.try_enter("a@b.com").is_admitted());
        assert!(gate.try_enter("a@b.com").is_admitted());
    }

    #[test]
    fn test_list_order_after_removals() {
        let gate = LoginGate::new(10, false);
        let handles: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| gate.try_enter(name).handle)
            .collect();

        gate.leave(handles[1]);
        gate.leave(handles[3]);
        assert_eq!(gate.users_in_progress(), vec!["a", "c"]);

        // freed slots are reused.
        let e = gate.try_enter("e").handle;
        assert_eq!(gate.users_in_progress(), vec!["a", "c", "e"]);

        gate.leave(handles[0]);
        gate.leave(e);
        gate.leave(handles[2]);
        assert!(gate.users_in_progress().is_empty());
        assert_eq!(gate.in_progress(), 0);
    }

    #[test]
    fn test_stale_handle() {
        let gate = LoginGate::new(10, false);
        let first = gate.try_enter("a").handle;
        gate.leave(first);

        let second = gate.try_enter("b").handle;
        assert_eq!(second.map(|h| h.index), first.map(|h| h.index));

        // releasing the stale handle leaves the new entry untouched.
        gate.leave(first);
        assert_eq!(gate.users_in_progress(), vec!["b"]);
        gate.leave(second);
        assert!(gate.users_in_progress().is_empty());
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let gate = Arc::new(LoginGate::new(1, true));

        {
            let permit = gate.enter("a@b.com");
            assert_eq!(permit.check(), Ok(()));

            let denied = gate.enter("c@d.com");
            assert_eq!(denied.check(), Err(Denial::Capacity));
            assert_eq!(gate.in_progress(), 2);
        }

        assert_eq!(gate.in_progress(), 0);
        assert!(gate.users_in_progress().is_empty());
        assert_eq!(gate.enter("c@d.com").check(), Ok(()));
    }

    #[test]
    fn test_permit_releases_on_panic() {
        let gate = Arc::new(LoginGate::new(1, false));

        let cloned = Arc::clone(&gate);
        let result = thread::spawn(move || {
            let _permit = cloned.enter("a@b.com");
            panic!("login crashed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(gate.in_progress(), 0);
        assert_eq!(gate.enter("a@b.com").check(), Ok(()));
    }

    #[test]
    fn test_concurrent_attempts() {
        const THREADS: usize = 16;
        const CAPACITY: usize = 4;

        let gate = Arc::new(LoginGate::new(CAPACITY, false));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let permit = gate.enter(&format!("user{i}@b.com"));
                    let admitted = permit.check().is_ok();
                    // hold every permit until all threads tried.
                    barrier.wait();
                    admitted
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, CAPACITY);
        assert_eq!(gate.in_progress(), 0);
        assert!(gate.users_in_progress().is_empty());
    }
}
