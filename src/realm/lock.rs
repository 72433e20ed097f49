use std::cell::RefCell;
use std::rc::Rc;

use tracing::error;

use super::error::LockProtocolError;

/// Authority code currently runs with inside the realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// Untrusted script is running; host built-ins are guarded.
    Restricted,
    /// Host code is running with its own authority.
    Ambient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockFrame {
    pub locked: bool,
    pub refcount: usize,
}

/// Nested lock/unlock frames of one realm.
///
/// Entering the state already on top of the stack only bumps its refcount.
#[derive(Debug, Default)]
pub struct LockStack {
    frames: RefCell<Vec<LockFrame>>,
}

impl LockStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, locked: bool) {
        let mut frames = self.frames.borrow_mut();
        if let Some(top) = frames.last_mut() {
            if top.locked == locked {
                top.refcount += 1;
                return;
            }
        }
        frames.push(LockFrame {
            locked,
            refcount: 1,
        });
    }

    fn leave(&self, locked: bool) -> Result<(), LockProtocolError> {
        let violation = if locked {
            LockProtocolError::NotLocked
        } else {
            LockProtocolError::NotUnlocked
        };
        let mut frames = self.frames.borrow_mut();
        let top = frames.last_mut().ok_or(violation)?;
        if top.locked != locked {
            return Err(violation);
        }
        top.refcount -= 1;
        if top.refcount == 0 {
            frames.pop();
        }
        Ok(())
    }

    pub fn enter_lock(&self) {
        self.enter(true);
    }

    pub fn leave_lock(&self) -> Result<(), LockProtocolError> {
        self.leave(true)
    }

    pub fn enter_unlock(&self) {
        self.enter(false);
    }

    pub fn leave_unlock(&self) -> Result<(), LockProtocolError> {
        self.leave(false)
    }

    pub fn is_locked(&self) -> bool {
        self.frames
            .borrow()
            .last()
            .map(|frame| frame.locked)
            .unwrap_or(false)
    }

    pub fn trust_level(&self) -> TrustLevel {
        if self.is_locked() {
            TrustLevel::Restricted
        } else {
            TrustLevel::Ambient
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn frames(&self) -> Vec<LockFrame> {
        self.frames.borrow().clone()
    }

    /// Enter a lock frame that is left when the guard drops.
    pub fn lock_guard(self: &Rc<Self>) -> LockGuard {
        self.enter_lock();
        LockGuard {
            stack: Rc::clone(self),
            locked: true,
        }
    }

    /// Enter an unlock frame that is left when the guard drops.
    pub fn unlock_guard(self: &Rc<Self>) -> LockGuard {
        self.enter_unlock();
        LockGuard {
            stack: Rc::clone(self),
            locked: false,
        }
    }
}

/// Scoped lock frame. Leaves the frame on every exit path.
#[must_use = "the frame is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    stack: Rc<LockStack>,
    locked: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.stack.leave(self.locked) {
            error!(target = "webrealm", error = %err, "lock stack violation while leaving guarded frame");
        }
    }
}
