use std::cell::RefCell;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Capabilities guarded by [`AccessController::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Create an isolated loading context and define a class into it.
    CreateClassLoader,
    /// Read the engine context bound to the current thread.
    GetContext,
    /// Replace the current global object.
    SetGlobal,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::CreateClassLoader => "createClassLoader",
            Permission::GetContext => "getContext",
            Permission::SetGlobal => "setGlobal",
        };
        f.write_str(name)
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<&'static [Permission]>> = const { RefCell::new(Vec::new()) };
}

/// Pops its frame (and anything pushed above it) when dropped, including
/// during unwinding.
struct ElevationGuard {
    depth: usize,
}

impl ElevationGuard {
    fn push(permissions: &'static [Permission]) -> Self {
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(permissions);
            frames.len() - 1
        });
        Self { depth }
    }
}

impl Drop for ElevationGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| frames.borrow_mut().truncate(self.depth));
    }
}

pub struct AccessController;

impl AccessController {
    /// Run `f` with `permissions` granted on this thread. The grant ends when
    /// `f` returns or unwinds.
    pub fn do_privileged<F, R>(permissions: &'static [Permission], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ElevationGuard::push(permissions);
        tracing::trace!(?permissions, "privileged frame entered");
        f()
    }

    /// Only the innermost frame counts; an outer grant does not leak into a
    /// narrower nested one.
    pub fn check(permission: Permission) -> EngineResult<()> {
        let granted = FRAMES.with(|frames| {
            frames
                .borrow()
                .last()
                .is_some_and(|frame| frame.contains(&permission))
        });
        if granted {
            Ok(())
        } else {
            Err(EngineError::Privilege(permission))
        }
    }

    pub fn is_elevated() -> bool {
        FRAMES.with(|frames| !frames.borrow().is_empty())
    }
}
