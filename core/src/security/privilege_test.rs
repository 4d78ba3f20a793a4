use std::panic::{AssertUnwindSafe, catch_unwind};

use super::*;
use crate::error::EngineError;

#[test]
fn test_check_outside_privileged_frame_fails() {
    assert!(!AccessController::is_elevated());
    let err = AccessController::check(Permission::GetContext).unwrap_err();
    assert!(matches!(err, EngineError::Privilege(Permission::GetContext)));
    assert_eq!(err.to_string(), "operation requires privilege getContext");
}

#[test]
fn test_grant_is_scoped_to_closure() {
    let inside = AccessController::do_privileged(&[Permission::CreateClassLoader], || {
        AccessController::check(Permission::CreateClassLoader).is_ok()
    });
    assert!(inside);
    assert!(AccessController::check(Permission::CreateClassLoader).is_err());
    assert!(!AccessController::is_elevated());
}

#[test]
fn test_innermost_frame_decides() {
    AccessController::do_privileged(&[Permission::GetContext, Permission::SetGlobal], || {
        assert!(AccessController::check(Permission::SetGlobal).is_ok());
        AccessController::do_privileged(&[Permission::CreateClassLoader], || {
            assert!(AccessController::check(Permission::CreateClassLoader).is_ok());
            assert!(AccessController::check(Permission::SetGlobal).is_err());
        });
        assert!(AccessController::check(Permission::SetGlobal).is_ok());
        assert!(AccessController::check(Permission::CreateClassLoader).is_err());
    });
}

#[test]
fn test_grant_released_on_error_and_panic() {
    let result: Result<(), EngineError> = AccessController::do_privileged(&[Permission::SetGlobal], || {
        AccessController::check(Permission::SetGlobal)?;
        Err(EngineError::internal("boom"))
    });
    assert!(result.is_err());
    assert!(!AccessController::is_elevated());

    let unwound = catch_unwind(AssertUnwindSafe(|| {
        AccessController::do_privileged(&[Permission::SetGlobal], || panic!("inside elevation"))
    }));
    assert!(unwound.is_err());
    assert!(!AccessController::is_elevated());
    assert!(AccessController::check(Permission::SetGlobal).is_err());
}

#[test]
fn test_grant_does_not_cross_threads() {
    AccessController::do_privileged(&[Permission::GetContext], || {
        let other = std::thread::spawn(|| AccessController::check(Permission::GetContext).is_ok())
            .join()
            .unwrap();
        assert!(!other);
        assert!(AccessController::check(Permission::GetContext).is_ok());
    });
}
