//! Explicit stage ordering for a run.
//!
//! Every stage declares the minimum [`StageState`] it needs. Checks happen
//! before any file is written or process spawned, so an out-of-order call is
//! rejected deterministically.

use crate::core::errors::StageError;
use crate::core::types::{Stage, StageState};

/// Minimum state a run must be in before `stage` may execute.
pub fn required_state(stage: Stage) -> StageState {
    match stage {
        Stage::SubmitSpecification => StageState::Empty,
        Stage::SubmitInterpreter => StageState::Specified,
        Stage::RunExample => StageState::Built,
    }
}

/// Reject `stage` unless `current` satisfies its prerequisite.
pub fn check_prerequisite(stage: Stage, current: StageState) -> Result<(), StageError> {
    let required = required_state(stage);
    if current < required {
        return Err(StageError::Prerequisite {
            stage,
            required,
            current,
        });
    }
    Ok(())
}

/// State after a parser artifact was (re)generated.
///
/// Any executable built from an earlier artifact is stale from here on.
pub fn after_specification() -> StageState {
    StageState::Specified
}

/// State after the compiler ran to completion.
pub fn after_build(produced_executable: bool) -> StageState {
    if produced_executable {
        StageState::Built
    } else {
        StageState::Specified
    }
}

/// State after an example ran against the current executable.
pub fn after_example(current: StageState) -> StageState {
    current.max(StageState::Executed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specification_is_always_allowed() {
        for state in [
            StageState::Empty,
            StageState::Specified,
            StageState::Built,
            StageState::Executed,
        ] {
            assert!(check_prerequisite(Stage::SubmitSpecification, state).is_ok());
        }
    }

    #[test]
    fn interpreter_requires_specification() {
        let err = check_prerequisite(Stage::SubmitInterpreter, StageState::Empty).unwrap_err();
        assert!(matches!(
            err,
            StageError::Prerequisite {
                stage: Stage::SubmitInterpreter,
                required: StageState::Specified,
                current: StageState::Empty,
            }
        ));
        assert!(check_prerequisite(Stage::SubmitInterpreter, StageState::Specified).is_ok());
        assert!(check_prerequisite(Stage::SubmitInterpreter, StageState::Executed).is_ok());
    }

    #[test]
    fn example_requires_build() {
        assert!(check_prerequisite(Stage::RunExample, StageState::Specified).is_err());
        assert!(check_prerequisite(Stage::RunExample, StageState::Built).is_ok());
        assert!(check_prerequisite(Stage::RunExample, StageState::Executed).is_ok());
    }

    #[test]
    fn respecification_invalidates_build() {
        assert_eq!(after_specification(), StageState::Specified);
        assert_eq!(after_build(false), StageState::Specified);
        assert_eq!(after_build(true), StageState::Built);
        assert_eq!(after_example(StageState::Built), StageState::Executed);
    }
}
