//! Exit code constants for the chadgi CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, missing project directory, invalid config)
//! - 2: Lock not acquired, held by another session, or ownership refused
//! - 3: Lock storage failure
//! - 4: Command run under a lock exited unsuccessfully

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, missing project directory, or invalid config.
pub const USER_ERROR: i32 = 1;

/// Lock contention: not acquired, blocked by another session, or not the owner.
pub const LOCK_HELD: i32 = 2;

/// Storage failure: the lock directory could not be read or written.
pub const STORAGE_FAILURE: i32 = 3;

/// A command run by `lock run` failed; its own status is in the message.
pub const COMMAND_FAILED: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, LOCK_HELD, STORAGE_FAILURE, COMMAND_FAILED];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn lock_held_is_not_a_user_error() {
        // The bash loop distinguishes "try another issue" from "fix your setup".
        assert_ne!(LOCK_HELD, USER_ERROR);
        assert_eq!(LOCK_HELD, 2);
    }
}
