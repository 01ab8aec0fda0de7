//! Small helpers shared across the crate.

/// Returns early with `Err($error)` when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(code.len() == 3, ParseError::malformed_first_line(line, "status code must be 3 digits"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
