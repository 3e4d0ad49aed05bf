/// Returns `Err($error)` early when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(src.len() <= limits.max_header_bytes, ParseError::too_large_header(src.len(), limits.max_header_bytes));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
