//! Utility macros for error handling.

/// Creates a [`crate::error::MarctabError`] from an error kind and
/// description, with an optional detail string.
///
/// # Examples
/// ```rust,no_run
/// use marctab::error::ErrorKind;
/// use marctab::marctab_error;
///
/// let error = marctab_error!(ErrorKind::Parse, "parsing");
/// let error = marctab_error!(
///     ErrorKind::Parse,
///     "parsing",
///     format!("unknown data type in field \"{}\"", "245")
/// );
/// ```
#[macro_export]
macro_rules! marctab_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MarctabError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MarctabError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns a [`crate::error::MarctabError`] from the current
/// function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::marctab_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::marctab_error!($kind, $desc, $detail))
    };
}
