use crate::TransferError;

/// Reduces a client-supplied filename to its base name.
///
/// Both `/` and `\` count as separators and trailing separators are
/// ignored, so `"../../etc/passwd"` becomes `"passwd"` and `"dir/file/"`
/// becomes `"file"`.
///
/// Rejects:
/// - Empty names (or names made only of separators)
/// - `.` and `..`
/// - Names containing NUL
pub fn sanitize_filename(filename: &str) -> Result<String, TransferError> {
    if filename.contains('\0') {
        return Err(TransferError::InvalidFilename(format!(
            "NUL byte in {filename:?}"
        )));
    }

    let base = filename
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    match base {
        "" => Err(TransferError::InvalidFilename(format!(
            "no base name in {filename:?}"
        ))),
        "." | ".." => Err(TransferError::InvalidFilename(format!(
            "{filename:?} does not name a file"
        ))),
        name => Ok(name.to_string()),
    }
}
