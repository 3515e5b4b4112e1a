use crate::error::TransferError;

/// Checks a server-side logical path such as `/tempZone/home/alice/data.bin`.
///
/// Rejects empty and relative paths, `.` or `..` segments, empty segments
/// other than a trailing slash, and NUL bytes.
pub fn validate_logical_path(logical_path: &str) -> Result<(), TransferError> {
    if logical_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if !logical_path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "logical path must be absolute: {logical_path}"
        )));
    }
    if logical_path.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte in path: {logical_path:?}"
        )));
    }

    let trimmed = logical_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TransferError::InvalidPath("path names the root collection".into()));
    }

    for segment in trimmed[1..].split('/') {
        match segment {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty segment in path: {logical_path}"
                )));
            }
            "." | ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "relative segment not allowed: {logical_path}"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}
