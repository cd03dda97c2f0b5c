use std::io;
use std::path::Path;

/// Longest name accepted for a namespace, staged file or archive entry.
pub const MAX_NAME_LEN: usize = 255;

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

/// Checks that `name` is usable as a single directory or file name under the
/// staging root. Nothing is rewritten: a bad name is an error.
pub fn validate_component(name: &str) -> io::Result<&str> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(invalid(format!("'{}' is not a valid staging name", name)));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "staging name is longer than {} bytes",
            MAX_NAME_LEN
        )));
    }

    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        tracing::warn!("Rejected staging name with path characters: {:?}", name);
        return Err(invalid(format!("'{}' must be a single path component", name)));
    }

    Ok(name)
}

/// Reduces an input file name to a flat archive entry name: any directory part
/// is dropped and reserved characters become '_'.
pub fn sanitize_entry_name(filename: &str) -> io::Result<String> {
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() || name == ".." {
        return Err(invalid(format!("'{}' has no usable file name", filename)));
    }

    if normalized.contains("..") || normalized.contains('/') {
        tracing::warn!("Flattening entry name with path components: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    Ok(sanitized)
}
