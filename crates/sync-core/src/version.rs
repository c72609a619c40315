//! Version vector comparison.
//!
//! The daemon reports an opaque list of version tokens for the local and the
//! global copy of a file. Order carries no meaning here; two vectors are
//! converged when they hold the same tokens.

/// Whether two version vectors describe the same revision.
pub fn is_converged(local: &[String], global: &[String]) -> bool {
    if local.len() != global.len() {
        return false;
    }
    let mut local: Vec<&str> = local.iter().map(String::as_str).collect();
    let mut global: Vec<&str> = global.iter().map(String::as_str).collect();
    local.sort_unstable();
    global.sort_unstable();
    local == global
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_order_is_ignored() {
        assert!(is_converged(&v(&["b", "a"]), &v(&["a", "b"])));
    }

    #[test]
    fn test_different_tokens_diverge() {
        assert!(!is_converged(&v(&["a", "b"]), &v(&["a", "c"])));
        assert!(!is_converged(&v(&["a"]), &v(&["a", "b"])));
    }

    #[test]
    fn test_empty_vectors_converge() {
        assert!(is_converged(&[], &[]));
    }
}
