/// Page size for a paginated read: the requested limit, never above `max_rows`.
pub fn effective_limit(requested: Option<usize>, max_rows: usize) -> usize {
    requested.unwrap_or(max_rows).min(max_rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_max_rows() {
        assert_eq!(effective_limit(None, 1000), 1000);
        assert_eq!(effective_limit(Some(10), 1000), 10);
        assert_eq!(effective_limit(Some(5000), 1000), 1000);
        assert_eq!(effective_limit(Some(0), 1000), 0);
    }
}
