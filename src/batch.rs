/// Splits `items` into consecutive batches of at most `max` elements,
/// preserving order.
pub fn chunk<T>(items: Vec<T>, max: usize) -> Vec<Vec<T>> {
    if items.is_empty() || max == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut current = Vec::with_capacity(max.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() >= max {
            out.push(current);
            current = Vec::with_capacity(max);
        }
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_splits_into_batches() {
        let items: Vec<u64> = (0..25).collect();
        let batches = chunk(items, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[1].len(), 10);
        assert_eq!(batches[2].len(), 5);
        assert_eq!(batches[2], vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn chunk_of_empty_input_is_empty() {
        let batches = chunk(Vec::<u64>::new(), 10);
        assert!(batches.is_empty());
    }
}
