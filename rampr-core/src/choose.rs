use rand::Rng;

/// Picks one item with probability proportional to its weight.
///
/// Zero-weight items are never chosen. Returns `None` when `items` is empty or every weight is
/// zero. Pure apart from the caller-supplied RNG, so a seeded RNG gives a reproducible sequence.
pub fn choose<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [(T, u32)]) -> Option<&'a T> {
    let total: u64 = items.iter().map(|(_, w)| u64::from(*w)).sum();
    if total == 0 {
        return None;
    }

    let mut roll = rng.gen_range(0..total);
    for (item, weight) in items {
        let weight = u64::from(*weight);
        if roll < weight {
            return Some(item);
        }
        roll -= weight;
    }
    None
}
