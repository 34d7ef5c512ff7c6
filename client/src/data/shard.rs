use std::{num::NonZeroUsize, ops::Range};

/// Cuts `0..total` into one contiguous range per client.
///
/// The ranges cover `0..total` in order and their lengths differ by at most
/// one. The first `total % clients` ranges are the longer ones.
pub fn balanced_ranges(
    total: usize,
    clients: NonZeroUsize,
) -> impl Iterator<Item = Range<usize>> {
    let clients = clients.get();
    let base = total / clients;
    let rem = total % clients;

    (0..clients).scan(0, move |start, client_id| {
        let end = *start + base + usize::from(client_id < rem);
        let range = *start..end;
        *start = end;
        Some(range)
    })
}
