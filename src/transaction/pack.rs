/*!
 * Bin packing of manifests by target size.
*/

/// Packs `items` into bins whose aggregate weight stays within `target`,
/// scanning from the end of the list with a lookback of one: each item is
/// only considered against the currently open bin, so input order is
/// preserved and the concatenation of the returned bins equals the input.
///
/// Because packing starts from the end, the bin left under-filled is the
/// first one, which is the bin a later merge pass picks up again.
///
/// A single item heavier than `target` gets a bin of its own.
pub(crate) fn pack_end<T>(
    items: Vec<T>,
    weight: impl Fn(&T) -> u64,
    target: u64,
) -> Vec<Vec<T>> {
    let mut bins: Vec<Vec<T>> = Vec::new();
    let mut bin: Vec<T> = Vec::new();
    let mut bin_weight = 0u64;
    for item in items.into_iter().rev() {
        let item_weight = weight(&item);
        if !bin.is_empty() && bin_weight + item_weight > target {
            bin.reverse();
            bins.push(std::mem::take(&mut bin));
            bin_weight = 0;
        }
        bin_weight += item_weight;
        bin.push(item);
    }
    if !bin.is_empty() {
        bin.reverse();
        bins.push(bin);
    }
    bins.reverse();
    bins
}
