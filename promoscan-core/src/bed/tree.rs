use bio::data_structures::interval_tree::{IntervalTree, IntervalTreeIterator};
use std::collections::HashMap;
use std::ops::Range;

use super::{BEDLike, GenomicRange};

/// Per-chromosome interval trees answering overlap queries.
///
/// Inclusive 1-based records are stored as half-open ranges, which is what
/// the underlying tree expects.
pub struct BedTree<D>(HashMap<String, IntervalTree<u64, D>>);

impl<D> Default for BedTree<D> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

fn to_half_open<B: BEDLike>(bed: &B) -> Range<u64> {
    bed.start()..bed.end() + 1
}

impl<D, B: BEDLike> FromIterator<(B, D)> for BedTree<D> {
    fn from_iter<I: IntoIterator<Item = (B, D)>>(iter: I) -> Self {
        let mut hmap: HashMap<String, IntervalTree<u64, D>> = HashMap::new();
        for (bed, data) in iter {
            hmap.entry(bed.chrom().to_string())
                .or_insert_with(IntervalTree::new)
                .insert(to_half_open(&bed), data);
        }
        BedTree(hmap)
    }
}

/// Iterates over the entries overlapping a query. Created by [`BedTree::find`].
pub struct BedTreeIterator<'a, D> {
    chrom: String,
    interval_tree_iterator: Option<IntervalTreeIterator<'a, u64, D>>,
}

impl<'a, D: 'a> Iterator for BedTreeIterator<'a, D> {
    type Item = (GenomicRange, &'a D);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.interval_tree_iterator.as_mut()?.next()?;
        let bed = GenomicRange::new(
            self.chrom.as_str(),
            item.interval().start,
            item.interval().end - 1,
        );
        Some((bed, item.data()))
    }
}

impl<D> BedTree<D> {
    pub fn find<B: BEDLike>(&self, bed: &B) -> BedTreeIterator<'_, D> {
        let chrom = bed.chrom().to_string();
        let interval_tree_iterator = self.0.get(&chrom).map(|tree| tree.find(to_half_open(bed)));
        BedTreeIterator { chrom, interval_tree_iterator }
    }

    pub fn is_overlapped<B: BEDLike>(&self, bed: &B) -> bool {
        self.find(bed).next().is_some()
    }
}
