/// Estimate the cost of an item.  This is usually in bytes.
///
/// The cache collects least recently used entries once their summed cost approaches the quota.  Entries created by the
/// default allocator are costed with this.
pub trait EstimateCost {
    fn estimate_cost(&self) -> usize;
}

impl EstimateCost for Vec<u8> {
    fn estimate_cost(&self) -> usize {
        self.len()
    }
}

impl EstimateCost for Box<[u8]> {
    fn estimate_cost(&self) -> usize {
        self.len()
    }
}
