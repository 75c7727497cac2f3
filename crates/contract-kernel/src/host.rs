//! Boundary to the host city simulation.
//!
//! Every goal check is a synchronous read against whatever the host reports at
//! call time. Only the funds operations mutate host state.

pub trait CityHost {
    /// Number of constructed instances of a draft (buildings and roads alike).
    fn draft_count(&self, draft_id: &str) -> u64;

    /// Population at a wealth tier, or overall when `wealth_level` is `None`.
    fn population(&self, wealth_level: Option<u8>) -> u64;

    /// Happiness fraction in [0, 1] for a named category.
    fn happiness(&self, category: &str) -> f64;

    /// Combined monthly income.
    fn monthly_income(&self) -> i64;

    /// Current rank tier.
    fn rank(&self) -> u32;

    fn funds(&self) -> i64;

    fn credit(&mut self, amount: i64);

    fn debit(&mut self, amount: i64);

    /// Resolves a draft reference from the content catalog to its canonical id.
    fn resolve_draft(&self, draft_id: &str) -> Option<String>;
}
